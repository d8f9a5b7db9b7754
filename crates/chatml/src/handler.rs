//! Per-connection handler: hello handshake, then a member session.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `Hello` (within the handshake timeout) and validate it
//!   2. Look up or create the named room
//!   3. Run a `MemberSession` until it ends

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chatml_protocol::{Codec, Hello, ProtocolError};
use chatml_room::RoomError;
use chatml_session::{MemberSession, SessionEnd};
use chatml_transport::{Connection, TransportError};

use crate::ChatmlError;
use crate::server::ServerState;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C, K>(
    conn: C,
    state: Arc<ServerState<K>>,
) -> Result<SessionEnd, ChatmlError>
where
    C: Connection<Error = TransportError>,
    K: Codec + Clone,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let hello = match perform_handshake(&conn, &state).await {
        Ok(hello) => hello,
        Err(e) => {
            tracing::warn!(%conn_id, error = %e, "handshake failed");
            let _ = conn.close().await;
            return Err(e);
        }
    };

    // Lock only to resolve the handle; the session talks to the room
    // without it.
    let room = {
        let mut rooms = state.rooms.lock().await;
        if state.shutting_down.load(Ordering::Acquire) {
            Err(RoomError::Unavailable(hello.room.clone()))
        } else {
            rooms.get_or_create_with(&hello.room, hello.kind)
        }
    };
    let room = match room {
        Ok(room) => room,
        Err(e) => {
            tracing::warn!(%conn_id, room = %hello.room, error = %e, "no room for connection");
            let _ = conn.close().await;
            return Err(e.into());
        }
    };

    tracing::info!(
        %conn_id,
        room = %room.name(),
        member = %hello.member.id,
        "member connected"
    );

    let end = MemberSession::new(conn, room, hello.member, state.codec.clone())
        .with_config(state.config.session.clone())
        .run()
        .await;

    tracing::debug!(%conn_id, reason = %end, "connection finished");
    Ok(end)
}

/// Receives and validates the hello frame.
async fn perform_handshake<C, K>(
    conn: &C,
    state: &ServerState<K>,
) -> Result<Hello, ChatmlError>
where
    C: Connection<Error = TransportError>,
    K: Codec,
{
    let data = match tokio::time::timeout(state.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before hello".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(ChatmlError::Transport(e)),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("hello timed out".into()).into());
        }
    };

    let hello: Hello = state.codec.decode(&data)?;
    validate(hello)
}

/// Trims the room name and rejects empty room names or member IDs.
fn validate(mut hello: Hello) -> Result<Hello, ChatmlError> {
    hello.room = hello.room.trim().to_string();
    if hello.room.is_empty() {
        return Err(ProtocolError::InvalidMessage("hello has an empty room name".into()).into());
    }
    if hello.member.id.as_str().trim().is_empty() {
        return Err(ProtocolError::InvalidMessage("hello has an empty member id".into()).into());
    }
    Ok(hello)
}
