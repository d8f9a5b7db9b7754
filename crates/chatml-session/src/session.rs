//! Member sessions: the live binding between one connection and one room.
//!
//! A session runs two pumps:
//!
//! - **inbound** (on the caller's task): connection frame → text message →
//!   room broadcast
//! - **outbound** (spawned): member queue → codec → connection
//!
//! Whichever side ends first triggers the teardown, which runs exactly
//! once: it stops the other pump, closes the connection and asks the room
//! to drop the member.
//!
//! A write that never completes cannot hold a session open. Teardown
//! cancels it, and once the room has released the member it is abandoned
//! after [`SessionConfig::close_timeout`].

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chatml_protocol::{Codec, MemberId, MemberInfo, Message};
use chatml_room::{MemberLink, MemberReceiver, RoomHandle, SessionId};
use chatml_transport::Connection;
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for member sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How many deliveries may wait in a member's outbound queue. A member
    /// that falls this far behind is disconnected by the room.
    pub outbound_capacity: usize,

    /// How long a write may stay pending after the room released the
    /// member, and how long closing the connection may take.
    pub close_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            close_timeout: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionEnd
// ---------------------------------------------------------------------------

/// Why a session ended. The first cause observed wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEnd {
    /// The room refused the join (closing or closed).
    Rejected,
    /// The client closed the connection.
    ClientClosed,
    /// Reading from the connection failed.
    ReadFailed,
    /// Writing to the connection failed.
    WriteFailed,
    /// The room released the member: room closed, slow-consumer eviction,
    /// or a newer session for the same member.
    Released,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Rejected => "rejected",
            Self::ClientClosed => "client closed",
            Self::ReadFailed => "read failed",
            Self::WriteFailed => "write failed",
            Self::Released => "released",
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// MemberSession
// ---------------------------------------------------------------------------

/// One member attached to one room over one connection.
pub struct MemberSession<C, K> {
    conn: Arc<C>,
    room: RoomHandle,
    member: MemberInfo,
    codec: K,
    config: SessionConfig,
}

impl<C, K> MemberSession<C, K>
where
    C: Connection,
    K: Codec,
{
    pub fn new(conn: C, room: RoomHandle, member: MemberInfo, codec: K) -> Self {
        Self {
            conn: Arc::new(conn),
            room,
            member,
            codec,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn member(&self) -> &MemberInfo {
        &self.member
    }

    /// Joins the room and pumps frames until the session ends.
    ///
    /// Returns once the connection is closed, the member has been asked to
    /// leave, and both pumps have stopped.
    pub async fn run(self) -> SessionEnd {
        let Self {
            conn,
            room,
            member,
            codec,
            config,
        } = self;

        let (link, queue) = MemberLink::channel(config.outbound_capacity);
        let session_id = link.session_id();

        if let Err(e) = room.join(member.clone(), link).await {
            tracing::warn!(
                room = %room.name(),
                member = %member.id,
                conn = %conn.id(),
                error = %e,
                "join rejected"
            );
            if let Err(e) = conn.close().await {
                tracing::debug!(conn = %conn.id(), error = %e, "close failed");
            }
            return SessionEnd::Rejected;
        }

        tracing::info!(
            room = %room.name(),
            member = %member.id,
            session = %session_id,
            conn = %conn.id(),
            "session started"
        );

        let teardown = Arc::new(Teardown::new(
            Arc::clone(&conn),
            room.clone(),
            member.id.clone(),
            session_id,
            config.close_timeout,
        ));
        let guard = LeaveOnDrop(Arc::clone(&teardown));

        let writer = tokio::spawn(outbound_pump(
            Arc::clone(&conn),
            codec,
            queue,
            Arc::clone(&teardown),
            config.close_timeout,
        ));

        if let Some(end) = inbound_pump(conn.as_ref(), &room, &member, &teardown).await {
            teardown.run(end).await;
        }

        if let Err(e) = writer.await {
            tracing::warn!(
                member = %member.id,
                session = %session_id,
                error = %e,
                "outbound pump failed"
            );
            teardown.run(SessionEnd::WriteFailed).await;
        }

        drop(guard);
        teardown.reason()
    }
}

// ---------------------------------------------------------------------------
// Pumps
// ---------------------------------------------------------------------------

/// Reads frames and broadcasts them. Returns the reason to tear down, or
/// `None` when teardown has already started or the room is going away and
/// will release the member itself.
async fn inbound_pump<C: Connection>(
    conn: &C,
    room: &RoomHandle,
    member: &MemberInfo,
    teardown: &Teardown<C>,
) -> Option<SessionEnd> {
    let mut shutdown = teardown.subscribe();
    loop {
        let frame = tokio::select! {
            _ = stopped(&mut shutdown) => return None,
            frame = conn.recv() => frame,
        };

        let data = match frame {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(member = %member.id, conn = %conn.id(), "connection closed by client");
                return Some(SessionEnd::ClientClosed);
            }
            Err(e) => {
                tracing::debug!(member = %member.id, conn = %conn.id(), error = %e, "read failed");
                return Some(SessionEnd::ReadFailed);
            }
        };

        let message = Message::text(member.clone(), String::from_utf8_lossy(&data));
        if let Err(e) = room.broadcast(message).await {
            // The room drops our queue once it has shut down; the outbound
            // pump sees that and ends the session.
            tracing::debug!(member = %member.id, error = %e, "room gone, stopped reading");
            return None;
        }
    }
}

/// Writes queued messages in order until the room releases the member,
/// a write fails or teardown starts.
///
/// Messages queued before the release are still written, but a write
/// still pending `grace` after the release is abandoned.
async fn outbound_pump<C: Connection, K: Codec>(
    conn: Arc<C>,
    codec: K,
    mut queue: MemberReceiver,
    teardown: Arc<Teardown<C>>,
    grace: Duration,
) {
    let mut shutdown = teardown.subscribe();
    let end = loop {
        let next = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => return,
            next = queue.recv() => next,
        };

        let Some(message) = next else {
            break SessionEnd::Released;
        };

        let frame = match codec.encode(message.as_ref()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(conn = %conn.id(), error = %e, "dropping message that failed to encode");
                continue;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => return,
            _ = after(queue.released(), grace) => {
                tracing::warn!(conn = %conn.id(), "write stalled after release, dropping connection");
                break SessionEnd::Released;
            }
            sent = conn.send(&frame) => sent,
        };
        if let Err(e) = sent {
            tracing::debug!(conn = %conn.id(), error = %e, "write failed");
            break SessionEnd::WriteFailed;
        }
    };

    drop(queue);
    teardown.run(end).await;
}

/// Resolves `delay` after `event` does.
async fn after(event: impl Future<Output = ()>, delay: Duration) {
    event.await;
    tokio::time::sleep(delay).await;
}

/// Resolves once the shutdown signal is raised.
async fn stopped(signal: &mut watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

/// State shared by both pumps; [`Teardown::run`] does its work only for
/// the first caller.
struct Teardown<C> {
    conn: Arc<C>,
    room: RoomHandle,
    member_id: MemberId,
    session_id: SessionId,
    close_timeout: Duration,
    reason: OnceLock<SessionEnd>,
    shutdown: watch::Sender<bool>,
}

impl<C: Connection> Teardown<C> {
    fn new(
        conn: Arc<C>,
        room: RoomHandle,
        member_id: MemberId,
        session_id: SessionId,
        close_timeout: Duration,
    ) -> Self {
        Self {
            conn,
            room,
            member_id,
            session_id,
            close_timeout,
            reason: OnceLock::new(),
            shutdown: watch::channel(false).0,
        }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Records the reason and raises the shutdown signal. Returns `false`
    /// if teardown had already begun.
    fn begin(&self, reason: SessionEnd) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.shutdown.send_replace(true);
        true
    }

    async fn run(&self, reason: SessionEnd) {
        if self.begin(reason) {
            self.release().await;
        }
    }

    /// Runs after the shutdown signal, so a cancelled write no longer
    /// holds the connection. A close that still hangs is given up on and
    /// the connection is dropped with the session.
    async fn release(&self) {
        match tokio::time::timeout(self.close_timeout, self.conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(conn = %self.conn.id(), error = %e, "close failed");
            }
            Err(_) => {
                tracing::warn!(conn = %self.conn.id(), "close timed out");
            }
        }
        // A no-op if the room already dropped us or has closed.
        let _ = self
            .room
            .leave(self.member_id.clone(), self.session_id)
            .await;
        tracing::info!(
            room = %self.room.name(),
            member = %self.member_id,
            session = %self.session_id,
            conn = %self.conn.id(),
            reason = %self.reason(),
            "session ended"
        );
    }

    fn reason(&self) -> SessionEnd {
        self.reason.get().copied().unwrap_or(SessionEnd::Released)
    }
}

/// Schedules the teardown on the runtime if [`MemberSession::run`] is
/// dropped before it finished (task abort or panic).
struct LeaveOnDrop<C: Connection>(Arc<Teardown<C>>);

impl<C: Connection> Drop for LeaveOnDrop<C> {
    fn drop(&mut self) {
        if !self.0.begin(SessionEnd::Released) {
            return;
        }
        tracing::debug!(session = %self.0.session_id, "session dropped before teardown");
        let teardown = Arc::clone(&self.0);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { teardown.release().await });
            }
            Err(_) => {
                tracing::warn!(
                    member = %teardown.member_id,
                    session = %teardown.session_id,
                    "no runtime to release session"
                );
            }
        }
    }
}
