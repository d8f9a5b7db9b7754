//! Session tests over in-memory connections.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chatml_protocol::{JsonCodec, MemberId, MemberInfo, Message};
use chatml_room::{RoomConfig, RoomHandle, RoomRegistry, RoomState};
use chatml_session::{MemberSession, SessionConfig, SessionEnd};
use chatml_transport::memory::{self, MemoryConnection, MemoryPeer};
use chatml_transport::{Connection, ConnectionId, TransportError};
use tokio::task::JoinHandle;

// =========================================================================
// Helpers
// =========================================================================

async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out")
}

fn general() -> RoomHandle {
    RoomRegistry::new(RoomConfig::default())
        .get_or_create("general")
        .unwrap()
}

fn member(id: &str) -> MemberInfo {
    MemberInfo::new(id, id.to_uppercase())
}

fn start(room: &RoomHandle, id: &str) -> (JoinHandle<SessionEnd>, MemoryPeer) {
    let (conn, peer) = memory::pair();
    let session = MemberSession::new(conn, room.clone(), member(id), JsonCodec);
    (tokio::spawn(session.run()), peer)
}

async fn next(peer: &mut MemoryPeer) -> Message {
    let frame = within(peer.recv()).await.expect("connection closed");
    serde_json::from_slice(&frame).expect("valid message frame")
}

async fn next_roster(peer: &mut MemoryPeer) -> Vec<String> {
    let message = next(peer).await;
    message
        .as_presence()
        .expect("presence message")
        .members
        .iter()
        .map(|m| m.id.to_string())
        .collect()
}

async fn next_text(peer: &mut MemoryPeer) -> (String, String) {
    let message = next(peer).await;
    let text = message.as_text().expect("text message");
    (text.sender.id.to_string(), text.content.clone())
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn test_general_room_conversation() {
    let room = general();

    let (alice_task, mut alice) = start(&room, "alice");
    assert_eq!(next_roster(&mut alice).await, ["alice"]);

    let (bob_task, mut bob) = start(&room, "bob");
    assert_eq!(next_roster(&mut alice).await, ["alice", "bob"]);
    assert_eq!(next_roster(&mut bob).await, ["alice", "bob"]);

    assert!(alice.send("hi bob"));
    for peer in [&mut alice, &mut bob] {
        assert_eq!(
            next_text(peer).await,
            ("alice".to_string(), "hi bob".to_string())
        );
    }

    bob.hang_up();
    assert_eq!(within(bob_task).await.unwrap(), SessionEnd::ClientClosed);
    assert!(bob.is_closed());
    assert_eq!(next_roster(&mut alice).await, ["alice"]);

    let roster = room.roster().await.unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].id, MemberId::from("alice"));

    alice.hang_up();
    assert_eq!(within(alice_task).await.unwrap(), SessionEnd::ClientClosed);
    assert!(room.roster().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_room_close_releases_all_sessions() {
    let room = general();
    let mut sessions = Vec::new();
    for id in ["alice", "bob", "carol"] {
        let (task, mut peer) = start(&room, id);
        next(&mut peer).await;
        sessions.push((task, peer));
    }

    room.close().await;
    assert_eq!(room.state(), RoomState::Closed);

    for (task, mut peer) in sessions {
        assert_eq!(within(task).await.unwrap(), SessionEnd::Released);
        within(peer.closed()).await;
    }
}

#[tokio::test]
async fn test_messages_queued_before_close_are_written() {
    let room = general();
    let (task, mut alice) = start(&room, "alice");
    next(&mut alice).await;

    room.broadcast(Message::text(member("bob"), "goodbye"))
        .await
        .unwrap();
    room.close().await;

    assert_eq!(
        next_text(&mut alice).await,
        ("bob".to_string(), "goodbye".to_string())
    );
    assert_eq!(within(task).await.unwrap(), SessionEnd::Released);
}

// =========================================================================
// Teardown paths
// =========================================================================

#[tokio::test]
async fn test_write_failure_ends_session_and_leaves_room() {
    let room = general();
    let (task, mut alice) = start(&room, "alice");
    next(&mut alice).await;

    alice.stop_reading();
    room.broadcast(Message::text(member("bob"), "are you there"))
        .await
        .unwrap();

    assert_eq!(within(task).await.unwrap(), SessionEnd::WriteFailed);
    assert!(alice.is_closed());
    assert!(room.roster().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_read_failure_ends_session() {
    let room = general();
    let (task, mut alice) = start(&room, "alice");
    next(&mut alice).await;

    assert!(alice.fail("connection reset"));
    assert_eq!(within(task).await.unwrap(), SessionEnd::ReadFailed);
    assert!(room.roster().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_join_into_closed_room_is_rejected() {
    let room = general();
    room.close().await;

    let (task, mut alice) = start(&room, "alice");
    assert_eq!(within(task).await.unwrap(), SessionEnd::Rejected);
    within(alice.closed()).await;
}

#[tokio::test]
async fn test_second_session_replaces_first() {
    let room = general();
    let (first_task, mut first) = start(&room, "alice");
    next(&mut first).await;

    let (second_task, mut second) = start(&room, "alice");
    assert_eq!(next_roster(&mut second).await, ["alice"]);
    assert_eq!(within(first_task).await.unwrap(), SessionEnd::Released);
    within(first.closed()).await;

    // The replaced session's leave must not remove the new one.
    assert_eq!(room.roster().await.unwrap().len(), 1);

    assert!(second.send("still here"));
    assert_eq!(
        next_text(&mut second).await,
        ("alice".to_string(), "still here".to_string())
    );

    second.hang_up();
    assert_eq!(within(second_task).await.unwrap(), SessionEnd::ClientClosed);
}

#[tokio::test]
async fn test_aborted_session_still_leaves() {
    let room = general();
    let (task, mut alice) = start(&room, "alice");
    next(&mut alice).await;

    task.abort();
    within(async {
        while !room.roster().await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    within(alice.closed()).await;
}

// =========================================================================
// Content handling
// =========================================================================

#[tokio::test]
async fn test_invalid_utf8_is_replaced_not_fatal() {
    let room = general();
    let (task, mut alice) = start(&room, "alice");
    next(&mut alice).await;

    assert!(alice.send(vec![0xff, b'o', b'k']));
    let (_, content) = next_text(&mut alice).await;
    assert_eq!(content, "\u{fffd}ok");

    alice.hang_up();
    assert_eq!(within(task).await.unwrap(), SessionEnd::ClientClosed);
}

#[tokio::test]
async fn test_slow_client_is_disconnected() {
    let room = general();
    let (conn, mut slow) = memory::pair();
    let session = MemberSession::new(conn, room.clone(), member("slow"), JsonCodec)
        .with_config(SessionConfig {
            outbound_capacity: 1,
            ..SessionConfig::default()
        });
    assert_eq!(session.member().id, MemberId::from("slow"));
    let task = tokio::spawn(session.run());
    next(&mut slow).await;

    // Flood faster than a capacity-1 queue can drain.
    for i in 0..500 {
        room.broadcast(Message::text(member("bob"), i.to_string()))
            .await
            .unwrap();
    }

    assert_eq!(within(task).await.unwrap(), SessionEnd::Released);
    assert!(room.roster().await.unwrap().is_empty());
}

// =========================================================================
// Stalled writes
// =========================================================================

/// A connection whose writes hang forever after the first `writable`
/// frames, like a client that stopped reading on a full socket.
struct Stalling {
    inner: MemoryConnection,
    writable: usize,
    sent: AtomicUsize,
}

impl Connection for Stalling {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if self.sent.fetch_add(1, Ordering::SeqCst) >= self.writable {
            return std::future::pending().await;
        }
        self.inner.send(data).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        self.inner.recv().await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.inner.close().await
    }

    fn id(&self) -> ConnectionId {
        self.inner.id()
    }
}

/// Starts a session whose connection stalls after the join presence.
async fn start_stalling(
    room: &RoomHandle,
    id: &str,
    config: SessionConfig,
) -> (JoinHandle<SessionEnd>, MemoryPeer) {
    let (inner, mut peer) = memory::pair();
    let conn = Stalling {
        inner,
        writable: 1,
        sent: AtomicUsize::new(0),
    };
    let session = MemberSession::new(conn, room.clone(), member(id), JsonCodec).with_config(config);
    let task = tokio::spawn(session.run());
    assert_eq!(next_roster(&mut peer).await, [id]);
    (task, peer)
}

fn short_close() -> SessionConfig {
    SessionConfig {
        close_timeout: Duration::from_millis(100),
        ..SessionConfig::default()
    }
}

#[tokio::test]
async fn test_room_close_ends_session_stuck_in_write() {
    let room = general();
    let (task, mut alice) = start_stalling(&room, "alice", short_close()).await;

    room.broadcast(Message::text(member("bob"), "never delivered"))
        .await
        .unwrap();
    room.close().await;
    assert_eq!(room.state(), RoomState::Closed);

    assert_eq!(within(task).await.unwrap(), SessionEnd::Released);
    within(alice.closed()).await;
}

#[tokio::test]
async fn test_slow_member_stuck_in_write_is_evicted_and_closed() {
    let room = general();
    let config = SessionConfig {
        outbound_capacity: 2,
        ..short_close()
    };
    let (task, mut alice) = start_stalling(&room, "alice", config).await;

    for i in 0..10 {
        room.broadcast(Message::text(member("bob"), i.to_string()))
            .await
            .unwrap();
    }

    assert_eq!(within(task).await.unwrap(), SessionEnd::Released);
    within(alice.closed()).await;
    assert!(room.roster().await.unwrap().is_empty());
    assert!(!room.is_closed());
}

#[tokio::test]
async fn test_client_hang_up_cancels_stuck_write() {
    let room = general();
    let (task, mut alice) = start_stalling(&room, "alice", SessionConfig::default()).await;

    room.broadcast(Message::text(member("bob"), "stuck"))
        .await
        .unwrap();
    alice.hang_up();

    assert_eq!(within(task).await.unwrap(), SessionEnd::ClientClosed);
    assert!(room.roster().await.unwrap().is_empty());
}
