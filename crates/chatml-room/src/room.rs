//! Room actor: one Tokio task that owns a room's online set.
//!
//! Every mutation of the roster, the history and the counters happens on
//! the room task, in the order commands arrive on its queue. Nothing else
//! can touch that state, so joins, leaves and broadcasts never observe
//! each other half-done.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chatml_protocol::{MemberId, MemberInfo, Message, RoomKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot, watch};

use crate::history::History;
use crate::{ProcessorChain, RoomConfig, RoomError, RoomFlags, RoomState};

/// Upper bound for any queue a room or member link allocates. Larger
/// requests are clamped.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 16;

/// Counter for generating unique session IDs.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one attachment of a member to a room.
///
/// The same member may reconnect and replace its old session; the ID lets
/// the room ignore a late `leave` from the session it already replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocates a fresh, process-unique ID.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// Sending half of a member's outbound queue.
pub type MemberSender = mpsc::Sender<Arc<Message>>;

/// Receiving half of a member's outbound queue.
///
/// [`recv`](Self::recv) yields `None` once the room has released the
/// member and everything queued before that has been taken.
#[derive(Debug)]
pub struct MemberReceiver {
    queue: mpsc::Receiver<Arc<Message>>,
    released: watch::Receiver<()>,
}

impl MemberReceiver {
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.queue.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Arc<Message>, TryRecvError> {
        self.queue.try_recv()
    }

    /// Resolves as soon as the room drops the member's link, even while
    /// messages are still queued. Does not borrow the receiver, so it can
    /// race a write of an earlier message.
    pub fn released(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut released = self.released.clone();
        async move { while released.changed().await.is_ok() {} }
    }
}

/// What a session hands to the room when it joins: who it is and where to
/// deliver.
#[derive(Debug)]
pub struct MemberLink {
    session_id: SessionId,
    sender: MemberSender,
    // Never written; dropping it with the link wakes `MemberReceiver::released`.
    _released: watch::Sender<()>,
}

impl MemberLink {
    /// Creates a link with a bounded outbound queue and returns it together
    /// with the queue's receiving end. `capacity` is clamped to
    /// `1..=MAX_QUEUE_CAPACITY`.
    pub fn channel(capacity: usize) -> (Self, MemberReceiver) {
        let (sender, queue) = mpsc::channel(capacity.clamp(1, MAX_QUEUE_CAPACITY));
        let (released_tx, released) = watch::channel(());
        let link = Self {
            session_id: SessionId::next(),
            sender,
            _released: released_tx,
        };
        (link, MemberReceiver { queue, released })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

/// Commands sent to a room actor through its queue.
pub(crate) enum RoomCommand {
    /// Deliver a message to everyone online.
    Broadcast { message: Message },

    /// Admit a member.
    Join {
        member: MemberInfo,
        link: MemberLink,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Remove a member if the slot still belongs to `session_id`.
    Leave {
        member_id: MemberId,
        session_id: SessionId,
    },

    /// Request a metadata snapshot.
    Info { reply: oneshot::Sender<RoomInfo> },

    /// Request the recent-message history.
    History {
        reply: oneshot::Sender<Vec<Arc<Message>>>,
    },

    /// Request the most recent text message.
    Last {
        reply: oneshot::Sender<Option<Arc<Message>>>,
    },

    /// Shut the room down.
    Close,
}

/// A read-only snapshot of a room, for status pages and tests.
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub name: String,
    pub kind: RoomKind,
    pub state: RoomState,
    pub flags: RoomFlags,
    /// Online roster, ordered by member ID.
    pub members: Vec<MemberInfo>,
    /// Text messages broadcast since the room opened.
    pub message_count: u64,
    pub last_message: Option<Message>,
    pub created_at: DateTime<Utc>,
    /// Last join or broadcast.
    pub pulsed_at: DateTime<Utc>,
}

impl RoomInfo {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the given member is online.
    pub fn is_online(&self, id: &MemberId) -> bool {
        self.members.iter().any(|m| &m.id == id)
    }
}

/// Handle to a running room actor.
///
/// Cheap to clone: a queue sender plus a view of the lifecycle state. The
/// registry keeps one; every session attached to the room keeps another.
#[derive(Clone)]
pub struct RoomHandle {
    name: Arc<str>,
    kind: RoomKind,
    sender: mpsc::Sender<RoomCommand>,
    state: watch::Receiver<RoomState>,
}

impl fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl RoomHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    /// Current lifecycle state, without a round trip to the room.
    pub fn state(&self) -> RoomState {
        *self.state.borrow()
    }

    /// Returns `true` once the room stopped taking commands.
    pub fn is_closed(&self) -> bool {
        !self.state().is_open() || self.sender.is_closed()
    }

    fn unavailable(&self) -> RoomError {
        RoomError::Unavailable(self.name.to_string())
    }

    /// Queues a message for every member online when the room gets to it.
    pub async fn broadcast(&self, message: Message) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Broadcast { message })
            .await
            .map_err(|_| self.unavailable())
    }

    /// Admits a member. Returns after the room has inserted the member and
    /// queued the updated presence roster for everyone, the new member
    /// included. A session already holding this member's slot is
    /// replaced and released.
    pub async fn join(
        &self,
        member: MemberInfo,
        link: MemberLink,
    ) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Join {
                member,
                link,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    /// Asks the room to drop the member, if `session_id` still owns the
    /// member's slot. Fire-and-forget.
    pub async fn leave(
        &self,
        member_id: MemberId,
        session_id: SessionId,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Leave {
                member_id,
                session_id,
            })
            .await
            .map_err(|_| self.unavailable())
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Info { reply: reply_tx })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Snapshot of the online roster.
    pub async fn roster(&self) -> Result<Vec<MemberInfo>, RoomError> {
        Ok(self.info().await?.members)
    }

    /// The recent text messages, oldest first.
    pub async fn recent_messages(&self) -> Result<Vec<Arc<Message>>, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::History { reply: reply_tx })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// The most recent text message, if any was broadcast.
    pub async fn last(&self) -> Result<Option<Arc<Message>>, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Last { reply: reply_tx })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Closes the room and waits until it is `Closed`.
    ///
    /// Idempotent: any number of callers may close the same room, at the
    /// same time or after the fact.
    pub async fn close(&self) {
        // A failed send means the queue is already shut.
        let _ = self.sender.send(RoomCommand::Close).await;

        let mut state = self.state.clone();
        loop {
            if *state.borrow_and_update() == RoomState::Closed {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A member currently online.
struct Online {
    info: MemberInfo,
    link: MemberLink,
}

/// The internal room state. Runs inside a Tokio task.
struct RoomActor {
    name: Arc<str>,
    kind: RoomKind,
    flags: RoomFlags,
    config: RoomConfig,
    state: watch::Sender<RoomState>,
    members: BTreeMap<MemberId, Online>,
    history: History,
    processors: Arc<ProcessorChain>,
    message_count: u64,
    created_at: DateTime<Utc>,
    pulsed_at: DateTime<Utc>,
    /// Set when a departure leaves the room empty.
    emptied: bool,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl RoomActor {
    /// Runs the actor loop until closed, then shuts down.
    async fn run(mut self) {
        tracing::info!(room = %self.name, kind = %self.kind, "room opened");

        while let Some(cmd) = self.receiver.recv().await {
            if !self.handle(cmd) {
                break;
            }
            if self.emptied && self.config.close_when_empty {
                tracing::info!(room = %self.name, "room empty, closing");
                break;
            }
        }

        self.shut_down().await;
    }

    /// Handles one command while open. Returns `false` on `Close`.
    fn handle(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Broadcast { message } => self.handle_broadcast(message),
            RoomCommand::Join {
                member,
                link,
                reply,
            } => {
                self.handle_join(member, link);
                let _ = reply.send(Ok(()));
            }
            RoomCommand::Leave {
                member_id,
                session_id,
            } => self.handle_leave(&member_id, session_id),
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::History { reply } => {
                let _ = reply.send(self.history.snapshot());
            }
            RoomCommand::Last { reply } => {
                let _ = reply.send(self.history.last());
            }
            RoomCommand::Close => return false,
        }
        true
    }

    fn handle_broadcast(&mut self, message: Message) {
        let message = Arc::new(self.processors.apply(message));
        if message.as_text().is_some() {
            self.message_count += 1;
            self.history.push(Arc::clone(&message));
        }
        self.pulse();
        self.fan_out(message);
    }

    fn handle_join(&mut self, member: MemberInfo, link: MemberLink) {
        let id = member.id.clone();
        let session_id = link.session_id;
        let previous = self.members.insert(
            id.clone(),
            Online {
                info: member,
                link,
            },
        );
        if let Some(previous) = previous {
            // Dropping the old link closes that session's queue.
            tracing::info!(
                room = %self.name,
                member = %id,
                replaced = %previous.link.session_id,
                session = %session_id,
                "member rejoined, previous session released"
            );
        } else {
            tracing::info!(
                room = %self.name,
                member = %id,
                session = %session_id,
                online = self.members.len(),
                "member joined"
            );
        }
        self.emptied = false;
        self.pulse();
        self.fan_out(Arc::new(self.presence()));
    }

    fn handle_leave(&mut self, member_id: &MemberId, session_id: SessionId) {
        let owns_slot = self
            .members
            .get(member_id)
            .is_some_and(|m| m.link.session_id == session_id);
        if !owns_slot {
            tracing::debug!(
                room = %self.name,
                member = %member_id,
                session = %session_id,
                "stale leave ignored"
            );
            return;
        }

        self.members.remove(member_id);
        tracing::info!(
            room = %self.name,
            member = %member_id,
            session = %session_id,
            online = self.members.len(),
            "member left"
        );
        self.emptied = self.members.is_empty();
        self.fan_out(Arc::new(self.presence()));
    }

    /// Delivers a message to every online member. Members that cannot take
    /// it are evicted, and the remaining members get a fresh roster, until
    /// a round completes without evictions.
    fn fan_out(&mut self, message: Arc<Message>) {
        let mut evicted = self.deliver(&message);
        while !evicted.is_empty() {
            if self.members.is_empty() {
                self.emptied = true;
                return;
            }
            evicted = self.deliver(&Arc::new(self.presence()));
        }
    }

    /// One non-blocking delivery round. Returns the evicted member IDs.
    fn deliver(&mut self, message: &Arc<Message>) -> Vec<MemberId> {
        let mut evicted = Vec::new();
        for (id, online) in &self.members {
            match online.link.sender.try_send(Arc::clone(message)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        room = %self.name,
                        member = %id,
                        session = %online.link.session_id,
                        "outbound queue full, disconnecting slow member"
                    );
                    evicted.push(id.clone());
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        room = %self.name,
                        member = %id,
                        session = %online.link.session_id,
                        "outbound queue gone, dropping member"
                    );
                    evicted.push(id.clone());
                }
            }
        }
        for id in &evicted {
            self.members.remove(id);
        }
        evicted
    }

    /// Closing: refuse new work, drain what is queued, release everyone.
    async fn shut_down(&mut self) {
        self.set_state(RoomState::Closing);
        tracing::info!(room = %self.name, online = self.members.len(), "room closing");
        self.receiver.close();

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RoomCommand::Broadcast { message } => {
                    let message = Arc::new(self.processors.apply(message));
                    if message.as_text().is_some() {
                        self.message_count += 1;
                        self.history.push(Arc::clone(&message));
                    }
                    self.deliver(&message);
                }
                RoomCommand::Join { reply, .. } => {
                    let _ = reply.send(Err(RoomError::Unavailable(
                        self.name.to_string(),
                    )));
                }
                RoomCommand::Leave {
                    member_id,
                    session_id,
                } => {
                    let owns_slot = self
                        .members
                        .get(&member_id)
                        .is_some_and(|m| m.link.session_id == session_id);
                    if owns_slot {
                        self.members.remove(&member_id);
                    }
                }
                RoomCommand::Info { reply } => {
                    let _ = reply.send(self.info());
                }
                RoomCommand::History { reply } => {
                    let _ = reply.send(self.history.snapshot());
                }
                RoomCommand::Last { reply } => {
                    let _ = reply.send(self.history.last());
                }
                RoomCommand::Close => {}
            }
        }

        // Dropping every link is the close notification: each session
        // drains what is already queued and then sees its queue end.
        let released = self.members.len();
        self.members.clear();
        self.set_state(RoomState::Closed);
        tracing::info!(
            room = %self.name,
            released,
            messages = self.message_count,
            remembered = self.history.len(),
            "room closed"
        );
    }

    fn set_state(&self, next: RoomState) {
        let current = *self.state.borrow();
        if current.can_transition_to(next) {
            self.state.send_replace(next);
        }
    }

    fn pulse(&mut self) {
        self.pulsed_at = Utc::now();
    }

    fn roster(&self) -> Vec<MemberInfo> {
        self.members.values().map(|m| m.info.clone()).collect()
    }

    fn presence(&self) -> Message {
        Message::presence(self.roster())
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            name: self.name.to_string(),
            kind: self.kind,
            state: *self.state.borrow(),
            flags: self.flags,
            members: self.roster(),
            message_count: self.message_count,
            last_message: self.history.last().map(|m| (*m).clone()),
            created_at: self.created_at,
            pulsed_at: self.pulsed_at,
        }
    }
}

/// Spawns a new room actor task and returns a handle to communicate with it.
pub(crate) fn spawn_room(
    name: &str,
    kind: RoomKind,
    flags: RoomFlags,
    config: RoomConfig,
    processors: Arc<ProcessorChain>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.command_capacity.clamp(1, MAX_QUEUE_CAPACITY));
    let (state_tx, state_rx) = watch::channel(RoomState::Open);
    let name: Arc<str> = Arc::from(name);
    let now = Utc::now();

    let actor = RoomActor {
        name: Arc::clone(&name),
        kind,
        flags,
        history: History::new(config.history_capacity),
        config,
        state: state_tx,
        members: BTreeMap::new(),
        processors,
        message_count: 0,
        created_at: now,
        pulsed_at: now,
        emptied: false,
        receiver: rx,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        name,
        kind,
        sender: tx,
        state: state_rx,
    }
}
