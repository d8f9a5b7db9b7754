//! Rooms for chatml.
//!
//! Each room runs as an isolated Tokio task that owns its online set and
//! serializes every join, leave and broadcast through one command queue.
//! Members receive deliveries through their own bounded outbound queue;
//! the room never waits on a member.
//!
//! # Key types
//!
//! - [`RoomRegistry`]: creates, finds and closes rooms by name
//! - [`RoomHandle`]: send commands to a running room
//! - [`MemberLink`]: a member's outbound queue, handed over on join
//! - [`ProcessorChain`]: text transforms applied before broadcast
//! - [`RoomState`]: lifecycle state machine

mod config;
mod error;
mod history;
mod processor;
mod registry;
mod room;

pub use config::{RoomConfig, RoomFlags, RoomState};
pub use error::RoomError;
pub use processor::{MessageProcessor, ProcessorChain, Uppercase};
pub use registry::RoomRegistry;
pub use room::{
    MAX_QUEUE_CAPACITY, MemberLink, MemberReceiver, MemberSender, RoomHandle, RoomInfo, SessionId,
};
