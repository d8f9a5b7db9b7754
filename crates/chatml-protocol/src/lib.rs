//! Messages and codecs for chatml.
//!
//! - **Types** ([`Message`], [`MemberInfo`], [`Hello`], [`RoomKind`]):
//!   the values the hub moves around. The hub treats them as opaque; only
//!   the edges encode them.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those values become
//!   frames.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Room (fan-out)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    Hello, MemberId, MemberInfo, Message, Presence, RoomKind, TIME_FORMAT,
    TextMessage, display_time,
};
