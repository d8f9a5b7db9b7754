//! # chatml
//!
//! A room-based chat broadcast hub over WebSockets.
//!
//! Clients connect, send one [`Hello`](protocol::Hello) frame naming a room
//! and themselves, and from then on every frame they send is broadcast as a
//! text message to everyone in that room. Membership changes are announced
//! to the room as presence rosters.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatml::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ChatmlError> {
//!     let server = ChatmlServer::builder()
//!         .bind("127.0.0.1:8080")
//!         .build()
//!         .await?;
//!     server.run_until_ctrl_c().await
//! }
//! ```

mod config;
mod error;
mod handler;
pub mod logging;
mod server;

pub use config::ServerConfig;
pub use error::ChatmlError;
pub use server::{ChatmlServer, ChatmlServerBuilder};

pub use chatml_protocol as protocol;
pub use chatml_room as room;
pub use chatml_session as session;
pub use chatml_transport as transport;

/// The types most servers need.
pub mod prelude {
    pub use crate::{ChatmlError, ChatmlServer, ChatmlServerBuilder, ServerConfig};
    pub use chatml_protocol::{Hello, MemberId, MemberInfo, Message, RoomKind};
    pub use chatml_room::{
        MessageProcessor, ProcessorChain, RoomConfig, RoomFlags, RoomInfo, RoomRegistry,
        Uppercase,
    };
    pub use chatml_session::{SessionConfig, SessionEnd};
}
