//! Server configuration.

use std::time::Duration;

use chatml_room::RoomConfig;
use chatml_session::SessionConfig;

/// Everything the server needs besides its processors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// How long a new connection has to send its hello frame.
    pub handshake_timeout: Duration,

    /// Settings for every room the server creates.
    pub room: RoomConfig,

    /// Settings for every member session.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            handshake_timeout: Duration::from_secs(5),
            room: RoomConfig::default(),
            session: SessionConfig::default(),
        }
    }
}
