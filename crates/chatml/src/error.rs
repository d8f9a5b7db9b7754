//! Unified error type for chatml.

use chatml_protocol::ProtocolError;
use chatml_room::RoomError;
use chatml_transport::TransportError;

/// Top-level error that wraps every layer's error.
///
/// The `#[from]` conversions let `?` lift sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum ChatmlError {
    /// Binding, accepting, reading or writing a connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded, or broke a protocol rule.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A room could not be found, created or joined.
    #[error(transparent)]
    Room(#[from] RoomError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let chatml_err: ChatmlError = err.into();
        assert!(matches!(chatml_err, ChatmlError::Transport(_)));
        assert!(chatml_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad hello".into());
        let chatml_err: ChatmlError = err.into();
        assert!(matches!(chatml_err, ChatmlError::Protocol(_)));
        assert_eq!(chatml_err.to_string(), "invalid message: bad hello");
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::Unavailable("general".into());
        let chatml_err: ChatmlError = err.into();
        assert!(matches!(chatml_err, ChatmlError::Room(_)));
        assert_eq!(chatml_err.to_string(), "room general is unavailable");
    }
}
