//! Error types for the room layer.

/// Errors that can occur during room and registry operations.
///
/// Delivery problems never show up here: a member whose queue is full or
/// gone is dealt with inside the room loop. What callers see are lifecycle
/// and naming problems.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// No room with this name is registered.
    #[error("room {0} not found")]
    NotFound(String),

    /// An open room with this name already exists.
    #[error("room {0} already exists")]
    AlreadyExists(String),

    /// Room names must contain at least one non-whitespace character.
    #[error("invalid room name: {0:?}")]
    InvalidName(String),

    /// The room is closing or closed and no longer takes commands.
    /// Sessions treat this exactly like a close notification.
    #[error("room {0} is unavailable")]
    Unavailable(String),
}
