//! Room configuration, visibility flags, and lifecycle state machine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Configuration shared by every room a registry creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Capacity of the room's command queue. Callers wait when it is full;
    /// the room loop itself never does.
    pub command_capacity: usize,

    /// How many recent text messages the room remembers. 0 disables
    /// history.
    pub history_capacity: usize,

    /// Close the room as soon as a departure leaves it empty. When
    /// `false`, an empty room stays open and waits for new joins.
    pub close_when_empty: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            history_capacity: 50,
            close_when_empty: false,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomFlags
// ---------------------------------------------------------------------------

/// Visibility flags carried with a room. Informational only: the hub
/// reports them but never enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomFlags {
    pub hidden: bool,
    pub private: bool,
    pub active: bool,
}

impl Default for RoomFlags {
    fn default() -> Self {
        Self {
            hidden: false,
            private: false,
            active: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// ```text
/// Open → Closing → Closed
/// ```
///
/// - **Open**: accepting joins and broadcasts.
/// - **Closing**: the command queue is shut; commands already queued are
///   drained (broadcasts still reach online members, joins are refused).
/// - **Closed**: every member has been released. Terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    Open,
    Closing,
    Closed,
}

impl RoomState {
    /// Returns `true` if the room accepts joins and broadcasts.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns the next state, or `None` from the terminal state.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Open => Some(Self::Closing),
            Self::Closing => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_state_next_follows_strict_order() {
        assert_eq!(RoomState::Open.next(), Some(RoomState::Closing));
        assert_eq!(RoomState::Closing.next(), Some(RoomState::Closed));
        assert_eq!(RoomState::Closed.next(), None);
    }

    #[test]
    fn test_room_state_can_transition_to() {
        assert!(RoomState::Open.can_transition_to(RoomState::Closing));
        assert!(!RoomState::Open.can_transition_to(RoomState::Closed));
        assert!(!RoomState::Closed.can_transition_to(RoomState::Open));
        assert!(!RoomState::Closed.can_transition_to(RoomState::Closing));
    }

    #[test]
    fn test_only_open_is_open() {
        assert!(RoomState::Open.is_open());
        assert!(!RoomState::Closing.is_open());
        assert!(!RoomState::Closed.is_open());
    }

    #[test]
    fn test_room_config_default() {
        let config = RoomConfig::default();
        assert_eq!(config.command_capacity, 64);
        assert_eq!(config.history_capacity, 50);
        assert!(!config.close_when_empty);
    }

    #[test]
    fn test_room_config_partial_json_uses_defaults() {
        let config: RoomConfig =
            serde_json::from_str(r#"{"close_when_empty":true}"#).unwrap();
        assert!(config.close_when_empty);
        assert_eq!(config.history_capacity, 50);
    }

    #[test]
    fn test_room_flags_default_active_and_public() {
        let flags = RoomFlags::default();
        assert!(flags.active);
        assert!(!flags.hidden);
        assert!(!flags.private);
    }
}
