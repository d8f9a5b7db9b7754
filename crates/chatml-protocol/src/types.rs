//! Core message and identity types.
//!
//! Everything here is immutable once built. A broadcast is built once,
//! wrapped in an `Arc`, and handed to every recipient's queue.

use std::fmt;

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable identity of a member, e.g. an account e-mail address.
///
/// A room's online set is keyed by this value, so one identity is online
/// at most once per room. Ordered so rosters come out sorted.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    /// Creates a member ID from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Account info the hub attaches to everything a member sends and shows
/// in presence rosters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Stable identity.
    pub id: MemberId,
    /// Human-readable name for display.
    pub display_name: String,
}

impl MemberInfo {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: MemberId::new(id),
            display_name: display_name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Room kind
// ---------------------------------------------------------------------------

/// The shape of a room, fixed when the room is created.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// A two-party conversation.
    Direct,
    /// An ad-hoc conversation between several members.
    #[default]
    Multi,
    /// A named, long-lived group channel.
    Group,
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Multi => write!(f, "multi"),
            Self::Group => write!(f, "group"),
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// `strftime` pattern for the display timestamp on text messages
/// (month-day hour:minute:second).
pub const TIME_FORMAT: &str = "%m-%d %H:%M:%S";

/// Formats an instant the way text messages show it.
pub fn display_time<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    at.format(TIME_FORMAT).to_string()
}

/// A chat line sent by one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub sender: MemberInfo,
    /// Display timestamp, see [`TIME_FORMAT`].
    pub time: String,
    pub content: String,
}

/// Snapshot of a room's online roster, ordered by member ID.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Presence {
    pub members: Vec<MemberInfo>,
}

impl Presence {
    /// Returns `true` if the roster lists the given member.
    pub fn contains(&self, id: &MemberId) -> bool {
        self.members.iter().any(|m| &m.id == id)
    }

    /// Member IDs in roster order.
    pub fn member_ids(&self) -> Vec<&MemberId> {
        self.members.iter().map(|m| &m.id).collect()
    }
}

/// Anything the hub delivers to a member.
///
/// Internally tagged in JSON:
///
/// ```json
/// {"type":"text","sender":{"id":"alice","display_name":"Alice"},"time":"03-05 14:07:09","content":"hi"}
/// {"type":"presence","members":[{"id":"alice","display_name":"Alice"}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Text(TextMessage),
    Presence(Presence),
}

impl Message {
    /// Builds a text message stamped with the current local time.
    pub fn text(sender: MemberInfo, content: impl Into<String>) -> Self {
        Self::text_at(sender, content, &Local::now())
    }

    /// Builds a text message stamped with the given instant.
    pub fn text_at<Tz>(
        sender: MemberInfo,
        content: impl Into<String>,
        at: &DateTime<Tz>,
    ) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        Self::Text(TextMessage {
            sender,
            time: display_time(at),
            content: content.into(),
        })
    }

    /// Builds a presence message from a roster.
    pub fn presence(members: Vec<MemberInfo>) -> Self {
        Self::Presence(Presence { members })
    }

    pub fn as_text(&self) -> Option<&TextMessage> {
        match self {
            Self::Text(text) => Some(text),
            Self::Presence(_) => None,
        }
    }

    pub fn as_presence(&self) -> Option<&Presence> {
        match self {
            Self::Presence(presence) => Some(presence),
            Self::Text(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// The first frame a client sends: which room to attach to and who it is.
///
/// `kind` is only consulted when the room does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub room: String,
    pub member: MemberInfo,
    #[serde(default)]
    pub kind: RoomKind,
}
