//! Member sessions for chatml.
//!
//! A [`MemberSession`] joins one room on behalf of one connection and
//! moves frames both ways until either side ends it:
//!
//! ```text
//! Connection ──recv──▶ inbound pump ──broadcast──▶ Room
//! Connection ◀──send── outbound pump ◀──queue───── Room
//! ```
//!
//! [`MemberSession::run`] reports why the session ended ([`SessionEnd`]).

mod session;

pub use session::{MemberSession, SessionConfig, SessionEnd};
