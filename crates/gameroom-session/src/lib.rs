//! Connection sessions for gameroom.
//!
//! This crate wraps one accepted transport connection into a
//! [`ConnectionSession`]:
//!
//! 1. **Outbound queue**: bounded; [`ConnectionSession::send`] never
//!    blocks and reports `false` when the client has fallen behind.
//! 2. **Reader/writer tasks**: independent, so neither direction can
//!    stall the other.
//! 3. **Close**: idempotent, wakes both tasks, flushes then releases the
//!    transport.
//!
//! It also defines [`Player`], the identity carried on a room membership.
//!
//! # How it fits in the stack
//!
//! ```text
//! Room layer (above)       ← fans frames out into session queues
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Transport + protocol (below)
//! ```

mod error;
mod player;
mod session;

pub use error::SessionError;
pub use player::{MAX_NAME_LEN, Player};
pub use session::{ConnectionSession, SessionConfig, SessionId, SessionInbound};
