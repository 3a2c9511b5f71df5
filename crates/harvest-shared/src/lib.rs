//! # harvest-shared
//!
//! Types shared by every Harvest crate: identifier newtypes, the room id
//! resolver, protocol constants and the chat error taxonomy.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{ChatError, ValidationError};
pub use types::{resolve_room_id, MessageId, RoomId, UserId};

/// Convenience alias for results carrying a [`ChatError`].
pub type Result<T> = std::result::Result<T, ChatError>;
