use thiserror::Error;

/// Errors surfaced by the chat core to calling UI code.
///
/// Only the message subscription path recovers on its own (ordered query to
/// unordered fallback); every other failure is reported once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authentication required: no usable session")]
    AuthenticationRequired,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("User {user} is not a participant of room {room}")]
    NotParticipant { room: String, user: String },

    #[error("Transient store error: {0}")]
    TransientStore(String),
}

impl ChatError {
    /// True for errors the UI should offer a retry for.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::TransientStore(_))
    }
}

/// Input rejected before any I/O takes place.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Message text is too long: {len} characters (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("Invalid room id: {0:?}")]
    InvalidRoomId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_failures_are_transient() {
        assert!(ChatError::TransientStore("timeout".into()).is_transient());
        assert!(!ChatError::AuthenticationRequired.is_transient());
        assert!(!ChatError::Validation(ValidationError::EmptyMessage).is_transient());
    }
}
