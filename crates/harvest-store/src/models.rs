//! Domain model structs persisted in the local chat database.
//!
//! Every struct derives `Serialize` and `Deserialize` with camelCase field
//! names, matching the document shape of the hosted backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use harvest_shared::constants::MESSAGE_TYPE_TEXT;
use harvest_shared::{MessageId, RoomId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Local mirror of a user document, including presence fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Profile fields merged into a user document on session start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileUpdate {
    pub user_id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Current online snapshot for one user.  Never a history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    /// Stand-in for a user who never published presence.
    pub fn offline(user_id: UserId) -> Self {
        Self {
            user_id,
            is_online: false,
            last_seen: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Chat room
// ---------------------------------------------------------------------------

/// A two-party conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    /// Derived from the sorted participant pair.
    pub id: RoomId,
    /// Sorted; immutable after creation.
    pub participant_ids: [UserId; 2],
    pub created_at: DateTime<Utc>,
    /// Denormalised preview of the newest message.
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_sender_id: Option<UserId>,
}

impl ChatRoom {
    /// A fresh room record for the participants encoded in `id`.
    pub fn new(id: RoomId, created_at: DateTime<Utc>) -> Option<Self> {
        let (a, b) = id.participants()?;
        Some(Self {
            id,
            participant_ids: [a, b],
            created_at,
            last_message: None,
            last_message_time: None,
            last_sender_id: None,
        })
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participant_ids.contains(user)
    }

    /// Timestamp used to rank rooms by recent activity.
    pub fn activity_time(&self) -> DateTime<Utc> {
        self.last_message_time.unwrap_or(self.created_at)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single text message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub text: String,
    pub message_type: String,
    /// Store-assigned; non-decreasing within a room.
    pub timestamp: DateTime<Utc>,
    /// Store insertion sequence, the tie-break for equal timestamps.
    pub seq: i64,
    pub is_read: bool,
    pub sent: bool,
    pub delivered: bool,
}

impl Message {
    /// Ordering key used by every client-side sort.
    pub fn order_key(&self) -> (DateTime<Utc>, i64) {
        (self.timestamp, self.seq)
    }
}

/// Fields supplied by the sender; the store fills in id, timestamp and flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub text: String,
}

impl NewMessage {
    pub fn message_type(&self) -> &'static str {
        MESSAGE_TYPE_TEXT
    }
}
