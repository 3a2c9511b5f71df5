//! The backing-store seam used by the chat core.
//!
//! [`ChatBackend`] is the document-store contract the client synchronises
//! against: merge-writes keyed by id, one-shot queries, and a change feed
//! that live subscriptions re-query on.  [`SqliteBackend`] implements it on
//! top of the local [`Database`].

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use harvest_shared::{MessageId, RoomId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ChatRoom, Message, NewMessage, PresenceRecord, UserProfileUpdate, UserRecord};

/// Capacity of the change feed.  Slow receivers see `Lagged` and re-query.
const CHANGE_FEED_CAPACITY: usize = 256;

/// A document mutation, published after the write is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A chat row was created, updated or deleted.
    Chat { chat_id: RoomId },
    /// A message in the chat was inserted or had a flag flipped.
    Messages { chat_id: RoomId },
    /// A user's presence fields changed.
    Presence { user_id: UserId },
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    // -- chats --

    async fn find_chat(&self, id: &RoomId) -> Result<Option<ChatRoom>>;

    /// Create-if-absent keyed by the room id.  Returns `true` if created.
    async fn create_chat_if_absent(&self, chat: &ChatRoom) -> Result<bool>;

    /// Rooms containing `user`; ordering is unspecified.
    async fn chats_for_user(&self, user: &UserId) -> Result<Vec<ChatRoom>>;

    async fn update_chat_preview(&self, message: &Message) -> Result<bool>;

    async fn delete_chat(&self, id: &RoomId) -> Result<bool>;

    // -- messages --

    async fn insert_message(&self, message: &NewMessage) -> Result<Message>;

    async fn mark_sent(&self, message: &Message) -> Result<bool>;

    async fn mark_delivered(&self, message: &Message) -> Result<bool>;

    /// Newest first.  May fail with [`StoreError::IndexUnavailable`].
    async fn recent_messages(&self, chat: &RoomId, limit: usize) -> Result<Vec<Message>>;

    /// Whole room, unordered.
    async fn chat_messages(&self, chat: &RoomId) -> Result<Vec<Message>>;

    /// Ordered strictly before the `(timestamp, seq)` cursor, newest first.
    /// May fail with [`StoreError::IndexUnavailable`].
    async fn messages_before(
        &self,
        chat: &RoomId,
        before: (DateTime<Utc>, i64),
        limit: usize,
    ) -> Result<Vec<Message>>;

    async fn unread_message_ids(&self, chat: &RoomId, reader: &UserId) -> Result<Vec<MessageId>>;

    async fn mark_read(&self, chat: &RoomId, ids: &[MessageId]) -> Result<usize>;

    async fn count_unread(&self, chat: &RoomId, reader: &UserId) -> Result<usize>;

    // -- users / presence --

    async fn upsert_user(&self, profile: &UserProfileUpdate) -> Result<()>;

    async fn find_user(&self, id: &UserId) -> Result<Option<UserRecord>>;

    async fn set_presence(&self, id: &UserId, is_online: bool, at: &DateTime<Utc>) -> Result<()>;

    async fn find_presence(&self, id: &UserId) -> Result<Option<PresenceRecord>>;

    // -- live --

    /// A receiver for every change committed after this call.
    fn changes(&self) -> broadcast::Receiver<Change>;
}

/// [`ChatBackend`] over a local SQLite [`Database`].
pub struct SqliteBackend {
    db: Mutex<Database>,
    changes: broadcast::Sender<Change>,
}

impl SqliteBackend {
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            db: Mutex::new(db),
            changes,
        }
    }

    /// Backend over a fresh in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` with exclusive access to the database.
    ///
    /// Writes made through this escape hatch do not publish changes.
    pub fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let db = self.lock()?;
        f(&db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    fn publish(&self, change: Change) {
        // No receivers is fine: nobody is subscribed right now.
        let _ = self.changes.send(change);
    }
}

fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ChatBackend for SqliteBackend {
    async fn find_chat(&self, id: &RoomId) -> Result<Option<ChatRoom>> {
        optional(self.lock()?.get_chat(id))
    }

    async fn create_chat_if_absent(&self, chat: &ChatRoom) -> Result<bool> {
        let created = self.lock()?.create_chat_if_absent(chat)?;
        if created {
            tracing::debug!(chat = %chat.id, "chat created");
            self.publish(Change::Chat {
                chat_id: chat.id.clone(),
            });
        }
        Ok(created)
    }

    async fn chats_for_user(&self, user: &UserId) -> Result<Vec<ChatRoom>> {
        self.lock()?.list_chats_for_user(user)
    }

    async fn update_chat_preview(&self, message: &Message) -> Result<bool> {
        let applied = self.lock()?.update_chat_preview(
            &message.chat_id,
            &message.text,
            &message.sender_id,
            &message.timestamp,
        )?;
        if applied {
            self.publish(Change::Chat {
                chat_id: message.chat_id.clone(),
            });
        }
        Ok(applied)
    }

    async fn delete_chat(&self, id: &RoomId) -> Result<bool> {
        let deleted = self.lock()?.delete_chat(id)?;
        if deleted {
            self.publish(Change::Messages {
                chat_id: id.clone(),
            });
            self.publish(Change::Chat {
                chat_id: id.clone(),
            });
        }
        Ok(deleted)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let stored = self.lock()?.insert_message(message)?;
        self.publish(Change::Messages {
            chat_id: stored.chat_id.clone(),
        });
        Ok(stored)
    }

    async fn mark_sent(&self, message: &Message) -> Result<bool> {
        let flipped = self.lock()?.mark_message_sent(&message.id)?;
        if flipped {
            self.publish(Change::Messages {
                chat_id: message.chat_id.clone(),
            });
        }
        Ok(flipped)
    }

    async fn mark_delivered(&self, message: &Message) -> Result<bool> {
        let flipped = self.lock()?.mark_message_delivered(&message.id)?;
        if flipped {
            self.publish(Change::Messages {
                chat_id: message.chat_id.clone(),
            });
        }
        Ok(flipped)
    }

    async fn recent_messages(&self, chat: &RoomId, limit: usize) -> Result<Vec<Message>> {
        self.lock()?.recent_messages(chat, limit)
    }

    async fn chat_messages(&self, chat: &RoomId) -> Result<Vec<Message>> {
        self.lock()?.chat_messages(chat)
    }

    async fn messages_before(
        &self,
        chat: &RoomId,
        before: (DateTime<Utc>, i64),
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.lock()?.messages_before(chat, (&before.0, before.1), limit)
    }

    async fn unread_message_ids(&self, chat: &RoomId, reader: &UserId) -> Result<Vec<MessageId>> {
        self.lock()?.unread_message_ids(chat, reader)
    }

    async fn mark_read(&self, chat: &RoomId, ids: &[MessageId]) -> Result<usize> {
        let flipped = self.lock()?.mark_messages_read(ids)?;
        if flipped > 0 {
            self.publish(Change::Messages {
                chat_id: chat.clone(),
            });
        }
        Ok(flipped)
    }

    async fn count_unread(&self, chat: &RoomId, reader: &UserId) -> Result<usize> {
        self.lock()?.count_unread(chat, reader)
    }

    async fn upsert_user(&self, profile: &UserProfileUpdate) -> Result<()> {
        self.lock()?.upsert_user(profile)
    }

    async fn find_user(&self, id: &UserId) -> Result<Option<UserRecord>> {
        optional(self.lock()?.get_user(id))
    }

    async fn set_presence(&self, id: &UserId, is_online: bool, at: &DateTime<Utc>) -> Result<()> {
        self.lock()?.set_presence(id, is_online, at)?;
        self.publish(Change::Presence {
            user_id: id.clone(),
        });
        Ok(())
    }

    async fn find_presence(&self, id: &UserId) -> Result<Option<PresenceRecord>> {
        optional(self.lock()?.get_presence(id))
    }

    fn changes(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use harvest_shared::resolve_room_id;

    use super::*;

    fn pair() -> (UserId, UserId) {
        (
            UserId::parse("aaaaaaaaaaaaaaaaaaaaaaaa").unwrap(),
            UserId::parse("bbbbbbbbbbbbbbbbbbbbbbbb").unwrap(),
        )
    }

    #[tokio::test]
    async fn writes_publish_changes() {
        let backend = SqliteBackend::in_memory().unwrap();
        let mut rx = backend.changes();
        let (a, b) = pair();
        let room = resolve_room_id(&a, &b);

        let chat = ChatRoom::new(room.clone(), Utc::now()).unwrap();
        assert!(backend.create_chat_if_absent(&chat).await.unwrap());
        assert_eq!(
            rx.recv().await.unwrap(),
            Change::Chat {
                chat_id: room.clone()
            }
        );

        // A second create is a no-op and stays silent.
        assert!(!backend.create_chat_if_absent(&chat).await.unwrap());

        backend.set_presence(&a, true, &Utc::now()).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            Change::Presence { user_id: a.clone() }
        );
    }

    #[tokio::test]
    async fn missing_records_are_none() {
        let backend = SqliteBackend::in_memory().unwrap();
        let (a, b) = pair();

        assert!(backend.find_chat(&resolve_room_id(&a, &b)).await.unwrap().is_none());
        assert!(backend.find_presence(&a).await.unwrap().is_none());
        assert!(backend.find_user(&b).await.unwrap().is_none());
    }
}
