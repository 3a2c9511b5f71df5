//! Sending, live windows, history paging and read receipts for messages.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use harvest_shared::constants::{MAX_MESSAGE_CHARS, MESSAGES_KEY_PREFIX};
use harvest_shared::{ChatError, MessageId, Result, RoomId, UserId, ValidationError};
use harvest_store::{Change, ChatBackend, Message, NewMessage, StoreError};

use crate::registry::{LiveFeed, SubscriptionRegistry};
use crate::session::Identity;
use crate::FEED_BUFFER;

/// Trim `text` and check it is 1..=1000 characters.
pub fn validate_text(text: &str) -> std::result::Result<&str, ValidationError> {
    let trimmed = text.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        Err(ValidationError::EmptyMessage)
    } else if len > MAX_MESSAGE_CHARS {
        Err(ValidationError::MessageTooLong {
            len,
            max: MAX_MESSAGE_CHARS,
        })
    } else {
        Ok(trimmed)
    }
}

/// The newest `limit` messages of an unordered set, oldest first.
pub fn window_from_unordered(mut messages: Vec<Message>, limit: usize) -> Vec<Message> {
    messages.sort_by_key(Message::order_key);
    let excess = messages.len().saturating_sub(limit);
    messages.drain(..excess);
    messages
}

/// Newest `limit` messages of `room`, oldest first.
///
/// Uses the ordered query when its index is available and falls back to
/// sorting the whole room client-side when it is not.
async fn load_window(
    backend: &dyn ChatBackend,
    room: &RoomId,
    limit: usize,
) -> std::result::Result<Vec<Message>, StoreError> {
    match backend.recent_messages(room, limit).await {
        Ok(mut newest_first) => {
            newest_first.reverse();
            Ok(newest_first)
        }
        Err(StoreError::IndexUnavailable(index)) => {
            warn!(room = %room, index, "ordered query unavailable, sorting client-side");
            let all = backend.chat_messages(room).await?;
            Ok(window_from_unordered(all, limit))
        }
        Err(e) => Err(e),
    }
}

#[derive(Clone)]
pub struct MessageStore {
    backend: Arc<dyn ChatBackend>,
    registry: Arc<SubscriptionRegistry>,
    window: usize,
}

impl MessageStore {
    pub fn new(backend: Arc<dyn ChatBackend>, registry: Arc<SubscriptionRegistry>, window: usize) -> Self {
        Self {
            backend,
            registry,
            window,
        }
    }

    /// Default size of the live window delivered by
    /// [`subscribe_to_messages`](Self::subscribe_to_messages).
    pub fn window(&self) -> usize {
        self.window
    }

    /// Send a text message from `sender` into `room`.
    ///
    /// The message is inserted, flagged `sent`, the room preview is
    /// updated, and the message is flagged `delivered`.  Validation happens
    /// before any write.
    pub async fn send(&self, room: &RoomId, sender: &Identity, text: &str) -> Result<MessageId> {
        let text = validate_text(text)?;

        let chat = self
            .backend
            .find_chat(room)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("room {room}")))?;
        if !chat.has_participant(&sender.user_id) {
            return Err(ChatError::NotParticipant {
                room: room.to_string(),
                user: sender.user_id.to_string(),
            });
        }

        let message = self
            .backend
            .insert_message(&NewMessage {
                chat_id: room.clone(),
                sender_id: sender.user_id.clone(),
                sender_name: sender.display_name.clone(),
                sender_avatar: sender.avatar_url.clone(),
                text: text.to_string(),
            })
            .await?;
        self.backend.mark_sent(&message).await?;
        self.backend.update_chat_preview(&message).await?;
        self.backend.mark_delivered(&message).await?;

        info!(room = %room, message = %message.id, chars = text.chars().count(), "message sent");
        Ok(message.id)
    }

    /// One-shot read of the newest `limit` messages, oldest first.
    pub async fn latest(&self, room: &RoomId, limit: usize) -> Result<Vec<Message>> {
        Ok(load_window(self.backend.as_ref(), room, limit).await?)
    }

    /// Live window over the newest `limit` messages of `room`, oldest first.
    /// `None` uses the configured window.
    ///
    /// Registered under `messages_<roomId>`.  The full window is delivered
    /// on subscribe and again after every change to the room's messages.
    pub async fn subscribe_to_messages(
        &self,
        room: &RoomId,
        limit: Option<usize>,
    ) -> Result<LiveFeed<Vec<Message>>> {
        let key = format!("{MESSAGES_KEY_PREFIX}{room}");
        let limit = limit.unwrap_or(self.window);
        let mut changes = self.backend.changes();
        let initial = load_window(self.backend.as_ref(), room, limit).await?;

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        // Fresh channel: the first delivery always fits.
        let _ = tx.try_send(initial);

        let backend = self.backend.clone();
        let room = room.clone();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(Change::Messages { chat_id }) if chat_id == room => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(room = %room, skipped, "message feed lagged, re-reading");
                    }
                    Err(RecvError::Closed) => break,
                }

                match load_window(backend.as_ref(), &room, limit).await {
                    Ok(window) => {
                        if tx.send(window).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(room = %room, error = %e, "message window re-read failed"),
                }
            }
        });

        Ok(LiveFeed::register(&self.registry, key, task, rx).await)
    }

    /// Up to `limit` messages ordered before `before`, oldest first.
    ///
    /// Ordering is by `(timestamp, seq)`, so messages sharing `before`'s
    /// timestamp but inserted earlier are still reachable.
    pub async fn load_older_messages(
        &self,
        room: &RoomId,
        before: &Message,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let cursor = before.order_key();
        match self.backend.messages_before(room, cursor, limit).await
        {
            Ok(mut newest_first) => {
                newest_first.reverse();
                Ok(newest_first)
            }
            Err(StoreError::IndexUnavailable(index)) => {
                warn!(room = %room, index, "ordered query unavailable, paging client-side");
                let older: Vec<Message> = self
                    .backend
                    .chat_messages(room)
                    .await?
                    .into_iter()
                    .filter(|m| m.order_key() < cursor)
                    .collect();
                Ok(window_from_unordered(older, limit))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark every message in `room` not sent by `reader` as read.
    ///
    /// Returns how many messages flipped; a repeat call returns 0.
    pub async fn mark_read(&self, room: &RoomId, reader: &UserId) -> Result<usize> {
        if !room.involves(reader) {
            return Err(ChatError::NotParticipant {
                room: room.to_string(),
                user: reader.to_string(),
            });
        }
        let unread = self.backend.unread_message_ids(room, reader).await?;
        if unread.is_empty() {
            return Ok(0);
        }
        let flipped = self.backend.mark_read(room, &unread).await?;
        debug!(room = %room, reader = %reader, flipped, "messages marked read");
        Ok(flipped)
    }

    pub async fn unread_count(&self, room: &RoomId, reader: &UserId) -> Result<usize> {
        Ok(self.backend.count_unread(room, reader).await?)
    }
}
