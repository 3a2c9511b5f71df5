//! The room directory: lazily created two-party rooms and the per-user
//! room list.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use harvest_shared::constants::ROOMS_KEY_PREFIX;
use harvest_shared::{resolve_room_id, ChatError, Result, RoomId, UserId, ValidationError};
use harvest_store::{Change, ChatBackend, ChatRoom};

use crate::profiles::{UserDirectory, UserProfile};
use crate::registry::{LiveFeed, SubscriptionRegistry};

/// One entry of a user's room list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room: ChatRoom,
    /// The participant that is not the listing user.
    pub counterpart: UserId,
    pub unread_count: usize,
}

/// A room summary joined with the counterpart's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub summary: RoomSummary,
    pub profile: UserProfile,
}

#[derive(Clone)]
pub struct RoomDirectory {
    backend: Arc<dyn ChatBackend>,
    registry: Arc<SubscriptionRegistry>,
}

impl RoomDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { backend, registry }
    }

    /// Resolve the room for a pair, creating it on first contact.
    ///
    /// Safe to race: both callers derive the same id and the create is
    /// keyed by it.
    pub async fn get_or_create_room(&self, me: &UserId, other: &UserId) -> Result<RoomId> {
        let id = resolve_room_id(me, other);
        if self.backend.find_chat(&id).await?.is_some() {
            return Ok(id);
        }

        let room = ChatRoom::new(id.clone(), Utc::now())
            .ok_or_else(|| ValidationError::InvalidRoomId(id.to_string()))?;
        if self.backend.create_chat_if_absent(&room).await? {
            info!(room = %id, "room created");
        }
        Ok(id)
    }

    /// Every room `user` participates in, most recent activity first.
    pub async fn list_rooms_for_user(&self, user: &UserId) -> Result<Vec<RoomSummary>> {
        let rooms = self.backend.chats_for_user(user).await?;

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            let Some(counterpart) = room.id.counterpart(user) else {
                warn!(room = %room.id, user = %user, "listed room does not involve user");
                continue;
            };
            let unread_count = self.backend.count_unread(&room.id, user).await?;
            summaries.push(RoomSummary {
                room,
                counterpart,
                unread_count,
            });
        }

        summaries.sort_by(|a, b| {
            b.room
                .activity_time()
                .cmp(&a.room.activity_time())
                .then_with(|| a.room.id.as_str().cmp(b.room.id.as_str()))
        });
        Ok(summaries)
    }

    /// Room list joined with counterpart profiles.
    ///
    /// Rooms whose counterpart cannot be resolved are left out.
    pub async fn list_conversations(
        &self,
        user: &UserId,
        profiles: &dyn UserDirectory,
    ) -> Result<Vec<Conversation>> {
        let summaries = self.list_rooms_for_user(user).await?;

        let mut conversations = Vec::with_capacity(summaries.len());
        for summary in summaries {
            match profiles.lookup(&summary.counterpart).await {
                Ok(profile) => conversations.push(Conversation { summary, profile }),
                Err(ChatError::NotFound(_)) => {
                    debug!(room = %summary.room.id, "counterpart unknown, skipping room");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(conversations)
    }

    /// Signal whenever a room involving `user` changes.
    ///
    /// Registered under `rooms_<userId>`.  Signals carry no payload and
    /// coalesce: at most one is pending, and the receiver re-fetches with
    /// [`list_rooms_for_user`](Self::list_rooms_for_user).
    pub async fn subscribe_to_room_changes(&self, user: &UserId) -> Result<LiveFeed<()>> {
        let key = format!("{ROOMS_KEY_PREFIX}{user}");
        let mut changes = self.backend.changes();
        let (tx, rx) = mpsc::channel(1);

        let user = user.clone();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(Change::Chat { chat_id } | Change::Messages { chat_id })
                        if chat_id.involves(&user) => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }

                match tx.try_send(()) {
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Closed(())) => break,
                }
            }
        });

        Ok(LiveFeed::register(&self.registry, key, task, rx).await)
    }

    /// Delete a room and all of its messages.
    ///
    /// A maintenance operation for clearing demo or test rooms; not part of
    /// the normal room lifecycle.
    pub async fn purge_room(&self, room: &RoomId) -> Result<bool> {
        let deleted = self.backend.delete_chat(room).await?;
        if deleted {
            info!(room = %room, "room purged");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use harvest_store::{NewMessage, SqliteBackend};

    use super::*;

    fn id(c: char) -> UserId {
        UserId::parse(&c.to_string().repeat(24)).unwrap()
    }

    fn directory() -> (RoomDirectory, Arc<SqliteBackend>) {
        let backend = Arc::new(SqliteBackend::in_memory().unwrap());
        let directory = RoomDirectory::new(backend.clone(), Arc::new(SubscriptionRegistry::new()));
        (directory, backend)
    }

    async fn post(backend: &SqliteBackend, room: &RoomId, sender: &UserId, text: &str) {
        let message = backend
            .insert_message(&NewMessage {
                chat_id: room.clone(),
                sender_id: sender.clone(),
                sender_name: "seller".to_string(),
                sender_avatar: None,
                text: text.to_string(),
            })
            .await
            .unwrap();
        backend.update_chat_preview(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent_and_symmetric() {
        let (directory, backend) = directory();
        let (a, b) = (id('a'), id('b'));

        let first = directory.get_or_create_room(&a, &b).await.unwrap();
        let second = directory.get_or_create_room(&b, &a).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.chats_for_user(&a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_sorts_by_activity_and_counts_unread() {
        let (directory, backend) = directory();
        let (a, b, c) = (id('a'), id('b'), id('c'));

        let ab = directory.get_or_create_room(&a, &b).await.unwrap();
        let ac = directory.get_or_create_room(&a, &c).await.unwrap();
        post(&backend, &ab, &b, "is the wheat still available?").await;
        post(&backend, &ab, &b, "hello?").await;
        // Store timestamps have millisecond resolution.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        post(&backend, &ac, &a, "sent you the invoice").await;

        let rooms = directory.list_rooms_for_user(&a).await.unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].room.id, ac);
        assert_eq!(rooms[0].counterpart, c);
        assert_eq!(rooms[0].unread_count, 0);
        assert_eq!(rooms[1].room.id, ab);
        assert_eq!(rooms[1].unread_count, 2);
    }

    #[tokio::test]
    async fn test_room_without_messages_sorts_by_creation() {
        let (directory, backend) = directory();
        let (a, b, c) = (id('a'), id('b'), id('c'));

        let ab = directory.get_or_create_room(&a, &b).await.unwrap();
        post(&backend, &ab, &a, "hi").await;
        let ac = resolve_room_id(&a, &c);
        let later = Utc::now() + chrono::Duration::seconds(1);
        backend
            .create_chat_if_absent(&ChatRoom::new(ac.clone(), later).unwrap())
            .await
            .unwrap();

        let rooms = directory.list_rooms_for_user(&a).await.unwrap();
        assert_eq!(rooms[0].room.id, ac);
    }

    #[tokio::test]
    async fn test_room_change_signals_coalesce() {
        let (directory, backend) = directory();
        let (a, b, c, d) = (id('a'), id('b'), id('c'), id('d'));
        let mut feed = directory.subscribe_to_room_changes(&a).await.unwrap();
        assert_eq!(feed.key(), format!("rooms_{a}"));

        // Unrelated room: no signal.
        directory.get_or_create_room(&c, &d).await.unwrap();
        let ab = directory.get_or_create_room(&a, &b).await.unwrap();
        post(&backend, &ab, &b, "one").await;
        post(&backend, &ab, &b, "two").await;

        assert_eq!(feed.next().await, Some(()));
        tokio::task::yield_now().await;
        assert!(feed.try_next().is_none());
    }

    #[tokio::test]
    async fn test_purge_room_removes_messages() {
        let (directory, backend) = directory();
        let (a, b) = (id('a'), id('b'));
        let room = directory.get_or_create_room(&a, &b).await.unwrap();
        post(&backend, &room, &a, "demo").await;

        assert!(directory.purge_room(&room).await.unwrap());
        assert!(!directory.purge_room(&room).await.unwrap());
        assert!(backend.chat_messages(&room).await.unwrap().is_empty());
        assert!(directory.list_rooms_for_user(&a).await.unwrap().is_empty());
    }
}
