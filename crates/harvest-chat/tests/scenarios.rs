//! End-to-end scenarios: two clients sharing one backing store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use harvest_chat::{
    ChatConfig, ChatSession, SessionStore, SessionUser, StoredUserDirectory, Unsubscribe,
};
use harvest_shared::{resolve_room_id, ChatError, Result, UserId, ValidationError};
use harvest_store::{ChatBackend, SqliteBackend};

const BUYER: &str = "64b7f0c2a1e4d5f6a7b8c9d0";
const SELLER: &str = "64b7f0c2a1e4d5f6a7b8c9d1";

/// Session store holding a fixed, already signed-in user.
struct SignedIn(SessionUser);

#[async_trait]
impl SessionStore for SignedIn {
    async fn token(&self) -> Result<Option<String>> {
        Ok(Some("test-token".to_string()))
    }

    async fn user_profile(&self) -> Result<Option<SessionUser>> {
        Ok(Some(self.0.clone()))
    }
}

fn user(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

fn client(backend: &Arc<SqliteBackend>, id: &str, name: &str) -> ChatSession {
    let signed_in = SignedIn(SessionUser {
        id: user(id),
        username: name.to_string(),
        email: None,
        avatar: None,
    });
    ChatSession::new(backend.clone(), Arc::new(signed_in), &ChatConfig::default())
}

async fn two_clients() -> (Arc<SqliteBackend>, ChatSession, ChatSession) {
    let backend = Arc::new(SqliteBackend::in_memory().unwrap());
    let buyer = client(&backend, BUYER, "Anil (buyer)");
    let seller = client(&backend, SELLER, "Green Valley Farm");
    buyer.initialize().await.unwrap();
    seller.initialize().await.unwrap();
    (backend, buyer, seller)
}

#[tokio::test]
async fn new_conversation_reaches_the_other_side() {
    let (_backend, buyer, seller) = two_clients().await;
    let mut seller_rooms = seller
        .rooms()
        .subscribe_to_room_changes(&user(SELLER))
        .await
        .unwrap();

    let room = buyer.open_room(&user(SELLER)).await.unwrap();
    assert_eq!(room.as_str(), format!("{BUYER}_{SELLER}"));
    buyer.send(&room, "Is the basmati still in stock?").await.unwrap();

    // The seller is told something changed, then re-fetches.
    assert_eq!(seller_rooms.next().await, Some(()));
    let rooms = seller.rooms().list_rooms_for_user(&user(SELLER)).await.unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].counterpart, user(BUYER));
    assert_eq!(rooms[0].unread_count, 1);
    assert_eq!(
        rooms[0].room.last_message.as_deref(),
        Some("Is the basmati still in stock?")
    );

    let mut feed = seller.messages().subscribe_to_messages(&room, None).await.unwrap();
    let window = feed.next().await.unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].sender_id, user(BUYER));
    assert_eq!(window[0].sender_name, "Anil (buyer)");
    assert!(window[0].sent && window[0].delivered);

    // Reply, and the buyer's list shows it with the seller's profile.
    seller.send(&room, "Yes, 40 quintals").await.unwrap();
    let conversations = buyer
        .rooms()
        .list_conversations(&user(BUYER), &StoredUserDirectory::new(buyer.backend().clone()))
        .await
        .unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].profile.name, "Green Valley Farm");
    assert_eq!(conversations[0].summary.unread_count, 1);
}

#[tokio::test]
async fn conversations_skip_unknown_counterparts() {
    let (_backend, buyer, _seller) = two_clients().await;
    let stranger = user("0123456789abcdef01234567");
    buyer.open_room(&user(SELLER)).await.unwrap();
    buyer.open_room(&stranger).await.unwrap();

    let conversations = buyer
        .rooms()
        .list_conversations(&user(BUYER), &StoredUserDirectory::new(buyer.backend().clone()))
        .await
        .unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].summary.counterpart, user(SELLER));
}

#[tokio::test]
async fn presence_follows_the_session() {
    let backend = Arc::new(SqliteBackend::in_memory().unwrap());
    let buyer = client(&backend, BUYER, "Anil");
    let seller = client(&backend, SELLER, "Farm");
    seller.initialize().await.unwrap();

    let mut watch = seller.presence().subscribe_to_presence(&user(BUYER)).await.unwrap();
    let before = watch.next().await.unwrap();
    assert!(!before.is_online);
    assert!(before.last_seen.is_none());

    buyer.initialize().await.unwrap();
    let online = watch.next().await.unwrap();
    assert!(online.is_online);
    assert!(seller.presence().is_recently_online(&online.last_seen.unwrap()));

    buyer.teardown().await.unwrap();
    let offline = watch.next().await.unwrap();
    assert!(!offline.is_online);
    assert!(offline.last_seen.is_some());
}

#[tokio::test]
async fn cleanup_all_tears_down_each_subscription_once() {
    let (_backend, buyer, _seller) = two_clients().await;
    let registry = buyer.registry();
    let torn_down = Arc::new(AtomicUsize::new(0));

    for key in ["messages_x", "presence_y", "rooms_z"] {
        let counter = torn_down.clone();
        registry
            .register(
                key,
                Unsubscribe::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;
    }

    assert_eq!(registry.cleanup_all().await, 3);
    assert_eq!(torn_down.load(Ordering::SeqCst), 3);
    assert!(registry.is_empty().await);

    // Live feeds end once their registration is gone.
    let room = buyer.open_room(&user(SELLER)).await.unwrap();
    let mut feed = buyer.messages().subscribe_to_messages(&room, None).await.unwrap();
    feed.next().await.unwrap();
    buyer.teardown().await.unwrap();
    assert_eq!(feed.next().await, None);
}

#[tokio::test]
async fn resubscribing_replaces_the_previous_feed() {
    let (_backend, buyer, _seller) = two_clients().await;
    let room = buyer.open_room(&user(SELLER)).await.unwrap();

    let mut first = buyer.messages().subscribe_to_messages(&room, None).await.unwrap();
    first.next().await.unwrap();
    let mut second = buyer.messages().subscribe_to_messages(&room, None).await.unwrap();
    second.next().await.unwrap();

    assert_eq!(first.next().await, None);
    assert_eq!(buyer.registry().len().await, 1);
    // The stale feed cannot close its replacement.
    assert!(!first.close().await);
    assert!(buyer.registry().contains(second.key()).await);
}

#[tokio::test]
async fn window_is_ordered_without_the_index() {
    let (backend, buyer, seller) = two_clients().await;
    let room = buyer.open_room(&user(SELLER)).await.unwrap();
    backend
        .with_db(|db| {
            db.conn()
                .execute_batch("DROP INDEX idx_messages_chat_ts")
                .map_err(Into::into)
        })
        .unwrap();

    let texts = ["50 kg?", "yes", "price?", "2400/qtl", "deal"];
    for (i, text) in texts.iter().enumerate() {
        let sender = if i % 2 == 0 { &buyer } else { &seller };
        sender.send(&room, text).await.unwrap();
    }

    let mut feed = buyer.messages().subscribe_to_messages(&room, None).await.unwrap();
    let window = feed.next().await.unwrap();
    let got: Vec<&str> = window.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(got, texts);
    assert!(window
        .windows(2)
        .all(|pair| pair[0].order_key() < pair[1].order_key()));
}

#[tokio::test]
async fn text_length_boundaries() {
    let (backend, buyer, _seller) = two_clients().await;
    let room = buyer.open_room(&user(SELLER)).await.unwrap();

    for rejected in [String::new(), "   \n ".to_string()] {
        assert_eq!(
            buyer.send(&room, &rejected).await.unwrap_err(),
            ChatError::Validation(ValidationError::EmptyMessage)
        );
    }
    assert!(matches!(
        buyer.send(&room, &"x".repeat(1001)).await.unwrap_err(),
        ChatError::Validation(ValidationError::MessageTooLong { len: 1001, .. })
    ));
    assert!(backend.chat_messages(&room).await.unwrap().is_empty());

    buyer.send(&room, "x").await.unwrap();
    buyer.send(&room, &"x".repeat(1000)).await.unwrap();
    assert_eq!(backend.chat_messages(&room).await.unwrap().len(), 2);
}

#[tokio::test]
async fn get_or_create_room_is_idempotent() {
    let (backend, buyer, seller) = two_clients().await;

    let (seller_id, buyer_id) = (user(SELLER), user(BUYER));
    let (a, b) = tokio::join!(buyer.open_room(&seller_id), seller.open_room(&buyer_id));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert_eq!(a, resolve_room_id(&seller_id, &buyer_id));

    buyer.open_room(&user(SELLER)).await.unwrap();
    assert_eq!(backend.chats_for_user(&user(BUYER)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn history_pages_back_through_a_burst() {
    let (backend, buyer, seller) = two_clients().await;
    let room = buyer.open_room(&user(SELLER)).await.unwrap();
    let texts: Vec<String> = (0..10).map(|i| format!("lot {i}")).collect();
    for text in &texts {
        buyer.send(&room, text).await.unwrap();
    }
    backend
        .with_db(|db| {
            db.conn()
                .execute("UPDATE messages SET timestamp = 1700000000000", [])
                .map_err(Into::into)
        })
        .unwrap();

    let messages = seller.messages();
    let mut history = messages.latest(&room, 3).await.unwrap();
    loop {
        let mut older = messages.load_older_messages(&room, &history[0], 3).await.unwrap();
        if older.is_empty() {
            break;
        }
        older.append(&mut history);
        history = older;
    }
    let got: Vec<String> = history.into_iter().map(|m| m.text).collect();
    assert_eq!(got, texts);
}

#[tokio::test]
async fn mark_read_is_idempotent() {
    let (_backend, buyer, seller) = two_clients().await;
    let room = buyer.open_room(&user(SELLER)).await.unwrap();
    buyer.send(&room, "hello").await.unwrap();
    buyer.send(&room, "are you there?").await.unwrap();

    let reader = user(SELLER);
    assert_eq!(seller.messages().mark_read(&room, &reader).await.unwrap(), 2);
    assert_eq!(seller.messages().mark_read(&room, &reader).await.unwrap(), 0);

    let window = seller.messages().latest(&room, 50).await.unwrap();
    assert!(window.iter().all(|m| m.is_read));
    // The sender's own messages never count as unread for them.
    assert_eq!(buyer.messages().unread_count(&room, &user(BUYER)).await.unwrap(), 0);
}
