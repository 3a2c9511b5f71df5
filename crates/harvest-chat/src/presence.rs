//! Online/offline presence for users.
//!
//! Presence is a single snapshot per user (`is_online`, `last_seen`) that is
//! overwritten on every change; there is no history.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use harvest_shared::constants::PRESENCE_KEY_PREFIX;
use harvest_shared::{Result, UserId};
use harvest_store::{Change, ChatBackend, PresenceRecord};

use crate::registry::{LiveFeed, SubscriptionRegistry};
use crate::FEED_BUFFER;

/// How the UI should label a user's presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceLabel {
    Online,
    LastSeen(DateTime<Utc>),
    Unknown,
}

#[derive(Clone)]
pub struct PresenceTracker {
    backend: Arc<dyn ChatBackend>,
    registry: Arc<SubscriptionRegistry>,
    online_window: Duration,
}

impl PresenceTracker {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        registry: Arc<SubscriptionRegistry>,
        online_window: Duration,
    ) -> Self {
        Self {
            backend,
            registry,
            online_window,
        }
    }

    /// Merge-write `{is_online, last_seen: now}` on the user's document.
    pub async fn set_presence(&self, user: &UserId, is_online: bool) -> Result<()> {
        self.backend
            .set_presence(user, is_online, &Utc::now())
            .await?;
        debug!(user = %user, is_online, "presence updated");
        Ok(())
    }

    /// Current snapshot, or an offline stand-in if none was ever written.
    pub async fn current(&self, user: &UserId) -> Result<PresenceRecord> {
        Ok(self
            .backend
            .find_presence(user)
            .await?
            .unwrap_or_else(|| PresenceRecord::offline(user.clone())))
    }

    /// Live presence for `user`, registered under `presence_<userId>`.
    ///
    /// The current snapshot is delivered first, then one record per change.
    pub async fn subscribe_to_presence(&self, user: &UserId) -> Result<LiveFeed<PresenceRecord>> {
        let key = format!("{PRESENCE_KEY_PREFIX}{user}");
        let mut changes = self.backend.changes();
        let initial = self.current(user).await?;

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        // Fresh channel: the first delivery always fits.
        let _ = tx.try_send(initial);

        let backend = self.backend.clone();
        let user = user.clone();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(Change::Presence { user_id }) if user_id == user => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(user = %user, skipped, "presence feed lagged, re-reading");
                    }
                    Err(RecvError::Closed) => break,
                }

                let record = match backend.find_presence(&user).await {
                    Ok(found) => found.unwrap_or_else(|| PresenceRecord::offline(user.clone())),
                    Err(e) => {
                        warn!(user = %user, error = %e, "presence re-read failed");
                        continue;
                    }
                };
                if tx.send(record).await.is_err() {
                    break;
                }
            }
        });

        Ok(LiveFeed::register(&self.registry, key, task, rx).await)
    }

    /// Whether `last_seen` falls inside the configured online window.
    pub fn is_recently_online(&self, last_seen: &DateTime<Utc>) -> bool {
        is_recently_online_at(last_seen, &Utc::now(), self.online_window)
    }

    pub fn label(&self, record: &PresenceRecord) -> PresenceLabel {
        label_at(record, &Utc::now(), self.online_window)
    }
}

/// Pure form of [`PresenceTracker::is_recently_online`].
pub fn is_recently_online_at(last_seen: &DateTime<Utc>, now: &DateTime<Utc>, window: Duration) -> bool {
    *now - *last_seen <= window
}

/// Online if flagged online with a fresh `last_seen`.  A stale online flag
/// (the app died without writing offline) degrades to "last seen".
pub fn label_at(record: &PresenceRecord, now: &DateTime<Utc>, window: Duration) -> PresenceLabel {
    match record.last_seen {
        Some(seen) if record.is_online && is_recently_online_at(&seen, now, window) => {
            PresenceLabel::Online
        }
        Some(seen) => PresenceLabel::LastSeen(seen),
        None => PresenceLabel::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use harvest_store::SqliteBackend;

    use super::*;

    fn user() -> UserId {
        UserId::parse("5f1a2b3c4d5e6f7a8b9c0d1e").unwrap()
    }

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(
            Arc::new(SqliteBackend::in_memory().unwrap()),
            Arc::new(SubscriptionRegistry::new()),
            Duration::minutes(5),
        )
    }

    #[test]
    fn test_online_window_boundaries() {
        let now = Utc::now();
        let window = Duration::minutes(5);
        assert!(is_recently_online_at(&(now - Duration::minutes(4)), &now, window));
        assert!(is_recently_online_at(&(now - Duration::minutes(5)), &now, window));
        assert!(!is_recently_online_at(
            &(now - Duration::minutes(5) - Duration::milliseconds(1)),
            &now,
            window
        ));
        assert!(!is_recently_online_at(&(now - Duration::hours(2)), &now, window));
    }

    #[test]
    fn test_stale_online_flag_reads_as_last_seen() {
        let now = Utc::now();
        let seen = now - Duration::minutes(30);
        let record = PresenceRecord {
            user_id: user(),
            is_online: true,
            last_seen: Some(seen),
        };
        assert_eq!(
            label_at(&record, &now, Duration::minutes(5)),
            PresenceLabel::LastSeen(seen)
        );
        assert_eq!(
            label_at(&PresenceRecord::offline(user()), &now, Duration::minutes(5)),
            PresenceLabel::Unknown
        );
    }

    #[tokio::test]
    async fn test_subscribe_synthesizes_offline_for_unknown_user() {
        let tracker = tracker();
        let mut feed = tracker.subscribe_to_presence(&user()).await.unwrap();

        assert_eq!(feed.key(), format!("presence_{}", user()));
        let first = feed.next().await.unwrap();
        assert!(!first.is_online);
        assert!(first.last_seen.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_updates() {
        let tracker = tracker();
        let mut feed = tracker.subscribe_to_presence(&user()).await.unwrap();
        feed.next().await.unwrap();

        tracker.set_presence(&user(), true).await.unwrap();
        let online = feed.next().await.unwrap();
        assert!(online.is_online);
        assert!(tracker.is_recently_online(&online.last_seen.unwrap()));

        tracker.set_presence(&user(), false).await.unwrap();
        assert!(!feed.next().await.unwrap().is_online);
    }
}
