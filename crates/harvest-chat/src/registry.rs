//! Keyed registry of live subscription handles.
//!
//! Every live query the core opens is recorded here under a stable key, so
//! that a screen exit or logout can tear all of them down in one call.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Teardown action for one live subscription.  Runs at most once.
pub struct Unsubscribe(Box<dyn FnOnce() + Send + 'static>);

impl Unsubscribe {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Teardown that aborts the task feeding a subscription.
    pub fn from_task(handle: JoinHandle<()>) -> Self {
        Self::new(move || handle.abort())
    }

    pub fn call(self) {
        (self.0)()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unsubscribe(..)")
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Key -> (registration ticket, teardown).
    handles: Mutex<HashMap<String, (u64, Unsubscribe)>>,
    next_ticket: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` under `key`, tearing down any handle it replaces.
    ///
    /// Returns a ticket identifying this registration.
    pub async fn register(&self, key: impl Into<String>, handle: Unsubscribe) -> u64 {
        let key = key.into();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let replaced = self
            .handles
            .lock()
            .await
            .insert(key.clone(), (ticket, handle));
        // Teardown runs outside the lock.
        if let Some((_, old)) = replaced {
            debug!(key = %key, "replacing live subscription");
            old.call();
        }
        ticket
    }

    /// Tear down and forget one handle.  Returns `false` if `key` was absent.
    pub async fn cleanup_one(&self, key: &str) -> bool {
        let removed = self.handles.lock().await.remove(key);
        match removed {
            Some((_, handle)) => {
                handle.call();
                debug!(key, "subscription closed");
                true
            }
            None => false,
        }
    }

    /// Like [`cleanup_one`](Self::cleanup_one), but only if `key` still
    /// holds the registration identified by `ticket`.
    pub async fn cleanup_ticket(&self, key: &str, ticket: u64) -> bool {
        let removed = {
            let mut handles = self.handles.lock().await;
            match handles.get(key) {
                Some((current, _)) if *current == ticket => handles.remove(key),
                _ => None,
            }
        };
        match removed {
            Some((_, handle)) => {
                handle.call();
                debug!(key, "subscription closed");
                true
            }
            None => false,
        }
    }

    /// Tear down every handle.  Returns how many were closed.
    pub async fn cleanup_all(&self) -> usize {
        let drained: Vec<(String, (u64, Unsubscribe))> =
            self.handles.lock().await.drain().collect();
        let count = drained.len();
        for (_, (_, handle)) in drained {
            handle.call();
        }
        if count > 0 {
            debug!(count, "all subscriptions closed");
        }
        count
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.handles.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// The receiving end of a registered live query.
///
/// Dropping the feed does not unregister it; the feeding task notices the
/// closed channel on its next delivery and exits.  Use
/// [`LiveFeed::close`] or the registry to stop it eagerly.
#[derive(Debug)]
pub struct LiveFeed<T> {
    key: String,
    ticket: u64,
    rx: mpsc::Receiver<T>,
    registry: Arc<SubscriptionRegistry>,
}

impl<T> LiveFeed<T> {
    /// Register `task` under `key` and wrap the channel it feeds.
    pub(crate) async fn register(
        registry: &Arc<SubscriptionRegistry>,
        key: String,
        task: JoinHandle<()>,
        rx: mpsc::Receiver<T>,
    ) -> Self {
        let ticket = registry
            .register(key.clone(), Unsubscribe::from_task(task))
            .await;
        Self {
            key,
            ticket,
            rx,
            registry: registry.clone(),
        }
    }

    /// Registry key this feed is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next delivery, or `None` once the subscription has been torn down.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// A delivery that is already waiting, without suspending.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Unregister and tear down this subscription.
    ///
    /// A no-op if a newer subscription has since taken over the key.
    pub async fn close(self) -> bool {
        self.registry.cleanup_ticket(&self.key, self.ticket).await
    }
}
