//! Session lifecycle: who is signed in, and the services bound to them.
//!
//! [`ChatSession`] is the explicit service object the UI holds for the
//! lifetime of a sign-in.  It owns the subscription registry and hands out
//! the presence tracker, room directory and message store that share it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use harvest_shared::{ChatError, MessageId, Result, RoomId, UserId};
use harvest_store::{ChatBackend, UserProfileUpdate};

use crate::config::ChatConfig;
use crate::directory::RoomDirectory;
use crate::messages::MessageStore;
use crate::presence::PresenceTracker;
use crate::registry::SubscriptionRegistry;

/// The signed-in user as the chat core sees them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

/// User fields as persisted by the marketplace sign-in flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUser {
    #[serde(alias = "_id")]
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl From<SessionUser> for Identity {
    fn from(user: SessionUser) -> Self {
        Self {
            user_id: user.id,
            display_name: user.username,
            avatar_url: user.avatar,
            email: user.email,
        }
    }
}

/// On-disk session document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSession {
    pub token: String,
    pub user: SessionUser,
}

/// Persisted sign-in state written by the authentication flow.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn token(&self) -> Result<Option<String>>;

    async fn user_profile(&self) -> Result<Option<SessionUser>>;
}

/// Session state kept in a JSON file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `session.json` in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "harvest", "harvest").map(|dirs| dirs.config_dir().join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the session file.  A missing or unreadable document is no session.
    pub async fn load(&self) -> Result<Option<StoredSession>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChatError::TransientStore(format!("reading session: {e}"))),
        };

        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed session file");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, session: &StoredSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ChatError::TransientStore(format!("creating session dir: {e}")))?;
        }
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| ChatError::TransientStore(format!("encoding session: {e}")))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| ChatError::TransientStore(format!("writing session: {e}")))?;
        info!(path = %self.path.display(), user = %session.user.id, "session saved");
        Ok(())
    }

    /// Remove the session file.  Returns `false` if there was none.
    pub async fn clear(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChatError::TransientStore(format!("removing session: {e}"))),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn token(&self) -> Result<Option<String>> {
        Ok(self.load().await?.map(|s| s.token))
    }

    async fn user_profile(&self) -> Result<Option<SessionUser>> {
        Ok(self.load().await?.map(|s| s.user))
    }
}

pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    sessions: Arc<dyn SessionStore>,
    registry: Arc<SubscriptionRegistry>,
    presence: PresenceTracker,
    rooms: RoomDirectory,
    messages: MessageStore,
    /// Held across initialize/teardown so they never interleave.
    identity: Mutex<Option<Identity>>,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        sessions: Arc<dyn SessionStore>,
        config: &ChatConfig,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        Self {
            presence: PresenceTracker::new(
                backend.clone(),
                registry.clone(),
                config.online_window(),
            ),
            rooms: RoomDirectory::new(backend.clone(), registry.clone()),
            messages: MessageStore::new(backend.clone(), registry.clone(), config.message_window),
            backend,
            sessions,
            registry,
            identity: Mutex::new(None),
        }
    }

    /// Resolve the signed-in identity and mark it online.
    ///
    /// Idempotent: once an identity is cached it is returned as-is.
    pub async fn initialize(&self) -> Result<Identity> {
        let mut cached = self.identity.lock().await;
        if let Some(identity) = cached.as_ref() {
            return Ok(identity.clone());
        }

        let user = self
            .sessions
            .user_profile()
            .await?
            .ok_or(ChatError::AuthenticationRequired)?;
        let identity = Identity::from(user);

        self.backend
            .upsert_user(&UserProfileUpdate {
                user_id: identity.user_id.clone(),
                username: identity.display_name.clone(),
                email: identity.email.clone(),
                avatar: identity.avatar_url.clone(),
            })
            .await?;
        self.presence.set_presence(&identity.user_id, true).await?;

        info!(user = %identity.user_id, name = %identity.display_name, "session initialized");
        *cached = Some(identity.clone());
        Ok(identity)
    }

    /// Mark the user offline, close every subscription and forget the identity.
    ///
    /// Subscriptions are closed and the identity cleared even when the
    /// presence write fails; that failure is returned afterwards.
    pub async fn teardown(&self) -> Result<()> {
        let mut cached = self.identity.lock().await;
        let presence = match cached.as_ref() {
            Some(identity) => self.presence.set_presence(&identity.user_id, false).await,
            None => Ok(()),
        };

        let closed = self.registry.cleanup_all().await;
        if let Some(identity) = cached.take() {
            info!(user = %identity.user_id, closed, "session torn down");
        }

        if let Err(e) = &presence {
            warn!(error = %e, "failed to publish offline presence");
        }
        presence
    }

    /// True only while a real identity is cached.
    pub async fn is_usable(&self) -> bool {
        self.identity.lock().await.is_some()
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.identity.lock().await.clone()
    }

    /// The cached identity, or `AuthenticationRequired`.
    pub async fn require_identity(&self) -> Result<Identity> {
        self.identity().await.ok_or(ChatError::AuthenticationRequired)
    }

    /// Room between the signed-in user and `other`, created on first contact.
    pub async fn open_room(&self, other: &UserId) -> Result<RoomId> {
        let me = self.require_identity().await?;
        self.rooms.get_or_create_room(&me.user_id, other).await
    }

    /// Send as the signed-in user.
    pub async fn send(&self, room: &RoomId, text: &str) -> Result<MessageId> {
        let me = self.require_identity().await?;
        self.messages.send(room, &me, text).await
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    pub async fn token(&self) -> Result<Option<String>> {
        self.sessions.token().await
    }
}
