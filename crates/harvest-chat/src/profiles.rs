//! Counterpart profile lookups for the conversation list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use harvest_shared::{ChatError, Result, UserId};
use harvest_store::ChatBackend;

/// Display fields for the other side of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    #[serde(alias = "username")]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Resolves a user id to display fields.
///
/// Unknown users are reported as [`ChatError::NotFound`]; the conversation
/// list drops those rooms instead of failing.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, id: &UserId) -> Result<UserProfile>;
}

/// Profile lookups against the marketplace REST API (`GET {base}/users/{id}`).
#[derive(Debug, Clone)]
pub struct RestUserDirectory {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RestUserDirectory {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChatError::TransientStore(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn user_url(&self, id: &UserId) -> String {
        format!("{}/users/{}", self.base_url, id)
    }
}

#[async_trait]
impl UserDirectory for RestUserDirectory {
    async fn lookup(&self, id: &UserId) -> Result<UserProfile> {
        let mut request = self.client.get(self.user_url(id));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| ChatError::TransientStore(format!("profile lookup failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ChatError::NotFound(format!("user {id}")));
        }
        if !resp.status().is_success() {
            return Err(ChatError::TransientStore(format!(
                "profile lookup for {id} returned {}",
                resp.status()
            )));
        }

        let profile: UserProfile = resp
            .json()
            .await
            .map_err(|e| ChatError::TransientStore(format!("invalid profile response: {e}")))?;

        debug!(user = %id, name = %profile.name, "profile resolved");
        Ok(profile)
    }
}

/// Profile lookups served from user documents in the backing store.
#[derive(Clone)]
pub struct StoredUserDirectory {
    backend: Arc<dyn ChatBackend>,
}

impl StoredUserDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl UserDirectory for StoredUserDirectory {
    async fn lookup(&self, id: &UserId) -> Result<UserProfile> {
        match self.backend.find_user(id).await? {
            // Presence-only rows have no profile yet.
            Some(user) if !user.username.is_empty() => Ok(UserProfile {
                name: user.username,
                avatar: user.avatar,
            }),
            _ => Err(ChatError::NotFound(format!("user {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use harvest_store::{SqliteBackend, UserProfileUpdate};

    use super::*;

    fn id(c: char) -> UserId {
        UserId::parse(&c.to_string().repeat(24)).unwrap()
    }

    #[test]
    fn test_profile_accepts_username_field() {
        let profile: UserProfile =
            serde_json::from_str(r#"{"username":"Ravi Farms","avatar":null}"#).unwrap();
        assert_eq!(profile.name, "Ravi Farms");
        assert_eq!(profile.avatar, None);

        let profile: UserProfile = serde_json::from_str(r#"{"name":"Meera"}"#).unwrap();
        assert_eq!(profile.name, "Meera");
    }

    #[test]
    fn test_rest_url_strips_trailing_slash() {
        let directory = RestUserDirectory::new("http://localhost:3000/", None).unwrap();
        assert_eq!(
            directory.user_url(&id('a')),
            format!("http://localhost:3000/users/{}", "a".repeat(24))
        );
    }

    #[tokio::test]
    async fn test_stored_directory_lookup() {
        let backend = Arc::new(SqliteBackend::in_memory().unwrap());
        backend
            .upsert_user(&UserProfileUpdate {
                user_id: id('a'),
                username: "Asha".to_string(),
                email: None,
                avatar: Some("https://cdn.example.com/asha.png".to_string()),
            })
            .await
            .unwrap();
        backend.set_presence(&id('b'), true, &Utc::now()).await.unwrap();

        let directory = StoredUserDirectory::new(backend);
        assert_eq!(directory.lookup(&id('a')).await.unwrap().name, "Asha");
        assert!(matches!(
            directory.lookup(&id('b')).await,
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            directory.lookup(&id('c')).await,
            Err(ChatError::NotFound(_))
        ));
    }
}
