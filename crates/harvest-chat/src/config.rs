//! Chat core configuration loaded from environment variables.
//!
//! Every setting has a default so the core runs with zero configuration
//! against a local database and the development marketplace API.

use std::path::PathBuf;

use harvest_shared::constants::{DEFAULT_HISTORY_PAGE, DEFAULT_MESSAGE_WINDOW, ONLINE_WINDOW_SECS};

/// Chat core configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// SQLite database file.
    /// Env: `HARVEST_DB_PATH`
    /// Default: platform data dir (see `Database::default_path`).
    pub db_path: Option<PathBuf>,

    /// JSON file holding the signed-in session.
    /// Env: `HARVEST_SESSION_PATH`
    /// Default: platform config dir (see `FileSessionStore::default_path`).
    pub session_path: Option<PathBuf>,

    /// Base URL of the marketplace REST API used for profile lookups.
    /// Env: `HARVEST_API_URL`
    /// Default: `http://localhost:3000`
    pub api_url: String,

    /// Size of the live message window.
    /// Env: `HARVEST_MESSAGE_WINDOW`
    /// Default: `50`
    pub message_window: usize,

    /// Page size for history paging.
    /// Env: `HARVEST_HISTORY_PAGE`
    /// Default: `20`
    pub history_page: usize,

    /// How long after `last_seen` a user still counts as recently online.
    /// Env: `HARVEST_ONLINE_WINDOW_SECS`
    /// Default: `300`
    pub online_window_secs: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            session_path: None,
            api_url: "http://localhost:3000".to_string(),
            message_window: DEFAULT_MESSAGE_WINDOW,
            history_page: DEFAULT_HISTORY_PAGE,
            online_window_secs: ONLINE_WINDOW_SECS,
        }
    }
}

impl ChatConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("HARVEST_DB_PATH").filter(|p| !p.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(path) = lookup("HARVEST_SESSION_PATH").filter(|p| !p.is_empty()) {
            config.session_path = Some(PathBuf::from(path));
        }

        if let Some(url) = lookup("HARVEST_API_URL").filter(|u| !u.is_empty()) {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        if let Some(val) = lookup("HARVEST_MESSAGE_WINDOW") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.message_window = n,
                _ => tracing::warn!(value = %val, "Invalid HARVEST_MESSAGE_WINDOW, using default"),
            }
        }

        if let Some(val) = lookup("HARVEST_HISTORY_PAGE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.history_page = n,
                _ => tracing::warn!(value = %val, "Invalid HARVEST_HISTORY_PAGE, using default"),
            }
        }

        if let Some(val) = lookup("HARVEST_ONLINE_WINDOW_SECS") {
            match val.parse::<i64>() {
                Ok(n) if n >= 0 && chrono::Duration::try_seconds(n).is_some() => {
                    config.online_window_secs = n
                }
                _ => tracing::warn!(
                    value = %val,
                    "Invalid HARVEST_ONLINE_WINDOW_SECS, using default"
                ),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// The presence window.  Out-of-range values fall back to the default.
    pub fn online_window(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.online_window_secs)
            .unwrap_or_else(|| chrono::Duration::seconds(ONLINE_WINDOW_SECS))
    }
}
