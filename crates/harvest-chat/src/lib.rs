//! # harvest-chat
//!
//! Client-side chat core for the Harvest marketplace: two-party rooms
//! between buyers and sellers, live message windows, presence, and the
//! session that ties them to the signed-in user.
//!
//! Everything is written against the [`harvest_store::ChatBackend`] seam.
//! Live queries are delivered through [`LiveFeed`]s, each recorded in the
//! session's [`SubscriptionRegistry`] so logout can close all of them.

pub mod config;
pub mod directory;
pub mod messages;
pub mod presence;
pub mod profiles;
pub mod registry;
pub mod session;

pub use config::ChatConfig;
pub use directory::{Conversation, RoomDirectory, RoomSummary};
pub use messages::{validate_text, MessageStore};
pub use presence::{PresenceLabel, PresenceTracker};
pub use profiles::{RestUserDirectory, StoredUserDirectory, UserDirectory, UserProfile};
pub use registry::{LiveFeed, SubscriptionRegistry, Unsubscribe};
pub use session::{ChatSession, FileSessionStore, Identity, SessionStore, SessionUser, StoredSession};

/// Buffered deliveries per live feed before the feeding task waits.
pub(crate) const FEED_BUFFER: usize = 16;
