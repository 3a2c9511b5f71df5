//! # harvest-store
//!
//! Local backing store for the Harvest chat core, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` with typed CRUD helpers for the `users`, `chats`
//! and `messages` collections, plus the async [`ChatBackend`] trait the chat
//! core is written against and its SQLite implementation.

pub mod backend;
pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use backend::{Change, ChatBackend, SqliteBackend};
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
