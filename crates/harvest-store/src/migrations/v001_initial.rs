//! v001 -- Initial schema creation.
//!
//! Creates the three collections the chat core reads and writes: `users`,
//! `chats`, and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (profile mirror + presence)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    user_id   TEXT PRIMARY KEY NOT NULL,     -- 24-char hex object id
    username  TEXT NOT NULL DEFAULT '',
    email     TEXT,
    avatar    TEXT,
    is_online INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    last_seen INTEGER                        -- unix millis
);

-- ----------------------------------------------------------------
-- Chats (one row per participant pair)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id                TEXT PRIMARY KEY NOT NULL,  -- sorted(a, b).join('_')
    participant_a     TEXT NOT NULL,              -- lexicographically first
    participant_b     TEXT NOT NULL,
    created_at        INTEGER NOT NULL,           -- unix millis
    last_message      TEXT,
    last_message_time INTEGER,                    -- unix millis
    last_sender_id    TEXT
);

CREATE INDEX IF NOT EXISTS idx_chats_participant_a ON chats(participant_a);
CREATE INDEX IF NOT EXISTS idx_chats_participant_b ON chats(participant_b);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order
    id            TEXT NOT NULL UNIQUE,               -- UUID v4
    chat_id       TEXT NOT NULL,                      -- FK -> chats(id)
    sender_id     TEXT NOT NULL,
    sender_name   TEXT NOT NULL,
    sender_avatar TEXT,
    text          TEXT NOT NULL,
    message_type  TEXT NOT NULL DEFAULT 'text',
    timestamp     INTEGER NOT NULL,                   -- unix millis, store-assigned
    is_read       INTEGER NOT NULL DEFAULT 0,
    sent          INTEGER NOT NULL DEFAULT 0,
    delivered     INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
