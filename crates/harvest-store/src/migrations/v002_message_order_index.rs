//! v002 -- Composite index backing the ordered message window query.
//!
//! Kept separate from v001 because the ordered query refuses to run without
//! it; a database that lost the index degrades to the unordered path.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, timestamp DESC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
