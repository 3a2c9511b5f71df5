use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use harvest_shared::{MessageId, RoomId, UserId};

use crate::database::{from_millis, not_found, parse_col, to_millis, Database};
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage};

/// Index the ordered window and history queries rely on.
pub const ORDERED_MESSAGES_INDEX: &str = "idx_messages_chat_ts";

const MESSAGE_COLUMNS: &str = "seq, id, chat_id, sender_id, sender_name, sender_avatar,
     text, message_type, timestamp, is_read, sent, delivered";

impl Database {
    /// Insert a message, assigning its id, timestamp and sequence number.
    ///
    /// The timestamp is the current time clamped to the newest timestamp
    /// already in the room, so timestamps never decrease within a room.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        let tx = self.conn().unchecked_transaction()?;

        let newest: Option<i64> = tx.query_row(
            "SELECT MAX(timestamp) FROM messages WHERE chat_id = ?1",
            params![new.chat_id.as_str()],
            |row| row.get(0),
        )?;
        let now_ms = to_millis(&Utc::now());
        let ts_ms = newest.map_or(now_ms, |n| n.max(now_ms));

        let id = MessageId::new();
        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, sender_name, sender_avatar,
                                   text, message_type, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.to_string(),
                new.chat_id.as_str(),
                new.sender_id.as_str(),
                new.sender_name,
                new.sender_avatar,
                new.text,
                new.message_type(),
                ts_ms,
            ],
        )?;
        let seq = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Message {
            id,
            chat_id: new.chat_id.clone(),
            sender_id: new.sender_id.clone(),
            sender_name: new.sender_name.clone(),
            sender_avatar: new.sender_avatar.clone(),
            text: new.text.clone(),
            message_type: new.message_type().to_string(),
            timestamp: from_millis(8, ts_ms)?,
            seq,
            is_read: false,
            sent: false,
            delivered: false,
        })
    }

    pub fn get_message(&self, id: &MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Flip `sent` to true.  Returns `false` if it already was.
    pub fn mark_message_sent(&self, id: &MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET sent = 1 WHERE id = ?1 AND sent = 0",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Flip `delivered` to true.  Returns `false` if it already was.
    pub fn mark_message_delivered(&self, id: &MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET delivered = 1 WHERE id = ?1 AND delivered = 0",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Newest `limit` messages of a room, newest first.
    ///
    /// Refuses to run without [`ORDERED_MESSAGES_INDEX`].
    pub fn recent_messages(&self, chat: &RoomId, limit: usize) -> Result<Vec<Message>> {
        self.require_index(ORDERED_MESSAGES_INDEX)?;
        self.collect_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1
                 ORDER BY timestamp DESC, seq DESC
                 LIMIT ?2"
            ),
            params![chat.as_str(), limit as i64],
        )
    }

    /// Up to `limit` messages ordered before the `(timestamp, seq)` cursor,
    /// newest first.
    pub fn messages_before(
        &self,
        chat: &RoomId,
        before: (&DateTime<Utc>, i64),
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.require_index(ORDERED_MESSAGES_INDEX)?;
        let (ts, seq) = before;
        self.collect_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1
                   AND (timestamp < ?2 OR (timestamp = ?2 AND seq < ?3))
                 ORDER BY timestamp DESC, seq DESC
                 LIMIT ?4"
            ),
            params![chat.as_str(), to_millis(ts), seq, limit as i64],
        )
    }

    /// Every message of a room in storage order (no ordering guarantee).
    pub fn chat_messages(&self, chat: &RoomId) -> Result<Vec<Message>> {
        self.collect_messages(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1"),
            params![chat.as_str()],
        )
    }

    /// Ids of unread messages in the room that `reader` did not send.
    pub fn unread_message_ids(&self, chat: &RoomId, reader: &UserId) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM messages
             WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0",
        )?;
        let rows = stmt.query_map(params![chat.as_str(), reader.as_str()], |row| {
            let id_str: String = row.get(0)?;
            parse_col(0, &id_str, Uuid::parse_str).map(MessageId)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn count_unread(&self, chat: &RoomId, reader: &UserId) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0",
            params![chat.as_str(), reader.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Flip `is_read` (and `delivered`) on a batch of messages in one
    /// transaction.  Messages already read are skipped; returns the number
    /// of messages that changed.
    pub fn mark_messages_read(&self, ids: &[MessageId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let tx = self.conn().unchecked_transaction()?;
        let mut flipped = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE messages SET is_read = 1, delivered = 1
                 WHERE id = ?1 AND is_read = 0",
            )?;
            for id in ids {
                flipped += stmt.execute(params![id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(flipped)
    }

    fn require_index(&self, name: &'static str) -> Result<()> {
        if self.has_index(name)? {
            Ok(())
        } else {
            Err(StoreError::IndexUnavailable(name))
        }
    }

    fn collect_messages(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params, row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let seq: i64 = row.get(0)?;
    let id_str: String = row.get(1)?;
    let chat_str: String = row.get(2)?;
    let sender_str: String = row.get(3)?;
    let ts_ms: i64 = row.get(8)?;

    Ok(Message {
        id: MessageId(parse_col(1, &id_str, Uuid::parse_str)?),
        chat_id: parse_col(2, &chat_str, RoomId::parse)?,
        sender_id: parse_col(3, &sender_str, UserId::parse)?,
        sender_name: row.get(4)?,
        sender_avatar: row.get(5)?,
        text: row.get(6)?,
        message_type: row.get(7)?,
        timestamp: from_millis(8, ts_ms)?,
        seq,
        is_read: row.get(9)?,
        sent: row.get(10)?,
        delivered: row.get(11)?,
    })
}
