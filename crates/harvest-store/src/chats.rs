//! CRUD operations for [`ChatRoom`] records.

use rusqlite::params;

use harvest_shared::{RoomId, UserId};

use crate::database::{from_millis, not_found, parse_col, to_millis, Database};
use crate::error::Result;
use crate::models::ChatRoom;

const CHAT_COLUMNS: &str = "id, participant_a, participant_b, created_at,
     last_message, last_message_time, last_sender_id";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert the room unless a row with the same id already exists.
    ///
    /// Returns `true` if this call created the row.  Two clients racing on
    /// the same pair both land on the same id, so the loser is a no-op.
    pub fn create_chat_if_absent(&self, chat: &ChatRoom) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT INTO chats (id, participant_a, participant_b, created_at,
                                last_message, last_message_time, last_sender_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO NOTHING",
            params![
                chat.id.as_str(),
                chat.participant_ids[0].as_str(),
                chat.participant_ids[1].as_str(),
                to_millis(&chat.created_at),
                chat.last_message,
                chat.last_message_time.as_ref().map(to_millis),
                chat.last_sender_id.as_ref().map(|id| id.as_str()),
            ],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single room by id.
    pub fn get_chat(&self, id: &RoomId) -> Result<ChatRoom> {
        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![id.as_str()],
                row_to_chat,
            )
            .map_err(not_found)
    }

    /// Every room the user participates in, in no particular order.
    pub fn list_chats_for_user(&self, user: &UserId) -> Result<Vec<ChatRoom>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats
             WHERE participant_a = ?1 OR participant_b = ?1"
        ))?;

        let rows = stmt.query_map(params![user.as_str()], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Overwrite the denormalised last-message preview.
    ///
    /// Ignored when the stored preview is newer, which keeps
    /// `last_message_time` non-decreasing.  Returns `true` if applied.
    pub fn update_chat_preview(
        &self,
        id: &RoomId,
        text: &str,
        sender: &UserId,
        at: &chrono::DateTime<chrono::Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chats
             SET last_message = ?2, last_message_time = ?3, last_sender_id = ?4
             WHERE id = ?1 AND (last_message_time IS NULL OR last_message_time <= ?3)",
            params![id.as_str(), text, to_millis(at), sender.as_str()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a room and, through the foreign key, all of its messages.
    /// Returns `true` if a row was deleted.
    pub fn delete_chat(&self, id: &RoomId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chats WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`ChatRoom`].
fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRoom> {
    let id_str: String = row.get(0)?;
    let a_str: String = row.get(1)?;
    let b_str: String = row.get(2)?;
    let created_ms: i64 = row.get(3)?;
    let last_message: Option<String> = row.get(4)?;
    let last_ms: Option<i64> = row.get(5)?;
    let last_sender_str: Option<String> = row.get(6)?;

    let id = parse_col(0, &id_str, RoomId::parse)?;
    let a = parse_col(1, &a_str, UserId::parse)?;
    let b = parse_col(2, &b_str, UserId::parse)?;
    let created_at = from_millis(3, created_ms)?;
    let last_message_time = last_ms.map(|ms| from_millis(5, ms)).transpose()?;
    let last_sender_id = last_sender_str
        .map(|s| parse_col(6, &s, UserId::parse))
        .transpose()?;

    Ok(ChatRoom {
        id,
        participant_ids: [a, b],
        created_at,
        last_message,
        last_message_time,
        last_sender_id,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use harvest_shared::resolve_room_id;

    use super::*;
    use crate::error::StoreError;

    fn users() -> (UserId, UserId, UserId) {
        (
            UserId::parse("aaaaaaaaaaaaaaaaaaaaaaaa").unwrap(),
            UserId::parse("bbbbbbbbbbbbbbbbbbbbbbbb").unwrap(),
            UserId::parse("cccccccccccccccccccccccc").unwrap(),
        )
    }

    #[test]
    fn create_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, _) = users();
        let room = ChatRoom::new(resolve_room_id(&a, &b), Utc::now()).unwrap();

        assert!(db.create_chat_if_absent(&room).unwrap());
        assert!(!db.create_chat_if_absent(&room).unwrap());
        assert_eq!(db.list_chats_for_user(&a).unwrap().len(), 1);
    }

    #[test]
    fn list_filters_by_participant() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = users();
        for other in [&b, &c] {
            let room = ChatRoom::new(resolve_room_id(&a, other), Utc::now()).unwrap();
            db.create_chat_if_absent(&room).unwrap();
        }

        assert_eq!(db.list_chats_for_user(&a).unwrap().len(), 2);
        assert_eq!(db.list_chats_for_user(&b).unwrap().len(), 1);
        assert_eq!(db.list_chats_for_user(&c).unwrap().len(), 1);
    }

    #[test]
    fn preview_never_moves_backwards() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, _) = users();
        let id = resolve_room_id(&a, &b);
        db.create_chat_if_absent(&ChatRoom::new(id.clone(), Utc::now()).unwrap())
            .unwrap();

        let now = Utc::now();
        assert!(db.update_chat_preview(&id, "newer", &a, &now).unwrap());
        assert!(!db
            .update_chat_preview(&id, "older", &b, &(now - Duration::seconds(5)))
            .unwrap());

        let chat = db.get_chat(&id).unwrap();
        assert_eq!(chat.last_message.as_deref(), Some("newer"));
        assert_eq!(chat.last_sender_id, Some(a));
    }

    #[test]
    fn get_missing_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, _) = users();
        assert!(matches!(
            db.get_chat(&resolve_room_id(&a, &b)),
            Err(StoreError::NotFound)
        ));
    }
}
