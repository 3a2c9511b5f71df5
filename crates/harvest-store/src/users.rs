//! User documents and the presence fields they carry.

use chrono::{DateTime, Utc};
use rusqlite::params;

use harvest_shared::UserId;

use crate::database::{from_millis, not_found, parse_col, to_millis, Database};
use crate::error::Result;
use crate::models::{PresenceRecord, UserProfileUpdate, UserRecord};

impl Database {
    /// Merge profile fields into the user row, creating it if absent.
    /// Optional fields that are `None` keep their stored value.
    pub fn upsert_user(&self, profile: &UserProfileUpdate) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (user_id, username, email, avatar)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                 username = excluded.username,
                 email    = COALESCE(excluded.email, users.email),
                 avatar   = COALESCE(excluded.avatar, users.avatar)",
            params![
                profile.user_id.as_str(),
                profile.username,
                profile.email,
                profile.avatar,
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &UserId) -> Result<UserRecord> {
        self.conn()
            .query_row(
                "SELECT user_id, username, email, avatar, is_online, last_seen
                 FROM users WHERE user_id = ?1",
                params![id.as_str()],
                |row| {
                    let id_str: String = row.get(0)?;
                    let last_seen: Option<i64> = row.get(5)?;
                    Ok(UserRecord {
                        user_id: parse_col(0, &id_str, UserId::parse)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        avatar: row.get(3)?,
                        is_online: row.get(4)?,
                        last_seen: last_seen.map(|ms| from_millis(5, ms)).transpose()?,
                    })
                },
            )
            .map_err(not_found)
    }

    /// Merge-write `{is_online, last_seen}` for the user.
    pub fn set_presence(&self, id: &UserId, is_online: bool, at: &DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (user_id, is_online, last_seen)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 is_online = excluded.is_online,
                 last_seen = excluded.last_seen",
            params![id.as_str(), is_online, to_millis(at)],
        )?;
        Ok(())
    }

    pub fn get_presence(&self, id: &UserId) -> Result<PresenceRecord> {
        self.conn()
            .query_row(
                "SELECT is_online, last_seen FROM users WHERE user_id = ?1",
                params![id.as_str()],
                |row| {
                    let last_seen: Option<i64> = row.get(1)?;
                    Ok(PresenceRecord {
                        user_id: id.clone(),
                        is_online: row.get(0)?,
                        last_seen: last_seen.map(|ms| from_millis(1, ms)).transpose()?,
                    })
                },
            )
            .map_err(not_found)
    }
}
