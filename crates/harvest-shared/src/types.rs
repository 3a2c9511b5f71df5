use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{ROOM_ID_SEPARATOR, USER_ID_HEX_LEN};
use crate::error::ValidationError;

// User identity = 24-char hex object id issued by the marketplace backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Parse and normalise (lowercase) a user id.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let s = s.trim();
        if s.len() != USER_ID_HEX_LEN || hex::decode(s).is_err() {
            return Err(ValidationError::InvalidUserId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> String {
        self.0[..8].to_string()
    }
}

impl TryFrom<String> for UserId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::str::FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic room id for a pair of participants.
///
/// The two ids are sorted and joined, so `resolve_room_id(a, b)` and
/// `resolve_room_id(b, a)` always agree. Self-chat is not guarded.
pub fn resolve_room_id(a: &UserId, b: &UserId) -> RoomId {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    RoomId(format!("{}{}{}", first, ROOM_ID_SEPARATOR, second))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let id = Self(s.to_string());
        match id.participants() {
            Some((a, b)) if resolve_room_id(&a, &b) == id => Ok(id),
            _ => Err(ValidationError::InvalidRoomId(s.to_string())),
        }
    }

    /// Split the id back into its two participants, in sorted order.
    pub fn participants(&self) -> Option<(UserId, UserId)> {
        let (a, b) = self.0.split_once(ROOM_ID_SEPARATOR)?;
        Some((UserId::parse(a).ok()?, UserId::parse(b).ok()?))
    }

    pub fn involves(&self, user: &UserId) -> bool {
        self.participants()
            .map(|(a, b)| &a == user || &b == user)
            .unwrap_or(false)
    }

    /// The participant that is not `me`, if `me` belongs to the room.
    pub fn counterpart(&self, me: &UserId) -> Option<UserId> {
        let (a, b) = self.participants()?;
        if &a == me {
            Some(b)
        } else if &b == me {
            Some(a)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "64b7f0c2a1e4d5f6a7b8c9d0";
    const BOB: &str = "64b7f0c2a1e4d5f6a7b8c9d1";

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn room_id_is_order_independent() {
        let a = uid(ALICE);
        let b = uid(BOB);
        assert_eq!(resolve_room_id(&a, &b), resolve_room_id(&b, &a));
        assert_eq!(resolve_room_id(&a, &b).as_str(), format!("{ALICE}_{BOB}"));
    }

    #[test]
    fn self_chat_still_resolves() {
        let a = uid(ALICE);
        assert_eq!(resolve_room_id(&a, &a).as_str(), format!("{ALICE}_{ALICE}"));
    }

    #[test]
    fn user_id_validation() {
        assert!(UserId::parse("abc").is_err());
        assert!(UserId::parse("zzzzzzzzzzzzzzzzzzzzzzzz").is_err());
        assert_eq!(
            UserId::parse("64B7F0C2A1E4D5F6A7B8C9D0").unwrap().as_str(),
            ALICE
        );
    }

    #[test]
    fn room_participants_and_counterpart() {
        let a = uid(ALICE);
        let b = uid(BOB);
        let room = resolve_room_id(&b, &a);

        assert_eq!(room.participants(), Some((a.clone(), b.clone())));
        assert!(room.involves(&a));
        assert_eq!(room.counterpart(&a), Some(b.clone()));

        let stranger = uid("000000000000000000000000");
        assert!(!room.involves(&stranger));
        assert_eq!(room.counterpart(&stranger), None);
    }

    #[test]
    fn room_id_parse_rejects_unsorted_pairs() {
        assert!(RoomId::parse(&format!("{ALICE}_{BOB}")).is_ok());
        assert!(RoomId::parse(&format!("{BOB}_{ALICE}")).is_err());
        assert!(RoomId::parse("general").is_err());
    }

    #[test]
    fn user_id_serde_validates() {
        let ok: UserId = serde_json::from_str(&format!("\"{ALICE}\"")).unwrap();
        assert_eq!(ok, uid(ALICE));
        assert!(serde_json::from_str::<UserId>("\"nope\"").is_err());
    }
}
