/// Separator placed between the two sorted participant ids of a room id
pub const ROOM_ID_SEPARATOR: char = '_';

/// Length of a user id (hex characters of a 12-byte object id)
pub const USER_ID_HEX_LEN: usize = 24;

/// Maximum message length in characters, measured after trimming
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Only text messages are transported
pub const MESSAGE_TYPE_TEXT: &str = "text";

/// Default size of the live message window
pub const DEFAULT_MESSAGE_WINDOW: usize = 50;

/// Default size of one backward history page
pub const DEFAULT_HISTORY_PAGE: usize = 20;

/// A user counts as online if they were seen within this many seconds
pub const ONLINE_WINDOW_SECS: i64 = 5 * 60;

/// Subscription registry key prefixes
pub const MESSAGES_KEY_PREFIX: &str = "messages_";
pub const PRESENCE_KEY_PREFIX: &str = "presence_";
pub const ROOMS_KEY_PREFIX: &str = "rooms_";
