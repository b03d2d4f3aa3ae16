/// Application name
pub const APP_NAME: &str = "platesync";

/// Default backend REST base URL (local development)
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api";

/// WebSocket path appended to the backend origin when no explicit URL is set
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Default HTTP request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Capacity of the bounded inbound realtime event queue
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Capacity of the state-change broadcast channel
pub const STATE_CHANGE_CAPACITY: usize = 256;

/// Upper bound on the realtime reconnect delay in seconds
pub const DEFAULT_RECONNECT_MAX_SECS: u64 = 30;

/// Seconds added to the reconnect delay per failed attempt
pub const RECONNECT_STEP_SECS: u64 = 2;

/// Maximum chat message length in characters
pub const MAX_MESSAGE_LEN: usize = 2_000;

/// Maximum post description length in characters
pub const MAX_DESCRIPTION_LEN: usize = 2_200;

/// Maximum car bio length in characters
pub const MAX_BIO_LEN: usize = 300;

/// Minimum password length accepted locally
pub const MIN_PASSWORD_LEN: usize = 6;

/// Longest sanitized prefix kept in an avatar cache file name
pub const AVATAR_NAME_PREFIX_LEN: usize = 80;

/// Realtime push event names
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_THREAD_UPDATED: &str = "thread_updated";
pub const EVENT_POST_LIKED: &str = "post_liked";
pub const EVENT_POST_COMMENTED: &str = "post_commented";
pub const EVENT_COMMENT_DELETED: &str = "comment_deleted";
pub const EVENT_CHAT_READ: &str = "chat_read";
pub const EVENT_NEW_NOTIFICATION: &str = "new_notification";
