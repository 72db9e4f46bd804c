/// Primary-key field of every document.
pub const DOC_ID: &str = "_id";

/// Default collection holding one counter record per namespace.
pub const DEFAULT_COUNTER_COLLECTION: &str = "ids";

/// Field of a counter record holding the last issued value.
pub const COUNTER_VALUE_FIELD: &str = "value";

/// First value handed out for a namespace unless configured otherwise.
pub const DEFAULT_INITIAL_SEQUENCE: u64 = 1;

/// Longest namespace accepted by the allocator, in bytes.
pub const MAX_NAMESPACE_LEN: usize = 128;

/// Database name used when the connection string names none.
pub const DEFAULT_DATABASE: &str = "biz";

/// Default collection for user accounts.
pub const DEFAULT_USER_COLLECTION: &str = "users";

/// Collection holding talk headers.
pub const TALK_INFO_COLLECTION: &str = "talk_info";

/// Prefix of the per-talk message collections.
pub const TALK_MESSAGE_COLLECTION_PREFIX: &str = "talk:";

/// Scheme assumed for connection strings that carry none.
pub const DEFAULT_SCHEME: &str = "mem";
