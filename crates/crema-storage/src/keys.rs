//! Storage key constants.

/// Keys written by the session store.
pub struct StorageKeys;

impl StorageKeys {
    /// Serialized session record (JSON)
    pub const SESSION_RECORD: &'static str = "session_record";

    /// Bare access token, readable without parsing the record
    pub const ACCESS_TOKEN: &'static str = "access_token";
}
