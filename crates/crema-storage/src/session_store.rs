//! Self-healing persistence of the current session.

use crate::{SecureStorage, SessionRecord, StorageKeys, StorageResult};
use tracing::{debug, warn};

/// Stores the session record and its bare access token.
///
/// Callers serialize `save`/`clear` pairs; each call is atomic only with
/// respect to its own key.
pub struct SessionStore {
    storage: Box<dyn SecureStorage>,
}

impl SessionStore {
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Load the stored session.
    ///
    /// Never fails: unreadable, corrupt or inconsistent data is cleared and
    /// reported as absent.
    pub fn load(&self) -> Option<SessionRecord> {
        let raw = match self.storage.get(StorageKeys::SESSION_RECORD) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "session record unreadable, clearing");
                self.heal();
                return None;
            }
        };

        let Some(raw) = raw else {
            // A token without a record is an orphan from an interrupted save.
            if matches!(self.storage.has(StorageKeys::ACCESS_TOKEN), Ok(true)) {
                debug!("orphaned access token without session record, clearing");
                self.heal();
            }
            return None;
        };

        let record: SessionRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "corrupt session record, clearing");
                self.heal();
                return None;
            }
        };

        match self.storage.get(StorageKeys::ACCESS_TOKEN) {
            Ok(Some(token)) if token == record.token.access_token => Some(record),
            Ok(_) => {
                warn!(user_id = %record.user_id, "access token does not match session record, clearing");
                self.heal();
                None
            }
            Err(e) => {
                warn!(error = %e, "access token unreadable, clearing");
                self.heal();
                None
            }
        }
    }

    /// Persist `record` under both keys.
    pub fn save(&self, record: &SessionRecord) -> StorageResult<()> {
        let json = serde_json::to_string(record)?;
        self.storage.set(StorageKeys::SESSION_RECORD, &json)?;
        self.storage
            .set(StorageKeys::ACCESS_TOKEN, &record.token.access_token)?;
        debug!(user_id = %record.user_id, "session saved");
        Ok(())
    }

    /// Delete both keys.
    pub fn clear(&self) -> StorageResult<()> {
        self.storage.delete(StorageKeys::SESSION_RECORD)?;
        self.storage.delete(StorageKeys::ACCESS_TOKEN)?;
        debug!("session cleared");
        Ok(())
    }

    /// Read only the bare access token.
    pub fn load_access_token(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::ACCESS_TOKEN)
    }

    fn heal(&self) {
        if let Err(e) = self.clear() {
            warn!(error = %e, "failed to clear corrupt session");
        }
    }
}
