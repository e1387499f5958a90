//! Shared in-memory slot for the current session record.

use crema_pipeline::AccessTokenSource;
use crema_storage::{SessionRecord, TokenBundle};
use parking_lot::RwLock;

/// The one in-memory copy of the session.
///
/// The lock is never held across an await.
#[derive(Default)]
pub struct SessionCell {
    record: RwLock<Option<SessionRecord>>,
}

impl SessionCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<SessionRecord> {
        self.record.read().clone()
    }

    pub fn set(&self, record: SessionRecord) {
        *self.record.write() = Some(record);
    }

    pub fn take(&self) -> Option<SessionRecord> {
        self.record.write().take()
    }

    pub fn is_present(&self) -> bool {
        self.record.read().is_some()
    }

    /// Replace the token bundle if `user_id` still owns the session.
    ///
    /// Returns the updated record, or `None` when the session changed.
    pub fn replace_token(&self, user_id: &str, token: TokenBundle) -> Option<SessionRecord> {
        let mut guard = self.record.write();
        match guard.as_mut() {
            Some(record) if record.user_id == user_id => {
                record.token = token;
                Some(record.clone())
            }
            _ => None,
        }
    }

    /// Apply `update` to the record in place, if present.
    pub fn update<F>(&self, update: F) -> Option<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut guard = self.record.write();
        let record = guard.as_mut()?;
        update(record);
        Some(record.clone())
    }
}

impl AccessTokenSource for SessionCell {
    fn current_access_token(&self) -> Option<String> {
        self.record
            .read()
            .as_ref()
            .map(|record| record.token.access_token.clone())
    }
}
