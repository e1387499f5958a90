//! Session record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Credentials issued by the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expiry: DateTime<Utc>,
    pub refresh_expiry: DateTime<Utc>,
    pub client_id: String,
}

impl TokenBundle {
    /// True while the refresh token has not expired.
    pub fn is_refreshable(&self) -> bool {
        self.is_refreshable_at(Utc::now())
    }

    pub fn is_refreshable_at(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_expiry
    }

    pub fn is_access_expired(&self) -> bool {
        Utc::now() >= self.access_expiry
    }
}

// Tokens never reach logs through Debug.
impl fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("access_expiry", &self.access_expiry)
            .field("refresh_expiry", &self.refresh_expiry)
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// The authenticated user's identity plus credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub is_premium: bool,
    pub token: TokenBundle,
}

impl SessionRecord {
    pub fn access_token(&self) -> &str {
        &self.token.access_token
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}
