//! Registration and password-reset flows awaiting user input.

use serde::{Deserialize, Serialize};

/// Context of an open flow, kept between its steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum PendingFlow {
    /// Registered, waiting for the emailed passcode.
    Registration { email: String },
    /// Reset requested, waiting for the emailed passcode.
    PasswordReset { email: String },
    /// Passcode confirmed, waiting for the new password.
    NewPassword {
        email: String,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reset_token: Option<String>,
    },
}

impl PendingFlow {
    pub fn email(&self) -> &str {
        match self {
            PendingFlow::Registration { email }
            | PendingFlow::PasswordReset { email }
            | PendingFlow::NewPassword { email, .. } => email,
        }
    }
}
