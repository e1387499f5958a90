//! CLI command implementations.

mod auth;
mod flow;

pub use auth::{change_password, login, logout, profile, refresh, status};
pub use flow::{forgot_password, register, reset_password, verify, verify_login};

use crate::output;
use crate::presenter::{CliNavigator, StderrPresenter};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crema_config_and_utils::{Config, Paths};
use crema_exceptions::ExceptionDispatcher;
use crema_pipeline::ReqwestTransport;
use crema_session::{
    ClientSettings, PendingFlow, SessionManager, SessionManagerConfig, SessionState,
};
use crema_storage::{open_file_storage, SessionStore};
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a command needs to talk to the backend.
pub struct Client {
    pub manager: SessionManager,
    pub dispatcher: Arc<ExceptionDispatcher>,
    paths: Paths,
}

impl Client {
    /// Build the session manager from config and adopt any stored state.
    pub fn connect(paths: Paths, config: &Config) -> Result<Self> {
        paths.ensure_dirs()?;

        let settings = ClientSettings::from_config(config)?;
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        let storage = open_file_storage(&paths.session_dir(), &config.storage_namespace)
            .context("Failed to open session storage")?;
        let dispatcher = Arc::new(ExceptionDispatcher::new(Arc::new(StderrPresenter)));

        let manager = SessionManager::new(SessionManagerConfig {
            settings,
            transport,
            store: SessionStore::new(storage),
            dispatcher: Some(dispatcher.clone()),
            navigator: Some(Arc::new(CliNavigator)),
        });

        let client = Self {
            manager,
            dispatcher,
            paths,
        };
        client.resume();
        Ok(client)
    }

    fn resume(&self) {
        if self.manager.restore() {
            debug!("Stored session adopted");
            return;
        }

        if let Some(flow) = load_pending_flow(&self.paths.pending_flow_file()) {
            if self.manager.resume_flow(flow).is_err() {
                self.clear_pending_flow();
            }
        }
    }

    /// Mirror the manager's open flow to disk for the next command.
    pub fn save_pending_flow(&self) -> Result<()> {
        match self.manager.pending_flow() {
            Some(flow) => {
                let json = serde_json::to_string_pretty(&flow)?;
                std::fs::write(self.paths.pending_flow_file(), json)
                    .context("Failed to save pending flow")?;
            }
            None => self.clear_pending_flow(),
        }
        Ok(())
    }

    fn clear_pending_flow(&self) {
        let path = self.paths.pending_flow_file();
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove pending flow file");
            }
        }
    }
}

fn load_pending_flow(path: &Path) -> Option<PendingFlow> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(flow) => Some(flow),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable pending flow file");
            None
        }
    }
}

/// Prompt for a line of input, or use the value given on the command line.
fn prompt_or(value: Option<String>, label: &str) -> Result<String> {
    if let Some(value) = value {
        return Ok(value);
    }

    print!("{}: ", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn prompt_password(label: &str) -> Result<String> {
    Ok(rpassword::prompt_password(format!("{}: ", label))?)
}

/// Ask for a new password twice.
fn prompt_new_password() -> Result<String> {
    let password = prompt_password("New password")?;
    let again = prompt_password("Repeat new password")?;
    if password != again {
        anyhow::bail!("Passwords do not match");
    }
    Ok(password)
}

/// What `status`, `login` and `refresh` print.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_flow: Option<PendingFlow>,
}

impl SessionView {
    pub fn of(manager: &SessionManager) -> Self {
        let record = manager.current_session();
        Self {
            state: manager.state(),
            logged_in: manager.is_authenticated(),
            user_id: record.as_ref().map(|r| r.user_id.clone()),
            email: record.as_ref().map(|r| r.email.clone()),
            display_name: record.as_ref().map(|r| r.display_name.clone()),
            access_expires_at: record.as_ref().map(|r| r.token.access_expiry),
            refresh_expires_at: record.as_ref().map(|r| r.token.refresh_expiry),
            pending_flow: manager.pending_flow(),
        }
    }
}

impl fmt::Display for SessionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.logged_in {
            write!(f, "{}", output::row("Auth", "not logged in"))?;
            if let Some(flow) = &self.pending_flow {
                write!(
                    f,
                    "\n{}",
                    output::row("Pending", &format!("{:?} for {}", self.state, flow.email()))
                )?;
            }
            return Ok(());
        }

        let unknown = "unknown".to_string();
        writeln!(f, "{}", output::row("Auth", "logged in"))?;
        writeln!(
            f,
            "{}",
            output::row("User ID", self.user_id.as_ref().unwrap_or(&unknown))
        )?;
        writeln!(
            f,
            "{}",
            output::row("Email", self.email.as_ref().unwrap_or(&unknown))
        )?;
        let expires = self
            .access_expires_at
            .map(|t| t.to_rfc3339())
            .unwrap_or(unknown);
        write!(f, "{}", output::row("Expires", &expires))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_pending_flow_ignores_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending_flow.json");
        assert!(load_pending_flow(&path).is_none());

        std::fs::write(&path, "{not json").unwrap();
        assert!(load_pending_flow(&path).is_none());

        std::fs::write(&path, r#"{"flow":"registration","email":"a@b.com"}"#).unwrap();
        assert_eq!(
            load_pending_flow(&path),
            Some(PendingFlow::Registration {
                email: "a@b.com".to_string()
            })
        );
    }

    #[test]
    fn test_signed_out_view() {
        let view = SessionView {
            state: SessionState::AwaitingPasswordResetConfirmation,
            logged_in: false,
            user_id: None,
            email: None,
            display_name: None,
            access_expires_at: None,
            refresh_expires_at: None,
            pending_flow: Some(PendingFlow::PasswordReset {
                email: "a@b.com".to_string(),
            }),
        };

        let text = view.to_string();
        assert!(text.starts_with("Auth:     not logged in"));
        assert!(text.contains("AwaitingPasswordResetConfirmation for a@b.com"));

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "awaiting_password_reset_confirmation");
        assert!(json.get("user_id").is_none());
    }
}
