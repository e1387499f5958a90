//! File system paths for the client.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Manages file system paths for the client.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for client files (~/.crema)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.crema`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".crema"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.crema).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.crema/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the logs directory (~/.crema/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the structured client log file (~/.crema/logs/client.jsonl).
    pub fn client_log_file(&self) -> PathBuf {
        self.logs_dir().join("client.jsonl")
    }

    /// Root directory for persisted session keys (~/.crema/session).
    pub fn session_dir(&self) -> PathBuf {
        self.base_dir.join("session")
    }

    /// File holding an in-progress registration or password-reset flow.
    pub fn pending_flow_file(&self) -> PathBuf {
        self.base_dir.join("pending_flow.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.session_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_are_rooted_in_base_dir() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/crema-test"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/crema-test/config.json"));
        assert_eq!(
            paths.client_log_file(),
            PathBuf::from("/tmp/crema-test/logs/client.jsonl")
        );
        assert_eq!(paths.session_dir(), PathBuf::from("/tmp/crema-test/session"));
    }

    #[test]
    fn test_ensure_dirs_creates_tree() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("crema"));

        paths.ensure_dirs().unwrap();

        assert!(paths.logs_dir().is_dir());
        assert!(paths.session_dir().is_dir());
    }
}
