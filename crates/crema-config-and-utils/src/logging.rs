//! Logging initialization for the client.
//!
//! Thin wrapper over the observability crate: every Crema process writes
//! structured JSONL to `~/.crema/logs/client.jsonl`.

use crate::Paths;

/// Initialize the logging system.
///
/// * `level` - Default log level, overridable through `RUST_LOG`
/// * `paths` - Client paths; the JSONL log lands in `paths.client_log_file()`
/// * `also_stderr` - Mirror log lines to stderr (foreground debugging)
pub fn init_logging(level: &str, paths: &Paths, also_stderr: bool) {
    observability::init_with_config(observability::LogConfig {
        service_name: "crema".into(),
        default_level: level.into(),
        log_path: Some(paths.client_log_file()),
        also_stderr,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
