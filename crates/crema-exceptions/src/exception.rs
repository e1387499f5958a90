//! Exception taxonomy.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// The closed set of failure kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExceptionKind {
    /// Failure raised by presentation code.
    Ui,
    /// The backend answered with a failure envelope or a non-2xx status.
    ApiFailure {
        status: u16,
        /// Business error code from `errorResult.data.code`.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Backend trace id, useful when reporting issues.
        #[serde(skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
    },
    /// The request never produced a response.
    Network,
    /// The transport gave up waiting.
    Timeout,
    /// An operation was invoked in a state that does not allow it.
    InvalidState,
    /// Credentials are missing, rejected, or expired beyond refresh.
    UnauthorizedAccess,
    /// The user is authenticated but not allowed to do this.
    PermissionDenied,
    /// The device lacks a capability the operation needs.
    DeviceCapability,
    /// Local persistence failed.
    Storage,
    /// Input was rejected before reaching the backend.
    InvalidInput,
    /// Expected data was absent.
    MissingData,
}

impl ExceptionKind {
    /// Stable kebab-case name, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ExceptionKind::Ui => "ui",
            ExceptionKind::ApiFailure { .. } => "api-failure",
            ExceptionKind::Network => "network",
            ExceptionKind::Timeout => "timeout",
            ExceptionKind::InvalidState => "invalid-state",
            ExceptionKind::UnauthorizedAccess => "unauthorized-access",
            ExceptionKind::PermissionDenied => "permission-denied",
            ExceptionKind::DeviceCapability => "device-capability",
            ExceptionKind::Storage => "storage",
            ExceptionKind::InvalidInput => "invalid-input",
            ExceptionKind::MissingData => "missing-data",
        }
    }

    /// Short user-facing title of the presentation handler for this kind.
    pub fn title(&self) -> &'static str {
        match self {
            ExceptionKind::Ui => "Something went wrong",
            ExceptionKind::ApiFailure { .. } => "Request failed",
            ExceptionKind::Network => "No connection",
            ExceptionKind::Timeout => "Request timed out",
            ExceptionKind::InvalidState => "Unexpected state",
            ExceptionKind::UnauthorizedAccess => "Sign-in required",
            ExceptionKind::PermissionDenied => "Permission denied",
            ExceptionKind::DeviceCapability => "Not supported on this device",
            ExceptionKind::Storage => "Storage error",
            ExceptionKind::InvalidInput => "Invalid input",
            ExceptionKind::MissingData => "Missing data",
        }
    }

    /// Returns true if retrying the same operation later may succeed.
    ///
    /// Transient kinds are network failures, timeouts and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            ExceptionKind::Network | ExceptionKind::Timeout => true,
            ExceptionKind::ApiFailure { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }
}

/// A classified failure. Immutable once constructed.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct AppException {
    id: Uuid,
    kind: ExceptionKind,
    message: String,
    detail: Option<String>,
}

impl AppException {
    /// Create an exception of the given kind.
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            detail: None,
        }
    }

    /// Attach a detail line. Meant for use at construction time.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn ui(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Ui, message)
    }

    /// API failure carrying only an HTTP status.
    pub fn api_failure(status: u16, message: impl Into<String>) -> Self {
        Self::new(
            ExceptionKind::ApiFailure {
                status,
                code: None,
                trace_id: None,
            },
            message,
        )
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Timeout, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::InvalidState, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::UnauthorizedAccess, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::PermissionDenied, message)
    }

    pub fn device_capability(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::DeviceCapability, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Storage, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::InvalidInput, message)
    }

    pub fn missing_data(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::MissingData, message)
    }

    /// Unique identity of this exception instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &ExceptionKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// HTTP status, only for the api-failure kind.
    pub fn status_code(&self) -> Option<u16> {
        match &self.kind {
            ExceptionKind::ApiFailure { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Backend business error code, only for the api-failure kind.
    pub fn error_code(&self) -> Option<&str> {
        match &self.kind {
            ExceptionKind::ApiFailure { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// The (title, message) pair handed to presentation.
    pub fn presentation(&self) -> (&'static str, &str) {
        (self.kind.title(), &self.message)
    }
}

/// Result type alias using AppException.
pub type ApiResult<T> = Result<T, AppException>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_network_and_timeout() {
        assert!(AppException::network("offline").is_transient());
        assert!(AppException::timeout("slow").is_transient());
    }

    #[test]
    fn test_is_transient_server_errors_only() {
        assert!(AppException::api_failure(503, "unavailable").is_transient());
        assert!(!AppException::api_failure(400, "bad request").is_transient());
        assert!(!AppException::api_failure(401, "unauthorized").is_transient());
    }

    #[test]
    fn test_is_not_transient_local_failures() {
        assert!(!AppException::invalid_input("weak password").is_transient());
        assert!(!AppException::unauthorized("expired").is_transient());
        assert!(!AppException::storage("disk full").is_transient());
    }

    #[test]
    fn test_status_code_only_for_api_failure() {
        assert_eq!(AppException::api_failure(422, "nope").status_code(), Some(422));
        assert_eq!(AppException::network("offline").status_code(), None);
    }

    #[test]
    fn test_error_code_and_detail() {
        let exception = AppException::new(
            ExceptionKind::ApiFailure {
                status: 409,
                code: Some("Business.EmailTaken.Error".to_string()),
                trace_id: Some("trace-1".to_string()),
            },
            "Email already registered",
        )
        .with_detail("a@b.com");

        assert_eq!(exception.error_code(), Some("Business.EmailTaken.Error"));
        assert_eq!(exception.detail(), Some("a@b.com"));
        assert_eq!(exception.to_string(), "Email already registered");
    }

    #[test]
    fn test_each_exception_has_distinct_identity() {
        let a = AppException::timeout("slow");
        let b = AppException::timeout("slow");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_kind_names_are_kebab_case() {
        let kind = ExceptionKind::ApiFailure {
            status: 500,
            code: None,
            trace_id: None,
        };
        assert_eq!(kind.name(), "api-failure");
        assert_eq!(ExceptionKind::UnauthorizedAccess.name(), "unauthorized-access");

        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "api-failure");
        assert_eq!(json["status"], 500);
    }

    #[test]
    fn test_presentation_uses_kind_title() {
        let exception = AppException::network("Check your connection");
        assert_eq!(
            exception.presentation(),
            ("No connection", "Check your connection")
        );
    }
}
