//! Pipeline stage traits and the per-call context.

use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use crema_exceptions::{ApiResult, AppException};

/// Synchronous request rewrite, applied before sending.
pub trait RequestStage: Send + Sync {
    fn apply(&self, request: HttpRequest) -> HttpRequest;
}

/// Response inspection, applied after the transport returns.
///
/// A stage may suspend and may ask for the call to be re-executed
/// through [`CallContext::request_retry`].
#[async_trait]
pub trait ResponseStage: Send + Sync {
    async fn inspect(
        &self,
        response: HttpResponse,
        context: &mut CallContext,
    ) -> ApiResult<HttpResponse>;
}

/// State scoped to one outer `execute` call.
#[derive(Debug)]
pub struct CallContext {
    attempt: u32,
    retry_requested: bool,
    retries_used: u32,
    sent_bearer_token: Option<String>,
}

impl CallContext {
    pub(crate) fn new() -> Self {
        Self {
            attempt: 1,
            retry_requested: false,
            retries_used: 0,
            sent_bearer_token: None,
        }
    }

    /// 1 for the first attempt, 2 for the single retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    /// Bearer token carried by the request that produced this response.
    pub fn sent_bearer_token(&self) -> Option<&str> {
        self.sent_bearer_token.as_deref()
    }

    /// Ask for the whole call to run once more.
    ///
    /// Only one retry is allowed per call; a second request fails.
    pub fn request_retry(&mut self) -> ApiResult<()> {
        if self.retries_used > 0 || self.retry_requested {
            return Err(AppException::invalid_state(
                "Request was already retried once",
            ));
        }
        self.retry_requested = true;
        Ok(())
    }

    pub(crate) fn begin_attempt(&mut self, request: &HttpRequest) {
        self.sent_bearer_token = request.bearer_token().map(str::to_string);
    }

    /// Consume a pending retry directive, moving to the next attempt.
    pub(crate) fn take_retry(&mut self) -> bool {
        if !self.retry_requested {
            return false;
        }
        self.retry_requested = false;
        self.retries_used += 1;
        self.attempt += 1;
        true
    }
}

/// Read access to the current access token.
pub trait AccessTokenSource: Send + Sync {
    fn current_access_token(&self) -> Option<String>;
}

/// The session operations the refresh stage needs.
#[async_trait]
pub trait SessionHandle: AccessTokenSource {
    /// Refresh credentials; concurrent callers share one round trip.
    async fn refresh(&self) -> ApiResult<()>;

    /// End the session locally and remotely.
    async fn logout(&self);
}
