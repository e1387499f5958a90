//! Transparent credential refresh on 401 responses.

use crate::envelope::ErrorResult;
use crate::http::HttpResponse;
use crate::stage::{CallContext, ResponseStage, SessionHandle};
use async_trait::async_trait;
use crema_exceptions::{ApiResult, AppException};
use std::sync::Arc;
use tracing::{info, warn};

const UNAUTHORIZED: u16 = 401;

/// What the stage does with one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Not a 401, or the retry already happened.
    PassThrough,
    /// The backend declared the session expired.
    Failing,
    /// Refresh and run the call again.
    Retrying,
}

/// On 401, refreshes the session and asks for one re-execution.
///
/// When the body carries the session-expired code, the session is ended
/// instead and the call fails with `unauthorized-access`.
pub struct RefreshOnUnauthorizedStage {
    session: Arc<dyn SessionHandle>,
    session_expired_code: String,
}

impl RefreshOnUnauthorizedStage {
    pub fn new(session: Arc<dyn SessionHandle>, session_expired_code: impl Into<String>) -> Self {
        Self {
            session,
            session_expired_code: session_expired_code.into(),
        }
    }

    pub fn decide(&self, response: &HttpResponse, context: &CallContext) -> RefreshDecision {
        if response.status != UNAUTHORIZED || context.is_retry() {
            return RefreshDecision::PassThrough;
        }

        let code = ErrorResult::from_body(&response.body).and_then(|e| e.data.code);
        if code.as_deref() == Some(self.session_expired_code.as_str()) {
            RefreshDecision::Failing
        } else {
            RefreshDecision::Retrying
        }
    }
}

#[async_trait]
impl ResponseStage for RefreshOnUnauthorizedStage {
    async fn inspect(
        &self,
        response: HttpResponse,
        context: &mut CallContext,
    ) -> ApiResult<HttpResponse> {
        match self.decide(&response, context) {
            RefreshDecision::PassThrough => Ok(response),
            RefreshDecision::Failing => {
                warn!("session expired on the server, signing out");
                self.session.logout().await;
                Err(AppException::unauthorized(
                    "Session expired, please sign in again",
                ))
            }
            RefreshDecision::Retrying => {
                let current = self.session.current_access_token();
                let already_refreshed = match (context.sent_bearer_token(), current.as_deref()) {
                    (Some(sent), Some(current)) => sent != current,
                    (None, Some(_)) => true,
                    _ => false,
                };

                if already_refreshed {
                    info!("credentials changed since the request was sent, retrying");
                } else {
                    info!("unauthorized response, refreshing credentials");
                    self.session.refresh().await?;
                }

                context.request_retry()?;
                Ok(response)
            }
        }
    }
}
