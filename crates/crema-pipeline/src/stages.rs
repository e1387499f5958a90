//! Built-in request and response stages.

use crate::http::{bearer, HttpRequest, HttpResponse, AUTHORIZATION};
use crate::stage::{AccessTokenSource, CallContext, RequestStage, ResponseStage};
use async_trait::async_trait;
use crema_exceptions::ApiResult;
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;

/// Adds `Authorization: Bearer <token>` while a session exists.
///
/// An explicit Authorization header on the request is left alone.
pub struct AuthorizationStage {
    tokens: Arc<dyn AccessTokenSource>,
}

impl AuthorizationStage {
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self { tokens }
    }
}

impl RequestStage for AuthorizationStage {
    fn apply(&self, mut request: HttpRequest) -> HttpRequest {
        if request.headers.contains(AUTHORIZATION) {
            return request;
        }
        if let Some(token) = self.tokens.current_access_token() {
            request.headers.insert(AUTHORIZATION, bearer(&token));
        }
        request
    }
}

/// Strips a trailing `/` from GET paths and drops an empty `?`.
pub struct TrailingSlashStage;

impl RequestStage for TrailingSlashStage {
    fn apply(&self, mut request: HttpRequest) -> HttpRequest {
        if request.method != Method::GET {
            return request;
        }

        if request.url.query() == Some("") {
            request.url.set_query(None);
        }

        let path = request.url.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/');
            let trimmed = if trimmed.is_empty() { "/" } else { trimmed }.to_string();
            request.url.set_path(&trimmed);
        }
        request
    }
}

/// Logs each outgoing request.
pub struct RequestLogStage;

impl RequestStage for RequestLogStage {
    fn apply(&self, request: HttpRequest) -> HttpRequest {
        debug!(
            method = %request.method,
            url = %request.url,
            body_bytes = request.body.as_ref().map_or(0, Vec::len),
            authenticated = request.headers.contains(AUTHORIZATION),
            "api request"
        );
        request
    }
}

/// Logs each response before later stages see it.
pub struct ResponseLogStage;

#[async_trait]
impl ResponseStage for ResponseLogStage {
    async fn inspect(
        &self,
        response: HttpResponse,
        context: &mut CallContext,
    ) -> ApiResult<HttpResponse> {
        debug!(
            status = response.status,
            body_bytes = response.body.len(),
            attempt = context.attempt(),
            "api response"
        );
        Ok(response)
    }
}
