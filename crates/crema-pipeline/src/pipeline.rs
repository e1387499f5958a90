//! The interceptor pipeline: build, rewrite, send, inspect, decode.

use crate::envelope;
use crate::http::{Headers, HttpRequest, ACCEPT, CONTENT_TYPE, X_LANGUAGE};
use crate::stage::{CallContext, RequestStage, ResponseStage};
use crate::transport::Transport;
use crema_exceptions::{ApiResult, AppException, ExceptionDispatcher};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

const JSON: &str = "application/json";

/// Everything a pipeline is built from.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Absolute base address; paths are joined onto it.
    pub base_url: Url,
    pub default_headers: Headers,
    pub request_stages: Vec<Arc<dyn RequestStage>>,
    pub response_stages: Vec<Arc<dyn ResponseStage>>,
}

impl PipelineConfig {
    /// JSON content headers plus `X-Language`, and no stages.
    pub fn with_defaults(base_url: Url, language: &str) -> Self {
        let default_headers = Headers::new()
            .with(CONTENT_TYPE, JSON)
            .with(ACCEPT, JSON)
            .with(X_LANGUAGE, language);
        Self {
            base_url,
            default_headers,
            request_stages: Vec::new(),
            response_stages: Vec::new(),
        }
    }

    pub fn request_stage(mut self, stage: Arc<dyn RequestStage>) -> Self {
        self.request_stages.push(stage);
        self
    }

    pub fn response_stage(mut self, stage: Arc<dyn ResponseStage>) -> Self {
        self.response_stages.push(stage);
        self
    }
}

/// Executes API calls through the configured stages.
pub struct Pipeline {
    config: PipelineConfig,
    transport: Arc<dyn Transport>,
    dispatcher: Option<Arc<ExceptionDispatcher>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            dispatcher: None,
        }
    }

    /// Report every failed call to `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: Arc<ExceptionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one call and decode `result.data` as `T`.
    ///
    /// The call is re-executed at most once, when a response stage asks
    /// for it. Failures are also reported to the dispatcher.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: Option<&Headers>,
    ) -> ApiResult<T> {
        let result = self.run(method, path, body, headers).await;
        if let (Err(err), Some(dispatcher)) = (&result, &self.dispatcher) {
            dispatcher.report(err);
        }
        result
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.execute(Method::GET, path, None, None).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> ApiResult<T> {
        self.execute(Method::POST, path, Some(body), None).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: Value) -> ApiResult<T> {
        self.execute(Method::PUT, path, Some(body), None).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.execute(Method::DELETE, path, None, None).await
    }

    async fn run<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: Option<&Headers>,
    ) -> ApiResult<T> {
        let body = body
            .map(|value| serde_json::to_vec(&value))
            .transpose()
            .map_err(|e| {
                AppException::invalid_input("Request body could not be encoded")
                    .with_detail(e.to_string())
            })?;

        let mut context = CallContext::new();
        loop {
            let mut request = self.build_request(method.clone(), path, body.clone(), headers)?;
            for stage in &self.config.request_stages {
                request = stage.apply(request);
            }
            context.begin_attempt(&request);

            let mut response = self.transport.send(request).await?;
            for stage in &self.config.response_stages {
                response = stage.inspect(response, &mut context).await?;
            }

            if context.take_retry() {
                debug!(path = %path, attempt = context.attempt(), "re-executing call");
                continue;
            }

            return envelope::decode(&response).map_err(|err| {
                warn!(
                    path = %path,
                    status = response.status,
                    kind = err.kind().name(),
                    "api call failed"
                );
                err
            });
        }
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        headers: Option<&Headers>,
    ) -> ApiResult<HttpRequest> {
        // Paths are always relative to the base, even with a leading `/`.
        let relative = path.trim_start_matches('/');
        let url = self.config.base_url.join(relative).map_err(|e| {
            AppException::invalid_input(format!("Invalid request path: {}", path))
                .with_detail(e.to_string())
        })?;
        if !url.as_str().starts_with(self.config.base_url.as_str()) {
            return Err(AppException::invalid_input(format!(
                "Request path leaves the API base: {}",
                path
            )));
        }

        let mut request = HttpRequest::new(method, url);
        request.headers = self.config.default_headers.clone();
        if let Some(headers) = headers {
            request.headers.merge(headers);
        }
        request.body = body;
        Ok(request)
    }
}
