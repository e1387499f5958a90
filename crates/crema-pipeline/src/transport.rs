//! HTTP transport primitive.

use crate::http::{Headers, HttpRequest, HttpResponse};
use async_trait::async_trait;
use crema_exceptions::{ApiResult, AppException};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Sends one request and returns the raw response.
///
/// Implementations fail only when no response was obtained.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse>;
}

/// [`Transport`] over a `reqwest::Client`.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(classify_reqwest_error)?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;

        let status = response.status();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();

        debug!(status = status.as_u16(), bytes = body.len(), "transport response");

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            headers,
            body,
        })
    }
}

/// Map a reqwest failure onto the exception taxonomy.
pub fn classify_reqwest_error(err: reqwest::Error) -> AppException {
    let detail = err.to_string();
    if err.is_timeout() {
        AppException::timeout("The server took too long to respond").with_detail(detail)
    } else if err.is_builder() {
        AppException::invalid_input("The request could not be built").with_detail(detail)
    } else {
        AppException::network("Could not reach the server").with_detail(detail)
    }
}
