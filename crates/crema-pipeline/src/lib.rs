//! Interceptor pipeline for calls to the Crema backend.
//!
//! A [`Pipeline`] joins a path onto the base address, runs the request
//! stages, sends through a [`Transport`], runs the response stages and
//! decodes the [`ResponseEnvelope`]. A response stage may ask for one
//! re-execution of the whole call; [`RefreshOnUnauthorizedStage`] uses
//! this to retry after refreshing credentials.

mod envelope;
mod http;
mod pipeline;
mod refresh;
#[cfg(any(test, feature = "test-support"))]
mod scripted;
mod stage;
mod stages;
mod transport;

pub use envelope::{
    decode, ErrorData, ErrorResult, Pagination, ResponseEnvelope, SuccessResult,
};
pub use http::{bearer, Headers, HttpRequest, HttpResponse, AUTHORIZATION};
pub use pipeline::{Pipeline, PipelineConfig};
pub use refresh::{RefreshDecision, RefreshOnUnauthorizedStage};
pub use reqwest::Method;
#[cfg(any(test, feature = "test-support"))]
pub use scripted::ScriptedTransport;
pub use stage::{AccessTokenSource, CallContext, RequestStage, ResponseStage, SessionHandle};
pub use stages::{AuthorizationStage, RequestLogStage, ResponseLogStage, TrailingSlashStage};
pub use transport::{classify_reqwest_error, ReqwestTransport, Transport};
