//! Backend response envelope and its classification.

use crate::http::HttpResponse;
use crema_exceptions::{ApiResult, AppException, ExceptionKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every backend body is wrapped in one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope<T> {
    pub is_success: bool,
    #[serde(default)]
    pub result: Option<SuccessResult<T>>,
    #[serde(default)]
    pub error_result: Option<ErrorResult>,
}

impl<T> ResponseEnvelope<T> {
    pub fn success(status: u16, data: T) -> Self {
        Self {
            is_success: true,
            result: Some(SuccessResult {
                status,
                data,
                pagination: None,
            }),
            error_result: None,
        }
    }

    pub fn failure(error: ErrorResult) -> Self {
        Self {
            is_success: false,
            result: None,
            error_result: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResult<T> {
    #[serde(default)]
    pub status: u16,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResult {
    #[serde(default)]
    pub status: u16,
    pub data: ErrorData,
}

impl ErrorResult {
    pub fn new(status: u16, code: &str, message: &str) -> Self {
        Self {
            status,
            data: ErrorData {
                trace_id: None,
                code: Some(code.to_string()),
                message: Some(message.to_string()),
                detail: None,
                multi_error_code_data: None,
            },
        }
    }

    /// Read the `errorResult` of a raw body, if it has a well-formed one.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        let probe: EnvelopeProbe = serde_json::from_slice(body).ok()?;
        probe
            .error_result
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_error_code_data: Option<Value>,
}

/// Shape-tolerant first pass over a body, so malformed halves can fall
/// back instead of failing the whole parse.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeProbe {
    is_success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error_result: Option<Value>,
}

/// Turn a final response into `result.data` or a classified exception.
pub fn decode<T: DeserializeOwned>(response: &HttpResponse) -> ApiResult<T> {
    let probe: EnvelopeProbe = match serde_json::from_slice(&response.body) {
        Ok(probe) => probe,
        Err(e) if response.is_success() => {
            return Err(AppException::invalid_state("Unexpected response from the server")
                .with_detail(e.to_string()));
        }
        Err(_) => return Err(fallback(response)),
    };

    if probe.is_success {
        let result = probe.result.ok_or_else(|| {
            AppException::invalid_state("Unexpected response from the server")
                .with_detail("success envelope without result")
        })?;
        let result: SuccessResult<T> = serde_json::from_value(result).map_err(|e| {
            AppException::invalid_state("Unexpected response from the server")
                .with_detail(e.to_string())
        })?;
        return Ok(result.data);
    }

    match probe
        .error_result
        .and_then(|value| serde_json::from_value::<ErrorResult>(value).ok())
    {
        Some(error) => Err(from_error_result(response.status, error)),
        None => Err(fallback(response)),
    }
}

fn from_error_result(http_status: u16, error: ErrorResult) -> AppException {
    let status = if error.status == 0 {
        http_status
    } else {
        error.status
    };
    let ErrorData {
        trace_id,
        code,
        message,
        detail,
        ..
    } = error.data;

    let message = message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status));
    let exception = AppException::new(
        ExceptionKind::ApiFailure {
            status,
            code,
            trace_id,
        },
        message,
    );
    match detail {
        Some(detail) => exception.with_detail(detail),
        None => exception,
    }
}

fn fallback(response: &HttpResponse) -> AppException {
    let message = match &response.reason {
        Some(reason) => format!("HTTP {} {}", response.status, reason),
        None => format!("HTTP {}", response.status),
    };
    AppException::api_failure(response.status, message)
}
