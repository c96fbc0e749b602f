use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::StatusCode;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;
use serde::Serialize;
use std::time::Duration;

use super::outcome::{RateMeta, Rejection};
use crate::error::{Result, TollgateError};
use crate::identity::IdentityError;
use crate::limiter::retry_after_secs;

type RespBody = BoxBody<Bytes, hyper::Error>;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

pub const MISSING_IDENTITY_CODE: &str = "MISSING_IDENTITY";

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<LimitDetails>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LimitDetails {
    pub limit: u64,
    pub remaining: u64,
    pub reset_in: String,
}

impl From<&Rejection> for ErrorBody {
    fn from(rejection: &Rejection) -> Self {
        Self {
            success: false,
            error: rejection.message.clone(),
            code: rejection.code.clone(),
            retry_after: Some(retry_after_secs(rejection.retry_after)),
            details: Some(LimitDetails {
                limit: rejection.limit,
                remaining: 0,
                reset_in: format_duration(rejection.retry_after),
            }),
        }
    }
}

impl From<&IdentityError> for ErrorBody {
    fn from(error: &IdentityError) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            code: MISSING_IDENTITY_CODE.to_string(),
            retry_after: None,
            details: None,
        }
    }
}

/// Human duration rounded up to whole seconds, e.g. `1s`, `1m`, `23h59m5s`
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    if total == 0 {
        return "0s".to_string();
    }
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if m > 0 {
        out.push_str(&format!("{m}m"));
    }
    if s > 0 {
        out.push_str(&format!("{s}s"));
    }
    out
}

fn json_error(status: StatusCode, body: &ErrorBody) -> Result<Response<RespBody>> {
    let bytes = serde_json::to_vec(body)
        .map_err(|e| TollgateError::Http(format!("Failed to serialize error body: {e}")))?;
    let body = Full::new(Bytes::from(bytes))
        .map_err(|never| match never {})
        .boxed();

    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .map_err(|e| TollgateError::Http(format!("Failed to build error response: {e}")))
}

/// 429 with `Retry-After` and the limit headers
pub fn rejection_response(rejection: &Rejection) -> Result<Response<RespBody>> {
    let mut resp = json_error(StatusCode::TOO_MANY_REQUESTS, &ErrorBody::from(rejection))?;
    let headers = resp.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(rejection.retry_after)));
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(rejection.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
    Ok(resp)
}

/// 400 for a request whose caller could not be identified
pub fn identity_error_response(error: &IdentityError) -> Result<Response<RespBody>> {
    json_error(StatusCode::BAD_REQUEST, &ErrorBody::from(error))
}

/// Adds the limit headers to an admitted response; nothing else is touched
pub fn apply_rate_headers(headers: &mut http::HeaderMap, meta: Option<RateMeta>) {
    if let Some(meta) = meta {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(meta.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(meta.remaining));
    }
}
