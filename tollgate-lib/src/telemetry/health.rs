use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;
use hyper::StatusCode;
use serde_json::{json, Value};

use crate::error::{Result, TollgateError};
use crate::store::StoreAdapter;

type RespBody = BoxBody<Bytes, hyper::Error>;

fn json_response(status: StatusCode, body: &Value) -> Result<Response<RespBody>> {
    let body_bytes = serde_json::to_vec(body)
        .map_err(|e| TollgateError::Http(format!("Failed to serialize probe response: {e}")))?;

    let body = Full::new(Bytes::from(body_bytes))
        .map_err(|never| match never {})
        .boxed();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body)
        .map_err(|e| TollgateError::Http(format!("Failed to build probe response: {e}")))
}

/// Health check response - always returns 200 if process is running
pub fn health_check_response() -> Result<Response<RespBody>> {
    json_response(StatusCode::OK, &json!({"status": "healthy"}))
}

/// Readiness check - pings the counter store
///
/// An unreachable store does not stop traffic (requests fail open), but the
/// instance reports 503 so operators see that limits are not enforced.
pub async fn ready_check_response(adapter: &StoreAdapter) -> Result<Response<RespBody>> {
    if adapter.ping().await {
        json_response(StatusCode::OK, &json!({"status": "ready"}))
    } else {
        json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({
                "status": "not_ready",
                "reason": "counter_store_unavailable"
            }),
        )
    }
}

/// Liveness check - always returns 200 if process is running
pub fn live_check_response() -> Result<Response<RespBody>> {
    json_response(StatusCode::OK, &json!({"status": "alive"}))
}
