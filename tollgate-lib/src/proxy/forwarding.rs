use crate::proxy::client_pool::ClientPool;
use crate::proxy::http_result::{HttpError, HttpResult};
use crate::telemetry::Metrics;
use http::{Request, Response, Version};
use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::Incoming;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type RespBody = BoxBody<bytes::Bytes, hyper::Error>;

pub struct ForwardConfig<'a> {
    pub upstream: &'a str,
    pub pool: &'a ClientPool,
    pub timeout: Duration,
    pub metrics: Option<&'a Arc<Metrics>>,
}

/// Rewrite the request URI to point at the upstream, keeping path and query
pub fn upstream_uri(upstream: &str, req: &Request<Incoming>) -> HttpResult<http::Uri> {
    let pq = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("http://{upstream}{pq}")
        .parse::<http::Uri>()
        .map_err(|e| HttpError::InvalidUri(e.to_string()))
}

pub async fn forward(mut req: Request<Incoming>, config: ForwardConfig<'_>) -> HttpResult<Response<RespBody>> {
    let start = Instant::now();

    *req.uri_mut() = upstream_uri(config.upstream, &req)?;
    *req.version_mut() = Version::HTTP_11;

    let result = tokio::time::timeout(config.timeout, config.pool.client().request(req)).await;
    let duration = start.elapsed().as_secs_f64();

    let error = match result {
        Ok(Ok(resp)) => {
            if let Some(m) = config.metrics {
                m.record_backend_request(config.upstream, resp.status().as_u16(), duration);
            }
            return Ok(resp.map(|b| b.boxed()));
        }
        Ok(Err(e)) => HttpError::FailedToGetResponseFromUpstream(e.to_string()),
        Err(_) => HttpError::UpstreamTimeout(u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX)),
    };

    if let Some(m) = config.metrics {
        m.record_backend_error(config.upstream, error.error_type());
    }
    Err(error)
}
