use http::StatusCode;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use std::net::SocketAddr;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::admission::{
    apply_rate_headers, identity_error_response, rejection_response, Admission, RequestInfo,
};
use crate::error::Result;
use crate::proxy::context::GateContext;
use crate::proxy::forwarding::{forward, ForwardConfig};
use crate::proxy::handler::headers::add_forwarded_for;

type RespBody = BoxBody<Bytes, hyper::Error>;

/// Build a bodyless response for 4xx and 5xx statuses
fn synthetic_response(status: StatusCode) -> Response<RespBody> {
    let body = Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed();
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}

fn or_internal_error(result: Result<Response<RespBody>>) -> Response<RespBody> {
    result.unwrap_or_else(|e| {
        warn!(error = %e, "failed to build gate response");
        synthetic_response(StatusCode::INTERNAL_SERVER_ERROR)
    })
}

/// Admit a request, then forward it upstream or answer for it
pub async fn handle_request(
    mut req: Request<Incoming>,
    ctx: &GateContext,
    peer: SocketAddr,
) -> Response<RespBody> {
    let start = Instant::now();
    let method = req.method().clone();

    let admission = ctx
        .gate
        .admit(RequestInfo {
            method: req.method(),
            path: req.uri().path(),
            headers: req.headers(),
            peer: Some(peer),
        })
        .await;

    let response = match admission {
        Admission::Continue(pass) => {
            add_forwarded_for(req.headers_mut(), peer);
            let result = forward(
                req,
                ForwardConfig {
                    upstream: &ctx.upstream,
                    pool: &ctx.pool,
                    timeout: ctx.upstream_timeout,
                    metrics: ctx.metrics.as_ref(),
                },
            )
            .await;

            let succeeded = matches!(&result, Ok(resp) if resp.status().is_success());
            ctx.gate.settle(&pass, succeeded).await;

            match result {
                Ok(mut resp) => {
                    apply_rate_headers(resp.headers_mut(), pass.meta);
                    resp
                }
                Err(e) => {
                    debug!(?peer, error = %e, "upstream request failed");
                    synthetic_response(StatusCode::from(&e))
                }
            }
        }
        Admission::Reject(rejection) => {
            debug!(?peer, code = %rejection.code, "request rejected");
            or_internal_error(rejection_response(&rejection))
        }
        Admission::Error(error) => {
            debug!(?peer, %error, "request without identity");
            or_internal_error(identity_error_response(&error))
        }
    };

    if let Some(m) = &ctx.metrics {
        m.record_request(method.as_str(), response.status().as_u16(), start.elapsed().as_secs_f64());
    }
    response
}
