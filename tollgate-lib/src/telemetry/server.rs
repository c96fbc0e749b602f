use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::StoreAdapter;
use crate::telemetry::{
    handle_metrics, health_check_response, live_check_response, ready_check_response,
};

type RespBody = BoxBody<Bytes, hyper::Error>;

fn plain(status: StatusCode, text: &'static str) -> Response<RespBody> {
    let body = Full::new(Bytes::from(text))
        .map_err(|never| match never {})
        .boxed();
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}

async fn route(
    req: Request<Incoming>,
    registry: Arc<Registry>,
    adapter: StoreAdapter,
) -> Result<Response<RespBody>, hyper::Error> {
    let result = match req.uri().path() {
        "/health" => health_check_response(),
        "/ready" => ready_check_response(&adapter).await,
        "/live" => live_check_response(),
        "/metrics" => handle_metrics(&registry),
        _ => return Ok(plain(StatusCode::NOT_FOUND, "Not Found")),
    };

    Ok(result.unwrap_or_else(|e| {
        warn!(error = %e, "Observability server: failed to build response");
        plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }))
}

/// Start the observability server that handles metrics and health checks
/// This server runs on a dedicated port and serves:
/// - `/metrics` - Prometheus metrics
/// - `/health` - Health check endpoint
/// - `/ready` - Readiness check endpoint (counter store ping)
/// - `/live` - Liveness check endpoint
pub async fn start_observability_server(
    listener: TcpListener,
    registry: Registry,
    adapter: StoreAdapter,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Arc::new(registry);
    let addr: SocketAddr = listener.local_addr()?;

    info!(?addr, "Observability server started (metrics + health checks)");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Observability server: shutting down");
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(error = %e, "Observability server: accept error");
                        continue;
                    }
                };

                let registry = registry.clone();
                let adapter = adapter.clone();
                tokio::spawn(async move {
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        route(req, registry.clone(), adapter.clone())
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(?peer, error = %e, "Observability server: serve_connection error");
                    }
                });
            }
        }
    }

    info!("Observability server stopped");
    Ok(())
}
