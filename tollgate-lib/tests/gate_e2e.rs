mod common;

use common::{clock, memory_adapter, TestResult};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tollgate_lib::config::load_from_str;
use tollgate_lib::{serve, AdmissionGate, GateContext};

/// Echoes the X-Forwarded-For header; `x-fail: 1` makes it answer 500
async fn upstream(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let status = if req.headers().contains_key("x-fail") {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    let xff = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let mut resp = Response::new(Full::new(Bytes::from(xff)));
    *resp.status_mut() = status;
    Ok(resp)
}

async fn spawn_upstream() -> Result<SocketAddr, std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let svc = hyper::service::service_fn(upstream);
                let _ = ConnBuilder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });
    Ok(addr)
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<tollgate_lib::Result<()>>,
}

async fn spawn_gate(burst: u64, submissions: u64) -> Result<Running, Box<dyn std::error::Error + Send + Sync>> {
    let upstream_addr = spawn_upstream().await?;
    let config = load_from_str(&format!(
        r#"
listen = "127.0.0.1:0"

[upstream]
address = "{upstream_addr}"

[store]
backend = "memory"

[[tiers]]
name = "burst"
window_seconds = 1
max_requests = {burst}

[[tiers]]
name = "hour"
window_seconds = 3600
max_requests = 1000

[[quotas]]
action = "daily-contribution"
path_prefix = "/api/contributions"
max_submissions = {submissions}
"#
    ))?;

    let (_, adapter) = memory_adapter();
    let gate = AdmissionGate::from_config(&config, adapter, clock())?;
    let ctx = Arc::new(GateContext::new(&config, gate));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(listener, ctx, shutdown.clone(), Duration::from_secs(2)));

    Ok(Running { addr, shutdown, server })
}

#[tokio::test]
async fn test_admitted_request_is_forwarded_with_rate_headers() -> TestResult {
    let gate = spawn_gate(5, 5).await?;
    let client = reqwest::Client::new();

    let resp = client.get(format!("http://{}/api/items", gate.addr)).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers().get("x-ratelimit-limit").and_then(|v| v.to_str().ok()), Some("5"));
    assert_eq!(resp.headers().get("x-ratelimit-remaining").and_then(|v| v.to_str().ok()), Some("4"));
    assert_eq!(resp.text().await?, "127.0.0.1");

    gate.shutdown.cancel();
    gate.server.await??;
    Ok(())
}

#[tokio::test]
async fn test_burst_rejection_is_429_with_body() -> TestResult {
    let gate = spawn_gate(2, 5).await?;
    let client = reqwest::Client::new();
    let url = format!("http://{}/", gate.addr);

    for _ in 0..2 {
        assert_eq!(client.get(&url).send().await?.status(), reqwest::StatusCode::OK);
    }
    let resp = client.get(&url).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.headers().get("retry-after").and_then(|v| v.to_str().ok()), Some("1"));

    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "RATE_LIMIT_BURST");
    assert_eq!(body["retryAfter"], 1);
    assert_eq!(body["details"]["limit"], 2);
    assert_eq!(body["details"]["remaining"], 0);
    assert_eq!(body["details"]["resetIn"], "1s");

    gate.shutdown.cancel();
    gate.server.await??;
    Ok(())
}

#[tokio::test]
async fn test_quota_route_flow() -> TestResult {
    let gate = spawn_gate(50, 2).await?;
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/contributions", gate.addr);

    // Missing user identity
    let resp = client.post(&url).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["code"], "MISSING_IDENTITY");

    // A failed submission does not consume quota
    let resp = client.post(&url).header("x-authenticated-user", "carol").header("x-fail", "1").send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    for remaining in ["1", "0"] {
        let resp = client.post(&url).header("x-authenticated-user", "carol").send().await?;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers().get("x-ratelimit-remaining").and_then(|v| v.to_str().ok()), Some(remaining));
    }

    let resp = client.post(&url).header("x-authenticated-user", "carol").send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["details"]["limit"], 2);

    gate.shutdown.cancel();
    gate.server.await??;
    Ok(())
}
