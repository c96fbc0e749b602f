use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admission::AdmissionGate;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::error::{Result, TollgateError};
use crate::proxy::context::GateContext;
use crate::proxy::handler::handle_request;
use crate::store::{build_store, StoreAdapter};
use crate::telemetry::{init_metrics, start_observability_server};

/// Guard to decrement active connections counter when dropped
struct ConnectionGuard {
    active: Arc<AtomicUsize>,
    ctx: Arc<GateContext>,
}

impl ConnectionGuard {
    fn new(active: Arc<AtomicUsize>, ctx: Arc<GateContext>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &ctx.metrics {
            m.record_connection_opened();
        }
        Self { active, ctx }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        if let Some(m) = &self.ctx.metrics {
            m.record_connection_closed();
        }
    }
}

/// Accept connections on `listener` until `shutdown` is cancelled, then drain.
///
/// Open connections are asked to finish their in-flight request and close;
/// after `drain_timeout` the remaining ones are abandoned.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<GateContext>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) -> Result<()> {
    let builder = ConnBuilder::new(TokioExecutor::new());
    let active_connections = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, no longer accepting connections");
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(error = %e, "accept error");
                        continue;
                    }
                };

                let builder = builder.clone();
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                let guard = ConnectionGuard::new(active_connections.clone(), ctx.clone());

                tokio::spawn(async move {
                    let _guard = guard;
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let ctx = ctx.clone();
                        async move { Ok::<_, hyper::Error>(handle_request(req, &ctx, peer).await) }
                    });

                    let conn = builder.serve_connection(TokioIo::new(stream), svc);
                    tokio::pin!(conn);
                    let result = tokio::select! {
                        res = conn.as_mut() => res,
                        _ = shutdown.cancelled() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    };
                    if let Err(e) = result {
                        warn!(?peer, error = %e, "serve_connection error");
                    }
                });
            }
        }
    }

    info!("Waiting for active connections to finish (timeout: {}s)", drain_timeout.as_secs());
    let start = std::time::Instant::now();

    loop {
        let active = active_connections.load(Ordering::Relaxed);
        if active == 0 {
            info!("All connections closed, shutdown complete");
            break;
        }

        if start.elapsed() >= drain_timeout {
            warn!(
                active_connections = active,
                "Shutdown timeout reached, {} connections still active", active
            );
            break;
        }

        sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}

/// Cancel `token` on SIGTERM or SIGINT
fn spawn_signal_handler(token: CancellationToken) -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
        TollgateError::Io(std::io::Error::other(format!("Failed to setup SIGTERM handler: {e}")))
    })?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
        TollgateError::Io(std::io::Error::other(format!("Failed to setup SIGINT handler: {e}")))
    })?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        }
        token.cancel();
    });
    Ok(())
}

/// Run the gate described by `config` until a shutdown signal arrives
pub async fn run(config: Arc<Config>) -> Result<()> {
    let telemetry = match config.telemetry.metrics_port {
        Some(port) => {
            let (metrics, registry) = init_metrics()
                .map_err(|e| TollgateError::Config(format!("Failed to initialize metrics: {e}")))?;
            Some((port, metrics, registry))
        }
        None => None,
    };

    let store = build_store(&config.store)?;
    let mut adapter = StoreAdapter::new(store, Duration::from_millis(config.store.timeout_ms));
    if let Some((_, metrics, _)) = &telemetry {
        adapter = adapter.with_metrics(metrics.clone());
    }
    let gate = AdmissionGate::from_config(&config, adapter.clone(), Arc::new(SystemClock::new()))?;
    let mut ctx = GateContext::new(&config, gate);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    if let Some((port, metrics, registry)) = telemetry {
        ctx = ctx.with_metrics(metrics);

        let listener = TcpListener::bind(std::net::SocketAddr::from(([0, 0, 0, 0], port))).await?;
        let obs_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = start_observability_server(listener, registry, adapter, obs_shutdown).await {
                warn!(error = %e, "Observability server exited with error");
            }
        });
    }

    let listener = TcpListener::bind(config.listen).await?;
    info!(
        addr = ?config.listen,
        upstream = %config.upstream.address,
        tiers = config.tiers.len(),
        quotas = config.quotas.len(),
        "starting admission gate"
    );

    serve(listener, Arc::new(ctx), shutdown, Duration::from_secs(config.timeout.shutdown_secs)).await?;

    info!("Gate stopped");
    Ok(())
}
