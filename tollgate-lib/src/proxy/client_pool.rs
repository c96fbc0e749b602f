use crate::config::{BackendPoolConfig, KeepAliveConfig, TimeoutConfig};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

pub type HttpClient = Client<HttpConnector, Incoming>;

/// Shared HTTP/1.1 client for upstream connections
///
/// Reuses idle TCP connections so admitted requests skip the handshake.
#[derive(Clone, Debug)]
pub struct ClientPool {
    client: HttpClient,
}

impl ClientPool {
    pub fn new(timeout: &TimeoutConfig, config: &BackendPoolConfig) -> Self {
        Self { client: Self::create_client(&timeout.keep_alive, timeout.connect_ms, config) }
    }

    fn create_client(keep_alive: &KeepAliveConfig, connect_ms: u64, config: &BackendPoolConfig) -> HttpClient {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(connect_ms)));
        // TCP keep-alive: sends periodic packets to keep TCP connection alive
        if keep_alive.enabled {
            connector.set_keepalive(Some(Duration::from_secs(keep_alive.timeout_secs)));
        } else {
            connector.set_keepalive(None);
        }

        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_idle_timeout(Duration::from_secs(config.idle_timeout));

        if config.pool_max_idle_per_host > 0 {
            builder.pool_max_idle_per_host(config.pool_max_idle_per_host);
        }

        builder.build(connector)
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}
