use serde::Deserialize;

/// Downstream service that admitted requests are forwarded to
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Upstream {
    /// Upstream server address (host:port format)
    /// Example: "api:9000" or "192.168.1.10:8080"
    pub address: String,
    /// Connection pool settings for the upstream client
    #[serde(default)]
    pub pool: BackendPoolConfig,
}

/// Configuration for the upstream connection pool
///
/// Pooling reuses TCP connections to the upstream so admitted requests do not
/// pay a fresh handshake each time.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendPoolConfig {
    /// Idle timeout in seconds for pooled connections
    /// Default: 90 seconds
    #[serde(default = "default_backend_pool_idle_timeout")]
    pub idle_timeout: u64,

    /// Maximum number of idle connections to maintain per host
    /// 0 = unlimited (hyper default)
    /// Default: 0 (unlimited)
    #[serde(default)]
    pub pool_max_idle_per_host: usize,
}

impl Default for BackendPoolConfig {
    fn default() -> Self {
        Self { idle_timeout: default_backend_pool_idle_timeout(), pool_max_idle_per_host: 0 }
    }
}

fn default_backend_pool_idle_timeout() -> u64 {
    90
}
