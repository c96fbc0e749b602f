use serde::Deserialize;

/// Which counter store implementation backs the limiter
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance (sorted sets + MULTI/EXEC)
    #[default]
    Redis,
    /// Process-local store; counts are not shared between instances
    Memory,
}

/// Counter store configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StoreConfig {
    /// Store implementation
    /// Default: "redis"
    #[serde(default)]
    pub backend: StoreBackend,
    /// Redis connection URL, required when backend = "redis"
    /// Example: "redis://127.0.0.1:6379/"
    #[serde(default)]
    pub url: Option<String>,
    /// Prefix for every counter key
    /// Default: "tollgate"
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Upper bound for one store round trip in milliseconds
    /// A call that exceeds it is treated as store unavailable (fail open)
    /// Default: 250
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            key_prefix: default_key_prefix(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_key_prefix() -> String {
    "tollgate".to_string()
}

fn default_store_timeout_ms() -> u64 {
    250
}
