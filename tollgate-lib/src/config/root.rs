use serde::Deserialize;
use std::net::SocketAddr;

use super::backend::Upstream;
use super::identity::IdentityConfig;
use super::limits::{default_tiers, QuotaConfig, TierConfig};
use super::store::StoreConfig;
use super::telemetry::{LoggingConfig, TelemetryConfig};
use super::timeout::TimeoutConfig;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address and port to listen on
    /// Example: "0.0.0.0:8080"
    pub listen: SocketAddr,
    /// Service that admitted requests are forwarded to
    pub upstream: Upstream,
    /// Counter store used by every tier and quota
    #[serde(default)]
    pub store: StoreConfig,
    /// Identity resolution
    #[serde(default)]
    pub identity: IdentityConfig,
    /// General traffic tiers, tightest first
    /// Default: burst 50/1s, minute 1800/60s, hour 72000/3600s
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,
    /// Per-user quotas for guarded actions
    /// Default: none
    #[serde(default)]
    pub quotas: Vec<QuotaConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Timeout configuration
    #[serde(default)]
    pub timeout: TimeoutConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
