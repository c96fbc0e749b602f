use serde::Deserialize;

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Observability server port (optional)
    /// Serves /metrics, /health, /ready and /live on a separate listener
    /// Default: None (disabled)
    #[serde(default)]
    pub metrics_port: Option<u16>,
    /// OpenTelemetry SDK log level, separate from the application level in [logging]
    /// Default: "warn"
    #[serde(default = "default_otel_log_level")]
    pub otel_log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { metrics_port: None, otel_log_level: default_otel_log_level() }
    }
}

fn default_otel_log_level() -> String {
    "warn".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    /// Can be overridden at runtime via RUST_LOG
    /// Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Show module path (target) in log messages
    /// Default: false
    #[serde(default)]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: false }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
