use serde::Deserialize;

/// One sliding-window tier of the general traffic limiter
///
/// Tiers are listed from tightest (shortest window) to loosest:
///
/// ```toml
/// [[tiers]]
/// name = "burst"
/// window_seconds = 1
/// max_requests = 50
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TierConfig {
    /// Label used in counter keys and in the rejection code (`RATE_LIMIT_<NAME>`)
    pub name: String,
    /// Sliding window length in seconds, must be > 0
    pub window_seconds: u64,
    /// Requests allowed inside one window, must be > 0
    pub max_requests: u64,
}

impl TierConfig {
    pub fn new(name: impl Into<String>, window_seconds: u64, max_requests: u64) -> Self {
        Self { name: name.into(), window_seconds, max_requests }
    }
}

/// Default tier set: 50/s, 1800/min, 72000/h
pub fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig::new("burst", 1, 50),
        TierConfig::new("minute", 60, 1800),
        TierConfig::new("hour", 3600, 72000),
    ]
}

/// Per-user quota for one guarded action
///
/// ```toml
/// [[quotas]]
/// action = "daily-contribution"
/// method = "POST"
/// path_prefix = "/api/contributions"
/// window_ms = 86400000
/// max_submissions = 5
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Action name, used in counter keys and metrics
    pub action: String,
    /// Rolling window length in milliseconds
    /// Default: 86400000 (24 hours)
    #[serde(default = "default_quota_window_ms")]
    pub window_ms: u64,
    /// Successful submissions allowed per window
    pub max_submissions: u64,
    /// HTTP method the quota applies to (case-insensitive)
    /// Default: "POST"
    #[serde(default = "default_quota_method")]
    pub method: String,
    /// Path prefix the quota applies to
    pub path_prefix: String,
}

impl QuotaConfig {
    pub fn new(action: impl Into<String>, window_ms: u64, max_submissions: u64) -> Self {
        Self {
            action: action.into(),
            window_ms,
            max_submissions,
            method: default_quota_method(),
            path_prefix: "/".to_string(),
        }
    }

    /// Whether this quota guards the given request line
    ///
    /// The prefix matches on path segment boundaries: `/api/contributions`
    /// guards `/api/contributions` and `/api/contributions/42`, not
    /// `/api/contributions-export`.
    pub fn matches(&self, method: &http::Method, path: &str) -> bool {
        if !method.as_str().eq_ignore_ascii_case(&self.method) {
            return false;
        }
        match path.strip_prefix(self.path_prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.path_prefix.ends_with('/'),
            None => false,
        }
    }
}

fn default_quota_window_ms() -> u64 {
    86_400_000
}

fn default_quota_method() -> String {
    "POST".to_string()
}
