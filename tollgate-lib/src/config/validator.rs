use std::collections::HashSet;

use crate::config::{Config, QuotaConfig, StoreBackend, TierConfig};

/// Reject configurations the limiter cannot run with
///
/// Every invariant on tiers and quotas is checked here, so an invalid limit is a
/// startup failure and never a request-time surprise.
pub fn validate(config: &Config) -> Result<(), String> {
    if config.upstream.address.trim().is_empty() {
        return Err("upstream address cannot be empty".into());
    }
    if matches!(config.store.backend, StoreBackend::Redis)
        && config.store.url.as_deref().map_or(true, |u| u.trim().is_empty())
    {
        return Err("store.url is required when store.backend = \"redis\"".into());
    }
    if config.store.key_prefix.trim().is_empty() {
        return Err("store.key_prefix cannot be empty".into());
    }
    if config.store.timeout_ms == 0 {
        return Err("store.timeout_ms must be > 0".into());
    }
    if config.timeout.connect_ms == 0 {
        return Err("timeout.connect_ms must be > 0".into());
    }
    if config.timeout.upstream_ms == 0 {
        return Err("timeout.upstream_ms must be > 0".into());
    }
    if config.identity.user_header.trim().is_empty() {
        return Err("identity.user_header cannot be empty".into());
    }
    if http::HeaderName::from_bytes(config.identity.user_header.as_bytes()).is_err() {
        return Err(format!(
            "identity.user_header '{}' is not a valid header name",
            config.identity.user_header
        ));
    }
    validate_tiers(&config.tiers)?;
    validate_quotas(&config.quotas)?;
    Ok(())
}

/// Tiers must be non-empty, uniquely named, positive, and ordered by strictly growing window
pub fn validate_tiers(tiers: &[TierConfig]) -> Result<(), String> {
    if tiers.is_empty() {
        return Err("at least one tier is required".into());
    }

    let mut names = HashSet::new();
    let mut previous_window = 0u64;
    for tier in tiers {
        if tier.name.trim().is_empty() {
            return Err("tier name cannot be empty".into());
        }
        if !names.insert(tier.name.as_str()) {
            return Err(format!("duplicate tier name '{}'", tier.name));
        }
        if tier.window_seconds == 0 {
            return Err(format!("tier '{}': window_seconds must be > 0", tier.name));
        }
        if tier.max_requests == 0 {
            return Err(format!("tier '{}': max_requests must be > 0", tier.name));
        }
        if tier.window_seconds <= previous_window {
            return Err(format!(
                "tier '{}': tiers must be ordered from shortest to longest window",
                tier.name
            ));
        }
        previous_window = tier.window_seconds;
    }
    Ok(())
}

pub fn validate_quotas(quotas: &[QuotaConfig]) -> Result<(), String> {
    let mut actions = HashSet::new();
    for quota in quotas {
        if quota.action.trim().is_empty() {
            return Err("quota action cannot be empty".into());
        }
        if !actions.insert(quota.action.as_str()) {
            return Err(format!("duplicate quota action '{}'", quota.action));
        }
        if quota.window_ms == 0 {
            return Err(format!("quota '{}': window_ms must be > 0", quota.action));
        }
        if quota.max_submissions == 0 {
            return Err(format!("quota '{}': max_submissions must be > 0", quota.action));
        }
        if !quota.path_prefix.starts_with('/') {
            return Err(format!("quota '{}': path_prefix must start with '/'", quota.action));
        }
        if http::Method::from_bytes(quota.method.as_bytes()).is_err() {
            return Err(format!("quota '{}': invalid method '{}'", quota.action, quota.method));
        }
    }
    Ok(())
}
