//! Shared counter store used by every tier and quota.
//!
//! Counter state lives outside the process. A [`CounterStore`] keeps, per
//! [`CounterKey`], an ordered set of timestamped observations and performs the
//! insert / prune / count / expire sequence as one atomic store operation.
//! Nothing in this crate locks around a count; correctness under concurrent
//! requests for one identity relies on the store's own atomicity.
//!
//! Backends:
//!
//! - [`RedisCounterStore`]: sorted sets, `MULTI/EXEC` pipelines and one Lua
//!   script for quota reservations. Shared across gate instances.
//! - [`MemoryCounterStore`]: the same semantics behind one mutex, for a single
//!   instance and for tests.
//!
//! Request paths never talk to a store directly. They go through
//! [`StoreAdapter`], which bounds every call with a timeout and turns failures
//! into [`Reading::Unknown`] so the caller can fail open.

mod adapter;
mod memory;
mod outage;
mod redis_store;

pub use adapter::{ReserveReading, Reading, StoreAdapter};
pub use memory::MemoryCounterStore;
pub use outage::OutageMonitor;
pub use redis_store::RedisCounterStore;

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};

/// Errors raised by counter store backends
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected counter store reply: {0}")]
    Protocol(String),
}

/// What a counter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Tier,
    Quota,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Tier => "tier",
            Scope::Quota => "quota",
        }
    }
}

/// `(scope, identity, label)`: one ordered set in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub scope: Scope,
    pub identity: String,
    pub label: String,
}

impl CounterKey {
    pub fn tier(identity: &str, tier: &str) -> Self {
        Self { scope: Scope::Tier, identity: identity.to_string(), label: tier.to_string() }
    }

    pub fn quota(identity: &str, action: &str) -> Self {
        Self { scope: Scope::Quota, identity: identity.to_string(), label: action.to_string() }
    }

    /// Store key, e.g. `tollgate:tier:burst:203.0.113.7`
    ///
    /// The identity goes last because IPv6 addresses contain `:`.
    pub fn render(&self, prefix: &str) -> String {
        format!("{prefix}:{}:{}:{}", self.scope.as_str(), self.label, self.identity)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.scope.as_str(), self.label, self.identity)
    }
}

/// One timestamped entry in a counter's ordered set
///
/// `at_ms` is the sort score. `member` is unique even when many observations
/// share a millisecond, so bursts are never coalesced into one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub at_ms: u64,
    pub member: String,
}

/// Generates unique observation members: `<at_ms>:<instance>:<sequence>`
#[derive(Debug)]
pub struct ObservationIds {
    instance: String,
    sequence: AtomicU64,
}

impl ObservationIds {
    pub fn new() -> Self {
        let instance = uuid::Uuid::new_v4().simple().to_string();
        Self { instance, sequence: AtomicU64::new(0) }
    }

    pub fn next(&self, at_ms: u64) -> Observation {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        Observation { at_ms, member: format!("{at_ms}:{}:{seq}", self.instance) }
    }
}

impl Default for ObservationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of an atomic check-and-reserve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The observation was added; `count` includes it
    Reserved { count: u64 },
    /// The window is full; nothing was added
    Exhausted { count: u64, oldest_ms: Option<u64> },
}

/// Contract every counter store backend provides
///
/// All windows are sliding: a count covers observations scored inside
/// `[now - window, now]`, where `now` is the observation timestamp supplied by
/// the caller. Keys are refreshed to expire after `2 × window`.
#[async_trait]
pub trait CounterStore: Send + Sync + fmt::Debug {
    /// Insert `observation`, drop entries older than the window, return the
    /// remaining count and refresh the key TTL, all as one atomic operation.
    async fn record_and_count(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
    ) -> Result<u64, StoreError>;

    /// Count observations inside the window without recording anything.
    async fn count(&self, key: &CounterKey, now_ms: u64, window: Duration)
        -> Result<u64, StoreError>;

    /// Insert `observation`, prune and refresh the TTL without reporting a count.
    async fn record(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
    ) -> Result<(), StoreError>;

    /// Insert `observation` only if fewer than `limit` observations are in the
    /// window. Check and insert happen in one atomic step.
    async fn reserve(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
        limit: u64,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Timestamp of the observation at `rank` inside the window, oldest first
    /// (rank 0 is the oldest). `None` if fewer than `rank + 1` are in the window.
    async fn nth_oldest(
        &self,
        key: &CounterKey,
        now_ms: u64,
        window: Duration,
        rank: u64,
    ) -> Result<Option<u64>, StoreError>;

    /// Remove one observation by member, undoing a reservation.
    async fn release(&self, key: &CounterKey, member: &str) -> Result<(), StoreError>;

    /// Cheap reachability check used by readiness probes.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Build the configured store backend
///
/// Redis connections are established lazily, so a store that is down at startup
/// only degrades admission to fail-open instead of preventing the gate from starting.
pub fn build_store(config: &StoreConfig) -> crate::error::Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryCounterStore::new(config.key_prefix.clone()))),
        StoreBackend::Redis => {
            let url = config.url.as_deref().ok_or_else(|| {
                crate::error::TollgateError::Config("store.url is required for redis".into())
            })?;
            let store = RedisCounterStore::open(url, config.key_prefix.clone())?;
            Ok(Arc::new(store))
        }
    }
}

pub(crate) fn window_ms(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

/// Oldest timestamp still inside the window ending at `now_ms`
pub(crate) fn window_start(now_ms: u64, window: Duration) -> u64 {
    now_ms.saturating_sub(window_ms(window))
}

/// Key TTL: twice the window, so idle keys disappear even without pruning
pub(crate) fn key_ttl_ms(window: Duration) -> u64 {
    window_ms(window).saturating_mul(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_render_puts_identity_last() {
        let key = CounterKey::tier("2001:db8::1", "burst");
        assert_eq!(key.render("tollgate"), "tollgate:tier:burst:2001:db8::1");
    }

    #[test]
    fn test_observation_members_are_unique_within_one_millisecond() {
        let ids = ObservationIds::new();
        let a = ids.next(1_000);
        let b = ids.next(1_000);
        assert_eq!(a.at_ms, b.at_ms);
        assert_ne!(a.member, b.member);
        assert!(a.member.starts_with("1000:"));
    }

    #[test]
    fn test_window_helpers() {
        assert_eq!(window_start(5_000, Duration::from_secs(1)), 4_000);
        assert_eq!(window_start(500, Duration::from_secs(1)), 0);
        assert_eq!(key_ttl_ms(Duration::from_secs(60)), 120_000);
    }
}
