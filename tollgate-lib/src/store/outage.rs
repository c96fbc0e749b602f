use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use tracing::{debug, info, warn};

use super::StoreError;

/// How long an operation must go without failing before a success clears it
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(5);

/// Tracks counter store outage episodes so a failure is logged once per
/// episode instead of once per request.
///
/// Degradation is tracked per operation. An episode opens when the first
/// operation fails while none are degraded, and closes once every degraded
/// operation has succeeded again at least one quiet period after its last
/// failure. One operation failing while the others keep working is a single
/// episode, and so is an operation that fails intermittently.
#[derive(Debug)]
pub struct OutageMonitor {
    degraded: Mutex<AHashMap<&'static str, Instant>>,
    episodes: AtomicU64,
    quiet_period: Duration,
}

impl Default for OutageMonitor {
    fn default() -> Self {
        Self::with_quiet_period(DEFAULT_QUIET_PERIOD)
    }
}

impl OutageMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero quiet period ends the episode on the first success of any operation.
    pub fn with_quiet_period(quiet_period: Duration) -> Self {
        Self { degraded: Mutex::new(AHashMap::new()), episodes: AtomicU64::new(0), quiet_period }
    }

    fn lock(&self) -> MutexGuard<'_, AHashMap<&'static str, Instant>> {
        self.degraded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a failed store call. Returns true if this call started a new episode.
    pub fn record_failure(&self, operation: &'static str, error: &StoreError) -> bool {
        let mut degraded = self.lock();
        let was_healthy = degraded.is_empty();
        degraded.insert(operation, Instant::now());
        drop(degraded);

        if !was_healthy {
            debug!(operation, error = %error, "counter store still unavailable");
            return false;
        }

        self.episodes.fetch_add(1, Ordering::Relaxed);
        warn!(
            operation,
            error = %error,
            "counter store unavailable, admitting requests until it recovers"
        );
        true
    }

    /// Record a successful store call. Closes the episode once no operation
    /// is still degraded.
    pub fn record_success(&self, operation: &'static str) {
        let mut degraded = self.lock();
        if degraded.is_empty() {
            return;
        }

        let now = Instant::now();
        if degraded
            .get(operation)
            .is_some_and(|failed_at| now.duration_since(*failed_at) >= self.quiet_period)
        {
            degraded.remove(operation);
        }
        // operations that stopped being called entirely
        let quiet_period = self.quiet_period;
        degraded.retain(|_, failed_at| now.duration_since(*failed_at) < quiet_period.saturating_mul(2));

        if degraded.is_empty() {
            drop(degraded);
            info!("counter store recovered, enforcing limits again");
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Number of episodes seen since startup
    pub fn episodes(&self) -> u64 {
        self.episodes.load(Ordering::Relaxed)
    }
}
