use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{validate_quotas, QuotaConfig};
use crate::error::{Result, TollgateError};
use crate::identity::Identity;
use crate::store::{CounterKey, Reading, ReserveReading, StoreAdapter};

/// Rolling-window budget of one guarded action per user
///
/// Two ways to use it:
///
/// * [`remaining`](Self::remaining) then [`record`](Self::record) after the
///   action succeeded. Not atomic: concurrent callers that all see
///   `remaining >= 1` are all admitted, so the true count can exceed the
///   limit by up to the number of racing requests minus one.
/// * [`reserve`](Self::reserve) then [`release`](Self::release) if the action
///   failed. The check and the increment happen in one store operation, so
///   the limit holds under contention.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    config: Arc<QuotaConfig>,
    window: Duration,
    adapter: StoreAdapter,
    clock: Arc<dyn Clock>,
}

/// A slot taken by [`QuotaTracker::reserve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    key: CounterKey,
    member: String,
    pub limit: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaVerdict {
    Granted(Reservation),
    Exhausted { limit: u64, retry_after: Duration },
    /// Store unreachable; the action proceeds without a reservation
    Unavailable { limit: u64 },
}

impl QuotaTracker {
    pub fn new(config: QuotaConfig, adapter: StoreAdapter, clock: Arc<dyn Clock>) -> Result<Self> {
        validate_quotas(std::slice::from_ref(&config)).map_err(TollgateError::Config)?;
        let window = Duration::from_millis(config.window_ms);
        Ok(Self { config: Arc::new(config), window, adapter, clock })
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    pub fn action(&self) -> &str {
        &self.config.action
    }

    pub fn limit(&self) -> u64 {
        self.config.max_submissions
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn key(&self, identity: &Identity) -> CounterKey {
        CounterKey::quota(identity.as_str(), &self.config.action)
    }

    /// Submissions left in the current window; the full budget if the store is down
    pub async fn remaining(&self, identity: &Identity) -> u64 {
        let now_ms = self.clock.now_ms();
        match self.adapter.count(&self.key(identity), now_ms, self.window).await {
            Reading::Counted(n) => self.limit().saturating_sub(n),
            Reading::Unknown => self.limit(),
        }
    }

    /// Append one submission; store failures are absorbed
    pub async fn record(&self, identity: &Identity) {
        let now_ms = self.clock.now_ms();
        if !self.adapter.record(&self.key(identity), now_ms, self.window).await {
            tracing::debug!(action = %self.config.action, identity = %identity, "quota submission not recorded");
        }
    }

    /// Atomically check the budget and take one slot
    pub async fn reserve(&self, identity: &Identity) -> QuotaVerdict {
        let now_ms = self.clock.now_ms();
        let key = self.key(identity);
        let limit = self.limit();

        match self.adapter.reserve(&key, now_ms, self.window, limit).await {
            ReserveReading::Reserved { count, member } => QuotaVerdict::Granted(Reservation {
                key,
                member,
                limit,
                remaining: limit.saturating_sub(count),
            }),
            ReserveReading::Exhausted { oldest_ms, .. } => {
                QuotaVerdict::Exhausted { limit, retry_after: self.reset_in(now_ms, oldest_ms) }
            }
            ReserveReading::Unknown => QuotaVerdict::Unavailable { limit },
        }
    }

    /// Give back a slot whose guarded action did not succeed
    pub async fn release(&self, reservation: &Reservation) -> bool {
        self.adapter.release(&reservation.key, &reservation.member).await
    }

    /// Time until the oldest counted submission leaves the window
    fn reset_in(&self, now_ms: u64, oldest_ms: Option<u64>) -> Duration {
        match oldest_ms {
            Some(oldest) => {
                let frees_at = oldest.saturating_add(self.config.window_ms);
                Duration::from_millis(frees_at.saturating_sub(now_ms))
            }
            None => self.window,
        }
    }
}
