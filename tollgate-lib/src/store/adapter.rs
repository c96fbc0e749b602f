use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{
    CounterKey, CounterStore, ObservationIds, OutageMonitor, ReserveOutcome, StoreError,
};
use crate::telemetry::Metrics;

/// Outcome of a counting call as seen by request-handling code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Counted(u64),
    /// The store could not be consulted; callers fail open
    Unknown,
}

impl Reading {
    /// Fail-open interpretation: an unknown count is treated as zero
    pub fn count_or_zero(self) -> u64 {
        match self {
            Reading::Counted(n) => n,
            Reading::Unknown => 0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Reading::Unknown)
    }
}

/// Outcome of an atomic reservation as seen by request-handling code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveReading {
    /// Reserved; `member` identifies the observation to release on failure
    Reserved { count: u64, member: String },
    Exhausted { count: u64, oldest_ms: Option<u64> },
    Unknown,
}

/// Request-path facade over a [`CounterStore`].
///
/// Generates unique observation members, bounds every store call by a timeout
/// and absorbs store failures: nothing here returns an error. A failed or timed
/// out call yields [`Reading::Unknown`] and is reported to the [`OutageMonitor`],
/// which logs once per outage episode.
#[derive(Clone)]
pub struct StoreAdapter {
    store: Arc<dyn CounterStore>,
    ids: Arc<ObservationIds>,
    outage: Arc<OutageMonitor>,
    timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl fmt::Debug for StoreAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("store", &self.store)
            .field("timeout", &self.timeout)
            .field("outage", &self.outage)
            .finish_non_exhaustive()
    }
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn CounterStore>, timeout: Duration) -> Self {
        Self {
            store,
            ids: Arc::new(ObservationIds::new()),
            outage: Arc::new(OutageMonitor::new()),
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the outage monitor with one using the given quiet period
    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.outage = Arc::new(OutageMonitor::with_quiet_period(quiet_period));
        self
    }

    pub fn outage(&self) -> &Arc<OutageMonitor> {
        &self.outage
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Record one observation at `now_ms` and return the in-window count
    pub async fn record_and_count(&self, key: &CounterKey, now_ms: u64, window: Duration) -> Reading {
        let observation = self.ids.next(now_ms);
        self.guarded("record_and_count", self.store.record_and_count(key, &observation, window))
            .await
            .map_or(Reading::Unknown, Reading::Counted)
    }

    /// Read-only in-window count
    pub async fn count(&self, key: &CounterKey, now_ms: u64, window: Duration) -> Reading {
        self.guarded("count", self.store.count(key, now_ms, window))
            .await
            .map_or(Reading::Unknown, Reading::Counted)
    }

    /// Append one observation. Returns false if the store could not be reached.
    pub async fn record(&self, key: &CounterKey, now_ms: u64, window: Duration) -> bool {
        let observation = self.ids.next(now_ms);
        self.guarded("record", self.store.record(key, &observation, window))
            .await
            .is_some()
    }

    pub async fn reserve(
        &self,
        key: &CounterKey,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> ReserveReading {
        let observation = self.ids.next(now_ms);
        let outcome =
            self.guarded("reserve", self.store.reserve(key, &observation, window, limit)).await;
        match outcome {
            Some(ReserveOutcome::Reserved { count }) => {
                ReserveReading::Reserved { count, member: observation.member }
            }
            Some(ReserveOutcome::Exhausted { count, oldest_ms }) => {
                ReserveReading::Exhausted { count, oldest_ms }
            }
            None => ReserveReading::Unknown,
        }
    }

    /// Timestamp of the `rank`-th oldest in-window observation, `None` if
    /// absent or the store could not be reached
    pub async fn nth_oldest(&self, key: &CounterKey, now_ms: u64, window: Duration, rank: u64) -> Option<u64> {
        self.guarded("nth_oldest", self.store.nth_oldest(key, now_ms, window, rank))
            .await
            .flatten()
    }

    /// Remove a reserved observation. Returns false if the store could not be reached.
    pub async fn release(&self, key: &CounterKey, member: &str) -> bool {
        self.guarded("release", self.store.release(key, member)).await.is_some()
    }

    pub async fn ping(&self) -> bool {
        self.guarded("ping", self.store.ping()).await.is_some()
    }

    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };

        match result {
            Ok(value) => {
                self.outage.record_success(operation);
                Some(value)
            }
            Err(error) => {
                let new_episode = self.outage.record_failure(operation, &error);
                if let Some(m) = &self.metrics {
                    m.record_store_failure(operation, new_episode);
                }
                None
            }
        }
    }
}
