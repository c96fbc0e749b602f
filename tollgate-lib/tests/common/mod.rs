//! Shared helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tollgate_lib::clock::ManualClock;
use tollgate_lib::config::TierConfig;
use tollgate_lib::store::{
    CounterKey, CounterStore, MemoryCounterStore, Observation, ReserveOutcome, StoreAdapter,
    StoreError,
};

pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// 2024-01-01T00:00:00Z
pub const START_MS: u64 = 1_704_067_200_000;

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(START_MS))
}

pub fn memory_adapter() -> (Arc<MemoryCounterStore>, StoreAdapter) {
    let store = Arc::new(MemoryCounterStore::new("test"));
    let adapter = StoreAdapter::new(store.clone(), Duration::from_millis(250));
    (store, adapter)
}

pub fn burst_and_minute() -> Vec<TierConfig> {
    vec![TierConfig::new("burst", 1, 50), TierConfig::new("minute", 60, 1800)]
}

/// Memory store that can be switched into a failing state
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryCounterStore,
    failing: AtomicBool,
    pub calls: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self { inner: MemoryCounterStore::new("flaky"), failing: AtomicBool::new(false), calls: AtomicU64::new(0) }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn record_and_count(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
    ) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.record_and_count(key, observation, window).await
    }

    async fn count(&self, key: &CounterKey, now_ms: u64, window: Duration) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.count(key, now_ms, window).await
    }

    async fn record(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.record(key, observation, window).await
    }

    async fn reserve(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
        limit: u64,
    ) -> Result<ReserveOutcome, StoreError> {
        self.check()?;
        self.inner.reserve(key, observation, window, limit).await
    }

    async fn nth_oldest(
        &self,
        key: &CounterKey,
        now_ms: u64,
        window: Duration,
        rank: u64,
    ) -> Result<Option<u64>, StoreError> {
        self.check()?;
        self.inner.nth_oldest(key, now_ms, window, rank).await
    }

    async fn release(&self, key: &CounterKey, member: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.release(key, member).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

/// Memory store whose quota reservations are always refused, as when the
/// server rejects scripts while plain commands keep working
#[derive(Debug)]
pub struct ScriptlessStore {
    inner: MemoryCounterStore,
}

impl ScriptlessStore {
    pub fn new() -> Self {
        Self { inner: MemoryCounterStore::new("scriptless") }
    }
}

#[async_trait]
impl CounterStore for ScriptlessStore {
    async fn record_and_count(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
    ) -> Result<u64, StoreError> {
        self.inner.record_and_count(key, observation, window).await
    }

    async fn count(&self, key: &CounterKey, now_ms: u64, window: Duration) -> Result<u64, StoreError> {
        self.inner.count(key, now_ms, window).await
    }

    async fn record(&self, key: &CounterKey, observation: &Observation, window: Duration) -> Result<(), StoreError> {
        self.inner.record(key, observation, window).await
    }

    async fn reserve(&self, _: &CounterKey, _: &Observation, _: Duration, _: u64) -> Result<ReserveOutcome, StoreError> {
        Err(StoreError::Unavailable("NOSCRIPT No matching script".into()))
    }

    async fn nth_oldest(
        &self,
        key: &CounterKey,
        now_ms: u64,
        window: Duration,
        rank: u64,
    ) -> Result<Option<u64>, StoreError> {
        self.inner.nth_oldest(key, now_ms, window, rank).await
    }

    async fn release(&self, key: &CounterKey, member: &str) -> Result<(), StoreError> {
        self.inner.release(key, member).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

/// Store whose calls never complete
#[derive(Debug, Default)]
pub struct HangingStore;

#[async_trait]
impl CounterStore for HangingStore {
    async fn record_and_count(&self, _: &CounterKey, _: &Observation, _: Duration) -> Result<u64, StoreError> {
        std::future::pending().await
    }

    async fn count(&self, _: &CounterKey, _: u64, _: Duration) -> Result<u64, StoreError> {
        std::future::pending().await
    }

    async fn record(&self, _: &CounterKey, _: &Observation, _: Duration) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn reserve(
        &self,
        _: &CounterKey,
        _: &Observation,
        _: Duration,
        _: u64,
    ) -> Result<ReserveOutcome, StoreError> {
        std::future::pending().await
    }

    async fn nth_oldest(&self, _: &CounterKey, _: u64, _: Duration, _: u64) -> Result<Option<u64>, StoreError> {
        std::future::pending().await
    }

    async fn release(&self, _: &CounterKey, _: &str) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        std::future::pending().await
    }
}

/// In-memory log sink for `tracing_subscriber::fmt().with_writer(..)`
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        self.0
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().lines().filter(|l| l.contains(needle)).count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Ok(mut buf) = self.0.lock() {
            buf.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
