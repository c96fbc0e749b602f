//! Process-local counter store.
//!
//! Mirrors the Redis semantics (sliding windows over unique observations,
//! `2 × window` key expiry) behind a single mutex. Counts are not shared between
//! processes, so this backend suits a single gate instance and tests.

use ahash::AHashMap;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{
    key_ttl_ms, window_start, CounterKey, CounterStore, Observation, ReserveOutcome, StoreError,
};

// Sweep the whole map for expired keys once every this many writes
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Default)]
struct SortedSet {
    entries: BTreeSet<(u64, String)>,
    expires_at_ms: u64,
}

impl SortedSet {
    fn prune(&mut self, cutoff_ms: u64) {
        // split_off keeps everything >= (cutoff, "") in the returned set
        self.entries = self.entries.split_off(&(cutoff_ms, String::new()));
    }

    fn count_from(&self, cutoff_ms: u64) -> u64 {
        let n = self.entries.range((cutoff_ms, String::new())..).count();
        u64::try_from(n).unwrap_or(u64::MAX)
    }

    fn len(&self) -> u64 {
        u64::try_from(self.entries.len()).unwrap_or(u64::MAX)
    }

    fn oldest(&self) -> Option<u64> {
        self.entries.first().map(|(at, _)| *at)
    }

    fn touch(&mut self, now_ms: u64, window: Duration) {
        self.expires_at_ms = now_ms.saturating_add(key_ttl_ms(window));
    }
}

/// In-memory [`CounterStore`].
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    key_prefix: String,
    sets: Mutex<AHashMap<String, SortedSet>>,
    writes: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self { key_prefix: key_prefix.into(), sets: Mutex::new(AHashMap::new()), writes: AtomicU64::new(0) }
    }

    /// Number of live keys, counting keys whose TTL has passed but were not swept yet
    pub fn key_count(&self) -> usize {
        self.lock().map(|sets| sets.len()).unwrap_or(0)
    }

    /// Drop every key whose TTL expired at or before `now_ms`
    pub fn purge_expired(&self, now_ms: u64) {
        if let Ok(mut sets) = self.lock() {
            sets.retain(|_, set| set.expires_at_ms > now_ms);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, AHashMap<String, SortedSet>>, StoreError> {
        self.sets
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn maybe_sweep(&self, sets: &mut AHashMap<String, SortedSet>, now_ms: u64) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed);
        if writes % SWEEP_EVERY == SWEEP_EVERY - 1 {
            sets.retain(|_, set| set.expires_at_ms > now_ms);
        }
    }

    /// Fetch the set for `key`, resetting it first if its TTL has passed
    fn live_set<'a>(
        sets: &'a mut AHashMap<String, SortedSet>,
        key: String,
        now_ms: u64,
    ) -> &'a mut SortedSet {
        let set = sets.entry(key).or_default();
        if set.expires_at_ms != 0 && set.expires_at_ms <= now_ms {
            *set = SortedSet::default();
        }
        set
    }

    fn insert(&self, key: &CounterKey, observation: &Observation, window: Duration) -> Result<u64, StoreError> {
        let mut sets = self.lock()?;
        self.maybe_sweep(&mut sets, observation.at_ms);

        let set = Self::live_set(&mut sets, key.render(&self.key_prefix), observation.at_ms);
        set.entries.insert((observation.at_ms, observation.member.clone()));
        set.prune(window_start(observation.at_ms, window));
        set.touch(observation.at_ms, window);
        Ok(set.len())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn record_and_count(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
    ) -> Result<u64, StoreError> {
        self.insert(key, observation, window)
    }

    async fn count(&self, key: &CounterKey, now_ms: u64, window: Duration) -> Result<u64, StoreError> {
        let sets = self.lock()?;
        let count = sets
            .get(&key.render(&self.key_prefix))
            .filter(|set| set.expires_at_ms > now_ms)
            .map(|set| set.count_from(window_start(now_ms, window)))
            .unwrap_or(0);
        Ok(count)
    }

    async fn record(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
    ) -> Result<(), StoreError> {
        self.insert(key, observation, window).map(|_| ())
    }

    async fn reserve(
        &self,
        key: &CounterKey,
        observation: &Observation,
        window: Duration,
        limit: u64,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut sets = self.lock()?;
        self.maybe_sweep(&mut sets, observation.at_ms);

        let set = Self::live_set(&mut sets, key.render(&self.key_prefix), observation.at_ms);
        set.prune(window_start(observation.at_ms, window));

        let count = set.len();
        if count >= limit {
            return Ok(ReserveOutcome::Exhausted { count, oldest_ms: set.oldest() });
        }

        set.entries.insert((observation.at_ms, observation.member.clone()));
        set.touch(observation.at_ms, window);
        Ok(ReserveOutcome::Reserved { count: set.len() })
    }

    async fn nth_oldest(
        &self,
        key: &CounterKey,
        now_ms: u64,
        window: Duration,
        rank: u64,
    ) -> Result<Option<u64>, StoreError> {
        let sets = self.lock()?;
        let Some(set) = sets.get(&key.render(&self.key_prefix)).filter(|set| set.expires_at_ms > now_ms) else {
            return Ok(None);
        };
        let rank = usize::try_from(rank).unwrap_or(usize::MAX);
        Ok(set.entries.range((window_start(now_ms, window), String::new())..).nth(rank).map(|(at, _)| *at))
    }

    async fn release(&self, key: &CounterKey, member: &str) -> Result<(), StoreError> {
        let mut sets = self.lock()?;
        if let Some(set) = sets.get_mut(&key.render(&self.key_prefix)) {
            set.entries.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(at_ms: u64, n: u32) -> Observation {
        Observation { at_ms, member: format!("{at_ms}:test:{n}") }
    }

    #[tokio::test]
    async fn test_same_millisecond_observations_are_not_coalesced() {
        let store = MemoryCounterStore::new("t");
        let key = CounterKey::tier("1.2.3.4", "burst");
        let window = Duration::from_secs(1);

        for n in 0..3 {
            let count = store.record_and_count(&key, &obs(1_000, n), window).await;
            assert_eq!(count.ok(), Some(u64::from(n) + 1));
        }
    }

    #[tokio::test]
    async fn test_entries_outside_window_are_not_counted() {
        let store = MemoryCounterStore::new("t");
        let key = CounterKey::tier("1.2.3.4", "burst");
        let window = Duration::from_secs(1);

        let _ = store.record_and_count(&key, &obs(1_000, 0), window).await;
        let _ = store.record_and_count(&key, &obs(1_500, 1), window).await;
        // 1_000 is exactly on the boundary of [1_000, 2_000] and still counts
        assert_eq!(store.count(&key, 2_000, window).await.ok(), Some(2));
        assert_eq!(store.count(&key, 2_001, window).await.ok(), Some(1));
        assert_eq!(store.record_and_count(&key, &obs(2_600, 2), window).await.ok(), Some(1));
    }

    #[tokio::test]
    async fn test_nth_oldest_skips_entries_outside_window() {
        let store = MemoryCounterStore::new("t");
        let key = CounterKey::tier("1.2.3.4", "minute");
        let window = Duration::from_secs(1);

        for (n, at) in [100, 700, 900].into_iter().enumerate() {
            let _ = store.record(&key, &obs(at, n as u32), window).await;
        }
        assert_eq!(store.nth_oldest(&key, 1_200, window, 0).await.ok(), Some(Some(700)));
        assert_eq!(store.nth_oldest(&key, 1_200, window, 1).await.ok(), Some(Some(900)));
        assert_eq!(store.nth_oldest(&key, 1_200, window, 2).await.ok(), Some(None));
    }

    #[tokio::test]
    async fn test_key_expires_after_twice_the_window() {
        let store = MemoryCounterStore::new("t");
        let key = CounterKey::quota("alice", "upload");
        let window = Duration::from_secs(10);

        let _ = store.record(&key, &obs(0, 0), window).await;
        assert_eq!(store.key_count(), 1);
        store.purge_expired(19_999);
        assert_eq!(store.key_count(), 1);
        store.purge_expired(20_000);
        assert_eq!(store.key_count(), 0);
    }
}
