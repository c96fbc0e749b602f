use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{validate_tiers, TierConfig};
use crate::error::{Result, TollgateError};
use crate::identity::Identity;
use crate::store::{window_ms, CounterKey, Reading, StoreAdapter};

/// One validated sliding-window tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub name: String,
    pub window: Duration,
    pub max_requests: u64,
}

impl From<&TierConfig> for Tier {
    fn from(config: &TierConfig) -> Self {
        Self {
            name: config.name.clone(),
            window: Duration::from_secs(config.window_seconds),
            max_requests: config.max_requests,
        }
    }
}

/// Combined admission decision over every tier
///
/// `limit`/`remaining` describe the most constrained tier that could be
/// consulted. They are `None` when no tier produced a count.
///
/// On rejection `retry_after` is the time until enough observations leave
/// the violated tier's window for one more request to fit. If the store
/// cannot say when that is, it falls back to the whole window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub violated_tier: Option<String>,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub retry_after: Option<Duration>,
}

impl Decision {
    fn allow(limit: Option<u64>, remaining: Option<u64>) -> Self {
        Self { allowed: true, violated_tier: None, limit, remaining, retry_after: None }
    }

    fn reject(tier: &Tier) -> Self {
        Self {
            allowed: false,
            violated_tier: Some(tier.name.clone()),
            limit: Some(tier.max_requests),
            remaining: Some(0),
            retry_after: Some(tier.window),
        }
    }
}

/// Multi-tier sliding-window limiter for one scope of traffic
#[derive(Debug, Clone)]
pub struct TierEvaluator {
    tiers: Arc<[Tier]>,
    adapter: StoreAdapter,
    clock: Arc<dyn Clock>,
}

impl TierEvaluator {
    /// Tiers must be ordered tightest-first; invalid sets are a startup error
    pub fn new(tiers: &[TierConfig], adapter: StoreAdapter, clock: Arc<dyn Clock>) -> Result<Self> {
        validate_tiers(tiers).map_err(TollgateError::Config)?;
        let tiers: Vec<Tier> = tiers.iter().map(Tier::from).collect();
        Ok(Self { tiers: tiers.into(), adapter, clock })
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Record one request for `identity` in every tier and decide admission.
    ///
    /// All tiers are recorded, concurrently, before any is evaluated, so a
    /// request rejected by a tight tier still counts against the looser ones.
    pub async fn evaluate(&self, identity: &Identity) -> Decision {
        let now_ms = self.clock.now_ms();
        let readings = join_all(self.tiers.iter().map(|tier| {
            let key = CounterKey::tier(identity.as_str(), &tier.name);
            async move { self.adapter.record_and_count(&key, now_ms, tier.window).await }
        }))
        .await;

        let mut decision = decide(&self.tiers, &readings);
        if let Some(name) = decision.violated_tier.clone() {
            tracing::debug!(identity = %identity, tier = %name, "request over tier limit");
            let violated = self.tiers.iter().zip(&readings).find(|(tier, _)| tier.name == name);
            if let Some((tier, Reading::Counted(count))) = violated {
                if let Some(wait) = self.wait_for_slot(identity, tier, *count, now_ms).await {
                    decision.retry_after = Some(wait);
                }
            }
        }
        decision
    }

    /// Time until the window holds `max_requests - 1` observations, so the
    /// next request fits. That is when the observation at rank
    /// `count - max_requests` (oldest first) leaves the window.
    async fn wait_for_slot(&self, identity: &Identity, tier: &Tier, count: u64, now_ms: u64) -> Option<Duration> {
        let key = CounterKey::tier(identity.as_str(), &tier.name);
        let rank = count.saturating_sub(tier.max_requests);
        let at_ms = self.adapter.nth_oldest(&key, now_ms, tier.window, rank).await?;
        let frees_at = at_ms.saturating_add(window_ms(tier.window));
        Some(Duration::from_millis(frees_at.saturating_sub(now_ms)).min(tier.window))
    }

    /// Current count of every tier for `identity`, without recording
    pub async fn counts(&self, identity: &Identity) -> Vec<(String, Reading)> {
        let now_ms = self.clock.now_ms();
        let readings = join_all(self.tiers.iter().map(|tier| {
            let key = CounterKey::tier(identity.as_str(), &tier.name);
            async move { self.adapter.count(&key, now_ms, tier.window).await }
        }))
        .await;

        self.tiers.iter().map(|t| t.name.clone()).zip(readings).collect()
    }
}

/// Walk tiers tightest-first; the first one over its limit wins.
///
/// Unknown readings count as zero.
fn decide(tiers: &[Tier], readings: &[Reading]) -> Decision {
    let mut tightest: Option<(u64, u64)> = None;

    for (tier, reading) in tiers.iter().zip(readings) {
        let Reading::Counted(count) = *reading else {
            continue;
        };
        if count > tier.max_requests {
            return Decision::reject(tier);
        }
        let remaining = tier.max_requests - count;
        if tightest.map_or(true, |(_, r)| remaining < r) {
            tightest = Some((tier.max_requests, remaining));
        }
    }

    Decision::allow(tightest.map(|(l, _)| l), tightest.map(|(_, r)| r))
}
