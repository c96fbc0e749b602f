use http::{HeaderMap, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use super::outcome::{Admission, Pass, QuotaHold, RateMeta, Rejection};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Result, TollgateError};
use crate::identity::{IdentityError, IdentityResolver};
use crate::limiter::{QuotaTracker, QuotaVerdict, TierEvaluator};
use crate::store::StoreAdapter;
use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;

/// Request line and headers the gate decides on
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub peer: Option<SocketAddr>,
}

/// Admission middleware: identity resolution, tier evaluation and quota reservation.
///
/// Every request is evaluated against the tiers under its network identity.
/// A request that also matches a quota is then charged against the quota of
/// its authenticated user.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    resolver: IdentityResolver,
    tiers: TierEvaluator,
    quotas: Arc<[QuotaTracker]>,
    metrics: Option<Arc<Metrics>>,
}

impl AdmissionGate {
    pub fn new(resolver: IdentityResolver, tiers: TierEvaluator, quotas: Vec<QuotaTracker>) -> Self {
        Self { resolver, tiers, quotas: quotas.into(), metrics: None }
    }

    pub fn from_config(config: &Config, adapter: StoreAdapter, clock: Arc<dyn Clock>) -> Result<Self> {
        let resolver = IdentityResolver::new(config.identity.clone()).map_err(TollgateError::Config)?;
        let tiers = TierEvaluator::new(&config.tiers, adapter.clone(), clock.clone())?;
        let quotas = config
            .quotas
            .iter()
            .map(|q| QuotaTracker::new(q.clone(), adapter.clone(), clock.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(resolver, tiers, quotas))
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn tiers(&self) -> &TierEvaluator {
        &self.tiers
    }

    pub fn quotas(&self) -> &[QuotaTracker] {
        &self.quotas
    }

    /// Decide whether a request may proceed. Never retries; store failures admit.
    pub async fn admit(&self, req: RequestInfo<'_>) -> Admission {
        let start = Instant::now();
        let quota = self
            .quotas
            .iter()
            .position(|q| q.config().matches(req.method, req.path));
        let scope = if quota.is_some() { values::SCOPE_QUOTA } else { values::SCOPE_TIER };

        let admission = self.decide(req, quota).await;

        if let Some(m) = &self.metrics {
            let outcome = match &admission {
                Admission::Continue(_) => values::OUTCOME_CONTINUE,
                Admission::Reject(_) => values::OUTCOME_REJECT,
                Admission::Error(_) => values::OUTCOME_ERROR,
            };
            m.record_admission(scope, outcome, start.elapsed().as_secs_f64());
        }
        admission
    }

    async fn decide(&self, req: RequestInfo<'_>, quota: Option<usize>) -> Admission {
        let Some(network) = self.resolver.network(req.peer, req.headers) else {
            return Admission::Error(IdentityError::NETWORK);
        };
        // Resolve the user before counting so a malformed quota request costs nothing
        let user = match quota {
            Some(_) => match self.resolver.user(req.headers) {
                Some(user) => Some(user),
                None => return Admission::Error(IdentityError::USER),
            },
            None => None,
        };

        let decision = self.tiers.evaluate(&network).await;
        if !decision.allowed {
            let tier = decision.violated_tier.as_deref().unwrap_or_default();
            if let Some(m) = &self.metrics {
                m.record_tier_rejection(tier);
            }
            return Admission::Reject(Rejection::tier(
                tier,
                decision.limit.unwrap_or_default(),
                decision.retry_after.unwrap_or_default(),
            ));
        }
        let tier_meta = decision
            .limit
            .zip(decision.remaining)
            .map(|(limit, remaining)| RateMeta { limit, remaining });

        let (Some(index), Some(user)) = (quota, user) else {
            return Admission::Continue(Pass { meta: tier_meta, hold: None });
        };
        let tracker = &self.quotas[index];

        match tracker.reserve(&user).await {
            QuotaVerdict::Granted(reservation) => {
                self.record_quota(tracker, values::QUOTA_GRANTED);
                let meta = RateMeta { limit: reservation.limit, remaining: reservation.remaining };
                Admission::Continue(Pass {
                    meta: Some(meta),
                    hold: Some(QuotaHold { tracker: index, reservation }),
                })
            }
            QuotaVerdict::Exhausted { limit, retry_after } => {
                self.record_quota(tracker, values::QUOTA_EXHAUSTED);
                debug!(action = %tracker.action(), user = %user, "quota exhausted");
                Admission::Reject(Rejection::quota(tracker.action(), limit, retry_after))
            }
            QuotaVerdict::Unavailable { .. } => {
                self.record_quota(tracker, values::QUOTA_UNAVAILABLE);
                Admission::Continue(Pass { meta: tier_meta, hold: None })
            }
        }
    }

    /// Settle a pass once the downstream action finished.
    ///
    /// A held quota slot is released unless the action succeeded.
    pub async fn settle(&self, pass: &Pass, succeeded: bool) {
        let Some(hold) = &pass.hold else {
            return;
        };
        if succeeded {
            return;
        }
        let Some(tracker) = self.quotas.get(hold.tracker) else {
            return;
        };
        if tracker.release(&hold.reservation).await {
            self.record_quota(tracker, values::QUOTA_RELEASED);
            debug!(action = %tracker.action(), "quota reservation released after failed action");
        }
    }

    fn record_quota(&self, tracker: &QuotaTracker, result: &'static str) {
        if let Some(m) = &self.metrics {
            m.record_quota(tracker.action(), result);
        }
    }
}
