use std::time::Duration;

use crate::identity::IdentityError;
use crate::limiter::Reservation;

/// Limit and remaining budget of the most constrained counter that admitted a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateMeta {
    pub limit: u64,
    pub remaining: u64,
}

/// An admitted request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pass {
    /// Reported as `X-RateLimit-Limit`/`X-RateLimit-Remaining`
    pub meta: Option<RateMeta>,
    pub(crate) hold: Option<QuotaHold>,
}

impl Pass {
    /// Whether a quota slot is held and must be settled after the action
    pub fn holds_quota(&self) -> bool {
        self.hold.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QuotaHold {
    pub(crate) tracker: usize,
    pub(crate) reservation: Reservation,
}

/// A request over one of its limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Machine-readable code, `RATE_LIMIT_<TIER>` or `RATE_LIMIT_EXCEEDED`
    pub code: String,
    pub message: String,
    pub limit: u64,
    pub retry_after: Duration,
}

impl Rejection {
    pub const QUOTA_CODE: &'static str = "RATE_LIMIT_EXCEEDED";

    pub fn tier(tier: &str, limit: u64, retry_after: Duration) -> Self {
        Self {
            code: tier_code(tier),
            message: format!("Too many requests ({tier} limit reached). Please slow down."),
            limit,
            retry_after,
        }
    }

    pub fn quota(action: &str, limit: u64, retry_after: Duration) -> Self {
        Self {
            code: Self::QUOTA_CODE.to_string(),
            message: format!("Limit of {limit} {action} submissions per window reached."),
            limit,
            retry_after,
        }
    }
}

/// `burst` -> `RATE_LIMIT_BURST`, `per-day` -> `RATE_LIMIT_PER_DAY`
pub fn tier_code(tier: &str) -> String {
    let label: String = tier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("RATE_LIMIT_{label}")
}

/// Result of running a request through the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Continue(Pass),
    Reject(Rejection),
    Error(IdentityError),
}

impl Admission {
    pub fn is_continue(&self) -> bool {
        matches!(self, Admission::Continue(_))
    }
}
