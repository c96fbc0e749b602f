//! Admission limiters built on the shared counter store.
//!
//! [`TierEvaluator`] enforces the multi-window traffic limits for network
//! identities; [`QuotaTracker`] enforces the long-horizon budget of one
//! guarded action per authenticated user.

mod quota;
mod tier;

pub use quota::{QuotaTracker, QuotaVerdict, Reservation};
pub use tier::{Decision, Tier, TierEvaluator};

use std::time::Duration;

/// Whole seconds a client should wait, rounded up and never zero
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}
