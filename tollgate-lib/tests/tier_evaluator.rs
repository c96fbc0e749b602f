mod common;

use common::{burst_and_minute, clock, memory_adapter, TestResult};
use futures_util::future::join_all;
use std::time::Duration;
use tollgate_lib::config::{default_tiers, TierConfig};
use tollgate_lib::store::Reading;
use tollgate_lib::{Identity, TierEvaluator};

fn identity(raw: &str) -> Result<Identity, String> {
    Identity::new(raw).ok_or_else(|| format!("invalid identity {raw:?}"))
}

#[tokio::test]
async fn test_burst_tier_rejects_51st_request() -> TestResult {
    let clock = clock();
    let (_, adapter) = memory_adapter();
    let evaluator = TierEvaluator::new(&burst_and_minute(), adapter, clock.clone())?;
    let caller = identity("203.0.113.7")?;

    let mut allowed = 0;
    let mut last = None;
    for _ in 0..51 {
        let decision = evaluator.evaluate(&caller).await;
        if decision.allowed {
            allowed += 1;
        }
        last = Some(decision);
        clock.advance(Duration::from_millis(17));
    }

    assert_eq!(allowed, 50);
    let last = last.ok_or("no decision")?;
    assert!(!last.allowed);
    assert_eq!(last.violated_tier.as_deref(), Some("burst"));
    assert_eq!(last.limit, Some(50));
    assert_eq!(last.remaining, Some(0));
    Ok(())
}

#[tokio::test]
async fn test_rejected_identity_recovers_after_window() -> TestResult {
    let clock = clock();
    let (_, adapter) = memory_adapter();
    let evaluator = TierEvaluator::new(&burst_and_minute(), adapter, clock.clone())?;
    let caller = identity("203.0.113.8")?;

    for _ in 0..51 {
        evaluator.evaluate(&caller).await;
    }
    assert!(!evaluator.evaluate(&caller).await.allowed);

    clock.advance(Duration::from_millis(1_001));
    let decision = evaluator.evaluate(&caller).await;
    assert!(decision.allowed, "burst window elapsed, expected admission: {decision:?}");
    Ok(())
}

#[tokio::test]
async fn test_minute_tier_enforced_below_burst_rate() -> TestResult {
    let clock = clock();
    let (_, adapter) = memory_adapter();
    let evaluator = TierEvaluator::new(&default_tiers(), adapter, clock.clone())?;
    let caller = identity("198.51.100.20")?;

    // 1800 requests at one per 33ms: about 30 per second, inside 59.4s
    for n in 0..1800 {
        let decision = evaluator.evaluate(&caller).await;
        assert!(decision.allowed, "request {n} rejected: {decision:?}");
        clock.advance(Duration::from_millis(33));
    }

    let decision = evaluator.evaluate(&caller).await;
    assert!(!decision.allowed);
    assert_eq!(decision.violated_tier.as_deref(), Some("minute"));
    // The second request (t0 + 33ms) must leave the minute window first
    assert_eq!(decision.retry_after, Some(Duration::from_millis(633)));
    Ok(())
}

#[tokio::test]
async fn test_all_tiers_accumulate_on_rejection() -> TestResult {
    let clock = clock();
    let (_, adapter) = memory_adapter();
    let evaluator = TierEvaluator::new(&burst_and_minute(), adapter, clock.clone())?;
    let caller = identity("192.0.2.44")?;

    for _ in 0..60 {
        evaluator.evaluate(&caller).await;
    }

    let counts = evaluator.counts(&caller).await;
    assert_eq!(
        counts,
        vec![
            ("burst".to_string(), Reading::Counted(60)),
            ("minute".to_string(), Reading::Counted(60)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_identities_are_counted_separately() -> TestResult {
    let clock = clock();
    let (_, adapter) = memory_adapter();
    let tiers = vec![TierConfig::new("burst", 1, 2)];
    let evaluator = TierEvaluator::new(&tiers, adapter, clock)?;
    let a = identity("10.0.0.1")?;
    let b = identity("10.0.0.2")?;

    for _ in 0..3 {
        evaluator.evaluate(&a).await;
    }
    assert!(!evaluator.evaluate(&a).await.allowed);
    assert!(evaluator.evaluate(&b).await.allowed);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_in_one_millisecond_are_all_counted() -> TestResult {
    let clock = clock();
    let (_, adapter) = memory_adapter();
    let evaluator = TierEvaluator::new(&burst_and_minute(), adapter, clock)?;
    let caller = identity("2001:db8::1")?;

    let decisions = join_all((0..80).map(|_| evaluator.evaluate(&caller))).await;
    let allowed = decisions.iter().filter(|d| d.allowed).count();

    assert_eq!(allowed, 50);
    assert_eq!(
        evaluator.counts(&caller).await.first().map(|(_, r)| *r),
        Some(Reading::Counted(80))
    );
    Ok(())
}

#[test]
fn test_invalid_tier_order_is_startup_error() {
    let (_, adapter) = memory_adapter();
    let tiers = vec![TierConfig::new("minute", 60, 1800), TierConfig::new("burst", 1, 50)];
    assert!(TierEvaluator::new(&tiers, adapter, clock()).is_err());
}
