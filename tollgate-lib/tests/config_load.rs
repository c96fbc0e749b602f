use std::io::Write;
use tempfile::NamedTempFile;
use tollgate_lib::config::{load_from_path, load_from_str, StoreBackend};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[test]
fn test_minimal_config_uses_defaults() -> TestResult {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
listen = "127.0.0.1:0"

[upstream]
address = "localhost:9000"

[store]
backend = "memory"
"#
    )?;

    let cfg = load_from_path(file.path())?;
    assert_eq!(cfg.upstream.address, "localhost:9000");
    assert_eq!(cfg.store.backend, StoreBackend::Memory);
    assert_eq!(cfg.store.key_prefix, "tollgate");
    assert_eq!(cfg.store.timeout_ms, 250);

    let tiers: Vec<(&str, u64, u64)> = cfg
        .tiers
        .iter()
        .map(|t| (t.name.as_str(), t.window_seconds, t.max_requests))
        .collect();
    assert_eq!(tiers, vec![("burst", 1, 50), ("minute", 60, 1800), ("hour", 3600, 72000)]);
    assert!(cfg.quotas.is_empty());
    assert!(!cfg.identity.trust_forwarded_for);
    assert_eq!(cfg.identity.user_header, "x-authenticated-user");
    assert_eq!(cfg.logging.level, "info");
    assert_eq!(cfg.telemetry.otel_log_level, "warn");
    assert_eq!(cfg.timeout.shutdown_secs, 30);
    Ok(())
}

#[test]
fn test_full_config() -> TestResult {
    let cfg = load_from_str(
        r#"
listen = "0.0.0.0:8080"

[upstream]
address = "api:9000"

[store]
backend = "redis"
url = "redis://127.0.0.1:6379/"
key_prefix = "gate"
timeout_ms = 100

[identity]
trust_forwarded_for = true
trusted_proxies = ["10.0.0.0/8", "::1/128"]
user_header = "x-user-id"

[[tiers]]
name = "burst"
window_seconds = 1
max_requests = 10

[[tiers]]
name = "minute"
window_seconds = 60
max_requests = 100

[[quotas]]
action = "daily-contribution"
path_prefix = "/api/contributions"
max_submissions = 5

[telemetry]
metrics_port = 9900
"#,
    )?;

    assert_eq!(cfg.store.url.as_deref(), Some("redis://127.0.0.1:6379/"));
    assert_eq!(cfg.identity.trusted_proxies.len(), 2);
    assert_eq!(cfg.tiers.len(), 2);
    let quota = cfg.quotas.first().ok_or("quota missing")?;
    assert_eq!(quota.window_ms, 86_400_000);
    assert_eq!(quota.method, "POST");
    assert!(quota.matches(&http::Method::POST, "/api/contributions/42"));
    assert!(!quota.matches(&http::Method::GET, "/api/contributions"));
    assert_eq!(cfg.telemetry.metrics_port, Some(9900));
    Ok(())
}

fn with_tiers(tiers: &str) -> String {
    format!(
        r#"
listen = "127.0.0.1:0"
[upstream]
address = "localhost:9000"
[store]
backend = "memory"
{tiers}
"#
    )
}

#[test]
fn test_invalid_limits_are_rejected() {
    let cases = [
        ("zero window", "[[tiers]]\nname = \"a\"\nwindow_seconds = 0\nmax_requests = 1\n"),
        ("zero max", "[[tiers]]\nname = \"a\"\nwindow_seconds = 1\nmax_requests = 0\n"),
        (
            "descending windows",
            "[[tiers]]\nname = \"a\"\nwindow_seconds = 60\nmax_requests = 1\n[[tiers]]\nname = \"b\"\nwindow_seconds = 1\nmax_requests = 1\n",
        ),
        (
            "duplicate tier",
            "[[tiers]]\nname = \"a\"\nwindow_seconds = 1\nmax_requests = 1\n[[tiers]]\nname = \"a\"\nwindow_seconds = 2\nmax_requests = 1\n",
        ),
        ("empty tiers", "tiers = []\n"),
        (
            "zero quota",
            "[[quotas]]\naction = \"x\"\npath_prefix = \"/x\"\nmax_submissions = 0\n",
        ),
        (
            "relative quota path",
            "[[quotas]]\naction = \"x\"\npath_prefix = \"x\"\nmax_submissions = 1\n",
        ),
    ];

    for (name, tiers) in cases {
        // `tiers = []` must precede any table header
        let text = if tiers.starts_with("tiers") {
            format!("tiers = []\n{}", with_tiers(""))
        } else {
            with_tiers(tiers)
        };
        assert!(load_from_str(&text).is_err(), "{name} should be rejected");
    }
}

#[test]
fn test_redis_backend_requires_url() {
    let text = r#"
listen = "127.0.0.1:0"
[upstream]
address = "localhost:9000"
"#;
    assert!(load_from_str(text).is_err());
}

#[test]
fn test_malformed_cidr_is_rejected() {
    let text = r#"
listen = "127.0.0.1:0"
[upstream]
address = "localhost:9000"
[store]
backend = "memory"
[identity]
trusted_proxies = ["10.0.0.0/33"]
"#;
    assert!(load_from_str(text).is_err());
}

#[test]
fn test_missing_file_is_config_error() {
    let err = load_from_path("/nonexistent/tollgate.toml");
    assert!(matches!(err, Err(tollgate_lib::TollgateError::Config(_))));
}

#[test]
fn test_shipped_config_is_valid() -> TestResult {
    let cfg = load_from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/../config/tollgate.toml"))?;
    assert_eq!(cfg.tiers.len(), 3);
    assert_eq!(cfg.quotas.len(), 1);
    Ok(())
}
