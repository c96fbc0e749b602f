use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

pub mod labels {
    pub const ERROR_TYPE: &str = "error_type";
    pub const STATUS_CODE: &str = "status_code";
    pub const METHOD: &str = "method";
    pub const SCOPE: &str = "scope";
    pub const OUTCOME: &str = "outcome";
    pub const TIER: &str = "tier";
    pub const ACTION: &str = "action";
    pub const RESULT: &str = "result";
    pub const OPERATION: &str = "operation";
    pub const BACKEND_ADDRESS: &str = "backend_address";
    pub const VERSION: &str = "version";
    pub const RUST_VERSION: &str = "rust_version";
}

pub mod values {
    pub const SCOPE_TIER: &str = "tier";
    pub const SCOPE_QUOTA: &str = "quota";
    pub const OUTCOME_CONTINUE: &str = "continue";
    pub const OUTCOME_REJECT: &str = "reject";
    pub const OUTCOME_ERROR: &str = "error";
    pub const QUOTA_GRANTED: &str = "granted";
    pub const QUOTA_EXHAUSTED: &str = "exhausted";
    pub const QUOTA_UNAVAILABLE: &str = "unavailable";
    pub const QUOTA_RELEASED: &str = "released";
}

#[derive(Clone)]
pub struct Metrics {
    pub connections_total: Counter<u64>,
    pub connections_active: UpDownCounter<i64>,

    pub requests_total: Counter<u64>,
    pub requests_duration_seconds: Histogram<f64>,

    // Admission
    pub admission_decisions_total: Counter<u64>,
    pub admission_duration_seconds: Histogram<f64>,
    pub tier_rejections_total: Counter<u64>,
    // result label: "granted" | "exhausted" | "unavailable" | "released"
    pub quota_reservations_total: Counter<u64>,

    // Counter store health
    pub store_failures_total: Counter<u64>,
    pub store_outages_total: Counter<u64>,

    pub backend_requests_total: Counter<u64>,
    pub backend_errors_total: Counter<u64>,
    pub backend_duration_seconds: Histogram<f64>,

    pub build_info: Gauge<u64>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            connections_total: meter
                .u64_counter("tollgate_connections_total")
                .with_description("Total number of connections established")
                .build(),
            connections_active: meter
                .i64_up_down_counter("tollgate_connections_active")
                .with_description("Number of active connections")
                .build(),

            requests_total: meter
                .u64_counter("tollgate_requests_total")
                .with_description("Total number of requests processed")
                .build(),
            requests_duration_seconds: meter
                .f64_histogram("tollgate_requests_duration_seconds")
                .with_description("Request duration in seconds")
                .build(),

            admission_decisions_total: meter
                .u64_counter("tollgate_admission_decisions_total")
                .with_description("Admission outcomes. scope=tier|quota, outcome=continue|reject|error")
                .build(),
            admission_duration_seconds: meter
                .f64_histogram("tollgate_admission_duration_seconds")
                .with_description("Time spent deciding admission, including counter store round-trips")
                .build(),
            tier_rejections_total: meter
                .u64_counter("tollgate_tier_rejections_total")
                .with_description("Requests rejected per violated tier")
                .build(),
            quota_reservations_total: meter
                .u64_counter("tollgate_quota_reservations_total")
                .with_description("Quota reservations. result=granted|exhausted|unavailable|released")
                .build(),

            store_failures_total: meter
                .u64_counter("tollgate_store_failures_total")
                .with_description("Counter store calls that failed or timed out")
                .build(),
            store_outages_total: meter
                .u64_counter("tollgate_store_outages_total")
                .with_description("Counter store outage episodes (admitting without enforcement)")
                .build(),

            backend_requests_total: meter
                .u64_counter("tollgate_backend_requests_total")
                .with_description("Total number of requests forwarded upstream")
                .build(),
            backend_errors_total: meter
                .u64_counter("tollgate_backend_errors_total")
                .with_description("Total number of upstream errors")
                .build(),
            backend_duration_seconds: meter
                .f64_histogram("tollgate_backend_duration_seconds")
                .with_description("Upstream request duration in seconds")
                .build(),

            build_info: meter
                .u64_gauge("tollgate_build_info")
                .with_description("Build information (version, rust version)")
                .build(),
        }
    }

    /// Set build info metric with version labels
    pub fn set_build_info(&self) {
        let version = env!("CARGO_PKG_VERSION");
        let rust_version = env!("CARGO_PKG_RUST_VERSION");

        self.build_info.record(
            1,
            &[
                KeyValue::new(labels::VERSION, version),
                KeyValue::new(labels::RUST_VERSION, rust_version),
            ],
        );
    }

    pub fn record_admission(&self, scope: &'static str, outcome: &'static str, duration: f64) {
        self.admission_decisions_total.add(
            1,
            &[KeyValue::new(labels::SCOPE, scope), KeyValue::new(labels::OUTCOME, outcome)],
        );
        self.admission_duration_seconds
            .record(duration, &[KeyValue::new(labels::SCOPE, scope)]);
    }

    pub fn record_tier_rejection(&self, tier: &str) {
        self.tier_rejections_total
            .add(1, &[KeyValue::new(labels::TIER, tier.to_string())]);
    }

    pub fn record_quota(&self, action: &str, result: &'static str) {
        self.quota_reservations_total.add(
            1,
            &[KeyValue::new(labels::ACTION, action.to_string()), KeyValue::new(labels::RESULT, result)],
        );
    }

    /// Count a failed store call; `new_episode` marks the first failure of an outage
    pub fn record_store_failure(&self, operation: &str, new_episode: bool) {
        self.store_failures_total
            .add(1, &[KeyValue::new(labels::OPERATION, operation.to_string())]);
        if new_episode {
            self.store_outages_total.add(1, &[]);
        }
    }

    pub fn record_connection_opened(&self) {
        self.connections_total.add(1, &[]);
        self.connections_active.add(1, &[]);
    }

    pub fn record_connection_closed(&self) {
        self.connections_active.add(-1, &[]);
    }

    pub fn record_request(&self, method: &str, status_code: u16, duration: f64) {
        let attrs = &[
            KeyValue::new(labels::METHOD, method.to_string()),
            KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
        ];
        self.requests_total.add(1, attrs);
        self.requests_duration_seconds.record(duration, attrs);
    }

    pub fn record_backend_request(&self, backend: &str, status_code: u16, duration: f64) {
        let attrs = &[
            KeyValue::new(labels::BACKEND_ADDRESS, backend.to_string()),
            KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
        ];
        self.backend_requests_total.add(1, attrs);
        self.backend_duration_seconds.record(duration, attrs);
    }

    pub fn record_backend_error(&self, backend: &str, error_type: &str) {
        self.backend_errors_total.add(
            1,
            &[
                KeyValue::new(labels::BACKEND_ADDRESS, backend.to_string()),
                KeyValue::new(labels::ERROR_TYPE, error_type.to_string()),
            ],
        );
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("tollgate");
    let metrics = Arc::new(Metrics::new(meter));

    metrics.set_build_info();

    Ok((metrics, registry))
}
