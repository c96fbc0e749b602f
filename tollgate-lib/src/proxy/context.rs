use std::sync::Arc;
use std::time::Duration;

use crate::admission::AdmissionGate;
use crate::config::Config;
use crate::proxy::client_pool::ClientPool;
use crate::telemetry::Metrics;

/// Everything a connection task needs to admit and forward requests
#[derive(Clone, Debug)]
pub struct GateContext {
    pub gate: AdmissionGate,
    pub upstream: String,
    pub pool: ClientPool,
    pub upstream_timeout: Duration,
    pub metrics: Option<Arc<Metrics>>,
}

impl GateContext {
    pub fn new(config: &Config, gate: AdmissionGate) -> Self {
        Self {
            gate,
            upstream: config.upstream.address.clone(),
            pool: ClientPool::new(&config.timeout, &config.upstream.pool),
            upstream_timeout: Duration::from_millis(config.timeout.upstream_ms),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.gate = self.gate.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }
}
