//! Prometheus metrics for stage runs, cascades and persistence.
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder, register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry,
};

#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Stage runs by `stage` and `outcome`.
    pub stage_runs: IntCounterVec,
    pub stage_duration: HistogramVec,
    /// Finished cascades by final `state`.
    pub cascades: IntCounterVec,
    pub active_cascades: IntGauge,
    pub persistence_failures: IntCounter,
}

impl Metrics {
    /// Registers every collector on a private registry.
    ///
    /// # Errors
    /// Returns an error if a collector fails to register.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        Ok(Self {
            stage_runs: register_int_counter_vec_with_registry!(
                "picto_stage_runs_total",
                "Stage executions by stage and outcome",
                &["stage", "outcome"],
                registry
            )?,
            stage_duration: register_histogram_vec_with_registry!(
                HistogramOpts::new(
                    "picto_stage_duration_seconds",
                    "Wall-clock duration of generation collaborator calls"
                )
                .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0, 160.0]),
                &["stage"],
                registry
            )?,
            cascades: register_int_counter_vec_with_registry!(
                "picto_cascades_total",
                "Finished cascades by final state",
                &["state"],
                registry
            )?,
            active_cascades: register_int_gauge_with_registry!(
                "picto_active_cascades",
                "Cascades currently running",
                registry
            )?,
            persistence_failures: register_int_counter_with_registry!(
                "picto_persistence_failures_total",
                "Failed writes to the key-value store",
                registry
            )?,
            registry,
        })
    }

    pub fn record_stage(&self, stage: &str, outcome: &str) {
        self.stage_runs.with_label_values(&[stage, outcome]).inc();
    }

    pub fn observe_stage_duration(&self, stage: &str, seconds: f64) {
        self.stage_duration.with_label_values(&[stage]).observe(seconds);
    }

    /// Text exposition format of everything registered here.
    #[must_use]
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }
}
