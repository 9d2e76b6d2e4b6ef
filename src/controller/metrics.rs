//! Prometheus metrics for reconcile passes

use crate::error::{Error, Result};
use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

pub struct Metrics {
    passes: IntCounterVec,
    changed: IntCounterVec,
    drain_ready_nodes: IntGauge,
    pass_duration: Histogram,
}

impl Metrics {
    /// Create the operator metrics and register them into `registry`.
    pub fn new(registry: &Registry) -> Result<Self> {
        let passes = IntCounterVec::new(
            Opts::new("storage_lifecycle_passes_total", "Reconcile passes by result"),
            &["result"],
        )
        .map_err(metrics_error)?;
        let changed = IntCounterVec::new(
            Opts::new(
                "storage_lifecycle_changed_total",
                "Passes that wrote to a resource category",
            ),
            &["category"],
        )
        .map_err(metrics_error)?;
        let drain_ready_nodes = IntGauge::new(
            "storage_lifecycle_drain_ready_nodes",
            "Nodes reported ready for maintenance",
        )
        .map_err(metrics_error)?;
        let pass_duration = Histogram::with_opts(
            HistogramOpts::new(
                "storage_lifecycle_pass_duration_seconds",
                "Duration of reconcile passes",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(passes.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(changed.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(drain_ready_nodes.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(pass_duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            passes,
            changed,
            drain_ready_nodes,
            pass_duration,
        })
    }

    pub fn observe_pass(&self, failed: bool, seconds: f64) {
        let result = if failed { "error" } else { "success" };
        self.passes.with_label_values(&[result]).inc();
        self.pass_duration.observe(seconds);
    }

    pub fn observe_changed(&self, category: &str) {
        self.changed.with_label_values(&[category]).inc();
    }

    pub fn set_drain_ready(&self, nodes: usize) {
        self.drain_ready_nodes.set(nodes as i64);
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}
