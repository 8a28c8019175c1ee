//! Prometheus metrics of the control loop.

use crate::error::ControllerError;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::time::Instant;

/// Counters and histograms updated by the reconciler.
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Passes by result: `success` or an error kind
    pub reconciliations: IntCounterVec,
    /// Wall time of one pass, in seconds
    pub reconcile_duration: Histogram,
    /// Applied dependent object changes by verb and kind
    pub actions: IntCounterVec,
}

impl Metrics {
    /// Builds the unregistered metric set.
    pub fn new() -> Result<Self, prometheus::Error> {
        let reconciliations = IntCounterVec::new(
            Opts::new(
                "storageos_operator_reconciliations_total",
                "Reconciliation passes by result",
            ),
            &["result"],
        )?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "storageos_operator_reconcile_duration_seconds",
                "Duration of reconciliation passes",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        let actions = IntCounterVec::new(
            Opts::new(
                "storageos_operator_actions_total",
                "Dependent object changes applied",
            ),
            &["verb", "kind"],
        )?;
        Ok(Self {
            reconciliations,
            reconcile_duration,
            actions,
        })
    }

    /// Registers every metric and hands the set back.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.actions.clone()))?;
        Ok(self)
    }

    pub fn reconcile_success(&self) {
        self.reconciliations.with_label_values(&["success"]).inc();
    }

    /// Counts a failed pass under the error's kind.
    pub fn reconcile_failure(&self, error: &ControllerError) {
        self.reconciliations.with_label_values(&[error.kind()]).inc();
    }

    pub fn action_applied(&self, verb: &str, kind: &str) {
        self.actions.with_label_values(&[verb, kind]).inc();
    }

    /// Starts timing a pass; the duration is recorded when the guard drops.
    pub fn measure(&self) -> ReconcileMeasurer {
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
        }
    }
}

/// Records the elapsed time of a pass on drop.
#[derive(Debug)]
pub struct ReconcileMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        self.metric.observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ValidationError;

    #[test]
    fn test_register_and_count() {
        let registry = Registry::new();
        let metrics = Metrics::new().unwrap().register(&registry).unwrap();

        metrics.reconcile_success();
        metrics.reconcile_failure(&ControllerError::Validation(ValidationError::NodeCount { nodes: 0 }));
        metrics.action_applied("create", "ConfigMap");
        drop(metrics.measure());

        assert_eq!(metrics.reconciliations.with_label_values(&["success"]).get(), 1);
        assert_eq!(metrics.reconciliations.with_label_values(&["validation"]).get(), 1);
        assert_eq!(metrics.actions.with_label_values(&["create", "ConfigMap"]).get(), 1);
        assert_eq!(metrics.reconcile_duration.get_sample_count(), 1);

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains("storageos_operator_actions_total"));
        assert!(text.contains("storageos_operator_reconcile_duration_seconds_count 1"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        Metrics::new().unwrap().register(&registry).unwrap();
        assert!(Metrics::new().unwrap().register(&registry).is_err());
    }
}
