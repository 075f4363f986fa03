//! Prometheus metrics for the provisioner
//!
//! Every instance owns its own registry so reconcilers built in tests never
//! collide on metric names.

use crate::domain::ports::ProvisionPhase;
use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

const NAMESPACE: &str = "fss_provisioner";

/// Counters and histograms updated by the reconciler
pub struct ProvisionerMetrics {
    registry: Registry,
    /// Phase transitions by target phase
    transitions: IntCounterVec,
    /// Backend calls by operation and result
    backend_calls: IntCounterVec,
    /// Backend call latency by operation
    backend_latency: HistogramVec,
    /// Attempts that failed with a retryable error
    retries: IntCounter,
    /// Claims rejected at admission
    rejected: IntCounter,
}

impl ProvisionerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let transitions = IntCounterVec::new(
            Opts::new("phase_transitions_total", "Provision phase transitions")
                .namespace(NAMESPACE),
            &["phase"],
        )
        .map_err(metrics_error)?;
        let backend_calls = IntCounterVec::new(
            Opts::new("backend_calls_total", "File storage backend calls").namespace(NAMESPACE),
            &["operation", "result"],
        )
        .map_err(metrics_error)?;
        let backend_latency = HistogramVec::new(
            HistogramOpts::new(
                "backend_call_duration_seconds",
                "File storage backend call latency",
            )
            .namespace(NAMESPACE),
            &["operation"],
        )
        .map_err(metrics_error)?;
        let retries = IntCounter::with_opts(
            Opts::new("retries_total", "Attempts that failed with a retryable error")
                .namespace(NAMESPACE),
        )
        .map_err(metrics_error)?;
        let rejected = IntCounter::with_opts(
            Opts::new("admission_rejections_total", "Claims rejected at admission")
                .namespace(NAMESPACE),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(transitions.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(backend_calls.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(backend_latency.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(retries.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(rejected.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            transitions,
            backend_calls,
            backend_latency,
            retries,
            rejected,
        })
    }

    pub fn record_transition(&self, phase: ProvisionPhase) {
        self.transitions
            .with_label_values(&[&phase.to_string()])
            .inc();
    }

    pub fn record_backend_call(&self, operation: &str, elapsed: Duration, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.backend_calls
            .with_label_values(&[operation, result])
            .inc();
        self.backend_latency
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_retry(&self) {
        self.retries.inc();
    }

    pub fn record_rejection(&self) {
        self.rejected.inc();
    }

    /// Number of transitions into `phase` so far
    pub fn transitions(&self, phase: ProvisionPhase) -> u64 {
        self.transitions
            .with_label_values(&[&phase.to_string()])
            .get()
    }

    pub fn retries(&self) -> u64 {
        self.retries.get()
    }

    pub fn rejections(&self) -> u64 {
        self.rejected.get()
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_encoding() {
        let metrics = ProvisionerMetrics::new().unwrap();
        metrics.record_transition(ProvisionPhase::Bound);
        metrics.record_transition(ProvisionPhase::Bound);
        metrics.record_retry();
        metrics.record_backend_call("create_export", Duration::from_millis(12), true);

        assert_eq!(metrics.transitions(ProvisionPhase::Bound), 2);
        assert_eq!(metrics.transitions(ProvisionPhase::Failed), 0);
        assert_eq!(metrics.retries(), 1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("fss_provisioner_phase_transitions_total{phase=\"Bound\"} 2"));
        assert!(text.contains("fss_provisioner_backend_calls_total"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = ProvisionerMetrics::new().unwrap();
        let b = ProvisionerMetrics::new().unwrap();
        a.record_rejection();
        assert_eq!(a.rejections(), 1);
        assert_eq!(b.rejections(), 0);
    }
}
