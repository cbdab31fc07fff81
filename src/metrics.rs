//! Prometheus metrics of the DR subsystem
//!
//! Metrics live in a registry owned by [`DrMetrics`] rather than the process
//! default, so tests and several operators in one process stay independent.

use crate::crd::DrMode;
use crate::error::{Error, Result};
use crate::replication::ReplicationVerdict;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Outcome label of a switchover or restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Switchover, watcher and health metrics
pub struct DrMetrics {
    registry: Registry,
    switchovers: IntCounterVec,
    switchover_duration: HistogramVec,
    watcher_restarts: IntCounterVec,
    verdict: IntGaugeVec,
}

impl DrMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let switchovers = IntCounterVec::new(
            Opts::new("opensearch_dr_switchovers_total", "Switchovers by target mode and result"),
            &["mode", "result"],
        )
        .map_err(metrics_error)?;
        let switchover_duration = HistogramVec::new(
            HistogramOpts::new(
                "opensearch_dr_switchover_duration_seconds",
                "Duration of switchovers",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["mode"],
        )
        .map_err(metrics_error)?;
        let watcher_restarts = IntCounterVec::new(
            Opts::new(
                "opensearch_dr_watcher_restarts_total",
                "Replication restarts performed by the watcher",
            ),
            &["result"],
        )
        .map_err(metrics_error)?;
        let verdict = IntGaugeVec::new(
            Opts::new(
                "opensearch_dr_replication_verdict",
                "Last replication verdict (1 for the current verdict)",
            ),
            &["verdict"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(switchovers.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(switchover_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(watcher_restarts.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(verdict.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            switchovers,
            switchover_duration,
            watcher_restarts,
            verdict,
        })
    }

    pub fn record_switchover(&self, mode: DrMode, outcome: Outcome, elapsed: Duration) {
        self.switchovers
            .with_label_values(&[mode.as_str(), outcome.as_str()])
            .inc();
        self.switchover_duration
            .with_label_values(&[mode.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_watcher_restart(&self, outcome: Outcome) {
        self.watcher_restarts
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn set_verdict(&self, verdict: ReplicationVerdict) {
        for candidate in [
            ReplicationVerdict::Up,
            ReplicationVerdict::Degraded,
            ReplicationVerdict::Down,
        ] {
            self.verdict
                .with_label_values(&[candidate.as_str()])
                .set(i64::from(candidate == verdict));
        }
    }

    pub fn switchover_count(&self, mode: DrMode, outcome: Outcome) -> u64 {
        self.switchovers
            .with_label_values(&[mode.as_str(), outcome.as_str()])
            .get()
    }

    pub fn watcher_restart_count(&self, outcome: Outcome) -> u64 {
        self.watcher_restarts
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    /// Text exposition of every metric
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics error: {}", e))
}
