//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `agent_operator_reconciliations_total` - Total number of reconciliations
//! - `agent_operator_reconciliation_errors_total` - Total number of reconciliation errors
//! - `agent_operator_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `agent_operator_requeues_total` - Requeues by reason
//! - `agent_operator_admission_requests_total` - Admission decisions by outcome
//! - `agent_operator_admission_duration_seconds` - Duration of admission decisions
//! - `agent_operator_secret_provisions_total` - Managed secret writes by kind and outcome
//! - `agent_operator_monitoring_api_calls_total` - Monitoring API calls by operation and result
//! - `agent_operator_monitoring_api_call_duration_seconds` - Duration of monitoring API calls

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "agent_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "agent_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "agent_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "agent_operator_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static ADMISSION_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "agent_operator_admission_requests_total",
            "Total number of admission decisions by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create ADMISSION_REQUESTS_TOTAL metric - this should never happen")
});

static ADMISSION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "agent_operator_admission_duration_seconds",
            "Duration of admission decisions in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
    )
    .expect("Failed to create ADMISSION_DURATION metric - this should never happen")
});

static SECRET_PROVISIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "agent_operator_secret_provisions_total",
            "Total number of managed secret provisioning results by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create SECRET_PROVISIONS_TOTAL metric - this should never happen")
});

static MONITORING_API_CALLS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "agent_operator_monitoring_api_calls_total",
            "Total number of monitoring API calls by operation and result",
        ),
        &["operation", "result"],
    )
    .expect("Failed to create MONITORING_API_CALLS_TOTAL metric - this should never happen")
});

static MONITORING_API_CALL_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "agent_operator_monitoring_api_call_duration_seconds",
            "Duration of monitoring API calls in seconds by operation",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["operation"],
    )
    .expect("Failed to create MONITORING_API_CALL_DURATION metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_DURATION.clone()))?;
    REGISTRY.register(Box::new(SECRET_PROVISIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MONITORING_API_CALLS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MONITORING_API_CALL_DURATION.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_admission(outcome: &str, duration: f64) {
    ADMISSION_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    ADMISSION_DURATION.observe(duration);
}

pub fn increment_secret_provisions(kind: &str, outcome: &str) {
    SECRET_PROVISIONS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

pub fn observe_monitoring_api_call(operation: &str, result: &str, duration: f64) {
    MONITORING_API_CALLS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
    MONITORING_API_CALL_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}
