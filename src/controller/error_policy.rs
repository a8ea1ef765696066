//! # Error Policy
//!
//! Requeue decision for failed reconciliations.
//!
//! Failures are retried per resource with a Fibonacci backoff between the
//! configured minimum and maximum. A successful pass resets the sequence.

use crate::controller::reconciler::{ReconcileError, ReconcileRequest, Reconciler, TriggerSource};
use crate::crd::MonitoringResource;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

pub fn error_policy(
    obj: Arc<MonitoringResource>,
    error: &ReconcileError,
    ctx: Arc<Reconciler>,
) -> Action {
    let key = ReconcileRequest::from(obj.as_ref()).key();
    let (backoff_secs, error_count) = ctx.next_backoff(&key);

    metrics::increment_reconciliation_errors();

    error!(
        resource = %key,
        error = %error,
        backoff_secs,
        error_count,
        "Reconciliation failed, retrying with backoff"
    );

    ctx.requeue(TriggerSource::ErrorBackoff(Duration::from_secs(backoff_secs)))
}
