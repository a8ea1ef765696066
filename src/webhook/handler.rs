//! HTTP handler for `POST /inject`.

use crate::config::TimeoutPolicy;
use crate::observability::metrics;
use crate::webhook::messages;
use crate::webhook::mutation::{decide, InjectionOutcome};
use crate::webhook::WebhookState;
use axum::{extract::State, Json};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info_span, warn, Instrument};

/// Handle a pod admission review
///
/// The decision runs under the configured deadline. When it expires the
/// configured [`TimeoutPolicy`] decides the answer.
pub async fn inject_handler(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            metrics::record_admission("invalid", 0.0);
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let span = info_span!(
        "admission",
        uid = %request.uid,
        namespace = request.namespace.as_deref().unwrap_or_default(),
        operation = ?request.operation,
    );

    let start = Instant::now();
    let outcome = match tokio::time::timeout(
        state.config.admission_timeout(),
        decide(&state, &request).instrument(span.clone()),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            span.in_scope(|| {
                warn!(
                    timeout_ms = state.config.admission_timeout_ms,
                    policy = ?state.config.admission_timeout_policy,
                    "Admission decision timed out"
                );
            });
            timeout_outcome(state.config.admission_timeout_policy)
        }
    };
    metrics::record_admission(outcome.as_str(), start.elapsed().as_secs_f64());

    span.in_scope(|| debug!(outcome = outcome.as_str(), "Admission decided"));
    Json(outcome.into_response(&request).into_review())
}

/// Outcome used when the decision deadline expires
pub fn timeout_outcome(policy: TimeoutPolicy) -> InjectionOutcome {
    match policy {
        TimeoutPolicy::Reject => InjectionOutcome::Errored {
            message: messages::ADMISSION_TIMED_OUT.to_string(),
        },
        TimeoutPolicy::PassThrough => InjectionOutcome::pass_through(messages::ADMISSION_TIMED_OUT),
    }
}
