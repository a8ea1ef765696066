//! # Injection Decision
//!
//! Decides for one pod admission request whether and how to inject the agent.
//! The steps short-circuit in this order:
//!
//! 0. Anything but `CREATE` passes through
//! 1. A legacy `OneAgentAPM` object in the cluster blocks injection
//! 2. The pod must decode
//! 3. Opted-out and already injected pods pass through
//! 4. The namespace must be bound to an existing monitoring resource
//! 5. App injection must be enabled on that resource
//! 6. The init secret is provisioned on demand
//! 7. The data-ingest secret is provisioned when data ingest applies to the pod
//! 8. The patch is built
//!
//! The monitoring API is never called here; everything comes from the
//! resource status and the cluster.

use crate::binding::BindingError;
use crate::cluster::KubeError;
use crate::constants::{DATA_INGEST_INJECT_ANNOTATION, INJECTED_ANNOTATION, INJECT_ANNOTATION};
use crate::crd::MonitoringResource;
use crate::provisioner::{ProvisionError, SecretKind};
use crate::webhook::messages;
use crate::webhook::patch::{build_patch_operations, InjectionPlan};
use crate::webhook::WebhookState;
use json_patch::PatchOperation;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Result of one admission decision
#[derive(Debug, Clone, PartialEq)]
pub enum InjectionOutcome {
    /// Admit the pod unmodified
    PassThrough { reason: String },
    /// Admit the pod with these patch operations
    Patched { ops: Vec<PatchOperation> },
    /// Refuse the pod
    Denied { message: String },
    /// The decision could not be made; the pod is refused
    Errored { message: String },
}

impl InjectionOutcome {
    pub fn pass_through(reason: impl Into<String>) -> Self {
        InjectionOutcome::PassThrough {
            reason: reason.into(),
        }
    }

    /// Label used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            InjectionOutcome::PassThrough { .. } => "pass-through",
            InjectionOutcome::Patched { .. } => "patched",
            InjectionOutcome::Denied { .. } => "denied",
            InjectionOutcome::Errored { .. } => "errored",
        }
    }

    /// Render the outcome as the response to `request`
    pub fn into_response(self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let response = AdmissionResponse::from(request);
        match self {
            InjectionOutcome::PassThrough { reason } => {
                let mut response = response;
                response.result.message = reason;
                response
            }
            InjectionOutcome::Patched { ops } => {
                match response.with_patch(json_patch::Patch(ops)) {
                    Ok(response) => response,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize patch");
                        let mut response =
                            AdmissionResponse::from(request).deny(messages::FAILED_TO_SERIALIZE_PATCH);
                        response.result.code = 500;
                        response
                    }
                }
            }
            InjectionOutcome::Denied { message } => {
                let mut response = response.deny(message);
                response.result.code = 403;
                response
            }
            InjectionOutcome::Errored { message } => {
                let mut response = response.deny(message);
                response.result.code = 500;
                response
            }
        }
    }
}

/// Failures that turn into [`InjectionOutcome::Errored`]
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("{}", messages::FAILED_TO_QUERY_LEGACY_OBJECTS)]
    LegacyQuery(#[source] KubeError),

    #[error("{}", messages::FAILED_TO_DECODE_POD)]
    DecodePod { reason: String },

    #[error(transparent)]
    Binding(BindingError),

    #[error("{message}")]
    Provision {
        message: &'static str,
        #[source]
        source: ProvisionError,
    },
}

impl From<WebhookError> for InjectionOutcome {
    fn from(err: WebhookError) -> Self {
        InjectionOutcome::Errored {
            message: err.to_string(),
        }
    }
}

/// Decide the outcome for one admission request
pub async fn decide(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> InjectionOutcome {
    match decide_inner(state, request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let cause = match &e {
                WebhookError::LegacyQuery(source) => source.to_string(),
                WebhookError::DecodePod { reason } => reason.clone(),
                WebhookError::Binding(source) => std::error::Error::source(source)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                WebhookError::Provision { source, .. } => source.to_string(),
            };
            error!(error = %e, cause = %cause, "Admission decision failed");
            e.into()
        }
    }
}

async fn decide_inner(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<InjectionOutcome, WebhookError> {
    // Step 0
    if request.operation != Operation::Create {
        return Ok(InjectionOutcome::pass_through(messages::NOT_A_CREATE));
    }

    // Step 1
    if state
        .kube
        .legacy_objects_present()
        .await
        .map_err(WebhookError::LegacyQuery)?
    {
        warn!("Legacy OneAgentAPM object present, denying injection");
        return Ok(InjectionOutcome::Denied {
            message: messages::LEGACY_OBJECT_PRESENT.to_string(),
        });
    }

    // Step 2
    let pod = decode_pod(request)?;

    // Step 3
    let annotations = pod.annotations();
    if annotations.get(INJECT_ANNOTATION).map(String::as_str) == Some("false") {
        debug!("Pod opted out of injection");
        return Ok(InjectionOutcome::pass_through(messages::POD_OPTED_OUT));
    }
    if annotations.get(INJECTED_ANNOTATION).map(String::as_str) == Some("true") {
        debug!("Pod is already injected");
        return Ok(InjectionOutcome::pass_through(messages::POD_ALREADY_INJECTED));
    }

    // Step 4
    let namespace = request
        .namespace
        .clone()
        .or_else(|| pod.namespace())
        .unwrap_or_default();
    let resource = match state.resolver.resolve_bound(&namespace).await {
        Ok((_, resource)) => resource,
        Err(e) if e.is_configuration() => {
            debug!(namespace = %namespace, reason = %e, "Namespace is not monitored");
            return Ok(InjectionOutcome::pass_through(e.to_string()));
        }
        Err(e) => return Err(WebhookError::Binding(e)),
    };

    // Step 5
    if !resource.spec.app_injection.enabled {
        return Ok(InjectionOutcome::pass_through(
            messages::APP_INJECTION_DISABLED,
        ));
    }

    // Step 6
    ensure_secret(state, &resource, &namespace, SecretKind::Init).await?;

    // Step 7
    let data_ingest = resource.spec.data_ingest.enabled
        && annotations
            .get(DATA_INGEST_INJECT_ANNOTATION)
            .map(String::as_str)
            != Some("false");
    if data_ingest {
        ensure_secret(state, &resource, &namespace, SecretKind::DataIngest).await?;
    }

    // Step 8
    let plan = InjectionPlan {
        image: resource
            .spec
            .app_injection
            .image
            .clone()
            .filter(|image| !image.is_empty())
            .unwrap_or_else(|| state.config.installer_image.clone()),
        data_ingest,
    };
    let ops = build_patch_operations(&pod, &plan);

    let pod_name = pod
        .metadata
        .name
        .as_deref()
        .or(pod.metadata.generate_name.as_deref())
        .unwrap_or_default();
    info!(
        namespace = %namespace,
        pod = %pod_name,
        resource = %resource.name_any(),
        data_ingest,
        patch_ops = ops.len(),
        "Injecting agent into pod"
    );
    Ok(InjectionOutcome::Patched { ops })
}

fn decode_pod(request: &AdmissionRequest<DynamicObject>) -> Result<Pod, WebhookError> {
    let object = request.object.clone().ok_or_else(|| WebhookError::DecodePod {
        reason: "request carries no object".to_string(),
    })?;
    object
        .try_parse::<Pod>()
        .map_err(|e| WebhookError::DecodePod {
            reason: e.to_string(),
        })
}

async fn ensure_secret(
    state: &WebhookState,
    resource: &MonitoringResource,
    namespace: &str,
    kind: SecretKind,
) -> Result<(), WebhookError> {
    match state.provisioner.ensure(resource, namespace, kind).await {
        Ok(outcome) => {
            debug!(secret = %kind, outcome = outcome.as_str(), "Secret ready for injection");
            Ok(())
        }
        Err(source) => {
            let message = match (kind, &source) {
                (SecretKind::Init, ProvisionError::Query { .. }) => {
                    messages::FAILED_TO_QUERY_INIT_SECRET
                }
                (SecretKind::Init, _) => messages::FAILED_TO_CREATE_INIT_SECRET,
                (SecretKind::DataIngest, ProvisionError::Query { .. }) => {
                    messages::FAILED_TO_QUERY_DATA_INGEST_SECRET
                }
                (SecretKind::DataIngest, _) => messages::FAILED_TO_CREATE_DATA_INGEST_SECRET,
            };
            Err(WebhookError::Provision { message, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DATA_INGEST_SECRET_NAME, INIT_SECRET_NAME};
    use crate::testing::{ready_resource, FakeKube, TestEnvironment};
    use kube::core::admission::AdmissionReview;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn state(env: &TestEnvironment) -> WebhookState {
        WebhookState::new(Arc::<FakeKube>::clone(&env.kube), env.config.clone())
    }

    fn pod_json(annotations: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "generateName": "app-", "annotations": annotations },
            "spec": { "containers": [{ "name": "app", "image": "app:1" }] }
        })
    }

    fn admission(namespace: &str, operation: &str, object: Value) -> AdmissionRequest<DynamicObject> {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": { "group": "", "version": "v1", "kind": "Pod" },
                "resource": { "group": "", "version": "v1", "resource": "pods" },
                "namespace": namespace,
                "operation": operation,
                "userInfo": {},
                "object": object,
                "dryRun": false
            }
        }))
        .expect("valid admission review");
        review.try_into().expect("review carries a request")
    }

    fn create(namespace: &str) -> AdmissionRequest<DynamicObject> {
        admission(namespace, "CREATE", pod_json(json!({})))
    }

    /// Environment whose resource has been reconciled and whose namespace `app` is bound to it
    fn ready_environment(setup: impl FnOnce(&mut crate::crd::MonitoringResource)) -> TestEnvironment {
        let env = TestEnvironment::new(setup);
        env.kube.add_monitoring_resource(ready_resource(&env));
        env.kube.add_namespace("app", Some(env.resource_name.as_str()));
        env
    }

    fn errored(message: &str) -> InjectionOutcome {
        InjectionOutcome::Errored {
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_bound_namespace_is_injected() {
        let env = ready_environment(|_| {});

        let outcome = decide(&state(&env), &create("app")).await;

        assert!(matches!(&outcome, InjectionOutcome::Patched { ops } if !ops.is_empty()));
        assert!(env.kube.secret("app", INIT_SECRET_NAME).is_some());
        assert!(env.kube.secret("app", DATA_INGEST_SECRET_NAME).is_none());
    }

    #[tokio::test]
    async fn test_update_passes_through() {
        let env = ready_environment(|_| {});

        let outcome = decide(&state(&env), &admission("app", "UPDATE", pod_json(json!({})))).await;

        assert_eq!(outcome, InjectionOutcome::pass_through(messages::NOT_A_CREATE));
    }

    #[tokio::test]
    async fn test_legacy_object_blocks_injection() {
        let env = ready_environment(|_| {});
        env.kube.set_legacy_present(true);

        let outcome = decide(&state(&env), &create("app")).await;

        assert_eq!(
            outcome,
            InjectionOutcome::Denied {
                message: messages::LEGACY_OBJECT_PRESENT.to_string()
            }
        );
        assert!(env.kube.secret("app", INIT_SECRET_NAME).is_none());
    }

    #[tokio::test]
    async fn test_undecodable_pod_is_an_error() {
        let env = ready_environment(|_| {});
        let object = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "broken" },
            "spec": "not-a-pod-spec"
        });

        let outcome = decide(&state(&env), &admission("app", "CREATE", object)).await;

        assert_eq!(outcome, errored(messages::FAILED_TO_DECODE_POD));
    }

    #[tokio::test]
    async fn test_opted_out_and_injected_pods_pass_through() {
        let env = ready_environment(|_| {});
        let state = state(&env);

        let opted_out = admission(
            "app",
            "CREATE",
            pod_json(json!({ INJECT_ANNOTATION: "false" })),
        );
        assert_eq!(
            decide(&state, &opted_out).await,
            InjectionOutcome::pass_through(messages::POD_OPTED_OUT)
        );

        let injected = admission(
            "app",
            "CREATE",
            pod_json(json!({ INJECTED_ANNOTATION: "true" })),
        );
        assert_eq!(
            decide(&state, &injected).await,
            InjectionOutcome::pass_through(messages::POD_ALREADY_INJECTED)
        );
        assert!(env.kube.secret("app", INIT_SECRET_NAME).is_none());
    }

    #[tokio::test]
    async fn test_unlabelled_namespace_passes_through_with_message() {
        let env = ready_environment(|_| {});
        env.kube.add_namespace("unbound", None);

        let outcome = decide(&state(&env), &create("unbound")).await;

        assert_eq!(
            outcome,
            InjectionOutcome::pass_through("namespace 'unbound' has no monitoring resource label")
        );
        assert!(env.kube.secret("unbound", INIT_SECRET_NAME).is_none());
    }

    #[tokio::test]
    async fn test_missing_resource_names_both_sides() {
        let env = ready_environment(|_| {});
        env.kube.add_namespace("orphan", Some("other"));

        let outcome = decide(&state(&env), &create("orphan")).await;

        assert_eq!(
            outcome,
            InjectionOutcome::pass_through(
                "monitoring resource 'other' is assigned to namespace 'orphan', but monitoring resource 'other' does not exist"
            )
        );
    }

    #[tokio::test]
    async fn test_namespace_query_failure_is_an_error() {
        let env = ready_environment(|_| {});
        env.kube.fail_namespace_reads(true);

        let outcome = decide(&state(&env), &create("app")).await;

        assert_eq!(outcome, errored("failed to query namespace"));
    }

    #[tokio::test]
    async fn test_disabled_app_injection_passes_through() {
        let env = ready_environment(|r| r.spec.app_injection.enabled = false);

        let outcome = decide(&state(&env), &create("app")).await;

        assert_eq!(
            outcome,
            InjectionOutcome::pass_through(messages::APP_INJECTION_DISABLED)
        );
        assert!(env.kube.secret("app", INIT_SECRET_NAME).is_none());
    }

    #[tokio::test]
    async fn test_unreconciled_resource_fails_closed() {
        let env = TestEnvironment::new(|_| {});
        env.kube.add_namespace("app", Some(env.resource_name.as_str()));

        let outcome = decide(&state(&env), &create("app")).await;

        assert_eq!(outcome, errored(messages::FAILED_TO_CREATE_INIT_SECRET));
    }

    #[tokio::test]
    async fn test_init_secret_query_failure() {
        let env = ready_environment(|_| {});
        env.kube.fail_secret_reads(true);

        let outcome = decide(&state(&env), &create("app")).await;

        assert_eq!(outcome, errored(messages::FAILED_TO_QUERY_INIT_SECRET));
    }

    #[tokio::test]
    async fn test_data_ingest_secret_is_provisioned() {
        let env = ready_environment(|r| r.spec.data_ingest.enabled = true);

        let outcome = decide(&state(&env), &create("app")).await;

        assert!(matches!(outcome, InjectionOutcome::Patched { .. }));
        assert!(env.kube.secret("app", DATA_INGEST_SECRET_NAME).is_some());
    }

    #[tokio::test]
    async fn test_data_ingest_without_export_scope_fails_closed() {
        let env = ready_environment(|r| r.spec.data_ingest.enabled = true);
        let mut resource = env.resource();
        if let Some(status) = resource.status.as_mut() {
            status.data_ingest_token_valid = false;
        }
        env.kube.add_monitoring_resource(resource);

        let outcome = decide(&state(&env), &create("app")).await;

        assert_eq!(outcome, errored(messages::FAILED_TO_CREATE_DATA_INGEST_SECRET));
        assert!(env.kube.secret("app", INIT_SECRET_NAME).is_some());
        assert!(env.kube.secret("app", DATA_INGEST_SECRET_NAME).is_none());
    }

    #[tokio::test]
    async fn test_pod_can_opt_out_of_data_ingest() {
        let env = ready_environment(|r| r.spec.data_ingest.enabled = true);
        let request = admission(
            "app",
            "CREATE",
            pod_json(json!({ DATA_INGEST_INJECT_ANNOTATION: "false" })),
        );

        let outcome = decide(&state(&env), &request).await;

        assert!(matches!(outcome, InjectionOutcome::Patched { .. }));
        assert!(env.kube.secret("app", DATA_INGEST_SECRET_NAME).is_none());
    }

    #[test]
    fn test_outcomes_render_into_responses() {
        let request = create("app");

        let passed = InjectionOutcome::pass_through("not monitored").into_response(&request);
        assert!(passed.allowed);
        assert!(passed.patch.is_none());
        assert_eq!(passed.result.message, "not monitored");

        let denied = InjectionOutcome::Denied {
            message: messages::LEGACY_OBJECT_PRESENT.to_string(),
        }
        .into_response(&request);
        assert!(!denied.allowed);
        assert_eq!(denied.result.code, 403);

        let failed = errored(messages::FAILED_TO_DECODE_POD).into_response(&request);
        assert!(!failed.allowed);
        assert_eq!(failed.result.code, 500);
        assert_eq!(failed.result.message, messages::FAILED_TO_DECODE_POD);

        let patched = InjectionOutcome::Patched { ops: vec![] }.into_response(&request);
        assert!(patched.allowed);
        assert_eq!(patched.patch.as_deref(), Some(b"[]".as_slice()));
    }
}
