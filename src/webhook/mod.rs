//! # Admission Webhook
//!
//! Mutating admission webhook that injects the monitoring agent into pods
//! created in namespaces bound to a `MonitoringResource`.
//!
//! - `handler`: axum handler with the decision deadline
//! - `mutation`: the injection decision and its outcomes
//! - `patch`: JSON patch construction
//! - `messages`: texts returned to the API server

pub mod handler;
pub mod messages;
pub mod mutation;
pub mod patch;

pub use mutation::{decide, InjectionOutcome, WebhookError};
pub use patch::{build_patch_operations, InjectionPlan};

use crate::binding::NamespaceBindingResolver;
use crate::cluster::KubeClient;
use crate::config::OperatorConfig;
use crate::provisioner::SecretProvisioner;
use axum::{routing::post, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Cluster access for legacy-object detection
    pub kube: Arc<dyn KubeClient>,
    pub resolver: NamespaceBindingResolver,
    /// Provisions secrets on demand, sharing the controller's logic
    pub provisioner: SecretProvisioner,
    pub config: OperatorConfig,
}

impl std::fmt::Debug for WebhookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WebhookState {
    pub fn new(kube: Arc<dyn KubeClient>, config: OperatorConfig) -> Self {
        Self {
            resolver: NamespaceBindingResolver::new(
                Arc::clone(&kube),
                config.operator_namespace.clone(),
            ),
            provisioner: SecretProvisioner::new(Arc::clone(&kube)),
            kube,
            config,
        }
    }
}

/// Create the webhook router
///
/// - POST /inject - Decide injection for a pod create
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/inject", post(handler::inject_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
