//! # MonitoringResource Spec
//!
//! Main CRD specification types and default values.

use serde::{Deserialize, Serialize};

/// MonitoringResource Custom Resource Definition
///
/// One resource describes one monitored environment: the monitoring API it
/// talks to, the credential secret holding its tokens, and which agent
/// features are turned on. Namespaces opt in by carrying the label
/// `monitoring.agent-operator.io/instance=<resource name>`.
///
/// # Example
///
/// ```yaml
/// apiVersion: monitoring.agent-operator.io/v1alpha1
/// kind: MonitoringResource
/// metadata:
///   name: production
///   namespace: agent-operator
/// spec:
///   apiUrl: https://tenant.example.com/api
///   tokens: production-tokens
///   appInjection:
///     enabled: true
///   dataIngest:
///     enabled: true
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "MonitoringResource",
    group = "monitoring.agent-operator.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::MonitoringResourceStatus",
    shortname = "mr",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Version", "type":"string", "jsonPath":".status.agentVersion"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringResourceSpec {
    /// Base URL of the monitoring API, including the trailing `/api`
    pub api_url: String,
    /// Name of the credential secret in the resource namespace
    /// Defaults to the resource name
    #[serde(default)]
    pub tokens: Option<String>,
    /// Pod injection through the admission webhook
    #[serde(default)]
    pub app_injection: AppInjectionSpec,
    /// Host-level agent
    #[serde(default)]
    pub full_stack: FeatureToggle,
    /// Data-ingest endpoint routing into injected pods
    #[serde(default)]
    pub data_ingest: FeatureToggle,
    /// Route exposure; the API host is recorded in status when enabled
    #[serde(default)]
    pub routing: FeatureToggle,
    /// Record the API communication host for Istio egress objects
    #[serde(default)]
    pub enable_istio: bool,
    /// Disable TLS verification towards the monitoring API
    #[serde(default)]
    pub skip_cert_check: bool,
}

/// Application injection settings
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppInjectionSpec {
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Init container image; the operator's configured installer image is used when unset
    #[serde(default)]
    pub image: Option<String>,
}

impl Default for AppInjectionSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            image: None,
        }
    }
}

/// Simple on/off feature flag
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureToggle {
    #[serde(default)]
    pub enabled: bool,
}

/// Default value for boolean fields that default to true
pub fn default_true() -> bool {
    true
}

impl MonitoringResourceSpec {
    /// Name of the credential secret, falling back to the resource name
    pub fn tokens_secret_name<'a>(&'a self, resource_name: &'a str) -> &'a str {
        match self.tokens.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => resource_name,
        }
    }

    /// Whether any feature that needs the monitoring API is turned on
    pub fn has_enabled_features(&self) -> bool {
        self.app_injection.enabled || self.full_stack.enabled
    }

    /// Whether the API communication host must be resolved and recorded
    pub fn needs_api_host(&self) -> bool {
        self.routing.enabled || self.enable_istio
    }
}
