//! # CRD Validation Tests
//!
//! Tests for the generated CRD and sample resources, to catch schema drift early.

use agent_operator::crd::{MonitoringPhase, MonitoringResource, ReconcileOutcome};
use kube::CustomResourceExt;

#[test]
fn test_crd_identity() {
    let crd = MonitoringResource::crd();

    assert_eq!(crd.spec.group, "monitoring.agent-operator.io");
    assert_eq!(crd.spec.names.kind, "MonitoringResource");
    assert_eq!(crd.spec.names.plural, "monitoringresources");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(
        crd.spec.names.short_names.as_deref(),
        Some(&["mr".to_string()][..])
    );
}

#[test]
fn test_crd_has_status_subresource() {
    let crd = MonitoringResource::crd();
    let version = crd
        .spec
        .versions
        .iter()
        .find(|v| v.name == "v1alpha1")
        .expect("v1alpha1 version should exist");

    assert!(version.served);
    assert!(version.storage);
    assert!(version
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());
    let columns: Vec<_> = version
        .additional_printer_columns
        .iter()
        .flatten()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(columns, ["Phase", "Version", "Ready"]);
}

#[test]
fn test_crd_yaml_renders() {
    let yaml = serde_yaml::to_string(&MonitoringResource::crd()).expect("CRD should serialize");
    assert!(yaml.contains("kind: CustomResourceDefinition"));
    assert!(yaml.contains("apiUrl"));
    assert!(yaml.contains("appInjection"));
}

#[test]
fn test_full_resource_deserializes() {
    let yaml = r#"
apiVersion: monitoring.agent-operator.io/v1alpha1
kind: MonitoringResource
metadata:
  name: production
  namespace: agent-operator
  generation: 3
spec:
  apiUrl: https://tenant.example.com/api
  tokens: production-tokens
  skipCertCheck: true
  enableIstio: true
  appInjection:
    enabled: true
    image: registry.example.com/installer:1.2.3
  fullStack:
    enabled: false
  dataIngest:
    enabled: true
  routing:
    enabled: false
status:
  phase: Running
  lastReconcileOutcome: Succeeded
  agentVersion: "1.2.3"
  tenantUuid: abc123
  communicationHosts:
    - protocol: https
      host: endpoint1
      port: 443
  dataIngestTokenValid: true
  observedGeneration: 3
  conditions:
    - type: Ready
      status: "True"
      reason: Reconciled
"#;

    let resource: MonitoringResource =
        serde_yaml::from_str(yaml).expect("should deserialize a complete resource");

    assert_eq!(resource.spec.tokens_secret_name("production"), "production-tokens");
    assert_eq!(
        resource.spec.app_injection.image.as_deref(),
        Some("registry.example.com/installer:1.2.3")
    );
    assert!(resource.spec.data_ingest.enabled);
    assert!(resource.spec.needs_api_host());

    let status = resource.status.expect("status should be present");
    assert_eq!(status.phase, Some(MonitoringPhase::Running));
    assert_eq!(status.last_reconcile_outcome, Some(ReconcileOutcome::Succeeded));
    assert_eq!(status.communication_hosts[0].to_string(), "https://endpoint1:443");
    assert!(status.data_ingest_token_valid);
}

#[test]
fn test_minimal_resource_uses_defaults() {
    let yaml = r#"
apiVersion: monitoring.agent-operator.io/v1alpha1
kind: MonitoringResource
metadata:
  name: staging
  namespace: agent-operator
spec:
  apiUrl: https://tenant.example.com/api
"#;

    let resource: MonitoringResource =
        serde_yaml::from_str(yaml).expect("should deserialize a minimal resource");

    assert_eq!(resource.spec.tokens_secret_name("staging"), "staging");
    assert!(resource.spec.app_injection.enabled);
    assert!(!resource.spec.full_stack.enabled);
    assert!(!resource.spec.data_ingest.enabled);
    assert!(!resource.spec.skip_cert_check);
    assert!(resource.spec.has_enabled_features());
    assert!(!resource.spec.needs_api_host());
    assert!(resource.status.is_none());
}

#[test]
fn test_resource_without_features() {
    let yaml = r#"
apiVersion: monitoring.agent-operator.io/v1alpha1
kind: MonitoringResource
metadata:
  name: idle
  namespace: agent-operator
spec:
  apiUrl: https://tenant.example.com/api
  appInjection:
    enabled: false
"#;

    let resource: MonitoringResource = serde_yaml::from_str(yaml).expect("should deserialize");
    assert!(!resource.spec.has_enabled_features());
}

#[test]
fn test_missing_api_url_is_rejected() {
    let yaml = r#"
apiVersion: monitoring.agent-operator.io/v1alpha1
kind: MonitoringResource
metadata:
  name: broken
  namespace: agent-operator
spec:
  tokens: broken
"#;

    let result: Result<MonitoringResource, _> = serde_yaml::from_str(yaml);
    assert!(result.is_err(), "apiUrl is required");
}
