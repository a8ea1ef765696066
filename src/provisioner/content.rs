//! # Desired Secret Content
//!
//! Pure functions computing what a managed secret should contain. Content
//! depends only on the owning resource (spec and status) and its credentials.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use sha2::{Digest, Sha256};

use crate::constants::{
    CONTENT_HASH_ANNOTATION, DATA_INGEST_ENDPOINT_KEY, MANAGED_BY_LABEL, OPERATOR_NAME,
    OWNER_NAMESPACE_LABEL, OWNER_NAME_LABEL,
};
use crate::crd::MonitoringResource;
use crate::monitoring::Credentials;
use crate::provisioner::SecretKind;

/// Labels every managed secret carries
pub fn owner_labels(resource: &MonitoringResource) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string()),
        (OWNER_NAME_LABEL.to_string(), resource.name_any()),
        (
            OWNER_NAMESPACE_LABEL.to_string(),
            resource.namespace().unwrap_or_default(),
        ),
    ])
}

/// Payload of the init secret read by the installer init container
pub fn init_secret_data(
    resource: &MonitoringResource,
    credentials: &Credentials,
) -> BTreeMap<String, String> {
    let status = resource.status.clone().unwrap_or_default();
    let endpoints = status
        .communication_hosts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    BTreeMap::from([
        ("apiUrl".to_string(), resource.spec.api_url.clone()),
        (
            "tenantUuid".to_string(),
            status.tenant_uuid.unwrap_or_default(),
        ),
        (
            "installerToken".to_string(),
            credentials.installer_token.clone(),
        ),
        ("communicationEndpoints".to_string(), endpoints),
        (
            "agentVersion".to_string(),
            status.agent_version.unwrap_or_default(),
        ),
        (
            "skipCertCheck".to_string(),
            resource.spec.skip_cert_check.to_string(),
        ),
    ])
}

/// Payload of the data-ingest endpoint secret
pub fn data_ingest_secret_data(
    resource: &MonitoringResource,
    credentials: &Credentials,
) -> BTreeMap<String, String> {
    let api_url = resource.spec.api_url.trim_end_matches('/');
    let properties = format!(
        "METRICS_INGEST_URL={api_url}/v2/metrics/ingest\nMETRICS_INGEST_API_TOKEN={}\n",
        credentials.api_token
    );
    BTreeMap::from([(DATA_INGEST_ENDPOINT_KEY.to_string(), properties)])
}

/// SHA-256 over the payload in key order
pub fn content_hash(data: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// The complete secret a namespace should hold for one kind
pub fn desired_secret(
    resource: &MonitoringResource,
    credentials: &Credentials,
    namespace: &str,
    kind: SecretKind,
) -> Secret {
    let data = match kind {
        SecretKind::Init => init_secret_data(resource, credentials),
        SecretKind::DataIngest => data_ingest_secret_data(resource, credentials),
    };
    let hash = content_hash(&data);

    Secret {
        metadata: ObjectMeta {
            name: Some(kind.secret_name().to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(owner_labels(resource)),
            annotations: Some(BTreeMap::from([(
                CONTENT_HASH_ANNOTATION.to_string(),
                hash,
            )])),
            ..Default::default()
        },
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Whether an existing secret already matches the desired one
/// Extra labels or annotations added by others are tolerated
pub fn is_current(existing: &Secret, desired: &Secret) -> bool {
    let contains_all = |have: &Option<BTreeMap<String, String>>,
                        want: &Option<BTreeMap<String, String>>| {
        want.iter().flatten().all(|(k, v)| {
            have.as_ref()
                .and_then(|have| have.get(k))
                .is_some_and(|existing| existing == v)
        })
    };

    existing.data == desired.data
        && contains_all(&existing.metadata.labels, &desired.metadata.labels)
        && contains_all(
            &existing.metadata.annotations,
            &desired.metadata.annotations,
        )
}
