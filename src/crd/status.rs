//! # MonitoringResource Status
//!
//! Status types for tracking reconciliation state and conditions.

use serde::{Deserialize, Serialize};

/// Status of the MonitoringResource
///
/// Written only by the controller, always as one complete snapshot.
#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringResourceStatus {
    /// Current phase
    #[serde(default)]
    pub phase: Option<MonitoringPhase>,
    /// Outcome of the last completed reconciliation
    #[serde(default)]
    pub last_reconcile_outcome: Option<ReconcileOutcome>,
    /// Latest agent version reported by the monitoring API
    #[serde(default)]
    pub agent_version: Option<String>,
    /// Tenant identifier from the connection info
    #[serde(default)]
    pub tenant_uuid: Option<String>,
    /// Endpoints agents use to reach the tenant
    #[serde(default)]
    pub communication_hosts: Vec<CommunicationHostStatus>,
    /// Host of the monitoring API itself
    /// Only recorded when routing or Istio is enabled
    #[serde(default)]
    pub api_host: Option<CommunicationHostStatus>,
    /// Whether the API token carries the data export scope
    #[serde(default)]
    pub data_ingest_token_valid: bool,
    /// Inputs observed at the last terminal validation failure
    /// While unchanged the credential is not re-validated against the API
    #[serde(default)]
    pub validation_fingerprint: Option<ValidationFingerprint>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Last reconciliation time (RFC3339)
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
    /// Conditions represent the latest available observations
    /// Types: Ready, TokensValid, DataIngestReady
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Phase of a MonitoringResource
#[derive(Debug, Clone, Copy, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
pub enum MonitoringPhase {
    Running,
    Disabled,
    Error,
}

/// Outcome of the last reconciliation that reached a decision
#[derive(Debug, Clone, Copy, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Succeeded,
    NoFeaturesEnabled,
    InvalidCredentials,
}

/// A host agents (or the operator) connect to
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationHostStatus {
    pub protocol: String,
    pub host: String,
    pub port: u32,
}

impl std::fmt::Display for CommunicationHostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Resource generation plus credential secret resourceVersion
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFingerprint {
    pub generation: i64,
    pub credential_resource_version: String,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(r#type: &str, status: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

impl MonitoringResourceStatus {
    /// Find a condition by type
    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Whether the status carries the connection info secrets are built from
    pub fn has_connection_info(&self) -> bool {
        self.tenant_uuid.as_deref().is_some_and(|t| !t.is_empty())
            && !self.communication_hosts.is_empty()
    }

    /// Compare two snapshots, ignoring the reconcile timestamp
    pub fn same_snapshot(&self, other: &Self) -> bool {
        let mut left = self.clone();
        let mut right = other.clone();
        left.last_reconcile_time = None;
        right.last_reconcile_time = None;
        left == right
    }

    /// Carry `lastTransitionTime` over from `previous` for conditions whose status did not change
    /// New or flipped conditions get `now`
    pub fn stamp_transitions(&mut self, previous: Option<&MonitoringResourceStatus>, now: &str) {
        for condition in &mut self.conditions {
            let carried = previous
                .and_then(|p| p.condition(&condition.r#type))
                .filter(|p| p.status == condition.status)
                .and_then(|p| p.last_transition_time.clone());
            condition.last_transition_time = Some(carried.unwrap_or_else(|| now.to_string()));
        }
    }
}
