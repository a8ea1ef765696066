//! # Status Updates
//!
//! Builds status snapshots and persists them with optimistic concurrency.
//! Unchanged snapshots are not written, so status writes never trigger
//! needless watch events.

use crate::controller::reconciler::types::{ReconcileError, Reconciler};
use crate::crd::{
    CommunicationHostStatus, Condition, MonitoringPhase, MonitoringResource,
    MonitoringResourceStatus, ReconcileOutcome, ValidationFingerprint,
};
use crate::monitoring::{CommunicationHost, ConnectionInfo};
use kube::ResourceExt;
use tracing::{debug, info, warn};

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_TOKENS_VALID: &str = "TokensValid";
pub const CONDITION_DATA_INGEST_READY: &str = "DataIngestReady";

pub const MESSAGE_NO_FEATURES: &str = "no features are enabled, skipping injection";

/// Why credentials were rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidCredentialReason {
    /// Credential secret or one of its fields is missing
    CredentialMissing,
    /// The installer token lacks the InstallerDownload scope
    MissingScope,
    /// The monitoring API rejected the installer token
    Unauthorized,
}

impl InvalidCredentialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidCredentialReason::CredentialMissing => "CredentialMissing",
            InvalidCredentialReason::MissingScope => "MissingScope",
            InvalidCredentialReason::Unauthorized => "Unauthorized",
        }
    }
}

/// Outcome of persisting a snapshot
#[derive(Debug)]
pub enum StatusWrite {
    /// The snapshot was written; carries the updated resource
    Written(MonitoringResource),
    /// The stored status already matched
    Unchanged(MonitoringResource),
    /// The spec changed between attempts; the pass must start over
    Abandoned,
}

impl StatusWrite {
    /// Resource carrying the persisted status, unless the pass was abandoned
    pub fn into_resource(self) -> Option<MonitoringResource> {
        match self {
            StatusWrite::Written(resource) | StatusWrite::Unchanged(resource) => Some(resource),
            StatusWrite::Abandoned => None,
        }
    }
}

/// Snapshot for a resource with neither app injection nor full stack enabled
pub fn disabled_snapshot(resource: &MonitoringResource) -> MonitoringResourceStatus {
    MonitoringResourceStatus {
        phase: Some(MonitoringPhase::Disabled),
        last_reconcile_outcome: Some(ReconcileOutcome::NoFeaturesEnabled),
        observed_generation: resource.metadata.generation,
        conditions: vec![Condition::new(
            CONDITION_READY,
            false,
            "NoFeaturesEnabled",
            MESSAGE_NO_FEATURES,
        )],
        ..Default::default()
    }
}

/// Snapshot for a terminal credential failure
///
/// Connection info from earlier successful passes is kept so injection keeps
/// working with the secrets already provisioned.
pub fn invalid_credentials_snapshot(
    resource: &MonitoringResource,
    reason: InvalidCredentialReason,
    message: String,
    fingerprint: Option<ValidationFingerprint>,
) -> MonitoringResourceStatus {
    let previous = resource.status.clone().unwrap_or_default();
    MonitoringResourceStatus {
        phase: Some(MonitoringPhase::Error),
        last_reconcile_outcome: Some(ReconcileOutcome::InvalidCredentials),
        agent_version: previous.agent_version,
        tenant_uuid: previous.tenant_uuid,
        communication_hosts: previous.communication_hosts,
        api_host: previous.api_host,
        data_ingest_token_valid: false,
        validation_fingerprint: fingerprint,
        observed_generation: resource.metadata.generation,
        last_reconcile_time: None,
        conditions: vec![
            Condition::new(CONDITION_READY, false, "InvalidCredentials", message.clone()),
            Condition::new(CONDITION_TOKENS_VALID, false, reason.as_str(), message),
        ],
    }
}

/// Everything a successful pass learned from the monitoring API
#[derive(Debug, Clone)]
pub struct ObservedState {
    pub connection_info: ConnectionInfo,
    pub agent_version: String,
    pub api_host: Option<CommunicationHost>,
    /// `None` when data ingest is disabled
    pub data_ingest_token_valid: Option<bool>,
}

/// Snapshot for a successful pass
pub fn running_snapshot(
    resource: &MonitoringResource,
    observed: ObservedState,
) -> MonitoringResourceStatus {
    let mut conditions = vec![
        Condition::new(
            CONDITION_READY,
            true,
            "Reconciled",
            format!("agent version {} is available", observed.agent_version),
        ),
        Condition::new(
            CONDITION_TOKENS_VALID,
            true,
            "Valid",
            "installer token carries the InstallerDownload scope",
        ),
    ];
    match observed.data_ingest_token_valid {
        Some(true) => conditions.push(Condition::new(
            CONDITION_DATA_INGEST_READY,
            true,
            "Valid",
            "API token carries the DataExport scope",
        )),
        Some(false) => conditions.push(Condition::new(
            CONDITION_DATA_INGEST_READY,
            false,
            "MissingScope",
            "API token lacks the DataExport scope, data ingest is unavailable",
        )),
        None => {}
    }

    MonitoringResourceStatus {
        phase: Some(MonitoringPhase::Running),
        last_reconcile_outcome: Some(ReconcileOutcome::Succeeded),
        agent_version: Some(observed.agent_version),
        tenant_uuid: Some(observed.connection_info.tenant_uuid),
        communication_hosts: observed
            .connection_info
            .communication_hosts
            .into_iter()
            .map(CommunicationHostStatus::from)
            .collect(),
        api_host: observed.api_host.map(CommunicationHostStatus::from),
        data_ingest_token_valid: observed.data_ingest_token_valid.unwrap_or(false),
        validation_fingerprint: None,
        observed_generation: resource.metadata.generation,
        last_reconcile_time: None,
        conditions,
    }
}

impl Reconciler {
    /// Persist a snapshot, reloading and retrying on conflicts
    ///
    /// Gives up with `Abandoned` when the generation moved (the new spec needs
    /// a fresh pass) or the resource disappeared.
    pub(crate) async fn persist_status(
        &self,
        resource: MonitoringResource,
        snapshot: MonitoringResourceStatus,
    ) -> Result<StatusWrite, ReconcileError> {
        let namespace = resource.namespace().unwrap_or_default();
        let name = resource.name_any();
        let generation = resource.metadata.generation;
        let max_attempts = self.config.status_conflict_retries + 1;
        let mut current = resource;

        for attempt in 1..=max_attempts {
            let now = chrono::Utc::now().to_rfc3339();
            let mut next = snapshot.clone();
            next.stamp_transitions(current.status.as_ref(), &now);

            if current
                .status
                .as_ref()
                .is_some_and(|previous| previous.same_snapshot(&next))
            {
                debug!("Skipping status update - snapshot unchanged");
                return Ok(StatusWrite::Unchanged(current));
            }

            next.last_reconcile_time = Some(now);
            let mut updated = current.clone();
            updated.status = Some(next);

            match self.writer.replace_monitoring_resource_status(&updated).await {
                Ok(written) => {
                    info!(phase = ?written.status.as_ref().and_then(|s| s.phase), "Status updated");
                    return Ok(StatusWrite::Written(written));
                }
                Err(e) if e.is_conflict() => {
                    warn!(attempt, max_attempts, "Status write conflicted, reloading resource");
                    let reloaded = self
                        .reader
                        .get_monitoring_resource(&namespace, &name)
                        .await
                        .map_err(|source| ReconcileError::Load {
                            key: format!("{namespace}/{name}"),
                            source,
                        })?;
                    match reloaded {
                        Some(reloaded) if reloaded.metadata.generation == generation => {
                            current = reloaded;
                        }
                        Some(_) => {
                            info!("Generation changed during status update, abandoning pass");
                            return Ok(StatusWrite::Abandoned);
                        }
                        None => return Ok(StatusWrite::Abandoned),
                    }
                }
                Err(e) => return Err(ReconcileError::Status(e)),
            }
        }

        Err(ReconcileError::StatusConflict {
            attempts: max_attempts,
        })
    }
}
