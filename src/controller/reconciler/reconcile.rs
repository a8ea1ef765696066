//! # Reconcile
//!
//! The per-resource state machine:
//!
//! 1. Load the resource; clean up after it when it is gone or being deleted,
//!    otherwise make sure the cleanup finalizer is present
//! 2. Record `Disabled` when no feature needs the monitoring API
//! 3. Validate the credentials (skipped while the validation fingerprint is unchanged)
//! 4. Query connection info, agent version and, when needed, the API host
//! 5. Build one status snapshot
//! 6. Persist it with optimistic concurrency
//! 7. Provision managed secrets into every bound namespace
//! 8. Requeue after the resync interval

use crate::constants::{AGENT_INSTALLER_DEFAULT, AGENT_OS_UNIX, CLEANUP_FINALIZER};
use crate::controller::reconciler::status::{
    disabled_snapshot, invalid_credentials_snapshot, running_snapshot, InvalidCredentialReason,
    ObservedState, StatusWrite, CONDITION_TOKENS_VALID,
};
use crate::controller::reconciler::types::{
    ReconcileError, ReconcileRequest, Reconciler, TriggerSource,
};
use crate::crd::{MonitoringResource, ResourceKind, ValidationFingerprint};
use crate::monitoring::{ClientError, Credentials, MonitoringClient, TokenScope};
use crate::observability::metrics;
use crate::provisioner::SecretKind;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Result of validating the credential secret and the installer token
enum Validation {
    Valid {
        client: Arc<dyn MonitoringClient>,
        credentials: Credentials,
        fingerprint: ValidationFingerprint,
    },
    /// Terminal until the resource or the credential secret changes
    Invalid {
        reason: InvalidCredentialReason,
        message: String,
        fingerprint: Option<ValidationFingerprint>,
    },
    /// Same inputs as the last terminal failure; nothing to do
    Unchanged,
}

impl Reconciler {
    /// Reconcile one MonitoringResource
    ///
    /// Reconciliations of the same resource never overlap.
    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<Action, ReconcileError> {
        let key = request.key();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let span = info_span!(
            parent: &self.span,
            "reconcile",
            resource.kind = %self.registry.api_resource(ResourceKind::MonitoringResource).kind,
            resource.name = %request.name,
            resource.namespace = %request.namespace,
        );

        let start = Instant::now();
        metrics::increment_reconciliations();
        let result = self.reconcile_inner(request).instrument(span).await;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        if result.is_ok() {
            self.reset_backoff(&key);
        }
        result
    }

    async fn reconcile_inner(&self, request: &ReconcileRequest) -> Result<Action, ReconcileError> {
        // Step 1: load and handle lifecycle
        let Some(resource) = self.load(request).await? else {
            info!("Monitoring resource is gone, removing its managed secrets");
            self.cleanup(request).await?;
            self.forget(&request.key());
            return Ok(Action::await_change());
        };

        if resource.metadata.deletion_timestamp.is_some() {
            info!("Monitoring resource is being deleted");
            self.cleanup(request).await?;
            self.remove_finalizer(&resource).await?;
            self.forget(&request.key());
            return Ok(Action::await_change());
        }

        let Some(resource) = self.ensure_finalizer(request, resource).await? else {
            return Ok(Action::await_change());
        };

        // Step 2: nothing to do without features
        if !resource.spec.has_enabled_features() {
            info!("No features are enabled, skipping external calls");
            let snapshot = disabled_snapshot(&resource);
            return match self.persist_status(resource, snapshot).await? {
                StatusWrite::Abandoned => Ok(self.requeue(TriggerSource::GenerationChanged)),
                _ => Ok(Action::await_change()),
            };
        }

        // Step 3: credentials
        let (client, credentials, fingerprint) = match self.validate(&resource).await? {
            Validation::Valid {
                client,
                credentials,
                fingerprint,
            } => (client, credentials, fingerprint),
            Validation::Unchanged => {
                debug!("Credentials unchanged since last validation failure, not re-validating");
                return Ok(self.requeue(TriggerSource::ValidationRecheck));
            }
            Validation::Invalid {
                reason,
                message,
                fingerprint,
            } => return self.record_invalid(resource, reason, message, fingerprint).await,
        };

        let data_ingest_token_valid = if resource.spec.data_ingest.enabled {
            Some(self.api_token_can_export(client.as_ref(), &credentials).await?)
        } else {
            None
        };

        // Step 4: external state; transient failures leave the stored status untouched
        let observed = match self
            .observe(&resource, client.as_ref(), data_ingest_token_valid)
            .await
        {
            Ok(observed) => observed,
            Err(e) if e.is_terminal() => {
                let reason = InvalidCredentialReason::Unauthorized;
                return self
                    .record_invalid(resource, reason, e.to_string(), Some(fingerprint))
                    .await;
            }
            Err(e) => return Err(e.into()),
        };

        // Step 5 and 6: one snapshot, one write
        let snapshot = running_snapshot(&resource, observed);
        let Some(resource) = self.persist_status(resource, snapshot).await?.into_resource() else {
            return Ok(self.requeue(TriggerSource::GenerationChanged));
        };

        // Step 7: secrets
        self.provision_bound_namespaces(&resource).await?;

        // Step 8
        Ok(self.requeue(TriggerSource::Resync))
    }

    /// Query everything a running snapshot needs from the monitoring API
    async fn observe(
        &self,
        resource: &MonitoringResource,
        client: &dyn MonitoringClient,
        data_ingest_token_valid: Option<bool>,
    ) -> Result<ObservedState, ClientError> {
        let connection_info = client.get_connection_info().await?;
        let agent_version = client
            .get_latest_agent_version(AGENT_OS_UNIX, AGENT_INSTALLER_DEFAULT)
            .await?;
        let api_host = if resource.spec.needs_api_host() {
            Some(client.get_communication_host_for_client().await?)
        } else {
            None
        };
        Ok(ObservedState {
            connection_info,
            agent_version,
            api_host,
            data_ingest_token_valid,
        })
    }

    /// Record a terminal credential failure and wait for changed inputs
    async fn record_invalid(
        &self,
        resource: MonitoringResource,
        reason: InvalidCredentialReason,
        message: String,
        fingerprint: Option<ValidationFingerprint>,
    ) -> Result<Action, ReconcileError> {
        warn!(reason = reason.as_str(), message = %message, "Credentials are invalid");
        let snapshot = invalid_credentials_snapshot(&resource, reason, message, fingerprint);
        match self.persist_status(resource, snapshot).await? {
            StatusWrite::Abandoned => Ok(self.requeue(TriggerSource::GenerationChanged)),
            _ => Ok(self.requeue(TriggerSource::ValidationRecheck)),
        }
    }

    async fn load(
        &self,
        request: &ReconcileRequest,
    ) -> Result<Option<MonitoringResource>, ReconcileError> {
        self.reader
            .get_monitoring_resource(&request.namespace, &request.name)
            .await
            .map_err(|source| ReconcileError::Load {
                key: request.key(),
                source,
            })
    }

    /// Add the cleanup finalizer if missing and return the fresh resource
    async fn ensure_finalizer(
        &self,
        request: &ReconcileRequest,
        resource: MonitoringResource,
    ) -> Result<Option<MonitoringResource>, ReconcileError> {
        if resource.finalizers().iter().any(|f| f == CLEANUP_FINALIZER) {
            return Ok(Some(resource));
        }

        let mut finalizers = resource.finalizers().to_vec();
        finalizers.push(CLEANUP_FINALIZER.to_string());
        self.writer
            .set_finalizers(&resource, finalizers)
            .await
            .map_err(|source| ReconcileError::Finalizer {
                key: request.key(),
                source,
            })?;
        debug!("Added cleanup finalizer");
        self.load(request).await
    }

    async fn remove_finalizer(&self, resource: &MonitoringResource) -> Result<(), ReconcileError> {
        if !resource.finalizers().iter().any(|f| f == CLEANUP_FINALIZER) {
            return Ok(());
        }
        let finalizers = resource
            .finalizers()
            .iter()
            .filter(|f| *f != CLEANUP_FINALIZER)
            .cloned()
            .collect();
        self.writer
            .set_finalizers(resource, finalizers)
            .await
            .map_err(|source| ReconcileError::Finalizer {
                key: ReconcileRequest::from(resource).key(),
                source,
            })?;
        info!("Removed cleanup finalizer");
        Ok(())
    }

    async fn cleanup(&self, request: &ReconcileRequest) -> Result<usize, ReconcileError> {
        self.provisioner
            .cleanup_owned(&request.namespace, &request.name)
            .await
            .map_err(ReconcileError::Cleanup)
    }

    /// Check the credential secret and the installer token scopes
    async fn validate(&self, resource: &MonitoringResource) -> Result<Validation, ReconcileError> {
        let namespace = resource.namespace().unwrap_or_default();
        let tokens_name = resource.spec.tokens_secret_name(&resource.name_any()).to_string();

        let secret = self
            .reader
            .get_secret(&namespace, &tokens_name)
            .await
            .map_err(|source| ReconcileError::CredentialQuery {
                key: format!("{namespace}/{tokens_name}"),
                source,
            })?;

        let Some(secret) = secret else {
            return Ok(Validation::Invalid {
                reason: InvalidCredentialReason::CredentialMissing,
                message: format!("credential secret '{namespace}/{tokens_name}' does not exist"),
                fingerprint: None,
            });
        };

        let fingerprint = ValidationFingerprint {
            generation: resource.metadata.generation.unwrap_or(0),
            credential_resource_version: secret.resource_version().unwrap_or_default(),
        };

        let credentials = match Credentials::from_secret(&secret) {
            Ok(credentials) => credentials,
            Err(e) => {
                return Ok(Validation::Invalid {
                    reason: InvalidCredentialReason::CredentialMissing,
                    message: e.to_string(),
                    fingerprint: Some(fingerprint),
                })
            }
        };

        let status = resource.status.as_ref();
        let tokens_invalid = status
            .and_then(|s| s.condition(CONDITION_TOKENS_VALID))
            .is_some_and(|c| !c.is_true());
        if tokens_invalid
            && status.and_then(|s| s.validation_fingerprint.as_ref()) == Some(&fingerprint)
        {
            return Ok(Validation::Unchanged);
        }

        let client = (self.factory)(resource, &credentials)?;

        match client.get_token_scopes(&credentials.installer_token).await {
            Ok(scopes) if scopes.contains(&TokenScope::InstallerDownload) => {
                Ok(Validation::Valid {
                    client,
                    credentials,
                    fingerprint,
                })
            }
            Ok(_) => Ok(Validation::Invalid {
                reason: InvalidCredentialReason::MissingScope,
                message: format!(
                    "installer token lacks the {} scope",
                    TokenScope::InstallerDownload
                ),
                fingerprint: Some(fingerprint),
            }),
            Err(e @ ClientError::Unauthorized { .. }) => Ok(Validation::Invalid {
                reason: InvalidCredentialReason::Unauthorized,
                message: e.to_string(),
                fingerprint: Some(fingerprint),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the API token may export data; a rejected token simply cannot
    async fn api_token_can_export(
        &self,
        client: &dyn MonitoringClient,
        credentials: &Credentials,
    ) -> Result<bool, ReconcileError> {
        match client.get_token_scopes(&credentials.api_token).await {
            Ok(scopes) => Ok(scopes.contains(&TokenScope::DataExport)),
            Err(e) if e.is_terminal() => {
                warn!(error = %e, "API token was rejected, data ingest is unavailable");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn provision_bound_namespaces(
        &self,
        resource: &MonitoringResource,
    ) -> Result<(), ReconcileError> {
        let name = resource.name_any();
        let namespaces = self
            .reader
            .list_bound_namespaces(&name)
            .await
            .map_err(|source| ReconcileError::Bindings {
                resource: name.clone(),
                source,
            })?;

        let data_ingest = resource.spec.data_ingest.enabled
            && resource
                .status
                .as_ref()
                .is_some_and(|s| s.data_ingest_token_valid);

        for namespace in &namespaces {
            self.provisioner
                .ensure(resource, namespace, SecretKind::Init)
                .await
                .map_err(ReconcileError::Provision)?;
            if data_ingest {
                self.provisioner
                    .ensure(resource, namespace, SecretKind::DataIngest)
                    .await
                    .map_err(ReconcileError::Provision)?;
            } else {
                // Data ingest was turned off or the API token lost DataExport
                self.provisioner
                    .remove(resource, namespace, SecretKind::DataIngest)
                    .await
                    .map_err(ReconcileError::Provision)?;
            }
        }

        debug!(namespaces = namespaces.len(), "Provisioned bound namespaces");
        Ok(())
    }

    pub(crate) fn requeue(&self, trigger: TriggerSource) -> Action {
        metrics::increment_requeues(trigger.as_str());
        match trigger {
            TriggerSource::Resync => Action::requeue(self.config.resync_interval()),
            TriggerSource::ValidationRecheck => {
                Action::requeue(self.config.validation_recheck_interval())
            }
            TriggerSource::GenerationChanged => Action::requeue(Duration::ZERO),
            TriggerSource::ErrorBackoff(delay) => Action::requeue(delay),
        }
    }
}
