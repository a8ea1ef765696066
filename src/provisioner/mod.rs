//! # Secret Provisioner
//!
//! Idempotently ensures the per-namespace managed secrets exist and match the
//! content derived from their owning monitoring resource. Shared by the
//! controller (after every status write) and the webhook (on demand before
//! injecting a pod), so concurrent writers converge on the same content.
//!
//! No retries happen here; callers apply their own policy.

pub mod content;

use std::fmt;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info};

use crate::cluster::{owner_selector, KubeClient, KubeError};
use crate::constants::{DATA_INGEST_SECRET_NAME, INIT_SECRET_NAME};
use crate::crd::MonitoringResource;
use crate::monitoring::{CredentialError, Credentials};
use crate::observability::metrics;

/// The two kinds of managed secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKind {
    Init,
    DataIngest,
}

impl SecretKind {
    pub fn secret_name(self) -> &'static str {
        match self {
            SecretKind::Init => INIT_SECRET_NAME,
            SecretKind::DataIngest => DATA_INGEST_SECRET_NAME,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SecretKind::Init => "init",
            SecretKind::DataIngest => "data-ingest",
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.secret_name())
    }
}

/// Result of a successful `ensure`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ProvisionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisionOutcome::Created => "created",
            ProvisionOutcome::Updated => "updated",
            ProvisionOutcome::Unchanged => "unchanged",
        }
    }
}

/// Why a managed secret could not be provisioned
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// A secret could not be read
    #[error("failed to query secret '{namespace}/{secret}'")]
    Query {
        namespace: String,
        secret: String,
        #[source]
        source: KubeError,
    },

    /// A managed secret could not be created, replaced or deleted
    #[error("failed to write secret '{namespace}/{secret}'")]
    Write {
        namespace: String,
        secret: String,
        #[source]
        source: KubeError,
    },

    /// The owning resource has not been reconciled to connection info yet
    #[error("monitoring resource '{resource}' has no connection info yet")]
    NotReady { resource: String },

    /// The credential secret is missing or incomplete
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The API token is not allowed to export data
    #[error("the API token of monitoring resource '{resource}' lacks the DataExport scope")]
    DataIngestUnavailable { resource: String },
}

/// Ensures and removes managed secrets
#[derive(Clone)]
pub struct SecretProvisioner {
    client: Arc<dyn KubeClient>,
}

impl fmt::Debug for SecretProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretProvisioner").finish_non_exhaustive()
    }
}

impl SecretProvisioner {
    pub fn new(client: Arc<dyn KubeClient>) -> Self {
        Self { client }
    }

    /// Make the secret of `kind` in `namespace` match the resource
    pub async fn ensure(
        &self,
        resource: &MonitoringResource,
        namespace: &str,
        kind: SecretKind,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let result = self.ensure_inner(resource, namespace, kind).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "error",
        };
        metrics::increment_secret_provisions(kind.as_str(), outcome);
        result
    }

    async fn ensure_inner(
        &self,
        resource: &MonitoringResource,
        namespace: &str,
        kind: SecretKind,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let resource_name = resource.name_any();
        let status = resource.status.as_ref();

        if !status.is_some_and(|s| s.has_connection_info()) {
            return Err(ProvisionError::NotReady {
                resource: resource_name,
            });
        }
        if kind == SecretKind::DataIngest && !status.is_some_and(|s| s.data_ingest_token_valid) {
            return Err(ProvisionError::DataIngestUnavailable {
                resource: resource_name,
            });
        }

        let credentials = self.load_credentials(resource).await?;
        let desired = content::desired_secret(resource, &credentials, namespace, kind);
        let secret_name = kind.secret_name();

        let existing = self
            .client
            .get_secret(namespace, secret_name)
            .await
            .map_err(|source| ProvisionError::Query {
                namespace: namespace.to_string(),
                secret: secret_name.to_string(),
                source,
            })?;

        let write_error = |source| ProvisionError::Write {
            namespace: namespace.to_string(),
            secret: secret_name.to_string(),
            source,
        };

        match existing {
            None => {
                self.client
                    .create_secret(namespace, &desired)
                    .await
                    .map_err(write_error)?;
                info!(namespace = %namespace, secret = %secret_name, resource = %resource_name, "Created managed secret");
                Ok(ProvisionOutcome::Created)
            }
            Some(existing) if content::is_current(&existing, &desired) => {
                debug!(namespace = %namespace, secret = %secret_name, "Managed secret is current");
                Ok(ProvisionOutcome::Unchanged)
            }
            Some(existing) => {
                let mut replacement = desired;
                replacement.metadata.resource_version = existing.metadata.resource_version.clone();
                // Keep labels and annotations other tools added
                let mut labels = existing.metadata.labels.clone().unwrap_or_default();
                labels.extend(replacement.metadata.labels.take().unwrap_or_default());
                replacement.metadata.labels = Some(labels);
                let mut annotations = existing.metadata.annotations.clone().unwrap_or_default();
                annotations.extend(replacement.metadata.annotations.take().unwrap_or_default());
                replacement.metadata.annotations = Some(annotations);

                self.client
                    .replace_secret(namespace, &replacement)
                    .await
                    .map_err(write_error)?;
                info!(namespace = %namespace, secret = %secret_name, resource = %resource_name, "Updated managed secret");
                Ok(ProvisionOutcome::Updated)
            }
        }
    }

    /// Read the credential secret the resource references
    pub async fn load_credentials(
        &self,
        resource: &MonitoringResource,
    ) -> Result<Credentials, ProvisionError> {
        let namespace = resource.namespace().unwrap_or_default();
        let name = resource.spec.tokens_secret_name(&resource.name_any()).to_string();
        let secret = self
            .client
            .get_secret(&namespace, &name)
            .await
            .map_err(|source| ProvisionError::Query {
                namespace: namespace.clone(),
                secret: name.clone(),
                source,
            })?
            .ok_or(CredentialError::SecretMissing { namespace, name })?;
        Ok(Credentials::from_secret(&secret)?)
    }

    /// Delete the secret of `kind` in `namespace` when this resource owns it
    ///
    /// Returns whether a secret was deleted. Secrets carrying other owner labels are left alone.
    pub async fn remove(
        &self,
        resource: &MonitoringResource,
        namespace: &str,
        kind: SecretKind,
    ) -> Result<bool, ProvisionError> {
        let secret_name = kind.secret_name();
        let existing = self
            .client
            .get_secret(namespace, secret_name)
            .await
            .map_err(|source| ProvisionError::Query {
                namespace: namespace.to_string(),
                secret: secret_name.to_string(),
                source,
            })?;

        let Some(existing) = existing else {
            return Ok(false);
        };
        let owned = content::owner_labels(resource)
            .iter()
            .all(|(k, v)| existing.labels().get(k) == Some(v));
        if !owned {
            debug!(namespace = %namespace, secret = %secret_name, "Secret is not owned by this resource, keeping it");
            return Ok(false);
        }

        self.client
            .delete_secret(namespace, secret_name)
            .await
            .map_err(|source| ProvisionError::Write {
                namespace: namespace.to_string(),
                secret: secret_name.to_string(),
                source,
            })?;
        metrics::increment_secret_provisions(kind.as_str(), "deleted");
        info!(namespace = %namespace, secret = %secret_name, resource = %resource.name_any(), "Removed managed secret");
        Ok(true)
    }

    /// Delete every managed secret labelled with this owner, returning how many were removed
    pub async fn cleanup_owned(
        &self,
        owner_namespace: &str,
        owner_name: &str,
    ) -> Result<usize, ProvisionError> {
        let secrets = self
            .client
            .list_managed_secrets(owner_namespace, owner_name)
            .await
            .map_err(|source| ProvisionError::Query {
                namespace: "*".to_string(),
                secret: owner_selector(owner_namespace, owner_name),
                source,
            })?;

        let mut deleted = 0;
        for secret in &secrets {
            let namespace = secret.namespace().unwrap_or_default();
            let name = secret.name_any();
            self.client
                .delete_secret(&namespace, &name)
                .await
                .map_err(|source| ProvisionError::Write {
                    namespace: namespace.clone(),
                    secret: name.clone(),
                    source,
                })?;
            deleted += 1;
        }

        if deleted > 0 {
            info!(owner = %format!("{owner_namespace}/{owner_name}"), deleted, "Removed managed secrets");
        }
        Ok(deleted)
    }
}
