//! # Namespace Binding
//!
//! Maps a namespace to the monitoring resource that claims it through the
//! `monitoring.agent-operator.io/instance` namespace label. Resources live in
//! the operator namespace; the binding is a read-only lookup.

use std::sync::Arc;

use tracing::debug;

use crate::cluster::{KubeClient, KubeError};
use crate::constants::NAMESPACE_BINDING_LABEL;
use crate::crd::MonitoringResource;

/// Reference to the monitoring resource a namespace is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringResourceRef {
    pub namespace: String,
    pub name: String,
}

/// Why a namespace could not be resolved to a monitoring resource
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("namespace '{namespace}' has no monitoring resource label")]
    LabelNotSet { namespace: String },

    #[error(
        "monitoring resource '{resource}' is assigned to namespace '{namespace}', but monitoring resource '{resource}' does not exist"
    )]
    ResourceMissing { resource: String, namespace: String },

    #[error("failed to query namespace")]
    NamespaceQuery {
        namespace: String,
        #[source]
        source: KubeError,
    },

    #[error("failed to query monitoring resource")]
    ResourceQuery {
        resource: String,
        #[source]
        source: KubeError,
    },
}

impl BindingError {
    /// Configuration outcomes are informational; query failures are infrastructure errors
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BindingError::LabelNotSet { .. } | BindingError::ResourceMissing { .. }
        )
    }
}

/// Resolves namespaces to monitoring resources
#[derive(Clone)]
pub struct NamespaceBindingResolver {
    client: Arc<dyn KubeClient>,
    operator_namespace: String,
}

impl std::fmt::Debug for NamespaceBindingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceBindingResolver")
            .field("operator_namespace", &self.operator_namespace)
            .finish_non_exhaustive()
    }
}

impl NamespaceBindingResolver {
    pub fn new(client: Arc<dyn KubeClient>, operator_namespace: impl Into<String>) -> Self {
        Self {
            client,
            operator_namespace: operator_namespace.into(),
        }
    }

    /// Resolve the resource reference named by the namespace label
    /// An absent namespace is treated like one without the label
    pub async fn resolve(&self, namespace: &str) -> Result<MonitoringResourceRef, BindingError> {
        let ns = self
            .client
            .get_namespace(namespace)
            .await
            .map_err(|source| BindingError::NamespaceQuery {
                namespace: namespace.to_string(),
                source,
            })?;

        let name = ns
            .as_ref()
            .and_then(|ns| ns.metadata.labels.as_ref())
            .and_then(|labels| labels.get(NAMESPACE_BINDING_LABEL))
            .filter(|value| !value.is_empty())
            .ok_or_else(|| BindingError::LabelNotSet {
                namespace: namespace.to_string(),
            })?;

        Ok(MonitoringResourceRef {
            namespace: self.operator_namespace.clone(),
            name: name.clone(),
        })
    }

    /// Resolve and load the bound resource
    pub async fn resolve_bound(
        &self,
        namespace: &str,
    ) -> Result<(MonitoringResourceRef, MonitoringResource), BindingError> {
        let reference = self.resolve(namespace).await?;
        let resource = self
            .client
            .get_monitoring_resource(&reference.namespace, &reference.name)
            .await
            .map_err(|source| BindingError::ResourceQuery {
                resource: reference.name.clone(),
                source,
            })?
            .ok_or_else(|| BindingError::ResourceMissing {
                resource: reference.name.clone(),
                namespace: namespace.to_string(),
            })?;

        debug!(namespace = %namespace, resource = %reference.name, "Resolved namespace binding");
        Ok((reference, resource))
    }
}
