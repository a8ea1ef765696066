//! # Cluster Access
//!
//! Every read and write the operator performs against the Kubernetes API goes
//! through the [`KubeClient`] trait, so the controller, the provisioner and
//! the webhook can be exercised against an in-memory cluster in tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::constants::{
    MANAGED_BY_LABEL, NAMESPACE_BINDING_LABEL, OPERATOR_NAME, OWNER_NAMESPACE_LABEL,
    OWNER_NAME_LABEL,
};
use crate::crd::{MonitoringResource, ResourceKind, ResourceRegistry};

/// Errors from Kubernetes API calls, classified by how callers react to them
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum KubeError {
    /// The object changed since it was read (HTTP 409 on update)
    #[error("{kind} '{name}' was modified concurrently")]
    Conflict { kind: &'static str, name: String },

    /// A create raced with another writer (HTTP 409 on create)
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// The object is gone (HTTP 404 on a write)
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Any other API failure (transport, authorization, server)
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
}

impl KubeError {
    /// Classify a kube error for an update on a named object
    fn from_write(
        operation: &'static str,
        kind: &'static str,
        name: &str,
        err: kube::Error,
    ) -> Self {
        match &err {
            kube::Error::Api(api_err) if api_err.code == 404 => KubeError::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(api_err) if api_err.code == 409 => KubeError::Conflict {
                kind,
                name: name.to_string(),
            },
            _ => KubeError::request(operation, err),
        }
    }

    /// Classify a kube error for a create
    fn from_create(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(api_err) if api_err.code == 409 => KubeError::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            _ => KubeError::request("create", err),
        }
    }

    fn request(operation: &'static str, err: impl std::fmt::Display) -> Self {
        KubeError::Request {
            operation,
            message: err.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Conflict { .. })
    }
}

/// Label selector matching every secret owned by one monitoring resource
pub fn owner_selector(owner_namespace: &str, owner_name: &str) -> String {
    format!(
        "{MANAGED_BY_LABEL}={OPERATOR_NAME},{OWNER_NAMESPACE_LABEL}={owner_namespace},{OWNER_NAME_LABEL}={owner_name}"
    )
}

/// Trait abstracting Kubernetes client operations
///
/// This trait allows substituting the cluster in tests while using the real
/// client in production. Reads return `Ok(None)` for absent objects.
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a MonitoringResource by namespace and name
    async fn get_monitoring_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MonitoringResource>, KubeError>;

    /// Replace the status subresource, guarded by the resource's `resourceVersion`
    async fn replace_monitoring_resource_status(
        &self,
        resource: &MonitoringResource,
    ) -> Result<MonitoringResource, KubeError>;

    /// Set the finalizer list of a MonitoringResource, guarded by its `resourceVersion`
    async fn set_finalizers(
        &self,
        resource: &MonitoringResource,
        finalizers: Vec<String>,
    ) -> Result<(), KubeError>;

    /// Get a namespace by name
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, KubeError>;

    /// Names of every namespace labelled as bound to the named resource
    async fn list_bound_namespaces(&self, resource_name: &str) -> Result<Vec<String>, KubeError>;

    /// Get a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, KubeError>;

    /// Create a secret; a racing create surfaces as `AlreadyExists`
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, KubeError>;

    /// Replace a secret, guarded by its `resourceVersion`
    async fn replace_secret(&self, namespace: &str, secret: &Secret)
        -> Result<Secret, KubeError>;

    /// Delete a secret; deleting an absent secret succeeds
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), KubeError>;

    /// Every secret in any namespace carrying the owner labels of one resource
    async fn list_managed_secrets(
        &self,
        owner_namespace: &str,
        owner_name: &str,
    ) -> Result<Vec<Secret>, KubeError>;

    /// Whether any legacy OneAgentAPM object exists in the cluster
    /// An unregistered legacy kind counts as absent
    async fn legacy_objects_present(&self) -> Result<bool, KubeError>;
}

/// Production implementation backed by `kube::Client`
#[derive(Clone)]
pub struct KubeClientImpl {
    client: Client,
    registry: &'static ResourceRegistry,
}

impl std::fmt::Debug for KubeClientImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClientImpl").finish_non_exhaustive()
    }
}

impl KubeClientImpl {
    pub fn new(client: Client, registry: &'static ResourceRegistry) -> Self {
        Self { client, registry }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_monitoring_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MonitoringResource>, KubeError> {
        let api: Api<MonitoringResource> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(resource) => Ok(Some(resource)),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => Err(KubeError::request("get MonitoringResource", e)),
        }
    }

    async fn replace_monitoring_resource_status(
        &self,
        resource: &MonitoringResource,
    ) -> Result<MonitoringResource, KubeError> {
        let namespace = resource.namespace().unwrap_or_default();
        let name = resource.name_any();
        let api: Api<MonitoringResource> = Api::namespaced(self.client.clone(), &namespace);
        let body = serde_json::to_vec(resource)
            .map_err(|e| KubeError::request("serialize MonitoringResource status", e))?;
        api.replace_status(&name, &Self::post_params(), body)
            .await
            .map_err(|e| {
                KubeError::from_write("replace MonitoringResource status", "MonitoringResource", &name, e)
            })
    }

    async fn set_finalizers(
        &self,
        resource: &MonitoringResource,
        finalizers: Vec<String>,
    ) -> Result<(), KubeError> {
        let namespace = resource.namespace().unwrap_or_default();
        let name = resource.name_any();
        let api: Api<MonitoringResource> = Api::namespaced(self.client.clone(), &namespace);
        // resourceVersion in a merge patch turns it into a conditional update
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": resource.resource_version(),
                "finalizers": finalizers,
            }
        });
        api.patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| KubeError::from_write("patch finalizers", "MonitoringResource", &name, e))?;
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, KubeError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(ns) => Ok(Some(ns)),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => Err(KubeError::request("get Namespace", e)),
        }
    }

    async fn list_bound_namespaces(&self, resource_name: &str) -> Result<Vec<String>, KubeError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let lp = ListParams::default().labels(&format!("{NAMESPACE_BINDING_LABEL}={resource_name}"));
        let list = api
            .list(&lp)
            .await
            .map_err(|e| KubeError::request("list Namespaces", e))?;
        Ok(list.items.iter().map(ResourceExt::name_any).collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, KubeError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => Err(KubeError::request("get Secret", e)),
        }
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, KubeError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), secret)
            .await
            .map_err(|e| KubeError::from_create("Secret", &secret.name_any(), e))
    }

    async fn replace_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, KubeError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let name = secret.name_any();
        api.replace(&name, &Self::post_params(), secret)
            .await
            .map_err(|e| KubeError::from_write("replace Secret", "Secret", &name, e))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                debug!(namespace = %namespace, secret = %name, "Secret already deleted");
                Ok(())
            }
            Err(e) => Err(KubeError::request("delete Secret", e)),
        }
    }

    async fn list_managed_secrets(
        &self,
        owner_namespace: &str,
        owner_name: &str,
    ) -> Result<Vec<Secret>, KubeError> {
        let api: Api<Secret> = Api::all(self.client.clone());
        let lp = ListParams::default().labels(&owner_selector(owner_namespace, owner_name));
        let list = api
            .list(&lp)
            .await
            .map_err(|e| KubeError::request("list managed Secrets", e))?;
        Ok(list.items)
    }

    async fn legacy_objects_present(&self) -> Result<bool, KubeError> {
        let ar = self.registry.api_resource(ResourceKind::LegacyOneAgentApm);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), ar);
        match api.list(&ListParams::default().limit(1)).await {
            Ok(list) => Ok(!list.items.is_empty()),
            // CRD not installed
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(KubeError::request("list OneAgentAPM objects", e)),
        }
    }
}
