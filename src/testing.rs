//! In-memory cluster and fixtures for unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ByteString;
use kube::ResourceExt;

use crate::cluster::{KubeClient, KubeError};
use crate::config::OperatorConfig;
use crate::constants::{
    API_TOKEN_KEY, INSTALLER_TOKEN_KEY, MANAGED_BY_LABEL, NAMESPACE_BINDING_LABEL,
    OPERATOR_NAME, OWNER_NAMESPACE_LABEL, OWNER_NAME_LABEL,
};
use crate::crd::{
    CommunicationHostStatus, MonitoringResource, MonitoringResourceSpec,
    MonitoringResourceStatus,
};
use crate::monitoring::{
    ClientError, CommunicationHost, ConnectionInfo, Credentials, MockMonitoringClient,
    MonitoringClient, MonitoringClientFactory, TokenScope, TokenScopes,
};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct State {
    resources: BTreeMap<Key, MonitoringResource>,
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<Key, Secret>,
    next_resource_version: u64,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }
}

/// In-memory [`KubeClient`] with resourceVersion checks and failure injection
#[derive(Default)]
pub struct FakeKube {
    state: Mutex<State>,
    legacy_present: AtomicBool,
    /// Delay before answering legacy-object queries (milliseconds)
    legacy_query_delay_ms: AtomicU64,
    fail_namespace_reads: AtomicBool,
    fail_secret_reads: AtomicBool,
    fail_secret_writes: AtomicBool,
    fail_resource_reads: AtomicBool,
    /// Status writes to reject with a conflict before accepting one
    pending_status_conflicts: AtomicU32,
    /// Whether an injected conflict also simulates a spec edit
    conflicts_bump_generation: AtomicBool,
    secret_writes: AtomicUsize,
    status_writes: AtomicUsize,
    status_write_attempts: AtomicUsize,
}

impl FakeKube {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster state lock")
    }

    fn request_error(operation: &'static str) -> KubeError {
        KubeError::Request {
            operation,
            message: "injected failure".to_string(),
        }
    }

    pub fn add_namespace(&self, name: &str, bound_to: Option<&str>) {
        let labels = bound_to.map(|resource| {
            BTreeMap::from([(NAMESPACE_BINDING_LABEL.to_string(), resource.to_string())])
        });
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels,
                ..Default::default()
            },
            ..Default::default()
        };
        self.state().namespaces.insert(name.to_string(), ns);
    }

    pub fn add_monitoring_resource(&self, mut resource: MonitoringResource) {
        let mut state = self.state();
        resource.metadata.resource_version = Some(state.bump());
        if resource.metadata.generation.is_none() {
            resource.metadata.generation = Some(1);
        }
        let k = key(&resource.namespace().unwrap_or_default(), &resource.name_any());
        state.resources.insert(k, resource);
    }

    pub fn monitoring_resource(&self, namespace: &str, name: &str) -> Option<MonitoringResource> {
        self.state().resources.get(&key(namespace, name)).cloned()
    }

    /// Apply a spec edit the way the API server does: bump generation and resourceVersion
    pub fn edit_spec(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut MonitoringResourceSpec)) {
        let mut state = self.state();
        let rv = state.bump();
        if let Some(resource) = state.resources.get_mut(&key(namespace, name)) {
            edit(&mut resource.spec);
            resource.metadata.generation = Some(resource.metadata.generation.unwrap_or(0) + 1);
            resource.metadata.resource_version = Some(rv);
        }
    }

    /// Mark a resource as being deleted
    pub fn mark_deleting(&self, namespace: &str, name: &str) {
        let mut state = self.state();
        let rv = state.bump();
        if let Some(resource) = state.resources.get_mut(&key(namespace, name)) {
            resource.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            resource.metadata.resource_version = Some(rv);
        }
    }

    pub fn remove_monitoring_resource(&self, namespace: &str, name: &str) {
        self.state().resources.remove(&key(namespace, name));
    }

    pub fn add_secret(&self, mut secret: Secret) {
        let mut state = self.state();
        secret.metadata.resource_version = Some(state.bump());
        let k = key(&secret.namespace().unwrap_or_default(), &secret.name_any());
        state.secrets.insert(k, secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn remove_secret(&self, namespace: &str, name: &str) {
        self.state().secrets.remove(&key(namespace, name));
    }

    pub fn plain_secret(namespace: &str, name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn set_legacy_present(&self, present: bool) {
        self.legacy_present.store(present, Ordering::SeqCst);
    }

    /// Make legacy-object queries hang for `delay` before answering
    pub fn delay_legacy_queries(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.legacy_query_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn fail_namespace_reads(&self, fail: bool) {
        self.fail_namespace_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_secret_reads(&self, fail: bool) {
        self.fail_secret_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_secret_writes(&self, fail: bool) {
        self.fail_secret_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_resource_reads(&self, fail: bool) {
        self.fail_resource_reads.store(fail, Ordering::SeqCst);
    }

    /// Reject the next `count` status writes with a conflict caused by a concurrent writer
    pub fn inject_status_conflicts(&self, count: u32, bump_generation: bool) {
        self.pending_status_conflicts.store(count, Ordering::SeqCst);
        self.conflicts_bump_generation
            .store(bump_generation, Ordering::SeqCst);
    }

    /// Successful secret creates and replaces
    pub fn secret_writes(&self) -> usize {
        self.secret_writes.load(Ordering::SeqCst)
    }

    /// Successful status writes
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Status writes attempted, including rejected ones
    pub fn status_write_attempts(&self) -> usize {
        self.status_write_attempts.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        *self.state() = State::default();
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_monitoring_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MonitoringResource>, KubeError> {
        if self.fail_resource_reads.load(Ordering::SeqCst) {
            return Err(Self::request_error("get MonitoringResource"));
        }
        Ok(self.monitoring_resource(namespace, name))
    }

    async fn replace_monitoring_resource_status(
        &self,
        resource: &MonitoringResource,
    ) -> Result<MonitoringResource, KubeError> {
        self.status_write_attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        let k = key(&resource.namespace().unwrap_or_default(), &resource.name_any());
        let conflict = KubeError::Conflict {
            kind: "MonitoringResource",
            name: resource.name_any(),
        };

        if self.pending_status_conflicts.load(Ordering::SeqCst) > 0 {
            self.pending_status_conflicts.fetch_sub(1, Ordering::SeqCst);
            let rv = state.bump();
            let bump_generation = self.conflicts_bump_generation.load(Ordering::SeqCst);
            if let Some(stored) = state.resources.get_mut(&k) {
                stored.metadata.resource_version = Some(rv);
                if bump_generation {
                    stored.metadata.generation = Some(stored.metadata.generation.unwrap_or(0) + 1);
                }
            }
            return Err(conflict);
        }

        let rv = state.bump();
        let stored = state.resources.get_mut(&k).ok_or(KubeError::NotFound {
            kind: "MonitoringResource",
            name: resource.name_any(),
        })?;
        if stored.metadata.resource_version != resource.metadata.resource_version {
            return Err(conflict);
        }
        stored.status = resource.status.clone();
        stored.metadata.resource_version = Some(rv);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn set_finalizers(
        &self,
        resource: &MonitoringResource,
        finalizers: Vec<String>,
    ) -> Result<(), KubeError> {
        let mut state = self.state();
        let k = key(&resource.namespace().unwrap_or_default(), &resource.name_any());
        let rv = state.bump();
        let stored = state.resources.get_mut(&k).ok_or(KubeError::NotFound {
            kind: "MonitoringResource",
            name: resource.name_any(),
        })?;
        if stored.metadata.resource_version != resource.metadata.resource_version {
            return Err(KubeError::Conflict {
                kind: "MonitoringResource",
                name: resource.name_any(),
            });
        }
        stored.metadata.finalizers = Some(finalizers.clone());
        stored.metadata.resource_version = Some(rv);
        // The API server removes a deleting object once its last finalizer is gone
        if stored.metadata.deletion_timestamp.is_some() && finalizers.is_empty() {
            state.resources.remove(&k);
        }
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, KubeError> {
        if self.fail_namespace_reads.load(Ordering::SeqCst) {
            return Err(Self::request_error("get Namespace"));
        }
        Ok(self.state().namespaces.get(name).cloned())
    }

    async fn list_bound_namespaces(&self, resource_name: &str) -> Result<Vec<String>, KubeError> {
        if self.fail_namespace_reads.load(Ordering::SeqCst) {
            return Err(Self::request_error("list Namespaces"));
        }
        Ok(self
            .state()
            .namespaces
            .values()
            .filter(|ns| ns.labels().get(NAMESPACE_BINDING_LABEL).map(String::as_str) == Some(resource_name))
            .map(ResourceExt::name_any)
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, KubeError> {
        if self.fail_secret_reads.load(Ordering::SeqCst) {
            return Err(Self::request_error("get Secret"));
        }
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, KubeError> {
        if self.fail_secret_writes.load(Ordering::SeqCst) {
            return Err(Self::request_error("create Secret"));
        }
        let mut state = self.state();
        let k = key(namespace, &secret.name_any());
        if state.secrets.contains_key(&k) {
            return Err(KubeError::AlreadyExists {
                kind: "Secret",
                name: secret.name_any(),
            });
        }
        let mut stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.bump());
        state.secrets.insert(k, stored.clone());
        self.secret_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, KubeError> {
        if self.fail_secret_writes.load(Ordering::SeqCst) {
            return Err(Self::request_error("replace Secret"));
        }
        let mut state = self.state();
        let k = key(namespace, &secret.name_any());
        let rv = state.bump();
        let stored = state.secrets.get_mut(&k).ok_or(KubeError::NotFound {
            kind: "Secret",
            name: secret.name_any(),
        })?;
        if stored.metadata.resource_version != secret.metadata.resource_version {
            return Err(KubeError::Conflict {
                kind: "Secret",
                name: secret.name_any(),
            });
        }
        *stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(rv);
        self.secret_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        if self.fail_secret_writes.load(Ordering::SeqCst) {
            return Err(Self::request_error("delete Secret"));
        }
        self.remove_secret(namespace, name);
        Ok(())
    }

    async fn list_managed_secrets(
        &self,
        owner_namespace: &str,
        owner_name: &str,
    ) -> Result<Vec<Secret>, KubeError> {
        if self.fail_secret_reads.load(Ordering::SeqCst) {
            return Err(Self::request_error("list managed Secrets"));
        }
        let wanted = [
            (MANAGED_BY_LABEL, OPERATOR_NAME),
            (OWNER_NAMESPACE_LABEL, owner_namespace),
            (OWNER_NAME_LABEL, owner_name),
        ];
        Ok(self
            .state()
            .secrets
            .values()
            .filter(|secret| {
                wanted
                    .iter()
                    .all(|(k, v)| secret.labels().get(*k).map(String::as_str) == Some(*v))
            })
            .cloned()
            .collect())
    }

    async fn legacy_objects_present(&self) -> Result<bool, KubeError> {
        let delay = self.legacy_query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.legacy_present.load(Ordering::SeqCst))
    }
}

/// A MonitoringResource with default flags and no status
pub fn monitoring_resource(namespace: &str, name: &str) -> MonitoringResource {
    let spec: MonitoringResourceSpec = serde_json::from_value(serde_json::json!({
        "apiUrl": "https://ENVIRONMENTID.live.example.com/api",
    }))
    .expect("valid spec");
    let mut resource = MonitoringResource::new(name, spec);
    resource.metadata.namespace = Some(namespace.to_string());
    resource
}

pub fn endpoint(host: &str) -> CommunicationHost {
    CommunicationHost {
        protocol: "https".to_string(),
        host: host.to_string(),
        port: 443,
    }
}

/// The stored resource with the status a successful reconcile would have written
pub fn ready_resource(env: &TestEnvironment) -> MonitoringResource {
    let mut resource = env.resource();
    resource.status = Some(MonitoringResourceStatus {
        tenant_uuid: Some("asdf".to_string()),
        agent_version: Some("17".to_string()),
        communication_hosts: vec![
            CommunicationHostStatus::from(endpoint("endpoint1")),
            CommunicationHostStatus::from(endpoint("endpoint2")),
        ],
        data_ingest_token_valid: true,
        ..Default::default()
    });
    resource
}

/// Mock monitoring API answering like a healthy tenant:
/// version `17`, tenant `asdf` with two endpoints, token `42` may download
/// installers and token `43` may export data
pub fn healthy_monitoring_api() -> MockMonitoringClient {
    monitoring_api_with_scopes(
        vec![TokenScope::InstallerDownload],
        vec![TokenScope::DataExport],
    )
}

/// Mock monitoring API like [`healthy_monitoring_api`] with chosen scopes for tokens `42` and `43`
pub fn monitoring_api_with_scopes(
    installer_scopes: Vec<TokenScope>,
    api_scopes: Vec<TokenScope>,
) -> MockMonitoringClient {
    let mut mock = MockMonitoringClient::new();
    mock.expect_get_latest_agent_version()
        .withf(|os, installer_type| os == "unix" && installer_type == "default")
        .returning(|_, _| Ok("17".to_string()));
    mock.expect_get_connection_info().returning(|| {
        Ok(ConnectionInfo {
            tenant_uuid: "asdf".to_string(),
            communication_hosts: vec![endpoint("endpoint1"), endpoint("endpoint2")],
        })
    });
    mock.expect_get_communication_host_for_client()
        .returning(|| Ok(endpoint("ENVIRONMENTID.live.example.com")));
    mock.expect_get_token_scopes()
        .withf(|token| token == "42")
        .returning(move |_| Ok(TokenScopes::new(installer_scopes.clone())));
    mock.expect_get_token_scopes()
        .withf(|token| token == "43")
        .returning(move |_| Ok(TokenScopes::new(api_scopes.clone())));
    mock
}

/// Factory handing out the same client for every resource
pub fn factory_for(client: impl MonitoringClient + 'static) -> MonitoringClientFactory {
    let client: Arc<dyn MonitoringClient> = Arc::new(client);
    Arc::new(
        move |_: &MonitoringResource,
              _: &Credentials|
              -> Result<Arc<dyn MonitoringClient>, ClientError> { Ok(Arc::clone(&client)) },
    )
}

/// In-memory cluster with an operator namespace, one monitoring resource and its credential secret
///
/// The cluster is cleared when the environment is dropped.
pub struct TestEnvironment {
    pub kube: Arc<FakeKube>,
    pub config: OperatorConfig,
    pub operator_namespace: String,
    pub resource_name: String,
    pub tokens_name: String,
}

impl TestEnvironment {
    pub fn new(setup: impl FnOnce(&mut MonitoringResource)) -> Self {
        let config = OperatorConfig::default();
        let operator_namespace = config.operator_namespace.clone();
        let resource_name = "monitoring-test".to_string();
        let tokens_name = "token-test".to_string();

        let kube = Arc::new(FakeKube::default());
        kube.add_namespace(&operator_namespace, None);

        let mut resource = monitoring_resource(&operator_namespace, &resource_name);
        resource.spec.tokens = Some(tokens_name.clone());
        setup(&mut resource);
        kube.add_monitoring_resource(resource);

        let env = Self {
            kube,
            config,
            operator_namespace,
            resource_name,
            tokens_name,
        };
        env.set_credentials("42", "43");
        env
    }

    /// Current stored copy of the monitoring resource
    pub fn resource(&self) -> MonitoringResource {
        self.kube
            .monitoring_resource(&self.operator_namespace, &self.resource_name)
            .expect("monitoring resource exists")
    }

    pub fn status(&self) -> MonitoringResourceStatus {
        self.resource().status.unwrap_or_default()
    }

    /// Write (or rewrite) the credential secret
    pub fn set_credentials(&self, installer_token: &str, api_token: &str) {
        let mut secret = FakeKube::plain_secret(&self.operator_namespace, &self.tokens_name);
        secret.data = Some(BTreeMap::from([
            (
                INSTALLER_TOKEN_KEY.to_string(),
                ByteString(installer_token.as_bytes().to_vec()),
            ),
            (
                API_TOKEN_KEY.to_string(),
                ByteString(api_token.as_bytes().to_vec()),
            ),
        ]));
        self.kube.add_secret(secret);
    }
}

impl Drop for TestEnvironment {
    fn drop(&mut self) {
        self.kube.clear();
    }
}
