//! # Types
//!
//! Core types for the reconciler.

use crate::cluster::{KubeClient, KubeError};
use crate::config::OperatorConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::crd::{MonitoringResource, ResourceRegistry};
use crate::monitoring::{ClientError, MonitoringClientFactory};
use crate::provisioner::{ProvisionError, SecretProvisioner};
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to load monitoring resource '{key}': {source}")]
    Load {
        key: String,
        #[source]
        source: KubeError,
    },

    #[error("failed to update finalizers of '{key}': {source}")]
    Finalizer {
        key: String,
        #[source]
        source: KubeError,
    },

    #[error("failed to read credential secret '{key}': {source}")]
    CredentialQuery {
        key: String,
        #[source]
        source: KubeError,
    },

    #[error("monitoring API call failed: {0}")]
    MonitoringApi(#[from] ClientError),

    #[error("failed to write status: {0}")]
    Status(#[source] KubeError),

    #[error("status write still conflicting after {attempts} attempts")]
    StatusConflict { attempts: u32 },

    #[error("failed to list namespaces bound to '{resource}': {source}")]
    Bindings {
        resource: String,
        #[source]
        source: KubeError,
    },

    #[error("failed to provision managed secrets: {0}")]
    Provision(#[source] ProvisionError),

    #[error("failed to clean up managed secrets: {0}")]
    Cleanup(#[source] ProvisionError),
}

/// Identifies one MonitoringResource to reconcile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    pub namespace: String,
    pub name: String,
}

impl ReconcileRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `namespace/name`, used for locks and backoff tracking
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl From<&MonitoringResource> for ReconcileRequest {
    fn from(resource: &MonitoringResource) -> Self {
        Self::new(resource.namespace().unwrap_or_default(), resource.name_any())
    }
}

/// Why a reconciliation was requeued
/// Tracked for debugging and observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Periodic resync after success
    Resync,
    /// Terminal validation failure waiting for changed inputs
    ValidationRecheck,
    /// Status write abandoned because the spec changed underneath
    GenerationChanged,
    /// Error backoff retry carrying the Fibonacci delay picked by the error policy
    ErrorBackoff(Duration),
}

impl TriggerSource {
    /// Get human-readable string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Resync => "resync",
            TriggerSource::ValidationRecheck => "validation-recheck",
            TriggerSource::GenerationChanged => "generation-changed",
            TriggerSource::ErrorBackoff(_) => "error-backoff",
        }
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_seconds, max_seconds),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciler context shared by every reconciliation
#[derive(Clone)]
pub struct Reconciler {
    pub(crate) reader: Arc<dyn KubeClient>,
    pub(crate) writer: Arc<dyn KubeClient>,
    pub(crate) registry: &'static ResourceRegistry,
    pub(crate) factory: MonitoringClientFactory,
    pub(crate) span: tracing::Span,
    pub(crate) config: OperatorConfig,
    pub(crate) provisioner: SecretProvisioner,
    // Backoff state per resource (identified by namespace/name)
    // Owned by the error policy layer, reset on success
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    // Per-resource locks so direct invocations are serialized like the controller's work queue
    key_locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler
    ///
    /// `reader` serves every cluster read, `writer` every write; both may be the same client.
    /// Managed secrets are provisioned through `writer`.
    pub fn new(
        reader: Arc<dyn KubeClient>,
        writer: Arc<dyn KubeClient>,
        registry: &'static ResourceRegistry,
        factory: MonitoringClientFactory,
        span: tracing::Span,
        config: OperatorConfig,
    ) -> Self {
        let provisioner = SecretProvisioner::new(Arc::clone(&writer));
        Self {
            reader,
            writer,
            registry,
            factory,
            span,
            config,
            provisioner,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &'static ResourceRegistry {
        self.registry
    }

    /// Get or create the lock serializing reconciliations of one resource
    pub fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Record a failure for a resource and return the next backoff in seconds with the error count
    pub fn next_backoff(&self, key: &str) -> (u64, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_insert_with(|| {
            BackoffState::new(self.config.backoff_min_secs, self.config.backoff_max_secs)
        });
        state.increment_error();
        (state.backoff.next_backoff_seconds(), state.error_count)
    }

    /// Drop the backoff state and lock of a resource that no longer exists
    pub fn forget(&self, key: &str) {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Whether any per-resource state is held for the key
    pub fn is_tracked(&self, key: &str) -> bool {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
            || self
                .key_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(key)
    }

    /// Forget the failure history of a resource
    pub fn reset_backoff(&self, key: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get_mut(key) {
            state.reset();
        }
    }
}
