//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! Duration and size values represent reasonable defaults and can be
//! overridden via environment variables (see [`crate::config`]).

/// Field manager / user agent name used for every cluster write
pub const OPERATOR_NAME: &str = "agent-operator";

/// API group of the `MonitoringResource` custom resource
pub const API_GROUP: &str = "monitoring.agent-operator.io";

/// Default namespace the operator (and its `MonitoringResource` objects) live in
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "agent-operator";

// ---------------------------------------------------------------------------
// Labels, annotations and finalizers
// ---------------------------------------------------------------------------

/// Namespace label naming the `MonitoringResource` that claims the namespace
pub const NAMESPACE_BINDING_LABEL: &str = "monitoring.agent-operator.io/instance";

/// Finalizer that guarantees owned secrets are removed before the resource goes away
pub const CLEANUP_FINALIZER: &str = "monitoring.agent-operator.io/cleanup";

/// Standard managed-by label put on every secret the operator owns
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Owner name label on managed secrets (cross-namespace owner references are not allowed)
pub const OWNER_NAME_LABEL: &str = "monitoring.agent-operator.io/owner-name";

/// Owner namespace label on managed secrets
pub const OWNER_NAMESPACE_LABEL: &str = "monitoring.agent-operator.io/owner-namespace";

/// Content version marker on managed secrets (SHA-256 over the sorted payload)
pub const CONTENT_HASH_ANNOTATION: &str = "monitoring.agent-operator.io/content-hash";

/// Pod annotation to opt a single pod out of injection (`"false"`)
pub const INJECT_ANNOTATION: &str = "monitoring.agent-operator.io/inject";

/// Pod annotation to opt a single pod out of data-ingest routing (`"false"`)
pub const DATA_INGEST_INJECT_ANNOTATION: &str = "monitoring.agent-operator.io/data-ingest-inject";

/// Pod annotation set once a pod has been mutated
pub const INJECTED_ANNOTATION: &str = "monitoring.agent-operator.io/injected";

// ---------------------------------------------------------------------------
// Managed and referenced secrets
// ---------------------------------------------------------------------------

/// Well-known name of the per-namespace init secret
pub const INIT_SECRET_NAME: &str = "agent-operator-init";

/// Well-known name of the per-namespace data-ingest endpoint secret
pub const DATA_INGEST_SECRET_NAME: &str = "agent-operator-data-ingest-endpoint";

/// Credential secret field holding the installer token
pub const INSTALLER_TOKEN_KEY: &str = "installerToken";

/// Credential secret field holding the API token
pub const API_TOKEN_KEY: &str = "apiToken";

/// Data-ingest secret key containing the endpoint properties file
pub const DATA_INGEST_ENDPOINT_KEY: &str = "endpoint.properties";

// ---------------------------------------------------------------------------
// Agent download parameters
// ---------------------------------------------------------------------------

/// Operating system requested from the monitoring API for agent versions
pub const AGENT_OS_UNIX: &str = "unix";

/// Installer flavour requested from the monitoring API for agent versions
pub const AGENT_INSTALLER_DEFAULT: &str = "default";

/// Default init container image used for injection
pub const DEFAULT_INSTALLER_IMAGE: &str = "docker.io/agent-operator/agent-installer:latest";

// ---------------------------------------------------------------------------
// Controller timing defaults
// ---------------------------------------------------------------------------

/// Default interval between successful reconciliations (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 900;

/// Default minimum backoff for transient failures (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 15;

/// Default maximum backoff for transient failures (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 600;

/// Default interval after which a terminal validation failure is re-checked for input changes (seconds)
pub const DEFAULT_VALIDATION_RECHECK_SECS: u64 = 300;

/// Default number of reload-and-retry attempts after a status write conflict
pub const DEFAULT_STATUS_CONFLICT_RETRIES: u32 = 3;

/// Default timeout for monitoring API requests (seconds)
pub const DEFAULT_MONITORING_API_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Webhook and server defaults
// ---------------------------------------------------------------------------

/// Default admission decision budget (milliseconds)
/// Must stay below the webhook timeout configured on the MutatingWebhookConfiguration
pub const DEFAULT_ADMISSION_TIMEOUT_MS: u64 = 8000;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTPS port for the admission webhook
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// Default directory holding `tls.crt` and `tls.key` for the webhook server
pub const DEFAULT_WEBHOOK_CERT_DIR: &str = "/tmp/webhook/certs";
