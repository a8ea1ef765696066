//! # Operator Configuration
//!
//! Controller and webhook settings loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What the webhook answers when an admission decision exceeds its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Fail closed: the pod is rejected and the caller retries the create
    Reject,
    /// Admit the pod unmodified
    PassThrough,
}

impl FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" | "deny" | "fail" => Ok(Self::Reject),
            "pass-through" | "passthrough" | "allow" | "ignore" => Ok(Self::PassThrough),
            other => Err(format!("unknown admission timeout policy '{other}'")),
        }
    }
}

/// Operator-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace where the operator and its `MonitoringResource` objects live
    pub operator_namespace: String,
    /// Requeue interval after a successful reconciliation (seconds)
    pub resync_interval_secs: u64,
    /// Minimum backoff for transient reconcile failures (seconds)
    pub backoff_min_secs: u64,
    /// Maximum backoff for transient reconcile failures (seconds)
    pub backoff_max_secs: u64,
    /// How often a terminal validation failure is re-checked for changed inputs (seconds)
    /// The re-check never calls the monitoring API unless the fingerprint changed
    pub validation_recheck_secs: u64,
    /// Reload-and-retry attempts after a status write conflict
    pub status_conflict_retries: u32,
    /// Timeout for a single monitoring API request (seconds)
    pub monitoring_api_timeout_secs: u64,
    /// Total budget for one admission decision (milliseconds)
    pub admission_timeout_ms: u64,
    /// Answer given when the admission budget is exceeded
    pub admission_timeout_policy: TimeoutPolicy,
    /// Init container image used when the resource does not name one
    pub installer_image: String,
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// HTTPS port for the admission webhook
    pub webhook_port: u16,
    /// Directory holding `tls.crt` and `tls.key` for the webhook
    pub webhook_cert_dir: PathBuf,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            validation_recheck_secs: DEFAULT_VALIDATION_RECHECK_SECS,
            status_conflict_retries: DEFAULT_STATUS_CONFLICT_RETRIES,
            monitoring_api_timeout_secs: DEFAULT_MONITORING_API_TIMEOUT_SECS,
            admission_timeout_ms: DEFAULT_ADMISSION_TIMEOUT_MS,
            admission_timeout_policy: TimeoutPolicy::Reject,
            installer_image: DEFAULT_INSTALLER_IMAGE.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            webhook_port: DEFAULT_WEBHOOK_PORT,
            webhook_cert_dir: PathBuf::from(DEFAULT_WEBHOOK_CERT_DIR),
            log_format: "json".to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            operator_namespace: env_var_or_default_str("POD_NAMESPACE", DEFAULT_OPERATOR_NAMESPACE),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            validation_recheck_secs: env_var_or_default(
                "VALIDATION_RECHECK_SECS",
                DEFAULT_VALIDATION_RECHECK_SECS,
            ),
            status_conflict_retries: env_var_or_default(
                "STATUS_CONFLICT_RETRIES",
                DEFAULT_STATUS_CONFLICT_RETRIES,
            ),
            monitoring_api_timeout_secs: env_var_or_default(
                "MONITORING_API_TIMEOUT_SECS",
                DEFAULT_MONITORING_API_TIMEOUT_SECS,
            ),
            admission_timeout_ms: env_var_or_default(
                "ADMISSION_TIMEOUT_MS",
                DEFAULT_ADMISSION_TIMEOUT_MS,
            ),
            admission_timeout_policy: env_var_or_default(
                "ADMISSION_TIMEOUT_POLICY",
                TimeoutPolicy::Reject,
            ),
            installer_image: env_var_or_default_str("INSTALLER_IMAGE", DEFAULT_INSTALLER_IMAGE),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            webhook_port: env_var_or_default("WEBHOOK_PORT", DEFAULT_WEBHOOK_PORT),
            webhook_cert_dir: PathBuf::from(env_var_or_default_str(
                "WEBHOOK_CERT_DIR",
                DEFAULT_WEBHOOK_CERT_DIR,
            )),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Get the requeue duration used after a successful reconciliation
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get the re-check duration used after a terminal validation failure
    pub fn validation_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.validation_recheck_secs)
    }

    /// Get the monitoring API request timeout
    pub fn monitoring_api_timeout(&self) -> Duration {
        Duration::from_secs(self.monitoring_api_timeout_secs)
    }

    /// Get the admission decision budget
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
