//! # Monitoring API
//!
//! Capability trait for the external monitoring API and the value types it returns.
//!
//! The controller is the only caller; the webhook works from the status the
//! controller recorded and never reaches the API itself.

mod http;

pub use http::{http_client_factory, HttpMonitoringClient};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(test)]
use mockall::automock;

use crate::constants::{API_TOKEN_KEY, INSTALLER_TOKEN_KEY};
use crate::crd::{CommunicationHostStatus, MonitoringResource};

/// Errors returned by monitoring API calls
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request never produced a response (DNS, connect, timeout, TLS)
    #[error("{operation}: request failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// HTTP 401 or 403
    #[error("{operation}: token was rejected (HTTP {status})")]
    Unauthorized { operation: &'static str, status: u16 },

    /// Any other non-success status
    #[error("{operation}: server responded with HTTP {status}: {message}")]
    Server {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The response body did not match the expected shape
    #[error("{operation}: failed to decode response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    /// The configured API URL cannot be used
    #[error("invalid monitoring API URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

impl ClientError {
    /// Terminal errors are not retried until the credential changes
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientError::Unauthorized { .. })
    }
}

/// A host:port endpoint with its scheme
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommunicationHost {
    pub protocol: String,
    pub host: String,
    pub port: u32,
}

impl CommunicationHost {
    /// Parse `scheme://host[:port][/path]`, defaulting the port from the scheme
    pub fn parse(endpoint: &str) -> Option<Self> {
        let url = reqwest::Url::parse(endpoint).ok()?;
        let host = url.host_str()?.to_string();
        let protocol = url.scheme().to_string();
        let port = url.port_or_known_default()?;
        Some(Self {
            protocol,
            host,
            port: u32::from(port),
        })
    }
}

impl From<CommunicationHost> for CommunicationHostStatus {
    fn from(host: CommunicationHost) -> Self {
        Self {
            protocol: host.protocol,
            host: host.host,
            port: host.port,
        }
    }
}

/// Tenant identifier plus the endpoints agents connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub tenant_uuid: String,
    pub communication_hosts: Vec<CommunicationHost>,
}

/// A named capability a token is authorized for
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TokenScope {
    InstallerDownload,
    DataExport,
    /// Scopes the operator does not act on, kept by name
    Other(String),
}

impl TokenScope {
    pub fn as_str(&self) -> &str {
        match self {
            TokenScope::InstallerDownload => "InstallerDownload",
            TokenScope::DataExport => "DataExport",
            TokenScope::Other(name) => name,
        }
    }
}

impl From<&str> for TokenScope {
    fn from(name: &str) -> Self {
        match name {
            "InstallerDownload" => TokenScope::InstallerDownload,
            "DataExport" => TokenScope::DataExport,
            other => TokenScope::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of scopes carried by one token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenScopes(BTreeSet<TokenScope>);

impl TokenScopes {
    pub fn new(scopes: impl IntoIterator<Item = TokenScope>) -> Self {
        Self(scopes.into_iter().collect())
    }

    pub fn contains(&self, scope: &TokenScope) -> bool {
        self.0.contains(scope)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenScope> {
        self.0.iter()
    }
}

impl<'a> FromIterator<&'a str> for TokenScopes {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(TokenScope::from))
    }
}

/// Why a credential secret cannot be used
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential secret '{namespace}/{name}' does not exist")]
    SecretMissing { namespace: String, name: String },

    #[error("credential secret '{namespace}/{name}' has no '{field}' field")]
    FieldMissing {
        namespace: String,
        name: String,
        field: &'static str,
    },
}

/// Tokens read from the credential secret
///
/// Token material is wiped from memory on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub installer_token: String,
    pub api_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("installer_token", &"<redacted>")
            .field("api_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(installer_token: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            installer_token: installer_token.into(),
            api_token: api_token.into(),
        }
    }

    /// Extract both tokens from a credential secret
    pub fn from_secret(secret: &Secret) -> Result<Self, CredentialError> {
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        let field = |key: &'static str| -> Result<String, CredentialError> {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .and_then(|value| String::from_utf8(value.0.clone()).ok())
                .or_else(|| {
                    secret
                        .string_data
                        .as_ref()
                        .and_then(|data| data.get(key).cloned())
                })
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| CredentialError::FieldMissing {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    field: key,
                })
        };
        Ok(Self {
            installer_token: field(INSTALLER_TOKEN_KEY)?,
            api_token: field(API_TOKEN_KEY)?,
        })
    }
}

/// Trait for the external monitoring API
///
/// One client is bound to one monitoring resource and its credentials.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitoringClient: Send + Sync {
    /// Latest agent version for an operating system and installer flavour
    async fn get_latest_agent_version(
        &self,
        os: &str,
        installer_type: &str,
    ) -> Result<String, ClientError>;

    /// Tenant identifier and communication endpoints
    async fn get_connection_info(&self) -> Result<ConnectionInfo, ClientError>;

    /// Host the operator itself uses to reach the API
    async fn get_communication_host_for_client(&self) -> Result<CommunicationHost, ClientError>;

    /// Scopes carried by a token
    async fn get_token_scopes(&self, token: &str) -> Result<TokenScopes, ClientError>;
}

/// Builds a client for a monitoring resource and its credentials
pub type MonitoringClientFactory = Arc<
    dyn Fn(&MonitoringResource, &Credentials) -> Result<Arc<dyn MonitoringClient>, ClientError>
        + Send
        + Sync,
>;
