//! Monitoring API REST Client
//!
//! reqwest implementation of [`MonitoringClient`]. Every request carries an
//! `Authorization: Api-Token <token>` header; the installer token is used for
//! deployment endpoints and the API token for token lookups.

use super::{
    ClientError, CommunicationHost, ConnectionInfo, Credentials, MonitoringClient,
    MonitoringClientFactory, TokenScopes,
};
use crate::crd::MonitoringResource;
use crate::observability::metrics;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Response of `GET /v1/deployment/installer/agent/{os}/{type}/latest/metainfo`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestAgentVersionResponse {
    latest_agent_version: String,
}

/// Response of `GET /v1/deployment/installer/agent/connectioninfo`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionInfoResponse {
    #[serde(rename = "tenantUUID")]
    tenant_uuid: String,
    #[serde(default)]
    communication_endpoints: Vec<String>,
}

/// Request body of `POST /v1/tokens/lookup`
#[derive(Serialize)]
struct TokenLookupRequest<'a> {
    token: &'a str,
}

/// Response of `POST /v1/tokens/lookup`
#[derive(Debug, Deserialize)]
struct TokenLookupResponse {
    #[serde(default)]
    scopes: Vec<String>,
}

/// Monitoring API REST client
pub struct HttpMonitoringClient {
    http_client: Client,
    api_url: String,
    credentials: Credentials,
}

impl std::fmt::Debug for HttpMonitoringClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMonitoringClient")
            .field("api_url", &self.api_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl HttpMonitoringClient {
    /// Create a client for one API URL
    ///
    /// `skip_cert_check` disables TLS certificate verification.
    pub fn new(
        api_url: &str,
        credentials: Credentials,
        timeout: Duration,
        skip_cert_check: bool,
    ) -> Result<Self, ClientError> {
        let api_url = api_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&api_url).map_err(|e| ClientError::InvalidUrl {
            url: api_url.clone(),
            message: e.to_string(),
        })?;

        let http_client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(skip_cert_check)
            .user_agent(crate::constants::OPERATOR_NAME)
            .build()
            .map_err(|e| ClientError::Transport {
                operation: "build HTTP client",
                message: e.to_string(),
            })?;

        Ok(Self {
            http_client,
            api_url,
            credentials,
        })
    }

    /// Send a request and decode a JSON body, recording the call in metrics
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let start = Instant::now();
        let result = self.send_inner(operation, request).await;
        metrics::observe_monitoring_api_call(
            operation,
            if result.is_ok() { "success" } else { "error" },
            start.elapsed().as_secs_f64(),
        );
        result
    }

    async fn send_inner<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await.map_err(|e| ClientError::Transport {
            operation,
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error_for_status(operation, status, body));
        }

        response.json::<T>().await.map_err(|e| ClientError::Decode {
            operation,
            message: e.to_string(),
        })
    }

    /// Map a non-success status to an error
    fn error_for_status(operation: &'static str, status: StatusCode, body: String) -> ClientError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Unauthorized {
                operation,
                status: status.as_u16(),
            },
            _ => ClientError::Server {
                operation,
                status: status.as_u16(),
                message: body,
            },
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Api-Token {token}"))
    }
}

#[async_trait]
impl MonitoringClient for HttpMonitoringClient {
    async fn get_latest_agent_version(
        &self,
        os: &str,
        installer_type: &str,
    ) -> Result<String, ClientError> {
        let url = format!(
            "{}/v1/deployment/installer/agent/{os}/{installer_type}/latest/metainfo",
            self.api_url
        );
        let request = self.authorized(self.http_client.get(&url), &self.credentials.installer_token);
        let response: LatestAgentVersionResponse =
            self.send("get latest agent version", request).await?;
        debug!(version = %response.latest_agent_version, os = %os, "Fetched latest agent version");
        Ok(response.latest_agent_version)
    }

    async fn get_connection_info(&self) -> Result<ConnectionInfo, ClientError> {
        let url = format!(
            "{}/v1/deployment/installer/agent/connectioninfo",
            self.api_url
        );
        let request = self.authorized(self.http_client.get(&url), &self.credentials.installer_token);
        let response: ConnectionInfoResponse = self.send("get connection info", request).await?;

        let communication_hosts = response
            .communication_endpoints
            .iter()
            .filter_map(|endpoint| {
                let parsed = CommunicationHost::parse(endpoint);
                if parsed.is_none() {
                    warn!(endpoint = %endpoint, "Skipping unparsable communication endpoint");
                }
                parsed
            })
            .collect();

        Ok(ConnectionInfo {
            tenant_uuid: response.tenant_uuid,
            communication_hosts,
        })
    }

    async fn get_communication_host_for_client(&self) -> Result<CommunicationHost, ClientError> {
        CommunicationHost::parse(&self.api_url).ok_or_else(|| ClientError::InvalidUrl {
            url: self.api_url.clone(),
            message: "missing host".to_string(),
        })
    }

    async fn get_token_scopes(&self, token: &str) -> Result<TokenScopes, ClientError> {
        let url = format!("{}/v1/tokens/lookup", self.api_url);
        let request = self
            .authorized(self.http_client.post(&url), &self.credentials.api_token)
            .json(&TokenLookupRequest { token });
        let response: TokenLookupResponse = self.send("lookup token", request).await?;
        Ok(response.scopes.iter().map(String::as_str).collect())
    }
}

/// Factory building one [`HttpMonitoringClient`] per resource and credential
pub fn http_client_factory(timeout: Duration) -> MonitoringClientFactory {
    Arc::new(
        move |resource: &MonitoringResource,
              credentials: &Credentials|
              -> Result<Arc<dyn MonitoringClient>, ClientError> {
            let client = HttpMonitoringClient::new(
                &resource.spec.api_url,
                credentials.clone(),
                timeout,
                resource.spec.skip_cert_check,
            )?;
            Ok(Arc::new(client))
        },
    )
}
