//! # Agent Operator
//!
//! Kubernetes operator that manages a monitoring-agent deployment across a cluster.
//!
//! ## Overview
//!
//! The binary runs one of two roles:
//!
//! 1. **operator** - Reconciles `MonitoringResource` objects against the monitoring API,
//!    projects connection info into their status and provisions managed secrets into
//!    every bound namespace
//! 2. **webhook-server** - Serves the mutating admission webhook that injects the agent
//!    into pods over TLS
//!
//! `crd` prints the CustomResourceDefinition YAML.
//!
//! Both roles expose `/metrics`, `/healthz` and `/readyz` on `METRICS_PORT`.

use agent_operator::cluster::{KubeClient, KubeClientImpl};
use agent_operator::config::OperatorConfig;
use agent_operator::controller::reconciler::Reconciler;
use agent_operator::controller::runtime::run_controller;
use agent_operator::crd::{MonitoringResource, ResourceRegistry};
use agent_operator::monitoring::http_client_factory;
use agent_operator::observability::{init_tracing, register_metrics};
use agent_operator::server::{start_server, ServerState};
use agent_operator::webhook::{webhook_router, WebhookState};
use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, info_span};

/// Agent Operator
#[derive(Parser)]
#[command(name = "agent-operator", version, about = "Monitoring agent operator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MonitoringResource controller
    Operator,
    /// Run the mutating admission webhook over TLS
    WebhookServer,
    /// Print the MonitoringResource CRD as YAML
    Crd,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Crd = cli.command {
        print!("{}", serde_yaml::to_string(&MonitoringResource::crd())?);
        return Ok(());
    }

    // Configure rustls crypto provider before any TLS connection is made
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|provider| {
            anyhow::anyhow!("failed to install rustls crypto provider: {provider:?}")
        })?;

    let config = OperatorConfig::from_env();
    init_tracing(&config.log_format)?;
    register_metrics()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("BUILD_GIT_HASH"),
        build_time = env!("BUILD_DATETIME"),
        namespace = %config.operator_namespace,
        "Starting agent operator"
    );

    let server_state = Arc::new(ServerState::default());
    let probe_state = Arc::clone(&server_state);
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, probe_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    match cli.command {
        Commands::Operator => run_operator(client, config, server_state).await,
        Commands::WebhookServer => run_webhook_server(client, config, server_state).await,
        Commands::Crd => Ok(()),
    }
}

async fn run_operator(
    client: Client,
    config: OperatorConfig,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let registry = ResourceRegistry::global();
    let kube: Arc<dyn KubeClient> = Arc::new(KubeClientImpl::new(client.clone(), registry));
    let factory = http_client_factory(config.monitoring_api_timeout());

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&kube),
        kube,
        registry,
        factory,
        info_span!("controller"),
        config,
    ));

    server_state.mark_ready();
    run_controller(client, reconciler).await;
    Ok(())
}

async fn run_webhook_server(
    client: Client,
    config: OperatorConfig,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let kube: Arc<dyn KubeClient> =
        Arc::new(KubeClientImpl::new(client, ResourceRegistry::global()));

    let cert = config.webhook_cert_dir.join("tls.crt");
    let key = config.webhook_cert_dir.join("tls.key");
    let tls_config = RustlsConfig::from_pem_file(&cert, &key)
        .await
        .with_context(|| format!("Failed to load webhook certificate from {}", cert.display()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.webhook_port));
    let state = Arc::new(WebhookState::new(kube, config));

    info!(addr = %addr, "Starting admission webhook server");
    server_state.mark_ready();
    axum_server::bind_rustls(addr, tls_config)
        .serve(webhook_router(state).into_make_service())
        .await
        .context("Admission webhook server failed")?;

    Ok(())
}
