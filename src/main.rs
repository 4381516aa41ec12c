// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stackpilot::config::Config;
use stackpilot::kubernetes::{wait_for_crd, KubeLinkDiscovery};
use stackpilot::orchestrator::Orchestrator;
use stackpilot::processors::AddressTable;
use stackpilot::provider::openstack::OpenStackCredentials;
use stackpilot::provider::OpenStackProvider;
use stackpilot::reconcilers::VirtualMachineReconciler;
use stackpilot::render::HotRenderer;
use stackpilot::sync::{join_tasks, ServiceSync};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing, RUST_LOG controls the filter
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting StackPilot operator");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: poll_period={:?}, secondary_network={}",
        config.poll_period, config.secondary_network
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Wait for the VirtualMachine CRD before starting the controller
    info!("Waiting for VirtualMachine CRD to become available...");
    wait_for_crd(&client).await?;

    let provider = Arc::new(OpenStackProvider::new(
        OpenStackCredentials::from_env()?,
        config.provider_timeout,
        config.stack_timeout_mins,
    )?);
    provider.reauthenticate().await?;
    info!("Authenticated against the cloud provider");

    let discovery = Arc::new(KubeLinkDiscovery::new(
        client.clone(),
        config.secondary_network.clone(),
    ));
    let addresses = Arc::new(AddressTable::new());
    let services = Arc::new(ServiceSync::new(discovery.clone(), addresses.clone()));
    let (orchestrator, poller) = Orchestrator::new(
        provider,
        Arc::new(HotRenderer::new()),
        discovery,
        services.clone(),
        addresses,
        config.poll_period,
    )?;

    let cancel = CancellationToken::new();
    let poller_task = tokio::spawn(poller.run(cancel.clone()));
    let services_task = tokio::spawn(services.run(config.link_sync_period, cancel.clone()));

    info!("Starting controller...");
    let reconciler = VirtualMachineReconciler::new(client, orchestrator, config);
    let result = reconciler.run().await;

    // The controller only returns on shutdown
    warn!("Controller stopped, shutting down background tasks");
    cancel.cancel();
    join_tasks(vec![("provider poller", poller_task), ("service sync", services_task)]).await;

    result
}
