// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::constants::API_GROUP;
use crate::error::Result;
use crate::types::VirtualMachine;
use kube::{discovery::Discovery, Client, Resource};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Wait for the VirtualMachine CRD to be served by the API server.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_crd(client: &Client) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match crd_is_served(client).await {
            Ok(true) => {
                info!("VirtualMachine CRD ({}/v1) is available", API_GROUP);
                return Ok(());
            }
            Ok(false) => {
                info!(
                    "VirtualMachine CRD ({}/v1) not yet available, waiting {} seconds...",
                    API_GROUP, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for VirtualMachine CRD: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        interval = next_interval(interval);
    }
}

fn next_interval(interval: u64) -> u64 {
    (interval * 2).min(POLL_MAX_INTERVAL_SECS)
}

async fn crd_is_served(client: &Client) -> Result<bool> {
    let discovery = Discovery::new(client.clone())
        .filter(&[API_GROUP])
        .run()
        .await?;

    let kind = VirtualMachine::kind(&());
    let version = VirtualMachine::version(&());
    let served = discovery
        .groups()
        .filter(|g| g.name() == API_GROUP)
        .flat_map(|g| g.recommended_resources())
        .any(|(ar, _)| ar.kind == kind && ar.version == version);
    Ok(served)
}
