// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Background tasks running beside the controller.

pub mod poller;
pub mod services;

pub use poller::{PageCallback, PollerBuilder, ProviderPoller};
pub use services::ServiceSync;

use tokio::task::JoinHandle;
use tracing::error;

/// Wait for stopped background tasks, logging the ones that panicked or were
/// aborted. Returns how many of them failed.
pub async fn join_tasks(tasks: Vec<(&str, JoinHandle<()>)>) -> usize {
    let mut failed = 0;
    for (name, task) in tasks {
        if let Err(e) = task.await {
            error!("Background task {} failed: {}", name, e);
            failed += 1;
        }
    }
    failed
}
