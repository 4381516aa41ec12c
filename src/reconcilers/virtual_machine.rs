// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! VirtualMachine reconciler - runs the orchestrator for every watched object
//! and writes the resulting status back.

use crate::config::Config;
use crate::constants::{FINALIZER, STATUS_UPDATE_ATTEMPTS};
use crate::error::{Result, StackPilotError};
use crate::orchestrator::Orchestrator;
use crate::types::{VirtualMachine, VirtualMachineStatus};
use futures::StreamExt;
use kube::{
    api::{Patch, PatchParams, PostParams},
    runtime::{controller::Action, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct VirtualMachineReconciler {
    client: Client,
    orchestrator: Orchestrator,
    config: Config,
}

impl VirtualMachineReconciler {
    pub fn new(client: Client, orchestrator: Orchestrator, config: Config) -> Self {
        Self {
            client,
            orchestrator,
            config,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let machines: Api<VirtualMachine> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(machines, watcher_config())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled virtual machine: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

/// Every VirtualMachine in every namespace
fn watcher_config() -> WatcherConfig {
    WatcherConfig::default()
}

async fn reconcile(vm: Arc<VirtualMachine>, ctx: Arc<VirtualMachineReconciler>) -> Result<Action> {
    let name = vm.name_any();
    let namespace = vm.namespace().unwrap_or_default();
    let api: Api<VirtualMachine> = Api::namespaced(ctx.client.clone(), &namespace);
    let has_finalizer = vm.finalizers().iter().any(|f| f == FINALIZER);

    if vm.is_deleting() && !has_finalizer {
        debug!("Virtual machine {} is going away, nothing to release", vm.key());
        return Ok(Action::await_change());
    }
    if !vm.is_deleting() && !has_finalizer {
        let mut finalizers = vm.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        set_finalizers(&api, &name, finalizers).await?;
    }

    debug!("Reconciling virtual machine: {}", vm.key());
    let status = ctx.orchestrator.process(&vm).await;

    if vm.status.as_ref() != Some(&status) {
        persist_status(&api, &name, &status).await?;
    }

    if vm.is_deleting() {
        let released = VirtualMachine {
            status: Some(status),
            ..(*vm).clone()
        };
        if released.stacks_released() {
            let finalizers = vm
                .finalizers()
                .iter()
                .filter(|f| *f != FINALIZER)
                .cloned()
                .collect();
            set_finalizers(&api, &name, finalizers).await?;
            info!("Released virtual machine {}", vm.key());
            return Ok(Action::await_change());
        }
    }

    Ok(Action::requeue(ctx.config.resync_period))
}

async fn set_finalizers(api: &Api<VirtualMachine>, name: &str, finalizers: Vec<String>) -> Result<()> {
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Write `status` onto the latest version of the object, retrying on conflicts
async fn persist_status(api: &Api<VirtualMachine>, name: &str, status: &VirtualMachineStatus) -> Result<()> {
    for attempt in 1..=STATUS_UPDATE_ATTEMPTS {
        let mut latest = api.get(name).await?;
        latest.status = Some(status.clone());
        let data = serde_json::to_vec(&latest)
            .map_err(|e| StackPilotError::Invariant(format!("unserializable status: {}", e)))?;

        match api.replace_status(name, &PostParams::default(), data).await {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!("Status of {} changed underneath (attempt {})", name, attempt);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(StackPilotError::Invariant(format!(
        "status of {} still conflicting after {} attempts",
        name, STATUS_UPDATE_ATTEMPTS
    )))
}

fn error_policy(
    _vm: Arc<VirtualMachine>,
    error: &StackPilotError,
    _ctx: Arc<VirtualMachineReconciler>,
) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(Duration::from_secs(60))
}
