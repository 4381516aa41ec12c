// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Runs the stages of one VirtualMachine in order: VM group, load balancer,
//! floating IP. Each stage reports through its own condition; a failing stage
//! does not stop the stages after it.

use crate::cache::ResourceCache;
use crate::constants::conditions::{CHECK, FLOATING_IP, LOADBALANCER, READY, SERVER};
use crate::error::Result;
use crate::kubernetes::link::LinkDiscovery;
use crate::processors::member_order::stabilize_listener_members;
use crate::processors::{AddressTable, FloatingIpProcessor, LoadBalancerProcessor, ServerProcessor};
use crate::provider::{AuthContext, CloudProvider, ResourceKind};
use crate::render::{TemplateKind, TemplateRenderer};
use crate::stack::{StackReconciler, StageOutcome};
use crate::sync::{PollerBuilder, ProviderPoller, ServiceSync};
use crate::types::status::{
    record_condition, remove_condition, set_condition, CONDITION_FALSE, CONDITION_TRUE,
    CONDITION_UNKNOWN,
};
use crate::types::{Condition, ResourceStatus, VirtualMachine, VirtualMachineStatus};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub struct Orchestrator {
    servers: ServerProcessor,
    balancers: LoadBalancerProcessor,
    floating_ips: FloatingIpProcessor,
}

impl Orchestrator {
    /// Wire the processors together and register their caches with a poller.
    /// The poller is returned unstarted.
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        renderer: Arc<dyn TemplateRenderer>,
        discovery: Arc<dyn LinkDiscovery>,
        services: Arc<ServiceSync>,
        addresses: Arc<AddressTable>,
        poll_period: Duration,
    ) -> Result<(Self, ProviderPoller)> {
        let reconciler = Arc::new(
            StackReconciler::new(
                Arc::clone(&provider),
                renderer,
                Arc::new(ResourceCache::new(ResourceKind::Stacks)),
            )
            .with_reorder_hook(TemplateKind::LoadBalancer, stabilize_listener_members),
        );

        let servers = ServerProcessor::new(Arc::clone(&reconciler), Arc::clone(&provider));
        let balancers = LoadBalancerProcessor::new(
            Arc::clone(&reconciler),
            Arc::clone(&discovery),
            services,
            Arc::clone(&addresses),
        );
        let floating_ips = FloatingIpProcessor::new(Arc::clone(&reconciler), discovery, addresses);

        let poller = PollerBuilder::new(provider)
            .register(ResourceKind::Stacks, reconciler.page_callback())?
            .register(ResourceKind::Instances, servers.page_callback())?
            .register(ResourceKind::LoadBalancers, balancers.page_callback())?
            .register(ResourceKind::FloatingIps, floating_ips.floating_ip_callback())?
            .register(ResourceKind::Ports, floating_ips.port_callback())?
            .build(poll_period);

        Ok((
            Self {
                servers,
                balancers,
                floating_ips,
            },
            poller,
        ))
    }

    /// Run one pass over `vm` and return its new status
    #[instrument(skip(self, vm), fields(vm = %vm.key()))]
    pub async fn process(&self, vm: &VirtualMachine) -> VirtualMachineStatus {
        let mut status = vm.status.clone().unwrap_or_default();

        let auth = match &vm.spec.auth {
            Some(auth) => {
                set_condition(&mut status.conditions, CHECK, CONDITION_TRUE, "");
                AuthContext::from(auth)
            }
            None => {
                set_condition(
                    &mut status.conditions,
                    CHECK,
                    CONDITION_FALSE,
                    "spec.auth is required",
                );
                if !vm.is_deleting() {
                    return status;
                }
                AuthContext::default()
            }
        };

        if vm.is_deleting() {
            self.teardown(&auth, vm, &mut status).await;
            return status;
        }

        let owner = vm.key();
        let mut waiting = Vec::new();

        // VM group
        match &vm.spec.server {
            Some(spec) => {
                let slot = status.vm_status.get_or_insert_with(ResourceStatus::default);
                let result = self.servers.process(&auth, spec, slot).await;
                if !record_stage(&mut status.conditions, SERVER, result) {
                    waiting.push(SERVER);
                }
            }
            None => {
                if let Some(mut slot) = status.vm_status.take() {
                    let result = self.servers.delete(&auth, &mut slot).await;
                    release_stage(&mut status.conditions, SERVER, &mut status.vm_status, slot, result);
                }
            }
        }

        // Load balancer
        let vm_members = vm.spec.server.as_ref().map(|_| {
            status
                .vm_status
                .as_ref()
                .map(ResourceStatus::member_ips)
                .unwrap_or_default()
        });
        match &vm.spec.load_balance {
            Some(spec) => {
                let slot = status.net_status.get_or_insert_with(ResourceStatus::default);
                let result = self
                    .balancers
                    .process(&auth, &owner, spec, vm_members.as_deref(), slot)
                    .await;
                if !record_stage(&mut status.conditions, LOADBALANCER, result) {
                    waiting.push(LOADBALANCER);
                }
            }
            None => {
                if let Some(mut slot) = status.net_status.take() {
                    let result = self.balancers.delete(&auth, &owner, &mut slot).await;
                    release_stage(
                        &mut status.conditions,
                        LOADBALANCER,
                        &mut status.net_status,
                        slot,
                        result,
                    );
                }
            }
        }

        // Floating IP
        let lb_reference = vm
            .spec
            .load_balance
            .as_ref()
            .map(|lb| LoadBalancerProcessor::address_reference(&owner, lb));
        match &vm.spec.public {
            Some(spec) => {
                let slot = status.pub_status.get_or_insert_with(ResourceStatus::default);
                let result = self
                    .floating_ips
                    .process(&auth, &vm.name_any(), lb_reference.as_deref(), spec, slot)
                    .await;
                if !record_stage(&mut status.conditions, FLOATING_IP, result) {
                    waiting.push(FLOATING_IP);
                }
            }
            None => {
                if let Some(mut slot) = status.pub_status.take() {
                    let result = self.floating_ips.delete(&auth, None, &mut slot).await;
                    release_stage(
                        &mut status.conditions,
                        FLOATING_IP,
                        &mut status.pub_status,
                        slot,
                        result,
                    );
                }
            }
        }

        if waiting.is_empty() {
            set_condition(&mut status.conditions, READY, CONDITION_TRUE, "");
        } else {
            set_condition(
                &mut status.conditions,
                READY,
                CONDITION_FALSE,
                &format!("waiting for {}", waiting.join(", ")),
            );
        }

        status
    }

    /// Delete the stacks of `vm`, floating IP first and VM group last. Stops at
    /// the first failure; the next pass picks up where this one stopped.
    async fn teardown(&self, auth: &AuthContext, vm: &VirtualMachine, status: &mut VirtualMachineStatus) {
        let owner = vm.key();
        set_condition(&mut status.conditions, READY, CONDITION_FALSE, "deleting");

        if let Some(mut slot) = status.pub_status.take() {
            let result = self
                .floating_ips
                .delete(auth, vm.spec.public.as_ref(), &mut slot)
                .await;
            if !release_stage(&mut status.conditions, FLOATING_IP, &mut status.pub_status, slot, result) {
                return;
            }
        }

        if let Some(mut slot) = status.net_status.take() {
            let result = self.balancers.delete(auth, &owner, &mut slot).await;
            if !release_stage(&mut status.conditions, LOADBALANCER, &mut status.net_status, slot, result) {
                return;
            }
        }

        if let Some(mut slot) = status.vm_status.take() {
            let result = self.servers.delete(auth, &mut slot).await;
            if release_stage(&mut status.conditions, SERVER, &mut status.vm_status, slot, result) {
                info!("Released every stack of {}", owner);
            }
        }
    }
}

/// Map a stage result onto its condition; returns whether the stage is done
fn record_stage(conditions: &mut Vec<Condition>, stage: &str, result: Result<StageOutcome>) -> bool {
    match result {
        Ok(StageOutcome::Done) => {
            set_condition(conditions, stage, CONDITION_TRUE, "");
            true
        }
        Ok(StageOutcome::Pending(reason)) => {
            set_condition(conditions, stage, CONDITION_UNKNOWN, &reason);
            false
        }
        Ok(StageOutcome::Failed(reason)) => {
            warn!("{} failed: {}", stage, reason);
            set_condition(conditions, stage, CONDITION_FALSE, &reason);
            false
        }
        Err(e) => {
            warn!("{} stage error: {}", stage, e);
            record_condition(conditions, stage, &e);
            false
        }
    }
}

/// Settle a stage teardown. A released stage loses its status and condition;
/// a failed one keeps its status for the next attempt. Returns whether it was released.
fn release_stage(
    conditions: &mut Vec<Condition>,
    stage: &str,
    target: &mut Option<ResourceStatus>,
    slot: ResourceStatus,
    result: Result<()>,
) -> bool {
    match result {
        Ok(()) => {
            remove_condition(conditions, stage);
            true
        }
        Err(e) => {
            warn!("Failed to release {}: {}", stage, e);
            record_condition(conditions, stage, &e);
            *target = Some(slot);
            false
        }
    }
}
