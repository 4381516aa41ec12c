// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Load balancer stage.
//!
//! Pool members come either from the VM group of the same object or from the
//! pods behind a link. Member order is stabilized by the reconciler hook
//! installed for load balancer templates (see [`super::member_order`]).

use super::member_order::member_order_from_template;
use super::{generate_stack_name, AddressTable, LbAddress};
use crate::cache::ResourceCache;
use crate::constants::stack::LOADBALANCER_PREFIX;
use crate::error::{Result, StackPilotError};
use crate::kubernetes::link::{Link, LinkDiscovery};
use crate::provider::{AuthContext, LoadBalancerRecord, ProviderPage, ResourceKind};
use crate::render::{ListenerParams, LoadBalancerParams, TemplateKind};
use crate::stack::{StackReconciler, StageOutcome};
use crate::sync::{PageCallback, ServiceSync};
use crate::types::virtual_machine::{LoadBalanceSpec, PortMapping};
use crate::types::{EndpointStatus, ResourceStatus, ServerStat};
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct LoadBalancerProcessor {
    reconciler: Arc<StackReconciler>,
    discovery: Arc<dyn LinkDiscovery>,
    services: Arc<ServiceSync>,
    addresses: Arc<AddressTable>,
    /// Load balancers by name, which is also their stack name
    balancers: Arc<ResourceCache<LoadBalancerRecord>>,
}

impl LoadBalancerProcessor {
    pub fn new(
        reconciler: Arc<StackReconciler>,
        discovery: Arc<dyn LinkDiscovery>,
        services: Arc<ServiceSync>,
        addresses: Arc<AddressTable>,
    ) -> Self {
        Self {
            reconciler,
            discovery,
            services,
            addresses,
            balancers: Arc::new(ResourceCache::new(ResourceKind::LoadBalancers)),
        }
    }

    pub fn page_callback(&self) -> PageCallback {
        let balancers = Arc::clone(&self.balancers);
        Arc::new(move |page: ProviderPage| {
            if let ProviderPage::LoadBalancers(records) = page {
                balancers.apply_page(records.into_iter().map(|r| (r.name.clone(), r)));
            }
        })
    }

    /// Key under which the address of this load balancer is published
    pub fn address_reference(owner: &str, spec: &LoadBalanceSpec) -> String {
        spec.link.clone().unwrap_or_else(|| owner.to_string())
    }

    /// Reconcile the load balancer of `owner`. `vm_members` are the member
    /// addresses of the object's VM group, `None` when it has none.
    #[instrument(skip(self, auth, spec, vm_members, status), fields(loadbalancer = %spec.name))]
    pub async fn process(
        &self,
        auth: &AuthContext,
        owner: &str,
        spec: &LoadBalanceSpec,
        vm_members: Option<&[String]>,
        status: &mut ResourceStatus,
    ) -> Result<StageOutcome> {
        validate(spec)?;

        let members = match &spec.link {
            Some(raw) => {
                let link: Link = raw.parse()?;
                let ips = self.discovery.member_ips(&link).await?;
                self.services.register_link(owner, &link, &spec.ports);
                ips
            }
            None => match vm_members {
                Some(ips) => ips.to_vec(),
                None => {
                    return Err(StackPilotError::Validation(
                        "a load balancer needs either a link or a server group".to_string(),
                    ))
                }
            },
        };

        if members.is_empty() && !status.is_created() {
            return Ok(StageOutcome::Pending("no member addresses resolved yet".to_string()));
        }

        if status.stack_name.is_empty() {
            status.stack_name = generate_stack_name(LOADBALANCER_PREFIX, &spec.name);
        }

        let params = LoadBalancerParams {
            name: status.stack_name.clone(),
            subnet_id: spec.subnet_id.clone(),
            vip_address: spec.vip_address.clone(),
            ports: listeners(&spec.ports, &members),
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| StackPilotError::Render(e.to_string()))?;

        let outcome = self
            .reconciler
            .reconcile(auth, TemplateKind::LoadBalancer, params, status)
            .await?;

        status.members = member_order_from_template(&status.last_template, &status.stack_name)
            .into_iter()
            .map(|ip| ServerStat {
                ip,
                ..Default::default()
            })
            .collect();

        let entry = self.balancers.listen(&status.stack_name);
        if entry.is_observed() {
            let record = entry.record;
            status.endpoint = Some(EndpointStatus {
                id: record.id.clone(),
                ip: record.vip_address.clone(),
                port_id: record.vip_port_id.clone(),
                status: record.provisioning_status.clone(),
            });
            if !record.vip_address.is_empty() {
                debug!("Publishing address {} of {}", record.vip_address, status.stack_name);
                self.addresses.publish(
                    owner,
                    &Self::address_reference(owner, spec),
                    LbAddress {
                        ip: record.vip_address,
                        port_id: record.vip_port_id,
                    },
                );
            }
        }

        Ok(outcome)
    }

    /// Tear down the load balancer of `owner` and forget everything published for it
    pub async fn delete(
        &self,
        auth: &AuthContext,
        owner: &str,
        status: &mut ResourceStatus,
    ) -> Result<()> {
        let stack_name = status.stack_name.clone();
        self.reconciler.delete(auth, status).await?;
        if !stack_name.is_empty() {
            self.balancers.remove(&stack_name);
        }
        self.addresses.evict_owner(owner);
        self.services.remove_owner(owner);
        Ok(())
    }
}

fn validate(spec: &LoadBalanceSpec) -> Result<()> {
    if spec.ports.is_empty() {
        return Err(StackPilotError::Validation(
            "a load balancer needs at least one port".to_string(),
        ));
    }
    if let Some(port) = spec.ports.iter().find(|p| p.port <= 0 || p.port > 65535) {
        return Err(StackPilotError::Validation(format!(
            "port {} out of range",
            port.port
        )));
    }
    if spec.subnet_id.is_empty() || spec.name.is_empty() {
        return Err(StackPilotError::Validation(
            "load balancer name and subnetId are required".to_string(),
        ));
    }
    Ok(())
}

fn listeners(ports: &[PortMapping], members: &[String]) -> Vec<ListenerParams> {
    ports
        .iter()
        .map(|p| ListenerParams {
            port: p.port,
            protocol: p.protocol.to_uppercase(),
            members: members.to_vec(),
        })
        .collect()
}
