// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Floating IP stage.
//!
//! A floating IP binds either to the virtual IP port of the object's load
//! balancer or to the port of a linked pod. Pod ports are named after the pod
//! (`namespace/name`), which is how they are found in port listings.

use super::{generate_stack_name, AddressTable};
use crate::cache::ResourceCache;
use crate::constants::stack::FLOATING_IP_PREFIX;
use crate::error::{Result, StackPilotError};
use crate::kubernetes::link::{Link, LinkDiscovery, LinkKind};
use crate::provider::{AuthContext, FloatingIpRecord, PortRecord, ProviderPage, ResourceKind};
use crate::render::{FloatingIpParams, TemplateKind};
use crate::stack::{StackReconciler, StageOutcome};
use crate::sync::PageCallback;
use crate::types::virtual_machine::PublicSpec;
use crate::types::{EndpointStatus, ResourceStatus};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Port a floating IP is bound to, with the fixed address on that port
struct BindTarget {
    port_id: String,
    fixed_ip: String,
}

enum Resolved<T> {
    Ready(T),
    Wait(StageOutcome),
}

pub struct FloatingIpProcessor {
    reconciler: Arc<StackReconciler>,
    discovery: Arc<dyn LinkDiscovery>,
    addresses: Arc<AddressTable>,
    /// Floating IPs by the port they are bound to
    fips: Arc<ResourceCache<FloatingIpRecord>>,
    /// Floating IPs by address, for binding existing addresses
    statics: Arc<ResourceCache<FloatingIpRecord>>,
    /// Pod ports by name
    ports: Arc<ResourceCache<PortRecord>>,
}

impl FloatingIpProcessor {
    pub fn new(
        reconciler: Arc<StackReconciler>,
        discovery: Arc<dyn LinkDiscovery>,
        addresses: Arc<AddressTable>,
    ) -> Self {
        Self {
            reconciler,
            discovery,
            addresses,
            fips: Arc::new(ResourceCache::new(ResourceKind::FloatingIps)),
            statics: Arc::new(ResourceCache::new(ResourceKind::FloatingIps)),
            ports: Arc::new(ResourceCache::evicting_absent(ResourceKind::Ports)),
        }
    }

    pub fn floating_ip_callback(&self) -> PageCallback {
        let fips = Arc::clone(&self.fips);
        let statics = Arc::clone(&self.statics);
        Arc::new(move |page: ProviderPage| {
            if let ProviderPage::FloatingIps(records) = page {
                fips.apply_page(
                    records
                        .iter()
                        .filter(|r| !r.port_id.is_empty())
                        .map(|r| (r.port_id.clone(), r.clone())),
                );
                statics.apply_page(records.into_iter().map(|r| (r.floating_ip.clone(), r)));
            }
        })
    }

    pub fn port_callback(&self) -> PageCallback {
        let ports = Arc::clone(&self.ports);
        Arc::new(move |page: ProviderPage| {
            if let ProviderPage::Ports(records) = page {
                ports.apply_page(records.into_iter().map(|r| (r.name.clone(), r)));
            }
        })
    }

    /// Reconcile the floating IP of the object named `object_name`.
    /// `lb_reference` is where the object's load balancer publishes its address,
    /// `None` when the object has no load balancer.
    #[instrument(skip(self, auth, lb_reference, spec, status), fields(object = %object_name))]
    pub async fn process(
        &self,
        auth: &AuthContext,
        object_name: &str,
        lb_reference: Option<&str>,
        spec: &PublicSpec,
        status: &mut ResourceStatus,
    ) -> Result<StageOutcome> {
        let static_ip = validate(spec)?;

        let target = match &spec.link {
            Some(raw) => match self.resolve_pod_port(auth, raw, spec, status).await? {
                Resolved::Ready(target) => target,
                Resolved::Wait(outcome) => return Ok(outcome),
            },
            None => {
                let Some(reference) = lb_reference else {
                    return Err(StackPilotError::Validation(
                        "a floating IP needs either a link or a load balancer".to_string(),
                    ));
                };
                match self.addresses.get(reference) {
                    Some(a) if !a.ip.is_empty() && !a.port_id.is_empty() => BindTarget {
                        port_id: a.port_id,
                        fixed_ip: a.ip,
                    },
                    _ => {
                        return Ok(StageOutcome::Pending(
                            "waiting for the load balancer address".to_string(),
                        ))
                    }
                }
            }
        };

        let floating_ip_id = match &static_ip {
            Some(ip) => {
                let entry = self.statics.listen(ip);
                if !entry.synced {
                    return Ok(StageOutcome::Pending(format!(
                        "looking up floating IP {}",
                        ip
                    )));
                }
                if !entry.present || entry.record.id.is_empty() {
                    return Ok(StageOutcome::Failed(format!(
                        "floating IP {} does not exist",
                        ip
                    )));
                }
                Some(entry.record.id)
            }
            None => None,
        };

        if status.stack_name.is_empty() {
            status.stack_name = generate_stack_name(FLOATING_IP_PREFIX, object_name);
        }

        let params = FloatingIpParams {
            name: status.stack_name.clone(),
            floating_network_id: spec.floating_network_id.clone(),
            port_id: target.port_id.clone(),
            fixed_ip: Some(target.fixed_ip.clone()),
            floating_ip_id,
            bandwidth_kbps: u64::from(spec.mbps) * 1024,
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| StackPilotError::Render(e.to_string()))?;

        let previous_hash = status.content_hash.clone();
        let outcome = self
            .reconciler
            .reconcile(auth, TemplateKind::FloatingIp, params, status)
            .await?;
        let written = status.content_hash != previous_hash;

        // the binding only moves once the provider accepted the new template
        let endpoint = status.endpoint.get_or_insert_with(EndpointStatus::default);
        if endpoint.port_id != target.port_id {
            if endpoint.port_id.is_empty() {
                endpoint.port_id = target.port_id.clone();
            } else if written {
                debug!("Floating IP moved off port {}", endpoint.port_id);
                self.fips.remove(&endpoint.port_id);
                *endpoint = EndpointStatus {
                    port_id: target.port_id.clone(),
                    ..Default::default()
                };
            } else {
                debug!(
                    "Floating IP still bound to port {}, move to {} waits for the stack",
                    endpoint.port_id, target.port_id
                );
            }
        }

        let entry = match &static_ip {
            Some(ip) => self.statics.listen(ip),
            None => self.fips.listen(&endpoint.port_id),
        };
        if entry.is_observed() {
            endpoint.id = entry.record.id;
            endpoint.ip = entry.record.floating_ip;
            endpoint.status = entry.record.status;
        }

        Ok(outcome)
    }

    async fn resolve_pod_port(
        &self,
        auth: &AuthContext,
        raw: &str,
        spec: &PublicSpec,
        status: &mut ResourceStatus,
    ) -> Result<Resolved<BindTarget>> {
        let link: Link = raw.parse()?;
        if link.kind != LinkKind::Pod {
            return Err(StackPilotError::Validation(format!(
                "a floating IP can only link to a pod, not {}",
                link
            )));
        }

        let name = link.namespace_name();
        if !self.discovery.exists(&link).await? {
            warn!("Linked pod {} not found, releasing floating IP", name);
            self.delete(auth, Some(spec), status).await?;
            return Ok(Resolved::Wait(StageOutcome::Failed(format!(
                "linked pod {} not found",
                name
            ))));
        }

        let entry = self.ports.listen(&name);
        if !entry.is_observed() || entry.record.id.is_empty() || entry.record.fixed_ip.is_empty() {
            return Ok(Resolved::Wait(StageOutcome::Pending(format!(
                "waiting for the port of pod {}",
                name
            ))));
        }
        Ok(Resolved::Ready(BindTarget {
            port_id: entry.record.id,
            fixed_ip: entry.record.fixed_ip,
        }))
    }

    /// Tear down the floating IP and drop every cache interest it registered
    pub async fn delete(
        &self,
        auth: &AuthContext,
        spec: Option<&PublicSpec>,
        status: &mut ResourceStatus,
    ) -> Result<()> {
        let endpoint = status.endpoint.clone();
        self.reconciler.delete(auth, status).await?;

        if let Some(endpoint) = endpoint {
            if !endpoint.port_id.is_empty() {
                self.fips.remove(&endpoint.port_id);
            }
        }
        if let Some(spec) = spec {
            if let Some(link) = spec.link.as_deref().and_then(|l| l.parse::<Link>().ok()) {
                self.ports.remove(&link.namespace_name());
            }
            if let Some(ip) = spec.address.ip.as_deref().and_then(canonical_ip) {
                self.statics.remove(&ip);
            }
        }
        Ok(())
    }
}

fn canonical_ip(raw: &str) -> Option<String> {
    raw.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

/// Check the address request; returns the static address to bind, if any
fn validate(spec: &PublicSpec) -> Result<Option<String>> {
    let requested = spec.address.ip.as_deref().filter(|ip| !ip.is_empty());

    match (spec.address.allocate, requested) {
        (true, Some(_)) => Err(StackPilotError::Validation(
            "set either address.allocate or address.ip, not both".to_string(),
        )),
        (false, None) => Err(StackPilotError::Validation(
            "one of address.allocate or address.ip must be set".to_string(),
        )),
        (true, None) => {
            if spec.floating_network_id.is_empty() {
                return Err(StackPilotError::Validation(
                    "floatingNetworkId is required to allocate an address".to_string(),
                ));
            }
            Ok(None)
        }
        (false, Some(raw)) => canonical_ip(raw).map(Some).ok_or_else(|| {
            StackPilotError::Validation(format!("{} is not an IP address", raw))
        }),
    }
}
