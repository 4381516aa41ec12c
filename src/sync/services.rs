// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Publishes load balancers that front linked pods back into the cluster.
//!
//! The load balancer stage registers each link it serves together with its
//! port map. A periodic pass looks up the published virtual IP of every link
//! and applies a Service carrying that address, or deletes the Service once
//! the link is no longer served.

use crate::kubernetes::link::{Link, LinkDiscovery};
use crate::processors::AddressTable;
use crate::stack::content_hash;
use crate::types::virtual_machine::PortMapping;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
struct LinkRegistration {
    owner: String,
    link: Link,
    ports: Vec<PortMapping>,
    deleted: bool,
    /// Digest of the last applied address and port map
    applied: Option<String>,
}

pub struct ServiceSync {
    discovery: Arc<dyn LinkDiscovery>,
    addresses: Arc<AddressTable>,
    links: Mutex<HashMap<String, LinkRegistration>>,
}

impl ServiceSync {
    pub fn new(discovery: Arc<dyn LinkDiscovery>, addresses: Arc<AddressTable>) -> Self {
        Self {
            discovery,
            addresses,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Serve `link` on behalf of `owner`. Any other link the owner served is released.
    pub fn register_link(&self, owner: &str, link: &Link, ports: &[PortMapping]) {
        let key = link.to_string();
        let mut links = self.links.lock();

        for (other, registration) in links.iter_mut() {
            if registration.owner == owner && *other != key && !registration.deleted {
                info!("Link {} of {} replaced by {}", other, owner, key);
                registration.deleted = true;
            }
        }

        let registration = links.entry(key).or_insert_with(|| LinkRegistration {
            owner: owner.to_string(),
            link: link.clone(),
            ports: Vec::new(),
            deleted: false,
            applied: None,
        });
        registration.owner = owner.to_string();
        registration.ports = ports.to_vec();
        registration.deleted = false;
    }

    /// Release every link served on behalf of `owner`
    pub fn remove_owner(&self, owner: &str) {
        for registration in self.links.lock().values_mut() {
            if registration.owner == owner {
                registration.deleted = true;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.lock().is_empty()
    }

    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        info!("Link service sync started, period {:?}", period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.sync_once() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(period) => {}
            }
        }
        info!("Link service sync stopped");
    }

    /// Bring the Service of every registered link in line with its load balancer
    pub async fn sync_once(&self) {
        let snapshot: Vec<(String, LinkRegistration)> = self
            .links
            .lock()
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();

        for (key, registration) in snapshot {
            if registration.deleted {
                match self.discovery.delete_service(&registration.link).await {
                    Ok(()) => {
                        let mut links = self.links.lock();
                        if links.get(&key).is_some_and(|r| r.deleted) {
                            links.remove(&key);
                        }
                    }
                    Err(e) => error!("Failed to delete service for {}: {}", key, e),
                }
                continue;
            }

            let Some(address) = self.addresses.get(&key) else {
                debug!("No load balancer address for {} yet", key);
                continue;
            };
            let digest = service_digest(&address.ip, &registration.ports);
            if registration.applied.as_deref() == Some(digest.as_str()) {
                continue;
            }

            match self
                .discovery
                .apply_service(&registration.link, &address.ip, &registration.ports)
                .await
            {
                Ok(()) => {
                    if let Some(current) = self.links.lock().get_mut(&key) {
                        if !current.deleted && current.ports == registration.ports {
                            current.applied = Some(digest);
                        }
                    }
                }
                Err(e) => error!("Failed to apply service for {}: {}", key, e),
            }
        }
    }
}

fn service_digest(ip: &str, ports: &[PortMapping]) -> String {
    let mut material = ip.to_string();
    for port in ports {
        material.push_str(&format!(";{}/{}", port.port, port.protocol.to_uppercase()));
    }
    content_hash(material.as_bytes())
}
