// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resource processors: one per stack kind owned by a VirtualMachine.
//!
//! Each processor maps its part of the spec onto template parameters, hands
//! them to the [`StackReconciler`](crate::stack::StackReconciler) and merges
//! cached provider state into the observed status.

pub mod floating_ip;
pub mod loadbalancer;
pub mod member_order;
pub mod server;

use crate::constants::stack::SUFFIX_LEN;
use crate::stack::content_hash;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;

pub use floating_ip::FloatingIpProcessor;
pub use loadbalancer::LoadBalancerProcessor;
pub use server::ServerProcessor;

const NAME_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// `<prefix>-<name>-<random suffix>`, chosen once per stack
pub fn generate_stack_name(prefix: &str, name: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| NAME_CHARSET[rng.gen_range(0..NAME_CHARSET.len())] as char)
        .collect();
    format!("{}-{}-{}", prefix, name, suffix)
}

/// Virtual IP of a load balancer and the provider port holding it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LbAddress {
    pub ip: String,
    pub port_id: String,
}

#[derive(Debug, Clone)]
struct PublishedAddress {
    owner: String,
    address: LbAddress,
}

/// Load balancer addresses published for the floating IP stage and the link
/// service sync. Entries are keyed by a digest of the load balancer's link (or
/// of its owner when it has none) and remember the owning object for eviction.
#[derive(Debug, Default)]
pub struct AddressTable {
    entries: RwLock<HashMap<String, PublishedAddress>>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &str) -> Option<LbAddress> {
        self.entries
            .read()
            .get(&content_hash(reference.as_bytes()))
            .map(|e| e.address.clone())
    }

    pub fn publish(&self, owner: &str, reference: &str, address: LbAddress) {
        self.entries.write().insert(
            content_hash(reference.as_bytes()),
            PublishedAddress {
                owner: owner.to_string(),
                address,
            },
        );
    }

    /// Drop every address published by `owner`
    pub fn evict_owner(&self, owner: &str) {
        self.entries.write().retain(|_, e| e.owner != owner);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
