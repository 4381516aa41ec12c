// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Template rendering boundary.
//!
//! Processors describe a stack as a generic JSON tree (one of the parameter
//! types below, serialized) and a renderer turns it into the document submitted
//! to the orchestration service. Rendering is pure: the same tree always yields
//! the same bytes.

pub mod hot;

use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use hot::HotRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Server,
    LoadBalancer,
    FloatingIp,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TemplateKind::Server => "server",
            TemplateKind::LoadBalancer => "loadbalancer",
            TemplateKind::FloatingIp => "floatingip",
        };
        f.write_str(s)
    }
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, kind: TemplateKind, params: &serde_json::Value) -> Result<Bytes>;
}

/// A group of identical instances, named `<name>-<index>`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerParams {
    pub name: String,
    pub replicas: u32,
    pub flavor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_volume_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size_gb: Option<u32>,
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

/// One listener with its pool. A blank member keeps its slot without a resource.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerParams {
    pub port: i32,
    pub protocol: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerParams {
    pub name: String,
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip_address: Option<String>,
    pub ports: Vec<ListenerParams>,
}

/// Floating IP bound to a port. `floating_ip_id` selects an existing address,
/// otherwise a new one is allocated from `floating_network_id`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIpParams {
    pub name: String,
    #[serde(default)]
    pub floating_network_id: String,
    pub port_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_ip_id: Option<String>,
    #[serde(default)]
    pub bandwidth_kbps: u64,
}
