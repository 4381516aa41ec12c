// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cloud provider boundary: the orchestration and listing capabilities the
//! reconciler relies on, and the typed records returned by listings.

pub mod openstack;

use async_trait::async_trait;
use http::StatusCode;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use openstack::OpenStackProvider;

/// Provider resource kinds that are polled into the resource caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Stacks,
    Instances,
    LoadBalancers,
    FloatingIps,
    Ports,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Stacks,
        ResourceKind::Instances,
        ResourceKind::LoadBalancers,
        ResourceKind::FloatingIps,
        ResourceKind::Ports,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Stacks => "stacks",
            ResourceKind::Instances => "instances",
            ResourceKind::LoadBalancers => "loadbalancers",
            ResourceKind::FloatingIps => "floatingips",
            ResourceKind::Ports => "ports",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackRecord {
    pub id: String,
    pub name: String,
    pub status: String,
    pub status_reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created: Option<String>,
    /// First IPv4 address per network name
    pub addresses: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadBalancerRecord {
    pub id: String,
    pub name: String,
    pub vip_address: String,
    pub vip_port_id: String,
    pub provisioning_status: String,
    pub operating_status: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloatingIpRecord {
    pub id: String,
    pub floating_ip: String,
    pub port_id: String,
    pub fixed_ip: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortRecord {
    pub id: String,
    pub name: String,
    pub status: String,
    pub fixed_ip: String,
}

/// Every listed resource of one kind, across all provider pages
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderPage {
    Stacks(Vec<StackRecord>),
    Instances(Vec<InstanceRecord>),
    LoadBalancers(Vec<LoadBalancerRecord>),
    FloatingIps(Vec<FloatingIpRecord>),
    Ports(Vec<PortRecord>),
}

impl ProviderPage {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ProviderPage::Stacks(_) => ResourceKind::Stacks,
            ProviderPage::Instances(_) => ResourceKind::Instances,
            ProviderPage::LoadBalancers(_) => ResourceKind::LoadBalancers,
            ProviderPage::FloatingIps(_) => ResourceKind::FloatingIps,
            ProviderPage::Ports(_) => ResourceKind::Ports,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ProviderPage::Stacks(v) => v.len(),
            ProviderPage::Instances(v) => v.len(),
            ProviderPage::LoadBalancers(v) => v.len(),
            ProviderPage::FloatingIps(v) => v.len(),
            ProviderPage::Ports(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request failed with status {status}: {message}")]
    Other { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Classify a non-success HTTP response
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::CONFLICT => ProviderError::Conflict(message),
            StatusCode::NOT_FOUND => ProviderError::NotFound(message),
            StatusCode::UNAUTHORIZED => ProviderError::Unauthorized(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                ProviderError::Transient(message)
            }
            s if s.is_server_error() => ProviderError::Transient(message),
            s => ProviderError::Other {
                status: s.as_u16(),
                message,
            },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ProviderError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Identity a stack is created under
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub token: String,
    pub project_id: String,
}

/// How an existing stack receives a new template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Only the template changes, parameters and other options are kept
    Patch,
    /// The stack is re-submitted as a whole
    Replace,
}

/// Remote orchestration and inventory capabilities of a cloud provider.
///
/// Implementations carry their own request deadline; callers never wrap calls
/// in timeouts.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create a stack and return its provider ID
    async fn create_stack(
        &self,
        auth: &AuthContext,
        name: &str,
        template: &[u8],
    ) -> ProviderResult<String>;

    async fn update_stack(
        &self,
        name: &str,
        id: &str,
        template: &[u8],
        mode: UpdateMode,
    ) -> ProviderResult<()>;

    async fn delete_stack(&self, name: &str, id: &str) -> ProviderResult<()>;

    /// Look up the ID of a stack by its name
    async fn find_stack(&self, auth: &AuthContext, name: &str) -> ProviderResult<Option<String>>;

    /// List every resource of one kind, following pagination
    async fn list(&self, kind: ResourceKind) -> ProviderResult<ProviderPage>;

    async fn start_server(&self, id: &str) -> ProviderResult<()>;

    async fn stop_server(&self, id: &str) -> ProviderResult<()>;
}
