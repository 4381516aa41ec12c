// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::provider::AuthContext;
use crate::types::status::{Condition, ResourceStatus};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

/// Desired state of a group of cloud resources realized as orchestration stacks:
/// a VM group, a load balancer in front of it (or in front of linked pods) and a
/// floating IP.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "stackpilot.io", version = "v1", kind = "VirtualMachine")]
#[kube(namespaced)]
#[kube(status = "VirtualMachineStatus")]
#[kube(shortname = "svm")]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balance: Option<LoadBalanceSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<PublicSpec>,
}

impl VirtualMachine {
    /// Whether deletion of this object has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// `namespace/name` of this object
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Whether every stack owned by this object has been torn down
    pub fn stacks_released(&self) -> bool {
        self.status.as_ref().map_or(true, |s| {
            [&s.vm_status, &s.net_status, &s.pub_status]
                .into_iter()
                .flatten()
                .all(|r| r.stack_id.is_empty())
        })
    }
}

/// Credentials used to create stacks on behalf of the owning project
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    pub token: String,
    pub project_id: String,
}

impl From<&AuthSpec> for AuthContext {
    fn from(auth: &AuthSpec) -> Self {
        AuthContext {
            token: auth.token.clone(),
            project_id: auth.project_id.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Network the instances attach to; also selects which instance address is reported
    pub network_name: String,
    pub subnet_id: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum PowerState {
    Running,
    Stopped,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    pub name: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    pub flavor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_volume_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_size_gb: Option<u32>,
    pub subnet: SubnetSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_state: Option<PowerState>,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub port: i32,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalanceSpec {
    pub name: String,
    pub subnet_id: String,
    /// Fixed virtual IP; allocated by the provider when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vip_address: Option<String>,
    /// Reference to a pod or deployment supplying the member addresses,
    /// e.g. `/apis/apps/v1/namespaces/demo/deployments/web`. Members come
    /// from the VM group when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub ports: Vec<PortMapping>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressSpec {
    /// Allocate a new address from the floating network
    #[serde(default)]
    pub allocate: bool,
    /// Bind an existing address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicSpec {
    pub address: AddressSpec,
    #[serde(default)]
    pub floating_network_id: String,
    /// Pod reference to attach to; attaches to the load balancer when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Bandwidth limit in Mbps, unlimited when zero
    #[serde(default)]
    pub mbps: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_status: Option<ResourceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_status: Option<ResourceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pub_status: Option<ResourceStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
