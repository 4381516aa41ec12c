// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The operator name used for server-side apply
pub const OPERATOR_NAME: &str = "stackpilot";

/// Finalizer guarding provider-side cleanup of a VirtualMachine
pub const FINALIZER: &str = "stackpilot.io/finalizer";

/// API group of the VirtualMachine custom resource
pub const API_GROUP: &str = "stackpilot.io";

/// Stack naming and tagging
pub mod stack {
    /// Tag attached to every stack we create, used to filter stack listings
    pub const TAG: &str = "stackpilot";
    /// Prefix of VM group stacks; also prefixes every server name in the group
    pub const SERVER_PREFIX: &str = "vm";
    /// Prefix of load balancer stacks
    pub const LOADBALANCER_PREFIX: &str = "lb";
    /// Prefix of floating IP stacks
    pub const FLOATING_IP_PREFIX: &str = "fip";
    /// Length of the random suffix appended to generated stack names
    pub const SUFFIX_LEN: usize = 5;
}

/// Provider status codes as reported by the orchestration service
pub mod status {
    pub const CREATE_IN_PROGRESS: &str = "CREATE_IN_PROGRESS";
    pub const CREATE_COMPLETE: &str = "CREATE_COMPLETE";
    pub const CREATE_FAILED: &str = "CREATE_FAILED";
    pub const UPDATE_IN_PROGRESS: &str = "UPDATE_IN_PROGRESS";
    pub const UPDATE_COMPLETE: &str = "UPDATE_COMPLETE";
    pub const UPDATE_FAILED: &str = "UPDATE_FAILED";

    /// Compute instance states
    pub const SERVER_ACTIVE: &str = "ACTIVE";
    pub const SERVER_SHUTOFF: &str = "SHUTOFF";
}

/// Condition types, one per reconciliation stage
pub mod conditions {
    pub const CHECK: &str = "Check";
    pub const SERVER: &str = "Server";
    pub const LOADBALANCER: &str = "LoadBalancer";
    pub const FLOATING_IP: &str = "FloatingIp";
    pub const READY: &str = "Ready";
}

/// Pod annotation carrying multus/kuryr network attachment status
pub const NETWORKS_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks-status";

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Maximum attempts of the status read-modify-write loop
pub const STATUS_UPDATE_ATTEMPTS: usize = 5;
