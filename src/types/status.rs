// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Observed state of the stacks owned by a VirtualMachine.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of one orchestration stack
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum StackPhase {
    Creating,
    Updating,
    Succeeded,
    Failed,
    Deleting,
}

impl fmt::Display for StackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StackPhase::Creating => "Creating",
            StackPhase::Updating => "Updating",
            StackPhase::Succeeded => "Succeeded",
            StackPhase::Failed => "Failed",
            StackPhase::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

/// State of one managed stack (VM group, load balancer or floating IP).
///
/// `stack_id` is only set once a create call returned a provider ID, and
/// `content_hash` only changes after the provider accepted a create or update.
/// An empty `content_hash` means the stack has not been created yet.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub stack_id: String,
    #[serde(default)]
    pub stack_name: String,
    #[serde(default)]
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<StackPhase>,
    /// Last accepted rendered template, as JSON
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_template: String,
    /// Instances of a VM group, or pool members of a load balancer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<ServerStat>,
    /// Resolved address of a load balancer or floating IP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointStatus>,
}

impl ResourceStatus {
    pub fn named(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            ..Default::default()
        }
    }

    pub fn is_created(&self) -> bool {
        !self.content_hash.is_empty()
    }

    /// Non-empty member addresses in slot order
    pub fn member_ips(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| !m.ip.is_empty())
            .map(|m| m.ip.clone())
            .collect()
    }
}

/// Summary of one instance (or pod) behind a stack
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerStat {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

/// Resolved endpoint of a load balancer (virtual IP and its port) or a floating IP
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port_id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    pub last_transition_time: String,
}

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

/// Set the condition of one stage. There is at most one condition per type;
/// it is only rewritten when its status or its reason changes,
/// so a persistent failure does not churn the status.
///
/// Returns whether the conditions changed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
) -> bool {
    let now = Utc::now().to_rfc3339();

    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        if existing.status == status && existing.reason == reason {
            return false;
        }
        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.last_transition_time = now;
        return true;
    }

    conditions.push(Condition {
        condition_type: condition_type.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        last_transition_time: now,
    });
    true
}

/// Record an error against a stage
pub fn record_condition(
    conditions: &mut Vec<Condition>,
    stage: &str,
    err: &impl fmt::Display,
) -> bool {
    set_condition(conditions, stage, CONDITION_FALSE, &err.to_string())
}

/// Drop the condition of a stage that no longer applies
pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.condition_type != condition_type);
    conditions.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackPilotError;

    #[test]
    fn test_record_condition_dedups_identical_errors() {
        let mut conditions = Vec::new();
        let err = StackPilotError::Validation("port 0 out of range".to_string());

        assert!(record_condition(&mut conditions, "LoadBalancer", &err));
        assert!(!record_condition(&mut conditions, "LoadBalancer", &err));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, CONDITION_FALSE);
        assert_eq!(conditions[0].reason, "Invalid spec: port 0 out of range");
    }

    #[test]
    fn test_record_condition_keeps_one_entry_per_stage() {
        let mut conditions = Vec::new();

        record_condition(&mut conditions, "Server", &"first failure");
        record_condition(&mut conditions, "Server", &"second failure");
        record_condition(&mut conditions, "FloatingIp", &"first failure");

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].reason, "second failure");
    }

    #[test]
    fn test_set_condition_transition_keeps_time_when_unchanged() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Ready", CONDITION_TRUE, "");
        let first = conditions[0].last_transition_time.clone();

        assert!(!set_condition(&mut conditions, "Ready", CONDITION_TRUE, ""));
        assert_eq!(conditions[0].last_transition_time, first);
    }

    #[test]
    fn test_set_condition_status_change() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Ready", CONDITION_FALSE, "waiting");

        assert!(set_condition(&mut conditions, "Ready", CONDITION_TRUE, "waiting"));
        assert_eq!(conditions[0].status, CONDITION_TRUE);
    }

    #[test]
    fn test_set_condition_reason_change() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Ready", CONDITION_FALSE, "waiting for Server");

        assert!(set_condition(&mut conditions, "Ready", CONDITION_FALSE, "waiting for FloatingIp"));
        assert_eq!(conditions[0].reason, "waiting for FloatingIp");
        assert!(!set_condition(&mut conditions, "Ready", CONDITION_FALSE, "waiting for FloatingIp"));
    }

    #[test]
    fn test_remove_condition() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Server", CONDITION_TRUE, "");
        set_condition(&mut conditions, "LoadBalancer", CONDITION_UNKNOWN, "waiting");

        assert!(remove_condition(&mut conditions, "LoadBalancer"));
        assert!(!remove_condition(&mut conditions, "LoadBalancer"));
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_member_ips_skip_blank() {
        let status = ResourceStatus {
            members: vec![
                ServerStat {
                    ip: "10.0.0.1".to_string(),
                    ..Default::default()
                },
                ServerStat::default(),
            ],
            ..Default::default()
        };

        assert_eq!(status.member_ips(), vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&StackPhase::Succeeded).unwrap();
        assert_eq!(json, "\"Succeeded\"");
    }
}
