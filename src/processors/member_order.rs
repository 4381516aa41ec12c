// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Positional stability of load balancer pool members.
//!
//! Members are rendered as indexed child resources (`<lb>-member<N>-p<port>`).
//! Moving an address to another index looks like a delete plus a create to the
//! provider, so addresses keep their index across renders: removed members
//! leave a blank slot and new members are appended.

use crate::types::ResourceStatus;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

/// Member addresses by index as recorded in a rendered template (JSON).
/// Indexes without a member resource come back as blank strings.
pub fn member_order_from_template(template: &str, lb_name: &str) -> Vec<String> {
    let Ok(document) = serde_json::from_str::<Value>(template) else {
        return Vec::new();
    };
    let Some(resources) = document.get("resources").and_then(Value::as_object) else {
        return Vec::new();
    };

    let prefix = format!("{}-member", lb_name);
    let mut slots: BTreeMap<usize, String> = BTreeMap::new();
    for (key, resource) in resources {
        let Some(index) = member_index(key, &prefix) else {
            continue;
        };
        let Some(address) = resource.pointer("/properties/address").and_then(Value::as_str) else {
            continue;
        };
        slots.entry(index).or_insert_with(|| address.to_string());
    }

    let Some(&last) = slots.keys().next_back() else {
        return Vec::new();
    };
    (0..=last)
        .map(|i| slots.get(&i).cloned().unwrap_or_default())
        .collect()
}

fn member_index(key: &str, prefix: &str) -> Option<usize> {
    let rest = key.strip_prefix(prefix)?;
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let (index, tail) = rest.split_at(digits);
    if !tail.is_empty() && !tail.starts_with("-p") {
        return None;
    }
    index.parse().ok()
}

/// Ascending by numeric address; strings that are not addresses sort last
pub fn compare_addresses(a: &str, b: &str) -> Ordering {
    match (a.parse::<IpAddr>(), b.parse::<IpAddr>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Order `desired` so that every address already in `old` keeps its index.
/// Old addresses that are no longer desired become blank slots; new addresses
/// are appended in ascending address order.
pub fn stabilize_member_order(old: &[String], desired: &[String]) -> Vec<String> {
    let mut fresh: Vec<String> = desired.iter().filter(|a| !a.is_empty()).cloned().collect();
    fresh.sort_by(|a, b| compare_addresses(a, b));
    fresh.dedup();

    if old.is_empty() || fresh.is_empty() {
        return fresh;
    }

    let wanted: HashSet<&str> = fresh.iter().map(String::as_str).collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut order: Vec<String> = old
        .iter()
        .map(|address| {
            if !address.is_empty()
                && wanted.contains(address.as_str())
                && placed.insert(address.as_str())
            {
                address.clone()
            } else {
                String::new()
            }
        })
        .collect();

    order.extend(
        fresh
            .iter()
            .filter(|a| !placed.contains(a.as_str()))
            .cloned(),
    );
    order
}

/// Reorder hook for load balancer templates: replace the member list of every
/// listener with one stable order derived from the previous template.
pub fn stabilize_listener_members(params: &mut Value, status: &ResourceStatus) {
    let Some(name) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    let Some(ports) = params.get_mut("ports").and_then(Value::as_array_mut) else {
        return;
    };

    let desired: Vec<String> = ports
        .iter()
        .filter_map(|p| p.get("members").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    let old = member_order_from_template(&status.last_template, &name);
    let order = stabilize_member_order(&old, &desired);

    for port in ports.iter_mut() {
        port["members"] = Value::from(order.clone());
    }
}
