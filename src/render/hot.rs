// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Built-in renderer producing Heat Orchestration Templates.

use super::{
    FloatingIpParams, LoadBalancerParams, ServerParams, TemplateKind, TemplateRenderer,
};
use crate::error::{Result, StackPilotError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

const HOT_VERSION: &str = "2018-08-31";

#[derive(Debug, Clone, Default)]
pub struct HotRenderer;

impl HotRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateRenderer for HotRenderer {
    fn render(&self, kind: TemplateKind, params: &Value) -> Result<Bytes> {
        let document = match kind {
            TemplateKind::Server => server_template(&parse(kind, params)?),
            TemplateKind::LoadBalancer => loadbalancer_template(&parse(kind, params)?),
            TemplateKind::FloatingIp => floating_ip_template(&parse(kind, params)?),
        };

        let rendered = serde_yaml::to_string(&document)
            .map_err(|e| StackPilotError::Render(format!("{} template: {}", kind, e)))?;
        Ok(Bytes::from(rendered))
    }
}

fn parse<T: DeserializeOwned>(kind: TemplateKind, params: &Value) -> Result<T> {
    serde_json::from_value(params.clone())
        .map_err(|e| StackPilotError::Render(format!("invalid {} parameters: {}", kind, e)))
}

fn document(description: String, resources: Map<String, Value>, outputs: Value) -> Value {
    json!({
        "heat_template_version": HOT_VERSION,
        "description": description,
        "resources": resources,
        "outputs": outputs,
    })
}

fn server_template(p: &ServerParams) -> Value {
    let mut resources = Map::new();
    let mut outputs = Map::new();

    for i in 0..p.replicas {
        let name = format!("{}-{}", p.name, i);
        let mut props = Map::new();
        props.insert("name".into(), json!(name));
        props.insert("flavor".into(), json!(p.flavor));
        props.insert("networks".into(), json!([{ "subnet": p.subnet_id }]));

        match (&p.boot_volume_id, &p.image, p.volume_size_gb) {
            (Some(volume), _, _) => {
                props.insert(
                    "block_device_mapping_v2".into(),
                    json!([{ "boot_index": 0, "volume_id": volume, "delete_on_termination": false }]),
                );
            }
            (None, Some(image), Some(size)) => {
                props.insert(
                    "block_device_mapping_v2".into(),
                    json!([{
                        "boot_index": 0,
                        "image": image,
                        "volume_size": size,
                        "delete_on_termination": true,
                    }]),
                );
            }
            (None, Some(image), None) => {
                props.insert("image".into(), json!(image));
            }
            (None, None, _) => {}
        }

        if let Some(key) = &p.key_name {
            props.insert("key_name".into(), json!(key));
        }
        if let Some(data) = &p.user_data {
            props.insert("user_data".into(), json!(data));
            props.insert("user_data_format".into(), json!("RAW"));
        }
        if !p.security_groups.is_empty() {
            props.insert("security_groups".into(), json!(p.security_groups));
        }
        if let Some(zone) = &p.availability_zone {
            props.insert("availability_zone".into(), json!(zone));
        }

        outputs.insert(
            format!("{}-id", name),
            json!({ "value": { "get_resource": name } }),
        );
        resources.insert(name, json!({ "type": "OS::Nova::Server", "properties": props }));
    }

    document(
        format!("Server group {}", p.name),
        resources,
        Value::Object(outputs),
    )
}

fn loadbalancer_template(p: &LoadBalancerParams) -> Value {
    let lb = p.name.as_str();
    let mut resources = Map::new();

    let mut lb_props = Map::new();
    lb_props.insert("name".into(), json!(lb));
    lb_props.insert("vip_subnet".into(), json!(p.subnet_id));
    if let Some(vip) = &p.vip_address {
        lb_props.insert("vip_address".into(), json!(vip));
    }
    resources.insert(
        lb.to_string(),
        json!({ "type": "OS::Octavia::LoadBalancer", "properties": lb_props }),
    );

    for listener in &p.ports {
        let protocol = listener.protocol.to_uppercase();
        let listener_name = format!("{}-listener-p{}", lb, listener.port);
        let pool_name = format!("{}-pool-p{}", lb, listener.port);

        resources.insert(
            listener_name.clone(),
            json!({
                "type": "OS::Octavia::Listener",
                "properties": {
                    "loadbalancer": { "get_resource": lb },
                    "protocol": protocol,
                    "protocol_port": listener.port,
                }
            }),
        );
        resources.insert(
            pool_name.clone(),
            json!({
                "type": "OS::Octavia::Pool",
                "properties": {
                    "listener": { "get_resource": listener_name },
                    "lb_algorithm": "ROUND_ROBIN",
                    "protocol": protocol,
                }
            }),
        );

        for (index, address) in listener.members.iter().enumerate() {
            if address.is_empty() {
                continue;
            }
            resources.insert(
                format!("{}-member{}-p{}", lb, index, listener.port),
                json!({
                    "type": "OS::Octavia::PoolMember",
                    "properties": {
                        "pool": { "get_resource": pool_name },
                        "address": address,
                        "protocol_port": listener.port,
                        "subnet": p.subnet_id,
                    }
                }),
            );
        }
    }

    document(
        format!("Load balancer {}", lb),
        resources,
        json!({
            "vip_address": { "value": { "get_attr": [lb, "vip_address"] } },
            "vip_port_id": { "value": { "get_attr": [lb, "vip_port_id"] } },
        }),
    )
}

fn floating_ip_template(p: &FloatingIpParams) -> Value {
    let mut resources = Map::new();

    match &p.floating_ip_id {
        Some(id) => {
            let mut props = Map::new();
            props.insert("floatingip_id".into(), json!(id));
            props.insert("port_id".into(), json!(p.port_id));
            if let Some(fixed) = &p.fixed_ip {
                props.insert("fixed_ip_address".into(), json!(fixed));
            }
            resources.insert(
                p.name.clone(),
                json!({ "type": "OS::Neutron::FloatingIPAssociation", "properties": props }),
            );
        }
        None => {
            let mut props = Map::new();
            props.insert("floating_network".into(), json!(p.floating_network_id));
            props.insert("port_id".into(), json!(p.port_id));
            if let Some(fixed) = &p.fixed_ip {
                props.insert("fixed_ip_address".into(), json!(fixed));
            }
            if p.bandwidth_kbps > 0 {
                let policy = format!("{}-qos", p.name);
                props.insert("qos_policy".into(), json!({ "get_resource": policy }));
                resources.insert(
                    policy.clone(),
                    json!({ "type": "OS::Neutron::QoSPolicy", "properties": { "name": policy } }),
                );
                resources.insert(
                    format!("{}-qos-rule", p.name),
                    json!({
                        "type": "OS::Neutron::QoSBandwidthLimitRule",
                        "properties": {
                            "policy": { "get_resource": policy },
                            "max_kbps": p.bandwidth_kbps,
                        }
                    }),
                );
            }
            resources.insert(
                p.name.clone(),
                json!({ "type": "OS::Neutron::FloatingIP", "properties": props }),
            );
        }
    }

    document(
        format!("Floating IP {}", p.name),
        resources,
        json!({}),
    )
}
