// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Links from a VirtualMachine to pods or deployments in the cluster.
//!
//! A link is the API path of the referenced object, e.g.
//! `/apis/apps/v1/namespaces/demo/deployments/web` or
//! `/api/v1/namespaces/demo/pods/web-0`. Linked pods supply load balancer
//! members (their secondary network addresses), and a load balancer fronting
//! a link is published back into the cluster as a Service.

use crate::constants::{NETWORKS_STATUS_ANNOTATION, OPERATOR_NAME};
use crate::error::{Result, StackPilotError};
use crate::types::virtual_machine::PortMapping;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

const POD_TEMPLATE_HASH: &str = "pod-template-hash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Pod,
    Deployment,
}

impl LinkKind {
    fn plural(self) -> &'static str {
        match self {
            LinkKind::Pod => "pods",
            LinkKind::Deployment => "deployments",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Empty for the core API group
    pub group: String,
    pub version: String,
    pub namespace: String,
    pub kind: LinkKind,
    pub name: String,
}

impl Link {
    /// Name of the Service publishing a load balancer in front of this link
    pub fn service_name(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }

    /// `namespace/name` of the linked object
    pub fn namespace_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl FromStr for Link {
    type Err = StackPilotError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| StackPilotError::InvalidLink(format!("{}: {}", s, reason));
        let parts: Vec<&str> = s.split('/').collect();

        let (group, rest) = match parts.as_slice() {
            ["", "api", rest @ ..] => ("", rest),
            ["", "apis", group, rest @ ..] => (*group, rest),
            _ => return Err(invalid("expected /api/... or /apis/<group>/...")),
        };
        let [version, "namespaces", namespace, kind, name] = rest else {
            return Err(invalid("expected <version>/namespaces/<namespace>/<kind>/<name>"));
        };
        if [*version, *namespace, *name].iter().any(|p| p.is_empty()) {
            return Err(invalid("empty path segment"));
        }

        let kind = match (group, *kind) {
            ("", "pods") => LinkKind::Pod,
            ("apps", "deployments") => LinkKind::Deployment,
            (_, other) => return Err(invalid(&format!("unsupported kind {}", other))),
        };

        Ok(Link {
            group: group.to_string(),
            version: version.to_string(),
            namespace: namespace.to_string(),
            kind,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "/api/{}", self.version)?;
        } else {
            write!(f, "/apis/{}/{}", self.group, self.version)?;
        }
        write!(
            f,
            "/namespaces/{}/{}/{}",
            self.namespace,
            self.kind.plural(),
            self.name
        )
    }
}

/// Cluster side of links: member discovery and Service publication
#[async_trait]
pub trait LinkDiscovery: Send + Sync {
    /// Secondary network addresses of every pod selected by the link, sorted
    async fn member_ips(&self, link: &Link) -> Result<Vec<String>>;

    /// Whether the linked object exists
    async fn exists(&self, link: &Link) -> Result<bool>;

    /// Create or update the Service exposing `external_ip` for the linked pods
    async fn apply_service(&self, link: &Link, external_ip: &str, ports: &[PortMapping]) -> Result<()>;

    /// Delete the Service of a link; a missing Service is not an error
    async fn delete_service(&self, link: &Link) -> Result<()>;
}

pub struct KubeLinkDiscovery {
    client: Client,
    network: String,
}

impl KubeLinkDiscovery {
    pub fn new(client: Client, network: impl Into<String>) -> Self {
        Self {
            client,
            network: network.into(),
        }
    }

    /// Labels selecting the pods behind a link
    async fn selector(&self, link: &Link) -> Result<BTreeMap<String, String>> {
        let labels = match link.kind {
            LinkKind::Pod => {
                let pods: Api<Pod> = Api::namespaced(self.client.clone(), &link.namespace);
                pods.get(&link.name).await?.labels().clone()
            }
            LinkKind::Deployment => {
                let deployments: Api<Deployment> =
                    Api::namespaced(self.client.clone(), &link.namespace);
                deployments
                    .get(&link.name)
                    .await?
                    .spec
                    .and_then(|s| s.selector.match_labels)
                    .unwrap_or_default()
            }
        };

        let selector: BTreeMap<String, String> = labels
            .into_iter()
            .filter(|(k, _)| k != POD_TEMPLATE_HASH)
            .collect();
        if selector.is_empty() {
            return Err(StackPilotError::InvalidLink(format!(
                "{} has no labels to select pods by",
                link
            )));
        }
        Ok(selector)
    }
}

#[async_trait]
impl LinkDiscovery for KubeLinkDiscovery {
    #[instrument(skip(self), fields(link = %link))]
    async fn member_ips(&self, link: &Link) -> Result<Vec<String>> {
        let selector = self.selector(link).await?;
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &link.namespace);
        let list = pods
            .list(&ListParams::default().labels(&label_selector(&selector)))
            .await?;

        let mut ips: Vec<String> = list
            .items
            .iter()
            .flat_map(|pod| secondary_ips(pod, &self.network))
            .collect();
        ips.sort();
        ips.dedup();
        debug!("Found {} member addresses", ips.len());
        Ok(ips)
    }

    async fn exists(&self, link: &Link) -> Result<bool> {
        let found = match link.kind {
            LinkKind::Pod => {
                let pods: Api<Pod> = Api::namespaced(self.client.clone(), &link.namespace);
                pods.get_opt(&link.name).await?.is_some()
            }
            LinkKind::Deployment => {
                let deployments: Api<Deployment> =
                    Api::namespaced(self.client.clone(), &link.namespace);
                deployments.get_opt(&link.name).await?.is_some()
            }
        };
        Ok(found)
    }

    #[instrument(skip(self, ports), fields(link = %link))]
    async fn apply_service(&self, link: &Link, external_ip: &str, ports: &[PortMapping]) -> Result<()> {
        let selector = self.selector(link).await?;
        let service = build_service(link, selector, external_ip, ports);
        let services: Api<Service> = Api::namespaced(self.client.clone(), &link.namespace);

        services
            .patch(
                &link.service_name(),
                &PatchParams::apply(OPERATOR_NAME).force(),
                &Patch::Apply(&service),
            )
            .await?;
        info!("Applied service {}/{} for {}", link.namespace, link.service_name(), external_ip);
        Ok(())
    }

    #[instrument(skip(self), fields(link = %link))]
    async fn delete_service(&self, link: &Link) -> Result<()> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), &link.namespace);
        match services
            .delete(&link.service_name(), &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("Deleted service {}/{}", link.namespace, link.service_name());
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!("Service {} already gone", link.service_name());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Deserialize)]
struct NetworkStatus {
    #[serde(default)]
    name: String,
    #[serde(default)]
    ips: Vec<String>,
}

/// Addresses a pod holds on `network`, read from its network status annotation
pub fn secondary_ips(pod: &Pod, network: &str) -> Vec<String> {
    let Some(raw) = pod.annotations().get(NETWORKS_STATUS_ANNOTATION) else {
        return Vec::new();
    };
    let statuses: Vec<NetworkStatus> = match serde_json::from_str(raw) {
        Ok(s) => s,
        Err(e) => {
            warn!("Pod {} has a malformed network status: {}", pod.name_any(), e);
            return Vec::new();
        }
    };

    statuses
        .into_iter()
        .filter(|s| s.name == network)
        .flat_map(|s| s.ips)
        .filter_map(|ip| ip.parse::<IpAddr>().ok())
        .map(|ip| ip.to_string())
        .collect()
}

fn build_service(
    link: &Link,
    selector: BTreeMap<String, String>,
    external_ip: &str,
    ports: &[PortMapping],
) -> Service {
    let ports = ports
        .iter()
        .map(|p| {
            let protocol = match p.protocol.to_uppercase().as_str() {
                "UDP" => "UDP",
                _ => "TCP",
            };
            ServicePort {
                name: Some(format!("{}-{}", protocol.to_lowercase(), p.port)),
                port: p.port,
                protocol: Some(protocol.to_string()),
                target_port: Some(IntOrString::Int(p.port)),
                ..Default::default()
            }
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(link.service_name()),
            namespace: Some(link.namespace.clone()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                OPERATOR_NAME.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(ports),
            external_ips: Some(vec![external_ip.to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
