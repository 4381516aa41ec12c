// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! OpenStack implementation of the provider boundary.
//!
//! Authenticates against Keystone with password credentials, resolves the
//! orchestration, compute, network and load-balancer endpoints from the service
//! catalog, and re-authenticates transparently when a request is rejected with
//! `401`.

use super::{
    AuthContext, CloudProvider, FloatingIpRecord, InstanceRecord, LoadBalancerRecord,
    PortRecord, ProviderError, ProviderPage, ProviderResult, ResourceKind, StackRecord,
    UpdateMode,
};
use crate::constants::stack::TAG;
use crate::error::{Result, StackPilotError};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use url::Url;

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const MAX_PAGES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    Orchestration,
    Compute,
    Network,
    LoadBalancer,
}

impl Service {
    fn catalog_type(self) -> &'static str {
        match self {
            Service::Orchestration => "orchestration",
            Service::Compute => "compute",
            Service::Network => "network",
            Service::LoadBalancer => "load-balancer",
        }
    }
}

/// Password credentials of the operator's service account
#[derive(Debug, Clone)]
pub struct OpenStackCredentials {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub project_name: String,
    pub user_domain: String,
    pub project_domain: String,
    pub region: Option<String>,
    pub interface: String,
}

impl OpenStackCredentials {
    /// Load credentials from the standard `OS_*` environment variables
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| {
            env::var(name)
                .map_err(|_| StackPilotError::Config(format!("{} environment variable not set", name)))
        };

        Ok(OpenStackCredentials {
            auth_url: required("OS_AUTH_URL")?,
            username: required("OS_USERNAME")?,
            password: required("OS_PASSWORD")?,
            project_name: required("OS_PROJECT_NAME")?,
            user_domain: env::var("OS_USER_DOMAIN_NAME").unwrap_or_else(|_| "Default".to_string()),
            project_domain: env::var("OS_PROJECT_DOMAIN_NAME")
                .unwrap_or_else(|_| "Default".to_string()),
            region: env::var("OS_REGION_NAME").ok(),
            interface: env::var("OS_INTERFACE").unwrap_or_else(|_| "public".to_string()),
        })
    }
}

#[derive(Debug)]
struct Session {
    token: String,
    project_id: String,
    endpoints: BTreeMap<&'static str, String>,
}

impl Session {
    fn endpoint(&self, service: Service) -> ProviderResult<&str> {
        self.endpoints
            .get(service.catalog_type())
            .map(|s| s.as_str())
            .ok_or_else(|| {
                ProviderError::Decode(format!(
                    "service catalog has no {} endpoint",
                    service.catalog_type()
                ))
            })
    }
}

/// Shared handle to one OpenStack cloud, constructed once and passed to
/// every component that talks to the provider.
pub struct OpenStackProvider {
    http: reqwest::Client,
    credentials: OpenStackCredentials,
    session: RwLock<Option<Arc<Session>>>,
    stack_timeout_mins: u32,
}

impl OpenStackProvider {
    pub fn new(
        credentials: OpenStackCredentials,
        request_timeout: Duration,
        stack_timeout_mins: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StackPilotError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            credentials,
            session: RwLock::new(None),
            stack_timeout_mins,
        })
    }

    async fn session(&self) -> ProviderResult<Arc<Session>> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(Arc::clone(session));
        }
        self.refresh_session().await
    }

    /// Request a fresh token and service catalog, replacing the current session
    pub async fn reauthenticate(&self) -> ProviderResult<()> {
        self.refresh_session().await.map(|_| ())
    }

    #[instrument(skip(self), fields(user = %self.credentials.username))]
    async fn refresh_session(&self) -> ProviderResult<Arc<Session>> {
        let mut guard = self.session.write().await;
        let creds = &self.credentials;
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": creds.username,
                            "domain": {"name": creds.user_domain},
                            "password": creds.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": creds.project_name,
                        "domain": {"name": creds.project_domain},
                    }
                }
            }
        });

        let url = format!("{}/auth/tokens", creds.auth_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Decode("token response without subject token".to_string()))?;
        let value: Value = response.json().await.map_err(request_error)?;
        let session = parse_session(token, &value, &creds.interface, creds.region.as_deref())?;

        info!("Authenticated against {} as project {}", creds.auth_url, session.project_id);
        let session = Arc::new(session);
        *guard = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Send a request with the service account token, re-authenticating once on `401`
    async fn send<F>(&self, service: Service, build: F) -> ProviderResult<Response>
    where
        F: Fn(&reqwest::Client, &str) -> RequestBuilder,
    {
        let mut session = self.session().await?;
        let mut retried = false;

        loop {
            let base = session.endpoint(service)?;
            let response = build(&self.http, base)
                .header(AUTH_TOKEN_HEADER, &session.token)
                .send()
                .await
                .map_err(request_error)?;

            match check_status(response).await {
                Err(ProviderError::Unauthorized(msg)) if !retried => {
                    warn!("Token rejected ({}), re-authenticating", msg);
                    session = self.refresh_session().await?;
                    retried = true;
                }
                other => return other,
            }
        }
    }

    /// Send an orchestration request in the name of the owning project
    async fn send_as<F>(&self, auth: &AuthContext, build: F) -> ProviderResult<Response>
    where
        F: Fn(&reqwest::Client, &str) -> RequestBuilder,
    {
        if auth.token.is_empty() {
            return self.send(Service::Orchestration, build).await;
        }

        let session = self.session().await?;
        let base = session
            .endpoint(Service::Orchestration)?
            .replace(&session.project_id, &auth.project_id);
        let response = build(&self.http, &base)
            .header(AUTH_TOKEN_HEADER, &auth.token)
            .send()
            .await
            .map_err(request_error)?;
        check_status(response).await
    }

    async fn list_all(&self, service: Service, path: &str, collection: &str) -> ProviderResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut next: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let response = match next.take() {
                Some(href) => self.send(service, |http, _| http.get(&href)).await?,
                None => {
                    self.send(service, |http, base| http.get(join(base, path)))
                        .await?
                }
            };
            let value: Value = response.json().await.map_err(request_error)?;
            if let Some(page) = value.get(collection).and_then(Value::as_array) {
                items.extend(page.iter().cloned());
            }
            match next_link(&value, collection) {
                Some(href) => next = Some(href),
                None => return Ok(items),
            }
        }

        warn!("Stopped listing {} after {} pages", collection, MAX_PAGES);
        Ok(items)
    }

    fn stack_body(&self, template: &[u8]) -> ProviderResult<Value> {
        let template: Value = serde_yaml::from_slice(template)
            .map_err(|e| ProviderError::Decode(format!("rendered template is not valid YAML: {}", e)))?;
        Ok(json!({
            "template": template,
            "timeout_mins": self.stack_timeout_mins,
            "tags": TAG,
        }))
    }

    async fn server_action(&self, id: &str, action: &str) -> ProviderResult<()> {
        let path = format!("servers/{}/action", id);
        let body = json!({ action: Value::Null });
        self.send(Service::Compute, |http, base| {
            http.post(join(base, &path)).json(&body)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for OpenStackProvider {
    #[instrument(skip(self, auth, template), fields(project = %auth.project_id))]
    async fn create_stack(&self, auth: &AuthContext, name: &str, template: &[u8]) -> ProviderResult<String> {
        let mut body = self.stack_body(template)?;
        body["stack_name"] = Value::String(name.to_string());

        let response = self
            .send_as(auth, |http, base| http.post(join(base, "stacks")).json(&body))
            .await?;
        let value: Value = response.json().await.map_err(request_error)?;

        value
            .pointer("/stack/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Decode(format!("create of stack {} returned no id", name)))
    }

    #[instrument(skip(self, template))]
    async fn update_stack(&self, name: &str, id: &str, template: &[u8], mode: UpdateMode) -> ProviderResult<()> {
        let body = self.stack_body(template)?;
        let path = format!("stacks/{}/{}", name, id);
        let method = match mode {
            UpdateMode::Patch => Method::PATCH,
            UpdateMode::Replace => Method::PUT,
        };

        self.send(Service::Orchestration, |http, base| {
            http.request(method.clone(), join(base, &path)).json(&body)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_stack(&self, name: &str, id: &str) -> ProviderResult<()> {
        let path = format!("stacks/{}/{}", name, id);
        self.send(Service::Orchestration, |http, base| http.delete(join(base, &path)))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, auth))]
    async fn find_stack(&self, auth: &AuthContext, name: &str) -> ProviderResult<Option<String>> {
        let response = self
            .send_as(auth, |http, base| {
                http.get(join(base, "stacks")).query(&[("name", name)])
            })
            .await?;
        let value: Value = response.json().await.map_err(request_error)?;
        let stacks = parse_stacks(
            value
                .get("stacks")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        )?;

        Ok(stacks.into_iter().find(|s| s.name == name).map(|s| s.id))
    }

    async fn list(&self, kind: ResourceKind) -> ProviderResult<ProviderPage> {
        debug!("Listing {}", kind);
        let page = match kind {
            ResourceKind::Stacks => {
                let path = format!("stacks?global_tenant=True&tags={}", TAG);
                let items = self.list_all(Service::Orchestration, &path, "stacks").await?;
                ProviderPage::Stacks(parse_stacks(&items)?)
            }
            ResourceKind::Instances => {
                let items = self
                    .list_all(Service::Compute, "servers/detail?all_tenants=True", "servers")
                    .await?;
                ProviderPage::Instances(parse_instances(&items)?)
            }
            ResourceKind::LoadBalancers => {
                let items = self
                    .list_all(Service::LoadBalancer, "v2/lbaas/loadbalancers", "loadbalancers")
                    .await?;
                ProviderPage::LoadBalancers(parse_loadbalancers(&items)?)
            }
            ResourceKind::FloatingIps => {
                let items = self
                    .list_all(Service::Network, "v2.0/floatingips", "floatingips")
                    .await?;
                ProviderPage::FloatingIps(parse_floating_ips(&items)?)
            }
            ResourceKind::Ports => {
                let items = self.list_all(Service::Network, "v2.0/ports", "ports").await?;
                ProviderPage::Ports(parse_ports(&items)?)
            }
        };
        Ok(page)
    }

    async fn start_server(&self, id: &str) -> ProviderResult<()> {
        self.server_action(id, "os-start").await
    }

    async fn stop_server(&self, id: &str) -> ProviderResult<()> {
        self.server_action(id, "os-stop").await
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() || e.is_connect() {
        ProviderError::Transient(e.to_string())
    } else if e.is_decode() {
        ProviderError::Decode(e.to_string())
    } else {
        match e.status() {
            Some(status) => ProviderError::from_status(status, e.to_string()),
            None => ProviderError::Transient(e.to_string()),
        }
    }
}

async fn check_status(response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status, error_message(&body)))
}

/// Pull a human readable message out of an OpenStack error body
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let found = ["/error/message", "/message", "/faultstring", "/NeutronError/message"]
        .iter()
        .find_map(|p| value.pointer(p).and_then(Value::as_str))
        .or_else(|| {
            value
                .as_object()
                .and_then(|o| o.values().find_map(|v| v.get("message")))
                .and_then(Value::as_str)
        });
    found.map(str::to_string).unwrap_or_else(|| body.trim().to_string())
}

fn next_link(value: &Value, collection: &str) -> Option<String> {
    let links = value
        .get(format!("{}_links", collection))
        .or_else(|| value.get("links"))?
        .as_array()?;
    links
        .iter()
        .find(|l| l.get("rel").and_then(Value::as_str) == Some("next"))
        .and_then(|l| l.get("href"))
        .and_then(Value::as_str)
        .filter(|href| Url::parse(href).is_ok())
        .map(str::to_string)
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

fn parse_session(token: String, value: &Value, interface: &str, region: Option<&str>) -> ProviderResult<Session> {
    let project_id = value
        .pointer("/token/project/id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Decode("token is not project scoped".to_string()))?
        .to_string();
    let catalog: Vec<CatalogEntry> = value
        .pointer("/token/catalog")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ProviderError::Decode(format!("invalid service catalog: {}", e)))?
        .unwrap_or_default();

    let services = [
        Service::Orchestration,
        Service::Compute,
        Service::Network,
        Service::LoadBalancer,
    ];
    let mut endpoints = BTreeMap::new();
    for service in services {
        let url = catalog
            .iter()
            .filter(|e| e.service_type == service.catalog_type())
            .flat_map(|e| e.endpoints.iter())
            .find(|e| e.interface == interface && (region.is_none() || e.region.as_deref() == region))
            .map(|e| e.url.clone());
        if let Some(url) = url {
            endpoints.insert(service.catalog_type(), url);
        }
    }

    Ok(Session {
        token,
        project_id,
        endpoints,
    })
}

fn decode<T: for<'de> Deserialize<'de>>(items: &[Value]) -> ProviderResult<Vec<T>> {
    items
        .iter()
        .map(|v| serde_json::from_value(v.clone()).map_err(|e| ProviderError::Decode(e.to_string())))
        .collect()
}

#[derive(Deserialize)]
struct ListedStack {
    id: String,
    stack_name: String,
    stack_status: String,
    #[serde(default)]
    stack_status_reason: Option<String>,
}

fn parse_stacks(items: &[Value]) -> ProviderResult<Vec<StackRecord>> {
    Ok(decode::<ListedStack>(items)?
        .into_iter()
        .map(|s| StackRecord {
            id: s.id,
            name: s.stack_name,
            status: s.stack_status,
            // only the first line carries the summary, the rest is a resource trace
            status_reason: s
                .stack_status_reason
                .unwrap_or_default()
                .lines()
                .next()
                .unwrap_or_default()
                .to_string(),
        })
        .collect())
}

#[derive(Deserialize)]
struct ListedAddress {
    addr: String,
    #[serde(default)]
    version: u8,
}

#[derive(Deserialize)]
struct ListedServer {
    id: String,
    name: String,
    status: String,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<ListedAddress>>,
}

fn parse_instances(items: &[Value]) -> ProviderResult<Vec<InstanceRecord>> {
    Ok(decode::<ListedServer>(items)?
        .into_iter()
        .map(|s| InstanceRecord {
            addresses: s
                .addresses
                .into_iter()
                .filter_map(|(net, addrs)| {
                    addrs
                        .into_iter()
                        .find(|a| a.version == 4)
                        .map(|a| (net, a.addr))
                })
                .collect(),
            id: s.id,
            name: s.name,
            status: s.status,
            created: s.created,
        })
        .collect())
}

#[derive(Deserialize)]
struct ListedLoadBalancer {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    vip_address: String,
    #[serde(default)]
    vip_port_id: String,
    #[serde(default)]
    provisioning_status: String,
    #[serde(default)]
    operating_status: String,
}

fn parse_loadbalancers(items: &[Value]) -> ProviderResult<Vec<LoadBalancerRecord>> {
    Ok(decode::<ListedLoadBalancer>(items)?
        .into_iter()
        .map(|lb| LoadBalancerRecord {
            id: lb.id,
            name: lb.name,
            vip_address: lb.vip_address,
            vip_port_id: lb.vip_port_id,
            provisioning_status: lb.provisioning_status,
            operating_status: lb.operating_status,
        })
        .collect())
}

#[derive(Deserialize)]
struct ListedFloatingIp {
    id: String,
    floating_ip_address: String,
    #[serde(default)]
    port_id: Option<String>,
    #[serde(default)]
    fixed_ip_address: Option<String>,
    #[serde(default)]
    status: String,
}

fn parse_floating_ips(items: &[Value]) -> ProviderResult<Vec<FloatingIpRecord>> {
    Ok(decode::<ListedFloatingIp>(items)?
        .into_iter()
        .map(|f| FloatingIpRecord {
            id: f.id,
            floating_ip: f.floating_ip_address,
            port_id: f.port_id.unwrap_or_default(),
            fixed_ip: f.fixed_ip_address.unwrap_or_default(),
            status: f.status,
        })
        .collect())
}

#[derive(Deserialize)]
struct ListedFixedIp {
    ip_address: String,
}

#[derive(Deserialize)]
struct ListedPort {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    fixed_ips: Vec<ListedFixedIp>,
}

fn parse_ports(items: &[Value]) -> ProviderResult<Vec<PortRecord>> {
    Ok(decode::<ListedPort>(items)?
        .into_iter()
        .map(|p| PortRecord {
            fixed_ip: p
                .fixed_ips
                .into_iter()
                .next()
                .map(|f| f.ip_address)
                .unwrap_or_default(),
            id: p.id,
            name: p.name,
            status: p.status,
        })
        .collect())
}
