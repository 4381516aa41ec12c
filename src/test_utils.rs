// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a canned Kubernetes API, an in-memory cloud provider and
//! builders for VirtualMachine specs.

use crate::error::{Result as StackResult, StackPilotError};
use crate::kubernetes::link::{Link, LinkDiscovery};
use crate::provider::{
    AuthContext, CloudProvider, ProviderError, ProviderPage, ProviderResult, ResourceKind,
    UpdateMode,
};
use crate::types::virtual_machine::{
    AddressSpec, AuthSpec, LoadBalanceSpec, PortMapping, PublicSpec, ServerSpec, SubnetSpec,
};
use crate::types::{VirtualMachine, VirtualMachineSpec};
use async_trait::async_trait;
use http::{Request, Response};
use kube::api::ObjectMeta;
use kube::client::Body;
use kube::Client;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for PATCH requests matching the exact path
    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    /// Add a response for PUT requests matching the exact path
    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    /// Every request seen so far as (method, path)
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "https://kubernetes.default.svc")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        // Try exact match first
        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Try prefix match for paths like /api/v1/namespaces/foo
        for ((m, p), resp) in responses.iter() {
            if m == method && path.starts_with(p) {
                return Some(resp.clone());
            }
        }

        None
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        self.requests
            .lock()
            .unwrap()
            .push((method.clone(), path.clone()));
        let response = self.find_response(&method, &path);

        Box::pin(async move {
            match response {
                Some((status, body)) => Ok(Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(body.into_bytes()))
                    .unwrap()),
                None => {
                    // Default 404 for unmatched requests
                    let body = r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"not found","reason":"NotFound","code":404}"#;
                    Ok(Response::builder()
                        .status(404)
                        .header("content-type", "application/json")
                        .body(Body::from(body.as_bytes().to_vec()))
                        .unwrap())
                }
            }
        })
    }
}

/// A provider call as recorded by [`MockProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Create(String),
    Update(String, UpdateMode),
    Delete(String),
    Find(String),
    List(ResourceKind),
    Start(String),
    Stop(String),
}

#[derive(Default)]
struct ProviderState {
    calls: Vec<ProviderCall>,
    errors: HashMap<String, ProviderError>,
    pages: HashMap<ResourceKind, ProviderPage>,
    existing: HashMap<String, String>,
    next_id: usize,
    list_delay: Option<Duration>,
}

/// In-memory cloud provider. Creates hand out `stack-<n>` IDs; errors are
/// programmed per operation (`create`, `update`, `delete`, `find`, `start`,
/// `stop`, `list`) or per operation and argument (`stop:<id>`, `list:<kind>`)
/// and stay in place until the test ends.
#[derive(Default)]
pub struct MockProvider {
    state: parking_lot::Mutex<ProviderState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: &str, err: ProviderError) {
        self.state.lock().errors.insert(op.to_string(), err);
    }

    pub fn set_page(&self, page: ProviderPage) {
        self.state.lock().pages.insert(page.kind(), page);
    }

    /// Make `find_stack` know a stack without it having been created here
    pub fn set_existing(&self, name: &str, id: &str) {
        self.state
            .lock()
            .existing
            .insert(name.to_string(), id.to_string());
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.state.lock().list_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().calls.clone()
    }

    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, ProviderCall::Create(_)))
    }

    pub fn update_count(&self) -> usize {
        self.count(|c| matches!(c, ProviderCall::Update(..)))
    }

    pub fn list_count(&self, kind: ResourceKind) -> usize {
        self.count(|c| *c == ProviderCall::List(kind))
    }

    fn count(&self, pred: impl Fn(&ProviderCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ProviderCall, op: &str, arg: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        let err = state
            .errors
            .get(&format!("{}:{}", op, arg))
            .or_else(|| state.errors.get(op))
            .cloned();
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn create_stack(
        &self,
        _auth: &AuthContext,
        name: &str,
        _template: &[u8],
    ) -> ProviderResult<String> {
        self.record(ProviderCall::Create(name.to_string()), "create", name)?;
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("stack-{}", state.next_id);
        state.existing.insert(name.to_string(), id.clone());
        Ok(id)
    }

    async fn update_stack(
        &self,
        _name: &str,
        id: &str,
        _template: &[u8],
        mode: UpdateMode,
    ) -> ProviderResult<()> {
        self.record(ProviderCall::Update(id.to_string(), mode), "update", id)
    }

    async fn delete_stack(&self, name: &str, id: &str) -> ProviderResult<()> {
        self.record(ProviderCall::Delete(id.to_string()), "delete", id)?;
        self.state.lock().existing.remove(name);
        Ok(())
    }

    async fn find_stack(&self, _auth: &AuthContext, name: &str) -> ProviderResult<Option<String>> {
        self.record(ProviderCall::Find(name.to_string()), "find", name)?;
        Ok(self.state.lock().existing.get(name).cloned())
    }

    async fn list(&self, kind: ResourceKind) -> ProviderResult<ProviderPage> {
        self.record(ProviderCall::List(kind), "list", &kind.to_string())?;
        let delay = self.state.lock().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let page = self.state.lock().pages.get(&kind).cloned();
        Ok(page.unwrap_or_else(|| empty_page(kind)))
    }

    async fn start_server(&self, id: &str) -> ProviderResult<()> {
        self.record(ProviderCall::Start(id.to_string()), "start", id)
    }

    async fn stop_server(&self, id: &str) -> ProviderResult<()> {
        self.record(ProviderCall::Stop(id.to_string()), "stop", id)
    }
}

fn empty_page(kind: ResourceKind) -> ProviderPage {
    match kind {
        ResourceKind::Stacks => ProviderPage::Stacks(Vec::new()),
        ResourceKind::Instances => ProviderPage::Instances(Vec::new()),
        ResourceKind::LoadBalancers => ProviderPage::LoadBalancers(Vec::new()),
        ResourceKind::FloatingIps => ProviderPage::FloatingIps(Vec::new()),
        ResourceKind::Ports => ProviderPage::Ports(Vec::new()),
    }
}

#[derive(Default)]
struct DiscoveryState {
    members: HashMap<String, Vec<String>>,
    missing: HashSet<String>,
    applied: Vec<(String, String)>,
    deleted: Vec<String>,
    fail_deletes: bool,
}

/// In-memory link discovery. Links exist unless marked missing and select
/// the member addresses set for them.
#[derive(Default)]
pub struct MockDiscovery {
    state: parking_lot::Mutex<DiscoveryState>,
}

impl MockDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_members(&self, link: &str, ips: &[&str]) {
        self.state.lock().members.insert(
            link.to_string(),
            ips.iter().map(|ip| ip.to_string()).collect(),
        );
    }

    pub fn set_missing(&self, link: &str) {
        self.state.lock().missing.insert(link.to_string());
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().fail_deletes = fail;
    }

    /// Applied services as (link, external IP)
    pub fn applied(&self) -> Vec<(String, String)> {
        self.state.lock().applied.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }
}

#[async_trait]
impl LinkDiscovery for MockDiscovery {
    async fn member_ips(&self, link: &Link) -> StackResult<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .members
            .get(&link.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn exists(&self, link: &Link) -> StackResult<bool> {
        Ok(!self.state.lock().missing.contains(&link.to_string()))
    }

    async fn apply_service(
        &self,
        link: &Link,
        external_ip: &str,
        _ports: &[PortMapping],
    ) -> StackResult<()> {
        self.state
            .lock()
            .applied
            .push((link.to_string(), external_ip.to_string()));
        Ok(())
    }

    async fn delete_service(&self, link: &Link) -> StackResult<()> {
        let mut state = self.state.lock();
        if state.fail_deletes {
            return Err(StackPilotError::KubeError(kube::Error::Api(
                kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "etcdserver: request timed out".to_string(),
                    reason: "InternalError".to_string(),
                    code: 500,
                },
            )));
        }
        state.deleted.push(link.to_string());
        Ok(())
    }
}

pub fn auth_spec() -> AuthSpec {
    AuthSpec {
        token: "token".to_string(),
        project_id: "project-1".to_string(),
    }
}

pub fn server_spec() -> ServerSpec {
    ServerSpec {
        name: "app".to_string(),
        replicas: 1,
        flavor: "m1.small".to_string(),
        image: Some("cirros".to_string()),
        subnet: SubnetSpec {
            network_name: "private".to_string(),
            subnet_id: "sub-1".to_string(),
        },
        ..Default::default()
    }
}

pub fn loadbalance_spec() -> LoadBalanceSpec {
    LoadBalanceSpec {
        name: "web".to_string(),
        subnet_id: "sub-1".to_string(),
        ports: vec![PortMapping {
            port: 80,
            protocol: "TCP".to_string(),
        }],
        ..Default::default()
    }
}

pub fn public_spec() -> PublicSpec {
    PublicSpec {
        address: AddressSpec {
            allocate: true,
            ip: None,
        },
        floating_network_id: "public-net".to_string(),
        ..Default::default()
    }
}

/// A VirtualMachine `demo/web` with the given spec and no status
pub fn virtual_machine(spec: VirtualMachineSpec) -> VirtualMachine {
    VirtualMachine {
        metadata: ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("demo".to_string()),
            uid: Some("vm-uid".to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Kubernetes JSON rendering of a VirtualMachine, as the API would return it
pub fn virtual_machine_json(vm: &VirtualMachine) -> String {
    let mut value = serde_json::to_value(vm).unwrap();
    value["apiVersion"] = serde_json::json!("stackpilot.io/v1");
    value["kind"] = serde_json::json!("VirtualMachine");
    value.to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}
