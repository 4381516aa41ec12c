// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! VM group stage.

use super::generate_stack_name;
use crate::cache::ResourceCache;
use crate::constants::stack::SERVER_PREFIX;
use crate::constants::status::{SERVER_ACTIVE, SERVER_SHUTOFF};
use crate::error::{Result, StackPilotError};
use crate::provider::{
    AuthContext, CloudProvider, InstanceRecord, ProviderPage, ProviderResult, ResourceKind,
};
use crate::render::{ServerParams, TemplateKind};
use crate::stack::{StackReconciler, StageOutcome};
use crate::sync::PageCallback;
use crate::types::virtual_machine::{PowerState, ServerSpec};
use crate::types::{ResourceStatus, ServerStat};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Status of a member whose instance is no longer listed
const MEMBER_GONE: &str = "DELETED";

pub struct ServerProcessor {
    reconciler: Arc<StackReconciler>,
    provider: Arc<dyn CloudProvider>,
    /// Instances grouped by the stack that owns them
    instances: Arc<ResourceCache<Vec<InstanceRecord>>>,
}

impl ServerProcessor {
    pub fn new(reconciler: Arc<StackReconciler>, provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            reconciler,
            provider,
            instances: Arc::new(ResourceCache::new(ResourceKind::Instances)),
        }
    }

    pub fn instances(&self) -> &Arc<ResourceCache<Vec<InstanceRecord>>> {
        &self.instances
    }

    pub fn page_callback(&self) -> PageCallback {
        let instances = Arc::clone(&self.instances);
        Arc::new(move |page: ProviderPage| {
            if let ProviderPage::Instances(records) = page {
                instances.apply_page(group_instances(records));
            }
        })
    }

    #[instrument(skip(self, auth, spec, status), fields(server = %spec.name))]
    pub async fn process(
        &self,
        auth: &AuthContext,
        spec: &ServerSpec,
        status: &mut ResourceStatus,
    ) -> Result<StageOutcome> {
        validate(spec)?;

        if status.stack_name.is_empty() {
            status.stack_name = generate_stack_name(SERVER_PREFIX, &spec.name);
        }

        let params = ServerParams {
            name: status.stack_name.clone(),
            replicas: spec.replicas,
            flavor: spec.flavor.clone(),
            image: spec.image.clone(),
            boot_volume_id: spec.boot_volume_id.clone(),
            volume_size_gb: spec.volume_size_gb,
            subnet_id: spec.subnet.subnet_id.clone(),
            key_name: spec.key_name.clone(),
            user_data: spec.user_data.clone(),
            security_groups: spec.security_groups.clone(),
            availability_zone: spec.availability_zone.clone(),
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| StackPilotError::Render(e.to_string()))?;

        let outcome = self
            .reconciler
            .reconcile(auth, TemplateKind::Server, params, status)
            .await?;

        let entry = self.instances.listen(&status.stack_name);
        if entry.synced {
            merge_members(
                &mut status.members,
                &entry.record,
                entry.present,
                &spec.subnet.network_name,
            );
        }

        if let Some(power) = spec.power_state {
            self.apply_power_state(power, &status.members).await?;
        }

        Ok(outcome)
    }

    async fn apply_power_state(&self, power: PowerState, members: &[ServerStat]) -> Result<()> {
        for member in members.iter().filter(|m| !m.id.is_empty()) {
            let result: ProviderResult<()> = match (power, member.status.as_str()) {
                (PowerState::Running, SERVER_SHUTOFF) => {
                    info!("Starting instance {}", member.name);
                    self.provider.start_server(&member.id).await
                }
                (PowerState::Stopped, SERVER_ACTIVE) => {
                    info!("Stopping instance {}", member.name);
                    self.provider.stop_server(&member.id).await
                }
                _ => continue,
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {
                    debug!("Instance {} is busy: {}", member.name, e)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Tear down the VM group and drop its cached instances
    pub async fn delete(&self, auth: &AuthContext, status: &mut ResourceStatus) -> Result<()> {
        let stack_name = status.stack_name.clone();
        self.reconciler.delete(auth, status).await?;
        if !stack_name.is_empty() {
            self.instances.remove(&stack_name);
        }
        Ok(())
    }
}

fn validate(spec: &ServerSpec) -> Result<()> {
    let has_image = spec.image.as_deref().is_some_and(|s| !s.is_empty());
    let has_volume = spec.boot_volume_id.as_deref().is_some_and(|s| !s.is_empty());

    if has_image == has_volume {
        return Err(StackPilotError::Validation(
            "exactly one of image or bootVolumeId must be set".to_string(),
        ));
    }
    if spec.replicas == 0 {
        return Err(StackPilotError::Validation(
            "replicas must be at least 1".to_string(),
        ));
    }
    if has_volume && spec.replicas > 1 {
        return Err(StackPilotError::Validation(
            "an existing boot volume can only back a single replica".to_string(),
        ));
    }
    if spec.name.is_empty() || spec.flavor.is_empty() {
        return Err(StackPilotError::Validation(
            "server name and flavor are required".to_string(),
        ));
    }
    Ok(())
}

/// Group instance records by owning stack: instance `<stack>-<n>` belongs to `<stack>`
pub fn group_instances(records: Vec<InstanceRecord>) -> Vec<(String, Vec<InstanceRecord>)> {
    let prefix = format!("{}-", SERVER_PREFIX);
    let mut groups: BTreeMap<String, Vec<InstanceRecord>> = BTreeMap::new();

    for record in records {
        if !record.name.starts_with(&prefix) {
            continue;
        }
        let Some((stack, index)) = record.name.rsplit_once('-') else {
            continue;
        };
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        groups.entry(stack.to_string()).or_default().push(record);
    }

    groups.into_iter().collect()
}

/// Merge listed instances into the member slots. Known instances are updated in
/// place, new ones are appended and instances that are no longer listed keep
/// their slot without an address.
fn merge_members(
    members: &mut Vec<ServerStat>,
    instances: &[InstanceRecord],
    present: bool,
    network: &str,
) {
    let listed: BTreeMap<&str, &InstanceRecord> =
        instances.iter().map(|i| (i.id.as_str(), i)).collect();

    for member in members.iter_mut() {
        match listed.get(member.id.as_str()) {
            Some(instance) if present => fill_member(member, instance, network),
            _ => {
                member.ip.clear();
                member.status = MEMBER_GONE.to_string();
            }
        }
    }

    if !present {
        return;
    }

    let mut fresh: Vec<&InstanceRecord> = instances
        .iter()
        .filter(|i| !members.iter().any(|m| m.id == i.id))
        .collect();
    fresh.sort_by(|a, b| a.name.cmp(&b.name));
    for instance in fresh {
        let mut member = ServerStat::default();
        fill_member(&mut member, instance, network);
        members.push(member);
    }
}

fn fill_member(member: &mut ServerStat, instance: &InstanceRecord, network: &str) {
    member.id = instance.id.clone();
    member.name = instance.name.clone();
    member.status = instance.status.clone();
    member.created = instance.created.clone();
    member.ip = instance.addresses.get(network).cloned().unwrap_or_default();
}
