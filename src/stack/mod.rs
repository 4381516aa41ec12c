// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Create / update / observe / delete state machine for one orchestration stack.
//!
//! A stack is only written when it is settled: either it has never been created,
//! or the poller has reported its last operation as finished. Writes are gated by
//! the content hash of the rendered template, so re-running a pass with an
//! unchanged specification never reaches the provider.

use crate::cache::{CacheEntry, ResourceCache};
use crate::constants::status;
use crate::error::{Result, StackPilotError};
use crate::provider::{AuthContext, CloudProvider, ProviderPage, StackRecord, UpdateMode};
use crate::render::{TemplateKind, TemplateRenderer};
use crate::sync::PageCallback;
use crate::types::{ResourceStatus, StackPhase};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Lowercase hex SHA-256 digest of `data`
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Result of one reconciliation stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Still converging, or waiting for a dependency
    Pending(String),
    /// Converged
    Done,
    /// The provider reported a failure
    Failed(String),
}

impl StageOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, StageOutcome::Done)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Pending(reason) => write!(f, "Pending: {}", reason),
            StageOutcome::Done => f.write_str("Done"),
            StageOutcome::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// Adjusts the template parameters of one kind before rendering, given the
/// current status of the stack
pub type ReorderHook = fn(&mut Value, &ResourceStatus);

/// Phase a provider status code maps to, `None` for codes we do not act on
pub fn phase_of(code: &str) -> Option<StackPhase> {
    if code.ends_with("_IN_PROGRESS") {
        if code.starts_with("CREATE") {
            Some(StackPhase::Creating)
        } else {
            Some(StackPhase::Updating)
        }
    } else if code.ends_with("_FAILED") {
        Some(StackPhase::Failed)
    } else if code.ends_with("_COMPLETE") {
        Some(StackPhase::Succeeded)
    } else {
        None
    }
}

fn is_in_progress(code: &str) -> bool {
    code.ends_with("_IN_PROGRESS")
}

/// A create that the provider abandoned on its own deadline. Update failures
/// are left to the user.
fn is_timed_out(record: &StackRecord) -> bool {
    record.status == status::CREATE_FAILED
        && record.status_reason.to_lowercase().contains("timed out")
}

pub struct StackReconciler {
    provider: Arc<dyn CloudProvider>,
    renderer: Arc<dyn TemplateRenderer>,
    stacks: Arc<ResourceCache<StackRecord>>,
    hooks: HashMap<TemplateKind, ReorderHook>,
}

impl StackReconciler {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        renderer: Arc<dyn TemplateRenderer>,
        stacks: Arc<ResourceCache<StackRecord>>,
    ) -> Self {
        Self {
            provider,
            renderer,
            stacks,
            hooks: HashMap::new(),
        }
    }

    /// Install the parameter hook of one template kind, replacing any earlier one
    pub fn with_reorder_hook(mut self, kind: TemplateKind, hook: ReorderHook) -> Self {
        if self.hooks.insert(kind, hook).is_some() {
            warn!("Replaced reorder hook for {} templates", kind);
        }
        self
    }

    pub fn stacks(&self) -> &Arc<ResourceCache<StackRecord>> {
        &self.stacks
    }

    /// Poller callback feeding stack listings into the stack cache, keyed by ID
    pub fn page_callback(&self) -> PageCallback {
        let stacks = Arc::clone(&self.stacks);
        Arc::new(move |page: ProviderPage| {
            if let ProviderPage::Stacks(records) = page {
                stacks.apply_page(records.into_iter().map(|r| (r.id.clone(), r)));
            }
        })
    }

    /// Drive one stack towards the template rendered from `params`
    #[instrument(skip(self, auth, params, status), fields(stack = %status.stack_name, kind = %kind))]
    pub async fn reconcile(
        &self,
        auth: &AuthContext,
        kind: TemplateKind,
        mut params: Value,
        status: &mut ResourceStatus,
    ) -> Result<StageOutcome> {
        if !status.stack_id.is_empty() {
            let entry = self.stacks.listen(&status.stack_id);
            if entry.is_gone() {
                warn!(
                    "Stack {} ({}) no longer exists at the provider, recreating",
                    status.stack_name, status.stack_id
                );
                self.stacks.remove(&status.stack_id);
                status.stack_id.clear();
                status.content_hash.clear();
                status.last_template.clear();
                status.phase = None;
            } else if !entry.synced || is_in_progress(&entry.record.status) {
                debug!("Stack {} is not settled, skipping write", status.stack_name);
                return Ok(observe(status, &entry));
            }
        }

        if let Some(hook) = self.hooks.get(&kind) {
            hook(&mut params, status);
        }
        let rendered = self.renderer.render(kind, &params)?;
        let hash = content_hash(&rendered);
        let template = template_json(&rendered)?;

        if status.stack_id.is_empty() {
            let id = self.create(auth, &status.stack_name, &rendered).await?;
            info!("Created stack {} ({})", status.stack_name, id);
            status.stack_id = id;
            status.phase = Some(StackPhase::Creating);
            self.accept(status, hash, template);
            return Ok(StageOutcome::Pending(format!(
                "stack {} is being created",
                status.stack_name
            )));
        }

        if status.content_hash != hash {
            self.update(status, &rendered, UpdateMode::Patch).await?;
            info!("Updated stack {} ({})", status.stack_name, status.stack_id);
            status.phase = Some(StackPhase::Updating);
            self.accept(status, hash, template);
            return Ok(StageOutcome::Pending(format!(
                "stack {} is being updated",
                status.stack_name
            )));
        }

        let entry = self.stacks.listen(&status.stack_id);
        if entry.is_observed() && is_timed_out(&entry.record) {
            warn!(
                "Stack {} timed out ({}), re-submitting",
                status.stack_name, entry.record.status_reason
            );
            self.update(status, &rendered, UpdateMode::Replace).await?;
            status.phase = Some(StackPhase::Creating);
            self.accept(status, hash, template);
            return Ok(StageOutcome::Pending(format!(
                "stack {} re-submitted after timeout",
                status.stack_name
            )));
        }

        Ok(observe(status, &entry))
    }

    async fn create(&self, auth: &AuthContext, name: &str, rendered: &[u8]) -> Result<String> {
        let id = match self.provider.create_stack(auth, name, rendered).await {
            Ok(id) => id,
            Err(e) if e.is_conflict() => {
                info!("Stack {} already exists, looking it up", name);
                self.provider.find_stack(auth, name).await?.ok_or_else(|| {
                    StackPilotError::Invariant(format!(
                        "stack {} reported as existing but not found by name",
                        name
                    ))
                })?
            }
            Err(e) => return Err(e.into()),
        };

        if id.is_empty() {
            return Err(StackPilotError::Invariant(format!(
                "create of stack {} returned no id",
                name
            )));
        }
        Ok(id)
    }

    async fn update(&self, status: &ResourceStatus, rendered: &[u8], mode: UpdateMode) -> Result<()> {
        match self
            .provider
            .update_stack(&status.stack_name, &status.stack_id, rendered, mode)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                debug!("Update of stack {} superseded: {}", status.stack_name, e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record an accepted write. The stack entry is re-listened so a status from
    /// before the write is never taken as the outcome of this one.
    fn accept(&self, status: &mut ResourceStatus, hash: String, template: String) {
        status.content_hash = hash;
        status.last_template = template;
        self.stacks.invalidate(&status.stack_id);
    }

    /// Tear down the stack, clearing the status once the provider no longer has it
    #[instrument(skip(self, auth, status), fields(stack = %status.stack_name))]
    pub async fn delete(&self, auth: &AuthContext, status: &mut ResourceStatus) -> Result<()> {
        if status.stack_id.is_empty() && !status.stack_name.is_empty() {
            // a create may have gone through without us seeing its response
            if let Some(id) = self.provider.find_stack(auth, &status.stack_name).await? {
                status.stack_id = id;
            }
        }

        if !status.stack_id.is_empty() {
            status.phase = Some(StackPhase::Deleting);
            match self
                .provider
                .delete_stack(&status.stack_name, &status.stack_id)
                .await
            {
                Ok(()) => info!("Deleted stack {} ({})", status.stack_name, status.stack_id),
                Err(e) if e.is_not_found() => {
                    debug!("Stack {} already gone", status.stack_name)
                }
                Err(e) => return Err(e.into()),
            }
            self.stacks.remove(&status.stack_id);
        }

        *status = ResourceStatus::default();
        Ok(())
    }
}

/// Translate the cached provider state into a phase. Unsynced or unlisted
/// entries never move the phase, and a failure without a reason is not trusted.
fn observe(status: &mut ResourceStatus, entry: &CacheEntry<StackRecord>) -> StageOutcome {
    if !entry.synced {
        return StageOutcome::Pending(format!(
            "waiting for provider status of stack {}",
            status.stack_name
        ));
    }
    if !entry.present {
        return StageOutcome::Pending(format!(
            "stack {} no longer exists at the provider",
            status.stack_name
        ));
    }

    let record = &entry.record;
    match phase_of(&record.status) {
        Some(StackPhase::Succeeded) => {
            status.phase = Some(StackPhase::Succeeded);
            StageOutcome::Done
        }
        Some(StackPhase::Failed) if record.status_reason.is_empty() => {
            debug!("Stack {} failed without a reason, ignoring", status.stack_name);
            StageOutcome::Pending(format!("stack {} is {}", status.stack_name, record.status))
        }
        Some(StackPhase::Failed) => {
            status.phase = Some(StackPhase::Failed);
            StageOutcome::Failed(record.status_reason.clone())
        }
        Some(phase) => {
            status.phase = Some(phase);
            StageOutcome::Pending(format!("stack {} is {}", status.stack_name, record.status))
        }
        None => StageOutcome::Pending(format!("stack {} is {}", status.stack_name, record.status)),
    }
}

fn template_json(rendered: &[u8]) -> Result<String> {
    let value: Value = serde_yaml::from_slice(rendered)
        .map_err(|e| StackPilotError::Render(format!("rendered template is not valid YAML: {}", e)))?;
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, ResourceKind};
    use crate::render::HotRenderer;
    use crate::test_utils::{MockProvider, ProviderCall};
    use serde_json::json;

    struct Fixture {
        provider: Arc<MockProvider>,
        reconciler: StackReconciler,
        auth: AuthContext,
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(MockProvider::new());
        let stacks = Arc::new(ResourceCache::new(ResourceKind::Stacks));
        let reconciler = StackReconciler::new(provider.clone(), Arc::new(HotRenderer::new()), stacks);
        Fixture {
            provider,
            reconciler,
            auth: AuthContext::default(),
        }
    }

    fn server_params(flavor: &str) -> Value {
        json!({
            "name": "vm-app-abcde",
            "replicas": 1,
            "flavor": flavor,
            "image": "cirros",
            "subnetId": "sub-1"
        })
    }

    fn poll(reconciler: &StackReconciler, id: &str, code: &str, reason: &str) {
        reconciler.stacks().apply_page(vec![(
            id.to_string(),
            StackRecord {
                id: id.to_string(),
                name: "vm-app-abcde".to_string(),
                status: code.to_string(),
                status_reason: reason.to_string(),
            },
        )]);
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_phase_of() {
        assert_eq!(phase_of("CREATE_IN_PROGRESS"), Some(StackPhase::Creating));
        assert_eq!(phase_of("UPDATE_IN_PROGRESS"), Some(StackPhase::Updating));
        assert_eq!(phase_of("UPDATE_FAILED"), Some(StackPhase::Failed));
        assert_eq!(phase_of("CREATE_COMPLETE"), Some(StackPhase::Succeeded));
        assert_eq!(phase_of("INIT"), None);
    }

    #[tokio::test]
    async fn test_create_then_complete_then_no_op() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");

        let outcome = f
            .reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();

        assert!(matches!(outcome, StageOutcome::Pending(_)));
        assert_eq!(status.phase, Some(StackPhase::Creating));
        assert!(!status.stack_id.is_empty());
        assert!(status.is_created());
        assert_eq!(f.provider.create_count(), 1);

        poll(&f.reconciler, &status.stack_id, "CREATE_COMPLETE", "");
        let outcome = f
            .reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Done);
        assert_eq!(status.phase, Some(StackPhase::Succeeded));

        for _ in 0..3 {
            f.reconciler
                .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
                .await
                .unwrap();
        }
        assert_eq!(f.provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_second_pass_before_poll_is_no_op() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");

        for _ in 0..2 {
            f.reconciler
                .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
                .await
                .unwrap();
        }

        assert_eq!(f.provider.create_count(), 1);
        assert_eq!(status.phase, Some(StackPhase::Creating));
    }

    #[tokio::test]
    async fn test_unsettled_stack_is_not_updated() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();
        poll(&f.reconciler, &status.stack_id, "CREATE_IN_PROGRESS", "");

        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.large"), &mut status)
            .await
            .unwrap();

        assert_eq!(f.provider.update_count(), 0);
        assert_eq!(status.phase, Some(StackPhase::Creating));
    }

    #[tokio::test]
    async fn test_changed_template_updates_once() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();
        poll(&f.reconciler, &status.stack_id, "CREATE_COMPLETE", "");
        let first_hash = status.content_hash.clone();

        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.large"), &mut status)
            .await
            .unwrap();
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.large"), &mut status)
            .await
            .unwrap();

        assert_eq!(f.provider.update_count(), 1);
        assert_eq!(status.phase, Some(StackPhase::Updating));
        assert_ne!(status.content_hash, first_hash);
        assert!(status.last_template.contains("m1.large"));
    }

    #[tokio::test]
    async fn test_update_conflict_is_absorbed() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();
        poll(&f.reconciler, &status.stack_id, "CREATE_COMPLETE", "");
        f.provider
            .fail("update", ProviderError::Conflict("stack is busy".to_string()));

        let outcome = f
            .reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.large"), &mut status)
            .await;

        assert!(outcome.is_ok());
        assert_eq!(status.phase, Some(StackPhase::Updating));
    }

    #[tokio::test]
    async fn test_create_conflict_recovers_existing_id() {
        let f = fixture();
        f.provider
            .fail("create", ProviderError::Conflict("exists".to_string()));
        f.provider.set_existing("vm-app-abcde", "stack-existing");
        let mut status = ResourceStatus::named("vm-app-abcde");

        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();

        assert_eq!(status.stack_id, "stack-existing");
        assert_eq!(status.phase, Some(StackPhase::Creating));
    }

    #[tokio::test]
    async fn test_create_conflict_without_match_is_invariant_violation() {
        let f = fixture();
        f.provider
            .fail("create", ProviderError::Conflict("exists".to_string()));
        let mut status = ResourceStatus::named("vm-app-abcde");

        let err = f
            .reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap_err();

        assert!(matches!(err, StackPilotError::Invariant(_)));
        assert!(status.stack_id.is_empty());
        assert!(!status.is_created());
    }

    #[tokio::test]
    async fn test_create_failure_leaves_status_uncreated() {
        let f = fixture();
        f.provider
            .fail("create", ProviderError::Transient("gateway timeout".to_string()));
        let mut status = ResourceStatus::named("vm-app-abcde");

        let err = f
            .reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap_err();

        assert!(matches!(err, StackPilotError::Provider(ProviderError::Transient(_))));
        assert!(status.stack_id.is_empty());
        assert!(status.content_hash.is_empty());
        assert_eq!(status.phase, None);
    }

    #[tokio::test]
    async fn test_unsynced_entry_never_reports_terminal() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();
        poll(&f.reconciler, &status.stack_id, "CREATE_FAILED", "quota exceeded");
        f.reconciler.stacks().invalidate(&status.stack_id);

        let outcome = f
            .reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();

        assert!(matches!(outcome, StageOutcome::Pending(_)));
        assert_eq!(status.phase, Some(StackPhase::Creating));
    }

    #[tokio::test]
    async fn test_failure_without_reason_is_not_fatal() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();
        poll(&f.reconciler, &status.stack_id, "CREATE_FAILED", "");

        let outcome = f
            .reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();

        assert!(matches!(outcome, StageOutcome::Pending(_)));
        assert_ne!(status.phase, Some(StackPhase::Failed));
    }

    #[tokio::test]
    async fn test_failure_with_reason() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();
        poll(&f.reconciler, &status.stack_id, "CREATE_FAILED", "quota exceeded");

        let outcome = f
            .reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Failed("quota exceeded".to_string()));
        assert_eq!(status.phase, Some(StackPhase::Failed));
    }

    #[tokio::test]
    async fn test_timed_out_create_is_resubmitted() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();
        poll(&f.reconciler, &status.stack_id, "CREATE_FAILED", "Create timed out");

        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();

        assert!(f
            .provider
            .calls()
            .contains(&ProviderCall::Update(status.stack_id.clone(), UpdateMode::Replace)));
        assert_eq!(status.phase, Some(StackPhase::Creating));
        assert!(!f.reconciler.stacks().read(&status.stack_id).unwrap().synced);
    }

    #[tokio::test]
    async fn test_timed_out_update_is_not_resubmitted() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();
        poll(&f.reconciler, &status.stack_id, "UPDATE_FAILED", "Update timed out");

        let outcome = f
            .reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Failed("Update timed out".to_string()));
        assert_eq!(f.provider.update_count(), 0);
        assert_eq!(status.phase, Some(StackPhase::Failed));
    }

    #[tokio::test]
    async fn test_stack_deleted_behind_our_back_is_recreated() {
        let f = fixture();
        let mut status = ResourceStatus::named("vm-app-abcde");
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();
        poll(&f.reconciler, &status.stack_id, "CREATE_COMPLETE", "");
        f.reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();
        let first_id = status.stack_id.clone();

        // a full poll that no longer lists the stack
        f.reconciler.stacks().apply_page(Vec::new());
        let outcome = f
            .reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();

        assert!(matches!(outcome, StageOutcome::Pending(_)));
        assert_eq!(f.provider.create_count(), 2);
        assert_ne!(status.stack_id, first_id);
        assert_eq!(status.phase, Some(StackPhase::Creating));
        assert!(f.reconciler.stacks().read(&first_id).is_none());
    }

    #[tokio::test]
    async fn test_reorder_hook_runs_before_render() {
        fn force_flavor(params: &mut Value, _status: &ResourceStatus) {
            params["flavor"] = json!("hooked");
        }
        let f = fixture();
        let reconciler = f
            .reconciler
            .with_reorder_hook(TemplateKind::Server, force_flavor);
        let mut status = ResourceStatus::named("vm-app-abcde");

        reconciler
            .reconcile(&f.auth, TemplateKind::Server, server_params("m1.small"), &mut status)
            .await
            .unwrap();

        assert!(status.last_template.contains("hooked"));
    }

    #[tokio::test]
    async fn test_delete_not_found_clears_status() {
        let f = fixture();
        f.provider
            .fail("delete", ProviderError::NotFound("no such stack".to_string()));
        let mut status = ResourceStatus {
            stack_id: "stack-1".to_string(),
            stack_name: "vm-app-abcde".to_string(),
            content_hash: "abc".to_string(),
            phase: Some(StackPhase::Succeeded),
            ..Default::default()
        };
        f.reconciler.stacks().listen("stack-1");

        f.reconciler.delete(&f.auth, &mut status).await.unwrap();

        assert!(status.stack_id.is_empty());
        assert!(status.stack_name.is_empty());
        assert!(f.reconciler.stacks().read("stack-1").is_none());
    }

    #[tokio::test]
    async fn test_delete_error_keeps_stack_id() {
        let f = fixture();
        f.provider
            .fail("delete", ProviderError::Transient("unavailable".to_string()));
        let mut status = ResourceStatus {
            stack_id: "stack-1".to_string(),
            stack_name: "vm-app-abcde".to_string(),
            ..Default::default()
        };

        assert!(f.reconciler.delete(&f.auth, &mut status).await.is_err());
        assert_eq!(status.stack_id, "stack-1");
        assert_eq!(status.phase, Some(StackPhase::Deleting));
    }

    #[tokio::test]
    async fn test_delete_recovers_unrecorded_create() {
        let f = fixture();
        f.provider.set_existing("vm-app-abcde", "stack-orphan");
        let mut status = ResourceStatus::named("vm-app-abcde");

        f.reconciler.delete(&f.auth, &mut status).await.unwrap();

        assert!(f
            .provider
            .calls()
            .contains(&ProviderCall::Delete("stack-orphan".to_string())));
    }
}
