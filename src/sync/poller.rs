// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Periodic fan-out of provider listings to the resource caches.

use crate::error::{Result, StackPilotError};
use crate::provider::{CloudProvider, ProviderPage, ResourceKind};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives every listed resource of one kind, once per poll cycle
pub type PageCallback = Arc<dyn Fn(ProviderPage) + Send + Sync>;

/// Registration phase of the poller; at most one callback per kind
pub struct PollerBuilder {
    provider: Arc<dyn CloudProvider>,
    callbacks: BTreeMap<ResourceKind, PageCallback>,
}

impl PollerBuilder {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            provider,
            callbacks: BTreeMap::new(),
        }
    }

    pub fn register(mut self, kind: ResourceKind, callback: PageCallback) -> Result<Self> {
        if self.callbacks.contains_key(&kind) {
            return Err(StackPilotError::Registration(format!(
                "a callback for {} is already registered",
                kind
            )));
        }
        self.callbacks.insert(kind, callback);
        Ok(self)
    }

    pub fn build(self, period: Duration) -> ProviderPoller {
        ProviderPoller {
            provider: self.provider,
            callbacks: self.callbacks.into_iter().collect(),
            period,
        }
    }
}

pub struct ProviderPoller {
    provider: Arc<dyn CloudProvider>,
    callbacks: Vec<(ResourceKind, PageCallback)>,
    period: Duration,
}

impl ProviderPoller {
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.callbacks.iter().map(|(kind, _)| *kind).collect()
    }

    /// Poll immediately, then every period, until cancelled. Listings still in
    /// flight at cancellation are left to finish on their own.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Provider poller started for {:?}, period {:?}",
            self.kinds(),
            self.period
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.poll_once() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.period) => {}
            }
        }

        info!("Provider poller stopped");
    }

    /// One cycle: list every registered kind concurrently and wait for all of them
    pub async fn poll_once(&self) {
        let tasks = self.callbacks.iter().map(|(kind, callback)| {
            let kind = *kind;
            let provider = Arc::clone(&self.provider);
            let callback = Arc::clone(callback);
            tokio::spawn(async move {
                match provider.list(kind).await {
                    Ok(page) if page.kind() != kind => {
                        warn!("Listing {} returned a {} page, dropping it", kind, page.kind());
                    }
                    Ok(page) => {
                        debug!("Listed {} {}", page.len(), kind);
                        callback(page);
                    }
                    Err(e) => error!("Failed to list {}: {}", kind, e),
                }
            })
        });

        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!("Poll task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, StackRecord};
    use crate::test_utils::MockProvider;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<ProviderPage>>>, PageCallback) {
        let pages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pages);
        (pages, Arc::new(move |page: ProviderPage| sink.lock().push(page)))
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let provider = Arc::new(MockProvider::new());
        let (_, first) = recorder();
        let (_, second) = recorder();

        let result = PollerBuilder::new(provider)
            .register(ResourceKind::Stacks, first)
            .unwrap()
            .register(ResourceKind::Stacks, second);

        assert!(matches!(result, Err(StackPilotError::Registration(_))));
    }

    #[tokio::test]
    async fn test_poll_once_delivers_registered_kinds() {
        let provider = Arc::new(MockProvider::new());
        provider.set_page(ProviderPage::Stacks(vec![StackRecord {
            id: "s-1".to_string(),
            ..Default::default()
        }]));
        let (stacks, on_stacks) = recorder();
        let (ports, on_ports) = recorder();
        let poller = PollerBuilder::new(provider.clone())
            .register(ResourceKind::Stacks, on_stacks)
            .unwrap()
            .register(ResourceKind::Ports, on_ports)
            .unwrap()
            .build(Duration::from_secs(60));

        poller.poll_once().await;

        assert_eq!(stacks.lock().len(), 1);
        assert_eq!(stacks.lock()[0].len(), 1);
        assert_eq!(ports.lock().len(), 1);
        assert!(ports.lock()[0].is_empty());
        assert_eq!(provider.list_count(ResourceKind::Instances), 0);
    }

    #[tokio::test]
    async fn test_failed_kind_does_not_block_siblings() {
        let provider = Arc::new(MockProvider::new());
        provider.fail(
            &format!("list:{}", ResourceKind::Ports),
            ProviderError::Transient("neutron unavailable".to_string()),
        );
        let (stacks, on_stacks) = recorder();
        let (ports, on_ports) = recorder();
        let poller = PollerBuilder::new(provider)
            .register(ResourceKind::Stacks, on_stacks)
            .unwrap()
            .register(ResourceKind::Ports, on_ports)
            .unwrap()
            .build(Duration::from_secs(60));

        poller.poll_once().await;
        poller.poll_once().await;

        assert_eq!(stacks.lock().len(), 2);
        assert!(ports.lock().is_empty());
    }

    #[tokio::test]
    async fn test_run_polls_repeatedly() {
        let provider = Arc::new(MockProvider::new());
        let cycles = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cycles);
        let poller = PollerBuilder::new(provider)
            .register(
                ResourceKind::Stacks,
                Arc::new(move |_: ProviderPage| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap()
            .build(Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while cycles.load(Ordering::SeqCst) < 3 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_does_not_wait_for_slow_listing() {
        let provider = Arc::new(MockProvider::new());
        provider.set_list_delay(Duration::from_secs(3600));
        let (_, callback) = recorder();
        let poller = PollerBuilder::new(provider)
            .register(ResourceKind::Instances, callback)
            .unwrap()
            .build(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
