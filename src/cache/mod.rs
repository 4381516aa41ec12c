// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Local mirror of provider-side state, one cache per resource kind.
//!
//! Reconciliation passes register interest in a key with [`ResourceCache::listen`]
//! and only ever receive owned [`CacheEntry`] snapshots. The poller callback is the
//! single writer and replaces the state of every listened key once per cycle.

use crate::provider::ResourceKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Snapshot of one cached provider resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry<R> {
    pub record: R,
    /// A full poll cycle has run since interest in this key was registered
    pub synced: bool,
    /// The last poll cycle listed this key
    pub present: bool,
}

impl<R> CacheEntry<R> {
    /// Synced and listed by the provider
    pub fn is_observed(&self) -> bool {
        self.synced && self.present
    }

    /// Synced but no longer listed by the provider
    pub fn is_gone(&self) -> bool {
        self.synced && !self.present
    }
}

pub struct ResourceCache<R> {
    kind: ResourceKind,
    entries: RwLock<HashMap<String, CacheEntry<R>>>,
    evict_absent: bool,
}

impl<R: Clone + Default> ResourceCache<R> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
            evict_absent: false,
        }
    }

    /// A cache that drops interest in a key once a poll no longer lists it
    pub fn evicting_absent(kind: ResourceKind) -> Self {
        Self {
            evict_absent: true,
            ..Self::new(kind)
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Register interest in `key` and return its current state
    pub fn listen(&self, key: &str) -> CacheEntry<R> {
        let mut entries = self.entries.write();
        entries.entry(key.to_string()).or_default().clone()
    }

    /// Register interest in `key` and forget what the poller reported so far
    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.write();
        entries.entry(key.to_string()).or_default().synced = false;
    }

    /// Current state of `key`, `None` when nobody listens to it
    pub fn read(&self, key: &str) -> Option<CacheEntry<R>> {
        self.entries.read().get(key).cloned()
    }

    pub fn remove(&self, key: &str) {
        if self.entries.write().remove(key).is_some() {
            debug!("Dropped interest in {} {}", self.kind, key);
        }
    }

    /// Replace the state of every listened key with the listed resources.
    /// Keys that are not listed become absent; every listened key becomes synced.
    pub fn apply_page(&self, observed: impl IntoIterator<Item = (String, R)>) {
        let mut observed: HashMap<String, R> = observed.into_iter().collect();
        let mut evicted = Vec::new();

        let mut entries = self.entries.write();
        for (key, entry) in entries.iter_mut() {
            match observed.remove(key) {
                Some(record) => {
                    entry.record = record;
                    entry.present = true;
                }
                None => {
                    if self.evict_absent && entry.present {
                        evicted.push(key.clone());
                    }
                    entry.present = false;
                }
            }
            entry.synced = true;
        }

        for key in &evicted {
            entries.remove(key);
        }
        if !evicted.is_empty() {
            debug!("Evicted {} vanished {}", evicted.len(), self.kind);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
