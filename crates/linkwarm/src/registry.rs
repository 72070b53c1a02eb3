//! Bookkeeping of warm and in-flight route keys

use crate::RouteKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Load state of a tracked key.
///
/// A key absent from the registry is cold. Keeping both states in one map
/// makes "in at most one set" hold by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Loader invoked, not settled yet
    Loading,
    /// Loader resolved successfully
    Loaded,
}

/// Snapshot of the registry contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadStatus {
    /// Keys whose loader resolved, sorted
    pub preloaded: Vec<RouteKey>,
    /// Keys currently in flight, sorted
    pub preloading: Vec<RouteKey>,
    /// preloaded + preloading
    pub total: usize,
}

/// Counters describing registry activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Loads claimed (loader invoked)
    pub started: u64,
    /// Loads that resolved
    pub completed: u64,
    /// Loads that rejected
    pub failed: u64,
    /// Claims refused because the key was warm or in flight
    pub deduplicated: u64,
}

impl RegistryStats {
    /// Fraction of claim attempts answered without invoking a loader
    pub fn dedup_rate(&self) -> f32 {
        let total = self.started + self.deduplicated;
        if total == 0 {
            0.0
        } else {
            self.deduplicated as f32 / total as f32
        }
    }
}

/// Registry of warm (`preloaded`) and in-flight (`preloading`) keys
#[derive(Debug, Default)]
pub struct PreloadRegistry {
    entries: DashMap<RouteKey, LoadState>,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    deduplicated: AtomicU64,
}

impl PreloadRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the key's loader has resolved
    pub fn has(&self, key: &str) -> bool {
        self.state(key) == Some(LoadState::Loaded)
    }

    /// Whether the key's loader is in flight
    pub fn is_loading(&self, key: &str) -> bool {
        self.state(key) == Some(LoadState::Loading)
    }

    /// Current state, `None` when cold
    pub fn state(&self, key: &str) -> Option<LoadState> {
        self.entries.get(key).map(|entry| *entry)
    }

    /// Claim a cold key for loading.
    ///
    /// Returns `true` only for the caller that moved the key from cold to
    /// `Loading`; every concurrent or later caller gets `false` until the key
    /// fails and becomes cold again.
    pub fn mark_loading(&self, key: &RouteKey) -> bool {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => {
                self.deduplicated.fetch_add(1, Ordering::Relaxed);
                trace!("'{}' already warm or in flight", key);
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LoadState::Loading);
                self.started.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Record a resolved load
    pub fn mark_loaded(&self, key: &RouteKey) {
        self.entries.insert(key.clone(), LoadState::Loaded);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected load; the key becomes cold and may be retried.
    ///
    /// A key already `Loaded` is left alone.
    pub fn mark_failed(&self, key: &RouteKey) {
        self.entries
            .remove_if(key.as_str(), |_, state| *state == LoadState::Loading);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Forget every key
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Snapshot of both sets
    pub fn status(&self) -> PreloadStatus {
        let mut preloaded = Vec::new();
        let mut preloading = Vec::new();

        for entry in self.entries.iter() {
            match entry.value() {
                LoadState::Loaded => preloaded.push(entry.key().clone()),
                LoadState::Loading => preloading.push(entry.key().clone()),
            }
        }

        preloaded.sort();
        preloading.sort();
        let total = preloaded.len() + preloading.len();

        PreloadStatus {
            preloaded,
            preloading,
            total,
        }
    }

    /// Activity counters
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
        }
    }
}
