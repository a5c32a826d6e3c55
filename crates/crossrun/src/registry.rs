//! # Remote Registry
//!
//! Maps each reachable remote process to the component names it hosts.
//!
//! Entries are never edited in place: a refresh replaces the whole list and a removal deletes
//! it, so a reader sees either the old list or the new one for a given process. The map is
//! bounded by the number of installed sibling processes, which keeps the linear `resolve`
//! scan cheap.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::endpoint::ProcessId;

#[derive(Clone, Default)]
pub struct RemoteRegistry {
    entries: Arc<DashMap<ProcessId, Arc<[String]>>>,
}

impl RemoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically inserts or replaces the entry for `process`.
    ///
    /// Duplicate names are dropped, keeping the first occurrence's position.
    pub fn replace(&self, process: ProcessId, components: Vec<String>) -> Arc<[String]> {
        let mut seen = HashSet::new();
        let unique: Arc<[String]> = components
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .collect();
        self.entries.insert(process, unique.clone());
        unique
    }

    /// Deletes the entry for `process`, returning what it held.
    pub fn remove(&self, process: &ProcessId) -> Option<Arc<[String]>> {
        self.entries.remove(process).map(|(_, components)| components)
    }

    /// Returns the process hosting `component`, if any entry lists it.
    pub fn resolve(&self, component: &str) -> Option<ProcessId> {
        self.entries
            .iter()
            .find(|entry| entry.value().iter().any(|name| name == component))
            .map(|entry| entry.key().clone())
    }

    /// A snapshot of one entry.
    pub fn components(&self, process: &ProcessId) -> Option<Arc<[String]>> {
        self.entries.get(process).map(|entry| entry.value().clone())
    }

    pub fn processes(&self) -> Vec<ProcessId> {
        let mut all: Vec<_> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
