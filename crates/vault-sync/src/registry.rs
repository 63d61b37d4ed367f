//! Registry: path → FileNode, the merged view the diff runs over.
//!
//! The registry is owned by exactly one syncer and only mutated inside a
//! tick, so it needs no locking.

use crate::node::{FileNode, LocalHalf, RemoteHalf};
use std::collections::BTreeMap;

/// Hashed local listing, keyed by path.
pub type LocalSnapshot = BTreeMap<String, LocalHalf>;

/// Remote halves keyed by path.
pub type RemoteSnapshot = BTreeMap<String, RemoteHalf>;

/// Where a remote snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOrigin {
    /// Loaded from the local cache file (complete)
    Cache,
    /// Full live query (complete)
    LiveFull,
    /// Live changes only: an incremental query or subscription pushes
    LiveIncremental,
}

impl RemoteOrigin {
    /// The snapshot lists every remote document in scope.
    pub fn is_complete(self) -> bool {
        matches!(self, RemoteOrigin::Cache | RemoteOrigin::LiveFull)
    }
}

#[derive(Debug, Default, Clone)]
pub struct Registry {
    nodes: BTreeMap<String, FileNode>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&FileNode> {
        self.nodes.get(path)
    }

    /// Nodes in path order.
    pub fn nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node_mut(&mut self, path: &str) -> &mut FileNode {
        self.nodes
            .entry(path.to_string())
            .or_insert_with(|| FileNode::new(path))
    }

    /// Replace local halves with a fresh scan.
    ///
    /// Paths that had a local half but are missing from `snapshot` were
    /// deleted locally; their last hash is kept in `deleted_locally`.
    /// Returns true if anything changed.
    pub fn merge_local_snapshot(&mut self, snapshot: &LocalSnapshot) -> bool {
        let mut changed = false;

        for (path, half) in snapshot {
            let node = self.node_mut(path);
            if node.local.as_ref() != Some(half) {
                node.local = Some(half.clone());
                changed = true;
            }
            if node.deleted_locally.take().is_some() {
                changed = true;
            }
        }

        for node in self.nodes.values_mut() {
            if snapshot.contains_key(&node.path) {
                continue;
            }
            if let Some(previous) = node.local.take() {
                tracing::debug!("Local deletion detected: {}", node.path);
                node.deleted_locally = Some(previous.hash);
                changed = true;
            }
        }

        changed
    }

    /// Merge remote halves.
    ///
    /// An incremental entry never replaces a newer one (pushes can arrive
    /// out of order). A complete snapshot is authoritative: it replaces
    /// every remote half and clears those it does not list.
    /// Returns true if anything changed.
    pub fn merge_remote_snapshot(&mut self, snapshot: &RemoteSnapshot, origin: RemoteOrigin) -> bool {
        let mut changed = false;
        let from_cache = origin == RemoteOrigin::Cache;

        for (path, half) in snapshot {
            let node = self.node_mut(path);
            if let Some(existing) = &node.remote {
                if !origin.is_complete() && existing.entry_time > half.entry_time {
                    continue;
                }
            }
            if node.remote.as_ref() != Some(half) || node.cache_origin != from_cache {
                node.remote = Some(half.clone());
                node.cache_origin = from_cache;
                changed = true;
            }
        }

        if origin.is_complete() {
            for node in self.nodes.values_mut() {
                if node.remote.is_some() && !snapshot.contains_key(&node.path) {
                    node.remote = None;
                    node.cache_origin = false;
                    changed = true;
                }
            }
        }

        changed
    }

    /// Record the result of a successful upload or tombstone write.
    pub fn record_remote_write(&mut self, path: &str, half: RemoteHalf) {
        let node = self.node_mut(path);
        node.remote = Some(half);
        node.cache_origin = false;
        node.deleted_locally = None;
    }

    /// Record the result of a successful download.
    pub fn record_local_write(&mut self, path: &str, half: LocalHalf) {
        let node = self.node_mut(path);
        node.local = Some(half);
        node.deleted_locally = None;
    }

    /// Record that the engine itself removed the local file.
    ///
    /// Not a user deletion, so nothing is queued for propagation.
    pub fn record_local_delete(&mut self, path: &str) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.local = None;
            node.deleted_locally = None;
        }
    }

    /// Forget local deletions the remote already records as tombstones.
    /// Returns the number cleared.
    pub fn settle_deletions(&mut self) -> usize {
        let mut settled = 0;
        for node in self.nodes.values_mut() {
            let tombstoned = node.remote.as_ref().is_some_and(|r| r.deleted);
            if tombstoned && node.deleted_locally.take().is_some() {
                settled += 1;
            }
        }
        settled
    }

    /// Remove nodes with neither a local nor a remote half.
    /// Returns the number removed.
    pub fn prune(&mut self) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|_, node| !node.is_empty());
        before - self.nodes.len()
    }

    /// Latest remote entry time known, if any.
    pub fn max_entry_time(&self) -> Option<u64> {
        self.nodes
            .values()
            .filter_map(|node| node.remote.as_ref().map(|r| r.entry_time))
            .max()
    }

    /// Every remote half, keyed by path.
    pub fn remote_snapshot(&self) -> RemoteSnapshot {
        self.nodes
            .values()
            .filter_map(|node| node.remote.clone().map(|r| (node.path.clone(), r)))
            .collect()
    }
}
