//! Diff: decides what to do with each FileNode.
//!
//! `decide` is a pure function of one node, so every peer that sees the same
//! local and remote versions reaches the same decision.

use crate::node::{FileNode, LocalHalf, RemoteHalf};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// What a remote tombstone means for a local file that still exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TombstonePolicy {
    /// A file edited or recreated after the deletion is uploaded again;
    /// an untouched copy of the deleted content is removed.
    #[default]
    PreferRecreate,
    /// Tombstones always win: the local file is removed.
    HonorDelete,
}

/// Which side of a conflict wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadReason {
    /// No remote document yet
    New,
    /// Both changed; the local version is newer
    ConflictLocalWins,
    /// File exists again after a remote deletion
    Recreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadReason {
    /// No local file yet
    New,
    /// Both changed; the remote version is newer
    ConflictRemoteWins,
    /// Deleted locally, but the remote changed since we last had it
    RemoteChangedAfterLocalDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Upload(UploadReason),
    Download(DownloadReason),
    /// Write a tombstone for a file deleted locally
    DeleteRemote,
    /// Remove a local file a tombstone covers
    DeleteLocal,
}

impl ActionKind {
    /// Short name for logs and progress reports.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Upload(_) => "upload",
            ActionKind::Download(_) => "download",
            ActionKind::DeleteRemote => "delete-remote",
            ActionKind::DeleteLocal => "delete-local",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub path: String,
    pub kind: ActionKind,
}

/// Actions for one tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Actions to apply this tick, in path order
    pub actions: Vec<Action>,
    /// Actions left for a later tick because of the per-tick cap
    pub deferred: Vec<Action>,
}

/// Pick the winner between two differing versions.
///
/// The later modification time wins. On an exact tie the greater content
/// hash wins, so peers deciding independently agree.
pub fn conflict_winner(local: &LocalHalf, remote: &RemoteHalf) -> Side {
    match local.mtime.cmp(&remote.mtime) {
        Ordering::Greater => Side::Local,
        Ordering::Less => Side::Remote,
        Ordering::Equal => {
            if local.hash > remote.hash {
                Side::Local
            } else {
                Side::Remote
            }
        }
    }
}

/// Decide the action for one node, or `None` if it needs nothing.
pub fn decide(node: &FileNode, policy: TombstonePolicy) -> Option<ActionKind> {
    match (&node.local, &node.remote) {
        (Some(_), None) => Some(ActionKind::Upload(UploadReason::New)),

        (None, Some(remote)) if !remote.deleted => match &node.deleted_locally {
            Some(last_hash) if *last_hash == remote.hash => Some(ActionKind::DeleteRemote),
            Some(_) => Some(ActionKind::Download(
                DownloadReason::RemoteChangedAfterLocalDelete,
            )),
            None => Some(ActionKind::Download(DownloadReason::New)),
        },

        (Some(local), Some(remote)) if !remote.deleted => {
            if local.hash == remote.hash {
                return None;
            }
            match conflict_winner(local, remote) {
                Side::Local => Some(ActionKind::Upload(UploadReason::ConflictLocalWins)),
                Side::Remote => Some(ActionKind::Download(DownloadReason::ConflictRemoteWins)),
            }
        }

        (Some(local), Some(tombstone)) => match policy {
            TombstonePolicy::HonorDelete => Some(ActionKind::DeleteLocal),
            TombstonePolicy::PreferRecreate => {
                let recreated =
                    local.hash != tombstone.hash || local.mtime > tombstone.entry_time;
                if recreated {
                    Some(ActionKind::Upload(UploadReason::Recreate))
                } else {
                    Some(ActionKind::DeleteLocal)
                }
            }
        },

        // Settled tombstone, or nothing on either side (pruned)
        (None, _) => None,
    }
}

/// Compute every action for the registry, applying at most `cap` now.
///
/// Actions on paths in `failed_last` go after all others, so a path that
/// keeps failing cannot hold the cap forever. Each group is in path order.
pub fn plan(
    registry: &Registry,
    policy: TombstonePolicy,
    cap: usize,
    failed_last: &BTreeSet<String>,
) -> Plan {
    let (mut all, retries): (Vec<Action>, Vec<Action>) = registry
        .nodes()
        .filter_map(|node| {
            decide(node, policy).map(|kind| Action {
                path: node.path.clone(),
                kind,
            })
        })
        .partition(|action| !failed_last.contains(&action.path));
    all.extend(retries);

    let deferred = if all.len() > cap {
        all.split_off(cap)
    } else {
        Vec::new()
    };

    Plan {
        actions: all,
        deferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_id::DeviceId;
    use crate::hash::ContentHash;
    use crate::node::StorageRef;

    fn local(content: &[u8], mtime: u64) -> LocalHalf {
        LocalHalf {
            hash: ContentHash::of(content),
            size: content.len() as u64,
            mtime,
            ctime: mtime,
        }
    }

    fn remote(content: &[u8], mtime: u64, entry_time: u64, deleted: bool) -> RemoteHalf {
        RemoteHalf {
            hash: ContentHash::of(content),
            size: content.len() as u64,
            mtime,
            ctime: mtime,
            device_id: DeviceId::from(7),
            entry_time,
            deleted,
            storage: StorageRef::Raw,
        }
    }

    fn node(local: Option<LocalHalf>, remote: Option<RemoteHalf>) -> FileNode {
        FileNode {
            local,
            remote,
            ..FileNode::new("p.md")
        }
    }

    const POLICY: TombstonePolicy = TombstonePolicy::PreferRecreate;

    #[test]
    fn test_local_only_uploads() {
        let n = node(Some(local(b"a", 1)), None);
        assert_eq!(decide(&n, POLICY), Some(ActionKind::Upload(UploadReason::New)));
    }

    #[test]
    fn test_remote_only_downloads() {
        let n = node(None, Some(remote(b"a", 1, 1, false)));
        assert_eq!(
            decide(&n, POLICY),
            Some(ActionKind::Download(DownloadReason::New))
        );
    }

    #[test]
    fn test_equal_hashes_ignore_timestamp_skew() {
        let n = node(Some(local(b"same", 1)), Some(remote(b"same", 999_999, 5, false)));
        assert_eq!(decide(&n, POLICY), None);
    }

    #[test]
    fn test_conflict_later_timestamp_wins() {
        let newer_local = node(Some(local(b"mine", 200)), Some(remote(b"theirs", 100, 100, false)));
        assert_eq!(
            decide(&newer_local, POLICY),
            Some(ActionKind::Upload(UploadReason::ConflictLocalWins))
        );

        let newer_remote = node(Some(local(b"mine", 100)), Some(remote(b"theirs", 200, 200, false)));
        assert_eq!(
            decide(&newer_remote, POLICY),
            Some(ActionKind::Download(DownloadReason::ConflictRemoteWins))
        );
    }

    #[test]
    fn test_conflict_tie_break_is_symmetric() {
        // Peer 1 has X locally and sees Y remotely; peer 2 the reverse.
        // Both must settle on the same content.
        let x = b"version x";
        let y = b"version y";
        let peer1 = conflict_winner(&local(x, 500), &remote(y, 500, 1, false));
        let peer2 = conflict_winner(&local(y, 500), &remote(x, 500, 1, false));

        let winner1 = if peer1 == Side::Local { ContentHash::of(x) } else { ContentHash::of(y) };
        let winner2 = if peer2 == Side::Local { ContentHash::of(y) } else { ContentHash::of(x) };
        assert_eq!(winner1, winner2);
        assert_eq!(winner1, ContentHash::of(x).max(ContentHash::of(y)));
    }

    #[test]
    fn test_local_delete_propagates_when_remote_unchanged() {
        let mut n = node(None, Some(remote(b"a", 1, 1, false)));
        n.deleted_locally = Some(ContentHash::of(b"a"));
        assert_eq!(decide(&n, POLICY), Some(ActionKind::DeleteRemote));
    }

    #[test]
    fn test_local_delete_loses_to_concurrent_remote_edit() {
        let mut n = node(None, Some(remote(b"edited", 1, 1, false)));
        n.deleted_locally = Some(ContentHash::of(b"a"));
        assert_eq!(
            decide(&n, POLICY),
            Some(ActionKind::Download(DownloadReason::RemoteChangedAfterLocalDelete))
        );
    }

    #[test]
    fn test_tombstone_without_local_is_noop() {
        let n = node(None, Some(remote(b"gone", 1, 1, true)));
        assert_eq!(decide(&n, POLICY), None);
        assert_eq!(decide(&n, TombstonePolicy::HonorDelete), None);
    }

    #[test]
    fn test_recreate_after_delete_uploads() {
        // Different content than what was deleted
        let n = node(Some(local(b"new", 10)), Some(remote(b"old", 5, 50, true)));
        assert_eq!(
            decide(&n, POLICY),
            Some(ActionKind::Upload(UploadReason::Recreate))
        );

        // Same content, but written after the deletion
        let n = node(Some(local(b"old", 60)), Some(remote(b"old", 5, 50, true)));
        assert_eq!(
            decide(&n, POLICY),
            Some(ActionKind::Upload(UploadReason::Recreate))
        );
    }

    #[test]
    fn test_stale_copy_of_deleted_file_is_removed() {
        let n = node(Some(local(b"old", 5)), Some(remote(b"old", 5, 50, true)));
        assert_eq!(decide(&n, POLICY), Some(ActionKind::DeleteLocal));
    }

    #[test]
    fn test_honor_delete_policy() {
        let n = node(Some(local(b"new", 100)), Some(remote(b"old", 5, 50, true)));
        assert_eq!(
            decide(&n, TombstonePolicy::HonorDelete),
            Some(ActionKind::DeleteLocal)
        );
    }

    #[test]
    fn test_plan_caps_and_defers_in_path_order() {
        use crate::registry::{LocalSnapshot, Registry};

        let mut registry = Registry::new();
        let snapshot: LocalSnapshot = ["c.md", "a.md", "b.md"]
            .iter()
            .map(|p| (p.to_string(), local(p.as_bytes(), 1)))
            .collect();
        registry.merge_local_snapshot(&snapshot);

        let plan = plan(&registry, POLICY, 2, &BTreeSet::new());
        let applied: Vec<_> = plan.actions.iter().map(|a| a.path.as_str()).collect();
        let deferred: Vec<_> = plan.deferred.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(applied, vec!["a.md", "b.md"]);
        assert_eq!(deferred, vec!["c.md"]);
    }

    #[test]
    fn test_plan_puts_paths_that_failed_last_behind_the_rest() {
        use crate::registry::{LocalSnapshot, Registry};

        let mut registry = Registry::new();
        let snapshot: LocalSnapshot = ["a.md", "b.md", "c.md", "d.md"]
            .iter()
            .map(|p| (p.to_string(), local(p.as_bytes(), 1)))
            .collect();
        registry.merge_local_snapshot(&snapshot);
        let failed: BTreeSet<String> = ["a.md", "b.md"].iter().map(|p| p.to_string()).collect();

        let plan = plan(&registry, POLICY, 3, &failed);
        let applied: Vec<_> = plan.actions.iter().map(|a| a.path.as_str()).collect();
        let deferred: Vec<_> = plan.deferred.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(applied, vec!["c.md", "d.md", "a.md"]);
        assert_eq!(deferred, vec!["b.md"]);
    }

    #[test]
    fn test_policy_serde_names() {
        let policy: TombstonePolicy = serde_json::from_str("\"honor-delete\"").unwrap();
        assert_eq!(policy, TombstonePolicy::HonorDelete);
        assert_eq!(
            serde_json::to_string(&TombstonePolicy::PreferRecreate).unwrap(),
            "\"prefer-recreate\""
        );
    }
}
