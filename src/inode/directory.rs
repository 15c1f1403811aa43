//! Directory inodes: the sorted children list and the snapshot diff chain.
//!
//! The children list holds ids only; name ordering is maintained by the
//! namespace, which can see every child's name through the arena. The diff
//! list is the per-directory record of §-style snapshot history: one diff
//! per snapshot that saw a change, sorted chronologically, each entry
//! transforming its posterior state back into the state at its snapshot.

use log::debug;

use crate::diff::{Diff, DiffElement, Previous};
use crate::error::{Error, QuotaKind, Result};
use crate::inode::{InodeAttributes, InodeId};
use crate::name::NameKey;
use crate::snapshot::{SnapshotId, SnapshottableFeature};

/// One child as a diff element: the name key at capture time plus the
/// preserved inode's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: NameKey,
    pub id: InodeId,
}

impl ChildEntry {
    pub fn new(name: NameKey, id: InodeId) -> Self {
        ChildEntry { name, id }
    }
}

impl DiffElement for ChildEntry {
    fn key(&self) -> &[u8] {
        self.name.as_bytes()
    }
}

pub type ChildrenDiff = Diff<ChildEntry>;

/// Answer for a child lookup through a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotChild {
    /// The diff chain pinned the child to this preserved inode.
    Found(InodeId),
    /// The child did not exist at the snapshot.
    Absent,
    /// No diff mentions the name; the live child (if any) applies.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct DirectoryDiff {
    snapshot_id: SnapshotId,
    /// Size of the children list in this diff's posterior state.
    children_size: usize,
    snapshot_copy: Option<InodeAttributes>,
    /// Set on the diff appended by snapshot creation on the snapshottable
    /// root itself.
    is_snapshot_root: bool,
    diff: ChildrenDiff,
}

impl DirectoryDiff {
    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    pub fn children_size(&self) -> usize {
        self.children_size
    }

    pub fn snapshot_copy(&self) -> Option<&InodeAttributes> {
        self.snapshot_copy.as_ref()
    }

    pub fn is_snapshot_root(&self) -> bool {
        self.is_snapshot_root
    }

    pub fn children_diff(&self) -> &ChildrenDiff {
        &self.diff
    }

    pub fn children_diff_mut(&mut self) -> &mut ChildrenDiff {
        &mut self.diff
    }
}

/// What became of a removed directory diff.
#[derive(Debug)]
pub enum RemovedDiff {
    /// No diff was recorded for the snapshot; nothing changed.
    NotFound,
    /// A retained snapshot sits between this diff and its predecessor (or
    /// start of the list), so the diff was re-keyed to that prior snapshot
    /// instead of being dropped. Nothing becomes unreachable.
    Retained,
    /// The diff was folded into its predecessor. `trashed` holds entries
    /// created and deleted inside the combined window; they are unreachable
    /// from every remaining state.
    Combined { trashed: Vec<ChildEntry> },
    /// The diff was the oldest one and no retained snapshot precedes it. Its
    /// deleted entries were preserved only for this snapshot and are now
    /// unreachable.
    Oldest { deleted: Vec<ChildEntry> },
}

/// Chronologically sorted list of [`DirectoryDiff`]s. The posterior of each
/// diff is the next entry; the last entry's posterior is the live state.
#[derive(Debug, Default, Clone)]
pub struct DirectoryDiffList {
    diffs: Vec<DirectoryDiff>,
}

impl DirectoryDiffList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diffs(&self) -> &[DirectoryDiff] {
        &self.diffs
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn last_snapshot_id(&self) -> Option<SnapshotId> {
        self.diffs.last().map(|d| d.snapshot_id)
    }

    fn search_exact(&self, snapshot: SnapshotId) -> std::result::Result<usize, usize> {
        self.diffs
            .binary_search_by(|d| d.snapshot_id.cmp(&snapshot))
    }

    /// Index of the diff answering reads at `snapshot`: the exact match, or
    /// the next recorded state. `None` means the live state answers.
    fn covering_index(&self, snapshot: SnapshotId) -> Option<usize> {
        match self.search_exact(snapshot) {
            Ok(exact) => Some(exact),
            Err(insert) if insert < self.diffs.len() => Some(insert),
            Err(_) => None,
        }
    }

    /// Appends the fresh empty diff snapshot creation installs on the
    /// snapshottable root. Its frozen self-copy is the snapshot root.
    pub fn add_snapshot_root_diff(
        &mut self,
        snapshot: SnapshotId,
        children_size: usize,
        root_copy: InodeAttributes,
    ) {
        debug_assert!(
            self.last_snapshot_id().map(|last| last < snapshot).unwrap_or(true),
            "snapshot ids must be appended in order"
        );

        self.diffs.push(DirectoryDiff {
            snapshot_id: snapshot,
            children_size,
            snapshot_copy: Some(root_copy),
            is_snapshot_root: true,
            diff: ChildrenDiff::new(),
        });
    }

    /// Ensures the last diff covers `latest`, appending an empty diff when
    /// the directory has not been touched since that snapshot became latest.
    pub fn check_and_add_latest(
        &mut self,
        latest: SnapshotId,
        children_size: usize,
    ) -> &mut DirectoryDiff {
        let needs_new = self
            .diffs
            .last()
            .map(|d| d.snapshot_id < latest)
            .unwrap_or(true);

        if needs_new {
            debug!("directory diff opened for snapshot {latest:?}");
            self.diffs.push(DirectoryDiff {
                snapshot_id: latest,
                children_size,
                snapshot_copy: None,
                is_snapshot_root: false,
                diff: ChildrenDiff::new(),
            });
        }

        self.diffs.last_mut().expect("diff list cannot be empty here")
    }

    /// Captures the directory's own attributes into the diff covering
    /// `latest`, for attribute-only changes.
    pub fn save_self(
        &mut self,
        latest: SnapshotId,
        children_size: usize,
        copy: &InodeAttributes,
    ) {
        let diff = self.check_and_add_latest(latest, children_size);
        if diff.snapshot_copy.is_none() {
            diff.snapshot_copy = Some(copy.clone());
        }
    }

    /// Child lookup at `snapshot`: walk posterior diffs from the covering
    /// one, answering from the first diff that mentions the name.
    pub fn child_at(&self, name: &[u8], snapshot: SnapshotId) -> SnapshotChild {
        let Some(start) = self.covering_index(snapshot) else {
            return SnapshotChild::Unknown;
        };

        for diff in &self.diffs[start..] {
            match diff.diff.access_previous(name) {
                Previous::Found(entry) => return SnapshotChild::Found(entry.id),
                Previous::Absent => return SnapshotChild::Absent,
                Previous::Unknown => {}
            }
        }

        SnapshotChild::Unknown
    }

    /// Reconstructs the full children list at `snapshot` from the live list:
    /// fold every diff from the covering one onward, then apply the combined
    /// diff backwards over the posterior (live) list.
    pub fn children_at(&self, snapshot: SnapshotId, live: &[ChildEntry]) -> Vec<ChildEntry> {
        let Some(start) = self.covering_index(snapshot) else {
            return live.to_vec();
        };

        let mut combined = self.diffs[start].diff.clone();
        for diff in &self.diffs[start + 1..] {
            // Read-only fold: trashed entries are simply invisible at the
            // requested snapshot.
            combined.combine_posterior(diff.diff.clone(), &mut |_| {});
        }

        combined.apply_to_current(live)
    }

    /// Directory attributes at `snapshot`: nearest frozen copy at or after
    /// the covering diff, `None` when the live attributes apply.
    pub fn attributes_at(&self, snapshot: SnapshotId) -> Option<&InodeAttributes> {
        let start = self.covering_index(snapshot)?;
        self.diffs[start..]
            .iter()
            .find_map(|d| d.snapshot_copy.as_ref())
    }

    /// Removes the diff recorded for exactly `snapshot`. `prior` is the most
    /// recent snapshot still retained that is older than `snapshot` (taken
    /// from the snapshottable root's sequence).
    ///
    /// When `prior` falls strictly between this diff and its predecessor,
    /// the diff still describes `prior`'s view and is re-keyed instead of
    /// removed. Otherwise the diff is folded into its predecessor, or — as
    /// the oldest with no prior — dropped outright. Cleanup of the returned
    /// entries (block collection, reference release) is the caller's job.
    pub fn remove_diff(&mut self, snapshot: SnapshotId, prior: Option<SnapshotId>) -> RemovedDiff {
        let at = match self.search_exact(snapshot) {
            Ok(at) => at,
            Err(_) => return RemovedDiff::NotFound,
        };

        let preceding = at.checked_sub(1).map(|i| self.diffs[i].snapshot_id);
        if let Some(prior) = prior {
            if preceding.map(|p| p < prior).unwrap_or(true) {
                self.diffs[at].snapshot_id = prior;
                return RemovedDiff::Retained;
            }
        }

        let removed = self.diffs.remove(at);

        if at > 0 {
            let mut trashed = Vec::new();
            self.diffs[at - 1]
                .diff
                .combine_posterior(removed.diff, &mut |entry| trashed.push(entry));
            RemovedDiff::Combined { trashed }
        } else {
            RemovedDiff::Oldest {
                deleted: removed.diff.deleted().to_vec(),
            }
        }
    }

    pub fn last_diff_mut(&mut self) -> Option<&mut DirectoryDiff> {
        self.diffs.last_mut()
    }
}

/// Namespace-count and diskspace caps with live usage counters, for
/// directories carrying quotas.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryQuota {
    pub namespace_quota: Option<u64>,
    pub diskspace_quota: Option<u64>,
    pub namespace_used: u64,
    pub diskspace_used: u64,
}

impl DirectoryQuota {
    pub fn new(namespace_quota: Option<u64>, diskspace_quota: Option<u64>) -> Self {
        DirectoryQuota {
            namespace_quota,
            diskspace_quota,
            namespace_used: 0,
            diskspace_used: 0,
        }
    }

    /// Verifies that adding `namespace_delta` items and `diskspace_delta`
    /// bytes stays within the caps.
    pub fn check(&self, path: &str, namespace_delta: u64, diskspace_delta: u64) -> Result<()> {
        if let Some(quota) = self.namespace_quota {
            let count = self.namespace_used + namespace_delta;
            if count > quota {
                return Err(Error::QuotaExceeded {
                    path: path.to_string(),
                    kind: QuotaKind::Namespace,
                    quota,
                    count,
                });
            }
        }
        if let Some(quota) = self.diskspace_quota {
            let count = self.diskspace_used + diskspace_delta;
            if count > quota {
                return Err(Error::QuotaExceeded {
                    path: path.to_string(),
                    kind: QuotaKind::Diskspace,
                    quota,
                    count,
                });
            }
        }
        Ok(())
    }

    pub fn add_usage(&mut self, namespace_delta: i64, diskspace_delta: i64) {
        self.namespace_used = self
            .namespace_used
            .checked_add_signed(namespace_delta)
            .unwrap_or_else(|| panic!("invariant violation: negative namespace usage"));
        self.diskspace_used = self
            .diskspace_used
            .checked_add_signed(diskspace_delta)
            .unwrap_or_else(|| panic!("invariant violation: negative diskspace usage"));
    }
}

#[derive(Debug, Default)]
pub struct DirectoryInode {
    /// Child ids, ascending by the referenced inode's name key. Ordering is
    /// maintained by the namespace, which can compare names via the arena.
    children: Vec<InodeId>,
    diffs: Option<DirectoryDiffList>,
    snapshottable: Option<SnapshottableFeature>,
    quota: Option<DirectoryQuota>,
}

impl DirectoryInode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn children(&self) -> &[InodeId] {
        &self.children
    }

    pub fn insert_child_at(&mut self, index: usize, child: InodeId) {
        self.children.insert(index, child);
    }

    pub fn remove_child_at(&mut self, index: usize) -> InodeId {
        self.children.remove(index)
    }

    pub fn replace_child_at(&mut self, index: usize, child: InodeId) -> InodeId {
        std::mem::replace(&mut self.children[index], child)
    }

    pub fn diffs(&self) -> Option<&DirectoryDiffList> {
        self.diffs.as_ref()
    }

    pub fn diffs_mut(&mut self) -> Option<&mut DirectoryDiffList> {
        self.diffs.as_mut()
    }

    pub fn ensure_diffs(&mut self) -> &mut DirectoryDiffList {
        self.diffs.get_or_insert_with(DirectoryDiffList::new)
    }

    pub fn is_with_snapshot(&self) -> bool {
        self.diffs.is_some()
    }

    pub fn snapshottable(&self) -> Option<&SnapshottableFeature> {
        self.snapshottable.as_ref()
    }

    pub fn snapshottable_mut(&mut self) -> Option<&mut SnapshottableFeature> {
        self.snapshottable.as_mut()
    }

    pub fn is_snapshottable(&self) -> bool {
        self.snapshottable.is_some()
    }

    pub fn set_snapshottable(&mut self, feature: Option<SnapshottableFeature>) {
        self.snapshottable = feature;
    }

    pub fn quota(&self) -> Option<&DirectoryQuota> {
        self.quota.as_ref()
    }

    pub fn quota_mut(&mut self) -> Option<&mut DirectoryQuota> {
        self.quota.as_mut()
    }

    pub fn set_quota(&mut self, quota: Option<DirectoryQuota>) {
        self.quota = quota;
    }
}
