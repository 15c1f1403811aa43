//! Snapshot handles, per-directory snapshottable state, and the report
//! types the listing and diff-report operations hand back.
//!
//! Snapshot ids come from one namespace-global monotone counter, so ids
//! totally order snapshots across directories; a directory's own sequence
//! is then automatically monotone too. Names are unique within their
//! snapshottable directory only.

use serde::Serialize;

use crate::name::NameKey;

/// Monotone snapshot identity. Ids are the serialization point for snapshot
/// ordering; two snapshots taken at the same instant still differ here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SnapshotId(pub u64);

/// Handle for one named snapshot. The frozen root copy taken at creation
/// lives in the snapshottable directory's creation diff; the handle itself
/// is the (id, name) pair plus bookkeeping for listings.
#[derive(Debug, Clone)]
pub struct Snapshot {
    id: SnapshotId,
    name: NameKey,
    /// Caller-supplied creation stamp, milliseconds since the epoch.
    created_at: u64,
}

impl Snapshot {
    pub fn new(id: SnapshotId, name: NameKey, created_at: u64) -> Self {
        Snapshot {
            id,
            name,
            created_at,
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn name(&self) -> &NameKey {
        &self.name
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// The state a directory carries once snapshots are allowed on it.
#[derive(Debug, Default)]
pub struct SnapshottableFeature {
    /// Ascending by id, which is also creation order.
    snapshots: Vec<Snapshot>,
}

impl SnapshottableFeature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Id of the most recently taken snapshot, the directory's own *latest*.
    pub fn last_snapshot_id(&self) -> Option<SnapshotId> {
        self.snapshots.last().map(Snapshot::id)
    }

    pub fn find_by_name(&self, name: &[u8]) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .find(|s| s.name().as_bytes() == name)
    }

    /// Appends a freshly created snapshot. The id must be newer than every
    /// retained one and the name must be free; callers validate the name.
    pub fn add(&mut self, snapshot: Snapshot) {
        debug_assert!(self.find_by_name(snapshot.name().as_bytes()).is_none());
        debug_assert!(
            self.last_snapshot_id().map(|last| last < snapshot.id()).unwrap_or(true),
            "snapshot ids are allocated monotonically"
        );
        self.snapshots.push(snapshot);
    }

    /// Renames a retained snapshot. Returns false when `old` is absent;
    /// name-collision checks happen in the caller, which owns error context.
    pub fn rename(&mut self, old: &[u8], new: NameKey) -> bool {
        let Some(snapshot) = self
            .snapshots
            .iter_mut()
            .find(|s| s.name().as_bytes() == old)
        else {
            return false;
        };
        snapshot.name = new;
        true
    }

    pub fn remove_by_name(&mut self, name: &[u8]) -> Option<Snapshot> {
        let at = self
            .snapshots
            .iter()
            .position(|s| s.name().as_bytes() == name)?;
        Some(self.snapshots.remove(at))
    }
}

/// One row of the snapshottable-directory listing.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshottableStatus {
    pub path: String,
    pub snapshot_count: usize,
    pub snapshot_quota: usize,
}

/// One row of a directory's snapshot listing (`…/.snapshot`).
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStatus {
    pub name: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffReportKind {
    Created,
    Deleted,
    Modified,
}

/// One changed path between two snapshots of the same directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffReportEntry {
    pub kind: DiffReportKind,
    /// Path relative to the snapshottable directory.
    pub path: String,
}

/// The created/deleted/modified listing between two snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotDiffReport {
    pub from: String,
    pub to: String,
    pub entries: Vec<DiffReportEntry>,
}
