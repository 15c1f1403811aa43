//! Reference nodes: the machinery that keeps an inode reachable through
//! multiple paths after a rename crosses a snapshot boundary.
//!
//! `WithCount` is the single owner of the pointee and counts how many named
//! references can still reach it. `WithName` sits in the source directory's
//! snapshot diff with the name frozen at rename time; `DstReference` is the
//! live child at the destination. Both always point at the same `WithCount`,
//! and a `WithCount` never points at another reference.

use crate::inode::InodeId;
use crate::snapshot::SnapshotId;

#[derive(Debug)]
pub enum ReferenceInode {
    /// Anonymous holder of the pointee and the reference count.
    WithCount {
        count: u32,
        pointee: InodeId,
        /// Newest source-side snapshot that captured a rename of the
        /// pointee (the largest `last_snapshot_id` over the `WithName`s
        /// pointing here). Mutations under the destination must record
        /// against at least this id.
        src_snapshot: Option<SnapshotId>,
    },

    /// Immutable-name reference preserving the source-side snapshot view.
    WithName { with_count: InodeId },

    /// Reference at the destination path, recording the destination
    /// subtree's latest snapshot id at rename time. Modifications through
    /// it record against the newer of that id and the destination's current
    /// latest snapshot.
    DstReference {
        with_count: InodeId,
        dst_snapshot_id: Option<SnapshotId>,
    },
}

impl ReferenceInode {
    pub fn is_with_count(&self) -> bool {
        matches!(self, ReferenceInode::WithCount { .. })
    }

    pub fn is_with_name(&self) -> bool {
        matches!(self, ReferenceInode::WithName { .. })
    }

    pub fn is_dst_reference(&self) -> bool {
        matches!(self, ReferenceInode::DstReference { .. })
    }

    /// The `WithCount` a named reference points at.
    pub fn with_count_target(&self) -> Option<InodeId> {
        match self {
            ReferenceInode::WithName { with_count }
            | ReferenceInode::DstReference { with_count, .. } => Some(*with_count),
            ReferenceInode::WithCount { .. } => None,
        }
    }

    /// The owned pointee, for `WithCount` nodes.
    pub fn pointee(&self) -> Option<InodeId> {
        match self {
            ReferenceInode::WithCount { pointee, .. } => Some(*pointee),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u32> {
        match self {
            ReferenceInode::WithCount { count, .. } => Some(*count),
            _ => None,
        }
    }

    pub fn dst_snapshot_id(&self) -> Option<SnapshotId> {
        match self {
            ReferenceInode::DstReference {
                dst_snapshot_id, ..
            } => *dst_snapshot_id,
            _ => None,
        }
    }

    pub fn src_snapshot(&self) -> Option<SnapshotId> {
        match self {
            ReferenceInode::WithCount { src_snapshot, .. } => *src_snapshot,
            _ => None,
        }
    }

    /// Raises the cached source-side snapshot id; never lowers it.
    pub fn record_src_snapshot(&mut self, snapshot: Option<SnapshotId>) {
        match self {
            ReferenceInode::WithCount { src_snapshot, .. } => {
                *src_snapshot = (*src_snapshot).max(snapshot);
            }
            _ => panic!("invariant violation: src snapshot on a non-WithCount reference"),
        }
    }

    pub fn increment(&mut self) -> u32 {
        match self {
            ReferenceInode::WithCount { count, .. } => {
                *count += 1;
                *count
            }
            _ => panic!("invariant violation: increment on a non-WithCount reference"),
        }
    }

    pub fn decrement(&mut self) -> u32 {
        match self {
            ReferenceInode::WithCount { count, .. } => {
                if *count == 0 {
                    panic!("invariant violation: reference count went negative");
                }
                *count -= 1;
                *count
            }
            _ => panic!("invariant violation: decrement on a non-WithCount reference"),
        }
    }
}
