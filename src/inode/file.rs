//! File inodes and their snapshot diff list.
//!
//! A file picks up a diff list the first time it is modified while a
//! snapshot covers it. Each diff captures the size at its snapshot plus a
//! frozen copy of the file (attributes and the block list of that moment),
//! so later truncations and attribute changes never disturb history. The set
//! of live blocks plus every frozen copy's blocks is exactly what the block
//! map must retain for the file.

use log::trace;

use crate::block::FileBlock;
use crate::inode::InodeAttributes;
use crate::snapshot::SnapshotId;

/// Frozen state of a file at one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshotCopy {
    pub attributes: InodeAttributes,
    pub replication: u16,
    pub preferred_block_size: u64,
    pub blocks: Vec<FileBlock>,
}

/// One entry in a file's diff chain. The posterior diff is the next entry in
/// the owning list; the last entry's posterior is the live file.
#[derive(Debug, Clone)]
pub struct FileDiff {
    snapshot_id: SnapshotId,
    /// File length at the snapshot this diff reproduces.
    file_size: u64,
    snapshot_copy: Option<FileSnapshotCopy>,
}

impl FileDiff {
    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn snapshot_copy(&self) -> Option<&FileSnapshotCopy> {
        self.snapshot_copy.as_ref()
    }

    pub fn into_snapshot_copy(self) -> Option<FileSnapshotCopy> {
        self.snapshot_copy
    }
}

/// Chronologically sorted list of [`FileDiff`]s.
#[derive(Debug, Default, Clone)]
pub struct FileDiffList {
    diffs: Vec<FileDiff>,
}

impl FileDiffList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diffs(&self) -> &[FileDiff] {
        &self.diffs
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn last_snapshot_id(&self) -> Option<SnapshotId> {
        self.diffs.last().map(|d| d.snapshot_id)
    }

    fn search(&self, snapshot: SnapshotId) -> Result<usize, usize> {
        self.diffs
            .binary_search_by(|d| d.snapshot_id.cmp(&snapshot))
    }

    /// Index of the diff that answers reads at `snapshot`: the exact diff if
    /// one was recorded, else the next recorded state. `None` means the live
    /// state already answers (nothing changed since the snapshot).
    fn covering_index(&self, snapshot: SnapshotId) -> Option<usize> {
        match self.search(snapshot) {
            Ok(exact) => Some(exact),
            Err(insert) if insert < self.diffs.len() => Some(insert),
            Err(_) => None,
        }
    }

    /// Captures the pre-modification state into the diff covering `latest`,
    /// appending a fresh diff first when `latest` has none yet. `size` and
    /// `copy` describe the file immediately before the pending mutation.
    pub fn save_self(&mut self, latest: SnapshotId, size: u64, copy: FileSnapshotCopy) {
        let needs_new = self
            .diffs
            .last()
            .map(|d| d.snapshot_id < latest)
            .unwrap_or(true);

        if needs_new {
            trace!("file diff opened for snapshot {latest:?} at size {size}");
            self.diffs.push(FileDiff {
                snapshot_id: latest,
                file_size: size,
                snapshot_copy: None,
            });
        }

        let last = self.diffs.last_mut().expect("diff list cannot be empty here");
        if last.snapshot_copy.is_none() {
            last.snapshot_copy = Some(copy);
        }
    }

    /// Attributes as seen at `snapshot`: the nearest frozen copy at or after
    /// the covering diff, else `None` (the live value applies).
    pub fn attributes_at(&self, snapshot: SnapshotId) -> Option<&InodeAttributes> {
        self.copy_at(snapshot).map(|copy| &copy.attributes)
    }

    /// The nearest frozen copy visible from `snapshot`.
    pub fn copy_at(&self, snapshot: SnapshotId) -> Option<&FileSnapshotCopy> {
        let start = self.covering_index(snapshot)?;
        self.diffs[start..]
            .iter()
            .find_map(|d| d.snapshot_copy.as_ref())
    }

    /// File length at `snapshot`, `None` when the live length applies.
    pub fn size_at(&self, snapshot: SnapshotId) -> Option<u64> {
        self.covering_index(snapshot)
            .map(|at| self.diffs[at].file_size)
    }

    /// Removes the diff recorded for exactly `snapshot`, if any. `prior` is
    /// the newest still-retained snapshot older than `snapshot`; when it
    /// falls strictly between this diff and its predecessor the diff still
    /// describes `prior`'s view and is re-keyed instead of removed. The
    /// caller decides which of a removed copy's blocks became unreachable.
    pub fn remove_diff(
        &mut self,
        snapshot: SnapshotId,
        prior: Option<SnapshotId>,
    ) -> Option<FileDiff> {
        let at = self.search(snapshot).ok()?;

        let preceding = at.checked_sub(1).map(|i| self.diffs[i].snapshot_id);
        if let Some(prior) = prior {
            if preceding.map(|p| p < prior).unwrap_or(true) {
                self.diffs[at].snapshot_id = prior;
                return None;
            }
        }

        Some(self.diffs.remove(at))
    }

    /// Whether any frozen copy still holds `block`.
    pub fn retains_block(&self, block: crate::block::BlockId) -> bool {
        self.diffs.iter().any(|d| {
            d.snapshot_copy
                .as_ref()
                .is_some_and(|copy| copy.blocks.iter().any(|b| b.id == block))
        })
    }
}

#[derive(Debug)]
pub struct FileInode {
    replication: u16,
    preferred_block_size: u64,
    blocks: Vec<FileBlock>,
    diffs: Option<FileDiffList>,
    /// Deleted from the live tree but still visible in some snapshot.
    current_deleted: bool,
}

impl FileInode {
    pub fn new(replication: u16, preferred_block_size: u64) -> Self {
        FileInode {
            replication,
            preferred_block_size,
            blocks: Vec::new(),
            diffs: None,
            current_deleted: false,
        }
    }

    pub fn replication(&self) -> u16 {
        self.replication
    }

    pub fn set_replication(&mut self, replication: u16) {
        self.replication = replication;
    }

    pub fn preferred_block_size(&self) -> u64 {
        self.preferred_block_size
    }

    pub fn blocks(&self) -> &[FileBlock] {
        &self.blocks
    }

    pub fn add_block(&mut self, block: FileBlock) {
        self.blocks.push(block);
    }

    /// Drops every block at or beyond `new_len` bytes and trims the block
    /// the boundary lands in. Returns the fully removed blocks.
    pub fn truncate_blocks(&mut self, new_len: u64) -> Vec<FileBlock> {
        let mut kept = Vec::new();
        let mut removed = Vec::new();
        let mut offset = 0u64;

        for mut block in self.blocks.drain(..) {
            if offset >= new_len {
                removed.push(block);
            } else {
                if offset + block.num_bytes > new_len {
                    block.num_bytes = new_len - offset;
                }
                offset += block.num_bytes;
                kept.push(block);
            }
        }

        self.blocks = kept;
        removed
    }

    /// Live length in bytes.
    pub fn size(&self) -> u64 {
        self.blocks.iter().map(|b| b.num_bytes).sum()
    }

    pub fn diffs(&self) -> Option<&FileDiffList> {
        self.diffs.as_ref()
    }

    pub fn diffs_mut(&mut self) -> Option<&mut FileDiffList> {
        self.diffs.as_mut()
    }

    pub fn is_with_snapshot(&self) -> bool {
        self.diffs.is_some()
    }

    pub fn is_current_deleted(&self) -> bool {
        self.current_deleted
    }

    pub fn set_current_deleted(&mut self, deleted: bool) {
        self.current_deleted = deleted;
    }

    /// Captures the current state into the diff for `latest` before a
    /// mutation. `attrs` is the owning inode's live attribute block.
    pub fn record_modification(&mut self, latest: SnapshotId, attrs: &InodeAttributes) {
        let size = self.size();
        let copy = FileSnapshotCopy {
            attributes: attrs.clone(),
            replication: self.replication,
            preferred_block_size: self.preferred_block_size,
            blocks: self.blocks.clone(),
        };

        self.diffs
            .get_or_insert_with(FileDiffList::new)
            .save_self(latest, size, copy);
    }

    /// Whether `block` is still reachable through the live list or any
    /// frozen snapshot copy.
    pub fn retains_block(&self, block: crate::block::BlockId) -> bool {
        if self.blocks.iter().any(|b| b.id == block) {
            return true;
        }
        self.diffs.as_ref().is_some_and(|d| d.retains_block(block))
    }
}
