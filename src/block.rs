//! Block identities and the deletion protocol toward the external block map.
//!
//! The engine never touches block storage. When a file, a snapshot diff, or
//! a reference chain becomes unreachable it assembles a
//! [`BlocksMapUpdateInfo`] naming the blocks the block map may release; the
//! caller drains it at its own pace. Collection order within a subtree is
//! depth-first, children before parent.

use serde::Serialize;

use crate::inode::InodeId;

/// Identity of one data block, unique across the namespace lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BlockId(pub u64);

/// One block owned by a file: identity plus the byte length the file sees.
///
/// Frozen file copies in snapshot diffs carry their own `FileBlock` values,
/// so a truncation on the live file never rewrites history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBlock {
    pub id: BlockId,
    pub num_bytes: u64,
}

/// Capability the engine uses to talk about blocks. The external block map
/// implements this; [`BlocksMapUpdateInfo`] implements it too so operations
/// can assemble a deferred batch instead of calling the map inline.
pub trait BlockMap {
    /// The block is unreachable from every live path, snapshot, and
    /// reference; the block map may release it.
    fn add_to_delete(&mut self, block: BlockId);

    /// The block stays reachable but its owning file record changed (the
    /// live copy was deleted and a snapshot copy took over ownership).
    fn mark(&mut self, block: BlockId, owner: InodeId);
}

/// The deferred batch of block-map updates one operation produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BlocksMapUpdateInfo {
    to_delete: Vec<BlockId>,
    marked: Vec<(BlockId, InodeId)>,
}

impl BlocksMapUpdateInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks to remove from the block map, in collection order.
    pub fn to_delete(&self) -> &[BlockId] {
        &self.to_delete
    }

    /// Blocks whose owning-file record should be refreshed.
    pub fn marked(&self) -> &[(BlockId, InodeId)] {
        &self.marked
    }

    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.marked.is_empty()
    }

    /// Replays the batch into a real block map.
    pub fn drain_into(self, map: &mut dyn BlockMap) {
        for (block, owner) in self.marked {
            map.mark(block, owner);
        }
        for block in self.to_delete {
            map.add_to_delete(block);
        }
    }
}

impl BlockMap for BlocksMapUpdateInfo {
    fn add_to_delete(&mut self, block: BlockId) {
        self.to_delete.push(block);
    }

    fn mark(&mut self, block: BlockId, owner: InodeId) {
        self.marked.push((block, owner));
    }
}
