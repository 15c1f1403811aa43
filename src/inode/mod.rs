//! The inode model: files, directories, and reference nodes, stored in an
//! arena keyed by 64-bit identity.
//!
//! Parent/child edges and every diff payload name inodes by [`InodeId`], so
//! an inode stays alive while the live tree, any snapshot diff, or any
//! reference chain can still reach it. The arena itself does no reachability
//! tracking; deletion and cleanup decide when an id is finally removed.

mod directory;
mod file;
mod reference;

pub use directory::{
    ChildEntry, DirectoryDiff, DirectoryDiffList, DirectoryInode, DirectoryQuota, RemovedDiff,
    SnapshotChild,
};
pub use file::{FileDiff, FileDiffList, FileInode, FileSnapshotCopy};
pub use reference::ReferenceInode;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::name::NameKey;
use crate::snapshot::SnapshotId;

/// 64-bit inode identity, unique across the namespace lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct InodeId(pub u64);

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inode#{}", self.0)
    }
}

/// Owner, group, and mode bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permission {
    pub owner: String,
    pub group: String,
    pub mode: u16,
}

impl Default for Permission {
    fn default() -> Self {
        Permission {
            owner: String::new(),
            group: String::new(),
            mode: 0o755,
        }
    }
}

/// The attribute block shared by every inode variant. Frozen copies of this
/// struct are what snapshot diffs capture for attribute-only changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InodeAttributes {
    pub permission: Permission,
    /// Milliseconds since the epoch, supplied by the caller.
    pub modification_time: u64,
    pub access_time: u64,
}

impl Default for InodeAttributes {
    fn default() -> Self {
        InodeAttributes {
            permission: Permission::default(),
            modification_time: 0,
            access_time: 0,
        }
    }
}

#[derive(Debug)]
pub enum InodeKind {
    File(FileInode),
    Directory(DirectoryInode),
    Reference(ReferenceInode),
}

#[derive(Debug)]
pub struct Inode {
    id: InodeId,
    name: NameKey,
    attrs: InodeAttributes,
    parent: Option<InodeId>,
    /// The `WithCount` wrapping this inode, when a rename across a snapshot
    /// boundary made it reachable through references.
    parent_reference: Option<InodeId>,
    kind: InodeKind,
}

impl Inode {
    pub fn id(&self) -> InodeId {
        self.id
    }

    pub fn name(&self) -> &NameKey {
        &self.name
    }

    pub fn set_name(&mut self, name: NameKey) {
        debug_assert!(
            !matches!(
                &self.kind,
                InodeKind::Reference(r) if r.is_with_name()
            ),
            "the local name of a WithName reference is frozen"
        );
        self.name = name;
    }

    pub fn parent(&self) -> Option<InodeId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<InodeId>) {
        self.parent = parent;
    }

    pub fn parent_reference(&self) -> Option<InodeId> {
        self.parent_reference
    }

    pub fn set_parent_reference(&mut self, reference: Option<InodeId>) {
        self.parent_reference = reference;
    }

    pub fn kind(&self) -> &InodeKind {
        &self.kind
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, InodeKind::File(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, InodeKind::Directory(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, InodeKind::Reference(_))
    }

    pub fn as_file(&self) -> Option<&FileInode> {
        match &self.kind {
            InodeKind::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileInode> {
        match &mut self.kind {
            InodeKind::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_directory(&self) -> Option<&DirectoryInode> {
        match &self.kind {
            InodeKind::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut DirectoryInode> {
        match &mut self.kind {
            InodeKind::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ReferenceInode> {
        match &self.kind {
            InodeKind::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn as_reference_mut(&mut self) -> Option<&mut ReferenceInode> {
        match &mut self.kind {
            InodeKind::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// Live attributes, bypassing any snapshot view.
    pub fn attributes(&self) -> &InodeAttributes {
        &self.attrs
    }

    pub fn attributes_mut(&mut self) -> &mut InodeAttributes {
        &mut self.attrs
    }

    /// Attributes as seen through `snapshot`: the nearest frozen copy at or
    /// after the snapshot, falling back to the live value when no diff
    /// captured one. Reference nodes forward at the namespace layer, where
    /// the pointee can be reached.
    pub fn attributes_at(&self, snapshot: Option<SnapshotId>) -> &InodeAttributes {
        let Some(sid) = snapshot else {
            return &self.attrs;
        };

        match &self.kind {
            InodeKind::File(file) => file
                .diffs()
                .and_then(|diffs| diffs.attributes_at(sid))
                .unwrap_or(&self.attrs),
            InodeKind::Directory(dir) => dir
                .diffs()
                .and_then(|diffs| diffs.attributes_at(sid))
                .unwrap_or(&self.attrs),
            InodeKind::Reference(_) => &self.attrs,
        }
    }
}

/// Arena of all inodes. The namespace owns exactly one of these.
#[derive(Debug, Default)]
pub struct InodeArena {
    nodes: HashMap<InodeId, Inode>,
    next_id: u64,
}

impl InodeArena {
    pub fn new() -> Self {
        InodeArena {
            nodes: HashMap::new(),
            next_id: 1,
        }
    }

    /// Allocates an id and inserts a new inode built around it.
    pub fn allocate(
        &mut self,
        name: NameKey,
        attrs: InodeAttributes,
        parent: Option<InodeId>,
        kind: InodeKind,
    ) -> InodeId {
        let id = InodeId(self.next_id);
        self.next_id += 1;

        self.nodes.insert(
            id,
            Inode {
                id,
                name,
                attrs,
                parent,
                parent_reference: None,
                kind,
            },
        );

        id
    }

    pub fn get(&self, id: InodeId) -> Option<&Inode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: InodeId) -> Option<&mut Inode> {
        self.nodes.get_mut(&id)
    }

    /// Panicking accessor for ids the engine itself recorded. A miss means a
    /// diff, reference, or child list points at a released inode.
    pub fn expect(&self, id: InodeId) -> &Inode {
        self.nodes
            .get(&id)
            .unwrap_or_else(|| panic!("invariant violation: dangling {id}"))
    }

    pub fn expect_mut(&mut self, id: InodeId) -> &mut Inode {
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("invariant violation: dangling {id}"))
    }

    /// Releases an inode. Callers must have detached it from every child
    /// list, diff, and reference first.
    pub fn release(&mut self, id: InodeId) -> Option<Inode> {
        self.nodes.remove(&id)
    }

    pub fn contains(&self, id: InodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = InodeId> + '_ {
        self.nodes.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_hands_out_distinct_ids() {
        let mut arena = InodeArena::new();
        let a = arena.allocate(
            NameKey::from("a"),
            InodeAttributes::default(),
            None,
            InodeKind::Directory(DirectoryInode::new()),
        );
        let b = arena.allocate(
            NameKey::from("b"),
            InodeAttributes::default(),
            Some(a),
            InodeKind::File(FileInode::new(3, 128 * 1024 * 1024)),
        );

        assert_ne!(a, b);
        assert_eq!(arena.expect(b).parent(), Some(a));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn release_removes_the_node() {
        let mut arena = InodeArena::new();
        let id = arena.allocate(
            NameKey::from("f"),
            InodeAttributes::default(),
            None,
            InodeKind::File(FileInode::new(1, 1024)),
        );

        assert!(arena.release(id).is_some());
        assert!(!arena.contains(id));
        assert!(arena.release(id).is_none());
    }

    #[test]
    fn attributes_at_without_diffs_reads_live() {
        let mut arena = InodeArena::new();
        let id = arena.allocate(
            NameKey::from("f"),
            InodeAttributes {
                modification_time: 77,
                ..Default::default()
            },
            None,
            InodeKind::File(FileInode::new(1, 1024)),
        );

        let inode = arena.expect(id);
        assert_eq!(
            inode.attributes_at(Some(SnapshotId(5))).modification_time,
            77
        );
    }
}
