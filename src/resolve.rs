//! The path resolver: walks the tree from the root, producing an
//! inodes-in-path record and transparently entering snapshot views when a
//! `.snapshot/<name>` pair appears under a snapshottable directory.
//!
//! Resolution never fails: missing components leave null slots for the
//! caller to check. The record also carries the *latest snapshot* seen on
//! the way down (what mutations must record against) or, once `.snapshot`
//! has been crossed, the explicit *path snapshot* every further lookup and
//! read must use.

use crate::inode::{DirectoryInode, InodeArena, InodeId, SnapshotChild};
use crate::name::{join_path, NameKey};
use crate::snapshot::SnapshotId;

/// Read-only outcome of one path resolution.
#[derive(Debug)]
pub struct InodesInPath {
    components: Vec<NameKey>,
    /// `inodes[0]` is the root; `inodes[i + 1]` answers `components[i]`.
    /// A `.snapshot` component owns no inode and keeps a null slot; the
    /// following snapshot-name slot holds the snapshottable directory read
    /// through the path snapshot.
    inodes: Vec<Option<InodeId>>,
    latest_snapshot: Option<SnapshotId>,
    path_snapshot: Option<SnapshotId>,
    snapshot_root_index: Option<usize>,
    is_snapshot: bool,
}

impl InodesInPath {
    pub fn components(&self) -> &[NameKey] {
        &self.components
    }

    pub fn inodes(&self) -> &[Option<InodeId>] {
        &self.inodes
    }

    /// The inode the full path resolved to, if every component existed.
    pub fn last(&self) -> Option<InodeId> {
        self.inodes.last().copied().flatten()
    }

    /// The resolved parent slot of the final component.
    pub fn parent(&self) -> Option<InodeId> {
        if self.inodes.len() < 2 {
            return None;
        }
        self.inodes[self.inodes.len() - 2]
    }

    pub fn num_non_null(&self) -> usize {
        self.inodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Newest snapshot covering the walked path; what a mutation at the
    /// tail records against. Meaningful for live paths only.
    pub fn latest_snapshot(&self) -> Option<SnapshotId> {
        self.latest_snapshot
    }

    /// The explicit snapshot a `…/.snapshot/<name>/…` path selected.
    pub fn path_snapshot(&self) -> Option<SnapshotId> {
        self.path_snapshot
    }

    /// Index into [`inodes`](Self::inodes) of the snapshot-root slot.
    pub fn snapshot_root_index(&self) -> Option<usize> {
        self.snapshot_root_index
    }

    pub fn is_snapshot(&self) -> bool {
        self.is_snapshot
    }

    pub fn full_path(&self) -> String {
        join_path(&self.components)
    }
}

/// Newest snapshot a mutation reached through this reference node must
/// record against: the destination-side id frozen at rename time, or the
/// source-side latest cached on the `WithCount`, whichever is newer.
pub(crate) fn reference_latest(arena: &InodeArena, id: InodeId) -> Option<SnapshotId> {
    let reference = arena.expect(id).as_reference()?;
    let src = reference
        .with_count_target()
        .and_then(|wc| arena.expect(wc).as_reference())
        .and_then(|wc| wc.src_snapshot())
        .or_else(|| reference.src_snapshot());
    reference.dst_snapshot_id().max(src)
}

/// Follows a reference chain to the concrete inode behind it. Non-reference
/// ids come back unchanged.
pub(crate) fn resolve_pointee(arena: &InodeArena, mut id: InodeId) -> InodeId {
    loop {
        let Some(reference) = arena.expect(id).as_reference() else {
            return id;
        };
        id = reference
            .with_count_target()
            .or_else(|| reference.pointee())
            .expect("reference node always points somewhere");
    }
}

/// Binary search of the live children list by name key.
pub(crate) fn live_child(
    arena: &InodeArena,
    dir: &DirectoryInode,
    name: &[u8],
) -> Option<InodeId> {
    dir.children()
        .binary_search_by(|id| arena.expect(*id).name().as_bytes().cmp(name))
        .ok()
        .map(|at| dir.children()[at])
}

/// Child lookup honoring an optional snapshot: the diff chain answers
/// first, the live list answers keys no diff mentions.
pub(crate) fn lookup_child(
    arena: &InodeArena,
    dir_id: InodeId,
    name: &[u8],
    snapshot: Option<SnapshotId>,
) -> Option<InodeId> {
    let dir = arena
        .expect(dir_id)
        .as_directory()
        .expect("child lookup on a non-directory");

    if let Some(sid) = snapshot {
        if let Some(diffs) = dir.diffs() {
            match diffs.child_at(name, sid) {
                SnapshotChild::Found(id) => return Some(id),
                SnapshotChild::Absent => return None,
                SnapshotChild::Unknown => {}
            }
        }
    }

    live_child(arena, dir, name)
}

/// Walks `components` from `root`. See the module docs for the contract.
pub(crate) fn resolve(
    arena: &InodeArena,
    root: InodeId,
    components: Vec<NameKey>,
) -> InodesInPath {
    let mut inodes: Vec<Option<InodeId>> = vec![None; components.len() + 1];
    inodes[0] = Some(root);

    let mut latest_snapshot: Option<SnapshotId> = None;
    let mut path_snapshot: Option<SnapshotId> = None;
    let mut snapshot_root_index: Option<usize> = None;
    let mut is_snapshot = false;

    let mut cur: Option<InodeId> = Some(root);
    let mut i = 0;

    while i < components.len() {
        let Some(cur_id) = cur else { break };
        let dir_id = resolve_pointee(arena, cur_id);
        let Some(dir) = arena.expect(dir_id).as_directory() else {
            // A file mid-path: the remaining slots stay null.
            break;
        };

        if !is_snapshot {
            if let Some(feature) = dir.snapshottable() {
                latest_snapshot = latest_snapshot.max(feature.last_snapshot_id());
            }
        }

        let component = &components[i];

        if component.is_dot_snapshot() && dir.is_snapshottable() && !is_snapshot {
            is_snapshot = true;

            if i + 1 == components.len() {
                // Trailing `.snapshot`: the inode list ends at the
                // snapshottable directory, the pseudo-component has none.
                break;
            }

            let name = &components[i + 1];
            let feature = dir.snapshottable().expect("checked above");
            let Some(snapshot) = feature.find_by_name(name.as_bytes()) else {
                break;
            };

            path_snapshot = Some(snapshot.id());
            snapshot_root_index = Some(i + 2);
            inodes[i + 2] = Some(dir_id);
            cur = Some(dir_id);
            i += 2;
            continue;
        }

        let child = lookup_child(arena, dir_id, component.as_bytes(), path_snapshot);
        inodes[i + 1] = child;

        if let (Some(child_id), false) = (child, is_snapshot) {
            // Crossing into a renamed-in subtree: snapshots still watching
            // the pointee from either side of the rename cap how old a
            // snapshot later mutations may record against.
            if arena.expect(child_id).is_reference() {
                latest_snapshot = latest_snapshot.max(reference_latest(arena, child_id));
            }
        }

        cur = child;
        i += 1;
    }

    InodesInPath {
        components,
        inodes,
        latest_snapshot,
        path_snapshot,
        snapshot_root_index,
        is_snapshot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::{DirectoryInode, FileInode, InodeAttributes, InodeKind};
    use crate::name::split_path;

    /// Tiny live tree: / -> d -> f, no snapshots.
    fn small_arena() -> (InodeArena, InodeId, InodeId, InodeId) {
        let mut arena = InodeArena::new();
        let root = arena.allocate(
            NameKey::default(),
            InodeAttributes::default(),
            None,
            InodeKind::Directory(DirectoryInode::new()),
        );
        let d = arena.allocate(
            NameKey::from("d"),
            InodeAttributes::default(),
            Some(root),
            InodeKind::Directory(DirectoryInode::new()),
        );
        let f = arena.allocate(
            NameKey::from("f"),
            InodeAttributes::default(),
            Some(d),
            InodeKind::File(FileInode::new(1, 1024)),
        );

        arena
            .expect_mut(root)
            .as_directory_mut()
            .unwrap()
            .insert_child_at(0, d);
        arena
            .expect_mut(d)
            .as_directory_mut()
            .unwrap()
            .insert_child_at(0, f);

        (arena, root, d, f)
    }

    #[test]
    fn resolves_existing_path() {
        let (arena, root, d, f) = small_arena();
        let iip = resolve(&arena, root, split_path("/d/f"));

        assert_eq!(iip.inodes(), &[Some(root), Some(d), Some(f)]);
        assert_eq!(iip.last(), Some(f));
        assert_eq!(iip.num_non_null(), 3);
        assert!(!iip.is_snapshot());
        assert_eq!(iip.latest_snapshot(), None);
    }

    #[test]
    fn missing_tail_components_are_null() {
        let (arena, root, d, _) = small_arena();
        let iip = resolve(&arena, root, split_path("/d/nope/deeper"));

        assert_eq!(iip.inodes(), &[Some(root), Some(d), None, None]);
        assert_eq!(iip.last(), None);
        assert_eq!(iip.num_non_null(), 2);
    }

    #[test]
    fn file_in_the_middle_stops_the_walk() {
        let (arena, root, d, f) = small_arena();
        let iip = resolve(&arena, root, split_path("/d/f/under"));

        assert_eq!(iip.inodes(), &[Some(root), Some(d), Some(f), None]);
        assert_eq!(iip.last(), None);
    }

    #[test]
    fn dot_snapshot_under_plain_directory_is_an_ordinary_name() {
        let (arena, root, d, _) = small_arena();
        let iip = resolve(&arena, root, split_path("/d/.snapshot"));

        // `d` is not snapshottable, so `.snapshot` is just a missing child.
        assert!(!iip.is_snapshot());
        assert_eq!(iip.inodes(), &[Some(root), Some(d), None]);
    }

    #[test]
    fn full_path_joins_components_back() {
        let (arena, root, _, _) = small_arena();
        let iip = resolve(&arena, root, split_path("/d/f"));
        assert_eq!(iip.full_path(), "/d/f");
    }
}
