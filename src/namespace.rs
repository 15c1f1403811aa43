//! The namespace facade: one `Namespace` value owns the inode arena and
//! exposes every public operation — path lookup, creates, deletes, renames,
//! attribute writes, and the snapshot lifecycle.
//!
//! Operations assume a single logical writer (`&mut self` is the write
//! lock); reads share `&self`. Mutations record into the latest covering
//! snapshot before touching the live tree, and undo handles roll the diffs
//! back if the live mutation fails, so every top-level call is atomic.

use std::collections::HashSet;

use log::{debug, info, trace};
use serde::Serialize;

use crate::block::{BlockId, BlockMap, BlocksMapUpdateInfo, FileBlock};
use crate::config::EngineConfig;
use crate::diff::CreateUndo;
use crate::error::{Error, Result};
use crate::inode::{
    ChildEntry, DirectoryInode, DirectoryQuota, FileInode, InodeArena, InodeAttributes, InodeId,
    InodeKind, ReferenceInode, RemovedDiff,
};
use crate::name::{join_path, split_path, NameKey};
use crate::resolve::{
    live_child, lookup_child, reference_latest, resolve, resolve_pointee, InodesInPath,
};
use crate::snapshot::{
    DiffReportEntry, DiffReportKind, Snapshot, SnapshotDiffReport, SnapshotId, SnapshotStatus,
    SnapshottableFeature, SnapshottableStatus,
};

/// Attributes for a new file.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub attributes: InodeAttributes,
    pub replication: u16,
    pub preferred_block_size: u64,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            attributes: InodeAttributes::default(),
            replication: 3,
            preferred_block_size: 128 * 1024 * 1024,
        }
    }
}

/// Status readout for one path, live or through a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EntryStatus {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub replication: u16,
    pub preferred_block_size: u64,
    pub owner: String,
    pub group: String,
    pub mode: u16,
    pub modification_time: u64,
    pub access_time: u64,
}

/// Result of [`Namespace::get_listing`].
#[derive(Debug)]
pub enum Listing {
    /// Directory contents (or the file itself for a file path).
    Entries(Vec<EntryStatus>),
    /// The snapshot names under a raw `…/.snapshot` path.
    SnapshotNames(Vec<SnapshotStatus>),
}

/// Counts released by destroying or moving a subtree, for quota upkeep.
#[derive(Debug, Default, Clone, Copy)]
struct SubtreeSummary {
    inodes: u64,
    diskspace: u64,
}

pub struct Namespace {
    arena: InodeArena,
    root: InodeId,
    config: EngineConfig,
    next_snapshot_id: u64,
    next_block_id: u64,
    /// Directories currently allowing snapshots, for the listing operation.
    snapshottables: Vec<InodeId>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Namespace {
    pub fn new(config: EngineConfig) -> Self {
        let mut arena = InodeArena::new();
        let root = arena.allocate(
            NameKey::default(),
            InodeAttributes::default(),
            None,
            InodeKind::Directory(DirectoryInode::new()),
        );

        Namespace {
            arena,
            root,
            config,
            next_snapshot_id: 1,
            next_block_id: 1,
            snapshottables: Vec::new(),
        }
    }

    pub fn root_id(&self) -> InodeId {
        self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Lookup and read accessors
    // ------------------------------------------------------------------

    /// Resolves a path. Never fails: absent components become null slots.
    pub fn lookup(&self, path: &str) -> InodesInPath {
        resolve(&self.arena, self.root, split_path(path))
    }

    /// The concrete inode behind `id`, following reference nodes.
    pub fn underlying(&self, id: InodeId) -> InodeId {
        resolve_pointee(&self.arena, id)
    }

    /// The live parent directory of an inode, skipping reference plumbing.
    pub fn parent_of(&self, id: InodeId) -> Option<InodeId> {
        let mut cur = self.arena.get(id)?.parent()?;
        loop {
            let node = self.arena.expect(cur);
            if node.is_reference() {
                cur = node.parent()?;
            } else {
                return Some(cur);
            }
        }
    }

    /// Reference count of the `WithCount` behind `id`, whether `id` is a
    /// named reference, the `WithCount` itself, or a wrapped pointee.
    pub fn reference_count(&self, id: InodeId) -> Option<u32> {
        let node = self.arena.get(id)?;
        let wc = match node.kind() {
            InodeKind::Reference(r) => match r {
                ReferenceInode::WithCount { .. } => id,
                _ => r.with_count_target()?,
            },
            _ => node.parent_reference()?,
        };
        self.arena.get(wc)?.as_reference()?.count()
    }

    /// Full live path of an inode, assembled by climbing parents. Wrapped
    /// pointees take their visible name from the destination reference.
    pub fn path_of(&self, id: InodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = id;

        while cur != self.root {
            let node = self.arena.expect(cur);
            let hidden = node.parent_reference().is_some()
                || node.as_reference().map(|r| r.is_with_count()).unwrap_or(false);
            if !hidden {
                parts.push(node.name().clone());
            }
            match node.parent() {
                Some(parent) => cur = parent,
                None => break,
            }
        }

        parts.reverse();
        join_path(&parts)
    }

    pub fn get_status(&self, path: &str) -> Result<EntryStatus> {
        let iip = self.lookup(path);
        let id = iip.last().ok_or_else(|| Error::NotFound {
            path: path.to_string(),
        })?;
        Ok(self.status_of(id, iip.path_snapshot(), None))
    }

    pub fn get_listing(&self, path: &str) -> Result<Listing> {
        let iip = self.lookup(path);

        // A raw trailing `.snapshot` lists the snapshot names.
        let trailing_dot_snapshot = iip
            .components()
            .last()
            .map(|c| c.is_dot_snapshot())
            .unwrap_or(false);
        if iip.is_snapshot() && iip.path_snapshot().is_none() && trailing_dot_snapshot {
            let dir_id = resolve_pointee(
                &self.arena,
                iip.parent().expect("snapshottable parent resolved"),
            );
            let feature = self
                .arena
                .expect(dir_id)
                .as_directory()
                .and_then(DirectoryInode::snapshottable)
                .expect("resolver only flags snapshottable directories");

            let names = feature
                .snapshots()
                .iter()
                .map(|s| SnapshotStatus {
                    name: s.name().to_string(),
                    created_at: s.created_at(),
                })
                .collect();
            return Ok(Listing::SnapshotNames(names));
        }

        let raw = iip.last().ok_or_else(|| Error::NotFound {
            path: path.to_string(),
        })?;
        let view = iip.path_snapshot();
        let target = resolve_pointee(&self.arena, raw);

        if self.arena.expect(target).is_directory() {
            let entries = self.children_entries_at(target, view);
            Ok(Listing::Entries(
                entries
                    .iter()
                    .map(|e| self.status_of(e.id, view, Some(&e.name)))
                    .collect(),
            ))
        } else {
            Ok(Listing::Entries(vec![self.status_of(raw, view, None)]))
        }
    }

    fn status_of(
        &self,
        id: InodeId,
        snapshot: Option<SnapshotId>,
        name_override: Option<&NameKey>,
    ) -> EntryStatus {
        let visible_name = name_override
            .cloned()
            .unwrap_or_else(|| self.arena.expect(id).name().clone());

        let resolved = resolve_pointee(&self.arena, id);
        let node = self.arena.expect(resolved);
        let attrs = node.attributes_at(snapshot);

        let (is_directory, size, replication, preferred_block_size) = match node.kind() {
            InodeKind::Directory(_) => (true, 0, 0, 0),
            InodeKind::File(file) => {
                let copy = snapshot.and_then(|s| file.diffs().and_then(|d| d.copy_at(s)));
                let size = snapshot
                    .and_then(|s| file.diffs().and_then(|d| d.size_at(s)))
                    .unwrap_or_else(|| file.size());
                (
                    false,
                    size,
                    copy.map(|c| c.replication).unwrap_or_else(|| file.replication()),
                    copy.map(|c| c.preferred_block_size)
                        .unwrap_or_else(|| file.preferred_block_size()),
                )
            }
            InodeKind::Reference(_) => unreachable!("pointee resolved above"),
        };

        EntryStatus {
            name: visible_name.to_string(),
            is_directory,
            size,
            replication,
            preferred_block_size,
            owner: attrs.permission.owner.clone(),
            group: attrs.permission.group.clone(),
            mode: attrs.permission.mode,
            modification_time: attrs.modification_time,
            access_time: attrs.access_time,
        }
    }

    /// Live children as diff entries (name key + id), the shape the diff
    /// machinery folds against.
    fn children_entries_at(&self, dir_id: InodeId, snapshot: Option<SnapshotId>) -> Vec<ChildEntry> {
        let dir = self
            .arena
            .expect(dir_id)
            .as_directory()
            .expect("children of a non-directory");

        let live: Vec<ChildEntry> = dir
            .children()
            .iter()
            .map(|&id| ChildEntry::new(self.arena.expect(id).name().clone(), id))
            .collect();

        match (snapshot, dir.diffs()) {
            (Some(sid), Some(diffs)) => diffs.children_at(sid, &live),
            _ => live,
        }
    }

    // ------------------------------------------------------------------
    // Child list maintenance with snapshot recording
    // ------------------------------------------------------------------

    fn live_child_index(&self, dir_id: InodeId, name: &[u8]) -> std::result::Result<usize, usize> {
        let dir = self
            .arena
            .expect(dir_id)
            .as_directory()
            .expect("child index of a non-directory");
        dir.children()
            .binary_search_by(|&id| self.arena.expect(id).name().as_bytes().cmp(name))
    }

    /// Records the addition into the latest diff, then inserts into the live
    /// children list; the diff entry is undone if the insert loses.
    fn add_child(
        &mut self,
        parent: InodeId,
        child: InodeId,
        latest: Option<SnapshotId>,
        err_path: &str,
    ) -> Result<()> {
        let name = self.arena.expect(child).name().clone();

        let undo = latest.map(|l| {
            let size = self
                .arena
                .expect(parent)
                .as_directory()
                .expect("add_child parent")
                .children()
                .len();
            self.arena
                .expect_mut(parent)
                .as_directory_mut()
                .expect("add_child parent")
                .ensure_diffs()
                .check_and_add_latest(l, size)
                .children_diff_mut()
                .create(ChildEntry::new(name.clone(), child))
        });

        match self.live_child_index(parent, name.as_bytes()) {
            Err(at) => {
                self.arena
                    .expect_mut(parent)
                    .as_directory_mut()
                    .expect("add_child parent")
                    .insert_child_at(at, child);
                self.arena.expect_mut(child).set_parent(Some(parent));

                // Re-creating a name deleted inside the same diff window
                // restores the key and orphans the preserved old entry;
                // release it and its blocks.
                if let Some(restored) = undo.and_then(CreateUndo::into_restored) {
                    if restored.id != child {
                        let mut scrap = BlocksMapUpdateInfo::new();
                        let mut summary = SubtreeSummary::default();
                        self.destroy_and_collect(restored.id, &mut scrap, &mut summary);
                        debug!(
                            "restoration of {} released {} blocks",
                            restored.name,
                            scrap.to_delete().len()
                        );
                    }
                }
                Ok(())
            }
            Ok(_) => {
                if let Some(undo) = undo {
                    self.arena
                        .expect_mut(parent)
                        .as_directory_mut()
                        .expect("add_child parent")
                        .diffs_mut()
                        .and_then(|d| d.last_diff_mut())
                        .expect("diff recorded above")
                        .children_diff_mut()
                        .undo_create(undo);
                }
                Err(Error::AlreadyExists {
                    path: err_path.to_string(),
                })
            }
        }
    }

    /// Records the removal into the latest diff, then removes from the live
    /// children list. On success returns the trashed entry when the child
    /// had been created inside the same diff (the caller cleans it up); on
    /// failure the diff is rolled back and nothing else ran.
    fn remove_child(
        &mut self,
        parent: InodeId,
        child: InodeId,
        latest: Option<SnapshotId>,
        err_path: &str,
    ) -> Result<Option<ChildEntry>> {
        let name = self.arena.expect(child).name().clone();

        let undo = latest.map(|l| {
            let size = self
                .arena
                .expect(parent)
                .as_directory()
                .expect("remove_child parent")
                .children()
                .len();
            self.arena
                .expect_mut(parent)
                .as_directory_mut()
                .expect("remove_child parent")
                .ensure_diffs()
                .check_and_add_latest(l, size)
                .children_diff_mut()
                .delete(ChildEntry::new(name.clone(), child))
        });

        let found = match self.live_child_index(parent, name.as_bytes()) {
            Ok(at) => {
                let dir = self.arena.expect(parent).as_directory().expect("checked");
                (dir.children()[at] == child).then_some(at)
            }
            Err(_) => None,
        };

        match found {
            Some(at) => {
                self.arena
                    .expect_mut(parent)
                    .as_directory_mut()
                    .expect("remove_child parent")
                    .remove_child_at(at);
                self.arena.expect_mut(child).set_parent(None);
                Ok(undo.and_then(|u| u.into_trashed()))
            }
            None => {
                if let Some(undo) = undo {
                    self.arena
                        .expect_mut(parent)
                        .as_directory_mut()
                        .expect("remove_child parent")
                        .diffs_mut()
                        .and_then(|d| d.last_diff_mut())
                        .expect("diff recorded above")
                        .children_diff_mut()
                        .undo_delete(undo);
                }
                Err(Error::NotFound {
                    path: err_path.to_string(),
                })
            }
        }
    }

    /// Captures an inode's pre-mutation state into the diff covering
    /// `latest`. No-op without a covering snapshot.
    fn record_modification(&mut self, id: InodeId, latest: Option<SnapshotId>) {
        let Some(l) = latest else { return };

        let attrs = self.arena.expect(id).attributes().clone();
        let node = self.arena.expect_mut(id);
        if let Some(file) = node.as_file_mut() {
            file.record_modification(l, &attrs);
        } else if let Some(dir) = node.as_directory_mut() {
            let size = dir.children().len();
            dir.ensure_diffs().save_self(l, size, &attrs);
        } else {
            panic!("invariant violation: modification recorded on a reference node");
        }
    }

    /// Parent mtime upkeep for child-list changes, with snapshot capture.
    fn touch_directory(&mut self, dir_id: InodeId, latest: Option<SnapshotId>, mtime: u64) {
        self.record_modification(dir_id, latest);
        self.arena
            .expect_mut(dir_id)
            .attributes_mut()
            .modification_time = mtime;
    }

    // ------------------------------------------------------------------
    // Quota bookkeeping
    // ------------------------------------------------------------------

    fn check_quota_up(
        &self,
        start: InodeId,
        namespace_delta: u64,
        diskspace_delta: u64,
    ) -> Result<()> {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let node = self.arena.expect(id);
            if let Some(quota) = node.as_directory().and_then(DirectoryInode::quota) {
                quota.check(&self.path_of(id), namespace_delta, diskspace_delta)?;
            }
            cur = node.parent();
        }
        Ok(())
    }

    fn update_quota_up(&mut self, start: InodeId, namespace_delta: i64, diskspace_delta: i64) {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let node = self.arena.expect_mut(id);
            if let Some(quota) = node.as_directory_mut().and_then(DirectoryInode::quota_mut) {
                quota.add_usage(namespace_delta, diskspace_delta);
            }
            cur = self.arena.expect(id).parent();
        }
    }

    /// Live inode count and diskspace of a subtree, references included.
    fn count_subtree(&self, id: InodeId) -> SubtreeSummary {
        let mut summary = SubtreeSummary::default();
        self.count_subtree_into(id, &mut summary);
        summary
    }

    fn count_subtree_into(&self, id: InodeId, summary: &mut SubtreeSummary) {
        summary.inodes += 1;
        let node = self.arena.expect(id);
        match node.kind() {
            InodeKind::File(file) => {
                summary.diskspace += file.size() * file.replication() as u64;
            }
            InodeKind::Directory(dir) => {
                for &child in dir.children() {
                    self.count_subtree_into(child, summary);
                }
            }
            InodeKind::Reference(reference) => {
                if let Some(pointee) = reference.pointee() {
                    self.count_subtree_into(pointee, summary);
                } else if let Some(wc) = reference.with_count_target() {
                    // Only the destination reference charges the pointee,
                    // so a subtree is never counted twice.
                    if reference.is_dst_reference() {
                        self.count_subtree_into(wc, summary);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Destruction & block collection
    // ------------------------------------------------------------------

    /// Destroys a subtree, handing every block that became unreachable to
    /// `info`. Depth-first, children before parent. Reference nodes release
    /// their `WithCount`; the pointee dies only when the count hits zero.
    fn destroy_and_collect(
        &mut self,
        id: InodeId,
        info: &mut BlocksMapUpdateInfo,
        summary: &mut SubtreeSummary,
    ) {
        enum Plan {
            File,
            Directory(Vec<InodeId>),
            NamedReference(InodeId),
            WithCount(InodeId),
        }

        let plan = {
            let node = self.arena.expect(id);
            match node.kind() {
                InodeKind::File(_) => Plan::File,
                InodeKind::Directory(dir) => {
                    let mut kids: Vec<InodeId> = dir.children().to_vec();
                    if let Some(diffs) = dir.diffs() {
                        for diff in diffs.diffs() {
                            for entry in diff.children_diff().deleted() {
                                kids.push(entry.id);
                            }
                        }
                    }
                    Plan::Directory(kids)
                }
                InodeKind::Reference(r) => match r.with_count_target() {
                    Some(wc) => Plan::NamedReference(wc),
                    None => Plan::WithCount(r.pointee().expect("WithCount owns a pointee")),
                },
            }
        };

        match plan {
            Plan::File => {
                let file = self.arena.expect(id).as_file().expect("planned as file");
                let replication = file.replication() as u64;
                let mut seen = HashSet::new();
                let mut bytes = 0;

                for block in file.blocks() {
                    if seen.insert(block.id) {
                        info.add_to_delete(block.id);
                        bytes += block.num_bytes;
                    }
                }
                if let Some(diffs) = file.diffs() {
                    for diff in diffs.diffs() {
                        if let Some(copy) = diff.snapshot_copy() {
                            for block in &copy.blocks {
                                if seen.insert(block.id) {
                                    info.add_to_delete(block.id);
                                    bytes += block.num_bytes;
                                }
                            }
                        }
                    }
                }

                summary.inodes += 1;
                summary.diskspace += bytes * replication;
                self.arena.release(id);
            }
            Plan::Directory(kids) => {
                for kid in kids {
                    self.destroy_and_collect(kid, info, summary);
                }
                summary.inodes += 1;
                self.snapshottables.retain(|&s| s != id);
                self.arena.release(id);
            }
            Plan::NamedReference(wc) => {
                self.arena.release(id);
                let count = self
                    .arena
                    .expect_mut(wc)
                    .as_reference_mut()
                    .expect("WithCount target")
                    .decrement();
                trace!("reference released toward {wc}, count now {count}");
                if count == 0 {
                    self.destroy_and_collect(wc, info, summary);
                }
            }
            Plan::WithCount(pointee) => {
                self.arena.release(id);
                self.destroy_and_collect(pointee, info, summary);
            }
        }
    }

    /// First snapshottable directory with retained snapshots in the live
    /// subtree, if any.
    fn find_snapshottable_with_snapshots(&self, id: InodeId) -> Option<InodeId> {
        let id = resolve_pointee(&self.arena, id);
        let dir = self.arena.expect(id).as_directory()?;

        if dir.snapshottable().map(|f| !f.is_empty()).unwrap_or(false) {
            return Some(id);
        }
        for &child in dir.children() {
            if let Some(found) = self.find_snapshottable_with_snapshots(child) {
                return Some(found);
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Namespace writes
    // ------------------------------------------------------------------

    fn require_component_length(&self, name: &NameKey, path: &str) -> Result<()> {
        if name.len() > self.config.max_component_length {
            return Err(Error::ComponentTooLong {
                path: path.to_string(),
                limit: self.config.max_component_length,
            });
        }
        Ok(())
    }

    fn require_directory_capacity(&self, dir_id: InodeId, path: &str) -> Result<()> {
        let len = self
            .arena
            .expect(dir_id)
            .as_directory()
            .expect("capacity of a non-directory")
            .children()
            .len();
        if len >= self.config.max_directory_items {
            return Err(Error::DirectoryItemLimit {
                path: path.to_string(),
                limit: self.config.max_directory_items,
            });
        }
        Ok(())
    }

    /// Creates a file. The parent must exist and the path must be free.
    pub fn create(&mut self, path: &str, options: CreateOptions) -> Result<InodeId> {
        let iip = self.lookup(path);
        if iip.is_snapshot() {
            return Err(Error::InSnapshotPath {
                path: path.to_string(),
            });
        }
        let components = iip.components();
        if components.is_empty() {
            return Err(Error::AlreadyExists {
                path: "/".to_string(),
            });
        }
        if iip.last().is_some() {
            return Err(Error::AlreadyExists {
                path: path.to_string(),
            });
        }

        let name = components.last().expect("non-empty").clone();
        if name.is_dot_snapshot() {
            return Err(Error::ReservedName {
                path: path.to_string(),
            });
        }
        self.require_component_length(&name, path)?;

        let parent_raw = iip.parent().ok_or_else(|| Error::NotFound {
            path: join_path(&components[..components.len() - 1]),
        })?;
        let parent = resolve_pointee(&self.arena, parent_raw);
        if !self.arena.expect(parent).is_directory() {
            return Err(Error::ParentIsFile {
                path: path.to_string(),
            });
        }
        self.require_directory_capacity(parent, path)?;
        self.check_quota_up(parent, 1, 0)?;

        let latest = iip.latest_snapshot();
        self.touch_directory(parent, latest, options.attributes.modification_time);

        let id = self.arena.allocate(
            name,
            options.attributes,
            None,
            InodeKind::File(FileInode::new(
                options.replication,
                options.preferred_block_size,
            )),
        );
        self.add_child(parent, id, latest, path)?;
        self.update_quota_up(parent, 1, 0);

        debug!("created file {path} as {id}");
        Ok(id)
    }

    /// Creates a directory and any missing ancestors. Existing directories
    /// along the way are fine; an existing file is a shape mismatch.
    pub fn mkdirs(&mut self, path: &str, attrs: InodeAttributes) -> Result<InodeId> {
        let components = split_path(path);
        let mut cur = self.root;
        let mut latest: Option<SnapshotId> = None;

        for component in &components {
            let cur_resolved = resolve_pointee(&self.arena, cur);
            let node = self.arena.expect(cur_resolved);
            let Some(dir) = node.as_directory() else {
                return Err(Error::ParentIsFile {
                    path: path.to_string(),
                });
            };

            if let Some(feature) = dir.snapshottable() {
                latest = latest.max(feature.last_snapshot_id());
            }
            if component.is_dot_snapshot() {
                return Err(if dir.is_snapshottable() {
                    Error::InSnapshotPath {
                        path: path.to_string(),
                    }
                } else {
                    Error::ReservedName {
                        path: path.to_string(),
                    }
                });
            }

            match live_child(&self.arena, dir, component.as_bytes()) {
                Some(child) => {
                    if self.arena.expect(child).is_reference() {
                        latest = latest.max(reference_latest(&self.arena, child));
                    }
                    cur = child;
                }
                None => {
                    self.require_component_length(component, path)?;
                    self.require_directory_capacity(cur_resolved, path)?;
                    self.check_quota_up(cur_resolved, 1, 0)?;

                    self.touch_directory(cur_resolved, latest, attrs.modification_time);
                    let id = self.arena.allocate(
                        component.clone(),
                        attrs.clone(),
                        None,
                        InodeKind::Directory(DirectoryInode::new()),
                    );
                    self.add_child(cur_resolved, id, latest, path)?;
                    self.update_quota_up(cur_resolved, 1, 0);
                    cur = id;
                }
            }
        }

        let deepest = resolve_pointee(&self.arena, cur);
        if !self.arena.expect(deepest).is_directory() {
            return Err(Error::NotADirectory {
                path: path.to_string(),
            });
        }
        Ok(deepest)
    }

    /// Deletes a file or directory subtree. Returns the blocks that became
    /// unreachable; a subtree still visible in a snapshot keeps its blocks
    /// and is preserved through the covering diff.
    pub fn delete(&mut self, path: &str) -> Result<BlocksMapUpdateInfo> {
        let iip = self.lookup(path);
        if iip.is_snapshot() {
            return Err(Error::InSnapshotPath {
                path: path.to_string(),
            });
        }
        let target = iip.last().ok_or_else(|| Error::NotFound {
            path: path.to_string(),
        })?;
        if target == self.root {
            return Err(Error::RootImmutable);
        }

        if let Some(offender) = self.find_snapshottable_with_snapshots(target) {
            return Err(Error::HasSnapshots {
                offender: self.path_of(offender),
            });
        }

        let parent = resolve_pointee(&self.arena, iip.parent().expect("non-root has a parent"));
        let latest = iip.latest_snapshot();

        let mut info = BlocksMapUpdateInfo::new();
        let trashed = self.remove_child(parent, target, latest, path)?;

        let mut summary = SubtreeSummary::default();
        match (latest, trashed) {
            (None, _) => {
                self.destroy_and_collect(target, &mut info, &mut summary);
                self.update_quota_up(
                    parent,
                    -(summary.inodes as i64),
                    -(summary.diskspace as i64),
                );
            }
            (Some(_), Some(entry)) => {
                // Created after the latest snapshot and now deleted: no
                // snapshot ever saw it.
                self.destroy_and_collect(entry.id, &mut info, &mut summary);
                self.update_quota_up(
                    parent,
                    -(summary.inodes as i64),
                    -(summary.diskspace as i64),
                );
            }
            (Some(l), None) => {
                // Preserved in the covering diff. Block ownership moves to
                // the snapshot copies.
                debug!("{path} deleted into snapshot {l:?}");
                let node = self.arena.expect_mut(target);
                if let Some(file) = node.as_file_mut() {
                    file.set_current_deleted(true);
                    let blocks: Vec<BlockId> = file.blocks().iter().map(|b| b.id).collect();
                    for block in blocks {
                        info.mark(block, target);
                    }
                }
            }
        }

        Ok(info)
    }

    /// Moves `src` to `dst`. When a snapshot still captures the source
    /// location, the inode is wrapped in reference nodes so both the
    /// historical path and the new live path stay valid.
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_iip = self.lookup(src);
        if src_iip.is_snapshot() {
            return Err(Error::InSnapshotPath {
                path: src.to_string(),
            });
        }
        let src_id = src_iip.last().ok_or_else(|| Error::NotFound {
            path: src.to_string(),
        })?;
        if src_id == self.root {
            return Err(Error::RootImmutable);
        }
        let src_parent = resolve_pointee(&self.arena, src_iip.parent().expect("non-root"));
        let latest_src = src_iip.latest_snapshot();
        let src_name = self.arena.expect(src_id).name().clone();

        let dst_iip = self.lookup(dst);
        if dst_iip.is_snapshot() {
            return Err(Error::InSnapshotPath {
                path: dst.to_string(),
            });
        }
        if dst_iip.last().is_some() {
            return Err(Error::AlreadyExists {
                path: dst.to_string(),
            });
        }
        let dst_components = dst_iip.components();
        if dst_components.is_empty() {
            return Err(Error::RootImmutable);
        }
        let dst_name = dst_components.last().expect("non-empty").clone();
        if dst_name.is_dot_snapshot() {
            return Err(Error::ReservedName {
                path: dst.to_string(),
            });
        }
        self.require_component_length(&dst_name, dst)?;

        let dst_parent_raw = dst_iip.parent().ok_or_else(|| Error::NotFound {
            path: join_path(&dst_components[..dst_components.len() - 1]),
        })?;
        let dst_parent = resolve_pointee(&self.arena, dst_parent_raw);
        if !self.arena.expect(dst_parent).is_directory() {
            return Err(Error::ParentIsFile {
                path: dst.to_string(),
            });
        }
        let latest_dst = dst_iip.latest_snapshot();

        // Reject a move under the moved subtree itself.
        let src_resolved = resolve_pointee(&self.arena, src_id);
        let mut probe = Some(dst_parent);
        while let Some(id) = probe {
            if id == src_resolved {
                return Err(Error::RenameUnderSelf {
                    src: src.to_string(),
                    dst: dst.to_string(),
                });
            }
            probe = self.parent_of(id);
        }

        self.require_directory_capacity(dst_parent, dst)?;
        let moved_summary = self.count_subtree(src_id);
        self.check_quota_up(
            dst_parent,
            moved_summary.inodes,
            moved_summary.diskspace,
        )?;

        let in_src_snapshot = match latest_src {
            None => false,
            Some(l) => lookup_child(&self.arena, src_parent, src_name.as_bytes(), Some(l))
                == Some(src_id),
        };

        if !in_src_snapshot {
            // Plain move; a trashed diff entry is just bookkeeping since the
            // inode lives on at the destination.
            let _ = self.remove_child(src_parent, src_id, latest_src, src)?;
            self.arena.expect_mut(src_id).set_name(dst_name);
            self.add_child(dst_parent, src_id, latest_dst, dst)?;

            self.update_quota_up(
                src_parent,
                -(moved_summary.inodes as i64),
                -(moved_summary.diskspace as i64),
            );
            self.update_quota_up(
                dst_parent,
                moved_summary.inodes as i64,
                moved_summary.diskspace as i64,
            );
        } else {
            // The source location survives in a snapshot: wrap the inode so
            // it stays reachable both ways.
            let wc = match self
                .arena
                .expect(src_id)
                .as_reference()
                .and_then(ReferenceInode::with_count_target)
            {
                Some(existing) => existing,
                None => {
                    let wc = self.arena.allocate(
                        NameKey::default(),
                        InodeAttributes::default(),
                        None,
                        InodeKind::Reference(ReferenceInode::WithCount {
                            count: 0,
                            pointee: src_id,
                            src_snapshot: None,
                        }),
                    );
                    let pointee = self.arena.expect_mut(src_id);
                    pointee.set_parent(Some(wc));
                    pointee.set_parent_reference(Some(wc));
                    wc
                }
            };

            // Source side: a frozen-name reference takes the old slot and is
            // immediately recorded as deleted in the latest diff.
            let with_name = self.arena.allocate(
                src_name.clone(),
                InodeAttributes::default(),
                Some(src_parent),
                InodeKind::Reference(ReferenceInode::WithName { with_count: wc }),
            );
            {
                let wc_node = self
                    .arena
                    .expect_mut(wc)
                    .as_reference_mut()
                    .expect("WithCount");
                wc_node.increment();
                wc_node.record_src_snapshot(latest_src);
            }

            let at = self
                .live_child_index(src_parent, src_name.as_bytes())
                .expect("source child present in live list");
            self.arena
                .expect_mut(src_parent)
                .as_directory_mut()
                .expect("source parent")
                .replace_child_at(at, with_name);
            let trashed = self.remove_child(src_parent, with_name, latest_src, src)?;
            debug_assert!(trashed.is_none(), "WithName was never in the created list");

            // Destination side.
            if self.arena.expect(src_id).is_reference() {
                // The moved node was already a destination reference from an
                // earlier rename; move it and refresh its snapshot bound.
                let node = self.arena.expect_mut(src_id);
                node.set_name(dst_name);
                if let Some(ReferenceInode::DstReference {
                    dst_snapshot_id, ..
                }) = node.as_reference_mut()
                {
                    *dst_snapshot_id = (*dst_snapshot_id).max(latest_dst);
                }
                self.add_child(dst_parent, src_id, latest_dst, dst)?;
            } else {
                let dst_ref = self.arena.allocate(
                    dst_name,
                    InodeAttributes::default(),
                    None,
                    InodeKind::Reference(ReferenceInode::DstReference {
                        with_count: wc,
                        dst_snapshot_id: latest_dst,
                    }),
                );
                self.arena
                    .expect_mut(wc)
                    .as_reference_mut()
                    .expect("WithCount")
                    .increment();
                self.arena.expect_mut(wc).set_parent(Some(dst_ref));
                self.add_child(dst_parent, dst_ref, latest_dst, dst)?;
            }
        }

        info!("renamed {src} -> {dst}");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attribute writes
    // ------------------------------------------------------------------

    /// Resolves a path for mutation: rejects snapshot paths, requires the
    /// target, and widens `latest` with any reference bound at the tail.
    fn prepare_write(&self, path: &str) -> Result<(InodeId, Option<SnapshotId>)> {
        let iip = self.lookup(path);
        if iip.is_snapshot() {
            return Err(Error::InSnapshotPath {
                path: path.to_string(),
            });
        }
        let raw = iip.last().ok_or_else(|| Error::NotFound {
            path: path.to_string(),
        })?;

        let mut latest = iip.latest_snapshot();
        if self.arena.expect(raw).is_reference() {
            latest = latest.max(reference_latest(&self.arena, raw));
        }
        Ok((resolve_pointee(&self.arena, raw), latest))
    }

    pub fn set_times(&mut self, path: &str, mtime: Option<u64>, atime: Option<u64>) -> Result<()> {
        let (id, latest) = self.prepare_write(path)?;
        self.record_modification(id, latest);

        let attrs = self.arena.expect_mut(id).attributes_mut();
        if let Some(mtime) = mtime {
            attrs.modification_time = mtime;
        }
        if let Some(atime) = atime {
            attrs.access_time = atime;
        }
        Ok(())
    }

    pub fn set_permission(&mut self, path: &str, mode: u16) -> Result<()> {
        let (id, latest) = self.prepare_write(path)?;
        self.record_modification(id, latest);
        self.arena.expect_mut(id).attributes_mut().permission.mode = mode;
        Ok(())
    }

    pub fn set_owner(
        &mut self,
        path: &str,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<()> {
        let (id, latest) = self.prepare_write(path)?;
        self.record_modification(id, latest);

        let permission = &mut self.arena.expect_mut(id).attributes_mut().permission;
        if let Some(owner) = owner {
            permission.owner = owner.to_string();
        }
        if let Some(group) = group {
            permission.group = group.to_string();
        }
        Ok(())
    }

    pub fn set_replication(&mut self, path: &str, replication: u16) -> Result<()> {
        let (id, latest) = self.prepare_write(path)?;
        if !self.arena.expect(id).is_file() {
            return Err(Error::NotAFile {
                path: path.to_string(),
            });
        }
        self.record_modification(id, latest);
        self.arena
            .expect_mut(id)
            .as_file_mut()
            .expect("checked")
            .set_replication(replication);
        Ok(())
    }

    /// Installs, updates, or clears (both caps `None`) a directory quota.
    pub fn set_quota(
        &mut self,
        path: &str,
        namespace_quota: Option<u64>,
        diskspace_quota: Option<u64>,
    ) -> Result<()> {
        let (id, _latest) = self.prepare_write(path)?;
        if !self.arena.expect(id).is_directory() {
            return Err(Error::NotADirectory {
                path: path.to_string(),
            });
        }

        if namespace_quota.is_none() && diskspace_quota.is_none() {
            self.arena
                .expect_mut(id)
                .as_directory_mut()
                .expect("checked")
                .set_quota(None);
            return Ok(());
        }

        let usage = self.count_subtree(id);
        let mut quota = DirectoryQuota::new(namespace_quota, diskspace_quota);
        quota.add_usage(usage.inodes as i64, usage.diskspace as i64);
        self.arena
            .expect_mut(id)
            .as_directory_mut()
            .expect("checked")
            .set_quota(Some(quota));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Appends a freshly allocated block to a file.
    pub fn add_block(&mut self, path: &str, num_bytes: u64) -> Result<BlockId> {
        let (id, latest) = self.prepare_write(path)?;
        let replication = match self.arena.expect(id).as_file() {
            Some(file) => file.replication() as u64,
            None => {
                return Err(Error::NotAFile {
                    path: path.to_string(),
                })
            }
        };

        self.check_quota_up(id, 0, num_bytes * replication)?;
        self.record_modification(id, latest);

        let block = BlockId(self.next_block_id);
        self.next_block_id += 1;
        self.arena
            .expect_mut(id)
            .as_file_mut()
            .expect("checked")
            .add_block(FileBlock {
                id: block,
                num_bytes,
            });
        self.update_quota_up(id, 0, (num_bytes * replication) as i64);

        trace!("allocated {block:?} ({num_bytes} bytes) for {path}");
        Ok(block)
    }

    /// Shortens a file. Blocks past the boundary are collected unless a
    /// snapshot copy still holds them. Lengths at or past the current size
    /// are a no-op.
    pub fn truncate(&mut self, path: &str, new_len: u64) -> Result<BlocksMapUpdateInfo> {
        let (id, latest) = self.prepare_write(path)?;
        if !self.arena.expect(id).is_file() {
            return Err(Error::NotAFile {
                path: path.to_string(),
            });
        }

        let mut info = BlocksMapUpdateInfo::new();
        if new_len >= self.arena.expect(id).as_file().expect("checked").size() {
            return Ok(info);
        }

        self.record_modification(id, latest);
        let removed = self
            .arena
            .expect_mut(id)
            .as_file_mut()
            .expect("checked")
            .truncate_blocks(new_len);

        let mut freed = 0u64;
        let replication = {
            let file = self.arena.expect(id).as_file().expect("checked");
            for block in &removed {
                if !file.retains_block(block.id) {
                    info.add_to_delete(block.id);
                    freed += block.num_bytes;
                }
            }
            file.replication() as u64
        };
        self.update_quota_up(id, 0, -((freed * replication) as i64));

        debug!("truncated {path} to {new_len} bytes");
        Ok(info)
    }

    // ------------------------------------------------------------------
    // Snapshot lifecycle
    // ------------------------------------------------------------------

    pub fn allow_snapshot(&mut self, path: &str) -> Result<()> {
        let (id, _latest) = self.prepare_write(path)?;
        if !self.arena.expect(id).is_directory() {
            return Err(Error::NotADirectory {
                path: path.to_string(),
            });
        }

        let dir = self
            .arena
            .expect_mut(id)
            .as_directory_mut()
            .expect("checked");
        if !dir.is_snapshottable() {
            dir.set_snapshottable(Some(SnapshottableFeature::new()));
            self.snapshottables.push(id);
            info!("snapshots allowed on {path}");
        }
        Ok(())
    }

    pub fn disallow_snapshot(&mut self, path: &str) -> Result<()> {
        let (id, _latest) = self.prepare_write(path)?;
        let Some(feature) = self
            .arena
            .expect(id)
            .as_directory()
            .and_then(DirectoryInode::snapshottable)
        else {
            return Ok(());
        };

        if !feature.is_empty() {
            return Err(Error::HasSnapshots {
                offender: path.to_string(),
            });
        }

        self.arena
            .expect_mut(id)
            .as_directory_mut()
            .expect("checked")
            .set_snapshottable(None);
        self.snapshottables.retain(|&s| s != id);
        info!("snapshots disallowed on {path}");
        Ok(())
    }

    /// Takes a named snapshot of a snapshottable directory.
    pub fn create_snapshot(
        &mut self,
        path: &str,
        name: &str,
        created_at: u64,
    ) -> Result<SnapshotId> {
        let (id, _latest) = self.prepare_write(path)?;

        let name_key = NameKey::from(name);
        self.require_component_length(&name_key, path)?;

        let dir = self
            .arena
            .expect(id)
            .as_directory()
            .ok_or_else(|| Error::NotADirectory {
                path: path.to_string(),
            })?;
        let feature = dir.snapshottable().ok_or_else(|| Error::NotSnapshottable {
            path: path.to_string(),
        })?;

        if feature.find_by_name(name_key.as_bytes()).is_some() {
            return Err(Error::SnapshotNameExists {
                path: path.to_string(),
                name: name.to_string(),
            });
        }
        if feature.len() >= self.config.max_snapshots_per_directory {
            return Err(Error::SnapshotLimitReached {
                path: path.to_string(),
                limit: self.config.max_snapshots_per_directory,
            });
        }

        let snapshot = SnapshotId(self.next_snapshot_id);
        self.next_snapshot_id += 1;

        let root_copy = self.arena.expect(id).attributes().clone();
        let children_size = dir.children().len();

        let dir = self
            .arena
            .expect_mut(id)
            .as_directory_mut()
            .expect("checked");
        dir.ensure_diffs()
            .add_snapshot_root_diff(snapshot, children_size, root_copy);
        dir.snapshottable_mut()
            .expect("checked")
            .add(Snapshot::new(snapshot, name_key, created_at));

        info!("snapshot {name:?} ({snapshot:?}) created on {path}");
        Ok(snapshot)
    }

    pub fn rename_snapshot(&mut self, path: &str, old: &str, new: &str) -> Result<()> {
        let (id, _latest) = self.prepare_write(path)?;
        let feature = self
            .arena
            .expect(id)
            .as_directory()
            .and_then(DirectoryInode::snapshottable)
            .ok_or_else(|| Error::NotSnapshottable {
                path: path.to_string(),
            })?;

        if feature.find_by_name(new.as_bytes()).is_some() {
            return Err(Error::SnapshotNameExists {
                path: path.to_string(),
                name: new.to_string(),
            });
        }

        let renamed = self
            .arena
            .expect_mut(id)
            .as_directory_mut()
            .expect("checked")
            .snapshottable_mut()
            .expect("checked")
            .rename(old.as_bytes(), NameKey::from(new));
        if !renamed {
            return Err(Error::NotFound {
                path: format!("{path}/.snapshot/{old}"),
            });
        }

        info!("snapshot {old:?} renamed to {new:?} on {path}");
        Ok(())
    }

    /// Deletes a named snapshot, combining its diffs away throughout the
    /// subtree and returning the blocks that became unreachable.
    pub fn delete_snapshot(&mut self, path: &str, name: &str) -> Result<BlocksMapUpdateInfo> {
        let (id, _latest) = self.prepare_write(path)?;
        let feature = self
            .arena
            .expect(id)
            .as_directory()
            .and_then(DirectoryInode::snapshottable)
            .ok_or_else(|| Error::NotSnapshottable {
                path: path.to_string(),
            })?;

        let snapshot = feature
            .find_by_name(name.as_bytes())
            .ok_or_else(|| Error::NotFound {
                path: format!("{path}/.snapshot/{name}"),
            })?
            .id();
        let prior = feature
            .snapshots()
            .iter()
            .map(Snapshot::id)
            .filter(|&s| s < snapshot)
            .max();

        let mut info = BlocksMapUpdateInfo::new();
        self.remove_snapshot_in_subtree(id, snapshot, prior, &mut info);

        self.arena
            .expect_mut(id)
            .as_directory_mut()
            .expect("checked")
            .snapshottable_mut()
            .expect("checked")
            .remove_by_name(name.as_bytes());

        info!(
            "snapshot {name:?} ({snapshot:?}) deleted on {path}, {} blocks to release",
            info.to_delete().len()
        );
        Ok(info)
    }

    /// Walks one subtree removing every diff recorded for `snapshot`.
    /// Children are processed before their parent, so block collection runs
    /// bottom-up.
    fn remove_snapshot_in_subtree(
        &mut self,
        id: InodeId,
        snapshot: SnapshotId,
        prior: Option<SnapshotId>,
        info: &mut BlocksMapUpdateInfo,
    ) {
        let node = self.arena.expect(id);

        if node.is_reference() {
            let pointee = resolve_pointee(&self.arena, id);
            if pointee != id {
                self.remove_snapshot_in_subtree(pointee, snapshot, prior, info);
            }
            return;
        }

        if node.is_file() {
            let removed = self
                .arena
                .expect_mut(id)
                .as_file_mut()
                .expect("checked")
                .diffs_mut()
                .and_then(|diffs| diffs.remove_diff(snapshot, prior));

            if let Some(diff) = removed {
                if let Some(copy) = diff.into_snapshot_copy() {
                    let file = self.arena.expect(id).as_file().expect("checked");
                    for block in &copy.blocks {
                        if !file.retains_block(block.id) {
                            info.add_to_delete(block.id);
                        }
                    }
                }
            }
            return;
        }

        // Directory: visit live children plus everything preserved in diffs.
        let kids = {
            let dir = self.arena.expect(id).as_directory().expect("checked");
            let mut kids: Vec<InodeId> = dir.children().to_vec();
            if let Some(diffs) = dir.diffs() {
                for diff in diffs.diffs() {
                    for entry in diff.children_diff().deleted() {
                        kids.push(entry.id);
                    }
                }
            }
            kids
        };
        for kid in kids {
            self.remove_snapshot_in_subtree(kid, snapshot, prior, info);
        }

        let removed = self
            .arena
            .expect_mut(id)
            .as_directory_mut()
            .expect("checked")
            .diffs_mut()
            .map(|diffs| diffs.remove_diff(snapshot, prior));

        match removed {
            None | Some(RemovedDiff::NotFound) | Some(RemovedDiff::Retained) => {}
            Some(RemovedDiff::Combined { trashed }) => {
                for entry in trashed {
                    let mut summary = SubtreeSummary::default();
                    self.destroy_and_collect(entry.id, info, &mut summary);
                }
            }
            Some(RemovedDiff::Oldest { deleted }) => {
                for entry in deleted {
                    let mut summary = SubtreeSummary::default();
                    self.destroy_and_collect(entry.id, info, &mut summary);
                }
            }
        }
    }

    pub fn list_snapshottable(&self) -> Vec<SnapshottableStatus> {
        self.snapshottables
            .iter()
            .map(|&id| {
                let feature = self
                    .arena
                    .expect(id)
                    .as_directory()
                    .and_then(DirectoryInode::snapshottable)
                    .expect("registry tracks snapshottable directories");
                SnapshottableStatus {
                    path: self.path_of(id),
                    snapshot_count: feature.len(),
                    snapshot_quota: self.config.max_snapshots_per_directory,
                }
            })
            .collect()
    }

    /// Created/deleted/modified paths between two snapshots of one
    /// snapshottable directory, computed by folding the diff chains.
    pub fn snapshot_diff_report(
        &self,
        path: &str,
        from: &str,
        to: &str,
    ) -> Result<SnapshotDiffReport> {
        let iip = self.lookup(path);
        let id = resolve_pointee(
            &self.arena,
            iip.last().ok_or_else(|| Error::NotFound {
                path: path.to_string(),
            })?,
        );
        let feature = self
            .arena
            .expect(id)
            .as_directory()
            .and_then(DirectoryInode::snapshottable)
            .ok_or_else(|| Error::NotSnapshottable {
                path: path.to_string(),
            })?;

        let resolve_name = |name: &str| -> Result<SnapshotId> {
            feature
                .find_by_name(name.as_bytes())
                .map(Snapshot::id)
                .ok_or_else(|| Error::NotFound {
                    path: format!("{path}/.snapshot/{name}"),
                })
        };
        let s_from = resolve_name(from)?;
        let s_to = resolve_name(to)?;
        let (lo, hi) = if s_from <= s_to {
            (s_from, s_to)
        } else {
            (s_to, s_from)
        };

        let mut entries = Vec::new();
        if self.modified_between(id, lo, hi) {
            entries.push(DiffReportEntry {
                kind: DiffReportKind::Modified,
                path: "/".to_string(),
            });
        }
        self.report_children(id, "", lo, hi, &mut entries);

        Ok(SnapshotDiffReport {
            from: from.to_string(),
            to: to.to_string(),
            entries,
        })
    }

    /// Whether any diff recorded a change strictly inside the (lo, hi]
    /// window. A diff keyed `d` holds changes made after snapshot `d`.
    fn modified_between(&self, id: InodeId, lo: SnapshotId, hi: SnapshotId) -> bool {
        let in_window = |d: SnapshotId| lo <= d && d < hi;
        match self.arena.expect(id).kind() {
            InodeKind::File(file) => file
                .diffs()
                .map(|diffs| diffs.diffs().iter().any(|d| in_window(d.snapshot_id())))
                .unwrap_or(false),
            InodeKind::Directory(dir) => dir
                .diffs()
                .map(|diffs| {
                    diffs.diffs().iter().any(|d| {
                        in_window(d.snapshot_id())
                            && (!d.children_diff().is_empty()
                                || (d.snapshot_copy().is_some() && !d.is_snapshot_root()))
                    })
                })
                .unwrap_or(false),
            InodeKind::Reference(_) => {
                self.modified_between(resolve_pointee(&self.arena, id), lo, hi)
            }
        }
    }

    fn report_children(
        &self,
        dir_id: InodeId,
        rel: &str,
        lo: SnapshotId,
        hi: SnapshotId,
        entries: &mut Vec<DiffReportEntry>,
    ) {
        let at_lo = self.children_entries_at(dir_id, Some(lo));
        let at_hi = self.children_entries_at(dir_id, Some(hi));

        let mut i = 0;
        let mut j = 0;
        while i < at_lo.len() || j < at_hi.len() {
            let order = match (at_lo.get(i), at_hi.get(j)) {
                (Some(a), Some(b)) => a.name.cmp(&b.name),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => break,
            };

            match order {
                std::cmp::Ordering::Less => {
                    entries.push(DiffReportEntry {
                        kind: DiffReportKind::Deleted,
                        path: format!("{rel}/{}", at_lo[i].name),
                    });
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    entries.push(DiffReportEntry {
                        kind: DiffReportKind::Created,
                        path: format!("{rel}/{}", at_hi[j].name),
                    });
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    let (old, new) = (&at_lo[i], &at_hi[j]);
                    if old.id != new.id {
                        // Same name, different inode: deleted and recreated.
                        entries.push(DiffReportEntry {
                            kind: DiffReportKind::Deleted,
                            path: format!("{rel}/{}", old.name),
                        });
                        entries.push(DiffReportEntry {
                            kind: DiffReportKind::Created,
                            path: format!("{rel}/{}", new.name),
                        });
                    } else {
                        let child_rel = format!("{rel}/{}", new.name);
                        if self.modified_between(new.id, lo, hi) {
                            entries.push(DiffReportEntry {
                                kind: DiffReportKind::Modified,
                                path: child_rel.clone(),
                            });
                        }
                        let resolved = resolve_pointee(&self.arena, new.id);
                        if self.arena.expect(resolved).is_directory() {
                            self.report_children(resolved, &child_rel, lo, hi, entries);
                        }
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Consistency checking (test support)
    // ------------------------------------------------------------------

    /// Panics if a structural invariant is broken: children out of byte
    /// order, or a reference count that disagrees with the named references
    /// actually pointing at its `WithCount`.
    pub fn check_invariants(&self) {
        use std::collections::HashMap;

        let mut named: HashMap<InodeId, u32> = HashMap::new();
        for id in self.arena.ids() {
            let node = self.arena.expect(id);
            if let Some(reference) = node.as_reference() {
                if let Some(wc) = reference.with_count_target() {
                    *named.entry(wc).or_insert(0) += 1;
                }
            }
            if let Some(dir) = node.as_directory() {
                let children = dir.children();
                for pair in children.windows(2) {
                    let a = self.arena.expect(pair[0]).name().clone();
                    let b = self.arena.expect(pair[1]).name().clone();
                    assert!(
                        a < b,
                        "invariant violation: children of {id} out of order ({a} >= {b})"
                    );
                }
            }
        }

        for id in self.arena.ids() {
            let node = self.arena.expect(id);
            if let Some(reference) = node.as_reference() {
                if let Some(count) = reference.count() {
                    let expected = named.get(&id).copied().unwrap_or(0);
                    assert_eq!(
                        count, expected,
                        "invariant violation: {id} counts {count} references, {expected} exist"
                    );
                }
            }
        }
    }
}
