//! Error kinds surfaced by namespace operations.
//!
//! Operations are atomic per top-level call: a mid-operation failure rolls
//! back every diff and child list it touched before surfacing one of these.
//! Invariant violations (overlapping combine keys, negative reference
//! counts) are programming errors and panic instead of returning a value.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required path component (or a named snapshot) is absent.
    #[error("path not found: {path}")]
    NotFound { path: String },

    /// The parent of the target path exists but is not a directory.
    #[error("parent of {path} is a file, not a directory")]
    ParentIsFile { path: String },

    /// The target exists but is a file where a directory is required.
    #[error("{path} is a file, not a directory")]
    NotADirectory { path: String },

    /// The target exists but is a directory where a file is required.
    #[error("{path} is not a file")]
    NotAFile { path: String },

    /// `.snapshot` is reserved and cannot name an ordinary child.
    #[error("{path} uses the reserved name .snapshot")]
    ReservedName { path: String },

    /// The namespace root cannot be deleted or moved.
    #[error("the namespace root cannot be moved or deleted")]
    RootImmutable,

    /// Rename destination sits inside the subtree being moved.
    #[error("cannot rename {src} to a path under itself: {dst}")]
    RenameUnderSelf { src: String, dst: String },

    /// Create or rename destination is already occupied.
    #[error("destination already exists: {path}")]
    AlreadyExists { path: String },

    /// Snapshot operation on a directory that does not allow snapshots.
    #[error("directory is not snapshottable: {path}")]
    NotSnapshottable { path: String },

    /// Duplicate snapshot name within one snapshottable directory.
    #[error("snapshot {name:?} already exists under {path}")]
    SnapshotNameExists { path: String, name: String },

    /// Attempted mutation of an inode reached through `.snapshot`.
    #[error("cannot modify a read-only snapshot path: {path}")]
    InSnapshotPath { path: String },

    /// Deleting a directory that has, or contains a descendant that has,
    /// retained snapshots. `offender` names the snapshottable directory.
    #[error(
        "the directory {offender} cannot be deleted since it is snapshottable \
         and already has snapshots"
    )]
    HasSnapshots { offender: String },

    /// Namespace or diskspace cap on a quota directory was violated.
    #[error("quota exceeded on {path}: {quota} {kind} allowed, {count} counted")]
    QuotaExceeded {
        path: String,
        kind: QuotaKind,
        quota: u64,
        count: u64,
    },

    /// Per-directory snapshot cap from the engine configuration.
    #[error("snapshot limit of {limit} reached for {path}")]
    SnapshotLimitReached { path: String, limit: usize },

    /// A path component exceeds the configured maximum length.
    #[error("component of {path} exceeds the {limit}-byte name limit")]
    ComponentTooLong { path: String, limit: usize },

    /// A directory reached the configured maximum child count.
    #[error("directory {path} reached the {limit}-item limit")]
    DirectoryItemLimit { path: String, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    Namespace,
    Diskspace,
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaKind::Namespace => write!(f, "namespace items"),
            QuotaKind::Diskspace => write!(f, "diskspace bytes"),
        }
    }
}
