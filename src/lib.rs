//! In-memory snapshot engine for a hierarchical filesystem namespace.
//!
//! The live tree keeps mutating while named, read-only snapshots of
//! arbitrary subtrees stay readable through `…/.snapshot/<name>/…` paths.
//! Snapshots are materialized as copy-on-write diff chains rather than tree
//! copies; a rename across a snapshot boundary leaves reference nodes behind
//! so one inode stays reachable through every path that ever led to it.

mod block;
mod config;
mod diff;
mod error;
mod inode;
mod name;
mod namespace;
mod resolve;
mod snapshot;

pub use block::{BlockId, BlockMap, BlocksMapUpdateInfo, FileBlock};
pub use config::EngineConfig;
pub use error::{Error, QuotaKind, Result};
pub use inode::{InodeAttributes, InodeId, Permission};
pub use name::{join_path, split_path, NameKey, DOT_SNAPSHOT};
pub use namespace::{CreateOptions, EntryStatus, Listing, Namespace};
pub use resolve::InodesInPath;
pub use snapshot::{
    DiffReportEntry, DiffReportKind, SnapshotDiffReport, SnapshotId, SnapshotStatus,
    SnapshottableStatus,
};
