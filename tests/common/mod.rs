//! Shared helpers for the end-to-end scenario tests.

#![allow(dead_code)]

use canopy::{BlockId, CreateOptions, InodeAttributes, Namespace, Permission};

pub fn namespace() -> Namespace {
    Namespace::default()
}

pub fn attrs(mtime: u64) -> InodeAttributes {
    InodeAttributes {
        permission: Permission {
            owner: "hdfs".to_string(),
            group: "supergroup".to_string(),
            mode: 0o755,
        },
        modification_time: mtime,
        access_time: mtime,
    }
}

pub fn file_options(mtime: u64) -> CreateOptions {
    CreateOptions {
        attributes: attrs(mtime),
        replication: 3,
        preferred_block_size: 128 * 1024 * 1024,
    }
}

/// Creates a file holding one block of `bytes` bytes and returns its block.
pub fn create_file_with_block(
    ns: &mut Namespace,
    path: &str,
    bytes: u64,
    mtime: u64,
) -> BlockId {
    ns.create(path, file_options(mtime)).expect("create file");
    ns.add_block(path, bytes).expect("allocate block")
}
