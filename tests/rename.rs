//! Rename across snapshot boundaries: reference wiring, counts, and
//! collection when the last reference goes away.

mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;

use canopy::Error;

use common::{attrs, create_file_with_block, namespace};

/// Renaming out of a snapshotted directory keeps both paths alive: the
/// historical one under `.snapshot` and the live one at the destination.
#[test]
fn rename_into_another_directory_keeps_both_paths() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.mkdirs("/b", attrs(1))?;
    create_file_with_block(&mut ns, "/a/x", 128, 2);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 3)?;

    let original = ns.underlying(ns.lookup("/a/x").last().unwrap());
    ns.rename("/a/x", "/b/y")?;

    let through_snapshot = ns.lookup("/a/.snapshot/s0/x").last().unwrap();
    let through_live = ns.lookup("/b/y").last().unwrap();
    assert_eq!(ns.underlying(through_snapshot), original);
    assert_eq!(ns.underlying(through_live), original);

    assert_eq!(ns.reference_count(original), Some(2));

    // The live parent of the moved inode is the destination directory.
    let b = ns.lookup("/b").last().unwrap();
    assert_eq!(ns.parent_of(original), Some(b));
    assert_eq!(ns.path_of(original), "/b/y");

    assert_eq!(ns.lookup("/a/x").last(), None);
    ns.check_invariants();
    Ok(())
}

/// Deleting the snapshot that held the source drops one reference; the
/// destination path keeps the inode alive.
#[test]
fn deleting_the_source_snapshot_releases_one_reference() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.mkdirs("/b", attrs(1))?;
    create_file_with_block(&mut ns, "/a/x", 128, 2);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 3)?;
    ns.rename("/a/x", "/b/y")?;

    let original = ns.underlying(ns.lookup("/b/y").last().unwrap());

    let info = ns.delete_snapshot("/a", "s0")?;
    assert_eq!(info.to_delete(), &[], "the destination still holds the file");

    assert_eq!(ns.lookup("/a/.snapshot/s0/x").last(), None);
    assert_eq!(ns.underlying(ns.lookup("/b/y").last().unwrap()), original);
    assert_eq!(ns.reference_count(original), Some(1));

    ns.check_invariants();
    Ok(())
}

/// Dropping the destination afterwards releases the last reference and
/// finally collects the blocks.
#[test]
fn deleting_the_last_reference_collects_blocks() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.mkdirs("/b", attrs(1))?;
    let block = create_file_with_block(&mut ns, "/a/x", 128, 2);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 3)?;
    ns.rename("/a/x", "/b/y")?;

    ns.delete_snapshot("/a", "s0")?;
    let info = ns.delete("/b/y")?;

    assert_eq!(info.to_delete(), &[block]);
    assert_eq!(ns.lookup("/b/y").last(), None);
    ns.check_invariants();
    Ok(())
}

/// The other order: delete the destination first (reference survives via
/// the snapshot), then the snapshot (last reference, blocks collected).
#[test]
fn snapshot_keeps_the_file_after_the_destination_is_deleted() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.mkdirs("/b", attrs(1))?;
    let block = create_file_with_block(&mut ns, "/a/x", 128, 2);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 3)?;
    ns.rename("/a/x", "/b/y")?;

    let info = ns.delete("/b/y")?;
    assert_eq!(info.to_delete(), &[]);
    assert_eq!(ns.get_status("/a/.snapshot/s0/x")?.size, 128);

    let info = ns.delete_snapshot("/a", "s0")?;
    assert_eq!(info.to_delete(), &[block]);
    ns.check_invariants();
    Ok(())
}

/// Mutations through the destination path still record against the source
/// snapshot, so the historical view stays frozen.
#[test]
fn modification_after_rename_stays_out_of_the_source_snapshot() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.mkdirs("/b", attrs(1))?;
    create_file_with_block(&mut ns, "/a/x", 128, 7);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 8)?;
    ns.rename("/a/x", "/b/y")?;

    ns.set_times("/b/y", Some(77), None)?;

    assert_eq!(ns.get_status("/b/y")?.modification_time, 77);
    assert_eq!(
        ns.get_status("/a/.snapshot/s0/x")?.modification_time,
        7,
        "the source snapshot still shows the pre-rename attributes"
    );
    Ok(())
}

/// A renamed directory's children keep recording into the source snapshot.
#[test]
fn children_of_a_renamed_directory_stay_visible_in_the_snapshot() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a/sub", attrs(1))?;
    ns.mkdirs("/b", attrs(1))?;
    create_file_with_block(&mut ns, "/a/sub/f", 64, 2);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 3)?;

    ns.rename("/a/sub", "/b/moved")?;
    let info = ns.delete("/b/moved/f")?;
    assert_eq!(info.to_delete(), &[], "still visible under /a/.snapshot/s0");

    assert_eq!(ns.get_status("/a/.snapshot/s0/sub/f")?.size, 64);
    assert_eq!(ns.lookup("/b/moved/f").last(), None);
    ns.check_invariants();
    Ok(())
}

/// Plain renames (no snapshot watching the source) never build references.
#[test]
fn plain_rename_moves_without_references() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.mkdirs("/b", attrs(1))?;
    create_file_with_block(&mut ns, "/a/x", 128, 2);

    ns.rename("/a/x", "/b/y")?;

    let moved = ns.lookup("/b/y").last().unwrap();
    assert_eq!(ns.underlying(moved), moved, "no reference wrapping");
    assert_eq!(ns.reference_count(moved), None);
    assert_eq!(ns.lookup("/a/x").last(), None);
    Ok(())
}

#[test]
fn rename_rejects_occupied_and_cyclic_destinations() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a/inner", attrs(1))?;
    create_file_with_block(&mut ns, "/a/f", 16, 2);
    create_file_with_block(&mut ns, "/other", 16, 2);

    let err = ns.rename("/a/f", "/other").unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));

    let err = ns.rename("/a", "/a/inner/again").unwrap_err();
    assert!(matches!(err, Error::RenameUnderSelf { .. }));
    Ok(())
}
