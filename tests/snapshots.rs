//! End-to-end snapshot scenarios: isolation of historical views, lazy diff
//! recording, and block retention across snapshot deletion.

mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;

use canopy::{DiffReportKind, EngineConfig, Error, Listing, Namespace};

use common::{attrs, create_file_with_block, file_options, namespace};

/// Snapshot, then delete the live file: the snapshot view keeps the file
/// and the block map keeps its blocks.
#[test]
fn delete_after_snapshot_preserves_the_view() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    let block = create_file_with_block(&mut ns, "/a/f1", 1024, 2);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 3)?;

    let info = ns.delete("/a/f1")?;
    assert_eq!(info.to_delete(), &[], "blocks stay reachable through s0");

    assert_eq!(ns.lookup("/a/f1").last(), None);
    let status = ns.get_status("/a/.snapshot/s0/f1")?;
    assert_eq!(status.size, 1024);
    assert!(!status.is_directory);

    // The ownership handoff to the snapshot copy is reported to the caller.
    assert_eq!(info.marked().len(), 1);
    assert_eq!(info.marked()[0].0, block);

    ns.check_invariants();
    Ok(())
}

/// Snapshot, then touch the file: the live path sees the new time, the
/// snapshot path the original one.
#[test]
fn attribute_change_is_isolated_from_the_snapshot() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    create_file_with_block(&mut ns, "/a/f1", 1024, 10);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 11)?;

    ns.set_times("/a/f1", Some(99), None)?;

    assert_eq!(ns.get_status("/a/f1")?.modification_time, 99);
    assert_eq!(
        ns.get_status("/a/.snapshot/s0/f1")?.modification_time,
        10,
        "the snapshot keeps the pre-change attributes"
    );
    Ok(())
}

/// Two snapshots watching different windows of a file's life: the create
/// lands in the older diff, the delete in the newer one.
#[test]
fn create_between_snapshots_is_visible_only_in_the_newer_one() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 2)?;

    let block = create_file_with_block(&mut ns, "/a/f1", 512, 3);
    ns.create_snapshot("/a", "s1", 4)?;
    let info = ns.delete("/a/f1")?;
    assert_eq!(info.to_delete(), &[]);

    assert!(ns.get_status("/a/.snapshot/s0/f1").is_err());
    assert_eq!(ns.get_status("/a/.snapshot/s1/f1")?.size, 512);
    assert_eq!(ns.lookup("/a/f1").last(), None);

    // Deleting s1 finally makes the blocks unreachable.
    let info = ns.delete_snapshot("/a", "s1")?;
    assert_eq!(info.to_delete(), &[block]);

    ns.check_invariants();
    Ok(())
}

/// A file created and deleted between two snapshots is reported unreachable
/// when the combine step folds the newer diff into the older one.
#[test]
fn create_then_delete_between_snapshots_is_trashed_on_combine() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 2)?;

    let block = create_file_with_block(&mut ns, "/a/tmp", 256, 3);
    ns.create_snapshot("/a", "s1", 4)?;
    ns.delete("/a/tmp")?;

    assert!(ns.get_status("/a/.snapshot/s0/tmp").is_err());
    assert_eq!(ns.lookup("/a/tmp").last(), None);

    let info = ns.delete_snapshot("/a", "s1")?;
    assert_eq!(info.to_delete(), &[block], "combine trashes the entry");

    // s0 never saw tmp and still resolves cleanly.
    assert!(ns.get_status("/a/.snapshot/s0/tmp").is_err());
    ns.check_invariants();
    Ok(())
}

/// Create/delete inside the same (latest) diff: the blocks come back from
/// the delete itself, no snapshot ever held the file.
#[test]
fn create_then_delete_under_one_snapshot_collects_immediately() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 2)?;

    let block = create_file_with_block(&mut ns, "/a/tmp", 256, 3);
    let info = ns.delete("/a/tmp")?;

    assert_eq!(info.to_delete(), &[block]);
    assert!(ns.get_status("/a/.snapshot/s0/tmp").is_err());
    ns.check_invariants();
    Ok(())
}

#[test]
fn snapshot_ids_are_monotone() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.mkdirs("/b", attrs(1))?;
    ns.allow_snapshot("/a")?;
    ns.allow_snapshot("/b")?;

    let s0 = ns.create_snapshot("/a", "s0", 2)?;
    let s1 = ns.create_snapshot("/b", "other", 2)?;
    let s2 = ns.create_snapshot("/a", "s1", 2)?;

    assert!(s0 < s1 && s1 < s2, "ids order across directories too");
    Ok(())
}

#[test]
fn truncate_under_snapshot_keeps_historical_blocks() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.create("/a/f", file_options(2))?;
    let _b1 = ns.add_block("/a/f", 100)?;
    let b2 = ns.add_block("/a/f", 100)?;

    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "before", 3)?;

    let info = ns.truncate("/a/f", 100)?;
    assert_eq!(info.to_delete(), &[], "the snapshot copy still holds b2");

    assert_eq!(ns.get_status("/a/f")?.size, 100);
    assert_eq!(ns.get_status("/a/.snapshot/before/f")?.size, 200);

    let info = ns.delete_snapshot("/a", "before")?;
    assert_eq!(info.to_delete(), &[b2]);
    assert_eq!(ns.get_status("/a/f")?.size, 100);
    Ok(())
}

#[test]
fn truncate_without_snapshot_collects_blocks() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    ns.create("/a/f", file_options(2))?;
    ns.add_block("/a/f", 100)?;
    let b2 = ns.add_block("/a/f", 100)?;

    let info = ns.truncate("/a/f", 100)?;
    assert_eq!(info.to_delete(), &[b2]);
    Ok(())
}

#[test]
fn snapshot_listing_and_rename() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/data", attrs(1))?;
    ns.allow_snapshot("/data")?;
    ns.create_snapshot("/data", "nightly", 100)?;
    ns.create_snapshot("/data", "weekly", 200)?;

    let Listing::SnapshotNames(names) = ns.get_listing("/data/.snapshot")? else {
        panic!("expected a snapshot-name listing");
    };
    let names: Vec<&str> = names.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["nightly", "weekly"]);

    ns.rename_snapshot("/data", "nightly", "monday")?;
    assert!(ns.get_status("/data/.snapshot/monday").is_ok());
    assert!(ns.get_status("/data/.snapshot/nightly").is_err());

    let err = ns.rename_snapshot("/data", "monday", "weekly").unwrap_err();
    assert!(matches!(err, Error::SnapshotNameExists { .. }));
    Ok(())
}

#[test]
fn listing_through_a_snapshot_shows_the_old_children() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    create_file_with_block(&mut ns, "/a/keep", 10, 2);
    create_file_with_block(&mut ns, "/a/gone", 10, 2);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 3)?;

    ns.delete("/a/gone")?;
    create_file_with_block(&mut ns, "/a/fresh", 10, 4);

    let Listing::Entries(now) = ns.get_listing("/a")? else {
        panic!("expected entries");
    };
    let now: Vec<&str> = now.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(now, vec!["fresh", "keep"]);

    let Listing::Entries(then) = ns.get_listing("/a/.snapshot/s0")? else {
        panic!("expected entries");
    };
    let then: Vec<&str> = then.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(then, vec!["gone", "keep"], "byte-ordered historical view");
    Ok(())
}

#[test]
fn diff_report_lists_created_deleted_and_modified() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    create_file_with_block(&mut ns, "/a/stale", 10, 2);
    create_file_with_block(&mut ns, "/a/touched", 10, 2);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 3)?;

    ns.delete("/a/stale")?;
    create_file_with_block(&mut ns, "/a/new", 10, 4);
    ns.set_times("/a/touched", Some(50), None)?;
    ns.create_snapshot("/a", "s1", 5)?;

    let report = ns.snapshot_diff_report("/a", "s0", "s1")?;

    let find = |kind: DiffReportKind| -> Vec<&str> {
        report
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.path.as_str())
            .collect()
    };
    assert_eq!(find(DiffReportKind::Created), vec!["/new"]);
    assert_eq!(find(DiffReportKind::Deleted), vec!["/stale"]);
    assert_eq!(find(DiffReportKind::Modified), vec!["/", "/touched"]);
    Ok(())
}

#[test]
fn snapshot_limit_is_enforced() -> Result<()> {
    let config = EngineConfig::from_json(r#"{ "maxSnapshotsPerDirectory": 1 }"#)?;
    let mut ns = Namespace::new(config);
    ns.mkdirs("/a", attrs(1))?;
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "only", 2)?;

    let err = ns.create_snapshot("/a", "toomany", 3).unwrap_err();
    assert!(matches!(err, Error::SnapshotLimitReached { limit: 1, .. }));
    Ok(())
}

/// A name deleted under one snapshot window and recreated with a new inode
/// under the next: deleting the middle snapshot folds the two diffs, and
/// the oldest snapshot must keep resolving the original file — never the
/// replacement — with the original's block surfacing once that snapshot
/// goes too.
#[test]
fn replaced_name_survives_middle_snapshot_deletion() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    let old_block = create_file_with_block(&mut ns, "/a/f", 100, 2);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "s0", 3)?;

    let original = ns.underlying(ns.lookup("/a/f").last().unwrap());
    ns.delete("/a/f")?; // recorded under s0's window

    ns.create_snapshot("/a", "s1", 4)?;
    create_file_with_block(&mut ns, "/a/f", 300, 5); // successor, s1's window
    ns.create_snapshot("/a", "s2", 6)?;

    let info = ns.delete_snapshot("/a", "s1")?;
    assert_eq!(
        info.to_delete(),
        &[],
        "s0 still holds the original, s2 and live the successor"
    );

    // The oldest snapshot keeps the original inode and size; newer views
    // see the replacement.
    let through_s0 = ns.lookup("/a/.snapshot/s0/f").last().unwrap();
    assert_eq!(ns.underlying(through_s0), original);
    assert_eq!(ns.get_status("/a/.snapshot/s0/f")?.size, 100);
    assert_eq!(ns.get_status("/a/.snapshot/s2/f")?.size, 300);
    assert_eq!(ns.get_status("/a/f")?.size, 300);

    // Dropping s0 releases the original; its block is reported, not leaked.
    let info = ns.delete_snapshot("/a", "s0")?;
    assert_eq!(info.to_delete(), &[old_block]);
    assert_eq!(ns.get_status("/a/f")?.size, 300);

    ns.check_invariants();
    Ok(())
}

/// Deleting a middle snapshot re-keys diffs so older snapshots keep their
/// view.
#[test]
fn deleting_a_newer_snapshot_keeps_the_older_view_intact() -> Result<()> {
    let mut ns = namespace();
    ns.mkdirs("/a", attrs(1))?;
    create_file_with_block(&mut ns, "/a/f", 64, 2);
    ns.allow_snapshot("/a")?;
    ns.create_snapshot("/a", "old", 3)?;
    ns.create_snapshot("/a", "mid", 4)?;

    ns.delete("/a/f")?;

    // Dropping "mid" must not lose the state "old" still needs.
    let info = ns.delete_snapshot("/a", "mid")?;
    assert_eq!(info.to_delete(), &[]);
    assert_eq!(ns.get_status("/a/.snapshot/old/f")?.size, 64);

    let info = ns.delete_snapshot("/a", "old")?;
    assert_eq!(info.to_delete().len(), 1);
    ns.check_invariants();
    Ok(())
}
