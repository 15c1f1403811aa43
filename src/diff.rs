//! The generic ordered (created, deleted) diff over a keyed collection.
//!
//! A diff describes the change between two consecutive states of a sorted,
//! keyed list: `created` holds entries present in the posterior state but
//! not the prior one, `deleted` holds entries present in the prior state but
//! not the posterior one. Both lists stay sorted by key. A recorded diff
//! never holds a key in both lists at once; combining adjacent diffs can
//! leave a replaced key on both sides (the old capture in `deleted`, its
//! successor in `created`), and prior-state reads keep preferring the
//! deleted capture.
//!
//! Mutating operations hand back undo values so a caller whose live mutation
//! fails afterwards can restore the diff exactly (top-level operations are
//! atomic). Combining two adjacent diffs replays the posterior diff's
//! entries into the anterior one; entries that turn out to have been created
//! and deleted inside the combined window are *trashed* and surfaced to the
//! caller for cleanup.

use crate::name::NameKey;

/// An element a [`Diff`] can track. The key decides ordering and identity.
pub trait DiffElement: Clone {
    fn key(&self) -> &[u8];
}

/// Tri-valued answer for a key's state on the prior side of a diff.
#[derive(Debug, PartialEq, Eq)]
pub enum Previous<'a, E> {
    /// The key existed before this diff, with this value.
    Found(&'a E),
    /// The key did not exist before this diff.
    Absent,
    /// This diff says nothing about the key; look at the posterior state.
    Unknown,
}

/// Undo value for [`Diff::create`].
#[derive(Debug)]
pub struct CreateUndo<E> {
    key: NameKey,
    /// The old element that `create` removed from `deleted` (restoration
    /// case). `None` means the element went into `created` instead.
    restored: Option<E>,
}

impl<E> CreateUndo<E> {
    /// Consumes the undo on the success path, yielding the element the
    /// restoration dropped from `deleted`, if any. Nothing in the diff
    /// references it afterwards; the caller decides its fate.
    pub fn into_restored(self) -> Option<E> {
        self.restored
    }
}

/// Undo value for [`Diff::delete`]. On success the caller takes the trashed
/// element (if any) out for cleanup; on failure the whole value goes back
/// through [`Diff::undo_delete`].
#[derive(Debug)]
pub struct DeleteUndo<E> {
    key: NameKey,
    /// Element removed from `created` by this delete: it was created inside
    /// the same diff and is now unreachable from either endpoint.
    trashed: Option<E>,
    /// The index at which a trashed element was removed from `created`.
    trashed_index: usize,
}

impl<E> DeleteUndo<E> {
    /// Consumes the undo on the success path, yielding the element this
    /// delete trashed, if any.
    pub fn into_trashed(self) -> Option<E> {
        self.trashed
    }

    pub fn trashed(&self) -> Option<&E> {
        self.trashed.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct Diff<E> {
    created: Vec<E>,
    deleted: Vec<E>,
}

impl<E> Default for Diff<E> {
    fn default() -> Self {
        Diff {
            created: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<E: DiffElement> Diff<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> &[E] {
        &self.created
    }

    pub fn deleted(&self) -> &[E] {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }

    fn search(list: &[E], key: &[u8]) -> Result<usize, usize> {
        list.binary_search_by(|probe| probe.key().cmp(key))
    }

    /// Records that `elem` now exists in the posterior state.
    ///
    /// If the same key sits in `deleted`, the element is being restored: the
    /// deleted entry is dropped instead of a created entry being added.
    pub fn create(&mut self, elem: E) -> CreateUndo<E> {
        let key = NameKey::from(elem.key());

        if let Ok(d) = Self::search(&self.deleted, elem.key()) {
            let restored = self.deleted.remove(d);
            return CreateUndo {
                key,
                restored: Some(restored),
            };
        }

        match Self::search(&self.created, elem.key()) {
            Ok(_) => panic!(
                "invariant violation: key {:?} created twice in one diff",
                key
            ),
            Err(c) => self.created.insert(c, elem),
        }

        CreateUndo {
            key,
            restored: None,
        }
    }

    pub fn undo_create(&mut self, undo: CreateUndo<E>) {
        match undo.restored {
            Some(old) => {
                // Restoration path: put the deleted entry back.
                let d = Self::search(&self.deleted, old.key())
                    .expect_err("undo_create: restored key reappeared in deleted");
                self.deleted.insert(d, old);
            }
            None => {
                let c = Self::search(&self.created, undo.key.as_bytes())
                    .expect("undo_create: created entry vanished");
                self.created.remove(c);
            }
        }
    }

    /// Records that the element with this key no longer exists in the
    /// posterior state. `elem` must be the value current immediately before
    /// this diff's posterior mutation.
    pub fn delete(&mut self, elem: E) -> DeleteUndo<E> {
        let key = NameKey::from(elem.key());

        if let Ok(c) = Self::search(&self.created, elem.key()) {
            // Created inside this same diff: the entry is trashed, nothing
            // lands in `deleted`.
            let trashed = self.created.remove(c);
            return DeleteUndo {
                key,
                trashed: Some(trashed),
                trashed_index: c,
            };
        }

        match Self::search(&self.deleted, elem.key()) {
            Ok(_) => panic!(
                "invariant violation: key {:?} deleted twice in one diff",
                key
            ),
            Err(d) => self.deleted.insert(d, elem),
        }

        DeleteUndo {
            key,
            trashed: None,
            trashed_index: 0,
        }
    }

    pub fn undo_delete(&mut self, undo: DeleteUndo<E>) {
        match undo.trashed {
            Some(elem) => self.created.insert(undo.trashed_index, elem),
            None => {
                let d = Self::search(&self.deleted, undo.key.as_bytes())
                    .expect("undo_delete: deleted entry vanished");
                self.deleted.remove(d);
            }
        }
    }

    /// Records that the element with this key was replaced. Captures the old
    /// value into `deleted` unless the diff already knows the key: a key
    /// already in `deleted` keeps its earlier (older) capture, and a key in
    /// `created` has no prior state to capture at all.
    pub fn modify(&mut self, old: E) {
        if Self::search(&self.created, old.key()).is_ok() {
            return;
        }
        if let Err(d) = Self::search(&self.deleted, old.key()) {
            self.deleted.insert(d, old);
        }
    }

    /// Answers what the prior state held for `key`.
    pub fn access_previous(&self, key: &[u8]) -> Previous<'_, E> {
        if let Ok(d) = Self::search(&self.deleted, key) {
            return Previous::Found(&self.deleted[d]);
        }
        if Self::search(&self.created, key).is_ok() {
            return Previous::Absent;
        }
        Previous::Unknown
    }

    /// Folds a later diff into this one so the result spans both windows.
    ///
    /// Deleted entries replay first through [`delete`](Self::delete): an
    /// entry created in this diff and deleted in the posterior one was never
    /// visible at either endpoint and is handed to `on_trashed`. Created
    /// entries then land through `create_combined`, so a successor created
    /// under a name this diff saw deleted keeps the old capture alongside
    /// it instead of restoring over it.
    pub fn combine_posterior(&mut self, posterior: Diff<E>, on_trashed: &mut dyn FnMut(E)) {
        for elem in posterior.deleted {
            let undo = self.delete(elem);
            if let Some(trashed) = undo.into_trashed() {
                on_trashed(trashed);
            }
        }
        for elem in posterior.created {
            self.create_combined(elem);
        }
    }

    /// Created-entry replay for [`combine_posterior`](Self::combine_posterior).
    ///
    /// Unlike [`create`](Self::create), a key already captured in `deleted`
    /// is not a restoration here: the posterior window created a successor
    /// under a name this diff saw deleted, and dropping the old capture
    /// would hand the snapshots this diff serves the successor instead of
    /// the original (and lose the original's blocks). Both sides stay;
    /// [`access_previous`](Self::access_previous) answers from `deleted`
    /// first, and [`apply_to_current`](Self::apply_to_current) swaps the
    /// successor back out for the original.
    fn create_combined(&mut self, elem: E) {
        match Self::search(&self.created, elem.key()) {
            Ok(_) => panic!(
                "invariant violation: key {:?} created twice across combined diffs",
                NameKey::from(elem.key())
            ),
            Err(c) => self.created.insert(c, elem),
        }
    }

    /// Produces the prior-state list from a posterior-state list: entries in
    /// `created` are removed, entries in `deleted` are put back at their
    /// sorted positions.
    pub fn apply_to_current(&self, current: &[E]) -> Vec<E> {
        let mut prior: Vec<E> = current
            .iter()
            .filter(|elem| Self::search(&self.created, elem.key()).is_err())
            .cloned()
            .collect();

        for elem in &self.deleted {
            match Self::search(&prior, elem.key()) {
                Ok(_) => panic!(
                    "invariant violation: deleted key {:?} still present in posterior state",
                    NameKey::from(elem.key())
                ),
                Err(at) => prior.insert(at, elem.clone()),
            }
        }

        prior
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Entry {
        name: NameKey,
        value: u32,
    }

    impl Entry {
        fn new(name: &str, value: u32) -> Self {
            Entry {
                name: NameKey::from(name),
                value,
            }
        }
    }

    impl DiffElement for Entry {
        fn key(&self) -> &[u8] {
            self.name.as_bytes()
        }
    }

    fn keys(list: &[Entry]) -> Vec<String> {
        list.iter().map(|e| e.name.to_string()).collect()
    }

    #[test]
    fn create_then_delete_trashes() {
        let mut diff = Diff::new();
        diff.create(Entry::new("tmp", 1));

        let undo = diff.delete(Entry::new("tmp", 1));
        assert_eq!(undo.trashed(), Some(&Entry::new("tmp", 1)));
        assert!(diff.is_empty());
    }

    #[test]
    fn delete_then_create_restores() {
        let mut diff = Diff::new();
        diff.delete(Entry::new("x", 1));

        let undo = diff.create(Entry::new("x", 2));
        assert!(diff.is_empty(), "restoration drops the deleted capture");

        diff.undo_create(undo);
        assert_eq!(keys(diff.deleted()), vec!["x"]);
    }

    #[test]
    fn lists_stay_sorted() {
        let mut diff = Diff::new();
        diff.create(Entry::new("c", 0));
        diff.create(Entry::new("a", 0));
        diff.create(Entry::new("b", 0));

        assert_eq!(keys(diff.created()), vec!["a", "b", "c"]);
    }

    #[test]
    fn undo_create_reverses_exactly() {
        let mut diff = Diff::new();
        let undo = diff.create(Entry::new("n", 9));
        diff.undo_create(undo);
        assert!(diff.is_empty());
    }

    #[test]
    fn undo_delete_reverses_both_branches() {
        let mut diff = Diff::new();

        // Plain delete branch.
        let undo = diff.delete(Entry::new("old", 1));
        diff.undo_delete(undo);
        assert!(diff.is_empty());

        // Trash branch: the created entry must come back at its spot.
        diff.create(Entry::new("a", 1));
        diff.create(Entry::new("m", 2));
        let undo = diff.delete(Entry::new("a", 1));
        diff.undo_delete(undo);
        assert_eq!(keys(diff.created()), vec!["a", "m"]);
    }

    #[test]
    fn modify_captures_oldest_value_once() {
        let mut diff = Diff::new();
        diff.modify(Entry::new("f", 1));
        diff.modify(Entry::new("f", 2));

        assert_eq!(diff.deleted(), &[Entry::new("f", 1)]);
        assert!(diff.created().is_empty());
    }

    #[test]
    fn modify_skips_keys_created_in_this_diff() {
        let mut diff = Diff::new();
        diff.create(Entry::new("new", 1));
        diff.modify(Entry::new("new", 1));

        assert!(diff.deleted().is_empty());
    }

    #[test]
    fn access_previous_is_tri_valued() {
        let mut diff = Diff::new();
        diff.create(Entry::new("made", 1));
        diff.delete(Entry::new("gone", 2));

        assert_eq!(
            diff.access_previous(b"gone"),
            Previous::Found(&Entry::new("gone", 2))
        );
        assert_eq!(diff.access_previous(b"made"), Previous::Absent);
        assert_eq!(diff.access_previous(b"quiet"), Previous::Unknown);
    }

    #[test]
    fn combine_reports_trashed_entries() {
        // Window 1 creates "tmp"; window 2 deletes it. Combined, the entry
        // was never visible at either endpoint.
        let mut first = Diff::new();
        first.create(Entry::new("tmp", 7));
        first.create(Entry::new("keep", 1));

        let mut second = Diff::new();
        second.delete(Entry::new("tmp", 7));
        second.create(Entry::new("later", 2));

        let mut trashed = Vec::new();
        first.combine_posterior(second, &mut |e| trashed.push(e));

        assert_eq!(trashed, vec![Entry::new("tmp", 7)]);
        assert_eq!(keys(first.created()), vec!["keep", "later"]);
        assert!(first.deleted().is_empty());
    }

    #[test]
    fn combine_keeps_both_sides_of_a_replaced_key() {
        // Window 1 deletes the old "f"; window 2 creates a successor under
        // the same name. The combined diff must keep serving the old value
        // to prior-state reads, not the successor.
        let mut first = Diff::new();
        first.delete(Entry::new("f", 1));

        let mut second = Diff::new();
        second.create(Entry::new("f", 2));

        first.combine_posterior(second, &mut |_| panic!("nothing is trashed here"));

        assert_eq!(first.deleted(), &[Entry::new("f", 1)]);
        assert_eq!(first.created(), &[Entry::new("f", 2)]);
        assert_eq!(
            first.access_previous(b"f"),
            Previous::Found(&Entry::new("f", 1))
        );

        // Applying backwards swaps the successor out for the original.
        let prior = first.apply_to_current(&[Entry::new("f", 2)]);
        assert_eq!(prior, vec![Entry::new("f", 1)]);
    }

    #[test]
    fn combine_trashes_before_replaying_creates() {
        // A combined pair diff (old entry deleted, successor created under
        // the same name) folded into an even older window that created the
        // old entry: the old entry trashes and the successor lands, the
        // delete replay running first so the two never collide.
        let mut first = Diff::new();
        first.create(Entry::new("f", 1));

        let mut pair = Diff::new();
        pair.delete(Entry::new("f", 1));
        let mut posterior = Diff::new();
        posterior.create(Entry::new("f", 2));
        pair.combine_posterior(posterior, &mut |_| panic!("nothing is trashed here"));

        let mut trashed = Vec::new();
        first.combine_posterior(pair, &mut |e| trashed.push(e));

        assert_eq!(trashed, vec![Entry::new("f", 1)]);
        assert_eq!(first.created(), &[Entry::new("f", 2)]);
        assert!(first.deleted().is_empty());
    }

    #[test]
    fn combine_carries_unrelated_entries() {
        let mut first = Diff::new();
        first.delete(Entry::new("a", 1));

        let mut second = Diff::new();
        second.delete(Entry::new("b", 2));

        first.combine_posterior(second, &mut |_| panic!("nothing is trashed here"));
        assert_eq!(keys(first.deleted()), vec!["a", "b"]);
    }

    #[test]
    fn apply_to_current_recovers_prior_state() {
        // Prior: [a, b, c]. Posterior: [a, c, d] (b deleted, d created).
        let mut diff = Diff::new();
        diff.delete(Entry::new("b", 2));
        diff.create(Entry::new("d", 4));

        let posterior = vec![
            Entry::new("a", 1),
            Entry::new("c", 3),
            Entry::new("d", 4),
        ];
        let prior = diff.apply_to_current(&posterior);

        assert_eq!(keys(&prior), vec!["a", "b", "c"]);
    }

    #[test]
    #[should_panic(expected = "created twice")]
    fn double_create_panics() {
        let mut diff = Diff::new();
        diff.create(Entry::new("x", 1));
        diff.create(Entry::new("x", 2));
    }

    #[test]
    #[should_panic(expected = "deleted twice")]
    fn double_delete_panics() {
        let mut diff = Diff::new();
        diff.delete(Entry::new("x", 1));
        diff.delete(Entry::new("x", 2));
    }
}
