//! Speculative row updates for moves that are still running in the
//! background.
//!
//! A consumer shows moved rows at their expected location right away. The
//! [`OptimisticTransactionManager`] remembers what each row looked like
//! before, so the authoritative result can either confirm the guess,
//! correct it (the worker renamed around a collision), or roll it back.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use asset_index_core::AssetRow;
use asset_index_core::util::{normalize_rel, relative_to};

/// The consumer's in-memory row list with a `rel` lookup.
#[derive(Debug, Default, Clone)]
pub struct AssetRowList {
    rows: Vec<AssetRow>,
    index: HashMap<String, usize>,
}

impl AssetRowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the rows of `chunk` whose `rel` is not already listed.
    ///
    /// Returns the number of rows appended.
    pub fn append_chunk(&mut self, chunk: impl IntoIterator<Item = AssetRow>) -> usize {
        let mut appended = 0;
        for row in chunk {
            if row.rel.is_empty() || self.index.contains_key(&row.rel) {
                continue;
            }
            self.index.insert(row.rel.clone(), self.rows.len());
            self.rows.push(row);
            appended += 1;
        }
        appended
    }

    pub fn get(&self, idx: usize) -> Option<&AssetRow> {
        self.rows.get(idx)
    }

    pub fn index_of(&self, rel: &str) -> Option<usize> {
        self.index.get(rel).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[AssetRow] {
        &self.rows
    }

    /// Remove a row by `rel`. Rows after it shift down by one.
    pub fn remove(&mut self, rel: &str) -> Option<AssetRow> {
        let idx = self.index.remove(rel)?;
        let row = self.rows.remove(idx);
        for (later, row) in self.rows.iter().enumerate().skip(idx) {
            self.index.insert(row.rel.clone(), later);
        }
        Some(row)
    }

    /// Replace the row at `idx`, re-keying the lookup if `rel` changed.
    fn replace(&mut self, idx: usize, row: AssetRow) {
        let old_rel = std::mem::take(&mut self.rows[idx].rel);
        self.index.remove(&old_rel);
        self.index.insert(row.rel.clone(), idx);
        self.rows[idx] = row;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStatus {
    Pending,
    Confirmed,
    Rejected,
}

/// Rows touched by reconciling moves, for targeted refresh.
///
/// Removals are applied after every other change: `removed` indexes the list
/// as it was before the call, `changed` indexes it after the removals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowChanges {
    pub removed: BTreeSet<usize>,
    pub changed: BTreeSet<usize>,
}

impl RowChanges {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.changed.is_empty()
    }
}

/// One speculative move and the row it replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMove {
    /// Where the row is listed now: the proposed rel while pending, the
    /// authoritative rel once confirmed, the original rel once rejected.
    pub rel: String,
    pub original: AssetRow,
    pub proposed: AssetRow,
    pub status: MoveStatus,
    /// The row is moving out of the current album view and is only kept
    /// as a placeholder until the move is confirmed.
    pub leaves_view: bool,
}

/// Tracks speculative moves applied to an [`AssetRowList`].
#[derive(Debug)]
pub struct OptimisticTransactionManager {
    view_root: PathBuf,
    moves: Vec<PendingMove>,
}

impl OptimisticTransactionManager {
    /// `view_root` is the index root the listed rels are relative to.
    pub fn new(view_root: impl Into<PathBuf>) -> Self {
        Self {
            view_root: view_root.into(),
            moves: Vec::new(),
        }
    }

    pub fn view_root(&self) -> &Path {
        &self.view_root
    }

    /// Show each row of `rels` at its expected place inside `destination`.
    ///
    /// From the main library view moved rows stay visible with their new
    /// rel. From an album view they are leaving the album, so they stay as
    /// placeholders until confirmed. Returns the indices of changed rows.
    pub fn update_rows_for_move<S: AsRef<str>>(
        &mut self,
        list: &mut AssetRowList,
        rels: &[S],
        destination: &Path,
        is_source_main_view: bool,
    ) -> BTreeSet<usize> {
        let mut changed = BTreeSet::new();
        for rel in rels {
            let rel = normalize_rel(rel.as_ref());
            if self.is_pending(&rel) {
                log::warn!("Skipping move of {}: an earlier move is still pending", rel);
                continue;
            }
            let Some(idx) = list.index_of(&rel) else {
                log::trace!("Move of {} ignored: row not listed", rel);
                continue;
            };
            let Some(file_name) = Path::new(&rel).file_name() else {
                continue;
            };
            let proposed_abs = destination.join(file_name);
            let Some(proposed_rel) = relative_to(&proposed_abs, &self.view_root) else {
                log::warn!(
                    "Skipping move of {}: {} is outside the index root",
                    rel,
                    destination.display()
                );
                continue;
            };
            if proposed_rel == rel {
                continue;
            }
            if list.index_of(&proposed_rel).is_some() || self.is_pending(&proposed_rel) {
                log::warn!(
                    "Skipping move of {}: {} is already taken",
                    rel,
                    proposed_rel
                );
                continue;
            }

            let original = list.rows[idx].clone();
            let proposed = self.relocated(&original, &proposed_rel);
            list.replace(idx, proposed.clone());
            changed.insert(idx);
            self.moves.push(PendingMove {
                rel: proposed_rel,
                original,
                proposed,
                status: MoveStatus::Pending,
                leaves_view: !is_source_main_view,
            });
        }
        changed
    }

    /// Reconcile pending moves with the `(old_abs, new_abs)` pairs a
    /// finished background move reports.
    ///
    /// Matching guesses are confirmed silently. Diverging ones are corrected
    /// to the authoritative path. Rows that left an album view are removed
    /// once confirmed, as is any row whose file landed on a path that is
    /// already listed.
    pub fn finalise_move_results(
        &mut self,
        list: &mut AssetRowList,
        moves: &[(PathBuf, PathBuf)],
    ) -> RowChanges {
        let mut changed_rels = Vec::new();
        let mut dropped_rels = Vec::new();

        for (old_abs, new_abs) in moves {
            let (Some(old_rel), Some(new_rel)) = (
                relative_to(old_abs, &self.view_root),
                relative_to(new_abs, &self.view_root),
            ) else {
                log::warn!(
                    "Move result {} -> {} is outside the index root",
                    old_abs.display(),
                    new_abs.display()
                );
                continue;
            };

            let Some(pos) = self.pending_position(&old_rel) else {
                // Not speculated on; a listed row still follows the disk.
                let Some(idx) = list.index_of(&old_rel) else {
                    continue;
                };
                if new_rel == old_rel {
                    continue;
                }
                if list.index_of(&new_rel).is_some() {
                    log::warn!(
                        "Move of {} landed on {}, which is already listed; dropping the stale row",
                        old_rel,
                        new_rel
                    );
                    dropped_rels.push(old_rel);
                } else if self.is_pending(&new_rel) {
                    log::warn!(
                        "Move of {} landed on {}, which a pending move vacated; leaving it listed",
                        old_rel,
                        new_rel
                    );
                } else {
                    let row = self.relocated(&list.rows[idx], &new_rel);
                    list.replace(idx, row);
                    changed_rels.push(new_rel);
                }
                continue;
            };

            self.moves[pos].status = MoveStatus::Confirmed;
            let taken = list.index_of(&new_rel).is_some() || self.is_pending(&new_rel);
            let pending = &mut self.moves[pos];
            if pending.proposed.rel != new_rel {
                log::info!(
                    "Move of {} landed at {} instead of {}",
                    old_rel,
                    new_rel,
                    pending.proposed.rel
                );
                let corrected = relocate(&self.view_root, &pending.original, &new_rel);
                if taken {
                    log::warn!(
                        "Move of {} landed on {}, which is already listed; dropping the placeholder",
                        old_rel,
                        new_rel
                    );
                    dropped_rels.push(pending.rel.clone());
                    pending.proposed = corrected;
                    pending.rel = new_rel;
                    continue;
                }
                if let Some(idx) = list.index_of(&pending.rel) {
                    list.replace(idx, corrected.clone());
                    changed_rels.push(new_rel.clone());
                }
                pending.proposed = corrected;
                pending.rel = new_rel.clone();
            }
            if pending.leaves_view {
                dropped_rels.push(new_rel);
            }
        }

        let removed = dropped_rels
            .iter()
            .filter_map(|rel| list.index_of(rel))
            .collect();
        for rel in &dropped_rels {
            list.remove(rel);
        }
        RowChanges {
            removed,
            changed: changed_rels
                .iter()
                .filter_map(|rel| list.index_of(rel))
                .collect(),
        }
    }

    /// Restore every still-pending row to its pre-move state, newest move
    /// first.
    ///
    /// A placeholder whose original rel has meanwhile been listed again (a
    /// fresh read of the unmoved file) is dropped instead, so rels stay
    /// unique.
    pub fn rollback_pending_moves(&mut self, list: &mut AssetRowList) -> RowChanges {
        let mut restored_rels = Vec::new();
        let mut dropped_rels = Vec::new();
        for pending in self
            .moves
            .iter_mut()
            .rev()
            .filter(|m| m.status == MoveStatus::Pending)
        {
            if let Some(idx) = list.index_of(&pending.rel) {
                match list.index_of(&pending.original.rel) {
                    Some(other) if other != idx => {
                        log::warn!(
                            "{} is listed again; dropping the placeholder at {}",
                            pending.original.rel,
                            pending.rel
                        );
                        dropped_rels.push(pending.rel.clone());
                    }
                    _ => {
                        list.replace(idx, pending.original.clone());
                        restored_rels.push(pending.original.rel.clone());
                    }
                }
            }
            pending.status = MoveStatus::Rejected;
            pending.rel = pending.original.rel.clone();
        }

        let removed = dropped_rels
            .iter()
            .filter_map(|rel| list.index_of(rel))
            .collect();
        for rel in &dropped_rels {
            list.remove(rel);
        }
        let changes = RowChanges {
            removed,
            changed: restored_rels
                .iter()
                .filter_map(|rel| list.index_of(rel))
                .collect(),
        };
        if !changes.is_empty() {
            log::debug!(
                "Rolled back pending moves: {} restored, {} dropped",
                changes.changed.len(),
                changes.removed.len()
            );
        }
        changes
    }

    /// True while any move is awaiting its authoritative result.
    pub fn has_pending_move_placeholders(&self) -> bool {
        self.moves.iter().any(|m| m.status == MoveStatus::Pending)
    }

    pub fn pending_moves(&self) -> impl Iterator<Item = &PendingMove> {
        self.moves.iter().filter(|m| m.status == MoveStatus::Pending)
    }

    /// Confirmed `(old_rel, new_rel)` pairs, ready for the repository.
    pub fn confirmed_moves(&self) -> Vec<(String, String)> {
        self.moves
            .iter()
            .filter(|m| m.status == MoveStatus::Confirmed)
            .map(|m| (m.original.rel.clone(), m.rel.clone()))
            .collect()
    }

    /// Forget confirmed and rejected moves.
    pub fn clear_settled(&mut self) {
        self.moves.retain(|m| m.status == MoveStatus::Pending);
    }

    fn is_pending(&self, rel: &str) -> bool {
        self.moves
            .iter()
            .any(|m| m.status == MoveStatus::Pending && (m.rel == rel || m.original.rel == rel))
    }

    fn pending_position(&self, original_rel: &str) -> Option<usize> {
        self.moves
            .iter()
            .position(|m| m.status == MoveStatus::Pending && m.original.rel == original_rel)
    }

    fn relocated(&self, row: &AssetRow, new_rel: &str) -> AssetRow {
        relocate(&self.view_root, row, new_rel)
    }
}

/// Copy of `row` living at `new_rel`; the id follows the rel when it was
/// derived from it.
fn relocate(root: &Path, row: &AssetRow, new_rel: &str) -> AssetRow {
    let mut moved = row.clone();
    if moved.id.is_empty() || moved.id == moved.rel {
        moved.id = new_rel.to_string();
    }
    moved.rel = new_rel.to_string();
    moved.abs = Some(root.join(new_rel));
    moved
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/library";

    fn list_of(rels: &[&str]) -> AssetRowList {
        let mut list = AssetRowList::new();
        list.append_chunk(rels.iter().map(|rel| {
            let mut row = AssetRow::new(*rel).with_ts_secs(1);
            row.abs = Some(Path::new(ROOT).join(rel));
            row
        }));
        list
    }

    fn abs(rel: &str) -> PathBuf {
        Path::new(ROOT).join(rel)
    }

    fn rels(list: &AssetRowList) -> Vec<&str> {
        list.rows().iter().map(|row| row.rel.as_str()).collect()
    }

    /// Every row is reachable through its own rel, and only through it.
    fn assert_index_consistent(list: &AssetRowList) {
        for (idx, row) in list.rows().iter().enumerate() {
            assert_eq!(list.index_of(&row.rel), Some(idx), "{}", row.rel);
        }
        let unique: BTreeSet<&str> = rels(list).into_iter().collect();
        assert_eq!(unique.len(), list.len());
    }

    #[test]
    fn test_row_list_lookup_and_remove() {
        let mut list = list_of(&["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(list.append_chunk(vec![AssetRow::new("b.jpg"), AssetRow::new("")]), 0);
        assert_eq!(list.len(), 3);

        let removed = list.remove("a.jpg").unwrap();
        assert_eq!(removed.rel, "a.jpg");
        assert_eq!(list.index_of("b.jpg"), Some(0));
        assert_eq!(list.index_of("c.jpg"), Some(1));
        assert_eq!(list.index_of("a.jpg"), None);
        assert!(list.remove("a.jpg").is_none());
    }

    #[test]
    fn test_update_rows_for_move_is_immediate() {
        let mut list = list_of(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);

        let changed = otm.update_rows_for_move(&mut list, &["a.jpg", "c.jpg"], &abs("Trips"), true);
        assert_eq!(changed, BTreeSet::from([0, 2]));
        assert_eq!(list.get(0).unwrap().rel, "Trips/a.jpg");
        assert_eq!(list.get(0).unwrap().id, "Trips/a.jpg");
        assert_eq!(list.get(0).unwrap().abs, Some(abs("Trips/a.jpg")));
        assert_eq!(list.index_of("Trips/c.jpg"), Some(2));
        assert!(otm.has_pending_move_placeholders());
        assert_eq!(otm.pending_moves().count(), 2);
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let mut list = list_of(&["a.jpg", "b.jpg", "Trips/c.jpg"]);
        let before = list.rows().to_vec();
        let mut otm = OptimisticTransactionManager::new(ROOT);

        otm.update_rows_for_move(&mut list, &["a.jpg", "Trips/c.jpg"], &abs("Archive"), true);
        assert_ne!(list.rows(), before.as_slice());

        let restored = otm.rollback_pending_moves(&mut list);
        assert_eq!(restored.changed, BTreeSet::from([0, 2]));
        assert!(restored.removed.is_empty());
        assert_eq!(list.rows(), before.as_slice());
        assert_eq!(list.index_of("a.jpg"), Some(0));
        assert!(!otm.has_pending_move_placeholders());
        assert!(otm.confirmed_moves().is_empty());
    }

    #[test]
    fn test_finalise_matching_guess_confirms() {
        let mut list = list_of(&["a.jpg", "b.jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);
        otm.update_rows_for_move(&mut list, &["a.jpg"], &abs("Trips"), true);
        let speculative = list.rows().to_vec();

        let changed = otm.finalise_move_results(&mut list, &[(abs("a.jpg"), abs("Trips/a.jpg"))]);
        assert!(changed.is_empty());
        assert_eq!(list.rows(), speculative.as_slice());
        assert!(!otm.has_pending_move_placeholders());
        assert_eq!(
            otm.confirmed_moves(),
            vec![("a.jpg".to_string(), "Trips/a.jpg".to_string())]
        );
    }

    #[test]
    fn test_finalise_corrects_diverging_result() {
        let mut list = list_of(&["a.jpg", "b.jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);
        otm.update_rows_for_move(&mut list, &["a.jpg"], &abs("Trips"), true);

        // The worker renamed around a collision.
        let changes =
            otm.finalise_move_results(&mut list, &[(abs("a.jpg"), abs("Trips/a (1).jpg"))]);
        assert_eq!(changes.changed, BTreeSet::from([0]));
        assert!(changes.removed.is_empty());
        assert_eq!(list.get(0).unwrap().rel, "Trips/a (1).jpg");
        assert_eq!(list.index_of("Trips/a.jpg"), None);
        assert_eq!(
            otm.confirmed_moves(),
            vec![("a.jpg".to_string(), "Trips/a (1).jpg".to_string())]
        );
    }

    #[test]
    fn test_album_view_drops_confirmed_rows() {
        let mut list = list_of(&["Trips/a.jpg", "Trips/b.jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);

        let changed = otm.update_rows_for_move(&mut list, &["Trips/a.jpg"], &abs("Archive"), false);
        assert_eq!(changed, BTreeSet::from([0]));
        // Placeholder stays listed until the move is confirmed.
        assert_eq!(list.len(), 2);

        let changes =
            otm.finalise_move_results(&mut list, &[(abs("Trips/a.jpg"), abs("Archive/a.jpg"))]);
        assert_eq!(changes.removed, BTreeSet::from([0]));
        assert!(changes.changed.is_empty());
        assert_eq!(list.len(), 1);
        assert_eq!(list.index_of("Trips/b.jpg"), Some(0));
        assert_index_consistent(&list);
    }

    #[test]
    fn test_pending_rows_cannot_move_again() {
        let mut list = list_of(&["a.jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);
        otm.update_rows_for_move(&mut list, &["a.jpg"], &abs("Trips"), true);

        let again = otm.update_rows_for_move(&mut list, &["Trips/a.jpg"], &abs("Other"), true);
        assert!(again.is_empty());
        assert_eq!(otm.pending_moves().count(), 1);
    }

    #[test]
    fn test_unknown_and_outside_rows_are_ignored() {
        let mut list = list_of(&["a.jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);
        let changed = otm.update_rows_for_move(&mut list, &["missing.jpg"], &abs("Trips"), true);
        assert!(changed.is_empty());
        let changed = otm.update_rows_for_move(&mut list, &["a.jpg"], Path::new("/elsewhere"), true);
        assert!(changed.is_empty());
        assert!(!otm.has_pending_move_placeholders());
    }

    #[test]
    fn test_unspeculated_result_still_updates_row() {
        let mut list = list_of(&["a.jpg", "b.jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);
        let changes = otm.finalise_move_results(&mut list, &[(abs("b.jpg"), abs("Trips/b.jpg"))]);
        assert_eq!(changes.changed, BTreeSet::from([1]));
        assert_eq!(list.get(1).unwrap().rel, "Trips/b.jpg");
    }

    #[test]
    fn test_overlapping_moves_roll_back_to_snapshot() {
        let mut list = list_of(&["a.jpg", "x/a.jpg"]);
        let before = list.rows().to_vec();
        let mut otm = OptimisticTransactionManager::new(ROOT);

        otm.update_rows_for_move(&mut list, &["a.jpg"], &abs("Trips"), true);
        // a.jpg is vacated but still belongs to the pending move.
        let second = otm.update_rows_for_move(&mut list, &["x/a.jpg"], Path::new(ROOT), true);
        assert!(second.is_empty());
        assert_eq!(otm.pending_moves().count(), 1);

        otm.rollback_pending_moves(&mut list);
        assert_eq!(list.rows(), before.as_slice());
        assert_index_consistent(&list);
    }

    #[test]
    fn test_rollback_of_chained_moves_runs_newest_first() {
        let mut list = list_of(&["a.jpg", "b.jpg"]);
        let before = list.rows().to_vec();
        let mut otm = OptimisticTransactionManager::new(ROOT);

        otm.update_rows_for_move(&mut list, &["a.jpg"], &abs("Trips"), true);
        otm.update_rows_for_move(&mut list, &["b.jpg"], &abs("Other"), true);
        otm.finalise_move_results(&mut list, &[(abs("b.jpg"), abs("Other/b.jpg"))]);
        otm.update_rows_for_move(&mut list, &["Other/b.jpg"], &abs("Trips"), true);
        assert_eq!(rels(&list), vec!["Trips/a.jpg", "Trips/b.jpg"]);

        let restored = otm.rollback_pending_moves(&mut list);
        assert_eq!(restored.changed, BTreeSet::from([0, 1]));
        assert_eq!(rels(&list), vec!["a.jpg", "Other/b.jpg"]);
        assert_eq!(list.get(0), before.first());
        assert_index_consistent(&list);
    }

    #[test]
    fn test_unspeculated_result_onto_listed_rel_drops_stale_row() {
        let mut list = list_of(&["a.jpg", "Trips/a.jpg", "b.jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);

        let changes =
            otm.finalise_move_results(&mut list, &[(abs("a.jpg"), abs("Trips/a.jpg"))]);
        assert_eq!(changes.removed, BTreeSet::from([0]));
        assert!(changes.changed.is_empty());
        assert_eq!(rels(&list), vec!["Trips/a.jpg", "b.jpg"]);
        assert_index_consistent(&list);
    }

    #[test]
    fn test_diverging_result_onto_listed_rel_drops_placeholder() {
        let mut list = list_of(&["a.jpg", "Trips/a (1).jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);
        otm.update_rows_for_move(&mut list, &["a.jpg"], &abs("Trips"), true);

        let changes =
            otm.finalise_move_results(&mut list, &[(abs("a.jpg"), abs("Trips/a (1).jpg"))]);
        assert_eq!(changes.removed, BTreeSet::from([0]));
        assert_eq!(rels(&list), vec!["Trips/a (1).jpg"]);
        assert_index_consistent(&list);
        assert_eq!(
            otm.confirmed_moves(),
            vec![("a.jpg".to_string(), "Trips/a (1).jpg".to_string())]
        );
    }

    #[test]
    fn test_rollback_drops_placeholder_when_original_is_relisted() {
        let mut list = list_of(&["a.jpg", "b.jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);
        otm.update_rows_for_move(&mut list, &["a.jpg"], &abs("Trips"), true);

        // A fresh page still has the unmoved file.
        list.append_chunk(list_of(&["a.jpg"]).rows().to_vec());
        assert_eq!(rels(&list), vec!["Trips/a.jpg", "b.jpg", "a.jpg"]);

        let changes = otm.rollback_pending_moves(&mut list);
        assert_eq!(changes.removed, BTreeSet::from([0]));
        assert!(changes.changed.is_empty());
        assert_eq!(rels(&list), vec!["b.jpg", "a.jpg"]);
        assert_index_consistent(&list);
        assert!(!otm.has_pending_move_placeholders());
    }

    #[test]
    fn test_clear_settled_keeps_pending() {
        let mut list = list_of(&["a.jpg", "b.jpg"]);
        let mut otm = OptimisticTransactionManager::new(ROOT);
        otm.update_rows_for_move(&mut list, &["a.jpg", "b.jpg"], &abs("Trips"), true);
        otm.finalise_move_results(&mut list, &[(abs("a.jpg"), abs("Trips/a.jpg"))]);

        otm.clear_settled();
        assert!(otm.confirmed_moves().is_empty());
        assert_eq!(otm.pending_moves().count(), 1);
    }
}
