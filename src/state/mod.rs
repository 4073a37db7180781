//! state
//!
//! Six-way file-state classification.
//!
//! # Design
//!
//! For every project path the classifier materializes a [`PathRecord`]:
//! existence and blob hash on each side, the hash each tree's HEAD
//! records for the path, and (when needed) whether either side's content
//! appears in the other side's path history. [`classify`] is a pure
//! function of that record, so the whole decision table is unit-testable
//! without a repository.
//!
//! The decision table, first match wins:
//!
//! 1. absent on both sides → no row
//! 2. Production only → `Deleted`
//! 3. Work only → `Modified` (new local file)
//! 4. equal content hashes → `Same`
//! 5. Work clean, Production dirty vs its HEAD → `Updated`
//! 6. Work dirty, Production clean → `Modified`
//! 7. both dirty → `Conflicted`
//! 8. both clean yet diverged → path history breaks the tie
//!
//! Content-hash equality dominates rows 5-7 so converging edits never
//! report a conflict. Row 8 covers trees that committed independently:
//! when both sides match their own HEAD but not each other, the HEADs
//! alone cannot say which side moved. If Production's content is an old
//! local state the change is ours (`Modified`, the save-then-upload
//! flow); if Work's content is an old Production state the change is
//! theirs (`Updated`, a peer uploaded); if neither history contains the
//! other the trees truly diverged (`Conflicted`).
//!
//! `Pending` is never produced here; it is the refresh scheduler's
//! placeholder.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::cache::TrackedCache;
use crate::core::types::{FileState, Oid};
use crate::git::{GitError, GitTree};

/// How many commits the row-8 tiebreak will walk per tree.
const HISTORY_LIMIT: usize = 500;

/// Everything known about one path across both trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathRecord {
    pub exists_work: bool,
    pub exists_prod: bool,
    /// Blob hash of the Work copy, `None` when absent or a directory.
    pub hash_work: Option<Oid>,
    /// Blob hash of the Production copy.
    pub hash_prod: Option<Oid>,
    /// Hash recorded for the path in Work HEAD.
    pub hash_work_head: Option<Oid>,
    /// Hash recorded for the path in Production HEAD.
    pub hash_prod_head: Option<Oid>,
    /// Production's current content appears in Work's path history.
    /// Only populated when the row-8 tiebreak needs it.
    pub prod_seen_in_work: bool,
    /// Work's current content appears in Production's path history.
    pub work_seen_in_prod: bool,
}

impl PathRecord {
    /// Whether deriving a state for this record requires the history
    /// tiebreak fields.
    fn needs_tiebreak(&self) -> bool {
        self.exists_work
            && self.exists_prod
            && self.hash_work != self.hash_prod
            && self.hash_work == self.hash_work_head
            && self.hash_prod == self.hash_prod_head
    }
}

/// Derive the state for a record. `None` means the path exists on
/// neither side and no row should be emitted.
pub fn classify(r: &PathRecord) -> Option<FileState> {
    match (r.exists_work, r.exists_prod) {
        (false, false) => None,
        (false, true) => Some(FileState::Deleted),
        (true, false) => Some(FileState::Modified),
        (true, true) => {
            if r.hash_work == r.hash_prod {
                return Some(FileState::Same);
            }
            let work_clean = r.hash_work == r.hash_work_head;
            let prod_clean = r.hash_prod == r.hash_prod_head;
            Some(match (work_clean, prod_clean) {
                (true, false) => FileState::Updated,
                (false, true) => FileState::Modified,
                (false, false) => FileState::Conflicted,
                (true, true) => {
                    if r.prod_seen_in_work {
                        FileState::Modified
                    } else if r.work_seen_in_prod {
                        FileState::Updated
                    } else {
                        FileState::Conflicted
                    }
                }
            })
        }
    }
}

/// Materializes [`PathRecord`]s from the two trees, with the HEAD
/// tracked sets served through the tracked cache.
pub struct Recorder<'a> {
    work: &'a GitTree,
    prod: &'a GitTree,
    tracked: &'a TrackedCache,
}

impl<'a> Recorder<'a> {
    pub fn new(work: &'a GitTree, prod: &'a GitTree, tracked: &'a TrackedCache) -> Self {
        Self {
            work,
            prod,
            tracked,
        }
    }

    /// Build the record for one relative path.
    pub fn record(&self, rel: &str) -> Result<PathRecord, GitError> {
        let work_head = self.tracked_map(self.work)?;
        let prod_head = self.tracked_map(self.prod)?;
        let mut record = PathRecord {
            exists_work: self.work.root().join(rel).exists(),
            exists_prod: self.prod.root().join(rel).exists(),
            hash_work: self.work.hash_file(rel)?,
            hash_prod: self.prod.hash_file(rel)?,
            hash_work_head: work_head.get(rel).cloned(),
            hash_prod_head: prod_head.get(rel).cloned(),
            prod_seen_in_work: false,
            work_seen_in_prod: false,
        };
        if record.needs_tiebreak() {
            let work_blobs = self.work.blob_history(rel, HISTORY_LIMIT)?;
            let prod_blobs = self.prod.blob_history(rel, HISTORY_LIMIT)?;
            record.prod_seen_in_work = record
                .hash_prod
                .as_ref()
                .is_some_and(|h| work_blobs.contains(h));
            record.work_seen_in_prod = record
                .hash_work
                .as_ref()
                .is_some_and(|h| prod_blobs.contains(h));
        }
        Ok(record)
    }

    /// Record and classify in one step.
    pub fn classify_path(&self, rel: &str) -> Result<Option<FileState>, GitError> {
        Ok(classify(&self.record(rel)?))
    }

    fn tracked_map(&self, tree: &GitTree) -> Result<Arc<HashMap<String, Oid>>, GitError> {
        match tree.head_oid()? {
            None => Ok(Arc::new(HashMap::new())),
            Some(head) => {
                if let Some(map) = self.tracked.get(tree.root(), &head) {
                    return Ok(map);
                }
                let map = tree.tracked_at_head()?;
                Ok(self.tracked.set(tree.root(), &head, map))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> Option<Oid> {
        Some(Oid::new(format!("{:040x}", n)).unwrap())
    }

    fn record(
        hash_work: Option<Oid>,
        hash_prod: Option<Oid>,
        hash_work_head: Option<Oid>,
        hash_prod_head: Option<Oid>,
    ) -> PathRecord {
        PathRecord {
            exists_work: hash_work.is_some(),
            exists_prod: hash_prod.is_some(),
            hash_work,
            hash_prod,
            hash_work_head,
            hash_prod_head,
            prod_seen_in_work: false,
            work_seen_in_prod: false,
        }
    }

    #[test]
    fn absent_on_both_sides_emits_nothing() {
        assert_eq!(classify(&PathRecord::default()), None);
    }

    #[test]
    fn production_only_is_deleted() {
        let r = record(None, oid(1), None, oid(1));
        assert_eq!(classify(&r), Some(FileState::Deleted));
    }

    #[test]
    fn work_only_is_modified() {
        let r = record(oid(1), None, None, None);
        assert_eq!(classify(&r), Some(FileState::Modified));
    }

    #[test]
    fn equal_hashes_are_same() {
        let r = record(oid(1), oid(1), oid(2), oid(3));
        assert_eq!(classify(&r), Some(FileState::Same));
    }

    #[test]
    fn equal_hashes_dominate_dirty_heads() {
        // Both sides dirty against HEAD but convergent: never a conflict.
        let r = record(oid(1), oid(1), oid(9), oid(8));
        assert_eq!(classify(&r), Some(FileState::Same));
    }

    #[test]
    fn uncommitted_remote_change_is_updated() {
        let r = record(oid(1), oid(2), oid(1), oid(3));
        assert_eq!(classify(&r), Some(FileState::Updated));
    }

    #[test]
    fn local_only_change_is_modified() {
        let r = record(oid(2), oid(1), oid(1), oid(1));
        assert_eq!(classify(&r), Some(FileState::Modified));
    }

    #[test]
    fn double_sided_change_is_conflicted() {
        let r = record(oid(2), oid(3), oid(1), oid(1));
        assert_eq!(classify(&r), Some(FileState::Conflicted));
    }

    #[test]
    fn committed_remote_change_is_updated() {
        // Both trees clean, content diverged, and our content is an old
        // production state: a peer uploaded.
        let mut r = record(oid(1), oid(2), oid(1), oid(2));
        r.work_seen_in_prod = true;
        assert_eq!(classify(&r), Some(FileState::Updated));
    }

    #[test]
    fn committed_local_change_is_modified() {
        // Production still holds an old local state: a saved local edit.
        let mut r = record(oid(2), oid(1), oid(2), oid(1));
        r.prod_seen_in_work = true;
        assert_eq!(classify(&r), Some(FileState::Modified));
    }

    #[test]
    fn committed_divergence_on_both_sides_is_conflicted() {
        let r = record(oid(2), oid(3), oid(2), oid(3));
        assert_eq!(classify(&r), Some(FileState::Conflicted));
    }

    #[test]
    fn old_local_state_wins_over_old_remote_state() {
        // Mutual reverts can make both histories contain the other side;
        // the local reading is preferred so nothing is overwritten.
        let mut r = record(oid(2), oid(1), oid(2), oid(1));
        r.prod_seen_in_work = true;
        r.work_seen_in_prod = true;
        assert_eq!(classify(&r), Some(FileState::Modified));
    }

    #[test]
    fn directories_on_both_sides_are_same() {
        let r = PathRecord {
            exists_work: true,
            exists_prod: true,
            ..PathRecord::default()
        };
        assert_eq!(classify(&r), Some(FileState::Same));
    }
}
