//! The canonical ordering of the index.
//!
//! Every ordered read in the system (SQL pages, the k-way merge, tests)
//! agrees on one comparator: rows are ordered by [`SortKey`] *descending*,
//! so the newest row comes first and rows without a timestamp come last.
//! Ties on the timestamp are broken by `id`, then by `rel`, both descending.
//! `rel` is unique, so no two rows ever share a key.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// `(timestamp, id, rel)` triple that totally orders rows.
///
/// `ts` is the normalized capture time in epoch microseconds. `None` compares
/// below every timestamp, so in newest-first order it sorts last and
/// pagination never stalls on rows with a missing or unparseable `dt`.
///
/// A key with an empty `rel` sorts before every row sharing its `ts` and
/// `id`, so as a cursor it resumes after all of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SortKey {
    pub ts: Option<i64>,
    pub id: String,
    #[serde(default)]
    pub rel: String,
}

/// Opaque pagination token: the sort key of the last row returned.
///
/// Re-querying with a cursor resumes strictly after that row.
pub type Cursor = SortKey;

impl SortKey {
    pub fn new(ts: Option<i64>, id: impl Into<String>) -> Self {
        Self {
            ts,
            id: id.into(),
            rel: String::new(),
        }
    }

    pub fn with_rel(mut self, rel: impl Into<String>) -> Self {
        self.rel = rel.into();
        self
    }

    /// Compare two keys in delivery order (newest first).
    ///
    /// `Ordering::Less` means `self` is delivered before `other`.
    pub fn cmp_newest_first(&self, other: &Self) -> Ordering {
        other.cmp(self)
    }

    /// True if a row with this key belongs strictly after `cursor` in
    /// newest-first order.
    pub fn is_after(&self, cursor: &Cursor) -> bool {
        self < cursor
    }
}
