//! K-way merge of newest-first paged sources.
//!
//! Each source keeps a small read-ahead buffer (the rest of its last page)
//! and contributes its next row to a binary heap. Popping the heap yields
//! the globally newest row; memory stays bounded by
//! `sources × page_size` however large the indexes are.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use asset_index_core::{AssetRow, Cursor, PagedSource, SortKey};

/// Rows fetched per source page when none is configured.
pub const DEFAULT_PAGE_SIZE: usize = 128;

struct MergeEntry {
    key: SortKey,
    source: usize,
    row: AssetRow,
}

impl MergeEntry {
    fn new(row: AssetRow, source: usize) -> Self {
        Self {
            key: row.sort_key(),
            source,
            row,
        }
    }
}

// Max-heap order: newest key first, then the lower source index.
impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

struct SourceState<S> {
    source: S,
    buffer: VecDeque<AssetRow>,
    cursor: Option<Cursor>,
    exhausted: bool,
    /// The source has not yet contributed a row to the heap.
    needs_head: bool,
}

impl<S> SourceState<S> {
    fn is_drained(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }
}

/// Merges several [`PagedSource`]s into one newest-first stream.
///
/// Construction does no I/O; the first [`fetch_next_batch`](Self::fetch_next_batch)
/// primes the heap with one row per source.
pub struct StreamMerger<S: PagedSource> {
    sources: Vec<SourceState<S>>,
    heap: BinaryHeap<MergeEntry>,
    page_size: usize,
    /// Rows popped by a batch that then failed; returned first next time.
    carry: Vec<AssetRow>,
}

impl<S: PagedSource> StreamMerger<S> {
    pub fn new(sources: Vec<S>, page_size: usize) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| SourceState {
                source,
                buffer: VecDeque::new(),
                cursor: None,
                exhausted: false,
                needs_head: true,
            })
            .collect();
        Self {
            sources,
            heap: BinaryHeap::new(),
            page_size: page_size.max(1),
            carry: Vec::new(),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Rows held in memory: heap entries plus read-ahead buffers.
    pub fn buffered_len(&self) -> usize {
        self.heap.len()
            + self.carry.len()
            + self.sources.iter().map(|s| s.buffer.len()).sum::<usize>()
    }

    /// True while any row is buffered or any source may still produce one.
    pub fn has_more(&self) -> bool {
        !self.heap.is_empty()
            || !self.carry.is_empty()
            || self.sources.iter().any(|s| !s.is_drained())
    }

    /// Pop up to `n` rows in global newest-first order.
    ///
    /// The batch is only shorter than `n` when every source is drained.
    /// A source error is returned as-is; rows already popped for the failed
    /// batch are kept and delivered first by the next call.
    pub fn fetch_next_batch(&mut self, n: usize) -> Result<Vec<AssetRow>, S::Error> {
        let mut batch = std::mem::take(&mut self.carry);
        while batch.len() < n {
            match self.next_row() {
                Ok(Some(row)) => batch.push(row),
                Ok(None) => break,
                Err(e) => {
                    self.carry = batch;
                    return Err(e);
                }
            }
        }
        Ok(batch)
    }

    fn next_row(&mut self) -> Result<Option<AssetRow>, S::Error> {
        self.ensure_heads()?;
        let Some(source) = self.heap.peek().map(|top| top.source) else {
            return Ok(None);
        };
        // Refill before popping so a failed fetch leaves the heap intact.
        self.push_next(source)?;
        Ok(self.heap.pop().map(|entry| entry.row))
    }

    /// Give every source without a heap entry a chance to contribute one.
    ///
    /// Covers the initial priming and, if the heap ever runs dry, pulls one
    /// more row from each source that is not yet drained.
    fn ensure_heads(&mut self) -> Result<(), S::Error> {
        let heap_empty = self.heap.is_empty();
        for idx in 0..self.sources.len() {
            let state = &self.sources[idx];
            if state.needs_head || (heap_empty && !state.is_drained()) {
                self.push_next(idx)?;
            }
        }
        Ok(())
    }

    fn push_next(&mut self, idx: usize) -> Result<(), S::Error> {
        let page_size = self.page_size;
        let state = &mut self.sources[idx];
        while state.buffer.is_empty() && !state.exhausted {
            let page = state.source.fetch_page(page_size, state.cursor.as_ref())?;
            match page.next_cursor {
                Some(next) if !page.rows.is_empty() => state.cursor = Some(next),
                Some(_) => {
                    log::warn!(
                        "Merge source {} returned an empty page with a cursor; treating it as exhausted",
                        idx
                    );
                    state.exhausted = true;
                }
                None => {
                    log::debug!("Merge source {} exhausted", idx);
                    state.exhausted = true;
                }
            }
            log::trace!(
                "Merge source {} fetched {} rows (exhausted: {})",
                idx,
                page.rows.len(),
                state.exhausted
            );
            state.buffer.extend(page.rows);
        }
        state.needs_head = false;
        if let Some(row) = state.buffer.pop_front() {
            self.heap.push(MergeEntry::new(row, idx));
        }
        Ok(())
    }
}
