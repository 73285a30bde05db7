//! Background loading: drive a [`StreamMerger`] off the async runtime and
//! feed its batches into a stream buffer.
//!
//! The merge runs on tokio's blocking pool because page fetches hit SQLite
//! synchronously. Cancellation is cooperative: the flag is checked between
//! batches, never in the middle of a page fetch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use asset_index_core::PagedSource;
use tokio::task::JoinHandle;

use crate::buffer::{DEFAULT_BATCH_SIZE, FinishEvent};
use crate::driver::StreamBufferHandle;
use crate::error::LoadError;
use crate::merger::{DEFAULT_PAGE_SIZE, StreamMerger};

/// What a finished (or cancelled) load produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Rows handed to the buffer, before its dedupe.
    pub rows: usize,
    pub batches: usize,
    pub cancelled: bool,
}

/// A merge over several sources, ready to run in the background.
pub struct StreamLoader<S: PagedSource> {
    sources: Vec<S>,
    page_size: usize,
    batch_size: usize,
    cancel: Arc<AtomicBool>,
}

impl<S> StreamLoader<S>
where
    S: PagedSource + Send + 'static,
{
    pub fn new(sources: Vec<S>) -> Self {
        Self {
            sources,
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Rows requested from each source per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Rows pulled from the merger between cancellation checks.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Share a cancellation flag with other background work.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Start the merge on the blocking pool, delivering into `buffer`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self, buffer: StreamBufferHandle) -> LoadHandle<S::Error> {
        let Self {
            sources,
            page_size,
            batch_size,
            cancel,
        } = self;
        let merger = StreamMerger::new(sources, page_size);
        let worker_buffer = buffer.clone();
        let worker_cancel = Arc::clone(&cancel);
        let task = tokio::task::spawn_blocking(move || {
            run_load(merger, batch_size, &worker_buffer, &worker_cancel)
        });
        LoadHandle {
            cancel,
            buffer,
            task,
        }
    }
}

/// Owner's side of a running load.
pub struct LoadHandle<E> {
    cancel: Arc<AtomicBool>,
    buffer: StreamBufferHandle,
    task: JoinHandle<Result<LoadSummary, E>>,
}

impl<E> LoadHandle<E> {
    /// Stop fetching further pages and disarm the buffer's timer.
    ///
    /// The worker notices at its next batch boundary; no finish event is
    /// delivered for a cancelled load.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.buffer.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// A cloneable way to cancel this load after the handle moved into
    /// [`LoadHandle::join`].
    pub fn canceller(&self) -> LoadCanceller {
        LoadCanceller {
            cancel: Arc::clone(&self.cancel),
            buffer: self.buffer.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to stop.
    pub async fn join(self) -> Result<LoadSummary, LoadError<E>> {
        match self.task.await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(e)) => Err(LoadError::Source(e)),
            Err(e) => Err(LoadError::Worker(e.to_string())),
        }
    }
}

/// Cancels a running load; see [`LoadHandle::cancel`].
#[derive(Debug, Clone)]
pub struct LoadCanceller {
    cancel: Arc<AtomicBool>,
    buffer: StreamBufferHandle,
}

impl LoadCanceller {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.buffer.cancel();
    }
}

fn run_load<S: PagedSource>(
    mut merger: StreamMerger<S>,
    batch_size: usize,
    buffer: &StreamBufferHandle,
    cancel: &AtomicBool,
) -> Result<LoadSummary, S::Error> {
    let mut summary = LoadSummary::default();
    log::debug!(
        "Loading from {} sources (batch size {})",
        merger.source_count(),
        batch_size
    );

    while merger.has_more() {
        if cancel.load(Ordering::Relaxed) {
            log::debug!(
                "Load cancelled after {} rows in {} batches",
                summary.rows,
                summary.batches
            );
            buffer.cancel();
            summary.cancelled = true;
            return Ok(summary);
        }

        let batch = match merger.fetch_next_batch(batch_size) {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("Load failed after {} rows: {}", summary.rows, e);
                buffer.finish(FinishEvent::Failed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        if batch.is_empty() {
            break;
        }

        summary.rows += batch.len();
        summary.batches += 1;
        if !buffer.add_chunk(batch) {
            log::debug!("Stream buffer closed; stopping load");
            summary.cancelled = true;
            return Ok(summary);
        }
    }

    log::debug!(
        "Load completed: {} rows in {} batches",
        summary.rows,
        summary.batches
    );
    buffer.finish(FinishEvent::Completed { rows: summary.rows });
    Ok(summary)
}
