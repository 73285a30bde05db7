//! Backpressure batching between a fast producer and a slow consumer.
//!
//! [`StreamBuffer`] is a synchronous state machine. Producers push chunks of
//! any size with [`StreamBuffer::add_chunk`]; nothing is delivered inline.
//! A single-shot [`FlushTimer`] drives delivery: every time it fires,
//! [`StreamBuffer::on_timer_flush`] hands at most `batch_size` rows to the
//! flush callback and re-arms the timer while a backlog remains.
//!
//! Once a finish event is recorded the remaining backlog drains on a
//! zero-delay timer, and the finish callback fires exactly once after the
//! last batch.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

/// Maximum rows handed to the consumer per flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Delay between flushes while a backlog remains.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// A single-shot timer that schedules [`StreamBuffer::on_timer_flush`].
///
/// `start` (re-)arms the timer for `delay` from now, replacing any earlier
/// deadline. Firing disarms it; the owner then calls `on_timer_flush`.
pub trait FlushTimer {
    fn start(&mut self, delay: Duration);
    fn stop(&mut self);
    fn is_active(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// How a stream ended, reported to the consumer after the last batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishEvent {
    Completed { rows: usize },
    Failed { message: String },
}

type FlushCallback<T> = Box<dyn FnMut(Vec<T>) + Send>;
type FinishCallback = Box<dyn FnMut(FinishEvent) + Send>;

pub struct StreamBuffer<T, Tm: FlushTimer> {
    config: BufferConfig,
    pending: VecDeque<T>,
    timer: Tm,
    finish: Option<FinishEvent>,
    finished: bool,
    flush_callback: FlushCallback<T>,
    finish_callback: FinishCallback,
}

impl<T, Tm: FlushTimer> StreamBuffer<T, Tm> {
    pub fn new(
        config: BufferConfig,
        timer: Tm,
        flush_callback: impl FnMut(Vec<T>) + Send + 'static,
    ) -> Self {
        Self {
            config: BufferConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            pending: VecDeque::new(),
            timer,
            finish: None,
            finished: false,
            flush_callback: Box::new(flush_callback),
            finish_callback: Box::new(|_| {}),
        }
    }

    /// Set the callback that receives the finish event.
    pub fn on_finish(mut self, finish_callback: impl FnMut(FinishEvent) + Send + 'static) -> Self {
        self.finish_callback = Box::new(finish_callback);
        self
    }

    pub fn config(&self) -> BufferConfig {
        self.config
    }

    pub fn timer(&self) -> &Tm {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut Tm {
        &mut self.timer
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_finish_pending(&self) -> bool {
        self.finish.is_some()
    }

    /// True once the finish callback has fired or the buffer was cancelled.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Queue the rows of `chunk` whose key is not yet in `seen`.
    ///
    /// Keys of accepted rows are added to `seen`. Rows for which `key_fn`
    /// returns `None` are malformed and dropped. Never flushes; arms the
    /// timer if it is idle. Returns the number of rows accepted.
    pub fn add_chunk<I, F>(&mut self, chunk: I, seen: &mut HashSet<String>, key_fn: F) -> usize
    where
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> Option<String>,
    {
        if self.finished {
            log::warn!("Ignoring chunk added to a finished stream buffer");
            return 0;
        }

        let mut accepted = 0;
        let mut malformed = 0;
        let mut duplicates = 0;
        for row in chunk {
            match key_fn(&row) {
                None => malformed += 1,
                Some(key) => {
                    if seen.insert(key) {
                        self.pending.push_back(row);
                        accepted += 1;
                    } else {
                        duplicates += 1;
                    }
                }
            }
        }
        if malformed > 0 || duplicates > 0 {
            log::debug!(
                "Stream buffer dropped {} malformed and {} duplicate rows",
                malformed,
                duplicates
            );
        }

        if accepted > 0 && !self.timer.is_active() {
            self.timer.start(self.next_delay());
        }
        accepted
    }

    /// Deliver one batch. Call when the timer fires.
    pub fn on_timer_flush(&mut self) {
        if self.finished {
            return;
        }
        let n = self.pending.len().min(self.config.batch_size);
        if n > 0 {
            let batch: Vec<T> = self.pending.drain(..n).collect();
            (self.flush_callback)(batch);
        }

        if !self.pending.is_empty() {
            self.timer.start(self.next_delay());
        } else if let Some(event) = self.finish.take() {
            self.timer.stop();
            self.finished = true;
            (self.finish_callback)(event);
        } else {
            self.timer.stop();
        }
    }

    /// Record that no more chunks are coming and drain on a zero-delay timer.
    pub fn set_finish_event(&mut self, event: FinishEvent) {
        if self.finished {
            return;
        }
        self.finish = Some(event);
        self.timer.start(Duration::ZERO);
    }

    /// Disarm the timer and drop the backlog. No further callbacks fire.
    ///
    /// Returns the number of rows dropped.
    pub fn cancel(&mut self) -> usize {
        self.timer.stop();
        let dropped = self.pending.len();
        self.pending.clear();
        self.finish = None;
        self.finished = true;
        dropped
    }

    fn next_delay(&self) -> Duration {
        if self.finish.is_some() {
            Duration::ZERO
        } else {
            self.config.flush_interval
        }
    }
}
