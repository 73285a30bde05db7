//! Runs a [`StreamBuffer`] on a tokio task.
//!
//! Producers talk to the task through a cloneable [`StreamBufferHandle`]
//! whose methods never block. The consumer receives [`Delivery`] values on
//! an unbounded channel: batches of at most `batch_size` rows, then one
//! `Finished` event.

use std::collections::HashSet;
use std::time::Duration;

use asset_index_core::AssetRow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::buffer::{BufferConfig, FinishEvent, FlushTimer, StreamBuffer};

/// What the consumer receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Batch(Vec<AssetRow>),
    Finished(FinishEvent),
}

/// [`FlushTimer`] backed by a tokio-clock deadline.
#[derive(Debug, Default)]
pub struct DeadlineTimer {
    deadline: Option<Instant>,
}

impl DeadlineTimer {
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm after the deadline has passed.
    fn fired(&mut self) {
        self.deadline = None;
    }
}

impl FlushTimer for DeadlineTimer {
    fn start(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    fn stop(&mut self) {
        self.deadline = None;
    }

    fn is_active(&self) -> bool {
        self.deadline.is_some()
    }
}

/// Dedupe key for a streamed row: its absolute path, else its `rel`.
pub fn row_key(row: &AssetRow) -> Option<String> {
    match &row.abs {
        Some(abs) => Some(abs.to_string_lossy().into_owned()),
        None => row.key().map(str::to_string),
    }
}

enum Command {
    Chunk(Vec<AssetRow>),
    Finish(FinishEvent),
    Cancel,
}

/// Producer side of a spawned stream buffer.
#[derive(Debug, Clone)]
pub struct StreamBufferHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Chunk(rows) => write!(f, "Chunk({} rows)", rows.len()),
            Command::Finish(event) => write!(f, "Finish({:?})", event),
            Command::Cancel => f.write_str("Cancel"),
        }
    }
}

impl StreamBufferHandle {
    /// Queue a chunk. Returns `false` if the buffer task has ended.
    pub fn add_chunk(&self, rows: Vec<AssetRow>) -> bool {
        self.tx.send(Command::Chunk(rows)).is_ok()
    }

    /// Record the terminal event; the backlog then drains without delay.
    pub fn finish(&self, event: FinishEvent) -> bool {
        self.tx.send(Command::Finish(event)).is_ok()
    }

    /// Disarm the timer and drop the backlog. No `Finished` is delivered.
    pub fn cancel(&self) {
        let _ = self.tx.send(Command::Cancel);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn a stream buffer on the current tokio runtime.
///
/// `seen_keys` holds the keys the consumer already displays; rows with
/// those keys are never delivered again. If every handle is dropped without
/// a finish event, the backlog is still delivered and the task ends
/// without sending `Finished`.
pub fn spawn_stream_buffer(
    config: BufferConfig,
    seen_keys: HashSet<String>,
) -> (StreamBufferHandle, mpsc::UnboundedReceiver<Delivery>) {
    let (handle, deliveries, _task) = spawn_stream_buffer_task(config, seen_keys);
    (handle, deliveries)
}

/// Like [`spawn_stream_buffer`], also returning the task's join handle.
pub fn spawn_stream_buffer_task(
    config: BufferConfig,
    seen_keys: HashSet<String>,
) -> (
    StreamBufferHandle,
    mpsc::UnboundedReceiver<Delivery>,
    JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();

    let batch_tx = delivery_tx.clone();
    let buffer = StreamBuffer::new(config, DeadlineTimer::default(), move |rows| {
        if batch_tx.send(Delivery::Batch(rows)).is_err() {
            log::trace!("Stream consumer went away; dropping batch");
        }
    })
    .on_finish(move |event| {
        let _ = delivery_tx.send(Delivery::Finished(event));
    });

    let task = tokio::spawn(run_buffer(buffer, seen_keys, cmd_rx));
    (StreamBufferHandle { tx: cmd_tx }, delivery_rx, task)
}

async fn run_buffer(
    mut buffer: StreamBuffer<AssetRow, DeadlineTimer>,
    mut seen: HashSet<String>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut commands_open = true;
    loop {
        if buffer.is_finished() || (!commands_open && !buffer.timer().is_active()) {
            break;
        }
        let deadline = buffer.timer().deadline();
        tokio::select! {
            cmd = commands.recv(), if commands_open => match cmd {
                Some(Command::Chunk(rows)) => {
                    buffer.add_chunk(rows, &mut seen, row_key);
                }
                Some(Command::Finish(event)) => buffer.set_finish_event(event),
                Some(Command::Cancel) => {
                    let dropped = buffer.cancel();
                    log::debug!("Stream buffer cancelled with {} rows pending", dropped);
                }
                None => commands_open = false,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                buffer.timer_mut().fired();
                buffer.on_timer_flush();
            }
        }
    }
    log::trace!("Stream buffer task finished");
}
