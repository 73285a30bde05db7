//! Drive a background load while draining its deliveries.
//!
//! Frontends call [`consume_load`] to render batches as the stream buffer
//! releases them and to get the load's result once the channel is drained.

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use crate::driver::Delivery;
use crate::error::LoadError;
use crate::loader::{LoadHandle, LoadSummary};

/// Maximum time to wait for the buffer to drain after the worker stops.
/// A buffer whose handle leaked would otherwise keep the channel open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `load` to completion, calling `on_delivery` for every delivery.
///
/// Returns the load's result after the buffer has delivered its backlog
/// and the finish event (or after a timeout if it never closes).
pub async fn consume_load<E>(
    load: LoadHandle<E>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    mut on_delivery: impl FnMut(Delivery),
) -> Result<LoadSummary, LoadError<E>> {
    let join = load.join();
    tokio::pin!(join);
    let mut delivered: u64 = 0;

    // Phase 1: deliveries until the worker stops
    let result = loop {
        tokio::select! {
            r = &mut join => break Some(r),
            delivery = deliveries.recv() => match delivery {
                Some(d) => {
                    delivered += 1;
                    on_delivery(d);
                }
                None => break None,
            }
        }
    };

    let Some(result) = result else {
        log::debug!("Delivery channel closed after {} deliveries; awaiting worker", delivered);
        return join.await;
    };

    // Phase 2: the buffer still paces out whatever the worker queued
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, deliveries.recv()).await {
            Ok(Some(d)) => {
                delivered += 1;
                on_delivery(d);
            }
            Ok(None) => break,
            Err(_) => {
                log::warn!(
                    "Stream buffer did not close within {}s of the load finishing",
                    DRAIN_TIMEOUT.as_secs()
                );
                break;
            }
        }
    }
    log::debug!("Load drained ({} deliveries)", delivered);
    result
}
