use std::collections::HashSet;
use std::path::PathBuf;

use asset_index_core::FilterParams;
use asset_index_db::{AlbumScope, CursorQuery};
use asset_index_lib::{Delivery, FinishEvent, StreamLoader, consume_load, spawn_stream_buffer};
use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use crate::CliError;

use super::list::print_row;
use super::{open_repository, settings};

/// Merge the library with album sources and print batches as the buffer
/// releases them.
pub(crate) fn run_stream(
    root: Option<PathBuf>,
    albums: &[String],
    favorites: bool,
    max_rows: Option<usize>,
) -> Result<(), CliError> {
    let stream_settings = settings()?.stream;
    let repo = open_repository(root)?;
    let filter = if favorites {
        FilterParams::favorites()
    } else {
        FilterParams::new()
    };

    let mut sources = vec![CursorQuery::library(repo.clone(), filter.clone())];
    sources.extend(
        albums
            .iter()
            .map(|album| CursorQuery::new(repo.clone(), AlbumScope::album(album), filter.clone())),
    );

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::runtime(format!("Failed to create tokio runtime: {}", e)))?;

    let result = rt.block_on(async {
        let (buffer, deliveries) =
            spawn_stream_buffer(stream_settings.buffer_config(), HashSet::new());
        let load = StreamLoader::new(sources)
            .with_page_size(stream_settings.page_size)
            .with_batch_size(stream_settings.batch_size)
            .start(buffer);
        let cancel = load.canceller();

        let mut shown = 0usize;
        let mut batches = 0usize;
        let mut finish = None;
        let summary = consume_load(load, deliveries, |delivery| match delivery {
            Delivery::Batch(rows) => {
                batches += 1;
                for row in &rows {
                    if max_rows.is_some_and(|max| shown >= max) {
                        break;
                    }
                    print_row(row);
                    shown += 1;
                }
                if max_rows.is_some_and(|max| shown >= max) {
                    cancel.cancel();
                }
            }
            Delivery::Finished(event) => finish = Some(event),
        })
        .await;
        (summary, shown, batches, finish)
    });

    let (summary, shown, batches, finish) = result;
    let summary = summary.map_err(|e| CliError::database(e.to_string()))?;

    crate::log_blank();
    match finish {
        Some(FinishEvent::Completed { rows }) => log::info!(
            "{} {} rows in {} batches ({} merged)",
            "Streamed".if_supports_color(Stdout, |t| t.green()),
            shown,
            batches,
            rows,
        ),
        Some(FinishEvent::Failed { message }) => {
            return Err(CliError::database(format!("Stream failed: {}", message)));
        }
        None if summary.cancelled => log::info!(
            "Stopped after {} rows ({} merged before cancelling)",
            shown,
            summary.rows,
        ),
        None => log::warn!("Stream ended without a finish event"),
    }
    Ok(())
}
