use std::path::PathBuf;

use asset_index_core::{AssetRow, Cursor};
use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use crate::CliError;
use crate::cli_types::QueryArgs;

use super::{format_ts, open_repository};

pub(crate) fn run_list(
    root: Option<PathBuf>,
    query: &QueryArgs,
    limit: usize,
    after_cursor: Option<&str>,
    sort_by_date: bool,
) -> Result<(), CliError> {
    let cursor: Option<Cursor> = after_cursor
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| CliError::input(format!("Invalid cursor: {}", e)))?;

    let repo = open_repository(root)?;
    let filter = query.filter();
    let rows = if sort_by_date {
        repo.get_assets_page(cursor.as_ref(), limit, &query.scope(), &filter)
    } else {
        repo.read_geometry_page(limit, cursor.as_ref(), &filter, false)
    }
    .map_err(|e| CliError::database(format!("Failed to read page: {}", e)))?;

    if rows.is_empty() {
        log::info!(
            "{}",
            "No rows.".if_supports_color(Stdout, |t| t.dimmed()),
        );
        return Ok(());
    }

    for row in &rows {
        print_row(row);
    }

    crate::log_blank();
    if rows.len() < limit {
        log::info!("End of index.");
    } else if let Some(last) = rows.last() {
        let next = serde_json::to_string(&last.sort_key())
            .map_err(|e| CliError::runtime(e.to_string()))?;
        log::info!("Next cursor: {}", next.if_supports_color(Stdout, |t| t.cyan()));
    }
    Ok(())
}

pub(crate) fn run_count(root: Option<PathBuf>, query: &QueryArgs) -> Result<(), CliError> {
    let repo = open_repository(root)?;
    let count = repo
        .count(&query.scope(), &query.filter())
        .map_err(|e| CliError::database(format!("Failed to count rows: {}", e)))?;
    log::info!("{}", count);
    Ok(())
}

pub(crate) fn print_row(row: &AssetRow) {
    let star = if row.is_favorite { "*" } else { " " };
    log::info!(
        "{} {}  {}",
        star.if_supports_color(Stdout, |t| t.yellow()),
        format_ts(row.timestamp()).if_supports_color(Stdout, |t| t.dimmed()),
        row.rel,
    );
}
