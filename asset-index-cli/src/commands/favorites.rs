use std::path::PathBuf;

use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use crate::CliError;

use super::open_repository;

/// Replace the favorite set with exactly `rels`.
pub(crate) fn run_favorites_sync(root: Option<PathBuf>, rels: &[String]) -> Result<(), CliError> {
    let repo = open_repository(root)?;
    let changed = repo
        .sync_favorites(rels)
        .map_err(|e| CliError::database(format!("Failed to sync favorites: {}", e)))?;
    log::info!(
        "{} {} rows changed, {} favorites",
        "Synced".if_supports_color(Stdout, |t| t.green()),
        changed,
        rels.len(),
    );
    Ok(())
}

pub(crate) fn run_favorites_list(root: Option<PathBuf>) -> Result<(), CliError> {
    let repo = open_repository(root)?;
    let favorites = repo
        .read_favorites()
        .map_err(|e| CliError::database(format!("Failed to read favorites: {}", e)))?;
    if favorites.is_empty() {
        log::info!(
            "{}",
            "No favorites.".if_supports_color(Stdout, |t| t.dimmed()),
        );
        return Ok(());
    }
    for rel in &favorites {
        log::info!("{}", rel);
    }
    Ok(())
}
