use std::path::PathBuf;

use crate::CliError;

use super::open_repository;

pub(crate) fn run_remove(root: Option<PathBuf>, rels: &[String]) -> Result<(), CliError> {
    let repo = open_repository(root)?;
    let removed = repo
        .remove_rows(rels)
        .map_err(|e| CliError::database(format!("Failed to remove rows: {}", e)))?;
    if removed < rels.len() {
        log::warn!("{} of {} paths were not in the index", rels.len() - removed, rels.len());
    }
    log::info!("Removed {} rows", removed);
    Ok(())
}
