pub(crate) mod config;
pub(crate) mod favorites;
pub(crate) mod ingest;
pub(crate) mod list;
pub(crate) mod remove;
pub(crate) mod stream;

use std::path::PathBuf;
use std::sync::Arc;

use asset_index_db::{AssetRepository, PoolRegistry};
use asset_index_lib::Settings;
use asset_index_lib::settings::{load_settings, resolve_library_path};

use crate::CliError;

pub(crate) fn settings() -> Result<Settings, CliError> {
    load_settings().map_err(|e| CliError::config(e.to_string()))
}

/// Open (or reuse) the write gateway for the resolved library root.
pub(crate) fn open_repository(root: Option<PathBuf>) -> Result<Arc<AssetRepository>, CliError> {
    let settings = settings()?;
    let root = resolve_library_path(root);
    log::debug!("Using library root {}", root.display());
    PoolRegistry::global()
        .repository(&root, settings.pool.pool_options())
        .map_err(|e| CliError::database(format!("Failed to open index at {}: {}", root.display(), e)))
}

/// Render a normalized timestamp for display.
pub(crate) fn format_ts(ts: Option<i64>) -> String {
    ts.and_then(chrono::DateTime::from_timestamp_micros)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "(undated)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts(None), "(undated)");
        assert_eq!(format_ts(Some(0)), "1970-01-01 00:00:00");
        assert_eq!(format_ts(Some(86_400_000_000)), "1970-01-02 00:00:00");
    }
}
