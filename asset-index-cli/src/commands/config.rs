use std::path::{Path, PathBuf};

use asset_index_db::index_db_path;
use asset_index_lib::settings::{
    load_settings_string, resolve_library_path, save_library_path, settings_path,
};
use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use crate::CliError;

use super::settings;

/// Show the settings file and the values in effect.
pub(crate) fn run_config_show(root: Option<PathBuf>) -> Result<(), CliError> {
    let path = settings_path();
    log::info!(
        "{}",
        "asset-index Configuration".if_supports_color(Stdout, |t| t.bold()),
    );
    crate::log_blank();

    if path.exists() {
        log::info!(
            "  Settings file: {} {}",
            path.display().if_supports_color(Stdout, |t| t.cyan()),
            "(exists)".if_supports_color(Stdout, |t| t.green()),
        );
    } else {
        log::info!(
            "  Settings file: {} {}",
            path.display().if_supports_color(Stdout, |t| t.cyan()),
            "(not found)".if_supports_color(Stdout, |t| t.dimmed()),
        );
    }

    let settings = settings()?;
    let root = resolve_library_path(root);
    log::info!("  Library root:  {}", root.display());
    log::info!("  Index:         {}", index_db_path(&root).display());
    crate::log_blank();
    log::info!(
        "  Pool:          {} connections, acquire timeout {} ms, busy timeout {} ms",
        settings.pool.size,
        settings.pool.acquire_timeout_ms,
        settings.pool.busy_timeout_ms,
    );
    log::info!(
        "  Stream:        page size {}, batch size {}, flush every {} ms",
        settings.stream.page_size,
        settings.stream.batch_size,
        settings.stream.flush_interval_ms,
    );

    if let Some(contents) = load_settings_string() {
        crate::log_blank();
        for line in contents.lines() {
            log::info!("    {}", line);
        }
    }
    Ok(())
}

pub(crate) fn run_config_path() {
    log::info!("{}", settings_path().display());
}

pub(crate) fn run_config_set_root(dir: &Path) -> Result<(), CliError> {
    let dir = dir
        .canonicalize()
        .map_err(|e| CliError::config(format!("Cannot use {}: {}", dir.display(), e)))?;
    if !dir.is_dir() {
        return Err(CliError::config(format!("{} is not a directory", dir.display())));
    }
    save_library_path(Some(&dir))?;
    log::info!(
        "{} library root {}",
        "Saved".if_supports_color(Stdout, |t| t.green()),
        dir.display(),
    );
    Ok(())
}
