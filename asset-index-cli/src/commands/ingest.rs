use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use asset_index_core::AssetRow;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use crate::CliError;

use super::open_repository;

/// Append JSON-lines scanner output to the index in chunks.
pub(crate) fn run_ingest(
    root: Option<PathBuf>,
    input: &Path,
    chunk_size: usize,
) -> Result<(), CliError> {
    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(input).map_err(|e| {
            CliError::input(format!("Cannot open {}: {}", input.display(), e))
        })?;
        Box::new(BufReader::new(file))
    };

    let (rows, skipped) = parse_rows(reader)?;
    if skipped > 0 {
        log::warn!("Skipped {} lines that are not asset rows", skipped);
    }
    if rows.is_empty() {
        log::info!("Nothing to ingest.");
        return Ok(());
    }

    let repo = open_repository(root)?;
    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("  {bar:40.cyan/blue} {pos}/{len} rows ({eta})")
            .map_err(|e| CliError::runtime(e.to_string()))?
            .progress_chars("=> "),
    );

    let mut written = 0;
    for chunk in rows.chunks(chunk_size.max(1)) {
        written += repo
            .append_rows(chunk)
            .map_err(|e| CliError::database(format!("Append failed: {}", e)))?;
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    log::info!(
        "{} {} rows into {}",
        "Ingested".if_supports_color(Stdout, |t| t.green()),
        written,
        repo.db_path().display(),
    );
    Ok(())
}

/// Parse one `AssetRow` per non-blank line. Returns the rows and the number
/// of lines that failed to parse.
fn parse_rows(reader: impl BufRead) -> Result<(Vec<AssetRow>, usize), CliError> {
    let mut rows = Vec::new();
    let mut skipped = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<AssetRow>(line) {
            Ok(row) => rows.push(row),
            Err(e) => {
                log::debug!("Line {}: {}", lineno + 1, e);
                skipped += 1;
            }
        }
    }
    Ok((rows, skipped))
}
