//! asset-index CLI
//!
//! Command-line interface for building and reading a photo library index.

mod cli_types;
mod commands;
mod error;

use std::io::Write;

use clap::Parser;

use asset_index_db::PoolRegistry;

use cli_types::{Cli, Commands, ConfigAction, FavoritesAction};
pub(crate) use error::CliError;

fn main() {
    let cli = Cli::parse();
    init_logger(cli.quiet, cli.verbose);

    let result = run(cli);
    PoolRegistry::global().shutdown_all();

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let root = cli.root;
    match cli.command {
        Commands::Ingest { input, chunk_size } => {
            commands::ingest::run_ingest(root, &input, chunk_size)
        }
        Commands::List {
            query,
            limit,
            after_cursor,
            by_id,
        } => commands::list::run_list(root, &query, limit, after_cursor.as_deref(), !by_id),
        Commands::Count { query } => commands::list::run_count(root, &query),
        Commands::Stream {
            albums,
            favorites,
            max_rows,
        } => commands::stream::run_stream(root, &albums, favorites, max_rows),
        Commands::Favorites { action } => match action {
            FavoritesAction::Sync { rels } => commands::favorites::run_favorites_sync(root, &rels),
            FavoritesAction::List => commands::favorites::run_favorites_list(root),
        },
        Commands::Remove { rels } => commands::remove::run_remove(root, &rels),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::run_config_show(root),
            ConfigAction::Path => {
                commands::config::run_config_path();
                Ok(())
            }
            ConfigAction::SetRoot { dir } => commands::config::run_config_set_root(&dir),
        },
    }
}

/// Route `log` output to stdout: plain messages normally, timestamped
/// records with `--verbose`. `RUST_LOG` overrides the level.
fn init_logger(quiet: bool, verbose: bool) {
    let default_level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));

    if verbose {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });
    } else {
        builder.format(|buf, record| match record.level() {
            log::Level::Info => writeln!(buf, "{}", record.args()),
            level => writeln!(buf, "{}: {}", level.as_str().to_lowercase(), record.args()),
        });
    }

    builder.target(env_logger::Target::Stdout).init();
}

pub(crate) fn log_blank() {
    log::info!("");
}
