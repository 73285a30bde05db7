//! CLI type definitions: command enums and argument structs.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use asset_index_core::{FilterParams, MediaKind};
use asset_index_db::AlbumScope;

#[derive(Parser)]
#[command(name = "asset-index")]
#[command(about = "Index, page and stream a photo library", long_about = None)]
pub(crate) struct Cli {
    /// Library root holding the index (defaults to the saved root, then the current directory)
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Only show warnings and errors (suppress normal output)
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Enable verbose/debug logging (timestamps + debug-level messages)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Scope and filter arguments shared by the read commands.
#[derive(Args, Clone, Default)]
pub(crate) struct QueryArgs {
    /// Album path relative to the library root
    #[arg(short, long)]
    pub album: Option<String>,

    /// Only the album itself, not its sub-albums
    #[arg(long, requires = "album")]
    pub no_subalbums: bool,

    /// Only favorites
    #[arg(long)]
    pub favorites: bool,

    /// Only videos
    #[arg(long, conflicts_with = "live")]
    pub videos: bool,

    /// Only live photos
    #[arg(long)]
    pub live: bool,

    /// Exact location match
    #[arg(long)]
    pub location: Option<String>,

    /// Include hidden live-photo companions
    #[arg(long)]
    pub show_hidden: bool,
}

impl QueryArgs {
    pub fn scope(&self) -> AlbumScope {
        let mut scope = match &self.album {
            Some(album) => AlbumScope::album(album),
            None => AlbumScope::library(),
        };
        if self.no_subalbums {
            scope = scope.without_subalbums();
        }
        scope.filter_hidden = !self.show_hidden;
        scope
    }

    pub fn filter(&self) -> FilterParams {
        FilterParams {
            media_type: self.videos.then_some(MediaKind::Video),
            live_only: self.live,
            favorites_only: self.favorites,
            location: self.location.clone(),
            ..FilterParams::default()
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Append scanner output (JSON lines of asset rows) to the index
    Ingest {
        /// File to read, or "-" for stdin
        input: PathBuf,

        /// Rows written per transaction
        #[arg(long, default_value_t = 500)]
        chunk_size: usize,
    },

    /// Print one page of the index, newest first
    List {
        #[command(flatten)]
        query: QueryArgs,

        /// Rows per page
        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        /// Resume after this cursor (as printed by a previous list)
        #[arg(long)]
        after_cursor: Option<String>,

        /// Order the whole library by id only instead of capture time
        #[arg(long, conflicts_with = "album")]
        by_id: bool,
    },

    /// Count rows matching a scope and filter
    Count {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Stream the library merged with album sources, paced in batches
    Stream {
        /// Extra album sources merged with the library
        #[arg(short, long = "album")]
        albums: Vec<String>,

        /// Only favorites
        #[arg(long)]
        favorites: bool,

        /// Stop after this many delivered rows
        #[arg(long)]
        max_rows: Option<usize>,
    },

    /// Manage favorites
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },

    /// Remove rows from the index
    Remove {
        /// Relative paths to remove
        #[arg(required = true)]
        rels: Vec<String>,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum FavoritesAction {
    /// Make exactly these relative paths the favorites
    Sync {
        rels: Vec<String>,
    },

    /// List favorite relative paths
    List,
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Show the settings file and effective values
    Show,

    /// Print the settings file path
    Path,

    /// Save the library root used when --root is not given
    SetRoot {
        dir: PathBuf,
    },
}
