//! SQLite persistence layer for the asset index.
//!
//! Provides connection pooling, schema creation, the write gateway, and
//! cursor-paginated reads backed by SQLite (via rusqlite with bundled feature).

pub mod cursor;
pub mod error;
pub mod operations;
pub mod pool;
pub mod queries;
pub mod repository;
pub mod schema;

pub use cursor::CursorQuery;
pub use error::RepositoryError;
pub use operations::{
    append_rows, apply_moves, remove_rows, set_favorite, sync_favorites, upsert_asset,
    OperationError,
};
pub use pool::{canonical_db_path, ConnectionPool, PoolOptions, PoolRegistry, PooledConnection};
pub use queries::{assets_page, count_assets, favorite_rels, get_row, read_all, AlbumScope};
pub use repository::{index_db_path, AssetRepository, INDEX_DB_NAME, INDEX_DIR};
pub use schema::{ensure_schema, open_memory, SchemaError, CURRENT_VERSION};
