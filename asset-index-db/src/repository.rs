//! The write gateway over one index database.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use asset_index_core::{AssetRow, Cursor, FilterParams};
use rusqlite::{Connection, TransactionBehavior};

use crate::error::RepositoryError;
use crate::operations::{self, OperationError};
use crate::pool::{canonical_db_path, ConnectionPool, PoolOptions, PoolRegistry, PooledConnection};
use crate::queries::{self, AlbumScope};
use crate::schema;

/// Name of the work directory created inside every index root.
pub const INDEX_DIR: &str = ".asset-index";

/// File name of the index database inside [`INDEX_DIR`].
pub const INDEX_DB_NAME: &str = "index.db";

/// Location of the index database for `root`.
pub fn index_db_path(root: &Path) -> PathBuf {
    root.join(INDEX_DIR).join(INDEX_DB_NAME)
}

/// Exclusive write gateway for one index database.
///
/// Reads may run concurrently on any pooled connection. Writes serialize on
/// an internal lock and each runs in one `IMMEDIATE` transaction, so a
/// failed write leaves the database as it was.
pub struct AssetRepository {
    root: PathBuf,
    db_path: PathBuf,
    pool: Arc<ConnectionPool>,
    write_lock: Mutex<()>,
    acquire_timeout: Duration,
}

impl AssetRepository {
    /// Open (creating if needed) the index under `root` and claim its write
    /// gateway in `registry`.
    ///
    /// Fails with [`RepositoryError::DuplicateWriteGateway`] while another
    /// repository for the same database is alive.
    pub fn open(
        registry: &PoolRegistry,
        root: &Path,
        options: PoolOptions,
    ) -> Result<Arc<Self>, RepositoryError> {
        std::fs::create_dir_all(root.join(INDEX_DIR))?;
        let root = root.canonicalize()?;
        let db_path = canonical_db_path(&index_db_path(&root));

        let mut gateways = registry.lock_gateways();
        if gateways.get(&db_path).and_then(Weak::upgrade).is_some() {
            log::error!(
                "Refusing to open a second write gateway for {}",
                db_path.display()
            );
            return Err(RepositoryError::DuplicateWriteGateway { path: db_path });
        }
        let repo = Arc::new(Self::with_pool(root, db_path.clone(), registry, options)?);
        gateways.retain(|_, gateway| gateway.strong_count() > 0);
        gateways.insert(db_path, Arc::downgrade(&repo));
        Ok(repo)
    }

    fn with_pool(
        root: PathBuf,
        db_path: PathBuf,
        registry: &PoolRegistry,
        options: PoolOptions,
    ) -> Result<Self, RepositoryError> {
        let pool = registry.get_pool_with_options(&db_path, options);
        let repo = Self {
            root,
            db_path,
            pool,
            write_lock: Mutex::new(()),
            acquire_timeout: options.acquire_timeout,
        };
        repo.write(|conn| schema::ensure_schema(conn).map_err(RepositoryError::from))?;
        log::debug!("Opened asset index at {}", repo.db_path.display());
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    fn acquire(&self) -> Result<PooledConnection<'_>, RepositoryError> {
        self.pool
            .acquire(self.acquire_timeout)
            .ok_or_else(|| RepositoryError::PoolExhausted {
                path: self.db_path.clone(),
                timeout: self.acquire_timeout,
            })
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut conn = self.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, RepositoryError> {
        let conn = self.acquire()?;
        Ok(f(&conn)?)
    }

    fn with_abs(&self, mut row: AssetRow) -> AssetRow {
        row.abs = Some(self.root.join(&row.rel));
        row
    }

    fn with_abs_all(&self, rows: Vec<AssetRow>) -> Vec<AssetRow> {
        rows.into_iter().map(|row| self.with_abs(row)).collect()
    }

    // ── Writes ──────────────────────────────────────────────────────────────

    /// Idempotent upsert keyed by `rel`. Returns the number of rows written.
    pub fn append_rows(&self, rows: &[AssetRow]) -> Result<usize, RepositoryError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = self.write(|conn| Ok(operations::append_rows(conn, rows)?))?;
        log::debug!(
            "Appended {} of {} rows to {}",
            written,
            rows.len(),
            self.db_path.display()
        );
        Ok(written)
    }

    /// Make the favorite set exactly `target_rels`. Returns rows changed.
    pub fn sync_favorites<S: AsRef<str>>(&self, target_rels: &[S]) -> Result<usize, RepositoryError> {
        self.write(|conn| Ok(operations::sync_favorites(conn, target_rels)?))
    }

    pub fn set_favorite(&self, rel: &str, favorite: bool) -> Result<(), RepositoryError> {
        self.write(|conn| Ok(operations::set_favorite(conn, rel, favorite)?))
    }

    /// Delete rows by `rel`. Returns rows deleted.
    pub fn remove_rows<S: AsRef<str>>(&self, rels: &[S]) -> Result<usize, RepositoryError> {
        self.write(|conn| Ok(operations::remove_rows(conn, rels)?))
    }

    /// Re-key rows after a completed move. All or nothing.
    pub fn apply_moves(&self, moves: &[(String, String)]) -> Result<usize, RepositoryError> {
        if moves.is_empty() {
            return Ok(0);
        }
        let moved = self.write(|conn| Ok(operations::apply_moves(conn, moves)?));
        if let Err(RepositoryError::Operation(OperationError::Collision { from, to })) = &moved {
            log::warn!("Move of '{}' to '{}' collided; no rows were moved", from, to);
        }
        moved
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// Up to `limit` rows of the whole index strictly after `cursor`,
    /// newest first, with `filter` applied before the limit.
    pub fn read_geometry_page(
        &self,
        limit: usize,
        cursor: Option<&Cursor>,
        filter: &FilterParams,
        sort_by_date: bool,
    ) -> Result<Vec<AssetRow>, RepositoryError> {
        let rows = self.read(|conn| {
            queries::assets_page(conn, &AlbumScope::default(), filter, cursor, limit, sort_by_date)
        })?;
        Ok(self.with_abs_all(rows))
    }

    /// Up to `limit` rows in `scope` strictly after `cursor`, newest first.
    pub fn get_assets_page(
        &self,
        cursor: Option<&Cursor>,
        limit: usize,
        scope: &AlbumScope,
        filter: &FilterParams,
    ) -> Result<Vec<AssetRow>, RepositoryError> {
        let rows =
            self.read(|conn| queries::assets_page(conn, scope, filter, cursor, limit, true))?;
        Ok(self.with_abs_all(rows))
    }

    /// Number of rows `get_assets_page` would walk through for `scope` and `filter`.
    pub fn count(&self, scope: &AlbumScope, filter: &FilterParams) -> Result<u64, RepositoryError> {
        self.read(|conn| queries::count_assets(conn, scope, filter))
    }

    /// Every row, ordered by `rel`.
    pub fn read_all(&self) -> Result<Vec<AssetRow>, RepositoryError> {
        let rows = self.read(queries::read_all)?;
        Ok(self.with_abs_all(rows))
    }

    pub fn get_row(&self, rel: &str) -> Result<Option<AssetRow>, RepositoryError> {
        let row = self.read(|conn| queries::get_row(conn, rel))?;
        Ok(row.map(|row| self.with_abs(row)))
    }

    /// `rel` of every favorite, ordered by `rel`.
    pub fn read_favorites(&self) -> Result<Vec<String>, RepositoryError> {
        self.read(queries::favorite_rels)
    }
}

impl std::fmt::Debug for AssetRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRepository")
            .field("root", &self.root)
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl PoolRegistry {
    /// The live write gateway for `root`, opening one if none exists.
    pub fn repository(
        &self,
        root: &Path,
        options: PoolOptions,
    ) -> Result<Arc<AssetRepository>, RepositoryError> {
        std::fs::create_dir_all(root.join(INDEX_DIR))?;
        let db_path = canonical_db_path(&index_db_path(&root.canonicalize()?));
        if let Some(existing) = self.lock_gateways().get(&db_path).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        match AssetRepository::open(self, root, options) {
            // Lost a race with another opener; theirs is the gateway.
            Err(RepositoryError::DuplicateWriteGateway { path }) => self
                .lock_gateways()
                .get(&path)
                .and_then(Weak::upgrade)
                .ok_or(RepositoryError::DuplicateWriteGateway { path }),
            other => other,
        }
    }
}
