//! Thread-safe SQLite connection pooling.
//!
//! A [`ConnectionPool`] owns a fixed set of identically configured
//! connections to one database file. Connections are checked out with
//! [`ConnectionPool::acquire`] and go back to the pool when the returned
//! [`PooledConnection`] guard is dropped, on every exit path.
//!
//! Pools are looked up through a [`PoolRegistry`] so a database file never
//! ends up with two pools. Tests build their own isolated registry; the
//! application uses [`PoolRegistry::global`].

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

use rusqlite::{Connection, Params, Row, TransactionBehavior};

use crate::repository::AssetRepository;

/// Pragmas applied once to every new connection.
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA cache_size=-64000;
     PRAGMA temp_store=MEMORY;
     PRAGMA mmap_size=1073741824;
     PRAGMA foreign_keys=ON;";

/// Sizing and timeout knobs for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Number of connections opened when the pool initializes.
    pub size: usize,
    /// Default wait used by the `execute_*` helpers and repositories.
    pub acquire_timeout: Duration,
    /// How long SQLite itself waits on a locked database.
    pub busy_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            size: 5,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolOptions {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

struct PoolState {
    idle: Vec<Connection>,
    initialized: bool,
    /// Live connections owned by the current generation (idle + checked out).
    total: usize,
    /// Bumped on shutdown so connections checked out before it are closed
    /// on return instead of re-pooled.
    generation: u64,
}

/// A pool of connections to one database file.
pub struct ConnectionPool {
    db_path: PathBuf,
    options: PoolOptions,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Create an uninitialized pool. No connection is opened until the
    /// first [`acquire`](Self::acquire).
    pub fn new(db_path: impl Into<PathBuf>, options: PoolOptions) -> Self {
        Self {
            db_path: db_path.into(),
            options,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                initialized: false,
                total: 0,
                generation: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn options(&self) -> PoolOptions {
        self.options
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state().initialized
    }

    /// Connections currently sitting in the pool.
    pub fn idle_count(&self) -> usize {
        self.lock_state().idle.len()
    }

    /// Connections owned by the pool, whether idle or checked out.
    pub fn total_connections(&self) -> usize {
        self.lock_state().total
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_locked(&self, state: &mut PoolState) {
        if state.initialized {
            return;
        }
        for _ in 0..self.options.size {
            match self.create_connection() {
                Ok(conn) => {
                    state.idle.push(conn);
                    state.total += 1;
                }
                Err(e) => {
                    log::error!(
                        "Failed to create database connection for {}: {}",
                        self.db_path.display(),
                        e
                    );
                }
            }
        }
        state.initialized = true;
        log::debug!(
            "Initialized connection pool for {} with {} connections",
            self.db_path.display(),
            state.total
        );
    }

    fn create_connection(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.options.busy_timeout)?;
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        Ok(conn)
    }

    /// Check a connection out of the pool, waiting up to `timeout`.
    ///
    /// Returns `None` when no connection became available in time. That is
    /// a backpressure signal for the caller, not an error.
    pub fn acquire(&self, timeout: Duration) -> Option<PooledConnection<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        loop {
            if !state.initialized {
                self.init_locked(&mut state);
            }
            if let Some(conn) = state.idle.pop() {
                log::trace!("Connection acquired from pool {}", self.db_path.display());
                return Some(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                    generation: state.generation,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "Connection pool for {} exhausted (timeout after {:.1}s)",
                    self.db_path.display(),
                    timeout.as_secs_f64()
                );
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Return a connection to the pool. Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection<'_>) {
        drop(conn);
    }

    fn return_connection(&self, conn: Connection, generation: u64) {
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                log::error!(
                    "Error releasing connection for {}: {}; discarding it",
                    self.db_path.display(),
                    e
                );
                let mut state = self.lock_state();
                if state.generation == generation {
                    state.total = state.total.saturating_sub(1);
                }
                drop(state);
                close_connection(conn);
                // Waiters may be blocked on a pool that just shrank.
                self.available.notify_all();
                return;
            }
        }

        let mut state = self.lock_state();
        if !state.initialized || state.generation != generation {
            drop(state);
            close_connection(conn);
            return;
        }
        state.idle.push(conn);
        drop(state);
        log::trace!("Connection released to pool {}", self.db_path.display());
        self.available.notify_one();
    }

    /// Acquire a connection, run `f`, and release the connection again.
    ///
    /// `Ok(None)` means the pool was exhausted for `timeout`.
    pub fn with_connection<T, E, F>(&self, timeout: Duration, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E>,
    {
        let Some(mut conn) = self.acquire(timeout) else {
            return Ok(None);
        };
        f(&mut conn).map(Some)
    }

    /// Run a read query and collect every mapped row.
    pub fn execute_query<T, P, F>(
        &self,
        sql: &str,
        params: P,
        timeout: Duration,
        map_row: F,
    ) -> rusqlite::Result<Option<Vec<T>>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_connection(timeout, |conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, map_row)?;
            rows.collect()
        })
    }

    /// Execute one statement once per parameter set, in a single transaction.
    ///
    /// Returns the total number of changed rows.
    pub fn execute_many<P, I>(
        &self,
        sql: &str,
        params_list: I,
        timeout: Duration,
    ) -> rusqlite::Result<Option<usize>>
    where
        P: Params,
        I: IntoIterator<Item = P>,
    {
        self.with_connection(timeout, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut changed = 0;
            {
                let mut stmt = tx.prepare(sql)?;
                for params in params_list {
                    changed += stmt.execute(params)?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    /// Execute a list of `(sql, params)` statements atomically.
    ///
    /// Any failure rolls the whole list back.
    pub fn execute_transaction<S, P, I>(
        &self,
        statements: I,
        timeout: Duration,
    ) -> rusqlite::Result<Option<usize>>
    where
        S: AsRef<str>,
        P: Params,
        I: IntoIterator<Item = (S, P)>,
    {
        self.with_connection(timeout, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut changed = 0;
            for (sql, params) in statements {
                changed += tx.execute(sql.as_ref(), params)?;
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    /// Close every pooled connection and mark the pool uninitialized.
    ///
    /// Idempotent. Connections checked out at the time are closed when
    /// they come back. A later `acquire` re-initializes the pool.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        if !state.initialized {
            return;
        }
        let idle = std::mem::take(&mut state.idle);
        state.initialized = false;
        state.total = 0;
        state.generation += 1;
        drop(state);

        let mut closed = 0;
        for conn in idle {
            if close_connection(conn) {
                closed += 1;
            }
        }
        log::info!(
            "Closed {} connections from pool for {}",
            closed,
            self.db_path.display()
        );
        self.available.notify_all();
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("db_path", &self.db_path)
            .field("options", &self.options)
            .finish()
    }
}

fn close_connection(conn: Connection) -> bool {
    match conn.close() {
        Ok(()) => true,
        Err((_, e)) => {
            log::error!("Error closing connection: {}", e);
            false
        }
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Owned by exactly one thread until dropped; dropping it rolls back any
/// open transaction and returns the connection to the pool.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
    generation: u64,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn, self.generation);
        }
    }
}

/// Process-wide lookup of pools (and repository write gateways) by
/// database path.
///
/// Lifecycle: create with [`PoolRegistry::new`] (or use
/// [`PoolRegistry::global`]), hand it to repository constructors, and call
/// [`PoolRegistry::shutdown_all`] when the application tears down.
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<PathBuf, Arc<ConnectionPool>>>,
    gateways: Mutex<HashMap<PathBuf, Weak<AssetRepository>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The application-scoped registry.
    pub fn global() -> &'static PoolRegistry {
        static GLOBAL: OnceLock<PoolRegistry> = OnceLock::new();
        GLOBAL.get_or_init(PoolRegistry::new)
    }

    /// Get (creating if absent) the pool for `db_path` with `size` connections.
    pub fn get_pool(&self, db_path: &Path, size: usize) -> Arc<ConnectionPool> {
        self.get_pool_with_options(db_path, PoolOptions::default().with_size(size))
    }

    /// Get (creating if absent) the pool for `db_path`.
    ///
    /// `options` only apply when the pool is created; an existing pool is
    /// returned as-is.
    pub fn get_pool_with_options(&self, db_path: &Path, options: PoolOptions) -> Arc<ConnectionPool> {
        let key = canonical_db_path(db_path);
        let mut pools = self.lock_pools();
        pools
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ConnectionPool::new(key, options)))
            .clone()
    }

    pub fn pool_count(&self) -> usize {
        self.lock_pools().len()
    }

    /// Tracked write gateways. Entries of dropped repositories linger until
    /// the next repository open or [`shutdown_all`](Self::shutdown_all).
    pub fn gateway_count(&self) -> usize {
        self.lock_gateways().len()
    }

    /// Shut down every pool.
    ///
    /// A pool still held elsewhere (by a live repository or a caller) stays
    /// registered and re-initializes on its next acquire, so its path never
    /// gets a second pool. Pools nobody else holds are forgotten, as are
    /// gateways whose repository was dropped.
    pub fn shutdown_all(&self) {
        let pools: Vec<Arc<ConnectionPool>> = self.lock_pools().values().cloned().collect();
        for pool in &pools {
            pool.shutdown();
        }
        drop(pools);

        self.lock_pools().retain(|_, pool| Arc::strong_count(pool) > 1);
        self.lock_gateways().retain(|_, gateway| gateway.strong_count() > 0);
    }

    fn lock_pools(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<ConnectionPool>>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_gateways(&self) -> MutexGuard<'_, HashMap<PathBuf, Weak<AssetRepository>>> {
        self.gateways.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Canonical form of a database path, used as the registry key.
///
/// The file may not exist yet, so fall back to canonicalizing its parent
/// and finally to the plain absolute path.
pub fn canonical_db_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(parent) = parent.canonicalize() {
            return parent.join(name);
        }
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
