//! SQLite schema creation and migration.

use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: expected version {expected}, found {found}")]
    VersionMismatch { expected: i32, found: i32 },
}

/// Current schema version. Increment when adding migrations.
pub const CURRENT_VERSION: i32 = 2;

/// Create all tables and indexes if they don't exist.
///
/// Idempotent: safe to call on an existing database.
pub fn create_schema(conn: &Connection) -> Result<(), SchemaError> {
    conn.execute_batch(SCHEMA_SQL)?;
    set_schema_version(conn, CURRENT_VERSION)?;
    Ok(())
}

/// Bring a freshly opened index database up to [`CURRENT_VERSION`].
pub fn ensure_schema(conn: &Connection) -> Result<(), SchemaError> {
    let version = get_schema_version(conn)?;
    if version == 0 {
        create_schema(conn)?;
    } else if version != CURRENT_VERSION {
        migrate(conn, version)?;
    }
    Ok(())
}

/// Open an in-memory database with the full schema. Useful for testing.
pub fn open_memory() -> Result<Connection, SchemaError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Get the current schema version, or 0 if no schema exists.
pub fn get_schema_version(conn: &Connection) -> Result<i32, SchemaError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), SchemaError> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Run migrations from `from_version` up to `CURRENT_VERSION`.
fn migrate(conn: &Connection, from_version: i32) -> Result<(), SchemaError> {
    if from_version > CURRENT_VERSION {
        return Err(SchemaError::VersionMismatch {
            expected: CURRENT_VERSION,
            found: from_version,
        });
    }

    let mut version = from_version;
    while version < CURRENT_VERSION {
        if version == 1 {
            conn.execute_batch(
                "ALTER TABLE assets ADD COLUMN extra_json TEXT;
                 CREATE INDEX IF NOT EXISTS idx_assets_content_id ON assets(content_id);",
            )?;
        }
        version += 1;
        set_schema_version(conn, version)?;
        log::info!("Migrated index schema to version {}", version);
    }

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per media item, keyed by its path relative to the index root.
-- ts is the normalized capture time (epoch microseconds); NULL sorts last
-- in the descending (ts, id) order every page query uses.
CREATE TABLE IF NOT EXISTS assets (
    rel TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    dt TEXT,
    ts INTEGER,
    bytes INTEGER,
    w INTEGER,
    h INTEGER,
    mime TEXT,
    media_type INTEGER NOT NULL DEFAULT 0,
    is_favorite INTEGER NOT NULL DEFAULT 0,
    location TEXT,
    content_id TEXT,
    live_partner_rel TEXT,
    live_role INTEGER NOT NULL DEFAULT 0,
    parent_album_path TEXT NOT NULL DEFAULT '',
    extra_json TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_assets_order ON assets(ts DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_assets_album ON assets(parent_album_path);
CREATE INDEX IF NOT EXISTS idx_assets_favorite ON assets(is_favorite);
CREATE INDEX IF NOT EXISTS idx_assets_content_id ON assets(content_id);
"#;
