//! Write operations on the `assets` table.
//!
//! All functions take a plain `&Connection` so they compose inside a
//! caller-owned transaction. [`crate::AssetRepository`] is the only caller
//! outside of tests, and it serializes every call through its write path.

use std::collections::HashSet;

use asset_index_core::util::{normalize_rel, parent_album_path};
use asset_index_core::{AssetRow, RowError};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed row: {0}")]
    Malformed(#[from] RowError),
    #[error("Asset not found: '{rel}'")]
    NotFound { rel: String },
    #[error("Cannot move '{from}' to '{to}': destination is already indexed")]
    Collision { from: String, to: String },
}

// ── Append ──────────────────────────────────────────────────────────────────

/// Upsert keyed by `rel`.
///
/// `dt`, `ts` and `bytes` only move forward: an incoming row whose capture
/// time is older than the stored one (or missing while the stored one is
/// set) leaves them alone. Descriptive fields take the incoming value when
/// it is present. `is_favorite` is sticky; only [`sync_favorites`] and
/// [`set_favorite`] clear it.
const UPSERT_SQL: &str = "INSERT INTO assets (
         rel, id, dt, ts, bytes, w, h, mime, media_type, is_favorite,
         location, content_id, live_partner_rel, live_role, parent_album_path,
         extra_json, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, datetime('now'))
     ON CONFLICT(rel) DO UPDATE SET
         id = excluded.id,
         dt = CASE
             WHEN excluded.ts IS NULL AND assets.ts IS NOT NULL THEN assets.dt
             WHEN excluded.ts < assets.ts THEN assets.dt
             ELSE COALESCE(excluded.dt, assets.dt) END,
         bytes = CASE
             WHEN excluded.ts IS NULL AND assets.ts IS NOT NULL THEN assets.bytes
             WHEN excluded.ts < assets.ts THEN assets.bytes
             ELSE COALESCE(excluded.bytes, assets.bytes) END,
         ts = CASE
             WHEN excluded.ts IS NULL THEN assets.ts
             WHEN assets.ts IS NULL OR excluded.ts >= assets.ts THEN excluded.ts
             ELSE assets.ts END,
         w = COALESCE(excluded.w, assets.w),
         h = COALESCE(excluded.h, assets.h),
         mime = COALESCE(excluded.mime, assets.mime),
         media_type = excluded.media_type,
         is_favorite = MAX(assets.is_favorite, excluded.is_favorite),
         location = COALESCE(excluded.location, assets.location),
         content_id = COALESCE(excluded.content_id, assets.content_id),
         live_partner_rel = COALESCE(excluded.live_partner_rel, assets.live_partner_rel),
         live_role = excluded.live_role,
         parent_album_path = excluded.parent_album_path,
         extra_json = CASE
             WHEN assets.extra_json IS NULL THEN excluded.extra_json
             WHEN excluded.extra_json IS NULL THEN assets.extra_json
             ELSE json_patch(assets.extra_json, excluded.extra_json) END,
         updated_at = datetime('now')";

/// Insert or update one row.
pub fn upsert_asset(conn: &Connection, row: &AssetRow) -> Result<(), OperationError> {
    let rel = normalize_rel(&row.rel);
    if rel.is_empty() {
        return Err(RowError::MissingKey.into());
    }
    let id = if row.id.is_empty() { rel.as_str() } else { row.id.as_str() };
    let extra_json = if row.extra.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&row.extra)?)
    };

    conn.execute(
        UPSERT_SQL,
        params![
            rel,
            id,
            row.dt,
            row.timestamp(),
            row.bytes,
            row.w,
            row.h,
            row.mime,
            row.media_type.as_i64(),
            row.is_favorite as i64,
            row.location,
            row.content_id,
            row.live_partner_rel.as_deref().map(normalize_rel),
            row.live_role.as_i64(),
            parent_album_path(&rel),
            extra_json,
        ],
    )?;
    Ok(())
}

/// Upsert a batch of rows and return how many were written.
///
/// Rows without a `rel` are skipped with a warning instead of failing the
/// whole batch. An empty batch touches nothing.
pub fn append_rows(conn: &Connection, rows: &[AssetRow]) -> Result<usize, OperationError> {
    let mut written = 0;
    for row in rows {
        match upsert_asset(conn, row) {
            Ok(()) => written += 1,
            Err(OperationError::Malformed(e)) => {
                log::warn!("Skipping malformed row (id '{}'): {}", row.id, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

// ── Favorites ───────────────────────────────────────────────────────────────

/// Make the favorite set exactly `target_rels`.
///
/// Only rows whose flag actually changes are written. Returns the number of
/// rows changed. Target paths that are not indexed are ignored.
pub fn sync_favorites<S: AsRef<str>>(
    conn: &Connection,
    target_rels: &[S],
) -> Result<usize, OperationError> {
    let target: HashSet<String> = target_rels
        .iter()
        .map(|rel| normalize_rel(rel.as_ref()))
        .filter(|rel| !rel.is_empty())
        .collect();
    let current: HashSet<String> = crate::queries::favorite_rels(conn)?.into_iter().collect();

    let mut changed = 0;
    {
        let mut clear = conn.prepare("UPDATE assets SET is_favorite = 0 WHERE rel = ?1")?;
        for rel in current.difference(&target) {
            changed += clear.execute([rel])?;
        }
    }
    {
        let mut set = conn
            .prepare("UPDATE assets SET is_favorite = 1 WHERE rel = ?1 AND is_favorite = 0")?;
        for rel in target.difference(&current) {
            changed += set.execute([rel])?;
        }
    }
    log::debug!(
        "Favorites synced: {} target, {} previously, {} changed",
        target.len(),
        current.len(),
        changed
    );
    Ok(changed)
}

/// Set the favorite flag on one row.
pub fn set_favorite(conn: &Connection, rel: &str, favorite: bool) -> Result<(), OperationError> {
    let rel = normalize_rel(rel);
    let updated = conn.execute(
        "UPDATE assets SET is_favorite = ?1, updated_at = datetime('now') WHERE rel = ?2",
        params![favorite as i64, rel],
    )?;
    if updated == 0 {
        return Err(OperationError::NotFound { rel });
    }
    Ok(())
}

// ── Removal and moves ───────────────────────────────────────────────────────

/// Delete rows by `rel`. Unknown paths are ignored. Returns rows deleted.
pub fn remove_rows<S: AsRef<str>>(conn: &Connection, rels: &[S]) -> Result<usize, OperationError> {
    let mut stmt = conn.prepare("DELETE FROM assets WHERE rel = ?1")?;
    let mut removed = 0;
    for rel in rels {
        removed += stmt.execute([normalize_rel(rel.as_ref())])?;
    }
    if removed > 0 {
        // Drop dangling live-photo links to rows that no longer exist.
        conn.execute(
            "UPDATE assets SET live_partner_rel = NULL
             WHERE live_partner_rel IS NOT NULL
               AND live_partner_rel NOT IN (SELECT rel FROM assets)",
            [],
        )?;
    }
    Ok(removed)
}

/// Re-key rows after files moved on disk, given `(old_rel, new_rel)` pairs.
///
/// A row whose `id` defaulted to its `rel` follows the new path. Live-photo
/// partner links are rewritten to match. Fails without partial effects
/// (when run inside a transaction) if a destination is already indexed.
pub fn apply_moves(conn: &Connection, moves: &[(String, String)]) -> Result<usize, OperationError> {
    let mut moved = 0;
    for (from, to) in moves {
        let from = normalize_rel(from);
        let to = normalize_rel(to);
        if from == to {
            continue;
        }

        let existing: Option<String> = conn
            .query_row("SELECT id FROM assets WHERE rel = ?1", [&from], |row| row.get(0))
            .optional()?;
        let Some(id) = existing else {
            return Err(OperationError::NotFound { rel: from });
        };
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM assets WHERE rel = ?1)",
            [&to],
            |row| row.get(0),
        )?;
        if taken {
            return Err(OperationError::Collision { from, to });
        }

        let new_id = if id == from { to.clone() } else { id };
        conn.execute(
            "UPDATE assets SET rel = ?1, id = ?2, parent_album_path = ?3, updated_at = datetime('now')
             WHERE rel = ?4",
            params![to, new_id, parent_album_path(&to), from],
        )?;
        conn.execute(
            "UPDATE assets SET live_partner_rel = ?1 WHERE live_partner_rel = ?2",
            params![to, from],
        )?;
        moved += 1;
    }
    Ok(moved)
}
