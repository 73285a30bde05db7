//! Read queries: keyset pages, counts, and lookups.
//!
//! Every ordered read uses `ORDER BY ts DESC, id DESC, rel DESC`. SQLite
//! sorts NULL below every value, so rows without a capture time come last, matching
//! `SortKey`'s ordering.

use asset_index_core::util::normalize_rel;
use asset_index_core::{AssetRow, Cursor, FilterParams, LiveRole, MediaKind};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

/// Columns read by [`row_to_asset`], in order.
const ASSET_COLUMNS: &str = "rel, id, dt, ts, bytes, w, h, mime, media_type, is_favorite,
     location, content_id, live_partner_rel, live_role, extra_json";

/// Which part of the index a read covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlbumScope {
    /// `None` reads the whole library; `Some("")` only the root album.
    pub album_path: Option<String>,
    pub include_subalbums: bool,
    /// Drop hidden live-photo companions.
    pub filter_hidden: bool,
}

impl AlbumScope {
    /// The whole library, companions hidden.
    pub fn library() -> Self {
        Self {
            album_path: None,
            include_subalbums: true,
            filter_hidden: true,
        }
    }

    /// One album and everything below it, companions hidden.
    pub fn album(path: &str) -> Self {
        Self {
            album_path: Some(normalize_rel(path)),
            include_subalbums: true,
            filter_hidden: true,
        }
    }

    pub fn without_subalbums(mut self) -> Self {
        self.include_subalbums = false;
        self
    }
}

/// A WHERE clause under construction with anonymous `?` parameters.
#[derive(Default)]
struct WhereClause {
    terms: Vec<String>,
    params: Vec<Value>,
}

impl WhereClause {
    fn push(&mut self, term: &str, params: impl IntoIterator<Item = Value>) {
        self.terms.push(term.to_string());
        self.params.extend(params);
    }

    fn scope(&mut self, scope: &AlbumScope) {
        if let Some(album) = &scope.album_path {
            let album = normalize_rel(album);
            if album.is_empty() {
                if !scope.include_subalbums {
                    self.push("parent_album_path = ''", []);
                }
            } else if scope.include_subalbums {
                let prefix = format!("{album}/");
                self.push(
                    "(parent_album_path = ? OR substr(parent_album_path, 1, ?) = ?)",
                    [
                        Value::Text(album),
                        Value::Integer(prefix.chars().count() as i64),
                        Value::Text(prefix),
                    ],
                );
            } else {
                self.push("parent_album_path = ?", [Value::Text(album)]);
            }
        }
        if scope.filter_hidden {
            self.push("live_role = ?", [Value::Integer(LiveRole::Primary.as_i64())]);
        }
    }

    fn filter(&mut self, filter: &FilterParams) {
        if let Some(kind) = filter.media_type {
            self.push("media_type = ?", [Value::Integer(kind.as_i64())]);
        }
        if filter.live_only {
            self.push("live_partner_rel IS NOT NULL", []);
        }
        if filter.favorites_only {
            self.push("is_favorite = 1", []);
        }
        if let Some(location) = &filter.location {
            self.push("location = ?", [Value::Text(location.clone())]);
        }
        match filter.has_location {
            Some(true) => self.push("(location IS NOT NULL AND location != '')", []),
            Some(false) => self.push("(location IS NULL OR location = '')", []),
            None => {}
        }
        if filter.exclude_hidden {
            self.push("live_role = ?", [Value::Integer(LiveRole::Primary.as_i64())]);
        }
    }

    /// Keep only rows strictly after `cursor` in newest-first order.
    fn after(&mut self, cursor: &Cursor, sort_by_date: bool) {
        const ID_TIE: &str = "(id < ? OR (id = ? AND rel < ?))";
        let id = Value::Text(cursor.id.clone());
        let tie = [id.clone(), id, Value::Text(cursor.rel.clone())];
        if !sort_by_date {
            self.push(ID_TIE, tie);
            return;
        }
        match cursor.ts {
            Some(ts) => self.push(
                &format!("(ts < ? OR (ts = ? AND {ID_TIE}) OR ts IS NULL)"),
                [Value::Integer(ts), Value::Integer(ts)].into_iter().chain(tie),
            ),
            None => self.push(&format!("(ts IS NULL AND {ID_TIE})"), tie),
        }
    }

    fn sql(&self) -> String {
        if self.terms.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.terms.join(" AND "))
        }
    }
}

/// Map a row selected with [`ASSET_COLUMNS`].
pub fn row_to_asset(row: &Row<'_>) -> rusqlite::Result<AssetRow> {
    let extra_json: Option<String> = row.get(14)?;
    let extra = match extra_json {
        Some(json) => serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(14, rusqlite::types::Type::Text, Box::new(e))
        })?,
        None => Default::default(),
    };
    Ok(AssetRow {
        rel: row.get(0)?,
        abs: None,
        id: row.get(1)?,
        dt: row.get(2)?,
        ts: row.get(3)?,
        bytes: row.get(4)?,
        w: row.get(5)?,
        h: row.get(6)?,
        mime: row.get(7)?,
        media_type: MediaKind::from_i64(row.get(8)?),
        is_favorite: row.get::<_, i64>(9)? != 0,
        featured: false,
        location: row.get(10)?,
        content_id: row.get(11)?,
        live_partner_rel: row.get(12)?,
        live_role: LiveRole::from_i64(row.get(13)?),
        extra,
    })
}

/// Up to `limit` rows strictly after `cursor`, newest first.
///
/// Scope and filter predicates are part of the same query, so `limit`
/// always counts post-filter rows. With `sort_by_date == false` rows are
/// ordered by `id`, then `rel`.
pub fn assets_page(
    conn: &Connection,
    scope: &AlbumScope,
    filter: &FilterParams,
    cursor: Option<&Cursor>,
    limit: usize,
    sort_by_date: bool,
) -> rusqlite::Result<Vec<AssetRow>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let mut clause = WhereClause::default();
    clause.scope(scope);
    clause.filter(filter);
    if let Some(cursor) = cursor {
        clause.after(cursor, sort_by_date);
    }
    let order = if sort_by_date {
        "ts DESC, id DESC, rel DESC"
    } else {
        "id DESC, rel DESC"
    };
    let sql = format!(
        "SELECT {ASSET_COLUMNS} FROM assets{} ORDER BY {order} LIMIT ?",
        clause.sql()
    );

    let mut params = clause.params;
    params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), row_to_asset)?;
    rows.collect()
}

/// Number of rows matching `scope` and `filter`.
pub fn count_assets(
    conn: &Connection,
    scope: &AlbumScope,
    filter: &FilterParams,
) -> rusqlite::Result<u64> {
    let mut clause = WhereClause::default();
    clause.scope(scope);
    clause.filter(filter);
    let sql = format!("SELECT COUNT(*) FROM assets{}", clause.sql());
    let count: i64 = conn.query_row(&sql, params_from_iter(clause.params), |row| row.get(0))?;
    Ok(count as u64)
}

/// Every row, ordered by `rel`.
pub fn read_all(conn: &Connection) -> rusqlite::Result<Vec<AssetRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {ASSET_COLUMNS} FROM assets ORDER BY rel"))?;
    let rows = stmt.query_map([], row_to_asset)?;
    rows.collect()
}

/// Look up one row by `rel`.
pub fn get_row(conn: &Connection, rel: &str) -> rusqlite::Result<Option<AssetRow>> {
    conn.query_row(
        &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE rel = ?1"),
        [normalize_rel(rel)],
        row_to_asset,
    )
    .optional()
}

/// `rel` of every favorite, ordered by `rel`.
pub fn favorite_rels(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT rel FROM assets WHERE is_favorite = 1 ORDER BY rel")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

