use std::collections::HashSet;
use std::sync::Arc;

use asset_index_core::{AssetRow, FilterParams, PagedSource};
use asset_index_db::*;
use tempfile::TempDir;

fn repo_with(dir: &TempDir, rows: &[AssetRow]) -> Arc<AssetRepository> {
    let registry = PoolRegistry::new();
    let repo = AssetRepository::open(&registry, dir.path(), PoolOptions::default()).unwrap();
    repo.append_rows(rows).unwrap();
    repo
}

fn numbered(n: i64) -> Vec<AssetRow> {
    (0..n)
        .map(|i| {
            let row = AssetRow::new(format!("{i:03}.jpg"));
            // Every fifth row has no timestamp at all.
            if i % 5 == 0 { row } else { row.with_ts_secs(i / 3) }
        })
        .collect()
}

fn drain(query: &mut CursorQuery, limit: usize) -> Vec<AssetRow> {
    let mut out = Vec::new();
    loop {
        let page = query.fetch_page(limit, None).unwrap();
        let terminal = page.is_terminal();
        out.extend(page.rows);
        if terminal {
            return out;
        }
    }
}

#[test]
fn pages_cover_every_row_exactly_once() {
    let dir = TempDir::new().unwrap();
    let repo = repo_with(&dir, &numbered(47));
    let mut query = CursorQuery::library(repo, FilterParams::new());

    let rows = drain(&mut query, 6);
    assert_eq!(rows.len(), 47);
    let unique: HashSet<&str> = rows.iter().map(|r| r.rel.as_str()).collect();
    assert_eq!(unique.len(), 47);

    let keys: Vec<_> = rows.iter().map(AssetRow::sort_key).collect();
    assert!(keys.windows(2).all(|w| w[0] > w[1]), "not strictly newest-first");
    // Rows without a timestamp trail the dated ones.
    assert!(rows[..37].iter().all(|r| r.ts.is_some()));
    assert!(rows[37..].iter().all(|r| r.ts.is_none()));
}

#[test]
fn short_page_is_terminal() {
    let dir = TempDir::new().unwrap();
    let repo = repo_with(&dir, &numbered(5));
    let mut query = CursorQuery::library(repo, FilterParams::new());

    let page = query.fetch_page(10, None).unwrap();
    assert_eq!(page.rows.len(), 5);
    assert!(page.next_cursor.is_none());
    assert!(query.exhausted());

    // An exhausted query keeps answering with empty terminal pages.
    let again = query.fetch_page(10, None).unwrap();
    assert!(again.rows.is_empty());
    assert!(again.is_terminal());
}

#[test]
fn full_page_then_empty_terminal_page() {
    let dir = TempDir::new().unwrap();
    let repo = repo_with(&dir, &numbered(4));
    let mut query = CursorQuery::library(repo, FilterParams::new());

    let page = query.fetch_page(4, None).unwrap();
    assert_eq!(page.rows.len(), 4);
    assert!(page.next_cursor.is_some());

    let last = query.fetch_page(4, None).unwrap();
    assert!(last.rows.is_empty());
    assert!(last.next_cursor.is_none());
}

#[test]
fn explicit_cursor_overrides_position() {
    let dir = TempDir::new().unwrap();
    let repo = repo_with(&dir, &numbered(20));
    let mut query = CursorQuery::library(repo, FilterParams::new());

    let first = query.fetch_page(3, None).unwrap();
    let resume = first.next_cursor.clone().unwrap();
    query.fetch_page(3, None).unwrap();

    let replay = query.fetch_page(3, Some(&resume)).unwrap();
    let second_again = replay.rows[0].sort_key();
    assert!(second_again < resume);
    assert_eq!(query.cursor(), replay.next_cursor.as_ref());
}

#[test]
fn reset_rewinds_to_newest() {
    let dir = TempDir::new().unwrap();
    let repo = repo_with(&dir, &numbered(8));
    let mut query = CursorQuery::library(repo, FilterParams::new());

    let first = drain(&mut query, 3);
    assert!(query.exhausted());
    query.reset();
    assert!(!query.exhausted());
    assert!(query.cursor().is_none());
    assert_eq!(drain(&mut query, 3), first);
}

#[test]
fn album_query_counts_match() {
    let dir = TempDir::new().unwrap();
    let mut rows = numbered(10);
    rows.extend((0..7).map(|i| AssetRow::new(format!("Trips/{i}.jpg")).with_ts_secs(100 + i)));
    let repo = repo_with(&dir, &rows);

    let mut album = CursorQuery::new(repo, AlbumScope::album("Trips"), FilterParams::new());
    assert_eq!(album.count().unwrap(), 7);
    let rows = drain(&mut album, 2);
    assert_eq!(rows.len(), 7);
    assert!(rows.iter().all(|r| r.rel.starts_with("Trips/")));
}

#[test]
fn zero_limit_keeps_position() {
    let dir = TempDir::new().unwrap();
    let repo = repo_with(&dir, &numbered(6));
    let mut query = CursorQuery::library(repo, FilterParams::new());
    query.fetch_page(2, None).unwrap();
    let before = query.cursor().cloned();

    let page = query.fetch_page(0, None).unwrap();
    assert!(page.rows.is_empty());
    assert_eq!(page.next_cursor, before);
    assert_eq!(query.cursor().cloned(), before);
}
