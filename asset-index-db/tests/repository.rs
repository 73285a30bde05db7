use std::sync::Arc;
use std::thread;
use std::time::Duration;

use asset_index_core::{AssetRow, FilterParams, SortKey};
use asset_index_db::*;
use tempfile::TempDir;

fn open(registry: &PoolRegistry, dir: &TempDir) -> Arc<AssetRepository> {
    AssetRepository::open(registry, dir.path(), PoolOptions::default()).unwrap()
}

fn photo(rel: &str, secs: i64) -> AssetRow {
    AssetRow::new(rel).with_ts_secs(secs)
}

#[test]
fn open_creates_index_database() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = open(&registry, &dir);
    assert!(dir.path().join(INDEX_DIR).join(INDEX_DB_NAME).exists());
    assert_eq!(repo.db_path(), canonical_db_path(&index_db_path(dir.path())));
}

#[test]
fn second_gateway_is_rejected_while_first_is_alive() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let first = open(&registry, &dir);

    let second = AssetRepository::open(&registry, dir.path(), PoolOptions::default());
    assert!(matches!(
        second,
        Err(RepositoryError::DuplicateWriteGateway { .. })
    ));

    // The registry accessor hands back the existing gateway instead.
    let shared = registry.repository(dir.path(), PoolOptions::default()).unwrap();
    assert!(Arc::ptr_eq(&first, &shared));

    drop(first);
    drop(shared);
    assert!(AssetRepository::open(&registry, dir.path(), PoolOptions::default()).is_ok());
}

#[test]
fn gateway_and_pool_share_one_registry_entry() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = open(&registry, &dir);
    let pool = registry.get_pool(repo.db_path(), 1);
    assert!(Arc::ptr_eq(repo.pool(), &pool));
    assert_eq!(registry.pool_count(), 1);
}

#[test]
fn shutdown_keeps_gateway_on_its_pool() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = open(&registry, &dir);
    repo.append_rows(&[photo("a.jpg", 1)]).unwrap();

    registry.shutdown_all();
    assert!(!repo.pool().is_initialized());

    let again = registry.repository(dir.path(), PoolOptions::default()).unwrap();
    assert!(Arc::ptr_eq(&repo, &again));
    let pool = registry.get_pool(repo.db_path(), 5);
    assert!(Arc::ptr_eq(repo.pool(), &pool));
    assert_eq!(registry.pool_count(), 1);

    // The pool re-initializes on the next read.
    assert!(repo.get_row("a.jpg").unwrap().is_some());
    assert!(repo.pool().is_initialized());
}

#[test]
fn dropped_gateways_are_pruned() {
    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();

    drop(open(&registry, &first_dir));
    assert_eq!(registry.gateway_count(), 1);
    let second = open(&registry, &second_dir);
    assert_eq!(registry.gateway_count(), 1);

    drop(second);
    registry.shutdown_all();
    assert_eq!(registry.gateway_count(), 0);
}

#[test]
fn reads_fill_absolute_paths() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = open(&registry, &dir);
    repo.append_rows(&[photo("Trips/a.jpg", 1)]).unwrap();

    let row = repo.get_row("Trips/a.jpg").unwrap().unwrap();
    assert_eq!(row.abs, Some(repo.root().join("Trips/a.jpg")));

    let page = repo
        .get_assets_page(None, 10, &AlbumScope::album("Trips"), &FilterParams::new())
        .unwrap();
    assert_eq!(page[0].rel, "Trips/a.jpg");
    assert_eq!(page[0].abs, Some(repo.root().join("Trips/a.jpg")));
}

#[test]
fn append_is_idempotent_through_repository() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = open(&registry, &dir);
    let rows: Vec<AssetRow> = (0..50).map(|i| photo(&format!("{i}.jpg"), i)).collect();

    repo.append_rows(&rows).unwrap();
    let once = repo.read_all().unwrap();
    repo.append_rows(&rows).unwrap();

    assert_eq!(repo.read_all().unwrap(), once);
    assert_eq!(
        repo.count(&AlbumScope::library(), &FilterParams::new()).unwrap(),
        50
    );
    assert_eq!(repo.append_rows(&[]).unwrap(), 0);
}

#[test]
fn read_geometry_page_applies_filter_first() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = open(&registry, &dir);
    let rows: Vec<AssetRow> = (0..10)
        .map(|i| photo(&format!("{i}.jpg"), i).with_favorite(i % 2 == 1))
        .collect();
    repo.append_rows(&rows).unwrap();

    let page = repo
        .read_geometry_page(2, None, &FilterParams::favorites(), true)
        .unwrap();
    let rels: Vec<&str> = page.iter().map(|r| r.rel.as_str()).collect();
    assert_eq!(rels, vec!["9.jpg", "7.jpg"]);

    let cursor = SortKey::new(Some(7_000_000), "7.jpg");
    let page = repo
        .read_geometry_page(10, Some(&cursor), &FilterParams::favorites(), true)
        .unwrap();
    let rels: Vec<&str> = page.iter().map(|r| r.rel.as_str()).collect();
    assert_eq!(rels, vec!["5.jpg", "3.jpg", "1.jpg"]);
}

#[test]
fn favorites_round_trip() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = open(&registry, &dir);
    repo.append_rows(&[photo("a.jpg", 1), photo("b.jpg", 2), photo("c.jpg", 3)])
        .unwrap();

    repo.sync_favorites(&["a.jpg", "b.jpg"]).unwrap();
    assert_eq!(repo.read_favorites().unwrap(), vec!["a.jpg", "b.jpg"]);

    repo.sync_favorites(&["a.jpg"]).unwrap();
    assert_eq!(repo.read_favorites().unwrap(), vec!["a.jpg"]);

    repo.set_favorite("c.jpg", true).unwrap();
    assert_eq!(repo.read_favorites().unwrap(), vec!["a.jpg", "c.jpg"]);
}

#[test]
fn failed_move_leaves_database_unchanged() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = open(&registry, &dir);
    repo.append_rows(&[photo("a.jpg", 1), photo("b.jpg", 2), photo("c.jpg", 3)])
        .unwrap();

    // The first move is valid, the second collides; neither may stick.
    let moves = vec![
        ("a.jpg".to_string(), "Trips/a.jpg".to_string()),
        ("b.jpg".to_string(), "c.jpg".to_string()),
    ];
    let err = repo.apply_moves(&moves).unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Operation(OperationError::Collision { .. })
    ));
    assert!(!err.is_retryable());
    assert!(repo.get_row("a.jpg").unwrap().is_some());
    assert!(repo.get_row("Trips/a.jpg").unwrap().is_none());
}

#[test]
fn exhausted_pool_is_a_retryable_error() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let options = PoolOptions::default()
        .with_size(1)
        .with_acquire_timeout(Duration::from_millis(20));
    let repo = AssetRepository::open(&registry, dir.path(), options).unwrap();

    let _held = repo.pool().acquire(Duration::from_millis(20)).unwrap();
    let err = repo.append_rows(&[photo("a.jpg", 1)]).unwrap_err();
    assert!(matches!(err, RepositoryError::PoolExhausted { .. }));
    assert!(err.is_retryable());
}

#[test]
fn concurrent_appends_serialize() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = open(&registry, &dir);

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                for batch in 0..5 {
                    let rows: Vec<AssetRow> = (0..10)
                        .map(|i| photo(&format!("w{w}/b{batch}/{i}.jpg"), i))
                        .collect();
                    repo.append_rows(&rows).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(
        repo.count(&AlbumScope::default(), &FilterParams::new()).unwrap(),
        200
    );
}

#[test]
fn pool_survives_shutdown() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = open(&registry, &dir);
    repo.append_rows(&[photo("a.jpg", 1)]).unwrap();

    repo.pool().shutdown();
    assert!(!repo.pool().is_initialized());
    assert_eq!(repo.read_all().unwrap().len(), 1);
}
