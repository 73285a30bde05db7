use std::collections::HashSet;
use std::time::Duration;

use asset_index_core::{AssetRow, FilterParams};
use asset_index_db::{AlbumScope, AssetRepository, CursorQuery, PoolOptions, PoolRegistry};
use asset_index_lib::*;
use tempfile::TempDir;

fn library(dir: &TempDir, registry: &PoolRegistry) -> std::sync::Arc<AssetRepository> {
    let repo = AssetRepository::open(registry, dir.path(), PoolOptions::default()).unwrap();
    let mut rows: Vec<AssetRow> = (0..120)
        .map(|i| AssetRow::new(format!("{i:03}.jpg")).with_ts_secs(i * 10))
        .collect();
    rows.extend(
        (0..40).map(|i| AssetRow::new(format!("Trips/{i:02}.jpg")).with_ts_secs(i * 10 + 5)),
    );
    repo.append_rows(&rows).unwrap();
    repo
}

fn quick_buffer() -> BufferConfig {
    BufferConfig {
        batch_size: 50,
        flush_interval: Duration::from_millis(1),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn library_and_album_merge_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = library(&dir, &registry);

    let sources = vec![
        CursorQuery::library(repo.clone(), FilterParams::new()),
        CursorQuery::new(repo.clone(), AlbumScope::album("Trips"), FilterParams::new()),
    ];
    let (buffer, rx) = spawn_stream_buffer(quick_buffer(), HashSet::new());
    let load = StreamLoader::new(sources).with_page_size(16).start(buffer);

    let mut rows = Vec::new();
    let mut finish = None;
    let summary = consume_load(load, rx, |delivery| match delivery {
        Delivery::Batch(batch) => {
            assert!(batch.len() <= 50);
            rows.extend(batch);
        }
        Delivery::Finished(event) => finish = Some(event),
    })
    .await
    .unwrap();

    // The album rows arrive twice from the merger and once from the buffer.
    assert_eq!(summary.rows, 200);
    assert_eq!(rows.len(), 160);
    assert_eq!(finish, Some(FinishEvent::Completed { rows: 200 }));
    assert!(rows.windows(2).all(|w| w[0].sort_key() > w[1].sort_key()));
    assert_eq!(rows[0].rel, "119.jpg");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rows_already_displayed_are_skipped() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = library(&dir, &registry);

    let shown: HashSet<String> = repo
        .read_all()
        .unwrap()
        .iter()
        .filter(|r| r.rel.starts_with("Trips/"))
        .filter_map(row_key)
        .collect();

    let sources = vec![CursorQuery::library(repo.clone(), FilterParams::new())];
    let (buffer, rx) = spawn_stream_buffer(quick_buffer(), shown);
    let load = StreamLoader::new(sources).start(buffer);

    let mut rels = Vec::new();
    consume_load(load, rx, |delivery| {
        if let Delivery::Batch(batch) = delivery {
            rels.extend(batch.into_iter().map(|r| r.rel));
        }
    })
    .await
    .unwrap();

    assert_eq!(rels.len(), 120);
    assert!(rels.iter().all(|rel| !rel.starts_with("Trips/")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn optimistic_move_then_repository_confirmation() {
    let dir = TempDir::new().unwrap();
    let registry = PoolRegistry::new();
    let repo = library(&dir, &registry);

    let mut list = AssetRowList::new();
    let first_page = repo
        .get_assets_page(None, 10, &AlbumScope::library(), &FilterParams::new())
        .unwrap();
    list.append_chunk(first_page);

    let mut otm = OptimisticTransactionManager::new(repo.root());
    let changed = otm.update_rows_for_move(
        &mut list,
        &["119.jpg", "118.jpg"],
        &repo.root().join("Archive"),
        true,
    );
    assert_eq!(changed.len(), 2);
    assert!(otm.has_pending_move_placeholders());

    // The background move reports where the files actually went.
    let results = vec![
        (repo.root().join("119.jpg"), repo.root().join("Archive/119.jpg")),
        (repo.root().join("118.jpg"), repo.root().join("Archive/118 (1).jpg")),
    ];
    let corrected = otm.finalise_move_results(&mut list, &results);
    assert_eq!(corrected.changed.len(), 1);
    assert!(corrected.removed.is_empty());
    assert!(!otm.has_pending_move_placeholders());

    assert_eq!(repo.apply_moves(&otm.confirmed_moves()).unwrap(), 2);
    assert!(repo.get_row("Archive/119.jpg").unwrap().is_some());
    assert!(repo.get_row("Archive/118 (1).jpg").unwrap().is_some());
    assert!(repo.get_row("119.jpg").unwrap().is_none());

    for row in list.rows() {
        let stored = repo.get_row(&row.rel).unwrap().unwrap();
        assert_eq!(stored.abs, row.abs);
    }
}
