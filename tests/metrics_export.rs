#![cfg(feature = "inmem-store")]

// Installs the global recorder, so this lives in its own test binary.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use textboard::gate::Visitor;
use textboard::metrics::POSTS_CREATED;
use textboard::repo::inmem::InMemRepo;
use textboard::storage::FsMediaStore;
use textboard::word_filter::WordFilterStore;
use textboard::{Board, BoardConfig, Submission};

#[tokio::test]
async fn created_posts_reach_the_prometheus_exporter() {
    let handle = PrometheusBuilder::new().install_recorder().unwrap();
    textboard::metrics::setup(None).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cfg = BoardConfig {
        anti_spam_secs: 0,
        word_filter_path: dir.path().join("word_filters.json"),
        media_dir: dir.path().join("uploads"),
        ..Default::default()
    };
    let media = FsMediaStore::new(&cfg.media_dir, cfg.max_upload_bytes).await.unwrap();
    let board = Board::new(
        Arc::new(InMemRepo::ephemeral()),
        Arc::new(media),
        WordFilterStore::load(&cfg.word_filter_path),
        &cfg,
    );
    board.create_thread(&Visitor::new("addr:test"), Submission::new("counted")).await.unwrap();

    let rendered = handle.render();
    let name = POSTS_CREATED.replace('.', "_");
    let line = rendered
        .lines()
        .find(|l| l.starts_with(&name) && l.contains("kind=\"thread\""))
        .unwrap_or_else(|| panic!("no {name} sample in:\n{rendered}"));
    assert!(line.ends_with(" 1"), "{line}");
}
