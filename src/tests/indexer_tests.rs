//! Indexer pipeline scenarios: skip gates, drop handling, atomic per-file
//! replacement, delete fidelity, and batch failure deferral.

use super::helpers::{create_go_fixture_files, MockEmbedder, MockVectorStore};
use crate::chunker::Chunker;
use crate::indexer::{Indexer, IndexerOptions, RetryPolicy, Stats};
use crate::scanner::{IgnoreMatcher, Scanner};
use crate::store::{Document, VectorStore};
use crate::trace::{BinarySymbolStore, RegexExtractor, SymbolStore};
use crate::watcher::{EventType, FileEvent};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn scanner_for(dir: &TempDir) -> Arc<Scanner> {
    let matcher = IgnoreMatcher::new(dir.path(), &[]).unwrap();
    Arc::new(Scanner::new(dir.path(), matcher))
}

fn indexer_for(
    dir: &TempDir,
    store: Arc<MockVectorStore>,
    embedder: Arc<MockEmbedder>,
    last_index_time: Option<u64>,
) -> Indexer {
    Indexer::new(
        store,
        embedder,
        Chunker::new(512, 50),
        scanner_for(dir),
        last_index_time,
    )
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[tokio::test]
async fn test_branch_switch_skips_bulk_without_lookup_or_embedding() {
    let dir = TempDir::new().unwrap();
    create_go_fixture_files(dir.path(), 200);

    let store = Arc::new(MockVectorStore::new());
    // Seed documents with chunk IDs so the time gate may skip them. The
    // gate requires a non-empty chunk list, not just a document.
    for i in 0..200 {
        store.seed_document(Document {
            path: format!("file_{:04}.go", i),
            hash: "seeded".to_string(),
            mod_time: 0,
            chunk_ids: vec!["c1".to_string()],
        });
    }
    let embedder = Arc::new(MockEmbedder::new(8));

    // Simulate a watcher restart after the latest changes: every fixture
    // file is older than the cutoff.
    let cutoff = now_secs() + 3600;
    let indexer = indexer_for(&dir, store.clone(), embedder.clone(), Some(cutoff));

    let stats = indexer
        .index_all_with_progress(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.files_indexed, 0);
    assert_eq!(stats.chunks_created, 0);
    assert!(
        stats.files_skipped >= 200,
        "expected at least 200 skipped, got {}",
        stats.files_skipped
    );
    assert!(
        store.list_documents_called.load(Ordering::SeqCst),
        "expected one bulk ListDocuments call"
    );
    assert!(
        !embedder.was_called(),
        "embedder must not be called when every file is skipped"
    );
}

#[tokio::test]
async fn test_binary_file_skipped_after_metadata_pass() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("binary.go"), b"package main\x00").unwrap();

    let store = Arc::new(MockVectorStore::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let indexer = indexer_for(&dir, store.clone(), embedder.clone(), None);

    let stats = indexer
        .index_all_with_progress(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.files_indexed, 0);
    assert_eq!(stats.files_skipped, 1);
    assert!(store.list_documents_called.load(Ordering::SeqCst));
    assert!(!embedder.was_called(), "binary files must never reach the embedder");
}

#[tokio::test]
async fn test_full_pass_indexes_and_reindex_is_idempotent() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("main.go"),
        "package main\n\nfunc main() {\n\tprintln(\"hi\")\n}\n",
    )
    .unwrap();

    let store = Arc::new(MockVectorStore::new());
    let embedder = Arc::new(MockEmbedder::new(8));

    let first = indexer_for(&dir, store.clone(), embedder.clone(), None)
        .index_all_with_progress(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.files_indexed, 1);
    assert!(first.snapshot);
    assert!(first.chunks_created >= 1);

    let ids_before: Vec<String> = {
        let mut chunks = store.get_chunks_for_file("main.go").await.unwrap();
        chunks.sort_by_key(|c| c.start_line);
        chunks.iter().map(|c| c.id.clone()).collect()
    };
    let calls_before = embedder.batch_calls.load(Ordering::SeqCst);

    // Unchanged content: the hash gate skips, no further embedding.
    let second = indexer_for(&dir, store.clone(), embedder.clone(), None)
        .index_all_with_progress(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_skipped, 1);
    assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), calls_before);

    let ids_after: Vec<String> = {
        let mut chunks = store.get_chunks_for_file("main.go").await.unwrap();
        chunks.sort_by_key(|c| c.start_line);
        chunks.iter().map(|c| c.id.clone()).collect()
    };
    assert_eq!(ids_before, ids_after, "re-indexing must not change chunk IDs");
}

#[tokio::test]
async fn test_empty_chunk_list_defeats_the_time_gate() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("partial.go"), "package main\n\nfunc f() {}\n").unwrap();

    let store = Arc::new(MockVectorStore::new());
    // A crashed previous pass left a document with no chunks; the time gate
    // alone must not skip this file.
    store.seed_document(Document {
        path: "partial.go".to_string(),
        hash: "stale".to_string(),
        mod_time: 0,
        chunk_ids: vec![],
    });
    let embedder = Arc::new(MockEmbedder::new(8));
    let cutoff = now_secs() + 3600;

    let stats = indexer_for(&dir, store.clone(), embedder.clone(), Some(cutoff))
        .index_all_with_progress(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.files_indexed, 1);
    assert!(embedder.was_called());
    let doc = store.get_document("partial.go").await.unwrap().unwrap();
    assert!(!doc.chunk_ids.is_empty());
}

#[tokio::test]
async fn test_atomic_replace_keeps_one_hash_per_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("churn.go");
    std::fs::write(&path, "package main\n\nfunc a() {}\n").unwrap();

    let store = Arc::new(MockVectorStore::new());
    let embedder = Arc::new(MockEmbedder::new(8));

    indexer_for(&dir, store.clone(), embedder.clone(), None)
        .index_all_with_progress(&CancellationToken::new())
        .await
        .unwrap();

    std::fs::write(&path, "package main\n\nfunc a() {}\n\nfunc b() {}\n").unwrap();
    indexer_for(&dir, store.clone(), embedder.clone(), None)
        .handle_event(
            &FileEvent {
                event_type: EventType::Modify,
                path: "churn.go".to_string(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let chunks = store.get_chunks_for_file("churn.go").await.unwrap();
    assert!(!chunks.is_empty());
    let hashes: std::collections::HashSet<_> =
        chunks.iter().map(|c| c.content_hash.clone()).collect();
    assert_eq!(
        hashes.len(),
        1,
        "chunks for one file must never mix content hashes"
    );
    let doc = store.get_document("churn.go").await.unwrap().unwrap();
    assert_eq!(&doc.hash, hashes.iter().next().unwrap());
}

#[tokio::test]
async fn test_delete_event_clears_chunks_document_and_symbols() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("gone.go"),
        "package main\n\nfunc Doomed() {}\n",
    )
    .unwrap();

    let store = Arc::new(MockVectorStore::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let symbols: Arc<dyn SymbolStore> =
        Arc::new(BinarySymbolStore::new(dir.path().join("symbols.bin")));
    let extractor = Arc::new(RegexExtractor::new());

    let indexer = indexer_for(&dir, store.clone(), embedder.clone(), None)
        .with_symbols(symbols.clone(), extractor);
    indexer
        .index_all_with_progress(&CancellationToken::new())
        .await
        .unwrap();
    assert!(symbols.is_file_indexed("gone.go").unwrap());

    let delta = indexer
        .handle_event(
            &FileEvent {
                event_type: EventType::Delete,
                path: "gone.go".to_string(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(delta.files_deleted, 1);
    assert!(store.get_document("gone.go").await.unwrap().is_none());
    assert!(store.get_chunks_for_file("gone.go").await.unwrap().is_empty());
    assert!(!symbols.is_file_indexed("gone.go").unwrap());
}

#[tokio::test]
async fn test_fatal_batch_failure_defers_files_to_next_pass() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.go"), "package main\n\nfunc a() {}\n").unwrap();

    let store = Arc::new(MockVectorStore::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    embedder.fail_first.store(1, Ordering::SeqCst);
    embedder.fail_transient.store(false, Ordering::SeqCst);

    let stats = indexer_for(&dir, store.clone(), embedder.clone(), None)
        .index_all_with_progress(&CancellationToken::new())
        .await
        .unwrap();

    // The pass completes; the file is deferred, not committed.
    assert_eq!(stats.files_indexed, 0);
    assert!(stats.errors >= 1);
    assert!(store.get_document("a.go").await.unwrap().is_none());

    // The next pass retries through the normal gates and succeeds.
    let stats = indexer_for(&dir, store.clone(), embedder.clone(), None)
        .index_all_with_progress(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.files_indexed, 1);
}

#[tokio::test]
async fn test_transient_failure_retries_within_the_pass() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("flaky.go"), "package main\n\nfunc f() {}\n").unwrap();

    let store = Arc::new(MockVectorStore::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    embedder.fail_first.store(1, Ordering::SeqCst);
    embedder.fail_transient.store(true, Ordering::SeqCst);

    let indexer = indexer_for(&dir, store.clone(), embedder.clone(), None).with_options(
        IndexerOptions {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
            ..IndexerOptions::default()
        },
    );

    let stats = indexer
        .index_all_with_progress(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.files_indexed, 1, "transient failure must retry and succeed");
    assert!(embedder.batch_calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_cancelled_pass_returns_cleanly() {
    let dir = TempDir::new().unwrap();
    create_go_fixture_files(dir.path(), 20);

    let store = Arc::new(MockVectorStore::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let token = CancellationToken::new();
    token.cancel();

    let stats = indexer_for(&dir, store, embedder, None)
        .index_all_with_progress(&token)
        .await
        .unwrap();
    assert_eq!(stats.files_indexed, 0);
}

#[test]
fn test_stats_snapshot_replaces_running_totals() {
    let mut total = Stats {
        files_indexed: 10,
        files_skipped: 5,
        ..Stats::default()
    };
    total.apply(&Stats {
        files_indexed: 1,
        ..Stats::default()
    });
    assert_eq!(total.files_indexed, 11);

    total.apply(&Stats {
        files_indexed: 3,
        snapshot: true,
        ..Stats::default()
    });
    assert_eq!(total.files_indexed, 3);
    assert_eq!(total.files_skipped, 0);
}
