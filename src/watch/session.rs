//! Per-project watch session
//!
//! Bootstraps the stores, embedder, and indexer for one root, runs the
//! initial full pass, signals readiness exactly once, then drains debounced
//! watcher events until cancelled. Shutdown always attempts a final persist
//! under a short detached timeout; cancellation is never surfaced as an
//! error.

use super::{SessionContext, SessionRunner};
use crate::config::{self, Config, StoreBackend};
use crate::chunker::Chunker;
use crate::embedder::build_embedder;
use crate::indexer::Indexer;
use crate::scanner::{IgnoreMatcher, Scanner};
use crate::store::{LocalVectorStore, QdrantVectorStore, SqliteVectorStore, VectorStore};
use crate::trace::{BinarySymbolStore, RegexExtractor, SymbolStore};
use crate::watcher::FsWatcher;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// How long a shutting-down session waits for its final persist.
const FINAL_PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

/// The production [`SessionRunner`]: wraps [`run_watch_session`].
pub fn default_session_runner() -> SessionRunner {
    Arc::new(|ctx| Box::pin(run_watch_session(ctx)))
}

/// Run the full session lifecycle for one project root.
pub async fn run_watch_session(ctx: SessionContext) -> Result<()> {
    let root = PathBuf::from(&ctx.project_root);
    let cfg = Config::load(&root)?;

    let matcher = IgnoreMatcher::new(&root, &cfg.exclude)?;
    let scanner = Arc::new(Scanner::new(&root, matcher).with_max_file_size(cfg.max_file_size));

    let embedder = match &ctx.embedder {
        Some(shared) => shared.clone(),
        None => build_embedder(&cfg.embedder)
            .map_err(|e| anyhow!("failed to build embedder for {}: {}", ctx.project_root, e))?,
    };
    let dimensions = embedder.dimensions();

    let store = build_vector_store(&root, &cfg, dimensions)?;
    store
        .load()
        .await
        .with_context(|| format!("failed to load vector store for {}", ctx.project_root))?;

    let symbol_store: Arc<dyn SymbolStore> =
        Arc::new(BinarySymbolStore::new(config::symbol_index_path(&root)));
    symbol_store
        .load()
        .with_context(|| format!("failed to load symbol store for {}", ctx.project_root))?;
    let extractor = Arc::new(RegexExtractor::new());

    let indexer = Indexer::new(
        store.clone(),
        embedder.clone(),
        Chunker::new(cfg.chunk.size, cfg.chunk.overlap),
        scanner,
        last_index_time(&root),
    )
    .with_symbols(symbol_store.clone(), extractor)
    .with_observers(ctx.observers.index.clone());

    info!("session {} starting initial scan", ctx.project_root);
    indexer.index_all_with_progress(&ctx.cancel).await?;

    if ctx.cancel.is_cancelled() {
        finalize(&ctx.project_root, store, symbol_store).await;
        return Ok(());
    }
    (ctx.on_ready)();
    info!("✅ session {} running", ctx.project_root);

    let mut watcher = FsWatcher::new(&root, Duration::from_millis(cfg.watch.debounce_ms));
    let mut events = watcher.start()?;

    let result = loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break Ok(()),
            event = events.recv() => {
                match event {
                    Some(event) => {
                        debug!("session {} event: {:?} {}", ctx.project_root, event.event_type, event.path);
                        if let Some(observer) = &ctx.observers.event {
                            observer(&ctx.project_root, &event);
                        }
                        if let Err(err) = indexer.handle_event(&event, &ctx.cancel).await {
                            break Err(err.context(format!(
                                "session {} failed handling {}",
                                ctx.project_root, event.path
                            )));
                        }
                    }
                    None => {
                        break Err(anyhow!(
                            "watcher event stream closed for {}",
                            ctx.project_root
                        ));
                    }
                }
            }
        }
    };

    watcher.stop();
    finalize(&ctx.project_root, store, symbol_store).await;
    result
}

/// Final persist on a detached task, bounded by a short timeout. Failure is
/// logged, never surfaced.
async fn finalize(root: &str, store: Arc<dyn VectorStore>, symbol_store: Arc<dyn SymbolStore>) {
    let root = root.to_string();
    let task = tokio::spawn(async move {
        if let Err(err) = store.persist().await {
            warn!("final persist failed for {}: {}", root, err);
        }
        if let Err(err) = store.close().await {
            warn!("store close failed for {}: {}", root, err);
        }
        if let Err(err) = symbol_store.close() {
            warn!("symbol store close failed for {}: {}", root, err);
        }
    });
    if tokio::time::timeout(FINAL_PERSIST_TIMEOUT, task).await.is_err() {
        warn!("final persist timed out after {:?}", FINAL_PERSIST_TIMEOUT);
    }
}

fn build_vector_store(
    root: &Path,
    cfg: &Config,
    dimensions: usize,
) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match cfg.store.backend {
        StoreBackend::Local => Arc::new(LocalVectorStore::new(
            config::vector_index_path(root),
            dimensions,
        )),
        StoreBackend::Sqlite => Arc::new(SqliteVectorStore::open(
            config::grepai_dir(root).join("vectors.db"),
            dimensions,
        )?),
        StoreBackend::Qdrant => {
            let url = cfg
                .store
                .url
                .as_deref()
                .ok_or_else(|| anyhow!("qdrant backend requires store.url in config"))?;
            Arc::new(QdrantVectorStore::connect(
                url,
                cfg.store.api_key.as_deref(),
                &root.to_string_lossy(),
                dimensions,
            )?)
        }
    };
    Ok(store)
}

/// Cutoff for the indexer's time gate: the previous snapshot's mtime. A
/// fresh project has no snapshot and gets no time gate.
fn last_index_time(root: &Path) -> Option<u64> {
    let snapshot = config::vector_index_path(root);
    let meta = std::fs::metadata(snapshot).ok()?;
    let modified = meta.modified().ok()?;
    modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}
