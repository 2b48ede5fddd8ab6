//! Incremental indexing pipeline
//!
//! One pass reads as: scan stream → skip gates → chunk → batched embed →
//! per-file commit. A bounded channel sits between the scanner and the
//! embedding stage, so a slow embedder backpressures the scan instead of
//! growing a queue. Per file, the commit order is fixed —
//! `delete_by_file` → `save_chunks` → `save_document` — so a concurrent
//! reader sees either the old complete chunk set or the new one, never a
//! mix. Symbol extraction runs on the same enqueue signal and persists
//! independently of embedding.
//!
//! Two gates make re-indexing cheap across restarts:
//! - time gate: with a `last_index_time` cutoff, a file whose mod time is
//!   strictly older is skipped — but only when its stored document already
//!   has chunks. A partially indexed file left by a crashed pass never
//!   slips through on time alone.
//! - hash gate: otherwise the stored document's content hash decides.

use crate::chunker::{ChunkSpan, Chunker};
use crate::embedder::{EmbedError, Embedder};
use crate::scanner::{FileMeta, FileRecord, Scanned, Scanner};
use crate::store::{chunk_id, Chunk, Document, SearchResult, VectorStore};
use crate::trace::{RegexExtractor, SymbolStore};
use crate::watcher::{EventType, FileEvent};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Running totals for one project. A snapshot delta replaces the running
/// totals (used to rebase after restarts); incremental deltas add to them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub files_deleted: u64,
    pub chunks_created: u64,
    pub chunks_deleted: u64,
    pub errors: u64,
    pub snapshot: bool,
}

impl Stats {
    /// Fold `delta` into the running totals, honoring snapshot semantics.
    pub fn apply(&mut self, delta: &Stats) {
        if delta.snapshot {
            *self = *delta;
            return;
        }
        self.files_indexed += delta.files_indexed;
        self.files_skipped += delta.files_skipped;
        self.files_deleted += delta.files_deleted;
        self.chunks_created += delta.chunks_created;
        self.chunks_deleted += delta.chunks_deleted;
        self.errors += delta.errors;
    }

    fn add(&mut self, delta: &Stats) {
        let mut d = *delta;
        d.snapshot = false;
        self.apply(&d);
    }
}

/// What the indexer is doing right now, for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Scanning,
    Embedding,
    Persisting,
    Idle,
}

/// Progress of one embedding batch, including retry visibility.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub completed_chunks: usize,
    pub total_chunks: usize,
    pub retrying: bool,
    pub attempt: u32,
    pub status_code: Option<u16>,
}

pub type ScanObserver = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;
pub type BatchObserver = Arc<dyn Fn(&BatchProgress) + Send + Sync>;
pub type ActivityObserver = Arc<dyn Fn(Activity, Option<&str>) + Send + Sync>;
pub type StatsObserver = Arc<dyn Fn(&Stats) + Send + Sync>;

/// Callback set passed in at construction; the only hook for observation.
#[derive(Clone, Default)]
pub struct IndexObservers {
    pub scan: Option<ScanObserver>,
    pub batch: Option<BatchObserver>,
    pub activity: Option<ActivityObserver>,
    pub stats: Option<StatsObserver>,
}

impl IndexObservers {
    fn scan_progress(&self, current: usize, total: usize, path: &str) {
        if let Some(cb) = &self.scan {
            cb(current, total, path);
        }
    }

    fn batch_progress(&self, progress: &BatchProgress) {
        if let Some(cb) = &self.batch {
            cb(progress);
        }
    }

    fn activity(&self, activity: Activity, file: Option<&str>) {
        if let Some(cb) = &self.activity {
            cb(activity, file);
        }
    }

    fn stats_delta(&self, delta: &Stats) {
        if let Some(cb) = &self.stats {
            cb(delta);
        }
    }
}

/// Bounded exponential backoff for transient embedding failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    /// Max chunks merged into one embedding request.
    pub batch_max_chunks: usize,
    /// Approximate char budget per embedding request.
    pub batch_max_chars: usize,
    /// Files buffered between the scanner and the embedding stage; also the
    /// bound that gives the pipeline backpressure.
    pub file_window: usize,
    pub retry: RetryPolicy,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            batch_max_chunks: 32,
            batch_max_chars: 100_000,
            file_window: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// A file that cleared the gates, with everything the embed stage needs.
struct PendingFile {
    record: FileRecord,
    content: String,
}

struct WindowFile {
    record: FileRecord,
    content: String,
    spans: Vec<ChunkSpan>,
    vectors: Vec<Option<Vec<f32>>>,
    deferred: bool,
}

pub struct Indexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    scanner: Arc<Scanner>,
    symbol_store: Option<Arc<dyn SymbolStore>>,
    extractor: Option<Arc<RegexExtractor>>,
    /// Cutoff for the time gate, seconds since the epoch. None disables it.
    last_index_time: Option<u64>,
    observers: IndexObservers,
    opts: IndexerOptions,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        chunker: Chunker,
        scanner: Arc<Scanner>,
        last_index_time: Option<u64>,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            scanner,
            symbol_store: None,
            extractor: None,
            last_index_time,
            observers: IndexObservers::default(),
            opts: IndexerOptions::default(),
        }
    }

    pub fn with_symbols(
        mut self,
        symbol_store: Arc<dyn SymbolStore>,
        extractor: Arc<RegexExtractor>,
    ) -> Self {
        self.symbol_store = Some(symbol_store);
        self.extractor = Some(extractor);
        self
    }

    pub fn with_observers(mut self, observers: IndexObservers) -> Self {
        self.observers = observers;
        self
    }

    pub fn with_options(mut self, opts: IndexerOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Full pass over the project: gate, chunk, embed, commit. The returned
    /// stats carry the snapshot flag so hosts can rebase running totals.
    /// Cancellation stops the pass cleanly and returns the stats so far.
    pub async fn index_all_with_progress(&self, cancel: &CancellationToken) -> Result<Stats> {
        let mut stats = Stats {
            snapshot: true,
            ..Stats::default()
        };
        self.observers.activity(Activity::Scanning, None);

        let metas = self.scanner.list_files()?;
        let total = metas.len();
        debug!("scan pass found {} candidate files", total);

        // One bulk read of document metadata; the gates never issue
        // per-file store lookups for files that end up skipped.
        let documents: HashMap<String, Document> = self
            .store
            .list_documents()
            .await?
            .into_iter()
            .map(|d| (d.path.clone(), d))
            .collect();

        let (tx, mut rx) = mpsc::channel::<PendingFile>(self.opts.file_window.max(1));
        let producer = self.spawn_scan_producer(metas, documents, tx, cancel.clone());

        let mut window: Vec<PendingFile> = Vec::new();
        loop {
            tokio::select! {
                pending = rx.recv() => {
                    match pending {
                        Some(file) => {
                            window.push(file);
                            if window.len() >= self.opts.file_window {
                                self.process_window(std::mem::take(&mut window), &mut stats, cancel).await?;
                            }
                        }
                        None => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        if !cancel.is_cancelled() && !window.is_empty() {
            self.process_window(window, &mut stats, cancel).await?;
        }

        let producer_stats = producer.await.context("scan producer task panicked")?;
        stats.add(&producer_stats);

        self.observers.activity(Activity::Idle, None);
        self.observers.stats_delta(&stats);
        info!(
            "index pass complete: {} indexed, {} skipped, {} errors",
            stats.files_indexed, stats.files_skipped, stats.errors
        );
        Ok(stats)
    }

    /// Scan, gate, and enqueue files on a bounded channel. Returns skip/drop
    /// counts. Blocking on `tx.send` is the pipeline's backpressure.
    fn spawn_scan_producer(
        &self,
        metas: Vec<FileMeta>,
        documents: HashMap<String, Document>,
        tx: mpsc::Sender<PendingFile>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<Stats> {
        let scanner = self.scanner.clone();
        let observers = self.observers.clone();
        let last_index_time = self.last_index_time;

        tokio::spawn(async move {
            let mut stats = Stats::default();
            let total = metas.len();

            for (idx, meta) in metas.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                observers.scan_progress(idx + 1, total, &meta.relative_path);

                // Gate A: time. Only trusted when the stored document is
                // complete (non-empty chunk list).
                if let Some(cutoff) = last_index_time {
                    if meta.mod_time_secs < cutoff {
                        if let Some(doc) = documents.get(&meta.relative_path) {
                            if !doc.chunk_ids.is_empty() {
                                debug!("skipped-by-time: {}", meta.relative_path);
                                stats.files_skipped += 1;
                                continue;
                            }
                        }
                    }
                }

                let scanned = match scanner.scan_file(&meta.relative_path) {
                    Ok(scanned) => scanned,
                    Err(err) => {
                        warn!("scan failed for {}: {}", meta.relative_path, err);
                        stats.errors += 1;
                        continue;
                    }
                };
                let (record, content) = match scanned {
                    Scanned::Record { record, content } => (record, content),
                    Scanned::Dropped(reason) => {
                        debug!("dropped {} ({})", meta.relative_path, reason);
                        stats.files_skipped += 1;
                        continue;
                    }
                };

                // Gate B: hash.
                if let Some(doc) = documents.get(&record.relative_path) {
                    if doc.hash == record.content_hash && !doc.chunk_ids.is_empty() {
                        debug!("skipped-by-hash: {}", record.relative_path);
                        stats.files_skipped += 1;
                        continue;
                    }
                }

                let pending = PendingFile { record, content };
                tokio::select! {
                    sent = tx.send(pending) => {
                        if sent.is_err() {
                            break; // consumer gone
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            stats
        })
    }

    /// Chunk a window of files, embed their chunks in merged batches, and
    /// commit each file whose batches all succeeded.
    async fn process_window(
        &self,
        pending: Vec<PendingFile>,
        stats: &mut Stats,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut files: Vec<WindowFile> = pending
            .into_iter()
            .map(|p| {
                let spans = self.chunker.chunk(&p.record.relative_path, &p.content);
                let vectors = vec![None; spans.len()];
                WindowFile {
                    record: p.record,
                    content: p.content,
                    spans,
                    vectors,
                    deferred: false,
                }
            })
            .collect();

        // Symbol extraction rides the same enqueue signal and does not
        // depend on embedding succeeding.
        for file in &files {
            self.extract_symbols(&file.record, &file.content);
        }

        // Merge chunks across files into embedding batches bounded by count
        // and char budget.
        let mut batches: Vec<Vec<(usize, usize)>> = Vec::new();
        let mut current: Vec<(usize, usize)> = Vec::new();
        let mut current_chars = 0usize;
        let total_chunks: usize = files.iter().map(|f| f.spans.len()).sum();
        for (file_idx, file) in files.iter().enumerate() {
            for (span_idx, span) in file.spans.iter().enumerate() {
                let len = span.content.len();
                let over_count = current.len() >= self.opts.batch_max_chunks;
                let over_chars = !current.is_empty() && current_chars + len > self.opts.batch_max_chars;
                if over_count || over_chars {
                    batches.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
                current.push((file_idx, span_idx));
                current_chars += len;
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }

        self.observers.activity(Activity::Embedding, None);
        let mut completed = 0usize;
        for batch in batches {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let texts: Vec<String> = batch
                .iter()
                .map(|(f, s)| files[*f].spans[*s].content.clone())
                .collect();

            match self
                .embed_with_retry(&texts, completed, total_chunks, cancel)
                .await
            {
                Some(Ok(vectors)) => {
                    for ((file_idx, span_idx), mut vector) in batch.into_iter().zip(vectors) {
                        crate::store::normalize(&mut vector);
                        files[file_idx].vectors[span_idx] = Some(vector);
                    }
                    completed += texts.len();
                    self.observers.batch_progress(&BatchProgress {
                        completed_chunks: completed,
                        total_chunks,
                        retrying: false,
                        attempt: 0,
                        status_code: None,
                    });
                }
                Some(Err(err)) => {
                    // Ledger entry; the files ride the normal gates on the
                    // next pass.
                    error!("embedding batch failed, deferring its files: {}", err);
                    stats.errors += 1;
                    for (file_idx, _) in &batch {
                        files[*file_idx].deferred = true;
                    }
                    completed += texts.len();
                }
                None => return Ok(()), // cancelled mid-batch
            }
        }

        for file in files {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if file.deferred {
                continue;
            }
            let delta = self.commit_file(&file).await?;
            stats.add(&delta);
            self.observers.stats_delta(&delta);
        }
        Ok(())
    }

    /// Replace a file's chunks and document in the fixed order that keeps
    /// readers consistent.
    async fn commit_file(&self, file: &WindowFile) -> Result<Stats> {
        let path = &file.record.relative_path;
        self.observers.activity(Activity::Persisting, Some(path));

        let old_chunks = self.store.get_chunks_for_file(path).await?;

        let now = Utc::now();
        let mut chunks = Vec::with_capacity(file.spans.len());
        let mut ids = Vec::with_capacity(file.spans.len());
        for (span, vector) in file.spans.iter().zip(&file.vectors) {
            let Some(vector) = vector else {
                continue; // unreachable for committed files; deferred handled upstream
            };
            let id = chunk_id(path, span.start_line, span.end_line, &file.record.content_hash);
            ids.push(id.clone());
            chunks.push(Chunk {
                id,
                file_path: path.clone(),
                start_line: span.start_line,
                end_line: span.end_line,
                content: span.content.clone(),
                vector: vector.clone(),
                content_hash: file.record.content_hash.clone(),
                updated_at: now,
            });
        }

        self.store.delete_by_file(path).await?;
        self.store.save_chunks(chunks).await?;
        self.store
            .save_document(Document {
                path: path.clone(),
                hash: file.record.content_hash.clone(),
                mod_time: file.record.mod_time_secs,
                chunk_ids: ids.clone(),
            })
            .await?;

        debug!("committed {} ({} chunks)", path, ids.len());
        Ok(Stats {
            files_indexed: 1,
            chunks_created: ids.len() as u64,
            chunks_deleted: old_chunks.len() as u64,
            ..Stats::default()
        })
    }

    /// Embed one batch with bounded exponential backoff for transient
    /// failures. Returns None when cancelled.
    async fn embed_with_retry(
        &self,
        texts: &[String],
        completed: usize,
        total_chunks: usize,
        cancel: &CancellationToken,
    ) -> Option<Result<Vec<Vec<f32>>, EmbedError>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                result = self.embedder.embed_batch(texts) => result,
                _ = cancel.cancelled() => return None,
            };

            match result {
                Ok(vectors) => return Some(Ok(vectors)),
                Err(err) if err.is_transient() && attempt < self.opts.retry.max_attempts => {
                    let delay = self.opts.retry.delay(attempt);
                    warn!(
                        "transient embedding failure (attempt {}/{}), retrying in {:?}: {}",
                        attempt, self.opts.retry.max_attempts, delay, err
                    );
                    self.observers.batch_progress(&BatchProgress {
                        completed_chunks: completed,
                        total_chunks,
                        retrying: true,
                        attempt,
                        status_code: err.status(),
                    });
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return None,
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }

    fn extract_symbols(&self, record: &FileRecord, content: &str) {
        let (Some(symbol_store), Some(extractor)) = (&self.symbol_store, &self.extractor) else {
            return;
        };
        let ext = Path::new(&record.relative_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        if !extractor.supports_extension(&ext) {
            return;
        }

        let (symbols, references) = extractor.extract(&record.relative_path, content);
        if let Err(err) = symbol_store.save_file_with_content_hash(
            &record.relative_path,
            &record.content_hash,
            symbols,
            references,
        ) {
            // Extraction trouble never blocks vector indexing.
            warn!("failed to save symbols for {}: {}", record.relative_path, err);
        }
    }

    /// React to one debounced watcher event with the same gates as a full
    /// pass. Returns the stats delta for the event.
    pub async fn handle_event(
        &self,
        event: &FileEvent,
        cancel: &CancellationToken,
    ) -> Result<Stats> {
        match event.event_type {
            EventType::Delete => self.handle_delete(&event.path).await,
            EventType::Create | EventType::Modify | EventType::Rename => {
                self.index_single_file(&event.path, cancel).await
            }
        }
    }

    async fn handle_delete(&self, path: &str) -> Result<Stats> {
        let old_chunks = self.store.get_chunks_for_file(path).await?;
        self.store.delete_by_file(path).await?;
        self.store.delete_document(path).await?;
        if let Some(symbol_store) = &self.symbol_store {
            symbol_store.delete_file(path)?;
        }

        let delta = Stats {
            files_deleted: 1,
            chunks_deleted: old_chunks.len() as u64,
            ..Stats::default()
        };
        self.observers.stats_delta(&delta);
        info!("removed {} from index ({} chunks)", path, old_chunks.len());
        Ok(delta)
    }

    async fn index_single_file(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Stats> {
        let mut stats = Stats::default();

        let (record, content) = match self.scanner.scan_file(path)? {
            Scanned::Record { record, content } => (record, content),
            Scanned::Dropped(reason) => {
                debug!("dropped {} ({})", path, reason);
                stats.files_skipped += 1;
                return Ok(stats);
            }
        };

        if let Some(doc) = self.store.get_document(path).await? {
            if doc.hash == record.content_hash && !doc.chunk_ids.is_empty() {
                debug!("skipped-by-hash: {}", path);
                stats.files_skipped += 1;
                return Ok(stats);
            }
        }

        self.process_window(
            vec![PendingFile { record, content }],
            &mut stats,
            cancel,
        )
        .await?;
        self.observers.activity(Activity::Idle, None);
        Ok(stats)
    }

    /// Convenience for the query layer: raw nearest-neighbor search through
    /// this indexer's store.
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        path_prefix: Option<String>,
    ) -> Result<Vec<SearchResult>> {
        self.store
            .search(
                query_vector,
                limit,
                crate::store::SearchOptions { path_prefix },
            )
            .await
    }
}
