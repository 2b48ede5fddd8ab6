// grepai - Privacy-First Semantic Code Search Core
//!
//! This crate implements the indexing and retrieval engine behind grepai:
//! an incremental scan → chunk → embed → persist pipeline driven by an
//! always-on file watcher, pluggable vector and symbol stores, a multi-root
//! watch supervisor, and a query layer for semantic search and call-graph
//! traversal.
//!
//! The interactive UI, CLI parsing, MCP surface, and daemonization live in
//! host crates; they consume the observer callbacks and lifecycle hooks
//! exposed here.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod indexer;
pub mod scanner;
pub mod search;
pub mod store;
pub mod trace;
pub mod watch;
pub mod watcher;

#[cfg(test)]
pub mod tests;

// Re-export common types
pub use chunker::Chunker;
pub use embedder::{EmbedError, Embedder};
pub use indexer::{Activity, BatchProgress, Indexer, Stats};
pub use scanner::{DropReason, FileRecord, IgnoreMatcher, Scanner};
pub use search::SearchEngine;
pub use store::{Chunk, Document, SearchOptions, SearchResult, VectorStore};
pub use trace::{CallGraph, Reference, RegexExtractor, Symbol, SymbolKind, SymbolStore};
pub use watch::{SessionState, SupervisorOptions};
pub use watcher::{EventType, FileEvent};
