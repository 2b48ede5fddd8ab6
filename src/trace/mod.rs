//! Symbol extraction, symbol storage, and call-graph tracing
//!
//! Symbols and references are extracted with pragmatic per-language regexes
//! (no compiler-grade resolution; references link symbols by name). The
//! symbol store persists per-file buckets and answers name-scoped lookups;
//! the graph module walks caller/callee edges across one or many stores.

mod extractor;
mod graph;
mod store;

pub use extractor::{is_keyword, RegexExtractor};
pub use graph::{
    load_workspace_symbol_stores, trace_callees, trace_callers, trace_graph, CallerHit, TraceResult,
};
pub use store::{BinarySymbolStore, SymbolStore};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of definition a symbol is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Type,
    Class,
    Interface,
}

/// A definition extracted from source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    pub line: u32,
    pub language: String,
    /// Directory-derived grouping label; informational only, never used for
    /// resolution.
    pub feature_path: Option<String>,
}

/// A call site linking two symbols by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub callee_name: String,
    pub caller_name: String,
    pub caller_file: String,
    pub caller_line: u32,
    pub call_site_file: String,
    pub call_site_line: u32,
    pub context: Option<String>,
}

/// Per-file unit of symbol persistence. The stored content hash lets the
/// extractor skip re-parsing unchanged files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSymbolBucket {
    pub file_path: String,
    pub content_hash: String,
    pub symbols: Vec<Symbol>,
    pub references: Vec<Reference>,
}

/// One traversed edge in a call graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: String,
    pub callee: String,
    pub call_site_file: String,
    pub call_site_line: u32,
}

/// Query-time call graph rooted at a symbol name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallGraph {
    pub root: String,
    pub depth: u32,
    pub nodes: BTreeMap<String, Symbol>,
    pub edges: Vec<CallEdge>,
}
