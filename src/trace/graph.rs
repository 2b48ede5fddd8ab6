//! Call-graph traversal over one or many symbol stores
//!
//! Lookups are aggregated across all loaded stores (one per workspace
//! project) in a stable order. References link symbols by name, so a caller
//! that was never extracted as a definition is synthesized as a lightweight
//! function symbol rather than dropped.

use super::{CallEdge, CallGraph, Reference, Symbol, SymbolKind, SymbolStore};
use crate::config::{self, WorkspaceConfig};
use anyhow::{anyhow, Context, Result};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// One resolved caller (or callee) with the reference that produced it.
#[derive(Debug, Clone)]
pub struct CallerHit {
    pub symbol: Symbol,
    pub reference: Reference,
}

/// Result of a callers/callees trace.
#[derive(Debug, Clone)]
pub struct TraceResult {
    pub target: Symbol,
    pub hits: Vec<CallerHit>,
}

/// Find every call site whose callee is `name`.
pub fn trace_callers(stores: &[Arc<dyn SymbolStore>], name: &str) -> Result<TraceResult> {
    let target = resolve_symbol(stores, name)?;

    let mut hits = Vec::new();
    for store in stores {
        for reference in store.lookup_callers(name)? {
            let symbol = resolve_symbol_or_synthesize(
                stores,
                &reference.caller_name,
                &reference.caller_file,
                reference.caller_line,
            )?;
            hits.push(CallerHit { symbol, reference });
        }
    }
    Ok(TraceResult { target, hits })
}

/// Find every call site whose caller is `name`.
pub fn trace_callees(stores: &[Arc<dyn SymbolStore>], name: &str) -> Result<TraceResult> {
    let target = resolve_symbol(stores, name)?;

    let mut hits = Vec::new();
    for store in stores {
        for reference in store.lookup_callees(name)? {
            let symbol = resolve_symbol_or_synthesize(
                stores,
                &reference.callee_name,
                &reference.call_site_file,
                reference.call_site_line,
            )?;
            hits.push(CallerHit { symbol, reference });
        }
    }
    Ok(TraceResult { target, hits })
}

/// Breadth-first callee expansion from `root`, up to `depth` hops.
///
/// The visited set is keyed by `(caller, callee)` edges rather than nodes,
/// so diamond patterns are fully enumerated while cycles terminate.
pub fn trace_graph(stores: &[Arc<dyn SymbolStore>], root: &str, depth: u32) -> Result<CallGraph> {
    let mut graph = CallGraph {
        root: root.to_string(),
        depth,
        ..CallGraph::default()
    };

    let root_symbol = resolve_symbol(stores, root)?;
    graph.nodes.insert(root.to_string(), root_symbol);

    let mut visited_edges: HashSet<(String, String)> = HashSet::new();
    let mut frontier: VecDeque<(String, u32)> = VecDeque::new();
    frontier.push_back((root.to_string(), 0));

    while let Some((name, hops)) = frontier.pop_front() {
        if hops >= depth {
            continue;
        }
        for store in stores {
            for reference in store.lookup_callees(&name)? {
                let key = (reference.caller_name.clone(), reference.callee_name.clone());
                if !visited_edges.insert(key) {
                    continue;
                }
                graph.edges.push(CallEdge {
                    caller: reference.caller_name.clone(),
                    callee: reference.callee_name.clone(),
                    call_site_file: reference.call_site_file.clone(),
                    call_site_line: reference.call_site_line,
                });

                if !graph.nodes.contains_key(&reference.callee_name) {
                    let symbol = resolve_symbol_or_synthesize(
                        stores,
                        &reference.callee_name,
                        &reference.call_site_file,
                        reference.call_site_line,
                    )?;
                    graph.nodes.insert(reference.callee_name.clone(), symbol);
                    frontier.push_back((reference.callee_name.clone(), hops + 1));
                }
            }
        }
    }

    debug!(
        "traced graph for {}: {} nodes, {} edges",
        root,
        graph.nodes.len(),
        graph.edges.len()
    );
    Ok(graph)
}

/// First matching definition across stores, or a synthesized function symbol
/// when the name only ever appears at call sites.
fn resolve_symbol(stores: &[Arc<dyn SymbolStore>], name: &str) -> Result<Symbol> {
    for store in stores {
        if let Some(sym) = store.lookup_symbol(name)?.into_iter().next() {
            return Ok(sym);
        }
    }
    Ok(synthesize(name, "", 0))
}

fn resolve_symbol_or_synthesize(
    stores: &[Arc<dyn SymbolStore>],
    name: &str,
    fallback_file: &str,
    fallback_line: u32,
) -> Result<Symbol> {
    for store in stores {
        if let Some(sym) = store.lookup_symbol(name)?.into_iter().next() {
            return Ok(sym);
        }
    }
    Ok(synthesize(name, fallback_file, fallback_line))
}

fn synthesize(name: &str, file: &str, line: u32) -> Symbol {
    Symbol {
        name: name.to_string(),
        kind: SymbolKind::Function,
        file_path: file.to_string(),
        line,
        language: String::new(),
        feature_path: None,
    }
}

/// Load the symbol stores for a workspace's projects, in project-name order.
/// When `project_name` is non-empty only that project's store is loaded.
pub fn load_workspace_symbol_stores(
    workspace_name: &str,
    project_name: Option<&str>,
) -> Result<Vec<Arc<dyn SymbolStore>>> {
    let ws_cfg = WorkspaceConfig::load()
        .context("failed to load workspace config")?
        .ok_or_else(|| {
            anyhow!("no workspaces configured; create one with: grepai workspace create <name>")
        })?;
    let workspace = ws_cfg.get_workspace(workspace_name)?;

    let mut projects: Vec<_> = match project_name {
        Some(wanted) => {
            let entry = workspace
                .projects
                .iter()
                .find(|p| p.name == wanted)
                .ok_or_else(|| {
                    anyhow!(
                        "project {:?} not found in workspace {:?}",
                        wanted,
                        workspace_name
                    )
                })?;
            vec![entry.clone()]
        }
        None => workspace.projects.clone(),
    };
    projects.sort_by(|a, b| a.name.cmp(&b.name));

    let mut stores: Vec<Arc<dyn SymbolStore>> = Vec::with_capacity(projects.len());
    for project in &projects {
        let store = super::BinarySymbolStore::new(config::symbol_index_path(&project.path));
        if let Err(err) = store.load() {
            super::store::close_symbol_stores(&stores);
            return Err(err.context(format!(
                "failed to load symbol index for project {}",
                project.name
            )));
        }
        stores.push(Arc::new(store));
    }
    Ok(stores)
}
