//! Symbol store
//!
//! Persists per-file symbol buckets and answers name-scoped lookups. The
//! binary implementation keeps everything in memory and snapshots to
//! `.grepai/symbols.bin` with a versioned bincode payload written via
//! temp-file + rename.

use super::{FileSymbolBucket, Reference, Symbol};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

const SYMBOL_SNAPSHOT_VERSION: u32 = 1;

/// Contract for symbol persistence. Lookups are name-scoped and may return
/// entries from multiple files; the query layer disambiguates.
pub trait SymbolStore: Send + Sync {
    /// Replace the bucket for `path` unconditionally.
    fn save_file(&self, path: &str, symbols: Vec<Symbol>, references: Vec<Reference>)
        -> Result<()>;

    /// Replace the bucket for `path` unless the stored content hash already
    /// matches, in which case this is a no-op.
    fn save_file_with_content_hash(
        &self,
        path: &str,
        content_hash: &str,
        symbols: Vec<Symbol>,
        references: Vec<Reference>,
    ) -> Result<()>;

    /// Drop the bucket for `path` (delete events).
    fn delete_file(&self, path: &str) -> Result<()>;

    fn lookup_symbol(&self, name: &str) -> Result<Vec<Symbol>>;
    fn lookup_callers(&self, callee_name: &str) -> Result<Vec<Reference>>;
    fn lookup_callees(&self, caller_name: &str) -> Result<Vec<Reference>>;
    fn is_file_indexed(&self, path: &str) -> Result<bool>;

    fn load(&self) -> Result<()>;
    fn persist(&self) -> Result<()>;

    /// Persist and release resources. Must be idempotent.
    fn close(&self) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct SymbolSnapshot {
    schema_version: u32,
    buckets: Vec<FileSymbolBucket>,
}

/// File-backed symbol store with an in-memory bucket map.
pub struct BinarySymbolStore {
    index_path: PathBuf,
    buckets: RwLock<HashMap<String, FileSymbolBucket>>,
}

impl BinarySymbolStore {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Stored content hash for `path`, if the file has a bucket.
    pub fn content_hash(&self, path: &str) -> Option<String> {
        self.buckets
            .read()
            .ok()?
            .get(path)
            .map(|b| b.content_hash.clone())
    }

    fn write_locked(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, FileSymbolBucket>>> {
        self.buckets
            .write()
            .map_err(|_| anyhow!("symbol store lock poisoned"))
    }

    fn read_locked(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, FileSymbolBucket>>> {
        self.buckets
            .read()
            .map_err(|_| anyhow!("symbol store lock poisoned"))
    }
}

impl SymbolStore for BinarySymbolStore {
    fn save_file(
        &self,
        path: &str,
        symbols: Vec<Symbol>,
        references: Vec<Reference>,
    ) -> Result<()> {
        let mut buckets = self.write_locked()?;
        buckets.insert(
            path.to_string(),
            FileSymbolBucket {
                file_path: path.to_string(),
                content_hash: String::new(),
                symbols,
                references,
            },
        );
        Ok(())
    }

    fn save_file_with_content_hash(
        &self,
        path: &str,
        content_hash: &str,
        symbols: Vec<Symbol>,
        references: Vec<Reference>,
    ) -> Result<()> {
        let mut buckets = self.write_locked()?;
        if let Some(existing) = buckets.get(path) {
            if existing.content_hash == content_hash {
                debug!("symbol bucket for {} unchanged, skipping re-save", path);
                return Ok(());
            }
        }
        buckets.insert(
            path.to_string(),
            FileSymbolBucket {
                file_path: path.to_string(),
                content_hash: content_hash.to_string(),
                symbols,
                references,
            },
        );
        Ok(())
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        self.write_locked()?.remove(path);
        Ok(())
    }

    fn lookup_symbol(&self, name: &str) -> Result<Vec<Symbol>> {
        let buckets = self.read_locked()?;
        let mut out: Vec<Symbol> = buckets
            .values()
            .flat_map(|b| b.symbols.iter())
            .filter(|s| s.name == name)
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.file_path, a.line).cmp(&(&b.file_path, b.line)));
        Ok(out)
    }

    fn lookup_callers(&self, callee_name: &str) -> Result<Vec<Reference>> {
        let buckets = self.read_locked()?;
        let mut out: Vec<Reference> = buckets
            .values()
            .flat_map(|b| b.references.iter())
            .filter(|r| r.callee_name == callee_name)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (&a.call_site_file, a.call_site_line).cmp(&(&b.call_site_file, b.call_site_line))
        });
        Ok(out)
    }

    fn lookup_callees(&self, caller_name: &str) -> Result<Vec<Reference>> {
        let buckets = self.read_locked()?;
        let mut out: Vec<Reference> = buckets
            .values()
            .flat_map(|b| b.references.iter())
            .filter(|r| r.caller_name == caller_name)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (&a.call_site_file, a.call_site_line).cmp(&(&b.call_site_file, b.call_site_line))
        });
        Ok(out)
    }

    fn is_file_indexed(&self, path: &str) -> Result<bool> {
        Ok(self.read_locked()?.contains_key(path))
    }

    fn load(&self) -> Result<()> {
        if !self.index_path.exists() {
            return Ok(()); // no existing index, start fresh
        }
        let bytes = std::fs::read(&self.index_path)
            .with_context(|| format!("failed to read symbol index {}", self.index_path.display()))?;
        let snapshot: SymbolSnapshot =
            bincode::deserialize(&bytes).context("failed to decode symbol index")?;
        if snapshot.schema_version != SYMBOL_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "symbol index schema version {} unsupported (expected {})",
                snapshot.schema_version,
                SYMBOL_SNAPSHOT_VERSION
            ));
        }

        let mut buckets = self.write_locked()?;
        buckets.clear();
        for bucket in snapshot.buckets {
            buckets.insert(bucket.file_path.clone(), bucket);
        }
        debug!(
            "loaded {} symbol buckets from {}",
            buckets.len(),
            self.index_path.display()
        );
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let buckets = self.read_locked()?;
        let mut sorted: Vec<FileSymbolBucket> = buckets.values().cloned().collect();
        sorted.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        let snapshot = SymbolSnapshot {
            schema_version: SYMBOL_SNAPSHOT_VERSION,
            buckets: sorted,
        };
        let bytes = bincode::serialize(&snapshot).context("failed to encode symbol index")?;
        crate::store::atomic_write(&self.index_path, &bytes)
            .with_context(|| format!("failed to write {}", self.index_path.display()))?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.persist()
    }
}

/// Best-effort close of several stores, e.g. after a partial workspace load.
pub fn close_symbol_stores(stores: &[std::sync::Arc<dyn SymbolStore>]) {
    for store in stores {
        if let Err(err) = store.close() {
            tracing::warn!("failed to close symbol store: {}", err);
        }
    }
}

impl BinarySymbolStore {
    /// Path of the snapshot file this store reads and writes.
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::SymbolKind;
    use tempfile::TempDir;

    fn symbol(name: &str, file: &str, line: u32) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind: SymbolKind::Function,
            file_path: file.to_string(),
            line,
            language: "go".to_string(),
            feature_path: None,
        }
    }

    fn reference(caller: &str, callee: &str, file: &str, line: u32) -> Reference {
        Reference {
            callee_name: callee.to_string(),
            caller_name: caller.to_string(),
            caller_file: file.to_string(),
            caller_line: line,
            call_site_file: file.to_string(),
            call_site_line: line,
            context: None,
        }
    }

    #[test]
    fn test_save_and_lookup_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = BinarySymbolStore::new(dir.path().join("symbols.bin"));

        store
            .save_file(
                "auth/login.go",
                vec![symbol("Login", "auth/login.go", 10)],
                vec![reference("HandleAuth", "Login", "auth/handler.go", 25)],
            )
            .unwrap();

        assert!(store.is_file_indexed("auth/login.go").unwrap());
        assert_eq!(store.lookup_symbol("Login").unwrap().len(), 1);
        assert_eq!(store.lookup_callers("Login").unwrap().len(), 1);
        assert_eq!(store.lookup_callees("HandleAuth").unwrap().len(), 1);
        assert!(store.lookup_symbol("Logout").unwrap().is_empty());
    }

    #[test]
    fn test_hash_gated_save_is_a_no_op_when_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = BinarySymbolStore::new(dir.path().join("symbols.bin"));

        store
            .save_file_with_content_hash(
                "a.go",
                "hash-1",
                vec![symbol("First", "a.go", 1)],
                vec![],
            )
            .unwrap();
        // Same hash: the new (empty) symbol list must NOT replace the bucket.
        store
            .save_file_with_content_hash("a.go", "hash-1", vec![], vec![])
            .unwrap();
        assert_eq!(store.lookup_symbol("First").unwrap().len(), 1);

        // Different hash replaces.
        store
            .save_file_with_content_hash(
                "a.go",
                "hash-2",
                vec![symbol("Second", "a.go", 1)],
                vec![],
            )
            .unwrap();
        assert!(store.lookup_symbol("First").unwrap().is_empty());
        assert_eq!(store.lookup_symbol("Second").unwrap().len(), 1);
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("symbols.bin");

        let store = BinarySymbolStore::new(&path);
        store
            .save_file_with_content_hash(
                "pkg/util.go",
                "h1",
                vec![symbol("Helper", "pkg/util.go", 3)],
                vec![reference("Main", "Helper", "main.go", 12)],
            )
            .unwrap();
        store.persist().unwrap();

        let reloaded = BinarySymbolStore::new(&path);
        reloaded.load().unwrap();
        assert!(reloaded.is_file_indexed("pkg/util.go").unwrap());
        assert_eq!(reloaded.content_hash("pkg/util.go").unwrap(), "h1");
        assert_eq!(reloaded.lookup_callers("Helper").unwrap().len(), 1);
    }

    #[test]
    fn test_load_missing_index_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let store = BinarySymbolStore::new(dir.path().join("symbols.bin"));
        store.load().unwrap();
        assert!(!store.is_file_indexed("anything.go").unwrap());
    }

    #[test]
    fn test_delete_file_removes_bucket() {
        let dir = TempDir::new().unwrap();
        let store = BinarySymbolStore::new(dir.path().join("symbols.bin"));

        store
            .save_file("gone.go", vec![symbol("Gone", "gone.go", 1)], vec![])
            .unwrap();
        store.delete_file("gone.go").unwrap();

        assert!(!store.is_file_indexed("gone.go").unwrap());
        assert!(store.lookup_symbol("Gone").unwrap().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = BinarySymbolStore::new(dir.path().join("symbols.bin"));
        store.save_file("a.go", vec![], vec![]).unwrap();
        store.close().unwrap();
        store.close().unwrap();
    }
}
