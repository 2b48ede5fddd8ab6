//! Project scanner
//!
//! Walks a project root in two phases: a cheap metadata pass over every
//! candidate path, then a per-file content pass (`scan_file`) that applies
//! the drop chain and computes the content hash. Keeping the phases separate
//! lets the indexer consult its skip gates on metadata alone, without reading
//! file contents for files that have not changed.

pub mod ignore;

pub use self::ignore::IgnoreMatcher;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Bytes inspected for the binary heuristic (NUL byte sniff).
const BINARY_SNIFF_BYTES: usize = 8000;

/// Scanner output for one accepted file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub relative_path: String,
    pub content_hash: String,
    pub mod_time_secs: u64,
    pub size_bytes: u64,
    pub language: String,
}

/// Metadata-pass output: enough for the indexer's time gate, nothing read.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub relative_path: String,
    pub mod_time_secs: u64,
    pub size_bytes: u64,
}

/// Why a file was dropped rather than indexed. Not an error; the pipeline
/// continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Ignored,
    NotRegularFile,
    Unreadable,
    TooLarge,
    Binary,
    UnsupportedLanguage,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::Ignored => "ignored",
            DropReason::NotRegularFile => "not-a-regular-file",
            DropReason::Unreadable => "unreadable",
            DropReason::TooLarge => "too-large",
            DropReason::Binary => "binary",
            DropReason::UnsupportedLanguage => "unsupported-language",
        };
        f.write_str(s)
    }
}

/// Outcome of the content pass for a single file.
#[derive(Debug)]
pub enum Scanned {
    Record { record: FileRecord, content: String },
    Dropped(DropReason),
}

pub struct Scanner {
    root: PathBuf,
    matcher: IgnoreMatcher,
    max_file_size: u64,
    languages: HashMap<&'static str, &'static str>,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, matcher: IgnoreMatcher) -> Self {
        Self {
            root: root.into(),
            matcher,
            max_file_size: 1024 * 1024,
            languages: language_map(),
        }
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Metadata pass: every non-ignored regular file below the root, with
    /// mod time and size. Content is not read.
    pub fn list_files(&self) -> Result<Vec<FileMeta>> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root).follow_links(false).into_iter();

        for entry in walker.filter_entry(|e| {
            let rel = match e.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => return true,
            };
            if rel.as_os_str().is_empty() {
                return true;
            }
            !self
                .matcher
                .is_ignored(&rel.to_string_lossy(), e.file_type().is_dir())
        }) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!("scan walk error: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .context("walked path escaped the scan root")?
                .to_string_lossy()
                .replace('\\', "/");

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(err) => {
                    tracing::debug!("failed to stat {}: {}", rel, err);
                    continue;
                }
            };
            out.push(FileMeta {
                relative_path: rel,
                mod_time_secs: mod_time_secs(&meta),
                size_bytes: meta.len(),
            });
        }

        out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(out)
    }

    /// Content pass for one root-relative path: apply the drop chain, read
    /// the file, compute the content hash.
    pub fn scan_file(&self, rel_path: &str) -> Result<Scanned> {
        if self.matcher.is_ignored(rel_path, false) {
            return Ok(Scanned::Dropped(DropReason::Ignored));
        }

        let abs = self.root.join(rel_path);
        let meta = match std::fs::symlink_metadata(&abs) {
            Ok(meta) => meta,
            Err(_) => return Ok(Scanned::Dropped(DropReason::Unreadable)),
        };
        if !meta.is_file() {
            return Ok(Scanned::Dropped(DropReason::NotRegularFile));
        }
        if meta.len() > self.max_file_size {
            return Ok(Scanned::Dropped(DropReason::TooLarge));
        }

        let bytes = match std::fs::read(&abs) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(Scanned::Dropped(DropReason::Unreadable)),
        };

        let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
        if sniff.contains(&0u8) {
            return Ok(Scanned::Dropped(DropReason::Binary));
        }

        let language = match self.language_for(rel_path) {
            Some(lang) => lang.to_string(),
            None => return Ok(Scanned::Dropped(DropReason::UnsupportedLanguage)),
        };

        let content = String::from_utf8_lossy(&bytes).into_owned();
        let record = FileRecord {
            relative_path: rel_path.to_string(),
            content_hash: content_hash(&bytes),
            mod_time_secs: mod_time_secs(&meta),
            size_bytes: meta.len(),
            language,
        };
        Ok(Scanned::Record { record, content })
    }

    /// Language tag for a path, or None when the extension is unsupported.
    pub fn language_for(&self, rel_path: &str) -> Option<&'static str> {
        let ext = Path::new(rel_path).extension()?.to_str()?;
        self.languages.get(ext.to_ascii_lowercase().as_str()).copied()
    }
}

/// Hex SHA-256 digest of raw file bytes; stable across runs.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn mod_time_secs(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn language_map() -> HashMap<&'static str, &'static str> {
    [
        ("go", "go"),
        ("rs", "rust"),
        ("py", "python"),
        ("js", "javascript"),
        ("jsx", "javascript"),
        ("ts", "typescript"),
        ("tsx", "typescript"),
        ("php", "php"),
        ("c", "c"),
        ("h", "c"),
        ("cpp", "cpp"),
        ("cc", "cpp"),
        ("cxx", "cpp"),
        ("hpp", "cpp"),
        ("hxx", "cpp"),
        ("zig", "zig"),
        ("java", "java"),
        ("kt", "kotlin"),
        ("rb", "ruby"),
        ("swift", "swift"),
        ("cs", "csharp"),
        ("sh", "shell"),
        ("bash", "shell"),
        ("lua", "lua"),
        ("sql", "sql"),
        ("md", "markdown"),
        ("yml", "yaml"),
        ("yaml", "yaml"),
        ("toml", "toml"),
        ("json", "json"),
    ]
    .into_iter()
    .collect()
}
