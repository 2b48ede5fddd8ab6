//! Project and workspace configuration
//!
//! Each indexed project carries its own `.grepai/` directory holding the
//! YAML config and the binary index snapshots. Workspace-level state (named
//! groups of projects sharing one store and embedder) lives under
//! `~/.grepai/workspace.yaml`.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name for per-project grepai state.
pub const GREPAI_DIR: &str = ".grepai";

/// Per-project configuration, persisted as `.grepai/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub chunk: ChunkConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    /// User ignore patterns, merged with the built-in deny list and .gitignore.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Files larger than this are dropped by the scanner.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkConfig {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: 512,
            overlap: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderProvider {
    Ollama,
    LmStudio,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbedderConfig {
    pub provider: EmbedderProvider,
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
    /// API key for remote providers; local providers ignore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: EmbedderProvider::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Local,
    Sqlite,
    Qdrant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Backend URL (Qdrant only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Debounce window for coalescing rapid writes to the same path.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            embedder: EmbedderConfig::default(),
            store: StoreConfig::default(),
            watch: WatchConfig::default(),
            exclude: Vec::new(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl Config {
    /// Load the project config from `<root>/.grepai/config.yaml`.
    /// A missing file yields the defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = config_path(project_root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_yml::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Save the config to `<root>/.grepai/config.yaml`, creating the
    /// `.grepai` directory if needed.
    pub fn save(&self, project_root: &Path) -> Result<()> {
        let dir = grepai_dir(project_root);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let raw = serde_yml::to_string(self).context("failed to serialize config")?;
        fs::write(config_path(project_root), raw).context("failed to write config")?;
        Ok(())
    }
}

/// `<root>/.grepai`
pub fn grepai_dir(project_root: &Path) -> PathBuf {
    project_root.join(GREPAI_DIR)
}

/// `<root>/.grepai/config.yaml`
pub fn config_path(project_root: &Path) -> PathBuf {
    grepai_dir(project_root).join("config.yaml")
}

/// `<root>/.grepai/vectors.bin` — local vector store snapshot.
pub fn vector_index_path(project_root: &Path) -> PathBuf {
    grepai_dir(project_root).join("vectors.bin")
}

/// `<root>/.grepai/symbols.bin` — symbol store snapshot.
pub fn symbol_index_path(project_root: &Path) -> PathBuf {
    grepai_dir(project_root).join("symbols.bin")
}

/// `<root>/.grepai/rpg.bin` — reserved for the planning-graph extension.
pub fn rpg_index_path(project_root: &Path) -> PathBuf {
    grepai_dir(project_root).join("rpg.bin")
}

/// `<root>/.grepai/watch-log-dir` — hint file naming a custom log directory.
pub fn watch_log_dir_hint_path(project_root: &Path) -> PathBuf {
    grepai_dir(project_root).join("watch-log-dir")
}

/// Record the absolute log directory the watch daemon was started with so
/// later `--stop`/`--status` invocations can find it.
pub fn save_watch_log_dir_hint(project_root: &Path, log_dir: &Path) -> Result<()> {
    let dir = grepai_dir(project_root);
    fs::create_dir_all(&dir)?;
    if !log_dir.is_absolute() {
        return Err(anyhow!(
            "watch log dir hint must be absolute, got {}",
            log_dir.display()
        ));
    }
    fs::write(
        watch_log_dir_hint_path(project_root),
        format!("{}\n", log_dir.display()),
    )?;
    Ok(())
}

/// Read the hinted log directory, if any. Empty or missing hint yields None.
pub fn read_watch_log_dir_hint(project_root: &Path) -> Result<Option<PathBuf>> {
    let path = watch_log_dir_hint_path(project_root);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(PathBuf::from(trimmed)))
}

/// Remove the log-dir hint after the daemon it pointed at was stopped.
pub fn clear_watch_log_dir_hint(project_root: &Path) -> Result<()> {
    let path = watch_log_dir_hint_path(project_root);
    if path.exists() {
        fs::remove_file(&path)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Workspace configuration (~/.grepai/workspace.yaml)
// ---------------------------------------------------------------------------

/// One project inside a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectEntry {
    pub name: String,
    pub path: PathBuf,
}

/// A named workspace: several projects sharing one store and one embedder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub name: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

/// Top-level workspace registry, persisted at `~/.grepai/workspace.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
}

impl WorkspaceConfig {
    pub fn path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
        Ok(home.join(GREPAI_DIR).join("workspace.yaml"))
    }

    /// Load the workspace registry. Returns None when no registry exists yet.
    pub fn load() -> Result<Option<Self>> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read workspace config at {}", path.display()))?;
        let cfg = serde_yml::from_str(&raw)
            .with_context(|| format!("failed to parse workspace config at {}", path.display()))?;
        Ok(Some(cfg))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_yml::to_string(self).context("failed to serialize workspace config")?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn get_workspace(&self, name: &str) -> Result<&Workspace> {
        self.workspaces
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| anyhow!("workspace {:?} not found", name))
    }
}
