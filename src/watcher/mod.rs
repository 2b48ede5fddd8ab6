//! File watcher
//!
//! Wraps notify's OS event stream into normalized, root-relative
//! [`FileEvent`]s. Rapid writes to the same path coalesce within a
//! configurable debounce window; renames surface as a paired delete (old
//! path) and create (new path). Events for different paths are independent;
//! per path they are delivered in emission order.

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Capacity of the outgoing event channel; the debouncer blocks when the
/// consumer lags, so no unbounded queue builds up.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Create,
    Modify,
    Delete,
    Rename,
}

/// A normalized change below the watched root. `path` is root-relative with
/// forward slashes.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEvent {
    pub event_type: EventType,
    pub path: String,
}

pub struct FsWatcher {
    root: PathBuf,
    debounce: Duration,
    watcher: Option<notify::RecommendedWatcher>,
}

impl FsWatcher {
    pub fn new(root: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            root: root.into(),
            debounce,
            watcher: None,
        }
    }

    /// Start watching. Returns the debounced event stream; dropping the
    /// receiver or calling [`FsWatcher::stop`] ends the background tasks.
    pub fn start(&mut self) -> Result<mpsc::Receiver<FileEvent>> {
        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();

        let mut watcher = notify::recommended_watcher(move |res| {
            // A send failure means the receiver is gone and we are
            // shutting down.
            let _ = raw_tx.send(res);
        })
        .context("failed to create file watcher")?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", self.root.display()))?;
        self.watcher = Some(watcher);

        // Bridge the sync notify callback into the async world.
        let (bridge_tx, bridge_rx) = mpsc::unbounded_channel::<FileEvent>();
        let root = self.root.clone();
        std::thread::spawn(move || {
            while let Ok(result) = raw_rx.recv() {
                match result {
                    Ok(event) => {
                        for file_event in normalize_event(&root, event) {
                            if bridge_tx.send(file_event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => warn!("file watcher error: {}", err),
                }
            }
        });

        let (out_tx, out_rx) = mpsc::channel::<FileEvent>(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(debounce_loop(bridge_rx, out_tx, self.debounce));
        debug!("file watcher started for {}", self.root.display());
        Ok(out_rx)
    }

    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            debug!("file watcher stopped for {}", self.root.display());
        }
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Coalesce rapid events per path: an event is released once the path has
/// been quiet for the debounce window.
async fn debounce_loop(
    mut input: mpsc::UnboundedReceiver<FileEvent>,
    output: mpsc::Sender<FileEvent>,
    window: Duration,
) {
    let tick = window.div_f32(2.0).max(Duration::from_millis(20));
    let mut interval = tokio::time::interval(tick);
    let mut pending: HashMap<String, (EventType, Instant)> = HashMap::new();
    let mut closed = false;

    loop {
        tokio::select! {
            event = input.recv(), if !closed => {
                match event {
                    Some(event) => {
                        let merged = match pending.get(&event.path) {
                            Some((existing, _)) => merge_event_types(*existing, event.event_type),
                            None => event.event_type,
                        };
                        pending.insert(event.path, (merged, Instant::now()));
                    }
                    None => closed = true,
                }
            }
            _ = interval.tick() => {
                let now = Instant::now();
                let ready: Vec<String> = pending
                    .iter()
                    .filter(|(_, (_, seen))| now.duration_since(*seen) >= window)
                    .map(|(path, _)| path.clone())
                    .collect();
                let mut sorted = ready;
                sorted.sort();
                for path in sorted {
                    if let Some((event_type, _)) = pending.remove(&path) {
                        if output.send(FileEvent { event_type, path }).await.is_err() {
                            return;
                        }
                    }
                }
                if closed && pending.is_empty() {
                    return;
                }
            }
        }
    }
}

/// Merge a newly observed event into a pending one for the same path.
pub(crate) fn merge_event_types(existing: EventType, new: EventType) -> EventType {
    match (existing, new) {
        (_, EventType::Delete) => EventType::Delete,
        (EventType::Create, _) => EventType::Create,
        (EventType::Delete, EventType::Create) => EventType::Modify,
        (EventType::Delete, _) => EventType::Modify,
        (_, new) => new,
    }
}

/// Translate one notify event into zero or more normalized events.
fn normalize_event(root: &Path, event: notify::Event) -> Vec<FileEvent> {
    let mut out = Vec::new();
    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                push_event(&mut out, root, path, EventType::Create);
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                push_event(&mut out, root, path, EventType::Delete);
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            // A rename is a delete of the old path plus a create of the new.
            RenameMode::From => {
                for path in &event.paths {
                    push_event(&mut out, root, path, EventType::Delete);
                }
            }
            RenameMode::To => {
                for path in &event.paths {
                    push_event(&mut out, root, path, EventType::Create);
                }
            }
            RenameMode::Both => {
                if let Some(from) = event.paths.first() {
                    push_event(&mut out, root, from, EventType::Delete);
                }
                if let Some(to) = event.paths.get(1) {
                    push_event(&mut out, root, to, EventType::Create);
                }
            }
            _ => {
                for path in &event.paths {
                    let event_type = if path.exists() {
                        EventType::Create
                    } else {
                        EventType::Delete
                    };
                    push_event(&mut out, root, path, event_type);
                }
            }
        },
        EventKind::Modify(_) => {
            for path in &event.paths {
                push_event(&mut out, root, path, EventType::Modify);
            }
        }
        other => {
            debug!("ignoring event kind {:?}", other);
        }
    }
    out
}

fn push_event(out: &mut Vec<FileEvent>, root: &Path, path: &Path, event_type: EventType) {
    let Ok(rel) = path.strip_prefix(root) else {
        error!("watched path {} escaped root {}", path.display(), root.display());
        return;
    };
    if rel.as_os_str().is_empty() {
        return;
    }
    out.push(FileEvent {
        event_type,
        path: rel.to_string_lossy().replace('\\', "/"),
    });
}
