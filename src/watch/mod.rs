//! Watch orchestration
//!
//! A session runs the pipeline for one project root (initial scan, then
//! event handling); the supervisor keeps a dynamic set of sessions — the
//! main root plus any sibling roots discovery returns — aligned on a
//! reconciliation tick, with retry/backoff for linked sessions, readiness
//! barriers, and graceful cancellation.

mod session;
mod supervisor;

pub use session::{default_session_runner, run_watch_session};
pub use supervisor::run_dynamic_watch_supervisor;

use crate::embedder::Embedder;
use crate::indexer::IndexObservers;
use crate::watcher::FileEvent;
use anyhow::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Session lifecycle, as surfaced to lifecycle observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Starting,
    Running,
    Retrying,
    Stopping,
    Stopped,
    Removed,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Retrying => "retrying",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Removed => "removed",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(project_root, state, note)` on every transition.
pub type LifecycleObserver = Arc<dyn Fn(&str, SessionState, &str) + Send + Sync>;
/// Total tracked projects, fired every time the set changes.
pub type ScopeObserver = Arc<dyn Fn(usize) + Send + Sync>;
/// Fired once, when the readiness barrier is satisfied.
pub type InitialReadyObserver = Arc<dyn Fn(usize) + Send + Sync>;
/// `(main_root, project_root) -> bool`: which sessions gate initial-ready.
pub type InitialReadySelector = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;
/// Current sibling roots for a main root; empty for leaves.
pub type DiscoverFn = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;
/// Restart delay for a linked session, by 1-based attempt number.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;
/// `(project_root, event)` for every handled watcher event.
pub type EventObserver = Arc<dyn Fn(&str, &FileEvent) + Send + Sync>;

/// Observer set a session threads through to its indexer and watcher.
#[derive(Clone, Default)]
pub struct SessionObservers {
    pub event: Option<EventObserver>,
    pub index: IndexObservers,
}

/// Everything a session runner needs for one project root.
pub struct SessionContext {
    pub cancel: CancellationToken,
    pub project_root: String,
    /// Shared embedder; sessions build their own from project config when
    /// absent.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Must be invoked exactly once, after the initial scan completes.
    pub on_ready: Arc<dyn Fn() + Send + Sync>,
    pub observers: SessionObservers,
}

/// Runs one session to completion. Injectable so tests can substitute
/// scripted runners for the real pipeline.
pub type SessionRunner =
    Arc<dyn Fn(SessionContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Supervisor tuning and observation hooks. Everything is optional; the
/// defaults run real sessions with capped exponential retry backoff.
#[derive(Clone)]
pub struct SupervisorOptions {
    pub session_runner: SessionRunner,
    pub discover: DiscoverFn,
    /// Linked roots started immediately, before the first discovery tick.
    pub initial_linked: Vec<String>,
    pub reconcile_interval: Duration,
    pub retry_backoff: BackoffFn,
    pub lifecycle: Option<LifecycleObserver>,
    pub scope: Option<ScopeObserver>,
    pub initial_ready_selector: InitialReadySelector,
    pub initial_ready: Option<InitialReadyObserver>,
    pub session_observers: SessionObservers,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            session_runner: default_session_runner(),
            discover: Arc::new(|_| Vec::new()),
            initial_linked: Vec::new(),
            reconcile_interval: Duration::from_millis(500),
            retry_backoff: Arc::new(default_backoff),
            lifecycle: None,
            scope: None,
            // Default barrier: every tracked session ready at least once.
            initial_ready_selector: Arc::new(|_, _| true),
            initial_ready: None,
            session_observers: SessionObservers::default(),
        }
    }
}

/// Capped exponential backoff: 1s, 2s, 4s, ... capped at 60s.
pub fn default_backoff(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.saturating_sub(1).min(6);
    Duration::from_secs(secs.min(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_strings() {
        assert_eq!(SessionState::Running.as_str(), "running");
        assert_eq!(SessionState::Retrying.to_string(), "retrying");
        assert_eq!(SessionState::Removed.as_str(), "removed");
    }

    #[test]
    fn test_default_backoff_grows_and_caps() {
        assert_eq!(default_backoff(1), Duration::from_secs(1));
        assert_eq!(default_backoff(2), Duration::from_secs(2));
        assert_eq!(default_backoff(3), Duration::from_secs(4));
        assert!(default_backoff(30) <= Duration::from_secs(60));
    }
}
