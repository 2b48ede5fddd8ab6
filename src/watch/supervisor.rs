//! Multi-root watch supervisor
//!
//! Owns the main session plus one session per discovered sibling root. A
//! reconciliation tick aligns running sessions with the discovery set:
//! missing targets are started, vanished targets are cancelled and removed,
//! and failed linked sessions are restarted after a capped backoff. The main
//! session is special: its failure is fatal and tears everything down.
//! Cancelling the supervisor is always graceful — children are cancelled,
//! joined, and the supervisor returns Ok.

use super::{SessionContext, SessionState, SupervisorOptions};
use crate::embedder::Embedder;
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct SessionHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    attempts: u32,
    retry_at: Option<Instant>,
    removed: bool,
    ready_once: bool,
}

/// Run the supervisor until cancelled or the main session fails.
pub async fn run_dynamic_watch_supervisor(
    cancel: CancellationToken,
    main_root: &str,
    embedder: Option<Arc<dyn Embedder>>,
    opts: SupervisorOptions,
) -> Result<()> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(String, Option<anyhow::Error>)>();
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<String>();

    let mut supervisor = Supervisor {
        main_root: main_root.to_string(),
        embedder,
        opts,
        sessions: HashMap::new(),
        done_tx,
        ready_tx,
        cancel: cancel.clone(),
        initial_ready_fired: false,
    };

    let main = supervisor.main_root.clone();
    supervisor.start_session(&main);
    for root in supervisor.opts.initial_linked.clone() {
        if root != supervisor.main_root && !supervisor.sessions.contains_key(&root) {
            supervisor.start_session(&root);
        }
    }

    let mut tick = tokio::time::interval(supervisor.opts.reconcile_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("watch supervisor cancelled, shutting down {} sessions", supervisor.sessions.len());
                supervisor.shutdown_all().await;
                return Ok(());
            }
            _ = tick.tick() => {
                supervisor.reconcile();
            }
            Some(root) = ready_rx.recv() => {
                supervisor.on_session_ready(&root);
            }
            Some((root, err)) = done_rx.recv() => {
                if let Some(fatal) = supervisor.on_session_done(&root, err) {
                    supervisor.shutdown_all().await;
                    return Err(fatal);
                }
            }
        }
    }
}

struct Supervisor {
    main_root: String,
    embedder: Option<Arc<dyn Embedder>>,
    opts: SupervisorOptions,
    sessions: HashMap<String, SessionHandle>,
    done_tx: mpsc::UnboundedSender<(String, Option<anyhow::Error>)>,
    ready_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    initial_ready_fired: bool,
}

impl Supervisor {
    fn lifecycle(&self, root: &str, state: SessionState, note: &str) {
        if let Some(observer) = &self.opts.lifecycle {
            observer(root, state, note);
        }
    }

    fn scope_changed(&self) {
        if let Some(observer) = &self.opts.scope {
            observer(self.sessions.len());
        }
    }

    /// Track a new session and spawn its first run.
    fn start_session(&mut self, root: &str) {
        let child = self.cancel.child_token();
        self.sessions.insert(
            root.to_string(),
            SessionHandle {
                cancel: child,
                task: None,
                attempts: 0,
                retry_at: None,
                removed: false,
                ready_once: false,
            },
        );
        self.scope_changed();
        self.spawn_session_task(root);
    }

    /// Spawn (or re-spawn, on retry) the runner task for a tracked session.
    fn spawn_session_task(&mut self, root: &str) {
        let Some(cancel) = self.sessions.get(root).map(|s| s.cancel.clone()) else {
            return;
        };
        self.lifecycle(root, SessionState::Starting, "");

        // The session contract: on_ready fires exactly once per run.
        let ready_sent = Arc::new(AtomicBool::new(false));
        let ready_tx = self.ready_tx.clone();
        let ready_root = root.to_string();
        let on_ready = Arc::new(move || {
            if !ready_sent.swap(true, Ordering::SeqCst) {
                let _ = ready_tx.send(ready_root.clone());
            }
        });

        let ctx = SessionContext {
            cancel,
            project_root: root.to_string(),
            embedder: self.embedder.clone(),
            on_ready,
            observers: self.opts.session_observers.clone(),
        };

        let future = (self.opts.session_runner)(ctx);
        let done_tx = self.done_tx.clone();
        let done_root = root.to_string();
        let task = tokio::spawn(async move {
            let result = future.await;
            let _ = done_tx.send((done_root, result.err()));
        });
        if let Some(session) = self.sessions.get_mut(root) {
            session.task = Some(task);
        }
    }

    /// Align tracked sessions with {main} ∪ discover(main), and restart
    /// errored linked sessions whose backoff has elapsed.
    fn reconcile(&mut self) {
        let mut targets: HashSet<String> = HashSet::new();
        targets.insert(self.main_root.clone());
        for root in (self.opts.discover)(&self.main_root) {
            targets.insert(root);
        }

        // Start sessions for new targets.
        let missing: Vec<String> = targets
            .iter()
            .filter(|root| !self.sessions.contains_key(*root))
            .cloned()
            .collect();
        for root in missing {
            debug!("discovered new root {}", root);
            self.start_session(&root);
        }

        // Detach sessions whose root left the discovery set.
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|(root, s)| !s.removed && *root != &self.main_root && !targets.contains(*root))
            .map(|(root, _)| root.clone())
            .collect();
        for root in stale {
            info!("root {} left discovery set, removing session", root);
            self.lifecycle(&root, SessionState::Removed, "root no longer discovered");
            let mut gone = false;
            if let Some(session) = self.sessions.get_mut(&root) {
                session.removed = true;
                session.cancel.cancel();
                gone = session.task.is_none();
            }
            if gone {
                // Was waiting on retry; nothing left to join.
                self.sessions.remove(&root);
                self.scope_changed();
            }
        }

        // Restart errored linked sessions whose backoff elapsed.
        let now = Instant::now();
        let due: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                !s.removed && s.task.is_none() && s.retry_at.map(|at| at <= now).unwrap_or(false)
            })
            .map(|(root, _)| root.clone())
            .collect();
        for root in due {
            self.lifecycle(&root, SessionState::Retrying, "");
            if let Some(session) = self.sessions.get_mut(&root) {
                session.retry_at = None;
                // A fresh token: the previous run may have been cancelled.
                session.cancel = self.cancel.child_token();
            }
            self.spawn_session_task(&root);
        }
    }

    fn on_session_ready(&mut self, root: &str) {
        let Some(session) = self.sessions.get_mut(root) else {
            return;
        };
        session.ready_once = true;
        // A session that reached Running again earns a clean retry slate.
        session.attempts = 0;
        self.lifecycle(root, SessionState::Running, "");
        self.check_initial_ready();
    }

    /// Handle a finished session task. Returns the fatal error when the main
    /// session failed.
    fn on_session_done(&mut self, root: &str, err: Option<anyhow::Error>) -> Option<anyhow::Error> {
        let Some(session) = self.sessions.get_mut(root) else {
            return None;
        };
        session.task = None;

        if session.removed {
            self.sessions.remove(root);
            self.scope_changed();
            return None;
        }

        match err {
            Some(err) if root == self.main_root => {
                self.lifecycle(root, SessionState::Error, &err.to_string());
                Some(anyhow!(
                    "watch supervisor: main session for {} failed: {}",
                    root,
                    err
                ))
            }
            Some(err) => {
                session.attempts += 1;
                let delay = (self.opts.retry_backoff)(session.attempts);
                warn!(
                    "linked session {} failed (attempt {}), retrying in {:?}: {}",
                    root, session.attempts, delay, err
                );
                session.retry_at = Some(Instant::now() + delay);
                session.ready_once = false;
                self.lifecycle(root, SessionState::Error, &err.to_string());
                None
            }
            None => {
                if !self.cancel.is_cancelled() {
                    self.lifecycle(root, SessionState::Stopped, "");
                    self.sessions.remove(root);
                    self.scope_changed();
                }
                None
            }
        }
    }

    fn check_initial_ready(&mut self) {
        if self.initial_ready_fired {
            return;
        }
        let selector = &self.opts.initial_ready_selector;
        let selected: Vec<&SessionHandle> = self
            .sessions
            .iter()
            .filter(|(root, s)| !s.removed && selector(&self.main_root, root))
            .map(|(_, s)| s)
            .collect();
        if selected.is_empty() || !selected.iter().all(|s| s.ready_once) {
            return;
        }
        self.initial_ready_fired = true;
        if let Some(observer) = &self.opts.initial_ready {
            observer(selected.len());
        }
    }

    /// Cancel every child session and join them. Errors from cancelled
    /// sessions are discarded; cancellation is graceful by contract.
    async fn shutdown_all(&mut self) {
        for session in self.sessions.values() {
            session.cancel.cancel();
        }
        let mut tasks = Vec::new();
        for (root, session) in self.sessions.iter_mut() {
            if let Some(task) = session.task.take() {
                tasks.push((root.clone(), task));
            }
        }
        for (root, task) in tasks {
            self.lifecycle(&root, SessionState::Stopping, "");
            if task.await.is_err() {
                warn!("session task for {} panicked during shutdown", root);
            }
            self.lifecycle(&root, SessionState::Stopped, "");
        }
        self.sessions.clear();
        self.scope_changed();
    }
}
