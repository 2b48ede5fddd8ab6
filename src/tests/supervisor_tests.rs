//! Supervisor lifecycle scenarios: dynamic discovery, removal, linked-session
//! retry with backoff, main-failure teardown, readiness selection, and the
//! cancel race.

use crate::watch::{
    run_dynamic_watch_supervisor, SessionContext, SessionRunner, SessionState, SupervisorOptions,
};
use anyhow::anyhow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct LifecycleEvent {
    root: String,
    state: SessionState,
    at: Instant,
}

fn lifecycle_channel() -> (
    Arc<dyn Fn(&str, SessionState, &str) + Send + Sync>,
    mpsc::UnboundedReceiver<LifecycleEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let observer = Arc::new(move |root: &str, state: SessionState, _note: &str| {
        let _ = tx.send(LifecycleEvent {
            root: root.to_string(),
            state,
            at: Instant::now(),
        });
    });
    (observer, rx)
}

async fn wait_for_lifecycle(
    rx: &mut mpsc::UnboundedReceiver<LifecycleEvent>,
    root: &str,
    state: SessionState,
    wait: Duration,
) -> LifecycleEvent {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = timeout(remaining, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timeout waiting for {} {}", root, state))
            .expect("lifecycle channel closed");
        if event.root == root && event.state == state {
            return event;
        }
    }
}

async fn wait_for_value(
    rx: &mut mpsc::UnboundedReceiver<usize>,
    want: usize,
    wait: Duration,
) {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let got = timeout(remaining, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timeout waiting for value {}", want))
            .expect("channel closed");
        if got == want {
            return;
        }
    }
}

/// Runner that reports ready and then idles until cancelled.
fn steady_runner() -> SessionRunner {
    Arc::new(|ctx: SessionContext| {
        Box::pin(async move {
            (ctx.on_ready)();
            ctx.cancel.cancelled().await;
            Ok(())
        })
    })
}

fn fast_opts(runner: SessionRunner) -> SupervisorOptions {
    SupervisorOptions {
        session_runner: runner,
        reconcile_interval: Duration::from_millis(20),
        ..SupervisorOptions::default()
    }
}

#[tokio::test]
async fn test_add_linked_root_after_start() {
    let linked: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let discover_linked = linked.clone();

    let (lifecycle, mut lifecycle_rx) = lifecycle_channel();
    let (scope_tx, mut scope_rx) = mpsc::unbounded_channel();

    let mut opts = fast_opts(steady_runner());
    opts.discover = Arc::new(move |_main: &str| discover_linked.lock().unwrap().clone());
    opts.lifecycle = Some(lifecycle);
    opts.scope = Some(Arc::new(move |n| {
        let _ = scope_tx.send(n);
    }));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_dynamic_watch_supervisor(
        cancel.clone(),
        "/tmp/main",
        None,
        opts,
    ));

    wait_for_lifecycle(
        &mut lifecycle_rx,
        "/tmp/main",
        SessionState::Running,
        Duration::from_secs(1),
    )
    .await;
    wait_for_value(&mut scope_rx, 1, Duration::from_secs(1)).await;

    linked.lock().unwrap().push("/tmp/wt-a".to_string());

    wait_for_lifecycle(
        &mut lifecycle_rx,
        "/tmp/wt-a",
        SessionState::Starting,
        Duration::from_secs(2),
    )
    .await;
    wait_for_lifecycle(
        &mut lifecycle_rx,
        "/tmp/wt-a",
        SessionState::Running,
        Duration::from_secs(2),
    )
    .await;
    wait_for_value(&mut scope_rx, 2, Duration::from_secs(2)).await;

    cancel.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_remove_linked_root_during_run() {
    let linked: Arc<Mutex<Vec<String>>> =
        Arc::new(Mutex::new(vec!["/tmp/wt-b".to_string()]));
    let discover_linked = linked.clone();

    let (stopped_tx, mut stopped_rx) = mpsc::unbounded_channel::<String>();
    let runner: SessionRunner = Arc::new(move |ctx: SessionContext| {
        let stopped_tx = stopped_tx.clone();
        Box::pin(async move {
            (ctx.on_ready)();
            ctx.cancel.cancelled().await;
            let _ = stopped_tx.send(ctx.project_root.clone());
            Ok(())
        })
    });

    let (lifecycle, mut lifecycle_rx) = lifecycle_channel();
    let mut opts = fast_opts(runner);
    opts.discover = Arc::new(move |_main: &str| discover_linked.lock().unwrap().clone());
    opts.initial_linked = vec!["/tmp/wt-b".to_string()];
    opts.lifecycle = Some(lifecycle);

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_dynamic_watch_supervisor(
        cancel.clone(),
        "/tmp/main",
        None,
        opts,
    ));

    wait_for_lifecycle(
        &mut lifecycle_rx,
        "/tmp/wt-b",
        SessionState::Running,
        Duration::from_secs(1),
    )
    .await;

    linked.lock().unwrap().clear();

    wait_for_lifecycle(
        &mut lifecycle_rx,
        "/tmp/wt-b",
        SessionState::Removed,
        Duration::from_secs(2),
    )
    .await;

    let stopped = timeout(Duration::from_secs(2), async {
        loop {
            if stopped_rx.recv().await.as_deref() == Some("/tmp/wt-b") {
                return;
            }
        }
    })
    .await;
    assert!(stopped.is_ok(), "linked session did not stop after removal");

    cancel.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_remove_all_linked_roots_shrinks_scope() {
    let linked: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![
        "/tmp/wt-c".to_string(),
        "/tmp/wt-d".to_string(),
    ]));
    let discover_linked = linked.clone();

    let (scope_tx, mut scope_rx) = mpsc::unbounded_channel();
    let mut opts = fast_opts(steady_runner());
    opts.discover = Arc::new(move |_main: &str| discover_linked.lock().unwrap().clone());
    opts.initial_linked = vec!["/tmp/wt-c".to_string(), "/tmp/wt-d".to_string()];
    opts.scope = Some(Arc::new(move |n| {
        let _ = scope_tx.send(n);
    }));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_dynamic_watch_supervisor(
        cancel.clone(),
        "/tmp/main",
        None,
        opts,
    ));

    wait_for_value(&mut scope_rx, 3, Duration::from_secs(1)).await;
    linked.lock().unwrap().clear();
    wait_for_value(&mut scope_rx, 1, Duration::from_secs(2)).await;

    cancel.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_linked_failure_is_isolated_and_retried_with_backoff() {
    let main_root = "/tmp/main";
    let linked_root = "/tmp/wt-e";
    let backoff = Duration::from_millis(100);

    let attempts = Arc::new(AtomicUsize::new(0));
    let runner_attempts = attempts.clone();
    let runner: SessionRunner = Arc::new(move |ctx: SessionContext| {
        let attempts = runner_attempts.clone();
        Box::pin(async move {
            if ctx.project_root == "/tmp/main" {
                (ctx.on_ready)();
                ctx.cancel.cancelled().await;
                return Ok(());
            }
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt == 1 {
                return Err(anyhow!("linked boom"));
            }
            (ctx.on_ready)();
            ctx.cancel.cancelled().await;
            Ok(())
        })
    });

    let (lifecycle, mut lifecycle_rx) = lifecycle_channel();
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    let mut opts = fast_opts(runner);
    opts.discover = Arc::new(move |_main: &str| vec!["/tmp/wt-e".to_string()]);
    opts.initial_linked = vec![linked_root.to_string()];
    opts.retry_backoff = Arc::new(move |attempt| backoff * attempt);
    opts.lifecycle = Some(lifecycle);
    opts.initial_ready = Some(Arc::new(move |n| {
        let _ = ready_tx.send(n);
    }));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_dynamic_watch_supervisor(
        cancel.clone(),
        main_root,
        None,
        opts,
    ));

    // The events interleave across sessions; collect until every expected
    // (root, state) pair has been observed, keeping timestamps.
    let mut pending: std::collections::HashSet<(String, SessionState)> = [
        (main_root.to_string(), SessionState::Running),
        (linked_root.to_string(), SessionState::Error),
        (linked_root.to_string(), SessionState::Retrying),
        (linked_root.to_string(), SessionState::Running),
    ]
    .into_iter()
    .collect();
    let mut error_at = None;
    let mut retry_at = None;
    let deadline = Instant::now() + Duration::from_secs(3);
    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = timeout(remaining, lifecycle_rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timeout, missing states: {:?}", pending))
            .expect("lifecycle channel closed");
        if event.root == linked_root && event.state == SessionState::Error {
            error_at.get_or_insert(event.at);
        }
        if event.root == linked_root && event.state == SessionState::Retrying {
            retry_at.get_or_insert(event.at);
        }
        pending.remove(&(event.root.clone(), event.state));
    }

    // The restart must respect the scheduled backoff for attempt 1.
    let gap = retry_at
        .unwrap()
        .duration_since(error_at.unwrap());
    assert!(
        gap >= backoff,
        "retry after {:?}, expected at least {:?}",
        gap,
        backoff
    );

    // Both sessions eventually ready → the default barrier fires with 2.
    wait_for_value(&mut ready_rx, 2, Duration::from_secs(2)).await;

    cancel.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_main_failure_cancels_linked_and_is_fatal() {
    let (stopped_tx, mut stopped_rx) = mpsc::unbounded_channel::<String>();
    let runner: SessionRunner = Arc::new(move |ctx: SessionContext| {
        let stopped_tx = stopped_tx.clone();
        Box::pin(async move {
            (ctx.on_ready)();
            if ctx.project_root == "/tmp/main" {
                return Err(anyhow!("main session failed"));
            }
            ctx.cancel.cancelled().await;
            let _ = stopped_tx.send(ctx.project_root.clone());
            Ok(())
        })
    });

    let mut opts = fast_opts(runner);
    opts.discover = Arc::new(|_main: &str| vec!["/tmp/wt-f".to_string()]);
    opts.initial_linked = vec!["/tmp/wt-f".to_string()];

    let err = run_dynamic_watch_supervisor(CancellationToken::new(), "/tmp/main", None, opts)
        .await
        .expect_err("expected main failure to be fatal");
    assert!(
        err.to_string().contains("main session failed"),
        "unexpected error: {}",
        err
    );

    let stopped = timeout(Duration::from_secs(2), stopped_rx.recv()).await;
    assert!(
        matches!(stopped, Ok(Some(root)) if root == "/tmp/wt-f"),
        "linked session was not stopped after main failure"
    );
}

#[tokio::test]
async fn test_initial_ready_selector_main_only() {
    let runner: SessionRunner = Arc::new(|ctx: SessionContext| {
        Box::pin(async move {
            if ctx.project_root == "/tmp/main" {
                (ctx.on_ready)();
                ctx.cancel.cancelled().await;
                return Ok(());
            }
            Err(anyhow!("linked startup failure"))
        })
    });

    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    let mut opts = fast_opts(runner);
    opts.discover = Arc::new(|_main: &str| vec!["/tmp/wt-g".to_string()]);
    opts.initial_linked = vec!["/tmp/wt-g".to_string()];
    opts.retry_backoff = Arc::new(|_| Duration::from_millis(20));
    opts.initial_ready_selector = Arc::new(|main, project| main == project);
    opts.initial_ready = Some(Arc::new(move |n| {
        let _ = ready_tx.send(n);
    }));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_dynamic_watch_supervisor(
        cancel.clone(),
        "/tmp/main",
        None,
        opts,
    ));

    wait_for_value(&mut ready_rx, 1, Duration::from_secs(1)).await;

    cancel.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_cancel_remains_graceful_under_race() {
    for i in 0..100 {
        let (lifecycle, mut lifecycle_rx) = lifecycle_channel();
        let mut opts = fast_opts(steady_runner());
        opts.discover = Arc::new(|_main: &str| vec!["/tmp/wt-h".to_string()]);
        opts.initial_linked = vec!["/tmp/wt-h".to_string()];
        opts.lifecycle = Some(lifecycle);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_dynamic_watch_supervisor(
            cancel.clone(),
            "/tmp/main",
            None,
            opts,
        ));

        wait_for_lifecycle(
            &mut lifecycle_rx,
            "/tmp/main",
            SessionState::Running,
            Duration::from_secs(1),
        )
        .await;

        cancel.cancel();

        let result = timeout(Duration::from_secs(2), handle)
            .await
            .unwrap_or_else(|_| panic!("iteration {}: supervisor did not shut down", i))
            .unwrap();
        assert!(
            result.is_ok(),
            "iteration {}: expected graceful shutdown, got {:?}",
            i,
            result
        );
    }
}
