//! Filesystem watching for automatic sync.
//!
//! The notify callback runs on the watcher's own thread and only pushes paths
//! into a bounded queue. One debounce task drains the queue, waits until no
//! event has arrived for the debounce window, then runs a single settle
//! action (a sync). Events that arrive while the action runs stay queued and
//! start the next window.
//!
//! Targets that do not exist yet are retried before every settle action. A
//! directory created under a watched root queues an event, so a `memory/`
//! directory made after watching began is picked up on the next settle.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::discover::has_note_extension;

/// Pending-event capacity. When full, new events are dropped: a sync is
/// already due and will observe them.
const QUEUE_CAPACITY: usize = 256;

/// What to watch and how.
#[derive(Debug, Clone)]
pub(crate) struct WatchTarget {
    pub path: PathBuf,
    pub recursive: bool,
}

/// A running watcher plus its debounce task.
pub(crate) struct WatchHandle {
    watcher: Arc<Mutex<RecommendedWatcher>>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop delivering events and wait for the debounce task to exit. A
    /// settle action already running is allowed to finish.
    pub(crate) async fn shutdown(self) {
        let WatchHandle {
            watcher,
            shutdown,
            task,
        } = self;
        drop(watcher);
        let _ = shutdown.send(());
        if let Err(e) = task.await {
            warn!(error = %e, "watch task ended abnormally");
        }
    }
}

/// Start watching `targets`. Missing targets are armed once they appear.
///
/// `on_settle` runs after each quiet period; returning `false` ends the task.
pub(crate) fn spawn<F, Fut>(
    targets: &[WatchTarget],
    debounce: Duration,
    on_settle: F,
) -> Result<WatchHandle>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<PathBuf>(QUEUE_CAPACITY);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !is_relevant_kind(&event.kind) {
                return;
            }
            let removal = matches!(event.kind, EventKind::Remove(_));
            let creation = matches!(event.kind, EventKind::Create(_));
            for path in event.paths {
                if !removal && !has_note_extension(&path) && !(creation && path.is_dir()) {
                    continue;
                }
                debug!(path = %path.display(), kind = ?event.kind, "memory file event");
                match tx.try_send(path) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("watch queue full, event coalesced");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
        }
        Err(e) => warn!(error = %e, "file watcher error"),
    })
    .context("failed to create file watcher")?;

    let mut pending = Vec::new();
    for target in targets {
        if !target.path.exists() {
            debug!(path = %target.path.display(), "watch target missing, will retry");
            pending.push(target.clone());
            continue;
        }
        arm(&mut watcher, target).with_context(|| format!("failed to watch {}", target.path.display()))?;
    }

    let watcher = Arc::new(Mutex::new(watcher));
    let rearm = Arc::clone(&watcher);
    let mut on_settle = on_settle;
    let settle = move || {
        if !pending.is_empty() {
            match rearm.lock() {
                Ok(mut w) => pending.retain(|target| !try_arm(&mut w, target)),
                Err(_) => warn!("watcher lock poisoned, missing targets not re-armed"),
            }
        }
        on_settle()
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(debounce_loop(rx, shutdown_rx, debounce, settle));

    Ok(WatchHandle {
        watcher,
        shutdown: shutdown_tx,
        task,
    })
}

fn arm(watcher: &mut RecommendedWatcher, target: &WatchTarget) -> notify::Result<()> {
    let mode = if target.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(&target.path, mode)?;
    info!(path = %target.path.display(), recursive = target.recursive, "watching");
    Ok(())
}

/// Arm `target` if it exists now. Returns whether it is being watched.
fn try_arm(watcher: &mut RecommendedWatcher, target: &WatchTarget) -> bool {
    if !target.path.exists() {
        return false;
    }
    match arm(watcher, target) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %target.path.display(), error = %e, "failed to watch new target");
            false
        }
    }
}

fn is_relevant_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// Watch targets for a workspace: the root (for the root note) without
/// recursion, the memory subtree recursively, and any extra paths.
pub(crate) fn targets_for(workspace: &Path, memory_dir: &Path, extra_paths: &[PathBuf]) -> Vec<WatchTarget> {
    let mut targets = vec![
        WatchTarget {
            path: workspace.to_path_buf(),
            recursive: false,
        },
        WatchTarget {
            path: memory_dir.to_path_buf(),
            recursive: true,
        },
    ];
    targets.extend(extra_paths.iter().map(|p| WatchTarget {
        path: p.clone(),
        recursive: p.is_dir(),
    }));
    targets
}

async fn debounce_loop<F, Fut>(
    mut rx: mpsc::Receiver<PathBuf>,
    mut shutdown: oneshot::Receiver<()>,
    window: Duration,
    mut on_settle: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        tokio::select! {
            _ = &mut shutdown => return,
            event = rx.recv() => {
                if event.is_none() {
                    return;
                }
            }
        }

        // Restart the window on every event until one full window is quiet.
        let mut closed = false;
        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                next = tokio::time::timeout(window, rx.recv()) => match next {
                    Ok(Some(_)) => continue,
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                },
            }
        }

        debug!("watch window settled, syncing");
        if !on_settle().await || closed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<bool> + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let settle = move || {
            c.fetch_add(1, Ordering::SeqCst);
            std::future::ready(true)
        };
        (count, settle)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_events_settles_once() {
        let (tx, rx) = mpsc::channel(16);
        let (_stop, stop_rx) = oneshot::channel();
        let (count, settle) = counter();
        let task = tokio::spawn(debounce_loop(rx, stop_rx, Duration::from_millis(100), settle));

        for i in 0..5 {
            tx.send(PathBuf::from(format!("memory/{i}.md"))).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tx.send(PathBuf::from("MEMORY.md")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_window() {
        let (tx, rx) = mpsc::channel(16);
        let (stop, stop_rx) = oneshot::channel();
        let (count, settle) = counter();
        let task = tokio::spawn(debounce_loop(rx, stop_rx, Duration::from_millis(100), settle));

        tx.send(PathBuf::from("memory/a.md")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn targets_cover_root_and_subtree() {
        let targets = targets_for(Path::new("/ws"), Path::new("/ws/memory"), &[]);
        assert_eq!(targets.len(), 2);
        assert!(!targets[0].recursive);
        assert!(targets[1].recursive);
    }
}
