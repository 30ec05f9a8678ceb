use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::session::lifecycle::ReconciliationTrigger;

pub enum AppEvent {
    /// One line typed by the learner.
    Input(String),
    Trigger(ReconciliationTrigger),
    /// Stdin closed.
    Eof,
}

/// Serializes stdin lines, timer ticks and snapshot-file changes onto one
/// channel so the engine only ever sees one event at a time.
pub struct EventHandler {
    rx: mpsc::Receiver<AppEvent>,
    _tx: mpsc::Sender<AppEvent>,
    _watcher: Option<RecommendedWatcher>,
}

impl EventHandler {
    pub fn new(tick_rate: Duration, snapshot_path: Option<&Path>) -> Self {
        let (tx, rx) = mpsc::channel();
        let _tx = tx.clone();

        let input_tx = tx.clone();
        thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if input_tx.send(AppEvent::Input(line)).is_err() {
                    return;
                }
            }
            let _ = input_tx.send(AppEvent::Eof);
        });

        let tick_tx = tx.clone();
        thread::spawn(move || {
            loop {
                thread::sleep(tick_rate);
                if tick_tx
                    .send(AppEvent::Trigger(ReconciliationTrigger::Tick))
                    .is_err()
                {
                    return;
                }
            }
        });

        let _watcher = snapshot_path.and_then(|path| match watch_snapshot(path, tx) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(%err, "snapshot watcher unavailable, cross-process changes arrive on focus only");
                None
            }
        });

        Self { rx, _tx, _watcher }
    }

    pub fn next(&self) -> anyhow::Result<AppEvent> {
        Ok(self.rx.recv()?)
    }
}

/// Watch the directory holding the snapshot; the file itself is replaced by
/// rename on every write, so a watch on the file would go stale.
fn watch_snapshot(path: &Path, tx: mpsc::Sender<AppEvent>) -> anyhow::Result<RecommendedWatcher> {
    let target: PathBuf = path.to_path_buf();
    let file_name = target
        .file_name()
        .map(|n| n.to_os_string())
        .context("snapshot path has no file name")?;
    let dir = target
        .parent()
        .map(Path::to_path_buf)
        .context("snapshot path has no parent directory")?;

    let handler = move |res: Result<Event, notify::Error>| match res {
        Ok(event) => {
            let relevant = matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) && event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(file_name.as_os_str()));
            if relevant {
                debug!(kind = ?event.kind, "snapshot file changed");
                let _ = tx.send(AppEvent::Trigger(ReconciliationTrigger::StorageChanged));
            }
        }
        Err(err) => warn!(%err, "snapshot watch error"),
    };

    let mut watcher =
        notify::recommended_watcher(handler).context("failed to create snapshot watcher")?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;
    Ok(watcher)
}
