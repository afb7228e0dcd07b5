//! Polling file watcher driving configuration hot-reload.
//!
//! Watched files are stat-ed once a second; a change in modification time,
//! appearance, or disappearance emits the path on the event channel. Stat
//! failures are treated as "absent" rather than errors, so a file being
//! swapped out from under us degrades to a delete-then-create event pair.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the watcher task. Events are the changed path, delivered in poll
/// order; the task ends when `shutdown` flips or the receiver is dropped.
pub fn spawn_watcher(
    paths: Vec<PathBuf>,
    events: mpsc::Sender<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut states: HashMap<PathBuf, Option<(SystemTime, u64)>> = paths
            .iter()
            .map(|p| (p.clone(), stat(p)))
            .collect();
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(files = paths.len(), "watching configuration files");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = poll.tick() => {
                    for path in &paths {
                        let current = stat(path);
                        let previous = states.insert(path.clone(), current);
                        if previous != Some(current) {
                            debug!(path = %path.display(), "file changed");
                            if events.send(path.clone()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    })
}

fn stat(path: &PathBuf) -> Option<(SystemTime, u64)> {
    std::fs::metadata(path)
        .and_then(|m| Ok((m.modified()?, m.len())))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_modification_emits_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fields.csv");
        std::fs::write(&path, "a\n").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_watcher(vec![path.clone()], tx, shutdown_rx);

        // give the watcher a moment to record the initial state, then touch
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "b").unwrap();
        drop(file);

        let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(event, Some(path));
        handle.abort();
    }

    #[tokio::test]
    async fn test_file_creation_emits_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.csv");

        let (tx, mut rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_watcher(vec![path.clone()], tx, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, "a\n").unwrap();

        let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(event, Some(path));
        handle.abort();
    }

    #[tokio::test]
    async fn test_shutdown_stops_watcher() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_watcher(vec![dir.path().join("x")], tx, shutdown_rx);

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
