//! File system watcher with debouncing for development mode.
//!
//! Watches the project directory and publishes change events, ignoring
//! node_modules, build outputs, hidden files and other configured patterns.

use crate::error::{DevError, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

/// Kind of file system change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A single file change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Absolute path of the changed file
    pub path: PathBuf,
    /// What happened to it
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// File watcher with debouncing and filtering.
///
/// Events are published on a broadcast channel so several consumers (the
/// rebuild coordinator and the module cache) each see every change.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root` recursively.
    ///
    /// Must be called from within a Tokio runtime: the debounce timer runs as
    /// a task on it.
    ///
    /// # Arguments
    ///
    /// * `root` - Root directory to watch
    /// * `ignore_patterns` - Directory names/prefixes or `*.ext` patterns to skip
    /// * `debounce_ms` - A path is published once it has been quiet this long
    /// * `tx` - Channel receiving the change events
    ///
    /// # Errors
    ///
    /// Returns error if the directory doesn't exist or the OS watcher fails
    pub fn new(
        root: PathBuf,
        ignore_patterns: Vec<String>,
        debounce_ms: u64,
        tx: broadcast::Sender<ChangeEvent>,
    ) -> Result<Self> {
        if !root.exists() {
            return Err(DevError::FileNotFound(root));
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let root_clone = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("File watcher error: {}", e);
                    return;
                }
            };

            let kind = match event.kind {
                notify::EventKind::Create(_) => ChangeKind::Created,
                notify::EventKind::Modify(_) => ChangeKind::Modified,
                notify::EventKind::Remove(_) => ChangeKind::Removed,
                _ => return,
            };

            for path in &event.paths {
                if Self::should_ignore(path, &root_clone, &ignore_patterns) {
                    continue;
                }
                let _ = raw_tx.send(ChangeEvent::new(path.clone(), kind));
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;

        // Ends once the watcher (and with it the raw sender) is dropped
        tokio::spawn(debounce(raw_rx, Duration::from_millis(debounce_ms), tx));

        Ok(Self {
            _watcher: watcher,
            root,
        })
    }

    /// Check if a path should be ignored.
    fn should_ignore(path: &Path, root: &Path, ignore_patterns: &[String]) -> bool {
        let rel_path = match path.strip_prefix(root) {
            Ok(p) => p,
            Err(_) => return true,
        };

        let path_str = rel_path.to_string_lossy().replace('\\', "/");

        for pattern in ignore_patterns {
            if let Some(ext) = pattern.strip_prefix('*') {
                if path_str.ends_with(ext) {
                    return true;
                }
            } else if path_str == *pattern
                || path_str.starts_with(&format!("{}/", pattern))
                || path_str.contains(&format!("/{}/", pattern))
            {
                return true;
            }
        }

        // Hidden files and directories, including staging directories
        rel_path.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
        })
    }

    /// Get the root directory being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Hold each path until it has been quiet for `window`, then publish the
/// last change seen for it.
async fn debounce(
    mut raw: mpsc::UnboundedReceiver<ChangeEvent>,
    window: Duration,
    tx: broadcast::Sender<ChangeEvent>,
) {
    let mut pending: HashMap<PathBuf, (ChangeKind, Instant)> = HashMap::new();

    loop {
        let deadline = pending.values().map(|(_, seen)| *seen + window).min();
        tokio::select! {
            received = raw.recv() => match received {
                Some(event) => {
                    pending.insert(event.path, (event.kind, Instant::now()));
                }
                None => break,
            },
            _ = sleep_until(deadline) => {
                let now = Instant::now();
                let quiet: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, (_, seen))| *seen + window <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in quiet {
                    if let Some((kind, _)) = pending.remove(&path) {
                        publish(&tx, path, kind);
                    }
                }
            }
        }
    }

    for (path, (kind, _)) in pending.drain() {
        publish(&tx, path, kind);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn publish(tx: &broadcast::Sender<ChangeEvent>, path: PathBuf, kind: ChangeKind) {
    tracing::debug!("File {:?}: {}", kind, path.display());
    // No receivers is fine: nothing is listening yet or anymore
    let _ = tx.send(ChangeEvent::new(path, kind));
}
