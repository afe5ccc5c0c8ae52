//! Rebuilds the client bundle when application sources change.
//!
//! Each change notification is checked against the application source root.
//! In-scope changes wake a single build loop; triggers that arrive while a
//! build is running collapse into one follow-up build, so builds never
//! overlap and the last one always starts after the last change.

use crate::dev::builder::ClientBundleBuilder;
use crate::dev::manifest::BuildManifest;
use crate::dev::scope;
use crate::dev::state::SharedState;
use crate::dev::watcher::ChangeEvent;
use crate::dev::DevEvent;
use crate::error::BuildError;
use crate::ui;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub struct HotReloadCoordinator {
    builder: ClientBundleBuilder,
    state: SharedState,
    source_root: PathBuf,
    trigger: Notify,
}

impl HotReloadCoordinator {
    /// # Arguments
    ///
    /// * `builder` - Client bundle builder to re-run
    /// * `state` - Shared state receiving build status and events
    /// * `source_root` - Absolute application source directory
    pub fn new(builder: ClientBundleBuilder, state: SharedState, source_root: PathBuf) -> Self {
        Self {
            builder,
            state,
            source_root,
            trigger: Notify::new(),
        }
    }

    /// Evaluate one change notification, scheduling a build if it is in scope.
    ///
    /// Returns whether a build was scheduled.
    pub fn on_change(&self, event: &ChangeEvent) -> bool {
        if !scope::in_scope(&event.path, &self.source_root) {
            tracing::debug!("Ignoring change outside {}: {}", self.source_root.display(), event.path.display());
            return false;
        }

        ui::info(&format!("File changed: {}", event.path.display()));
        // At most one stored permit: repeated triggers during a build merge
        self.trigger.notify_one();
        true
    }

    /// Run one build now, recording the outcome in the shared state.
    pub async fn run_build(&self) -> Result<Arc<BuildManifest>, BuildError> {
        let start = Instant::now();
        self.state.start_build();
        self.state.broadcast(&DevEvent::BuildStarted).await;

        match self.builder.build().await {
            Ok(manifest) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                let assets = manifest.len();
                if let Some(entry) = manifest.entry() {
                    tracing::debug!(
                        "Client entry: {} ({})",
                        entry.file,
                        entry.hash.as_deref().unwrap_or("-")
                    );
                }
                self.state.complete_build(duration_ms, manifest);
                ui::success(&format!(
                    "Client build completed in {} ({} assets)",
                    ui::format_duration(duration_ms),
                    assets
                ));
                self.state
                    .broadcast(&DevEvent::BuildCompleted {
                        duration_ms,
                        assets,
                    })
                    .await;
                Ok(self.state.manifest())
            }
            Err(e) => {
                let error = e.to_string();
                self.state.fail_build(error.clone());
                ui::error(&format!("Client build failed: {}", error));
                self.state.broadcast(&DevEvent::BuildFailed { error }).await;
                Err(e)
            }
        }
    }

    /// Start consuming change notifications.
    ///
    /// Notifications already queued on `changes` are processed first, so a
    /// receiver taken before the cold build loses nothing. The returned task ends when the change channel closes; the build loop
    /// is stopped with it.
    pub fn spawn(self: Arc<Self>, mut changes: broadcast::Receiver<ChangeEvent>) -> JoinHandle<()> {
        let builds = Arc::clone(&self);
        let build_loop = tokio::spawn(async move {
            loop {
                builds.trigger.notified().await;
                // Failures are already recorded and reported
                let _ = builds.run_build().await;
            }
        });

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        self.on_change(&event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Missed {} change notifications, rebuilding", missed);
                        self.trigger.notify_one();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            build_loop.abort();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::builder::Bundler;
    use crate::dev::state::DevServerState;
    use crate::dev::watcher::ChangeKind;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Emits a client entry whose content differs on every build.
    #[derive(Default)]
    struct CountingBundler {
        started: AtomicUsize,
        finished: AtomicUsize,
        delay_ms: u64,
    }

    #[async_trait]
    impl Bundler for CountingBundler {
        async fn bundle(&self, out_dir: &Path) -> Result<(), BuildError> {
            let n = self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            std::fs::write(out_dir.join("client.js"), format!("build {}", n))?;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn coordinator(temp: &TempDir, bundler: Arc<CountingBundler>) -> Arc<HotReloadCoordinator> {
        let builder = ClientBundleBuilder::new(
            bundler,
            temp.path().join("site/static"),
            "app/client.tsx",
            "client",
        );
        Arc::new(HotReloadCoordinator::new(
            builder,
            Arc::new(DevServerState::new()),
            temp.path().join("app"),
        ))
    }

    async fn wait_for(counter: &AtomicUsize, n: usize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {} builds", n);
    }

    #[tokio::test]
    async fn test_in_scope_change_builds_once() {
        let temp = TempDir::new().unwrap();
        let bundler = Arc::new(CountingBundler::default());
        let coordinator = coordinator(&temp, bundler.clone());
        let before = coordinator.run_build().await.unwrap();

        let (tx, rx) = broadcast::channel(16);
        let _task = Arc::clone(&coordinator).spawn(rx);
        tx.send(ChangeEvent::new(temp.path().join("app/routes/index.tsx"), ChangeKind::Modified))
            .unwrap();

        wait_for(&bundler.finished, 2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(bundler.started.load(Ordering::SeqCst), 2);
        let after = coordinator.state.manifest();
        assert_ne!(
            before.get("app/client.tsx").unwrap().hash,
            after.get("app/client.tsx").unwrap().hash
        );
    }

    #[tokio::test]
    async fn test_out_of_scope_change_never_builds() {
        let temp = TempDir::new().unwrap();
        let bundler = Arc::new(CountingBundler::default());
        let coordinator = coordinator(&temp, bundler.clone());

        assert!(!coordinator.on_change(&ChangeEvent::new(
            temp.path().join("dev-server.ts"),
            ChangeKind::Modified
        )));

        let (tx, rx) = broadcast::channel(16);
        let _task = Arc::clone(&coordinator).spawn(rx);
        tx.send(ChangeEvent::new(temp.path().join("site/static/client.js"), ChangeKind::Created))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(bundler.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_changes_during_build_coalesce() {
        let temp = TempDir::new().unwrap();
        let bundler = Arc::new(CountingBundler {
            delay_ms: 200,
            ..Default::default()
        });
        let coordinator = coordinator(&temp, bundler.clone());
        let (_tx, rx) = broadcast::channel::<ChangeEvent>(16);
        let _task = Arc::clone(&coordinator).spawn(rx);
        let change = ChangeEvent::new(temp.path().join("app/client.tsx"), ChangeKind::Modified);

        assert!(coordinator.on_change(&change));
        wait_for(&bundler.started, 1).await;
        for _ in 0..5 {
            coordinator.on_change(&change);
        }

        wait_for(&bundler.finished, 2).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(bundler.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_build_is_recorded() {
        struct FailingBundler;

        #[async_trait]
        impl Bundler for FailingBundler {
            async fn bundle(&self, _out_dir: &Path) -> Result<(), BuildError> {
                Err(BuildError::EmptyCommand)
            }
        }

        let temp = TempDir::new().unwrap();
        let state = Arc::new(DevServerState::new());
        let (_, mut events) = state.register_client();
        let builder = ClientBundleBuilder::new(
            Arc::new(FailingBundler),
            temp.path().join("out"),
            "app/client.tsx",
            "client",
        );
        let coordinator = HotReloadCoordinator::new(builder, state.clone(), temp.path().join("app"));

        assert!(coordinator.run_build().await.is_err());
        assert!(state.get_status().error().is_some());
        assert_eq!(events.recv().await.unwrap(), r#"{"type":"BuildStarted"}"#);
        assert!(events.recv().await.unwrap().contains("BuildFailed"));
    }

    #[tokio::test]
    async fn test_change_queued_before_spawn_still_builds() {
        let temp = TempDir::new().unwrap();
        let bundler = Arc::new(CountingBundler::default());
        let coordinator = coordinator(&temp, bundler.clone());

        let (tx, rx) = broadcast::channel(16);
        coordinator.run_build().await.unwrap();
        // Edit lands while the cold build is finishing, before the loop runs
        tx.send(ChangeEvent::new(temp.path().join("app/islands/counter.tsx"), ChangeKind::Modified))
            .unwrap();

        let _task = Arc::clone(&coordinator).spawn(rx);
        wait_for(&bundler.finished, 2).await;
        assert_eq!(bundler.started.load(Ordering::SeqCst), 2);
    }
}
