//! The build service: file-change notifications plus the server module cache.
//!
//! Both the rebuild coordinator and the module loader depend on the
//! [`BuildService`] trait rather than on process-wide state, so tests can
//! substitute a fake.

use crate::dev::app::Application;
use crate::dev::watcher::{ChangeEvent, FileWatcher};
use crate::error::{LoadError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Mutex;

/// Capacity of the change channel. A lagging receiver treats the gap as a change.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Change notifications and on-demand server module loading.
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Subscribe to file-change notifications.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Load a server module, recompiling it if anything changed since the
    /// last load.
    async fn ssr_load_module(&self, id: &str) -> Result<Arc<dyn Application>, LoadError>;
}

/// Turns a server module identifier into a live application.
#[async_trait]
pub trait ModuleCompiler: Send + Sync {
    async fn compile(&self, id: &str) -> Result<Arc<dyn Application>, LoadError>;
}

struct LoadedModule {
    version: u64,
    app: Arc<dyn Application>,
}

struct CacheState {
    changes: broadcast::Receiver<ChangeEvent>,
    modules: HashMap<String, LoadedModule>,
    next_version: u64,
}

/// Versioned cache of compiled server modules.
///
/// Any change event invalidates every cached module, and a module whose
/// instance has died is replaced on its next load. Loads are serialized, so
/// concurrent requests after a change share one recompilation.
pub struct ModuleCache {
    compiler: Arc<dyn ModuleCompiler>,
    state: Mutex<CacheState>,
}

impl ModuleCache {
    pub fn new(compiler: Arc<dyn ModuleCompiler>, changes: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            compiler,
            state: Mutex::new(CacheState {
                changes,
                modules: HashMap::new(),
                next_version: 1,
            }),
        }
    }

    /// Return the cached module for `id`, compiling it when missing, stale or
    /// no longer alive.
    pub async fn load(&self, id: &str) -> Result<Arc<dyn Application>, LoadError> {
        let mut state = self.state.lock().await;

        if drain_changes(&mut state.changes) && !state.modules.is_empty() {
            tracing::debug!("Invalidating {} cached server modules", state.modules.len());
            // In-flight requests keep their own handle to the old instance
            state.modules.clear();
        }

        if let Some(module) = state.modules.get(id) {
            if module.app.is_alive() {
                return Ok(Arc::clone(&module.app));
            }
            tracing::warn!("Server entry {} (v{}) stopped running, reloading", id, module.version);
            state.modules.remove(id);
        }

        let start = Instant::now();
        let app = self.compiler.compile(id).await?;
        let version = state.next_version;
        state.next_version += 1;

        tracing::info!(
            "Loaded server entry {} (v{}) in {}ms",
            id,
            version,
            start.elapsed().as_millis()
        );
        state.modules.insert(
            id.to_string(),
            LoadedModule {
                version,
                app: Arc::clone(&app),
            },
        );
        Ok(app)
    }

    /// Version of the cached module for `id`, if one is cached.
    pub async fn version(&self, id: &str) -> Option<u64> {
        self.state.lock().await.modules.get(id).map(|m| m.version)
    }
}

/// Consume pending notifications; true if there were any.
fn drain_changes(changes: &mut broadcast::Receiver<ChangeEvent>) -> bool {
    let mut changed = false;
    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => changed = true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return changed,
        }
    }
}

/// Build service backed by a file watcher and a [`ModuleCache`].
pub struct DevService {
    changes: broadcast::Sender<ChangeEvent>,
    modules: ModuleCache,
    watcher: Option<FileWatcher>,
}

impl DevService {
    /// Create a service without a file watcher; changes arrive via [`publish`](Self::publish).
    pub fn new(compiler: Arc<dyn ModuleCompiler>) -> Self {
        let (changes, rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            changes,
            modules: ModuleCache::new(compiler, rx),
            watcher: None,
        }
    }

    /// Attach a recursive file watcher on `root`.
    pub fn watching(mut self, root: PathBuf, ignore: Vec<String>, debounce_ms: u64) -> Result<Self> {
        let watcher = FileWatcher::new(root, ignore, debounce_ms, self.changes.clone())?;
        tracing::debug!("Watching {}", watcher.root().display());
        self.watcher = Some(watcher);
        Ok(self)
    }

    /// Publish a change notification to every subscriber.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }

    pub fn modules(&self) -> &ModuleCache {
        &self.modules
    }
}

#[async_trait]
impl BuildService for DevService {
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    async fn ssr_load_module(&self, id: &str) -> Result<Arc<dyn Application>, LoadError> {
        self.modules.load(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::app::{handler_fn, AppResponse};
    use crate::dev::watcher::ChangeKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCompiler {
        compiles: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ModuleCompiler for CountingCompiler {
        async fn compile(&self, id: &str) -> Result<Arc<dyn Application>, LoadError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(LoadError::Compile {
                    id: id.to_string(),
                    message: "Unexpected token".to_string(),
                });
            }
            self.compiles.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(handler_fn(|_| async { Ok(AppResponse::default()) })))
        }
    }

    fn change() -> ChangeEvent {
        ChangeEvent::new("/project/app/routes/index.tsx", ChangeKind::Modified)
    }

    #[tokio::test]
    async fn test_load_reuses_instance_until_change() {
        let compiler = Arc::new(CountingCompiler::default());
        let service = DevService::new(compiler.clone());

        let first = service.ssr_load_module("app/app.ts").await.unwrap();
        let second = service.ssr_load_module("app/app.ts").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiler.compiles.load(Ordering::SeqCst), 1);

        service.publish(change());
        let third = service.ssr_load_module("app/app.ts").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(compiler.compiles.load(Ordering::SeqCst), 2);
        assert_eq!(service.modules().version("app/app.ts").await, Some(2));
    }

    #[tokio::test]
    async fn test_burst_of_changes_recompiles_once() {
        let compiler = Arc::new(CountingCompiler::default());
        let service = DevService::new(compiler.clone());
        service.ssr_load_module("app/app.ts").await.unwrap();

        for _ in 0..5 {
            service.publish(change());
        }
        service.ssr_load_module("app/app.ts").await.unwrap();
        service.ssr_load_module("app/app.ts").await.unwrap();
        assert_eq!(compiler.compiles.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_load_propagates_and_retries() {
        let compiler = Arc::new(CountingCompiler::default());
        compiler.fail.store(true, Ordering::SeqCst);
        let service = DevService::new(compiler.clone());

        let err = service.ssr_load_module("app/app.ts").await.err().unwrap();
        assert!(matches!(err, LoadError::Compile { .. }));

        compiler.fail.store(false, Ordering::SeqCst);
        assert!(service.ssr_load_module("app/app.ts").await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribers_see_published_changes() {
        let service = DevService::new(Arc::new(CountingCompiler::default()));
        let mut rx = service.subscribe();
        service.publish(change());
        assert_eq!(rx.recv().await.unwrap(), change());
    }

    /// Application whose liveness is controlled by the test.
    struct Flaky {
        alive: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl Application for Flaky {
        async fn handle(
            &self,
            _request: crate::dev::app::AppRequest,
        ) -> Result<AppResponse, crate::error::HandlerError> {
            Ok(AppResponse::default())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct FlakyCompiler {
        compiles: AtomicUsize,
        alive: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl ModuleCompiler for FlakyCompiler {
        async fn compile(&self, _id: &str) -> Result<Arc<dyn Application>, LoadError> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            self.alive.store(true, Ordering::SeqCst);
            Ok(Arc::new(Flaky {
                alive: Arc::clone(&self.alive),
            }))
        }
    }

    #[tokio::test]
    async fn test_dead_instance_is_recompiled() {
        let compiler = Arc::new(FlakyCompiler::default());
        let service = DevService::new(compiler.clone());

        let first = service.ssr_load_module("app/app.ts").await.unwrap();
        assert_eq!(service.modules().version("app/app.ts").await, Some(1));

        // Process crashed with no source change
        compiler.alive.store(false, Ordering::SeqCst);
        let second = service.ssr_load_module("app/app.ts").await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_alive());
        assert_eq!(compiler.compiles.load(Ordering::SeqCst), 2);
        assert_eq!(service.modules().version("app/app.ts").await, Some(2));
    }
}
