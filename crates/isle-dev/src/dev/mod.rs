//! Development server core.
//!
//! - [`scope`] decides which file changes rebuild the client bundle
//! - [`builder`] compiles the client entry into the static output directory
//! - [`coordinator`] re-runs the builder on in-scope changes
//! - [`service`] provides change notifications and the server module cache
//! - [`loader`] fetches the current application for each request
//! - [`static_gate`] answers the reserved static prefix
//! - [`adapter`] translates between the listener and the application
//! - [`server`] wires it all into an axum router

pub mod adapter;
pub mod app;
pub mod builder;
pub mod command;
pub mod coordinator;
pub mod loader;
pub mod manifest;
pub mod scope;
pub mod server;
pub mod service;
pub mod sidecar;
pub mod state;
pub mod static_gate;
pub mod watcher;

// Re-exports
pub use adapter::RequestAdapter;
pub use app::{handler_fn, AppRequest, AppResponse, Application};
pub use builder::{Bundler, ClientBundleBuilder, CommandBundler, PublishLock};
pub use coordinator::HotReloadCoordinator;
pub use loader::SsrModuleLoader;
pub use manifest::{AssetEntry, BuildManifest};
pub use scope::in_scope;
pub use server::{BoundServer, DevServer};
pub use service::{BuildService, DevService, ModuleCache, ModuleCompiler};
pub use sidecar::{SidecarApplication, SidecarCompiler};
pub use state::{BuildStatus, DevServerState, SharedState};
pub use static_gate::StaticAssetGate;
pub use watcher::{ChangeEvent, ChangeKind, FileWatcher};

use serde::{Deserialize, Serialize};

/// Events in the dev server lifecycle, pushed to browsers as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DevEvent {
    /// Client build started
    BuildStarted,

    /// Client build completed; the page can reload
    BuildCompleted { duration_ms: u64, assets: usize },

    /// Client build failed; previous assets are still served
    BuildFailed { error: String },
}
