//! Development server command implementation.
//!
//! Orchestrates the dev server lifecycle:
//! - Cold client build (a failure is reported, not fatal)
//! - File watching and rebuilds of the client bundle
//! - HTTP server serving static assets and the server entry
//! - Graceful shutdown on Ctrl+C

use crate::cli::DevArgs;
use crate::config::{ConfigOverrides, DevConfig};
use crate::dev::{
    BuildService, ClientBundleBuilder, DevServer, DevServerState, DevService, HotReloadCoordinator,
    RequestAdapter, SidecarCompiler, SsrModuleLoader, StaticAssetGate,
};
use crate::error::{Result, ResultExt};
use crate::ui;
use std::sync::Arc;
use tokio::signal;

/// Execute the dev command.
///
/// # Process Flow
///
/// 1. Load and validate configuration
/// 2. Start the file watcher
/// 3. Run the cold client build, then the rebuild coordinator
/// 4. Bind the listener and report its address
/// 5. Serve until Ctrl+C
///
/// # Errors
///
/// Returns errors for invalid configuration, watcher setup failures and a
/// listener that cannot bind. Build and load failures are never fatal.
pub async fn execute(args: DevArgs) -> Result<()> {
    ui::info("Starting development server...");

    let config = load_config(&args)?;
    config.validate()?;
    ui::info(&format!("Project root: {}", config.root.display()));

    let service = Arc::new(
        DevService::new(Arc::new(SidecarCompiler::from_config(&config)?)).watching(
            config.root.clone(),
            config.watch_ignore(),
            config.watch.debounce_ms,
        )
        .context("Failed to start file watcher")?,
    );
    // Subscribed before the cold build so edits made during it still rebuild
    let changes = service.subscribe();
    ui::info(&format!(
        "Watching for changes in: {}",
        config.source_root().display()
    ));

    let state = Arc::new(DevServerState::new());
    let builder = ClientBundleBuilder::from_config(&config);
    let gate = StaticAssetGate::from_config(&config).with_publish_lock(builder.publish_lock());
    let coordinator = Arc::new(HotReloadCoordinator::new(
        builder,
        state.clone(),
        config.source_root(),
    ));

    ui::info("Performing initial build...");
    if coordinator.run_build().await.is_err() {
        ui::warning("Serving without a client bundle until the next successful build");
    }
    let _coordinator_task = Arc::clone(&coordinator).spawn(changes);

    let loader = SsrModuleLoader::new(service.clone(), config.ssr.entry.clone());
    let server = DevServer::new(gate, RequestAdapter::new(loader), state.clone());
    let bound = server.bind(config.addr()?).await?;
    let addr = bound.local_addr()?;
    ui::success(&format!("Development server running at http://{}", addr));

    ui::info("Press Ctrl+C to stop");
    bound
        .serve_with_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            ui::info("Shutting down development server...");
        })
        .await?;

    ui::success("Development server stopped");
    Ok(())
}

fn load_config(args: &DevArgs) -> Result<DevConfig> {
    let overrides = ConfigOverrides {
        config: args.config.clone(),
        cwd: args.cwd.clone(),
        port: args.port,
    };
    #[cfg_attr(not(unix), allow(unused_mut))]
    let mut config = DevConfig::load(&overrides)?;

    // Watcher events carry resolved paths; compare against the same form
    #[cfg(unix)]
    {
        config.root = config.root.canonicalize().with_path(&config.root)?;
    }
    Ok(config)
}
