//! Isle - development server for island-architecture SSR apps.
//!
//! The server keeps the client bundle (the hydration script that mounts
//! islands) in sync with source edits and serves every other request through
//! the application's server entry, which is reloaded on demand after a
//! change without restarting the process.
//!
//! # Architecture
//!
//! - [`dev`] - the server core: change scoping, client builds, the rebuild
//!   coordinator, the module loader, the static gate and the request adapter
//! - [`config`] - `isle.toml` / environment / CLI configuration
//! - [`error`] - error types by failure domain
//! - [`logger`] - tracing setup
//! - [`ui`] - terminal status lines
//!
//! # Example
//!
//! ```rust,no_run
//! use isle_dev::{cli::DevArgs, commands, error::Result, logger};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     logger::init_logger(false, false, false);
//!     commands::dev_execute(DevArgs::default()).await
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod dev;
pub mod error;
pub mod logger;
pub mod ui;

// Re-export commonly used types
pub use config::DevConfig;
pub use error::{BuildError, DevError, HandlerError, LoadError, Result, ResultExt};
