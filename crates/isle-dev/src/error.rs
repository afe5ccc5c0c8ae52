//! Error types for the isle development server.
//!
//! Errors are split by failure domain so each one can be handled where it
//! belongs:
//!
//! - [`BuildError`] - the client bundle failed to compile. Recovered by the
//!   coordinator: logged, previous artifacts kept, server keeps serving.
//! - [`LoadError`] - the server entry could not be loaded. Surfaced per
//!   request as a 500 response.
//! - [`HandlerError`] - the application's own handler failed. Caught at the
//!   adapter boundary and converted to a 500 response.
//! - [`ConfigError`] - configuration could not be loaded or is invalid.
//!
//! [`DevError`] is the top-level type returned by commands. The only failure
//! that aborts the process once configuration is loaded is
//! [`DevError::Bind`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Top-level error type.
///
/// Converts from domain-specific errors via `From` implementations.
#[derive(Debug, Error)]
pub enum DevError {
    /// Configuration-related errors (file not found, invalid values, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Client bundle build errors
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Server entry load errors
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// The listening socket could not be bound
    #[error("Failed to bind to {addr}: {source}\n\nHint: Another process may be using this port. Set a different `port` in isle.toml or pass --port")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// File or directory not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// I/O errors from file system operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watching errors
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// HTTP server errors after startup
    #[error("Server error: {0}")]
    Server(String),

    /// Generic errors with custom messages
    #[error("{0}")]
    Custom(String),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file doesn't exist
    #[error("Config file not found: {}\n\nHint: Create an isle.toml file or omit --config to use defaults", .0.display())]
    NotFound(PathBuf),

    /// Config sources could not be merged or deserialized
    #[error("Invalid configuration: {0}\n\nHint: Check isle.toml syntax and ISLE_* environment variables")]
    Extract(#[from] Box<figment::Error>),

    /// Invalid value for a configuration option
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The invalid value
        value: String,
        /// Helpful hint for correct values
        hint: String,
    },
}

/// Client bundle build errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Configured bundler command is empty
    #[error("Bundler command is empty\n\nHint: Set `client.command` in isle.toml")]
    EmptyCommand,

    /// Entry point file doesn't exist
    #[error("Entry point not found: {}\n\nHint: Check `client.entry` in isle.toml", .0.display())]
    EntryNotFound(PathBuf),

    /// Bundler process could not be started
    #[error("Failed to run `{program}`: {source}\n\nHint: Make sure the bundler is installed and on PATH")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Bundler ran but reported a failure
    #[error("`{program}` exited with {status}\n{stderr}")]
    CommandFailed {
        /// Program that failed
        program: String,
        /// Exit status
        status: ExitStatus,
        /// Captured standard error
        stderr: String,
    },

    /// Bundler succeeded without emitting anything
    #[error("Bundler produced no output in {}\n\nHint: Make sure the command writes to {{out_dir}}", .0.display())]
    NoOutput(PathBuf),

    /// I/O error while staging or publishing output
    #[error("I/O error during build: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest serialization failed
    #[error("Failed to write manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Server entry load errors.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Server entry failed to compile
    #[error("Failed to compile server entry '{id}':\n{message}")]
    Compile {
        /// Module identifier
        id: String,
        /// Compiler diagnostics
        message: String,
    },

    /// Server process could not be started
    #[error("Failed to start `{program}`: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Server process exited before accepting connections
    #[error("Server entry '{id}' exited with {status} before accepting connections")]
    Exited {
        /// Module identifier
        id: String,
        /// Exit status
        status: ExitStatus,
    },

    /// Server process did not start listening in time
    #[error("Server entry '{id}' did not accept connections within {timeout_ms}ms\n\nHint: The server must listen on the port passed in the PORT environment variable")]
    StartupTimeout {
        /// Module identifier
        id: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Configured command is empty
    #[error("Command for server entry '{0}' is empty\n\nHint: Set `ssr.run` in isle.toml")]
    EmptyCommand(String),

    /// HTTP client for forwarding could not be created
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// I/O error while loading
    #[error("I/O error while loading: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by an application handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Forwarding to the application process failed
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Handler panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Handler-defined failure
    #[error("{0}")]
    Custom(String),
}

/// Result type alias using `DevError` as the default error type.
pub type Result<T, E = DevError> = std::result::Result<T, E>;

/// Extension trait for adding context to `Result` types.
pub trait ResultExt<T> {
    /// Wrap the error with a leading message.
    fn context(self, msg: impl std::fmt::Display) -> Result<T>;

    /// Add a file path to the error context.
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;
}

impl<T, E: Into<DevError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: DevError = e.into();
            DevError::Custom(format!("{}: {}", msg, err))
        })
    }

    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| match e.into() {
            DevError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                DevError::FileNotFound(path.as_ref().to_path_buf())
            }
            other => other,
        })
    }
}

/// Convert a top-level error into a miette report for display.
///
/// Build and load failures carry compiler output, so they are rendered
/// without the generic prefix to keep the diagnostic readable.
pub fn dev_error_to_miette(err: DevError) -> miette::Report {
    match err {
        DevError::Build(e) => miette::miette!("{}", e),
        DevError::Load(e) => miette::miette!("{}", e),
        DevError::Config(ConfigError::Extract(e)) => miette::miette!(
            "Invalid configuration: {}\n\nHint: Check isle.toml syntax and ISLE_* environment variables",
            e
        ),
        other => miette::miette!("{}", other),
    }
}
