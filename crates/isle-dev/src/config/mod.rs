//! Dev server configuration with multi-source loading.
//!
//! Merges settings from defaults, `isle.toml`, `ISLE_*` environment
//! variables and CLI flags.
//! Priority: CLI > Environment > File > Defaults

mod defaults;
mod loading;
mod validation;

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

pub use defaults::*;
pub use loading::{ConfigOverrides, CONFIG_FILE_NAME};
pub(crate) use loading::normalize;

/// Isle dev server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct DevConfig {
    /// Project directory. Relative paths below resolve against it.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Application source directory; changes under it rebuild the client bundle
    #[serde(default = "default_app_dir")]
    pub app_dir: PathBuf,

    /// Listen host
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client bundle settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Server entry settings
    #[serde(default)]
    pub ssr: SsrConfig,

    /// Static asset serving
    #[serde(default)]
    pub static_files: StaticConfig,

    /// File watching
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Client (hydration script) bundle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ClientConfig {
    /// Client entry that mounts the islands
    #[serde(default = "default_client_entry")]
    pub entry: PathBuf,

    /// Base name of the emitted entry chunk
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// Static output directory, overwritten on every build
    #[serde(default = "default_client_out_dir")]
    pub out_dir: PathBuf,

    /// Bundler argv. Supports `{entry}`, `{out_dir}` and `{file_name}`.
    #[serde(default = "default_client_command")]
    pub command: Vec<String>,
}

/// Server entry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SsrConfig {
    /// Server entry module exporting the application
    #[serde(default = "default_ssr_entry")]
    pub entry: String,

    /// Compiled server module path
    #[serde(default = "default_ssr_out_file")]
    pub out_file: PathBuf,

    /// Compile argv. Supports `{entry}` and `{out_file}`. Empty skips compilation.
    #[serde(default = "default_ssr_build")]
    pub build: Vec<String>,

    /// Runtime argv. Supports `{out_file}`. The process must listen on `$PORT`.
    #[serde(default = "default_ssr_run")]
    pub run: Vec<String>,

    /// How long to wait for the server process to accept connections
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

/// Static asset settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct StaticConfig {
    /// Reserved path prefix served from `client.out_dir`
    #[serde(default = "default_static_prefix")]
    pub prefix: String,

    /// Cache-Control header for static responses
    #[serde(default = "default_cache_control")]
    pub cache_control: String,
}

/// File watching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct WatchConfig {
    /// Patterns to ignore (directory names or `*.ext`)
    #[serde(default = "default_watch_ignore")]
    pub ignore: Vec<String>,

    /// Per-path debounce window
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            app_dir: default_app_dir(),
            host: default_host(),
            port: default_port(),
            client: ClientConfig::default(),
            ssr: SsrConfig::default(),
            static_files: StaticConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            entry: default_client_entry(),
            file_name: default_file_name(),
            out_dir: default_client_out_dir(),
            command: default_client_command(),
        }
    }
}

impl Default for SsrConfig {
    fn default() -> Self {
        Self {
            entry: default_ssr_entry(),
            out_file: default_ssr_out_file(),
            build: default_ssr_build(),
            run: default_ssr_run(),
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            prefix: default_static_prefix(),
            cache_control: default_cache_control(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            ignore: default_watch_ignore(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl DevConfig {
    /// Resolve a path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Application source root that scopes client rebuilds.
    pub fn source_root(&self) -> PathBuf {
        self.resolve(&self.app_dir)
    }

    /// Absolute static output directory.
    pub fn out_dir(&self) -> PathBuf {
        self.resolve(&self.client.out_dir)
    }

    /// Socket address to listen on.
    pub fn addr(&self) -> crate::error::Result<SocketAddr> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let ip: IpAddr = host.parse().map_err(|_| crate::error::ConfigError::InvalidValue {
            field: "host".to_string(),
            value: self.host.clone(),
            hint: "Use an IP address such as 127.0.0.1, 0.0.0.0 or ::1".to_string(),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Patterns the watcher skips: the configured list plus build outputs,
    /// expressed relative to the project root.
    pub fn watch_ignore(&self) -> Vec<String> {
        let mut patterns = self.watch.ignore.clone();
        let outputs = [
            Some(self.client.out_dir.as_path()),
            self.ssr.out_file.parent(),
        ];
        for output in outputs.into_iter().flatten() {
            let absolute = self.resolve(output);
            if let Ok(relative) = absolute.strip_prefix(&self.root) {
                let pattern = relative.to_string_lossy().to_string();
                if !pattern.is_empty() && !patterns.contains(&pattern) {
                    patterns.push(pattern);
                }
            }
        }
        patterns
    }
}
