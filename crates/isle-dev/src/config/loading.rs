use crate::config::DevConfig;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format as _, Serialized, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

/// Config file looked up in the project root when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "isle.toml";

/// Values supplied on the command line. They win over every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Explicit config file
    pub config: Option<PathBuf>,
    /// Project root
    pub cwd: Option<PathBuf>,
    /// Listen port
    pub port: Option<u16>,
}

impl DevConfig {
    /// Load configuration from all sources.
    ///
    /// Relative `root` values are resolved against the current directory so
    /// every path the server compares against is absolute.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::load_from(&cwd, overrides, Env::prefixed("ISLE_").split("__"))
    }

    pub(crate) fn load_from(cwd: &Path, overrides: &ConfigOverrides, env: Env) -> Result<Self> {
        let root = overrides
            .cwd
            .as_ref()
            .map(|dir| absolutize(cwd, dir))
            .unwrap_or_else(|| cwd.to_path_buf());

        let mut figment = Figment::new().merge(Serialized::defaults(DevConfig::default()));

        match &overrides.config {
            Some(path) => {
                let path = absolutize(cwd, path);
                if !path.exists() {
                    return Err(ConfigError::NotFound(path).into());
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                let default_path = root.join(CONFIG_FILE_NAME);
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        figment = figment.merge(env);

        if let Some(dir) = &overrides.cwd {
            figment = figment.merge(Serialized::default("root", absolutize(cwd, dir)));
        }
        if let Some(port) = overrides.port {
            figment = figment.merge(Serialized::default("port", port));
        }

        let mut config: DevConfig = figment
            .extract()
            .map_err(|e| ConfigError::Extract(Box::new(e)))?;

        // A root from the file or environment is relative to the config location
        config.root = absolutize(&root, &config.root);
        Ok(config)
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    normalize(&joined)
}

/// Lexically drop `.` and resolve `..` components.
///
/// Leading `..` of a relative path are kept.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` at the filesystem root stays at the root
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component.as_os_str()),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
