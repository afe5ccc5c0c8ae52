//! Client bundle builder.
//!
//! Compiles the client entry (the hydration script that mounts islands) into
//! the static output directory and describes the result in a manifest.
//!
//! Builds are staged: the bundler writes into a fresh directory next to the
//! output directory, and only a successful build is swapped into place. A
//! failed build therefore leaves the previous artifacts untouched. The swap
//! happens under the write side of a [`PublishLock`]; readers of the output
//! directory take the read side so they never observe it half-swapped.

use crate::config::DevConfig;
use crate::dev::command::{self, Cmd};
use crate::dev::manifest::BuildManifest;
use crate::error::BuildError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Guards the output directory while a finished build is swapped in.
pub type PublishLock = Arc<RwLock<()>>;

/// Compiles the client entry into a directory.
#[async_trait]
pub trait Bundler: Send + Sync {
    /// Emit ESM output for the client entry into `out_dir`.
    ///
    /// `out_dir` exists and is empty when this is called.
    async fn bundle(&self, out_dir: &Path) -> Result<(), BuildError>;
}

/// Bundler that runs an external command (esbuild, vite, rolldown...).
pub struct CommandBundler {
    argv: Vec<String>,
    cwd: PathBuf,
    entry: PathBuf,
    file_name: String,
}

impl CommandBundler {
    pub fn new(argv: Vec<String>, cwd: PathBuf, entry: PathBuf, file_name: String) -> Self {
        Self {
            argv,
            cwd,
            entry,
            file_name,
        }
    }
}

#[async_trait]
impl Bundler for CommandBundler {
    async fn bundle(&self, out_dir: &Path) -> Result<(), BuildError> {
        let entry_path = if self.entry.is_absolute() {
            self.entry.clone()
        } else {
            self.cwd.join(&self.entry)
        };
        if !tokio::fs::try_exists(&entry_path).await.unwrap_or(false) {
            return Err(BuildError::EntryNotFound(entry_path));
        }

        let vars = [
            ("entry", self.entry.to_string_lossy().to_string()),
            ("out_dir", out_dir.to_string_lossy().to_string()),
            ("file_name", self.file_name.clone()),
        ];
        let cmd = Cmd::from_template(&self.argv, &vars, &self.cwd).ok_or(BuildError::EmptyCommand)?;

        let output = cmd.output().await.map_err(|source| BuildError::Spawn {
            program: cmd.program().to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(BuildError::CommandFailed {
                program: cmd.program().to_string(),
                status: output.status,
                stderr: command::diagnostics(&output),
            });
        }

        Ok(())
    }
}

/// Builds the client bundle into the static output directory.
pub struct ClientBundleBuilder {
    bundler: Arc<dyn Bundler>,
    out_dir: PathBuf,
    entry_id: String,
    file_name: String,
    publish_lock: PublishLock,
}

impl ClientBundleBuilder {
    /// Create a builder.
    ///
    /// # Arguments
    ///
    /// * `bundler` - Compiler backend
    /// * `out_dir` - Static output directory (absolute)
    /// * `entry_id` - Source identifier of the client entry, used as its manifest key
    /// * `file_name` - Base name of the emitted entry chunk
    pub fn new(
        bundler: Arc<dyn Bundler>,
        out_dir: PathBuf,
        entry_id: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            bundler,
            out_dir,
            entry_id: entry_id.into(),
            file_name: file_name.into(),
            publish_lock: PublishLock::default(),
        }
    }

    /// Create a builder that runs the configured bundler command.
    pub fn from_config(config: &DevConfig) -> Self {
        let bundler = CommandBundler::new(
            config.client.command.clone(),
            config.root.clone(),
            config.client.entry.clone(),
            config.client.file_name.clone(),
        );
        let entry_id = config.client.entry.to_string_lossy().replace('\\', "/");
        Self::new(
            Arc::new(bundler),
            config.out_dir(),
            entry_id,
            config.client.file_name.clone(),
        )
    }

    /// Lock held for writing while a build is swapped into the output
    /// directory. Share it with anything that reads from that directory.
    pub fn publish_lock(&self) -> PublishLock {
        Arc::clone(&self.publish_lock)
    }

    /// Run one complete build.
    ///
    /// On success the output directory holds exactly the new assets plus
    /// `manifest.json`. On failure it is left as it was.
    pub async fn build(&self) -> Result<BuildManifest, BuildError> {
        let start = Instant::now();
        let parent = self
            .out_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&parent).await?;

        // Dropping the TempDir on any early return discards partial output
        let staging = blocking(move || {
            Ok(tempfile::Builder::new()
                .prefix(".isle-build-")
                .tempdir_in(&parent)?)
        })
        .await?;

        let bundled = self.bundler.bundle(staging.path()).await;

        let entry_id = self.entry_id.clone();
        let file_name = self.file_name.clone();
        let out_dir = self.out_dir.clone();
        let (manifest, staging) = blocking(move || {
            bundled?;
            let manifest = BuildManifest::scan(staging.path(), &entry_id, &file_name)?;
            if manifest.is_empty() {
                return Err(BuildError::NoOutput(out_dir));
            }
            manifest.write_to(staging.path())?;
            Ok((manifest, staging))
        })
        .await?;

        let out_dir = self.out_dir.clone();
        let _published = self.publish_lock.write().await;
        blocking(move || publish(staging.keep(), &out_dir)).await?;

        tracing::debug!(
            "Published {} assets to {} in {}ms",
            manifest.len(),
            self.out_dir.display(),
            start.elapsed().as_millis()
        );
        Ok(manifest)
    }
}

/// Run synchronous filesystem work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, BuildError>
where
    F: FnOnce() -> Result<T, BuildError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BuildError::Io(std::io::Error::other(e)))?
}

/// Swap a finished staging directory into place as `out_dir`.
fn publish(staging: PathBuf, out_dir: &Path) -> Result<(), BuildError> {
    let backup = if out_dir.exists() {
        let mut name = staging.file_name().unwrap_or_default().to_os_string();
        name.push(".prev");
        let backup = staging.with_file_name(name);
        if let Err(e) = std::fs::rename(out_dir, &backup) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        Some(backup)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(&staging, out_dir) {
        if let Some(backup) = &backup {
            let _ = std::fs::rename(backup, out_dir);
        }
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e.into());
    }

    if let Some(backup) = backup {
        if let Err(e) = std::fs::remove_dir_all(&backup) {
            tracing::warn!("Failed to remove {}: {}", backup.display(), e);
        }
    }
    Ok(())
}
