use crate::config::DevConfig;
use crate::error::{ConfigError, DevError, Result};

impl DevConfig {
    /// Validate the configuration before the server starts.
    ///
    /// Entry files are not checked here: a missing client entry is a build
    /// failure and must not prevent the server from starting.
    pub fn validate(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(DevError::FileNotFound(self.root.clone()));
        }

        let source_root = self.source_root();
        if !source_root.is_dir() {
            return Err(invalid(
                "app_dir",
                source_root.display().to_string(),
                "Application source directory does not exist",
            ));
        }

        if self.client.command.is_empty() {
            return Err(invalid(
                "client.command",
                "[]",
                "Provide the bundler argv, e.g. [\"npx\", \"esbuild\", \"{entry}\", ...]",
            ));
        }

        if self.ssr.run.is_empty() {
            return Err(invalid(
                "ssr.run",
                "[]",
                "Provide the runtime argv, e.g. [\"node\", \"{out_file}\"]",
            ));
        }

        let prefix = &self.static_files.prefix;
        if !prefix.starts_with('/') || prefix == "/" {
            return Err(invalid(
                "static_files.prefix",
                prefix.clone(),
                "Must start with '/' and name a path segment, e.g. \"/static\"",
            ));
        }

        self.addr()?;
        Ok(())
    }
}

fn invalid(field: &str, value: impl Into<String>, hint: &str) -> DevError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.into(),
        hint: hint.to_string(),
    }
    .into()
}
