//! External command execution for the bundler and the server runtime.
//!
//! Commands are configured as argv arrays with `{name}` placeholders, e.g.
//! `["npx", "esbuild", "{entry}", "--outfile={out_dir}/{file_name}.js"]`.
//! Every placeholder is also exported as an `ISLE_<NAME>` environment
//! variable so wrapper scripts can read it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::{Child, Command};

/// Command builder for external process execution.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    envs: Vec<(String, OsString)>,
}

impl Cmd {
    /// Create from a configured argv, substituting placeholders.
    ///
    /// Returns `None` for an empty argv.
    pub fn from_template(argv: &[String], vars: &[(&str, String)], cwd: &Path) -> Option<Self> {
        let mut expanded = argv.iter().map(|arg| expand(arg, vars));
        let program = expanded.next()?;
        let args = expanded.collect();
        let envs = vars
            .iter()
            .map(|(key, value)| {
                (
                    format!("ISLE_{}", key.to_ascii_uppercase()),
                    OsString::from(value),
                )
            })
            .collect();

        Some(Self {
            program,
            args,
            cwd: cwd.to_path_buf(),
            envs,
        })
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Program name, for diagnostics.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .envs(self.envs.iter().map(|(k, v)| (k, v)));
        command
    }

    /// Run to completion, capturing stdout and stderr.
    pub async fn output(&self) -> std::io::Result<Output> {
        tracing::debug!("Running {} {}", self.program, self.args.join(" "));
        self.command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
    }

    /// Spawn a long-running process that inherits the terminal's output and
    /// is killed when its handle is dropped.
    pub fn spawn(&self) -> std::io::Result<Child> {
        tracing::debug!("Spawning {} {}", self.program, self.args.join(" "));
        self.command()
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Replace `{name}` placeholders in a single argument.
pub fn expand(arg: &str, vars: &[(&str, String)]) -> String {
    let mut result = arg.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{}}}", key), value);
    }
    result
}

/// Render captured output for an error message, preferring stderr.
pub fn diagnostics(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        return stderr.trim_end().to_string();
    }
    String::from_utf8_lossy(&output.stdout).trim_end().to_string()
}
