//! Command-line interface definition.
//!
//! - `isle dev` - run the development server

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Isle - development server for island-architecture SSR apps
#[derive(Parser, Debug)]
#[command(name = "isle", version, about = "Development server for island-architecture SSR apps")]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the development server
    ///
    /// Builds the client bundle, watches the application directory for
    /// changes, and serves requests through the server entry, which is
    /// reloaded after every change.
    Dev(DevArgs),
}

/// Arguments for the dev command
#[derive(Args, Debug, Default)]
pub struct DevArgs {
    /// Config file (defaults to isle.toml in the project root)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port to listen on, overriding the config
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Project root (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dev_with_flags() {
        let cli = Cli::try_parse_from(["isle", "dev", "--port", "4000", "--cwd", "site", "-v"]).unwrap();
        assert!(cli.verbose);
        let Command::Dev(args) = cli.command;
        assert_eq!(args.port, Some(4000));
        assert_eq!(args.cwd, Some(PathBuf::from("site")));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["isle", "-v", "-q", "dev"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
