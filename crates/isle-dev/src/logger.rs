//! Logging setup built on the `tracing` ecosystem.
//!
//! The filter is chosen in this order:
//! 1. `--verbose`: DEBUG for isle crates
//! 2. `--quiet`: errors only
//! 3. `RUST_LOG` environment variable
//! 4. Default: INFO for isle crates
//!
//! ```rust,no_run
//! use isle_dev::logger::init_logger;
//!
//! init_logger(false, false, false);
//! tracing::info!("Starting dev server");
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERBOSE_FILTER: &str = "isle=debug,isle_dev=debug";
const QUIET_FILTER: &str = "isle=error,isle_dev=error";
const DEFAULT_FILTER: &str = "isle=info,isle_dev=info";

/// Initialize the global tracing subscriber.
///
/// Must be called once, before any logging occurs.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    init_logger_with_filter(filter_for(verbose, quiet), no_color);
}

/// Initialize the global subscriber with an explicit filter.
pub fn init_logger_with_filter(filter: EnvFilter, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}
