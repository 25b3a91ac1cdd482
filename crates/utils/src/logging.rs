//! provides logging helpers

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "GPUQ_LOG";

/// initiate the global tracing subscriber
///
/// `verbose` lowers the default level to DEBUG. Explicit directives from
/// `GPUQ_LOG` (or `RUST_LOG` when unset) always win. Calling this twice is
/// harmless, the second subscriber is simply not installed.
pub fn init(verbose: bool) {
    let default_level = if verbose {
        filter::LevelFilter::DEBUG
    } else {
        filter::LevelFilter::INFO
    };

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(env_var_name())
        .from_env_lossy();

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter);

    if registry().with(fmt_layer).try_init().is_err() {
        tracing::debug!("global subscriber already installed");
    }
}

fn env_var_name() -> &'static str {
    if std::env::var_os(LOG_ENV).is_some() {
        LOG_ENV
    } else {
        filter::EnvFilter::DEFAULT_ENV
    }
}
