//! Innocent Script Library
//!
//! Shared plumbing for the `innocent` CLI:
//!
//! - Logging setup
//! - Pool configuration loading
//! - An in-memory pool simulation driving deposits and relayed withdrawals

use std::path::Path;

use anyhow::Context;
use innocent_lib::PoolConfig;
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub mod commands;
pub mod simulation;

/// Environment variable naming the pool config file
pub const CONFIG_ENV: &str = "INNOCENT_POOL_CONFIG";

/// Install the global tracing subscriber.
///
/// `--verbose` forces `debug`; otherwise `RUST_LOG` applies, defaulting to `info`.
pub fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // a second init (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Load the pool configuration
///
/// # Arguments
/// * `path` - Config file, usually from `--config` or `INNOCENT_POOL_CONFIG`
///
/// # Returns
/// * The validated config, or defaults when no file is given
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PoolConfig> {
    let config = match path {
        Some(path) => PoolConfig::from_json_file(path)
            .with_context(|| format!("failed to load pool config from {}", path.display()))?,
        None => PoolConfig::default(),
    };
    debug!(?config, "loaded pool config");
    Ok(config)
}
