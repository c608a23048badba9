//! Pool configuration.
//!
//! Loaded from a JSON file by the CLI; every field has a default so a partial
//! file (or none at all) is valid.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::merkle_tree::MAX_LEVELS;

/// Default tree depth.
pub const DEFAULT_LEVELS: usize = 20;

/// Default number of remembered roots.
pub const DEFAULT_ROOT_HISTORY_SIZE: usize = 30;

/// Default deposit denomination.
pub const DEFAULT_DENOMINATION: u128 = 100;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("levels must be between 1 and 32, got {0}")]
    Levels(usize),
    #[error("root history size must be positive")]
    RootHistory,
    #[error("denomination must be positive")]
    Denomination,
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which deposit policy the pool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolVariant {
    /// Fixed denomination per deposit.
    #[default]
    Base,
    /// Variable-amount deposits with fee accrual.
    Shares,
}

/// Pool parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Merkle tree depth `L`.
    pub levels: usize,
    /// Number of recent roots accepted by withdrawals (`K`).
    pub root_history_size: usize,
    /// Fixed deposit amount (base) or per-deposit cap (shares).
    pub denomination: u128,
    pub variant: PoolVariant,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LEVELS,
            root_history_size: DEFAULT_ROOT_HISTORY_SIZE,
            denomination: DEFAULT_DENOMINATION,
            variant: PoolVariant::Base,
        }
    }
}

impl PoolConfig {
    /// Read and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.levels == 0 || self.levels > MAX_LEVELS {
            return Err(ConfigError::Levels(self.levels));
        }
        if self.root_history_size == 0 {
            return Err(ConfigError::RootHistory);
        }
        if self.denomination == 0 {
            return Err(ConfigError::Denomination);
        }
        Ok(())
    }
}
