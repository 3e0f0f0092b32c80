//! Runtime configuration.
//!
//! Settings can be deserialized from any `serde` format or read from the
//! environment:
//!
//! | Variable                  | Field           |
//! |---------------------------|-----------------|
//! | `SM2_ACCEL_PLUGIN`        | `plugin_path`   |
//! | `SM2_ACCEL_POOL_CAPACITY` | `pool_capacity` |
//! | `SM2_ACCEL_STRATEGY`      | `strategy`      |
//!
//! Unset or empty variables keep their defaults.

use crate::{Error, Result, pool::DEFAULT_CAPACITY};
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming the accelerator plugin.
pub const PLUGIN_PATH_VAR: &str = "SM2_ACCEL_PLUGIN";

/// Environment variable overriding the buffer pool capacity, in records.
pub const POOL_CAPACITY_VAR: &str = "SM2_ACCEL_POOL_CAPACITY";

/// Environment variable forcing a strategy family.
pub const STRATEGY_VAR: &str = "SM2_ACCEL_STRATEGY";

/// Accelerator and dispatch settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Shared library implementing the accelerator ABI.
    pub plugin_path: Option<PathBuf>,
    /// Records held by a freshly allocated packing buffer.
    pub pool_capacity: usize,
    /// Strategy family selection.
    pub strategy: StrategyPreference,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value: &String| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = lookup(PLUGIN_PATH_VAR) {
            config.plugin_path = Some(PathBuf::from(path));
        }
        if let Some(capacity) = lookup(POOL_CAPACITY_VAR) {
            config.pool_capacity = capacity.trim().parse().map_err(|err| {
                Error::Config(format!("{POOL_CAPACITY_VAR}={capacity:?}: {err}"))
            })?;
        }
        if let Some(strategy) = lookup(STRATEGY_VAR) {
            config.strategy = strategy.parse()?;
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugin_path: None,
            pool_capacity: DEFAULT_CAPACITY,
            strategy: StrategyPreference::default(),
        }
    }
}

/// Which strategy family to bind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyPreference {
    /// Probe the host and pick the native family if it qualifies.
    #[default]
    Auto,
    /// Always use the native-word family.
    Native,
    /// Always use the portable family.
    Portable,
}

impl StrategyPreference {
    fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Native => "native",
            Self::Portable => "portable",
        }
    }
}

impl FromStr for StrategyPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "portable" | "generic" => Ok(Self::Portable),
            other => Err(Error::Config(format!("unknown strategy {other:?}"))),
        }
    }
}

impl fmt::Display for StrategyPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
