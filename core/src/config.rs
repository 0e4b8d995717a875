//! Runtime configuration for the in-process cluster.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Environment variable holding the worker count.
pub const WORKERS_ENV: &str = "DISTARRAY_WORKERS";
/// Environment variable holding the dispatch mode.
pub const DISPATCH_ENV: &str = "DISTARRAY_DISPATCH";

/// How a call that targets several workers is issued.
///
/// - `Concurrent`: send to every target, then collect every reply (default)
/// - `Sequential`: one worker at a time, waiting for each reply before the next send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Concurrent,
    Sequential,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concurrent => write!(f, "concurrent"),
            Self::Sequential => write!(f, "sequential"),
        }
    }
}

impl FromStr for DispatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "concurrent" | "parallel" => Ok(Self::Concurrent),
            "sequential" | "serial" => Ok(Self::Sequential),
            _ => Err(Error::Configuration(format!(
                "Invalid dispatch mode: '{s}'. Valid options are: 'concurrent', 'sequential'"
            ))),
        }
    }
}

/// Settings for a [`CpuCluster`](crate::distributed::CpuCluster).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of worker threads. Workers are numbered `0..workers`.
    pub workers: usize,
    pub dispatch: DispatchMode,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            workers,
            dispatch: DispatchMode::default(),
        }
    }
}

impl ClusterConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Reads the configuration from the environment.
    ///
    /// Reads `DISTARRAY_WORKERS` and `DISTARRAY_DISPATCH`.
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let workers = std::env::var(WORKERS_ENV)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.workers);
        let dispatch = std::env::var(DISPATCH_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.dispatch);
        Self { workers, dispatch }
    }

    /// # Errors
    ///
    /// Returns `Error::Configuration` if no workers are requested.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Configuration(
                "a cluster needs at least one worker".to_string(),
            ));
        }
        Ok(())
    }
}
