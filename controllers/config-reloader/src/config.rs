//! Controller configuration loaded from environment variables.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `WATCH_NAMESPACE` | all namespaces | Restrict the ConfigReloader watch to one namespace |
//! | `RECONCILE_DEBOUNCE_SECS` | `5` | Quiet period after the last event before reconciling |
//! | `RECONCILE_CONCURRENCY` | `3` | Maximum ConfigReloaders reconciled in parallel |

use crate::error::ControllerError;
use std::env;
use std::time::Duration;

const DEFAULT_DEBOUNCE_SECS: u64 = 5;
const DEFAULT_CONCURRENCY: u16 = 3;

/// Runtime settings for the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches every namespace
    pub namespace: Option<String>,
    /// Debounce window applied by the runtime before a reconcile
    pub debounce: Duration,
    /// Concurrency limit across different ConfigReloaders
    pub concurrency: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            debounce: Duration::from_secs(DEFAULT_DEBOUNCE_SECS),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("WATCH_NAMESPACE")
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        let debounce_secs = match lookup("RECONCILE_DEBOUNCE_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!("RECONCILE_DEBOUNCE_SECS={:?}: {}", raw, e))
            })?,
            None => DEFAULT_DEBOUNCE_SECS,
        };

        let concurrency = match lookup("RECONCILE_CONCURRENCY") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                ControllerError::InvalidConfig(format!("RECONCILE_CONCURRENCY={:?}: {}", raw, e))
            })?,
            None => DEFAULT_CONCURRENCY,
        };

        Ok(Self {
            namespace,
            debounce: Duration::from_secs(debounce_secs),
            concurrency,
        })
    }
}
