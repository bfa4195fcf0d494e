//! Runtime tuning of a [`Graph`](crate::Graph) and its queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use crate::Result;

/// Graph configuration.
///
/// ```json
/// { "timeout_ms": 500, "sort_value_precision": 1000.0, "anneal_step_size": 0.05 }
/// ```
///
/// Missing keys fall back to [`Config::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reported by a drain pass when exceeded, never enforced.
    pub timeout_ms: Option<u64>,
    /// Scale applied to update magnitudes before they become sort values.
    pub sort_value_precision: f64,
    /// Base increment of the annealing step.
    pub anneal_step_size: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            sort_value_precision: 1000.0,
            anneal_step_size: 0.05,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sort_value_precision > 0.0) {
            return Err(crate::Error::ConfigError(format!(
                "sort_value_precision must be positive, got {}",
                self.sort_value_precision
            )));
        }
        if !(self.anneal_step_size > 0.0) {
            return Err(crate::Error::ConfigError(format!(
                "anneal_step_size must be positive, got {}",
                self.anneal_step_size
            )));
        }
        Ok(())
    }
}
