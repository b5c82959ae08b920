//! Simulator configuration.
//!
//! Stored as JSON; every field is optional:
//!
//! ```json
//! {
//!   "upload": { "chunkSize": 1048576, "forceChunkSize": true },
//!   "concurrency": 3,
//!   "throughput": 4194304,
//!   "failureRate": 0.02
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use chunkflow_protocol::UploadOptions;
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Settings for one simulated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimConfig {
    /// Options handed to the upload session.
    #[serde(default)]
    pub upload: UploadOptions,

    /// Chunks in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Bytes per second each simulated transfer moves.
    #[serde(default = "default_throughput")]
    pub throughput: u64,

    /// Length of one simulated network tick, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Probability that a tick breaks the current attempt.
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,

    /// Retries per chunk before the transport reports an error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Seed for the failure generator; runs with equal seeds fail alike.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// How often overall progress is printed, in milliseconds.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

fn default_concurrency() -> usize {
    3
}

fn default_throughput() -> u64 {
    4 * 1024 * 1024
}

fn default_tick_ms() -> u64 {
    50
}

fn default_failure_rate() -> f64 {
    0.02
}

fn default_max_retries() -> u32 {
    2
}

fn default_seed() -> u64 {
    1
}

fn default_report_interval_ms() -> u64 {
    1000
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            upload: UploadOptions::default(),
            concurrency: default_concurrency(),
            throughput: default_throughput(),
            tick_ms: default_tick_ms(),
            failure_rate: default_failure_rate(),
            max_retries: default_max_retries(),
            seed: default_seed(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

impl SimConfig {
    /// Loads the configuration at `path`, or the defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self, SimError> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        self.upload.validate()?;
        if self.concurrency == 0 {
            return Err(SimError::Config("concurrency must be at least 1".into()));
        }
        if self.throughput == 0 || self.tick_ms == 0 {
            return Err(SimError::Config(
                "throughput and tickMs must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(SimError::Config(format!(
                "failureRate {} is not a probability",
                self.failure_rate
            )));
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Bytes moved per tick, at least one.
    pub fn bytes_per_tick(&self) -> u64 {
        (self.throughput * self.tick_ms / 1000).max(1)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }
}
