use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default minimum spacing between progress notifications for one file.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

/// Default weight of the newest speed sample in the moving average.
pub const DEFAULT_SPEED_SMOOTHING_FACTOR: f64 = 0.1;

/// Errors produced while loading or checking [`UploadOptions`].
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("speed smoothing factor must be within 0..=1, got {0}")]
    SmoothingOutOfRange(f64),
}

/// Tunables for chunking, progress notification and speed estimation.
///
/// Missing fields fall back to their defaults, so a partial JSON document
/// such as `{"chunkSize": 4194304}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    /// Bytes per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Round the chunk count up (`true`) or down (`false`).
    ///
    /// Rounding up keeps every chunk at most `chunk_size` bytes and leaves a
    /// short remainder chunk; rounding down folds the remainder into the last
    /// chunk so there are fewer, slightly larger chunks.
    #[serde(default)]
    pub force_chunk_size: bool,
    /// Minimum milliseconds between two progress notifications of a file.
    #[serde(default = "default_progress_interval")]
    pub progress_callbacks_interval: u64,
    /// Weight of the newest sample in the average speed (0..=1).
    #[serde(default = "default_smoothing")]
    pub speed_smoothing_factor: f64,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL_MS
}

fn default_smoothing() -> f64 {
    DEFAULT_SPEED_SMOOTHING_FACTOR
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            force_chunk_size: false,
            progress_callbacks_interval: DEFAULT_PROGRESS_INTERVAL_MS,
            speed_smoothing_factor: DEFAULT_SPEED_SMOOTHING_FACTOR,
        }
    }
}

impl UploadOptions {
    /// Parses options from JSON and validates them.
    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Checks that the options can drive an upload.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.chunk_size == 0 {
            return Err(OptionsError::ZeroChunkSize);
        }
        if !(0.0..=1.0).contains(&self.speed_smoothing_factor) {
            return Err(OptionsError::SmoothingOutOfRange(
                self.speed_smoothing_factor,
            ));
        }
        Ok(())
    }

    /// Progress notification interval as a [`Duration`].
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_callbacks_interval)
    }

    /// Number of chunks a file of `size` bytes is split into.
    ///
    /// Always at least one, so an empty file still gets a (zero-length) chunk.
    pub fn chunk_count(&self, size: u64) -> u64 {
        let count = if self.force_chunk_size {
            size.div_ceil(self.chunk_size)
        } else {
            size / self.chunk_size
        };
        count.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = UploadOptions::default();
        assert_eq!(opts.chunk_size, 1024 * 1024);
        assert!(!opts.force_chunk_size);
        assert_eq!(opts.progress_interval(), Duration::from_millis(500));
        assert!((opts.speed_smoothing_factor - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let opts = UploadOptions::from_json(r#"{"chunkSize": 4096}"#).unwrap();
        assert_eq!(opts.chunk_size, 4096);
        assert_eq!(opts.progress_callbacks_interval, 500);
    }

    #[test]
    fn camel_case_fields() {
        let json = serde_json::to_string(&UploadOptions::default()).unwrap();
        assert!(json.contains("forceChunkSize"));
        assert!(json.contains("progressCallbacksInterval"));
        assert!(json.contains("speedSmoothingFactor"));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = UploadOptions::from_json(r#"{"chunkSize": 0}"#).unwrap_err();
        assert!(matches!(err, OptionsError::ZeroChunkSize));
    }

    #[test]
    fn rejects_smoothing_out_of_range() {
        let err = UploadOptions::from_json(r#"{"speedSmoothingFactor": 1.5}"#).unwrap_err();
        assert!(matches!(err, OptionsError::SmoothingOutOfRange(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = UploadOptions::from_json("{chunkSize:").unwrap_err();
        assert!(matches!(err, OptionsError::Json(_)));
    }

    #[test]
    fn chunk_count_floor_and_ceil() {
        let mut opts = UploadOptions {
            chunk_size: 1_000_000,
            ..Default::default()
        };
        assert_eq!(opts.chunk_count(2_500_000), 2);
        assert_eq!(opts.chunk_count(999_999), 1);
        assert_eq!(opts.chunk_count(0), 1);

        opts.force_chunk_size = true;
        assert_eq!(opts.chunk_count(2_500_000), 3);
        assert_eq!(opts.chunk_count(2_000_000), 2);
        assert_eq!(opts.chunk_count(0), 1);
    }
}
