use std::time::Duration;

/// Exponentially smoothed transfer speed of one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedMeter {
    current: f64,
    average: f64,
    prev_uploaded: u64,
}

impl SpeedMeter {
    /// Bytes per second over the last sample.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Smoothed bytes per second.
    pub fn average(&self) -> f64 {
        self.average
    }

    /// Uploaded byte count at the last sample.
    pub fn prev_uploaded(&self) -> u64 {
        self.prev_uploaded
    }

    /// Records that `uploaded` bytes are done, `elapsed` after the previous
    /// sample.
    ///
    /// Samples less than a millisecond apart are skipped and `false` is
    /// returned. The current speed never goes negative, even when a resumed
    /// transfer reports fewer bytes than before.
    pub fn sample(&mut self, uploaded: u64, elapsed: Duration, smoothing: f64) -> bool {
        let millis = elapsed.as_millis();
        if millis == 0 {
            return false;
        }
        let delta = uploaded as f64 - self.prev_uploaded as f64;
        self.current = (delta / millis as f64 * 1000.0).max(0.0);
        self.average = smoothing * self.current + (1.0 - smoothing) * self.average;
        self.prev_uploaded = uploaded;
        true
    }

    /// Zeroes both speeds; the byte baseline is kept.
    pub fn reset(&mut self) {
        self.current = 0.0;
        self.average = 0.0;
    }
}

/// Seconds needed to send `remaining` bytes at `speed` bytes per second.
///
/// Unsent bytes with no measured speed yield `f64::INFINITY`; nothing left
/// to send yields 0.
pub fn time_remaining(remaining: u64, speed: f64) -> f64 {
    if speed <= 0.0 {
        return if remaining > 0 { f64::INFINITY } else { 0.0 };
    }
    (remaining as f64 / speed).floor()
}

/// [`time_remaining`] as a [`Duration`], `None` while the estimate is
/// unbounded.
pub fn eta(remaining: u64, speed: f64) -> Option<Duration> {
    let secs = time_remaining(remaining, speed);
    secs.is_finite().then(|| Duration::from_secs_f64(secs))
}
