//! Clock and timestamp utilities.
//!
//! Track timestamps are carried in microseconds (container PTS) or
//! nanoseconds (renderer frame timestamps). This module provides:
//! - A monotonic session clock anchored at recording start
//! - Unit conversions between the two timestamp domains
//! - Drift measurement between the finished audio and video tracks

use std::time::Instant;

/// Microseconds per second.
pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Nanoseconds per microsecond.
pub const NANOS_PER_MICRO: i64 = 1_000;

/// Convert a nanosecond timestamp to microseconds (truncating).
pub fn ns_to_us(ns: i64) -> i64 {
    ns / NANOS_PER_MICRO
}

/// Convert a microsecond timestamp to nanoseconds.
pub fn us_to_ns(us: i64) -> i64 {
    us.saturating_mul(NANOS_PER_MICRO)
}

/// Convert microseconds to fractional seconds.
pub fn us_to_secs(us: i64) -> f64 {
    us as f64 / MICROS_PER_SEC as f64
}

/// A recording clock that provides monotonic timestamps relative to
/// a fixed epoch (the moment recording started).
#[derive(Debug, Clone)]
pub struct RecordingClock {
    /// The instant recording started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Microseconds elapsed since recording start.
    pub fn elapsed_us(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    /// Seconds elapsed since recording start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at recording start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Drift measurement between two track durations.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Duration of the reference track (µs).
    pub reference_us: i64,
    /// Duration of the measured track (µs).
    pub measured_us: i64,
}

impl DriftMeasurement {
    /// Drift in microseconds (positive = measured is longer).
    pub fn drift_us(&self) -> i64 {
        self.measured_us - self.reference_us
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_us() as f64 / 1_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = RecordingClock::start();
        assert!(clock.elapsed_us() < 1_000_000);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(ns_to_us(1_500_000_999), 1_500_000);
        assert_eq!(us_to_ns(2), 2_000);
        assert!((us_to_secs(2_500_000) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_drift_measurement() {
        let drift = DriftMeasurement {
            reference_us: 3_000_000,
            measured_us: 3_050_000,
        };
        assert_eq!(drift.drift_us(), 50_000);
        assert!((drift.drift_ms() - 50.0).abs() < 1e-9);
        assert!(drift.exceeds_threshold_ms(10.0));
        assert!(!drift.exceeds_threshold_ms(100.0));
    }
}
