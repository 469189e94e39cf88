//! Clock-drift estimation for asynchronous audio sources.
//!
//! A source whose device clock runs slightly fast or slow relative to the
//! engine clock will drift: its reconciled timestamps walk away from wall
//! time a few microseconds per second. Resynchronizing in discrete jumps is
//! audible, so instead a slow control loop estimates the drift and an
//! external resampler stretches the stream by a matching ratio until the
//! clocks converge.
//!
//! The loop constants below are policy, not derived physics: they were
//! tuned for a unity-gain frequency near 1/180 Hz with roughly 60 degrees
//! of phase margin at typical sample rates, slow enough that the correction
//! is always inaudible.

/// Loop gain applied to each error sample (seconds of error per second).
pub const FILTER_GAIN: f64 = 7.0e-4;

/// Inverse of the first (lag) time constant, per sample.
pub const FILTER_C1_INV: f64 = 1.0 / 960.0;

/// Inverse of the second (lead) time constant, per sample.
pub const FILTER_C2_INV: f64 = 1.0 / 57.0;

/// Largest compensation the ratio will report, in parts per 65536 (1%).
///
/// Drift worth more than this indicates a broken clock, not drift; the
/// discontinuity logic will catch it long before the loop winds this far.
pub const MAX_RATIO_PARTS: i32 = 655;

/// Two-state lag-lead filter over periodic timing-error samples.
///
/// Deterministic: replaying the same `(sample_rate, frame_count, error_ns)`
/// sequence from a fresh filter always produces the same state.
#[derive(Debug, Clone, Default)]
pub struct DriftFilter {
    state1: f64,
    state2: f64,
    last_error_ns: i64,
}

impl DriftFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes both accumulators and the stored error sample.
    pub fn reset(&mut self) {
        self.state1 = 0.0;
        self.state2 = 0.0;
        self.last_error_ns = 0;
    }

    /// Feeds one delivery's worth of timing error into the loop.
    ///
    /// `error_ns` is how far the source clock sits ahead of the system
    /// clock (positive: source is early). A zero `sample_rate` leaves the
    /// state untouched; a silent device contributes no time.
    ///
    /// Returns the updated drift estimate in seconds.
    pub fn update(&mut self, sample_rate: u32, frame_count: usize, error_ns: i64) -> f64 {
        if sample_rate == 0 {
            return self.state1;
        }

        self.last_error_ns = error_ns;

        let input_current = FILTER_GAIN * error_ns as f64 * 1e-9;
        let feedback = (self.state1 - self.state2) / f64::from(sample_rate);
        self.state1 += (input_current - feedback) * FILTER_C1_INV * frame_count as f64;
        self.state2 += feedback * FILTER_C2_INV * frame_count as f64;

        self.state1
    }

    /// Current drift estimate in seconds.
    #[must_use]
    pub fn drift_seconds(&self) -> f64 {
        self.state1
    }

    /// The error sample from the most recent update.
    #[must_use]
    pub fn last_error_ns(&self) -> i64 {
        self.last_error_ns
    }
}

/// Drift filter plus the enable/disable policy a source exposes.
///
/// While disabled, updates are ignored and the reported ratio is neutral.
/// Every transition (enable or disable) resets the filter so stale state
/// never bleeds into a new tracking session.
#[derive(Debug, Clone, Default)]
pub struct DriftCompensator {
    filter: DriftFilter,
    enabled: bool,
}

impl DriftCompensator {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables compensation, resetting the loop either way.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.filter.reset();
        }
        self.enabled = enabled;
    }

    /// Feeds an error sample when enabled; no-op otherwise.
    pub fn update(&mut self, sample_rate: u32, frame_count: usize, error_ns: i64) {
        if self.enabled {
            self.filter.update(sample_rate, frame_count, error_ns);
        }
    }

    /// Compensation to apply, in signed parts per 65536 of the sample rate.
    ///
    /// 0 is neutral. An external resampler consumes this as
    /// `rate * (65536 + parts) / 65536`.
    #[must_use]
    pub fn ratio_parts(&self) -> i32 {
        if !self.enabled {
            return 0;
        }
        let parts = (self.filter.drift_seconds() * 65536.0).round() as i32;
        parts.clamp(-MAX_RATIO_PARTS, MAX_RATIO_PARTS)
    }

    /// Read access to the underlying filter state.
    #[must_use]
    pub fn filter(&self) -> &DriftFilter {
        &self.filter
    }
}
