//! Process-monotonic time and sample/duration conversions.
//!
//! All timestamps in this crate are nanoseconds on a single monotonic
//! timeline. [`now_ns`] anchors that timeline at the first call site in the
//! process, so values are comparable across threads, outputs, and sources
//! without any cross-engine coordination.

use std::time::Instant;

use once_cell::sync::Lazy;

/// Nanoseconds per second.
pub const NS_PER_SEC: u64 = 1_000_000_000;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Returns the current process-monotonic time in nanoseconds.
///
/// The epoch is the first call to any clock function in the process; the
/// value never goes backwards and is unaffected by wall-clock adjustments.
#[must_use]
pub fn now_ns() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Computes `val * num / den` without intermediate overflow.
///
/// Returns 0 when `den` is 0; duration math treats a missing rate as a
/// zero-length interval rather than an error.
#[must_use]
pub fn mul_div64(val: u64, num: u64, den: u64) -> u64 {
    if den == 0 {
        return 0;
    }
    ((val as u128 * num as u128) / den as u128) as u64
}

/// Converts a frame count at `sample_rate` into a duration in nanoseconds.
#[must_use]
pub fn frames_to_ns(frames: u64, sample_rate: u32) -> u64 {
    mul_div64(frames, NS_PER_SEC, u64::from(sample_rate))
}

/// Converts a duration in nanoseconds into a frame count at `sample_rate`.
#[must_use]
pub fn ns_to_frames(ns: u64, sample_rate: u32) -> u64 {
    mul_div64(ns, u64::from(sample_rate), NS_PER_SEC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ns_is_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn frames_to_ns_exact_second() {
        assert_eq!(frames_to_ns(48_000, 48_000), NS_PER_SEC);
        assert_eq!(frames_to_ns(1024, 48_000), 21_333_333);
    }

    #[test]
    fn ns_to_frames_inverts_whole_seconds() {
        assert_eq!(ns_to_frames(NS_PER_SEC, 44_100), 44_100);
        assert_eq!(ns_to_frames(0, 44_100), 0);
    }

    #[test]
    fn zero_rate_yields_zero_duration() {
        assert_eq!(frames_to_ns(4096, 0), 0);
        assert_eq!(ns_to_frames(NS_PER_SEC, 0), 0);
    }

    #[test]
    fn mul_div64_survives_large_products() {
        // 2^40 frames at 1e9 num would overflow u64 without the wide
        // intermediate.
        let frames = 1u64 << 40;
        assert_eq!(mul_div64(frames, NS_PER_SEC, NS_PER_SEC), frames);
    }
}
