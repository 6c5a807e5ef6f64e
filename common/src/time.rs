// A simple module to define the time types used in the project
//
// All timestamps produced here come from the system clock and are only used to
// pace simulated chains. Nothing in the simulator depends on them being
// monotonic across processes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Millis timestamps used to determine it using its type
pub type TimestampMillis = u64;

// Seconds timestamps used to determine it using its type
pub type TimestampSeconds = u64;

#[inline]
pub fn get_current_time() -> Duration {
    // A clock set before 1970 is treated as the epoch itself
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

// Return timestamp in seconds
pub fn get_current_time_in_seconds() -> TimestampSeconds {
    get_current_time().as_secs()
}

// Return timestamp in milliseconds
// We cast it to u64 as we have plenty of time before it overflows (year 584,942,417 AD)
pub fn get_current_time_in_millis() -> TimestampMillis {
    get_current_time().as_millis() as TimestampMillis
}

/// Round `now` up to the next multiple of `interval`.
///
/// A timestamp already on a boundary is returned unchanged.
/// An interval of zero leaves the timestamp untouched.
pub fn next_block_aligned_timestamp(now: TimestampMillis, interval: u64) -> TimestampMillis {
    if interval == 0 {
        return now;
    }

    match now % interval {
        0 => now,
        rest => now + (interval - rest),
    }
}

/// Timestamp of the given slot for a chain starting at `start_time`
#[inline]
pub fn slot_timestamp(start_time: TimestampMillis, interval: u64, slot: u64) -> TimestampMillis {
    start_time.saturating_add(interval.saturating_mul(slot))
}
