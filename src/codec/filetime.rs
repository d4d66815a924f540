//! FILETIME conversion helpers
//!
//! FILETIME counts 100-nanosecond ticks since 1601-01-01 UTC.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 100ns ticks per second
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Seconds between 1601-01-01 and 1970-01-01
pub const EPOCH_SHIFT_SECONDS: u64 = 11_644_473_600;

/// Ticks at the Unix epoch
pub const UNIX_EPOCH_TICKS: u64 = EPOCH_SHIFT_SECONDS * TICKS_PER_SECOND;

/// Current time as FILETIME ticks
pub fn now() -> u64 {
    from_system_time(SystemTime::now())
}

/// Convert a [`SystemTime`] to FILETIME ticks
pub fn from_system_time(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => {
            UNIX_EPOCH_TICKS + since.as_secs() * TICKS_PER_SECOND + since.subsec_nanos() as u64 / 100
        }
        // Before 1970: count backward from the Unix epoch
        Err(err) => {
            let before = err.duration();
            UNIX_EPOCH_TICKS
                .saturating_sub(before.as_secs() * TICKS_PER_SECOND)
                .saturating_sub(before.subsec_nanos() as u64 / 100)
        }
    }
}

/// Convert FILETIME ticks to a [`SystemTime`]
pub fn to_system_time(ticks: u64) -> SystemTime {
    if ticks >= UNIX_EPOCH_TICKS {
        let since = ticks - UNIX_EPOCH_TICKS;
        UNIX_EPOCH
            + Duration::new(
                since / TICKS_PER_SECOND,
                (since % TICKS_PER_SECOND) as u32 * 100,
            )
    } else {
        let before = UNIX_EPOCH_TICKS - ticks;
        UNIX_EPOCH
            - Duration::new(
                before / TICKS_PER_SECOND,
                (before % TICKS_PER_SECOND) as u32 * 100,
            )
    }
}
