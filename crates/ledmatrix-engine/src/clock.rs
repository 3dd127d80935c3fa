//! Time sources: a monotonic millisecond clock for frame pacing and scene durations, and a
//! wall-clock view (hour, minute, weekday) for schedules.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use time::{OffsetDateTime, UtcOffset};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the first call in this process.
pub fn millis() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

pub fn sleep_millis(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

/// Wall-clock position used to evaluate schedules. `weekday` is 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub hour: u8,
    pub minute: u8,
    pub weekday: u8,
}

impl LocalTime {
    pub fn new(hour: u8, minute: u8, weekday: u8) -> Self {
        Self { hour, minute, weekday }
    }

    pub fn minutes_of_day(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

/// Converts "now" into `LocalTime` with a UTC offset captured once.
///
/// The local offset can only be queried soundly while the process is single-threaded, so the
/// caller reads it at the very start of `main` and passes it to `with_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    offset: UtcOffset,
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::utc()
    }
}

impl LocalClock {
    pub fn utc() -> Self {
        Self {
            offset: UtcOffset::UTC,
        }
    }

    pub fn with_offset(offset: UtcOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    pub fn now(&self) -> LocalTime {
        let now = OffsetDateTime::now_utc().to_offset(self.offset);
        LocalTime {
            hour: now.hour(),
            minute: now.minute(),
            weekday: now.weekday().number_days_from_sunday(),
        }
    }
}
