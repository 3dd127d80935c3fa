use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::LocalTime;
use crate::error::ConfigError;

const MINUTES_PER_DAY: i32 = 24 * 60;

fn enabled_default() -> bool {
    true
}

/// A weekly time window that selects a preset.
///
/// When the end is numerically before the start the window crosses midnight. Both bounds are
/// inclusive. `days_of_week` uses 0 = Sunday .. 6 = Saturday and is matched against the
/// current day, including after midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub preset_id: String,
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
    pub days_of_week: Vec<u8>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

impl Schedule {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSchedule {
            id: self.id.clone(),
            reason,
        };
        if self.preset_id.is_empty() {
            return Err(invalid("preset_id must not be empty".into()));
        }
        for (field, value) in [("start_hour", self.start_hour), ("end_hour", self.end_hour)] {
            if value > 23 {
                return Err(invalid(format!("{field} {value} is outside 0..=23")));
            }
        }
        for (field, value) in [("start_minute", self.start_minute), ("end_minute", self.end_minute)] {
            if value > 59 {
                return Err(invalid(format!("{field} {value} is outside 0..=59")));
            }
        }
        if let Some(day) = self.days_of_week.iter().find(|&&d| d > 6) {
            return Err(invalid(format!("day of week {day} is outside 0..=6")));
        }
        Ok(())
    }

    fn start_minutes(&self) -> i32 {
        i32::from(self.start_hour) * 60 + i32::from(self.start_minute)
    }

    fn end_minutes(&self) -> i32 {
        i32::from(self.end_hour) * 60 + i32::from(self.end_minute)
    }

    pub fn crosses_midnight(&self) -> bool {
        self.start_minutes() > self.end_minutes()
    }

    /// Length of the window in minutes; midnight-crossing windows wrap around.
    pub fn duration_minutes(&self) -> i32 {
        let d = self.end_minutes() - self.start_minutes();
        if d < 0 {
            d + MINUTES_PER_DAY
        } else {
            d
        }
    }

    pub fn is_active_at(&self, at: LocalTime) -> bool {
        if !self.enabled || !self.days_of_week.contains(&at.weekday) {
            return false;
        }
        let now = i32::from(at.minutes_of_day());
        let (start, end) = (self.start_minutes(), self.end_minutes());
        if start > end {
            now >= start || now <= end
        } else {
            now >= start && now <= end
        }
    }
}

/// Preset of the most specific active schedule: shortest window wins, ties go to the lowest id.
pub fn active_preset<'a>(schedules: &'a BTreeMap<String, Schedule>, at: LocalTime) -> Option<&'a str> {
    schedules
        .values()
        .filter(|s| s.is_active_at(at))
        .min_by_key(|s| s.duration_minutes())
        .map(|s| s.preset_id.as_str())
}
