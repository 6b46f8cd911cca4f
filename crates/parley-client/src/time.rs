use chrono::{DateTime, Timelike, TimeZone};

/// Label shown for a message without a usable timestamp.
pub const MISSING_TIME: &str = "N/A";

/// How message times are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeStyle {
    /// `hour > 12 ? hour - 12 : hour`, minutes unpadded. Noon reads as AM
    /// and midnight as `0`. Kept for output compatibility with existing
    /// clients.
    #[default]
    Legacy,
    /// Conventional 12-hour clock: `12:05 PM`, `12:30 AM`, `1:05 PM`.
    TwelveHour,
}

impl TimeStyle {
    pub fn format<Tz: TimeZone>(&self, at: Option<&DateTime<Tz>>) -> String {
        let Some(at) = at else {
            return MISSING_TIME.to_string();
        };
        match self {
            Self::Legacy => legacy_clock(at.hour(), at.minute()),
            Self::TwelveHour => twelve_hour_clock(at.hour(), at.minute()),
        }
    }
}

fn legacy_clock(hour: u32, minute: u32) -> String {
    if hour > 12 {
        format!("{}:{} PM", hour - 12, minute)
    } else {
        format!("{}:{} AM", hour, minute)
    }
}

fn twelve_hour_clock(hour: u32, minute: u32) -> String {
    let suffix = if hour < 12 { "AM" } else { "PM" };
    let hour = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{}:{:02} {}", hour, minute, suffix)
}
