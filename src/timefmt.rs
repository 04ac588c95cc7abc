//! ==============================================================================
//! timefmt.rs - display strings for instants
//! ==============================================================================
//!
//! purpose:
//!     pure mapping from an epoch-millisecond instant to the strings the
//!     dashboard shows: chart axis/tooltip labels, axis ticks and the header
//!     clock. everything is generic over the timezone so tests can pin one.
//!
//! relationships:
//!     - used by: series.rs (axis tick labels), view.rs (header clock)
//!
//! ==============================================================================

use chrono::{DateTime, TimeZone, Utc};
use std::fmt::Display;

/// wall-clock now, epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn to_zone<Tz: TimeZone>(ms: i64, tz: &Tz) -> Option<DateTime<Tz>> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.with_timezone(tz))
}

/// tooltip / axis label, e.g. `05MAR24 1:07 PM`
pub fn format_axis_label<Tz>(ms: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match to_zone(ms, tz) {
        Some(dt) => format!(
            "{}{}{} {}",
            dt.format("%d"),
            dt.format("%b").to_string().to_uppercase(),
            dt.format("%y"),
            dt.format("%-I:%M %p")
        ),
        None => ms.to_string(),
    }
}

/// header clock, e.g. `05-Mar-24 01:07pm`
pub fn format_clock<Tz>(ms: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match to_zone(ms, tz) {
        Some(dt) => dt.format("%d-%b-%y %I:%M%P").to_string(),
        None => ms.to_string(),
    }
}

/// format with an arbitrary strftime pattern (axis ticks)
pub fn format_with<Tz>(ms: i64, tz: &Tz, pattern: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match to_zone(ms, tz) {
        Some(dt) => dt.format(pattern).to_string(),
        None => ms.to_string(),
    }
}
