//! Timestamp normalization.
//!
//! Every other module consumes only already-normalized absolute timestamps;
//! all timezone defaulting lives here. Output is always ISO 8601 with an
//! explicit numeric UTC offset, second precision.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::BotError;

/// Naive layouts the translator is known to emit when it drops the offset.
const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Current instant localized to the reference timezone.
pub fn now_in_tz(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

/// Render a datetime as ISO 8601 with an explicit numeric UTC offset,
/// truncated to second precision.
pub fn to_iso<T: TimeZone>(dt: &DateTime<T>) -> String
where
    T::Offset: std::fmt::Display,
{
    dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Normalize a timestamp string to absolute ISO 8601 form.
///
/// Values that already carry an offset keep their instant and are re-rendered
/// in that offset; naive values get `tz`'s offset at that local time. Input
/// that parses as no date/time at all is a hard error, never a silent
/// default: defaulting here would write events at the wrong time.
pub fn to_absolute(text: &str, tz: Tz) -> Result<String, BotError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(BotError::UnparsableTimestamp(text.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(to_iso(&dt));
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, layout) {
            if let Some(dt) = localize(naive, tz) {
                return Ok(to_iso(&dt));
            }
        }
    }

    // Bare date: local midnight.
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0).and_then(|naive| localize(naive, tz)) {
            return Ok(to_iso(&dt));
        }
    }

    Err(BotError::UnparsableTimestamp(text.to_string()))
}

/// Attach `tz`'s offset to a naive local reading.
///
/// Ambiguous readings (clocks rolled back) take the earlier offset; readings
/// inside a spring-forward gap shift to the next valid hour.
pub(crate) fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earlier, _) => Some(earlier),
        LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest(),
    }
}
