//! Small formatting and naming helpers shared across modules

use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::Duration;

/// Timestamp format of the last-harvest marker and of `from` arguments
pub const HARVEST_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a UTC timestamp the way the repository and the marker file expect it
pub fn format_harvest_date(date: DateTime<Utc>) -> String {
    date.format(HARVEST_DATE_FORMAT).to_string()
}

/// Parse a timestamp written by [`format_harvest_date`]
pub fn parse_harvest_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), HARVEST_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Human readable duration
///
/// # Examples
///
/// ```
/// use oaipmh_dl::utils::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(3_720)), "1 hours and 2 minutes");
/// assert_eq!(format_duration(Duration::from_millis(4_250)), "4.250 seconds");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days >= 1 {
        format!("{days} days, {hours} hours and {minutes} minutes")
    } else if hours >= 1 {
        format!("{hours} hours and {minutes} minutes")
    } else if minutes >= 1 {
        format!("{minutes} minutes and {seconds} seconds")
    } else {
        format!("{seconds}.{:03} seconds", duration.subsec_millis())
    }
}

/// Last `/`-separated segment of a record identifier
///
/// Used as the archive entry name, so anything that could escape the archive
/// root (`..`, backslashes) is neutralised.
pub fn trailing_segment(identifier: &str) -> String {
    let segment = identifier
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(identifier);
    let cleaned: String = segment
        .chars()
        .map(|c| if c == '\\' || c == ':' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "record".to_string(),
        _ => cleaned,
    }
}
