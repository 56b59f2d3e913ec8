use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::db::Repository;
use crate::error::Result;

/// Storage format for every `published_date`; sorts lexicographically.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const NAIVE_DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"];

pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse the date shapes scrapers and feeds produce. Naive values are taken as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    // RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // RSS pubDate (e.g., "Sat, 11 Jan 2026 12:34:56 +0000")
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    for format in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

pub fn normalize_published_date(raw: &str) -> Option<String> {
    parse_datetime(raw).map(|dt| format_timestamp(&dt))
}

/// Rewrites stored dates into the canonical form. Values that cannot be
/// parsed are logged and left alone. Returns the number of rows rewritten.
pub async fn normalize_stored_dates(repository: &Repository) -> Result<usize> {
    let mut rewritten = 0;

    for (link, raw) in repository.published_dates().await? {
        match normalize_published_date(&raw) {
            Some(normalized) if normalized == raw => {}
            Some(normalized) => {
                repository.update_published_date(&link, &normalized).await?;
                rewritten += 1;
            }
            None => tracing::warn!(link = %link, value = %raw, "Unparseable published date"),
        }
    }

    if rewritten > 0 {
        tracing::info!(rewritten, "Normalized published dates");
    }
    Ok(rewritten)
}
