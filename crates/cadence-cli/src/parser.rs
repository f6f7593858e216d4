use anyhow::{anyhow, Result};
use cadence_core::models::RecurrenceRule;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_english::{parse_date_string, Dialect};

use crate::cli::RuleArgs;

const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Parses an absolute (`2025-01-06 09:00`, RFC 3339) or relative (`tomorrow 3pm`) time.
/// Times without an offset are taken as UTC.
pub fn parse_datetime(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    parse_date_string(input, Utc::now(), Dialect::Us)
        .map_err(|e| anyhow!("Failed to parse time '{}': {}", input, e))
}

pub fn parse_date(input: &str) -> Result<NaiveDate> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(date);
    }
    parse_date_string(input, Utc::now(), Dialect::Us)
        .map(|dt| dt.date_naive())
        .map_err(|e| anyhow!("Failed to parse date '{}': {}", input, e))
}

/// Builds the rule described by the `--every` family of flags, if any.
pub fn parse_rule(args: &RuleArgs) -> Result<Option<RecurrenceRule>> {
    let Some(every) = args.every else {
        return Ok(None);
    };
    let until = args.until.as_deref().map(parse_date).transpose()?;
    Ok(Some(every.to_rule(args.interval, &args.on, &args.day, until)))
}
