use chrono::{DateTime, Duration, NaiveDate, Utc};
use rrule::RRuleSet;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::models::{Event, Frequency, RecurrenceRule};

/// Upper bound handed to the rrule iterator for one expansion.
const MAX_OCCURRENCES_PER_EXPANSION: u16 = u16::MAX;

/// RecurrenceEngine: turns a [`RecurrenceRule`] into the dates it produces.
///
/// Expansion is pure and restartable: the same rule, series start and range
/// always yield the same sorted, deduplicated dates. Only the date varies per
/// occurrence; time of day and duration are inherited from the series master.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecurrenceEngine;

impl RecurrenceEngine {
    /// Expands `rule` into the occurrence dates within `[range_start, range_end]`.
    ///
    /// # Behavior
    /// - DAILY: every `interval` days from the series start
    /// - WEEKLY: every `interval` weeks from the series start's week, once per
    ///   listed weekday (the start's weekday when none are listed)
    /// - MONTHLY: every `interval` months, once per listed day that exists in
    ///   that month (the start's day of month when none are listed)
    /// - Never produces dates before the series start or after `end_date`
    /// - Unknown frequencies produce nothing
    pub fn expand(
        rule: &RecurrenceRule,
        series_start: DateTime<Utc>,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, CoreError> {
        if rule.frequency == Frequency::Unknown {
            debug!(?rule, "RecurrenceEngine::expand: unknown frequency, nothing to expand");
            return Ok(Vec::new());
        }

        let first = range_start.max(series_start.date_naive());
        let last = match rule.end_date {
            Some(end_date) => range_end.min(end_date),
            None => range_end,
        };
        if last < first {
            return Ok(Vec::new());
        }

        let rrule_set = Self::rrule_set(rule, series_start)?;

        // Bounds are padded by a day either side and the result filtered by
        // date, so the inclusiveness of after/before never matters.
        let after = (first - Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(series_start);
        let before = (last + Duration::days(2))
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(series_start);

        let result = rrule_set
            .after(after.with_timezone(&rrule::Tz::UTC))
            .before(before.with_timezone(&rrule::Tz::UTC))
            .all(MAX_OCCURRENCES_PER_EXPANSION);

        if result.limited {
            warn!(
                %first, %last,
                "RecurrenceEngine::expand: occurrence limit reached, range truncated"
            );
        }

        let mut dates: Vec<NaiveDate> = result
            .dates
            .iter()
            .map(|dt| dt.with_timezone(&Utc).date_naive())
            .filter(|date| *date >= first && *date <= last)
            .collect();
        dates.sort_unstable();
        dates.dedup();
        Ok(dates)
    }

    /// Expands the rule stored on a series master.
    pub fn expand_master(
        master: &Event,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, CoreError> {
        let rule = master.rule()?.ok_or_else(|| {
            CoreError::InvalidRule(format!("Event {} has no recurrence rule", master.id))
        })?;
        Self::expand(&rule, master.start_utc, range_start, range_end)
    }

    /// Whether `date` is an occurrence of the rule.
    pub fn produces(
        rule: &RecurrenceRule,
        series_start: DateTime<Utc>,
        date: NaiveDate,
    ) -> Result<bool, CoreError> {
        Ok(!Self::expand(rule, series_start, date, date)?.is_empty())
    }

    /// Validates a rule before it is persisted.
    pub fn validate(rule: &RecurrenceRule) -> Result<(), CoreError> {
        if rule.frequency == Frequency::Unknown {
            return Err(CoreError::InvalidRule("Unsupported frequency".to_string()));
        }
        if let Some(day) = rule.by_month_days.iter().find(|d| !(1..=31).contains(*d)) {
            return Err(CoreError::InvalidRule(format!(
                "Day of month {} is outside 1-31",
                day
            )));
        }
        Ok(())
    }

    /// Renders the rule as an RFC 5545 RRULE anchored at `series_start`.
    pub fn to_rrule_string(rule: &RecurrenceRule, series_start: DateTime<Utc>) -> String {
        let rule = rule.normalized();
        let mut parts = vec![
            format!("FREQ={}", rule.frequency),
            format!("INTERVAL={}", rule.interval),
        ];

        match rule.frequency {
            Frequency::Weekly if !rule.by_week_days.is_empty() => {
                let days: Vec<&str> = rule.by_week_days.iter().map(|d| d.code()).collect();
                parts.push(format!("BYDAY={}", days.join(",")));
            }
            Frequency::Monthly if !rule.by_month_days.is_empty() => {
                let days: Vec<String> = rule.by_month_days.iter().map(|d| d.to_string()).collect();
                parts.push(format!("BYMONTHDAY={}", days.join(",")));
            }
            _ => {}
        }

        format!(
            "DTSTART:{}\nRRULE:{}",
            series_start.format("%Y%m%dT%H%M%SZ"),
            parts.join(";")
        )
    }

    fn rrule_set(rule: &RecurrenceRule, series_start: DateTime<Utc>) -> Result<RRuleSet, CoreError> {
        Self::validate(rule)?;
        let rrule_string = Self::to_rrule_string(rule, series_start);
        rrule_string.parse::<RRuleSet>().map_err(|e| {
            CoreError::InvalidRule(format!("Failed to parse RRULE '{}': {}", rrule_string, e))
        })
    }
}
