use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::models::{
    normalize_timestamp, Event, EventKind, EventViewModel, Occurrence, VirtualInstance,
};
use crate::recurrence::RecurrenceEngine;

/// Longest span, in days, checked when looking for a visible window of a multi-day event.
const MAX_VISIBILITY_SCAN_DAYS: i64 = 366;

/// Configuration for materialization and visibility filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializerConfig {
    /// First visible hour of the day (0-23)
    pub visible_start_hour: u32,
    /// Hour the visible window ends (1-24)
    pub visible_end_hour: u32,
    /// How far around the requested range series masters are considered
    pub lookaround_months: u32,
    /// Grid that clipped occurrences snap to
    pub grid_minutes: u32,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            visible_start_hour: 0,
            visible_end_hour: 24,
            lookaround_months: 6,
            grid_minutes: 30,
        }
    }
}

impl MaterializerConfig {
    fn shows_whole_day(&self) -> bool {
        !self.has_valid_window() || (self.visible_start_hour == 0 && self.visible_end_hour >= 24)
    }

    fn has_valid_window(&self) -> bool {
        self.visible_start_hour < self.visible_end_hour && self.visible_end_hour <= 24
    }

    fn grid(&self) -> Duration {
        Duration::minutes(i64::from(self.grid_minutes.max(1)))
    }
}

/// InstanceMaterializer: merges expanded series dates with persisted rows.
///
/// Responsibilities:
/// 1. Partition rows into standalone events, series masters and overrides
/// 2. Expand every master near the range and shadow dates that have an override
/// 3. Surface overrides whose series is gone as standalone events
/// 4. Drop or clip occurrences against the visible-hour window
///
/// Output is sorted by start time, then id, so the same rows always
/// materialize identically.
#[derive(Debug, Clone, Default)]
pub struct InstanceMaterializer {
    config: MaterializerConfig,
}

impl InstanceMaterializer {
    pub fn new(config: MaterializerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(MaterializerConfig::default())
    }

    pub fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    /// The requested range widened by `lookaround_months` on both sides.
    pub fn widened_range(&self, range_start: NaiveDate, range_end: NaiveDate) -> (NaiveDate, NaiveDate) {
        let months = Months::new(self.config.lookaround_months);
        (
            range_start.checked_sub_months(months).unwrap_or(NaiveDate::MIN),
            range_end.checked_add_months(months).unwrap_or(NaiveDate::MAX),
        )
    }

    /// Materializes every occurrence visible in `[range_start, range_end]` (inclusive days).
    pub fn materialize(
        &self,
        rows: &[Event],
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Vec<EventViewModel> {
        let (window_start, window_end) = day_bounds(range_start, range_end);
        let (widened_start, widened_end) = self.widened_range(range_start, range_end);

        // Keyed by id so duplicate rows collapse and iteration order is fixed.
        let mut masters: BTreeMap<i64, &Event> = BTreeMap::new();
        let mut standalone: BTreeMap<i64, &Event> = BTreeMap::new();
        let mut overrides: BTreeMap<i64, &Event> = BTreeMap::new();

        for row in rows {
            match row.kind() {
                Ok(EventKind::SeriesMaster) => {
                    masters.insert(row.id, row);
                }
                Ok(EventKind::Override) => {
                    overrides.insert(row.id, row);
                }
                Ok(EventKind::Standalone) => {
                    standalone.insert(row.id, row);
                }
                Err(e) => warn!(event_id = row.id, error = %e, "InstanceMaterializer: skipping malformed row"),
            }
        }

        // (series, original start) -> override; the lowest id wins on collisions.
        let mut by_series: BTreeMap<i64, BTreeMap<DateTime<Utc>, &Event>> = BTreeMap::new();
        for row in overrides.values() {
            let (Some(series_id), Some(original)) = (row.series_id, row.original_start_utc) else {
                continue;
            };
            by_series
                .entry(series_id)
                .or_default()
                .entry(normalize_timestamp(original))
                .or_insert(row);
        }

        let mut occurrences: Vec<Occurrence> = Vec::new();

        for master in masters.values() {
            let series_overrides = by_series.remove(&master.id).unwrap_or_default();

            if self.master_intersects(master, widened_start, widened_end) {
                let lookback = Duration::days(master.duration().num_days() + 1);
                let dates = match RecurrenceEngine::expand_master(master, range_start - lookback, range_end) {
                    Ok(dates) => dates,
                    Err(e) => {
                        warn!(series_id = master.id, error = %e, "InstanceMaterializer: failed to expand series");
                        Vec::new()
                    }
                };

                for date in dates {
                    let instance = VirtualInstance::from_master(master, date);
                    if series_overrides.contains_key(&instance.original_start()) {
                        continue;
                    }
                    if overlaps(instance.start_utc, instance.end_utc, window_start, window_end) {
                        occurrences.push(Occurrence::Virtual(instance));
                    }
                }
            }

            for row in series_overrides.into_values() {
                if !row.is_cancelled && overlaps(row.start_utc, row.end_utc, window_start, window_end) {
                    occurrences.push(Occurrence::Override(row.clone()));
                }
            }
        }

        for (series_id, orphans) in by_series {
            debug!(series_id, count = orphans.len(), "InstanceMaterializer: series missing, emitting overrides as standalone");
            for row in orphans.into_values() {
                if !row.is_cancelled && overlaps(row.start_utc, row.end_utc, window_start, window_end) {
                    occurrences.push(Occurrence::Standalone(row.clone()));
                }
            }
        }

        for row in standalone.into_values() {
            if overlaps(row.start_utc, row.end_utc, window_start, window_end) {
                occurrences.push(Occurrence::Standalone(row.clone()));
            }
        }

        let mut views: Vec<EventViewModel> = occurrences
            .into_iter()
            .filter_map(|occurrence| self.apply_visibility(occurrence))
            .collect();
        views.sort_by(|a, b| {
            a.occurrence
                .start_utc()
                .cmp(&b.occurrence.start_utc())
                .then_with(|| a.id().cmp(&b.id()))
        });
        views
    }

    /// Drops occurrences entirely outside the visible-hour window and clips partial ones.
    pub fn apply_visibility(&self, occurrence: Occurrence) -> Option<EventViewModel> {
        if self.config.shows_whole_day() {
            return Some(EventViewModel::unclipped(occurrence));
        }

        let start = occurrence.start_utc();
        let end = occurrence.end_utc();
        let grid = self.config.grid();

        let mut day = start.date_naive();
        let last_day = end.date_naive().min(day + Duration::days(MAX_VISIBILITY_SCAN_DAYS));
        while day <= last_day {
            let (visible_start, visible_end) = self.visible_window(day);
            if overlaps(start, end, visible_start, visible_end) {
                if start >= visible_start && end <= visible_end {
                    return Some(EventViewModel::unclipped(occurrence));
                }
                let display_start = floor_to_grid(start.max(visible_start), grid).max(visible_start);
                let mut display_end = ceil_to_grid(end.min(visible_end), grid).min(visible_end);
                if display_end <= display_start {
                    display_end = (display_start + grid).min(visible_end);
                }
                return Some(EventViewModel {
                    occurrence,
                    display_start,
                    display_end,
                    clipped: true,
                });
            }
            day += Duration::days(1);
        }

        debug!(id = %occurrence.id(), "InstanceMaterializer: occurrence outside visible hours");
        None
    }

    fn visible_window(&self, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let midnight = day.and_time(chrono::NaiveTime::MIN).and_utc();
        (
            midnight + Duration::hours(i64::from(self.config.visible_start_hour)),
            midnight + Duration::hours(i64::from(self.config.visible_end_hour)),
        )
    }

    fn master_intersects(&self, master: &Event, widened_start: NaiveDate, widened_end: NaiveDate) -> bool {
        let series_start = master.start_utc.date_naive();
        let series_end = match master.rule() {
            Ok(Some(rule)) => rule.end_date,
            _ => master.recurrence_end_date,
        };
        series_start <= widened_end && series_end.map_or(true, |end| end >= widened_start)
    }
}

/// `[start of range_start, start of the day after range_end)`.
pub fn day_bounds(range_start: NaiveDate, range_end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = range_start.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = (range_end + Duration::days(1)).and_time(chrono::NaiveTime::MIN).and_utc();
    (start, end)
}

/// Half-open overlap; zero-length intervals count when their instant lies inside.
pub(crate) fn overlaps(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> bool {
    if start == end {
        return start >= window_start && start < window_end;
    }
    start < window_end && end > window_start
}

fn floor_to_grid(dt: DateTime<Utc>, grid: Duration) -> DateTime<Utc> {
    let step = grid.num_seconds().max(1);
    let secs = dt.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(step), 0).unwrap_or(dt)
}

fn ceil_to_grid(dt: DateTime<Utc>, grid: Duration) -> DateTime<Utc> {
    let step = grid.num_seconds().max(1);
    let secs = dt.timestamp() + i64::from(dt.timestamp_subsec_nanos() > 0);
    let remainder = secs.rem_euclid(step);
    if remainder == 0 {
        return DateTime::from_timestamp(secs, 0).unwrap_or(dt);
    }
    DateTime::from_timestamp(secs + step - remainder, 0).unwrap_or(dt)
}
