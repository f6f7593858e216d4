use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::CoreError;

// ============================================================================
// Recurrence Rules
// ============================================================================

/// Smallest and largest accepted recurrence interval.
pub const MIN_INTERVAL: u32 = 1;
pub const MAX_INTERVAL: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    /// Anything the engine does not understand. Expands to nothing.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "DAILY"),
            Frequency::Weekly => write!(f, "WEEKLY"),
            Frequency::Monthly => write!(f, "MONTHLY"),
            Frequency::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid frequency: {0}")]
pub struct ParseFrequencyError(String);

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" | "day" => Ok(Frequency::Daily),
            "weekly" | "week" => Ok(Frequency::Weekly),
            "monthly" | "month" => Ok(Frequency::Monthly),
            _ => Err(ParseFrequencyError(s.to_string())),
        }
    }
}

/// ISO weekday, serialized with its two-letter RFC 5545 code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Weekday {
    #[serde(rename = "MO")]
    Monday,
    #[serde(rename = "TU")]
    Tuesday,
    #[serde(rename = "WE")]
    Wednesday,
    #[serde(rename = "TH")]
    Thursday,
    #[serde(rename = "FR")]
    Friday,
    #[serde(rename = "SA")]
    Saturday,
    #[serde(rename = "SU")]
    Sunday,
}

impl Weekday {
    pub fn code(self) -> &'static str {
        match self {
            Weekday::Monday => "MO",
            Weekday::Tuesday => "TU",
            Weekday::Wednesday => "WE",
            Weekday::Thursday => "TH",
            Weekday::Friday => "FR",
            Weekday::Saturday => "SA",
            Weekday::Sunday => "SU",
        }
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid weekday: {0}")]
pub struct ParseWeekdayError(String);

impl FromStr for Weekday {
    type Err = ParseWeekdayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mo" | "mon" | "monday" => Ok(Weekday::Monday),
            "tu" | "tue" | "tuesday" => Ok(Weekday::Tuesday),
            "we" | "wed" | "wednesday" => Ok(Weekday::Wednesday),
            "th" | "thu" | "thursday" => Ok(Weekday::Thursday),
            "fr" | "fri" | "friday" => Ok(Weekday::Friday),
            "sa" | "sat" | "saturday" => Ok(Weekday::Saturday),
            "su" | "sun" | "sunday" => Ok(Weekday::Sunday),
            _ => Err(ParseWeekdayError(s.to_string())),
        }
    }
}

fn default_interval() -> u32 {
    MIN_INTERVAL
}

/// A recurrence rule as stored (JSON) in `events.recurrence_rule`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// WEEKLY only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_week_days: Vec<Weekday>,
    /// MONTHLY only, 1-31.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_month_days: Vec<u32>,
    /// Inclusive last date of the series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl RecurrenceRule {
    pub fn daily(interval: u32) -> Self {
        Self {
            frequency: Frequency::Daily,
            interval,
            by_week_days: Vec::new(),
            by_month_days: Vec::new(),
            end_date: None,
        }
    }

    pub fn weekly(interval: u32, days: impl IntoIterator<Item = Weekday>) -> Self {
        Self {
            frequency: Frequency::Weekly,
            interval,
            by_week_days: days.into_iter().collect(),
            by_month_days: Vec::new(),
            end_date: None,
        }
    }

    pub fn monthly(interval: u32, days: impl IntoIterator<Item = u32>) -> Self {
        Self {
            frequency: Frequency::Monthly,
            interval,
            by_week_days: Vec::new(),
            by_month_days: days.into_iter().collect(),
            end_date: None,
        }
    }

    pub fn until(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// The interval clamped to the supported 1-30 range.
    #[inline]
    pub fn effective_interval(&self) -> u32 {
        self.interval.clamp(MIN_INTERVAL, MAX_INTERVAL)
    }

    /// Sorted, deduplicated copy with the interval clamped.
    pub fn normalized(&self) -> Self {
        let mut by_week_days = self.by_week_days.clone();
        by_week_days.sort();
        by_week_days.dedup();
        let mut by_month_days = self.by_month_days.clone();
        by_month_days.sort_unstable();
        by_month_days.dedup();

        Self {
            frequency: self.frequency,
            interval: self.effective_interval(),
            by_week_days,
            by_month_days,
            end_date: self.end_date,
        }
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Event Rows
// ============================================================================

/// A persisted event row. Depending on its columns it is a series master,
/// an override of one occurrence, or a standalone event (see [`EventKind`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub color: Option<String>,
    pub is_recurring: bool,
    /// JSON-encoded [`RecurrenceRule`], masters only
    pub recurrence_rule: Option<String>,
    pub recurrence_end_date: Option<NaiveDate>,
    /// Set on overrides only, points at the series master
    pub series_id: Option<i64>,
    /// The rule-computed start this override replaces
    pub original_start_utc: Option<DateTime<Utc>>,
    /// Cancelled overrides suppress their date and are never shown
    pub is_cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SeriesMaster,
    Override,
    Standalone,
}

impl Event {
    /// Classifies the row, rejecting rows that are both recurring and part of a series.
    pub fn kind(&self) -> Result<EventKind, CoreError> {
        match (self.is_recurring, self.series_id) {
            (true, Some(series_id)) => Err(CoreError::InvalidInput(format!(
                "Event {} is recurring and also belongs to series {}",
                self.id, series_id
            ))),
            (true, None) => Ok(EventKind::SeriesMaster),
            (false, Some(_)) if self.original_start_utc.is_none() => Err(CoreError::InvalidInput(
                format!("Override {} has no original start", self.id),
            )),
            (false, Some(_)) => Ok(EventKind::Override),
            (false, None) => Ok(EventKind::Standalone),
        }
    }

    /// Parses the stored rule. The `recurrence_end_date` column fills in a missing end date.
    pub fn rule(&self) -> Result<Option<RecurrenceRule>, CoreError> {
        let Some(json) = self.recurrence_rule.as_deref() else {
            return Ok(None);
        };
        let mut rule = RecurrenceRule::from_json(json)?;
        if rule.end_date.is_none() {
            rule.end_date = self.recurrence_end_date;
        }
        Ok(Some(rule))
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        self.end_utc - self.start_utc
    }

    /// Whether a liberated standalone still remembers the occurrence it came from.
    pub fn was_series_instance(&self) -> bool {
        self.series_id.is_none() && !self.is_recurring && self.original_start_utc.is_some()
    }
}

/// Data required to create an event row.
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub owner_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub color: Option<String>,
    /// When present the row becomes a series master
    pub recurrence: Option<RecurrenceRule>,
    /// For overrides: links the row to its series
    pub series_id: Option<i64>,
    pub original_start_utc: Option<DateTime<Utc>>,
    pub is_cancelled: bool,
}

impl NewEvent {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.recurrence.is_some() && self.series_id.is_some() {
            return Err(CoreError::InvalidInput(
                "A series master cannot itself belong to a series".to_string(),
            ));
        }
        if self.series_id.is_some() && self.original_start_utc.is_none() {
            return Err(CoreError::InvalidInput(
                "An override requires the original start it replaces".to_string(),
            ));
        }
        if self.end_utc < self.start_utc {
            return Err(CoreError::InvalidInput(
                "Event end must not precede its start".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update of an event row. Nested options distinguish "leave" from "clear".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateEvent {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub start_utc: Option<DateTime<Utc>>,
    pub end_utc: Option<DateTime<Utc>>,
    pub color: Option<Option<String>>,
    pub recurrence: Option<Option<RecurrenceRule>>,
    pub series_id: Option<Option<i64>>,
    pub original_start_utc: Option<Option<DateTime<Utc>>>,
    pub is_cancelled: Option<bool>,
}

impl UpdateEvent {
    pub fn reschedule(start_utc: DateTime<Utc>, end_utc: DateTime<Utc>) -> Self {
        Self {
            start_utc: Some(start_utc),
            end_utc: Some(end_utc),
            ..Default::default()
        }
    }

    pub fn cancel() -> Self {
        Self {
            is_cancelled: Some(true),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the patch to an in-memory row, mirroring what the repository persists.
    pub fn apply_to(&self, event: &mut Event) -> Result<(), CoreError> {
        if let Some(title) = &self.title {
            event.title = title.clone();
        }
        if let Some(description) = &self.description {
            event.description = description.clone();
        }
        if let Some(start) = self.start_utc {
            event.start_utc = start;
        }
        if let Some(end) = self.end_utc {
            event.end_utc = end;
        }
        if let Some(color) = &self.color {
            event.color = color.clone();
        }
        if let Some(recurrence) = &self.recurrence {
            match recurrence {
                Some(rule) => {
                    event.is_recurring = true;
                    event.recurrence_rule = Some(rule.to_json()?);
                    event.recurrence_end_date = rule.end_date;
                }
                None => {
                    event.is_recurring = false;
                    event.recurrence_rule = None;
                    event.recurrence_end_date = None;
                }
            }
        }
        if let Some(series_id) = self.series_id {
            event.series_id = series_id;
        }
        if let Some(original) = self.original_start_utc {
            event.original_start_utc = original;
        }
        if let Some(cancelled) = self.is_cancelled {
            event.is_cancelled = cancelled;
        }
        if event.end_utc < event.start_utc {
            return Err(CoreError::InvalidInput(
                "Event end must not precede its start".to_string(),
            ));
        }
        event.kind().map(|_| ())
    }
}

/// Truncates a timestamp to whole seconds so override lookups compare exactly.
#[inline]
pub fn normalize_timestamp(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

// ============================================================================
// Occurrence Identity
// ============================================================================

lazy_static! {
    static ref VIRTUAL_ID_PATTERN: Regex =
        Regex::new(r"^(\d+)_(\d{4}-\d{2}-\d{2})$").expect("virtual id pattern compiles");
    static ref PERSISTED_ID_PATTERN: Regex = Regex::new(r"^\d+$").expect("id pattern compiles");
}

/// Identity of a rule-generated occurrence: `{seriesId}_{YYYY-MM-DD}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualId {
    pub series_id: i64,
    pub date: NaiveDate,
}

impl VirtualId {
    pub fn new(series_id: i64, date: NaiveDate) -> Self {
        Self { series_id, date }
    }
}

impl fmt::Display for VirtualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.series_id, self.date.format("%Y-%m-%d"))
    }
}

impl FromStr for VirtualId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = VIRTUAL_ID_PATTERN
            .captures(s)
            .ok_or_else(|| CoreError::InvalidOccurrenceId(s.to_string()))?;
        let series_id = captures[1]
            .parse::<i64>()
            .map_err(|_| CoreError::InvalidOccurrenceId(s.to_string()))?;
        let date = NaiveDate::parse_from_str(&captures[2], "%Y-%m-%d")
            .map_err(|_| CoreError::InvalidOccurrenceId(s.to_string()))?;
        Ok(Self { series_id, date })
    }
}

/// Identity of anything the materializer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OccurrenceId {
    Persisted(i64),
    Virtual(VirtualId),
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OccurrenceId::Persisted(id) => write!(f, "{}", id),
            OccurrenceId::Virtual(virtual_id) => write!(f, "{}", virtual_id),
        }
    }
}

impl FromStr for OccurrenceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if PERSISTED_ID_PATTERN.is_match(s) {
            return s
                .parse::<i64>()
                .map(OccurrenceId::Persisted)
                .map_err(|_| CoreError::InvalidOccurrenceId(s.to_string()));
        }
        s.parse::<VirtualId>().map(OccurrenceId::Virtual)
    }
}

/// Stable key for per-occurrence subtask state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceKey {
    /// Any occurrence of a series, overridden or not
    Series { series_id: i64, date: NaiveDate },
    /// A standalone (or series master) row
    Event(i64),
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKey::Series { series_id, date } => {
                write!(f, "{}", VirtualId::new(*series_id, *date))
            }
            InstanceKey::Event(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for InstanceKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<OccurrenceId>()? {
            OccurrenceId::Persisted(id) => Ok(InstanceKey::Event(id)),
            OccurrenceId::Virtual(v) => Ok(InstanceKey::Series {
                series_id: v.series_id,
                date: v.date,
            }),
        }
    }
}

// ============================================================================
// Occurrences
// ============================================================================

/// A rule-generated occurrence that has no row of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualInstance {
    pub id: VirtualId,
    pub owner_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

impl VirtualInstance {
    /// Builds the occurrence of `master` on `date`, inheriting time of day and duration.
    pub fn from_master(master: &Event, date: NaiveDate) -> Self {
        let start_utc = date.and_time(master.start_utc.time()).and_utc();
        Self {
            id: VirtualId::new(master.id, date),
            owner_id: master.owner_id,
            title: master.title.clone(),
            description: master.description.clone(),
            color: master.color.clone(),
            start_utc,
            end_utc: start_utc + master.duration(),
        }
    }

    /// The canonical timestamp an override of this occurrence records.
    #[inline]
    pub fn original_start(&self) -> DateTime<Utc> {
        normalize_timestamp(self.start_utc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OccurrenceKind {
    SeriesMaster,
    Override,
    Virtual,
    Standalone,
}

impl fmt::Display for OccurrenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OccurrenceKind::SeriesMaster => write!(f, "series"),
            OccurrenceKind::Override => write!(f, "override"),
            OccurrenceKind::Virtual => write!(f, "virtual"),
            OccurrenceKind::Standalone => write!(f, "standalone"),
        }
    }
}

/// Every representation an occurrence can take, decided once and passed downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Occurrence {
    SeriesMaster(Event),
    Override(Event),
    Virtual(VirtualInstance),
    Standalone(Event),
}

impl Occurrence {
    /// Classifies a persisted row.
    pub fn classify(event: Event) -> Result<Self, CoreError> {
        Ok(match event.kind()? {
            EventKind::SeriesMaster => Occurrence::SeriesMaster(event),
            EventKind::Override => Occurrence::Override(event),
            EventKind::Standalone => Occurrence::Standalone(event),
        })
    }

    pub fn id(&self) -> OccurrenceId {
        match self {
            Occurrence::Virtual(v) => OccurrenceId::Virtual(v.id),
            Occurrence::SeriesMaster(e) | Occurrence::Override(e) | Occurrence::Standalone(e) => {
                OccurrenceId::Persisted(e.id)
            }
        }
    }

    pub fn kind(&self) -> OccurrenceKind {
        match self {
            Occurrence::SeriesMaster(_) => OccurrenceKind::SeriesMaster,
            Occurrence::Override(_) => OccurrenceKind::Override,
            Occurrence::Virtual(_) => OccurrenceKind::Virtual,
            Occurrence::Standalone(_) => OccurrenceKind::Standalone,
        }
    }

    /// The persisted row, if there is one.
    pub fn event(&self) -> Option<&Event> {
        match self {
            Occurrence::Virtual(_) => None,
            Occurrence::SeriesMaster(e) | Occurrence::Override(e) | Occurrence::Standalone(e) => {
                Some(e)
            }
        }
    }

    /// The series this occurrence belongs to. A master belongs to its own series.
    pub fn series_id(&self) -> Option<i64> {
        match self {
            Occurrence::SeriesMaster(e) => Some(e.id),
            Occurrence::Override(e) => e.series_id,
            Occurrence::Virtual(v) => Some(v.id.series_id),
            Occurrence::Standalone(_) => None,
        }
    }

    /// True for virtual instances and overrides, the occurrences that read series subtasks
    /// through the instance-state layer.
    pub fn is_series_instance(&self) -> bool {
        matches!(self, Occurrence::Override(_) | Occurrence::Virtual(_))
    }

    /// The rule-computed start this occurrence stands for, if it came from a series.
    pub fn original_start(&self) -> Option<DateTime<Utc>> {
        match self {
            Occurrence::Virtual(v) => Some(v.original_start()),
            Occurrence::Override(e) | Occurrence::Standalone(e) => e.original_start_utc,
            Occurrence::SeriesMaster(_) => None,
        }
    }

    pub fn instance_key(&self) -> InstanceKey {
        match self {
            Occurrence::Virtual(v) => InstanceKey::Series {
                series_id: v.id.series_id,
                date: v.id.date,
            },
            Occurrence::Override(e) => match (e.series_id, e.original_start_utc) {
                (Some(series_id), Some(original)) => InstanceKey::Series {
                    series_id,
                    date: original.date_naive(),
                },
                _ => InstanceKey::Event(e.id),
            },
            Occurrence::SeriesMaster(e) | Occurrence::Standalone(e) => InstanceKey::Event(e.id),
        }
    }

    pub fn owner_id(&self) -> i64 {
        match self {
            Occurrence::Virtual(v) => v.owner_id,
            Occurrence::SeriesMaster(e) | Occurrence::Override(e) | Occurrence::Standalone(e) => {
                e.owner_id
            }
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Occurrence::Virtual(v) => &v.title,
            Occurrence::SeriesMaster(e) | Occurrence::Override(e) | Occurrence::Standalone(e) => {
                &e.title
            }
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Occurrence::Virtual(v) => v.description.as_deref(),
            Occurrence::SeriesMaster(e) | Occurrence::Override(e) | Occurrence::Standalone(e) => {
                e.description.as_deref()
            }
        }
    }

    pub fn color(&self) -> Option<&str> {
        match self {
            Occurrence::Virtual(v) => v.color.as_deref(),
            Occurrence::SeriesMaster(e) | Occurrence::Override(e) | Occurrence::Standalone(e) => {
                e.color.as_deref()
            }
        }
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        match self {
            Occurrence::Virtual(v) => v.start_utc,
            Occurrence::SeriesMaster(e) | Occurrence::Override(e) | Occurrence::Standalone(e) => {
                e.start_utc
            }
        }
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        match self {
            Occurrence::Virtual(v) => v.end_utc,
            Occurrence::SeriesMaster(e) | Occurrence::Override(e) | Occurrence::Standalone(e) => {
                e.end_utc
            }
        }
    }

    /// Moves the occurrence in memory, used for optimistic cache updates.
    pub fn set_times(&mut self, start_utc: DateTime<Utc>, end_utc: DateTime<Utc>) {
        match self {
            Occurrence::Virtual(v) => {
                v.start_utc = start_utc;
                v.end_utc = end_utc;
            }
            Occurrence::SeriesMaster(e) | Occurrence::Override(e) | Occurrence::Standalone(e) => {
                e.start_utc = start_utc;
                e.end_utc = end_utc;
            }
        }
    }
}

/// One entry of a materialized range: the occurrence plus where it is drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct EventViewModel {
    pub occurrence: Occurrence,
    pub display_start: DateTime<Utc>,
    pub display_end: DateTime<Utc>,
    /// Whether the display interval was clipped to the visible-hour window
    pub clipped: bool,
}

impl EventViewModel {
    pub fn unclipped(occurrence: Occurrence) -> Self {
        Self {
            display_start: occurrence.start_utc(),
            display_end: occurrence.end_utc(),
            occurrence,
            clipped: false,
        }
    }

    #[inline]
    pub fn id(&self) -> OccurrenceId {
        self.occurrence.id()
    }
}

// ============================================================================
// Subtasks
// ============================================================================

/// A subtask definition owned by a series master or a standalone event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SubtaskMaster {
    pub id: i64,
    pub owner_event_id: i64,
    pub text: String,
    pub sort_order: i64,
    /// Authoritative only for standalone owners; series occurrences read instance state
    pub completed: bool,
}

/// Per-occurrence divergence from an inherited subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SubtaskInstanceState {
    pub subtask_master_id: i64,
    pub instance_key: String,
    pub completed: bool,
    pub hidden: bool,
}

/// A subtask that exists for exactly one occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CustomSubtask {
    pub id: i64,
    pub instance_key: String,
    pub text: String,
    pub sort_order: i64,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubtask {
    pub owner_event_id: i64,
    pub text: String,
    pub sort_order: i64,
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSubtask {
    pub text: Option<String>,
    pub sort_order: Option<i64>,
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomSubtask {
    pub instance_key: InstanceKey,
    pub text: String,
    pub sort_order: i64,
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskOrigin {
    Master,
    Custom,
}

impl fmt::Display for SubtaskOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubtaskOrigin::Master => write!(f, "master"),
            SubtaskOrigin::Custom => write!(f, "custom"),
        }
    }
}

/// Points at either a master or a custom subtask row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubtaskRef {
    pub origin: SubtaskOrigin,
    pub id: i64,
}

impl SubtaskRef {
    pub fn master(id: i64) -> Self {
        Self { origin: SubtaskOrigin::Master, id }
    }

    pub fn custom(id: i64) -> Self {
        Self { origin: SubtaskOrigin::Custom, id }
    }
}

/// A subtask as one occurrence sees it after inheritance is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveSubtask {
    pub id: i64,
    pub origin: SubtaskOrigin,
    pub text: String,
    pub completed: bool,
    pub sort_order: i64,
}

impl EffectiveSubtask {
    #[inline]
    pub fn reference(&self) -> SubtaskRef {
        SubtaskRef {
            origin: self.origin,
            id: self.id,
        }
    }
}

/// One line of an edited subtask list. `existing` is `None` for freshly added lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskDraft {
    pub existing: Option<SubtaskRef>,
    pub text: String,
    pub completed: bool,
}

impl SubtaskDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            existing: None,
            text: text.into(),
            completed: false,
        }
    }
}

impl From<&EffectiveSubtask> for SubtaskDraft {
    fn from(subtask: &EffectiveSubtask) -> Self {
        Self {
            existing: Some(subtask.reference()),
            text: subtask.text.clone(),
            completed: subtask.completed,
        }
    }
}

/// A retained subtask whose text or relative position changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskModification {
    pub original: EffectiveSubtask,
    pub text: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralChanges {
    /// New lines with their position in the edited list
    pub added: Vec<(i64, SubtaskDraft)>,
    pub removed: Vec<EffectiveSubtask>,
    pub modified: Vec<SubtaskModification>,
}

impl StructuralChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} added, {} removed, {} modified",
            self.added.len(),
            self.removed.len(),
            self.modified.len()
        )
    }
}

/// How far an edit to a recurring occurrence reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditScope {
    /// Affect only the selected occurrence
    ThisOccurrence,
    /// Modify the series definition, visible on every occurrence
    EntireSeries,
}

impl fmt::Display for EditScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditScope::ThisOccurrence => write!(f, "occurrence"),
            EditScope::EntireSeries => write!(f, "series"),
        }
    }
}

impl FromStr for EditScope {
    type Err = ParseEditScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "occurrence" | "this" | "day" => Ok(EditScope::ThisOccurrence),
            "series" | "entire" | "all" => Ok(EditScope::EntireSeries),
            _ => Err(ParseEditScopeError(s.to_string())),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid edit scope: {0}")]
pub struct ParseEditScopeError(String);
