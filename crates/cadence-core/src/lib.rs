//! # Cadence Core Library
//!
//! Occurrence engine for recurring calendar events: expands recurrence rules
//! into dated occurrences, reconciles user edits on single occurrences into
//! persisted overrides, and lets every occurrence inherit the subtask
//! checklist of its series while tracking completion per occurrence.
//!
//! ## Features
//!
//! - **Rule Expansion**: DAILY / WEEKLY / MONTHLY rules with intervals,
//!   weekday and month-day selectors and inclusive end dates
//! - **Virtual Occurrences**: Series dates are computed, not stored, and are
//!   addressed as `{seriesId}_{YYYY-MM-DD}`
//! - **Overrides**: Moving, editing or deleting one date persists an override
//!   that shadows the computed occurrence
//! - **Subtask Inheritance**: Per-occurrence completion and hidden flags on
//!   top of series-level subtasks, plus occurrence-only custom subtasks
//! - **Optimistic Sessions**: Cached views with snapshot rollback and
//!   single-flight commits per occurrence
//!
//! ## Core Modules
//!
//! - [`db`]: Database connection and migration management
//! - [`models`]: Event rows, occurrence identity and subtask types
//! - [`recurrence`]: Rule expansion
//! - [`materialize`]: Merging expanded dates with persisted rows
//! - [`reconcile`]: Occurrence state transitions and commit guards
//! - [`subtasks`]: Subtask inheritance and migration
//! - [`session`]: Cached, optimistic view of a date range
//! - [`save_queue`]: Coalescing single-flight save queue
//! - [`repository`]: Data access layer with Repository pattern
//! - [`error`]: Error types
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cadence_core::{
//!     db,
//!     materialize::MaterializerConfig,
//!     models::{NewEvent, RecurrenceRule, Weekday},
//!     repository::{EventRepository, SqliteRepository},
//!     session::CalendarSession,
//! };
//! use chrono::{NaiveDate, TimeZone, Utc};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cadence_core::error::CoreError> {
//!     let pool = db::establish_connection("cadence.db").await?;
//!     let repo = SqliteRepository::new(pool);
//!
//!     let start = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
//!     repo.create_event(NewEvent {
//!         owner_id: 1,
//!         title: "Standup".to_string(),
//!         start_utc: start,
//!         end_utc: start + chrono::Duration::minutes(15),
//!         recurrence: Some(RecurrenceRule::weekly(1, [Weekday::Monday, Weekday::Wednesday])),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//!     let mut session = CalendarSession::new(repo, 1, MaterializerConfig::default());
//!     let january = session
//!         .load_range(
//!             NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
//!             NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
//!         )
//!         .await?;
//!     for view in january {
//!         println!("{} {}", view.id(), view.occurrence.title());
//!     }
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod materialize;
pub mod models;
pub mod recurrence;
pub mod reconcile;
pub mod repository;
pub mod save_queue;
pub mod session;
pub mod subtasks;
