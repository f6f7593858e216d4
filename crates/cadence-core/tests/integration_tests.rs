use async_trait::async_trait;
use cadence_core::db::establish_connection;
use cadence_core::error::CoreError;
use cadence_core::materialize::MaterializerConfig;
use cadence_core::models::*;
use cadence_core::reconcile::{CommitLocks, CommitOutcome, OverrideReconciler};
use cadence_core::repository::{EventRepository, SqliteRepository, SubtaskRepository};
use cadence_core::session::CalendarSession;
use cadence_core::subtasks::{SubtaskMigrator, SubtaskResolver};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

const OWNER: i64 = 1;

/// Helper function to create a test database
async fn setup_test_db() -> (SqliteRepository, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = establish_connection(&db_path.to_string_lossy())
        .await
        .expect("Failed to establish test database connection");

    (SqliteRepository::new(pool), temp_dir)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

fn vid(series_id: i64, d: NaiveDate) -> OccurrenceId {
    OccurrenceId::Virtual(VirtualId::new(series_id, d))
}

/// Weekly MO/WE series starting Monday 2025-01-06 09:00, one hour long.
async fn create_weekly_series<R: EventRepository + ?Sized>(repo: &R) -> Event {
    repo.create_event(NewEvent {
        owner_id: OWNER,
        title: "Standup".to_string(),
        start_utc: at(2025, 1, 6, 9, 0),
        end_utc: at(2025, 1, 6, 10, 0),
        color: Some("#3366ff".to_string()),
        recurrence: Some(RecurrenceRule::weekly(1, [Weekday::Monday, Weekday::Wednesday])),
        ..Default::default()
    })
    .await
    .expect("Failed to create series")
}

async fn create_subtasks<R: SubtaskRepository + ?Sized>(repo: &R, owner: i64, texts: &[&str]) -> Vec<SubtaskMaster> {
    let mut created = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        created.push(
            repo.create_subtask(NewSubtask {
                owner_event_id: owner,
                text: text.to_string(),
                sort_order: i as i64,
                completed: false,
            })
            .await
            .expect("Failed to create subtask"),
        );
    }
    created
}

fn january() -> (NaiveDate, NaiveDate) {
    (date(2025, 1, 1), date(2025, 1, 31))
}

fn completed_count(subtasks: &[EffectiveSubtask]) -> usize {
    subtasks.iter().filter(|s| s.completed).count()
}

/// Repository wrapper that records deletes and can be told to fail.
struct CountingRepository {
    inner: SqliteRepository,
    deletes: Mutex<Vec<i64>>,
    failing_deletes: HashSet<i64>,
    fail_writes: AtomicBool,
}

impl CountingRepository {
    fn new(inner: SqliteRepository) -> Self {
        Self {
            inner,
            deletes: Mutex::new(Vec::new()),
            failing_deletes: HashSet::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn deleted(&self) -> Vec<i64> {
        self.deletes.lock().unwrap().clone()
    }

    fn check_writes(&self) -> Result<(), CoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl EventRepository for CountingRepository {
    async fn create_event(&self, data: NewEvent) -> Result<Event, CoreError> {
        self.check_writes()?;
        self.inner.create_event(data).await
    }

    async fn find_event_by_id(&self, id: i64) -> Result<Option<Event>, CoreError> {
        self.inner.find_event_by_id(id).await
    }

    async fn update_event(&self, id: i64, data: UpdateEvent) -> Result<Event, CoreError> {
        self.check_writes()?;
        self.inner.update_event(id, data).await
    }

    async fn delete_event(&self, id: i64) -> Result<(), CoreError> {
        self.deletes.lock().unwrap().push(id);
        if self.failing_deletes.contains(&id) {
            return Err(CoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.delete_event(id).await
    }

    async fn list_by_owner_and_range(
        &self,
        owner_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, CoreError> {
        self.inner.list_by_owner_and_range(owner_id, start, end).await
    }

    async fn list_series_overrides(&self, series_id: i64) -> Result<Vec<Event>, CoreError> {
        self.inner.list_series_overrides(series_id).await
    }

    async fn find_override(
        &self,
        series_id: i64,
        original_start: DateTime<Utc>,
    ) -> Result<Option<Event>, CoreError> {
        self.inner.find_override(series_id, original_start).await
    }
}

#[async_trait]
impl SubtaskRepository for CountingRepository {
    async fn create_subtask(&self, data: NewSubtask) -> Result<SubtaskMaster, CoreError> {
        self.inner.create_subtask(data).await
    }

    async fn update_subtask(&self, id: i64, data: UpdateSubtask) -> Result<SubtaskMaster, CoreError> {
        self.inner.update_subtask(id, data).await
    }

    async fn delete_subtask(&self, id: i64) -> Result<(), CoreError> {
        self.inner.delete_subtask(id).await
    }

    async fn list_subtasks(&self, owner_event_id: i64) -> Result<Vec<SubtaskMaster>, CoreError> {
        self.inner.list_subtasks(owner_event_id).await
    }

    async fn toggle_completion_for_instance(
        &self,
        subtask_id: i64,
        key: &InstanceKey,
        completed: bool,
    ) -> Result<SubtaskInstanceState, CoreError> {
        self.check_writes()?;
        self.inner.toggle_completion_for_instance(subtask_id, key, completed).await
    }

    async fn hide_for_instance(&self, subtask_id: i64, key: &InstanceKey) -> Result<SubtaskInstanceState, CoreError> {
        self.inner.hide_for_instance(subtask_id, key).await
    }

    async fn list_instance_states(&self, key: &InstanceKey) -> Result<Vec<SubtaskInstanceState>, CoreError> {
        self.inner.list_instance_states(key).await
    }

    async fn create_custom_subtask(&self, data: NewCustomSubtask) -> Result<CustomSubtask, CoreError> {
        self.inner.create_custom_subtask(data).await
    }

    async fn update_custom_subtask(&self, id: i64, data: UpdateSubtask) -> Result<CustomSubtask, CoreError> {
        self.inner.update_custom_subtask(id, data).await
    }

    async fn delete_custom_subtask(&self, id: i64) -> Result<(), CoreError> {
        self.inner.delete_custom_subtask(id).await
    }

    async fn list_custom_subtasks(&self, key: &InstanceKey) -> Result<Vec<CustomSubtask>, CoreError> {
        self.inner.list_custom_subtasks(key).await
    }
}

// ============================================================================
// Materialization
// ============================================================================

#[tokio::test]
async fn test_weekly_series_materializes_virtual_occurrences() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;

    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    let views = session.load_range(start, end).await.unwrap();

    let days: Vec<u32> = views.iter().map(|v| v.occurrence.start_utc().day()).collect();
    assert_eq!(days, vec![6, 8, 13, 15, 20, 22, 27, 29]);
    assert_eq!(views[2].id(), vid(master.id, date(2025, 1, 13)));
    assert_eq!(views[2].id().to_string(), format!("{}_2025-01-13", master.id));
    assert!(views.iter().all(|v| v.occurrence.title() == "Standup"));
}

#[tokio::test]
async fn test_monthly_31st_skips_short_months() {
    let (repo, _temp_dir) = setup_test_db().await;
    repo.create_event(NewEvent {
        owner_id: OWNER,
        title: "Rent".to_string(),
        start_utc: at(2025, 1, 31, 8, 0),
        end_utc: at(2025, 1, 31, 8, 30),
        recurrence: Some(RecurrenceRule::monthly(1, [31])),
        ..Default::default()
    })
    .await
    .unwrap();

    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let views = session.load_range(date(2025, 1, 1), date(2025, 3, 31)).await.unwrap();
    let dates: Vec<NaiveDate> = views.iter().map(|v| v.occurrence.start_utc().date_naive()).collect();
    assert_eq!(dates, vec![date(2025, 1, 31), date(2025, 3, 31)]);
}

#[tokio::test]
async fn test_materialization_is_repeatable() {
    let (repo, _temp_dir) = setup_test_db().await;
    create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();

    let first = session.load_range(start, end).await.unwrap().to_vec();
    let second = session.load_range(start, end).await.unwrap().to_vec();
    assert_eq!(first, second);
}

// ============================================================================
// Overrides
// ============================================================================

#[tokio::test]
async fn test_moving_virtual_occurrence_creates_override() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let outcome = session
        .move_occurrence(&vid(master.id, date(2025, 1, 13)), at(2025, 1, 14, 10, 0), at(2025, 1, 14, 11, 0))
        .await
        .unwrap();
    let moved = outcome.applied().expect("commit applied");
    assert_eq!(moved.kind(), OccurrenceKind::Override);

    let views = session.load_range(start, end).await.unwrap();
    assert!(!views
        .iter()
        .any(|v| v.occurrence.start_utc().date_naive() == date(2025, 1, 13)));
    let override_view = views
        .iter()
        .find(|v| v.occurrence.start_utc() == at(2025, 1, 14, 10, 0))
        .expect("override in range");
    assert_eq!(override_view.occurrence.series_id(), Some(master.id));
    assert_eq!(views.len(), 8);

    let overrides = session.repository().list_series_overrides(master.id).await.unwrap();
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].original_start_utc, Some(at(2025, 1, 13, 9, 0)));
    assert_eq!(overrides[0].title, "Standup");
    assert_eq!(overrides[0].color.as_deref(), Some("#3366ff"));
}

#[tokio::test]
async fn test_moving_override_updates_it_in_place() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let locks = CommitLocks::new();
    let reconciler = OverrideReconciler::new(&repo, &locks);

    let virtual_occurrence = Occurrence::Virtual(VirtualInstance::from_master(&master, date(2025, 1, 13)));
    let first = reconciler
        .reschedule(&virtual_occurrence, at(2025, 1, 14, 10, 0), at(2025, 1, 14, 11, 0))
        .await
        .unwrap()
        .applied()
        .unwrap();
    let second = reconciler
        .reschedule(&first, at(2025, 1, 14, 12, 0), at(2025, 1, 14, 13, 0))
        .await
        .unwrap()
        .applied()
        .unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(repo.list_series_overrides(master.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_moving_series_master_keeps_overrides_shadowing() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    session.delete_this_day(&vid(master.id, date(2025, 1, 13))).await.unwrap();
    let moved = session
        .move_occurrence(&vid(master.id, date(2025, 1, 15)), at(2025, 1, 16, 9, 0), at(2025, 1, 16, 10, 0))
        .await
        .unwrap()
        .applied()
        .unwrap();

    let locks = CommitLocks::new();
    OverrideReconciler::new(session.repository(), &locks)
        .reschedule(&Occurrence::SeriesMaster(master.clone()), at(2025, 1, 6, 10, 0), at(2025, 1, 6, 11, 0))
        .await
        .unwrap();

    let views = session.load_range(start, end).await.unwrap();
    let ids: Vec<String> = views.iter().map(|v| v.id().to_string()).collect();
    assert!(!ids.contains(&vid(master.id, date(2025, 1, 13)).to_string()), "deleted day came back: {:?}", ids);
    assert!(!ids.contains(&vid(master.id, date(2025, 1, 15)).to_string()), "moved day shown twice: {:?}", ids);
    assert!(ids.contains(&moved.id().to_string()));
    assert_eq!(views.len(), 7);

    let monday = views
        .iter()
        .find(|v| v.id() == vid(master.id, date(2025, 1, 20)))
        .expect("series still expands");
    assert_eq!(monday.occurrence.start_utc(), at(2025, 1, 20, 10, 0));

    let overrides = session.repository().list_series_overrides(master.id).await.unwrap();
    let originals: Vec<_> = overrides.iter().filter_map(|o| o.original_start_utc).collect();
    assert_eq!(originals, vec![at(2025, 1, 13, 10, 0), at(2025, 1, 15, 10, 0)]);

    // The deleted day can still be restored after the move.
    assert_eq!(session.restore_day(master.id, date(2025, 1, 13)).await.unwrap(), CommitOutcome::Applied(true));
    assert!(session.find(&vid(master.id, date(2025, 1, 13))).is_some());
}

#[tokio::test]
async fn test_override_on_non_occurrence_date_is_rejected() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let locks = CommitLocks::new();

    // Tuesday is not part of a MO/WE series.
    let bogus = Occurrence::Virtual(VirtualInstance::from_master(&master, date(2025, 1, 14)));
    let result = OverrideReconciler::new(&repo, &locks)
        .reschedule(&bogus, at(2025, 1, 14, 12, 0), at(2025, 1, 14, 13, 0))
        .await;
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    assert!(!locks.is_locked(&bogus.id()));
}

#[tokio::test]
async fn test_concurrent_commit_for_same_occurrence_is_skipped() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let locks = CommitLocks::new();
    let reconciler = OverrideReconciler::new(&repo, &locks);
    let occurrence = Occurrence::Virtual(VirtualInstance::from_master(&master, date(2025, 1, 13)));

    let (first, second) = tokio::join!(
        reconciler.reschedule(&occurrence, at(2025, 1, 14, 10, 0), at(2025, 1, 14, 11, 0)),
        reconciler.reschedule(&occurrence, at(2025, 1, 15, 10, 0), at(2025, 1, 15, 11, 0)),
    );

    assert!(first.unwrap().is_applied());
    assert_eq!(second.unwrap(), CommitOutcome::Skipped);
    assert!(!locks.is_locked(&occurrence.id()));
    assert_eq!(repo.list_series_overrides(master.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_updating_vanished_override_recreates_it() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let locks = CommitLocks::new();
    let reconciler = OverrideReconciler::new(&repo, &locks);

    let virtual_occurrence = Occurrence::Virtual(VirtualInstance::from_master(&master, date(2025, 1, 20)));
    let stale = reconciler
        .reschedule(&virtual_occurrence, at(2025, 1, 20, 14, 0), at(2025, 1, 20, 15, 0))
        .await
        .unwrap()
        .applied()
        .unwrap();
    let stale_id = stale.event().unwrap().id;
    repo.delete_event(stale_id).await.unwrap();

    let patch = UpdateEvent {
        title: Some("Standup (remote)".to_string()),
        ..Default::default()
    };
    let recreated = reconciler
        .update_fields(&stale, patch)
        .await
        .unwrap()
        .applied()
        .unwrap();

    let row = recreated.event().unwrap();
    assert_ne!(row.id, stale_id);
    assert_eq!(row.title, "Standup (remote)");
    assert_eq!(row.series_id, Some(master.id));
    assert_eq!(row.original_start_utc, Some(at(2025, 1, 20, 9, 0)));
}

#[tokio::test]
async fn test_update_fields_rejects_structural_patch() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let locks = CommitLocks::new();
    let occurrence = Occurrence::SeriesMaster(master);

    let result = OverrideReconciler::new(&repo, &locks)
        .update_fields(&occurrence, UpdateEvent::cancel())
        .await;
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn test_delete_this_day_then_restore() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let target = vid(master.id, date(2025, 1, 15));
    assert!(session.delete_this_day(&target).await.unwrap().is_applied());
    assert!(session.find(&target).is_none());
    assert_eq!(session.occurrences().len(), 7);

    let tombstones = session.repository().list_series_overrides(master.id).await.unwrap();
    assert_eq!(tombstones.len(), 1);
    assert!(tombstones[0].is_cancelled);

    let restored = session.restore_day(master.id, date(2025, 1, 15)).await.unwrap();
    assert_eq!(restored, CommitOutcome::Applied(true));
    assert!(session.find(&target).is_some());
    assert_eq!(session.occurrences().len(), 8);
}

#[tokio::test]
async fn test_delete_this_day_on_override_and_standalone() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let standalone = repo
        .create_event(NewEvent {
            owner_id: OWNER,
            title: "Dentist".to_string(),
            start_utc: at(2025, 1, 9, 15, 0),
            end_utc: at(2025, 1, 9, 16, 0),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let moved = session
        .move_occurrence(&vid(master.id, date(2025, 1, 20)), at(2025, 1, 21, 9, 0), at(2025, 1, 21, 10, 0))
        .await
        .unwrap()
        .applied()
        .unwrap();
    session.delete_this_day(&moved.id()).await.unwrap();
    session.delete_this_day(&OccurrenceId::Persisted(standalone.id)).await.unwrap();

    assert_eq!(session.occurrences().len(), 7);
    assert!(session.repository().find_event_by_id(standalone.id).await.unwrap().is_none());
    let overrides = session.repository().list_series_overrides(master.id).await.unwrap();
    assert!(overrides[0].is_cancelled);
}

#[tokio::test]
async fn test_delete_this_day_rejects_series_master() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let locks = CommitLocks::new();

    let result = OverrideReconciler::new(&repo, &locks)
        .delete_this_day(&Occurrence::SeriesMaster(master))
        .await;
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
}

#[tokio::test]
async fn test_delete_whole_series_issues_one_delete_per_row() {
    let (inner, _temp_dir) = setup_test_db().await;
    let repo = CountingRepository::new(inner);
    let master = create_weekly_series(&repo).await;
    let locks = CommitLocks::new();
    let reconciler = OverrideReconciler::new(&repo, &locks);

    let mut override_ids = Vec::new();
    for day in [13, 15] {
        let occurrence = Occurrence::Virtual(VirtualInstance::from_master(&master, date(2025, 1, day)));
        let moved = reconciler
            .reschedule(&occurrence, at(2025, 1, day, 11, 0), at(2025, 1, day, 12, 0))
            .await
            .unwrap()
            .applied()
            .unwrap();
        override_ids.push(moved.event().unwrap().id);
    }

    let any_occurrence = Occurrence::Virtual(VirtualInstance::from_master(&master, date(2025, 1, 20)));
    let outcome = reconciler.delete_whole_series(&any_occurrence).await.unwrap();
    assert_eq!(outcome, CommitOutcome::Applied(3));

    let deleted = repo.deleted();
    assert_eq!(deleted.len(), 3);
    assert_eq!(deleted[..2], override_ids[..]);
    assert_eq!(deleted[2], master.id);
    assert!(repo.find_event_by_id(master.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_whole_series_collects_failures() {
    let (inner, _temp_dir) = setup_test_db().await;
    let mut repo = CountingRepository::new(inner);
    let master = create_weekly_series(&repo).await;
    let locks = CommitLocks::new();

    let occurrence = Occurrence::Virtual(VirtualInstance::from_master(&master, date(2025, 1, 13)));
    let moved = OverrideReconciler::new(&repo, &locks)
        .reschedule(&occurrence, at(2025, 1, 13, 11, 0), at(2025, 1, 13, 12, 0))
        .await
        .unwrap()
        .applied()
        .unwrap();
    let override_id = moved.event().unwrap().id;
    repo.failing_deletes.insert(override_id);

    let result = OverrideReconciler::new(&repo, &locks)
        .delete_whole_series(&Occurrence::SeriesMaster(master.clone()))
        .await;
    match result {
        Err(CoreError::PartialDelete { deleted, failed }) => {
            assert_eq!(deleted, vec![master.id]);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, override_id);
        }
        other => panic!("expected PartialDelete, got {:?}", other),
    }
}

// ============================================================================
// Recurrence edits
// ============================================================================

#[tokio::test]
async fn test_edit_recurrence_on_override_spawns_independent_series() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let moved = session
        .move_occurrence(&vid(master.id, date(2025, 1, 13)), at(2025, 1, 14, 10, 0), at(2025, 1, 14, 11, 0))
        .await
        .unwrap()
        .applied()
        .unwrap();

    let rule = RecurrenceRule::daily(1).until(date(2025, 1, 16));
    let spawned = session
        .edit_recurrence(&moved.id(), Some(rule))
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(spawned.kind(), OccurrenceKind::SeriesMaster);
    let new_series = spawned.series_id().unwrap();
    assert_ne!(new_series, master.id);

    let views = session.occurrences();
    let old_series_days: Vec<u32> = views
        .iter()
        .filter(|v| v.occurrence.series_id() == Some(master.id))
        .map(|v| v.occurrence.start_utc().day())
        .collect();
    assert_eq!(old_series_days, vec![6, 8, 15, 20, 22, 27, 29]);

    let new_series_days: Vec<u32> = views
        .iter()
        .filter(|v| v.occurrence.series_id() == Some(new_series))
        .map(|v| v.occurrence.start_utc().day())
        .collect();
    assert_eq!(new_series_days, vec![14, 15, 16]);

    let master_row = session.repository().find_event_by_id(master.id).await.unwrap().unwrap();
    assert_eq!(master_row.rule().unwrap(), master.rule().unwrap());
}

#[tokio::test]
async fn test_edit_recurrence_promotes_plain_standalone() {
    let (repo, _temp_dir) = setup_test_db().await;
    let event = repo
        .create_event(NewEvent {
            owner_id: OWNER,
            title: "Gym".to_string(),
            start_utc: at(2025, 1, 7, 18, 0),
            end_utc: at(2025, 1, 7, 19, 0),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    session.load_range(date(2025, 1, 1), date(2025, 1, 14)).await.unwrap();

    let promoted = session
        .edit_recurrence(&OccurrenceId::Persisted(event.id), Some(RecurrenceRule::weekly(1, [])))
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(promoted.kind(), OccurrenceKind::SeriesMaster);
    assert_eq!(promoted.series_id(), Some(event.id));

    let ids: Vec<String> = session.occurrences().iter().map(|v| v.id().to_string()).collect();
    assert_eq!(ids, vec![format!("{}_2025-01-07", event.id), format!("{}_2025-01-14", event.id)]);
}

#[tokio::test]
async fn test_edit_recurrence_on_virtual_leaves_siblings_untouched() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let spawned = session
        .edit_recurrence(&vid(master.id, date(2025, 1, 8)), Some(RecurrenceRule::daily(1).until(date(2025, 1, 10))))
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(spawned.kind(), OccurrenceKind::SeriesMaster);
    let new_series = spawned.series_id().unwrap();
    assert_ne!(new_series, master.id);

    let days_of = |series: i64| -> Vec<u32> {
        session
            .occurrences()
            .iter()
            .filter(|v| v.occurrence.series_id() == Some(series))
            .map(|v| v.occurrence.start_utc().day())
            .collect()
    };
    assert_eq!(days_of(master.id), vec![6, 13, 15, 20, 22, 27, 29]);
    assert_eq!(days_of(new_series), vec![8, 9, 10]);

    let master_row = session.repository().find_event_by_id(master.id).await.unwrap().unwrap();
    assert_eq!(master_row.rule().unwrap(), master.rule().unwrap());

    let cleared = session.edit_recurrence(&vid(master.id, date(2025, 1, 13)), None).await;
    assert!(matches!(cleared, Err(CoreError::InvalidInput(_))));
}

#[tokio::test]
async fn test_edit_series_recurrence_changes_every_occurrence() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let edited = session
        .edit_series_recurrence(master.id, Some(RecurrenceRule::weekly(1, [Weekday::Monday])))
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(edited.id(), OccurrenceId::Persisted(master.id));

    let days: Vec<u32> = session.occurrences().iter().map(|v| v.occurrence.start_utc().day()).collect();
    assert_eq!(days, vec![6, 13, 20, 27]);

    let missing = session.edit_series_recurrence(9999, None).await;
    assert!(matches!(missing, Err(CoreError::NotFound(_))));
}

#[tokio::test]
async fn test_invalid_rule_is_rejected_before_writing() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let result = session
        .edit_recurrence(&vid(master.id, date(2025, 1, 8)), Some(RecurrenceRule::monthly(1, [0])))
        .await;
    assert!(matches!(result, Err(CoreError::InvalidRule(_))));
    assert_eq!(session.occurrences().len(), 8);
}

// ============================================================================
// Subtasks
// ============================================================================

#[tokio::test]
async fn test_completion_is_tracked_per_occurrence() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let subtasks = create_subtasks(&repo, master.id, &["Agenda", "Notes"]).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let monday = vid(master.id, date(2025, 1, 13));
    let wednesday = vid(master.id, date(2025, 1, 15));
    session
        .toggle_subtask(&monday, SubtaskRef::master(subtasks[0].id), true)
        .await
        .unwrap();

    let monday_list = session.subtasks(&monday).await.unwrap();
    assert_eq!(monday_list.len(), 2);
    assert!(monday_list[0].completed);
    assert!(!monday_list[1].completed);
    assert_eq!(completed_count(&session.subtasks(&wednesday).await.unwrap()), 0);

    let definition = session.repository().list_subtasks(master.id).await.unwrap();
    assert!(definition.iter().all(|s| !s.completed));
}

#[tokio::test]
async fn test_move_keeps_subtask_completion() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let subtasks = create_subtasks(&repo, master.id, &["Agenda", "Notes"]).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let monday = vid(master.id, date(2025, 1, 13));
    session
        .toggle_subtask(&monday, SubtaskRef::master(subtasks[1].id), true)
        .await
        .unwrap();
    let before = session.subtasks(&monday).await.unwrap();

    let moved = session
        .move_occurrence(&monday, at(2025, 1, 14, 10, 0), at(2025, 1, 14, 11, 0))
        .await
        .unwrap()
        .applied()
        .unwrap();
    let after = session.subtasks(&moved.id()).await.unwrap();

    assert_eq!(completed_count(&after), completed_count(&before));
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_liberate_detaches_occurrence_with_its_subtasks() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let subtasks = create_subtasks(&repo, master.id, &["Agenda", "Notes"]).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let target = vid(master.id, date(2025, 1, 22));
    session
        .toggle_subtask(&target, SubtaskRef::master(subtasks[0].id), true)
        .await
        .unwrap();

    let liberated = session.liberate(&target).await.unwrap().applied().unwrap();
    assert_eq!(liberated.kind(), OccurrenceKind::Standalone);
    assert_eq!(liberated.original_start(), Some(at(2025, 1, 22, 9, 0)));
    assert!(session.find(&target).is_none());
    assert!(session.find(&liberated.id()).is_some());

    let carried = session.subtasks(&liberated.id()).await.unwrap();
    assert_eq!(carried.len(), 2);
    assert_eq!(completed_count(&carried), 1);
    assert!(carried.iter().all(|s| s.origin == SubtaskOrigin::Master));

    // The series definition is untouched.
    assert_eq!(session.repository().list_subtasks(master.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_structural_edit_on_series_occurrence_requires_scope() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    create_subtasks(&repo, master.id, &["Agenda"]).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let monday = vid(master.id, date(2025, 1, 13));
    let wednesday = vid(master.id, date(2025, 1, 15));
    let original = session.subtasks(&monday).await.unwrap();
    let mut edited: Vec<SubtaskDraft> = original.iter().map(SubtaskDraft::from).collect();
    edited.push(SubtaskDraft::new("Bring snacks"));

    let result = session.edit_subtasks(&monday, &edited, None).await;
    assert!(matches!(result, Err(CoreError::ScopeRequired(_))));
    assert_eq!(session.subtasks(&monday).await.unwrap().len(), 1);

    session
        .edit_subtasks(&monday, &edited, Some(EditScope::ThisOccurrence))
        .await
        .unwrap();
    let monday_list = session.subtasks(&monday).await.unwrap();
    assert_eq!(monday_list.len(), 2);
    assert_eq!(monday_list[1].origin, SubtaskOrigin::Custom);
    assert_eq!(session.subtasks(&wednesday).await.unwrap().len(), 1);

    let wednesday_original = session.subtasks(&wednesday).await.unwrap();
    let mut series_edit: Vec<SubtaskDraft> = wednesday_original.iter().map(SubtaskDraft::from).collect();
    series_edit.push(SubtaskDraft::new("Update board"));
    session
        .edit_subtasks(&wednesday, &series_edit, Some(EditScope::EntireSeries))
        .await
        .unwrap();

    let next_monday = vid(master.id, date(2025, 1, 20));
    let texts: Vec<String> = session
        .subtasks(&next_monday)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.text)
        .collect();
    assert_eq!(texts, vec!["Agenda".to_string(), "Update board".to_string()]);
}

#[tokio::test]
async fn test_this_day_removal_hides_inherited_subtask() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    create_subtasks(&repo, master.id, &["Agenda", "Notes"]).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let monday = vid(master.id, date(2025, 1, 13));
    let original = session.subtasks(&monday).await.unwrap();
    let mut edited: Vec<SubtaskDraft> = original.iter().map(SubtaskDraft::from).collect();
    edited.remove(0);
    edited[0].text = "Minutes".to_string();

    let changes = session
        .edit_subtasks(&monday, &edited, Some(EditScope::ThisOccurrence))
        .await
        .unwrap();
    assert_eq!(changes.removed.len(), 1);
    assert_eq!(changes.modified.len(), 1);

    let texts: Vec<String> = session.subtasks(&monday).await.unwrap().into_iter().map(|s| s.text).collect();
    assert_eq!(texts, vec!["Minutes".to_string()]);
    let series_texts: Vec<String> = session
        .repository()
        .list_subtasks(master.id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.text)
        .collect();
    assert_eq!(series_texts, vec!["Agenda".to_string(), "Notes".to_string()]);
}

#[tokio::test]
async fn test_migrate_is_idempotent_for_same_key() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let subtasks = create_subtasks(&repo, master.id, &["Agenda"]).await;
    let virtual_occurrence = Occurrence::Virtual(VirtualInstance::from_master(&master, date(2025, 1, 27)));

    SubtaskResolver::new(&repo)
        .toggle(&virtual_occurrence, SubtaskRef::master(subtasks[0].id), true)
        .await
        .unwrap();

    let migrator = SubtaskMigrator::new(&repo);
    migrator.migrate(&virtual_occurrence, &virtual_occurrence).await.unwrap();
    let summary = migrator.migrate(&virtual_occurrence, &virtual_occurrence).await.unwrap();
    assert_eq!(summary.masters_created, 0);
    assert_eq!(summary.customs_created, 0);

    let states = repo.list_instance_states(&virtual_occurrence.instance_key()).await.unwrap();
    assert_eq!(states.len(), 1);
    assert!(states[0].completed);
}

// ============================================================================
// Session behavior
// ============================================================================

#[tokio::test]
async fn test_failed_commit_restores_snapshot() {
    let (inner, _temp_dir) = setup_test_db().await;
    let repo = CountingRepository::new(inner);
    let master = create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();
    let before = session.occurrences().to_vec();

    session.repository().fail_writes.store(true, Ordering::SeqCst);
    let result = session
        .move_occurrence(&vid(master.id, date(2025, 1, 13)), at(2025, 1, 14, 10, 0), at(2025, 1, 14, 11, 0))
        .await;

    match result {
        Err(e @ CoreError::CommitFailed(_)) => assert!(e.is_retryable()),
        other => panic!("expected CommitFailed, got {:?}", other),
    }
    assert_eq!(session.occurrences(), &before[..]);
}

#[tokio::test]
async fn test_staged_edits_flush_as_one_commit() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let target = vid(master.id, date(2025, 1, 27));
    session.stage_edit(
        target,
        UpdateEvent {
            title: Some("Standup (short)".to_string()),
            ..Default::default()
        },
    );
    session.stage_edit(
        target,
        UpdateEvent {
            description: Some(Some("Ten minutes max".to_string())),
            ..Default::default()
        },
    );
    assert!(session.has_staged_edits(&target));

    let updated = session.flush_edits(&target).await.unwrap().applied().unwrap();
    assert_eq!(updated.title(), "Standup (short)");
    assert_eq!(updated.description(), Some("Ten minutes max"));
    assert!(!session.has_staged_edits(&target));
    assert_eq!(session.repository().list_series_overrides(master.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_skipped_flush_keeps_staged_edits() {
    let (repo, _temp_dir) = setup_test_db().await;
    let master = create_weekly_series(&repo).await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let target = vid(master.id, date(2025, 1, 20));
    session.stage_edit(
        target,
        UpdateEvent {
            title: Some("Retro".to_string()),
            ..Default::default()
        },
    );

    let locks = session.locks().clone();
    let guard = locks.try_acquire(target).expect("lock free");
    assert_eq!(session.flush_edits(&target).await.unwrap(), CommitOutcome::Skipped);
    assert!(session.has_staged_edits(&target));
    drop(guard);

    session.stage_edit(
        target,
        UpdateEvent {
            color: Some(Some("#ff9900".to_string())),
            ..Default::default()
        },
    );
    let updated = session.flush_edits(&target).await.unwrap().applied().unwrap();
    assert_eq!(updated.title(), "Retro");
    assert_eq!(updated.color(), Some("#ff9900"));
    assert!(!session.has_staged_edits(&target));
}

#[tokio::test]
async fn test_unknown_occurrence_is_not_found() {
    let (repo, _temp_dir) = setup_test_db().await;
    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let (start, end) = january();
    session.load_range(start, end).await.unwrap();

    let id: OccurrenceId = "99_2025-01-13".parse().unwrap();
    let result = session.delete_this_day(&id).await;
    assert!(matches!(result, Err(CoreError::NotFound(_))));
    assert!(matches!("99-2025-01-13".parse::<OccurrenceId>(), Err(CoreError::InvalidOccurrenceId(_))));
}

#[tokio::test]
async fn test_visible_hours_clip_occurrences() {
    let (repo, _temp_dir) = setup_test_db().await;
    repo.create_event(NewEvent {
        owner_id: OWNER,
        title: "Early run".to_string(),
        start_utc: at(2025, 1, 10, 6, 45),
        end_utc: at(2025, 1, 10, 8, 15),
        ..Default::default()
    })
    .await
    .unwrap();
    let config = MaterializerConfig {
        visible_start_hour: 7,
        visible_end_hour: 20,
        ..Default::default()
    };
    let mut session = CalendarSession::new(repo, OWNER, config);
    let views = session.load_range(date(2025, 1, 10), date(2025, 1, 10)).await.unwrap();

    assert_eq!(views.len(), 1);
    assert!(views[0].clipped);
    assert_eq!(views[0].display_start, at(2025, 1, 10, 7, 0));
    assert_eq!(views[0].display_end, at(2025, 1, 10, 8, 30));
    assert_eq!(views[0].occurrence.start_utc(), at(2025, 1, 10, 6, 45));
}

#[tokio::test]
async fn test_range_listing_includes_series_started_long_ago() {
    let (repo, _temp_dir) = setup_test_db().await;
    repo.create_event(NewEvent {
        owner_id: OWNER,
        title: "Water plants".to_string(),
        start_utc: at(2020, 3, 1, 7, 0),
        end_utc: at(2020, 3, 1, 7, 10),
        recurrence: Some(RecurrenceRule::daily(7)),
        ..Default::default()
    })
    .await
    .unwrap();

    let mut session = CalendarSession::new(repo, OWNER, MaterializerConfig::default());
    let views = session.load_range(date(2025, 1, 1), date(2025, 1, 31)).await.unwrap();
    assert!(!views.is_empty());
    let first = views[0].occurrence.start_utc().date_naive();
    assert_eq!((first - date(2020, 3, 1)).num_days() % 7, 0);
    assert!(views.iter().all(|v| v.occurrence.start_utc() >= at(2025, 1, 1, 0, 0)));
}
