//! Report scheduling engine.
//!
//! Owns the table of pending report timers keyed by [`ReportTaskKey`].
//! Each recurring report has at most one pending timer. When a timer fires
//! the report runs on a bounded worker pool and, if it is still registered
//! and not expired, a timer for the next period is installed.
//!
//! Every slot carries a registration token. Cancelling or replacing a
//! report bumps the token, so a run that was already in flight can never
//! re-install a timer for a registration that no longer exists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use domain::models::{ReportPeriodError, ReportResult, ReportTaskKey, SharedReport};
use serde::Serialize;
use shared::clock::{millis_until, now_millis};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::ReportingConfig;
use crate::services::ReportGenerationService;

/// Errors surfaced to callers of the scheduling engine.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Report rejected: {0}")]
    Rejected(#[from] ReportPeriodError),

    #[error("Report {0} is already scheduled")]
    Duplicate(ReportTaskKey),

    #[error("Export quota exceeded for report {0}")]
    QuotaExceeded(ReportTaskKey),
}

impl ScheduleError {
    /// True for errors caused by the submitted report itself.
    pub fn is_illegal_command(&self) -> bool {
        matches!(self, ScheduleError::Rejected(_) | ScheduleError::Duplicate(_))
    }
}

/// Snapshot of the engine's lifecycle counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub total_scheduled: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub active: usize,
    pub scheduled: usize,
    pub task_count: u64,
}

struct TaskSlot {
    token: u64,
    timer: Option<AbortHandle>,
    runs: usize,
    run_lock: Arc<Mutex<()>>,
}

impl TaskSlot {
    fn new(token: u64) -> Self {
        Self {
            token,
            timer: None,
            runs: 0,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    fn is_idle(&self) -> bool {
        self.timer.is_none() && self.runs == 0
    }
}

type TaskTable = HashMap<ReportTaskKey, TaskSlot>;

struct Inner {
    tasks: Mutex<TaskTable>,
    generator: ReportGenerationService,
    workers: Semaphore,
    export_cooldown_millis: i64,
    next_token: AtomicU64,
    total_scheduled: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    active: AtomicUsize,
    running: AtomicUsize,
}

/// Timer-driven scheduler for recurring and manually triggered reports.
#[derive(Clone)]
pub struct ReportScheduler {
    inner: Arc<Inner>,
}

impl ReportScheduler {
    /// Create a new scheduler.
    ///
    /// # Arguments
    /// * `generator` - Pipeline executing one report run
    /// * `max_concurrent_reports` - Size of the worker pool
    /// * `export_cooldown` - Minimum gap between two runs of a manual export
    pub fn new(
        generator: ReportGenerationService,
        max_concurrent_reports: usize,
        export_cooldown: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                generator,
                workers: Semaphore::new(max_concurrent_reports.max(1)),
                export_cooldown_millis: export_cooldown.as_millis() as i64,
                next_token: AtomicU64::new(1),
                total_scheduled: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
                active: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
            }),
        }
    }

    pub fn from_config(config: &ReportingConfig, generator: ReportGenerationService) -> Self {
        Self::new(
            generator,
            config.max_concurrent_reports,
            Duration::from_secs(config.export_cooldown_secs),
        )
    }

    pub fn generator(&self) -> &ReportGenerationService {
        &self.inner.generator
    }

    /// Schedules a new report.
    ///
    /// Returns the next fire instant for recurring reports and `None` for
    /// one-time reports, which only run through [`ReportScheduler::export_now`].
    pub async fn register(
        &self,
        key: ReportTaskKey,
        report: SharedReport,
    ) -> Result<Option<i64>, ScheduleError> {
        let next = self.inner.compute_next(&report, now_millis()).await?;

        let mut tasks = self.inner.tasks.lock().await;
        if tasks.get(&key).is_some_and(|slot| slot.timer.is_some()) {
            return Err(ScheduleError::Duplicate(key));
        }

        let Some(at) = next else {
            report.write().await.next_report_at = 0;
            return Ok(None);
        };

        self.inner.install(&mut tasks, key.clone(), report.clone(), at);
        report.write().await.next_report_at = at;
        drop(tasks);

        info!(
            user = %key.user,
            dashboard_id = key.dashboard_id,
            report_id = key.report_id,
            next_report_at = at,
            "Report scheduled"
        );
        Ok(Some(at))
    }

    /// Cancels the pending timer of `key` and schedules `report` in its place.
    ///
    /// When the new definition is rejected the old timer stays cancelled.
    pub async fn replace(
        &self,
        key: ReportTaskKey,
        report: SharedReport,
    ) -> Result<Option<i64>, ScheduleError> {
        let next = self.inner.compute_next(&report, now_millis()).await;

        let mut tasks = self.inner.tasks.lock().await;
        self.inner.cancel_locked(&mut tasks, &key);

        let Some(at) = next? else {
            report.write().await.next_report_at = 0;
            return Ok(None);
        };

        self.inner.install(&mut tasks, key.clone(), report.clone(), at);
        report.write().await.next_report_at = at;
        drop(tasks);

        info!(
            user = %key.user,
            dashboard_id = key.dashboard_id,
            report_id = key.report_id,
            next_report_at = at,
            "Report rescheduled"
        );
        Ok(Some(at))
    }

    /// Removes any pending timer of `key`. An in-flight run completes but is
    /// not rescheduled.
    ///
    /// Returns whether anything was pending or running for the key.
    pub async fn cancel(&self, key: &ReportTaskKey) -> bool {
        let mut tasks = self.inner.tasks.lock().await;
        let found = self.inner.cancel_locked(&mut tasks, key);
        drop(tasks);

        if found {
            debug!(
                user = %key.user,
                dashboard_id = key.dashboard_id,
                report_id = key.report_id,
                "Report cancelled"
            );
        }
        found
    }

    /// Runs `report` immediately, outside its timer schedule.
    ///
    /// Rejected when the report already ran within the export cooldown or
    /// when a run for the key is in flight.
    pub async fn export_now(
        &self,
        key: ReportTaskKey,
        report: SharedReport,
    ) -> Result<ReportResult, ScheduleError> {
        let run_lock = {
            let mut tasks = self.inner.tasks.lock().await;

            let last_report_at = report.read().await.last_report_at;
            let now = now_millis();
            if last_report_at != 0 && now - last_report_at < self.inner.export_cooldown_millis {
                return Err(ScheduleError::QuotaExceeded(key));
            }

            let slot = tasks
                .entry(key.clone())
                .or_insert_with(|| TaskSlot::new(0));
            if slot.runs > 0 {
                return Err(ScheduleError::QuotaExceeded(key));
            }

            slot.runs += 1;
            self.inner.running.fetch_add(1, Ordering::SeqCst);
            self.inner.total_scheduled.fetch_add(1, Ordering::SeqCst);
            Arc::clone(&slot.run_lock)
        };

        // The run owns its bookkeeping, so a caller that stops waiting does
        // not leave the key blocked.
        let inner = Arc::clone(&self.inner);
        let run_key = key.clone();
        let run = tokio::spawn(async move {
            let result = inner.execute(&run_key, &report, &run_lock, false).await;
            inner.finish_run();
            inner.release_run(&run_key).await;
            result
        });

        match run.await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(
                    user = %key.user,
                    report_id = key.report_id,
                    error = %e,
                    "Manual export task failed"
                );
                Ok(ReportResult::Error)
            }
        }
    }

    /// Aborts every pending timer, counting each as cancelled. In-flight
    /// runs finish.
    pub async fn shutdown(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        let mut aborted = 0usize;
        for slot in tasks.values_mut() {
            slot.token = self.inner.next_token();
            if let Some(timer) = slot.timer.take() {
                timer.abort();
                aborted += 1;
            }
        }
        self.inner
            .cancelled
            .fetch_add(aborted as u64, Ordering::SeqCst);
        tasks.retain(|_, slot| !slot.is_idle());
        info!(aborted = aborted, "Report scheduler shut down");
    }

    /// Number of reports ever scheduled, manual exports included.
    pub fn total_scheduled_count(&self) -> u64 {
        self.inner.total_scheduled.load(Ordering::SeqCst)
    }

    pub fn completed_task_count(&self) -> u64 {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn cancelled_count(&self) -> u64 {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Runs currently holding a worker.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Number of keys with a pending timer.
    pub async fn scheduled_len(&self) -> usize {
        let tasks = self.inner.tasks.lock().await;
        tasks.values().filter(|slot| slot.timer.is_some()).count()
    }

    /// Completed runs plus pending timers plus runs in flight.
    pub async fn task_count(&self) -> u64 {
        self.completed_task_count()
            + self.scheduled_len().await as u64
            + self.inner.running.load(Ordering::SeqCst) as u64
    }

    /// Whether `key` has a pending timer.
    pub async fn is_scheduled(&self, key: &ReportTaskKey) -> bool {
        let tasks = self.inner.tasks.lock().await;
        tasks.get(key).is_some_and(|slot| slot.timer.is_some())
    }

    pub async fn stats(&self) -> SchedulerStats {
        let scheduled = self.scheduled_len().await;
        let completed = self.completed_task_count();
        SchedulerStats {
            total_scheduled: self.total_scheduled_count(),
            completed,
            cancelled: self.cancelled_count(),
            active: self.active_count(),
            scheduled,
            task_count: completed
                + scheduled as u64
                + self.inner.running.load(Ordering::SeqCst) as u64,
        }
    }
}

impl Inner {
    fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::SeqCst)
    }

    async fn compute_next(
        &self,
        report: &SharedReport,
        base: i64,
    ) -> Result<Option<i64>, ScheduleError> {
        let report = report.read().await;
        Ok(report.report_type.next_fire(base, report.tz_name)?)
    }

    /// Installs a timer for `key` firing at `at` under a fresh token.
    fn install(self: &Arc<Self>, tasks: &mut TaskTable, key: ReportTaskKey, report: SharedReport, at: i64) {
        let token = self.next_token();
        let delay = Duration::from_millis(millis_until(at, now_millis()));

        let inner = Arc::clone(self);
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(timer_key, report, token, at).await;
        })
        .abort_handle();

        let slot = tasks.entry(key).or_insert_with(|| TaskSlot::new(token));
        slot.token = token;
        slot.timer = Some(handle);
        self.total_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    /// Invalidates the registration of `key` and aborts its pending timer.
    fn cancel_locked(&self, tasks: &mut TaskTable, key: &ReportTaskKey) -> bool {
        let Some(slot) = tasks.get_mut(key) else {
            return false;
        };

        slot.token = self.next_token();
        if let Some(timer) = slot.timer.take() {
            timer.abort();
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
        if slot.runs == 0 {
            tasks.remove(key);
        }
        true
    }

    async fn fire(self: Arc<Self>, key: ReportTaskKey, report: SharedReport, token: u64, fired_at: i64) {
        let run_lock = {
            let mut tasks = self.tasks.lock().await;
            match tasks.get_mut(&key) {
                Some(slot) if slot.token == token => {
                    slot.timer = None;
                    slot.runs += 1;
                    self.running.fetch_add(1, Ordering::SeqCst);
                    Arc::clone(&slot.run_lock)
                }
                _ => return,
            }
        };

        let result = self.execute(&key, &report, &run_lock, true).await;

        let next = if result == ReportResult::Expired {
            None
        } else {
            let base = now_millis().max(fired_at + 1);
            match self.compute_next(&report, base).await {
                Ok(next) => next,
                Err(e) => {
                    info!(
                        user = %key.user,
                        report_id = key.report_id,
                        reason = %e,
                        "Report retired after last run"
                    );
                    None
                }
            }
        };

        self.finish_run();

        let mut tasks = self.tasks.lock().await;
        let Some(slot) = tasks.get_mut(&key) else {
            return;
        };
        slot.runs = slot.runs.saturating_sub(1);

        if slot.token == token && slot.timer.is_none() {
            match next {
                Some(at) => {
                    self.install(&mut tasks, key.clone(), report.clone(), at);
                    report.write().await.next_report_at = at;
                    debug!(
                        user = %key.user,
                        report_id = key.report_id,
                        next_report_at = at,
                        "Report rescheduled for next period"
                    );
                    return;
                }
                None => {
                    report.write().await.next_report_at = 0;
                }
            }
        }

        if tasks.get(&key).is_some_and(TaskSlot::is_idle) {
            tasks.remove(&key);
        }
    }

    /// Runs one execution of `report` on the worker pool, serialized per key.
    async fn execute(
        &self,
        key: &ReportTaskKey,
        report: &SharedReport,
        run_lock: &Mutex<()>,
        check_expiry: bool,
    ) -> ReportResult {
        let _serial = run_lock.lock().await;
        let Ok(_permit) = self.workers.acquire().await else {
            warn!(user = %key.user, report_id = key.report_id, "Report worker pool closed");
            return ReportResult::Error;
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        let result = if check_expiry && self.expire_if_needed(key, report).await {
            ReportResult::Expired
        } else {
            self.generator.generate(key, report).await
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Marks a bounded recurring report whose end date has passed.
    async fn expire_if_needed(&self, key: &ReportTaskKey, report: &SharedReport) -> bool {
        let now = now_millis();
        let mut report = report.write().await;
        if !report.is_recurring() || !report.report_type.is_expired(now) {
            return false;
        }

        report.last_run_result = Some(ReportResult::Expired);
        report.last_report_at = now;
        report.next_report_at = 0;
        info!(
            user = %key.user,
            dashboard_id = key.dashboard_id,
            report_id = key.report_id,
            "Report expired"
        );
        true
    }

    fn finish_run(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    /// Drops the run count of a manual export and forgets the key once idle.
    async fn release_run(&self, key: &ReportTaskKey) {
        let mut tasks = self.tasks.lock().await;
        if let Some(slot) = tasks.get_mut(key) {
            slot.runs = slot.runs.saturating_sub(1);
            if slot.is_idle() {
                tasks.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;
    use domain::models::{
        GraphGranularity, PinType, Report, ReportDataStream, ReportDurationType, ReportOutput,
        ReportPeriod, ReportSource, UserKey,
    };
    use domain::services::MockReportMailer;
    use persistence::{ReportingStorage, StreamCoordinate};
    use shared::clock::DAY_MILLIS;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        mailer: MockReportMailer,
        scheduler: ReportScheduler,
    }

    fn fixture() -> Fixture {
        fixture_with(MockReportMailer::new(), Duration::from_secs(60))
    }

    fn fixture_with(mailer: MockReportMailer, export_cooldown: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let generator = ReportGenerationService::new(
            ReportingStorage::new(dir.path().join("data")),
            Arc::new(mailer.clone()),
            dir.path().join("reports"),
            "http://localhost/reports",
        );
        Fixture {
            _dir: dir,
            mailer,
            scheduler: ReportScheduler::new(generator, 2, export_cooldown),
        }
    }

    /// Writes one point for the stream every test report reads.
    fn seed_data(scheduler: &ReportScheduler) {
        let coordinate = StreamCoordinate {
            dashboard_id: 1,
            device_id: 0,
            pin_type: PinType::Virtual,
            pin: 1,
            granularity: GraphGranularity::Minute,
        };
        scheduler
            .generator()
            .storage()
            .append(&key(1).user, &coordinate, now_millis() - 1_000, 1.0)
            .unwrap();
    }

    fn key(report_id: i32) -> ReportTaskKey {
        ReportTaskKey::new(UserKey::new("test@gmail.com", "Blynk"), 1, report_id)
    }

    fn report(id: i32, period: ReportPeriod) -> SharedReport {
        Report {
            id,
            name: "Report".to_string(),
            report_sources: vec![ReportSource::TileTemplate {
                template_id: 1,
                device_ids: vec![0],
                report_data_streams: vec![ReportDataStream::new(PinType::Virtual, 1, "Temp")],
            }],
            report_type: period,
            recipients: "test@gmail.com".to_string(),
            granularity_type: GraphGranularity::Minute,
            is_active: true,
            report_output: ReportOutput::CsvFilePerDevicePerPin,
            format: None,
            tz_name: Tz::UTC,
            next_report_at: 0,
            last_report_at: 0,
            last_run_result: None,
        }
        .into_shared()
    }

    fn daily(at_time: i64) -> ReportPeriod {
        ReportPeriod::Daily {
            at_time,
            duration_type: ReportDurationType::Infinite,
            start_ts: 0,
            end_ts: 0,
        }
    }

    async fn assert_invariant(scheduler: &ReportScheduler) {
        assert_eq!(
            scheduler.completed_task_count() + scheduler.scheduled_len().await as u64,
            scheduler.total_scheduled_count() - scheduler.cancelled_count()
        );
    }

    #[tokio::test]
    async fn test_one_time_report_takes_no_timer() {
        let f = fixture();
        let report = report(1, ReportPeriod::OneTime { range_millis: DAY_MILLIS });

        let next = f.scheduler.register(key(1), report.clone()).await.unwrap();

        assert_eq!(next, None);
        assert_eq!(f.scheduler.scheduled_len().await, 0);
        assert_eq!(f.scheduler.total_scheduled_count(), 0);
        assert_eq!(report.read().await.next_report_at, 0);
    }

    #[tokio::test]
    async fn test_register_duplicate_and_cancel() {
        let f = fixture();
        let at = now_millis() + 60_000;
        let report = report(1, daily(at));

        let next = f.scheduler.register(key(1), report.clone()).await.unwrap();
        assert_eq!(next, Some(at));
        assert_eq!(report.read().await.next_report_at, at);
        assert!(f.scheduler.is_scheduled(&key(1)).await);

        let err = f.scheduler.register(key(1), report.clone()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::Duplicate(_)));
        assert!(err.is_illegal_command());

        assert!(f.scheduler.cancel(&key(1)).await);
        assert!(!f.scheduler.cancel(&key(1)).await);
        assert_eq!(f.scheduler.scheduled_len().await, 0);
        assert_eq!(f.scheduler.cancelled_count(), 1);
        assert_invariant(&f.scheduler).await;
    }

    #[tokio::test]
    async fn test_rejected_period_is_not_scheduled() {
        let f = fixture();
        let now = now_millis();
        let report = report(
            1,
            ReportPeriod::Daily {
                at_time: now + 1_000,
                duration_type: ReportDurationType::Custom,
                start_ts: now + DAY_MILLIS,
                end_ts: now,
            },
        );

        let err = f.scheduler.register(key(1), report).await.unwrap_err();
        assert!(matches!(err, ScheduleError::Rejected(_)));
        assert_eq!(f.scheduler.scheduled_len().await, 0);
        assert_eq!(f.scheduler.total_scheduled_count(), 0);
    }

    #[tokio::test]
    async fn test_daily_report_fires_and_reschedules() {
        let f = fixture();
        let at = now_millis() + 300;
        let report = report(1, daily(at));

        f.scheduler.register(key(1), report.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(f.scheduler.completed_task_count(), 1);
        assert_eq!(f.scheduler.scheduled_len().await, 1);
        assert_eq!(f.scheduler.total_scheduled_count(), 2);
        assert_eq!(f.scheduler.task_count().await, 2);

        let snapshot = report.read().await.clone();
        assert_eq!(snapshot.last_run_result, Some(ReportResult::NoData));
        assert_eq!(snapshot.next_report_at, at + DAY_MILLIS);
        assert_eq!(f.mailer.sent_count(), 0);
        assert_invariant(&f.scheduler).await;
    }

    #[tokio::test]
    async fn test_expired_report_is_retired_without_email() {
        let f = fixture();
        let now = now_millis();
        let at = now + 300;
        let report = report(
            1,
            ReportPeriod::Daily {
                at_time: at,
                duration_type: ReportDurationType::Custom,
                start_ts: at,
                end_ts: at,
            },
        );
        f.scheduler.register(key(1), report.clone()).await.unwrap();

        // Move the end date into the past before the timer fires.
        if let ReportPeriod::Daily { end_ts, .. } = &mut report.write().await.report_type {
            *end_ts = now - 1;
        }
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let snapshot = report.read().await.clone();
        assert_eq!(snapshot.last_run_result, Some(ReportResult::Expired));
        assert_eq!(snapshot.next_report_at, 0);
        assert!(snapshot.last_report_at >= at);
        assert_eq!(f.scheduler.scheduled_len().await, 0);
        assert_eq!(f.scheduler.completed_task_count(), 1);
        assert_eq!(f.mailer.sent_count(), 0);
        assert_invariant(&f.scheduler).await;
    }

    #[tokio::test]
    async fn test_export_now_quota() {
        let f = fixture();
        let report = report(1, ReportPeriod::OneTime { range_millis: DAY_MILLIS });
        seed_data(&f.scheduler);

        let result = f.scheduler.export_now(key(1), report.clone()).await.unwrap();
        assert_eq!(result, ReportResult::Ok);

        let err = f.scheduler.export_now(key(1), report.clone()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::QuotaExceeded(_)));
        assert!(!err.is_illegal_command());

        assert_eq!(f.mailer.sent_count(), 1);
        assert_eq!(f.scheduler.completed_task_count(), 1);
        assert_eq!(f.scheduler.total_scheduled_count(), 1);
        assert_eq!(f.scheduler.task_count().await, 1);
        assert_eq!(f.scheduler.scheduled_len().await, 0);
        assert_invariant(&f.scheduler).await;
    }

    #[tokio::test]
    async fn test_replace_with_rejected_period_leaves_timer_cancelled() {
        let f = fixture();
        let now = now_millis();
        f.scheduler
            .register(key(1), report(1, daily(now + 60_000)))
            .await
            .unwrap();

        let invalid = report(
            1,
            ReportPeriod::Monthly {
                at_time: now + 1_500,
                duration_type: ReportDurationType::Custom,
                start_ts: now + 1_500,
                end_ts: now + 1_500,
                day_of_month: domain::models::DayOfMonth::First,
            },
        );
        let err = f.scheduler.replace(key(1), invalid).await.unwrap_err();
        assert!(err.is_illegal_command());
        assert_eq!(f.scheduler.scheduled_len().await, 0);

        let next = f
            .scheduler
            .replace(key(1), report(1, daily(now + 120_000)))
            .await
            .unwrap();
        assert_eq!(next, Some(now + 120_000));
        assert_eq!(f.scheduler.scheduled_len().await, 1);
        assert_eq!(f.scheduler.cancelled_count(), 1);
        assert_invariant(&f.scheduler).await;
    }

    #[tokio::test]
    async fn test_cancel_before_fire_prevents_run() {
        let f = fixture();
        let report = report(1, daily(now_millis() + 300));
        f.scheduler.register(key(1), report.clone()).await.unwrap();
        f.scheduler.cancel(&key(1)).await;

        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(f.scheduler.completed_task_count(), 0);
        assert_eq!(report.read().await.last_run_result, None);
        assert_invariant(&f.scheduler).await;
    }

    #[tokio::test]
    async fn test_shutdown_aborts_timers() {
        let f = fixture();
        let now = now_millis();
        f.scheduler.register(key(1), report(1, daily(now + 60_000))).await.unwrap();
        f.scheduler.register(key(2), report(2, daily(now + 60_000))).await.unwrap();

        f.scheduler.shutdown().await;

        assert_eq!(f.scheduler.scheduled_len().await, 0);
        let stats = f.scheduler.stats().await;
        assert_eq!(stats.total_scheduled, 2);
        assert_eq!(stats.cancelled, 2);
        assert_eq!(stats.scheduled, 0);
        assert_invariant(&f.scheduler).await;
    }

    #[tokio::test]
    async fn test_abandoned_export_still_completes() {
        let f = fixture_with(MockReportMailer::slow(Duration::from_millis(500)), Duration::ZERO);
        let report = report(1, ReportPeriod::OneTime { range_millis: DAY_MILLIS });
        seed_data(&f.scheduler);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            f.scheduler.export_now(key(1), report.clone()),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let stats = f.scheduler.stats().await;
        assert_eq!(stats.active, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.task_count, 1);
        assert_eq!(report.read().await.last_run_result, Some(ReportResult::Ok));
        assert_eq!(f.mailer.sent_count(), 1);

        let result = f.scheduler.export_now(key(1), report.clone()).await.unwrap();
        assert_eq!(result, ReportResult::Ok);
        assert_eq!(f.scheduler.completed_task_count(), 2);
        assert_invariant(&f.scheduler).await;
    }

    #[tokio::test]
    async fn test_cancel_during_run_does_not_reschedule() {
        let f = fixture_with(MockReportMailer::slow(Duration::from_millis(1_000)), Duration::ZERO);
        seed_data(&f.scheduler);
        let report = report(1, daily(now_millis() + 300));
        f.scheduler.register(key(1), report.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(f.scheduler.active_count(), 1);
        assert!(f.scheduler.cancel(&key(1)).await);

        tokio::time::sleep(Duration::from_millis(1_300)).await;

        assert_eq!(report.read().await.last_run_result, Some(ReportResult::Ok));
        assert!(!f.scheduler.is_scheduled(&key(1)).await);
        assert_eq!(f.scheduler.scheduled_len().await, 0);
        assert_eq!(f.scheduler.completed_task_count(), 1);
        assert_eq!(f.scheduler.total_scheduled_count(), 1);
        assert_eq!(f.scheduler.task_count().await, 1);
        assert_invariant(&f.scheduler).await;
    }

    #[tokio::test]
    async fn test_export_rejected_while_timer_run_in_flight() {
        let f = fixture_with(MockReportMailer::slow(Duration::from_millis(1_000)), Duration::ZERO);
        seed_data(&f.scheduler);
        let report = report(1, daily(now_millis() + 300));
        f.scheduler.register(key(1), report.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        let err = f.scheduler.export_now(key(1), report.clone()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::QuotaExceeded(_)));

        tokio::time::sleep(Duration::from_millis(1_300)).await;

        assert_eq!(f.mailer.sent_count(), 1);
        assert_eq!(f.scheduler.completed_task_count(), 1);
        assert_eq!(f.scheduler.scheduled_len().await, 1);
        assert_eq!(f.scheduler.total_scheduled_count(), 2);
        assert_invariant(&f.scheduler).await;
    }

    #[tokio::test]
    async fn test_replace_during_run_keeps_new_timer() {
        let f = fixture_with(MockReportMailer::slow(Duration::from_millis(1_000)), Duration::ZERO);
        seed_data(&f.scheduler);
        let first_at = now_millis() + 300;
        let first = report(1, daily(first_at));
        f.scheduler.register(key(1), first.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        let replaced_at = now_millis() + 60_000;
        let replacement = report(1, daily(replaced_at));
        let next = f.scheduler.replace(key(1), replacement.clone()).await.unwrap();
        assert_eq!(next, Some(replaced_at));

        tokio::time::sleep(Duration::from_millis(1_300)).await;

        assert_eq!(first.read().await.last_run_result, Some(ReportResult::Ok));
        assert_eq!(first.read().await.next_report_at, first_at);
        assert_eq!(replacement.read().await.next_report_at, replaced_at);
        assert_eq!(f.scheduler.scheduled_len().await, 1);
        assert_eq!(f.scheduler.completed_task_count(), 1);
        assert_eq!(f.scheduler.total_scheduled_count(), 2);
        assert_eq!(f.scheduler.cancelled_count(), 0);
        assert_invariant(&f.scheduler).await;
    }
}
