//! Report CRUD on top of the scheduling engine.

use std::sync::Arc;

use domain::models::{Report, ReportTaskKey, UserKey};
use persistence::{DeviceSelector, PinSelector, StorageError};
use thiserror::Error;
use tracing::info;
use validator::Validate;

use crate::error::ApiError;
use crate::jobs::{ReportScheduler, ScheduleError};

use super::report_store::ReportStore;

#[derive(Debug, Error)]
pub enum ReportingError {
    #[error("Invalid report: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("Report {0} already exists")]
    AlreadyExists(i32),

    #[error("Report {0} not found")]
    NotFound(i32),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Storage worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl From<ReportingError> for ApiError {
    fn from(err: ReportingError) -> Self {
        match err {
            ReportingError::Invalid(errors) => errors.into(),
            ReportingError::AlreadyExists(_) => ApiError::IllegalCommand(err.to_string()),
            ReportingError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ReportingError::Schedule(e) => e.into(),
            ReportingError::Storage(e) => e.into(),
            ReportingError::Worker(e) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Report definitions of every user plus their schedule.
#[derive(Clone)]
pub struct ReportingService {
    store: Arc<ReportStore>,
    scheduler: ReportScheduler,
}

impl ReportingService {
    pub fn new(scheduler: ReportScheduler) -> Self {
        Self {
            store: Arc::new(ReportStore::new()),
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &ReportScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &ReportStore {
        &self.store
    }

    /// Validates and schedules a new report, then stores it.
    ///
    /// Nothing is stored when the report is rejected.
    pub async fn create(
        &self,
        user: &UserKey,
        dashboard_id: i32,
        mut report: Report,
    ) -> Result<Report, ReportingError> {
        report.validate()?;
        report.reset_run_state();

        let report_id = report.id;
        let key = ReportTaskKey::new(user.clone(), dashboard_id, report_id);

        let mut dashboard = self.store.dashboard(user, dashboard_id).await;
        if dashboard.contains(report_id) {
            return Err(ReportingError::AlreadyExists(report_id));
        }

        let shared = report.into_shared();
        self.scheduler.register(key, shared.clone()).await?;
        dashboard.insert(report_id, shared.clone());
        drop(dashboard);

        let created = shared.read().await.clone();
        info!(
            user = %user,
            dashboard_id,
            report_id,
            next_report_at = created.next_report_at,
            "Report created"
        );
        Ok(created)
    }

    /// Replaces the definition of an existing report in place, keeping its
    /// run state.
    ///
    /// On rejection the stored definition is restored, but its timer stays
    /// cancelled.
    pub async fn update(
        &self,
        user: &UserKey,
        dashboard_id: i32,
        report_id: i32,
        mut report: Report,
    ) -> Result<Report, ReportingError> {
        report.id = report_id;
        report.validate()?;

        let key = ReportTaskKey::new(user.clone(), dashboard_id, report_id);
        let dashboard = self.store.dashboard(user, dashboard_id).await;
        let existing = dashboard
            .get(report_id)
            .cloned()
            .ok_or(ReportingError::NotFound(report_id))?;

        let previous = {
            let mut current = existing.write().await;
            let previous = current.clone();
            *current = Report {
                next_report_at: 0,
                last_report_at: previous.last_report_at,
                last_run_result: previous.last_run_result,
                ..report
            };
            previous
        };

        if let Err(e) = self.scheduler.replace(key, existing.clone()).await {
            let mut current = existing.write().await;
            *current = Report {
                next_report_at: 0,
                last_report_at: current.last_report_at,
                last_run_result: current.last_run_result,
                ..previous
            };
            return Err(e.into());
        }
        drop(dashboard);

        info!(user = %user, dashboard_id, report_id, "Report updated");
        let updated = existing.read().await.clone();
        Ok(updated)
    }

    /// Unschedules and forgets a report.
    pub async fn delete(
        &self,
        user: &UserKey,
        dashboard_id: i32,
        report_id: i32,
    ) -> Result<(), ReportingError> {
        let key = ReportTaskKey::new(user.clone(), dashboard_id, report_id);

        let mut dashboard = self.store.dashboard(user, dashboard_id).await;
        self.scheduler.cancel(&key).await;
        let removed = dashboard.remove(report_id);
        drop(dashboard);

        match removed {
            Some(_) => {
                info!(user = %user, dashboard_id, report_id, "Report deleted");
                Ok(())
            }
            None => Err(ReportingError::NotFound(report_id)),
        }
    }

    pub async fn get(
        &self,
        user: &UserKey,
        dashboard_id: i32,
        report_id: i32,
    ) -> Result<Report, ReportingError> {
        let shared = self
            .store
            .get(user, dashboard_id, report_id)
            .await
            .ok_or(ReportingError::NotFound(report_id))?;
        let report = shared.read().await.clone();
        Ok(report)
    }

    pub async fn list(&self, user: &UserKey, dashboard_id: i32) -> Vec<Report> {
        let mut reports = Vec::new();
        for shared in self.store.list(user, dashboard_id).await {
            reports.push(shared.read().await.clone());
        }
        reports
    }

    /// Generates a report right away and returns it with its new run state.
    pub async fn export(
        &self,
        user: &UserKey,
        dashboard_id: i32,
        report_id: i32,
    ) -> Result<Report, ReportingError> {
        let shared = self
            .store
            .get(user, dashboard_id, report_id)
            .await
            .ok_or(ReportingError::NotFound(report_id))?;

        let key = ReportTaskKey::new(user.clone(), dashboard_id, report_id);
        let result = self.scheduler.export_now(key, shared.clone()).await?;

        info!(
            user = %user,
            dashboard_id,
            report_id,
            result = result.as_str(),
            "Report exported"
        );
        let report = shared.read().await.clone();
        Ok(report)
    }

    /// Removes the stored telemetry of a dashboard matching both selectors.
    pub async fn delete_device_data(
        &self,
        user: &UserKey,
        dashboard_id: i32,
        devices: DeviceSelector,
        pins: PinSelector,
    ) -> Result<usize, ReportingError> {
        let storage = self.scheduler.generator().storage().clone();
        let owner = user.clone();

        let removed = tokio::task::spawn_blocking(move || {
            storage.delete(&owner, dashboard_id, &devices, &pins)
        })
        .await??;

        info!(user = %user, dashboard_id, removed, "Device data deleted");
        Ok(removed)
    }
}
