//! Report generation service.
//!
//! Runs one report execution: reads every selected stream from the history
//! store, renders the samples inside the look-back window as CSV, zips them
//! into an archive and mails a download link to the report's recipients.

use chrono_tz::Tz;
use domain::models::{Report, ReportResult, ReportTaskKey, SharedReport, TimestampFormat};
use domain::services::{NotificationResult, ReportMailer};
use metrics::{counter, histogram};
use persistence::{decode_samples, ReportingStorage, StorageError, StreamCoordinate};
use shared::clock::{from_millis, now_millis};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use thiserror::Error;
use tracing::{error, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::ReportingConfig;

/// Report generation errors.
#[derive(Error, Debug)]
pub enum ReportGenerationError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Report worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Notification failed: {0}")]
    Notification(String),
}

/// Service for generating reports.
#[derive(Clone)]
pub struct ReportGenerationService {
    storage: ReportingStorage,
    mailer: Arc<dyn ReportMailer>,
    reports_dir: PathBuf,
    download_base_url: String,
}

impl ReportGenerationService {
    /// Create a new report generation service.
    ///
    /// # Arguments
    /// * `storage` - Telemetry history store
    /// * `mailer` - Collaborator delivering the download link
    /// * `reports_dir` - Directory to store generated archives
    /// * `download_base_url` - Public URL `reports_dir` is served under
    pub fn new(
        storage: ReportingStorage,
        mailer: Arc<dyn ReportMailer>,
        reports_dir: PathBuf,
        download_base_url: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            mailer,
            reports_dir,
            download_base_url: download_base_url.into(),
        }
    }

    pub fn from_config(config: &ReportingConfig, mailer: Arc<dyn ReportMailer>) -> Self {
        Self::new(
            ReportingStorage::new(config.data_dir.clone()),
            mailer,
            config.reports_dir.clone(),
            config.download_base_url.clone(),
        )
    }

    pub fn storage(&self) -> &ReportingStorage {
        &self.storage
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Runs one execution of `report` and records its outcome on the report.
    ///
    /// Never fails: any error is logged and recorded as [`ReportResult::Error`].
    pub async fn generate(&self, key: &ReportTaskKey, report: &SharedReport) -> ReportResult {
        let start = Instant::now();
        let snapshot = report.read().await.clone();
        let now = now_millis();

        let result = match self.run(key, snapshot, now).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    user = %key.user,
                    dashboard_id = key.dashboard_id,
                    report_id = key.report_id,
                    error = %e,
                    "Error generating report"
                );
                ReportResult::Error
            }
        };

        {
            let mut report = report.write().await;
            report.last_report_at = now_millis();
            report.last_run_result = Some(result);
        }

        let elapsed = start.elapsed();
        counter!("reports_generated_total", "result" => result.as_str()).increment(1);
        histogram!("report_generation_duration_seconds").record(elapsed.as_secs_f64());

        info!(
            user = %key.user,
            dashboard_id = key.dashboard_id,
            report_id = key.report_id,
            result = result.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Processed report"
        );

        result
    }

    async fn run(
        &self,
        key: &ReportTaskKey,
        report: Report,
        now: i64,
    ) -> Result<ReportResult, ReportGenerationError> {
        let storage = self.storage.clone();
        let reports_dir = self.reports_dir.clone();
        let task_key = key.clone();
        let subject = report.email_subject();
        let dynamic_section = report.dynamic_section();
        let recipients = report.recipients.clone();

        let archive = tokio::task::spawn_blocking(move || {
            write_archive(&storage, &task_key, &report, now, &reports_dir)
        })
        .await??;

        let Some(file_name) = archive else {
            info!(
                user = %key.user,
                report_id = key.report_id,
                "No data for report"
            );
            return Ok(ReportResult::NoData);
        };

        let download_url = self.download_url(&file_name);
        match self
            .mailer
            .send_report_email(&recipients, &subject, &download_url, &dynamic_section)
            .await
        {
            NotificationResult::Failed(reason) => Err(ReportGenerationError::Notification(reason)),
            NotificationResult::Sent | NotificationResult::Skipped => Ok(ReportResult::Ok),
        }
    }

    /// Public URL of an archive in the reports directory.
    pub fn download_url(&self, file_name: &str) -> String {
        format!(
            "{}/{}",
            self.download_base_url.trim_end_matches('/'),
            file_name
        )
    }

    /// Clean up archives older than `retention_days`.
    pub fn cleanup_expired_archives(&self, retention_days: u32) -> Result<u32, ReportGenerationError> {
        let entries = match fs::read_dir(&self.reports_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let max_age = std::time::Duration::from_secs(u64::from(retention_days) * 86_400);
        let now = SystemTime::now();
        let mut deleted = 0u32;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("gz") {
                continue;
            }

            let modified = entry.metadata()?.modified()?;
            let expired = now
                .duration_since(modified)
                .map(|age| age > max_age)
                .unwrap_or(false);
            if !expired {
                continue;
            }

            if let Err(e) = fs::remove_file(&path) {
                warn!(
                    file_path = %path.display(),
                    error = %e,
                    "Failed to delete expired report archive"
                );
            } else {
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(deleted = deleted, "Cleaned up expired report archives");
        }

        Ok(deleted)
    }
}

/// Name of the archive produced for `key` on the report-local date of `now`.
pub fn archive_file_name(key: &ReportTaskKey, tz: Tz, now: i64) -> Result<String, ReportGenerationError> {
    let date = from_millis(now)
        .ok_or(ReportGenerationError::InvalidTimestamp(now))?
        .with_timezone(&tz)
        .date_naive();
    Ok(format!(
        "{}_{}_{}.gz",
        key.user.file_prefix(),
        key.report_id,
        date
    ))
}

/// Name of one CSV entry inside an archive.
pub fn entry_file_name(coordinate: &StreamCoordinate) -> String {
    format!(
        "{}_{}_{}{}.csv",
        coordinate.dashboard_id,
        coordinate.device_id,
        coordinate.pin_type.code(),
        coordinate.pin
    )
}

/// Renders samples at or after `start_from` as `value,timestamp` lines.
pub fn samples_to_csv(buf: &[u8], start_from: i64, format: Option<TimestampFormat>, tz: Tz) -> String {
    let mut csv = String::new();
    for (ts, value) in decode_samples(buf) {
        if ts < start_from {
            continue;
        }
        csv.push_str(&format!(
            "{},{}\n",
            value,
            TimestampFormat::format_ts(format, ts, tz)
        ));
    }
    csv
}

/// Builds the per-device-per-pin archive and writes it to `reports_dir`.
///
/// Returns the archive file name, or `None` when no stream had data inside
/// the look-back window. Nothing is written in that case.
fn write_archive(
    storage: &ReportingStorage,
    key: &ReportTaskKey,
    report: &Report,
    now: i64,
    reports_dir: &Path,
) -> Result<Option<String>, ReportGenerationError> {
    let fetch_count = report.report_type.fetch_count(report.granularity_type);
    let start_from = now.saturating_sub(report.report_type.look_back_millis());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0usize;

    for source in report.valid_sources() {
        for &device_id in source.device_ids() {
            for (pin_type, pin) in source.selected_pins() {
                let coordinate = StreamCoordinate {
                    dashboard_id: key.dashboard_id,
                    device_id,
                    pin_type,
                    pin,
                    granularity: report.granularity_type,
                };

                let Some(buf) = storage.read(&key.user, &coordinate, fetch_count, 0)? else {
                    continue;
                };

                let csv = samples_to_csv(&buf, start_from, report.format, report.tz_name);
                if csv.is_empty() {
                    continue;
                }

                zip.start_file(entry_file_name(&coordinate), options)?;
                zip.write_all(csv.as_bytes())?;
                entries += 1;
            }
        }
    }

    if entries == 0 {
        return Ok(None);
    }

    let bytes = zip.finish()?.into_inner();
    let file_name = archive_file_name(key, report.tz_name, now)?;
    fs::create_dir_all(reports_dir)?;
    fs::write(reports_dir.join(&file_name), bytes)?;
    Ok(Some(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{
        GraphGranularity, PinType, ReportDataStream, ReportOutput, ReportPeriod, ReportSource,
        UserKey,
    };
    use domain::services::MockReportMailer;
    use shared::clock::DAY_MILLIS;
    use std::io::Read;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        reports_dir: PathBuf,
        mailer: MockReportMailer,
        service: ReportGenerationService,
    }

    fn fixture_with(mailer: MockReportMailer) -> Fixture {
        let dir = TempDir::new().unwrap();
        let reports_dir = dir.path().join("reports");
        let service = ReportGenerationService::new(
            ReportingStorage::new(dir.path().join("data")),
            Arc::new(mailer.clone()),
            reports_dir.clone(),
            "http://localhost:8080/reports/",
        );
        Fixture {
            _dir: dir,
            reports_dir,
            mailer,
            service,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockReportMailer::new())
    }

    fn key() -> ReportTaskKey {
        ReportTaskKey::new(UserKey::new("test@gmail.com", "Blynk"), 1, 7)
    }

    fn one_time_report(streams: Vec<ReportDataStream>) -> Report {
        Report {
            id: 7,
            name: "OneTime".to_string(),
            report_sources: vec![ReportSource::TileTemplate {
                template_id: 1,
                device_ids: vec![0],
                report_data_streams: streams,
            }],
            report_type: ReportPeriod::OneTime {
                range_millis: DAY_MILLIS,
            },
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
    }

    fn coordinate(pin_type: PinType, pin: u8) -> StreamCoordinate {
        StreamCoordinate {
            dashboard_id: 1,
            device_id: 0,
            pin_type,
            pin,
            granularity: GraphGranularity::Minute,
        }
    }

    fn read_entries(path: &Path) -> Vec<(String, String)> {
        let file = fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut entries = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            entries.push((entry.name().to_string(), content));
        }
        entries
    }

    #[tokio::test]
    async fn test_one_sample_produces_archive_and_email() {
        let f = fixture();
        let ts = now_millis() - 60_000;
        f.service
            .storage()
            .append(&key().user, &coordinate(PinType::Virtual, 1), ts, 1.5)
            .unwrap();

        let report = one_time_report(vec![ReportDataStream::new(PinType::Virtual, 1, "Temp")])
            .into_shared();
        let result = f.service.generate(&key(), &report).await;

        assert_eq!(result, ReportResult::Ok);
        let snapshot = report.read().await;
        assert_eq!(snapshot.last_run_result, Some(ReportResult::Ok));
        assert!(snapshot.last_report_at >= ts);

        let file_name = archive_file_name(&key(), Tz::UTC, now_millis()).unwrap();
        let path = f.reports_dir.join(&file_name);
        assert!(path.exists());
        assert_eq!(
            read_entries(&path),
            vec![("1_0_v1.csv".to_string(), format!("1.5,{}\n", ts))]
        );

        let sent = f.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Your one time OneTime is ready");
        assert_eq!(
            sent[0].download_url,
            format!("http://localhost:8080/reports/{}", file_name)
        );
        assert_eq!(
            sent[0].dynamic_section,
            "Report name: OneTime<br>Period: One time"
        );
    }

    #[tokio::test]
    async fn test_no_data_sends_nothing() {
        let f = fixture();
        let report = one_time_report(vec![ReportDataStream::new(PinType::Virtual, 1, "Temp")])
            .into_shared();

        let result = f.service.generate(&key(), &report).await;

        assert_eq!(result, ReportResult::NoData);
        assert_eq!(f.mailer.sent_count(), 0);
        assert!(!f.reports_dir.exists());
        assert_eq!(
            report.read().await.last_run_result,
            Some(ReportResult::NoData)
        );
    }

    #[tokio::test]
    async fn test_samples_outside_window_are_dropped() {
        let f = fixture();
        let now = now_millis();
        let c = coordinate(PinType::Digital, 8);
        f.service
            .storage()
            .append(&key().user, &c, now - 2 * DAY_MILLIS, 1.0)
            .unwrap();

        let report = one_time_report(vec![ReportDataStream::new(PinType::Digital, 8, "Door")])
            .into_shared();
        assert_eq!(f.service.generate(&key(), &report).await, ReportResult::NoData);

        f.service.storage().append(&key().user, &c, now - 1_000, 2.0).unwrap();
        assert_eq!(f.service.generate(&key(), &report).await, ReportResult::Ok);
    }

    #[tokio::test]
    async fn test_invalid_streams_are_skipped() {
        let f = fixture();
        let ts = now_millis() - 1_000;
        f.service
            .storage()
            .append(&key().user, &coordinate(PinType::Virtual, 2), ts, 3.0)
            .unwrap();

        let unselected = ReportDataStream {
            is_selected: false,
            ..ReportDataStream::new(PinType::Virtual, 2, "Hidden")
        };
        let report = one_time_report(vec![unselected]).into_shared();

        assert_eq!(f.service.generate(&key(), &report).await, ReportResult::NoData);
    }

    #[tokio::test]
    async fn test_mailer_failure_records_error() {
        let f = fixture_with(MockReportMailer::failing());
        f.service
            .storage()
            .append(&key().user, &coordinate(PinType::Virtual, 1), now_millis() - 1_000, 1.0)
            .unwrap();

        let report = one_time_report(vec![ReportDataStream::new(PinType::Virtual, 1, "Temp")])
            .into_shared();
        let result = f.service.generate(&key(), &report).await;

        assert_eq!(result, ReportResult::Error);
        assert_eq!(report.read().await.last_run_result, Some(ReportResult::Error));
        let file_name = archive_file_name(&key(), Tz::UTC, now_millis()).unwrap();
        assert!(f.reports_dir.join(file_name).exists());
    }

    #[test]
    fn test_samples_to_csv_formats_timestamps() {
        let mut buf = Vec::new();
        for (ts, value) in [(1_000i64, 1.0f64), (1_710_075_909_000, 22.25)] {
            buf.extend_from_slice(&ts.to_be_bytes());
            buf.extend_from_slice(&value.to_be_bytes());
        }

        assert_eq!(
            samples_to_csv(&buf, 0, None, Tz::UTC),
            "1,1000\n22.25,1710075909000\n"
        );
        assert_eq!(
            samples_to_csv(&buf, 2_000, Some(TimestampFormat::IsoSimple), Tz::UTC),
            "22.25,2024-03-10T13:05:09\n"
        );
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            entry_file_name(&coordinate(PinType::Analog, 3)),
            "1_0_a3.csv"
        );
        let kyiv: Tz = "Europe/Kiev".parse().unwrap();
        // 23:30 UTC is already the next day in Kyiv.
        let ts = 1_710_113_400_000;
        assert_eq!(
            archive_file_name(&key(), Tz::UTC, ts).unwrap(),
            "test@gmail.com_Blynk_7_2024-03-10.gz"
        );
        assert_eq!(
            archive_file_name(&key(), kyiv, ts).unwrap(),
            "test@gmail.com_Blynk_7_2024-03-11.gz"
        );
    }

    #[test]
    fn test_download_url_single_slash() {
        let f = fixture();
        assert_eq!(
            f.service.download_url("a.gz"),
            "http://localhost:8080/reports/a.gz"
        );
    }

    #[test]
    fn test_cleanup_keeps_fresh_archives() {
        let f = fixture();
        fs::create_dir_all(&f.reports_dir).unwrap();
        fs::write(f.reports_dir.join("fresh.gz"), b"x").unwrap();

        assert_eq!(f.service.cleanup_expired_archives(30).unwrap(), 0);
        assert!(f.reports_dir.join("fresh.gz").exists());
    }
}
