//! Batch orchestration: extract all, then parse all, then validate and store.
//!
//! Each concurrent phase gets its own rayon pool sized by
//! [`workers`](bugreport_battery_core::workers). Jobs only receive a path and
//! return an owned outcome; a job that panics is caught at the pool boundary
//! and recorded as a failure for that one item. Phases are strict barriers:
//! parsing starts only after every extraction has finished.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use bugreport_battery_core::IngestMode;
//! use bugreport_battery_pipeline::{Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::new(PipelineConfig::default());
//! let archives = vec![PathBuf::from("uploads/bugreport-2024-01-01-000000.zip")];
//! let report = pipeline.run(&archives, IngestMode::Append).unwrap();
//! println!("{}", report.summary());
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use bugreport_battery_core::{
    BatteryRecord, HealthSummary, IngestMode, RecordMap, available_cores, validate_records, workers,
};
use bugreport_battery_sqlite::{
    InsertSummary, Migration, MigrationStatus, RecordStore, StorageError, open_database,
};
use chrono::NaiveDateTime;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::{self, ExtractedReport, content_digest};
use crate::config::PipelineConfig;
use crate::parser::{self, ParseOutcome};
use crate::reference::{ReferenceCapacities, ReferenceError};
use crate::report::{BatchReport, Stage};

/// Errors that stop a whole run. Per-item problems end up in
/// [`BatchReport::failures`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Runs ingestion batches against one configuration.
pub struct Pipeline {
    config: PipelineConfig,
    core_count: usize,
    reference: Option<ReferenceCapacities>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let reference = config
            .reference_capacities
            .as_ref()
            .map(ReferenceCapacities::new);
        Self {
            config,
            core_count: available_cores(),
            reference,
        }
    }

    /// Overrides the detected core count used for pool sizing.
    pub fn with_core_count(mut self, core_count: usize) -> Self {
        self.core_count = core_count;
        self
    }

    /// Uses an already constructed reference table instead of the
    /// configured file.
    pub fn with_reference(mut self, reference: ReferenceCapacities) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingests a batch of archives.
    ///
    /// # Errors
    ///
    /// Only storage-level failures and worker-pool construction abort the
    /// run. Bad archives, dropped reports, and invalid records are listed in
    /// the returned report.
    pub fn run(&self, archives: &[PathBuf], mode: IngestMode) -> Result<BatchReport> {
        info!(
            archives = archives.len(),
            mode = %mode,
            performance = %self.config.performance_mode,
            "Starting ingestion"
        );
        let mut report = BatchReport {
            archives_submitted: archives.len(),
            ..BatchReport::default()
        };

        let unique = self.dedupe_inputs(archives, &mut report)?;
        let extracted = self.extract_all(&unique, &mut report)?;
        let parsed = self.parse_all(&extracted, &mut report)?;
        self.validate_and_store(parsed, mode, &mut report)?;

        info!("{}", report.summary());
        Ok(report)
    }

    /// Validates and stores record mappings that did not come from archives.
    pub fn import_records(&self, maps: Vec<RecordMap>, mode: IngestMode) -> Result<BatchReport> {
        info!(records = maps.len(), mode = %mode, "Importing records");
        let mut report = BatchReport::default();
        let sourced = maps
            .into_iter()
            .enumerate()
            .map(|(i, map)| (PathBuf::from(format!("record #{}", i + 1)), map))
            .collect();
        self.validate_and_store(sourced, mode, &mut report)?;
        info!("{}", report.summary());
        Ok(report)
    }

    /// Recovers the report from every archive, in parallel.
    pub fn extract_all(
        &self,
        archives: &[PathBuf],
        report: &mut BatchReport,
    ) -> Result<Vec<ExtractedReport>> {
        let output_dir = self.config.output_dir();
        let temp_dir = self.config.temp_dir();

        let results = self.run_pool("extract", archives, |path| {
            archive::extract(path, &output_dir, &temp_dir)
        })?;

        let mut extracted = Vec::with_capacity(results.len());
        for (path, result) in archives.iter().zip(results) {
            match result {
                Ok(Ok(found)) => extracted.push(found),
                Ok(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "Extraction failed");
                    report.fail(Stage::Extract, path, e);
                }
                Err(panic) => {
                    warn!(path = %path.display(), error = %panic, "Extraction worker panicked");
                    report.fail(Stage::Extract, path, format!("worker panicked: {panic}"));
                }
            }
        }

        report.archives_extracted = extracted.len();
        info!(
            extracted = extracted.len(),
            failed = archives.len() - extracted.len(),
            "Extraction phase complete"
        );
        Ok(extracted)
    }

    /// Parses every recovered report, in parallel. Returns each accepted
    /// mapping with the archive it came from.
    pub fn parse_all(
        &self,
        extracted: &[ExtractedReport],
        report: &mut BatchReport,
    ) -> Result<Vec<(PathBuf, RecordMap)>> {
        let results = self.run_pool("parse", extracted, |item| {
            parser::parse_report(&item.report_path)
        })?;

        let mut parsed = Vec::new();
        for (item, result) in extracted.iter().zip(results) {
            let path = &item.report_path;
            match result {
                Ok(Ok(ParseOutcome::Parsed(map))) => parsed.push((item.archive_path.clone(), map)),
                Ok(Ok(ParseOutcome::Dropped(dropped))) => {
                    warn!(path = %path.display(), reason = %dropped.reason, "Dropped report");
                    report.fail(Stage::Parse, path, dropped.reason);
                }
                Ok(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "Cannot read report");
                    report.fail(Stage::Parse, path, e);
                }
                Err(panic) => {
                    warn!(path = %path.display(), error = %panic, "Parse worker panicked");
                    report.fail(Stage::Parse, path, format!("worker panicked: {panic}"));
                }
            }
        }

        report.reports_parsed = parsed.len();
        info!(parsed = parsed.len(), "Parse phase complete");
        Ok(parsed)
    }

    /// Writes `records` using the ingestion mode's table lifecycle and the
    /// configured conflict policy. Opens its own connection.
    ///
    /// Init mode rebuilds the table and inserts in one transaction, so a
    /// failed init run keeps the previously stored rows.
    pub fn store(&self, records: &[BatteryRecord], mode: IngestMode) -> Result<InsertSummary> {
        let policy = self.config.conflict_policy;
        let mut migration = Migration::new(open_database(self.config.database_path())?);
        let summary = match mode {
            IngestMode::Init => migration.reload(records, policy)?,
            IngestMode::Append => {
                migration.ensure_table()?;
                let conn = migration.into_connection();
                RecordStore::new(&conn)?.insert_many(records, policy)?
            }
        };
        info!(
            inserted = summary.inserted,
            skipped = summary.skipped,
            policy = %policy,
            "Stored records"
        );
        Ok(summary)
    }

    /// Records within the optional inclusive bounds, newest first. Empty
    /// when nothing has been ingested yet.
    pub fn query_records(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<BatteryRecord>> {
        self.with_store(|store| store.get_by_time_range(start, end))
    }

    /// One device's records, newest first.
    pub fn device_records(&self, nickname: &str) -> Result<Vec<BatteryRecord>> {
        self.with_store(|store| store.get_by_nickname(nickname))
    }

    /// Table state of the configured database.
    pub fn status(&self) -> Result<MigrationStatus> {
        let migration = Migration::new(open_database(self.config.database_path())?);
        Ok(migration.status()?)
    }

    /// Health of one device's battery, rated against the reference table
    /// when it lists the device and against the recorded design capacity
    /// otherwise.
    pub fn health(&self, nickname: &str, variant: Option<&str>) -> Result<Option<HealthSummary>> {
        let records = self.device_records(nickname)?;
        let rated = match &self.reference {
            Some(reference) => reference.rated(nickname, variant)?,
            None => None,
        };
        Ok(HealthSummary::compute(&records, rated))
    }

    fn with_store<F>(&self, query: F) -> Result<Vec<BatteryRecord>>
    where
        F: FnOnce(&RecordStore<'_>) -> bugreport_battery_sqlite::Result<Vec<BatteryRecord>>,
    {
        let migration = Migration::new(open_database(self.config.database_path())?);
        if !migration.status()?.table_exists {
            return Ok(Vec::new());
        }
        let conn = migration.into_connection();
        let store = RecordStore::new(&conn)?;
        Ok(query(&store)?)
    }

    fn dedupe_inputs(&self, archives: &[PathBuf], report: &mut BatchReport) -> Result<Vec<PathBuf>> {
        let digests = self.run_pool("hash", archives, |path| content_digest(path).ok())?;

        let mut seen: HashMap<String, &PathBuf> = HashMap::new();
        let mut unique = Vec::with_capacity(archives.len());
        for (path, digest) in archives.iter().zip(digests) {
            // Unreadable inputs go through; extraction reports them.
            let Ok(Some(digest)) = digest else {
                unique.push(path.clone());
                continue;
            };
            match seen.get(&digest) {
                Some(first) => {
                    warn!(
                        path = %path.display(),
                        first = %first.display(),
                        "Skipping duplicate archive"
                    );
                    report.fail(
                        Stage::DuplicateInput,
                        path,
                        format!("same content as {}", first.display()),
                    );
                }
                None => {
                    seen.insert(digest, path);
                    unique.push(path.clone());
                }
            }
        }
        Ok(unique)
    }

    fn validate_and_store(
        &self,
        parsed: Vec<(PathBuf, RecordMap)>,
        mode: IngestMode,
        report: &mut BatchReport,
    ) -> Result<()> {
        let (sources, maps): (Vec<PathBuf>, Vec<RecordMap>) = parsed.into_iter().unzip();
        let (valid, validation) = validate_records(maps);

        if !validation.is_empty() {
            warn!("{validation}");
        }
        for failure in &validation.failures {
            let reasons: Vec<String> = failure.errors.iter().map(ToString::to_string).collect();
            report.fail(Stage::Validate, &sources[failure.index - 1], reasons.join("; "));
        }
        report.records_validated = valid.len();

        let summary = self.store(&valid, mode)?;
        report.records_stored = summary.inserted;
        report.records_skipped = summary.skipped;
        report.records = valid;
        Ok(())
    }

    /// Runs `job` over `items` on a dedicated pool, one result per item in
    /// input order. A panicking job yields `Err` with the panic message.
    fn run_pool<T, R, F>(
        &self,
        stage: &'static str,
        items: &[T],
        job: F,
    ) -> Result<Vec<std::result::Result<R, String>>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let threads = workers(self.config.performance_mode, items.len(), self.core_count);
        debug!(stage, threads, items = items.len(), "Starting worker pool");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{stage}-{i}"))
            .build()?;

        Ok(pool.install(|| {
            items
                .par_iter()
                .map(|item| catch_unwind(AssertUnwindSafe(|| job(item))).map_err(panic_message))
                .collect()
        }))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use bugreport_battery_core::PerformanceMode;

    fn pipeline(dir: &Path) -> Pipeline {
        Pipeline::new(PipelineConfig::with_instance_dir(dir.join("instance"))).with_core_count(4)
    }

    #[test]
    fn test_worker_panic_becomes_item_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let items = vec![1, 2, 3];

        let results = pipeline
            .run_pool("test", &items, |n| {
                if *n == 2 {
                    panic!("boom on {n}");
                }
                n * 10
            })
            .unwrap();

        assert_eq!(results[0], Ok(10));
        assert_eq!(results[1], Err("boom on 2".to_string()));
        assert_eq!(results[2], Ok(30));
    }

    #[test]
    fn test_empty_stage_builds_no_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::with_instance_dir(dir.path());
        config.performance_mode = PerformanceMode::Low;
        let results = Pipeline::new(config)
            .run_pool("test", &Vec::<u8>::new(), |_| ())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_queries_before_ingestion_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        assert!(pipeline.query_records(None, None).unwrap().is_empty());
        assert!(pipeline.health("houji", None).unwrap().is_none());
        assert!(!pipeline.status().unwrap().table_exists);
    }

    #[test]
    fn test_duplicate_archives_skipped_before_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("bugreport-a.zip");
        let second = dir.path().join("bugreport-b.zip");
        std::fs::write(&first, b"same bytes").unwrap();
        std::fs::write(&second, b"same bytes").unwrap();

        let pipeline = pipeline(dir.path());
        let mut report = BatchReport::default();
        let unique = pipeline
            .dedupe_inputs(&[first.clone(), second.clone()], &mut report)
            .unwrap();

        assert_eq!(unique, vec![first]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Stage::DuplicateInput);
        assert_eq!(report.failures[0].path, second);
    }
}
