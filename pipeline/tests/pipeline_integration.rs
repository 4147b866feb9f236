//! End-to-end ingestion tests over generated bug-report bundles.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use bugreport_battery_core::{ConflictPolicy, IngestMode, RecordMap};
use bugreport_battery_pipeline::{Pipeline, PipelineConfig, PipelineError, Stage, content_digest};
use bugreport_battery_sqlite::StorageError;
use tempfile::TempDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

fn report_text(nickname: &str, estimated: &str) -> String {
    format!(
        "\
== dumpstate
Build fingerprint: 'Xiaomi/{nickname}/{nickname}:14/UKQ1.230804.001/V816.0.5.0.UNCCNXM:user/release-keys'
  Estimated battery capacity: {estimated} mAh
  Last learned battery capacity: 4480 mAh
  Min learned battery capacity: 4400 mAh
  Max learned battery capacity: 4600 mAh
DUMP OF SERVICE android.hardware.health.IHealth/default:
  cycle count: 87
  Full charge: 4470000
getHealthInfo -> HealthInfo{{batteryFullChargeDesignCapacityUah: 4610000}}
"
    )
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Workspace with an uploads directory and a pipeline rooted in it.
struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("uploads")).unwrap();
        Self { dir }
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig::with_instance_dir(self.dir.path().join("instance"))
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.config()).with_core_count(4)
    }

    fn pipeline_with(&self, policy: ConflictPolicy) -> Pipeline {
        let mut config = self.config();
        config.conflict_policy = policy;
        Pipeline::new(config).with_core_count(4)
    }

    /// Writes `<stem>.zip` wrapping `<stem>.zip` wrapping `<stem>.txt`.
    fn nested_archive(&self, stem: &str, text: &str) -> PathBuf {
        let inner = zip_bytes(&[(format!("{stem}.txt").as_str(), text.as_bytes())]);
        let outer = zip_bytes(&[(format!("{stem}.zip").as_str(), inner.as_slice())]);
        self.write_upload(&format!("{stem}.zip"), &outer)
    }

    fn write_upload(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join("uploads").join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[test]
fn test_nested_archive_scenario_end_to_end() {
    let fx = Fixture::new();
    let archive = fx.nested_archive("bugreport-2024-01-01-000000", &report_text("houji", "4500.0"));

    let report = fx.pipeline().run(&[archive.clone()], IngestMode::Init).unwrap();

    assert_eq!(report.archives_submitted, 1);
    assert_eq!(report.archives_extracted, 1);
    assert_eq!(report.reports_parsed, 1);
    assert_eq!(report.records_validated, 1);
    assert_eq!(report.records_stored, 1);
    assert!(report.failures.is_empty(), "{:?}", report.failures);

    let record = &report.records[0];
    assert_eq!(record.estimated_battery_capacity, 4500);
    assert_eq!(record.nickname, "houji");
    assert_eq!(record.system_version, "OS1.0.5.0.UNCCNXM");
    assert_eq!(record.capture_time_string(), "2024-01-01 00:00:00");

    let digest = content_digest(&archive).unwrap();
    assert!(
        fx.root()
            .join("instance/extracted_txt")
            .join(&digest[..16])
            .join("bugreport-2024-01-01-000000.txt")
            .is_file()
    );
    let temp = fx.root().join("instance/temp");
    assert!(fs::read_dir(temp).unwrap().next().is_none());
}

#[test]
fn test_init_mode_leaves_no_residue() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    let old = fx.nested_archive("bugreport-2023-06-01-101500", &report_text("houji", "4700"));
    let new = fx.nested_archive("bugreport-2024-01-01-000000", &report_text("aurora", "5000"));

    pipeline.run(&[old], IngestMode::Append).unwrap();
    pipeline.run(&[new], IngestMode::Init).unwrap();

    let stored = pipeline.query_records(None, None).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].nickname, "aurora");
}

#[test]
fn test_failed_init_keeps_previous_rows() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    let old = fx.nested_archive("bugreport-2023-06-01-101500", &report_text("houji", "4700"));
    pipeline.run(&[old], IngestMode::Append).unwrap();

    // Distinct bundles, same capture time and device.
    let first = fx.nested_archive("bugreport-2024-01-01-000000", &report_text("houji", "4500"));
    let second = fx.nested_archive("bugreport-a-2024-01-01-000000", &report_text("houji", "4400"));
    let err = pipeline.run(&[first, second], IngestMode::Init).unwrap_err();

    assert!(matches!(err, PipelineError::Storage(StorageError::Duplicate { .. })));
    let stored = pipeline.query_records(None, None).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].capture_time_string(), "2023-06-01 10:15:00");
}

#[test]
fn test_bundles_sharing_report_name_keep_both_devices() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline_with(ConflictPolicy::Skip);
    let wrap = |upload: &str, nickname: &str| {
        let report = report_text(nickname, "4500");
        let bundle = zip_bytes(&[("bugreport-2024-01-01-000000.txt", report.as_bytes())]);
        fx.write_upload(upload, &bundle)
    };
    let houji = wrap("bugreport-houji-upload.zip", "houji");
    let aurora = wrap("bugreport-aurora-upload.zip", "aurora");

    let report = pipeline.run(&[houji, aurora], IngestMode::Init).unwrap();

    assert_eq!(report.archives_extracted, 2);
    assert_eq!(report.records_stored, 2);
    assert_eq!(report.records_skipped, 0);
    let mut nicknames: Vec<String> = pipeline
        .query_records(None, None)
        .unwrap()
        .into_iter()
        .map(|r| r.nickname)
        .collect();
    nicknames.sort();
    assert_eq!(nicknames, ["aurora", "houji"]);
}

#[test]
fn test_append_reingest_keeps_one_row_under_skip() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline_with(ConflictPolicy::Skip);
    let archive = fx.nested_archive("bugreport-2024-01-01-000000", &report_text("houji", "4500"));

    pipeline.run(&[archive.clone()], IngestMode::Append).unwrap();
    let second = pipeline.run(&[archive], IngestMode::Append).unwrap();

    assert_eq!(second.records_stored, 0);
    assert_eq!(second.records_skipped, 1);
    assert_eq!(pipeline.query_records(None, None).unwrap().len(), 1);
}

#[test]
fn test_append_reingest_surfaces_duplicate_under_abort() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    let archive = fx.nested_archive("bugreport-2024-01-01-000000", &report_text("houji", "4500"));

    pipeline.run(&[archive.clone()], IngestMode::Append).unwrap();
    let err = pipeline.run(&[archive], IngestMode::Append).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Storage(StorageError::Duplicate { ref nickname, .. }) if nickname == "houji"
    ));
    assert_eq!(pipeline.status().unwrap().row_count, 1);
}

#[test]
fn test_same_time_different_devices_store_two_rows() {
    let fx = Fixture::new();
    let houji = fx.nested_archive("bugreport-houji-2024-01-01-00-00-00", &report_text("houji", "4500"));
    let aurora = fx.nested_archive("bugreport-aurora-2024-01-01-00-00-00", &report_text("aurora", "5000"));

    let report = fx.pipeline().run(&[houji, aurora], IngestMode::Init).unwrap();

    assert_eq!(report.records_stored, 2);
    let stored = fx.pipeline().query_records(None, None).unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|r| r.capture_time_string() == "2024-01-01 00:00:00"));
}

#[test]
fn test_per_item_failures_do_not_stop_the_batch() {
    let fx = Fixture::new();
    let good = fx.nested_archive("bugreport-2024-01-01-000000", &report_text("houji", "4500"));
    let copy = fx.write_upload("bugreport-copy.zip", &fs::read(&good).unwrap());
    let corrupt = fx.write_upload("bugreport-2024-01-02-000000.zip", b"not a zip at all");
    let incomplete = fx.nested_archive(
        "bugreport-2024-01-03-000000",
        &report_text("houji", "4500").replace("  cycle count: 87\n", ""),
    );
    let empty_bundle = fx.write_upload(
        "bugreport-2024-01-04-000000.zip",
        &zip_bytes(&[("readme.md", b"no report".as_slice())]),
    );
    let wrong_name = fx.write_upload("logs.zip", b"irrelevant");

    let report = fx
        .pipeline()
        .run(
            &[good, copy.clone(), corrupt.clone(), incomplete, empty_bundle, wrong_name],
            IngestMode::Init,
        )
        .unwrap();

    assert_eq!(report.archives_submitted, 6);
    assert_eq!(report.archives_extracted, 2);
    assert_eq!(report.reports_parsed, 1);
    assert_eq!(report.records_stored, 1);

    let duplicate: Vec<_> = report.failures_in(Stage::DuplicateInput).collect();
    assert_eq!(duplicate.len(), 1);
    assert_eq!(duplicate[0].path, copy);

    assert_eq!(report.failures_in(Stage::Extract).count(), 3);
    assert!(
        report
            .failures_in(Stage::Extract)
            .any(|f| f.path == corrupt && f.reason.starts_with("bad archive"))
    );

    let parse: Vec<_> = report.failures_in(Stage::Parse).collect();
    assert_eq!(parse.len(), 1);
    assert_eq!(parse[0].reason, "missing field(s): cycle_count");
}

#[test]
fn test_import_validates_and_stores() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();

    let good: RecordMap = serde_json::from_value(serde_json::json!({
        "log_capture_time": "2024-02-01 08:00:00",
        "phone_brand": "Xiaomi",
        "nickname": "houji",
        "system_version": "OS1.0.5.0.UNCCNXM",
        "estimated_battery_capacity": 4500,
        "last_learned_battery_capacity": 4480,
        "min_learned_battery_capacity": 4400,
        "max_learned_battery_capacity": 4600,
        "cycle_count": 10,
        "hardware_capacity": 4470,
        "design_capacity": 4610
    }))
    .unwrap();
    let mut bad = good.clone();
    bad.insert("cycle_count".into(), serde_json::json!("ten"));

    let report = pipeline.import_records(vec![good, bad], IngestMode::Init).unwrap();

    assert_eq!(report.records_validated, 1);
    assert_eq!(report.records_stored, 1);
    let failures: Vec<_> = report.failures_in(Stage::Validate).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].path, PathBuf::from("record #2"));
    assert!(failures[0].reason.contains("cycle_count"));
}

#[test]
fn test_health_uses_stored_records() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    let archive = fx.nested_archive("bugreport-2024-01-01-000000", &report_text("houji", "4500"));
    pipeline.run(&[archive], IngestMode::Init).unwrap();

    let summary = pipeline.health("houji", None).unwrap().unwrap();
    assert_eq!(summary.samples, 1);
    assert_eq!(summary.rated_capacity, 4610);
    // (4480 + 4400 + 4600 + 4470) / 4 = 4487.5
    assert_eq!(summary.average_capacity, 4487.5);
    assert!(pipeline.health("aurora", None).unwrap().is_none());
}
