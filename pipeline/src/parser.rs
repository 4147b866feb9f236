//! Field extraction from a plain-text bug report.
//!
//! Every field is searched independently. A field that cannot be found is
//! simply absent; the record is only accepted when all of
//! [`REQUIRED_FIELDS`] were recovered, otherwise it is dropped with the
//! list of what was missing. Nothing here fails on "not found".
//!
//! Extracted values are placed in a [`RecordMap`] so the validator can
//! re-check them exactly as it would any externally supplied mapping.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use bugreport_battery_core::{REPORT_EXTENSION, REQUIRED_FIELDS, RecordMap, fields, parse_capture_time};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::archive::is_vendor_file_name;

/// Labelled capacity lines and the field each one fills.
pub const CAPACITY_LABELS: [(&str, &str); 4] = [
    ("Estimated battery capacity", fields::ESTIMATED_BATTERY_CAPACITY),
    ("Last learned battery capacity", fields::LAST_LEARNED_BATTERY_CAPACITY),
    ("Min learned battery capacity", fields::MIN_LEARNED_BATTERY_CAPACITY),
    ("Max learned battery capacity", fields::MAX_LEARNED_BATTERY_CAPACITY),
];

/// Build prefix of legacy releases renamed to `OS1.*`.
const LEGACY_VERSION_PREFIX: &str = "V816";

static PATTERNS: LazyLock<ReportPatterns> = LazyLock::new(ReportPatterns::new);

struct ReportPatterns {
    capacities: Vec<(Regex, &'static str)>,
    fingerprint: Regex,
    fingerprint_details: Regex,
    health_block: Regex,
    cycle_count: Regex,
    full_charge: Regex,
    design_capacity: Regex,
}

impl ReportPatterns {
    fn new() -> Self {
        let capacities = CAPACITY_LABELS
            .iter()
            .map(|(label, field)| {
                let pattern = format!(r"{}: \s*([\d.]+)\s*mAh", regex::escape(label));
                (Regex::new(&pattern).expect("static regex must compile"), *field)
            })
            .collect();

        Self {
            capacities,
            // Build fingerprint: 'Xiaomi/houji/houji:14/UKQ1.230804.001/V816.0.5.0.UNCCNXM:user/release-keys'
            fingerprint: Regex::new(r"Build fingerprint: '([^']+)'").expect("static regex must compile"),
            // <nickname>:<sdk>/<build id>/<incremental version>:
            fingerprint_details: Regex::new(r"([^/]+):\d+/\S+/([^:]+(?:\.[^/]+)+):")
                .expect("static regex must compile"),
            // From the IHealth service dump header up to its HealthInfo line.
            health_block: Regex::new(
                r"(?ms)^DUMP OF SERVICE android\.hardware\.health\.IHealth/default:\s*\n(.*?)^getHealthInfo -> HealthInfo\{",
            )
            .expect("static regex must compile"),
            cycle_count: Regex::new(r"cycle count:\s*(\d+)").expect("static regex must compile"),
            full_charge: Regex::new(r"Full charge:\s*(\d+)").expect("static regex must compile"),
            design_capacity: Regex::new(r"batteryFullChargeDesignCapacityUah:\s*(\d+)")
                .expect("static regex must compile"),
        }
    }
}

/// Why a report produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error("file name is not a bugreport*.txt report")]
    NotAReport,
    #[error("report is empty")]
    EmptyReport,
    #[error("missing field(s): {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

/// A report that produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedReport {
    pub path: PathBuf,
    pub reason: DropReason,
}

impl fmt::Display for DroppedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// Result of parsing one report file.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(RecordMap),
    Dropped(DroppedReport),
}

/// Reads and parses the report at `path`.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected.
///
/// # Errors
///
/// Only an I/O failure reading the file is an error; every other problem
/// yields [`ParseOutcome::Dropped`].
pub fn parse_report(path: &Path) -> io::Result<ParseOutcome> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let dropped = |reason| {
        Ok(ParseOutcome::Dropped(DroppedReport {
            path: path.to_path_buf(),
            reason,
        }))
    };

    if !is_vendor_file_name(file_name, REPORT_EXTENSION) {
        return dropped(DropReason::NotAReport);
    }

    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    if text.trim().is_empty() {
        return dropped(DropReason::EmptyReport);
    }

    match parse_text(file_name, &text) {
        Ok(map) => {
            debug!(path = %path.display(), "Parsed report");
            Ok(ParseOutcome::Parsed(map))
        }
        Err(reason) => dropped(reason),
    }
}

/// Extracts every field from report `text`; `file_name` supplies the
/// capture time.
///
/// # Errors
///
/// Returns [`DropReason::MissingFields`] naming each required field that
/// could not be recovered.
pub fn parse_text(file_name: &str, text: &str) -> Result<RecordMap, DropReason> {
    let mut map = RecordMap::new();

    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name);
    if let Some(time) = capture_time_from_stem(stem) {
        map.insert(fields::LOG_CAPTURE_TIME.into(), Value::from(time));
    }

    for (pattern, field) in &PATTERNS.capacities {
        // Zero capacity readings count as absent.
        if let Some(capacity) = capture_number(pattern, text).filter(|cap| *cap != 0) {
            map.insert((*field).into(), Value::from(capacity));
        }
    }

    if let Some(device) = parse_device(text) {
        map.insert(fields::PHONE_BRAND.into(), Value::from(device.brand));
        if let Some((nickname, version)) = device.details {
            map.insert(fields::NICKNAME.into(), Value::from(nickname));
            map.insert(fields::SYSTEM_VERSION.into(), Value::from(version));
        }
    }

    if let Some(block) = PATTERNS
        .health_block
        .captures(text)
        .and_then(|caps| caps.get(1))
    {
        let block = block.as_str();
        if let Some(cycles) = capture_number(&PATTERNS.cycle_count, block) {
            map.insert(fields::CYCLE_COUNT.into(), Value::from(cycles));
        }
        if let Some(uah) = capture_number(&PATTERNS.full_charge, block) {
            map.insert(fields::HARDWARE_CAPACITY.into(), Value::from(uah / 1000));
        }
    }

    if let Some(uah) = capture_number(&PATTERNS.design_capacity, text) {
        map.insert(fields::DESIGN_CAPACITY.into(), Value::from(uah / 1000));
    }

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !map.contains_key(**field))
        .map(|field| field.to_string())
        .collect();
    if missing.is_empty() {
        Ok(map)
    } else {
        Err(DropReason::MissingFields(missing))
    }
}

/// Derives `YYYY-MM-DD HH:MM:SS` from the trailing segments of a report
/// stem.
///
/// Accepts `...-YYYY-MM-DD-HH-MM-SS` and the compact
/// `...-YYYY-MM-DD-HHMMSS`. Returns `None` unless the result is a real
/// calendar timestamp.
///
/// # Examples
///
/// ```
/// use bugreport_battery_pipeline::parser::capture_time_from_stem;
///
/// assert_eq!(
///     capture_time_from_stem("bugreport-houji-UKQ1.230804.001-2024-03-09-21-05-33").as_deref(),
///     Some("2024-03-09 21:05:33"),
/// );
/// assert_eq!(
///     capture_time_from_stem("bugreport-2024-01-01-000000").as_deref(),
///     Some("2024-01-01 00:00:00"),
/// );
/// assert_eq!(capture_time_from_stem("bugreport-2024-13-01-000000"), None);
/// ```
pub fn capture_time_from_stem(stem: &str) -> Option<String> {
    fn is_digits(s: &str, len: usize) -> bool {
        s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
    }

    let segments: Vec<&str> = stem.split('-').collect();

    let candidate = match segments.as_slice() {
        [.., y, mo, d, h, mi, s]
            if is_digits(y, 4) && [mo, d, h, mi, s].iter().all(|part| is_digits(part, 2)) =>
        {
            format!("{y}-{mo}-{d} {h}:{mi}:{s}")
        }
        [.., y, mo, d, hms] if is_digits(y, 4) && is_digits(mo, 2) && is_digits(d, 2) && is_digits(hms, 6) => {
            format!("{y}-{mo}-{d} {}:{}:{}", &hms[0..2], &hms[2..4], &hms[4..6])
        }
        _ => return None,
    };

    parse_capture_time(&candidate).map(|_| candidate)
}

/// Rewrites legacy `V816.*` versions to `OS1.*`; others pass through.
pub fn normalize_system_version(raw: &str) -> String {
    match raw.split_once('.') {
        Some((_, rest)) if raw.starts_with(LEGACY_VERSION_PREFIX) => format!("OS1.{rest}"),
        _ => raw.to_string(),
    }
}

struct DeviceInfo {
    brand: String,
    details: Option<(String, String)>,
}

fn parse_device(text: &str) -> Option<DeviceInfo> {
    let fingerprint = PATTERNS.fingerprint.captures(text)?.get(1)?.as_str();
    let brand = fingerprint.split('/').next().unwrap_or_default().to_string();

    let details = PATTERNS
        .fingerprint_details
        .captures(fingerprint)
        .and_then(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .map(|(nickname, version)| (nickname.to_string(), normalize_system_version(version)));

    Some(DeviceInfo {
        brand: (!brand.is_empty()).then_some(brand)?,
        details,
    })
}

/// First capture of `pattern` read as a number and truncated.
fn capture_number(pattern: &Regex, text: &str) -> Option<i64> {
    let raw = pattern.captures(text)?.get(1)?.as_str();
    let value = raw.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(value.trunc() as i64)
}
