//! Record validation.
//!
//! Turns loosely typed [`RecordMap`]s into [`BatteryRecord`]s. Every record
//! in a batch is checked independently; failures are aggregated into one
//! [`ValidationReport`] while valid records proceed.
//!
//! Validation only checks presence and type. Physically implausible
//! capacities are filtered later by consumers (see
//! [`plausible_records`](crate::plausible_records)).
//!
//! # Examples
//!
//! ```
//! use bugreport_battery_core::*;
//!
//! let mut incomplete = RecordMap::new();
//! incomplete.insert(fields::NICKNAME.into(), "houji".into());
//!
//! let (valid, report) = validate_records(vec![incomplete]);
//! assert!(valid.is_empty());
//! assert_eq!(report.failures.len(), 1);
//! assert!(matches!(report.failures[0].errors[0], ValidationError::MissingFields(_)));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{
    BatteryRecord, NUMERIC_FIELDS, REQUIRED_FIELDS, RecordMap, TEXT_FIELDS, fields,
    parse_capture_time,
};

/// One problem found on one record.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ValidationError {
    /// Required fields are absent or null.
    #[error("missing field(s): {}", .0.join(", "))]
    MissingFields(Vec<String>),
    /// Numeric fields hold something other than an integer.
    #[error("field(s) must be int: {}", .0.join(", "))]
    NotInteger(Vec<String>),
    /// Text fields hold something other than a non-empty string.
    #[error("field(s) must be non-empty text: {}", .0.join(", "))]
    NotText(Vec<String>),
    /// `log_capture_time` is not a `YYYY-MM-DD HH:MM:SS` timestamp.
    #[error("invalid capture time '{0}': expected YYYY-MM-DD HH:MM:SS")]
    InvalidCaptureTime(String),
}

/// All problems found on one record of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// One-based position within the validated batch.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_capture_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub errors: Vec<ValidationError>,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reasons: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(
            f,
            "[Record {}] LogTime {}: {}",
            self.index,
            self.log_capture_time.as_deref().unwrap_or("unknown"),
            reasons.join("; ")
        )
    }
}

/// Combined validation report for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub failures: Vec<RecordFailure>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data validation failed with {} errors:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n    {failure}")?;
        }
        Ok(())
    }
}

/// Validates a single record mapping.
///
/// Collects every problem rather than stopping at the first one. A missing
/// field is reported once as missing and not again as mistyped.
///
/// # Errors
///
/// Returns the full list of [`ValidationError`]s when the mapping cannot
/// become a [`BatteryRecord`].
pub fn validate_record(map: &RecordMap) -> Result<BatteryRecord, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| map.get(*field).is_none_or(Value::is_null))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        errors.push(ValidationError::MissingFields(missing.clone()));
    }
    let present = |field: &&str| !missing.iter().any(|m| m == *field);

    let not_text: Vec<String> = TEXT_FIELDS
        .iter()
        .copied()
        .filter(present)
        .filter(|field| !map[*field].as_str().is_some_and(|s| !s.trim().is_empty()))
        .map(str::to_string)
        .collect();
    if !not_text.is_empty() {
        errors.push(ValidationError::NotText(not_text.clone()));
    }

    let not_integer: Vec<String> = NUMERIC_FIELDS
        .iter()
        .copied()
        .filter(present)
        .filter(|field| map[*field].as_i64().is_none())
        .map(str::to_string)
        .collect();
    if !not_integer.is_empty() {
        errors.push(ValidationError::NotInteger(not_integer));
    }

    let capture_time = map
        .get(fields::LOG_CAPTURE_TIME)
        .and_then(Value::as_str)
        .filter(|_| !not_text.iter().any(|f| f == fields::LOG_CAPTURE_TIME));
    let parsed_time = capture_time.and_then(parse_capture_time);
    if let (Some(raw), None) = (capture_time, parsed_time) {
        errors.push(ValidationError::InvalidCaptureTime(raw.to_string()));
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    let Some(log_capture_time) = parsed_time else {
        return Err(vec![ValidationError::MissingFields(vec![
            fields::LOG_CAPTURE_TIME.to_string(),
        ])]);
    };

    let text = |field: &str| map[field].as_str().unwrap_or_default().to_string();
    let int = |field: &str| map[field].as_i64().unwrap_or_default();

    Ok(BatteryRecord {
        log_capture_time,
        phone_brand: text(fields::PHONE_BRAND),
        nickname: text(fields::NICKNAME),
        system_version: text(fields::SYSTEM_VERSION),
        estimated_battery_capacity: int(fields::ESTIMATED_BATTERY_CAPACITY),
        last_learned_battery_capacity: int(fields::LAST_LEARNED_BATTERY_CAPACITY),
        min_learned_battery_capacity: int(fields::MIN_LEARNED_BATTERY_CAPACITY),
        max_learned_battery_capacity: int(fields::MAX_LEARNED_BATTERY_CAPACITY),
        cycle_count: int(fields::CYCLE_COUNT),
        hardware_capacity: int(fields::HARDWARE_CAPACITY),
        design_capacity: int(fields::DESIGN_CAPACITY),
    })
}

/// Validates a batch, never stopping at the first bad record.
///
/// Returns the records that passed, in input order, and a report covering
/// every record that did not.
pub fn validate_records(
    records: impl IntoIterator<Item = RecordMap>,
) -> (Vec<BatteryRecord>, ValidationReport) {
    let mut valid = Vec::new();
    let mut report = ValidationReport::default();

    for (i, map) in records.into_iter().enumerate() {
        match validate_record(&map) {
            Ok(record) => valid.push(record),
            Err(errors) => report.failures.push(RecordFailure {
                index: i + 1,
                log_capture_time: map
                    .get(fields::LOG_CAPTURE_TIME)
                    .and_then(Value::as_str)
                    .map(str::to_string),
                nickname: map
                    .get(fields::NICKNAME)
                    .and_then(Value::as_str)
                    .map(str::to_string),
                errors,
            }),
        }
    }

    (valid, report)
}
