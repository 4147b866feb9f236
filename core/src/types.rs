//! Record type definitions and naming conventions.
//!
//! The vendor's bug-report tool names every artifact
//! `<prefix>-...-<YYYY>-<MM>-<DD>-<time>.<ext>`; the prefix and extensions
//! below are load-bearing for both archive traversal and capture-time
//! recovery.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// File-name prefix shared by every archive and report the vendor tool emits.
pub const VENDOR_PREFIX: &str = "bugreport";

/// Extension of (possibly nested) archive bundles.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Extension of the plain-text diagnostic report.
pub const REPORT_EXTENSION: &str = "txt";

/// Canonical textual form of `log_capture_time`.
pub const CAPTURE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Version of the record schema.
///
/// Version 1 carried only the capacity and fingerprint fields. Version 2
/// added the hardware block (`cycle_count`, `hardware_capacity`) and
/// `design_capacity`, all required.
pub const RECORD_SCHEMA_VERSION: u32 = 2;

/// Field names, matching the column names of the `analysis_results` table.
pub mod fields {
    pub const LOG_CAPTURE_TIME: &str = "log_capture_time";
    pub const PHONE_BRAND: &str = "phone_brand";
    pub const NICKNAME: &str = "nickname";
    pub const SYSTEM_VERSION: &str = "system_version";
    pub const ESTIMATED_BATTERY_CAPACITY: &str = "estimated_battery_capacity";
    pub const LAST_LEARNED_BATTERY_CAPACITY: &str = "last_learned_battery_capacity";
    pub const MIN_LEARNED_BATTERY_CAPACITY: &str = "min_learned_battery_capacity";
    pub const MAX_LEARNED_BATTERY_CAPACITY: &str = "max_learned_battery_capacity";
    pub const CYCLE_COUNT: &str = "cycle_count";
    pub const HARDWARE_CAPACITY: &str = "hardware_capacity";
    pub const DESIGN_CAPACITY: &str = "design_capacity";
}

/// Fields stored as text.
pub const TEXT_FIELDS: &[&str] = &[
    fields::LOG_CAPTURE_TIME,
    fields::PHONE_BRAND,
    fields::NICKNAME,
    fields::SYSTEM_VERSION,
];

/// Fields that must hold integers.
pub const NUMERIC_FIELDS: &[&str] = &[
    fields::ESTIMATED_BATTERY_CAPACITY,
    fields::LAST_LEARNED_BATTERY_CAPACITY,
    fields::MIN_LEARNED_BATTERY_CAPACITY,
    fields::MAX_LEARNED_BATTERY_CAPACITY,
    fields::CYCLE_COUNT,
    fields::HARDWARE_CAPACITY,
    fields::DESIGN_CAPACITY,
];

/// Every field a record needs to be accepted, in column order.
pub const REQUIRED_FIELDS: &[&str] = &[
    fields::LOG_CAPTURE_TIME,
    fields::PHONE_BRAND,
    fields::NICKNAME,
    fields::SYSTEM_VERSION,
    fields::ESTIMATED_BATTERY_CAPACITY,
    fields::LAST_LEARNED_BATTERY_CAPACITY,
    fields::MIN_LEARNED_BATTERY_CAPACITY,
    fields::MAX_LEARNED_BATTERY_CAPACITY,
    fields::CYCLE_COUNT,
    fields::HARDWARE_CAPACITY,
    fields::DESIGN_CAPACITY,
];

/// Loosely typed field mapping.
///
/// This is what crosses the worker boundary out of the parser, and what
/// external record sets are read as. It becomes a [`BatteryRecord`] only
/// after [`validate_record`](crate::validate_record) accepts it.
pub type RecordMap = serde_json::Map<String, Value>;

/// One battery-health sample captured from a single diagnostic report.
///
/// `(log_capture_time, nickname)` identifies a record: the same device
/// cannot contribute two samples for the same captured moment.
///
/// # Examples
///
/// ```
/// use bugreport_battery_core::{BatteryRecord, parse_capture_time};
///
/// let record = BatteryRecord {
///     log_capture_time: parse_capture_time("2024-03-02 08:15:00").unwrap(),
///     phone_brand: "Xiaomi".into(),
///     nickname: "houji".into(),
///     system_version: "OS1.0.5.0.UNCCNXM".into(),
///     estimated_battery_capacity: 4500,
///     last_learned_battery_capacity: 4480,
///     min_learned_battery_capacity: 4400,
///     max_learned_battery_capacity: 4600,
///     cycle_count: 120,
///     hardware_capacity: 4470,
///     design_capacity: 4610,
/// };
/// assert_eq!(record.capture_time_string(), "2024-03-02 08:15:00");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryRecord {
    #[serde(with = "capture_time_serde")]
    pub log_capture_time: NaiveDateTime,
    pub phone_brand: String,
    pub nickname: String,
    pub system_version: String,
    /// Milliamp-hours.
    pub estimated_battery_capacity: i64,
    /// Milliamp-hours.
    pub last_learned_battery_capacity: i64,
    /// Milliamp-hours.
    pub min_learned_battery_capacity: i64,
    /// Milliamp-hours.
    pub max_learned_battery_capacity: i64,
    pub cycle_count: i64,
    /// Full-charge capacity reported by the health HAL, in milliamp-hours.
    pub hardware_capacity: i64,
    /// Milliamp-hours.
    pub design_capacity: i64,
}

impl BatteryRecord {
    /// Returns `log_capture_time` in its canonical `YYYY-MM-DD HH:MM:SS` form.
    pub fn capture_time_string(&self) -> String {
        self.log_capture_time.format(CAPTURE_TIME_FORMAT).to_string()
    }

    /// Converts the record back into its field mapping.
    pub fn to_map(&self) -> RecordMap {
        let mut map = RecordMap::new();
        map.insert(
            fields::LOG_CAPTURE_TIME.into(),
            Value::String(self.capture_time_string()),
        );
        map.insert(fields::PHONE_BRAND.into(), self.phone_brand.clone().into());
        map.insert(fields::NICKNAME.into(), self.nickname.clone().into());
        map.insert(fields::SYSTEM_VERSION.into(), self.system_version.clone().into());
        for field in NUMERIC_FIELDS {
            if let Some(value) = self.numeric(field) {
                map.insert((*field).into(), value.into());
            }
        }
        map
    }

    /// Looks up a numeric field by its column name.
    pub fn numeric(&self, field: &str) -> Option<i64> {
        let value = match field {
            fields::ESTIMATED_BATTERY_CAPACITY => self.estimated_battery_capacity,
            fields::LAST_LEARNED_BATTERY_CAPACITY => self.last_learned_battery_capacity,
            fields::MIN_LEARNED_BATTERY_CAPACITY => self.min_learned_battery_capacity,
            fields::MAX_LEARNED_BATTERY_CAPACITY => self.max_learned_battery_capacity,
            fields::CYCLE_COUNT => self.cycle_count,
            fields::HARDWARE_CAPACITY => self.hardware_capacity,
            fields::DESIGN_CAPACITY => self.design_capacity,
            _ => return None,
        };
        Some(value)
    }
}

/// Parses a canonical `YYYY-MM-DD HH:MM:SS` capture time.
pub fn parse_capture_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), CAPTURE_TIME_FORMAT).ok()
}

mod capture_time_serde {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de};

    use super::CAPTURE_TIME_FORMAT;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&value.format(CAPTURE_TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, CAPTURE_TIME_FORMAT).map_err(de::Error::custom)
    }
}
