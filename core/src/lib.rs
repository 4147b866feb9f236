//! Core record types and shared primitives for bug-report battery ingestion.
//!
//! This crate defines the data model that flows through the ingestion
//! pipeline and the policies that do not depend on I/O:
//!
//! - [`BatteryRecord`]: one validated, persistable battery-health sample.
//! - [`RecordMap`]: the loosely typed field mapping produced by the parser
//!   and accepted from external record sets before validation.
//! - [`PerformanceMode`] and [`workers`]: worker-pool sizing policy.
//! - [`IngestMode`] and [`ConflictPolicy`]: persistence selectors.
//! - Validation ([`validate_record`], [`validate_records`]): presence and
//!   integer-type checks that turn a [`RecordMap`] into a [`BatteryRecord`].
//! - Health analysis ([`plausible_records`], [`HealthSummary`]): the
//!   capacity filtering and health arithmetic charting consumers rely on.
//!
//! # Example
//!
//! ```
//! use bugreport_battery_core::*;
//!
//! let mut map = RecordMap::new();
//! map.insert(fields::LOG_CAPTURE_TIME.into(), "2024-01-01 12:30:45".into());
//! map.insert(fields::PHONE_BRAND.into(), "Xiaomi".into());
//! map.insert(fields::NICKNAME.into(), "houji".into());
//! map.insert(fields::SYSTEM_VERSION.into(), "OS1.0.5.0.UNCCNXM".into());
//! for field in NUMERIC_FIELDS {
//!     map.insert((*field).into(), 4500.into());
//! }
//!
//! let record = validate_record(&map).unwrap();
//! assert_eq!(record.nickname, "houji");
//! assert_eq!(workers(PerformanceMode::High, 3, 16), 3);
//! ```

mod health;
mod mode;
mod types;
mod validate;

pub use health::{
    HEALTH_WINDOW, HealthBand, HealthSummary, PLAUSIBLE_CAPACITY_MAX, PLAUSIBLE_CAPACITY_MIN,
    is_plausible, plausible_records,
};
pub use mode::{ConflictPolicy, IngestMode, ModeError, PerformanceMode, available_cores, workers};
pub use types::*;
pub use validate::{RecordFailure, ValidationError, ValidationReport, validate_record, validate_records};
