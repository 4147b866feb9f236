//! Bug-report battery ingestion pipeline.
//!
//! Takes vendor bug-report bundles through four phases:
//!
//! 1. [`archive`] recovers the diagnostic report from each (possibly nested)
//!    zip bundle.
//! 2. [`parser`] pulls battery fields out of the report text.
//! 3. Records are validated with
//!    [`validate_records`](bugreport_battery_core::validate_records).
//! 4. Valid records are written through
//!    [`bugreport_battery_sqlite::RecordStore`].
//!
//! [`Pipeline`] runs the phases over a batch and returns a [`BatchReport`].

pub mod archive;
pub mod config;
pub mod parser;
pub mod pipeline;
pub mod reference;
pub mod report;

pub use archive::{ArchiveError, ExtractedReport, MAX_NESTING_DEPTH, content_digest, extract};
pub use config::{ConfigError, PipelineConfig};
pub use parser::{DropReason, DroppedReport, ParseOutcome, parse_report, parse_text};
pub use pipeline::{Pipeline, PipelineError, Result};
pub use reference::{CapacityTable, RatedCapacity, ReferenceCapacities, ReferenceError};
pub use report::{BatchReport, ItemFailure, Stage};
