//! End-of-batch reporting.

use std::path::PathBuf;

use bugreport_battery_core::BatteryRecord;
use serde::{Deserialize, Serialize};

/// Pipeline phase in which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Archive content repeats an earlier archive in the same batch.
    DuplicateInput,
    Extract,
    Parse,
    Validate,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateInput => "duplicate_input",
            Self::Extract => "extract",
            Self::Parse => "parse",
            Self::Validate => "validate",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item that did not make it to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub stage: Stage,
    /// Source path, or `record #<n>` for records without a file.
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.path.display(), self.reason)
    }
}

/// Counts and failures for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub archives_submitted: usize,
    pub archives_extracted: usize,
    pub reports_parsed: usize,
    pub records_validated: usize,
    pub records_stored: usize,
    /// Records left out as duplicates under the skip conflict policy.
    pub records_skipped: usize,
    pub failures: Vec<ItemFailure>,
    /// Records that passed validation, in input order.
    pub records: Vec<BatteryRecord>,
}

impl BatchReport {
    pub(crate) fn fail(&mut self, stage: Stage, path: impl Into<PathBuf>, reason: impl ToString) {
        self.failures.push(ItemFailure {
            stage,
            path: path.into(),
            reason: reason.to_string(),
        });
    }

    /// Failures recorded for `stage`.
    pub fn failures_in(&self, stage: Stage) -> impl Iterator<Item = &ItemFailure> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// One-line count summary.
    pub fn summary(&self) -> String {
        format!(
            "{} archives submitted, {} extracted, {} reports parsed, {} records validated, \
             {} stored, {} skipped, {} failures",
            self.archives_submitted,
            self.archives_extracted,
            self.reports_parsed,
            self.records_validated,
            self.records_stored,
            self.records_skipped,
            self.failures.len()
        )
    }
}
