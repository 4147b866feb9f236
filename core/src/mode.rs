//! Performance, ingestion, and conflict selectors plus worker-pool sizing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unrecognised selector value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("invalid {kind} '{value}': expected one of {expected}")]
    InvalidMode {
        kind: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// User-selected tier trading throughput against system responsiveness.
///
/// # Examples
///
/// ```
/// use bugreport_battery_core::PerformanceMode;
///
/// assert_eq!(PerformanceMode::default(), PerformanceMode::Balanced);
/// assert_eq!("high".parse::<PerformanceMode>().unwrap(), PerformanceMode::High);
/// assert!("turbo".parse::<PerformanceMode>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    Low,
    #[default]
    Balanced,
    High,
}

impl PerformanceMode {
    /// Fixed worker ceiling for this tier, independent of core count.
    pub fn ceiling(self) -> usize {
        match self {
            Self::Low => 4,
            Self::Balanced => 6,
            Self::High => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Balanced => "balanced",
            Self::High => "high",
        }
    }
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerformanceMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "balanced" => Ok(Self::Balanced),
            "high" => Ok(Self::High),
            _ => Err(ModeError::InvalidMode {
                kind: "performance mode",
                value: s.to_string(),
                expected: "low, balanced, high",
            }),
        }
    }
}

/// How a batch is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Drop and recreate the table, then insert. Destructive full reload.
    Init,
    /// Insert into the existing table. The uniqueness index rejects exact
    /// `(log_capture_time, nickname)` duplicates.
    #[default]
    Append,
}

impl IngestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Append => "append",
        }
    }
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "init" => Ok(Self::Init),
            "append" => Ok(Self::Append),
            _ => Err(ModeError::InvalidMode {
                kind: "ingestion mode",
                value: s.to_string(),
                expected: "init, append",
            }),
        }
    }
}

/// What a bulk insert does when a row collides with the uniqueness index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The whole batch is one transaction; the first collision rolls it
    /// back and is reported as an error.
    #[default]
    Abort,
    /// Colliding rows are skipped; every other row commits.
    Skip,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            _ => Err(ModeError::InvalidMode {
                kind: "conflict policy",
                value: s.to_string(),
                expected: "abort, skip",
            }),
        }
    }
}

/// Number of workers to run for `file_count` units of work.
///
/// Each tier takes a share of the cores, never fewer than one, then caps it
/// at the tier's fixed ceiling and at the amount of work available:
///
/// - `low`: `min(max(cores / 2, 1), files, 4)`
/// - `balanced`: `min(max(floor(cores * 0.75), 1), files, 6)`
/// - `high`: `min(cores, files, 8)`
///
/// Returns `0` only when there is no work.
///
/// # Examples
///
/// ```
/// use bugreport_battery_core::{PerformanceMode, workers};
///
/// assert_eq!(workers(PerformanceMode::Low, 10, 16), 4);
/// assert_eq!(workers(PerformanceMode::Balanced, 10, 4), 3);
/// assert_eq!(workers(PerformanceMode::High, 2, 16), 2);
/// assert_eq!(workers(PerformanceMode::High, 0, 16), 0);
/// ```
pub fn workers(mode: PerformanceMode, file_count: usize, core_count: usize) -> usize {
    let cores = core_count.max(1);
    let share = match mode {
        PerformanceMode::Low => (cores / 2).max(1),
        PerformanceMode::Balanced => (cores * 3 / 4).max(1),
        PerformanceMode::High => cores,
    };
    share.min(file_count).min(mode.ceiling())
}

/// Logical cores visible to this process, falling back to one.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(1)
}
