//! Rated capacities per device, read from a JSON table.
//!
//! The table maps a device nickname either to a capacity in mAh or to a
//! map of hardware variants to capacities:
//!
//! ```json
//! { "houji": 4610, "aurora": { "standard": 5000, "pro": 5300 } }
//! ```
//!
//! [`ReferenceCapacities`] reads the file at most once, on first lookup, and
//! keeps the parsed table for as long as the value itself lives.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("cannot read reference table {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid reference table {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("reference table {}: {message}", path.display())]
    Unavailable { path: PathBuf, message: String },
}

/// One table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RatedCapacity {
    Single(i64),
    Variants(BTreeMap<String, i64>),
}

impl RatedCapacity {
    /// Capacity of `variant`, or of the first variant by name when `None`.
    pub fn resolve(&self, variant: Option<&str>) -> Option<i64> {
        match (self, variant) {
            (Self::Single(mah), _) => Some(*mah),
            (Self::Variants(map), Some(name)) => map.get(name).copied(),
            (Self::Variants(map), None) => map.values().next().copied(),
        }
    }
}

pub type CapacityTable = BTreeMap<String, RatedCapacity>;

/// Lazily loaded rated-capacity table.
#[derive(Debug)]
pub struct ReferenceCapacities {
    path: PathBuf,
    table: OnceLock<Result<CapacityTable, String>>,
}

impl ReferenceCapacities {
    /// Creates a cache for the table at `path` without touching the disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: OnceLock::new(),
        }
    }

    /// Builds a cache that is already loaded with `table`.
    pub fn from_table(table: CapacityTable) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Ok(table));
        Self {
            path: PathBuf::new(),
            table: cell,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the table, reading it on the first call.
    ///
    /// A failed first read is remembered; later calls report the same
    /// failure without retrying.
    pub fn table(&self) -> Result<&CapacityTable, ReferenceError> {
        let loaded = self.table.get_or_init(|| {
            debug!(path = %self.path.display(), "Loading reference capacities");
            load_table(&self.path).map_err(|e| e.to_string())
        });
        loaded.as_ref().map_err(|message| ReferenceError::Unavailable {
            path: self.path.clone(),
            message: message.clone(),
        })
    }

    /// Rated capacity for `nickname`, if the table lists it.
    pub fn rated(&self, nickname: &str, variant: Option<&str>) -> Result<Option<i64>, ReferenceError> {
        Ok(self
            .table()?
            .get(nickname)
            .and_then(|entry| entry.resolve(variant)))
    }
}

fn load_table(path: &Path) -> Result<CapacityTable, ReferenceError> {
    let text = fs::read_to_string(path).map_err(|source| ReferenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ReferenceError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_and_variant_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capacities.json");
        fs::write(
            &path,
            r#"{ "houji": 4610, "aurora": { "standard": 5000, "pro": 5300 } }"#,
        )
        .unwrap();

        let refs = ReferenceCapacities::new(&path);
        assert_eq!(refs.rated("houji", None).unwrap(), Some(4610));
        assert_eq!(refs.rated("houji", Some("pro")).unwrap(), Some(4610));
        assert_eq!(refs.rated("aurora", Some("standard")).unwrap(), Some(5000));
        assert_eq!(refs.rated("aurora", None).unwrap(), Some(5300));
        assert_eq!(refs.rated("aurora", Some("ultra")).unwrap(), None);
        assert_eq!(refs.rated("unknown", None).unwrap(), None);
    }

    #[test]
    fn test_table_read_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capacities.json");
        fs::write(&path, r#"{ "houji": 4610 }"#).unwrap();

        let refs = ReferenceCapacities::new(&path);
        assert_eq!(refs.rated("houji", None).unwrap(), Some(4610));

        fs::write(&path, r#"{ "houji": 1 }"#).unwrap();
        assert_eq!(refs.rated("houji", None).unwrap(), Some(4610));
    }

    #[test]
    fn test_missing_or_invalid_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let refs = ReferenceCapacities::new(dir.path().join("missing.json"));
        assert!(matches!(
            refs.rated("houji", None),
            Err(ReferenceError::Unavailable { .. })
        ));

        let path = dir.path().join("bad.json");
        fs::write(&path, "[1, 2]").unwrap();
        let err = ReferenceCapacities::new(&path).table().unwrap_err();
        assert!(err.to_string().contains("invalid reference table"));
    }

    #[test]
    fn test_from_table_skips_disk() {
        let mut table = CapacityTable::new();
        table.insert("houji".into(), RatedCapacity::Single(4610));
        let refs = ReferenceCapacities::from_table(table);
        assert_eq!(refs.rated("houji", None).unwrap(), Some(4610));
    }
}
