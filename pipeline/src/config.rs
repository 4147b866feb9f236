//! Pipeline configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working setup rooted at `instance/`.
//!
//! # Example YAML
//!
//! ```yaml
//! instance_dir: instance
//! database: instance/database.db
//! output_dir: instance/extracted_txt
//! temp_dir: instance/temp
//! performance_mode: balanced
//! conflict_policy: skip
//! reference_capacities: data/capacities.json
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use bugreport_battery_core::{ConflictPolicy, PerformanceMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Locations and knobs for an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root for all generated files.
    pub instance_dir: PathBuf,
    /// SQLite database; defaults to `<instance_dir>/database.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Where recovered reports are kept; defaults to `<instance_dir>/extracted_txt`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Parent of per-extraction scratch directories; defaults to `<instance_dir>/temp`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    pub performance_mode: PerformanceMode,
    pub conflict_policy: ConflictPolicy,
    /// JSON table of rated capacities per nickname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_capacities: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            instance_dir: PathBuf::from("instance"),
            database: None,
            output_dir: None,
            temp_dir: None,
            performance_mode: PerformanceMode::default(),
            conflict_policy: ConflictPolicy::default(),
            reference_capacities: None,
        }
    }
}

impl PipelineConfig {
    /// Default layout under `instance_dir`.
    pub fn with_instance_dir(instance_dir: impl Into<PathBuf>) -> Self {
        Self {
            instance_dir: instance_dir.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        // An empty document deserializes to unit, not a map.
        let value: serde_yaml::Value = serde_yaml::from_reader(reader)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_value(value)?)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.instance_dir.join("database.db"))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.instance_dir.join("extracted_txt"))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.instance_dir.join("temp"))
    }
}
