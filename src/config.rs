//! Explicit pipeline configuration.
//!
//! A [`PipelineConfig`] is built from an optional YAML file and then patched
//! with command-line overrides. Nothing here is process-global; the value is
//! handed to [`crate::pipeline::Pipeline::new`] and owned by it.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    derive::DerivedColumn,
    error::PipelineError,
    source::SourceOptions,
};

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_DATABASE: &str = "tabload.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
    #[serde(default)]
    pub dedup: Option<DedupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE),
            create_if_missing: true,
            busy_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    pub source: PathBuf,
    pub table: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default, deserialize_with = "deserialize_delimiter")]
    pub delimiter: Option<u8>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub skip_repeated_headers: bool,
    #[serde(default)]
    pub numeric_columns: Vec<String>,
    #[serde(default)]
    pub derived: Vec<DerivedColumn>,
}

impl IngestConfig {
    pub fn new(source: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            table: table.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            delimiter: None,
            encoding: None,
            sheet: None,
            skip_repeated_headers: false,
            numeric_columns: Vec::new(),
            derived: Vec::new(),
        }
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            delimiter: self.delimiter,
            encoding: self.encoding.clone(),
            sheet: self.sheet.clone(),
            skip_repeated_headers: self.skip_repeated_headers,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.table.trim().is_empty() {
            return Err(PipelineError::Config("ingest table name is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::Config(
                "batch size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupConfig {
    pub table: String,
    pub group_key: String,
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    #[serde(default)]
    pub dry_run: bool,
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.table.trim().is_empty() {
            return Err(PipelineError::Config("dedup table name is empty".into()));
        }
        if self.group_key.trim().is_empty() {
            return Err(PipelineError::Config("dedup group key is empty".into()));
        }
        if let Some(filter) = &self.filter
            && filter.column.trim().is_empty()
        {
            return Err(PipelineError::Config("dedup filter column is empty".into()));
        }
        Ok(())
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .with_context(|| format!("Reading config file {path:?}"))?;
        Self::from_yaml(&raw).with_context(|| format!("Parsing config file {path:?}"))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.destination.path.as_os_str().is_empty() {
            return Err(PipelineError::Config("destination path is empty".into()));
        }
        if let Some(ingest) = &self.ingest {
            ingest.validate()?;
        }
        if let Some(dedup) = &self.dedup {
            dedup.validate()?;
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn deserialize_delimiter<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|value| crate::cli::parse_delimiter(&value).map_err(serde::de::Error::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_config_fills_defaults() {
        let config = PipelineConfig::from_yaml(
            r#"
destination:
  path: storage.db
ingest:
  source: samples.csv
  table: firewall_samples
  delimiter: semicolon
dedup:
  table: firewall_samples
  group_key: Temporary Cabinet
  filter:
    column: Category
    value: available cabinet
"#,
        )
        .expect("parse config");
        assert!(config.destination.create_if_missing);
        let ingest = config.ingest.as_ref().expect("ingest section");
        assert_eq!(ingest.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(ingest.delimiter, Some(b';'));
        let dedup = config.dedup.as_ref().expect("dedup section");
        assert_eq!(dedup.group_key, "Temporary Cabinet");
        assert!(!dedup.dry_run);
        config.validate().expect("valid");
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut ingest = IngestConfig::new("a.csv", "t");
        ingest.batch_size = 0;
        assert!(matches!(ingest.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PipelineConfig::from_yaml("destination:\n  host: db.example\n").is_err());
    }
}
