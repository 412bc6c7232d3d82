use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};

use crate::{
    config::{DedupConfig, FilterConfig, IngestConfig},
    derive::parse_derived_columns,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load CSV and spreadsheet data into SQLite and resolve duplicate rows",
    long_about = None
)]
pub struct Cli {
    /// YAML pipeline configuration (destination, ingest and dedup sections)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// SQLite database file; overrides the configured destination
    #[arg(short = 'd', long, global = true)]
    pub database: Option<PathBuf>,
    /// Print the run report as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Replace a table with the contents of a CSV/TSV file or spreadsheet
    Ingest(IngestArgs),
    /// Delete all but one row for every duplicated key
    Dedup(DedupArgs),
    /// Run the ingest and dedup sections of the configuration file
    Run,
    /// Show the table an ingest would create without loading anything
    Schema(SchemaArgs),
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Input file (.csv, .tsv, .xlsx, .xls, .ods, ...)
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Delimiter for text input (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of text input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Worksheet to read from a spreadsheet (defaults to the first)
    #[arg(long)]
    pub sheet: Option<String>,
    /// Drop data rows that repeat the header row
    #[arg(long = "skip-repeated-headers")]
    pub skip_repeated_headers: bool,
    /// Additional column names to store as integers
    #[arg(long = "numeric", value_delimiter = ',', action = clap::ArgAction::Append)]
    pub numeric: Vec<String>,
    /// Derived lookup columns such as `role=Level:1=admin,2=user,*=guest`
    #[arg(long = "derive", action = clap::ArgAction::Append)]
    pub derives: Vec<String>,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Destination table name
    #[arg(short = 't', long)]
    pub table: Option<String>,
    /// Rows per multi-row insert
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Table name to show in the preview
    #[arg(short = 't', long)]
    pub table: Option<String>,
}

#[derive(Debug, Args)]
pub struct DedupArgs {
    /// Table to clean up
    #[arg(short = 't', long)]
    pub table: Option<String>,
    /// Column whose values must be unique
    #[arg(short = 'k', long = "key")]
    pub key: Option<String>,
    /// Only rows whose column matches --filter-value take part
    #[arg(long = "filter-column", requires = "filter_value")]
    pub filter_column: Option<String>,
    /// Value compared case-insensitively after trimming spaces
    #[arg(long = "filter-value", requires = "filter_column")]
    pub filter_value: Option<String>,
    /// Report duplicates without deleting them
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

impl SourceArgs {
    fn apply(&self, config: &mut IngestConfig) -> Result<()> {
        if let Some(input) = &self.input {
            config.source = input.clone();
        }
        if self.delimiter.is_some() {
            config.delimiter = self.delimiter;
        }
        if self.input_encoding.is_some() {
            config.encoding = self.input_encoding.clone();
        }
        if self.sheet.is_some() {
            config.sheet = self.sheet.clone();
        }
        config.skip_repeated_headers |= self.skip_repeated_headers;
        config.numeric_columns.extend(
            self.numeric
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        );
        config.derived.extend(parse_derived_columns(&self.derives)?);
        Ok(())
    }

    fn base_config(&self, base: Option<IngestConfig>, table: Option<&str>) -> Result<IngestConfig> {
        let mut config = match (base, &self.input) {
            (Some(config), _) => config,
            (None, Some(input)) => {
                let table = table.ok_or_else(|| anyhow!("--table is required for ingest"))?;
                IngestConfig::new(input.clone(), table)
            }
            (None, None) => return Err(anyhow!("--input is required without an ingest config")),
        };
        if let Some(table) = table {
            config.table = table.to_string();
        }
        self.apply(&mut config)?;
        Ok(config)
    }
}

impl IngestArgs {
    /// Overlays the command-line options on the configured ingest section.
    pub fn merge(&self, base: Option<IngestConfig>) -> Result<IngestConfig> {
        let mut config = self.source.base_config(base, self.table.as_deref())?;
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        Ok(config)
    }
}

impl SchemaArgs {
    pub fn merge(&self, base: Option<IngestConfig>) -> Result<IngestConfig> {
        let table = self
            .table
            .clone()
            .or_else(|| base.as_ref().map(|b| b.table.clone()))
            .unwrap_or_else(|| "preview".to_string());
        self.source.base_config(base, Some(&table))
    }
}

impl DedupArgs {
    pub fn merge(&self, base: Option<DedupConfig>) -> Result<DedupConfig> {
        let mut config = match base {
            Some(config) => config,
            None => DedupConfig {
                table: self
                    .table
                    .clone()
                    .ok_or_else(|| anyhow!("--table is required for dedup"))?,
                group_key: self
                    .key
                    .clone()
                    .ok_or_else(|| anyhow!("--key is required for dedup"))?,
                filter: None,
                dry_run: false,
            },
        };
        if let Some(table) = &self.table {
            config.table = table.clone();
        }
        if let Some(key) = &self.key {
            config.group_key = key.clone();
        }
        if let (Some(column), Some(value)) = (&self.filter_column, &self.filter_value) {
            config.filter = Some(FilterConfig {
                column: column.clone(),
                value: value.clone(),
            });
        }
        config.dry_run |= self.dry_run;
        Ok(config)
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
