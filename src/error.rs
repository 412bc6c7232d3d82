//! Error taxonomy for the ingest and deduplication pipeline.
//!
//! Every variant aborts the current run. Load and resolve failures are
//! raised only after the open transaction has been rolled back, so the
//! destination is never observed half-modified.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Failure to open or read a tabular input resource.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read delimited data from {path:?}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("cannot read workbook {path:?}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
    #[error("workbook {path:?} has no sheet named '{sheet}'")]
    MissingSheet { path: PathBuf, sheet: String },
    #[error("{path:?} has no header columns")]
    EmptyHeader { path: PathBuf },
    #[error("failed to decode row {row} of {path:?} as {encoding}")]
    Decode {
        path: PathBuf,
        row: usize,
        encoding: &'static str,
    },
    #[error("unknown encoding '{0}'")]
    UnknownEncoding(String),
}

/// Why a batch load stopped.
#[derive(Debug, Error)]
pub enum LoadCause {
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("row {row} has {found} field(s), expected {expected}")]
    Arity {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("row {row} column '{column}': '{value}' is not a 32-bit integer")]
    InvalidInteger {
        row: usize,
        column: String,
        value: String,
    },
    #[error("row {row} column '{column}': {length} characters exceeds the {limit} character limit")]
    TextTooLong {
        row: usize,
        column: String,
        length: usize,
        limit: usize,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    SourceRead(#[from] SourceError),
    #[error("cannot connect to destination '{target}'")]
    Connect {
        target: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("loading table '{table}' failed after {staged} staged row(s)")]
    Load {
        table: String,
        staged: usize,
        #[source]
        cause: LoadCause,
    },
    #[error("resolving duplicates in '{table}' failed")]
    Resolve {
        table: String,
        #[source]
        cause: ResolveCause,
    },
}

/// Why a duplicate resolution stopped.
#[derive(Debug, Error)]
pub enum ResolveCause {
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error("table does not exist")]
    MissingTable,
    #[error("column '{0}' does not exist")]
    MissingColumn(String),
}

impl PipelineError {
    pub(crate) fn resolve(table: &str, cause: impl Into<ResolveCause>) -> Self {
        PipelineError::Resolve {
            table: table.to_string(),
            cause: cause.into(),
        }
    }

    /// Rows staged before a load failure; zero for every other kind.
    pub fn staged_rows(&self) -> usize {
        match self {
            PipelineError::Load { staged, .. } => *staged,
            _ => 0,
        }
    }
}
