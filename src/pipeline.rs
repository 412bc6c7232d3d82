//! Orchestration of source reading, schema inference, loading and
//! duplicate resolution against one destination.
//!
//! Ingest and deduplication are independent operations. Each public entry
//! point acquires its own connection and releases it on every exit path;
//! [`Pipeline::run`] shares one connection across both configured steps.

use std::path::PathBuf;

use log::info;
use serde::Serialize;

use crate::{
    config::{DedupConfig, IngestConfig, PipelineConfig},
    db::Database,
    dedup::{DedupReport, DuplicateResolver},
    derive::BoundDerivation,
    error::{PipelineError, Result},
    loader::BatchLoader,
    schema::{Column, SchemaInferrer, Table},
    source::{TabularSource, open_source},
};

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub table: String,
    pub source: PathBuf,
    pub format: String,
    pub columns: Vec<Column>,
    pub batch_size: usize,
    pub rows_inserted: usize,
    pub batches: usize,
    pub skipped_header_rows: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub ingest: Option<IngestReport>,
    pub dedup: Option<DedupReport>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn connect(&self) -> Result<Database> {
        Database::open(&self.config.destination)
    }

    /// Runs the configured ingest section.
    pub fn ingest(&self) -> Result<IngestReport> {
        let ingest = self.ingest_config()?;
        let prepared = prepare(ingest)?;
        let mut db = self.connect()?;
        load(&mut db, ingest.batch_size, prepared)
    }

    /// Runs the configured dedup section.
    pub fn deduplicate(&self) -> Result<DedupReport> {
        let dedup = self.dedup_config()?;
        let mut db = self.connect()?;
        resolve(&mut db, dedup)
    }

    /// Ingests and then deduplicates, skipping whichever section is absent.
    pub fn run(&self) -> Result<RunReport> {
        if self.config.ingest.is_none() && self.config.dedup.is_none() {
            return Err(PipelineError::Config(
                "nothing to run: configure an ingest and/or dedup section".into(),
            ));
        }
        let prepared = self.config.ingest.as_ref().map(prepare).transpose()?;
        let mut db = self.connect()?;
        let mut report = RunReport::default();
        if let (Some(ingest), Some(prepared)) = (&self.config.ingest, prepared) {
            report.ingest = Some(load(&mut db, ingest.batch_size, prepared)?);
        }
        if let Some(dedup) = &self.config.dedup {
            report.dedup = Some(resolve(&mut db, dedup)?);
        }
        Ok(report)
    }

    /// The table an ingest would create, without touching the destination.
    pub fn preview_table(ingest: &IngestConfig) -> Result<Table> {
        ingest.validate()?;
        prepare(ingest).map(|prepared| prepared.table)
    }

    fn ingest_config(&self) -> Result<&IngestConfig> {
        self.config
            .ingest
            .as_ref()
            .ok_or_else(|| PipelineError::Config("no ingest section configured".into()))
    }

    fn dedup_config(&self) -> Result<&DedupConfig> {
        self.config
            .dedup
            .as_ref()
            .ok_or_else(|| PipelineError::Config("no dedup section configured".into()))
    }
}

/// An opened source with its inferred table and bound derived columns.
struct Prepared<'a> {
    source: TabularSource,
    table: Table,
    derivations: Vec<BoundDerivation<'a>>,
}

/// Opens the source and infers the destination table, derived columns
/// included. Unknown derivation inputs fail here, before any connection.
fn prepare(ingest: &IngestConfig) -> Result<Prepared<'_>> {
    let source = open_source(&ingest.source, &ingest.source_options())?;
    info!(
        "Reading {:?} as {} with {} column(s)",
        source.path(),
        source.format(),
        source.header().len()
    );
    let inferrer = SchemaInferrer::default().with_numeric_columns(&ingest.numeric_columns);
    let mut table = inferrer.infer(&ingest.table, source.header());
    let derivations = bind_derivations(ingest, source.header())?;
    for derived in &ingest.derived {
        table.push_text_column(&derived.name);
    }
    Ok(Prepared {
        source,
        table,
        derivations,
    })
}

fn bind_derivations<'a>(
    ingest: &'a IngestConfig,
    header: &[String],
) -> Result<Vec<BoundDerivation<'a>>> {
    ingest
        .derived
        .iter()
        .map(|derived| {
            derived.bind(header).ok_or_else(|| {
                PipelineError::Config(format!(
                    "derived column '{}' reads unknown column '{}'",
                    derived.name, derived.from
                ))
            })
        })
        .collect()
}

fn load(db: &mut Database, batch_size: usize, prepared: Prepared<'_>) -> Result<IngestReport> {
    let Prepared {
        mut source,
        table,
        derivations,
    } = prepared;
    let loader = BatchLoader::new(batch_size).with_derivations(derivations);
    info!(
        "Replacing table '{}' in '{}' (batch size {})",
        table.name,
        db.target(),
        loader.batch_size()
    );
    let stats = loader.load(db.connection_mut(), &table, source.by_ref())?;
    Ok(IngestReport {
        table: table.name,
        source: source.path().to_path_buf(),
        format: source.format().to_string(),
        columns: table.columns,
        batch_size: loader.batch_size(),
        rows_inserted: stats.rows_inserted,
        batches: stats.batches,
        skipped_header_rows: source.skipped_header_rows(),
    })
}

fn resolve(db: &mut Database, dedup: &DedupConfig) -> Result<DedupReport> {
    info!(
        "Resolving duplicates of '{}' in '{}' on '{}'",
        dedup.group_key,
        dedup.table,
        db.target()
    );
    DuplicateResolver::from(dedup).resolve(db.connection_mut(), &dedup.table)
}
