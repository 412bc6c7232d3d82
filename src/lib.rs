//! Batch ingest of tabular files into SQLite with duplicate resolution.
//!
//! The library exposes the pipeline pieces individually:
//!
//! - [`source`] reads CSV/TSV files and spreadsheets into a header and rows.
//! - [`schema`] infers destination columns from header names.
//! - [`loader`] replaces a table and fills it in fixed-size batches.
//! - [`dedup`] removes surplus rows per duplicated key.
//! - [`pipeline`] ties them together around an explicit [`config::PipelineConfig`].

pub mod cli;
pub mod config;
pub mod db;
pub mod dedup;
pub mod derive;
pub mod error;
pub mod io_utils;
pub mod loader;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod summary;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug};
use serde::Serialize;

use crate::{
    cli::{Cli, Commands},
    config::PipelineConfig,
    pipeline::Pipeline,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tabload", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => {
            PipelineConfig::load(path).with_context(|| format!("Loading config from {path:?}"))?
        }
        None => PipelineConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.destination.path = database.clone();
    }
    debug!("Effective configuration: {config:?}");

    match &cli.command {
        Commands::Ingest(args) => {
            config.ingest = Some(args.merge(config.ingest.take())?);
            config.dedup = None;
            let report = Pipeline::new(config)?
                .ingest()
                .context("Ingest failed")?;
            emit(cli.json, &report, summary::render_ingest)
        }
        Commands::Dedup(args) => {
            config.dedup = Some(args.merge(config.dedup.take())?);
            config.ingest = None;
            let report = Pipeline::new(config)?
                .deduplicate()
                .context("Deduplication failed")?;
            emit(cli.json, &report, summary::render_dedup)
        }
        Commands::Run => {
            let report = Pipeline::new(config)?.run().context("Pipeline run failed")?;
            emit(cli.json, &report, summary::render_run)
        }
        Commands::Schema(args) => {
            let ingest = args.merge(config.ingest.take())?;
            let table = Pipeline::preview_table(&ingest)
                .with_context(|| format!("Inferring schema from {:?}", ingest.source))?;
            emit(cli.json, &table, summary::render_schema)
        }
    }
}

fn emit<T: Serialize>(json: bool, report: &T, render: fn(&T) -> String) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(report).context("Serializing report")?;
        println!("{rendered}");
    } else {
        print!("{}", render(report));
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
