//! Duplicate detection and removal by grouping key.
//!
//! Rows that satisfy an optional [`FilterPredicate`] are grouped by a key
//! column; every group holding more than one row is cut back to a single
//! survivor. Which physical row survives is left to the engine: deletions
//! pick `count - 1` rowids with no ordering applied.
//!
//! The whole resolution (detection, deletions, verification, final counts)
//! runs in one transaction that is committed only when every step succeeded.

use std::fmt;

use log::{debug, info, warn};
use rusqlite::{Connection, Transaction, params_from_iter, types::Value as SqlValue};
use serde::Serialize;

use crate::{
    config::{DedupConfig, FilterConfig},
    db::{self, quote_ident},
    error::{PipelineError, ResolveCause, Result},
};

/// Restricts resolution to rows whose `column`, trimmed and lower-cased,
/// equals the normalized `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterPredicate {
    pub column: String,
    pub value: String,
}

impl FilterPredicate {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Mirrors SQLite's `TRIM` (spaces only) and `LOWER` (ASCII only).
    pub fn normalized_value(&self) -> String {
        normalize_filter_value(&self.value)
    }

    fn sql(&self) -> String {
        format!("TRIM(LOWER({})) = ?", quote_ident(&self.column))
    }
}

impl From<&FilterConfig> for FilterPredicate {
    fn from(config: &FilterConfig) -> Self {
        FilterPredicate::new(&config.column, &config.value)
    }
}

pub fn normalize_filter_value(value: &str) -> String {
    value.trim_matches(' ').to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub key: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDeletion {
    pub key: Option<String>,
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCount {
    pub key: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupOutcome {
    NothingToDo,
    Resolved,
    Insufficient,
    DryRun,
}

impl fmt::Display for DedupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DedupOutcome::NothingToDo => "nothing to do",
            DedupOutcome::Resolved => "resolved",
            DedupOutcome::Insufficient => "duplicates remain",
            DedupOutcome::DryRun => "dry run",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupReport {
    pub table: String,
    pub group_key: String,
    pub filter: Option<FilterPredicate>,
    pub outcome: DedupOutcome,
    pub groups: Vec<DuplicateGroup>,
    pub deletions: Vec<GroupDeletion>,
    pub total_deleted: usize,
    pub remaining: Vec<DuplicateGroup>,
    pub final_count: usize,
    pub breakdown: Vec<KeyCount>,
}

#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    group_key: String,
    filter: Option<FilterPredicate>,
    dry_run: bool,
}

impl From<&DedupConfig> for DuplicateResolver {
    fn from(config: &DedupConfig) -> Self {
        DuplicateResolver::new(&config.group_key)
            .with_filter(config.filter.as_ref().map(FilterPredicate::from))
            .dry_run(config.dry_run)
    }
}

impl DuplicateResolver {
    pub fn new(group_key: impl Into<String>) -> Self {
        Self {
            group_key: group_key.into(),
            filter: None,
            dry_run: false,
        }
    }

    pub fn with_filter(mut self, filter: Option<FilterPredicate>) -> Self {
        self.filter = filter;
        self
    }

    /// Detect and count only; nothing is deleted and the transaction is
    /// rolled back.
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn resolve(&self, conn: &mut Connection, table: &str) -> Result<DedupReport> {
        let tx = conn
            .transaction()
            .map_err(|err: rusqlite::Error| PipelineError::resolve(table, err))?;
        match self.resolve_in(&tx, table) {
            Ok(report) if report.outcome == DedupOutcome::DryRun => {
                tx.rollback()
                    .map_err(|err: rusqlite::Error| PipelineError::resolve(table, err))?;
                Ok(report)
            }
            Ok(report) => {
                tx.commit()
                    .map_err(|err: rusqlite::Error| PipelineError::resolve(table, err))?;
                Ok(report)
            }
            Err(err) => {
                warn!("Duplicate resolution on '{table}' failed; rolling back");
                if let Err(rollback) = tx.rollback() {
                    warn!("Rollback of '{table}' reported: {rollback}");
                }
                Err(err)
            }
        }
    }

    fn resolve_in(&self, tx: &Transaction<'_>, table: &str) -> Result<DedupReport> {
        self.validate(tx, table)?;
        let sql_err = |err: rusqlite::Error| PipelineError::resolve(table, err);

        let found = self.duplicate_groups(tx, table).map_err(sql_err)?;
        let groups = found.iter().map(|(_, group)| group.clone()).collect::<Vec<_>>();
        let mut deletions = Vec::new();
        let mut total_deleted = 0usize;

        let outcome = if found.is_empty() {
            info!("No duplicate '{}' groups found in '{table}'. Nothing to do.", self.group_key);
            DedupOutcome::NothingToDo
        } else {
            info!(
                "Found {} '{}' group(s) with duplicates in '{table}'",
                found.len(),
                self.group_key
            );
            if self.dry_run {
                DedupOutcome::DryRun
            } else {
                for (raw_key, group) in &found {
                    let deleted = self
                        .delete_surplus(tx, table, raw_key, group.count - 1)
                        .map_err(sql_err)?;
                    debug!("Deleted {deleted} duplicate(s) for key {:?}", group.key);
                    total_deleted += deleted;
                    deletions.push(GroupDeletion {
                        key: group.key.clone(),
                        deleted,
                    });
                }
                info!("Deleted {total_deleted} duplicate row(s) from '{table}'");
                DedupOutcome::Resolved
            }
        };

        let remaining = if outcome == DedupOutcome::Resolved {
            self.duplicate_groups(tx, table)
                .map_err(sql_err)?
                .into_iter()
                .map(|(_, group)| group)
                .collect::<Vec<_>>()
        } else {
            groups.clone()
        };
        let outcome = if outcome == DedupOutcome::Resolved && !remaining.is_empty() {
            for group in &remaining {
                warn!(
                    "Key {:?} still has {} row(s) after cleanup",
                    group.key, group.count
                );
            }
            DedupOutcome::Insufficient
        } else {
            outcome
        };

        let final_count = self.matching_count(tx, table).map_err(sql_err)?;
        let breakdown = self.breakdown(tx, table).map_err(sql_err)?;
        info!("Final count of matching rows in '{table}': {final_count}");

        Ok(DedupReport {
            table: table.to_string(),
            group_key: self.group_key.clone(),
            filter: self.filter.clone(),
            outcome,
            groups,
            deletions,
            total_deleted,
            remaining,
            final_count,
            breakdown,
        })
    }

    fn validate(&self, conn: &Connection, table: &str) -> Result<()> {
        let sql_err = |err: rusqlite::Error| PipelineError::resolve(table, err);
        if !db::table_exists(conn, table).map_err(sql_err)? {
            return Err(PipelineError::resolve(table, ResolveCause::MissingTable));
        }
        let columns = db::column_names(conn, table).map_err(sql_err)?;
        let mut required = vec![self.group_key.as_str()];
        if let Some(filter) = &self.filter {
            required.push(filter.column.as_str());
        }
        for name in required {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                return Err(PipelineError::resolve(
                    table,
                    ResolveCause::MissingColumn(name.to_string()),
                ));
            }
        }
        Ok(())
    }

    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        match &self.filter {
            Some(filter) => (
                format!("WHERE {}", filter.sql()),
                vec![SqlValue::Text(filter.normalized_value())],
            ),
            None => ("WHERE 1 = 1".to_string(), Vec::new()),
        }
    }

    /// Groups with more than one matching row, in the order the engine
    /// returns them.
    fn duplicate_groups(
        &self,
        conn: &Connection,
        table: &str,
    ) -> rusqlite::Result<Vec<(SqlValue, DuplicateGroup)>> {
        let key = quote_ident(&self.group_key);
        let (clause, params) = self.where_clause();
        let sql = format!(
            "SELECT {key}, COUNT(*) FROM {} {clause} GROUP BY {key} HAVING COUNT(*) > 1",
            quote_ident(table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let raw: SqlValue = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((raw, count as usize))
        })?;
        rows.map(|row| {
            row.map(|(raw, count)| {
                let group = DuplicateGroup {
                    key: render_key(&raw),
                    count,
                };
                (raw, group)
            })
        })
        .collect()
    }

    fn delete_surplus(
        &self,
        conn: &Connection,
        table: &str,
        key: &SqlValue,
        surplus: usize,
    ) -> rusqlite::Result<usize> {
        let table_ident = quote_ident(table);
        let (clause, mut params) = self.where_clause();
        let sql = format!(
            "DELETE FROM {table_ident} WHERE rowid IN (\
             SELECT rowid FROM {table_ident} {clause} AND {} IS ? LIMIT ?)",
            quote_ident(&self.group_key)
        );
        params.push(key.clone());
        params.push(SqlValue::Integer(surplus as i64));
        conn.execute(&sql, params_from_iter(params.iter()))
    }

    fn matching_count(&self, conn: &Connection, table: &str) -> rusqlite::Result<usize> {
        let (clause, params) = self.where_clause();
        let sql = format!("SELECT COUNT(*) FROM {} {clause}", quote_ident(table));
        conn.query_row(&sql, params_from_iter(params.iter()), |row| {
            row.get::<_, i64>(0)
        })
        .map(|count| count as usize)
    }

    fn breakdown(&self, conn: &Connection, table: &str) -> rusqlite::Result<Vec<KeyCount>> {
        let key = quote_ident(&self.group_key);
        let (clause, params) = self.where_clause();
        let sql = format!(
            "SELECT {key}, COUNT(*) FROM {} {clause} GROUP BY {key} ORDER BY {key}",
            quote_ident(table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let raw: SqlValue = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok(KeyCount {
                key: render_key(&raw),
                count: count as usize,
            })
        })?;
        rows.collect()
    }
}

fn render_key(raw: &SqlValue) -> Option<String> {
    match raw {
        SqlValue::Null => None,
        SqlValue::Integer(value) => Some(value.to_string()),
        SqlValue::Real(value) => Some(value.to_string()),
        SqlValue::Text(value) => Some(value.clone()),
        SqlValue::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
    }
}
