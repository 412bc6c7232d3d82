//! Batched, all-or-nothing table loading.
//!
//! A load is a full table replace: the destination table is dropped and
//! recreated from the inferred [`Table`], then rows are inserted in
//! multi-row batches. DDL and every batch share one transaction, so readers
//! either see the previous table or the fully loaded one once the commit
//! lands.

use log::{debug, info, warn};
use rusqlite::{Connection, Transaction, params_from_iter, types::Value as SqlValue};

use crate::{
    config::DEFAULT_BATCH_SIZE,
    derive::BoundDerivation,
    error::{LoadCause, PipelineError, Result, SourceError},
    schema::{ColumnKind, TEXT_COLUMN_LIMIT, Table},
    source::Row,
};

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` for the bundled build.
pub const MAX_BOUND_PARAMETERS: usize = 32_766;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub rows_inserted: usize,
    pub batches: usize,
}

#[derive(Debug, Clone)]
pub struct BatchLoader<'a> {
    batch_size: usize,
    derivations: Vec<BoundDerivation<'a>>,
}

impl Default for BatchLoader<'_> {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl<'a> BatchLoader<'a> {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            derivations: Vec::new(),
        }
    }

    /// Derived values are appended after the source fields, matching the
    /// trailing columns of the table.
    pub fn with_derivations(mut self, derivations: Vec<BoundDerivation<'a>>) -> Self {
        self.derivations = derivations;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn load<I>(&self, conn: &mut Connection, table: &Table, rows: I) -> Result<LoadStats>
    where
        I: IntoIterator<Item = Result<Row, SourceError>>,
    {
        let fail = |staged: usize, cause: LoadCause| PipelineError::Load {
            table: table.name.clone(),
            staged,
            cause,
        };
        let tx = conn
            .transaction()
            .map_err(|err| fail(0, LoadCause::Database(err)))?;
        match self.stage(&tx, table, rows) {
            Ok(stats) => {
                tx.commit()
                    .map_err(|err| fail(stats.rows_inserted, LoadCause::Database(err)))?;
                info!(
                    "Finished loading '{}': {} row(s) in {} batch(es)",
                    table.name, stats.rows_inserted, stats.batches
                );
                Ok(stats)
            }
            Err((staged, cause)) => {
                warn!(
                    "Load of '{}' failed after {staged} staged row(s); rolling back",
                    table.name
                );
                if let Err(err) = tx.rollback() {
                    warn!("Rollback of '{}' reported: {err}", table.name);
                }
                Err(fail(staged, cause))
            }
        }
    }

    fn stage<I>(
        &self,
        tx: &Transaction<'_>,
        table: &Table,
        rows: I,
    ) -> std::result::Result<LoadStats, (usize, LoadCause)>
    where
        I: IntoIterator<Item = Result<Row, SourceError>>,
    {
        tx.execute(&table.drop_sql(), [])
            .map_err(|err| staged_error(0, err))?;
        tx.execute(&table.create_sql(), [])
            .map_err(|err| staged_error(0, err))?;
        debug!("Recreated table '{}' with {} column(s)", table.name, table.columns.len());

        let mut stats = LoadStats {
            rows_inserted: 0,
            batches: 0,
        };
        let mut buffer: Vec<Vec<SqlValue>> = Vec::with_capacity(self.batch_size);
        for (idx, row) in rows.into_iter().enumerate() {
            let row = row.map_err(|err| staged_error(stats.rows_inserted, err))?;
            let values = self
                .convert_row(table, row, idx + 1)
                .map_err(|cause| (stats.rows_inserted, cause))?;
            buffer.push(values);
            if buffer.len() >= self.batch_size {
                self.flush(tx, table, &mut buffer, &mut stats)?;
                info!("Inserted {} row(s) into '{}'", stats.rows_inserted, table.name);
            }
        }
        if !buffer.is_empty() {
            self.flush(tx, table, &mut buffer, &mut stats)?;
        }
        Ok(stats)
    }

    fn flush(
        &self,
        tx: &Transaction<'_>,
        table: &Table,
        buffer: &mut Vec<Vec<SqlValue>>,
        stats: &mut LoadStats,
    ) -> std::result::Result<(), (usize, LoadCause)> {
        insert_batch(tx, table, buffer).map_err(|err| staged_error(stats.rows_inserted, err))?;
        stats.rows_inserted += buffer.len();
        stats.batches += 1;
        buffer.clear();
        Ok(())
    }

    fn convert_row(
        &self,
        table: &Table,
        row: Row,
        ordinal: usize,
    ) -> std::result::Result<Vec<SqlValue>, LoadCause> {
        let expected = table.columns.len() - self.derivations.len();
        if row.len() != expected {
            return Err(LoadCause::Arity {
                row: ordinal,
                expected,
                found: row.len(),
            });
        }
        let derived = self
            .derivations
            .iter()
            .map(|d| d.evaluate(&row))
            .collect::<Vec<_>>();
        table
            .columns
            .iter()
            .zip(row.into_iter().chain(derived))
            .map(|(column, raw)| match column.kind {
                ColumnKind::Numeric => numeric_value(&raw).ok_or_else(|| LoadCause::InvalidInteger {
                    row: ordinal,
                    column: column.name.clone(),
                    value: raw.clone(),
                }),
                ColumnKind::Text => {
                    let length = raw.chars().count();
                    if length > TEXT_COLUMN_LIMIT {
                        Err(LoadCause::TextTooLong {
                            row: ordinal,
                            column: column.name.clone(),
                            length,
                            limit: TEXT_COLUMN_LIMIT,
                        })
                    } else {
                        Ok(SqlValue::Text(raw))
                    }
                }
            })
            .collect()
    }
}

fn staged_error(staged: usize, cause: impl Into<LoadCause>) -> (usize, LoadCause) {
    (staged, cause.into())
}

/// Empty cells load as `NULL`; anything else must fit a 32-bit integer.
fn numeric_value(raw: &str) -> Option<SqlValue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(SqlValue::Null);
    }
    trimmed
        .parse::<i32>()
        .ok()
        .map(|value| SqlValue::Integer(i64::from(value)))
}

/// Issues one multi-row insert per batch, split only when the batch would
/// exceed the bound-parameter limit.
fn insert_batch(
    tx: &Transaction<'_>,
    table: &Table,
    rows: &[Vec<SqlValue>],
) -> rusqlite::Result<()> {
    let width = table.columns.len().max(1);
    let rows_per_statement = (MAX_BOUND_PARAMETERS / width).max(1);
    for chunk in rows.chunks(rows_per_statement) {
        let mut stmt = tx.prepare_cached(&table.insert_sql(chunk.len()))?;
        stmt.execute(params_from_iter(chunk.iter().flatten()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaInferrer;

    fn rows(values: &[&[&str]]) -> Vec<Result<Row, SourceError>> {
        values
            .iter()
            .map(|row| Ok(row.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    fn table(names: &[&str]) -> Table {
        let header = names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        SchemaInferrer::default().infer("samples", &header)
    }

    #[test]
    fn numeric_values_parse_or_null() {
        assert_eq!(numeric_value(""), Some(SqlValue::Null));
        assert_eq!(numeric_value(" 42 "), Some(SqlValue::Integer(42)));
        assert_eq!(numeric_value("4.5"), None);
        assert_eq!(numeric_value("3000000000"), None);
    }

    #[test]
    fn counts_batches_including_remainder() {
        let mut conn = Connection::open_in_memory().expect("open");
        let table = table(&["Category", "TotalSample"]);
        let input = rows(&[&["a", "1"], &["b", "2"], &["c", ""]]);
        let stats = BatchLoader::new(2)
            .load(&mut conn, &table, input)
            .expect("load");
        assert_eq!(stats, LoadStats { rows_inserted: 3, batches: 2 });
        let nulls: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM samples WHERE TotalSample IS NULL",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(nulls, 1);
    }

    #[test]
    fn invalid_integer_reports_row_and_column() {
        let mut conn = Connection::open_in_memory().expect("open");
        let table = table(&["Category", "TotalSample"]);
        let input = rows(&[&["a", "1"], &["b", "many"]]);
        let err = BatchLoader::new(1)
            .load(&mut conn, &table, input)
            .expect_err("should fail");
        match err {
            PipelineError::Load {
                staged,
                cause: LoadCause::InvalidInteger { row, column, .. },
                ..
            } => {
                assert_eq!(staged, 1);
                assert_eq!(row, 2);
                assert_eq!(column, "TotalSample");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn overlong_text_is_rejected() {
        let mut conn = Connection::open_in_memory().expect("open");
        let table = table(&["note"]);
        let long = "x".repeat(TEXT_COLUMN_LIMIT + 1);
        let err = BatchLoader::default()
            .load(&mut conn, &table, vec![Ok(vec![long])])
            .expect_err("should fail");
        assert!(matches!(
            err,
            PipelineError::Load {
                cause: LoadCause::TextTooLong { length: 256, .. },
                ..
            }
        ));
    }

    #[test]
    fn wide_batches_split_under_parameter_limit() {
        let mut conn = Connection::open_in_memory().expect("open");
        let names = (0..400).map(|i| format!("c{i}")).collect::<Vec<_>>();
        let table = SchemaInferrer::default().infer("wide", &names);
        let row = vec!["v".to_string(); names.len()];
        let input = (0..100).map(|_| Ok(row.clone()));
        let stats = BatchLoader::new(100)
            .load(&mut conn, &table, input)
            .expect("load");
        assert_eq!(stats.rows_inserted, 100);
        assert_eq!(stats.batches, 1);
        assert_eq!(crate::db::row_count(&conn, "wide").unwrap(), 100);
    }
}
