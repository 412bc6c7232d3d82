//! Destination connection handling for the SQLite sink.

use std::{path::Path, time::Duration};

use log::{debug, info};
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::{
    config::DestinationConfig,
    error::{PipelineError, Result},
};

pub const IN_MEMORY: &str = ":memory:";

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// An open destination connection. Dropping it closes the connection, which
/// also rolls back any transaction left open on an early return.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    target: String,
}

impl Database {
    pub fn open(config: &DestinationConfig) -> Result<Self> {
        let target = config.path.display().to_string();
        let connect_error = |source: rusqlite::Error| PipelineError::Connect {
            target: target.clone(),
            source,
        };
        let conn = if config.path == Path::new(IN_MEMORY) {
            Connection::open_in_memory().map_err(connect_error)?
        } else {
            let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            if config.create_if_missing {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
            Connection::open_with_flags(&config.path, flags).map_err(connect_error)?
        };
        if let Some(ms) = config.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(ms))
                .map_err(connect_error)?;
        }
        info!("Connected to SQLite {} at '{target}'", rusqlite::version());
        Ok(Self { conn, target })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        debug!("Releasing connection to '{}'", self.target);
    }
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

#[cfg(test)]
pub(crate) fn row_count(conn: &Connection, table: &str) -> rusqlite::Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
        .map(|count| count as usize)
}

pub(crate) fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let sql = format!("SELECT * FROM {} LIMIT 0", quote_ident(table));
    let stmt = conn.prepare(&sql)?;
    Ok(stmt.column_names().into_iter().map(str::to_string).collect())
}
