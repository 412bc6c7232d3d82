#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tabload::config::{DestinationConfig, PipelineConfig};
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory holding input files and a destination database; cleaned
/// up on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    pub fn database(&self) -> PathBuf {
        self.temp_dir.path().join("dest.db")
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            destination: DestinationConfig {
                path: self.database(),
                create_if_missing: true,
                busy_timeout_ms: None,
            },
            ingest: None,
            dedup: None,
        }
    }

    pub fn connect(&self) -> Connection {
        Connection::open(self.database()).expect("open destination")
    }

    pub fn count(&self, table: &str) -> usize {
        let sql = format!("SELECT COUNT(*) FROM \"{table}\"");
        self.connect()
            .query_row(&sql, [], |row| row.get::<_, i64>(0))
            .expect("count rows") as usize
    }
}

/// CSV with a `Category`/`Temporary Cabinet`/`TotalSample` header and
/// `rows` numbered data rows.
pub fn sample_csv(rows: usize) -> String {
    let mut csv = String::from("Category,Temporary Cabinet,TotalSample\n");
    for i in 0..rows {
        csv.push_str(&format!("available cabinet,C{i},{i}\n"));
    }
    csv
}
