//! Tabular input sources: delimited text and spreadsheet workbooks.
//!
//! [`open_source`] resolves the format of a resource, reads its header row,
//! and hands back a [`TabularSource`] whose rows are produced lazily. The
//! underlying file handle lives inside the row iterator and is released when
//! the source is dropped, whether iteration finished or was abandoned.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use calamine::{Data, DataType, Reader, open_workbook_auto};
use encoding_rs::Encoding;
use log::debug;

use crate::{error::SourceError, io_utils};

pub type Header = Vec<String>;
pub type Row = Vec<String>;

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];
const SPREADSHEET_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited(u8),
    Spreadsheet,
}

impl SourceFormat {
    pub fn detect(path: &Path, delimiter: Option<u8>) -> Self {
        let is_sheet = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SPREADSHEET_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if is_sheet {
            SourceFormat::Spreadsheet
        } else {
            SourceFormat::Delimited(io_utils::resolve_input_delimiter(path, delimiter))
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Delimited(delimiter) => write!(
                f,
                "delimited ('{}')",
                crate::printable_delimiter(*delimiter)
            ),
            SourceFormat::Spreadsheet => write!(f, "spreadsheet"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    pub delimiter: Option<u8>,
    pub encoding: Option<String>,
    pub sheet: Option<String>,
    pub skip_repeated_headers: bool,
}

type RowIter = Box<dyn Iterator<Item = Result<Row, SourceError>>>;

pub struct TabularSource {
    path: PathBuf,
    format: SourceFormat,
    header: Header,
    rows: RowIter,
    skip_repeated_headers: bool,
    skipped_headers: usize,
    next_row_number: usize,
}

impl fmt::Debug for TabularSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabularSource")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl TabularSource {
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Data rows that were dropped because they repeated the header.
    pub fn skipped_header_rows(&self) -> usize {
        self.skipped_headers
    }

    /// Header names are trimmed, so the comparison trims data fields too.
    fn repeats_header(&self, row: &[String]) -> bool {
        row.len() == self.header.len()
            && row
                .iter()
                .map(|field| field.trim())
                .eq(self.header.iter().map(String::as_str))
    }

    /// 1-based file row number of the row most recently yielded (the header is row 1).
    pub fn current_row_number(&self) -> usize {
        self.next_row_number.saturating_sub(1)
    }
}

impl Iterator for TabularSource {
    type Item = Result<Row, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.rows.next()?;
            self.next_row_number += 1;
            match item {
                Ok(row) if self.skip_repeated_headers && self.repeats_header(&row) => {
                    self.skipped_headers += 1;
                    debug!(
                        "Skipping repeated header at row {} of {:?}",
                        self.current_row_number(),
                        self.path
                    );
                }
                other => return Some(other),
            }
        }
    }
}

pub fn open_source(path: &Path, options: &SourceOptions) -> Result<TabularSource, SourceError> {
    let format = SourceFormat::detect(path, options.delimiter);
    let (header, rows) = match format {
        SourceFormat::Delimited(delimiter) => {
            let encoding = io_utils::resolve_encoding(options.encoding.as_deref())?;
            open_delimited(path, delimiter, encoding)?
        }
        SourceFormat::Spreadsheet => open_spreadsheet(path, options.sheet.as_deref())?,
    };
    if header.iter().all(|name| name.is_empty()) {
        return Err(SourceError::EmptyHeader {
            path: path.to_path_buf(),
        });
    }
    debug!("Opened {:?} as {format} with {} column(s)", path, header.len());
    Ok(TabularSource {
        path: path.to_path_buf(),
        format,
        header,
        rows,
        skip_repeated_headers: options.skip_repeated_headers,
        skipped_headers: 0,
        next_row_number: 2,
    })
}

fn open_delimited(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<(Header, RowIter), SourceError> {
    let csv_error = |source: csv::Error| SourceError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
    let raw_headers = reader.byte_headers().map_err(csv_error)?.clone();
    let header =
        io_utils::decode_headers(&raw_headers, encoding).ok_or_else(|| SourceError::Decode {
            path: path.to_path_buf(),
            row: 1,
            encoding: encoding.name(),
        })?;

    let owned_path = path.to_path_buf();
    let rows = reader
        .into_byte_records()
        .enumerate()
        .map(move |(idx, record)| {
            let record = record.map_err(|source| SourceError::Csv {
                path: owned_path.clone(),
                source,
            })?;
            io_utils::decode_record(&record, encoding).ok_or_else(|| SourceError::Decode {
                path: owned_path.clone(),
                row: idx + 2,
                encoding: encoding.name(),
            })
        });
    Ok((header, Box::new(rows)))
}

/// Workbook cells are read up front (xlsx is a zip archive without a
/// streaming row API); the workbook handle is closed before rows are yielded.
fn open_spreadsheet(path: &Path, sheet: Option<&str>) -> Result<(Header, RowIter), SourceError> {
    let workbook_error = |source: calamine::Error| SourceError::Workbook {
        path: path.to_path_buf(),
        source,
    };
    let mut workbook = open_workbook_auto(path).map_err(workbook_error)?;
    let index = match sheet {
        Some(name) => workbook
            .sheet_names()
            .iter()
            .position(|candidate| candidate == name)
            .ok_or_else(|| SourceError::MissingSheet {
                path: path.to_path_buf(),
                sheet: name.to_string(),
            })?,
        None => 0,
    };
    let range = match workbook.worksheet_range_at(index) {
        Some(range) => range.map_err(workbook_error)?,
        None => {
            return Err(SourceError::EmptyHeader {
                path: path.to_path_buf(),
            });
        }
    };

    let mut rows = range
        .rows()
        .map(|cells| cells.iter().map(cell_to_string).collect::<Row>());
    let header = rows
        .next()
        .map(|names| names.into_iter().map(|name| name.trim().to_string()).collect())
        .unwrap_or_default();
    let data = rows.map(Ok).collect::<Vec<_>>();
    Ok((header, Box::new(data.into_iter())))
}

pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{value:.0}")
        }
        Data::Float(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_datetime()
            .map(|value| value.format(SPREADSHEET_DATETIME_FORMAT).to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(contents).expect("write");
        (dir, path)
    }

    #[test]
    fn detects_format_from_extension() {
        assert_eq!(
            SourceFormat::detect(Path::new("book.XLSX"), None),
            SourceFormat::Spreadsheet
        );
        assert_eq!(
            SourceFormat::detect(Path::new("rows.tsv"), None),
            SourceFormat::Delimited(b'\t')
        );
        assert_eq!(
            SourceFormat::detect(Path::new("rows.txt"), Some(b'|')),
            SourceFormat::Delimited(b'|')
        );
    }

    #[test]
    fn skips_rows_repeating_the_header() {
        let (_dir, path) = write_temp("users.csv", b"ID,Email\n1,a@x\nID,Email\n2,b@x\n");
        let options = SourceOptions {
            skip_repeated_headers: true,
            ..SourceOptions::default()
        };
        let mut source = open_source(&path, &options).expect("open");
        let rows = source.by_ref().collect::<Result<Vec<_>, _>>().expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(source.skipped_header_rows(), 1);
    }

    #[test]
    fn skips_repeated_header_with_padded_names() {
        let (_dir, path) = write_temp("users.csv", b" ID , Email\n1,a\n ID , Email\n2,b\n");
        let options = SourceOptions {
            skip_repeated_headers: true,
            ..SourceOptions::default()
        };
        let mut source = open_source(&path, &options).expect("open");
        assert_eq!(source.header(), ["ID", "Email"]);
        let rows = source.by_ref().collect::<Result<Vec<_>, _>>().expect("rows");
        assert_eq!(rows, vec![vec!["1", "a"], vec!["2", "b"]]);
        assert_eq!(source.skipped_header_rows(), 1);
    }

    #[test]
    fn tracks_file_row_numbers() {
        let (_dir, path) = write_temp("rows.csv", b"a\n1\n2\n");
        let mut source = open_source(&path, &SourceOptions::default()).expect("open");
        assert_eq!(source.current_row_number(), 1);
        source.next();
        assert_eq!(source.current_row_number(), 2);
        source.next();
        assert_eq!(source.current_row_number(), 3);
    }

    #[test]
    fn whole_floats_render_as_integers() {
        assert_eq!(cell_to_string(&Data::Float(2.0)), "2");
        assert_eq!(cell_to_string(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(cell_to_string(&Data::Bool(true)), "true");
    }

    #[test]
    fn date_cells_render_as_timestamps() {
        let cell = Data::DateTimeIso("2024-01-05T08:30:00".to_string());
        assert_eq!(cell_to_string(&cell), "2024-01-05 08:30:00");
        let unparsed = Data::DateTimeIso("next tuesday".to_string());
        assert_eq!(cell_to_string(&unparsed), "next tuesday");
    }
}
