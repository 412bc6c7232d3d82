//! Human-readable run summaries.
//!
//! Reports are rendered as short status lines followed by aligned text
//! tables. Only the counts and keys are meaningful; wording may change.

use std::{borrow::Cow, fmt::Write as _};

use crate::{
    dedup::{DedupOutcome, DedupReport},
    pipeline::{IngestReport, RunReport},
    schema::Table,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

pub fn render_table(headers: &[&str], rows: &[Vec<String>], align: &[Align]) -> String {
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(display_width(&sanitize_cell(cell)));
        }
    }

    let mut output = String::new();
    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths, align));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths, &[]));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths, align));
    }
    output
}

fn format_row(values: &[String], widths: &[usize], align: &[Align]) -> String {
    let cells = values
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(idx, (value, width))| {
            let sanitized = sanitize_cell(value);
            let padding = " ".repeat(width.saturating_sub(display_width(&sanitized)));
            match align.get(idx).copied().unwrap_or(Align::Left) {
                Align::Left => format!("{sanitized}{padding}"),
                Align::Right => format!("{padding}{sanitized}"),
            }
        })
        .collect::<Vec<_>>();
    cells.join("  ").trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn display_key(key: Option<&str>) -> String {
    match key {
        Some(value) => format!("'{value}'"),
        None => "NULL".to_string(),
    }
}

pub fn render_schema(table: &Table) -> String {
    let rows = table
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            vec![
                (idx + 1).to_string(),
                column.name.clone(),
                column.kind.to_string(),
                column.kind.sql_type(),
            ]
        })
        .collect::<Vec<_>>();
    let mut output = format!("Table '{}' ({} column(s))\n", table.name, table.columns.len());
    output.push_str(&render_table(
        &["#", "column", "kind", "sql type"],
        &rows,
        &[Align::Right],
    ));
    output
}

pub fn render_ingest(report: &IngestReport) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "Loaded {} row(s) into '{}' from {:?} ({}, {} column(s), {} batch(es) of up to {})",
        report.rows_inserted,
        report.table,
        report.source,
        report.format,
        report.columns.len(),
        report.batches,
        report.batch_size
    );
    if report.skipped_header_rows > 0 {
        let _ = writeln!(
            output,
            "Skipped {} repeated header row(s)",
            report.skipped_header_rows
        );
    }
    output
}

pub fn render_dedup(report: &DedupReport) -> String {
    let mut output = String::new();
    let scope = match &report.filter {
        Some(filter) => format!(
            " where {} matches '{}'",
            filter.column,
            filter.normalized_value()
        ),
        None => String::new(),
    };
    let _ = writeln!(
        output,
        "Duplicates of '{}' in '{}'{scope}: {}",
        report.group_key, report.table, report.outcome
    );

    if !report.groups.is_empty() {
        let _ = writeln!(output, "\nFound {} group(s) with duplicates:", report.groups.len());
        let deleted_for = |key: &Option<String>| {
            report
                .deletions
                .iter()
                .find(|d| &d.key == key)
                .map(|d| d.deleted.to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        let rows = report
            .groups
            .iter()
            .map(|g| {
                vec![
                    display_key(g.key.as_deref()),
                    g.count.to_string(),
                    deleted_for(&g.key),
                ]
            })
            .collect::<Vec<_>>();
        output.push_str(&render_table(
            &["key", "rows", "deleted"],
            &rows,
            &[Align::Left, Align::Right, Align::Right],
        ));
        let _ = writeln!(output, "Total deleted: {}", report.total_deleted);
    }

    if report.outcome == DedupOutcome::Insufficient {
        let _ = writeln!(output, "\nWARNING: duplicates remain after cleanup:");
        for group in &report.remaining {
            let _ = writeln!(
                output,
                "  {}: {} row(s)",
                display_key(group.key.as_deref()),
                group.count
            );
        }
    }

    let _ = writeln!(output, "\nFinal count of matching rows: {}", report.final_count);
    if !report.breakdown.is_empty() {
        let rows = report
            .breakdown
            .iter()
            .map(|entry| vec![display_key(entry.key.as_deref()), entry.count.to_string()])
            .collect::<Vec<_>>();
        output.push_str(&render_table(
            &["key", "rows"],
            &rows,
            &[Align::Left, Align::Right],
        ));
    }
    output
}

pub fn render_run(report: &RunReport) -> String {
    let mut sections = Vec::new();
    if let Some(ingest) = &report.ingest {
        sections.push(render_ingest(ingest));
    }
    if let Some(dedup) = &report.dedup {
        sections.push(render_dedup(dedup));
    }
    sections.join("\n")
}
