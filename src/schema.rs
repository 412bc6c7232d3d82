//! Destination table model and header-driven type inference.
//!
//! Types are decided from header names alone: a column is [`ColumnKind::Numeric`]
//! when its normalized name matches a known numeric-total convention and
//! [`ColumnKind::Text`] otherwise. Cell contents are never sampled.

use std::{collections::BTreeSet, fmt};

use itertools::Itertools;
use serde::Serialize;

use crate::db::quote_ident;

/// Maximum characters accepted by a text column.
pub const TEXT_COLUMN_LIMIT: usize = 255;

const BUILTIN_NUMERIC_CONVENTIONS: &[&str] = &["totalsample"];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Text,
}

impl ColumnKind {
    pub fn sql_type(self) -> String {
        match self {
            ColumnKind::Numeric => "INTEGER".to_string(),
            ColumnKind::Text => format!("VARCHAR({TEXT_COLUMN_LIMIT})"),
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Numeric => write!(f, "numeric"),
            ColumnKind::Text => write!(f, "text"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    /// Appends a text column, renaming it the same way inference does when
    /// the name is already taken.
    pub fn push_text_column(&mut self, name: &str) -> &Column {
        let mut taken = self
            .columns
            .iter()
            .map(|c| c.name.to_ascii_lowercase())
            .collect::<BTreeSet<_>>();
        let name = unique_name(name, self.columns.len(), &mut taken);
        self.columns.push(Column {
            name,
            kind: ColumnKind::Text,
        });
        &self.columns[self.columns.len() - 1]
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name))
    }

    pub fn create_sql(&self) -> String {
        let definitions = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.kind.sql_type()))
            .join(", ");
        format!("CREATE TABLE {} ({definitions})", quote_ident(&self.name))
    }

    /// Multi-row insert with `rows` value tuples of positional parameters.
    pub fn insert_sql(&self, rows: usize) -> String {
        let columns = self.columns.iter().map(|c| quote_ident(&c.name)).join(", ");
        let tuple = format!("({})", vec!["?"; self.columns.len()].join(", "));
        let values = std::iter::repeat_n(tuple.as_str(), rows).join(", ");
        format!(
            "INSERT INTO {} ({columns}) VALUES {values}",
            quote_ident(&self.name)
        )
    }
}

#[derive(Debug, Clone)]
pub struct SchemaInferrer {
    numeric_conventions: BTreeSet<String>,
}

impl Default for SchemaInferrer {
    fn default() -> Self {
        Self {
            numeric_conventions: BUILTIN_NUMERIC_CONVENTIONS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl SchemaInferrer {
    /// Adds caller-supplied numeric conventions on top of the built-in ones.
    pub fn with_numeric_columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.numeric_conventions
            .extend(names.into_iter().map(|n| normalize_header(n.as_ref())));
        self.numeric_conventions.remove("");
        self
    }

    pub fn kind_for(&self, header: &str) -> ColumnKind {
        if self.numeric_conventions.contains(&normalize_header(header)) {
            ColumnKind::Numeric
        } else {
            ColumnKind::Text
        }
    }

    pub fn infer(&self, table_name: &str, header: &[String]) -> Table {
        let mut taken = BTreeSet::new();
        let columns = header
            .iter()
            .enumerate()
            .map(|(idx, raw)| Column {
                name: unique_name(raw, idx, &mut taken),
                kind: self.kind_for(raw),
            })
            .collect();
        Table {
            name: table_name.to_string(),
            columns,
        }
    }
}

/// Case-folds and drops spaces, underscores and hyphens.
pub fn normalize_header(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn unique_name(raw: &str, position: usize, taken: &mut BTreeSet<String>) -> String {
    let trimmed = raw.trim();
    let base = if trimmed.is_empty() {
        format!("column_{}", position + 1)
    } else {
        trimmed.to_string()
    };
    let mut candidate = base.clone();
    let mut suffix = 2;
    while !taken.insert(candidate.to_ascii_lowercase()) {
        candidate = format!("{base}_{suffix}");
        suffix += 1;
    }
    candidate
}
