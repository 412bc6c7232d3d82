//! Derived value-map columns.
//!
//! A derived column copies another column's value through a lookup table,
//! e.g. turning an access level of `1` into the role `admin`.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// A text column whose value is looked up from another column, e.g. mapping a
/// numeric access level to a role name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DerivedColumn {
    pub name: String,
    pub from: String,
    #[serde(default)]
    pub map: BTreeMap<String, String>,
    #[serde(default)]
    pub default: Option<String>,
}

/// A [`DerivedColumn`] bound to the position of its source column.
#[derive(Debug, Clone)]
pub struct BoundDerivation<'a> {
    column: &'a DerivedColumn,
    source_index: usize,
}

impl DerivedColumn {
    /// Parses `name=from:key=value,key=value`; the key `*` sets the fallback.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, rest) = spec
            .split_once('=')
            .map(|(name, rest)| (name.trim(), rest))
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| anyhow!("Derived column '{spec}' is missing a name"))?;
        let (from, pairs) = rest.split_once(':').unwrap_or((rest, ""));
        let from = from.trim();
        if from.is_empty() {
            bail!("Derived column '{name}' is missing a source column");
        }
        let mut map = BTreeMap::new();
        let mut default = None;
        for pair in pairs.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                anyhow!("Derived column '{name}': expected key=value, got '{pair}'")
            })?;
            let (key, value) = (key.trim(), value.trim().to_string());
            if key == "*" {
                default = Some(value);
            } else {
                map.insert(key.to_string(), value);
            }
        }
        Ok(DerivedColumn {
            name: name.to_string(),
            from: from.to_string(),
            map,
            default,
        })
    }

    pub fn bind<'a>(&'a self, header: &[String]) -> Option<BoundDerivation<'a>> {
        header
            .iter()
            .position(|h| h == &self.from)
            .map(|source_index| BoundDerivation {
                column: self,
                source_index,
            })
    }

    pub fn lookup(&self, raw: &str) -> String {
        self.map
            .get(raw.trim())
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or_default()
    }
}

impl BoundDerivation<'_> {
    pub fn evaluate(&self, row: &[String]) -> String {
        let raw = row.get(self.source_index).map(String::as_str).unwrap_or("");
        self.column.lookup(raw)
    }
}

pub fn parse_derived_columns(specs: &[String]) -> Result<Vec<DerivedColumn>> {
    specs
        .iter()
        .map(|spec| DerivedColumn::parse(spec))
        .collect()
}
