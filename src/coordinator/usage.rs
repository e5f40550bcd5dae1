//! Table usage observed during mount and activation

use crate::spec::{ComponentNode, InputKind, SpecNode};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeSet;

/// Columns of one table that something reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnUsage {
    /// Only these columns
    Columns(BTreeSet<String>),
    /// Unrestricted use of the table
    Full,
}

impl ColumnUsage {
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnUsage::Columns(columns.into_iter().map(Into::into).collect())
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ColumnUsage::Full)
    }

    /// Union with another usage; `Full` absorbs everything
    pub fn merge(&mut self, other: &ColumnUsage) {
        match other {
            ColumnUsage::Full => *self = ColumnUsage::Full,
            ColumnUsage::Columns(theirs) => {
                if let ColumnUsage::Columns(mine) = self {
                    mine.extend(theirs.iter().cloned());
                }
            }
        }
    }
}

/// Table name → column usage, in first-reference order
///
/// A table with no entry was never referenced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableUsage {
    tables: IndexMap<String, ColumnUsage>,
}

impl TableUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `usage` into the entry for `table`
    pub fn record(&mut self, table: &str, usage: &ColumnUsage) {
        match self.tables.get_mut(table) {
            Some(existing) => existing.merge(usage),
            None => {
                self.tables.insert(table.to_string(), usage.clone());
            }
        }
    }

    pub fn mark_full(&mut self, table: &str) {
        self.tables.insert(table.to_string(), ColumnUsage::Full);
    }

    pub fn get(&self, table: &str) -> Option<&ColumnUsage> {
        self.tables.get(table)
    }

    /// Record references visible in the AST itself
    ///
    /// Table inputs read every column unless they list their columns.
    pub fn record_references(&mut self, spec: &SpecNode) {
        for component in spec.components() {
            let ComponentNode::Input(input) = component else {
                continue;
            };
            if input.kind != InputKind::Table {
                continue;
            }
            let Some(from) = &input.from else {
                continue;
            };
            match &input.columns {
                Some(columns) => self.record(&from.table, &ColumnUsage::columns(columns.clone())),
                None => self.mark_full(&from.table),
            }
        }
    }
}
