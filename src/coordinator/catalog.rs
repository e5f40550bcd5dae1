//! Engine catalog: tables and their declared columns

use crate::{DataFrame, PublishError, Result};
use indexmap::IndexMap;

/// Schema holding preaggregated views
pub const PREAGG_SCHEMA: &str = "mosaic";

/// Name prefix of preaggregated views
pub const PREAGG_PREFIX: &str = "preagg_";

pub const CATALOG_SQL: &str = "SELECT table_schema, table_name, column_name \
     FROM information_schema.columns \
     WHERE table_catalog = current_database() \
     ORDER BY table_schema, table_name, ordinal_position";

/// One engine table
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    /// Columns in declared order
    pub columns: Vec<String>,
}

impl TableInfo {
    /// Name as referenced by queries: bare for the default schema
    pub fn qualified_name(&self) -> String {
        if self.schema == "main" {
            self.name.clone()
        } else {
            format!("{}.{}", self.schema, self.name)
        }
    }

    pub fn is_preaggregate(&self) -> bool {
        self.schema == PREAGG_SCHEMA && self.name.starts_with(PREAGG_PREFIX)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    tables: IndexMap<String, TableInfo>,
}

impl Catalog {
    /// Build from the rows of [`CATALOG_SQL`]
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let text = |name: &str| {
            df.column(name)
                .and_then(|c| c.str().cloned())
                .map_err(|e| PublishError::ReaderError(format!("Catalog column '{}': {}", name, e)))
        };
        let schemas = text("table_schema")?;
        let names = text("table_name")?;
        let columns = text("column_name")?;

        let mut tables: IndexMap<String, TableInfo> = IndexMap::new();
        let rows = (&schemas)
            .into_iter()
            .zip(&names)
            .zip(&columns);
        for ((schema, name), column) in rows {
            let (Some(schema), Some(name), Some(column)) = (schema, name, column) else {
                continue;
            };
            let info = TableInfo {
                schema: schema.to_string(),
                name: name.to_string(),
                columns: Vec::new(),
            };
            tables
                .entry(info.qualified_name())
                .or_insert(info)
                .columns
                .push(column.to_string());
        }
        Ok(Self { tables })
    }

    /// Look up a table by its qualified name
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    pub fn columns(&self, name: &str) -> Option<&[String]> {
        self.table(name).map(|t| t.columns.as_slice())
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    pub fn preaggregates(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables().filter(|t| t.is_preaggregate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn frame(rows: &[(&str, &str, &str)]) -> DataFrame {
        let col = |i: usize, name: &str| -> Column {
            let values: Vec<&str> = rows
                .iter()
                .map(|r| match i {
                    0 => r.0,
                    1 => r.1,
                    _ => r.2,
                })
                .collect();
            Series::new(name.into(), values).into()
        };
        DataFrame::new(vec![
            col(0, "table_schema"),
            col(1, "table_name"),
            col(2, "column_name"),
        ])
        .unwrap()
    }

    #[test]
    fn test_groups_columns_in_order() {
        let df = frame(&[
            ("main", "flights", "delay"),
            ("main", "flights", "distance"),
            ("mosaic", "preagg_1a2b3c4d", "x"),
        ]);
        let catalog = Catalog::from_frame(&df).unwrap();

        assert_eq!(
            catalog.columns("flights").unwrap(),
            &["delay".to_string(), "distance".to_string()]
        );
        let views: Vec<_> = catalog.preaggregates().map(|t| t.qualified_name()).collect();
        assert_eq!(views, vec!["mosaic.preagg_1a2b3c4d"]);
        assert!(!catalog.table("flights").unwrap().is_preaggregate());
    }

    #[test]
    fn test_missing_column_is_reader_error() {
        let df = DataFrame::new(vec![Series::new("x".into(), vec!["a"]).into()]).unwrap();
        assert!(matches!(
            Catalog::from_frame(&df),
            Err(PublishError::ReaderError(_))
        ));
    }
}
