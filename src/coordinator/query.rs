//! Structured client queries
//!
//! Clients describe their data needs as a [`Query`] rather than raw SQL so the
//! coordinator can observe which columns of which table each request touches.

use crate::coordinator::usage::ColumnUsage;
use crate::spec::AggregateFunc;
use serde_json::Value;
use std::collections::BTreeSet;

/// Quote an identifier for DuckDB
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name (`schema.table`)
pub fn quote_table(name: &str) -> String {
    match name.split_once('.') {
        Some((schema, table)) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        None => quote_ident(name),
    }
}

/// Quote a string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a JSON scalar as a SQL literal
pub fn sql_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string().to_uppercase(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        other => quote_literal(&other.to_string()),
    }
}

/// Expression selected by a client query
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    /// Lower edge of the bin containing `column`
    Bin { column: String, step: f64 },
    Agg {
        func: AggregateFunc,
        column: Option<String>,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Agg { .. })
    }

    /// Source column this expression reads, if any
    pub fn source_column(&self) -> Option<&str> {
        match self {
            Expr::Column(column) | Expr::Bin { column, .. } => Some(column),
            Expr::Agg { column, .. } => column.as_deref(),
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Expr::Column(column) => quote_ident(column),
            Expr::Bin { column, step } => {
                format!("FLOOR({} / {}) * {}", quote_ident(column), step, step)
            }
            Expr::Agg { func, column } => match column {
                Some(column) => format!("{}({})", func.as_str(), quote_ident(column)),
                None => format!("{}(*)", func.as_str()),
            },
        }
    }
}

/// Filter predicate contributed by a selection clause
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Inclusive numeric range
    Range { column: String, lo: f64, hi: f64 },
    Equals { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    /// Case-insensitive substring match
    Like { column: String, pattern: String },
}

impl Predicate {
    pub fn column(&self) -> &str {
        match self {
            Predicate::Range { column, .. }
            | Predicate::Equals { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Like { column, .. } => column,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Predicate::Range { column, lo, hi } => {
                format!("{} BETWEEN {} AND {}", quote_ident(column), lo, hi)
            }
            Predicate::Equals { column, value } => {
                format!("{} = {}", quote_ident(column), sql_value(value))
            }
            Predicate::In { column, values } => {
                let values: Vec<String> = values.iter().map(sql_value).collect();
                format!("{} IN ({})", quote_ident(column), values.join(", "))
            }
            Predicate::Like { column, pattern } => format!(
                "{} ILIKE {}",
                quote_ident(column),
                quote_literal(&format!("%{}%", pattern))
            ),
        }
    }
}

/// Projection of a query: every column, or named expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    All,
    Exprs(Vec<(String, Expr)>),
}

/// A client query against a single table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub select: Selection,
    pub filters: Vec<Predicate>,
    pub distinct: bool,
    pub order_by: Vec<String>,
    pub limit: Option<usize>,
}

impl Query {
    /// `SELECT * FROM table`
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: Selection::All,
            filters: Vec::new(),
            distinct: false,
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Replace the projection with a list of `(alias, expr)` pairs
    pub fn select(mut self, exprs: Vec<(String, Expr)>) -> Self {
        self.select = Selection::Exprs(exprs);
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn order_by(mut self, alias: impl Into<String>) -> Self {
        self.order_by.push(alias.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Selected expressions, empty for `SELECT *`
    pub fn exprs(&self) -> &[(String, Expr)] {
        match &self.select {
            Selection::All => &[],
            Selection::Exprs(exprs) => exprs,
        }
    }

    /// Whether any selected expression aggregates
    pub fn is_aggregate(&self) -> bool {
        self.exprs().iter().any(|(_, expr)| expr.is_aggregate())
    }

    /// Non-aggregate expressions, which become the GROUP BY keys
    pub fn dimensions(&self) -> Vec<&(String, Expr)> {
        self.exprs()
            .iter()
            .filter(|(_, expr)| !expr.is_aggregate())
            .collect()
    }

    pub fn to_sql(&self) -> String {
        let projection = match &self.select {
            Selection::All => "*".to_string(),
            Selection::Exprs(exprs) => exprs
                .iter()
                .map(|(alias, expr)| format!("{} AS {}", expr.to_sql(), quote_ident(alias)))
                .collect::<Vec<_>>()
                .join(", "),
        };

        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if self.distinct { "DISTINCT " } else { "" },
            projection,
            quote_table(&self.table)
        );

        if !self.filters.is_empty() {
            let predicates: Vec<String> = self.filters.iter().map(Predicate::to_sql).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        if self.is_aggregate() {
            let keys: Vec<String> = self
                .dimensions()
                .iter()
                .map(|(_, expr)| expr.to_sql())
                .collect();
            if !keys.is_empty() {
                sql.push_str(" GROUP BY ");
                sql.push_str(&keys.join(", "));
            }
        }

        if !self.order_by.is_empty() {
            let keys: Vec<String> = self.order_by.iter().map(|a| quote_ident(a)).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }

    /// Columns of `table` this query reads
    pub fn usage(&self) -> ColumnUsage {
        match &self.select {
            Selection::All => ColumnUsage::Full,
            Selection::Exprs(exprs) => {
                let mut columns: BTreeSet<String> = exprs
                    .iter()
                    .filter_map(|(_, expr)| expr.source_column())
                    .map(str::to_string)
                    .collect();
                columns.extend(self.filters.iter().map(|p| p.column().to_string()));
                ColumnUsage::Columns(columns)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("delay"), "\"delay\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_table("mosaic.preagg_1"), "\"mosaic\".\"preagg_1\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(sql_value(&json!(true)), "TRUE");
        assert_eq!(sql_value(&json!(2.5)), "2.5");
    }

    #[test]
    fn test_aggregate_query_groups_by_dimensions() {
        let query = Query::from_table("flights")
            .select(vec![
                (
                    "x".to_string(),
                    Expr::Bin {
                        column: "delay".to_string(),
                        step: 10.0,
                    },
                ),
                (
                    "y".to_string(),
                    Expr::Agg {
                        func: AggregateFunc::Count,
                        column: None,
                    },
                ),
            ])
            .filter(Predicate::Range {
                column: "distance".to_string(),
                lo: 0.0,
                hi: 500.0,
            });

        assert_eq!(
            query.to_sql(),
            "SELECT FLOOR(\"delay\" / 10) * 10 AS \"x\", count(*) AS \"y\" FROM \"flights\" \
             WHERE \"distance\" BETWEEN 0 AND 500 GROUP BY FLOOR(\"delay\" / 10) * 10"
        );
        assert_eq!(
            query.usage(),
            ColumnUsage::Columns(
                ["delay", "distance"].iter().map(|s| s.to_string()).collect()
            )
        );
    }

    #[test]
    fn test_distinct_menu_query() {
        let query = Query::from_table("flights")
            .select(vec![("value".to_string(), Expr::column("carrier"))])
            .distinct()
            .order_by("value");
        assert_eq!(
            query.to_sql(),
            "SELECT DISTINCT \"carrier\" AS \"value\" FROM \"flights\" ORDER BY \"value\""
        );
        assert!(!query.is_aggregate());
    }

    #[test]
    fn test_select_all_is_full_usage() {
        let query = Query::from_table("t").limit(100);
        assert_eq!(query.to_sql(), "SELECT * FROM \"t\" LIMIT 100");
        assert_eq!(query.usage(), ColumnUsage::Full);
    }

    #[test]
    fn test_predicates() {
        let p = Predicate::In {
            column: "c".to_string(),
            values: vec![json!("a"), json!(1)],
        };
        assert_eq!(p.to_sql(), "\"c\" IN ('a', 1)");
        let p = Predicate::Like {
            column: "name".to_string(),
            pattern: "ab".to_string(),
        };
        assert_eq!(p.to_sql(), "\"name\" ILIKE '%ab%'");
    }
}
