//! DuckDB query engine implementation
//!
//! Provides a reader for DuckDB databases with Polars DataFrame results for
//! metadata queries and Arrow record batches for client queries.

use crate::reader::{connection::ConnectionInfo, ArrowResult, Reader};
use crate::{DataFrame, PublishError, Result};
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::types::ValueRef;
use duckdb::{params, Connection};

/// DuckDB database reader
///
/// Executes SQL against a DuckDB database (in-memory or file-based). One
/// reader is one connection; each publish call opens its own.
///
/// # Examples
///
/// ```rust,ignore
/// use mosaic_publish::reader::{Reader, DuckDBReader};
///
/// // In-memory database
/// let reader = DuckDBReader::from_connection_string("duckdb://memory")?;
/// let df = reader.execute("SELECT 1 as x, 2 as y")?;
///
/// // File-based database
/// let reader = DuckDBReader::from_connection_string("duckdb://data.db")?;
/// let (schema, batches) = reader.query_arrow("SELECT * FROM flights")?;
/// ```
pub struct DuckDBReader {
    conn: Connection,
}

impl DuckDBReader {
    /// Create a new DuckDB reader from a connection string
    ///
    /// # Arguments
    ///
    /// * `uri` - Connection string (e.g., "duckdb://memory" or "duckdb://file.db")
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The connection string format is invalid
    /// - The database file cannot be opened
    /// - DuckDB initialization fails
    pub fn from_connection_string(uri: &str) -> Result<Self> {
        let conn_info = super::connection::parse_connection_string(uri)?;

        let conn = match conn_info {
            ConnectionInfo::DuckDBMemory => Connection::open_in_memory().map_err(|e| {
                PublishError::ReaderError(format!("Failed to open in-memory DuckDB: {}", e))
            })?,
            ConnectionInfo::DuckDBFile(path) => Connection::open(&path).map_err(|e| {
                PublishError::ReaderError(format!("Failed to open DuckDB file '{}': {}", path, e))
            })?,
        };

        Ok(Self { conn })
    }

    /// Get a reference to the underlying DuckDB connection
    ///
    /// Useful for executing setup queries (CREATE TABLE, INSERT, etc.)
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Helper struct for building typed columns from rows
enum ColumnBuilder {
    Int(Vec<Option<i64>>),
    UBigInt(Vec<Option<u64>>), // Keep as u64, check overflow
    Double(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
    Fallback(Vec<Option<String>>), // Fallback for unsupported types
}

impl ColumnBuilder {
    fn new(duckdb_type: duckdb::types::Type) -> Self {
        use duckdb::types::Type;
        match duckdb_type {
            Type::TinyInt
            | Type::SmallInt
            | Type::Int
            | Type::BigInt
            | Type::UTinyInt
            | Type::USmallInt
            | Type::UInt => ColumnBuilder::Int(Vec::new()),
            Type::UBigInt => ColumnBuilder::UBigInt(Vec::new()),
            Type::Float | Type::Double | Type::Decimal => ColumnBuilder::Double(Vec::new()),
            Type::Boolean => ColumnBuilder::Boolean(Vec::new()),
            Type::Text => ColumnBuilder::Text(Vec::new()),
            _ => ColumnBuilder::Fallback(Vec::new()),
        }
    }

    fn add_value(&mut self, row: &duckdb::Row, col_idx: usize) {
        use ColumnBuilder::*;
        let value = row.get_ref(col_idx).ok();
        match self {
            Int(ref mut values) => values.push(value.and_then(as_i64)),
            UBigInt(ref mut values) => values.push(match value {
                Some(ValueRef::UBigInt(v)) => Some(v),
                other => other.and_then(as_i64).map(|v| v as u64),
            }),
            Double(ref mut values) => values.push(value.and_then(as_f64)),
            Boolean(ref mut values) => values.push(match value {
                Some(ValueRef::Boolean(b)) => Some(b),
                _ => None,
            }),
            Text(ref mut values) => values.push(row.get(col_idx).ok()),
            Fallback(ref mut values) => {
                let val = match value {
                    Some(ValueRef::Null) | None => None,
                    Some(_) => row.get::<_, String>(col_idx).ok(),
                };
                values.push(val);
            }
        }
    }

    fn build(self, column_name: &str) -> polars::prelude::Series {
        use polars::prelude::*;
        use ColumnBuilder::*;

        match self {
            Int(values) => Series::new(column_name.into(), values),
            UBigInt(values) => {
                // Check if all values fit in i64
                let all_fit = values
                    .iter()
                    .all(|opt_val| opt_val.map(|val| val <= i64::MAX as u64).unwrap_or(true));

                if all_fit {
                    let i64_values: Vec<Option<i64>> = values
                        .into_iter()
                        .map(|opt_val| opt_val.map(|val| val as i64))
                        .collect();
                    Series::new(column_name.into(), i64_values)
                } else {
                    tracing::warn!(
                        "UBigInt overflow in column '{}', converting to string",
                        column_name
                    );
                    let string_values: Vec<Option<String>> = values
                        .into_iter()
                        .map(|opt_val| opt_val.map(|val| val.to_string()))
                        .collect();
                    Series::new(column_name.into(), string_values)
                }
            }
            Double(values) => Series::new(column_name.into(), values),
            Boolean(values) => Series::new(column_name.into(), values),
            Text(values) => Series::new(column_name.into(), values),
            Fallback(values) => {
                tracing::debug!(
                    "Using fallback string conversion for column '{}'",
                    column_name
                );
                Series::new(column_name.into(), values)
            }
        }
    }
}

fn as_i64(value: ValueRef<'_>) -> Option<i64> {
    match value {
        ValueRef::TinyInt(i) => Some(i as i64),
        ValueRef::SmallInt(i) => Some(i as i64),
        ValueRef::Int(i) => Some(i as i64),
        ValueRef::BigInt(i) => Some(i),
        ValueRef::UTinyInt(i) => Some(i as i64),
        ValueRef::USmallInt(i) => Some(i as i64),
        ValueRef::UInt(i) => Some(i as i64),
        _ => None,
    }
}

fn as_f64(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Float(f) => Some(f as f64),
        ValueRef::Double(f) => Some(f),
        // Convert Decimal to string, then parse as f64
        ValueRef::Decimal(d) => d.to_string().parse::<f64>().ok(),
        other => as_i64(other).map(|i| i as f64),
    }
}

impl Reader for DuckDBReader {
    fn execute(&self, sql: &str) -> Result<DataFrame> {
        use polars::prelude::*;

        // Prepare and execute statement to get schema
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| PublishError::ReaderError(format!("Failed to prepare SQL: {}", e)))?;

        // Execute to populate schema info
        stmt.execute(params![])
            .map_err(|e| PublishError::ReaderError(format!("Failed to execute SQL: {}", e)))?;

        // Get column metadata BEFORE creating iterator
        let column_count = stmt.column_count();
        if column_count == 0 {
            return Err(PublishError::ReaderError(
                "Query returned no columns".to_string(),
            ));
        }

        let mut column_names = Vec::new();
        let mut column_types = Vec::new();
        for i in 0..column_count {
            column_names.push(
                stmt.column_name(i)
                    .map_err(|e| {
                        PublishError::ReaderError(format!("Failed to get column name: {}", e))
                    })?
                    .to_string(),
            );
            let data_type = stmt.column_type(i);
            column_types.push(duckdb::types::Type::from(&data_type));
        }

        // Initialize storage for each column
        let column_builders: Vec<ColumnBuilder> = column_types
            .into_iter()
            .map(ColumnBuilder::new)
            .collect();

        // Collect all values using query_map (which borrows stmt mutably during iteration)
        let builders_cell = std::cell::RefCell::new(column_builders);

        stmt.query_map(params![], |row| {
            let mut builders = builders_cell.borrow_mut();
            for (col_idx, builder) in builders.iter_mut().enumerate() {
                builder.add_value(row, col_idx);
            }
            Ok(())
        })
        .map_err(|e| PublishError::ReaderError(format!("Failed to iterate rows: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| PublishError::ReaderError(format!("Failed to process rows: {}", e)))?;

        // Build columns from column builders
        let columns: Vec<Column> = builders_cell
            .into_inner()
            .into_iter()
            .zip(column_names.iter())
            .map(|(builder, name)| builder.build(name).into())
            .collect();

        DataFrame::new(columns)
            .map_err(|e| PublishError::ReaderError(format!("Failed to create DataFrame: {}", e)))
    }

    fn execute_batch(&self, statements: &[String]) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }
        for sql in statements {
            tracing::debug!(sql = %sql, "exec");
        }
        self.conn
            .execute_batch(&statements.join(";\n"))
            .map_err(|e| PublishError::ReaderError(format!("Failed to execute statements: {}", e)))
    }

    fn query_arrow(&self, sql: &str) -> Result<ArrowResult> {
        tracing::debug!(sql = %sql, "query");
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| PublishError::ReaderError(format!("Failed to prepare SQL: {}", e)))?;
        let arrow = stmt
            .query_arrow(params![])
            .map_err(|e| PublishError::ReaderError(format!("Failed to execute SQL: {}", e)))?;
        let schema = arrow.get_schema();
        let batches: Vec<RecordBatch> = arrow.collect();
        Ok((schema, batches))
    }
}
