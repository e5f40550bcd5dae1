//! Query engine abstraction layer
//!
//! The reader module provides the interface the coordinator uses to run
//! statements against the engine that holds a specification's tables.
//!
//! # Architecture
//!
//! All readers implement the `Reader` trait, which provides:
//! - Statement batches (table loads, preaggregation, exports)
//! - SQL query execution → DataFrame conversion (catalog and metadata)
//! - SQL query execution → Arrow record batches (client results, cacheable)
//!
//! # Example
//!
//! ```rust,ignore
//! use mosaic_publish::reader::{Reader, DuckDBReader};
//!
//! let reader = DuckDBReader::from_connection_string("duckdb://memory")?;
//! reader.execute_batch(&["CREATE TABLE t AS SELECT 1 AS x".to_string()])?;
//! let df = reader.execute("SELECT * FROM t")?;
//! ```

use crate::{DataFrame, Result};
use ::duckdb::arrow::record_batch::RecordBatch;

pub mod connection;
pub mod duckdb;

pub use self::duckdb::DuckDBReader;

/// Result of an Arrow query: the schema plus zero or more batches
pub type ArrowResult = (::duckdb::arrow::datatypes::SchemaRef, Vec<RecordBatch>);

/// Trait for query engine readers
///
/// A reader owns exactly one engine connection. It is moved onto the
/// coordinator's worker thread, so it only needs to be `Send`.
pub trait Reader: Send {
    /// Execute a SQL query and return the result as a DataFrame
    ///
    /// # Errors
    ///
    /// Returns `PublishError::ReaderError` if:
    /// - The SQL is invalid
    /// - The table or columns don't exist
    fn execute(&self, sql: &str) -> Result<DataFrame>;

    /// Execute statements that return no rows, in order
    fn execute_batch(&self, statements: &[String]) -> Result<()>;

    /// Execute a SQL query and return its Arrow record batches
    fn query_arrow(&self, sql: &str) -> Result<ArrowResult>;
}
