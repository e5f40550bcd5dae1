//! Connection string parsing for the publisher's query engine
//!
//! Parses URI-style connection strings to determine where the engine keeps
//! the tables loaded from a specification.

use crate::{PublishError, Result};

/// Parsed connection information
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionInfo {
    /// DuckDB in-memory database
    DuckDBMemory,
    /// DuckDB file-based database
    DuckDBFile(String),
}

/// Parse a connection string into connection information
///
/// # Supported Formats
///
/// - `duckdb://memory` - DuckDB in-memory database
/// - `duckdb:///absolute/path/file.db` - DuckDB file (absolute path)
/// - `duckdb://relative/file.db` - DuckDB file (relative path)
///
/// # Examples
///
/// ```
/// use mosaic_publish::reader::connection::{parse_connection_string, ConnectionInfo};
///
/// let info = parse_connection_string("duckdb://memory").unwrap();
/// assert_eq!(info, ConnectionInfo::DuckDBMemory);
///
/// let info = parse_connection_string("duckdb://data.db").unwrap();
/// assert_eq!(info, ConnectionInfo::DuckDBFile("data.db".to_string()));
/// ```
pub fn parse_connection_string(uri: &str) -> Result<ConnectionInfo> {
    if uri == "duckdb://memory" || uri == ":memory:" {
        return Ok(ConnectionInfo::DuckDBMemory);
    }

    if let Some(path) = uri.strip_prefix("duckdb://") {
        // Remove leading slashes for file paths
        let cleaned_path = path.trim_start_matches('/');
        if cleaned_path.is_empty() {
            return Err(PublishError::ReaderError(
                "DuckDB file path cannot be empty".to_string(),
            ));
        }
        return Ok(ConnectionInfo::DuckDBFile(cleaned_path.to_string()));
    }

    Err(PublishError::ReaderError(format!(
        "Unsupported connection string format: {}. Supported: duckdb://memory, duckdb://<path>",
        uri
    )))
}
