//! Query result cache
//!
//! Results are kept as Arrow IPC stream bytes keyed by their SQL text. The
//! whole cache exports to a single-row IPC stream with one
//! `cache: Map<Utf8, Binary>` column, which the published page loads to
//! skip recomputing known results.

use crate::{PublishError, Result};
use arrow::array::{Array, BinaryBuilder, MapBuilder, StringBuilder};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use std::sync::Arc;

/// Encode record batches as an Arrow IPC stream
pub fn encode_ipc(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buffer, schema)
            .map_err(|e| PublishError::InternalError(format!("IPC writer: {}", e)))?;
        for batch in batches {
            writer
                .write(batch)
                .map_err(|e| PublishError::InternalError(format!("IPC write: {}", e)))?;
        }
        writer
            .finish()
            .map_err(|e| PublishError::InternalError(format!("IPC finish: {}", e)))?;
    }
    Ok(buffer)
}

/// Decode an Arrow IPC stream
pub fn decode_ipc(bytes: &[u8]) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let reader = StreamReader::try_new(bytes, None)
        .map_err(|e| PublishError::InternalError(format!("IPC reader: {}", e)))?;
    let schema = reader.schema();
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| PublishError::InternalError(format!("IPC read: {}", e)))?;
    Ok((schema, batches))
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: IndexMap<String, Vec<u8>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sql: &str) -> Option<&[u8]> {
        self.entries.get(sql).map(Vec::as_slice)
    }

    pub fn insert(&mut self, sql: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(sql.into(), bytes);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the cache, or `None` when it is empty
    pub fn export(&self) -> Result<Option<Vec<u8>>> {
        if self.entries.is_empty() {
            return Ok(None);
        }

        let mut builder = MapBuilder::new(None, StringBuilder::new(), BinaryBuilder::new());
        for (sql, bytes) in &self.entries {
            builder.keys().append_value(sql);
            builder.values().append_value(bytes);
        }
        builder
            .append(true)
            .map_err(|e| PublishError::InternalError(format!("cache map: {}", e)))?;
        let map = builder.finish();

        let schema = Arc::new(Schema::new(vec![Field::new(
            "cache",
            map.data_type().clone(),
            false,
        )]));
        let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(map)])
            .map_err(|e| PublishError::InternalError(format!("cache batch: {}", e)))?;

        encode_ipc(&schema, &[batch]).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, MapArray};
    use arrow::datatypes::DataType;

    fn one_column(values: Vec<i64>) -> (SchemaRef, Vec<RecordBatch>) {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(values))]).unwrap();
        (schema, vec![batch])
    }

    #[test]
    fn test_empty_cache_exports_nothing() {
        assert!(ResultCache::new().export().unwrap().is_none());
    }

    #[test]
    fn test_export_is_single_row_map() {
        let mut cache = ResultCache::new();
        let (schema, batches) = one_column(vec![1, 2, 3]);
        cache.insert("SELECT a", encode_ipc(&schema, &batches).unwrap());
        cache.insert("SELECT b", encode_ipc(&schema, &batches).unwrap());

        let bytes = cache.export().unwrap().unwrap();
        let (schema, batches) = decode_ipc(&bytes).unwrap();
        assert_eq!(schema.field(0).name(), "cache");
        assert!(matches!(schema.field(0).data_type(), DataType::Map(_, _)));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 1);

        let map = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<MapArray>()
            .unwrap();
        assert_eq!(map.value(0).len(), 2);
    }

    #[test]
    fn test_cached_result_decodes() {
        let (schema, batches) = one_column(vec![7]);
        let mut cache = ResultCache::new();
        cache.insert("q", encode_ipc(&schema, &batches).unwrap());
        let (_, decoded) = decode_ipc(cache.get("q").unwrap()).unwrap();
        assert_eq!(decoded[0].num_rows(), 1);
    }
}
