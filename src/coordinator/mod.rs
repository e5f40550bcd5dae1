/*!
Query coordinator

Runs every engine request of one publish call on a dedicated worker thread
that owns the [`Reader`]. Callers submit requests and get a [`Ticket`] back;
the coordinator counts submitted-but-unsettled requests, caches query
results and records which table columns each client query reads.

```rust,ignore
let coordinator = Coordinator::open("duckdb://memory")?;
coordinator.exec(vec!["CREATE TABLE t AS SELECT 1 AS x".into()]).wait().await?;
let result = coordinator.query(&Query::from_table("t")).wait().await?;
assert_eq!(result.num_rows(), 1);
assert_eq!(coordinator.pending_exec(), 0);
```
*/

use crate::reader::{DuckDBReader, Reader};
use crate::{DataFrame, PublishError, Result};
use arrow::array::{Array, Float64Array};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use indexmap::IndexSet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub mod cache;
pub mod catalog;
pub mod preagg;
pub mod query;
pub mod usage;

pub use cache::ResultCache;
pub use catalog::{Catalog, TableInfo};
pub use preagg::PreaggregateView;
pub use query::{Expr, Predicate, Query};
pub use usage::{ColumnUsage, TableUsage};

/// Read side of the coordinator used while waiting for work to settle
pub trait QueryMonitor: Send + Sync {
    /// Requests submitted but not yet settled
    fn pending_exec(&self) -> usize;

    /// An engine failure no caller was waiting for, if any
    fn take_failure(&self) -> Option<PublishError> {
        None
    }
}

/// Rows returned by a client query
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl QueryResult {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Values of a column rendered as text; nulls are `None`
    pub fn column_text(&self, name: &str) -> Result<Vec<Option<String>>> {
        use arrow::util::display::array_value_to_string;

        let index = self.column_index(name)?;
        let mut values = Vec::with_capacity(self.num_rows());
        for batch in &self.batches {
            let column = batch.column(index);
            for row in 0..column.len() {
                if column.is_null(row) {
                    values.push(None);
                } else {
                    let text = array_value_to_string(column, row)
                        .map_err(|e| PublishError::InternalError(e.to_string()))?;
                    values.push(Some(text));
                }
            }
        }
        Ok(values)
    }

    /// Values of a numeric column as `f64`; nulls are `None`
    pub fn column_f64(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let index = self.column_index(name)?;
        let mut values = Vec::with_capacity(self.num_rows());
        for batch in &self.batches {
            let cast = arrow::compute::cast(batch.column(index), &DataType::Float64)
                .map_err(|e| PublishError::InternalError(format!("Column '{}': {}", name, e)))?;
            let floats = cast
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| PublishError::InternalError(format!("Column '{}' is not numeric", name)))?;
            values.extend(floats.iter());
        }
        Ok(values)
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.schema
            .index_of(name)
            .map_err(|_| PublishError::InternalError(format!("No column '{}' in result", name)))
    }
}

/// Pending reply to a submitted request
pub struct Ticket<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Ticket<T> {
    fn ready(value: Result<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { rx }
    }

    /// Wait for the request to settle
    pub async fn wait(self) -> Result<T> {
        self.rx
            .await
            .map_err(|_| PublishError::InternalError("Query worker stopped".to_string()))?
    }
}

enum Request {
    Exec {
        statements: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Query {
        sql: String,
        reply: oneshot::Sender<Result<QueryResult>>,
    },
    Frame {
        sql: String,
        reply: oneshot::Sender<Result<DataFrame>>,
    },
}

#[derive(Default)]
struct Shared {
    pending: AtomicUsize,
    cache: Mutex<ResultCache>,
    usage: Mutex<TableUsage>,
    failure: Mutex<Option<PublishError>>,
    views: Mutex<IndexSet<String>>,
}

impl Shared {
    fn settle<T>(&self, reply: oneshot::Sender<Result<T>>, result: Result<T>) {
        if let Err(Err(e)) = reply.send(result) {
            tracing::warn!("Unobserved engine failure: {}", e);
            self.failure.lock().get_or_insert(e);
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to one engine connection and its bookkeeping
///
/// Dropping the handle stops the worker once queued requests drain.
pub struct Coordinator {
    tx: mpsc::UnboundedSender<Request>,
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Open a DuckDB connection and start its worker
    pub fn open(uri: &str) -> Result<Self> {
        let reader = DuckDBReader::from_connection_string(uri)?;
        Self::with_reader(reader)
    }

    /// Start a worker that owns `reader`
    pub fn with_reader<R: Reader + 'static>(reader: R) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("mosaic-engine".to_string())
            .spawn(move || run_worker(reader, rx, worker_shared))?;
        Ok(Self { tx, shared })
    }

    fn submit<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Request) -> Ticket<T> {
        let (reply, rx) = oneshot::channel();
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(make(reply)).is_err() {
            // The request, and its reply sender, came back and were dropped
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
        }
        Ticket { rx }
    }

    /// Run statements that return no rows, in order
    pub fn exec(&self, statements: Vec<String>) -> Ticket<()> {
        self.submit(|reply| Request::Exec { statements, reply })
    }

    /// Run a client query, answering from the cache when possible
    pub fn query(&self, query: &Query) -> Ticket<QueryResult> {
        self.shared.usage.lock().record(&query.table, &query.usage());
        let sql = query.to_sql();

        let cached = self.shared.cache.lock().get(&sql).map(cache::decode_ipc);
        if let Some(result) = cached {
            tracing::debug!(sql = %sql, "cache hit");
            return Ticket::ready(result.map(|(schema, batches)| QueryResult { schema, batches }));
        }

        self.submit(|reply| Request::Query { sql, reply })
    }

    /// Run a metadata query into a DataFrame, bypassing cache and usage
    pub fn query_frame(&self, sql: impl Into<String>) -> Ticket<DataFrame> {
        let sql = sql.into();
        self.submit(|reply| Request::Frame { sql, reply })
    }

    /// Tables and columns currently in the engine
    pub async fn catalog(&self) -> Result<Catalog> {
        let df = self.query_frame(catalog::CATALOG_SQL).wait().await?;
        Catalog::from_frame(&df)
    }

    /// Submit the creation of a preaggregated view without waiting for it
    ///
    /// Returns `false` if the view was already requested.
    pub fn preaggregate(&self, view: &PreaggregateView) -> bool {
        if !self.shared.views.lock().insert(view.name.clone()) {
            return false;
        }
        self.shared.usage.lock().record(&view.source, &view.usage);
        tracing::debug!(view = %view.name, source = %view.source, "preaggregate");
        // Settled through the pending counter; failures land in take_failure
        drop(self.exec(view.statements.clone()));
        true
    }

    /// Snapshot of the observed table usage
    pub fn table_usage(&self) -> TableUsage {
        self.shared.usage.lock().clone()
    }

    /// Number of cached query results
    pub fn cache_len(&self) -> usize {
        self.shared.cache.lock().len()
    }

    /// The result cache as Arrow IPC bytes, `None` when empty
    pub fn export_cache(&self) -> Result<Option<Vec<u8>>> {
        self.shared.cache.lock().export()
    }
}

impl QueryMonitor for Coordinator {
    fn pending_exec(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<PublishError> {
        self.shared.failure.lock().take()
    }
}

fn run_worker<R: Reader>(reader: R, mut rx: mpsc::UnboundedReceiver<Request>, shared: Arc<Shared>) {
    while let Some(request) = rx.blocking_recv() {
        match request {
            Request::Exec { statements, reply } => {
                let result = reader.execute_batch(&statements);
                shared.settle(reply, result);
            }
            Request::Query { sql, reply } => {
                let result = reader.query_arrow(&sql).and_then(|(schema, batches)| {
                    let bytes = cache::encode_ipc(&schema, &batches)?;
                    shared.cache.lock().insert(sql.clone(), bytes);
                    Ok(QueryResult { schema, batches })
                });
                shared.settle(reply, result);
            }
            Request::Frame { sql, reply } => {
                let result = reader.execute(&sql);
                shared.settle(reply, result);
            }
        }
    }
    tracing::debug!("Engine worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::AggregateFunc;

    async fn flights() -> Coordinator {
        let coordinator = Coordinator::open("duckdb://memory").unwrap();
        coordinator
            .exec(vec![
                "CREATE TABLE flights AS SELECT range AS id, range % 7 AS carrier, \
                 range * 1.5 AS delay FROM range(20)"
                    .to_string(),
            ])
            .wait()
            .await
            .unwrap();
        coordinator
    }

    #[tokio::test]
    async fn test_query_records_usage_and_caches() {
        let coordinator = flights().await;
        let query = Query::from_table("flights")
            .select(vec![("value".to_string(), Expr::column("carrier"))])
            .distinct();

        let result = coordinator.query(&query).wait().await.unwrap();
        assert_eq!(result.num_rows(), 7);
        assert_eq!(coordinator.cache_len(), 1);
        assert_eq!(
            coordinator.table_usage().get("flights"),
            Some(&ColumnUsage::columns(["carrier"]))
        );

        // Served from cache
        let again = coordinator.query(&query).wait().await.unwrap();
        assert_eq!(again.num_rows(), 7);
        assert_eq!(coordinator.cache_len(), 1);
        assert_eq!(coordinator.pending_exec(), 0);
    }

    #[tokio::test]
    async fn test_numeric_and_text_columns() {
        let coordinator = flights().await;
        let query = Query::from_table("flights").select(vec![
            (
                "lo".to_string(),
                Expr::Agg {
                    func: AggregateFunc::Min,
                    column: Some("delay".to_string()),
                },
            ),
            (
                "n".to_string(),
                Expr::Agg {
                    func: AggregateFunc::Count,
                    column: None,
                },
            ),
        ]);
        let result = coordinator.query(&query).wait().await.unwrap();
        assert_eq!(result.column_f64("lo").unwrap(), vec![Some(0.0)]);
        assert_eq!(result.column_text("n").unwrap(), vec![Some("20".to_string())]);
        assert!(result.column_f64("missing").is_err());
    }

    #[tokio::test]
    async fn test_exec_error_reaches_waiting_caller() {
        let coordinator = flights().await;
        let err = coordinator
            .exec(vec!["SELECT * FROM nowhere".to_string()])
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::ReaderError(_)));
        assert!(coordinator.take_failure().is_none());
    }

    #[tokio::test]
    async fn test_unobserved_failure_is_recorded() {
        let coordinator = flights().await;
        drop(coordinator.exec(vec!["SELECT * FROM nowhere".to_string()]));
        while coordinator.pending_exec() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(coordinator.take_failure().is_some());
        assert!(coordinator.take_failure().is_none());
    }

    #[tokio::test]
    async fn test_preaggregate_once_and_catalog() {
        let coordinator = flights().await;
        let query = Query::from_table("flights").select(vec![
            ("x".to_string(), Expr::column("carrier")),
            (
                "y".to_string(),
                Expr::Agg {
                    func: AggregateFunc::Sum,
                    column: Some("delay".to_string()),
                },
            ),
        ]);
        let view = preagg::preaggregate_view(&query, &["id".to_string()]).unwrap();

        assert!(coordinator.preaggregate(&view));
        assert!(!coordinator.preaggregate(&view));

        let catalog = coordinator.catalog().await.unwrap();
        let views: Vec<_> = catalog.preaggregates().map(|t| t.qualified_name()).collect();
        assert_eq!(views, vec![view.name.clone()]);
        assert_eq!(
            catalog.columns("flights").unwrap(),
            &["id".to_string(), "carrier".to_string(), "delay".to_string()]
        );
        assert_eq!(
            coordinator.table_usage().get("flights"),
            Some(&ColumnUsage::columns(["carrier", "delay", "id"]))
        );
    }

    #[tokio::test]
    async fn test_cache_export() {
        let coordinator = flights().await;
        assert!(coordinator.export_cache().unwrap().is_none());
        coordinator
            .query(&Query::from_table("flights").limit(3))
            .wait()
            .await
            .unwrap();
        assert!(coordinator.export_cache().unwrap().is_some());
    }
}
