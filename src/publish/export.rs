//! Data export: `COPY` planned tables and views to Parquet files

use crate::coordinator::query::{quote_ident, quote_literal, quote_table};
use crate::coordinator::Coordinator;
use crate::publish::optimize::{ExportDecision, ExportPlan, TableExport, DATA_DIR, VIEW_DIR};
use crate::spec::SpecNode;
use crate::{PublishError, Result};
use serde::Serialize;
use std::path::Path;

/// What the exporter wrote
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportSummary {
    /// Output-relative files, tables first
    pub files: Vec<String>,
    pub partial: Vec<String>,
}

/// Statement exporting one table or view to `output_dir/file`
pub fn copy_statement(table: &str, columns: Option<&[String]>, output_dir: &Path, file: &str) -> String {
    let select = match columns {
        Some(columns) => columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        None => "*".to_string(),
    };
    let target = output_dir.join(file);
    format!(
        "COPY (SELECT {} FROM {}) TO {} (FORMAT PARQUET)",
        select,
        quote_table(table),
        quote_literal(&target.to_string_lossy())
    )
}

fn table_statement(table: &TableExport, output_dir: &Path) -> Option<String> {
    match &table.decision {
        ExportDecision::Skip => None,
        ExportDecision::Full => Some(copy_statement(&table.name, None, output_dir, &table.file)),
        ExportDecision::Projected(columns) => {
            tracing::info!("Partially exporting table: {}", table.name);
            Some(copy_statement(
                &table.name,
                Some(columns.as_slice()),
                output_dir,
                &table.file,
            ))
        }
    }
}

/// Runs the exports of an [`ExportPlan`] on the publish call's engine
pub struct DataExporter<'a> {
    coordinator: &'a Coordinator,
    output_dir: &'a Path,
}

impl<'a> DataExporter<'a> {
    pub fn new(coordinator: &'a Coordinator, output_dir: &'a Path) -> Self {
        Self {
            coordinator,
            output_dir,
        }
    }

    /// Export tables, then views, as two engine batches
    ///
    /// View declarations are dropped from `spec` afterwards; the post-load
    /// script loads them instead. Nothing written is rolled back on failure.
    pub async fn export(&self, plan: &ExportPlan, spec: &mut SpecNode) -> Result<ExportSummary> {
        let mut summary = ExportSummary::default();

        let mut statements = Vec::new();
        for table in plan.retained() {
            if let Some(statement) = table_statement(table, self.output_dir) {
                statements.push(statement);
                summary.files.push(table.file.clone());
                if matches!(table.decision, ExportDecision::Projected(_)) {
                    summary.partial.push(table.name.clone());
                }
            }
        }
        if !statements.is_empty() {
            tracing::info!("Exporting data tables to Parquet...");
            tokio::fs::create_dir_all(self.output_dir.join(DATA_DIR)).await?;
            self.run(statements).await?;
        }

        if !plan.views.is_empty() {
            tracing::info!("Exporting materialized views to Parquet...");
            tokio::fs::create_dir_all(self.output_dir.join(VIEW_DIR)).await?;
            let statements = plan
                .views
                .iter()
                .map(|view| copy_statement(&view.name, None, self.output_dir, &view.file))
                .collect();
            self.run(statements).await?;
            summary
                .files
                .extend(plan.views.iter().map(|view| view.file.clone()));
            for view in &plan.views {
                spec.data.shift_remove(&view.name);
            }
        }

        Ok(summary)
    }

    async fn run(&self, statements: Vec<String>) -> Result<()> {
        self.coordinator
            .exec(statements)
            .wait()
            .await
            .map_err(|e| match e {
                PublishError::ReaderError(message) => PublishError::ExportError(message),
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::optimize::ViewExport;
    use crate::spec::{ComponentNode, DataNode};

    fn flights() -> Coordinator {
        let coordinator = Coordinator::open("duckdb://memory").unwrap();
        drop(coordinator.exec(vec![
            "CREATE TABLE flights AS SELECT range AS id, range * 2 AS delay, range % 3 AS carrier FROM range(10)"
                .to_string(),
            "CREATE SCHEMA mosaic".to_string(),
            "CREATE TABLE mosaic.preagg_0000abcd AS SELECT carrier, count(*) AS n FROM flights GROUP BY carrier"
                .to_string(),
        ]));
        coordinator
    }

    fn table(name: &str, decision: ExportDecision) -> TableExport {
        TableExport {
            name: name.to_string(),
            file: format!("data/{}.parquet", name),
            decision,
        }
    }

    #[test]
    fn test_copy_statement() {
        let sql = copy_statement(
            "flights",
            Some(&["delay".to_string(), "time".to_string()][..]),
            Path::new("/out"),
            "data/flights.parquet",
        );
        assert_eq!(
            sql,
            "COPY (SELECT \"delay\", \"time\" FROM \"flights\") TO '/out/data/flights.parquet' (FORMAT PARQUET)"
        );

        let sql = copy_statement(
            "mosaic.preagg_1",
            None,
            Path::new("/out"),
            "data/.mosaic/preagg_1.parquet",
        );
        assert!(sql.starts_with("COPY (SELECT * FROM \"mosaic\".\"preagg_1\")"));
    }

    #[tokio::test]
    async fn test_export_tables_and_views() {
        let coordinator = flights();
        let dir = tempfile::tempdir().unwrap();
        let mut spec = SpecNode::new(ComponentNode::VConcat { children: vec![] })
            .with_data(DataNode::parquet("flights", "data/flights.parquet"))
            .with_data(DataNode::parquet(
                "mosaic.preagg_0000abcd",
                "data/.mosaic/preagg_0000abcd.parquet",
            ));
        let plan = ExportPlan {
            tables: vec![table(
                "flights",
                ExportDecision::Projected(vec!["delay".to_string()]),
            )],
            views: vec![ViewExport {
                name: "mosaic.preagg_0000abcd".to_string(),
                file: "data/.mosaic/preagg_0000abcd.parquet".to_string(),
            }],
            post_load: None,
        };

        let summary = DataExporter::new(&coordinator, dir.path())
            .export(&plan, &mut spec)
            .await
            .unwrap();

        assert_eq!(summary.partial, vec!["flights"]);
        assert_eq!(summary.files.len(), 2);
        assert!(dir.path().join("data/flights.parquet").exists());
        assert!(dir.path().join("data/.mosaic/preagg_0000abcd.parquet").exists());
        assert_eq!(spec.data.len(), 1);
        assert!(spec.data.contains_key("flights"));

        let path = dir.path().join("data/flights.parquet");
        let columns = coordinator
            .query_frame(format!(
                "SELECT column_name FROM (DESCRIBE SELECT * FROM read_parquet({}))",
                quote_literal(&path.to_string_lossy())
            ))
            .wait()
            .await
            .unwrap();
        assert_eq!(columns.height(), 1);
    }

    #[tokio::test]
    async fn test_skipped_tables_write_nothing() {
        let coordinator = flights();
        let dir = tempfile::tempdir().unwrap();
        let mut spec = SpecNode::new(ComponentNode::VConcat { children: vec![] });
        let plan = ExportPlan {
            tables: vec![table("flights", ExportDecision::Skip)],
            ..ExportPlan::default()
        };
        let summary = DataExporter::new(&coordinator, dir.path())
            .export(&plan, &mut spec)
            .await
            .unwrap();
        assert!(summary.files.is_empty());
        assert!(!dir.path().join("data").exists());
    }

    #[tokio::test]
    async fn test_missing_table_is_export_error() {
        let coordinator = flights();
        let dir = tempfile::tempdir().unwrap();
        let mut spec = SpecNode::new(ComponentNode::VConcat { children: vec![] });
        let plan = ExportPlan {
            tables: vec![table("nope", ExportDecision::Full)],
            ..ExportPlan::default()
        };
        let err = DataExporter::new(&coordinator, dir.path())
            .export(&plan, &mut spec)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::ExportError(_)));
    }
}
