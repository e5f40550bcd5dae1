/*!
Publish pipeline

[`publish`] turns specification text into a statically servable directory:

1. parse the specification
2. mount it into a fresh [`RenderContext`] and wait for every client's
   initial query
3. activate interactors and inputs so deferred work (preaggregated views)
   runs in the engine
4. plan what to export for the requested [`OptimizationLevel`]
5. export tables and views to Parquet
6. write `index.html`, bundle `index.js` and, optionally, the result cache

A visualization with no interactors or activatable inputs skips steps 3-5
and is published as a static page.

```rust,ignore
use mosaic_publish::publish::{publish, OptimizationLevel, PublishOptions};

let report = publish(
    PublishOptions::new(std::fs::read_to_string("flights.yaml")?)
        .with_output_path("site")
        .with_optimize(OptimizationLevel::More),
)
.await?;
println!("{} files", report.files.len());
```
*/

use crate::bundle::{Bundler, CdnBundler};
use crate::coordinator::Coordinator;
use crate::render::{mount, RenderContext};
use crate::spec::parse_spec;
use crate::writer::PathRewrite;
use crate::{PublishError, Result};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;

pub mod activate;
pub mod assemble;
pub mod export;
pub mod optimize;

pub use activate::{
    wait_for_quiescence, Activatables, ActivationReport, ActivationSettings, ActivationSimulator,
    ActivationStep,
};
pub use assemble::{ArtifactAssembler, ArtifactManifest, AssemblyInput};
pub use export::{DataExporter, ExportSummary};
pub use optimize::{
    ExportDecision, ExportPlan, Optimization, OptimizationLevel, OptimizationPlanner,
    OptimizationSet, TableExport, ViewExport,
};

pub const DEFAULT_OUTPUT_PATH: &str = "out";
pub const DEFAULT_TITLE: &str = "Mosaic Visualization";
pub const DEFAULT_DATABASE: &str = "duckdb://memory";

/// Settings of one publish call
#[derive(Clone)]
pub struct PublishOptions {
    /// Raw specification text, YAML or JSON
    pub spec: String,
    /// Cleared and recreated by the publish call
    pub output_path: PathBuf,
    pub title: String,
    pub optimize: OptimizationLevel,
    /// Script run in the page after the visualization mounts
    pub custom_script: Option<String>,
    /// Engine connection string, `duckdb://memory` or `duckdb://<path>`
    pub database: String,
    pub activation: ActivationSettings,
    pub path_rewrite: PathRewrite,
    pub bundler: Arc<dyn Bundler>,
    pub cancel: CancellationToken,
    /// Subscriber receiving this call's diagnostics instead of the global one
    pub logger: Option<tracing::Dispatch>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            spec: String::new(),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            title: DEFAULT_TITLE.to_string(),
            optimize: OptimizationLevel::default(),
            custom_script: None,
            database: DEFAULT_DATABASE.to_string(),
            activation: ActivationSettings::default(),
            path_rewrite: PathRewrite::Origin,
            bundler: Arc::new(CdnBundler::default()),
            cancel: CancellationToken::new(),
            logger: None,
        }
    }
}

impl PublishOptions {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            ..Self::default()
        }
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_optimize(mut self, level: OptimizationLevel) -> Self {
        self.optimize = level;
        self
    }

    pub fn with_custom_script(mut self, script: impl Into<String>) -> Self {
        self.custom_script = Some(script.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_activation(mut self, activation: ActivationSettings) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_path_rewrite(mut self, path_rewrite: PathRewrite) -> Self {
        self.path_rewrite = path_rewrite;
        self
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = bundler;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_logger(mut self, logger: impl Into<tracing::Dispatch>) -> Self {
        self.logger = Some(logger.into());
        self
    }
}

/// Summary of a finished publish call
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub interactive: bool,
    pub optimize: OptimizationLevel,
    pub optimizations: OptimizationSet,
    pub activation: ActivationReport,
    pub tables: Vec<TableExport>,
    pub views: Vec<ViewExport>,
    /// Every file written, relative to the output directory
    pub files: Vec<PathBuf>,
}

/// Publish a specification
///
/// Parse and mount errors leave the output directory untouched. Failures
/// after it has been cleared leave whatever was already written.
pub async fn publish(options: PublishOptions) -> Result<PublishReport> {
    match options.logger.clone() {
        Some(logger) => Publisher::new(options).run().with_subscriber(logger).await,
        None => Publisher::new(options).run().await,
    }
}

struct Publisher {
    options: PublishOptions,
}

impl Publisher {
    fn new(options: PublishOptions) -> Self {
        Self { options }
    }

    async fn run(self) -> Result<PublishReport> {
        let options = &self.options;
        let cancel = &options.cancel;

        let mut spec = parse_spec(&options.spec)?;
        tracing::info!("Parsed specification with {} data declarations", spec.data.len());

        let coordinator = Arc::new(Coordinator::open(&options.database)?);
        let mut ctx = RenderContext::new(Arc::clone(&coordinator));
        cancellable(cancel, mount(&spec, &mut ctx)).await?;
        cancellable(cancel, ctx.clients_ready()).await?;

        let activatables = Activatables::discover(&ctx);
        let interactive = activatables.is_interactive();
        tracing::info!(
            "Mounted {} clients, {} activatable elements",
            ctx.clients().len(),
            activatables.len()
        );

        prepare_output_dir(&options.output_path).await?;

        let optimizations = options.optimize.optimizations();
        let bundler = options.bundler.as_ref();
        let assembler = ArtifactAssembler::new(&options.output_path, bundler)
            .with_path_rewrite(options.path_rewrite.clone());

        if !interactive {
            tracing::info!("No interactive elements; publishing a static page");
            let manifest = assembler
                .assemble(AssemblyInput {
                    spec: &spec,
                    title: &options.title,
                    interactive: false,
                    optimizations: &optimizations,
                    markup: ctx.root_html(),
                    post_load: None,
                    custom_script: options.custom_script.clone(),
                    cache: None,
                })
                .await?;
            return Ok(PublishReport {
                interactive,
                optimize: options.optimize,
                optimizations,
                activation: ActivationReport::default(),
                tables: Vec::new(),
                views: Vec::new(),
                files: manifest.files,
            });
        }

        tracing::info!("Activating {} elements", activatables.len());
        let activation = ActivationSimulator::new(&ctx)
            .with_settings(options.activation)
            .with_cancellation(cancel.clone())
            .run(&activatables)
            .await?;

        let catalog = cancellable(cancel, coordinator.catalog()).await?;
        let mut usage = coordinator.table_usage();
        usage.record_references(&spec);
        let plan = OptimizationPlanner::new(&optimizations, &catalog)
            .with_path_rewrite(options.path_rewrite.clone())
            .plan(&mut spec, &usage);

        let exported = cancellable(
            cancel,
            DataExporter::new(&coordinator, &options.output_path).export(&plan, &mut spec),
        )
        .await?;

        let cache = if optimizations.contains(Optimization::LoadCache) {
            coordinator.export_cache()?
        } else {
            None
        };

        let manifest = cancellable(
            cancel,
            assembler.assemble(AssemblyInput {
                spec: &spec,
                title: &options.title,
                interactive: true,
                optimizations: &optimizations,
                markup: ctx.root_html(),
                post_load: plan.post_load.clone(),
                custom_script: options.custom_script.clone(),
                cache,
            }),
        )
        .await?;

        let mut files: Vec<PathBuf> = exported.files.iter().map(PathBuf::from).collect();
        files.extend(manifest.files);
        tracing::info!("Published {} files to {}", files.len(), options.output_path.display());

        Ok(PublishReport {
            interactive,
            optimize: options.optimize,
            optimizations,
            activation,
            tables: plan.tables,
            views: plan.views,
            files,
        })
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PublishError::Cancelled),
        result = future => result,
    }
}

async fn prepare_output_dir(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path).await? {
        tracing::warn!("Clearing output directory: {}", path.display());
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tracing::info!("Creating output directory: {}", path.display());
    }
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = PublishOptions::new("plot: []");
        assert_eq!(options.output_path, PathBuf::from("out"));
        assert_eq!(options.title, "Mosaic Visualization");
        assert_eq!(options.optimize, OptimizationLevel::Minimal);
        assert_eq!(options.database, "duckdb://memory");
        assert_eq!(options.path_rewrite, PathRewrite::Origin);
        assert!(options.custom_script.is_none());
    }

    #[tokio::test]
    async fn test_prepare_output_dir_clears_contents() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("site");
        std::fs::create_dir_all(out.join("stale")).unwrap();
        std::fs::write(out.join("stale/old.txt"), "x").unwrap();

        prepare_output_dir(&out).await.unwrap();
        assert!(out.exists());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, async { Ok(1) }).await;
        assert!(matches!(result, Err(PublishError::Cancelled)));
    }
}
