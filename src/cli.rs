/*!
mosaic-publish Command Line Interface

Publishes Mosaic specifications as static sites and inspects parsed specifications.
*/

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use mosaic_publish::bundle::{Bundler, CdnBundler, CommandBundler, DEFAULT_CDN};
use mosaic_publish::publish::{ActivationSettings, PublishOptions};
use mosaic_publish::writer::PathRewrite;
use mosaic_publish::{parse_spec, publish, OptimizationLevel, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mosaic-publish")]
#[command(about = "Publish Mosaic visualizations as static, self-contained sites")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum BundlerKind {
    /// Rewrite imports to a CDN; no build step
    Cdn,
    /// Bundle with an esbuild executable
    Esbuild,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AstFormat {
    Json,
    Debug,
    Pretty,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish a specification file
    Publish {
        /// Path to the YAML or JSON specification
        file: PathBuf,

        /// Output directory (cleared if it exists)
        #[arg(short, long, default_value = "out")]
        output: PathBuf,

        /// Page title
        #[arg(long, default_value = "Mosaic Visualization")]
        title: String,

        /// Optimization level
        #[arg(long, value_enum, default_value_t = OptimizationLevel::Minimal)]
        optimize: OptimizationLevel,

        /// Script file run in the page after the visualization mounts
        #[arg(long)]
        custom_script: Option<PathBuf>,

        /// Data source connection string
        #[arg(long, default_value = "duckdb://memory")]
        database: String,

        /// Interval between pending-query checks during activation
        #[arg(long, default_value_t = 100)]
        poll_interval_ms: u64,

        /// Maximum wait for one activation to settle
        #[arg(long, default_value_t = 60)]
        activation_timeout_secs: u64,

        /// How index.js is produced
        #[arg(long, value_enum, default_value_t = BundlerKind::Cdn)]
        bundler: BundlerKind,

        /// esbuild executable, for --bundler esbuild
        #[arg(long, default_value = "esbuild")]
        esbuild: PathBuf,

        /// CDN serving npm modules, for --bundler cdn
        #[arg(long, default_value = DEFAULT_CDN)]
        cdn: String,

        /// Load data files from this URL instead of the page origin
        #[arg(long)]
        base_url: Option<String>,

        /// Show debug output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Parse a specification and show the AST (for debugging)
    Parse {
        /// Path to the YAML or JSON specification
        file: PathBuf,

        /// Output format for AST
        #[arg(long, value_enum, default_value_t = AstFormat::Pretty)]
        format: AstFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Publish { verbose: true, .. });
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Publish {
            file,
            output,
            title,
            optimize,
            custom_script,
            database,
            poll_interval_ms,
            activation_timeout_secs,
            bundler,
            esbuild,
            cdn,
            base_url,
            verbose: _,
        } => {
            let spec = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read specification {}", file.display()))?;

            let bundler: Arc<dyn Bundler> = match bundler {
                BundlerKind::Cdn => Arc::new(CdnBundler::new(cdn)),
                BundlerKind::Esbuild => Arc::new(CommandBundler::new(esbuild)),
            };
            let path_rewrite = match base_url {
                Some(url) => PathRewrite::BaseUrl(url),
                None => PathRewrite::Origin,
            };

            let mut options = PublishOptions::new(spec)
                .with_output_path(&output)
                .with_title(title)
                .with_optimize(optimize)
                .with_database(database)
                .with_activation(ActivationSettings {
                    poll_interval: Duration::from_millis(poll_interval_ms),
                    timeout: Duration::from_secs(activation_timeout_secs),
                })
                .with_path_rewrite(path_rewrite)
                .with_bundler(bundler);
            if let Some(script) = custom_script {
                let script = std::fs::read_to_string(&script)
                    .with_context(|| format!("Failed to read custom script {}", script.display()))?;
                options = options.with_custom_script(script);
            }

            let report = publish(options)
                .await
                .with_context(|| format!("Failed to publish {}", file.display()))?;

            eprintln!(
                "Published {} ({}) to {}: {} files",
                file.display(),
                if report.interactive { "interactive" } else { "static" },
                output.display(),
                report.files.len()
            );
        }

        Commands::Parse { file, format } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read specification {}", file.display()))?;
            let spec = parse_spec(&text).context("Parse error")?;

            match format {
                AstFormat::Json => println!("{}", serde_json::to_string_pretty(&spec)?),
                AstFormat::Debug => println!("{:#?}", spec),
                AstFormat::Pretty => {
                    let title = spec.meta.title.as_deref().unwrap_or("(untitled)");
                    println!("Mosaic specification: {}", title);
                    println!("  Data: {}", spec.data.len());
                    for (name, node) in &spec.data {
                        println!("    {} ({})", name, node.file().unwrap_or("query"));
                    }
                    println!("  Params: {}", spec.params.len());
                    println!("  Components: {}", spec.components().len());
                }
            }
        }
    }

    Ok(())
}
