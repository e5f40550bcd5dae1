//! Bundling the generated client program into `index.js`
//!
//! A [`Bundler`] takes the in-memory ES module and writes a loadable module
//! into the output directory. [`CdnBundler`] keeps the module as is and
//! points bare imports at a CDN; [`CommandBundler`] runs an external esbuild
//! binary, which resolves the module graph and splits shared libraries into
//! chunks.

use crate::{PublishError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Name of the bundled module in the output directory
pub const BUNDLE_FILE: &str = "index.js";

/// Default CDN for bare module imports
pub const DEFAULT_CDN: &str = "https://cdn.jsdelivr.net/npm";

#[async_trait]
pub trait Bundler: Send + Sync {
    /// Bundle `source` into `output_dir`, returning the files written
    /// relative to `output_dir`
    async fn bundle(&self, source: &str, output_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Rewrites bare imports to CDN URLs; no build step
#[derive(Debug, Clone)]
pub struct CdnBundler {
    pub cdn: String,
}

impl Default for CdnBundler {
    fn default() -> Self {
        Self {
            cdn: DEFAULT_CDN.to_string(),
        }
    }
}

fn bare_import() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?m)^(import\s+.+?\s+from\s+)"([^"./][^"]*)";"#)
            .expect("Invalid import regex")
    })
}

impl CdnBundler {
    pub fn new(cdn: impl Into<String>) -> Self {
        Self { cdn: cdn.into() }
    }

    /// Point bare module specifiers at the CDN's ES module build
    pub fn rewrite_imports(&self, source: &str) -> String {
        let cdn = self.cdn.trim_end_matches('/');
        bare_import()
            .replace_all(source, |caps: &regex::Captures| {
                format!("{}\"{}/{}/+esm\";", &caps[1], cdn, &caps[2])
            })
            .into_owned()
    }
}

#[async_trait]
impl Bundler for CdnBundler {
    async fn bundle(&self, source: &str, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let code = self.rewrite_imports(source);
        tokio::fs::write(output_dir.join(BUNDLE_FILE), code).await?;
        Ok(vec![PathBuf::from(BUNDLE_FILE)])
    }
}

/// Runs an esbuild executable over the module
#[derive(Debug, Clone)]
pub struct CommandBundler {
    pub program: PathBuf,
    /// Directory holding `node_modules`, passed as `NODE_PATH`
    pub node_path: Option<PathBuf>,
    pub minify: bool,
}

impl CommandBundler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            node_path: None,
            minify: true,
        }
    }

    pub fn with_node_path(mut self, node_path: impl Into<PathBuf>) -> Self {
        self.node_path = Some(node_path.into());
        self
    }

    fn args(&self, entry: &Path, output_dir: &Path) -> Vec<String> {
        let mut args = vec![
            entry.display().to_string(),
            "--bundle".to_string(),
            "--splitting".to_string(),
            "--format=esm".to_string(),
            "--platform=browser".to_string(),
            "--tree-shaking=true".to_string(),
            format!("--outdir={}", output_dir.display()),
            "--entry-names=index".to_string(),
            "--chunk-names=chunks/[name]-[hash]".to_string(),
            "--log-level=warning".to_string(),
        ];
        if self.minify {
            args.push("--minify".to_string());
        }
        args
    }
}

#[async_trait]
impl Bundler for CommandBundler {
    async fn bundle(&self, source: &str, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let staging = output_dir.join(".entry");
        tokio::fs::create_dir_all(&staging).await?;
        let entry = staging.join(BUNDLE_FILE);
        tokio::fs::write(&entry, source).await?;

        let mut command = tokio::process::Command::new(&self.program);
        command.args(self.args(&entry, output_dir)).kill_on_drop(true);
        if let Some(node_path) = &self.node_path {
            command.env("NODE_PATH", node_path);
        }

        tracing::info!("Bundling with {}", self.program.display());
        let output = command.output().await;
        tokio::fs::remove_dir_all(&staging).await?;
        let output = output.map_err(|e| {
            PublishError::BundleError(format!(
                "Failed to run '{}': {}",
                self.program.display(),
                e
            ))
        })?;

        if !output.status.success() {
            return Err(PublishError::BundleError(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut written = vec![PathBuf::from(BUNDLE_FILE)];
        let chunks = output_dir.join("chunks");
        if let Ok(mut entries) = tokio::fs::read_dir(&chunks).await {
            while let Some(entry) = entries.next_entry().await? {
                written.push(Path::new("chunks").join(entry.file_name()));
            }
        }
        Ok(written)
    }
}
