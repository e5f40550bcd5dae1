//! Artifact assembly: `index.html`, `index.js` and the result cache

use crate::bundle::Bundler;
use crate::publish::optimize::{Optimization, OptimizationSet};
use crate::spec::SpecNode;
use crate::writer::esm::{preamble, CodegenContext, EsmWriter, PathRewrite, FLECHETTE};
use crate::writer::{HtmlShell, Writer};
use crate::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Result cache written next to `index.html`
pub const CACHE_FILE: &str = ".cache.arrow";

pub const HTML_FILE: &str = "index.html";

/// Everything the assembler reads; the AST is final at this point
pub struct AssemblyInput<'a> {
    pub spec: &'a SpecNode,
    pub title: &'a str,
    pub interactive: bool,
    pub optimizations: &'a OptimizationSet,
    /// Markup of the activated visualization
    pub markup: Option<String>,
    pub post_load: Option<String>,
    pub custom_script: Option<String>,
    /// Arrow IPC bytes of the result cache
    pub cache: Option<Vec<u8>>,
}

/// Files written by the assembler, relative to the output directory
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactManifest {
    pub files: Vec<PathBuf>,
}

pub struct ArtifactAssembler<'a> {
    output_dir: &'a Path,
    bundler: &'a dyn Bundler,
    path_rewrite: PathRewrite,
}

impl<'a> ArtifactAssembler<'a> {
    pub fn new(output_dir: &'a Path, bundler: &'a dyn Bundler) -> Self {
        Self {
            output_dir,
            bundler,
            path_rewrite: PathRewrite::Origin,
        }
    }

    pub fn with_path_rewrite(mut self, path_rewrite: PathRewrite) -> Self {
        self.path_rewrite = path_rewrite;
        self
    }

    pub async fn assemble(&self, input: AssemblyInput<'_>) -> Result<ArtifactManifest> {
        let mut manifest = ArtifactManifest::default();

        if !input.interactive {
            tracing::info!("Writing static page");
            let shell = HtmlShell::new(input.title)
                .with_markup(input.markup.unwrap_or_default())
                .with_custom_script(input.custom_script);
            self.write(HTML_FILE, shell.write(input.spec)?, &mut manifest)
                .await?;
            return Ok(manifest);
        }

        let cache_file = match input.cache {
            Some(bytes) if input.optimizations.contains(Optimization::LoadCache) => {
                self.write(CACHE_FILE, bytes, &mut manifest).await?;
                Some(CACHE_FILE)
            }
            _ => None,
        };

        let mut ctx = CodegenContext::default()
            .with_preamble(preamble(cache_file, &self.path_rewrite))
            .with_connector("wasm")
            .with_path_rewrite(self.path_rewrite.clone());
        if cache_file.is_some() {
            ctx = ctx.with_import(FLECHETTE, "{ tableFromIPC }");
        }
        let module = EsmWriter::new(ctx).write(input.spec)?;

        let mut shell = HtmlShell::new(input.title)
            .interactive(true)
            .with_post_load(input.post_load)
            .with_custom_script(input.custom_script);
        if input.optimizations.contains(Optimization::Prerender) {
            if let Some(markup) = input.markup {
                shell = shell.with_markup(markup);
            }
        }
        self.write(HTML_FILE, shell.write(input.spec)?, &mut manifest)
            .await?;

        tracing::info!("Bundling client program");
        let bundled = self.bundler.bundle(&module, self.output_dir).await?;
        manifest.files.extend(bundled);
        Ok(manifest)
    }

    async fn write(
        &self,
        file: &str,
        contents: impl AsRef<[u8]>,
        manifest: &mut ArtifactManifest,
    ) -> Result<()> {
        tokio::fs::write(self.output_dir.join(file), contents).await?;
        manifest.files.push(PathBuf::from(file));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::CdnBundler;
    use crate::publish::optimize::OptimizationLevel;
    use crate::spec::{ComponentNode, DataNode};

    fn spec() -> SpecNode {
        SpecNode::new(ComponentNode::VConcat { children: vec![] })
            .with_data(DataNode::parquet("flights", "data/flights.parquet"))
    }

    fn input<'a>(
        spec: &'a SpecNode,
        optimizations: &'a OptimizationSet,
        interactive: bool,
    ) -> AssemblyInput<'a> {
        AssemblyInput {
            spec,
            title: "Flights",
            interactive,
            optimizations,
            markup: Some("<div class=\"plot\"></div>".to_string()),
            post_load: None,
            custom_script: None,
            cache: Some(vec![1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn test_static_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec();
        let optimizations = OptimizationLevel::Most.optimizations();
        let bundler = CdnBundler::default();

        let manifest = ArtifactAssembler::new(dir.path(), &bundler)
            .assemble(input(&spec, &optimizations, false))
            .await
            .unwrap();

        assert_eq!(manifest.files, vec![PathBuf::from("index.html")]);
        let html = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
        assert!(html.contains("<div class=\"plot\"></div>"));
        assert!(!dir.path().join("index.js").exists());
    }

    #[tokio::test]
    async fn test_interactive_artifact_with_cache() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec();
        let optimizations = OptimizationLevel::Most.optimizations();
        let bundler = CdnBundler::default();

        let manifest = ArtifactAssembler::new(dir.path(), &bundler)
            .assemble(input(&spec, &optimizations, true))
            .await
            .unwrap();

        assert_eq!(
            manifest.files,
            vec![
                PathBuf::from(".cache.arrow"),
                PathBuf::from("index.html"),
                PathBuf::from("index.js"),
            ]
        );
        let html = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
        assert!(html.contains("<div id=\"root\"><div class=\"plot\"></div></div>"));

        let js = std::fs::read_to_string(dir.path().join("index.js")).unwrap();
        assert!(js.contains("@uwdata/flechette/+esm"));
        assert!(js.contains("tableFromIPC"));
        assert!(js.contains("wasmConnector()"));
        assert!(js.contains("window.location.origin + \"/data/flights.parquet\""));
    }

    #[tokio::test]
    async fn test_minimal_skips_cache_and_prerender() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec();
        let optimizations = OptimizationLevel::Minimal.optimizations();
        let bundler = CdnBundler::default();

        let manifest = ArtifactAssembler::new(dir.path(), &bundler)
            .with_path_rewrite(PathRewrite::Relative)
            .assemble(input(&spec, &optimizations, true))
            .await
            .unwrap();

        assert!(!manifest.files.contains(&PathBuf::from(".cache.arrow")));
        let html = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
        assert!(html.contains("<div id=\"root\"></div>"));
        let js = std::fs::read_to_string(dir.path().join("index.js")).unwrap();
        assert!(!js.contains("tableFromIPC"));
        assert!(js.contains("vg.loadParquet(\"flights\", \"data/flights.parquet\")"));
    }

    #[tokio::test]
    async fn test_cache_follows_path_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec();
        let optimizations = OptimizationLevel::Most.optimizations();
        let bundler = CdnBundler::default();

        ArtifactAssembler::new(dir.path(), &bundler)
            .with_path_rewrite(PathRewrite::Relative)
            .assemble(input(&spec, &optimizations, true))
            .await
            .unwrap();

        let js = std::fs::read_to_string(dir.path().join("index.js")).unwrap();
        assert!(js.contains("fetch(\".cache.arrow\")"));
        assert!(!js.contains("window.location.origin"));
    }
}
