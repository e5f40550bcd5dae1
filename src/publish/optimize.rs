//! Optimization levels and the export planner
//!
//! A level resolves to a cumulative [`OptimizationSet`]. The planner then
//! decides, per data declaration, whether to skip, fully export or project
//! it, adds declarations for preaggregated views and builds the post-load
//! script that loads those views in the published page.

use crate::coordinator::catalog::Catalog;
use crate::coordinator::{ColumnUsage, TableUsage};
use crate::spec::{DataNode, SpecNode};
use crate::writer::esm::{codegen_load, CodegenContext, PathRewrite};
use crate::{PublishError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Directory of exported tables, relative to the output root
pub const DATA_DIR: &str = "data";

/// Directory of exported preaggregated views, relative to the output root
pub const VIEW_DIR: &str = "data/.mosaic";

/// Export path of an ordinary table
pub fn table_file(name: &str) -> String {
    format!("{}/{}.parquet", DATA_DIR, name)
}

/// Export path of a preaggregated view, by its unqualified name
pub fn view_file(view: &str) -> String {
    format!("{}/{}.parquet", VIEW_DIR, view)
}

/// Requested optimization level, ordered from least to most aggressive
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    None,
    #[default]
    Minimal,
    More,
    Most,
}

impl OptimizationLevel {
    pub const ALL: [OptimizationLevel; 4] = [
        OptimizationLevel::None,
        OptimizationLevel::Minimal,
        OptimizationLevel::More,
        OptimizationLevel::Most,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationLevel::None => "none",
            OptimizationLevel::Minimal => "minimal",
            OptimizationLevel::More => "more",
            OptimizationLevel::Most => "most",
        }
    }

    /// Optimizations enabled at this level, including every lower level's
    pub fn optimizations(self) -> OptimizationSet {
        use Optimization::*;
        let added: &[Optimization] = match self {
            OptimizationLevel::None => &[],
            OptimizationLevel::Minimal => &[Projection, ElideUnused],
            OptimizationLevel::More => &[Preaggregate],
            OptimizationLevel::Most => &[Prerender, LoadCache],
        };
        let mut set = match self {
            OptimizationLevel::None => OptimizationSet::default(),
            OptimizationLevel::Minimal => OptimizationLevel::None.optimizations(),
            OptimizationLevel::More => OptimizationLevel::Minimal.optimizations(),
            OptimizationLevel::Most => OptimizationLevel::More.optimizations(),
        };
        set.0.extend(added.iter().copied());
        set
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationLevel {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self> {
        OptimizationLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| {
                PublishError::ValidationError(format!(
                    "Unknown optimization level '{}'. Expected one of: none, minimal, more, most",
                    s
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Optimization {
    /// Embed the activated markup in the HTML shell
    Prerender,
    /// Export only the columns clients read
    Projection,
    /// Skip tables nothing reads
    ElideUnused,
    /// Export preaggregated views and load them before first render
    Preaggregate,
    /// Ship the result cache with the artifact
    LoadCache,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimizationSet(BTreeSet<Optimization>);

impl OptimizationSet {
    pub fn contains(&self, optimization: Optimization) -> bool {
        self.0.contains(&optimization)
    }

    pub fn is_subset(&self, other: &OptimizationSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = Optimization> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Optimization> for OptimizationSet {
    fn from_iter<I: IntoIterator<Item = Optimization>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What happens to one data declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "export", content = "columns", rename_all = "lowercase")]
pub enum ExportDecision {
    Skip,
    Full,
    /// Only these columns, in declared order
    Projected(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableExport {
    pub name: String,
    /// Output-relative path; the engine writes it during export
    pub file: String,
    pub decision: ExportDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewExport {
    /// Qualified name, `mosaic.preagg_<hash>`
    pub name: String,
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportPlan {
    pub tables: Vec<TableExport>,
    pub views: Vec<ViewExport>,
    /// Script loading the views in the published page, run before the
    /// element is constructed
    pub post_load: Option<String>,
}

impl ExportPlan {
    /// Tables that will be exported
    pub fn retained(&self) -> impl Iterator<Item = &TableExport> {
        self.tables
            .iter()
            .filter(|t| t.decision != ExportDecision::Skip)
    }
}

/// Decides what to export for a given optimization set
pub struct OptimizationPlanner<'a> {
    optimizations: &'a OptimizationSet,
    catalog: &'a Catalog,
    path_rewrite: PathRewrite,
}

impl<'a> OptimizationPlanner<'a> {
    /// `catalog` must be read after activation so it lists created views
    pub fn new(optimizations: &'a OptimizationSet, catalog: &'a Catalog) -> Self {
        Self {
            optimizations,
            catalog,
            path_rewrite: PathRewrite::Origin,
        }
    }

    pub fn with_path_rewrite(mut self, path_rewrite: PathRewrite) -> Self {
        self.path_rewrite = path_rewrite;
        self
    }

    /// Plan exports and rewrite `spec.data` accordingly
    ///
    /// Skipped declarations are removed, retained ones become columnar-file
    /// declarations at their export path, and each preaggregated view gets
    /// its own declaration.
    pub fn plan(&self, spec: &mut SpecNode, usage: &TableUsage) -> ExportPlan {
        let (views, post_load) = self.plan_views(spec);

        let names: Vec<String> = spec
            .data
            .keys()
            .filter(|name| !views.iter().any(|v| &v.name == *name))
            .cloned()
            .collect();

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let decision = self.decide(&name, usage.get(&name));
            let file = table_file(&name);
            match &decision {
                ExportDecision::Skip => {
                    tracing::warn!("Skipping export of table: {}", name);
                    tracing::warn!("No columns are being used from this table.");
                    spec.data.shift_remove(&name);
                }
                _ => {
                    spec.data
                        .insert(name.clone(), DataNode::parquet(name.as_str(), file.as_str()));
                }
            }
            tables.push(TableExport {
                name,
                file,
                decision,
            });
        }

        ExportPlan {
            tables,
            views,
            post_load,
        }
    }

    fn decide(&self, name: &str, usage: Option<&ColumnUsage>) -> ExportDecision {
        let Some(usage) = usage else {
            return if self.optimizations.contains(Optimization::ElideUnused) {
                ExportDecision::Skip
            } else {
                ExportDecision::Full
            };
        };
        let ColumnUsage::Columns(used) = usage else {
            return ExportDecision::Full;
        };
        // Only counted: every row is still needed
        if used.is_empty() || !self.optimizations.contains(Optimization::Projection) {
            return ExportDecision::Full;
        }
        let Some(declared) = self.catalog.columns(name) else {
            return ExportDecision::Full;
        };
        let all_declared = used.iter().all(|c| declared.contains(c));
        if all_declared && used.len() < declared.len() {
            ExportDecision::Projected(
                declared
                    .iter()
                    .filter(|c| used.contains(*c))
                    .cloned()
                    .collect(),
            )
        } else {
            ExportDecision::Full
        }
    }

    fn plan_views(&self, spec: &mut SpecNode) -> (Vec<ViewExport>, Option<String>) {
        let views: Vec<_> = self.catalog.preaggregates().collect();
        if !self.optimizations.contains(Optimization::Preaggregate) || views.is_empty() {
            return (Vec::new(), None);
        }

        let ctx = CodegenContext::default()
            .with_namespace("getVgInstance()")
            .with_path_rewrite(self.path_rewrite.clone());
        let mut post_load = String::from(
            "getVgInstance().coordinator().exec([\n\t'CREATE SCHEMA IF NOT EXISTS mosaic;',\n",
        );
        let mut exports = Vec::with_capacity(views.len());
        for view in views {
            let name = view.qualified_name();
            let file = view_file(&view.name);
            let node = DataNode::parquet(name.as_str(), file.as_str());
            post_load.push_str(&format!("\t{},\n", codegen_load(&node, &ctx)));
            spec.data.insert(name.clone(), node);
            exports.push(ViewExport { name, file });
        }
        post_load.push_str("], {priority: 2})");

        (exports, Some(post_load))
    }
}
