//! Abstract syntax tree for Mosaic specifications
//!
//! A [`SpecNode`] holds the ordered data declarations, the params/selections
//! shared between components, and the component tree. Declarations are keyed
//! by name in an [`IndexMap`], which keeps both declaration order and name
//! uniqueness for every mutation the publish pipeline performs.

use crate::coordinator::query::{quote_literal, quote_table};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// Free-form options attached to a declaration (format options, mark options)
pub type OptionsNode = IndexMap<String, Value>;

/// Root of a parsed specification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecNode {
    /// Title and description
    pub meta: MetaNode,
    /// Selections and value params, in declaration order
    pub params: IndexMap<String, ParamNode>,
    /// Data source declarations, in declaration order
    pub data: IndexMap<String, DataNode>,
    /// Root of the component tree
    pub root: ComponentNode,
}

impl SpecNode {
    /// Create a spec with no params or data around a root component
    pub fn new(root: ComponentNode) -> Self {
        Self {
            meta: MetaNode::default(),
            params: IndexMap::new(),
            data: IndexMap::new(),
            root,
        }
    }

    /// Add a data declaration, replacing any declaration with the same name
    pub fn with_data(mut self, node: DataNode) -> Self {
        self.data.insert(node.name().to_string(), node);
        self
    }

    /// Add a param declaration
    pub fn with_param(mut self, name: impl Into<String>, param: ParamNode) -> Self {
        self.params.insert(name.into(), param);
        self
    }

    /// Visit every component in the tree, depth first
    pub fn components(&self) -> Vec<&ComponentNode> {
        let mut out = Vec::new();
        collect_components(&self.root, &mut out);
        out
    }
}

fn collect_components<'a>(node: &'a ComponentNode, out: &mut Vec<&'a ComponentNode>) {
    out.push(node);
    if let ComponentNode::VConcat { children } | ComponentNode::HConcat { children } = node {
        for child in children {
            collect_components(child, out);
        }
    }
}

/// Spec metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetaNode {
    pub title: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// Data declarations
// =============================================================================

/// File formats understood by file-backed declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Parquet,
    Csv,
    Json,
}

impl FileFormat {
    /// Infer a format from a file extension
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "parquet" => Some(FileFormat::Parquet),
            "csv" | "tsv" => Some(FileFormat::Csv),
            "json" => Some(FileFormat::Json),
            _ => None,
        }
    }

    fn reader_function(self) -> &'static str {
        match self {
            FileFormat::Parquet => "read_parquet",
            FileFormat::Csv => "read_csv_auto",
            FileFormat::Json => "read_json_auto",
        }
    }
}

/// A named dataset the visualization depends on
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataNode {
    /// Loaded from a file in the source format
    File {
        name: String,
        file: String,
        format: FileFormat,
        options: OptionsNode,
    },
    /// Materialized from a SQL query over other tables
    Query { name: String, query: String },
    /// Loaded from an exported columnar file, relative to the output root
    Parquet {
        name: String,
        file: String,
        options: OptionsNode,
    },
}

impl DataNode {
    /// Columnar-file-backed declaration with no format options
    pub fn parquet(name: impl Into<String>, file: impl Into<String>) -> Self {
        DataNode::Parquet {
            name: name.into(),
            file: file.into(),
            options: OptionsNode::new(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DataNode::File { name, .. }
            | DataNode::Query { name, .. }
            | DataNode::Parquet { name, .. } => name,
        }
    }

    /// File path for file-backed variants
    pub fn file(&self) -> Option<&str> {
        match self {
            DataNode::File { file, .. } | DataNode::Parquet { file, .. } => Some(file),
            DataNode::Query { .. } => None,
        }
    }

    /// Format options for file-backed variants
    pub fn options(&self) -> Option<&OptionsNode> {
        match self {
            DataNode::File { options, .. } | DataNode::Parquet { options, .. } => Some(options),
            DataNode::Query { .. } => None,
        }
    }

    /// Statement that loads this declaration into the publisher's own engine
    ///
    /// File paths are used as written, so they resolve against the
    /// publisher's working directory.
    pub fn load_sql(&self) -> String {
        let table = quote_table(self.name());
        match self {
            DataNode::Query { query, .. } => {
                format!("CREATE TABLE IF NOT EXISTS {} AS {}", table, query)
            }
            DataNode::File {
                file,
                format,
                options,
                ..
            } => file_load_sql(&table, file, *format, options),
            DataNode::Parquet { file, options, .. } => {
                file_load_sql(&table, file, FileFormat::Parquet, options)
            }
        }
    }
}

fn file_load_sql(table: &str, file: &str, format: FileFormat, options: &OptionsNode) -> String {
    let select = match options.get("select") {
        Some(Value::Array(columns)) if !columns.is_empty() => columns
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        _ => "*".to_string(),
    };
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} AS SELECT {} FROM {}({})",
        table,
        select,
        format.reader_function(),
        quote_literal(file)
    );
    if let Some(Value::String(predicate)) = options.get("where") {
        sql.push_str(" WHERE ");
        sql.push_str(predicate);
    }
    sql
}

// =============================================================================
// Params
// =============================================================================

/// Resolution strategy of a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionKind {
    Intersect,
    Union,
    Single,
    Crossfilter,
}

impl SelectionKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "intersect" => Some(SelectionKind::Intersect),
            "union" => Some(SelectionKind::Union),
            "single" => Some(SelectionKind::Single),
            "crossfilter" => Some(SelectionKind::Crossfilter),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SelectionKind::Intersect => "intersect",
            SelectionKind::Union => "union",
            SelectionKind::Single => "single",
            SelectionKind::Crossfilter => "crossfilter",
        }
    }
}

/// A named param shared between components
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamNode {
    Selection { kind: SelectionKind },
    Value { value: Value },
}

// =============================================================================
// Components
// =============================================================================

/// Node of the component tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ComponentNode {
    VConcat { children: Vec<ComponentNode> },
    HConcat { children: Vec<ComponentNode> },
    Plot(PlotNode),
    Input(InputNode),
    Space { vertical: bool, size: Value },
}

/// A plot: marks and interactors plus plot-level attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlotNode {
    pub entries: Vec<PlotEntry>,
    pub attributes: OptionsNode,
}

impl PlotNode {
    pub fn marks(&self) -> impl Iterator<Item = &MarkNode> {
        self.entries.iter().filter_map(|entry| match entry {
            PlotEntry::Mark(mark) => Some(mark),
            PlotEntry::Interactor(_) => None,
        })
    }

    pub fn interactors(&self) -> impl Iterator<Item = &InteractorNode> {
        self.entries.iter().filter_map(|entry| match entry {
            PlotEntry::Interactor(interactor) => Some(interactor),
            PlotEntry::Mark(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entry", rename_all = "lowercase")]
pub enum PlotEntry {
    Mark(MarkNode),
    Interactor(InteractorNode),
}

/// Table reference of a mark or input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataRef {
    pub table: String,
    /// Param name (without `$`) filtering this client
    pub filter_by: Option<String>,
}

/// Graphical mark bound to a table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkNode {
    pub mark: String,
    pub from: Option<DataRef>,
    pub channels: IndexMap<String, ChannelValue>,
    pub options: OptionsNode,
}

/// Aggregate functions usable in channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Median,
}

impl AggregateFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(AggregateFunc::Count),
            "sum" => Some(AggregateFunc::Sum),
            "avg" | "mean" => Some(AggregateFunc::Avg),
            "min" => Some(AggregateFunc::Min),
            "max" => Some(AggregateFunc::Max),
            "median" => Some(AggregateFunc::Median),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
            AggregateFunc::Median => "median",
        }
    }
}

/// Encoding channel value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelValue {
    /// A column name, or a constant if the table has no such column
    Field { name: String },
    Bin { field: String, step: Option<f64> },
    Aggregate {
        func: AggregateFunc,
        field: Option<String>,
    },
    Constant { value: Value },
}

/// Interactor kinds attached to plots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InteractorKind {
    IntervalX,
    IntervalY,
    IntervalXY,
    Toggle,
    ToggleX,
    ToggleY,
    ToggleColor,
    NearestX,
    NearestY,
    PanZoom,
    PanZoomX,
    PanZoomY,
}

impl InteractorKind {
    pub fn from_name(name: &str) -> Option<Self> {
        use InteractorKind::*;
        Some(match name {
            "intervalX" => IntervalX,
            "intervalY" => IntervalY,
            "intervalXY" => IntervalXY,
            "toggle" => Toggle,
            "toggleX" => ToggleX,
            "toggleY" => ToggleY,
            "toggleColor" => ToggleColor,
            "nearestX" => NearestX,
            "nearestY" => NearestY,
            "panZoom" => PanZoom,
            "panZoomX" => PanZoomX,
            "panZoomY" => PanZoomY,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        use InteractorKind::*;
        match self {
            IntervalX => "intervalX",
            IntervalY => "intervalY",
            IntervalXY => "intervalXY",
            Toggle => "toggle",
            ToggleX => "toggleX",
            ToggleY => "toggleY",
            ToggleColor => "toggleColor",
            NearestX => "nearestX",
            NearestY => "nearestY",
            PanZoom => "panZoom",
            PanZoomX => "panZoomX",
            PanZoomY => "panZoomY",
        }
    }

    /// Channels whose fields this interactor selects on
    pub fn channels(self) -> &'static [&'static str] {
        use InteractorKind::*;
        match self {
            IntervalX | ToggleX | NearestX | PanZoomX => &["x"],
            IntervalY | ToggleY | NearestY | PanZoomY => &["y"],
            IntervalXY | PanZoom => &["x", "y"],
            ToggleColor => &["fill", "stroke"],
            Toggle => &["x", "y", "fill", "stroke"],
        }
    }
}

/// Interactor declared inside a plot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractorNode {
    pub kind: InteractorKind,
    /// Param name (without `$`) this interactor writes to
    pub selection: Option<String>,
    pub options: OptionsNode,
}

/// Input widget kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Menu,
    Slider,
    Search,
    Table,
}

impl InputKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "menu" => Some(InputKind::Menu),
            "slider" => Some(InputKind::Slider),
            "search" => Some(InputKind::Search),
            "table" => Some(InputKind::Table),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InputKind::Menu => "menu",
            InputKind::Slider => "slider",
            InputKind::Search => "search",
            InputKind::Table => "table",
        }
    }
}

/// Standalone input widget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputNode {
    pub kind: InputKind,
    pub from: Option<DataRef>,
    pub column: Option<String>,
    /// Explicit column list (table inputs)
    pub columns: Option<Vec<String>>,
    /// Param name (without `$`) this input writes to
    pub selection: Option<String>,
    pub options: OptionsNode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(FileFormat::from_path("a/b.parquet"), Some(FileFormat::Parquet));
        assert_eq!(FileFormat::from_path("flights.CSV"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_path("x.json"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_path("x.arrow"), None);
    }

    #[test]
    fn test_load_sql_variants() {
        let parquet = DataNode::parquet("flights", "data/flights.parquet");
        assert_eq!(
            parquet.load_sql(),
            "CREATE TABLE IF NOT EXISTS \"flights\" AS SELECT * FROM read_parquet('data/flights.parquet')"
        );

        let query = DataNode::Query {
            name: "small".to_string(),
            query: "SELECT 1 AS x".to_string(),
        };
        assert_eq!(
            query.load_sql(),
            "CREATE TABLE IF NOT EXISTS \"small\" AS SELECT 1 AS x"
        );

        let mut options = OptionsNode::new();
        options.insert("select".to_string(), serde_json::json!(["a", "b"]));
        options.insert("where".to_string(), serde_json::json!("a > 1"));
        let csv = DataNode::File {
            name: "t".to_string(),
            file: "t.csv".to_string(),
            format: FileFormat::Csv,
            options,
        };
        assert_eq!(
            csv.load_sql(),
            "CREATE TABLE IF NOT EXISTS \"t\" AS SELECT a, b FROM read_csv_auto('t.csv') WHERE a > 1"
        );
    }

    #[test]
    fn test_schema_qualified_name() {
        let view = DataNode::parquet("mosaic.preagg_abc", "data/.mosaic/preagg_abc.parquet");
        assert!(view
            .load_sql()
            .starts_with("CREATE TABLE IF NOT EXISTS \"mosaic\".\"preagg_abc\""));
    }

    #[test]
    fn test_components_depth_first() {
        let spec = SpecNode::new(ComponentNode::VConcat {
            children: vec![
                ComponentNode::Plot(PlotNode::default()),
                ComponentNode::HConcat { children: vec![] },
            ],
        });
        let kinds: Vec<_> = spec
            .components()
            .iter()
            .map(|c| match c {
                ComponentNode::VConcat { .. } => "v",
                ComponentNode::HConcat { .. } => "h",
                ComponentNode::Plot(_) => "p",
                _ => "?",
            })
            .collect();
        assert_eq!(kinds, vec!["v", "p", "h"]);
    }
}
