//! ES module writer
//!
//! Generates the client program of a published visualization: imports, a
//! runtime preamble, the database connector, data load statements, params
//! and selections, and a default export that constructs the component tree
//! when called.
//!
//! # Example
//!
//! ```rust,ignore
//! use mosaic_publish::writer::{CodegenContext, EsmWriter, PathRewrite, Writer};
//!
//! let ctx = CodegenContext::default().with_path_rewrite(PathRewrite::Origin);
//! let code = EsmWriter::new(ctx).write(&spec)?;
//! assert!(code.contains("window.location.origin"));
//! ```

use crate::spec::{
    ChannelValue, ComponentNode, DataNode, FileFormat, InputNode, InteractorNode, MarkNode,
    ParamNode, PlotEntry, PlotNode, SpecNode,
};
use crate::writer::Writer;
use crate::{PublishError, Result};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

/// Module providing the visualization grammar at runtime
pub const VGPLOT: &str = "@uwdata/vgplot";

/// Module providing the Arrow IPC decoder at runtime
pub const FLECHETTE: &str = "@uwdata/flechette";

/// How exported file paths appear in generated load statements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PathRewrite {
    /// As written, relative to the page
    #[default]
    Relative,
    /// Resolved against the page origin at runtime
    Origin,
    /// Resolved against a fixed base URL
    BaseUrl(String),
}

impl PathRewrite {
    /// JavaScript expression for `file`
    pub fn expr(&self, file: &str) -> String {
        match self {
            PathRewrite::Relative => js_string(file),
            PathRewrite::Origin => format!("window.location.origin + {}", js_string(&format!("/{}", file))),
            PathRewrite::BaseUrl(base) => {
                js_string(&format!("{}/{}", base.trim_end_matches('/'), file))
            }
        }
    }
}

/// Code generation settings
#[derive(Debug, Clone)]
pub struct CodegenContext {
    /// Expression naming the grammar API, e.g. `vg` or `getVgInstance()`
    pub namespace: String,
    /// Module → import clause
    pub imports: IndexMap<String, String>,
    /// Code emitted after the imports
    pub preamble: Option<String>,
    /// Database connector set up before loading data, e.g. `wasm`
    pub connector: Option<String>,
    pub path_rewrite: PathRewrite,
}

impl Default for CodegenContext {
    fn default() -> Self {
        let mut imports = IndexMap::new();
        imports.insert(VGPLOT.to_string(), "* as vg".to_string());
        Self {
            namespace: "vg".to_string(),
            imports,
            preamble: None,
            connector: None,
            path_rewrite: PathRewrite::Relative,
        }
    }
}

impl CodegenContext {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_import(mut self, module: impl Into<String>, clause: impl Into<String>) -> Self {
        self.imports.insert(module.into(), clause.into());
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_connector(mut self, connector: impl Into<String>) -> Self {
        self.connector = Some(connector.into());
        self
    }

    pub fn with_path_rewrite(mut self, path_rewrite: PathRewrite) -> Self {
        self.path_rewrite = path_rewrite;
        self
    }

    fn call(&self, function: &str, args: &[String]) -> String {
        format!("{}.{}({})", self.namespace, function, args.join(", "))
    }
}

/// Runtime preamble exposing the grammar API, optionally seeding the
/// coordinator's cache from `cache_file`, located like the data files
pub fn preamble(cache_file: Option<&str>, path_rewrite: &PathRewrite) -> String {
    let mut code = String::from(
        "const vgInstance = vg;\n\
         export function getVgInstance() {\n  return vgInstance;\n}\n",
    );
    if let Some(file) = cache_file {
        code.push_str(&format!(
            "\n{{\n  \
             const bytes = await fetch({}).then((r) => r.arrayBuffer());\n  \
             const entries = tableFromIPC(bytes).get(0).cache;\n  \
             const cache = vgInstance.coordinator().manager.cache();\n  \
             for (const [sql, data] of entries) cache.set(sql, tableFromIPC(data));\n\
             }}\n",
            path_rewrite.expr(file)
        ));
    }
    code
}

/// Runtime load statement for a data declaration
pub fn codegen_load(node: &DataNode, ctx: &CodegenContext) -> String {
    let name = js_string(node.name());
    match node {
        DataNode::Query { query, .. } => js_string(&format!(
            "CREATE TABLE IF NOT EXISTS {} AS {}",
            node.name(),
            query
        )),
        DataNode::File {
            file,
            format,
            options,
            ..
        } => {
            let function = match format {
                FileFormat::Parquet => "loadParquet",
                FileFormat::Csv => "loadCSV",
                FileFormat::Json => "loadJSON",
            };
            load_call(ctx, function, name, file, options)
        }
        DataNode::Parquet { file, options, .. } => {
            load_call(ctx, "loadParquet", name, file, options)
        }
    }
}

fn load_call(
    ctx: &CodegenContext,
    function: &str,
    name: String,
    file: &str,
    options: &IndexMap<String, Value>,
) -> String {
    let mut args = vec![name, ctx.path_rewrite.expr(file)];
    if !options.is_empty() {
        args.push(js_object(options.iter().map(|(k, v)| (k.as_str(), js_value(v)))));
    }
    ctx.call(function, &args)
}

/// Generates the client program
pub struct EsmWriter {
    ctx: CodegenContext,
}

impl EsmWriter {
    pub fn new(ctx: CodegenContext) -> Self {
        Self { ctx }
    }

    fn component(&self, node: &ComponentNode, depth: usize) -> String {
        let ctx = &self.ctx;
        match node {
            ComponentNode::VConcat { children } => self.nested("vconcat", children, depth),
            ComponentNode::HConcat { children } => self.nested("hconcat", children, depth),
            ComponentNode::Space { vertical, size } => ctx.call(
                if *vertical { "vspace" } else { "hspace" },
                &[js_value(size)],
            ),
            ComponentNode::Plot(plot) => self.plot(plot, depth),
            ComponentNode::Input(input) => self.input(input),
        }
    }

    fn nested(&self, function: &str, children: &[ComponentNode], depth: usize) -> String {
        let args: Vec<String> = children
            .iter()
            .map(|child| self.component(child, depth + 1))
            .collect();
        self.block(function, &args, depth)
    }

    fn block(&self, function: &str, args: &[String], depth: usize) -> String {
        if args.is_empty() {
            return self.ctx.call(function, &[]);
        }
        let indent = "  ".repeat(depth + 1);
        let close = "  ".repeat(depth);
        format!(
            "{}.{}(\n{}{}\n{})",
            self.ctx.namespace,
            function,
            indent,
            args.join(&format!(",\n{}", indent)),
            close
        )
    }

    fn plot(&self, plot: &PlotNode, depth: usize) -> String {
        let mut args: Vec<String> = plot
            .entries
            .iter()
            .map(|entry| match entry {
                PlotEntry::Mark(mark) => self.mark(mark),
                PlotEntry::Interactor(interactor) => self.interactor(interactor),
            })
            .collect();
        for (name, value) in &plot.attributes {
            args.push(self.ctx.call(name, &[js_value(value)]));
        }
        self.block("plot", &args, depth)
    }

    fn mark(&self, mark: &MarkNode) -> String {
        let mut args = Vec::new();
        if let Some(from) = &mark.from {
            let mut from_args = vec![js_string(&from.table)];
            if let Some(filter_by) = &from.filter_by {
                from_args.push(js_object([("filterBy", format!("${}", filter_by))]));
            }
            args.push(self.ctx.call("from", &from_args));
        }

        let mut entries: Vec<(&str, String)> = mark
            .channels
            .iter()
            .map(|(channel, value)| (channel.as_str(), self.channel(value)))
            .collect();
        entries.extend(mark.options.iter().map(|(k, v)| (k.as_str(), js_value(v))));
        if !entries.is_empty() {
            args.push(js_object(entries));
        }
        self.ctx.call(&mark.mark, &args)
    }

    fn channel(&self, value: &ChannelValue) -> String {
        match value {
            ChannelValue::Field { name } => js_string(name),
            ChannelValue::Bin { field, step } => {
                let mut args = vec![js_string(field)];
                if let Some(step) = step {
                    args.push(js_object([("step", js_value(&Value::from(*step)))]));
                }
                self.ctx.call("bin", &args)
            }
            ChannelValue::Aggregate { func, field } => {
                let args: Vec<String> = field.iter().map(|f| js_string(f)).collect();
                self.ctx.call(func.as_str(), &args)
            }
            ChannelValue::Constant { value } => js_value(value),
        }
    }

    fn interactor(&self, interactor: &InteractorNode) -> String {
        let mut entries: Vec<(&str, String)> = Vec::new();
        if let Some(selection) = &interactor.selection {
            entries.push(("as", format!("${}", selection)));
        }
        entries.extend(interactor.options.iter().map(|(k, v)| (k.as_str(), js_value(v))));
        let args = if entries.is_empty() {
            Vec::new()
        } else {
            vec![js_object(entries)]
        };
        self.ctx.call(interactor.kind.as_str(), &args)
    }

    fn input(&self, input: &InputNode) -> String {
        let mut entries: Vec<(&str, String)> = Vec::new();
        if let Some(from) = &input.from {
            entries.push(("from", js_string(&from.table)));
            if let Some(filter_by) = &from.filter_by {
                entries.push(("filterBy", format!("${}", filter_by)));
            }
        }
        if let Some(column) = &input.column {
            entries.push(("column", js_string(column)));
        }
        if let Some(columns) = &input.columns {
            let columns: Vec<String> = columns.iter().map(|c| js_string(c)).collect();
            entries.push(("columns", format!("[{}]", columns.join(", "))));
        }
        if let Some(selection) = &input.selection {
            entries.push(("as", format!("${}", selection)));
        }
        entries.extend(input.options.iter().map(|(k, v)| (k.as_str(), js_value(v))));
        self.ctx.call(input.kind.as_str(), &[js_object(entries)])
    }

    /// Params declared in the AST plus selections only referenced by
    /// components, which default to intersect
    fn params(&self, spec: &SpecNode) -> Vec<String> {
        let mut lines = Vec::new();
        for (name, param) in &spec.params {
            let value = match param {
                ParamNode::Selection { kind } => {
                    format!("{}.Selection.{}()", self.ctx.namespace, kind.as_str())
                }
                ParamNode::Value { value } => {
                    self.ctx.call("Param.value", &[js_value(value)])
                }
            };
            lines.push(format!("const ${} = {};", name, value));
        }
        for name in referenced_params(spec) {
            if !spec.params.contains_key(&name) {
                lines.push(format!(
                    "const ${} = {}.Selection.intersect();",
                    name, self.ctx.namespace
                ));
            }
        }
        lines
    }
}

/// Param names referenced anywhere in the component tree, in order
fn referenced_params(spec: &SpecNode) -> IndexSet<String> {
    let mut names = IndexSet::new();
    for component in spec.components() {
        match component {
            ComponentNode::Plot(plot) => {
                for entry in &plot.entries {
                    match entry {
                        PlotEntry::Mark(mark) => {
                            if let Some(name) = mark.from.as_ref().and_then(|f| f.filter_by.as_ref()) {
                                names.insert(name.clone());
                            }
                            for value in mark.channels.values() {
                                if let ChannelValue::Constant { value } = value {
                                    collect_value_refs(value, &mut names);
                                }
                            }
                        }
                        PlotEntry::Interactor(interactor) => {
                            names.extend(interactor.selection.iter().cloned());
                        }
                    }
                }
            }
            ComponentNode::Input(input) => {
                names.extend(input.selection.iter().cloned());
                if let Some(name) = input.from.as_ref().and_then(|f| f.filter_by.as_ref()) {
                    names.insert(name.clone());
                }
            }
            _ => {}
        }
    }
    names
}

fn collect_value_refs(value: &Value, names: &mut IndexSet<String>) {
    match value {
        Value::String(s) => {
            if let Some(name) = param_ref(s) {
                names.insert(name.to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_value_refs(v, names)),
        Value::Object(map) => map.values().for_each(|v| collect_value_refs(v, names)),
        _ => {}
    }
}

fn param_ref(s: &str) -> Option<&str> {
    let name = s.strip_prefix('$')?;
    is_identifier(name).then_some(name)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Writer for EsmWriter {
    fn write(&self, spec: &SpecNode) -> Result<String> {
        self.validate(spec)?;
        let ctx = &self.ctx;
        let mut sections = Vec::new();

        let imports: Vec<String> = ctx
            .imports
            .iter()
            .map(|(module, clause)| format!("import {} from {};", clause, js_string(module)))
            .collect();
        sections.push(imports.join("\n"));

        if let Some(preamble) = &ctx.preamble {
            sections.push(preamble.trim_end().to_string());
        }

        if let Some(connector) = &ctx.connector {
            sections.push(format!(
                "{}.coordinator().databaseConnector({}.{}Connector());",
                ctx.namespace, ctx.namespace, connector
            ));
        }

        if !spec.data.is_empty() {
            let loads: Vec<String> = spec.data.values().map(|node| codegen_load(node, ctx)).collect();
            sections.push(format!(
                "await {}.coordinator().exec([\n  {}\n]);",
                ctx.namespace,
                loads.join(",\n  ")
            ));
        }

        let params = self.params(spec);
        if !params.is_empty() {
            sections.push(params.join("\n"));
        }

        sections.push(format!(
            "export default function createElement() {{\n  return {};\n}}",
            self.component(&spec.root, 1)
        ));

        let mut code = sections.join("\n\n");
        code.push('\n');
        Ok(code)
    }

    fn validate(&self, spec: &SpecNode) -> Result<()> {
        let declared = spec.params.keys().cloned();
        for name in declared.chain(referenced_params(spec)) {
            if !is_identifier(&name) {
                return Err(PublishError::WriterError(format!(
                    "Param '{}' is not a valid identifier",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// JavaScript string literal
pub fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

/// JavaScript object literal from rendered entries
fn js_object<'a>(entries: impl IntoIterator<Item = (&'a str, String)>) -> String {
    let fields: Vec<String> = entries
        .into_iter()
        .map(|(key, value)| {
            let key = if is_identifier(key) {
                key.to_string()
            } else {
                js_string(key)
            };
            format!("{}: {}", key, value)
        })
        .collect();
    format!("{{ {} }}", fields.join(", "))
}

/// JavaScript expression for a JSON value; `$name` strings become param
/// references
pub fn js_value(value: &Value) -> String {
    match value {
        Value::String(s) => match param_ref(s) {
            Some(name) => format!("${}", name),
            None => js_string(s),
        },
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(js_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => js_object(map.iter().map(|(k, v)| (k.as_str(), js_value(v)))),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::parse_spec;
    use serde_json::json;

    #[test]
    fn test_path_rewrite() {
        let file = "data/flights.parquet";
        assert_eq!(PathRewrite::Relative.expr(file), "\"data/flights.parquet\"");
        assert_eq!(
            PathRewrite::Origin.expr(file),
            "window.location.origin + \"/data/flights.parquet\""
        );
        assert_eq!(
            PathRewrite::BaseUrl("https://cdn.example.com/viz/".to_string()).expr(file),
            "\"https://cdn.example.com/viz/data/flights.parquet\""
        );
    }

    #[test]
    fn test_codegen_load_variants() {
        let ctx = CodegenContext::default()
            .with_namespace("getVgInstance()")
            .with_path_rewrite(PathRewrite::Origin);
        let view = DataNode::parquet("mosaic.preagg_1234abcd", "data/.mosaic/preagg_1234abcd.parquet");
        assert_eq!(
            codegen_load(&view, &ctx),
            "getVgInstance().loadParquet(\"mosaic.preagg_1234abcd\", \
             window.location.origin + \"/data/.mosaic/preagg_1234abcd.parquet\")"
        );

        let query = DataNode::Query {
            name: "t".to_string(),
            query: "SELECT 1".to_string(),
        };
        assert_eq!(
            codegen_load(&query, &CodegenContext::default()),
            "\"CREATE TABLE IF NOT EXISTS t AS SELECT 1\""
        );
    }

    #[test]
    fn test_js_value() {
        assert_eq!(js_value(&json!("$brush")), "$brush");
        assert_eq!(js_value(&json!("$ 5")), "\"$ 5\"");
        assert_eq!(
            js_value(&json!({"a b": [1, "x"], "c": true})),
            "{ \"a b\": [1, \"x\"], c: true }"
        );
    }

    #[test]
    fn test_write_module() {
        let spec = parse_spec(
            r#"
data:
  flights: { file: data/flights.parquet }
params:
  brush: { select: crossfilter }
vconcat:
  - plot:
      - mark: rectY
        data: { from: flights, filterBy: $brush }
        x: { bin: delay }
        y: { count: }
      - select: intervalX
        as: $brush
    width: 600
  - input: menu
    from: flights
    column: carrier
    as: $picked
"#,
        )
        .unwrap();

        let ctx = CodegenContext::default()
            .with_import(FLECHETTE, "{ tableFromIPC }")
            .with_preamble(preamble(None, &PathRewrite::Origin))
            .with_connector("wasm")
            .with_path_rewrite(PathRewrite::Origin);
        let code = EsmWriter::new(ctx).write(&spec).unwrap();

        assert!(code.starts_with(
            "import * as vg from \"@uwdata/vgplot\";\nimport { tableFromIPC } from \"@uwdata/flechette\";"
        ));
        assert!(code.contains("export function getVgInstance()"));
        assert!(code.contains("vg.coordinator().databaseConnector(vg.wasmConnector());"));
        assert!(code.contains(
            "vg.loadParquet(\"flights\", window.location.origin + \"/data/flights.parquet\")"
        ));
        assert!(code.contains("const $brush = vg.Selection.crossfilter();"));
        assert!(code.contains("const $picked = vg.Selection.intersect();"));
        assert!(code.contains(
            "vg.rectY(vg.from(\"flights\", { filterBy: $brush }), { x: vg.bin(\"delay\"), y: vg.count() })"
        ));
        assert!(code.contains("vg.intervalX({ as: $brush })"));
        assert!(code.contains("vg.width(600)"));
        assert!(code.contains("vg.menu({ from: \"flights\", column: \"carrier\", as: $picked })"));
        assert!(code.contains("export default function createElement() {\n  return vg.vconcat(\n"));
        assert!(code.trim_end().ends_with("  );\n}"));
    }

    #[test]
    fn test_cache_preamble() {
        let code = preamble(Some(".cache.arrow"), &PathRewrite::Origin);
        assert!(code.contains("fetch(window.location.origin + \"/.cache.arrow\")"));
        assert!(code.contains("tableFromIPC(bytes)"));

        let code = preamble(Some(".cache.arrow"), &PathRewrite::Relative);
        assert!(code.contains("fetch(\".cache.arrow\")"));
        assert!(!code.contains("window.location.origin"));

        let base = PathRewrite::BaseUrl("https://example.com/viz".to_string());
        let code = preamble(Some(".cache.arrow"), &base);
        assert!(code.contains("fetch(\"https://example.com/viz/.cache.arrow\")"));

        assert!(!preamble(None, &PathRewrite::Relative).contains("fetch"));
    }
}
