//! Mount a specification into a render context
//!
//! Mounting loads the declared data into the engine, builds the element tree
//! and registers a client for every mark and input. Each client's initial
//! query is submitted here; [`RenderContext::clients_ready`] waits for the
//! results and renders them.

use crate::coordinator::catalog::Catalog;
use crate::coordinator::{Expr, Query, QueryResult};
use crate::render::client::{Client, InputWidget, MarkClient};
use crate::render::dom::{Document, ElementId};
use crate::render::RenderContext;
use crate::spec::{
    AggregateFunc, ChannelValue, ComponentNode, DataNode, InputKind, InputNode, MarkNode,
    ParamNode, PlotNode, SpecNode,
};
use crate::{PublishError, Result};
use serde_json::Value;

/// Bin width when a channel does not set one
pub const DEFAULT_BIN_STEP: f64 = 1.0;

/// Rows fetched by table inputs
pub const TABLE_ROW_LIMIT: usize = 100;

/// Mount `spec` into `ctx`, returning the root element
pub async fn mount(spec: &SpecNode, ctx: &mut RenderContext) -> Result<ElementId> {
    let loads: Vec<String> = spec.data.values().map(DataNode::load_sql).collect();
    if !loads.is_empty() {
        tracing::info!("Loading {} data source(s)", loads.len());
        ctx.coordinator().exec(loads).wait().await?;
    }
    let catalog = ctx.coordinator().catalog().await?;
    ctx.set_catalog(catalog);

    for (name, param) in &spec.params {
        if let ParamNode::Selection { kind } = param {
            ctx.declare_selection(name, *kind);
        }
    }

    let root = mount_component(&spec.root, ctx)?;
    ctx.set_root(root);
    Ok(root)
}

fn mount_component(node: &ComponentNode, ctx: &mut RenderContext) -> Result<ElementId> {
    match node {
        ComponentNode::VConcat { children } | ComponentNode::HConcat { children } => {
            let vertical = matches!(node, ComponentNode::VConcat { .. });
            let element = ctx.document_mut().create_element("div");
            let doc = ctx.document_mut();
            doc.set_attribute(element, "class", if vertical { "vconcat" } else { "hconcat" });
            doc.set_attribute(
                element,
                "style",
                format!(
                    "display: flex; flex-direction: {};",
                    if vertical { "column" } else { "row" }
                ),
            );
            for child in children {
                let child = mount_component(child, ctx)?;
                ctx.document_mut().append_child(element, child);
            }
            Ok(element)
        }
        ComponentNode::Space { vertical, size } => {
            let doc = ctx.document_mut();
            let element = doc.create_element("div");
            let size = match size {
                Value::Number(n) => format!("{}px", n),
                Value::String(s) => s.clone(),
                _ => "1em".to_string(),
            };
            let dimension = if *vertical { "height" } else { "width" };
            doc.set_attribute(element, "style", format!("{}: {};", dimension, size));
            Ok(element)
        }
        ComponentNode::Plot(plot) => mount_plot(plot, ctx),
        ComponentNode::Input(input) => mount_input(input, ctx),
    }
}

fn mount_plot(node: &PlotNode, ctx: &mut RenderContext) -> Result<ElementId> {
    let doc = ctx.document_mut();
    let element = doc.create_element("div");
    doc.set_attribute(element, "class", "plot");
    let svg = doc.append_new(element, "svg");
    doc.set_attribute(svg, "xmlns", "http://www.w3.org/2000/svg");
    for dimension in ["width", "height"] {
        if let Some(value) = node.attributes.get(dimension) {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            doc.set_attribute(svg, dimension, value);
        }
    }

    let plot = ctx.add_plot(element);
    for mark in node.marks() {
        let query = match &mark.from {
            Some(from) => Some(mark_query(mark, &from.table, ctx.catalog())?),
            None => None,
        };
        let doc = ctx.document_mut();
        let group = doc.append_new(svg, "g");
        doc.set_attribute(group, "aria-label", format!("{}-mark", mark.mark));
        ctx.add_mark(plot, mark.clone(), group, query);
    }

    for interactor in node.interactors() {
        let fields = interactor_fields(node, interactor.kind.channels(), ctx.catalog());
        ctx.add_interactor(plot, interactor.kind, interactor.selection.clone(), fields);
    }

    Ok(element)
}

/// Column behind a channel value, if it reads one
fn channel_column<'a>(value: &'a ChannelValue, columns: &[String]) -> Option<&'a str> {
    match value {
        ChannelValue::Field { name } if columns.contains(name) => Some(name),
        ChannelValue::Bin { field, .. } => Some(field),
        _ => None,
    }
}

/// Fields an interactor selects on: for each of its channels, the column the
/// first mark encoding that channel reads
fn interactor_fields(plot: &PlotNode, channels: &[&str], catalog: &Catalog) -> Vec<String> {
    let mut fields = Vec::new();
    for channel in channels {
        let field = plot.marks().find_map(|mark| {
            let table = &mark.from.as_ref()?.table;
            let columns = catalog.columns(table)?;
            channel_column(mark.channels.get(*channel)?, columns)
        });
        if let Some(field) = field {
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        }
    }
    fields
}

/// Query a mark issues for its encoding channels
pub fn mark_query(mark: &MarkNode, table: &str, catalog: &Catalog) -> Result<Query> {
    let columns = catalog.columns(table).ok_or_else(|| {
        PublishError::ValidationError(format!(
            "Mark '{}' reads unknown table '{}'",
            mark.mark, table
        ))
    })?;
    let require = |column: &str| -> Result<String> {
        if columns.iter().any(|c| c == column) {
            Ok(column.to_string())
        } else {
            Err(PublishError::ValidationError(format!(
                "Mark '{}' reads unknown column '{}' of '{}'",
                mark.mark, column, table
            )))
        }
    };

    let mut exprs = Vec::new();
    for (channel, value) in &mark.channels {
        let expr = match value {
            ChannelValue::Field { name } if columns.contains(name) => Expr::column(name.as_str()),
            ChannelValue::Field { .. } | ChannelValue::Constant { .. } => continue,
            ChannelValue::Bin { field, step } => Expr::Bin {
                column: require(field.as_str())?,
                step: step.unwrap_or(DEFAULT_BIN_STEP),
            },
            ChannelValue::Aggregate { func, field } => Expr::Agg {
                func: *func,
                column: field.as_deref().map(require).transpose()?,
            },
        };
        exprs.push((channel.clone(), expr));
    }

    if exprs.is_empty() {
        exprs.push((
            "count".to_string(),
            Expr::Agg {
                func: AggregateFunc::Count,
                column: None,
            },
        ));
    }
    Ok(Query::from_table(table).select(exprs))
}

fn input_query(node: &InputNode) -> Option<Query> {
    let table = &node.from.as_ref()?.table;
    let query = Query::from_table(table.as_str());
    match node.kind {
        InputKind::Table => {
            let query = match &node.columns {
                Some(columns) => query.select(
                    columns
                        .iter()
                        .map(|c| (c.clone(), Expr::column(c.as_str())))
                        .collect(),
                ),
                None => query,
            };
            Some(query.limit(TABLE_ROW_LIMIT))
        }
        InputKind::Menu | InputKind::Search => {
            let column = node.column.as_deref()?;
            Some(
                query
                    .select(vec![("value".to_string(), Expr::column(column))])
                    .distinct()
                    .order_by("value"),
            )
        }
        InputKind::Slider => {
            let column = node.column.as_deref()?;
            let agg = |func| Expr::Agg {
                func,
                column: Some(column.to_string()),
            };
            Some(query.select(vec![
                ("min".to_string(), agg(AggregateFunc::Min)),
                ("max".to_string(), agg(AggregateFunc::Max)),
            ]))
        }
    }
}

fn mount_input(node: &InputNode, ctx: &mut RenderContext) -> Result<ElementId> {
    if let Some(from) = &node.from {
        if ctx.catalog().table(&from.table).is_none() {
            return Err(PublishError::ValidationError(format!(
                "Input '{}' reads unknown table '{}'",
                node.kind.as_str(),
                from.table
            )));
        }
    }

    let doc = ctx.document_mut();
    let element = doc.create_element("div");
    doc.set_attribute(element, "class", format!("input {}", node.kind.as_str()));

    let widget = InputWidget {
        id: ctx.next_client_id(),
        node: node.clone(),
        element,
        query: input_query(node),
    };
    render_input(ctx.document_mut(), &widget, None)?;
    ctx.add_input(widget);
    Ok(element)
}

/// Render a client's element, with its query result once available
pub(crate) fn render_client(
    doc: &mut Document,
    client: &Client,
    result: Option<&QueryResult>,
) -> Result<()> {
    match client {
        Client::Mark(mark) => render_mark(doc, mark, result),
        Client::Input(input) => render_input(doc, input, result),
    }
}

fn render_mark(doc: &mut Document, mark: &MarkClient, result: Option<&QueryResult>) -> Result<()> {
    if let Some(result) = result {
        doc.set_attribute(mark.element, "data-rows", result.num_rows().to_string());
    }
    Ok(())
}

fn option_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_input(doc: &mut Document, input: &InputWidget, result: Option<&QueryResult>) -> Result<()> {
    let node = &input.node;
    let element = input.element;
    doc.clear_children(element);

    let label = node
        .options
        .get("label")
        .map(option_text)
        .or_else(|| node.column.clone());

    let container = match (&label, node.kind) {
        (Some(label), InputKind::Menu | InputKind::Slider | InputKind::Search) => {
            let container = doc.append_new(element, "label");
            doc.append_text(container, format!("{} ", label));
            container
        }
        _ => element,
    };

    match node.kind {
        InputKind::Menu => {
            let select = doc.append_new(container, "select");
            let all = doc.append_new(select, "option");
            doc.set_attribute(all, "value", "");
            doc.append_text(all, "All");

            let values: Vec<String> = match result {
                Some(result) => result.column_text("value")?.into_iter().flatten().collect(),
                None => match node.options.get("options") {
                    Some(Value::Array(options)) => options.iter().map(option_text).collect(),
                    _ => Vec::new(),
                },
            };
            for value in values {
                let option = doc.append_new(select, "option");
                doc.set_attribute(option, "value", value.clone());
                doc.append_text(option, value);
            }
        }
        InputKind::Slider => {
            let range = doc.append_new(container, "input");
            doc.set_attribute(range, "type", "range");
            let bound = |name: &str| -> Result<Option<String>> {
                if let Some(value) = node.options.get(name) {
                    return Ok(Some(option_text(value)));
                }
                Ok(match result {
                    Some(result) => result
                        .column_f64(name)?
                        .into_iter()
                        .flatten()
                        .next()
                        .map(|v| v.to_string()),
                    None => None,
                })
            };
            for name in ["min", "max"] {
                if let Some(value) = bound(name)? {
                    doc.set_attribute(range, name, value);
                }
            }
            if let Some(step) = node.options.get("step") {
                doc.set_attribute(range, "step", option_text(step));
            }
        }
        InputKind::Search => {
            let search = doc.append_new(container, "input");
            doc.set_attribute(search, "type", "search");
            if let Some(result) = result {
                let list_id = format!("search-{}", input.id.0);
                doc.set_attribute(search, "list", list_id.clone());
                let list = doc.append_new(container, "datalist");
                doc.set_attribute(list, "id", list_id);
                for value in result.column_text("value")?.into_iter().flatten() {
                    let option = doc.append_new(list, "option");
                    doc.set_attribute(option, "value", value);
                }
            }
        }
        InputKind::Table => {
            let table = doc.append_new(container, "table");
            if let Some(result) = result {
                let head = doc.append_new(table, "thead");
                let row = doc.append_new(head, "tr");
                let names: Vec<String> = result
                    .schema
                    .fields()
                    .iter()
                    .map(|f| f.name().clone())
                    .collect();
                for name in &names {
                    let th = doc.append_new(row, "th");
                    doc.append_text(th, name.clone());
                }

                let columns = names
                    .iter()
                    .map(|name| result.column_text(name))
                    .collect::<Result<Vec<_>>>()?;
                let body = doc.append_new(table, "tbody");
                for i in 0..result.num_rows() {
                    let tr = doc.append_new(body, "tr");
                    for column in &columns {
                        let td = doc.append_new(tr, "td");
                        doc.append_text(td, column[i].clone().unwrap_or_default());
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::NamedFrom;
    use crate::coordinator::{ColumnUsage, Coordinator, QueryMonitor};
    use crate::render::ActivationTarget;
    use crate::spec::parse_spec;
    use std::sync::Arc;

    const DASHBOARD: &str = r#"
data:
  flights:
    query: >
      SELECT range AS id, range % 5 AS carrier, range * 2.0 AS delay,
             range % 300 AS distance FROM range(100)
params:
  brush: { select: crossfilter }
vconcat:
  - plot:
      - mark: rectY
        data: { from: flights, filterBy: $brush }
        x: { bin: delay, step: 20 }
        y: { count: }
      - select: intervalX
        as: $brush
    width: 400
  - plot:
      - mark: rectY
        data: { from: flights, filterBy: $brush }
        x: { bin: distance, step: 50 }
        y: { count: }
      - select: intervalX
        as: $brush
  - input: menu
    from: flights
    column: carrier
    as: $brush
  - input: table
    from: flights
    columns: [id]
"#;

    async fn mounted(text: &str) -> RenderContext {
        let spec = parse_spec(text).unwrap();
        let coordinator = Arc::new(Coordinator::open("duckdb://memory").unwrap());
        let mut ctx = RenderContext::new(coordinator);
        mount(&spec, &mut ctx).await.unwrap();
        ctx.clients_ready().await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_mount_registers_clients() {
        let ctx = mounted(DASHBOARD).await;

        assert_eq!(ctx.clients().len(), 4);
        assert_eq!(ctx.coordinator().pending_exec(), 0);
        let interactor = ctx.interactor(crate::render::InteractorId(0)).unwrap();
        assert_eq!(interactor.fields, vec!["delay".to_string()]);

        let html = ctx.root_html().unwrap();
        assert!(html.starts_with("<div class=\"vconcat\""));
        assert!(html.contains("data-rows=\"10\""));
        assert!(html.contains("<option value=\"4\">4</option>"));
        assert!(html.contains("<th>id</th>"));
        assert!(html.contains("width=\"400\""));
    }

    #[tokio::test]
    async fn test_mount_records_usage() {
        let ctx = mounted(DASHBOARD).await;
        let usage = ctx.coordinator().table_usage();
        assert_eq!(
            usage.get("flights"),
            Some(&ColumnUsage::columns(["carrier", "delay", "distance", "id"]))
        );
    }

    #[tokio::test]
    async fn test_crossfilter_activation_skips_source_plot() {
        let ctx = mounted(DASHBOARD).await;

        let first = ctx
            .activate(ActivationTarget::Interactor(crate::render::InteractorId(0)))
            .unwrap();
        // Only the other plot is preaggregated
        assert_eq!(first.views.len(), 1);

        let again = ctx
            .activate(ActivationTarget::Interactor(crate::render::InteractorId(0)))
            .unwrap();
        assert!(again.views.is_empty());

        let menu = ctx.clients()[2].id();
        let by_menu = ctx.activate(ActivationTarget::Input(menu)).unwrap();
        assert_eq!(by_menu.views.len(), 2);
    }

    #[tokio::test]
    async fn test_table_input_is_not_activatable() {
        let ctx = mounted(DASHBOARD).await;
        let table = ctx.clients()[3].id();
        assert!(ctx.activate(ActivationTarget::Input(table)).is_err());
    }

    #[tokio::test]
    async fn test_unknown_table_is_validation_error() {
        let spec = parse_spec("plot:\n  - mark: dot\n    data: { from: nowhere }\n    x: a\n").unwrap();
        let coordinator = Arc::new(Coordinator::open("duckdb://memory").unwrap());
        let mut ctx = RenderContext::new(coordinator);
        let err = mount(&spec, &mut ctx).await.unwrap_err();
        assert!(matches!(err, PublishError::ValidationError(_)));
    }

    #[test]
    fn test_mark_query_skips_constants() {
        let spec = parse_spec(
            "plot:\n  - mark: dot\n    data: { from: t }\n    x: a\n    fill: steelblue\n    r: 3\n",
        )
        .unwrap();
        let ComponentNode::Plot(plot) = &spec.root else {
            panic!("expected plot");
        };
        let df = polars::prelude::DataFrame::new(vec![
            polars::prelude::Series::new("table_schema".into(), vec!["main", "main"]).into(),
            polars::prelude::Series::new("table_name".into(), vec!["t", "t"]).into(),
            polars::prelude::Series::new("column_name".into(), vec!["a", "b"]).into(),
        ])
        .unwrap();
        let catalog = Catalog::from_frame(&df).unwrap();

        let query = mark_query(plot.marks().next().unwrap(), "t", &catalog).unwrap();
        assert_eq!(query.to_sql(), "SELECT \"a\" AS \"x\" FROM \"t\"");
    }
}
