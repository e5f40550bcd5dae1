/*!
Specification Module

Parses Mosaic specifications (YAML, or JSON as its subset) into a typed AST.

## Architecture

1. **Document parsing**: `serde_yaml` deserializes the text into an
   order-preserving `serde_json::Value`. Syntax errors keep their line and
   column.

2. **AST building**: [`builder`] walks the document into a [`SpecNode`]:
   data declarations, params/selections and the component tree.

## Example Usage

```rust
# use mosaic_publish::spec::{parse_spec, ComponentNode};
# fn main() -> Result<(), Box<dyn std::error::Error>> {
let spec = parse_spec(r#"
data:
  flights: { file: data/flights.parquet }
params:
  brush: { select: crossfilter }
plot:
  - mark: rectY
    data: { from: flights, filterBy: $brush }
    x: { bin: delay }
    y: { count: }
  - select: intervalX
    as: $brush
width: 600
"#)?;

assert_eq!(spec.data.len(), 1);
assert!(matches!(spec.root, ComponentNode::Plot(_)));
# Ok(())
# }
```
*/

use crate::Result;

pub mod ast;
pub mod builder;
pub mod error;

pub use ast::*;
pub use error::ParseError;

/// Parse raw specification text into an AST
///
/// Fails with [`crate::PublishError::ParseError`] on malformed YAML/JSON or
/// on a document that does not describe a visualization.
pub fn parse_spec(text: &str) -> Result<SpecNode> {
    let document: serde_json::Value = serde_yaml::from_str(text).map_err(ParseError::from)?;
    let spec = builder::build_spec(&document)?;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CROSSFILTER: &str = r#"
meta:
  title: Flight delays
data:
  flights:
    file: data/flights.parquet
params:
  brush: { select: crossfilter }
vconcat:
  - plot:
      - mark: rectY
        data: { from: flights, filterBy: $brush }
        x: { bin: delay }
        y: { count: }
        fill: steelblue
      - select: intervalX
        as: $brush
    width: 600
    height: 200
  - input: menu
    from: flights
    column: carrier
    as: $brush
    label: Carrier
"#;

    #[test]
    fn test_parse_crossfilter_spec() {
        let spec = parse_spec(CROSSFILTER).unwrap();

        assert_eq!(spec.meta.title.as_deref(), Some("Flight delays"));
        assert_eq!(
            spec.params["brush"],
            ParamNode::Selection {
                kind: SelectionKind::Crossfilter
            }
        );

        let children = match &spec.root {
            ComponentNode::VConcat { children } => children,
            other => panic!("expected vconcat, got {:?}", other),
        };
        assert_eq!(children.len(), 2);

        let plot = match &children[0] {
            ComponentNode::Plot(plot) => plot,
            other => panic!("expected plot, got {:?}", other),
        };
        let mark = plot.marks().next().unwrap();
        assert_eq!(mark.mark, "rectY");
        assert_eq!(
            mark.from,
            Some(DataRef {
                table: "flights".to_string(),
                filter_by: Some("brush".to_string())
            })
        );
        assert_eq!(mark.channels.len(), 3);
        assert_eq!(plot.attributes["width"], serde_json::json!(600));

        let interactor = plot.interactors().next().unwrap();
        assert_eq!(interactor.kind, InteractorKind::IntervalX);

        match &children[1] {
            ComponentNode::Input(input) => {
                assert_eq!(input.kind, InputKind::Menu);
                assert_eq!(input.column.as_deref(), Some("carrier"));
                assert_eq!(input.selection.as_deref(), Some("brush"));
                assert_eq!(input.options["label"], serde_json::json!("Carrier"));
            }
            other => panic!("expected input, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_json_document() {
        let spec = parse_spec(
            r#"{"data": {"t": {"query": "SELECT 1 AS a"}}, "plot": [{"mark": "dot", "data": {"from": "t"}, "x": "a"}]}"#,
        )
        .unwrap();
        assert!(matches!(spec.data["t"], DataNode::Query { .. }));
        match spec.root {
            ComponentNode::Plot(plot) => assert!(plot.attributes.is_empty()),
            other => panic!("expected plot, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let err = parse_spec("plot: [unclosed").unwrap_err();
        assert!(matches!(err, crate::PublishError::ParseError(_)));
    }

    #[test]
    fn test_structural_error_names_path() {
        let err = parse_spec("plot:\n  - mark: dot\n  - legend: color\n").unwrap_err();
        assert!(err.to_string().contains("$.plot[1]"));
    }
}
