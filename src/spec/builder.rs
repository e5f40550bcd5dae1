//! AST building from a parsed YAML/JSON document
//!
//! The document is first deserialized into a `serde_json::Value` (which keeps
//! key order), then walked here into the typed [`SpecNode`]. Every error
//! carries the key path of the offending node.

use super::ast::*;
use super::error::ParseError;
use serde_json::{Map, Value};

type BuildResult<T> = std::result::Result<T, ParseError>;

/// Encoding channels recognized on marks; every other key is a mark option.
const CHANNELS: &[&str] = &[
    "x", "y", "x1", "x2", "y1", "y2", "z", "fill", "stroke", "r", "opacity", "fillOpacity",
    "strokeOpacity", "strokeWidth", "symbol", "text", "title", "href", "length", "rotate",
    "order",
];

/// Component keys, in the order they are probed
const COMPONENT_KEYS: &[&str] = &["vconcat", "hconcat", "plot", "mark", "input", "hspace", "vspace"];

/// Top-level keys that declare shared state rather than components
const ROOT_KEYS: &[&str] = &["meta", "params", "data", "config"];

/// Build a [`SpecNode`] from a document root
pub fn build_spec(root: &Value) -> BuildResult<SpecNode> {
    let obj = root
        .as_object()
        .ok_or_else(|| ParseError::at("Specification must be an object", "$"))?;

    let meta = match obj.get("meta") {
        Some(meta) => build_meta(meta)?,
        None => MetaNode::default(),
    };

    let params = match obj.get("params") {
        Some(params) => build_params(params)?,
        None => Default::default(),
    };

    let data = match obj.get("data") {
        Some(data) => build_data(data)?,
        None => Default::default(),
    };

    // Declaration blocks are not attributes of the root component
    let component: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| !ROOT_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let root = build_component(&Value::Object(component), "$")?;

    Ok(SpecNode {
        meta,
        params,
        data,
        root,
    })
}

fn build_meta(value: &Value) -> BuildResult<MetaNode> {
    let obj = expect_object(value, "meta")?;
    Ok(MetaNode {
        title: obj.get("title").and_then(Value::as_str).map(str::to_string),
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn build_params(value: &Value) -> BuildResult<indexmap::IndexMap<String, ParamNode>> {
    let obj = expect_object(value, "params")?;
    let mut params = indexmap::IndexMap::new();
    for (name, def) in obj {
        let path = format!("params.{}", name);
        let param = match def {
            Value::Object(def) if def.contains_key("select") => {
                let kind = def["select"]
                    .as_str()
                    .and_then(SelectionKind::from_name)
                    .ok_or_else(|| {
                        ParseError::at(format!("Unknown selection type {}", def["select"]), &path)
                    })?;
                ParamNode::Selection { kind }
            }
            Value::Object(def) if def.contains_key("value") => ParamNode::Value {
                value: def["value"].clone(),
            },
            Value::Object(_) => {
                return Err(ParseError::at(
                    "Param must declare either 'select' or 'value'",
                    path,
                ))
            }
            other => ParamNode::Value {
                value: other.clone(),
            },
        };
        params.insert(name.trim_start_matches('$').to_string(), param);
    }
    Ok(params)
}

fn build_data(value: &Value) -> BuildResult<indexmap::IndexMap<String, DataNode>> {
    let obj = expect_object(value, "data")?;
    let mut data = indexmap::IndexMap::new();
    for (name, def) in obj {
        let node = build_data_node(name, def, &format!("data.{}", name))?;
        data.insert(name.clone(), node);
    }
    Ok(data)
}

fn build_data_node(name: &str, def: &Value, path: &str) -> BuildResult<DataNode> {
    // Shorthand: a bare string is either a file path or a query
    if let Some(text) = def.as_str() {
        return Ok(match FileFormat::from_path(text) {
            Some(format) => DataNode::File {
                name: name.to_string(),
                file: text.to_string(),
                format,
                options: OptionsNode::new(),
            },
            None => DataNode::Query {
                name: name.to_string(),
                query: text.to_string(),
            },
        });
    }

    let obj = expect_object(def, path)?;
    let declared_type = obj.get("type").and_then(Value::as_str);
    let options: OptionsNode = obj
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "type" | "file" | "query"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(query) = obj.get("query").and_then(Value::as_str) {
        if !matches!(declared_type, None | Some("table")) {
            return Err(ParseError::at(
                format!("Query-backed data cannot have type '{}'", declared_type.unwrap_or("")),
                path,
            ));
        }
        return Ok(DataNode::Query {
            name: name.to_string(),
            query: query.to_string(),
        });
    }

    let file = obj
        .get("file")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::at("Data declaration needs a 'file' or 'query'", path))?;

    let format = match declared_type {
        Some("parquet") => FileFormat::Parquet,
        Some("csv") => FileFormat::Csv,
        Some("json") => FileFormat::Json,
        Some(other) => {
            return Err(ParseError::at(format!("Unsupported data type '{}'", other), path))
        }
        None => FileFormat::from_path(file).ok_or_else(|| {
            ParseError::at(format!("Cannot infer the format of '{}'", file), path)
        })?,
    };

    Ok(DataNode::File {
        name: name.to_string(),
        file: file.to_string(),
        format,
        options,
    })
}

fn build_component(value: &Value, path: &str) -> BuildResult<ComponentNode> {
    let obj = expect_object(value, path)?;
    let key = COMPONENT_KEYS
        .iter()
        .find(|key| obj.contains_key(**key))
        .ok_or_else(|| ParseError::at("No component found (expected vconcat, hconcat, plot, mark or input)", path))?;

    match *key {
        "vconcat" | "hconcat" => {
            let items = obj[*key].as_array().ok_or_else(|| {
                ParseError::at(format!("'{}' must be a list", key), path)
            })?;
            let children = items
                .iter()
                .enumerate()
                .map(|(i, item)| build_component(item, &format!("{}.{}[{}]", path, key, i)))
                .collect::<BuildResult<Vec<_>>>()?;
            Ok(if *key == "vconcat" {
                ComponentNode::VConcat { children }
            } else {
                ComponentNode::HConcat { children }
            })
        }
        "plot" => build_plot(obj, path).map(ComponentNode::Plot),
        "mark" => {
            // A bare mark is shorthand for a single-mark plot
            let mark = build_mark(obj, path)?;
            Ok(ComponentNode::Plot(PlotNode {
                entries: vec![PlotEntry::Mark(mark)],
                attributes: OptionsNode::new(),
            }))
        }
        "input" => build_input(obj, path).map(ComponentNode::Input),
        space => Ok(ComponentNode::Space {
            vertical: space == "vspace",
            size: obj[space].clone(),
        }),
    }
}

fn build_plot(obj: &Map<String, Value>, path: &str) -> BuildResult<PlotNode> {
    let entries = obj["plot"]
        .as_array()
        .ok_or_else(|| ParseError::at("'plot' must be a list of marks and interactors", path))?;

    let mut plot = PlotNode::default();
    for (i, entry) in entries.iter().enumerate() {
        let entry_path = format!("{}.plot[{}]", path, i);
        let entry_obj = expect_object(entry, &entry_path)?;
        if entry_obj.contains_key("mark") {
            plot.entries
                .push(PlotEntry::Mark(build_mark(entry_obj, &entry_path)?));
        } else if entry_obj.contains_key("select") {
            plot.entries.push(PlotEntry::Interactor(build_interactor(
                entry_obj,
                &entry_path,
            )?));
        } else {
            return Err(ParseError::at(
                "Plot entries must be marks or interactors",
                entry_path,
            ));
        }
    }

    plot.attributes = obj
        .iter()
        .filter(|(k, _)| k.as_str() != "plot")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(plot)
}

fn build_mark(obj: &Map<String, Value>, path: &str) -> BuildResult<MarkNode> {
    let mark = obj["mark"]
        .as_str()
        .ok_or_else(|| ParseError::at("'mark' must be a string", path))?
        .to_string();

    let from = match obj.get("data") {
        Some(data) => build_data_ref(data, &format!("{}.data", path))?,
        None => None,
    };

    let mut channels = indexmap::IndexMap::new();
    let mut options = OptionsNode::new();
    for (key, value) in obj {
        if matches!(key.as_str(), "mark" | "data") {
            continue;
        }
        if CHANNELS.contains(&key.as_str()) {
            channels.insert(
                key.clone(),
                build_channel(value, &format!("{}.{}", path, key))?,
            );
        } else {
            options.insert(key.clone(), value.clone());
        }
    }

    Ok(MarkNode {
        mark,
        from,
        channels,
        options,
    })
}

fn build_data_ref(value: &Value, path: &str) -> BuildResult<Option<DataRef>> {
    match value {
        Value::String(table) => Ok(Some(DataRef {
            table: table.clone(),
            filter_by: None,
        })),
        Value::Object(obj) => {
            let table = obj
                .get("from")
                .and_then(Value::as_str)
                .ok_or_else(|| ParseError::at("Data reference needs 'from'", path))?;
            Ok(Some(DataRef {
                table: table.to_string(),
                filter_by: param_ref(obj.get("filterBy")),
            }))
        }
        // Inline row data is not backed by any table
        Value::Array(_) => Ok(None),
        _ => Err(ParseError::at("Invalid data reference", path)),
    }
}

fn build_channel(value: &Value, path: &str) -> BuildResult<ChannelValue> {
    match value {
        Value::String(s) if s.starts_with('$') => Ok(ChannelValue::Constant {
            value: value.clone(),
        }),
        Value::String(s) => Ok(ChannelValue::Field { name: s.clone() }),
        Value::Object(obj) => {
            if let Some(field) = obj.get("bin") {
                let field = field
                    .as_str()
                    .ok_or_else(|| ParseError::at("'bin' expects a field name", path))?;
                return Ok(ChannelValue::Bin {
                    field: field.to_string(),
                    step: obj.get("step").and_then(Value::as_f64),
                });
            }
            if let Some((name, arg)) = obj.iter().next().filter(|_| obj.len() == 1) {
                if let Some(func) = AggregateFunc::from_name(name) {
                    let field = match arg {
                        Value::Null => None,
                        Value::String(s) if s.is_empty() => None,
                        Value::String(s) => Some(s.clone()),
                        _ => {
                            return Err(ParseError::at(
                                format!("'{}' expects a field name", name),
                                path,
                            ))
                        }
                    };
                    if field.is_none() && func != AggregateFunc::Count {
                        return Err(ParseError::at(
                            format!("'{}' requires a field", name),
                            path,
                        ));
                    }
                    return Ok(ChannelValue::Aggregate { func, field });
                }
            }
            Ok(ChannelValue::Constant {
                value: value.clone(),
            })
        }
        other => Ok(ChannelValue::Constant {
            value: other.clone(),
        }),
    }
}

fn build_interactor(obj: &Map<String, Value>, path: &str) -> BuildResult<InteractorNode> {
    let name = obj["select"]
        .as_str()
        .ok_or_else(|| ParseError::at("'select' must be a string", path))?;
    let kind = InteractorKind::from_name(name)
        .ok_or_else(|| ParseError::at(format!("Unknown interactor '{}'", name), path))?;
    let options = obj
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "select" | "as"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(InteractorNode {
        kind,
        selection: param_ref(obj.get("as")),
        options,
    })
}

fn build_input(obj: &Map<String, Value>, path: &str) -> BuildResult<InputNode> {
    let name = obj["input"]
        .as_str()
        .ok_or_else(|| ParseError::at("'input' must be a string", path))?;
    let kind = InputKind::from_name(name)
        .ok_or_else(|| ParseError::at(format!("Unknown input '{}'", name), path))?;

    let from = obj.get("from").and_then(Value::as_str).map(|table| DataRef {
        table: table.to_string(),
        filter_by: param_ref(obj.get("filterBy")),
    });

    let columns = match obj.get("columns") {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|c| {
                    c.as_str().map(str::to_string).ok_or_else(|| {
                        ParseError::at("'columns' must be a list of names", path)
                    })
                })
                .collect::<BuildResult<Vec<_>>>()?,
        ),
        Some(_) => return Err(ParseError::at("'columns' must be a list of names", path)),
        None => None,
    };

    if matches!(kind, InputKind::Menu | InputKind::Slider | InputKind::Search)
        && from.is_some()
        && obj.get("column").is_none()
    {
        return Err(ParseError::at(
            format!("A {} bound to a table needs a 'column'", kind.as_str()),
            path,
        ));
    }

    let options = obj
        .iter()
        .filter(|(k, _)| {
            !matches!(
                k.as_str(),
                "input" | "from" | "column" | "columns" | "as" | "filterBy"
            )
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(InputNode {
        kind,
        from,
        column: obj.get("column").and_then(Value::as_str).map(str::to_string),
        columns,
        selection: param_ref(obj.get("as")),
        options,
    })
}

/// Strip the `$` from a param reference
fn param_ref(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .and_then(|s| s.strip_prefix('$'))
        .map(str::to_string)
}

fn expect_object<'a>(value: &'a Value, path: &str) -> BuildResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ParseError::at("Expected an object", path))
}
