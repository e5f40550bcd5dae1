//! Mounted clients, plots and interactors

use crate::coordinator::Query;
use crate::render::dom::ElementId;
use crate::spec::{InputKind, InputNode, InteractorKind, MarkNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlotId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InteractorId(pub(crate) usize);

/// Where a selection clause came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseSource {
    Plot(PlotId),
    Client(ClientId),
}

/// Shape of the predicate a clause will carry
#[derive(Debug, Clone, PartialEq)]
pub enum ClauseShape {
    /// Range over one or more fields (brushes, sliders, pan/zoom)
    Interval { fields: Vec<String> },
    /// Discrete values of one or more fields (toggles, menus)
    Point { fields: Vec<String> },
    /// Substring match on one field
    Text { field: String },
}

impl ClauseShape {
    /// Fields a preaggregated view has to group by, empty for text
    pub fn group_fields(&self) -> &[String] {
        match self {
            ClauseShape::Interval { fields } | ClauseShape::Point { fields } => fields,
            ClauseShape::Text { .. } => &[],
        }
    }
}

/// Clause published to a selection when an element activates
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionClause {
    pub selection: String,
    pub source: ClauseSource,
    pub shape: ClauseShape,
}

/// Something that can be told to activate
///
/// Activation announces the clause the element would publish on first
/// interaction, so lazily built state (preaggregated views) is created
/// ahead of time.
pub trait Activatable {
    /// Short description for logs and reports
    fn label(&self) -> String;

    /// The clause to announce, or `None` if the element publishes nothing
    fn activate(&self) -> Option<SelectionClause>;
}

/// A mark bound to a table
#[derive(Debug, Clone)]
pub struct MarkClient {
    pub id: ClientId,
    pub plot: PlotId,
    pub node: MarkNode,
    pub element: ElementId,
    pub query: Option<Query>,
}

/// A standalone input widget
#[derive(Debug, Clone)]
pub struct InputWidget {
    pub id: ClientId,
    pub node: InputNode,
    pub element: ElementId,
    pub query: Option<Query>,
}

impl InputWidget {
    /// Menus, sliders and searches that write to a selection
    pub fn is_activatable(&self) -> bool {
        self.node.kind != InputKind::Table && self.node.selection.is_some()
    }
}

impl Activatable for InputWidget {
    fn label(&self) -> String {
        match &self.node.column {
            Some(column) => format!("{}({})", self.node.kind.as_str(), column),
            None => self.node.kind.as_str().to_string(),
        }
    }

    fn activate(&self) -> Option<SelectionClause> {
        let selection = self.node.selection.clone()?;
        let column = self.node.column.clone();
        let shape = match self.node.kind {
            InputKind::Menu => ClauseShape::Point {
                fields: column.into_iter().collect(),
            },
            InputKind::Slider => ClauseShape::Interval {
                fields: column.into_iter().collect(),
            },
            InputKind::Search => ClauseShape::Text { field: column? },
            InputKind::Table => return None,
        };
        Some(SelectionClause {
            selection,
            source: ClauseSource::Client(self.id),
            shape,
        })
    }
}

/// Mounted element: a mark or an input
#[derive(Debug, Clone)]
pub enum Client {
    Mark(MarkClient),
    Input(InputWidget),
}

impl Client {
    pub fn id(&self) -> ClientId {
        match self {
            Client::Mark(mark) => mark.id,
            Client::Input(input) => input.id,
        }
    }

    pub fn query(&self) -> Option<&Query> {
        match self {
            Client::Mark(mark) => mark.query.as_ref(),
            Client::Input(input) => input.query.as_ref(),
        }
    }

    /// Selection this client is filtered by
    pub fn filter_by(&self) -> Option<&str> {
        let from = match self {
            Client::Mark(mark) => mark.node.from.as_ref(),
            Client::Input(input) => input.node.from.as_ref(),
        };
        from.and_then(|f| f.filter_by.as_deref())
    }

    /// Activation capability, if this client has it
    pub fn as_activatable(&self) -> Option<&dyn Activatable> {
        match self {
            Client::Input(input) if input.is_activatable() => Some(input as &dyn Activatable),
            _ => None,
        }
    }
}

/// A mounted plot
#[derive(Debug, Clone)]
pub struct Plot {
    pub id: PlotId,
    pub element: ElementId,
    pub marks: Vec<ClientId>,
    pub interactors: Vec<InteractorId>,
}

/// An interactor attached to a plot
#[derive(Debug, Clone)]
pub struct Interactor {
    pub id: InteractorId,
    pub plot: PlotId,
    pub kind: InteractorKind,
    pub selection: Option<String>,
    /// Fields behind the interactor's channels, resolved against the plot's
    /// marks
    pub fields: Vec<String>,
}

impl Activatable for Interactor {
    fn label(&self) -> String {
        format!("{}#{}", self.kind.as_str(), self.id.0)
    }

    fn activate(&self) -> Option<SelectionClause> {
        use InteractorKind::*;
        let selection = self.selection.clone()?;
        if self.fields.is_empty() {
            return None;
        }
        let fields = self.fields.clone();
        let shape = match self.kind {
            IntervalX | IntervalY | IntervalXY | PanZoom | PanZoomX | PanZoomY => {
                ClauseShape::Interval { fields }
            }
            Toggle | ToggleX | ToggleY | ToggleColor | NearestX | NearestY => {
                ClauseShape::Point { fields }
            }
        };
        Some(SelectionClause {
            selection,
            source: ClauseSource::Plot(self.plot),
            shape,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::dom::Document;
    use crate::spec::{DataRef, OptionsNode};

    fn input(kind: InputKind, selection: Option<&str>) -> InputWidget {
        let mut doc = Document::new();
        InputWidget {
            id: ClientId(3),
            node: InputNode {
                kind,
                from: Some(DataRef {
                    table: "flights".to_string(),
                    filter_by: None,
                }),
                column: Some("carrier".to_string()),
                columns: None,
                selection: selection.map(str::to_string),
                options: OptionsNode::new(),
            },
            element: doc.create_element("div"),
            query: None,
        }
    }

    #[test]
    fn test_input_capability() {
        assert!(input(InputKind::Menu, Some("s")).is_activatable());
        assert!(!input(InputKind::Menu, None).is_activatable());
        assert!(!input(InputKind::Table, Some("s")).is_activatable());

        let client = Client::Input(input(InputKind::Table, Some("s")));
        assert!(client.as_activatable().is_none());
    }

    #[test]
    fn test_input_clauses() {
        let clause = input(InputKind::Menu, Some("s")).activate().unwrap();
        assert_eq!(
            clause.shape,
            ClauseShape::Point {
                fields: vec!["carrier".to_string()]
            }
        );
        assert_eq!(clause.source, ClauseSource::Client(ClientId(3)));

        let clause = input(InputKind::Search, Some("s")).activate().unwrap();
        assert!(clause.shape.group_fields().is_empty());
    }

    #[test]
    fn test_interactor_clause() {
        let brush = Interactor {
            id: InteractorId(0),
            plot: PlotId(1),
            kind: InteractorKind::IntervalX,
            selection: Some("brush".to_string()),
            fields: vec!["delay".to_string()],
        };
        let clause = brush.activate().unwrap();
        assert_eq!(clause.selection, "brush");
        assert_eq!(clause.source, ClauseSource::Plot(PlotId(1)));
        assert_eq!(clause.shape.group_fields(), &["delay".to_string()]);
        assert_eq!(brush.label(), "intervalX#0");
    }
}
