/*!
Headless rendering context

A [`RenderContext`] is created for one publish call. It owns the element
tree the specification mounts into, the registry of mounted clients, plots
and interactors, and a handle to that call's [`Coordinator`]. Nothing here
is process-global, so independent publish calls never observe each other.
*/

use crate::coordinator::catalog::Catalog;
use crate::coordinator::preagg::preaggregate_view;
use crate::coordinator::{Coordinator, Query, QueryResult, Ticket};
use crate::spec::{InteractorKind, MarkNode, SelectionKind};
use crate::{PublishError, Result};
use indexmap::IndexMap;
use std::sync::Arc;

pub mod client;
pub mod dom;
pub mod mount;

pub use client::{
    Activatable, ClauseShape, ClauseSource, Client, ClientId, InputWidget, Interactor,
    InteractorId, MarkClient, Plot, PlotId, SelectionClause,
};
pub use dom::{Document, ElementId};
pub use mount::mount;

/// Something the activation pass can activate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationTarget {
    Interactor(InteractorId),
    Input(ClientId),
}

/// Outcome of one activation
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub label: String,
    /// Preaggregated views submitted because of this activation
    pub views: Vec<String>,
}

pub struct RenderContext {
    coordinator: Arc<Coordinator>,
    document: Document,
    catalog: Catalog,
    clients: Vec<Client>,
    plots: Vec<Plot>,
    interactors: Vec<Interactor>,
    selections: IndexMap<String, SelectionKind>,
    pending: Vec<(ClientId, Ticket<QueryResult>)>,
    root: Option<ElementId>,
}

impl RenderContext {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            document: Document::new(),
            catalog: Catalog::default(),
            clients: Vec::new(),
            plots: Vec::new(),
            interactors: Vec::new(),
            selections: IndexMap::new(),
            pending: Vec::new(),
            root: None,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Clients in mount order
    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(id.0)
    }

    pub fn plot(&self, id: PlotId) -> Option<&Plot> {
        self.plots.get(id.0)
    }

    pub fn interactor(&self, id: InteractorId) -> Option<&Interactor> {
        self.interactors.get(id.0)
    }

    /// Resolution strategy of a selection; undeclared selections intersect
    pub fn selection_kind(&self, name: &str) -> SelectionKind {
        self.selections
            .get(name)
            .copied()
            .unwrap_or(SelectionKind::Intersect)
    }

    /// Markup of the mounted tree, if mounted
    pub fn root_html(&self) -> Option<String> {
        self.root.map(|root| self.document.to_html(root))
    }

    /// Wait for every client's initial query and render its results
    pub async fn clients_ready(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        tracing::debug!("Waiting for {} client queries", pending.len());
        for (id, ticket) in pending {
            let result = ticket.wait().await?;
            if let Some(client) = self.clients.get(id.0) {
                mount::render_client(&mut self.document, client, Some(&result))?;
            }
        }
        Ok(())
    }

    /// Activation capability behind a target
    pub fn activatable(&self, target: ActivationTarget) -> Option<&dyn Activatable> {
        match target {
            ActivationTarget::Interactor(id) => self
                .interactor(id)
                .map(|interactor| interactor as &dyn Activatable),
            ActivationTarget::Input(id) => self.client(id).and_then(Client::as_activatable),
        }
    }

    /// Activate one interactor or input
    pub fn activate(&self, target: ActivationTarget) -> Result<Activation> {
        let element = self.activatable(target).ok_or_else(|| {
            PublishError::InternalError(format!("{:?} is not activatable", target))
        })?;
        let label = element.label();
        let views = match element.activate() {
            Some(clause) => self.activate_clause(&clause),
            None => Vec::new(),
        };
        tracing::debug!(target = %label, views = views.len(), "activated");
        Ok(Activation { label, views })
    }

    /// Build preaggregated views for the aggregate marks a clause filters
    ///
    /// Views are submitted without waiting; the pending counter settles them.
    pub fn activate_clause(&self, clause: &SelectionClause) -> Vec<String> {
        let fields = clause.shape.group_fields();
        if fields.is_empty() {
            return Vec::new();
        }
        let crossfilter = self.selection_kind(&clause.selection) == SelectionKind::Crossfilter;

        let mut views = Vec::new();
        for client in &self.clients {
            let Client::Mark(mark) = client else {
                continue;
            };
            if client.filter_by() != Some(clause.selection.as_str()) {
                continue;
            }
            if crossfilter
                && (clause.source == ClauseSource::Plot(mark.plot)
                    || clause.source == ClauseSource::Client(mark.id))
            {
                continue;
            }
            let Some(query) = &mark.query else {
                continue;
            };
            let Some(columns) = self.catalog.columns(&query.table) else {
                continue;
            };
            if !fields.iter().all(|f| columns.contains(f)) {
                continue;
            }
            if let Some(view) = preaggregate_view(query, fields) {
                if self.coordinator.preaggregate(&view) {
                    views.push(view.name);
                }
            }
        }
        views
    }

    // Registration, used while mounting

    pub(crate) fn set_catalog(&mut self, catalog: Catalog) {
        self.catalog = catalog;
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn set_root(&mut self, root: ElementId) {
        self.root = Some(root);
    }

    pub(crate) fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub(crate) fn declare_selection(&mut self, name: &str, kind: SelectionKind) {
        self.selections.insert(name.to_string(), kind);
    }

    pub(crate) fn add_plot(&mut self, element: ElementId) -> PlotId {
        let id = PlotId(self.plots.len());
        self.plots.push(Plot {
            id,
            element,
            marks: Vec::new(),
            interactors: Vec::new(),
        });
        id
    }

    pub(crate) fn add_mark(
        &mut self,
        plot: PlotId,
        node: MarkNode,
        element: ElementId,
        query: Option<Query>,
    ) -> ClientId {
        let id = ClientId(self.clients.len());
        if let Some(plot) = self.plots.get_mut(plot.0) {
            plot.marks.push(id);
        }
        self.register(Client::Mark(MarkClient {
            id,
            plot,
            node,
            element,
            query,
        }))
    }

    pub(crate) fn add_input(&mut self, input: InputWidget) -> ClientId {
        self.register(Client::Input(input))
    }

    pub(crate) fn next_client_id(&self) -> ClientId {
        ClientId(self.clients.len())
    }

    fn register(&mut self, client: Client) -> ClientId {
        let id = client.id();
        if let Some(query) = client.query() {
            let ticket = self.coordinator.query(query);
            self.pending.push((id, ticket));
        }
        self.clients.push(client);
        id
    }

    pub(crate) fn add_interactor(
        &mut self,
        plot: PlotId,
        kind: InteractorKind,
        selection: Option<String>,
        fields: Vec<String>,
    ) -> InteractorId {
        let id = InteractorId(self.interactors.len());
        if let Some(plot) = self.plots.get_mut(plot.0) {
            plot.interactors.push(id);
        }
        self.interactors.push(Interactor {
            id,
            plot,
            kind,
            selection,
            fields,
        });
        id
    }
}
