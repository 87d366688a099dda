//! Canvas synchronization layer
//!
//! [`CanvasController`] sits between a renderer and the [`ProjectStore`]. It
//! projects the current snapshot into a [`VisualGraph`] of positioned nodes and
//! handle-bound edges, and turns user gestures into store mutations.
//!
//! The visual graph is never edited to reflect a domain change. Connections and
//! deletions show up only after the next [`CanvasController::sync`], which rebuilds
//! the graph from the new snapshot. Selection, measured sizes and the position of a
//! table being dragged are the only state that lives outside the projection; they
//! are carried across rebuilds by id.

use crate::core::auto_layout::{LayoutConfig, LayoutError, calculate_layered_layout};
use crate::core::clipboard::Clipboard;
use crate::core::error::SchemaError;
use crate::core::mutations::{find_invalid_connections, kind_for};
use crate::core::notifications::CanvasNotification;
use crate::core::schema::{
    ConnectionDefinition, ConnectionId, Position, Project, RelationshipKind, Size, Table, TableId,
};
use crate::core::store::ProjectStore;
use std::collections::{HashMap, HashSet};

pub const SOURCE_HANDLE_SUFFIX: &str = "-source";
pub const TARGET_HANDLE_SUFFIX: &str = "-target";

/// Outgoing attachment point of a field
pub fn source_handle(field_name: &str) -> String {
    format!("{}{}", field_name, SOURCE_HANDLE_SUFFIX)
}

/// Incoming attachment point of a field
pub fn target_handle(field_name: &str) -> String {
    format!("{}{}", field_name, TARGET_HANDLE_SUFFIX)
}

/// Field name addressed by a handle id
pub fn handle_field(handle: &str) -> &str {
    handle
        .strip_suffix(SOURCE_HANDLE_SUFFIX)
        .or_else(|| handle.strip_suffix(TARGET_HANDLE_SUFFIX))
        .unwrap_or(handle)
}

/// Rendered form of a table
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasNode {
    pub id: TableId,
    pub position: Position,
    pub table: Table,
    pub selected: bool,
    pub dragging: bool,
    pub measured: Option<Size>,
}

/// Rendered form of a connection
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasEdge {
    pub id: ConnectionId,
    pub source: TableId,
    pub target: TableId,
    pub source_handle: String,
    pub target_handle: String,
    pub kind: RelationshipKind,
    pub selected: bool,
}

impl CanvasEdge {
    pub fn label(&self) -> String {
        self.kind.to_string()
    }
}

/// Projection of a project snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisualGraph {
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
}

impl VisualGraph {
    pub fn node(&self, id: TableId) -> Option<&CanvasNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: TableId) -> Option<&mut CanvasNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn edge(&self, id: ConnectionId) -> Option<&CanvasEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    fn edge_mut(&mut self, id: ConnectionId) -> Option<&mut CanvasEdge> {
        self.edges.iter_mut().find(|e| e.id == id)
    }

    pub fn selected_nodes(&self) -> Vec<TableId> {
        self.nodes.iter().filter(|n| n.selected).map(|n| n.id).collect()
    }

    pub fn selected_edges(&self) -> Vec<ConnectionId> {
        self.edges.iter().filter(|e| e.selected).map(|e| e.id).collect()
    }
}

/// In-progress pointer interaction
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    Drag { node: TableId, origin: Position },
    Connect { node: TableId, handle: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CanvasState {
    #[default]
    Idle,
    Reconciling,
    Interacting(Gesture),
}

#[derive(Debug)]
pub struct CanvasController {
    store: ProjectStore,
    graph: VisualGraph,
    state: CanvasState,
    seen_revision: Option<u64>,
    pending_edge_deletes: HashSet<ConnectionId>,
    pending_node_deletes: HashSet<TableId>,
    measured: HashMap<TableId, Size>,
    clipboard: Clipboard,
    layout: LayoutConfig,
    notifications: Vec<CanvasNotification>,
}

impl CanvasController {
    pub fn new(store: ProjectStore, layout: LayoutConfig, clipboard: Clipboard) -> Self {
        Self {
            store,
            graph: VisualGraph::default(),
            state: CanvasState::Idle,
            seen_revision: None,
            pending_edge_deletes: HashSet::new(),
            pending_node_deletes: HashSet::new(),
            measured: HashMap::new(),
            clipboard,
            layout,
            notifications: Vec::new(),
        }
    }

    pub fn graph(&self) -> &VisualGraph {
        &self.graph
    }

    pub fn state(&self) -> &CanvasState {
        &self.state
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    /// Direct access for edits made outside the canvas (forms, import, ...).
    /// The canvas picks them up on the next [`sync`](Self::sync).
    pub fn store_mut(&mut self) -> &mut ProjectStore {
        &mut self.store
    }

    pub fn clipboard(&self) -> &Clipboard {
        &self.clipboard
    }

    /// Drain queued notifications
    pub fn take_notifications(&mut self) -> Vec<CanvasNotification> {
        std::mem::take(&mut self.notifications)
    }

    fn notify(&mut self, notification: CanvasNotification) {
        self.notifications.push(notification);
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Render pass: if the store moved on since the last call, sweep orphaned
    /// connections and rebuild the visual graph. Returns whether a rebuild happened.
    pub fn sync(&mut self) -> bool {
        if self.seen_revision == Some(self.store.revision()) {
            return false;
        }

        let previous = std::mem::replace(&mut self.state, CanvasState::Reconciling);
        self.sweep_orphans();
        self.rebuild(&previous);
        self.seen_revision = Some(self.store.revision());

        self.state = match previous {
            CanvasState::Interacting(Gesture::Drag { node, .. })
            | CanvasState::Interacting(Gesture::Connect { node, .. })
                if self.graph.node(node).is_none() =>
            {
                CanvasState::Idle
            }
            CanvasState::Reconciling => CanvasState::Idle,
            other => other,
        };
        true
    }

    /// Delete every connection that no longer resolves, one mutation each
    fn sweep_orphans(&mut self) {
        let Some(project) = self.store.project() else {
            return;
        };
        let invalid = find_invalid_connections(project);
        if invalid.is_empty() {
            return;
        }

        let mut removed = 0;
        for id in invalid {
            match self.store.delete_connection(id) {
                Ok(_) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove invalid connection {}: {}", id, e),
            }
        }

        tracing::warn!("Removed {} invalid connection(s)", removed);
        self.notify(CanvasNotification::warning(
            "Invalid Relationships Removed",
            format!(
                "Removed {} relationship(s) that referenced missing tables or fields",
                removed
            ),
        ));
    }

    fn rebuild(&mut self, previous: &CanvasState) {
        let Some(project) = self.store.project() else {
            self.graph = VisualGraph::default();
            return;
        };

        let dragged = match previous {
            CanvasState::Interacting(Gesture::Drag { node, .. }) => Some(*node),
            _ => None,
        };

        let nodes = project
            .tables
            .iter()
            .map(|table| {
                let old = self.graph.node(table.id);
                let in_flight = dragged == Some(table.id);
                let position = match old {
                    Some(node) if in_flight => node.position,
                    _ => table.position,
                };
                CanvasNode {
                    id: table.id,
                    position,
                    table: table.clone(),
                    selected: old.is_some_and(|n| n.selected),
                    dragging: in_flight,
                    measured: self.measured.get(&table.id).copied(),
                }
            })
            .collect();

        let edges = project
            .connections
            .iter()
            .map(|connection| CanvasEdge {
                id: connection.id,
                source: connection.source_table,
                target: connection.target_table,
                source_handle: source_handle(&connection.source_field),
                target_handle: target_handle(&connection.target_field),
                kind: connection.kind,
                selected: self.graph.edge(connection.id).is_some_and(|e| e.selected),
            })
            .collect();

        self.measured.retain(|id, _| project.has_table(*id));
        self.graph = VisualGraph { nodes, edges };
        self.pending_edge_deletes.clear();
        self.pending_node_deletes.clear();
    }

    // ========================================================================
    // Drag
    // ========================================================================

    pub fn drag_start(&mut self, node: TableId) -> bool {
        if self.state != CanvasState::Idle {
            return false;
        }
        let Some(canvas_node) = self.graph.node_mut(node) else {
            return false;
        };
        canvas_node.dragging = true;
        let origin = canvas_node.position;
        self.state = CanvasState::Interacting(Gesture::Drag { node, origin });
        true
    }

    /// Visual-only move of the node being dragged
    pub fn drag(&mut self, node: TableId, position: Position) {
        let dragging = matches!(
            &self.state,
            CanvasState::Interacting(Gesture::Drag { node: current, .. }) if *current == node
        );
        if !dragging {
            return;
        }
        if let Some(canvas_node) = self.graph.node_mut(node) {
            canvas_node.position = position;
        }
    }

    /// Finish a drag, persisting the final position if it changed.
    /// Returns whether a `move_table` was issued.
    pub fn drag_stop(&mut self, node: TableId) -> bool {
        let origin = match &self.state {
            CanvasState::Interacting(Gesture::Drag {
                node: current,
                origin,
            }) if *current == node => *origin,
            _ => return false,
        };
        self.state = CanvasState::Idle;

        let Some(canvas_node) = self.graph.node_mut(node) else {
            return false;
        };
        canvas_node.dragging = false;
        let position = canvas_node.position;
        if position == origin {
            return false;
        }

        match self.store.move_table(node, position) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Failed to persist position of {}: {}", node, e);
                self.notify(CanvasNotification::from_error("Move Failed", &e));
                false
            }
        }
    }

    /// Abort the current gesture without touching the project
    pub fn cancel_gesture(&mut self) {
        if let CanvasState::Interacting(Gesture::Drag { node, origin }) = &self.state
            && let Some(canvas_node) = self.graph.node_mut(*node)
        {
            canvas_node.position = *origin;
            canvas_node.dragging = false;
        }
        self.state = CanvasState::Idle;
    }

    // ========================================================================
    // Connect
    // ========================================================================

    pub fn connect_start(&mut self, node: TableId, handle: impl Into<String>) -> bool {
        if self.state != CanvasState::Idle || self.graph.node(node).is_none() {
            return false;
        }
        self.state = CanvasState::Interacting(Gesture::Connect {
            node,
            handle: handle.into(),
        });
        true
    }

    /// Create a relationship from a handle pair.
    ///
    /// The edge is not drawn here; it appears after the next [`sync`](Self::sync).
    pub fn connect(
        &mut self,
        source: TableId,
        source_handle: &str,
        target: TableId,
        target_handle: &str,
    ) -> Option<ConnectionId> {
        if matches!(self.state, CanvasState::Interacting(Gesture::Connect { .. })) {
            self.state = CanvasState::Idle;
        }

        let source_field = handle_field(source_handle);
        let target_field = handle_field(target_handle);

        let definition = match self.store.snapshot() {
            Ok(project) => resolve_handles(&project, source, source_field, target, target_field),
            Err(e) => Err(e),
        };
        let definition = match definition {
            Ok(definition) => definition,
            Err(e) => {
                tracing::warn!("Rejected connection from stale handles: {}", e);
                self.notify(CanvasNotification::from_error("Cannot Connect", &e));
                return None;
            }
        };

        match self.store.add_connection(definition) {
            Ok(committed) => {
                if let Some(n) =
                    CanvasNotification::from_warnings("Relationship Created", &committed.warnings)
                {
                    self.notify(n);
                }
                Some(committed.value)
            }
            Err(e) => {
                self.notify(CanvasNotification::from_error("Cannot Connect", &e));
                None
            }
        }
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Route edge removals through the domain. The visual graph is left as is
    /// until the next rebuild. Returns the number of deletes issued.
    pub fn remove_edges(&mut self, ids: &[ConnectionId]) -> usize {
        let mut issued = 0;
        for &id in ids {
            if !self.pending_edge_deletes.insert(id) {
                continue;
            }
            match self.store.delete_connection(id) {
                Ok(_) => issued += 1,
                Err(e) => {
                    self.pending_edge_deletes.remove(&id);
                    self.notify(CanvasNotification::from_error("Cannot Delete Relationship", &e));
                }
            }
        }
        issued
    }

    /// Route node removals through the domain, like [`remove_edges`](Self::remove_edges)
    pub fn remove_nodes(&mut self, ids: &[TableId]) -> usize {
        let mut issued = 0;
        for &id in ids {
            if !self.pending_node_deletes.insert(id) {
                continue;
            }
            match self.store.delete_table(id) {
                Ok(_) => issued += 1,
                Err(e) => {
                    self.pending_node_deletes.remove(&id);
                    self.notify(CanvasNotification::from_error("Cannot Delete Table", &e));
                }
            }
        }
        issued
    }

    /// Delete whatever is selected
    pub fn remove_selection(&mut self) -> usize {
        let edges = self.graph.selected_edges();
        let nodes = self.graph.selected_nodes();
        self.remove_edges(&edges) + self.remove_nodes(&nodes)
    }

    // ========================================================================
    // Selection & measurement
    // ========================================================================

    pub fn select_node(&mut self, id: TableId, additive: bool) {
        if !additive {
            self.clear_selection();
        }
        if let Some(node) = self.graph.node_mut(id) {
            node.selected = true;
        }
    }

    pub fn select_edge(&mut self, id: ConnectionId, additive: bool) {
        if !additive {
            self.clear_selection();
        }
        if let Some(edge) = self.graph.edge_mut(id) {
            edge.selected = true;
        }
    }

    pub fn clear_selection(&mut self) {
        self.graph.nodes.iter_mut().for_each(|n| n.selected = false);
        self.graph.edges.iter_mut().for_each(|e| e.selected = false);
    }

    /// Size reported by the renderer, used by auto-layout
    pub fn set_measured_size(&mut self, id: TableId, size: Size) {
        if let Some(node) = self.graph.node_mut(id) {
            node.measured = Some(size);
            self.measured.insert(id, size);
        }
    }

    // ========================================================================
    // Clipboard
    // ========================================================================

    pub fn copy_selection(&mut self) -> bool {
        let selected = self.graph.selected_nodes();
        match self.store.project() {
            Some(project) => self.clipboard.copy(project, &selected),
            None => false,
        }
    }

    /// Paste the copied table next to the single selected table, or near the
    /// layout origin when nothing is selected
    pub fn paste(&mut self) -> Option<TableId> {
        let anchor = match self.graph.selected_nodes().as_slice() {
            [id] => self.graph.node(*id).map(|n| n.position),
            _ => None,
        }
        .unwrap_or(Position::new(self.layout.start_x, self.layout.start_y));

        let project = self.store.snapshot().ok()?;
        let (definition, position) = self.clipboard.paste(&project, anchor)?;

        match self.store.add_table(definition, position) {
            Ok(committed) => Some(committed.value),
            Err(e) => {
                self.notify(CanvasNotification::from_error("Paste Failed", &e));
                None
            }
        }
    }

    pub fn duplicate_selection(&mut self) -> Option<TableId> {
        let selected = self.graph.selected_nodes();
        let &[id] = selected.as_slice() else {
            return None;
        };
        match self.store.duplicate_table(id) {
            Ok(committed) => Some(committed.value),
            Err(e) => {
                self.notify(CanvasNotification::from_error("Duplicate Failed", &e));
                None
            }
        }
    }

    // ========================================================================
    // Auto-layout
    // ========================================================================

    /// Lay out every table. Positions land in the visual graph at once, then each
    /// changed one is persisted. Returns the number of tables moved.
    pub fn auto_layout(&mut self) -> Result<usize, LayoutError> {
        let Ok(project) = self.store.snapshot() else {
            return Ok(0);
        };

        let result = match calculate_layered_layout(&project, &self.measured, &self.layout) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Auto-layout failed: {}", e);
                self.notify(CanvasNotification::warning("Auto Layout Failed", e.to_string()));
                return Err(e);
            }
        };

        for (id, position) in &result.positions {
            if let Some(node) = self.graph.node_mut(*id) {
                node.position = *position;
            }
        }

        let mut moved = 0;
        for (id, position) in result.changed(&project) {
            match self.store.move_table(id, position) {
                Ok(_) => moved += 1,
                Err(e) => tracing::warn!("Failed to persist layout position of {}: {}", id, e),
            }
        }
        tracing::info!("Auto-layout moved {} table(s)", moved);
        if moved > 0 {
            self.notify(CanvasNotification::info(
                "Auto Layout Applied",
                format!("Arranged {} table(s)", moved),
            ));
        }
        Ok(moved)
    }
}

/// Check a handle pair against the snapshot and build the connection input
fn resolve_handles(
    project: &Project,
    source: TableId,
    source_field: &str,
    target: TableId,
    target_field: &str,
) -> Result<ConnectionDefinition, SchemaError> {
    let source_table = project
        .table(source)
        .ok_or(SchemaError::TableNotFound(source))?;
    let target_table = project
        .table(target)
        .ok_or(SchemaError::TableNotFound(target))?;
    let field = source_table
        .field_by_name(source_field)
        .ok_or_else(|| SchemaError::FieldNotFound {
            table: source_table.name.clone(),
            field: source_field.to_string(),
        })?;
    if !target_table.has_field(target_field) {
        return Err(SchemaError::FieldNotFound {
            table: target_table.name.clone(),
            field: target_field.to_string(),
        });
    }

    Ok(ConnectionDefinition::new(
        source,
        source_field,
        target,
        target_field,
        kind_for(field),
    ))
}
