//! Auto-layout module for automatic table arrangement
//!
//! Tables are placed in horizontal layers so that a referenced table sits above the
//! tables that reference it:
//!
//! 1. Cycles are broken by reversing the back edges found by a depth-first search
//! 2. Each table's layer is the longest path reaching it in the resulting DAG
//! 3. Tables inside a layer are reordered with barycenter sweeps, keeping the
//!    ordering with the fewest crossings
//! 4. Layers are stacked with `rank_separation` between them and centred on the
//!    widest one
//!
//! Tables in one layer never overlap horizontally and layers never overlap
//! vertically, so distinct tables never share area.

use crate::core::schema::{ConnectionId, Position, Project, Size, TableId};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{DfsEvent, depth_first_search};
use std::collections::HashMap;

/// Layout configuration
#[derive(Clone, Debug, PartialEq)]
pub struct LayoutConfig {
    /// Vertical gap between layers
    pub rank_separation: f64,
    /// Horizontal gap between neighbouring tables in a layer
    pub node_separation: f64,
    /// Starting X position
    pub start_x: f64,
    /// Starting Y position
    pub start_y: f64,
    /// Width used for tables the renderer has not measured yet
    pub table_width: f64,
    /// Height used for tables the renderer has not measured yet
    pub table_height: f64,
    /// Upper bound on barycenter sweep rounds
    pub max_sweeps: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            rank_separation: 100.0,
            node_separation: 80.0,
            start_x: 100.0,
            start_y: 100.0,
            table_width: 280.0,
            table_height: 250.0,
            max_sweeps: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("Table {table} has an unusable size {width}x{height}")]
    InvalidSize {
        table: TableId,
        width: f64,
        height: f64,
    },
    #[error("Connection {connection} references unknown table {table}")]
    UnknownTable {
        connection: ConnectionId,
        table: TableId,
    },
    #[error("Relationship graph still contains a cycle")]
    Cycle,
}

/// Result of auto-layout calculation
#[derive(Debug, Clone, Default)]
pub struct LayoutResult {
    /// Top-left corner for every table, in project order
    pub positions: Vec<(TableId, Position)>,
}

impl LayoutResult {
    pub fn position_of(&self, id: TableId) -> Option<Position> {
        self.positions
            .iter()
            .find(|(table, _)| *table == id)
            .map(|(_, p)| *p)
    }

    /// Entries whose position differs from what `project` currently stores
    pub fn changed<'a>(
        &'a self,
        project: &'a Project,
    ) -> impl Iterator<Item = (TableId, Position)> + 'a {
        self.positions.iter().copied().filter(|(id, position)| {
            project
                .table(*id)
                .is_some_and(|table| table.position != *position)
        })
    }
}

struct LayoutGraph {
    graph: StableDiGraph<TableId, ()>,
    nodes: Vec<NodeIndex>,
    sizes: HashMap<NodeIndex, Size>,
}

/// Compute layered positions for every table of `project`.
///
/// `measured` holds rendered sizes by table id; missing tables use the configured
/// default size.
pub fn calculate_layered_layout(
    project: &Project,
    measured: &HashMap<TableId, Size>,
    config: &LayoutConfig,
) -> Result<LayoutResult, LayoutError> {
    if project.tables.is_empty() {
        return Ok(LayoutResult::default());
    }

    let mut layout = build_graph(project, measured, config)?;
    break_cycles(&mut layout.graph);
    let ranks = assign_ranks(&layout.graph)?;

    let mut rank_order = build_rank_buckets(&layout.nodes, &ranks);
    let crossings = minimize_crossings(&mut rank_order, &layout.graph, config.max_sweeps);

    let centers = assign_coordinates(&rank_order, &layout.sizes, config);
    let positions = layout
        .nodes
        .iter()
        .filter_map(|node| {
            let center = centers.get(node)?;
            let size = layout.sizes.get(node)?;
            let id = *layout.graph.node_weight(*node)?;
            let top_left = Position::new(center.x - size.width / 2.0, center.y - size.height / 2.0);
            Some((id, top_left))
        })
        .collect();

    tracing::debug!(
        "Layout: {} tables in {} layers, {} crossings",
        layout.nodes.len(),
        rank_order.len(),
        crossings
    );
    Ok(LayoutResult { positions })
}

fn build_graph(
    project: &Project,
    measured: &HashMap<TableId, Size>,
    config: &LayoutConfig,
) -> Result<LayoutGraph, LayoutError> {
    let mut graph = StableDiGraph::new();
    let mut index: HashMap<TableId, NodeIndex> = HashMap::new();
    let mut nodes = Vec::with_capacity(project.tables.len());
    let mut sizes = HashMap::new();

    for table in &project.tables {
        let size = measured
            .get(&table.id)
            .copied()
            .unwrap_or(Size::new(config.table_width, config.table_height));
        let usable = size.width.is_finite()
            && size.height.is_finite()
            && size.width > 0.0
            && size.height > 0.0;
        if !usable {
            return Err(LayoutError::InvalidSize {
                table: table.id,
                width: size.width,
                height: size.height,
            });
        }

        let node = graph.add_node(table.id);
        index.insert(table.id, node);
        nodes.push(node);
        sizes.insert(node, size);
    }

    for connection in &project.connections {
        let lookup = |table: TableId| {
            index
                .get(&table)
                .copied()
                .ok_or(LayoutError::UnknownTable {
                    connection: connection.id,
                    table,
                })
        };
        let referenced = lookup(connection.target_table)?;
        let referencing = lookup(connection.source_table)?;
        if referenced != referencing {
            graph.update_edge(referenced, referencing, ());
        }
    }

    Ok(LayoutGraph {
        graph,
        nodes,
        sizes,
    })
}

/// Reverse every DFS back edge; the result is acyclic
fn break_cycles(graph: &mut StableDiGraph<TableId, ()>) {
    let mut back_edges = Vec::new();
    let roots: Vec<NodeIndex> = graph.node_indices().collect();
    depth_first_search(&*graph, roots, |event| {
        if let DfsEvent::BackEdge(from, to) = event {
            back_edges.push((from, to));
        }
    });

    for (from, to) in back_edges {
        if let Some(edge) = graph.find_edge(from, to) {
            graph.remove_edge(edge);
            graph.update_edge(to, from, ());
        }
    }
}

/// Longest-path layering over a topological order
fn assign_ranks(graph: &StableDiGraph<TableId, ()>) -> Result<HashMap<NodeIndex, usize>, LayoutError> {
    let order = toposort(graph, None).map_err(|_| LayoutError::Cycle)?;

    let mut ranks: HashMap<NodeIndex, usize> = order.iter().map(|&n| (n, 0)).collect();
    for node in order {
        let rank = ranks.get(&node).copied().unwrap_or(0);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            let entry = ranks.entry(next).or_insert(0);
            *entry = (*entry).max(rank + 1);
        }
    }
    Ok(ranks)
}

/// rank_order[r] = tables in layer r, initially in project order
fn build_rank_buckets(nodes: &[NodeIndex], ranks: &HashMap<NodeIndex, usize>) -> Vec<Vec<NodeIndex>> {
    let max_rank = ranks.values().copied().max().unwrap_or(0);
    let mut buckets = vec![Vec::new(); max_rank + 1];
    for &node in nodes {
        let rank = ranks.get(&node).copied().unwrap_or(0);
        buckets[rank].push(node);
    }
    buckets
}

fn order_positions(order: &[NodeIndex]) -> HashMap<NodeIndex, usize> {
    order.iter().enumerate().map(|(i, &n)| (n, i)).collect()
}

/// Average position of `neighbors` within the adjacent layer, if any sit there
fn barycenter(
    positions: &HashMap<NodeIndex, usize>,
    neighbors: impl Iterator<Item = NodeIndex>,
) -> Option<f64> {
    let (sum, count) = neighbors
        .filter_map(|n| positions.get(&n))
        .fold((0.0, 0usize), |(sum, count), &p| (sum + p as f64, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Reorder layer `r` by the barycenters of its neighbours in layer `fixed`.
/// Tables without neighbours there keep their current slot.
fn barycenter_sweep(
    rank_order: &mut [Vec<NodeIndex>],
    graph: &StableDiGraph<TableId, ()>,
    r: usize,
    fixed: usize,
    direction: Direction,
) {
    let positions = order_positions(&rank_order[fixed]);
    let mut scored: Vec<(NodeIndex, f64)> = rank_order[r]
        .iter()
        .enumerate()
        .map(|(slot, &node)| {
            let score = barycenter(&positions, graph.neighbors_directed(node, direction))
                .unwrap_or(slot as f64);
            (node, score)
        })
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    rank_order[r] = scored.into_iter().map(|(node, _)| node).collect();
}

/// Count edge crossings between two adjacent layers
fn count_crossings(
    upper: &[NodeIndex],
    lower: &[NodeIndex],
    graph: &StableDiGraph<TableId, ()>,
) -> usize {
    let lower_pos = order_positions(lower);
    let mut segments = Vec::new();
    for (i, &node) in upper.iter().enumerate() {
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(&j) = lower_pos.get(&next) {
                segments.push((i, j));
            }
        }
    }

    let mut crossings = 0;
    for (a, &(a_top, a_bottom)) in segments.iter().enumerate() {
        for &(b_top, b_bottom) in &segments[a + 1..] {
            if (a_top < b_top && a_bottom > b_bottom) || (a_top > b_top && a_bottom < b_bottom) {
                crossings += 1;
            }
        }
    }
    crossings
}

/// Total crossings across all adjacent rank pairs
fn total_crossings(rank_order: &[Vec<NodeIndex>], graph: &StableDiGraph<TableId, ()>) -> usize {
    rank_order
        .windows(2)
        .map(|pair| count_crossings(&pair[0], &pair[1], graph))
        .sum()
}

/// Alternate forward and backward sweeps, keeping the best ordering seen
fn minimize_crossings(
    rank_order: &mut Vec<Vec<NodeIndex>>,
    graph: &StableDiGraph<TableId, ()>,
    max_sweeps: usize,
) -> usize {
    let mut best_crossings = total_crossings(rank_order, graph);
    if rank_order.len() <= 1 || best_crossings == 0 {
        return best_crossings;
    }
    let mut best_order = rank_order.clone();

    for _ in 0..max_sweeps {
        for r in 1..rank_order.len() {
            barycenter_sweep(rank_order, graph, r, r - 1, Direction::Incoming);
        }
        for r in (0..rank_order.len() - 1).rev() {
            barycenter_sweep(rank_order, graph, r, r + 1, Direction::Outgoing);
        }

        let crossings = total_crossings(rank_order, graph);
        if crossings < best_crossings {
            best_crossings = crossings;
            best_order = rank_order.clone();
            if crossings == 0 {
                break;
            }
        } else {
            break;
        }
    }

    *rank_order = best_order;
    best_crossings
}

/// Center point of every table
fn assign_coordinates(
    rank_order: &[Vec<NodeIndex>],
    sizes: &HashMap<NodeIndex, Size>,
    config: &LayoutConfig,
) -> HashMap<NodeIndex, Position> {
    let size_of = |node: &NodeIndex| {
        sizes
            .get(node)
            .copied()
            .unwrap_or(Size::new(config.table_width, config.table_height))
    };

    let rank_widths: Vec<f64> = rank_order
        .iter()
        .map(|nodes| {
            let spans: f64 = nodes.iter().map(|n| size_of(n).width).sum();
            spans + nodes.len().saturating_sub(1) as f64 * config.node_separation
        })
        .collect();
    let max_width = rank_widths.iter().copied().fold(0.0_f64, f64::max);

    let mut centers = HashMap::new();
    let mut rank_top = config.start_y;
    for (nodes, width) in rank_order.iter().zip(&rank_widths) {
        let rank_height = nodes
            .iter()
            .map(|n| size_of(n).height)
            .fold(0.0_f64, f64::max);

        let mut x = config.start_x + (max_width - width) / 2.0;
        for node in nodes {
            let size = size_of(node);
            centers.insert(
                *node,
                Position::new(x + size.width / 2.0, rank_top + rank_height / 2.0),
            );
            x += size.width + config.node_separation;
        }
        rank_top += rank_height + config.rank_separation;
    }
    centers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Connection, ConnectionDefinition, Field, RelationshipKind, Table};

    fn table(project: &mut Project, name: &str) -> TableId {
        let table = Table::new(name).with_field(Field::new("id", "INT").primary_key());
        let id = table.id;
        project.tables.push(table);
        id
    }

    /// `from` references `to`
    fn link(project: &mut Project, from: TableId, to: TableId) {
        project
            .connections
            .push(Connection::from_definition(ConnectionDefinition::new(
                from,
                "id",
                to,
                "id",
                RelationshipKind::OneToMany,
            )));
    }

    fn layout(project: &Project) -> LayoutResult {
        calculate_layered_layout(project, &HashMap::new(), &LayoutConfig::default()).unwrap()
    }

    fn assert_no_overlaps(result: &LayoutResult, sizes: &HashMap<TableId, Size>, config: &LayoutConfig) {
        let size_of = |id: &TableId| {
            sizes
                .get(id)
                .copied()
                .unwrap_or(Size::new(config.table_width, config.table_height))
        };
        for (i, (a, pa)) in result.positions.iter().enumerate() {
            for (b, pb) in &result.positions[i + 1..] {
                let (sa, sb) = (size_of(a), size_of(b));
                let apart_x = pa.x + sa.width <= pb.x || pb.x + sb.width <= pa.x;
                let apart_y = pa.y + sa.height <= pb.y || pb.y + sb.height <= pa.y;
                assert!(apart_x || apart_y, "Tables {} and {} overlap", a, b);
            }
        }
    }

    #[test]
    fn test_empty_project() {
        let result = layout(&Project::new("p"));
        assert!(result.positions.is_empty());
    }

    #[test]
    fn test_single_table_at_origin() {
        let mut project = Project::new("p");
        let id = table(&mut project, "users");
        let result = layout(&project);
        assert_eq!(result.position_of(id), Some(Position::new(100.0, 100.0)));
    }

    #[test]
    fn test_referenced_table_above_dependents() {
        let mut project = Project::new("p");
        let orders = table(&mut project, "orders");
        let users = table(&mut project, "users");
        link(&mut project, orders, users);

        let config = LayoutConfig::default();
        let result = layout(&project);
        let users_pos = result.position_of(users).unwrap();
        let orders_pos = result.position_of(orders).unwrap();
        assert_eq!(
            orders_pos.y,
            users_pos.y + config.table_height + config.rank_separation
        );
        assert_eq!(users_pos.x, orders_pos.x);
    }

    #[test]
    fn test_layout_config_default() {
        let config = LayoutConfig::default();
        assert_eq!(config.rank_separation, 100.0);
        assert_eq!(config.node_separation, 80.0);
        assert_eq!(config.start_x, 100.0);
        assert_eq!(config.start_y, 100.0);
    }

    #[test]
    fn test_no_overlaps() {
        let mut project = Project::new("p");
        let ids: Vec<TableId> = (0..7)
            .map(|i| table(&mut project, &format!("table_{}", i)))
            .collect();
        link(&mut project, ids[1], ids[0]);
        link(&mut project, ids[2], ids[0]);
        link(&mut project, ids[3], ids[1]);
        link(&mut project, ids[4], ids[2]);

        let mut sizes = HashMap::new();
        sizes.insert(ids[2], Size::new(500.0, 90.0));
        sizes.insert(ids[5], Size::new(120.0, 400.0));

        let config = LayoutConfig::default();
        let result = calculate_layered_layout(&project, &sizes, &config).unwrap();
        assert_eq!(result.positions.len(), 7);
        assert_no_overlaps(&result, &sizes, &config);
    }

    #[test]
    fn test_cycles_are_broken() {
        let mut project = Project::new("p");
        let a = table(&mut project, "a");
        let b = table(&mut project, "b");
        let c = table(&mut project, "c");
        link(&mut project, a, b);
        link(&mut project, b, c);
        link(&mut project, c, a);

        let config = LayoutConfig::default();
        let result = layout(&project);
        assert_eq!(result.positions.len(), 3);
        assert_no_overlaps(&result, &HashMap::new(), &config);
    }

    #[test]
    fn test_self_reference_is_ignored() {
        let mut project = Project::new("p");
        let employees = table(&mut project, "employees");
        link(&mut project, employees, employees);
        let result = layout(&project);
        assert_eq!(result.position_of(employees), Some(Position::new(100.0, 100.0)));
    }

    #[test]
    fn test_barycenter_removes_crossing() {
        let mut project = Project::new("p");
        let p1 = table(&mut project, "p1");
        let p2 = table(&mut project, "p2");
        let c1 = table(&mut project, "c1");
        let c2 = table(&mut project, "c2");
        link(&mut project, c1, p2);
        link(&mut project, c2, p1);

        let result = layout(&project);
        let x = |id| result.position_of(id).map(|p| p.x).unwrap();
        assert!(x(p1) < x(p2));
        assert!(x(c2) < x(c1));
    }

    #[test]
    fn test_invalid_size_is_rejected() {
        let mut project = Project::new("p");
        let id = table(&mut project, "users");
        let mut sizes = HashMap::new();
        sizes.insert(id, Size::new(f64::NAN, 100.0));
        let err = calculate_layered_layout(&project, &sizes, &LayoutConfig::default()).unwrap_err();
        assert!(matches!(err, LayoutError::InvalidSize { .. }));

        sizes.insert(id, Size::new(0.0, 100.0));
        assert!(calculate_layered_layout(&project, &sizes, &LayoutConfig::default()).is_err());
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        let mut project = Project::new("p");
        let users = table(&mut project, "users");
        link(&mut project, TableId::new(), users);
        let err = calculate_layered_layout(&project, &HashMap::new(), &LayoutConfig::default())
            .unwrap_err();
        assert!(matches!(err, LayoutError::UnknownTable { .. }));
    }

    #[test]
    fn test_changed_skips_unmoved_tables() {
        let mut project = Project::new("p");
        let id = table(&mut project, "users");
        let result = layout(&project);
        assert_eq!(result.changed(&project).count(), 1);

        project.tables[0].position = Position::new(100.0, 100.0);
        assert_eq!(result.changed(&project).count(), 0);
        assert_eq!(result.position_of(id), Some(Position::new(100.0, 100.0)));
    }
}
