use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::{
    dot::{Config as DotConfig, Dot},
    graph::NodeIndex,
    visit::EdgeRef,
    Directed, Graph,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{config::GraphStyle, edges::PermissionEdge};

/// A node is keyed by its display string; everything else is presentation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub category: String,
    pub color: Option<String>,
    pub title: String,
    pub size: u32,
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphEdge {
    pub label: String,
    pub arrows: String,
    pub smooth: String,
}

impl fmt::Display for GraphEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Directed multigraph of principals, roles and targets.
///
/// petgraph's `Graph` is index based, so like the symbol graphs elsewhere we
/// keep a side map from the string key to the `NodeIndex` and only ever add
/// nodes through `ensure_node`.  The graph is append-only.
pub struct PermissionGraph {
    graph: Graph<GraphNode, GraphEdge, Directed>,
    node_ix_by_id: HashMap<String, NodeIndex>,
    /// (source, target, label) triples already present, so that the same arc
    /// arriving from two differently-typed edge rows is only drawn once.
    arc_keys: HashSet<(NodeIndex, NodeIndex, String)>,
    style: GraphStyle,
}

impl PermissionGraph {
    pub fn new(style: GraphStyle) -> Self {
        PermissionGraph {
            graph: Graph::new(),
            node_ix_by_id: HashMap::new(),
            arc_keys: HashSet::new(),
            style,
        }
    }

    /// Add a node or restyle the existing one.  The last write wins.
    pub fn ensure_node(&mut self, id: &str, category: &str, color: Option<&str>) -> NodeIndex {
        let node = GraphNode {
            id: id.to_string(),
            category: category.to_string(),
            color: color.map(|c| c.to_string()),
            title: format!("{}{}", self.style.tooltip_prefix, category),
            size: self.style.node_size,
        };
        if let Some(ix) = self.node_ix_by_id.get(id) {
            self.graph[*ix] = node;
            return *ix;
        }

        let ix = self.graph.add_node(node);
        self.node_ix_by_id.insert(id.to_string(), ix);
        ix
    }

    /// Add one arc per distinct (source, target, role); parallel arcs with
    /// different roles are kept.
    pub fn add_permission(&mut self, edge: &PermissionEdge) {
        let source_ix = self.ensure_node(
            &edge.source,
            &edge.source_type,
            edge.source_color.as_deref(),
        );
        let target_ix = self.ensure_node(
            &edge.target,
            &edge.target_type,
            edge.target_color.as_deref(),
        );
        if !self
            .arc_keys
            .insert((source_ix, target_ix, edge.role.clone()))
        {
            return;
        }
        self.graph.add_edge(
            source_ix,
            target_ix,
            GraphEdge {
                label: edge.role.clone(),
                arrows: self.style.edge_arrows.clone(),
                smooth: self.style.edge_smooth.clone(),
            },
        );
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_ix_by_id.get(id).map(|ix| &self.graph[*ix])
    }

    /// (source, target, label) for every arc, in insertion order.
    pub fn list_edges(&self) -> Vec<(&str, &str, &str)> {
        self.graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].id.as_str(),
                    self.graph[e.target()].id.as_str(),
                    e.weight().label.as_str(),
                )
            })
            .collect()
    }

    /// The `{nodes, edges}` document vis-network's `DataSet`s take, sorted so
    /// the output doesn't depend on insertion order.
    pub fn to_vis_json(&self) -> Value {
        let mut nodes: Vec<&GraphNode> = self.graph.node_weights().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<(&str, &str, &GraphEdge)> = self
            .graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].id.as_str(),
                    self.graph[e.target()].id.as_str(),
                    e.weight(),
                )
            })
            .collect();
        edges.sort_by(|a, b| (a.0, a.1, &a.2.label).cmp(&(b.0, b.1, &b.2.label)));

        json!({
            "nodes": nodes.into_iter().map(|n| {
                let mut obj = json!({
                    "id": n.id,
                    "label": n.id,
                    "group": n.category,
                    "title": n.title,
                    "size": n.size,
                });
                if let Some(color) = &n.color {
                    obj["color"] = json!(color);
                }
                obj
            }).collect::<Vec<Value>>(),
            "edges": edges.into_iter().map(|(from, to, e)| json!({
                "from": from,
                "to": to,
                "label": e.label,
                "arrows": e.arrows,
                "smooth": { "type": e.smooth },
            })).collect::<Vec<Value>>(),
        })
    }

    pub fn to_dot(&self) -> String {
        format!(
            "{}",
            Dot::with_attr_getters(
                &self.graph,
                &[DotConfig::EdgeNoLabel, DotConfig::NodeNoLabel],
                &|_, e| format!("label = {:?}", e.weight().label),
                &|_, (_, n)| match &n.color {
                    Some(color) => format!(
                        "label = {:?}, tooltip = {:?}, color = {:?}",
                        n.id, n.title, color
                    ),
                    None => format!("label = {:?}, tooltip = {:?}", n.id, n.title),
                },
            )
        )
    }
}

/// Project an edge list into a graph with the stock styling.
pub fn project(edges: &[PermissionEdge]) -> PermissionGraph {
    project_with(edges, &GraphStyle::default())
}

pub fn project_with(edges: &[PermissionEdge], style: &GraphStyle) -> PermissionGraph {
    let span = trace_span!("project", edges = edges.len());
    let _span_guard = span.enter();

    let mut graph = PermissionGraph::new(style.clone());
    for edge in edges {
        graph.add_permission(edge);
    }
    trace!(
        nodes = graph.node_count(),
        arcs = graph.edge_count(),
        "projected graph"
    );
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source: &str, source_type: &str, role: &str, target: &str) -> PermissionEdge {
        PermissionEdge {
            source: source.to_string(),
            source_type: source_type.to_string(),
            role: role.to_string(),
            target: target.to_string(),
            target_type: "Subscription".to_string(),
            source_color: None,
            target_color: Some("purple".to_string()),
        }
    }

    #[test]
    fn test_parallel_arcs_are_kept() {
        let graph = project(&[
            edge("Alice", "User", "Reader", "Prod"),
            edge("Alice", "User", "Contributor", "Prod"),
        ]);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(
            graph.list_edges(),
            vec![
                ("Alice", "Prod", "Reader"),
                ("Alice", "Prod", "Contributor")
            ]
        );
    }

    #[test]
    fn test_same_arc_from_differently_typed_rows_is_drawn_once() {
        let graph = project(&[
            edge("Alice", "User", "Reader", "Prod"),
            edge("Alice", "Unknown", "Reader", "Prod"),
        ]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_node_insertion_is_idempotent_last_style_wins() {
        let mut graph = PermissionGraph::new(GraphStyle::default());
        let first = graph.ensure_node("web1", "Resource", Some("orange"));
        let second = graph.ensure_node("web1", "Application", Some("red"));
        assert_eq!(first, second);
        assert_eq!(graph.node_count(), 1);

        let node = graph.node("web1").unwrap();
        assert_eq!(node.category, "Application");
        assert_eq!(node.color.as_deref(), Some("red"));
        assert_eq!(node.title, "Type: Application");
        assert_eq!(node.size, 30);
    }

    #[test]
    fn test_vis_json_is_sorted() {
        let graph = project(&[
            edge("Zed", "User", "Reader", "Prod"),
            edge("Alice", "User", "Reader", "Dev"),
        ]);
        let json = graph.to_vis_json();
        let ids: Vec<&str> = json["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["Alice", "Dev", "Prod", "Zed"]);
        assert_eq!(json["edges"][0]["from"], "Alice");
        assert_eq!(json["edges"][0]["smooth"]["type"], "curvedCW");
        assert_eq!(json["edges"][0]["arrows"], "to");
        assert!(json["nodes"][0].get("color").is_none());
        assert_eq!(json["nodes"][1]["color"], "purple");
    }

    #[test]
    fn test_dot_output() {
        let graph = project(&[edge("Alice", "User", "Reader", "Prod")]);
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("label = \"Reader\""));
        assert!(dot.contains("tooltip = \"Type: User\""));
        assert!(dot.contains("color = \"purple\""));
    }
}
