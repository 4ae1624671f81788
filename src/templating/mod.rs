use liquid::Template;
use serde_json::Value;

use crate::{config::RenderOptions, graph::PermissionGraph, Result};

pub mod builder;
pub mod liquid_exts;

/// Render the interactive vis-network page for `graph`.  `logs` is the
/// captured pipeline log tree for `?debug` requests, or null.
pub fn render_graph_page(
    template: &Template,
    graph: &PermissionGraph,
    options: &RenderOptions,
    logs: Value,
) -> Result<String> {
    let vis = graph.to_vis_json();
    let mut categories: Vec<String> = vis["nodes"]
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| n["group"].as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    categories.sort();
    categories.dedup();

    let globals = liquid::object!({
        "title": options.page_title.clone(),
        "options": serde_json::to_value(options)?,
        "graph": vis,
        "categories": categories,
        "node_count": graph.node_count(),
        "edge_count": graph.edge_count(),
        "logs": logs,
    });

    Ok(template.render(&globals)?)
}
