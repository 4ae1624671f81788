use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{AccessGraphError, ErrorLayer, Result};

/// How nodes and arcs are dressed when a graph is projected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphStyle {
    pub node_size: u32,
    pub edge_smooth: String,
    pub edge_arrows: String,
    pub tooltip_prefix: String,
}

impl Default for GraphStyle {
    fn default() -> Self {
        GraphStyle {
            node_size: 30,
            edge_smooth: "curvedCW".to_string(),
            edge_arrows: "to".to_string(),
            tooltip_prefix: "Type: ".to_string(),
        }
    }
}

/// vis-network page settings.  The physics values are handed to the
/// `repulsion` solver as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub page_title: String,
    pub height: String,
    pub node_distance: u32,
    pub central_gravity: f64,
    pub spring_length: u32,
    pub spring_constant: f64,
    pub damping: f64,
    pub drag_nodes: bool,
    pub drag_view: bool,
    pub zoom_view: bool,
    pub select_menu: bool,
    pub filter_menu: bool,
    pub vis_network_url: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            page_title: "Azure access graph".to_string(),
            height: "900px".to_string(),
            node_distance: 240,
            central_gravity: 0.15,
            spring_length: 200,
            spring_constant: 0.05,
            damping: 0.6,
            drag_nodes: true,
            drag_view: true,
            zoom_view: true,
            select_menu: true,
            filter_menu: true,
            vis_network_url:
                "https://unpkg.com/vis-network@9.1.2/standalone/umd/vis-network.min.js".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub render: RenderOptions,
    pub graph: GraphStyle,
}

impl Config {
    /// Load the TOML config at `path`, or the defaults when there is none.
    /// Any key left out of the file keeps its default.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(p) => p,
            None => return Ok(Config::default()),
        };
        let text = fs::read_to_string(path).map_err(|err| {
            AccessGraphError::sticky(
                ErrorLayer::ConfigLayer,
                format!("Unable to read config {}: {}", path.display(), err),
            )
        })?;
        Config::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config = Config::parse(
        r#"
[render]
page_title = "Contoso"
damping = 0.9

[graph]
node_size = 12
"#,
    )
    .unwrap();
    assert_eq!(config.render.page_title, "Contoso");
    assert_eq!(config.render.damping, 0.9);
    assert_eq!(config.render.node_distance, 240);
    assert_eq!(config.graph.node_size, 12);
    assert_eq!(config.graph.edge_smooth, "curvedCW");
}

#[test]
fn test_missing_config_file_is_a_config_error() {
    let err = Config::load(Some(Path::new("/nonexistent/accessgraph.toml"))).unwrap_err();
    match err {
        AccessGraphError::StickyProblem(details) => {
            assert_eq!(details.layer, ErrorLayer::ConfigLayer)
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_no_config_is_defaults() {
    assert_eq!(Config::load(None).unwrap(), Config::default());
}
