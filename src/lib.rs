extern crate clap;
extern crate itertools;
#[macro_use]
extern crate lazy_static;
extern crate liquid;
extern crate petgraph;
extern crate regex;
extern crate serde;
extern crate serde_json;
#[macro_use]
extern crate tracing;
extern crate tracing_subscriber;
extern crate uuid;

pub mod config;
pub mod edges;
pub mod entity_store;
pub mod errors;
pub mod file_format;
pub mod graph;
pub mod logging;
pub mod resolve;
pub mod server;
pub mod templating;
pub mod utils;

pub use edges::{build_edges, PermissionEdge};
pub use entity_store::EntityStore;
pub use errors::{AccessGraphError, ErrorDetails, ErrorLayer, Result};
pub use graph::{project, PermissionGraph};
pub use resolve::{principal::resolve_principal, scope::resolve_scope};
