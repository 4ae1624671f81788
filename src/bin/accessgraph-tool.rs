use std::path::PathBuf;
use std::process::exit;

use accessgraph::{
    build_edges,
    config::Config,
    file_format::{
        ingestion::normalize_raw_dir,
        tables::{default_type_styles, write_table, write_tables, TableKind},
    },
    graph::project_with,
    logging::init_logging,
    resolve_principal, resolve_scope,
    templating::{builder::build_and_parse_permission_graph, render_graph_page},
    EntityStore, Result,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{to_string, to_string_pretty, Value};
use tracing::info;

#[derive(Clone, Debug, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON.
    Pretty,
    /// Un-pretty-printed JSON.
    Concise,
}

#[derive(Clone, Debug, PartialEq, ValueEnum)]
pub enum GraphFormat {
    Json,
    Dot,
}

/// Inspect and render the Azure access graph for a data directory.
#[derive(Debug, Parser)]
#[clap(name = "accessgraph-tool", version)]
struct ToolOpts {
    /// Directory holding the normalized table files.
    #[clap(long, value_parser, default_value = "data", env = "ACCESSGRAPH_DATA_DIR")]
    data_dir: PathBuf,

    /// Optional TOML file with render and graph style settings.
    #[clap(long, value_parser, env = "ACCESSGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[clap(long, short, value_parser, value_enum, default_value = "pretty")]
    output_format: OutputFormat,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the canonical permission edge list.
    Edges,
    /// Print the projected graph.
    Graph(GraphArgs),
    /// Write the interactive HTML page.
    Render(RenderArgs),
    /// Classify a role assignment scope path.
    ResolveScope(ResolveScopeArgs),
    /// Resolve a principal id to its display name and category.
    ResolvePrincipal(ResolvePrincipalArgs),
    /// Convert raw directory and ARM dumps into the data directory tables.
    Normalize(NormalizeArgs),
    /// Write the stock nodes_types.json palette into the data directory.
    WriteTypes,
}

#[derive(Debug, Args)]
struct GraphArgs {
    #[clap(long, value_parser, value_enum, default_value = "json")]
    format: GraphFormat,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[clap(long, short, value_parser, default_value = "graph.html")]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct ResolveScopeArgs {
    #[clap(value_parser)]
    scope: String,
}

#[derive(Debug, Args)]
struct ResolvePrincipalArgs {
    #[clap(value_parser)]
    principal_id: String,
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    /// Directory of raw `{"value": [...]}` API responses.
    #[clap(long, value_parser)]
    raw_dir: PathBuf,
}

fn print_value<T: Serialize>(value: &T, format: &OutputFormat) -> Result<()> {
    let s = match format {
        OutputFormat::Pretty => to_string_pretty(value)?,
        OutputFormat::Concise => to_string(value)?,
    };
    println!("{}", s);
    Ok(())
}

fn run(opts: ToolOpts) -> Result<()> {
    let config = Config::load(opts.config.as_deref())?;

    match opts.cmd {
        Command::Normalize(args) => {
            let tables = normalize_raw_dir(&args.raw_dir)?;
            write_tables(&opts.data_dir, &tables)?;
            info!(dir = %opts.data_dir.display(), "wrote normalized tables");
            Ok(())
        }
        Command::WriteTypes => write_table(
            &opts.data_dir,
            TableKind::NodeTypes,
            &default_type_styles(),
        ),
        Command::Edges => {
            let store = EntityStore::load(&opts.data_dir)?;
            print_value(&build_edges(&store), &opts.output_format)
        }
        Command::Graph(args) => {
            let store = EntityStore::load(&opts.data_dir)?;
            let graph = project_with(&build_edges(&store), &config.graph);
            match args.format {
                GraphFormat::Json => print_value(&graph.to_vis_json(), &opts.output_format),
                GraphFormat::Dot => {
                    println!("{}", graph.to_dot());
                    Ok(())
                }
            }
        }
        Command::Render(args) => {
            let store = EntityStore::load(&opts.data_dir)?;
            let graph = project_with(&build_edges(&store), &config.graph);
            let template = build_and_parse_permission_graph()?;
            let html = render_graph_page(&template, &graph, &config.render, Value::Null)?;
            std::fs::write(&args.output, html)?;
            info!(output = %args.output.display(), "rendered graph page");
            Ok(())
        }
        Command::ResolveScope(args) => {
            let store = EntityStore::load(&opts.data_dir)?;
            print_value(&resolve_scope(&store, &args.scope), &opts.output_format)
        }
        Command::ResolvePrincipal(args) => {
            let store = EntityStore::load(&opts.data_dir)?;
            print_value(
                &resolve_principal(&store, &args.principal_id),
                &opts.output_format,
            )
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let opts = ToolOpts::parse();
    if let Err(err) = run(opts) {
        eprintln!("{}", err);
        exit(1);
    }
}
