use std::{net::SocketAddr, path::PathBuf, process::exit, sync::Arc};

use accessgraph::{
    config::Config,
    logging::init_logging,
    server::{make_router, ServerState},
    AccessGraphError, ErrorLayer, Result,
};
use clap::Parser;
use tracing::info;

/// Serve the Azure access graph over HTTP.
#[derive(Debug, Parser)]
#[clap(name = "accessgraph-server", version)]
struct ServerOpts {
    /// Directory holding the normalized table files.
    #[clap(long, value_parser, default_value = "data", env = "ACCESSGRAPH_DATA_DIR")]
    data_dir: PathBuf,

    #[clap(long, value_parser, default_value = "127.0.0.1:8002", env = "ACCESSGRAPH_LISTEN")]
    listen: SocketAddr,

    /// Optional TOML file with render and graph style settings.
    #[clap(long, value_parser, env = "ACCESSGRAPH_CONFIG")]
    config: Option<PathBuf>,
}

async fn serve(opts: ServerOpts) -> Result<()> {
    let config = Config::load(opts.config.as_deref())?;
    let state = ServerState::load(&opts.data_dir, config)?;
    let conflicts = state.store.join_conflicts().len();
    let app = make_router(Arc::new(state));

    info!(listen = %opts.listen, conflicts, "serving access graph");
    axum::Server::try_bind(&opts.listen)
        .map_err(|err| {
            AccessGraphError::sticky(
                ErrorLayer::ServerLayer,
                format!("Unable to bind {}: {}", opts.listen, err),
            )
        })?
        .serve(app.into_make_service())
        .await
        .map_err(|err| AccessGraphError::sticky(ErrorLayer::ServerLayer, err.to_string()))
}

#[tokio::main]
async fn main() {
    init_logging();

    let opts = ServerOpts::parse();
    if let Err(err) = serve(opts).await {
        eprintln!("{}", err);
        exit(1);
    }
}
