use anyhow::Result;
use clap::Parser;

mod cli;

use edgelog::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    init_tracing();

    let mut config = edgelog::config::load_config(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(stream_port) = args.stream_port {
        config.stream.port = stream_port;
    }

    edgelog::server::start_server(config).await
}
