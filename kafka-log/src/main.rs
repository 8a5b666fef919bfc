use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};

use kafka_log::{cli::Cli, node};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // stdout carries protocol frames, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let options = cli.serve_options();
    let stdin = BufReader::new(tokio::io::stdin());

    if let Err(err) = node::serve(stdin, tokio::io::stdout(), options).await {
        warn!("node exited with error: {err:?}");
        return Err(err);
    }
    info!("input closed, shutting down");

    Ok(())
}
