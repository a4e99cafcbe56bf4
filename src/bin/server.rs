use clap::Parser;
use hashgate::{telemetry, IssuerConfig, Server};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "hashgate-server", version, about = "Proof-of-work gated quote server")]
struct Args {
    /// YAML config file
    #[arg(short, long, env = "HASHGATE_SERVER_CONFIG", default_value = "config/server.yaml")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    telemetry::init(&args.log);

    let config = IssuerConfig::load(&args.config)?;
    let server = Server::from_config(&config).await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received"),
            Err(err) => error!(error = %err, "failed to listen for interrupt"),
        }
        shutdown.cancel();
    });

    server.run(cancel).await;
    Ok(())
}
