use clap::Parser;
use hashgate::{telemetry, SolverClient, SolverConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "hashgate-client", version, about = "Solves puzzles to fetch quotes")]
struct Args {
    /// YAML config file
    #[arg(short, long, env = "HASHGATE_CLIENT_CONFIG", default_value = "config/client.yaml")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    telemetry::init(&args.log);

    let config = SolverConfig::load(&args.config)?;
    let client = SolverClient::from_config(config)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            shutdown.cancel();
        }
    });

    let report = client.run(&cancel).await;
    if report.failed > 0 {
        return Err(format!("{} of {} requests failed", report.failed, report.total()).into());
    }
    Ok(())
}
