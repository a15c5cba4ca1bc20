use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use pox_pool_keeper::chain::{
    DryRunSubmitter, HiroClient, SignerServiceClient, TransactionSubmitter,
};
use pox_pool_keeper::db::Store;
use pox_pool_keeper::{server, Keeper, KeeperConfig};

#[derive(Debug, Parser)]
#[command(name = "pox-pool-keeper", about = "Stacking pool delegation keeper")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "keeper.toml")]
    config: String,

    /// Plan and log operations without submitting anything.
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Do not start the read-only dashboard API.
    #[arg(long)]
    no_server: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "pox_pool_keeper=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = KeeperConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    let store = Store::connect(&config.database_path())
        .await
        .with_context(|| format!("opening database {}", config.database_path()))?;
    store.create_tables().await?;

    if !args.no_server {
        let server_store = store.clone();
        let port = config.server_port;
        tokio::spawn(async move {
            if let Err(e) = server::serve(server_store, port).await {
                error!(error = %e, "dashboard api stopped");
            }
        });
    }

    let submitter: Arc<dyn TransactionSubmitter> = if args.dry_run {
        Arc::new(DryRunSubmitter)
    } else if let Some(url) = config.submit_url.clone() {
        Arc::new(SignerServiceClient::new(url))
    } else {
        warn!("no submit_url configured, running in dry-run mode");
        Arc::new(DryRunSubmitter)
    };

    let api = Arc::new(HiroClient::new(config.clone()));
    Keeper::new(config, api, submitter, store).run().await;
    Ok(())
}
