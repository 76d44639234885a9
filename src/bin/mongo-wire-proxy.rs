use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use mongo_wire_proxy::Proxy;
use mongo_wire_proxy::args::Args;
use mongo_wire_proxy::config::load_config_or_create;
use mongo_wire_proxy::logging::init_logging;
use mongo_wire_proxy::runtime::{RuntimeConfig, shutdown_signal};

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_file.as_deref())?;

    RuntimeConfig::from_args(args.threads)
        .build_runtime()?
        .block_on(run_proxy(args))
}

async fn run_proxy(args: Args) -> Result<()> {
    let mut config = load_config_or_create(&args.config).inspect_err(|e| {
        error!("Failed to load config file '{}': {:#}", args.config.display(), e);
    })?;
    args.apply_to(&mut config);
    config.validate()?;

    info!(
        "Proxying {}:{} -> {}",
        config.listen.host,
        config.listen.port,
        config.backend.target()
    );

    let proxy = Proxy::new(config)?;
    let listener = proxy.bind().await?;

    let signal_proxy = proxy.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_proxy.shutdown();
    });

    proxy.run(listener).await?;
    proxy.graceful_shutdown().await;
    info!(
        connections_created = proxy.connections_created(),
        "Graceful shutdown complete"
    );
    Ok(())
}
