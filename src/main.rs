use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use serial_bridge::{cli, group::BridgeGroup, logging};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    signal(SignalKind::hangup())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    futures::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let mut cli = cli::Cli::parse();

    if let Some(command) = cli.command.take() {
        cli::handle_command(command)?;

        return Ok(());
    }

    logging::init(
        cli.log_level,
        cli.log_dir.clone().map(|dir| (cli.log_level, dir)),
    )
    .await;

    let config = cli.into_config()?;
    debug!(?config, "Using configuration");

    let group = BridgeGroup::start(&config).await?;

    for failure in group.failures() {
        error!(%failure, "Not bridged");
    }

    if group.bridges().is_empty() {
        return Err(eyre!("No bridge could be started"));
    }

    for bridge in group.bridges() {
        info!("Bridging {} on {}", bridge.device(), bridge.local_addr());
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup() => {
            info!("Told to hang up, quitting")
        }
    }

    group.stop().await;

    Ok(())
}
