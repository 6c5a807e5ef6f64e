use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use mockchain_common::{
    config::VERSION,
    logger::{setup_logger, LoggerOptions},
};
use mockchain_daemon::{
    config::{load_config_file, Config},
    core::{Controller, SimulatedBackend},
    rpc::control::ControlServer,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config: Config = Config::parse();
    let file = load_config_file(&config.config_file).with_context(|| {
        format!(
            "Error while loading config file {}",
            config.config_file.display()
        )
    })?;

    let log = &config.log;
    setup_logger(LoggerOptions {
        level: log.log_level,
        file_level: log.file_log_level.unwrap_or(log.log_level),
        file: log.log_file(),
        colors: !log.disable_log_color,
        modules: &log.logs_modules,
        datetime_format: &log.datetime_format,
    })
    .context("Error while setting up the logger")?;

    info!("Mockchain daemon v{}", VERSION);
    let bind_host = config.bind_host.unwrap_or(file.bind_host);
    let controller = Arc::new(Controller::with_backend(SimulatedBackend::new(
        bind_host.as_str(),
    )));

    for descriptor in file.chains {
        let info = controller
            .initialize_chain(descriptor)
            .await
            .context("Error while creating a configured chain")?;
        controller
            .chain_network_up(&info.chain_id)
            .await
            .with_context(|| format!("Error while starting network of chain {}", info.chain_id))?;
        info!(
            "Chain {} serving stream on {} and queries on {}",
            info.chain_id,
            info.ship_url(&bind_host),
            info.rpc_url(&bind_host)
        );
    }

    let server = ControlServer::start(Arc::clone(&controller), &bind_host, file.control_port)
        .context("Error while starting the control server")?;

    tokio::signal::ctrl_c()
        .await
        .context("Error while waiting for the shutdown signal")?;
    warn!("Shutdown requested, stopping every chain...");

    server.stop().await;
    if let Err(e) = controller.full_stop().await {
        error!("{}", e);
        return Err(e.into());
    }

    info!("Mockchain daemon stopped");
    Ok(())
}
