use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use consoley::app;
use consoley::backend::CommandBackend;
use consoley::cli::{Cli, Command};
use consoley::config::{AppConfig, FileConfig};
use consoley::telemetry::logging;
use session_readiness::Backend;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("failed to initialise logging")?;

    let file = FileConfig::load(cli.config.as_deref())?;
    let config = AppConfig::resolve(file, &cli.session)?;
    debug!(
        target = "consoley.main",
        endpoint = %config.controller.target,
        strategy = %config.strategy,
        max_retries = config.controller.max_retries,
        "configuration resolved"
    );
    let backend = Arc::new(CommandBackend::new(config.commands.clone()));

    match cli.command.unwrap_or_default() {
        Command::Run(args) => app::run(&config, backend, &args).await,
        Command::Stop => {
            backend.stop_container().await.context("failed to stop worker")?;
            println!("worker stopped");
            Ok(())
        }
        Command::Restart => {
            backend
                .restart_container()
                .await
                .context("failed to restart worker")?;
            println!("worker restarted");
            Ok(())
        }
        Command::Logs => {
            let logs = backend
                .container_logs()
                .await
                .context("failed to fetch worker logs")?;
            println!("{logs}");
            Ok(())
        }
        Command::Info => {
            let info = app::info(&config).await;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::Probe => app::ensure_ready(app::probe_once(&config).await, &config),
    }
}
