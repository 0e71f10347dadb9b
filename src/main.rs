use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use visibility_etl::commands::{self, Cli};
use visibility_etl::infrastructure::{AppConfig, init_logging_with_config};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }

    if let Err(e) = init_logging_with_config(&config.logging) {
        eprintln!("Warning: logging disabled: {e}");
    }
    let sources = AppConfig::config_sources(cli.config.as_deref());
    if sources.is_empty() {
        info!("Configuration: defaults and environment only");
    } else {
        for source in &sources {
            info!("Configuration loaded from {}", source.display());
        }
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, saving progress");
            on_signal.cancel();
        }
    });

    if let Err(e) = commands::run(cli.command, &config, shutdown).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
