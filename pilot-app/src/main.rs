use anyhow::Context;
use clap::Parser;
use pilot_app::config::{PilotConfig, DEFAULT_CONFIG_PATH};
use pilot_app::{daemon, telemetry};
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "pilotd", version, about = "Supervises interactive coding CLIs through pseudo-terminals")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = PilotConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.apply_env();
    config.validate()?;

    telemetry::init_logging(&config.log)?;

    if cli.check {
        info!(config = %cli.config.display(), "Configuration is valid");
        return Ok(());
    }

    telemetry::init_metrics(&config.metrics)?;

    if config.provider.settings.api_key.is_none() {
        warn!(
            env = %config.provider.api_key_env,
            "No API key found; classification requests are sent unauthenticated"
        );
    }
    info!(
        model = %config.provider.settings.model,
        endpoint = %config.provider.settings.base_url,
        max_concurrent = config.pool.max_concurrent,
        "Starting pilotd"
    );

    let pool = daemon::build_pool(&config);
    daemon::run(
        pool,
        &config.cleanup,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown_signal(),
    )
    .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
