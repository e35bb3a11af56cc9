use anyhow::Result;
use clap::Parser;
use ops_cli::{init_tracing, run, ApprovalsConfig, Cli};
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = ApprovalsConfig::load(cli.config.as_deref())?;
    init_tracing(cli.verbose, &config.log_level)?;
    debug!(config_file = ?cli.config, log_level = %config.log_level, "Loaded configuration");

    run(cli, config).await
}
