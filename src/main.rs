mod args;
mod commands;

use anyhow::Context;
use args::{Cli, Commands};
use clap::Parser;
use machine_driver_agent::{clienv, AgentConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(clienv::config_path);
    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match cli.command {
        Commands::Run { exit_on_drift } => commands::run::cmd_run(config, exit_on_drift).await?,
        Commands::Sync => commands::sync::cmd_sync(config).await?,
        Commands::Install { name, url, checksum } => {
            commands::install::cmd_install(&config, &name, &url, &checksum).await?
        }
        Commands::Flags { driver } => commands::flags::cmd_flags(config, &driver).await?,
        Commands::Activate { id } => commands::lifecycle::cmd_activate(config, &id).await?,
        Commands::Deactivate { id } => commands::lifecycle::cmd_deactivate(config, &id).await?,
        Commands::Remove { id } => commands::lifecycle::cmd_remove(config, &id).await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}
