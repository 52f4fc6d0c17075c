//! A machine driver that only declares create flags.
//!
//! Installed as `docker-machine-driver-<name>`, it lets the agent publish a
//! config schema without a real provider behind it.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use machine_driver_agent::plugin::protocol::{CreateFlag, PLUGIN_TOKEN, PLUGIN_TOKEN_ENV};
use machine_driver_agent::plugin::FlagServer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "driver-stub")]
#[command(version)]
#[command(about = "Serves a fixed create-flag list over the driver plugin protocol", long_about = None)]
struct Args {
    /// JSON array of create flags to declare
    #[arg(long)]
    flags: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries the address handshake, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    if std::env::var(PLUGIN_TOKEN_ENV).ok().as_deref() != Some(PLUGIN_TOKEN) {
        bail!("this is a driver plugin; it must be launched by the driver agent");
    }

    let content = std::fs::read_to_string(&args.flags)
        .with_context(|| format!("failed to read {}", args.flags.display()))?;
    let flags: Vec<CreateFlag> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", args.flags.display()))?;

    FlagServer::bind(flags).await?.run().await?;
    Ok(())
}
