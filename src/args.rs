use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "driver-agent")]
#[command(version)]
#[command(about = "Installs machine drivers and publishes their schemas to the control plane", long_about = None)]
pub(crate) struct Cli {
    /// Config file (default: $DRIVER_AGENT_CONFIG or ~/.config/machine-driver-agent/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Sync drivers, then watch the control plane and resync on drift
    Run {
        /// Exit with status 3 on drift instead of resyncing in-process
        #[arg(long)]
        exit_on_drift: bool,
    },

    /// Run a single reconciliation cycle and exit
    Sync,

    /// Download and install a driver binary
    Install {
        /// Driver name (e.g., digitalocean)
        #[arg(long)]
        name: String,

        /// Artifact URL (binary, zip or tar archive)
        #[arg(long)]
        url: String,

        /// Expected md5 checksum of the artifact
        #[arg(long, default_value = "")]
        checksum: String,
    },

    /// Print the config schema fields a driver declares, as JSON
    Flags {
        /// Driver name
        driver: String,
    },

    /// Handle a driver-activate event
    Activate {
        /// Machine driver resource id
        id: String,
    },

    /// Handle a driver-deactivate event
    Deactivate {
        /// Machine driver resource id
        id: String,
    },

    /// Handle a driver-remove event
    Remove {
        /// Machine driver resource id
        id: String,
    },
}
