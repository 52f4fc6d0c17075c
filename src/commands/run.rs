use machine_driver_agent::{Agent, AgentConfig, WatchOutcome};
use tracing::info;

/// Exit status asking an external supervisor to restart the agent.
pub(crate) const EXIT_RESTART: i32 = 3;

pub(crate) async fn cmd_run(config: AgentConfig, exit_on_drift: bool) -> anyhow::Result<()> {
    let agent = Agent::new(config)?;

    loop {
        let outcome = tokio::select! {
            outcome = agent.run_cycle() => outcome?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        };

        match outcome {
            WatchOutcome::RestartRequested { reason } if exit_on_drift => {
                info!(reason = %reason, "Exiting for restart");
                std::process::exit(EXIT_RESTART);
            }
            WatchOutcome::RestartRequested { reason } => {
                info!(reason = %reason, "Starting a fresh reconciliation cycle");
            }
        }
    }
}
