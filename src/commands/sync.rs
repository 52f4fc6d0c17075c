use machine_driver_agent::{Agent, AgentConfig};

pub(crate) async fn cmd_sync(config: AgentConfig) -> anyhow::Result<()> {
    let agent = Agent::new(config)?;
    let mut report = agent.sync().await?;
    super::print_report(&report);

    match report.take_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
