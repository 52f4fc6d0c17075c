use machine_driver_agent::{Agent, AgentConfig, SyncReport};

fn finish(report: machine_driver_agent::Result<SyncReport>) -> anyhow::Result<()> {
    let mut report = report?;
    super::print_report(&report);
    match report.take_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

pub(crate) async fn cmd_activate(config: AgentConfig, id: &str) -> anyhow::Result<()> {
    let agent = Agent::new(config)?;
    finish(agent.handlers().on_activate(id).await)
}

pub(crate) async fn cmd_deactivate(config: AgentConfig, id: &str) -> anyhow::Result<()> {
    let agent = Agent::new(config)?;
    finish(agent.handlers().on_deactivate(id).await)
}

pub(crate) async fn cmd_remove(config: AgentConfig, id: &str) -> anyhow::Result<()> {
    let agent = Agent::new(config)?;
    finish(agent.handlers().on_remove(id).await)
}
