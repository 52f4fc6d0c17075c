use machine_driver_agent::plugin::PluginClient;
use machine_driver_agent::schema::{translate_flags, FieldOverrides};
use machine_driver_agent::AgentConfig;

pub(crate) async fn cmd_flags(config: AgentConfig, driver: &str) -> anyhow::Result<()> {
    let client = PluginClient::new(&config.install_dir, config.plugin_timeout());
    let flags = client.discover_create_flags(driver).await?;

    let overrides = FieldOverrides::builtin().merge(&config.field_overrides);
    let definition = translate_flags(driver, &flags, &overrides)?;

    println!("{}", serde_json::to_string_pretty(&definition)?);
    Ok(())
}
