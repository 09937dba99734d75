use rollfleet_core::config::RollConfig;

pub async fn run(config: RollConfig, app: &str, environment: &str) -> anyhow::Result<()> {
    let orchestrator = super::orchestrator(config);
    for (instance, version) in orchestrator.show_version(app, environment).await? {
        println!("{instance}: {version}");
    }
    Ok(())
}
