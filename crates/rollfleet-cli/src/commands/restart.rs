use rollfleet_core::config::RollConfig;

pub async fn run(config: RollConfig, app: &str, environment: &str) -> anyhow::Result<()> {
    let orchestrator = super::orchestrator(config);
    let report = orchestrator.restart(app, environment).await?;
    print!("{report}");
    Ok(())
}
