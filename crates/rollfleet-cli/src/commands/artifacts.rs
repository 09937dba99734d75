use rollfleet_core::config::RollConfig;

pub async fn run(config: RollConfig, app: &str, weeks: u32) -> anyhow::Result<()> {
    let orchestrator = super::orchestrator(config);
    let references = orchestrator.list_artifacts(app, weeks).await?;
    if references.is_empty() {
        println!("no artifacts for {app} in the last {weeks} weeks");
        return Ok(());
    }
    for reference in references {
        println!("{reference}");
    }
    Ok(())
}
