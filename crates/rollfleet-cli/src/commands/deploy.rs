use std::path::Path;

use rollfleet_core::config::RollConfig;

pub async fn run(
    settings: RollConfig,
    app: &str,
    environment: &str,
    artifact: Option<String>,
    config: Option<String>,
) -> anyhow::Result<()> {
    let deploy_config = config.as_deref().map(parse_config).transpose()?;

    let orchestrator = super::orchestrator(settings);
    let report = orchestrator
        .deploy_with(app, environment, artifact, deploy_config)
        .await?;
    print!("{report}");
    Ok(())
}

/// Accept the config either as inline JSON or as a path to a JSON
/// file.
fn parse_config(raw: &str) -> anyhow::Result<serde_json::Value> {
    let path = Path::new(raw);
    let content = if path.exists() {
        std::fs::read_to_string(path)?
    } else {
        raw.to_string()
    };
    Ok(serde_json::from_str(&content)?)
}
