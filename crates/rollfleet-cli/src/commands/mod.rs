pub mod artifacts;
pub mod deploy;
pub mod restart;
pub mod version;

use std::sync::Arc;

use rollfleet_aws::{AwsCli, SshConnector};
use rollfleet_core::cancel::cancel_pair;
use rollfleet_core::config::RollConfig;
use rollfleet_orchestrator::Orchestrator;
use rollfleet_recipe::{ArchiveRecipe, RecipeRegistry};

/// Build the recipe set declared in `[[recipe]]` config sections.
fn registry_from(config: &RollConfig) -> RecipeRegistry {
    let mut registry = RecipeRegistry::new();
    for section in &config.recipes {
        let mut recipe = ArchiveRecipe::new(section.name.clone());
        if let Some(service) = &section.service {
            recipe = recipe.with_service(service.clone());
        }
        for link in &section.links {
            recipe = recipe.with_config_link(link.source.clone(), link.dest.clone());
        }
        registry.register(Arc::new(recipe));
    }
    registry
}

/// The production orchestrator: AWS CLI collaborators, ssh host
/// access, and Ctrl-C wired to cancellation at instance boundaries.
fn orchestrator(config: RollConfig) -> Orchestrator {
    let aws = Arc::new(AwsCli::new(config.artifacts.bucket.clone()));
    let connector = Arc::new(SshConnector::new(config.fleet.ssh_user.clone()));
    let registry = registry_from(&config);

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing the instance in flight, then stopping");
            handle.cancel();
        }
    });

    Orchestrator::new(
        aws.clone(),
        aws.clone(),
        aws,
        connector,
        registry,
        config,
    )
    .with_cancel(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_built_from_config_sections() {
        let config: RollConfig = toml_config(
            r#"
[[recipe]]
name = "demo"
service = "demo-server"

[[recipe]]
name = "api"
"#,
        );
        let registry = registry_from(&config);
        assert_eq!(registry.names(), vec!["api", "demo"]);
    }

    fn toml_config(raw: &str) -> RollConfig {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, raw.as_bytes()).unwrap();
        RollConfig::from_file(file.path()).unwrap()
    }
}
