//! Generic tarball recipe.
//!
//! Deploys a gzipped tar artifact through the two-slot rotation,
//! links configured files from the app's config dir into the new
//! release, and restarts the app's system service.

use async_trait::async_trait;
use tracing::{debug, info};

use rollfleet_core::{HostError, RemoteHost};
use rollfleet_release::{rotate, ReleaseLayout};

use crate::recipe::{ConfigValidationError, DeployContext, Recipe, RecipeError};

/// Tarball + service-restart recipe for one application.
#[derive(Debug, Clone)]
pub struct ArchiveRecipe {
    app: String,
    service: String,
    /// `(source, dest)` pairs: `{config_dir}/{source}` is linked at
    /// `{release}/{dest}`.
    config_links: Vec<(String, String)>,
}

impl ArchiveRecipe {
    /// Recipe for `app`, restarting the service of the same name.
    pub fn new(app: impl Into<String>) -> Self {
        let app = app.into();
        Self {
            service: app.clone(),
            app,
            config_links: Vec::new(),
        }
    }

    /// Restart a differently named system service after deploys.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Link `{config_dir}/{source}` to `{release}/{dest}` after each
    /// deploy.
    pub fn with_config_link(
        mut self,
        source: impl Into<String>,
        dest: impl Into<String>,
    ) -> Self {
        self.config_links.push((source.into(), dest.into()));
        self
    }
}

#[async_trait]
impl Recipe for ArchiveRecipe {
    fn name(&self) -> &str {
        &self.app
    }

    fn validate(&self, _config: &serde_json::Value) -> Result<(), ConfigValidationError> {
        Err(ConfigValidationError::new(
            "config",
            format!(
                "recipe {} deploys from an artifact reference, not a config",
                self.app
            ),
        ))
    }

    async fn deploy(&self, ctx: DeployContext<'_>) -> Result<(), RecipeError> {
        let artifact = ctx.artifact.ok_or_else(|| RecipeError::MissingArtifact {
            recipe: self.app.clone(),
        })?;

        let deploy_dir = rotate(ctx.host, ctx.layout, artifact, ctx.owner).await?;

        for (source, dest) in &self.config_links {
            let link_source = format!("{}/{source}", ctx.layout.config_dir());
            let link_dest = format!("{deploy_dir}/{dest}");
            debug!(host = %ctx.host.address(), %link_source, %link_dest, "linking config");
            ctx.host.symlink(&link_source, &link_dest).await?;
        }

        self.restart(ctx.host, ctx.layout).await
    }

    async fn restart(
        &self,
        host: &dyn RemoteHost,
        _layout: &ReleaseLayout,
    ) -> Result<(), RecipeError> {
        info!(host = %host.address(), service = %self.service, "restarting service");
        host.run(&format!("service {} restart", self.service)).await?;
        Ok(())
    }

    async fn version(
        &self,
        host: &dyn RemoteHost,
        layout: &ReleaseLayout,
    ) -> Result<String, RecipeError> {
        match host.read_file(&layout.version_file()).await {
            Ok(raw) => Ok(printable(&raw)),
            Err(HostError::NotFound { .. }) => Ok("(no version.txt)".to_string()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keep the printable characters of a version file, dropping control
/// bytes some build pipelines leave behind.
fn printable(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect::<String>()
        .trim()
        .to_string()
}
