//! The rolling-update driver.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use rollfleet_core::cancel::CancelToken;
use rollfleet_core::config::RollConfig;
use rollfleet_core::{
    BlobStore, CloudError, FleetDiscovery, HostConnector, Instance, LoadBalancerApi,
};
use rollfleet_drain::{DrainCoordinator, DrainTimings};
use rollfleet_recipe::{DeployContext, Recipe, RecipeRegistry};
use rollfleet_release::ReleaseLayout;

use crate::error::{OrchestratorError, OrchestratorResult, StageError};
use crate::plan::{self, RollingUpdatePlan};
use crate::stage::{InstanceOutcome, RolloutReport, Stage};

/// What a deploy ships: a built artifact or a config document the
/// recipe renders on the target. Mutually exclusive.
#[derive(Debug, Clone)]
pub enum DeploySource {
    Artifact(String),
    Config(serde_json::Value),
}

/// What to do to each instance once it is out of rotation.
enum Operation<'a> {
    Deploy {
        recipe: Arc<dyn Recipe>,
        artifact: Option<&'a Path>,
        config: Option<&'a serde_json::Value>,
    },
    Restart {
        recipe: Arc<dyn Recipe>,
    },
}

impl Operation<'_> {
    fn stage(&self) -> &'static str {
        match self {
            Operation::Deploy { .. } => "deploy",
            Operation::Restart { .. } => "restart",
        }
    }
}

/// Drives deploy and restart workflows across a fleet, one instance
/// out of rotation at a time.
pub struct Orchestrator {
    discovery: Arc<dyn FleetDiscovery>,
    drain: DrainCoordinator,
    blobs: Arc<dyn BlobStore>,
    connector: Arc<dyn HostConnector>,
    recipes: RecipeRegistry,
    config: RollConfig,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(
        discovery: Arc<dyn FleetDiscovery>,
        lb_api: Arc<dyn LoadBalancerApi>,
        blobs: Arc<dyn BlobStore>,
        connector: Arc<dyn HostConnector>,
        recipes: RecipeRegistry,
        config: RollConfig,
    ) -> Self {
        let drain =
            DrainCoordinator::new(lb_api).with_timings(DrainTimings::from_config(&config.timing));
        Self {
            discovery,
            drain,
            blobs,
            connector,
            recipes,
            config,
            cancel: CancelToken::never(),
        }
    }

    /// Observe `token` at instance boundaries: a cancelled rollout
    /// finishes the instance in flight and aborts the rest.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    fn layout_for(&self, app: &str) -> ReleaseLayout {
        ReleaseLayout::for_app(app, &self.config.release.root, &self.config.release.staging_root)
    }

    /// Roll a new release (or config) across every instance of `app`
    /// in `environment`.
    ///
    /// All preconditions — recipe lookup, input exclusivity, config
    /// validation, target resolution, artifact staging — are checked
    /// before any instance is touched.
    pub async fn deploy(
        &self,
        app: &str,
        environment: &str,
        source: DeploySource,
    ) -> OrchestratorResult<RolloutReport> {
        let recipe = self
            .recipes
            .get(app)
            .ok_or_else(|| OrchestratorError::RecipeNotFound(app.to_string()))?;

        if let DeploySource::Config(config) = &source {
            recipe
                .validate(config)
                .map_err(|source| OrchestratorError::InvalidConfig {
                    app: app.to_string(),
                    source,
                })?;
        }

        let plan = RollingUpdatePlan::resolve(self.discovery.as_ref(), app, environment).await?;

        // The artifact is fetched once, before the first instance, so a
        // bad reference can never fail a half-rolled fleet.
        let (staged, config) = match &source {
            DeploySource::Artifact(reference) => {
                (Some(self.stage_artifact(app, reference).await?), None)
            }
            DeploySource::Config(config) => (None, Some(config)),
        };

        info!(app, environment, "starting rolling deploy");
        self.run_rollout(
            &plan,
            Operation::Deploy {
                recipe,
                artifact: staged.as_deref(),
                config,
            },
        )
        .await
    }

    /// Convenience over [`Orchestrator::deploy`] for callers holding
    /// two optional inputs, enforcing their mutual exclusivity.
    pub async fn deploy_with(
        &self,
        app: &str,
        environment: &str,
        artifact: Option<String>,
        config: Option<serde_json::Value>,
    ) -> OrchestratorResult<RolloutReport> {
        let source = match (artifact, config) {
            (Some(_), Some(_)) => return Err(OrchestratorError::ConflictingDeployInputs),
            (Some(reference), None) => DeploySource::Artifact(reference),
            (None, Some(config)) => DeploySource::Config(config),
            (None, None) => return Err(OrchestratorError::MissingDeploySource),
        };
        self.deploy(app, environment, source).await
    }

    /// Restart `app`'s service across every instance in `environment`,
    /// cycling each through the same drain/restore sequence as a
    /// deploy.
    pub async fn restart(
        &self,
        app: &str,
        environment: &str,
    ) -> OrchestratorResult<RolloutReport> {
        let recipe = self
            .recipes
            .get(app)
            .ok_or_else(|| OrchestratorError::RecipeNotFound(app.to_string()))?;
        let plan = RollingUpdatePlan::resolve(self.discovery.as_ref(), app, environment).await?;

        info!(app, environment, "starting rolling restart");
        self.run_rollout(&plan, Operation::Restart { recipe }).await
    }

    /// Report the deployed version on every instance of `app` in
    /// `environment`. Read-only: no instance leaves rotation.
    pub async fn show_version(
        &self,
        app: &str,
        environment: &str,
    ) -> OrchestratorResult<Vec<(Instance, String)>> {
        let recipe = self
            .recipes
            .get(app)
            .ok_or_else(|| OrchestratorError::RecipeNotFound(app.to_string()))?;
        let instances = plan::target_instances(self.discovery.as_ref(), app, environment).await?;
        let layout = self.layout_for(app);

        let mut versions = Vec::with_capacity(instances.len());
        for instance in instances {
            let version = self
                .read_version(&instance, recipe.as_ref(), &layout)
                .await
                .map_err(|source| OrchestratorError::VersionReport {
                    instance: instance.id.clone(),
                    source,
                })?;
            versions.push((instance, version));
        }
        Ok(versions)
    }

    async fn read_version(
        &self,
        instance: &Instance,
        recipe: &dyn Recipe,
        layout: &ReleaseLayout,
    ) -> Result<String, StageError> {
        let host = self.connector.connect(instance).await?;
        Ok(recipe.version(host.as_ref(), layout).await?)
    }

    /// Recent artifact references for `app`, newest build weeks first.
    pub async fn list_artifacts(&self, app: &str, weeks: u32) -> OrchestratorResult<Vec<String>> {
        Ok(self.blobs.list_recent(app, weeks).await?)
    }

    async fn stage_artifact(&self, app: &str, reference: &str) -> OrchestratorResult<PathBuf> {
        let staging_error = |detail: CloudError| OrchestratorError::ArtifactStaging {
            reference: reference.to_string(),
            source: detail,
        };

        let dir = std::env::temp_dir().join(format!(".rollfleet-{app}"));
        std::fs::create_dir_all(&dir)
            .map_err(|e| staging_error(CloudError::Request(e.to_string())))?;

        info!(%reference, "staging artifact locally");
        self.blobs
            .fetch(reference, &dir)
            .await
            .map_err(staging_error)
    }

    /// The sequential per-instance cycle. Exactly one instance is out
    /// of rotation at any point; a fatal failure leaves that instance
    /// out and aborts the queue behind it.
    async fn run_rollout(
        &self,
        plan: &RollingUpdatePlan,
        op: Operation<'_>,
    ) -> OrchestratorResult<RolloutReport> {
        let layout = self.layout_for(&plan.app);
        let mut outcomes: Vec<InstanceOutcome> =
            plan.instances.iter().map(InstanceOutcome::pending).collect();

        for (idx, instance) in plan.instances.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(
                    app = %plan.app,
                    instance = %instance.id,
                    "cancellation requested; aborting remaining instances"
                );
                for outcome in &mut outcomes[idx..] {
                    outcome.stage = Stage::Aborted;
                }
                return Err(OrchestratorError::Cancelled {
                    app: plan.app.clone(),
                    environment: plan.environment.clone(),
                    instance: instance.id.clone(),
                });
            }

            info!(
                instance = %instance,
                position = idx + 1,
                of = plan.instances.len(),
                operation = op.stage(),
                "cycling instance"
            );

            outcomes[idx].stage = Stage::Draining;
            self.drain
                .drain_all(instance, &plan.load_balancers, &self.cancel)
                .await;

            outcomes[idx].stage = Stage::Mutating;
            if let Err(source) = self.mutate(instance, &layout, &op).await {
                // The instance is broken and out of rotation; restoring
                // it would route traffic to a bad release. Leave it out
                // and stop.
                error!(
                    app = %plan.app,
                    instance = %instance.id,
                    error = %source,
                    "mutation failed; instance left out of rotation"
                );
                outcomes[idx].stage = Stage::Failed;
                for outcome in &mut outcomes[idx + 1..] {
                    outcome.stage = Stage::Aborted;
                }
                return Err(OrchestratorError::Instance {
                    app: plan.app.clone(),
                    environment: plan.environment.clone(),
                    instance: instance.id.clone(),
                    stage: Stage::Mutating,
                    source,
                });
            }

            outcomes[idx].stage = Stage::Restoring;
            if let Err(source) = self
                .drain
                .restore_all(instance, &plan.load_balancers)
                .await
            {
                error!(
                    app = %plan.app,
                    instance = %instance.id,
                    error = %source,
                    "restore failed; halting rollout"
                );
                outcomes[idx].stage = Stage::Failed;
                for outcome in &mut outcomes[idx + 1..] {
                    outcome.stage = Stage::Aborted;
                }
                return Err(OrchestratorError::Instance {
                    app: plan.app.clone(),
                    environment: plan.environment.clone(),
                    instance: instance.id.clone(),
                    stage: Stage::Restoring,
                    source: StageError::Restore(source),
                });
            }

            outcomes[idx].stage = Stage::Done;
            info!(instance = %instance.id, "instance back in rotation");
        }

        info!(app = %plan.app, environment = %plan.environment, "rolling workflow complete");
        Ok(RolloutReport {
            app: plan.app.clone(),
            environment: plan.environment.clone(),
            outcomes,
        })
    }

    async fn mutate(
        &self,
        instance: &Instance,
        layout: &ReleaseLayout,
        op: &Operation<'_>,
    ) -> Result<(), StageError> {
        let host = self.connector.connect(instance).await?;
        match op {
            Operation::Deploy {
                recipe,
                artifact,
                config,
            } => {
                recipe
                    .deploy(DeployContext {
                        host: host.as_ref(),
                        layout,
                        artifact: *artifact,
                        config: *config,
                        owner: &self.config.release.owner,
                    })
                    .await?
            }
            Operation::Restart { recipe } => recipe.restart(host.as_ref(), layout).await?,
        }
        Ok(())
    }
}
