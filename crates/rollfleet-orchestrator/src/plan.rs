//! Target resolution: which instances and load balancers a rollout
//! touches.

use tracing::{info, warn};

use rollfleet_core::{FleetDiscovery, Instance, LoadBalancer};

use crate::error::{OrchestratorError, OrchestratorResult};

/// A resolved rollout target set. Instance order is the order targets
/// are cycled in.
#[derive(Debug, Clone)]
pub struct RollingUpdatePlan {
    pub app: String,
    pub environment: String,
    pub instances: Vec<Instance>,
    pub load_balancers: Vec<LoadBalancer>,
}

impl RollingUpdatePlan {
    /// Resolve the instances tagged with `app` in `environment` and the
    /// load balancers serving them.
    ///
    /// An empty instance set is fatal. An empty load-balancer set is
    /// not: the rollout proceeds "rudely", mutating instances while
    /// they keep serving traffic.
    pub async fn resolve(
        discovery: &dyn FleetDiscovery,
        app: &str,
        environment: &str,
    ) -> OrchestratorResult<Self> {
        let instances = target_instances(discovery, app, environment).await?;
        let load_balancers = discovery.list_load_balancers(app, environment).await?;

        if load_balancers.is_empty() {
            warn!(
                app,
                environment,
                "no load balancers serve this app; rolling rudely without drain/restore"
            );
        }
        info!(
            app,
            environment,
            instances = instances.len(),
            load_balancers = load_balancers.len(),
            "resolved rollout targets"
        );

        Ok(Self {
            app: app.to_string(),
            environment: environment.to_string(),
            instances,
            load_balancers,
        })
    }
}

/// The instances tagged with `app` in `environment`, in discovery
/// order. Errors when none are found.
pub(crate) async fn target_instances(
    discovery: &dyn FleetDiscovery,
    app: &str,
    environment: &str,
) -> OrchestratorResult<Vec<Instance>> {
    let instances: Vec<Instance> = discovery
        .list_instances(environment)
        .await?
        .into_iter()
        .filter(|i| i.has_app(app))
        .collect();

    if instances.is_empty() {
        return Err(OrchestratorError::NoTargetInstances {
            app: app.to_string(),
            environment: environment.to_string(),
        });
    }
    Ok(instances)
}
