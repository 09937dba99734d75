//! Drain/restore coordination per (instance, load balancer) pair.

use std::time::Duration;

use futures::future::{join_all, try_join_all};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use rollfleet_core::cancel::{wait_or_cancel, CancelToken};
use rollfleet_core::config::TimingSection;
use rollfleet_core::{CloudError, Instance, InstanceHealthState, LoadBalancer, LoadBalancerApi};

/// Errors from drain/restore operations.
#[derive(Debug, Error)]
pub enum DrainError {
    /// The instance never reached `InService` within the bounded wait.
    /// Fatal: the instance is left out of rotation and the rollout
    /// halts rather than silently shrinking serving capacity.
    #[error(
        "instance {instance} still {state} on {lb} after {waited_secs}s; \
         not returning to service"
    )]
    UnhealthyAfterRestore {
        lb: String,
        instance: String,
        state: InstanceHealthState,
        waited_secs: u64,
    },

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// Timing knobs, injectable for tests.
#[derive(Debug, Clone, Copy)]
pub struct DrainTimings {
    /// Interval between health polls while restoring.
    pub restore_poll_interval: Duration,
    /// Upper bound on the restore health wait.
    pub restore_max_wait: Duration,
    /// Settle delay between the drain window elapsing and the final
    /// health re-check.
    pub drain_settle_delay: Duration,
}

impl Default for DrainTimings {
    fn default() -> Self {
        Self {
            restore_poll_interval: Duration::from_secs(5),
            restore_max_wait: Duration::from_secs(300),
            drain_settle_delay: Duration::from_secs(5),
        }
    }
}

impl DrainTimings {
    pub fn from_config(timing: &TimingSection) -> Self {
        Self {
            restore_poll_interval: timing.restore_poll_interval(),
            restore_max_wait: timing.restore_max_wait(),
            drain_settle_delay: timing.drain_settle_delay(),
        }
    }
}

/// Removes instances from load-balancer rotation and returns them,
/// blocking until each transition is observably complete.
pub struct DrainCoordinator {
    lb_api: std::sync::Arc<dyn LoadBalancerApi>,
    timings: DrainTimings,
}

impl DrainCoordinator {
    pub fn new(lb_api: std::sync::Arc<dyn LoadBalancerApi>) -> Self {
        Self {
            lb_api,
            timings: DrainTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: DrainTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Remove `instance` from `lb` and wait out the connection-draining
    /// window. Best-effort: a drain that never reaches `OutOfService`
    /// is a warning, not an error.
    pub async fn drain(
        &self,
        instance: &Instance,
        lb: &LoadBalancer,
        token: &CancelToken,
    ) -> Result<(), DrainError> {
        // Draining config is read fresh, never trusted from discovery.
        let attrs = self.lb_api.describe_attributes(&lb.name).await?;
        let timeout_secs = attrs.effective_timeout_secs();

        info!(instance = %instance.id, lb = %lb.name, "removing instance from load balancer");
        self.lb_api.deregister(&lb.name, &instance.id).await?;

        let state = match self.lb_api.describe_health(&lb.name, &instance.id).await {
            Ok(state) => state,
            Err(CloudError::InstanceNotRegistered { .. }) => {
                // Already out of rotation — nothing to drain.
                info!(instance = %instance.id, lb = %lb.name, "deregistration not required");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if timeout_secs > 0 && state != InstanceHealthState::OutOfService {
            info!(
                instance = %instance.id,
                lb = %lb.name,
                secs = timeout_secs,
                "waiting for connection draining"
            );
            if wait_or_cancel(token, Duration::from_secs(timeout_secs)).await {
                debug!(instance = %instance.id, "drain wait cut short by cancellation");
            } else {
                wait_or_cancel(token, self.timings.drain_settle_delay).await;
            }

            match self.lb_api.describe_health(&lb.name, &instance.id).await {
                Ok(InstanceHealthState::OutOfService) => {
                    info!(instance = %instance.id, lb = %lb.name, "instance deregistered");
                }
                Ok(state) => {
                    warn!(
                        instance = %instance.id,
                        lb = %lb.name,
                        %state,
                        "instance did not finish draining in time; continuing"
                    );
                }
                Err(CloudError::InstanceNotRegistered { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Register `instance` with `lb` and poll until it is `InService`.
    /// Fails with [`DrainError::UnhealthyAfterRestore`] if the bounded
    /// wait elapses first.
    pub async fn restore(&self, instance: &Instance, lb: &LoadBalancer) -> Result<(), DrainError> {
        info!(instance = %instance.id, lb = %lb.name, "registering instance with load balancer");
        self.lb_api.register(&lb.name, &instance.id).await?;

        let started = Instant::now();
        let deadline = started + self.timings.restore_max_wait;
        loop {
            sleep(self.timings.restore_poll_interval).await;

            let state = match self.lb_api.describe_health(&lb.name, &instance.id).await {
                Ok(state) => state,
                // The control plane may briefly not know a freshly
                // registered instance; keep polling.
                Err(CloudError::InstanceNotRegistered { .. }) => InstanceHealthState::Unknown,
                Err(e) => return Err(e.into()),
            };

            if state == InstanceHealthState::InService {
                info!(
                    instance = %instance.id,
                    lb = %lb.name,
                    waited_secs = started.elapsed().as_secs(),
                    "instance back in service"
                );
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(DrainError::UnhealthyAfterRestore {
                    lb: lb.name.clone(),
                    instance: instance.id.clone(),
                    state,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            debug!(instance = %instance.id, lb = %lb.name, %state, "waiting for instance health");
        }
    }

    /// Drain `instance` from every load balancer concurrently.
    /// Per-LB failures are absorbed and logged — favoring progress,
    /// since the instance is about to be mutated regardless.
    pub async fn drain_all(
        &self,
        instance: &Instance,
        load_balancers: &[LoadBalancer],
        token: &CancelToken,
    ) {
        let results = join_all(
            load_balancers
                .iter()
                .map(|lb| async move { (lb, self.drain(instance, lb, token).await) }),
        )
        .await;
        for (lb, result) in results {
            if let Err(e) = result {
                warn!(
                    instance = %instance.id,
                    lb = %lb.name,
                    error = %e,
                    "drain failed; continuing"
                );
            }
        }
    }

    /// Restore `instance` into every load balancer concurrently. The
    /// first failure propagates — failing to restore traffic is never
    /// safe to ignore.
    pub async fn restore_all(
        &self,
        instance: &Instance,
        load_balancers: &[LoadBalancer],
    ) -> Result<(), DrainError> {
        try_join_all(
            load_balancers
                .iter()
                .map(|lb| self.restore(instance, lb)),
        )
        .await?;
        Ok(())
    }
}
