//! Collaborator contracts for the cloud control plane.
//!
//! The rollout machinery never talks to a provider SDK directly; it
//! goes through these traits so the orchestrator can be driven against
//! the in-memory implementations in [`crate::memory`] and against the
//! AWS-CLI-backed ones in `rollfleet-aws`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::{DrainAttributes, Instance, InstanceHealthState, LoadBalancer};

/// Result type alias for control-plane operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors surfaced by the cloud collaborators.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The load balancer does not know this instance. Drain treats
    /// this as already-drained success.
    #[error("instance {instance} is not registered with load balancer {lb}")]
    InstanceNotRegistered { lb: String, instance: String },

    #[error("load balancer not found: {0}")]
    LoadBalancerNotFound(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("control plane request failed: {0}")]
    Request(String),

    #[error("malformed control plane response: {0}")]
    Malformed(String),
}

/// Fleet discovery — resolves the instances and load balancers for an
/// application/environment pair.
#[async_trait]
pub trait FleetDiscovery: Send + Sync {
    /// All running instances in the environment, in discovery order.
    async fn list_instances(&self, environment: &str) -> CloudResult<Vec<Instance>>;

    /// The load balancers fronting the given app in the environment.
    async fn list_load_balancers(
        &self,
        app: &str,
        environment: &str,
    ) -> CloudResult<Vec<LoadBalancer>>;
}

/// Load-balancer membership and health control plane.
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn deregister(&self, lb: &str, instance_id: &str) -> CloudResult<()>;

    async fn register(&self, lb: &str, instance_id: &str) -> CloudResult<()>;

    /// Live health of an instance as seen by the load balancer. Fails
    /// with [`CloudError::InstanceNotRegistered`] when the LB does not
    /// know the instance at all.
    async fn describe_health(
        &self,
        lb: &str,
        instance_id: &str,
    ) -> CloudResult<InstanceHealthState>;

    /// Connection-draining configuration, read fresh.
    async fn describe_attributes(&self, lb: &str) -> CloudResult<DrainAttributes>;
}

/// Artifact blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an artifact by reference into `dest_dir`, returning the
    /// local path of the staged file.
    async fn fetch(&self, reference: &str, dest_dir: &Path) -> CloudResult<PathBuf>;

    /// Recent artifact references for an app over a trailing window of
    /// weeks. Reporting only; not part of the rollout protocol.
    async fn list_recent(&self, app: &str, weeks: u32) -> CloudResult<Vec<String>>;
}
