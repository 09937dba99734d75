//! Orchestrator error taxonomy.

use thiserror::Error;

use rollfleet_core::{CloudError, HostError};
use rollfleet_drain::DrainError;
use rollfleet_recipe::{ConfigValidationError, RecipeError};

use crate::stage::Stage;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// What went wrong inside one instance's drain/mutate/restore cycle.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Connect(#[from] HostError),

    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error(transparent)]
    Restore(#[from] DrainError),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no recipe registered for application {0}")]
    RecipeNotFound(String),

    /// Discovery found no instance tagged with the app in the
    /// environment. Always fatal: an empty rollout is a targeting
    /// mistake, not a success.
    #[error("no instances serve {app} in {environment}")]
    NoTargetInstances { app: String, environment: String },

    #[error("deploy takes an artifact reference or a config, not both")]
    ConflictingDeployInputs,

    #[error("deploy requires an artifact reference or a config")]
    MissingDeploySource,

    #[error("invalid config for {app}: {source}")]
    InvalidConfig {
        app: String,
        #[source]
        source: ConfigValidationError,
    },

    #[error("failed to stage artifact {reference}: {source}")]
    ArtifactStaging {
        reference: String,
        #[source]
        source: CloudError,
    },

    /// A fatal per-instance failure. The named instance is left out of
    /// rotation and every instance behind it was aborted untouched.
    #[error("{app}/{environment}: {stage} failed on {instance}: {source}")]
    Instance {
        app: String,
        environment: String,
        instance: String,
        stage: Stage,
        #[source]
        source: StageError,
    },

    /// Cancellation observed at an instance boundary; the named
    /// instance and everything behind it were never started.
    #[error("{app}/{environment}: rollout cancelled before {instance}")]
    Cancelled {
        app: String,
        environment: String,
        instance: String,
    },

    #[error("failed to read version from {instance}: {source}")]
    VersionReport {
        instance: String,
        #[source]
        source: StageError,
    },

    #[error(transparent)]
    Cloud(#[from] CloudError),
}
