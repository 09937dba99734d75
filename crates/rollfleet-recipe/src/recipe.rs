//! The recipe capability set.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use rollfleet_core::{HostError, RemoteHost};
use rollfleet_release::{ReleaseLayout, RotationError};

/// A config rejected by a recipe, naming the offending field.
#[derive(Debug, Error)]
#[error("field {field}: {reason}")]
pub struct ConfigValidationError {
    pub field: String,
    pub reason: String,
}

impl ConfigValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from a recipe's mutating operations.
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error(transparent)]
    Host(#[from] HostError),

    /// A deploy was invoked without the input this recipe needs.
    #[error("recipe {recipe} requires an artifact reference to deploy")]
    MissingArtifact { recipe: String },

    #[error("{0}")]
    Other(String),
}

/// Everything a recipe needs to deploy onto one target host.
pub struct DeployContext<'a> {
    /// The target host, already connected.
    pub host: &'a dyn RemoteHost,
    /// The app's release layout on the target.
    pub layout: &'a ReleaseLayout,
    /// Locally staged artifact archive, when deploying from an
    /// artifact reference.
    pub artifact: Option<&'a Path>,
    /// Custom deploy config, when deploying from a config document.
    pub config: Option<&'a serde_json::Value>,
    /// `user:group` ownership for the deployed tree.
    pub owner: &'a str,
}

/// Per-application deploy/restart behavior.
///
/// One recipe exists per application; it is stateless between
/// invocations. The orchestrator binds each call to a single target
/// host.
#[async_trait]
pub trait Recipe: Send + Sync {
    /// The application name this recipe is registered under.
    fn name(&self) -> &str;

    /// Check a custom deploy config before any instance is touched.
    fn validate(&self, config: &serde_json::Value) -> Result<(), ConfigValidationError>;

    /// Deploy onto one target host.
    async fn deploy(&self, ctx: DeployContext<'_>) -> Result<(), RecipeError>;

    /// Restart the application's service on one target host.
    async fn restart(&self, host: &dyn RemoteHost, layout: &ReleaseLayout)
        -> Result<(), RecipeError>;

    /// Report the deployed version on one target host.
    async fn version(
        &self,
        host: &dyn RemoteHost,
        layout: &ReleaseLayout,
    ) -> Result<String, RecipeError>;
}
