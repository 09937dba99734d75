//! rollfleet-recipe — the per-application operation contract.
//!
//! A [`Recipe`] is the pluggable implementation of deploy, restart,
//! config validation and version reporting for one application. The
//! orchestrator drives recipes through the [`RecipeRegistry`], an
//! explicit name → recipe mapping populated at startup.
//!
//! [`ArchiveRecipe`] covers the common case: a gzipped tarball rotated
//! into the two-slot release layout, config files linked in from the
//! app's config dir, and a system service restart.

pub mod archive;
pub mod recipe;
pub mod registry;

pub use archive::ArchiveRecipe;
pub use recipe::{ConfigValidationError, DeployContext, Recipe, RecipeError};
pub use registry::RecipeRegistry;
