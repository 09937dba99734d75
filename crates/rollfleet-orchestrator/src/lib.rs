//! rollfleet-orchestrator — the rolling-update workflow driver.
//!
//! Drives "deploy" and "restart" workflows across an ordered instance
//! list while preserving the fleet-availability invariant: **at most
//! one instance is out of rotation at any time**. Instances are
//! processed strictly sequentially; within one instance, the
//! drain → mutate → restore order is fixed.
//!
//! Failure policy: drain-side failures are absorbed (the instance is
//! about to be mutated anyway); mutate- and restore-side failures are
//! fatal and abort the remaining queue, leaving the failing instance
//! out of rotation rather than returning a broken instance to traffic.

pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod stage;

pub use error::{OrchestratorError, OrchestratorResult, StageError};
pub use orchestrator::{DeploySource, Orchestrator};
pub use plan::RollingUpdatePlan;
pub use stage::{InstanceOutcome, RolloutReport, Stage};
