//! rollfleet-core — shared types and contracts for the rollfleet workspace.
//!
//! Everything the rollout machinery agrees on lives here:
//!
//! - **`types`** — fleet entity models (`Instance`, `LoadBalancer`,
//!   `InstanceHealthState`)
//! - **`cloud`** — collaborator contracts for fleet discovery, the
//!   load-balancer control plane, and the artifact blob store
//! - **`remote`** — the remote-host execution contract used by release
//!   rotation and recipes
//! - **`config`** — `rollfleet.toml` parsing with defaults
//! - **`cancel`** — the cancellation token threaded through workflows
//! - **`memory`** — in-memory collaborator implementations, shared by
//!   every downstream crate's tests

pub mod cancel;
pub mod cloud;
pub mod config;
pub mod memory;
pub mod remote;
pub mod types;

pub use cancel::{CancelHandle, CancelToken};
pub use cloud::{BlobStore, CloudError, CloudResult, FleetDiscovery, LoadBalancerApi};
pub use config::RollConfig;
pub use remote::{HostConnector, HostError, HostResult, RemoteHost};
pub use types::{DrainAttributes, Instance, InstanceHealthState, LoadBalancer, APPS_TAG, ENVIRONMENT_TAG};
