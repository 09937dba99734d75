//! Fleet entity models.
//!
//! These are immutable descriptions of externally-owned resources,
//! constructed fresh per workflow invocation by the discovery
//! collaborator and never persisted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The tag key whose comma-separated value lists the applications an
/// instance or load balancer serves.
pub const APPS_TAG: &str = "Apps";

/// The tag key naming the environment (dev/stg/prd) a resource belongs to.
pub const ENVIRONMENT_TAG: &str = "Environment";

/// A compute instance in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    /// Control-plane identifier (e.g. an EC2 instance id).
    pub id: String,
    /// Private network address used for remote execution.
    pub private_ip: String,
    /// Instance tags, key → value.
    pub tags: HashMap<String, String>,
}

impl Instance {
    pub fn new(
        id: impl Into<String>,
        private_ip: impl Into<String>,
        tags: HashMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            private_ip: private_ip.into(),
            tags,
        }
    }

    /// Whether this instance serves the given application, per its
    /// comma-separated `Apps` tag.
    pub fn has_app(&self, app: &str) -> bool {
        self.tags
            .get(APPS_TAG)
            .map(|apps| apps.split(',').any(|a| a.trim() == app))
            .unwrap_or(false)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.private_ip)
    }
}

/// A load balancer fronting some subset of the fleet.
///
/// Read-only to the core; discovered per workflow invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancer {
    pub name: String,
    pub tags: HashMap<String, String>,
    /// Whether connection draining was enabled at discovery time.
    pub draining_enabled: bool,
    /// Draining timeout in seconds at discovery time.
    pub draining_timeout_secs: u64,
}

impl LoadBalancer {
    /// Whether this load balancer fronts the given app/environment
    /// pair, per its `Apps` and `Environment` tags.
    pub fn serves(&self, app: &str, environment: &str) -> bool {
        let env_matches = self
            .tags
            .get(ENVIRONMENT_TAG)
            .is_some_and(|e| e == environment);
        let app_matches = self
            .tags
            .get(APPS_TAG)
            .is_some_and(|apps| apps.split(',').any(|a| a.trim() == app));
        env_matches && app_matches
    }
}

/// Health of an instance as reported by a load balancer.
///
/// Always re-fetched from the control plane, never cached across
/// polls — it reflects an external system's live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceHealthState {
    InService,
    OutOfService,
    Unknown,
}

impl fmt::Display for InstanceHealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InService => "InService",
            Self::OutOfService => "OutOfService",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// A load balancer's connection-draining configuration, read fresh
/// from the control plane at drain time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainAttributes {
    pub draining_enabled: bool,
    pub timeout_secs: u64,
}

impl DrainAttributes {
    /// The draining window to respect: the configured timeout, or zero
    /// when draining is disabled.
    pub fn effective_timeout_secs(&self) -> u64 {
        if self.draining_enabled {
            self.timeout_secs
        } else {
            0
        }
    }
}
