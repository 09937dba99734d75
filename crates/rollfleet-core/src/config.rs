//! `rollfleet.toml` configuration.
//!
//! Every section is optional; missing values fall back to the defaults
//! the fleet has always used. No process-wide state — the parsed config
//! is threaded into each component's constructor.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {detail}")]
    Read { path: String, detail: String },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },
}

/// Top-level deploy-tool configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollConfig {
    #[serde(default)]
    pub fleet: FleetSection,
    #[serde(default)]
    pub release: ReleaseSection,
    #[serde(default)]
    pub artifacts: ArtifactSection,
    #[serde(default)]
    pub timing: TimingSection,
    /// Recipes to register at startup.
    #[serde(default, rename = "recipe")]
    pub recipes: Vec<RecipeSection>,
}

impl RollConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }
}

/// SSH access to fleet instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSection {
    /// User for ssh/scp connections to instances.
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            ssh_user: default_ssh_user(),
        }
    }
}

/// Release layout on target hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSection {
    /// Base directory under which each app's release tree lives.
    #[serde(default = "default_release_root")]
    pub root: String,
    /// `user:group` ownership applied to deployed trees.
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Root for per-app upload staging directories on targets.
    #[serde(default = "default_staging_root")]
    pub staging_root: String,
}

impl Default for ReleaseSection {
    fn default() -> Self {
        Self {
            root: default_release_root(),
            owner: default_owner(),
            staging_root: default_staging_root(),
        }
    }
}

/// Artifact blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSection {
    /// Bucket holding build artifacts, keyed `{app}/{YYYY.WW}/...`.
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

impl Default for ArtifactSection {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
        }
    }
}

/// Drain/restore timing knobs. Durations are strings like "5s",
/// "300s", "500ms".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSection {
    /// Interval between health polls while restoring an instance.
    #[serde(default = "default_restore_poll")]
    pub restore_poll_interval: String,
    /// Upper bound on the restore health wait.
    #[serde(default = "default_restore_max")]
    pub restore_max_wait: String,
    /// Settle delay between the drain window elapsing and the final
    /// health re-check.
    #[serde(default = "default_drain_settle")]
    pub drain_settle_delay: String,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            restore_poll_interval: default_restore_poll(),
            restore_max_wait: default_restore_max(),
            drain_settle_delay: default_drain_settle(),
        }
    }
}

impl TimingSection {
    pub fn restore_poll_interval(&self) -> Duration {
        parse_duration(&self.restore_poll_interval).unwrap_or(Duration::from_secs(5))
    }

    pub fn restore_max_wait(&self) -> Duration {
        parse_duration(&self.restore_max_wait).unwrap_or(Duration::from_secs(300))
    }

    pub fn drain_settle_delay(&self) -> Duration {
        parse_duration(&self.drain_settle_delay).unwrap_or(Duration::from_secs(5))
    }
}

/// A recipe registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeSection {
    /// Application name the recipe is registered under.
    pub name: String,
    /// System service restarted after deploy. Defaults to the app name.
    pub service: Option<String>,
    /// Symlinks created from the app's config dir into each release.
    #[serde(default)]
    pub links: Vec<ConfigLink>,
}

/// One config-file symlink: `{base}/config/{source}` → `{release}/{dest}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLink {
    pub source: String,
    pub dest: String,
}

fn default_ssh_user() -> String {
    "deploy".to_string()
}

fn default_release_root() -> String {
    "/var/www/apps".to_string()
}

fn default_owner() -> String {
    "ci:www-data".to_string()
}

fn default_staging_root() -> String {
    "/tmp".to_string()
}

fn default_bucket() -> String {
    "my-artifacts".to_string()
}

fn default_restore_poll() -> String {
    "5s".to_string()
}

fn default_restore_max() -> String {
    "300s".to_string()
}

fn default_drain_settle() -> String {
    "5s".to_string()
}

/// Parse a duration string like "5s", "500ms", "2m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_empty_config() {
        let cfg: RollConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.fleet.ssh_user, "deploy");
        assert_eq!(cfg.release.root, "/var/www/apps");
        assert_eq!(cfg.release.owner, "ci:www-data");
        assert_eq!(cfg.artifacts.bucket, "my-artifacts");
        assert_eq!(
            cfg.timing.restore_poll_interval(),
            Duration::from_secs(5)
        );
        assert_eq!(cfg.timing.restore_max_wait(), Duration::from_secs(300));
        assert!(cfg.recipes.is_empty());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg: RollConfig = toml::from_str(
            r#"
[release]
root = "/srv/apps"

[timing]
restore_max_wait = "120s"
"#,
        )
        .unwrap();
        assert_eq!(cfg.release.root, "/srv/apps");
        assert_eq!(cfg.release.owner, "ci:www-data");
        assert_eq!(cfg.timing.restore_max_wait(), Duration::from_secs(120));
        assert_eq!(cfg.timing.restore_poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn recipes_parse_with_links() {
        let cfg: RollConfig = toml::from_str(
            r#"
[[recipe]]
name = "demoapp"

[[recipe.links]]
source = "config.yml"
dest = "config.yml"

[[recipe]]
name = "api"
service = "api-server"
"#,
        )
        .unwrap();
        assert_eq!(cfg.recipes.len(), 2);
        assert_eq!(cfg.recipes[0].name, "demoapp");
        assert_eq!(cfg.recipes[0].links.len(), 1);
        assert_eq!(cfg.recipes[1].service.as_deref(), Some("api-server"));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[fleet]\nssh_user = \"ops\"").unwrap();
        let cfg = RollConfig::from_file(f.path()).unwrap();
        assert_eq!(cfg.fleet.ssh_user, "ops");
    }

    #[test]
    fn from_file_missing_is_read_error() {
        let err = RollConfig::from_file(Path::new("/nonexistent/rollfleet.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("nope"), None);
    }
}
