//! Per-app path derivations on a target host.

/// The on-disk release layout for one application on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLayout {
    app: String,
    base_dir: String,
    staging_dir: String,
}

impl ReleaseLayout {
    /// Layout for `app` under `root`, staging uploads under
    /// `staging_root`.
    pub fn for_app(app: &str, root: &str, staging_root: &str) -> Self {
        Self {
            app: app.to_string(),
            base_dir: format!("{}/{}", root.trim_end_matches('/'), app),
            staging_dir: format!("{}/.rollfleet-{}", staging_root.trim_end_matches('/'), app),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    /// The `curr` release slot.
    pub fn curr_dir(&self) -> String {
        format!("{}/releases/curr", self.base_dir)
    }

    /// The `prev` release slot (rollback generation).
    pub fn prev_dir(&self) -> String {
        format!("{}/releases/prev", self.base_dir)
    }

    /// The `current` symlink. Always points at one of the two slots on
    /// a deployed target.
    pub fn current_link(&self) -> String {
        format!("{}/current", self.base_dir)
    }

    /// App-owned config directory. Rotation never touches it.
    pub fn config_dir(&self) -> String {
        format!("{}/config", self.base_dir)
    }

    /// Per-app upload staging directory on the target.
    pub fn staging_dir(&self) -> &str {
        &self.staging_dir
    }

    /// Path of the app's version file, read through `current`.
    pub fn version_file(&self) -> String {
        format!("{}/current/version.txt", self.base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_derive_from_root_and_app() {
        let layout = ReleaseLayout::for_app("demoapp", "/var/www/apps", "/tmp");
        assert_eq!(layout.base_dir(), "/var/www/apps/demoapp");
        assert_eq!(layout.curr_dir(), "/var/www/apps/demoapp/releases/curr");
        assert_eq!(layout.prev_dir(), "/var/www/apps/demoapp/releases/prev");
        assert_eq!(layout.current_link(), "/var/www/apps/demoapp/current");
        assert_eq!(layout.config_dir(), "/var/www/apps/demoapp/config");
        assert_eq!(layout.staging_dir(), "/tmp/.rollfleet-demoapp");
        assert_eq!(
            layout.version_file(),
            "/var/www/apps/demoapp/current/version.txt"
        );
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let layout = ReleaseLayout::for_app("api", "/srv/apps/", "/var/tmp/");
        assert_eq!(layout.base_dir(), "/srv/apps/api");
        assert_eq!(layout.staging_dir(), "/var/tmp/.rollfleet-api");
    }
}
