//! Atomic two-slot artifact rotation.
//!
//! The live slot is whatever the `current` symlink resolves to. A
//! rotation moves the live slot's tree into `prev`, extracts the new
//! artifact into the vacated slot, and repoints `current` — so any
//! process reading `current` sees either the old release or the new
//! one, never a half-written tree.

use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use rollfleet_core::{HostError, RemoteHost};

use crate::layout::ReleaseLayout;

/// The step of a rotation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStep {
    /// Upload the artifact to the target's staging directory.
    Stage,
    /// Resolve the `current` pointer to find the live slot.
    ResolveCurrent,
    /// Move the live slot's tree into `prev`.
    RotatePrev,
    /// Create the deploy target directory.
    CreateTarget,
    /// Extract the artifact into the deploy target.
    Extract,
    /// Fix ownership of the deployed tree.
    SetOwner,
    /// Repoint `current` at the deploy target.
    Relink,
}

impl fmt::Display for RotationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stage => "stage upload",
            Self::ResolveCurrent => "resolve current pointer",
            Self::RotatePrev => "rotate prev slot",
            Self::CreateTarget => "create release dir",
            Self::Extract => "extract artifact",
            Self::SetOwner => "set ownership",
            Self::Relink => "update current pointer",
        };
        f.write_str(s)
    }
}

/// Errors from a release rotation. Both variants are fatal for the
/// instance being deployed; neither is retried automatically.
#[derive(Debug, Error)]
pub enum RotationError {
    /// The release layout has been mutated by something outside this
    /// system. No automatic recovery is attempted — silently
    /// overwriting risks data loss.
    #[error("release layout corrupt on {host}: {detail}")]
    CorruptLayout { host: String, detail: String },

    #[error("rotation failed on {host} at step \"{step}\": {source}")]
    Failed {
        step: RotationStep,
        host: String,
        #[source]
        source: HostError,
    },
}

/// Rotate a new artifact into the live slot of `layout` on `host`.
///
/// Returns the directory the release was deployed into. Leaves the
/// prior release in the `prev` slot (one rollback generation). The
/// old `current` pointer is removed only immediately before the new
/// one is created.
pub async fn rotate(
    host: &dyn RemoteHost,
    layout: &ReleaseLayout,
    staged_archive: &Path,
    owner: &str,
) -> Result<String, RotationError> {
    let addr = host.address().to_string();
    let fail = |step: RotationStep| {
        let host = addr.clone();
        move |source: HostError| RotationError::Failed { step, host, source }
    };

    let archive_name = staged_archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| RotationError::Failed {
            step: RotationStep::Stage,
            host: addr.clone(),
            source: HostError::Upload {
                host: addr.clone(),
                detail: format!("staged artifact has no file name: {}", staged_archive.display()),
            },
        })?;

    // Stage the archive on the target.
    let staging = layout.staging_dir();
    host.prepare_upload_dir(staging)
        .await
        .map_err(fail(RotationStep::Stage))?;
    host.upload(staged_archive, staging)
        .await
        .map_err(fail(RotationStep::Stage))?;
    let remote_archive = format!("{staging}/{archive_name}");

    // Resolve the live slot through the current pointer.
    let current = layout.current_link();
    let curr = layout.curr_dir();
    let prev = layout.prev_dir();

    let deploy_dir = if host
        .exists(&current)
        .await
        .map_err(fail(RotationStep::ResolveCurrent))?
    {
        if !host
            .is_symlink(&current)
            .await
            .map_err(fail(RotationStep::ResolveCurrent))?
        {
            return Err(RotationError::CorruptLayout {
                host: addr.clone(),
                detail: format!("{current} exists but is not a symlink"),
            });
        }
        let target = host
            .read_link(&current)
            .await
            .map_err(fail(RotationStep::ResolveCurrent))?;
        if target != curr && target != prev {
            return Err(RotationError::CorruptLayout {
                host: addr.clone(),
                detail: format!("{current} points outside the release slots: {target}"),
            });
        }
        target
    } else {
        debug!(host = %addr, app = layout.app(), "no current pointer; first deploy");
        curr.clone()
    };

    // Rotate the live slot into prev — unless the live slot *is* prev,
    // in which case moving it would delete the tree we are about to
    // deploy over.
    if deploy_dir != prev {
        host.remove(&prev)
            .await
            .map_err(fail(RotationStep::RotatePrev))?;
        if host
            .exists(&deploy_dir)
            .await
            .map_err(fail(RotationStep::RotatePrev))?
        {
            host.rename(&deploy_dir, &prev)
                .await
                .map_err(fail(RotationStep::RotatePrev))?;
            debug!(host = %addr, from = %deploy_dir, to = %prev, "rotated live slot to prev");
        }
    } else {
        debug!(host = %addr, "current points at prev; skipping prev rotation");
    }

    // Deploy the new release into the vacated slot.
    host.create_dir(&deploy_dir)
        .await
        .map_err(fail(RotationStep::CreateTarget))?;
    host.extract_archive(&remote_archive, &deploy_dir)
        .await
        .map_err(fail(RotationStep::Extract))?;
    host.chown_recursive(owner, &deploy_dir)
        .await
        .map_err(fail(RotationStep::SetOwner))?;

    // Swap the pointer. Removal happens only just before re-creation,
    // minimizing the window with no pointer at all.
    host.remove(&current)
        .await
        .map_err(fail(RotationStep::Relink))?;
    host.symlink(&deploy_dir, &current)
        .await
        .map_err(fail(RotationStep::Relink))?;

    if let Err(e) = host.remove(staging).await {
        warn!(host = %addr, error = %e, "failed to clean staging dir");
    }

    info!(host = %addr, app = layout.app(), release = %deploy_dir, "release rotated");
    Ok(deploy_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollfleet_core::memory::InMemoryHost;
    use std::io::Write;
    use std::path::PathBuf;

    fn layout() -> ReleaseLayout {
        ReleaseLayout::for_app("demo", "/apps", "/tmp")
    }

    fn artifact(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{content}").unwrap();
        path
    }

    #[tokio::test]
    async fn first_deploy_lands_in_curr() {
        let host = InMemoryHost::new("10.0.0.1");
        let dir = tempfile::tempdir().unwrap();
        let a = artifact(&dir, "build1.tar.gz", "release-A");

        let deployed = rotate(&host, &layout(), &a, "ci:www-data").await.unwrap();

        assert_eq!(deployed, "/apps/demo/releases/curr");
        assert_eq!(
            host.file_content("/apps/demo/releases/curr/payload").as_deref(),
            Some("release-A")
        );
        assert_eq!(
            host.link_target("/apps/demo/current").as_deref(),
            Some("/apps/demo/releases/curr")
        );
        assert!(!host.path_exists("/apps/demo/releases/prev"));
        // Ownership fixed on the deployed tree.
        assert!(host
            .commands()
            .contains(&"chown -R ci:www-data /apps/demo/releases/curr".to_string()));
    }

    #[tokio::test]
    async fn second_rotation_keeps_one_rollback_generation() {
        let host = InMemoryHost::new("10.0.0.1");
        let dir = tempfile::tempdir().unwrap();
        let a = artifact(&dir, "build1.tar.gz", "release-A");
        let b = artifact(&dir, "build2.tar.gz", "release-B");

        rotate(&host, &layout(), &a, "ci:www-data").await.unwrap();
        rotate(&host, &layout(), &b, "ci:www-data").await.unwrap();

        assert_eq!(
            host.file_content("/apps/demo/releases/curr/payload").as_deref(),
            Some("release-B")
        );
        assert_eq!(
            host.file_content("/apps/demo/releases/prev/payload").as_deref(),
            Some("release-A")
        );
        assert_eq!(
            host.link_target("/apps/demo/current").as_deref(),
            Some("/apps/demo/releases/curr")
        );
    }

    #[tokio::test]
    async fn rotating_the_same_artifact_twice_matches_single_application() {
        let host = InMemoryHost::new("10.0.0.1");
        let dir = tempfile::tempdir().unwrap();
        let a = artifact(&dir, "build1.tar.gz", "release-A");

        rotate(&host, &layout(), &a, "ci:www-data").await.unwrap();
        rotate(&host, &layout(), &a, "ci:www-data").await.unwrap();

        // Current still serves from curr; prev holds the first
        // rotation's tree (identical content by construction).
        assert_eq!(
            host.link_target("/apps/demo/current").as_deref(),
            Some("/apps/demo/releases/curr")
        );
        assert_eq!(
            host.file_content("/apps/demo/releases/curr/payload").as_deref(),
            Some("release-A")
        );
        assert_eq!(
            host.file_content("/apps/demo/releases/prev/payload").as_deref(),
            Some("release-A")
        );
    }

    #[tokio::test]
    async fn non_symlink_current_is_corrupt_layout() {
        let host = InMemoryHost::new("10.0.0.1");
        host.seed_file("/apps/demo/current", "not a link");
        let dir = tempfile::tempdir().unwrap();
        let a = artifact(&dir, "build1.tar.gz", "release-A");

        let err = rotate(&host, &layout(), &a, "ci:www-data").await.unwrap_err();
        assert!(matches!(err, RotationError::CorruptLayout { .. }));
        // Nothing deployed.
        assert!(!host.path_exists("/apps/demo/releases/curr"));
    }

    #[tokio::test]
    async fn stale_pointer_is_corrupt_layout() {
        let host = InMemoryHost::new("10.0.0.1");
        host.seed_symlink("/apps/demo/current", "/apps/demo/releases/2019-06-01");
        let dir = tempfile::tempdir().unwrap();
        let a = artifact(&dir, "build1.tar.gz", "release-A");

        let err = rotate(&host, &layout(), &a, "ci:www-data").await.unwrap_err();
        assert!(matches!(err, RotationError::CorruptLayout { .. }));
    }

    #[tokio::test]
    async fn live_prev_slot_is_deployed_in_place() {
        let host = InMemoryHost::new("10.0.0.1");
        host.seed_symlink("/apps/demo/current", "/apps/demo/releases/prev");
        host.seed_dir("/apps/demo/releases/prev");
        host.seed_file("/apps/demo/releases/prev/payload", "release-old");
        host.seed_dir("/apps/demo/releases/curr");
        host.seed_file("/apps/demo/releases/curr/payload", "release-older");
        let dir = tempfile::tempdir().unwrap();
        let b = artifact(&dir, "build2.tar.gz", "release-B");

        let deployed = rotate(&host, &layout(), &b, "ci:www-data").await.unwrap();

        // Skipped the prev rotation entirely and deployed into prev.
        assert_eq!(deployed, "/apps/demo/releases/prev");
        assert_eq!(
            host.file_content("/apps/demo/releases/prev/payload").as_deref(),
            Some("release-B")
        );
        assert_eq!(
            host.file_content("/apps/demo/releases/curr/payload").as_deref(),
            Some("release-older")
        );
        assert_eq!(
            host.link_target("/apps/demo/current").as_deref(),
            Some("/apps/demo/releases/prev")
        );
    }

    #[tokio::test]
    async fn failure_names_the_step() {
        let host = InMemoryHost::new("10.0.0.1");
        host.fail_op("extract_archive");
        let dir = tempfile::tempdir().unwrap();
        let a = artifact(&dir, "build1.tar.gz", "release-A");

        let err = rotate(&host, &layout(), &a, "ci:www-data").await.unwrap_err();
        match err {
            RotationError::Failed { step, .. } => assert_eq!(step, RotationStep::Extract),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn staging_dir_cleaned_on_success() {
        let host = InMemoryHost::new("10.0.0.1");
        let dir = tempfile::tempdir().unwrap();
        let a = artifact(&dir, "build1.tar.gz", "release-A");

        rotate(&host, &layout(), &a, "ci:www-data").await.unwrap();
        assert!(!host.path_exists("/tmp/.rollfleet-demo"));
    }
}
