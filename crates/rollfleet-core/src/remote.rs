//! Remote-host execution contract.
//!
//! Release rotation and recipes mutate a target host through this
//! trait. The operation set is deliberately high-level (rename, link,
//! extract) rather than raw shell, so the in-memory host in
//! [`crate::memory`] can model it and rotation stays testable.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::types::Instance;

/// Result type alias for remote-host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors from remote-host operations.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("connection to {host} failed: {detail}")]
    Connection { host: String, detail: String },

    #[error("command failed on {host} (exit {code}): {detail}")]
    Command {
        host: String,
        code: i32,
        detail: String,
    },

    #[error("upload to {host} failed: {detail}")]
    Upload { host: String, detail: String },

    #[error("path not found on {host}: {path}")]
    NotFound { host: String, path: String },
}

/// A single target host, scoped to one instance for the duration of
/// one workflow step. All operations run privileged on the remote
/// side.
#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// The address this host was connected to.
    fn address(&self) -> &str;

    async fn exists(&self, path: &str) -> HostResult<bool>;

    async fn is_symlink(&self, path: &str) -> HostResult<bool>;

    /// Resolve a symlink to its target path.
    async fn read_link(&self, path: &str) -> HostResult<String>;

    /// Create (or replace) a symlink at `link` pointing to `target`.
    async fn symlink(&self, target: &str, link: &str) -> HostResult<()>;

    /// Recursive delete. Absence is not an error.
    async fn remove(&self, path: &str) -> HostResult<()>;

    /// Move a file or directory tree.
    async fn rename(&self, from: &str, to: &str) -> HostResult<()>;

    /// `mkdir -p` equivalent.
    async fn create_dir(&self, path: &str) -> HostResult<()>;

    /// Reset `path` to an empty directory writable by the uploading
    /// identity.
    async fn prepare_upload_dir(&self, path: &str) -> HostResult<()>;

    /// Upload a local file into the remote directory `remote_dir`.
    async fn upload(&self, local: &Path, remote_dir: &str) -> HostResult<()>;

    /// Extract a gzipped tar archive on the host into `dest`.
    async fn extract_archive(&self, archive: &str, dest: &str) -> HostResult<()>;

    /// `chown -R owner path`.
    async fn chown_recursive(&self, owner: &str, path: &str) -> HostResult<()>;

    /// Run an arbitrary privileged command, returning stdout.
    async fn run(&self, command: &str) -> HostResult<String>;

    /// Read a file's contents.
    async fn read_file(&self, path: &str) -> HostResult<String>;
}

/// Connects to the host behind an instance's private address.
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(&self, instance: &Instance) -> HostResult<std::sync::Arc<dyn RemoteHost>>;
}
