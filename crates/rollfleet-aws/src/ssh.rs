//! Remote-host execution over `ssh`/`scp`.
//!
//! Commands run under `sudo sh -c` on the target, so the configured
//! ssh user needs passwordless sudo. Uploads land in a staging
//! directory that [`SshHost::prepare_upload_dir`] chowns to the ssh
//! user first, because `scp` writes as that user, not as root.

use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use rollfleet_core::{HostConnector, HostError, HostResult, Instance, RemoteHost};

const SSH_OPTS: [&str; 4] = [
    "-o",
    "BatchMode=yes",
    "-o",
    "StrictHostKeyChecking=accept-new",
];

/// ssh exit code for a connection-level failure.
const SSH_CONNECT_FAILED: i32 = 255;

/// One fleet instance reached over ssh.
#[derive(Debug, Clone)]
pub struct SshHost {
    address: String,
    ssh_user: String,
}

impl SshHost {
    pub fn new(address: impl Into<String>, ssh_user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ssh_user: ssh_user.into(),
        }
    }

    fn target(&self) -> String {
        format!("{}@{}", self.ssh_user, self.address)
    }

    async fn spawn(&self, program: &str, args: &[String]) -> HostResult<Output> {
        debug!(host = %self.address, program, args = ?args, "remote exec");
        Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| HostError::Connection {
                host: self.address.clone(),
                detail: format!("failed to spawn {program}: {e}"),
            })
    }

    /// Run `command` under sudo, returning `(exit_code, stdout, stderr)`.
    async fn run_raw(&self, command: &str) -> HostResult<(i32, String, String)> {
        let mut args: Vec<String> = SSH_OPTS.iter().map(|s| s.to_string()).collect();
        args.push(self.target());
        args.push(sudo_wrap(command));

        let output = self.spawn("ssh", &args).await?;
        let code = output.status.code().unwrap_or(-1);
        if code == SSH_CONNECT_FAILED {
            return Err(HostError::Connection {
                host: self.address.clone(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok((
            code,
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    /// Run `command`, treating any non-zero exit as an error.
    async fn run_checked(&self, command: &str) -> HostResult<String> {
        let (code, stdout, stderr) = self.run_raw(command).await?;
        if code != 0 {
            return Err(HostError::Command {
                host: self.address.clone(),
                code,
                detail: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }

    /// Run a `test`-style probe: exit 0 → true, exit 1 → false,
    /// anything else → error.
    async fn probe(&self, command: &str) -> HostResult<bool> {
        let (code, _, stderr) = self.run_raw(command).await?;
        match code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(HostError::Command {
                host: self.address.clone(),
                code,
                detail: stderr.trim().to_string(),
            }),
        }
    }
}

/// Wrap a command for remote privileged execution, single-quoting it
/// against the remote shell.
fn sudo_wrap(command: &str) -> String {
    format!("sudo sh -c '{}'", shell_escape(command))
}

/// Escape for inclusion inside single quotes: `'` becomes `'\''`.
fn shell_escape(s: &str) -> String {
    s.replace('\'', r"'\''")
}

/// Quote one path argument for the remote shell.
fn quoted(path: &str) -> String {
    format!("\"{path}\"")
}

#[async_trait]
impl RemoteHost for SshHost {
    fn address(&self) -> &str {
        &self.address
    }

    async fn exists(&self, path: &str) -> HostResult<bool> {
        self.probe(&format!("test -e {}", quoted(path))).await
    }

    async fn is_symlink(&self, path: &str) -> HostResult<bool> {
        self.probe(&format!("test -L {}", quoted(path))).await
    }

    async fn read_link(&self, path: &str) -> HostResult<String> {
        let (code, stdout, _) = self.run_raw(&format!("readlink {}", quoted(path))).await?;
        if code != 0 {
            return Err(HostError::NotFound {
                host: self.address.clone(),
                path: path.to_string(),
            });
        }
        Ok(stdout.trim().to_string())
    }

    async fn symlink(&self, target: &str, link: &str) -> HostResult<()> {
        self.run_checked(&format!("ln -sfn {} {}", quoted(target), quoted(link)))
            .await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> HostResult<()> {
        self.run_checked(&format!("rm -rf {}", quoted(path))).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> HostResult<()> {
        self.run_checked(&format!("mv {} {}", quoted(from), quoted(to)))
            .await?;
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> HostResult<()> {
        self.run_checked(&format!("mkdir -p {}", quoted(path))).await?;
        Ok(())
    }

    async fn prepare_upload_dir(&self, path: &str) -> HostResult<()> {
        let path = quoted(path);
        self.run_checked(&format!(
            "rm -rf {path} && mkdir -p {path} && chown {} {path}",
            self.ssh_user
        ))
        .await?;
        Ok(())
    }

    async fn upload(&self, local: &Path, remote_dir: &str) -> HostResult<()> {
        let mut args: Vec<String> = SSH_OPTS.iter().map(|s| s.to_string()).collect();
        args.push(local.display().to_string());
        args.push(format!("{}:{remote_dir}/", self.target()));

        let output = self.spawn("scp", &args).await?;
        if !output.status.success() {
            return Err(HostError::Upload {
                host: self.address.clone(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn extract_archive(&self, archive: &str, dest: &str) -> HostResult<()> {
        self.run_checked(&format!(
            "tar -xzf {} -C {}",
            quoted(archive),
            quoted(dest)
        ))
        .await?;
        Ok(())
    }

    async fn chown_recursive(&self, owner: &str, path: &str) -> HostResult<()> {
        self.run_checked(&format!("chown -R {owner} {}", quoted(path)))
            .await?;
        Ok(())
    }

    async fn run(&self, command: &str) -> HostResult<String> {
        self.run_checked(command).await
    }

    async fn read_file(&self, path: &str) -> HostResult<String> {
        let (code, stdout, _) = self.run_raw(&format!("cat {}", quoted(path))).await?;
        if code != 0 {
            return Err(HostError::NotFound {
                host: self.address.clone(),
                path: path.to_string(),
            });
        }
        Ok(stdout)
    }
}

/// Connects to instances' private addresses as the configured user.
#[derive(Debug, Clone)]
pub struct SshConnector {
    ssh_user: String,
}

impl SshConnector {
    pub fn new(ssh_user: impl Into<String>) -> Self {
        Self {
            ssh_user: ssh_user.into(),
        }
    }
}

#[async_trait]
impl HostConnector for SshConnector {
    async fn connect(&self, instance: &Instance) -> HostResult<Arc<dyn RemoteHost>> {
        Ok(Arc::new(SshHost::new(
            instance.private_ip.clone(),
            self.ssh_user.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_quotes_survive_sudo_wrapping() {
        let wrapped = sudo_wrap("echo 'it''s fine'");
        assert_eq!(wrapped, r"sudo sh -c 'echo '\''it'\'''\''s fine'\'''");
    }

    #[test]
    fn plain_commands_are_wrapped_verbatim() {
        assert_eq!(
            sudo_wrap("service demo restart"),
            "sudo sh -c 'service demo restart'"
        );
    }

    #[test]
    fn target_combines_user_and_address() {
        let host = SshHost::new("10.0.0.1", "deploy");
        assert_eq!(host.target(), "deploy@10.0.0.1");
    }
}
