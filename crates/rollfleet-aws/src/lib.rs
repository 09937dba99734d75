//! rollfleet-aws — production collaborators backed by external tools.
//!
//! Two adapter families live here:
//!
//! - **`aws`** — fleet discovery, the classic-ELB control plane and the
//!   S3 artifact store, all driven through the `aws` CLI. The CLI (not
//!   an SDK) keeps the operator's existing credential chain, profiles
//!   and region handling untouched.
//! - **`ssh`** — the remote-host contract over `ssh`/`scp` with
//!   passwordless sudo on the target side.
//!
//! Both adapters only shell out; every JSON response is parsed by pure
//! functions that the unit tests drive with canned payloads.

pub mod aws;
pub mod ssh;

pub use aws::AwsCli;
pub use ssh::{SshConnector, SshHost};
