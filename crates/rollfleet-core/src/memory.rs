//! In-memory collaborator implementations.
//!
//! These back the test suites of every downstream crate, the same way
//! an embedded store's in-memory mode does: real contract, no external
//! system. The control plane records an event log so orchestration
//! tests can assert call ordering; the host models a small path tree
//! with symlinks so rotation tests can assert real layouts.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cloud::{BlobStore, CloudError, CloudResult, FleetDiscovery, LoadBalancerApi};
use crate::remote::{HostConnector, HostError, HostResult, RemoteHost};
use crate::types::{DrainAttributes, Instance, InstanceHealthState, LoadBalancer};

// ── Fleet discovery ────────────────────────────────────────────────

/// Static fleet inventory.
#[derive(Debug, Default)]
pub struct InMemoryFleet {
    instances: Vec<Instance>,
    load_balancers: Vec<LoadBalancer>,
}

impl InMemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn with_load_balancer(mut self, lb: LoadBalancer) -> Self {
        self.load_balancers.push(lb);
        self
    }
}

#[async_trait]
impl FleetDiscovery for InMemoryFleet {
    async fn list_instances(&self, environment: &str) -> CloudResult<Vec<Instance>> {
        Ok(self
            .instances
            .iter()
            .filter(|i| {
                i.tags
                    .get(crate::types::ENVIRONMENT_TAG)
                    .is_some_and(|e| e == environment)
            })
            .cloned()
            .collect())
    }

    async fn list_load_balancers(
        &self,
        app: &str,
        environment: &str,
    ) -> CloudResult<Vec<LoadBalancer>> {
        Ok(self
            .load_balancers
            .iter()
            .filter(|lb| lb.serves(app, environment))
            .cloned()
            .collect())
    }
}

// ── Load-balancer control plane ────────────────────────────────────

/// A membership-changing call observed by the control plane, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LbEvent {
    Deregister { lb: String, instance: String },
    Register { lb: String, instance: String },
}

#[derive(Debug)]
struct MemberState {
    health: InstanceHealthState,
    /// Health polls remaining before a freshly registered member
    /// reports `InService`.
    polls_until_in_service: u32,
}

#[derive(Debug, Default)]
struct ControlPlaneState {
    attributes: HashMap<String, DrainAttributes>,
    members: HashMap<(String, String), MemberState>,
    events: Vec<LbEvent>,
    /// Deregistered members keep reporting their old health state.
    slow_drain: bool,
    /// Registered members never reach `InService`.
    hold_out_of_service: bool,
    polls_until_in_service: u32,
}

/// In-memory load-balancer control plane with an event log.
#[derive(Debug)]
pub struct InMemoryControlPlane {
    state: Mutex<ControlPlaneState>,
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlPlaneState {
                polls_until_in_service: 1,
                ..Default::default()
            }),
        }
    }

    /// Declare a load balancer and its draining attributes.
    pub fn add_load_balancer(&self, name: &str, attributes: DrainAttributes) {
        self.state
            .lock()
            .unwrap()
            .attributes
            .insert(name.to_string(), attributes);
    }

    /// Seed a registered member with a given health state.
    pub fn seed_member(&self, lb: &str, instance: &str, health: InstanceHealthState) {
        self.state.lock().unwrap().members.insert(
            (lb.to_string(), instance.to_string()),
            MemberState {
                health,
                polls_until_in_service: 0,
            },
        );
    }

    /// Deregistered members keep their previous health state instead
    /// of dropping straight to `OutOfService`.
    pub fn set_slow_drain(&self, on: bool) {
        self.state.lock().unwrap().slow_drain = on;
    }

    /// Registered members never become `InService`.
    pub fn set_hold_out_of_service(&self, on: bool) {
        self.state.lock().unwrap().hold_out_of_service = on;
    }

    /// Health polls needed after registration before `InService`.
    pub fn set_polls_until_in_service(&self, polls: u32) {
        self.state.lock().unwrap().polls_until_in_service = polls;
    }

    /// The membership calls observed so far, in order.
    pub fn events(&self) -> Vec<LbEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn is_registered(&self, lb: &str, instance: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .members
            .contains_key(&(lb.to_string(), instance.to_string()))
    }
}

#[async_trait]
impl LoadBalancerApi for InMemoryControlPlane {
    async fn deregister(&self, lb: &str, instance_id: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.attributes.contains_key(lb) {
            return Err(CloudError::LoadBalancerNotFound(lb.to_string()));
        }
        state.events.push(LbEvent::Deregister {
            lb: lb.to_string(),
            instance: instance_id.to_string(),
        });
        let slow = state.slow_drain;
        if let Some(member) = state
            .members
            .get_mut(&(lb.to_string(), instance_id.to_string()))
        {
            if !slow {
                member.health = InstanceHealthState::OutOfService;
            }
        }
        Ok(())
    }

    async fn register(&self, lb: &str, instance_id: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.attributes.contains_key(lb) {
            return Err(CloudError::LoadBalancerNotFound(lb.to_string()));
        }
        state.events.push(LbEvent::Register {
            lb: lb.to_string(),
            instance: instance_id.to_string(),
        });
        let polls = state.polls_until_in_service;
        state.members.insert(
            (lb.to_string(), instance_id.to_string()),
            MemberState {
                health: InstanceHealthState::OutOfService,
                polls_until_in_service: polls,
            },
        );
        Ok(())
    }

    async fn describe_health(
        &self,
        lb: &str,
        instance_id: &str,
    ) -> CloudResult<InstanceHealthState> {
        let mut state = self.state.lock().unwrap();
        let hold = state.hold_out_of_service;
        let member = state
            .members
            .get_mut(&(lb.to_string(), instance_id.to_string()))
            .ok_or_else(|| CloudError::InstanceNotRegistered {
                lb: lb.to_string(),
                instance: instance_id.to_string(),
            })?;
        if !hold && member.polls_until_in_service > 0 {
            member.polls_until_in_service -= 1;
            if member.polls_until_in_service == 0 {
                member.health = InstanceHealthState::InService;
            }
        }
        Ok(member.health)
    }

    async fn describe_attributes(&self, lb: &str) -> CloudResult<DrainAttributes> {
        self.state
            .lock()
            .unwrap()
            .attributes
            .get(lb)
            .copied()
            .ok_or_else(|| CloudError::LoadBalancerNotFound(lb.to_string()))
    }
}

// ── Blob store ─────────────────────────────────────────────────────

/// In-memory artifact store addressed as `s3://{bucket}/{key}`.
#[derive(Debug)]
pub struct InMemoryBlobStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn put(&self, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn fetch(&self, reference: &str, dest_dir: &Path) -> CloudResult<PathBuf> {
        let prefix = format!("s3://{}/", self.bucket);
        let key = reference
            .strip_prefix(&prefix)
            .ok_or_else(|| CloudError::ArtifactNotFound(reference.to_string()))?;
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| CloudError::ArtifactNotFound(reference.to_string()))?;
        let name = key.rsplit('/').next().unwrap_or(key);
        let dest = dest_dir.join(name);
        std::fs::write(&dest, bytes)
            .map_err(|e| CloudError::Request(format!("staging {reference}: {e}")))?;
        Ok(dest)
    }

    async fn list_recent(&self, app: &str, _weeks: u32) -> CloudResult<Vec<String>> {
        let prefix = format!("{app}/");
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .map(|k| format!("s3://{}/{k}", self.bucket))
            .collect())
    }
}

// ── Remote host ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Dir,
    File(String),
    Symlink(String),
}

/// In-memory target host: a path tree plus a log of run commands.
#[derive(Debug)]
pub struct InMemoryHost {
    address: String,
    fs: Mutex<BTreeMap<String, Node>>,
    commands: Mutex<Vec<String>>,
    fail_ops: Mutex<HashSet<String>>,
}

impl InMemoryHost {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            fs: Mutex::new(BTreeMap::new()),
            commands: Mutex::new(Vec::new()),
            fail_ops: Mutex::new(HashSet::new()),
        }
    }

    /// Make the named trait operation fail from now on.
    pub fn fail_op(&self, op: &str) {
        self.fail_ops.lock().unwrap().insert(op.to_string());
    }

    fn check_fail(&self, op: &str) -> HostResult<()> {
        if self.fail_ops.lock().unwrap().contains(op) {
            return Err(HostError::Command {
                host: self.address.clone(),
                code: 1,
                detail: format!("injected failure in {op}"),
            });
        }
        Ok(())
    }

    fn not_found(&self, path: &str) -> HostError {
        HostError::NotFound {
            host: self.address.clone(),
            path: path.to_string(),
        }
    }

    fn has(fs: &BTreeMap<String, Node>, path: &str) -> bool {
        let child_prefix = format!("{path}/");
        fs.contains_key(path) || fs.keys().any(|k| k.starts_with(&child_prefix))
    }

    // Test helpers below.

    pub fn seed_file(&self, path: &str, content: &str) {
        self.fs
            .lock()
            .unwrap()
            .insert(path.to_string(), Node::File(content.to_string()));
    }

    pub fn seed_dir(&self, path: &str) {
        self.fs.lock().unwrap().insert(path.to_string(), Node::Dir);
    }

    pub fn seed_symlink(&self, link: &str, target: &str) {
        self.fs
            .lock()
            .unwrap()
            .insert(link.to_string(), Node::Symlink(target.to_string()));
    }

    pub fn file_content(&self, path: &str) -> Option<String> {
        match self.fs.lock().unwrap().get(path) {
            Some(Node::File(c)) => Some(c.clone()),
            _ => None,
        }
    }

    pub fn link_target(&self, path: &str) -> Option<String> {
        match self.fs.lock().unwrap().get(path) {
            Some(Node::Symlink(t)) => Some(t.clone()),
            _ => None,
        }
    }

    pub fn path_exists(&self, path: &str) -> bool {
        Self::has(&self.fs.lock().unwrap(), path)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteHost for InMemoryHost {
    fn address(&self) -> &str {
        &self.address
    }

    async fn exists(&self, path: &str) -> HostResult<bool> {
        self.check_fail("exists")?;
        Ok(Self::has(&self.fs.lock().unwrap(), path))
    }

    async fn is_symlink(&self, path: &str) -> HostResult<bool> {
        self.check_fail("is_symlink")?;
        Ok(matches!(
            self.fs.lock().unwrap().get(path),
            Some(Node::Symlink(_))
        ))
    }

    async fn read_link(&self, path: &str) -> HostResult<String> {
        self.check_fail("read_link")?;
        match self.fs.lock().unwrap().get(path) {
            Some(Node::Symlink(target)) => Ok(target.clone()),
            _ => Err(self.not_found(path)),
        }
    }

    async fn symlink(&self, target: &str, link: &str) -> HostResult<()> {
        self.check_fail("symlink")?;
        self.fs
            .lock()
            .unwrap()
            .insert(link.to_string(), Node::Symlink(target.to_string()));
        Ok(())
    }

    async fn remove(&self, path: &str) -> HostResult<()> {
        self.check_fail("remove")?;
        let mut fs = self.fs.lock().unwrap();
        let child_prefix = format!("{path}/");
        fs.retain(|k, _| k != path && !k.starts_with(&child_prefix));
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> HostResult<()> {
        self.check_fail("rename")?;
        let mut fs = self.fs.lock().unwrap();
        if !Self::has(&fs, from) {
            return Err(self.not_found(from));
        }
        let child_prefix = format!("{from}/");
        let moved: Vec<(String, Node)> = fs
            .iter()
            .filter(|(k, _)| *k == from || k.starts_with(&child_prefix))
            .map(|(k, n)| {
                let suffix = &k[from.len()..];
                (format!("{to}{suffix}"), n.clone())
            })
            .collect();
        fs.retain(|k, _| k != from && !k.starts_with(&child_prefix));
        fs.extend(moved);
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> HostResult<()> {
        self.check_fail("create_dir")?;
        self.fs
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert(Node::Dir);
        Ok(())
    }

    async fn prepare_upload_dir(&self, path: &str) -> HostResult<()> {
        self.check_fail("prepare_upload_dir")?;
        let mut fs = self.fs.lock().unwrap();
        let child_prefix = format!("{path}/");
        fs.retain(|k, _| k != path && !k.starts_with(&child_prefix));
        fs.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    async fn upload(&self, local: &Path, remote_dir: &str) -> HostResult<()> {
        self.check_fail("upload")?;
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| HostError::Upload {
                host: self.address.clone(),
                detail: format!("no file name in {}", local.display()),
            })?;
        // Carry the real file contents when the local path exists so
        // tests can track artifact identity through extraction.
        let content = std::fs::read_to_string(local)
            .unwrap_or_else(|_| local.to_string_lossy().into_owned());
        self.fs
            .lock()
            .unwrap()
            .insert(format!("{remote_dir}/{name}"), Node::File(content));
        Ok(())
    }

    async fn extract_archive(&self, archive: &str, dest: &str) -> HostResult<()> {
        self.check_fail("extract_archive")?;
        let mut fs = self.fs.lock().unwrap();
        let content = match fs.get(archive) {
            Some(Node::File(c)) => c.clone(),
            _ => return Err(self.not_found(archive)),
        };
        fs.insert(dest.to_string(), Node::Dir);
        fs.insert(format!("{dest}/payload"), Node::File(content));
        Ok(())
    }

    async fn chown_recursive(&self, owner: &str, path: &str) -> HostResult<()> {
        self.check_fail("chown_recursive")?;
        self.commands
            .lock()
            .unwrap()
            .push(format!("chown -R {owner} {path}"));
        Ok(())
    }

    async fn run(&self, command: &str) -> HostResult<String> {
        self.check_fail("run")?;
        self.commands.lock().unwrap().push(command.to_string());
        Ok(String::new())
    }

    async fn read_file(&self, path: &str) -> HostResult<String> {
        self.check_fail("read_file")?;
        match self.fs.lock().unwrap().get(path) {
            Some(Node::File(c)) => Ok(c.clone()),
            _ => Err(self.not_found(path)),
        }
    }
}

/// Connector mapping private addresses to in-memory hosts.
#[derive(Debug, Default)]
pub struct InMemoryConnector {
    hosts: Mutex<HashMap<String, Arc<InMemoryHost>>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, host: Arc<InMemoryHost>) {
        self.hosts
            .lock()
            .unwrap()
            .insert(host.address().to_string(), host);
    }

    pub fn host(&self, address: &str) -> Option<Arc<InMemoryHost>> {
        self.hosts.lock().unwrap().get(address).cloned()
    }
}

#[async_trait]
impl HostConnector for InMemoryConnector {
    async fn connect(&self, instance: &Instance) -> HostResult<Arc<dyn RemoteHost>> {
        self.hosts
            .lock()
            .unwrap()
            .get(&instance.private_ip)
            .cloned()
            .map(|h| h as Arc<dyn RemoteHost>)
            .ok_or_else(|| HostError::Connection {
                host: instance.private_ip.clone(),
                detail: "no such host".to_string(),
            })
    }
}
