//! In-memory engine
//!
//! Behaves like a small single-node daemon: images, containers, published
//! ports and exec calls all live in process. Tests use it to drive the
//! provisioner without Docker, and it can inject failures per operation.

use super::{
    BuildContext, ContainerDetails, ContainerHandle, Engine, EngineVersion, ExecOutput, ImageRef,
    NetworkSettings, PortBinding, SSH_PORT_KEY,
};
use crate::container_spec::ContainerCreateSpec;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

const FIRST_HOST_PORT: u16 = 32768;

/// In-memory container engine
pub struct MemoryEngine {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    version: String,
    published_host_ip: String,
    next_id: u64,
    next_port: u16,
    images: BTreeMap<String, MemoryImage>,
    registry: BTreeSet<String>,
    containers: Vec<MemoryContainer>,
    pulls: Vec<String>,
    builds: Vec<(BuildContext, BTreeMap<String, String>)>,
    failing_ops: HashSet<String>,
    failing_exec: Vec<String>,
    crash_on_start: bool,
}

struct MemoryImage {
    names: Vec<String>,
}

struct MemoryContainer {
    id: String,
    names: Vec<String>,
    ip_address: String,
    spec: Option<ContainerCreateSpec>,
    running: bool,
    host_port: Option<u16>,
    exec_log: Vec<String>,
}

impl MemoryEngine {
    /// Create an empty engine reporting a plain local daemon
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                version: "24.0.7".to_string(),
                published_host_ip: "0.0.0.0".to_string(),
                next_port: FIRST_HOST_PORT,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Report a different daemon version string
    pub fn with_version(self, version: impl Into<String>) -> Self {
        self.state().version = version.into();
        self
    }

    /// Address reported as `HostIp` for published ports
    pub fn with_published_host_ip(self, ip: impl Into<String>) -> Self {
        self.state().published_host_ip = ip.into();
        self
    }

    /// Make every call to `operation` fail
    pub fn fail_on(&self, operation: &str) {
        self.state().failing_ops.insert(operation.to_string());
    }

    /// Stop failing `operation`
    pub fn recover(&self, operation: &str) {
        self.state().failing_ops.remove(operation);
    }

    /// Exec calls whose command contains `needle` exit 1
    pub fn fail_exec_matching(&self, needle: impl Into<String>) {
        self.state().failing_exec.push(needle.into());
    }

    /// Containers exit right after being started
    pub fn crash_on_start(&self) {
        self.state().crash_on_start = true;
    }

    /// Add a stopped container named `name`, returning its ID
    pub fn add_container(&self, name: &str) -> String {
        let mut state = self.state();
        state.insert_container(Some(name), None)
    }

    /// Add a running container named `name`, returning its ID
    pub fn add_running_container(&self, name: &str) -> String {
        let mut state = self.state();
        let id = state.insert_container(Some(name), None);
        state.start(&id);
        id
    }

    /// Add an image, returning its ID
    pub fn add_image(&self, name: &str) -> String {
        let mut state = self.state();
        state.insert_image(vec![name.to_string()])
    }

    /// Commands executed in a container, shell bodies unwrapped
    pub fn exec_log(&self, id: &str) -> Vec<String> {
        self.state()
            .container(id)
            .map(|c| c.exec_log.clone())
            .unwrap_or_default()
    }

    /// IDs of all containers
    pub fn container_ids(&self) -> Vec<String> {
        self.state().containers.iter().map(|c| c.id.clone()).collect()
    }

    /// Whether a container is running
    pub fn is_running(&self, id: &str) -> bool {
        self.state().container(id).is_some_and(|c| c.running)
    }

    /// The create request a container was made from
    pub fn container_spec(&self, id: &str) -> Option<ContainerCreateSpec> {
        self.state().container(id).and_then(|c| c.spec.clone())
    }

    /// Whether an image ID or name is known
    pub fn has_image(&self, image: &str) -> bool {
        self.state().resolve_image(image).is_some()
    }

    /// Names an image is tagged with
    pub fn image_names(&self, image: &str) -> Vec<String> {
        let state = self.state();
        state
            .resolve_image(image)
            .and_then(|id| state.images.get(&id))
            .map(|i| i.names.clone())
            .unwrap_or_default()
    }

    /// References pulled so far
    pub fn pulls(&self) -> Vec<String> {
        self.state().pulls.clone()
    }

    /// Build contexts and arguments seen so far
    pub fn builds(&self) -> Vec<(BuildContext, BTreeMap<String, String>)> {
        self.state().builds.clone()
    }

    /// Names pushed to the registry
    pub fn pushed(&self) -> Vec<String> {
        self.state().registry.iter().cloned().collect()
    }

    /// Seed the registry with a name, as if pushed earlier
    pub fn seed_registry(&self, name: &str) {
        self.state().registry.insert(name.to_string());
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn check(&self, operation: &'static str) -> Result<()> {
        if self.failing_ops.contains(operation) {
            return Err(Error::engine(operation, "injected failure"));
        }
        Ok(())
    }

    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_image(&mut self, names: Vec<String>) -> String {
        let id = format!("sha256:{:064x}", self.fresh_id());
        self.images.insert(id.clone(), MemoryImage { names });
        id
    }

    fn resolve_image(&self, reference: &str) -> Option<String> {
        if self.images.contains_key(reference) {
            return Some(reference.to_string());
        }
        let (repo, tag) = super::split_reference(reference);
        let qualified = format!("{}:{}", repo, tag);
        self.images
            .iter()
            .find(|(_, image)| image.names.iter().any(|n| *n == qualified || n == reference))
            .map(|(id, _)| id.clone())
    }

    fn insert_container(&mut self, name: Option<&str>, spec: Option<ContainerCreateSpec>) -> String {
        let n = self.fresh_id();
        let id = format!("{:064x}", n);
        let name = name.map_or_else(|| format!("provisioned_{}", n), str::to_string);
        self.containers.push(MemoryContainer {
            id: id.clone(),
            names: vec![format!("/{}", name)],
            ip_address: format!("172.17.0.{}", self.containers.len() + 2),
            spec,
            running: false,
            host_port: None,
            exec_log: Vec::new(),
        });
        id
    }

    fn container(&self, id: &str) -> Option<&MemoryContainer> {
        self.containers.iter().find(|c| c.id == id)
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut MemoryContainer> {
        self.containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::ContainerNotFound { id: id.to_string() })
    }

    fn start(&mut self, id: &str) {
        let port = self.next_port;
        let crash = self.crash_on_start;
        if let Ok(container) = self.container_mut(id) {
            container.running = !crash;
            if container.host_port.is_none() {
                container.host_port = Some(port);
                self.next_port += 1;
            }
        }
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn version(&self) -> Result<EngineVersion> {
        let state = self.state();
        state.check("version")?;
        Ok(EngineVersion {
            version: state.version.clone(),
            api_version: Some("1.43".to_string()),
        })
    }

    async fn pull_image(&self, reference: &str) -> Result<ImageRef> {
        let mut state = self.state();
        state.check("pull_image")?;
        state.pulls.push(reference.to_string());
        let id = match state.resolve_image(reference) {
            Some(id) => id,
            None => state.insert_image(vec![reference.to_string()]),
        };
        Ok(ImageRef {
            id,
            name: Some(reference.to_string()),
        })
    }

    async fn build_image(&self, context: &BuildContext, build_args: &BTreeMap<String, String>) -> Result<ImageRef> {
        let mut state = self.state();
        state.check("build_image")?;
        state.builds.push((context.clone(), build_args.clone()));
        let id = state.insert_image(Vec::new());
        Ok(ImageRef { id, name: None })
    }

    async fn tag_image(&self, image: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.check("tag_image")?;
        let id = state
            .resolve_image(image)
            .ok_or_else(|| Error::engine("tag_image", format!("No such image: {}", image)))?;
        let (repo, tag) = super::split_reference(name);
        if let Some(entry) = state.images.get_mut(&id) {
            entry.names.push(format!("{}:{}", repo, tag));
        }
        Ok(())
    }

    async fn push_image(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.check("push_image")?;
        if state.resolve_image(name).is_none() {
            return Err(Error::engine("push_image", format!("An image does not exist locally with the tag: {}", name)));
        }
        state.registry.insert(name.to_string());
        Ok(())
    }

    async fn search_images(&self, term: &str) -> Result<Vec<String>> {
        let state = self.state();
        state.check("search_images")?;
        Ok(state
            .registry
            .iter()
            .filter(|name| name.contains(term))
            .cloned()
            .collect())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let mut state = self.state();
        state.check("remove_image")?;
        let id = state
            .resolve_image(image)
            .ok_or_else(|| Error::engine("remove_image", format!("No such image: {}", image)))?;
        state.images.remove(&id);
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerHandle>> {
        let state = self.state();
        state.check("list_containers")?;
        Ok(state
            .containers
            .iter()
            .map(|c| ContainerHandle {
                id: c.id.clone(),
                names: c.names.clone(),
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerCreateSpec) -> Result<String> {
        let mut state = self.state();
        state.check("create_container")?;
        // cluster nodes pull registry images on demand
        if state.resolve_image(&spec.image).is_none() && !state.registry.contains(&spec.image) {
            return Err(Error::engine("create_container", format!("No such image: {}", spec.image)));
        }
        if let Some(name) = &spec.name {
            let taken = format!("/{}", name);
            if state.containers.iter().any(|c| c.names.contains(&taken)) {
                return Err(Error::engine(
                    "create_container",
                    format!("Conflict. The container name \"{}\" is already in use", taken),
                ));
            }
        }
        Ok(state.insert_container(spec.name.as_deref(), Some(spec.clone())))
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        state.check("start_container")?;
        state.container_mut(id)?;
        state.start(id);
        Ok(())
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput> {
        let mut state = self.state();
        state.check("exec")?;
        let command = match cmd {
            [sh, flag, body] if sh == "/bin/sh" && flag == "-c" => body.clone(),
            _ => cmd.join(" "),
        };
        let failing = state.failing_exec.iter().any(|needle| command.contains(needle.as_str()));

        let container = state.container_mut(id)?;
        if !container.running {
            return Err(Error::engine("exec", format!("container {} is not running", id)));
        }
        container.exec_log.push(command);

        Ok(ExecOutput {
            exit_code: if failing { 1 } else { 0 },
            stdout: String::new(),
            stderr: if failing { "simulated failure".to_string() } else { String::new() },
        })
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        let mut state = self.state();
        state.check("inspect_container")?;
        let host_ip = state.published_host_ip.clone();
        let container = state.container_mut(id)?;

        let mut network = NetworkSettings {
            ip_address: Some(container.ip_address.clone()),
            gateway: Some("172.17.0.1".to_string()),
            ..Default::default()
        };
        if let Some(port) = container.host_port {
            network.ports.insert(
                SSH_PORT_KEY.to_string(),
                vec![PortBinding {
                    host_ip: Some(host_ip),
                    host_port: Some(port.to_string()),
                }],
            );
        }

        Ok(ContainerDetails {
            id: container.id.clone(),
            running: container.running,
            network,
        })
    }

    async fn kill_container(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        state.check("kill_container")?;
        let container = state.container_mut(id)?;
        if !container.running {
            return Err(Error::engine("kill_container", format!("Container {} is not running", id)));
        }
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        state.check("remove_container")?;
        if state.container_mut(id)?.running {
            return Err(Error::engine(
                "remove_container",
                format!("You cannot remove a running container {}", id),
            ));
        }
        state.containers.retain(|c| c.id != id);
        Ok(())
    }
}
