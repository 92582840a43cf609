//! Container engine seam
//!
//! [`Engine`] is the set of daemon calls the provisioner needs, expressed in
//! engine-neutral types. [`docker::DockerEngine`] talks to a real daemon;
//! [`memory::MemoryEngine`] keeps everything in process for tests and dry runs.

pub mod docker;
pub mod memory;

use crate::container_spec::ContainerCreateSpec;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Port key for sshd in engine port maps
pub const SSH_PORT_KEY: &str = "22/tcp";

/// Trait for container engine backends
#[async_trait]
pub trait Engine: Send + Sync {
    /// Query daemon version information
    async fn version(&self) -> Result<EngineVersion>;

    /// Pull an image by reference
    async fn pull_image(&self, reference: &str) -> Result<ImageRef>;

    /// Build an image from a context
    async fn build_image(&self, context: &BuildContext, build_args: &BTreeMap<String, String>) -> Result<ImageRef>;

    /// Tag an image under `name` (`repo` or `repo:tag`)
    async fn tag_image(&self, image: &str, name: &str) -> Result<()>;

    /// Push a tagged image to its registry
    async fn push_image(&self, name: &str) -> Result<()>;

    /// Search the registry, returning matching repository names
    async fn search_images(&self, term: &str) -> Result<Vec<String>>;

    /// Remove an image
    async fn remove_image(&self, image: &str) -> Result<()>;

    /// List all containers, including stopped ones
    async fn list_containers(&self) -> Result<Vec<ContainerHandle>>;

    /// Create a container, returning its ID
    async fn create_container(&self, spec: &ContainerCreateSpec) -> Result<String>;

    /// Start a created container
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Run a command inside a running container and wait for it
    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput>;

    /// Read live container metadata
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails>;

    /// Kill a running container
    async fn kill_container(&self, id: &str) -> Result<()>;

    /// Delete a container
    async fn remove_container(&self, id: &str) -> Result<()>;
}

/// Daemon version information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineVersion {
    /// Version string, e.g. `24.0.7` or `swarm/1.2.9`
    pub version: String,
    /// API version
    pub api_version: Option<String>,
}

/// An image known to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Engine-assigned image ID
    pub id: String,
    /// Registry-qualified name, when the image has one
    pub name: Option<String>,
}

impl ImageRef {
    /// Image ID without the digest algorithm prefix
    pub fn short_id(&self) -> &str {
        self.id.strip_prefix("sha256:").unwrap_or(&self.id)
    }
}

/// What an image build is fed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildContext {
    /// A rendered Dockerfile with no other context files
    Recipe(String),
    /// A directory on disk plus the Dockerfile path relative to it
    Directory {
        /// Context root
        root: PathBuf,
        /// Dockerfile path inside the context
        dockerfile: String,
    },
}

/// A container as listed by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Engine-assigned container ID
    pub id: String,
    /// Container names as reported by the engine, usually `/`-prefixed
    pub names: Vec<String>,
}

impl ContainerHandle {
    /// Whether any of the names matches `name`, ignoring the leading `/`
    pub fn has_name(&self, name: &str) -> bool {
        self.names
            .iter()
            .any(|n| n.strip_prefix('/').unwrap_or(n) == name)
    }

    /// Read the live metadata for this container
    pub async fn details(&self, engine: &dyn Engine) -> Result<ContainerDetails> {
        engine.inspect_container(&self.id).await
    }

    /// First 12 characters of the ID, for log lines
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

/// Live container metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    /// Container ID
    pub id: String,
    /// Whether the container is running
    pub running: bool,
    /// Network settings
    pub network: NetworkSettings,
}

/// Network part of the container metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSettings {
    /// Address on the bridge network
    pub ip_address: Option<String>,
    /// Bridge gateway
    pub gateway: Option<String>,
    /// Published ports keyed like `22/tcp`
    pub ports: HashMap<String, Vec<PortBinding>>,
}

impl NetworkSettings {
    /// First published binding for container port 22
    pub fn ssh_binding(&self) -> Option<&PortBinding> {
        self.ports.get(SSH_PORT_KEY).and_then(|b| b.first())
    }
}

/// One host-side binding of a container port
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortBinding {
    /// Host interface address
    pub host_ip: Option<String>,
    /// Host port, as reported by the engine
    pub host_port: Option<String>,
}

/// Result of a command run inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code
    pub exit_code: i64,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr, trimmed, for error messages
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr).trim().to_string()
    }
}

/// Split `repo[:tag]` into its parts, defaulting the tag to `latest`
///
/// A colon inside the registry host (`registry:5000/app`) is not a tag.
pub fn split_reference(name: &str) -> (&str, &str) {
    match name.rfind(':') {
        Some(pos) if !name[pos + 1..].contains('/') => (&name[..pos], &name[pos + 1..]),
        _ => (name, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_reference() {
        assert_eq!(split_reference("acme/web"), ("acme/web", "latest"));
        assert_eq!(split_reference("acme/web:1.2"), ("acme/web", "1.2"));
        assert_eq!(split_reference("registry:5000/web"), ("registry:5000/web", "latest"));
        assert_eq!(split_reference("registry:5000/web:edge"), ("registry:5000/web", "edge"));
    }

    #[test]
    fn test_has_name_strips_separator() {
        let handle = ContainerHandle {
            id: "abc".to_string(),
            names: vec!["/web01".to_string()],
        };
        assert!(handle.has_name("web01"));
        assert!(!handle.has_name("web0"));
    }

    #[test]
    fn test_image_short_id() {
        let image = ImageRef {
            id: "sha256:0123abcd".to_string(),
            name: None,
        };
        assert_eq!(image.short_id(), "0123abcd");
    }

    #[test]
    fn test_ssh_binding() {
        let mut network = NetworkSettings::default();
        assert!(network.ssh_binding().is_none());
        network.ports.insert(
            SSH_PORT_KEY.to_string(),
            vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("32768".to_string()),
            }],
        );
        assert_eq!(network.ssh_binding().unwrap().host_port.as_deref(), Some("32768"));
    }
}
