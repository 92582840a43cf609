//! Configuration structures for the provisioner

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Registry used to distribute images in cluster mode
pub const ENV_REGISTRY: &str = "DOCKER_REGISTRY";
/// Daemon address override
pub const ENV_DOCKER_HOST: &str = "DOCKER_HOST";
/// Whitespace-delimited `KEY=VALUE` build argument overrides
pub const ENV_BUILDARGS: &str = "DOCKER_BUILDARGS";
/// Marker set by Docker Toolbox installations on Windows
pub const ENV_TOOLBOX: &str = "DOCKER_TOOLBOX_INSTALL_PATH";

/// Global options for a provisioning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerOptions {
    /// Whether fresh provisioning is enabled for this run
    #[serde(default = "default_true")]
    pub provision: bool,
    /// Forward the local ssh-agent in the generated credentials
    #[serde(default)]
    pub forward_ssh_agent: bool,
    /// Engine create-body keys applied to hosts without their own `dockeropts`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockeropts: Option<Map<String, Value>>,
    /// What to do when a host fails
    #[serde(default)]
    pub batch_policy: BatchPolicy,
    /// Pause between killing and deleting a container, in milliseconds
    #[serde(default = "default_cleanup_settle_ms")]
    pub cleanup_settle_ms: u64,
    /// Force in-container detection instead of probing `/.dockerenv`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_container: Option<bool>,
    /// Directory relative Dockerfile and mount paths resolve against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_cleanup_settle_ms() -> u64 {
    2000
}

impl Default for ProvisionerOptions {
    fn default() -> Self {
        Self {
            provision: true,
            forward_ssh_agent: false,
            dockeropts: None,
            batch_policy: BatchPolicy::default(),
            cleanup_settle_ms: default_cleanup_settle_ms(),
            in_container: None,
            working_dir: None,
        }
    }
}

impl ProvisionerOptions {
    /// Pause between kill and delete during cleanup
    pub fn cleanup_settle(&self) -> Duration {
        Duration::from_millis(self.cleanup_settle_ms)
    }

    /// Working directory, falling back to the process cwd
    pub fn resolve_working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Failure policy for a batch of hosts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Stop at the first failing host and skip the hostname fixup
    #[default]
    FailFast,
    /// Record the failure and carry on with the remaining hosts
    ContinueAndAggregate,
}

/// Transport settings for the engine client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerOptions {
    /// Read/write timeout for daemon calls; builds and installs are slow
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl DockerOptions {
    /// Transport timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Environment-supplied settings, read once per process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEnvironment {
    /// Private registry address, required for cluster engines
    pub registry: Option<String>,
    /// Daemon address, e.g. `tcp://203.0.113.9:2376`
    pub docker_host: Option<String>,
    /// Raw build argument override list
    pub build_args: Option<String>,
    /// Docker Toolbox installation path
    pub toolbox_install_path: Option<String>,
}

impl EngineEnvironment {
    /// Snapshot the relevant variables from the process environment
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            registry: var(ENV_REGISTRY),
            docker_host: var(ENV_DOCKER_HOST),
            build_args: var(ENV_BUILDARGS),
            toolbox_install_path: var(ENV_TOOLBOX),
        }
    }

    /// Whether bind mount paths need Docker Toolbox drive translation
    pub fn is_toolbox(&self) -> bool {
        self.toolbox_install_path.is_some()
    }

    /// Daemon address when it points somewhere other than a local socket
    pub fn remote_docker_host(&self) -> Option<&str> {
        self.docker_host
            .as_deref()
            .filter(|h| !h.starts_with("unix://") && !h.starts_with("npipe://"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults_from_empty_yaml() {
        let options: ProvisionerOptions = serde_yaml::from_str("{}").unwrap();
        assert!(options.provision);
        assert!(!options.forward_ssh_agent);
        assert_eq!(options.batch_policy, BatchPolicy::FailFast);
        assert_eq!(options.cleanup_settle(), Duration::from_secs(2));
    }

    #[test]
    fn test_batch_policy_snake_case() {
        let options: ProvisionerOptions =
            serde_yaml::from_str("batch_policy: continue_and_aggregate\nprovision: false\n").unwrap();
        assert_eq!(options.batch_policy, BatchPolicy::ContinueAndAggregate);
        assert!(!options.provision);
    }

    #[test]
    fn test_remote_docker_host_ignores_sockets() {
        let mut env = EngineEnvironment {
            docker_host: Some("unix:///var/run/docker.sock".to_string()),
            ..Default::default()
        };
        assert_eq!(env.remote_docker_host(), None);

        env.docker_host = Some("tcp://203.0.113.9:2376".to_string());
        assert_eq!(env.remote_docker_host(), Some("tcp://203.0.113.9:2376"));
    }

    #[test]
    fn test_docker_options_timeout() {
        assert_eq!(DockerOptions::default().timeout(), Duration::from_secs(300));
    }
}
