//! Engine topology and SSH reachability

use crate::config::EngineEnvironment;
use crate::engine::{EngineVersion, NetworkSettings};
use crate::error::{Error, Result};
use std::path::Path;
use tracing::{debug, info};

/// Deployment relationship between this process, the engine and its containers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineTopology {
    /// Engine on this machine, reached through a local socket
    Local,
    /// Plain engine reached through a network address
    Remote {
        /// Daemon address, e.g. `tcp://203.0.113.9:2376`
        address: String,
    },
    /// Swarm cluster, images are distributed through a registry
    Cluster {
        /// Private registry address
        registry: String,
    },
}

impl EngineTopology {
    /// Derive the topology from the daemon version and the environment
    pub fn detect(version: &EngineVersion, env: &EngineEnvironment) -> Result<Self> {
        if version.version.contains("swarm") {
            let registry = env.registry.clone().ok_or_else(|| {
                Error::Misconfiguration(
                    "using swarm requires a private registry; set up the registry and export DOCKER_REGISTRY"
                        .to_string(),
                )
            })?;
            return Ok(EngineTopology::Cluster { registry });
        }

        Ok(match env.remote_docker_host() {
            Some(address) => EngineTopology::Remote {
                address: address.to_string(),
            },
            None => EngineTopology::Local,
        })
    }

    /// Whether this is a cluster engine
    pub fn is_cluster(&self) -> bool {
        matches!(self, EngineTopology::Cluster { .. })
    }
}

/// Address and port an SSH client should dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reachability {
    /// Address to dial
    pub ip: String,
    /// Port to dial
    pub port: u16,
}

/// Work out how to reach a container's sshd
pub fn resolve_reachability(
    topology: &EngineTopology,
    in_container: bool,
    container: &str,
    network: &NetworkSettings,
) -> Result<Reachability> {
    let unavailable = || Error::PortMappingUnavailable {
        container: container.to_string(),
    };
    let binding = network.ssh_binding().ok_or_else(unavailable)?;
    let port = binding
        .host_port
        .as_deref()
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|p| *p != 0)
        .ok_or_else(unavailable)?;
    let published_ip = binding.host_ip.clone().unwrap_or_default();

    let ip = match topology {
        EngineTopology::Remote { address } => address_host(address).to_string(),
        _ if !in_container => published_ip,
        _ => match network.gateway.as_deref().filter(|g| !g.is_empty()) {
            Some(gateway) => gateway.to_string(),
            None => {
                debug!("No gateway for {}, falling back to published address", container);
                published_ip
            }
        },
    };

    info!("Using docker server at {}", ip);
    Ok(Reachability { ip, port })
}

/// Host portion of a daemon address such as `tcp://host:2376`
pub fn address_host(address: &str) -> &str {
    let rest = address.split_once("://").map_or(address, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    if let Some(bracketed) = authority.strip_prefix('[') {
        return bracketed.split(']').next().unwrap_or(bracketed);
    }
    authority.split(':').next().unwrap_or(authority)
}

/// Whether this process itself runs inside a container
pub fn detect_in_container() -> bool {
    Path::new("/.dockerenv").is_file()
}
