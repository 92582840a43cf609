//! Batch hostname resolution
//!
//! After a batch is provisioned, hosts usually need to resolve each other by
//! name. The orchestrator calls a [`HostnameFixup`] once per batch.

use crate::engine::Engine;
use crate::error::Result;
use crate::host::HostRecord;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Makes provisioned hosts resolvable by name
#[async_trait]
pub trait HostnameFixup: Send + Sync {
    /// Apply the fixup to hosts that finished provisioning
    async fn apply(&self, engine: &dyn Engine, hosts: &[HostRecord]) -> Result<()>;
}

/// Leaves name resolution alone
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHostnameFixup;

#[async_trait]
impl HostnameFixup for NoHostnameFixup {
    async fn apply(&self, _engine: &dyn Engine, _hosts: &[HostRecord]) -> Result<()> {
        Ok(())
    }
}

/// Appends every host's bridge address to every container's `/etc/hosts`
#[derive(Debug, Clone, Copy, Default)]
pub struct EtcHostsFixup;

impl EtcHostsFixup {
    /// `address name` pairs for hosts with a bridge address
    pub fn entries(hosts: &[HostRecord]) -> Vec<String> {
        hosts
            .iter()
            .filter_map(|h| h.vm_ip.as_ref().map(|ip| format!("{} {}", ip, h.name)))
            .collect()
    }

    /// Shell command appending each entry unless already present
    pub fn command(entries: &[String]) -> String {
        entries
            .iter()
            .map(|entry| format!("grep -qxF '{0}' /etc/hosts || echo '{0}' >> /etc/hosts", entry))
            .collect::<Vec<_>>()
            .join(" ; ")
    }
}

#[async_trait]
impl HostnameFixup for EtcHostsFixup {
    async fn apply(&self, engine: &dyn Engine, hosts: &[HostRecord]) -> Result<()> {
        let entries = Self::entries(hosts);
        if entries.is_empty() {
            return Ok(());
        }
        let command = Self::command(&entries);

        let mut first_error = None;
        for host in hosts {
            let Some(container) = &host.docker_container_id else {
                continue;
            };
            debug!("Updating /etc/hosts in {}", host.name);
            let cmd = ["/bin/sh".to_string(), "-c".to_string(), command.clone()];
            match engine.exec(container, &cmd).await {
                Ok(output) if !output.success() => warn!(
                    "updating /etc/hosts on {} exited {}: {}",
                    host.name,
                    output.exit_code,
                    output.combined()
                ),
                Ok(_) => {}
                Err(e) => {
                    warn!("updating /etc/hosts on {} failed: {}", host.name, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
