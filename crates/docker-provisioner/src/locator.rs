//! Re-attaching to containers from a previous run

use crate::engine::{ContainerHandle, Engine};
use crate::error::Result;
use crate::host::HostRecord;
use tracing::debug;

/// Find the host's existing container by ID, then by name
///
/// Returns `None` without asking the engine when the host names neither.
pub async fn find(engine: &dyn Engine, host: &HostRecord) -> Result<Option<ContainerHandle>> {
    let id = host.docker_container_id.as_deref();
    let name = host.docker_container_name.as_deref();
    if id.is_none() && name.is_none() {
        return Ok(None);
    }

    let containers = engine.list_containers().await?;

    let mut found = None;
    if let Some(id) = id {
        debug!("Looking for an existing container with ID {}", id);
        found = containers.iter().find(|c| c.id == id);
    }
    if let (Some(name), None) = (name, found) {
        debug!("Looking for an existing container with name {}", name);
        found = containers.iter().find(|c| c.has_name(name));
    }

    if found.is_none() {
        debug!("Existing container not found");
    }
    Ok(found.cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;

    #[smol_potat::test]
    async fn test_no_id_or_name_skips_engine() {
        let engine = MemoryEngine::new();
        engine.fail_on("list_containers");

        let host = HostRecord::new("a");
        assert!(find(&engine, &host).await.unwrap().is_none());
    }

    #[smol_potat::test]
    async fn test_id_takes_precedence_over_name() {
        let engine = MemoryEngine::new();
        let by_name = engine.add_container("web01");
        let by_id = engine.add_container("other");

        let mut host = HostRecord::new("a");
        host.docker_container_id = Some(by_id.clone());
        host.docker_container_name = Some("web01".to_string());

        assert_eq!(find(&engine, &host).await.unwrap().unwrap().id, by_id);

        host.docker_container_id = Some("gone".to_string());
        assert_eq!(find(&engine, &host).await.unwrap().unwrap().id, by_name);
    }

    #[smol_potat::test]
    async fn test_unknown_name_is_not_an_error() {
        let engine = MemoryEngine::new();
        engine.add_container("web01");

        let mut host = HostRecord::new("a");
        host.docker_container_name = Some("db01".to_string());
        assert!(find(&engine, &host).await.unwrap().is_none());
    }

    #[smol_potat::test]
    async fn test_list_failure_propagates() {
        let engine = MemoryEngine::new();
        engine.fail_on("list_containers");

        let mut host = HostRecord::new("a");
        host.docker_container_name = Some("web01".to_string());
        assert!(find(&engine, &host).await.is_err());
    }
}
