pub mod cleanup;
pub mod provision;
pub mod recipe;

use anyhow::{Context, Result};
use docker_provisioner::{DockerEngine, EngineEnvironment, Provisioner};
use std::sync::Arc;

use crate::config::HostsFile;

/// Connect to the daemon and probe its topology
pub async fn connect(file: &HostsFile, env: EngineEnvironment) -> Result<Provisioner> {
    let engine = DockerEngine::connect(&file.docker, &env).context("Failed to connect to Docker")?;
    Provisioner::connect(Arc::new(engine), file.options.clone(), env)
        .await
        .context("Docker engine is not usable")
}
