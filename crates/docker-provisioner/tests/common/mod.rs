//! Shared fixtures for provisioning tests

#![allow(dead_code)]

use docker_provisioner::{
    EngineEnvironment, HostRecord, MemoryEngine, Provisioner, ProvisionerOptions,
};
use std::path::Path;
use std::sync::Arc;

/// Options that never wait and never probe the real filesystem
pub fn quick_options(working_dir: &Path) -> ProvisionerOptions {
    ProvisionerOptions {
        cleanup_settle_ms: 0,
        in_container: Some(false),
        working_dir: Some(working_dir.to_path_buf()),
        ..Default::default()
    }
}

/// Connect a provisioner to an in-memory engine
pub async fn connect(
    engine: &Arc<MemoryEngine>,
    options: ProvisionerOptions,
    env: EngineEnvironment,
) -> Provisioner {
    Provisioner::connect(engine.clone(), options, env)
        .await
        .expect("provisioner should connect to the memory engine")
}

/// A host on a catalogued platform
pub fn host(name: &str, image: &str, platform: &str) -> HostRecord {
    HostRecord::new(name).with_image(image).with_platform(platform)
}
