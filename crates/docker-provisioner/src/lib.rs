//! Disposable SSH-reachable test hosts on a container engine
//!
//! This crate turns host records from a test harness inventory into running
//! containers with sshd, and removes them again afterwards.
//!
//! # Architecture
//!
//! The engine is reached through the [`Engine`] trait, so the library itself
//! does not pick an async runtime:
//!
//! - [`engine::docker::DockerEngine`] talks to a Docker daemon via `bollard`
//! - [`engine::memory::MemoryEngine`] keeps everything in process
//!
//! [`Provisioner`] sequences the image resolver, container locator, spec
//! builder, SSH bootstrapper and topology resolver for each host.
//!
//! # Example
//!
//! ```no_run
//! use docker_provisioner::{
//!     DockerEngine, DockerOptions, EngineEnvironment, HostRecord, Provisioner, ProvisionerOptions,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> docker_provisioner::Result<()> {
//! let env = EngineEnvironment::from_env();
//! let engine = Arc::new(DockerEngine::connect(&DockerOptions::default(), &env)?);
//! let provisioner = Provisioner::connect(engine, ProvisionerOptions::default(), env).await?;
//!
//! let mut hosts = vec![HostRecord::new("web01")
//!     .with_image("ubuntu:22.04")
//!     .with_platform("ubuntu-22.04-amd64")];
//! provisioner.provision(&mut hosts).await?;
//! println!("ssh -p {:?} root@{:?}", hosts[0].port, hosts[0].ip);
//!
//! let report = provisioner.cleanup(&hosts).await;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod container_spec;
pub mod engine;
pub mod error;
pub mod fixup;
pub mod host;
pub mod image;
pub mod locator;
pub mod orchestrator;
pub mod recipe;
pub mod topology;

pub use bootstrap::{RepairOutcome, SshBootstrapper};
pub use catalog::PlatformFamily;
pub use config::{BatchPolicy, DockerOptions, EngineEnvironment, ProvisionerOptions};
pub use container_spec::{ContainerCreateSpec, MountContext};
pub use engine::docker::DockerEngine;
pub use engine::memory::MemoryEngine;
pub use engine::{ContainerHandle, Engine, ImageRef};
pub use error::{Error, Result};
pub use fixup::{EtcHostsFixup, HostnameFixup, NoHostnameFixup};
pub use host::{DockerCmd, HostRecord, MountFolder, SshCredentials};
pub use image::{ImagePlan, ImageResolver, ImageStrategy, ResolvedImage};
pub use orchestrator::{
    CleanupIssue, CleanupReport, CleanupStep, HostFailure, ProvisionReport, ProvisionState,
    Provisioner,
};
pub use recipe::{BuildRecipe, Layer};
pub use topology::{EngineTopology, Reachability};
