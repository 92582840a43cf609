//! Provisioning lifecycle
//!
//! The [`Provisioner`] walks each host through a fixed sequence of states,
//! writing connection details back into the caller's [`HostRecord`]s, and
//! tears everything down again in [`Provisioner::cleanup`].

use crate::bootstrap::SshBootstrapper;
use crate::config::{BatchPolicy, EngineEnvironment, ProvisionerOptions};
use crate::container_spec::{self, MountContext};
use crate::engine::{ContainerHandle, Engine, ImageRef};
use crate::error::{Error, Result};
use crate::fixup::{HostnameFixup, NoHostnameFixup};
use crate::host::{HostRecord, SshCredentials};
use crate::image::{ImageResolver, ResolvedImage};
use crate::locator;
use crate::topology::{self, EngineTopology};
use async_io::Timer;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Namespace for images pushed to a cluster registry
const CLUSTER_IMAGE_NAMESPACE: &str = "docker-provisioner";

/// Where a host is in its provisioning sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisionState {
    /// Nothing done yet
    Init,
    /// Image pulled or built
    ImageReady,
    /// Container created or found
    ContainerReady,
    /// Container started and running
    Started,
    /// sshd installed and configured
    SshReady,
    /// SSH address and port known
    NetworkResolved,
    /// Host record fully populated
    Done,
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionState::Init => "init",
            ProvisionState::ImageReady => "image-ready",
            ProvisionState::ContainerReady => "container-ready",
            ProvisionState::Started => "started",
            ProvisionState::SshReady => "ssh-ready",
            ProvisionState::NetworkResolved => "network-resolved",
            ProvisionState::Done => "done",
        };
        f.write_str(name)
    }
}

/// A host that failed, and how far it got
#[derive(Debug)]
pub struct HostFailure {
    /// Host name
    pub host: String,
    /// Last state reached before the failure
    pub state: ProvisionState,
    /// What went wrong
    pub error: Error,
}

/// Outcome of a provisioning batch
#[derive(Debug, Default)]
pub struct ProvisionReport {
    /// Hosts that reached `Done`, in order
    pub provisioned: Vec<String>,
    /// Hosts that failed, when continuing past failures
    pub failures: Vec<HostFailure>,
    /// Hostname fixup error, when continuing past failures
    pub fixup_error: Option<Error>,
}

impl ProvisionReport {
    /// Whether every host was provisioned and fixed up
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.fixup_error.is_none()
    }
}

/// Cleanup step that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    /// Looking up the container
    Locate,
    /// Killing the container
    Stop,
    /// Deleting the container
    DeleteContainer,
    /// Deleting the image
    DeleteImage,
    /// No image ID recorded for the host
    MissingImageId,
}

/// A cleanup step that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupIssue {
    /// Host name
    pub host: String,
    /// Failed step
    pub step: CleanupStep,
    /// Human-readable detail
    pub message: String,
}

/// Outcome of a cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Containers deleted
    pub containers_removed: Vec<String>,
    /// Images deleted
    pub images_removed: Vec<String>,
    /// Hosts left alone because their container is preserved
    pub skipped: Vec<String>,
    /// Steps that failed
    pub issues: Vec<CleanupIssue>,
}

impl CleanupReport {
    /// Whether every attempted step succeeded
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn record(&mut self, host: &HostRecord, step: CleanupStep, message: String) {
        warn!("{}", message);
        self.issues.push(CleanupIssue {
            host: host.name.clone(),
            step,
            message,
        });
    }
}

/// Drives hosts through provisioning and cleanup against one engine
pub struct Provisioner {
    engine: Arc<dyn Engine>,
    options: ProvisionerOptions,
    env: EngineEnvironment,
    topology: EngineTopology,
    in_container: bool,
    fixup: Box<dyn HostnameFixup>,
}

impl Provisioner {
    /// Query the engine and work out the topology
    pub async fn connect(
        engine: Arc<dyn Engine>,
        options: ProvisionerOptions,
        env: EngineEnvironment,
    ) -> Result<Self> {
        let version = engine
            .version()
            .await
            .map_err(|e| Error::EngineUnreachable {
                reason: e.to_string(),
            })?;
        info!("Connected to docker {}", version.version);

        let topology = EngineTopology::detect(&version, &env)?;
        let in_container = options
            .in_container
            .unwrap_or_else(topology::detect_in_container);
        debug!("Engine topology {:?}, in container: {}", topology, in_container);

        Ok(Self {
            engine,
            options,
            env,
            topology,
            in_container,
            fixup: Box::new(NoHostnameFixup),
        })
    }

    /// Use a hostname fixup after each batch
    pub fn with_hostname_fixup(mut self, fixup: impl HostnameFixup + 'static) -> Self {
        self.fixup = Box::new(fixup);
        self
    }

    /// Detected engine topology
    pub fn topology(&self) -> &EngineTopology {
        &self.topology
    }

    /// The engine in use
    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    /// Provision hosts one after another, in the given order
    pub async fn provision(&self, hosts: &mut [HostRecord]) -> Result<ProvisionReport> {
        info!("Provisioning docker");
        let mut report = ProvisionReport::default();

        for host in hosts.iter_mut() {
            let mut state = ProvisionState::Init;
            match self.run_host(host, &mut state).await {
                Ok(()) => report.provisioned.push(host.name.clone()),
                Err(error) => match self.options.batch_policy {
                    BatchPolicy::FailFast => {
                        warn!("Provisioning {} failed after {}: {}", host.name, state, error);
                        return Err(error);
                    }
                    BatchPolicy::ContinueAndAggregate => {
                        warn!("Provisioning {} failed after {}, continuing: {}", host.name, state, error);
                        report.failures.push(HostFailure {
                            host: host.name.clone(),
                            state,
                            error,
                        });
                    }
                },
            }
        }

        let done: Vec<HostRecord> = hosts
            .iter()
            .filter(|h| report.provisioned.contains(&h.name))
            .cloned()
            .collect();
        if let Err(error) = self.fixup.apply(self.engine.as_ref(), &done).await {
            match self.options.batch_policy {
                BatchPolicy::FailFast => return Err(error),
                BatchPolicy::ContinueAndAggregate => {
                    warn!("Hostname fixup failed: {}", error);
                    report.fixup_error = Some(error);
                }
            }
        }

        Ok(report)
    }

    /// Provision a single host
    pub async fn provision_host(&self, host: &mut HostRecord) -> Result<()> {
        let mut state = ProvisionState::Init;
        self.run_host(host, &mut state).await
    }

    async fn run_host(&self, host: &mut HostRecord, state: &mut ProvisionState) -> Result<()> {
        info!("Provisioning {}", host.name);
        let engine = self.engine.as_ref();
        let working_dir = self.options.resolve_working_dir();

        let resolved = ImageResolver::new(engine, self.env.build_args.as_deref(), &working_dir)
            .resolve(host)
            .await?;
        if let Some(tag) = &host.tag {
            debug!("Tagging image {} as {}", resolved.image.id, tag);
            engine.tag_image(&resolved.image.id, tag).await?;
        }
        host.docker_image_id = Some(resolved.image.id.clone());
        advance(host, state, ProvisionState::ImageReady);

        let image_name = self.distributable_image(&resolved.image).await?;
        let (container, created) = self
            .locate_or_create(host, &image_name, &resolved, &working_dir)
            .await?;
        host.docker_container_id = Some(container.id.clone());
        advance(host, state, ProvisionState::ContainerReady);

        let bootstrapper = SshBootstrapper::new(engine);
        if !self.options.provision {
            if let Err(e) = bootstrapper.repair_ssh(&container.id, None).await {
                warn!("Could not repair ssh on {}: {}", container.short_id(), e);
            }
        }
        debug!("Starting container {}", container.short_id());
        engine.start_container(&container.id).await?;
        self.probe_running(&container, created).await?;
        advance(host, state, ProvisionState::Started);

        let reusing = host.use_existing_container && !self.options.provision;
        if resolved.strategy.needs_ssh_install() && !reusing {
            bootstrapper
                .install_ssh(&container.id, host.platform_str())
                .await?;
            bootstrapper
                .repair_ssh(&container.id, host.platform.as_deref())
                .await?;
        }
        advance(host, state, ProvisionState::SshReady);

        let details = container.details(engine).await?;
        let reach = topology::resolve_reachability(
            &self.topology,
            self.in_container,
            &container.id,
            &details.network,
        )?;
        info!("{} available as ssh -p {} root@{}", host.name, reach.port, reach.ip);
        host.ssh = Some(SshCredentials::root(reach.port, self.options.forward_ssh_agent));
        host.ip = Some(reach.ip);
        host.port = Some(reach.port);
        advance(host, state, ProvisionState::NetworkResolved);

        host.vm_ip = details.network.ip_address.clone();
        advance(host, state, ProvisionState::Done);
        Ok(())
    }

    /// Image name containers are created from; clusters pull from the registry
    async fn distributable_image(&self, image: &ImageRef) -> Result<String> {
        let EngineTopology::Cluster { registry } = &self.topology else {
            return Ok(image.id.clone());
        };
        let engine = self.engine.as_ref();
        let name = format!("{}/{}/{}", registry, CLUSTER_IMAGE_NAMESPACE, image.short_id());

        let present = match engine.search_images(&name).await {
            Ok(results) => results.iter().any(|r| r == &name),
            Err(e) => {
                debug!("Registry search for {} failed, assuming absent: {}", name, e);
                false
            }
        };
        if !present {
            info!("Pushing {} to {}", image.short_id(), registry);
            engine.tag_image(&image.id, &name).await?;
            engine.push_image(&name).await?;
        }
        Ok(name)
    }

    async fn locate_or_create(
        &self,
        host: &mut HostRecord,
        image_name: &str,
        resolved: &ResolvedImage,
        working_dir: &Path,
    ) -> Result<(ContainerHandle, bool)> {
        let engine = self.engine.as_ref();
        if let Some(existing) = locator::find(engine, host).await? {
            info!("Reusing container {} for {}", existing.short_id(), host.name);
            host.use_existing_container = true;
            return Ok((existing, false));
        }

        let mounts = MountContext {
            working_dir: working_dir.to_path_buf(),
            home_dir: dirs::home_dir(),
            toolbox: self.env.is_toolbox(),
        };
        let spec = container_spec::build(
            host,
            image_name,
            resolved.strategy,
            self.options.dockeropts.as_ref(),
            &mounts,
        );
        debug!("Creating container from image {}", image_name);
        let id = engine.create_container(&spec).await?;
        if id.is_empty() {
            return Err(Error::ProvisioningImpossible {
                host: host.name.clone(),
            });
        }
        host.use_existing_container = false;

        let names = spec.name.iter().map(|n| format!("/{}", n)).collect();
        Ok((ContainerHandle { id, names }, true))
    }

    /// Fail when the container did not stay up, removing it if we made it
    async fn probe_running(&self, container: &ContainerHandle, created: bool) -> Result<()> {
        let engine = self.engine.as_ref();
        let reason = match container.details(engine).await {
            Ok(details) if details.running => return Ok(()),
            Ok(_) => "not running after start".to_string(),
            Err(e) => e.to_string(),
        };

        if created {
            if let Err(e) = engine.remove_container(&container.id).await {
                warn!("Could not remove broken container {}: {}", container.short_id(), e);
            }
        }
        Err(Error::ContainerBadState {
            container: container.id.clone(),
            reason,
        })
    }

    /// Kill and delete containers and images, collecting failures
    pub async fn cleanup(&self, hosts: &[HostRecord]) -> CleanupReport {
        info!("Cleaning up docker");
        let mut report = CleanupReport::default();
        for host in hosts {
            self.cleanup_host(host, &mut report).await;
        }
        report
    }

    async fn cleanup_host(&self, host: &HostRecord, report: &mut CleanupReport) {
        if host.docker_preserve_container {
            debug!("Preserving container for {}", host.name);
            report.skipped.push(host.name.clone());
            return;
        }
        let engine = self.engine.as_ref();

        match locator::find(engine, host).await {
            Ok(Some(container)) => {
                debug!("Stopping container {}", container.short_id());
                match engine.kill_container(&container.id).await {
                    // let the root filesystem unmount before deleting
                    Ok(()) => {
                        Timer::after(self.options.cleanup_settle()).await;
                    }
                    Err(e) => report.record(
                        host,
                        CleanupStep::Stop,
                        format!("stop of container {} failed: {}", container.id, e),
                    ),
                }

                debug!("Deleting container {}", container.short_id());
                match engine.remove_container(&container.id).await {
                    Ok(()) => report.containers_removed.push(container.id),
                    Err(e) => report.record(
                        host,
                        CleanupStep::DeleteContainer,
                        format!("deletion of container {} failed: {}", container.id, e),
                    ),
                }
            }
            Ok(None) => debug!("No container found for {}", host.name),
            Err(e) => report.record(
                host,
                CleanupStep::Locate,
                format!("lookup of container for {} failed: {}", host.name, e),
            ),
        }

        if host.docker_preserve_image {
            return;
        }
        match &host.docker_image_id {
            Some(image) => {
                debug!("Deleting image {}", image);
                match engine.remove_image(image).await {
                    Ok(()) => report.images_removed.push(image.clone()),
                    Err(e) => report.record(
                        host,
                        CleanupStep::DeleteImage,
                        format!("deletion of image {} failed: {}", image, e),
                    ),
                }
            }
            None => report.record(
                host,
                CleanupStep::MissingImageId,
                format!(
                    "intended to delete the image of {}, but docker_image_id was not set",
                    host.name
                ),
            ),
        }
    }
}

fn advance(host: &HostRecord, state: &mut ProvisionState, next: ProvisionState) {
    debug!("{}: {} -> {}", host.name, state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;
    use crate::fixup::EtcHostsFixup;
    use std::path::PathBuf;

    fn options() -> ProvisionerOptions {
        ProvisionerOptions {
            cleanup_settle_ms: 0,
            in_container: Some(false),
            working_dir: Some(PathBuf::from("/")),
            ..Default::default()
        }
    }

    async fn provisioner(engine: &Arc<MemoryEngine>, options: ProvisionerOptions) -> Provisioner {
        Provisioner::connect(engine.clone(), options, EngineEnvironment::default())
            .await
            .unwrap()
    }

    fn ubuntu(name: &str) -> HostRecord {
        HostRecord::new(name)
            .with_image("ubuntu:22.04")
            .with_platform("ubuntu-22.04-amd64")
    }

    #[smol_potat::test]
    async fn test_connect_failure_is_unreachable() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail_on("version");
        let err = Provisioner::connect(engine, options(), EngineEnvironment::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::EngineUnreachable { .. }));
    }

    #[smol_potat::test]
    async fn test_synthesized_host_reaches_done() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(&engine, options()).await;
        let mut hosts = vec![ubuntu("web01")];

        let report = p.provision(&mut hosts).await.unwrap();
        assert_eq!(report.provisioned, vec!["web01"]);

        let host = &hosts[0];
        let id = host.docker_container_id.as_deref().unwrap();
        assert_eq!(host.ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(host.port, Some(32768));
        assert_eq!(host.ssh.as_ref().unwrap().port, 32768);
        assert!(host.vm_ip.is_some());
        assert!(host.docker_image_id.is_some());
        assert!(engine.is_running(id));
        // synthesized images already carry sshd
        assert!(engine.exec_log(id).is_empty());
    }

    #[smol_potat::test]
    async fn test_entry_point_host_installs_ssh() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(&engine, options()).await;
        let mut host = HostRecord::new("a")
            .with_image("alpine:3.18")
            .with_platform("alpine-3.18");
        host.use_image_entry_point = true;

        p.provision_host(&mut host).await.unwrap();
        let log = engine.exec_log(host.docker_container_id.as_deref().unwrap());
        assert_eq!(log[0], "apk add --update openssh");
        assert_eq!(log.last().unwrap(), "/usr/sbin/sshd");
    }

    #[smol_potat::test]
    async fn test_tag_applied_when_requested() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(&engine, options()).await;
        let mut host = ubuntu("a");
        host.tag = Some("acme/web".to_string());

        p.provision_host(&mut host).await.unwrap();
        let image = host.docker_image_id.unwrap();
        assert!(engine.image_names(&image).contains(&"acme/web:latest".to_string()));
    }

    #[smol_potat::test]
    async fn test_crashed_container_is_removed() {
        let engine = Arc::new(MemoryEngine::new());
        engine.crash_on_start();
        let p = provisioner(&engine, options()).await;
        let mut host = ubuntu("a");

        let err = p.provision_host(&mut host).await.unwrap_err();
        assert!(matches!(err, Error::ContainerBadState { .. }));
        assert!(engine.container_ids().is_empty());
        assert!(host.ip.is_none());
    }

    #[smol_potat::test]
    async fn test_fail_fast_stops_batch() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(&engine, options()).await;
        let mut hosts = vec![
            ubuntu("a"),
            HostRecord::new("b").with_image("win").with_platform("windows-2019"),
            ubuntu("c"),
        ];

        let err = p.provision(&mut hosts).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform { .. }));
        assert!(hosts[0].ip.is_some());
        assert!(hosts[2].ip.is_none());
    }

    #[smol_potat::test]
    async fn test_continue_and_aggregate_records_state() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(
            &engine,
            ProvisionerOptions {
                batch_policy: BatchPolicy::ContinueAndAggregate,
                ..options()
            },
        )
        .await;
        let mut b = ubuntu("b");
        b.docker_container_name = Some("taken".to_string());
        engine.add_container("taken");
        engine.fail_on("start_container");

        let mut hosts = vec![b];
        let report = p.provision(&mut hosts).await.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.failures[0].host, "b");
        assert_eq!(report.failures[0].state, ProvisionState::ContainerReady);
        assert!(hosts[0].use_existing_container);
    }

    #[smol_potat::test]
    async fn test_cluster_pushes_once() {
        let engine = Arc::new(MemoryEngine::new().with_version("swarm/1.2.9"));
        let env = EngineEnvironment {
            registry: Some("registry:5000".to_string()),
            ..Default::default()
        };
        let p = Provisioner::connect(engine.clone(), options(), env).await.unwrap();
        assert!(p.topology().is_cluster());

        let mut host = ubuntu("a");
        p.provision_host(&mut host).await.unwrap();

        let image = host.docker_image_id.clone().unwrap();
        let name = format!("registry:5000/docker-provisioner/{}", image.trim_start_matches("sha256:"));
        assert_eq!(engine.pushed(), vec![name.clone()]);
        let id = host.docker_container_id.unwrap();
        assert_eq!(engine.container_spec(&id).unwrap().image, name);
    }

    fn cluster_env() -> EngineEnvironment {
        EngineEnvironment {
            registry: Some("registry:5000".to_string()),
            ..Default::default()
        }
    }

    #[smol_potat::test]
    async fn test_cluster_skips_push_when_registry_has_image() {
        let engine = Arc::new(MemoryEngine::new().with_version("swarm/1.2.9"));
        let image = engine.add_image("acme/sshd:1");
        let name = format!("registry:5000/docker-provisioner/{}", image.trim_start_matches("sha256:"));
        engine.seed_registry(&name);
        let p = Provisioner::connect(engine.clone(), options(), cluster_env()).await.unwrap();

        let mut host = HostRecord::new("a").with_image("acme/sshd:1");
        host.use_image_as_is = true;
        p.provision_host(&mut host).await.unwrap();

        assert_eq!(engine.pushed(), vec![name.clone()]);
        assert!(!engine.image_names(&image).iter().any(|n| n.starts_with("registry:5000")));
        let id = host.docker_container_id.unwrap();
        assert_eq!(engine.container_spec(&id).unwrap().image, name);
    }

    #[smol_potat::test]
    async fn test_cluster_pushes_when_search_fails() {
        let engine = Arc::new(MemoryEngine::new().with_version("swarm/1.2.9"));
        engine.fail_on("search_images");
        let p = Provisioner::connect(engine.clone(), options(), cluster_env()).await.unwrap();

        let mut host = ubuntu("a");
        p.provision_host(&mut host).await.unwrap();

        let image = host.docker_image_id.unwrap();
        let name = format!("registry:5000/docker-provisioner/{}", image.trim_start_matches("sha256:"));
        assert_eq!(engine.pushed(), vec![name]);
    }

    #[smol_potat::test]
    async fn test_failed_ssh_install_leaves_record_cleanable() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail_exec_matching("apk add");
        let p = provisioner(
            &engine,
            ProvisionerOptions {
                batch_policy: BatchPolicy::ContinueAndAggregate,
                ..options()
            },
        )
        .await;
        let mut host = HostRecord::new("a")
            .with_image("alpine:3.18")
            .with_platform("alpine-3.18");
        host.use_image_entry_point = true;

        let mut hosts = vec![host];
        let report = p.provision(&mut hosts).await.unwrap();
        assert_eq!(report.failures[0].state, ProvisionState::Started);
        assert!(matches!(report.failures[0].error, Error::SshInstall { .. }));
        assert!(hosts[0].ip.is_none());

        let container = hosts[0].docker_container_id.clone().unwrap();
        let image = hosts[0].docker_image_id.clone().unwrap();
        let cleanup = p.cleanup(&hosts).await;
        assert!(cleanup.is_clean(), "{:?}", cleanup.issues);
        assert_eq!(cleanup.containers_removed, vec![container]);
        assert_eq!(cleanup.images_removed, vec![image.clone()]);
        assert!(engine.container_ids().is_empty());
        assert!(!engine.has_image(&image));
    }

    #[smol_potat::test]
    async fn test_stale_reuse_flag_cleared_on_create() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(
            &engine,
            ProvisionerOptions {
                provision: false,
                ..options()
            },
        )
        .await;
        let mut host = HostRecord::new("a")
            .with_image("alpine:3.18")
            .with_platform("alpine-3.18");
        host.use_image_entry_point = true;
        host.use_existing_container = true;
        host.docker_container_name = Some("long-gone".to_string());

        p.provision_host(&mut host).await.unwrap();

        assert!(!host.use_existing_container);
        let log = engine.exec_log(host.docker_container_id.as_deref().unwrap());
        assert!(log.contains(&"apk add --update openssh".to_string()), "{:?}", log);
    }

    #[smol_potat::test]
    async fn test_fixup_error_kept_on_aggregate_report() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(
            &engine,
            ProvisionerOptions {
                batch_policy: BatchPolicy::ContinueAndAggregate,
                ..options()
            },
        )
        .await
        .with_hostname_fixup(EtcHostsFixup);
        engine.fail_on("exec");

        let mut hosts = vec![
            ubuntu("a"),
            HostRecord::new("b").with_image("win").with_platform("windows-2019"),
        ];
        let report = p.provision(&mut hosts).await.unwrap();

        assert_eq!(report.provisioned, vec!["a"]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.fixup_error.is_some());
        assert!(!report.is_success());
    }

    #[smol_potat::test]
    async fn test_fixup_error_fails_fast_batch() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(&engine, options())
            .await
            .with_hostname_fixup(EtcHostsFixup);
        engine.fail_on("exec");

        let mut hosts = vec![ubuntu("a")];
        let err = p.provision(&mut hosts).await.unwrap_err();
        assert!(matches!(err, Error::Engine { .. }), "{:?}", err);
        assert!(hosts[0].ip.is_some());
    }

    #[smol_potat::test]
    async fn test_cleanup_collects_issues_and_continues() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(&engine, options()).await;
        let mut hosts = vec![ubuntu("a"), ubuntu("b")];
        p.provision(&mut hosts).await.unwrap();

        engine.fail_on("kill_container");
        let report = p.cleanup(&hosts).await;

        let steps: Vec<CleanupStep> = report.issues.iter().map(|i| i.step).collect();
        // kill fails, so delete of the still-running container fails too
        assert_eq!(
            steps,
            vec![
                CleanupStep::Stop,
                CleanupStep::DeleteContainer,
                CleanupStep::Stop,
                CleanupStep::DeleteContainer,
            ]
        );
        assert_eq!(report.images_removed.len(), 2);
    }

    #[smol_potat::test]
    async fn test_cleanup_honours_preserve_flags() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(&engine, options()).await;
        let mut hosts = vec![ubuntu("a"), ubuntu("b")];
        p.provision(&mut hosts).await.unwrap();
        hosts[0].docker_preserve_container = true;
        hosts[1].docker_preserve_image = true;

        let report = p.cleanup(&hosts).await;
        assert!(report.is_clean());
        assert_eq!(report.skipped, vec!["a"]);
        assert_eq!(report.containers_removed.len(), 1);
        assert!(report.images_removed.is_empty());
        assert!(engine.has_image(hosts[1].docker_image_id.as_deref().unwrap()));
    }

    #[smol_potat::test]
    async fn test_cleanup_missing_image_id() {
        let engine = Arc::new(MemoryEngine::new());
        let p = provisioner(&engine, options()).await;
        let report = p.cleanup(&[HostRecord::new("never-provisioned")]).await;
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].step, CleanupStep::MissingImageId);
    }
}
