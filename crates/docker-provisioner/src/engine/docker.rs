//! Docker daemon backend built on bollard

use super::{
    BuildContext, ContainerDetails, ContainerHandle, Engine, EngineVersion, ExecOutput, ImageRef,
    NetworkSettings, PortBinding, split_reference,
};
use crate::config::{DockerOptions, EngineEnvironment};
use crate::container_spec::ContainerCreateSpec;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{
    BuildImageOptions, CreateImageOptions, PushImageOptions, RemoveImageOptions,
    SearchImagesOptions, TagImageOptions,
};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Engine backed by a Docker daemon
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the daemon named by the environment, or the local socket
    ///
    /// Connecting is lazy; the first call reveals an unreachable daemon.
    pub fn connect(options: &DockerOptions, env: &EngineEnvironment) -> Result<Self> {
        let timeout = options.timeout_secs;
        let unreachable = |e: DockerError| Error::EngineUnreachable {
            reason: e.to_string(),
        };

        let docker = match env.docker_host.as_deref() {
            Some(address) if address.starts_with("tcp://") || address.starts_with("http://") => {
                debug!("Connecting to docker over http at {}", address);
                Docker::connect_with_http(address, timeout, API_DEFAULT_VERSION).map_err(unreachable)?
            }
            Some(address) if address.starts_with("unix://") => {
                Docker::connect_with_socket(address, timeout, API_DEFAULT_VERSION).map_err(unreachable)?
            }
            _ => Docker::connect_with_local_defaults()
                .map_err(unreachable)?
                .with_timeout(options.timeout()),
        };

        Ok(Self { docker })
    }

    /// Wrap an already configured client
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn image_id(&self, reference: &str) -> Result<String> {
        let inspect = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| Error::engine("inspect_image", e.to_string()))?;
        inspect
            .id
            .ok_or_else(|| Error::engine("inspect_image", format!("no ID reported for {}", reference)))
    }
}

/// Map a daemon error for a call on one container
fn container_error(operation: &'static str, id: &str, err: DockerError) -> Error {
    match err {
        DockerError::DockerResponseServerError { status_code: 404, .. } => Error::ContainerNotFound { id: id.to_string() },
        other => Error::engine(operation, other.to_string()),
    }
}

/// Pack a build context as the tar archive the build endpoint expects
fn context_archive(context: &BuildContext) -> Result<(Vec<u8>, String)> {
    let mut archive = tar::Builder::new(Vec::new());
    let dockerfile = match context {
        BuildContext::Recipe(text) => {
            let mut header = tar::Header::new_gnu();
            header.set_path("Dockerfile")?;
            header.set_size(text.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            archive.append(&header, text.as_bytes())?;
            "Dockerfile".to_string()
        }
        BuildContext::Directory { root, dockerfile } => {
            archive.append_dir_all(".", root)?;
            dockerfile_in_context(root, dockerfile)
        }
    };
    Ok((archive.into_inner()?, dockerfile))
}

fn dockerfile_in_context(root: &Path, dockerfile: &str) -> String {
    Path::new(dockerfile)
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| dockerfile.to_string())
}

#[async_trait]
impl Engine for DockerEngine {
    async fn version(&self) -> Result<EngineVersion> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| Error::engine("version", e.to_string()))?;
        Ok(EngineVersion {
            version: version.version.unwrap_or_default(),
            api_version: version.api_version,
        })
    }

    async fn pull_image(&self, reference: &str) -> Result<ImageRef> {
        let (repo, tag) = split_reference(reference);
        let options = CreateImageOptions {
            from_image: repo,
            tag,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(|e| Error::engine("pull_image", e.to_string()))?;
            if let Some(error) = progress.error {
                return Err(Error::engine("pull_image", error));
            }
            if let Some(status) = progress.status {
                debug!("{}: {}", reference, status);
            }
        }

        Ok(ImageRef {
            id: self.image_id(reference).await?,
            name: Some(reference.to_string()),
        })
    }

    async fn build_image(&self, context: &BuildContext, build_args: &BTreeMap<String, String>) -> Result<ImageRef> {
        let (archive, dockerfile) = context_archive(context)?;
        let options = BuildImageOptions {
            dockerfile,
            rm: true,
            buildargs: build_args.clone().into_iter().collect(),
            ..Default::default()
        };

        let mut image_id = None;
        let mut stream = self.docker.build_image(options, None, Some(archive.into()));
        while let Some(info) = stream.next().await {
            let info = info.map_err(|e| Error::engine("build_image", e.to_string()))?;
            if let Some(error) = info.error {
                return Err(Error::engine("build_image", error));
            }
            if let Some(line) = info.stream.as_deref().map(str::trim_end).filter(|l| !l.is_empty()) {
                debug!("{}", line);
            }
            if let Some(id) = info.aux.and_then(|aux| aux.id) {
                image_id = Some(id);
            }
        }

        let id = image_id.ok_or_else(|| Error::engine("build_image", "build finished without an image ID"))?;
        info!("Built image {}", id);
        Ok(ImageRef { id, name: None })
    }

    async fn tag_image(&self, image: &str, name: &str) -> Result<()> {
        let (repo, tag) = split_reference(name);
        self.docker
            .tag_image(image, Some(TagImageOptions { repo, tag }))
            .await
            .map_err(|e| Error::engine("tag_image", e.to_string()))
    }

    async fn push_image(&self, name: &str) -> Result<()> {
        let (repo, tag) = split_reference(name);
        let mut stream = self
            .docker
            .push_image(repo, Some(PushImageOptions { tag }), None);
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(|e| Error::engine("push_image", e.to_string()))?;
            if let Some(error) = progress.error {
                return Err(Error::engine("push_image", error));
            }
        }
        Ok(())
    }

    async fn search_images(&self, term: &str) -> Result<Vec<String>> {
        let results = self
            .docker
            .search_images(SearchImagesOptions {
                term,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::engine("search_images", e.to_string()))?;
        Ok(results.into_iter().filter_map(|item| item.name).collect())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.docker
            .remove_image(image, None::<RemoveImageOptions>, None)
            .await
            .map(|_| ())
            .map_err(|e| Error::engine("remove_image", e.to_string()))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerHandle>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::engine("list_containers", e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerHandle {
                    id: c.id?,
                    names: c.names.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerCreateSpec) -> Result<String> {
        let config: Config<String> = serde_json::from_value(spec.to_api_body())?;
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| Error::engine("create_container", e.to_string()))?;
        for warning in &response.warnings {
            debug!("create warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already running
            Err(DockerError::DockerResponseServerError { status_code: 304, .. }) => Ok(()),
            Err(e) => Err(container_error("start_container", id, e)),
        }
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| container_error("exec", id, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::engine("exec", e.to_string()))?;
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(msg) = output.next().await {
                match msg.map_err(|e| Error::engine("exec", e.to_string()))? {
                    LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                    LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::engine("exec", e.to_string()))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| container_error("inspect_container", id, e))?;

        let running = inspect
            .state
            .and_then(|state| state.running)
            .unwrap_or(false);
        let network = inspect
            .network_settings
            .map(|settings| NetworkSettings {
                ip_address: settings.ip_address.filter(|ip| !ip.is_empty()),
                gateway: settings.gateway.filter(|gw| !gw.is_empty()),
                ports: settings
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(port, bindings)| {
                        let bindings = bindings
                            .unwrap_or_default()
                            .into_iter()
                            .map(|b| PortBinding {
                                host_ip: b.host_ip,
                                host_port: b.host_port,
                            })
                            .collect();
                        (port, bindings)
                    })
                    .collect(),
            })
            .unwrap_or_default();

        Ok(ContainerDetails {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            running,
            network,
        })
    }

    async fn kill_container(&self, id: &str) -> Result<()> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| container_error("kill_container", id, e))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(|e| container_error("remove_container", id, e))
    }
}
