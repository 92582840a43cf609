//! Declarative image build recipes
//!
//! A recipe is an ordered list of typed layers. Rendering to Dockerfile text
//! is a pure step so the exact text can be inspected without a daemon.

use crate::catalog::{self, PlatformFamily};
use crate::host::{DockerCmd, HostRecord};
use std::fmt;

/// Port sshd listens on inside the container
pub const SSH_PORT: u16 = 22;

/// One Dockerfile instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    /// `FROM <image>`
    From(String),
    /// `ENV <key> <value>`
    Env(String, String),
    /// `RUN <shell command>`
    Run(String),
    /// `ENTRYPOINT <raw>`
    Entrypoint(String),
    /// `CMD ...`
    Cmd(DockerCmd),
    /// `EXPOSE <port>`
    Expose(u16),
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::From(image) => write!(f, "FROM {}", image),
            Layer::Env(key, value) => write!(f, "ENV {} {}", key, value),
            Layer::Run(command) => write!(f, "RUN {}", command),
            Layer::Entrypoint(raw) => write!(f, "ENTRYPOINT {}", raw),
            Layer::Cmd(DockerCmd::Shell(raw)) => write!(f, "CMD {}", raw),
            Layer::Cmd(DockerCmd::Exec(args)) => {
                let json = serde_json::to_string(args).map_err(|_| fmt::Error)?;
                write!(f, "CMD {}", json)
            }
            Layer::Expose(port) => write!(f, "EXPOSE {}", port),
        }
    }
}

/// Ordered list of layers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRecipe {
    layers: Vec<Layer>,
}

impl BuildRecipe {
    /// Start a recipe from a base image
    pub fn from_image(image: impl Into<String>) -> Self {
        Self {
            layers: vec![Layer::From(image.into())],
        }
    }

    /// Append a layer
    pub fn push(&mut self, layer: Layer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    /// Append one `RUN` layer per command
    pub fn run_all<I, S>(&mut self, commands: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layers
            .extend(commands.into_iter().map(|c| Layer::Run(c.into())));
        self
    }

    /// Layers in order
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The `RUN` commands in order
    pub fn run_commands(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().filter_map(|layer| match layer {
            Layer::Run(command) => Some(command.as_str()),
            _ => None,
        })
    }

    /// Render to Dockerfile text, one instruction per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for layer in &self.layers {
            out.push_str(&layer.to_string());
            out.push('\n');
        }
        out
    }

    /// Recipe for hosts that rely on the image's own entry point
    pub fn entry_point_only(image: &str, cmd: Option<&DockerCmd>) -> Self {
        let mut recipe = Self::from_image(image);
        recipe.push(Layer::Expose(SSH_PORT));
        if let Some(cmd) = cmd {
            recipe.push(Layer::Cmd(cmd.clone()));
        }
        recipe
    }

    /// Full SSH-enabled recipe for a host on a catalogued platform
    ///
    /// Layer order: base, install + keygen, account setup, sshd hardening,
    /// host commands, entrypoint, command, expose.
    pub fn ssh_image(image: &str, family: PlatformFamily, host: &HostRecord) -> Self {
        let mut recipe = Self::from_image(image);
        recipe
            .push(Layer::Env("container".to_string(), "docker".to_string()))
            .run_all(family.install_commands().iter().copied())
            .run_all(catalog::account_commands())
            .run_all(catalog::hardening_commands())
            .run_all(host.docker_image_commands.iter().cloned());

        if let Some(entrypoint) = &host.docker_image_entrypoint {
            recipe.push(Layer::Entrypoint(entrypoint.clone()));
        }

        let cmd = host
            .docker_cmd
            .clone()
            .unwrap_or_else(|| DockerCmd::Exec(family.start_command()));
        recipe.push(Layer::Cmd(cmd)).push(Layer::Expose(SSH_PORT));
        recipe
    }
}

impl fmt::Display for BuildRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
