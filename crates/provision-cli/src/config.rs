//! Hosts file loading and state file writing

use anyhow::{Context, Result, bail};
use docker_provisioner::{DockerOptions, HostRecord, ProvisionerOptions};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Hosts file layout; the state file uses the same layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostsFile {
    /// Provisioning behaviour
    #[serde(default)]
    pub options: ProvisionerOptions,
    /// Daemon transport settings
    #[serde(default)]
    pub docker: DockerOptions,
    /// Hosts in provisioning order
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
}

impl HostsFile {
    /// Hosts selected by name, or all of them
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&HostRecord>> {
        match name {
            None => Ok(self.hosts.iter().collect()),
            Some(name) => match self.hosts.iter().find(|h| h.name == name) {
                Some(host) => Ok(vec![host]),
                None => bail!("No host named '{}'", name),
            },
        }
    }
}

/// Load a hosts file, substituting `${VAR}` and `${VAR:-default}`
pub fn load(path: &Path) -> Result<HostsFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let content = substitute_env_vars(&raw, |name| std::env::var(name).ok())?;
    let file: HostsFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    validate(&file)?;
    Ok(file)
}

/// Write hosts, including provisioning outputs, back out
pub fn save(path: &Path, file: &HostsFile) -> Result<()> {
    let yaml = serde_yaml::to_string(file)?;
    fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))
}

/// `hosts.yaml` becomes `hosts.state.yaml` next to it
pub fn default_state_path(hosts: &Path) -> PathBuf {
    let stem = hosts
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hosts".to_string());
    hosts.with_file_name(format!("{}.state.yaml", stem))
}

fn validate(file: &HostsFile) -> Result<()> {
    let mut seen = HashSet::new();
    for host in &file.hosts {
        if host.name.is_empty() {
            bail!("Every host needs a name");
        }
        if !seen.insert(host.name.as_str()) {
            bail!("Host '{}' is defined more than once", host.name);
        }
    }
    Ok(())
}

/// Replace `${VAR}` and `${VAR:-default}` using `lookup`
pub fn substitute_env_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let re = Regex::new(r"\$\{([^}]+)\}")?;
    let mut missing = Vec::new();

    let result = re.replace_all(input, |caps: &regex::Captures<'_>| {
        let expr = &caps[1];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };
        match (lookup(name), default) {
            (Some(value), _) => value,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        bail!("Environment variables not set: {}", missing.join(", "));
    }
    Ok(result.into_owned())
}
