//! Host records handed in by the test harness

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Password assigned to root in every provisioned container
pub const ROOT_PASSWORD: &str = "root";

/// One target machine as described by the harness inventory.
///
/// The caller owns the record. Provisioning reads the configuration fields
/// and writes connection details back; it never creates or drops records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostRecord {
    /// Host name, also used as the container hostname
    pub name: String,

    /// Base image reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Path to a Dockerfile to build instead of synthesizing one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Pull `image` and run it untouched
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub use_image_as_is: bool,
    /// Rely on the image's own entry point for sshd
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub use_image_entry_point: bool,
    /// Command override for the image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_cmd: Option<DockerCmd>,
    /// Platform identifier, e.g. `ubuntu-22.04-amd64`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Repository name to tag the resolved image with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Bind mounts keyed by an arbitrary label
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mount_folders: BTreeMap<String, MountFolder>,
    /// `KEY=VALUE` environment entries for the container
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub docker_env: Vec<String>,
    /// Linux capabilities to add
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub docker_cap_add: Vec<String>,
    /// Explicit container name, also used to re-attach
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_container_name: Option<String>,
    /// Container ID, supplied to re-attach and written after provisioning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_container_id: Option<String>,
    /// Leave the container (and therefore its image) behind on cleanup
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub docker_preserve_container: bool,
    /// Leave the image behind on cleanup
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub docker_preserve_image: bool,
    /// Raw engine create-body keys overlaid verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockeropts: Option<Map<String, Value>>,
    /// Build arguments for image builds
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub docker_buildargs: BTreeMap<String, String>,
    /// Extra `RUN` commands appended to synthesized images
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub docker_image_commands: Vec<String>,
    /// `ENTRYPOINT` override for synthesized images
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_image_entrypoint: Option<String>,

    /// Address the SSH client should dial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Port the SSH client should dial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// SSH connection descriptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshCredentials>,
    /// Image ID the container was created from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_image_id: Option<String>,
    /// Container address on the engine bridge network
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_ip: Option<String>,
    /// Set when provisioning re-attached to an existing container
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub use_existing_container: bool,
}

impl HostRecord {
    /// Create a record with only a name set
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the base image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the platform identifier
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Platform identifier or an empty string
    pub fn platform_str(&self) -> &str {
        self.platform.as_deref().unwrap_or("")
    }
}

/// A host folder mounted into the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountFolder {
    /// Path on the machine running the engine
    pub host_path: String,
    /// Path inside the container
    pub container_path: String,
    /// Mount options such as `ro` or `z`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<String>,
}

/// Image command in either Dockerfile form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DockerCmd {
    /// Shell form, used verbatim
    Shell(String),
    /// Exec form, one element per argument
    Exec(Vec<String>),
}

/// Connection descriptor handed to the harness SSH client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCredentials {
    /// Login user
    pub user: String,
    /// Login password
    pub password: String,
    /// Port to dial
    pub port: u16,
    /// Forward the local ssh-agent
    pub forward_agent: bool,
    /// Authentication methods the client may try, in order
    pub auth_methods: Vec<String>,
}

impl SshCredentials {
    /// Root/password credentials for a freshly provisioned container
    pub fn root(port: u16, forward_agent: bool) -> Self {
        Self {
            user: "root".to_string(),
            password: ROOT_PASSWORD.to_string(),
            port,
            forward_agent,
            auth_methods: ["password", "publickey", "hostbased", "keyboard-interactive"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_record_from_yaml() {
        let yaml = r#"
name: web01
image: ubuntu:22.04
platform: ubuntu-22.04-amd64
docker_cmd: ["/sbin/init"]
mount_folders:
  code:
    host_path: ./src
    container_path: /src
    opts: ro
docker_buildargs:
  HTTP_PROXY: http://proxy:3128
dockeropts:
  Labels:
    team: qa
"#;
        let host: HostRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(host.name, "web01");
        assert_eq!(host.docker_cmd, Some(DockerCmd::Exec(vec!["/sbin/init".to_string()])));
        assert_eq!(host.mount_folders["code"].opts.as_deref(), Some("ro"));
        assert_eq!(host.docker_buildargs["HTTP_PROXY"], "http://proxy:3128");
        assert!(host.dockeropts.unwrap().contains_key("Labels"));
        assert!(!host.use_image_as_is);
    }

    #[test]
    fn test_shell_cmd_parses_as_string() {
        let host: HostRecord =
            serde_yaml::from_str("name: a\ndocker_cmd: /usr/sbin/sshd -D\n").unwrap();
        assert_eq!(
            host.docker_cmd,
            Some(DockerCmd::Shell("/usr/sbin/sshd -D".to_string()))
        );
    }

    #[test]
    fn test_outputs_round_trip_through_yaml() {
        let mut host = HostRecord::new("db01").with_image("centos:7");
        host.ip = Some("10.0.0.5".to_string());
        host.port = Some(32768);
        host.ssh = Some(SshCredentials::root(32768, false));

        let yaml = serde_yaml::to_string(&host).unwrap();
        assert!(!yaml.contains("use_image_as_is"));

        let back: HostRecord = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, host);
    }

    #[test]
    fn test_root_credentials() {
        let creds = SshCredentials::root(2222, true);
        assert_eq!(creds.user, "root");
        assert_eq!(creds.password, ROOT_PASSWORD);
        assert!(creds.forward_agent);
        assert_eq!(creds.auth_methods[0], "password");
    }
}
