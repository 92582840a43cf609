//! Container creation requests

use crate::engine::SSH_PORT_KEY;
use crate::host::{HostRecord, MountFolder};
use crate::image::ImageStrategy;
use serde_json::{Map, Value, json};
use std::path::{Component, Path, PathBuf};

/// Everything needed to create one container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerCreateSpec {
    /// Container name, if the host asked for one
    pub name: Option<String>,
    /// Image ID or registry name
    pub image: String,
    /// Container hostname
    pub hostname: String,
    /// Declare 22/tcp as exposed at container level
    pub expose_ssh: bool,
    /// Raw create-body keys applied over the defaults
    pub overlay: Map<String, Value>,
    /// `host:container[:opts]` bind strings
    pub binds: Vec<String>,
    /// `KEY=VALUE` environment entries
    pub env: Vec<String>,
    /// Capabilities to add
    pub cap_add: Vec<String>,
}

impl ContainerCreateSpec {
    /// Render the engine API create body
    pub fn to_api_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("Image".to_string(), json!(self.image));
        body.insert("Hostname".to_string(), json!(self.hostname));
        if self.expose_ssh {
            body.insert("ExposedPorts".to_string(), json!({ SSH_PORT_KEY: {} }));
        }
        body.insert(
            "HostConfig".to_string(),
            json!({
                // Empty HostPort lets the engine pick a free high port
                "PortBindings": { SSH_PORT_KEY: [{ "HostIp": "0.0.0.0", "HostPort": "" }] },
                "PublishAllPorts": true,
                "Privileged": true,
                "RestartPolicy": { "Name": "always" },
            }),
        );

        for (key, value) in &self.overlay {
            body.insert(key.clone(), value.clone());
        }

        if !self.binds.is_empty() || !self.cap_add.is_empty() {
            let host_config = body
                .entry("HostConfig")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(host_config) = host_config {
                if !self.binds.is_empty() {
                    host_config.insert("Binds".to_string(), json!(self.binds));
                }
                if !self.cap_add.is_empty() {
                    host_config.insert("CapAdd".to_string(), json!(self.cap_add));
                }
            }
        }
        if !self.env.is_empty() {
            body.insert("Env".to_string(), json!(self.env));
        }

        Value::Object(body)
    }
}

/// Where relative and drive-letter mount paths resolve
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountContext {
    /// Base for relative host paths
    pub working_dir: PathBuf,
    /// Target of `~`
    pub home_dir: Option<PathBuf>,
    /// Running under Docker Toolbox
    pub toolbox: bool,
}

/// Assemble the create request for a host
///
/// `global_dockeropts` only applies when the host has no `dockeropts` of its own.
pub fn build(
    host: &HostRecord,
    image_name: &str,
    strategy: ImageStrategy,
    global_dockeropts: Option<&Map<String, Value>>,
    mounts: &MountContext,
) -> ContainerCreateSpec {
    ContainerCreateSpec {
        name: host.docker_container_name.clone(),
        image: image_name.to_string(),
        hostname: host.name.clone(),
        expose_ssh: strategy == ImageStrategy::Dockerfile,
        overlay: host
            .dockeropts
            .as_ref()
            .or(global_dockeropts)
            .cloned()
            .unwrap_or_default(),
        binds: host
            .mount_folders
            .values()
            .map(|mount| bind_string(mount, mounts))
            .collect(),
        env: host.docker_env.clone(),
        cap_add: host.docker_cap_add.clone(),
    }
}

/// Translate a mount into `host:container[:opts]`
pub fn bind_string(mount: &MountFolder, ctx: &MountContext) -> String {
    let mut host_path = absolute_path(&mount.host_path, ctx);
    if ctx.toolbox {
        host_path = toolbox_path(&host_path);
    }

    let mut parts = vec![host_path, mount.container_path.clone()];
    if let Some(opts) = &mount.opts {
        parts.push(opts.clone());
    }
    parts.join(":")
}

fn absolute_path(raw: &str, ctx: &MountContext) -> String {
    if is_drive_path(raw) {
        return raw.to_string();
    }

    let expanded = match (raw.strip_prefix('~'), &ctx.home_dir) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(raw),
    };
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        ctx.working_dir.join(expanded)
    };
    normalize(&joined).to_string_lossy().into_owned()
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

/// `C:/foo` becomes `/c/foo`, the Toolbox VM mount convention
fn toolbox_path(path: &str) -> String {
    if !is_drive_path(path) {
        return path.to_string();
    }
    let drive = path[..1].to_ascii_lowercase();
    format!("/{}{}", drive, &path[2..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx(toolbox: bool) -> MountContext {
        MountContext {
            working_dir: PathBuf::from("/home/user"),
            home_dir: Some(PathBuf::from("/home/user")),
            toolbox,
        }
    }

    fn mount(host_path: &str, container_path: &str) -> MountFolder {
        MountFolder {
            host_path: host_path.to_string(),
            container_path: container_path.to_string(),
            opts: None,
        }
    }

    #[test]
    fn test_toolbox_drive_translation() {
        assert_eq!(bind_string(&mount("C:/work", "/work"), &ctx(true)), "/c/work:/work");
    }

    #[test]
    fn test_absolute_path_without_toolbox() {
        assert_eq!(
            bind_string(&mount("/home/user/work", "/work"), &ctx(false)),
            "/home/user/work:/work"
        );
    }

    #[test]
    fn test_relative_and_home_paths() {
        assert_eq!(
            bind_string(&mount("./work/../src", "/src"), &ctx(false)),
            "/home/user/src:/src"
        );
        let mut m = mount("~/data", "/data");
        m.opts = Some("ro".to_string());
        assert_eq!(bind_string(&m, &ctx(false)), "/home/user/data:/data:ro");
    }

    #[test]
    fn test_default_body() {
        let host = HostRecord::new("web01");
        let spec = build(&host, "sha256:abc", ImageStrategy::Synthesized, None, &ctx(false));
        let body = spec.to_api_body();

        assert_eq!(body["Image"], "sha256:abc");
        assert_eq!(body["Hostname"], "web01");
        assert!(body.get("ExposedPorts").is_none());
        assert_eq!(body["HostConfig"]["PortBindings"]["22/tcp"][0]["HostIp"], "0.0.0.0");
        assert_eq!(body["HostConfig"]["PublishAllPorts"], true);
        assert_eq!(body["HostConfig"]["Privileged"], true);
        assert_eq!(body["HostConfig"]["RestartPolicy"]["Name"], "always");
        assert!(body.get("Env").is_none());
        assert!(spec.name.is_none());
    }

    #[test]
    fn test_dockerfile_strategy_exposes_ssh() {
        let host = HostRecord::new("web01");
        let spec = build(&host, "img", ImageStrategy::Dockerfile, None, &ctx(false));
        assert!(spec.to_api_body()["ExposedPorts"]["22/tcp"].is_object());
    }

    #[test]
    fn test_overlay_and_host_fields() {
        let mut host = HostRecord::new("web01");
        host.docker_container_name = Some("web01-ctr".to_string());
        host.docker_env = vec!["FOO=bar".to_string()];
        host.docker_cap_add = vec!["NET_ADMIN".to_string()];
        host.mount_folders = BTreeMap::from([("src".to_string(), mount("/srv/src", "/src"))]);

        let mut global = Map::new();
        global.insert("Labels".to_string(), json!({"owner": "ci"}));
        global.insert("HostConfig".to_string(), json!({"Memory": 1024}));

        let spec = build(&host, "img", ImageStrategy::Synthesized, Some(&global), &ctx(false));
        let body = spec.to_api_body();

        assert_eq!(spec.name.as_deref(), Some("web01-ctr"));
        assert_eq!(body["Labels"]["owner"], "ci");
        // overlay replaces the whole key, mounts and caps are layered on top
        assert_eq!(body["HostConfig"]["Memory"], 1024);
        assert!(body["HostConfig"].get("Privileged").is_none());
        assert_eq!(body["HostConfig"]["Binds"][0], "/srv/src:/src");
        assert_eq!(body["HostConfig"]["CapAdd"][0], "NET_ADMIN");
        assert_eq!(body["Env"][0], "FOO=bar");
    }

    #[test]
    fn test_host_dockeropts_win_over_global() {
        let mut host = HostRecord::new("a");
        let mut own = Map::new();
        own.insert("User".to_string(), json!("root"));
        host.dockeropts = Some(own);

        let mut global = Map::new();
        global.insert("Labels".to_string(), json!({"owner": "ci"}));

        let body = build(&host, "img", ImageStrategy::AsIs, Some(&global), &ctx(false)).to_api_body();
        assert_eq!(body["User"], "root");
        assert!(body.get("Labels").is_none());
    }
}
