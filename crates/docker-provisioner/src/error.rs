//! Error types for container provisioning

use thiserror::Error;

/// Unified error type for provisioning and bootstrap operations
#[derive(Error, Debug)]
pub enum Error {
    /// The engine daemon could not be reached or answered with garbage
    #[error(
        "container engine not connectable: {reason}\n\
         * check that DOCKER_HOST points at a running daemon\n\
         * on macOS or Windows make sure the docker VM is up"
    )]
    EngineUnreachable {
        /// Why the version query failed
        reason: String,
    },

    /// Configuration that cannot work, detected before touching a host
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    /// A declared build context could not be used
    #[error("image build failed for host '{host}': {reason}")]
    ImageBuild {
        /// Host being provisioned
        host: String,
        /// The detailed reason
        reason: String,
    },

    /// No bootstrap recipe exists for the platform
    #[error("platform '{platform}' not yet supported on docker")]
    UnsupportedPlatform {
        /// The platform identifier as given on the host
        platform: String,
    },

    /// No container could be found and none could be created
    #[error("cannot continue for host '{host}': no existing container could be found and provisioning failed")]
    ProvisioningImpossible {
        /// Host being provisioned
        host: String,
    },

    /// Container metadata has no usable 22/tcp mapping
    #[error("container {container} has no published mapping for 22/tcp")]
    PortMappingUnavailable {
        /// Container ID
        container: String,
    },

    /// Container did not survive being started
    #[error("container '{container}' in a bad state: {reason}")]
    ContainerBadState {
        /// Container ID
        container: String,
        /// What the health probe saw
        reason: String,
    },

    /// An SSH install step exited non-zero
    #[error("ssh install step `{command}` failed in {container} with exit code {exit_code}: {output}")]
    SshInstall {
        /// Container ID
        container: String,
        /// The shell command that failed
        command: String,
        /// Exit code reported by the engine
        exit_code: i64,
        /// Combined output of the step
        output: String,
    },

    /// Container not found
    #[error("container not found: {id}")]
    ContainerNotFound {
        /// The container ID or name that was not found
        id: String,
    },

    /// An engine call failed
    #[error("engine operation '{operation}' failed: {reason}")]
    Engine {
        /// The engine call, e.g. `create_container`
        operation: &'static str,
        /// The detailed reason reported by the engine
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an engine operation error
    pub fn engine(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Engine {
            operation,
            reason: reason.into(),
        }
    }

    /// Create an image build error
    pub fn image_build(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImageBuild {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported platform error
    pub fn unsupported_platform(platform: impl Into<String>) -> Self {
        Self::UnsupportedPlatform {
            platform: platform.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
