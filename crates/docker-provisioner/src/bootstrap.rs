//! Getting sshd running inside live containers

use crate::catalog::{self, PlatformFamily};
use crate::engine::{Engine, ExecOutput};
use crate::error::{Error, Result};
use tracing::{debug, warn};

/// Warnings gathered during a repair pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Steps that exited non-zero
    pub warnings: Vec<String>,
}

/// Runs bootstrap recipes through the engine's exec call
pub struct SshBootstrapper<'a> {
    engine: &'a dyn Engine,
}

impl<'a> SshBootstrapper<'a> {
    /// Create a bootstrapper
    pub fn new(engine: &'a dyn Engine) -> Self {
        Self { engine }
    }

    /// Install sshd, generate host keys and set the root password
    pub async fn install_ssh(&self, container: &str, platform: &str) -> Result<()> {
        let family = PlatformFamily::for_platform(platform)
            .ok_or_else(|| Error::unsupported_platform(platform))?;
        debug!("Installing ssh components for {:?} in {}", family, container);

        let steps = family
            .install_commands()
            .iter()
            .map(|c| c.to_string())
            .chain(catalog::account_commands());
        for step in steps {
            let output = self.sh(container, &step).await?;
            if !output.success() {
                return Err(Error::SshInstall {
                    container: container.to_string(),
                    command: step,
                    exit_code: output.exit_code,
                    output: output.combined(),
                });
            }
        }
        Ok(())
    }

    /// Force root/password login, disable reverse DNS and raise MaxAuthTries
    ///
    /// Safe to run any number of times. With a platform, sshd is restarted
    /// afterwards; unknown platforms skip the restart with a warning.
    pub async fn repair_ssh(&self, container: &str, platform: Option<&str>) -> Result<RepairOutcome> {
        debug!("Fixing ssh on container {}", container);
        let mut outcome = RepairOutcome::default();

        let mut steps = catalog::hardening_commands();
        steps.push(catalog::max_auth_tries_command());

        if let Some(platform) = platform {
            match PlatformFamily::for_platform(platform) {
                Some(family) => steps.push(family.restart_command()),
                None => outcome
                    .warnings
                    .push(format!("no sshd restart known for platform '{}'", platform)),
            }
        }

        for step in steps {
            let output = self.sh(container, &step).await?;
            if !output.success() {
                let message = format!(
                    "`{}` exited {} in {}: {}",
                    step,
                    output.exit_code,
                    container,
                    output.combined()
                );
                warn!("{}", message);
                outcome.warnings.push(message);
            }
        }
        Ok(outcome)
    }

    async fn sh(&self, container: &str, command: &str) -> Result<ExecOutput> {
        let cmd = ["/bin/sh".to_string(), "-c".to_string(), command.to_string()];
        self.engine.exec(container, &cmd).await
    }
}
