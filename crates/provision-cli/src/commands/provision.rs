use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, Table};
use docker_provisioner::{EngineEnvironment, EtcHostsFixup, HostRecord};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config;

pub async fn run(hosts_path: &Path, state_path: Option<PathBuf>, etc_hosts: bool) -> Result<()> {
    let mut file = config::load(hosts_path)?;
    let mut provisioner = super::connect(&file, EngineEnvironment::from_env()).await?;
    if etc_hosts {
        provisioner = provisioner.with_hostname_fixup(EtcHostsFixup);
    }

    let outcome = provisioner.provision(&mut file.hosts).await;

    // Written even on failure so cleanup can find what was created
    let state_path = state_path.unwrap_or_else(|| config::default_state_path(hosts_path));
    config::save(&state_path, &file)?;
    info!("State written to {}", state_path.display());

    let report = outcome.context("Provisioning failed")?;
    println!("{}", summary_table(&file.hosts));

    for failure in &report.failures {
        eprintln!(
            "✗ {} failed after {}: {}",
            failure.host, failure.state, failure.error
        );
    }
    if let Some(error) = &report.fixup_error {
        eprintln!("✗ hostname fixup failed: {}", error);
    }
    if !report.is_success() {
        bail!("{} of {} hosts failed", report.failures.len(), file.hosts.len());
    }
    Ok(())
}

fn summary_table(hosts: &[HostRecord]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["HOST", "IP", "PORT", "CONTAINER"]);

    for host in hosts {
        let container = host
            .docker_container_id
            .as_deref()
            .map(short_id)
            .unwrap_or_else(|| "-".to_string());
        let port = host.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        let name = if host.ip.is_some() {
            Cell::new(&host.name).fg(Color::Green)
        } else {
            Cell::new(&host.name).fg(Color::Red)
        };

        table.add_row(vec![
            name,
            Cell::new(host.ip.as_deref().unwrap_or("-")),
            Cell::new(port),
            Cell::new(container),
        ]);
    }
    table
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}
