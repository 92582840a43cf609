use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use docker_provisioner::EngineEnvironment;
use std::path::Path;

use crate::config;

pub async fn run(state_path: &Path) -> Result<()> {
    let file = config::load(state_path)?;
    let provisioner = super::connect(&file, EngineEnvironment::from_env()).await?;

    let report = provisioner.cleanup(&file.hosts).await;

    println!(
        "Removed {} containers and {} images",
        report.containers_removed.len(),
        report.images_removed.len()
    );
    for name in &report.skipped {
        println!("  Preserved container for {}", name);
    }

    if !report.is_clean() {
        let mut table = Table::new();
        table.set_header(vec!["HOST", "STEP", "ISSUE"]);
        for issue in &report.issues {
            table.add_row(vec![
                Cell::new(&issue.host),
                Cell::new(format!("{:?}", issue.step)).fg(Color::Yellow),
                Cell::new(&issue.message),
            ]);
        }
        println!("{}", table);
    }
    Ok(())
}
