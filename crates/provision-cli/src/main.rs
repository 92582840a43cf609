//! Command-line driver for the docker provisioner
//!
//! Reads a YAML hosts file, provisions the hosts on the local (or
//! `DOCKER_HOST`) daemon and writes the populated records to a state file
//! that `cleanup` later consumes.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "docker-provision")]
#[command(about = "Provision disposable SSH-reachable test hosts on Docker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start containers for every host
    Provision {
        /// Hosts file
        #[arg(long, value_name = "FILE")]
        hosts: PathBuf,
        /// Where to write the populated hosts (default: <hosts>.state.yaml)
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,
        /// Add every host to every container's /etc/hosts
        #[arg(long)]
        etc_hosts: bool,
    },

    /// Remove containers and images recorded in a state file
    Cleanup {
        /// State file written by `provision`
        #[arg(long, value_name = "FILE")]
        state: PathBuf,
    },

    /// Show the image each host would be built from, without a daemon
    Recipe {
        /// Hosts file
        #[arg(long, value_name = "FILE")]
        hosts: PathBuf,
        /// Only this host
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Provision {
            hosts,
            state,
            etc_hosts,
        } => commands::provision::run(&hosts, state, etc_hosts).await,
        Commands::Cleanup { state } => commands::cleanup::run(&state).await,
        Commands::Recipe { hosts, host } => commands::recipe::run(&hosts, host.as_deref()),
    }
}
