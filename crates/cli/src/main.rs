// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single entry binary for all three control-plane roles, dispatched by
//! first positional argument the same way the original CLI's
//! `instance_manager`/`node_manager`/`worker` entry points worked.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cf_adapters::LocalFleetProvider;
use cf_core::{InstanceId, SystemClock};
use cf_daemon::{DispatcherDaemon, FleetControllerDaemon, WorkerDaemon};
use cf_engine::{Classifier, FleetConfig, PlaceholderClassifier};
use cf_storage::{files_bucket, logging_bucket, LocalObjectStore, ObjectStore};

/// Conventional config path, loaded if present; every knob not set there
/// falls back to `FleetConfig::default()`.
const CONFIG_PATH: &str = "/etc/cf/config.toml";

fn load_config() -> Result<FleetConfig> {
    let path = std::path::Path::new(CONFIG_PATH);
    let path = path.exists().then_some(path);
    FleetConfig::load(path).context("failed to load configuration")
}

#[derive(Parser)]
#[command(name = "cf", about = "Classification fleet control plane")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Launch the fleet controller.
    #[command(name = "instance_manager")]
    InstanceManager {
        /// Bare tokens, e.g. `debug` and `git-pull=<branch>`.
        #[arg(trailing_var_arg = true)]
        opts: Vec<String>,
    },
    /// Launch the dispatcher.
    #[command(name = "node_manager")]
    NodeManager { fc_ip: String, self_instance_id: String, account_id: String },
    /// Launch a worker.
    Worker { fc_ip: String, self_instance_id: String, account_id: String, d_ip: String },
}

fn parse_instance_manager_opts(opts: &[String]) -> (bool, Option<String>) {
    let debug = opts.iter().any(|o| o == "debug");
    let git_pull_branch = opts.iter().find_map(|o| o.strip_prefix("git-pull=").map(str::to_string));
    (debug, git_pull_branch)
}

fn addr_with_port(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        ip.to_string()
    } else {
        format!("{ip}:{port}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::InstanceManager { opts } => run_instance_manager(opts).await,
        CliCommand::NodeManager { fc_ip, self_instance_id, account_id } => {
            run_node_manager(fc_ip, self_instance_id, account_id).await
        }
        CliCommand::Worker { fc_ip, self_instance_id, account_id, d_ip } => {
            run_worker(fc_ip, self_instance_id, account_id, d_ip).await
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "fatal error, exiting");
    }
    result
}

async fn run_instance_manager(opts: Vec<String>) -> Result<()> {
    let (debug, git_pull_branch) = parse_instance_manager_opts(&opts);
    let _guard = cf_daemon::init_logging(std::path::Path::new("/var/log/cf"), "instance_manager")
        .context("failed to initialize logging")?;

    let mut config = load_config()?;
    config.debug = debug;
    config.git_pull_branch = git_pull_branch.clone();
    let fc_port = config.fc_port;

    let provider = Arc::new(LocalFleetProvider::new());
    let controller =
        Arc::new(cf_engine::FleetController::new(Arc::clone(&provider), SystemClock, config));

    let bind_addr: SocketAddr = format!("0.0.0.0:{fc_port}").parse().context("invalid bind address")?;
    let dispatcher_boot_command = boot_command_for("node_manager", git_pull_branch.as_deref());
    let worker_boot_command = boot_command_for("worker", git_pull_branch.as_deref());

    let daemon = Arc::new(FleetControllerDaemon::new(controller, bind_addr, dispatcher_boot_command, worker_boot_command));
    daemon.run().await.context("fleet controller exited")?;
    Ok(())
}

/// `cf <role> {instance_id} ...` with the instance id left as a literal
/// placeholder the fleet controller fills in per instance at boot time. A
/// configured git-pull branch is checked out before the binary runs, the
/// CI-workflow convenience named in the config knobs.
fn boot_command_for(role: &str, git_pull_branch: Option<&str>) -> String {
    let run = format!("cf {role} {{instance_id}}");
    match git_pull_branch {
        Some(branch) => format!("cd /opt/cf && git checkout {branch} && git pull && {run}"),
        None => run,
    }
}

async fn run_node_manager(fc_ip: String, self_instance_id: String, account_id: String) -> Result<()> {
    let _guard = cf_daemon::init_logging(std::path::Path::new("/var/log/cf"), &self_instance_id)
        .context("failed to initialize logging")?;

    let config = load_config()?;
    let store = Arc::new(LocalObjectStore::new(std::path::Path::new("/var/lib/cf/objects")));
    let files = files_bucket(&account_id);
    let logging = logging_bucket(&account_id);
    store.ensure_bucket(&files).await.context("failed to ensure files bucket")?;
    store.ensure_bucket(&logging).await.context("failed to ensure logging bucket")?;

    let bind_addr: SocketAddr =
        format!("0.0.0.0:{}", config.dispatcher_port).parse().context("invalid bind address")?;
    let fc_addr = addr_with_port(&fc_ip, config.fc_port);

    let daemon = Arc::new(DispatcherDaemon::new(
        store,
        files,
        logging,
        InstanceId::from_string(&self_instance_id),
        bind_addr,
        fc_addr,
        config.dispatcher_heartbeat_interval(),
        config.logging_interval(),
    ));
    daemon.run().await.context("dispatcher exited")?;
    Ok(())
}

async fn run_worker(fc_ip: String, self_instance_id: String, account_id: String, d_ip: String) -> Result<()> {
    let _guard = cf_daemon::init_logging(std::path::Path::new("/var/log/cf"), &self_instance_id)
        .context("failed to initialize logging")?;
    // The FC connection only matters if this worker is separately monitored;
    // the upward heartbeat that drives task assignment goes to D.
    let _ = fc_ip;

    let config = load_config()?;
    let store = Arc::new(LocalObjectStore::new(std::path::Path::new("/var/lib/cf/objects")));
    let files = files_bucket(&account_id);
    let logging = logging_bucket(&account_id);
    store.ensure_bucket(&files).await.context("failed to ensure files bucket")?;
    store.ensure_bucket(&logging).await.context("failed to ensure logging bucket")?;

    let d_addr = addr_with_port(&d_ip, config.dispatcher_port);
    let classifier = default_classifier();

    let daemon = Arc::new(WorkerDaemon::new(
        store,
        files,
        logging,
        classifier,
        self_instance_id,
        d_addr,
        config.worker_heartbeat_interval(),
        config.logging_interval(),
    ));
    daemon.run().await.context("worker exited")?;
    Ok(())
}

fn default_classifier() -> impl Classifier {
    PlaceholderClassifier::new(6)
}
