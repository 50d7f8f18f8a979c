//! Process entry point: loads configuration, builds the task registry and
//! command runner, and drives the scheduler loop until it asks to shut down
//! or a CLI admin command is given instead.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use anyhow::Context;
use chronoloom::cli::Cli;
use chronoloom::{AppConfig, ConfigLoader, Scheduler};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

/// `chronoloom-runner [--config PATH] <run | admin ...>`. `run` drives the
/// scheduler loop; `admin` dispatches a single §6 command against a
/// freshly-built scheduler for the configured task registry.
#[derive(Debug, Parser)]
#[command(name = "chronoloom-runner", about = "Run or administer a chronoloom workflow")]
struct TopLevel {
    /// Path to a TOML config file; falls back to `CHRONOLOOM_*` env vars and defaults.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Run the scheduler loop until shutdown.
    Run,
    /// Dispatch one §6 admin command (`set-outputs`, `pause`, `kill`, ...).
    Admin {
        #[command(subcommand)]
        cli: chronoloom::cli::Command,
        /// The workflow this command targets.
        workflow_id: String,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = TopLevel::parse();
    let config = load_config(&args.config);
    let config: AppConfig = match config {
        Ok(c) => c,
        Err(e) => {
            // anyhow's alternate format prints the full `.context(...)` chain,
            // e.g. "reading config file `x.toml` -> invalid toml: ...".
            eprintln!("Error: {e:#}");
            return std::process::ExitCode::from(2);
        }
    };
    chronoloom::observability::init_subscriber(&config.logging);

    match args.mode {
        Mode::Run => match run(config).await {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::ExitCode::FAILURE
            }
        },
        Mode::Admin { cli, workflow_id } => {
            let mut scheduler = match build_scheduler(&config) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return std::process::ExitCode::from(3);
                }
            };
            let parsed = Cli { workflow_id, command: cli };
            let code = chronoloom::cli::dispatch(&parsed, &mut scheduler);
            std::process::ExitCode::from(code as u8)
        }
    }
}

/// The host selector (§4.3) is independent of the tick loop: it is invoked
/// only at server start-up and whenever auxiliary work is placed on a
/// foreign host. This picks the host the engine's own support processes
/// (not task jobs, which route through each task's own platform) run on.
async fn select_startup_host(config: &AppConfig) {
    if config.host_pool.hosts.is_empty() {
        return;
    }
    let resolver = chronoloom::host::DnsResolver;
    let runner = chronoloom::remote::LocalRunner::new("chronoloom-host-metrics");
    let selector = chronoloom::host::HostSelector::new(&resolver, &runner);
    let selection = selector
        .select(
            &config.host_pool.hosts,
            &config.host_pool.blacklist,
            config.host_pool.blacklist_reason.as_deref(),
            config.host_pool.thresholds.as_deref(),
        )
        .await;
    match selection {
        Ok(host) => tracing::info!(host = %host.fqdn, "selected startup host"),
        Err(e) => tracing::warn!(error = %e, "no startup host available, continuing without one"),
    }
}

/// Loads config and wraps failures with the path that caused them; the only
/// place `anyhow` is used, as a reporting convenience at the process
/// boundary rather than as the crate's error type.
fn load_config(path: &Option<std::path::PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("reading config file `{}`", path.display())),
        None => ConfigLoader::load_from_env().context("loading config from environment"),
    }
}

fn build_scheduler(config: &AppConfig) -> chronoloom::Result<Scheduler> {
    let registry = config.build_registry()?;
    let max_runahead = chronoloom::Interval::parse(&config.scheduler.max_runahead)?;
    let runner: Arc<dyn chronoloom::remote::CommandRunner> =
        Arc::new(chronoloom::remote::LocalRunner::new("chronoloom-job-runner"));
    let mut scheduler = Scheduler::new(config.service.name.clone(), registry, max_runahead, runner);
    if let Some(stop) = &config.scheduler.stop_time {
        scheduler.stop_time = Some(chronoloom::cycle::Point::parse(stop)?);
    }
    Ok(scheduler)
}

async fn run(config: AppConfig) -> chronoloom::Result<()> {
    let mut scheduler = build_scheduler(&config)?;
    select_startup_host(&config).await;
    let tick_interval = Duration::from_millis(config.scheduler.tick_interval_ms);

    loop {
        let report = scheduler.tick().await?;
        tracing::info!(
            tick = scheduler.tick_count(),
            dispatched = report.dispatched.len(),
            spawned = report.spawned.len(),
            deleted = report.deleted.len(),
            "tick complete"
        );
        if report.shutdown {
            tracing::info!("stop time reached with no outstanding work, shutting down");
            return Ok(());
        }
        tokio::time::sleep(tick_interval).await;
    }
}
