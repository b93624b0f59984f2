/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use relsched::channel::NoInputs;
use relsched::config::{TaskEntry, Termination, WorkloadConfig};
use relsched::process::{ExecPayload, ForkLauncher};
use relsched::report::{write_report, Report};
use relsched::runner;
use relsched::scheduler::Scheduler;
use relsched::task::TaskParams;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Reliability-aware multi-core task scheduler.
///
/// Example:
///   relsched --config workload.yaml --duration-secs 30 --report results.yaml
#[derive(Debug, Parser)]
#[command(
    name = "relsched",
    about = "Reliability-aware multi-core task scheduler with N-modular redundancy",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML workload file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Override the termination budget with a wall-clock limit in seconds.
    #[arg(short = 'd', long = "duration-secs")]
    duration_secs: Option<u64>,

    /// Write the final per-task / per-core results as YAML.
    #[arg(short = 'r', long = "report")]
    report: Option<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

// Task processes are forked from the scheduler thread, so the runtime must
// stay single-threaded.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!(
        config        = %cli.config.display(),
        duration_secs = ?cli.duration_secs,
        report        = ?cli.report,
        "relsched starting up"
    );

    if let Err(e) = run(cli).await {
        error!("relsched failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut workload = WorkloadConfig::load_from_file(&cli.config)?;
    if let Some(secs) = cli.duration_secs {
        workload.scheduler.termination = Termination::WallClock(Duration::from_secs(secs));
    }

    let mut scheduler = Scheduler::new(workload.scheduler, ForkLauncher::new(), NoInputs)?;
    register_tasks(&mut scheduler, &workload.tasks)?;

    let reason = runner::run(&mut scheduler).await?;
    scheduler.log_summary();

    if let Some(path) = &cli.report {
        let final_snapshot = scheduler.snapshot();
        write_report(
            path,
            &Report {
                history: scheduler.history(),
                final_snapshot: &final_snapshot,
            },
        )?;
    }

    info!(?reason, "relsched finished");
    Ok(())
}

/// Register plain tasks first so voters may name replicas declared after them.
fn register_tasks(
    scheduler: &mut Scheduler<ForkLauncher, NoInputs>,
    tasks: &[TaskEntry],
) -> Result<()> {
    let (voters, plain): (Vec<&TaskEntry>, Vec<&TaskEntry>) =
        tasks.iter().partition(|entry| entry.is_voter());

    for entry in plain {
        let payload = ExecPayload::new(&entry.command)
            .with_context(|| format!("Task '{}' has an invalid command", entry.name))?;
        scheduler.add_task(params_for(entry), payload)?;
    }

    for entry in voters {
        let payload = ExecPayload::new(&entry.command)
            .with_context(|| format!("Voter '{}' has an invalid command", entry.name))?;
        let replicas: Vec<&str> = entry.replicas.iter().map(String::as_str).collect();
        scheduler.add_voter(params_for(entry), &replicas, payload)?;
    }

    Ok(())
}

fn params_for(entry: &TaskEntry) -> TaskParams {
    TaskParams::new(entry.name.clone())
        .period(entry.period())
        .offset(entry.offset())
        .priority(entry.priority)
}
