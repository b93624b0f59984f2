/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! pipeline-sim – run the reference A → B → C pipeline on real cores.
//!
//! ```text
//! plain:  task_A ──AB──► task_B ──BC──► task_C
//!
//! --nmr:          ┌─AB_1─► task_B_1 ─BC_1─┐
//!         task_A ─┼─AB_2─► task_B_2 ─BC_2─┼─► voter ──CD──► task_C
//!                 └─AB_3─► task_B_3 ─BC_3─┘
//! ```
//!
//! `task_A` is periodic and writes `42`; every `B` checks for `42` and
//! forwards `43`; `task_C` checks for `43`.  A wrong value ends the run with
//! the data-integrity exit code.  `--faulty-core N` makes every payload that
//! lands on core `N` fail, so the reliability weights can be watched
//! diverging.
//!
//! Usage:
//!   pipeline-sim --nmr --cores 6 --faulty-core 2 --duration-secs 20
//!   RUST_LOG=debug pipeline-sim --period-ms 200

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use nix::sched::sched_getcpu;
use tracing::{error, info};

use relsched::channel::{ChannelRegistry, Pipe};
use relsched::config::{SchedulerConfig, Termination, VoterPolicy};
use relsched::cores::CoreId;
use relsched::process::{ForkLauncher, Payload, TaskExit};
use relsched::report::{write_report, Report};
use relsched::runner;
use relsched::scheduler::Scheduler;
use relsched::task::TaskParams;
use relsched::voter::majority;

const START_VALUE: i32 = 42;
const END_VALUE: i32 = 43;

/// Simulated work per payload.
const BUSY_TIME: Duration = Duration::from_micros(100);
/// How long a payload waits for its input message.
const READ_TIMEOUT: Duration = Duration::from_millis(10);
const MAX_MESSAGE: usize = 32;

type SimScheduler = Scheduler<ForkLauncher, ChannelRegistry>;

// ── CLI argument definition ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Standard,
    Weighted,
}

impl From<PolicyArg> for VoterPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Standard => VoterPolicy::Standard,
            PolicyArg::Weighted => VoterPolicy::Weighted,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "pipeline-sim",
    about = "Run the A → B → C pipeline (optionally NMR) under relsched",
    long_about = None,
)]
struct Cli {
    /// Triplicate task B and reconcile the replicas with a voter.
    #[arg(long)]
    nmr: bool,

    /// Number of cores in the pool.
    #[arg(long, default_value_t = 8)]
    cores: usize,

    /// Core reserved for the scheduler itself.
    #[arg(long = "scheduler-core", default_value_t = 0)]
    scheduler_core: CoreId,

    /// Period of task A in milliseconds.
    #[arg(long = "period-ms", default_value_t = 1000)]
    period_ms: u64,

    /// Wall-clock run time in seconds.
    #[arg(long = "duration-secs", default_value_t = 10)]
    duration_secs: u64,

    /// Fail every payload that runs on this core.
    #[arg(long = "faulty-core")]
    faulty_core: Option<CoreId>,

    /// Placement policy for the voter.
    #[arg(long = "voter-policy", value_enum, default_value_t = PolicyArg::Weighted)]
    voter_policy: PolicyArg,

    /// Write the final per-task / per-core results as YAML.
    #[arg(long)]
    report: Option<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        nmr           = cli.nmr,
        cores         = cli.cores,
        faulty_core   = ?cli.faulty_core,
        period_ms     = cli.period_ms,
        duration_secs = cli.duration_secs,
        "pipeline-sim starting"
    );

    if let Err(e) = run(cli).await {
        error!("pipeline-sim failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = SchedulerConfig {
        cores: cli.cores,
        scheduler_core: Some(cli.scheduler_core),
        voter_policy: cli.voter_policy.into(),
        termination: Termination::WallClock(Duration::from_secs(cli.duration_secs)),
        ..Default::default()
    };
    let fault = Fault {
        core: cli.faulty_core,
    };
    let period = Duration::from_millis(cli.period_ms);

    let mut scheduler = if cli.nmr {
        nmr_pipeline(config, period, fault)?
    } else {
        plain_pipeline(config, period, fault)?
    };

    runner::run(&mut scheduler).await?;
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
    Ok(())
}

// ── Pipelines ─────────────────────────────────────────────────────────────────

fn plain_pipeline(config: SchedulerConfig, period: Duration, fault: Fault) -> Result<SimScheduler> {
    let mut channels = ChannelRegistry::new();
    let (ab_id, ab) = channels.declare("pipe_AB")?;
    let (bc_id, bc) = channels.declare("pipe_BC")?;

    let mut s = Scheduler::new(config, ForkLauncher::new(), channels)?;
    s.add_task(
        TaskParams::new("task_A").period(period),
        producer(vec![Arc::clone(&ab)], fault),
    )?;
    s.add_task(
        TaskParams::new("task_B").input(ab_id),
        relay(ab, Arc::clone(&bc), fault),
    )?;
    s.add_task(TaskParams::new("task_C").input(bc_id), sink(bc, fault))?;
    Ok(s)
}

fn nmr_pipeline(config: SchedulerConfig, period: Duration, fault: Fault) -> Result<SimScheduler> {
    const REPLICAS: [&str; 3] = ["task_B_1", "task_B_2", "task_B_3"];

    let mut channels = ChannelRegistry::new();
    let ab = (1..=REPLICAS.len())
        .map(|i| channels.declare(&format!("pipe_AB_{i}")))
        .collect::<Result<Vec<_>, _>>()?;
    let bc = (1..=REPLICAS.len())
        .map(|i| channels.declare(&format!("pipe_BC_{i}")))
        .collect::<Result<Vec<_>, _>>()?;
    let (cd_id, cd) = channels.declare("pipe_CD")?;

    let mut s = Scheduler::new(config, ForkLauncher::new(), channels)?;

    let fan_out = ab.iter().map(|(_, pipe)| Arc::clone(pipe)).collect();
    s.add_task(TaskParams::new("task_A").period(period), producer(fan_out, fault))?;

    for (name, ((ab_id, ab), (_, bc))) in REPLICAS.iter().zip(ab.iter().zip(&bc)) {
        s.add_task(
            TaskParams::new(*name).input(*ab_id),
            relay(Arc::clone(ab), Arc::clone(bc), fault),
        )?;
    }

    let fan_in = bc.iter().map(|(_, pipe)| Arc::clone(pipe)).collect();
    s.add_voter(
        TaskParams::new("voter"),
        &REPLICAS,
        vote(fan_in, Arc::clone(&cd), fault),
    )?;
    s.add_task(TaskParams::new("task_C").input(cd_id), sink(cd, fault))?;
    Ok(s)
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Core-local fault injection.
#[derive(Debug, Clone, Copy)]
struct Fault {
    core: Option<CoreId>,
}

impl Fault {
    fn hit(self) -> bool {
        self.core
            .is_some_and(|faulty| sched_getcpu().ok() == Some(faulty))
    }
}

fn busy() {
    thread::sleep(BUSY_TIME);
}

fn parse_value(message: &[u8]) -> Option<i32> {
    std::str::from_utf8(message).ok()?.trim().parse().ok()
}

fn read_value(pipe: &Pipe) -> Option<i32> {
    let message = pipe.read_message(MAX_MESSAGE, Some(READ_TIMEOUT)).ok()??;
    parse_value(&message)
}

fn write_value(pipe: &Pipe, value: i32) -> TaskExit {
    match pipe.write(value.to_string().as_bytes()) {
        Ok(()) => TaskExit::Success,
        Err(_) => TaskExit::Failure,
    }
}

/// task_A: emit the start value on every output.
fn producer(outputs: Vec<Arc<Pipe>>, fault: Fault) -> impl Payload {
    move || {
        if fault.hit() {
            return TaskExit::Failure;
        }
        busy();
        for pipe in &outputs {
            if write_value(pipe, START_VALUE) != TaskExit::Success {
                return TaskExit::Failure;
            }
        }
        TaskExit::Success
    }
}

/// task_B: check the start value and forward its successor.
fn relay(input: Arc<Pipe>, output: Arc<Pipe>, fault: Fault) -> impl Payload {
    move || {
        if fault.hit() {
            return TaskExit::Failure;
        }
        let Some(value) = read_value(&input) else {
            return TaskExit::Failure;
        };
        if value != START_VALUE {
            return TaskExit::IntegrityFailure;
        }
        busy();
        write_value(&output, value + 1)
    }
}

/// task_C: check the end value.
fn sink(input: Arc<Pipe>, fault: Fault) -> impl Payload {
    move || {
        if fault.hit() {
            return TaskExit::Failure;
        }
        match read_value(&input) {
            Some(END_VALUE) => {
                busy();
                TaskExit::Success
            }
            Some(_) => TaskExit::IntegrityFailure,
            None => TaskExit::Failure,
        }
    }
}

/// voter: reconcile whatever the replicas produced and forward the winner.
fn vote(inputs: Vec<Arc<Pipe>>, output: Arc<Pipe>, fault: Fault) -> impl Payload {
    move || {
        if fault.hit() {
            return TaskExit::Failure;
        }
        let values: Vec<Option<Vec<u8>>> = inputs
            .iter()
            .map(|pipe| pipe.read_message(MAX_MESSAGE, Some(READ_TIMEOUT)).ok().flatten())
            .collect();

        match majority(&values) {
            Some(winner) => match output.write(&winner) {
                Ok(()) => TaskExit::Success,
                Err(_) => TaskExit::Failure,
            },
            None => TaskExit::Failure,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
