/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Async driver for the scheduler loop.
//!
//! The scheduler itself is synchronous.  `run` paces it with a tokio interval
//! of `idle_sleep` and races every tick against Ctrl+C:
//!
//! ```text
//! activate
//! loop {
//!     select! {
//!         ctrl_c        → break (Interrupted)
//!         ticker.tick() → is_active? monitor + dispatch : break (Completed)
//!     }
//! }
//! shutdown          (always: SIGKILL + reap outstanding processes)
//! ```
//!
//! Must run on a `current_thread` runtime: `fork` from a multi-threaded
//! parent only duplicates the calling thread.

use std::time::Instant;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::channel::Readiness;
use crate::process::Launcher;
use crate::scheduler::{Scheduler, SchedulerError};

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The termination budget was reached.
    Completed,
    /// Ctrl+C was received.
    Interrupted,
}

/// Activate `scheduler` and drive it until its budget is spent or the process
/// is interrupted.  Every task process is stopped before returning.
///
/// # Errors
/// Activation errors and fatal dispatch errors from the scheduler.
pub async fn run<L, R>(scheduler: &mut Scheduler<L, R>) -> Result<StopReason, SchedulerError>
where
    L: Launcher,
    R: Readiness,
{
    scheduler.activate()?;

    let mut ticker = interval(scheduler.config().idle_sleep);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let reason = loop {
        tokio::select! {
            result = &mut interrupt => {
                match result {
                    Ok(()) => info!("Ctrl+C received, stopping scheduler"),
                    Err(e) => warn!(error = %e, "failed to listen for Ctrl+C, stopping scheduler"),
                }
                break StopReason::Interrupted;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                if !scheduler.is_active_at(now) {
                    break StopReason::Completed;
                }
                scheduler.run_cycle_at(now)?;
            }
        }
    };

    scheduler.shutdown();
    info!(?reason, "Scheduler stopped");
    Ok(reason)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
