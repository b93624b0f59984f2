/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error type for the scheduler.
//!
//! Only two kinds of failure reach the caller:
//!
//! * registration / configuration mistakes, detected before activation;
//! * process-creation failure during dispatch, which stops the scheduler.
//!
//! Task failures, stuck tasks and "no core available" are **not** errors.
//! They are recorded in task/core counters and retried on later cycles.

use thiserror::Error;

use crate::process::LaunchError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A configuration value is out of range.
    #[error("invalid scheduler configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A task with the same name is already registered.
    #[error("task '{0}' is already registered")]
    DuplicateTask(String),

    /// A voter names a replica that was never registered.
    #[error("voter '{voter}' references unknown replica '{replica}'")]
    UnknownReplica { voter: String, replica: String },

    /// A voter was registered without replicas.
    #[error("voter '{voter}' has no replicas")]
    EmptyReplicaSet { voter: String },

    /// A voter lists itself (or another voter) as a replica.
    #[error("voter '{voter}' cannot use voter '{replica}' as a replica")]
    NestedVoter { voter: String, replica: String },

    /// The iteration budget references a task that does not exist.
    #[error("termination budget references unknown task '{0}'")]
    UnknownTerminationTask(String),

    /// The scheduler process could not be pinned to its reserved core.
    #[error("failed to pin scheduler to core {core}: {source}")]
    PinScheduler { core: usize, source: LaunchError },

    /// Creating a task process failed; every running task has been stopped.
    #[error("failed to launch task '{task}': {source}")]
    Spawn { task: String, source: LaunchError },
}
