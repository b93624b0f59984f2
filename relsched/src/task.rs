/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task records and the per-task execution state machine.
//!
//! ```text
//!            inputs ready ∧ period elapsed ∧ offset elapsed ∧ core selected
//!   ┌──────┐ ─────────────────────────────────────────────► ┌──────────┐
//!   │ Idle │                                                │ Fireable │
//!   └──────┘ ◄──── exit 0 ──┐                               └──────────┘
//!      ▲                    │                                    │ dispatch
//!      │              ┌─────────┐ ◄──────────────────────────────┘
//!      │              │ Running │
//!      │              └─────────┘ ── exit ≠ 0 / signal / stuck ──► ┌─────────┐
//!      └──────────── (next eligible cycle) ◄────────────────────── │ Crashed │
//!                                                                  └─────────┘
//! ```
//!
//! # Ownership model
//! Tasks live in the scheduler's `Vec<Task>` arena and are addressed by
//! [`TaskId`].  Voters reference their replicas by `TaskId` as well, so there
//! are no borrowed pointers between records.

use std::fmt;
use std::time::{Duration, Instant};

use crate::channel::ChannelId;
use crate::cores::CoreId;
use crate::process::{Payload, PollStatus, ProcessExit, ProcessHandle, TaskExit};
use crate::voter::VoterData;

/// Index of a task inside the scheduler's task arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    pub fn index(self) -> usize {
        self.0
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Idle,
    /// Eligible and holding a core, waiting for the next dispatch.
    Fireable,
    Running,
    /// Last run failed; the task stays schedulable on its next period.
    Crashed,
}

/// Classified result of one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Non-zero exit, termination by signal, lost process or stuck.
    Failure,
    /// The payload's data-integrity exit code.
    IntegrityError,
}

impl Outcome {
    pub fn from_exit(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Code(code) => match TaskExit::from_code(code) {
                TaskExit::Success => Outcome::Success,
                TaskExit::Failure => Outcome::Failure,
                TaskExit::IntegrityFailure => Outcome::IntegrityError,
            },
            ProcessExit::Signaled(_) | ProcessExit::Lost => Outcome::Failure,
        }
    }

    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }
}

// ── Kind ──────────────────────────────────────────────────────────────────────

/// Plain task or NMR voter.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Plain,
    Voter(VoterData),
}

// ── Statistics ────────────────────────────────────────────────────────────────

/// Per-task counters reported to the results sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Launches (incremented at dispatch).
    pub runs: u64,
    pub success: u64,
    pub fails: u64,
    /// Runs that ended with the data-integrity exit code.
    pub errors: u64,
    /// Launch count per core id.
    pub core_runs: Vec<u64>,
}

impl TaskStats {
    fn with_cores(cores: usize) -> Self {
        Self {
            core_runs: vec![0; cores],
            ..Default::default()
        }
    }
}

// ── Registration parameters ───────────────────────────────────────────────────

/// Static description of a task supplied at registration time.
#[derive(Debug, Clone, Default)]
pub struct TaskParams {
    /// Unique name.
    pub name: String,
    /// `Duration::ZERO` marks an acyclic (event-driven) task.
    pub period: Duration,
    /// Delay after scheduler activation before the first eligibility.
    pub offset: Duration,
    /// Higher values are evaluated first.
    pub priority: i32,
    /// Channels that must hold data before the task may fire.
    pub inputs: Vec<ChannelId>,
}

impl TaskParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn input(mut self, channel: ChannelId) -> Self {
        self.inputs.push(channel);
        self
    }
}

// ── Task ──────────────────────────────────────────────────────────────────────

/// One schedulable unit of work.
///
/// Invariants:
/// * at most one outstanding process (`process` is `Some` only while
///   `Running`);
/// * `assigned_core` is `Some` only while `Fireable` or `Running`.
pub struct Task {
    name: String,
    period: Duration,
    offset: Duration,
    priority: i32,
    inputs: Vec<ChannelId>,
    kind: TaskKind,
    payload: Box<dyn Payload>,

    state: TaskState,
    assigned_core: Option<CoreId>,
    process: Option<ProcessHandle>,
    cycle_start: Option<Instant>,
    last_poll: Option<PollStatus>,
    last_outcome: Option<Outcome>,
    stats: TaskStats,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("offset", &self.offset)
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("assigned_core", &self.assigned_core)
            .field("process", &self.process)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub(crate) fn new(
        params: TaskParams,
        kind: TaskKind,
        payload: Box<dyn Payload>,
        cores: usize,
    ) -> Self {
        Self {
            name: params.name,
            period: params.period,
            offset: params.offset,
            priority: params.priority,
            inputs: params.inputs,
            kind,
            payload,
            state: TaskState::Idle,
            assigned_core: None,
            process: None,
            cycle_start: None,
            last_poll: None,
            last_outcome: None,
            stats: TaskStats::with_cores(cores),
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn offset(&self) -> Duration {
        self.offset
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn inputs(&self) -> &[ChannelId] {
        &self.inputs
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut TaskKind {
        &mut self.kind
    }

    pub fn is_voter(&self) -> bool {
        matches!(self.kind, TaskKind::Voter(_))
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    pub fn assigned_core(&self) -> Option<CoreId> {
        self.assigned_core
    }

    pub fn process(&self) -> Option<ProcessHandle> {
        self.process
    }

    pub fn cycle_start(&self) -> Option<Instant> {
        self.cycle_start
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last_outcome
    }

    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    pub(crate) fn payload(&self) -> &dyn Payload {
        self.payload.as_ref()
    }

    // ── Timing predicates ─────────────────────────────────────────────────────

    /// `true` once `offset` has passed since scheduler activation.
    pub fn offset_elapsed(&self, activation: Instant, now: Instant) -> bool {
        self.offset.is_zero() || now.saturating_duration_since(activation) >= self.offset
    }

    /// `true` if the period has elapsed since the last cycle start.
    ///
    /// Acyclic tasks and tasks that never ran are always period-elapsed.
    pub fn period_elapsed(&self, now: Instant) -> bool {
        if self.period.is_zero() {
            return true;
        }
        match self.cycle_start {
            None => true,
            Some(start) => now.saturating_duration_since(start) > self.period,
        }
    }

    /// `true` if the task has been running longer than `threshold` and the
    /// latest poll returned the same status as the previous one.
    pub fn is_stuck(&self, now: Instant, threshold: Duration, poll: PollStatus) -> bool {
        let Some(start) = self.cycle_start else {
            return false;
        };
        now.saturating_duration_since(start) > threshold && self.last_poll == Some(poll)
    }

    // ── Transitions ───────────────────────────────────────────────────────────

    /// `Idle | Crashed → Fireable`, holding `core`.
    pub(crate) fn make_fireable(&mut self, core: CoreId) {
        debug_assert!(!self.is_running(), "running task '{}' re-armed", self.name);
        self.state = TaskState::Fireable;
        self.assigned_core = Some(core);
    }

    /// Undo a `Fireable` that was never dispatched.  Returns the held core.
    pub(crate) fn release_fireable(&mut self) -> Option<CoreId> {
        if self.state != TaskState::Fireable {
            return None;
        }
        self.state = self.idle_state();
        self.assigned_core.take()
    }

    /// `Fireable → Running`.
    pub(crate) fn mark_launched(&mut self, handle: ProcessHandle, now: Instant) {
        self.state = TaskState::Running;
        self.process = Some(handle);
        self.cycle_start = Some(now);
        self.last_poll = None;
        self.stats.runs += 1;
        if let Some(slot) = self
            .assigned_core
            .and_then(|core| self.stats.core_runs.get_mut(core))
        {
            *slot += 1;
        }
    }

    /// Remember the latest non-blocking poll for stuck detection.
    pub(crate) fn record_poll(&mut self, poll: PollStatus) {
        self.last_poll = Some(poll);
    }

    /// `Running → Idle | Crashed`.  Updates counters and returns the core the
    /// run occupied.
    pub(crate) fn complete(&mut self, outcome: Outcome) -> Option<CoreId> {
        match outcome {
            Outcome::Success => {
                self.stats.success += 1;
                self.state = TaskState::Idle;
            }
            Outcome::Failure => {
                self.stats.fails += 1;
                self.state = TaskState::Crashed;
            }
            Outcome::IntegrityError => {
                self.stats.errors += 1;
                self.state = TaskState::Crashed;
            }
        }
        self.last_outcome = Some(outcome);
        self.process = None;
        self.last_poll = None;
        self.assigned_core.take()
    }

    /// Drop the outstanding process without recording an outcome (shutdown).
    pub(crate) fn abandon(&mut self) -> Option<CoreId> {
        self.process = None;
        self.last_poll = None;
        self.state = self.idle_state();
        self.assigned_core.take()
    }

    fn idle_state(&self) -> TaskState {
        match self.last_outcome {
            Some(Outcome::Failure) | Some(Outcome::IntegrityError) => TaskState::Crashed,
            _ => TaskState::Idle,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
