/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Payload contract and the process primitive used to run task invocations.
//!
//! Every invocation of a task runs in its own OS process pinned to one core:
//!
//! ```text
//! Scheduler ──spawn(name, core, payload)──► fork()
//!                                             ├─ parent: ProcessHandle(pid)
//!                                             └─ child:  sched_setaffinity(core)
//!                                                        prctl(PR_SET_NAME)
//!                                                        payload.run() → _exit(code)
//! Scheduler ──poll(handle)──► waitpid(WNOHANG) → Running | Exited(..)
//! Scheduler ──terminate(handle)──► kill(SIGKILL) + waitpid()
//! ```
//!
//! The [`Launcher`] trait is the seam between the scheduler state machine and
//! the operating system; [`ForkLauncher`] is the Linux implementation.

use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sched::{sched_setaffinity, CpuSet};
use nix::sys::prctl;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cores::CoreId;

// ── Payload contract ──────────────────────────────────────────────────────────

/// Exit code a payload terminates its process with.
///
/// Termination by a signal is treated exactly like [`TaskExit::Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// `0` – the invocation completed.
    Success,
    /// `1` – generic failure.
    Failure,
    /// `2` – the payload detected corrupted or unexpected input data.
    IntegrityFailure,
}

impl TaskExit {
    pub const fn code(self) -> i32 {
        match self {
            TaskExit::Success => 0,
            TaskExit::Failure => 1,
            TaskExit::IntegrityFailure => 2,
        }
    }

    /// Any code other than `0` and `2` is a generic failure.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => TaskExit::Success,
            2 => TaskExit::IntegrityFailure,
            _ => TaskExit::Failure,
        }
    }
}

/// The executable body of a task.
///
/// `run` is called inside the forked child process; its return value becomes
/// the process exit code.  Closures `Fn() -> TaskExit` implement this trait.
pub trait Payload {
    fn run(&self) -> TaskExit;
}

impl<F> Payload for F
where
    F: Fn() -> TaskExit,
{
    fn run(&self) -> TaskExit {
        self()
    }
}

/// Payload that replaces the child process image with an external program.
///
/// The program's own exit status is reported to the scheduler.  The C strings
/// are built up-front so the child does not allocate between `fork` and
/// `execvp`.
#[derive(Debug, Clone)]
pub struct ExecPayload {
    program: CString,
    argv: Vec<CString>,
}

impl ExecPayload {
    /// Build from a command line (`argv[0]` is looked up in `$PATH`).
    ///
    /// # Errors
    /// [`LaunchError::InvalidCommand`] if the command is empty or any argument
    /// contains an interior NUL byte.
    pub fn new<I, S>(command: I) -> Result<Self, LaunchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let argv = command
            .into_iter()
            .map(|arg| {
                CString::new(arg.as_ref())
                    .map_err(|_| LaunchError::InvalidCommand(arg.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let program = argv
            .first()
            .cloned()
            .ok_or_else(|| LaunchError::InvalidCommand(String::from("<empty>")))?;

        Ok(Self { program, argv })
    }

    pub fn program(&self) -> &CStr {
        &self.program
    }
}

impl Payload for ExecPayload {
    fn run(&self) -> TaskExit {
        match execvp(&self.program, &self.argv) {
            // execvp only returns on failure.
            Ok(never) => match never {},
            Err(_) => TaskExit::Failure,
        }
    }
}

// ── Process primitive ─────────────────────────────────────────────────────────

/// Opaque handle of a launched task process (the child PID for
/// [`ForkLauncher`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle(i32);

impl ProcessHandle {
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

/// How a task process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Normal termination with an exit code.
    Code(i32),
    /// Killed by the given signal number.
    Signaled(i32),
    /// The process could no longer be observed (e.g. `waitpid` failed).
    Lost,
}

/// Result of one non-blocking completion poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Exited(ProcessExit),
}

/// Errors raised by a [`Launcher`].
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to fork process for task '{task}': {source}")]
    Fork { task: String, source: Errno },

    #[error("cannot restrict execution to core {core}: {source}")]
    Affinity { core: CoreId, source: Errno },

    #[error("failed to signal process {pid}: {source}")]
    Kill { pid: i32, source: Errno },

    #[error("failed to reap process {pid}: {source}")]
    Wait { pid: i32, source: Errno },

    #[error("invalid payload command: '{0}'")]
    InvalidCommand(String),
}

/// Creates, observes and terminates isolated task processes.
pub trait Launcher {
    /// Start `payload` in a new process restricted to `core`.
    fn spawn(
        &mut self,
        task: &str,
        core: CoreId,
        payload: &dyn Payload,
    ) -> Result<ProcessHandle, LaunchError>;

    /// Non-blocking completion check.
    fn poll(&mut self, handle: ProcessHandle) -> PollStatus;

    /// Forcefully stop the process and wait until it is gone.
    fn terminate(&mut self, handle: ProcessHandle) -> Result<(), LaunchError>;

    /// Restrict the calling (scheduler) process to `core`.
    fn pin_scheduler(&mut self, core: CoreId) -> Result<(), LaunchError>;
}

// ── ForkLauncher ──────────────────────────────────────────────────────────────

/// Linux [`Launcher`] built on `fork`, `sched_setaffinity` and `waitpid`.
///
/// The parent must be single-threaded when `spawn` is called.
#[derive(Debug, Default)]
pub struct ForkLauncher;

impl ForkLauncher {
    pub fn new() -> Self {
        Self
    }
}

fn cpu_set_for(core: CoreId) -> Result<CpuSet, LaunchError> {
    let mut set = CpuSet::new();
    set.set(core)
        .map_err(|source| LaunchError::Affinity { core, source })?;
    Ok(set)
}

/// Child-side half of `spawn`; never returns.
fn run_child(cpuset: &CpuSet, name: Option<&CStr>, payload: &dyn Payload) -> ! {
    if sched_setaffinity(Pid::from_raw(0), cpuset).is_err() {
        exit_child(TaskExit::Failure.code());
    }
    if let Some(name) = name {
        // The kernel truncates to 15 bytes; a naming failure is harmless.
        let _ = prctl::set_name(name);
    }

    let code = match panic::catch_unwind(AssertUnwindSafe(|| payload.run())) {
        Ok(exit) => exit.code(),
        Err(_) => TaskExit::Failure.code(),
    };
    exit_child(code)
}

fn exit_child(code: i32) -> ! {
    // SAFETY: `_exit` terminates the forked child immediately without running
    // the parent's atexit handlers or flushing its inherited stdio buffers.
    unsafe { nix::libc::_exit(code) }
}

impl Launcher for ForkLauncher {
    fn spawn(
        &mut self,
        task: &str,
        core: CoreId,
        payload: &dyn Payload,
    ) -> Result<ProcessHandle, LaunchError> {
        let cpuset = cpu_set_for(core)?;
        let name = CString::new(task.replace('\0', "")).ok();

        // SAFETY: the scheduler runs on a single thread, and the child only
        // pins itself, runs the payload and calls `_exit`.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                debug!(task = %task, pid = child.as_raw(), core = core, "forked task process");
                Ok(ProcessHandle(child.as_raw()))
            }
            Ok(ForkResult::Child) => run_child(&cpuset, name.as_deref(), payload),
            Err(source) => Err(LaunchError::Fork {
                task: task.to_string(),
                source,
            }),
        }
    }

    fn poll(&mut self, handle: ProcessHandle) -> PollStatus {
        match waitpid(Pid::from_raw(handle.0), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => PollStatus::Exited(ProcessExit::Code(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                PollStatus::Exited(ProcessExit::Signaled(signal as i32))
            }
            // StillAlive, Stopped, Continued, ptrace events: not finished yet.
            Ok(_) => PollStatus::Running,
            Err(err) => {
                warn!(pid = handle.0, error = %err, "waitpid failed, treating process as lost");
                PollStatus::Exited(ProcessExit::Lost)
            }
        }
    }

    fn terminate(&mut self, handle: ProcessHandle) -> Result<(), LaunchError> {
        let pid = Pid::from_raw(handle.0);

        match kill(pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(source) => {
                return Err(LaunchError::Kill {
                    pid: handle.0,
                    source,
                })
            }
        }

        match waitpid(pid, None) {
            Ok(_) | Err(Errno::ECHILD) => Ok(()),
            Err(source) => Err(LaunchError::Wait {
                pid: handle.0,
                source,
            }),
        }
    }

    fn pin_scheduler(&mut self, core: CoreId) -> Result<(), LaunchError> {
        let cpuset = cpu_set_for(core)?;
        sched_setaffinity(Pid::from_raw(0), &cpuset)
            .map_err(|source| LaunchError::Affinity { core, source })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
