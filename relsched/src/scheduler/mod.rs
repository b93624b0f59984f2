//! Reliability-aware task scheduler.
//!
//! [`Scheduler`] owns every [`Task`] and [`Core`] and drives them through a
//! cooperative, single-threaded loop:
//!
//! ```text
//! activate()
//! while is_active():
//!     monitor()    ── phase 1: poll every running task, finalise completions,
//!                  │           score cores, kill stuck tasks
//!                  └─ phase 2: evaluate idle/crashed tasks (priority order),
//!                              voter arming, select a core → Fireable
//!     dispatch()   ── launch every Fireable task pinned to its core
//!     (idle sleep)
//! shutdown()       ── SIGKILL + reap every outstanding process
//! ```
//!
//! Because phase 1 finishes before phase 2 starts, a core released by a task
//! that just completed can be reused in the same cycle.
//!
//! # Ownership
//!
//! Tasks and cores live in arenas (`Vec<Task>`, `Vec<Core>`) addressed by
//! integer ids.  Voters are a [`TaskKind`] variant, payloads are [`Payload`]
//! trait objects, and time is an [`Instant`] that tests inject through the
//! `*_at` methods.

pub mod error;
pub mod placement;

pub use error::SchedulerError;
pub use placement::{select_core, Placement};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::channel::Readiness;
use crate::config::{SchedulerConfig, Termination};
use crate::cores::Core;
use crate::process::{Launcher, Payload, PollStatus};
use crate::report::{CoreSnapshot, Snapshot, TaskSnapshot};
use crate::task::{Outcome, Task, TaskId, TaskKind, TaskParams, TaskState};
use crate::voter::{ArmingDecision, ReplicaView, VoterData};

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// Owns the task set, the core pool and the process primitive.
///
/// Every mutation of task and core state happens on the caller's thread
/// inside [`monitor`](Self::monitor), [`dispatch`](Self::dispatch) or
/// [`shutdown`](Self::shutdown).  Dropping the scheduler shuts it down.
pub struct Scheduler<L: Launcher, R: Readiness> {
    config: SchedulerConfig,
    tasks: Vec<Task>,
    index: HashMap<String, TaskId>,
    cores: Vec<Core>,
    launcher: L,
    readiness: R,
    activation: Option<Instant>,
    last_log: Option<Instant>,
    history: Vec<Snapshot>,
}

impl<L: Launcher, R: Readiness> Scheduler<L, R> {
    /// Build a scheduler with a fresh core pool at full reliability.
    ///
    /// # Errors
    /// [`SchedulerError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: SchedulerConfig, launcher: L, readiness: R) -> Result<Self, SchedulerError> {
        config.validate()?;

        let cores = (0..config.cores)
            .map(|id| Core::new(id, config.max_weight, config.window))
            .collect();

        Ok(Self {
            config,
            tasks: Vec::new(),
            index: HashMap::new(),
            cores,
            launcher,
            readiness,
            activation: None,
            last_log: None,
            history: Vec::new(),
        })
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Register a plain task.
    pub fn add_task<P>(&mut self, params: TaskParams, payload: P) -> Result<TaskId, SchedulerError>
    where
        P: Payload + 'static,
    {
        self.register(params, TaskKind::Plain, Box::new(payload))
    }

    /// Register a voter over already-registered `replicas`.
    pub fn add_voter<P>(
        &mut self,
        params: TaskParams,
        replicas: &[&str],
        payload: P,
    ) -> Result<TaskId, SchedulerError>
    where
        P: Payload + 'static,
    {
        if replicas.is_empty() {
            return Err(SchedulerError::EmptyReplicaSet { voter: params.name });
        }

        let ids = replicas
            .iter()
            .map(|name| {
                let id = self
                    .find_task(name)
                    .ok_or_else(|| SchedulerError::UnknownReplica {
                        voter: params.name.clone(),
                        replica: name.to_string(),
                    })?;
                if self.tasks[id.0].is_voter() {
                    return Err(SchedulerError::NestedVoter {
                        voter: params.name.clone(),
                        replica: name.to_string(),
                    });
                }
                Ok(id)
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.register(params, TaskKind::Voter(VoterData::new(ids)), Box::new(payload))
    }

    fn register(
        &mut self,
        params: TaskParams,
        kind: TaskKind,
        payload: Box<dyn Payload>,
    ) -> Result<TaskId, SchedulerError> {
        if self.index.contains_key(&params.name) {
            return Err(SchedulerError::DuplicateTask(params.name));
        }

        let id = TaskId(self.tasks.len());
        debug!(
            task = %params.name,
            id = id.0,
            period_ms = params.period.as_millis() as u64,
            offset_ms = params.offset.as_millis() as u64,
            priority = params.priority,
            voter = matches!(kind, TaskKind::Voter(_)),
            "registered task"
        );
        self.index.insert(params.name.clone(), id);
        self.tasks
            .push(Task::new(params, kind, payload, self.config.cores));
        Ok(id)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn find_task(&self, name: &str) -> Option<TaskId> {
        self.index.get(name).copied()
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    pub fn task_by_name(&self, name: &str) -> Option<&Task> {
        self.find_task(name).map(|id| self.task(id))
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn launcher_mut(&mut self) -> &mut L {
        &mut self.launcher
    }

    pub fn readiness(&self) -> &R {
        &self.readiness
    }

    pub fn activation(&self) -> Option<Instant> {
        self.activation
    }

    /// Snapshots recorded every `log_interval`, at most `history_limit` of
    /// them, oldest first.
    pub fn history(&self) -> &[Snapshot] {
        &self.history
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub fn activate(&mut self) -> Result<(), SchedulerError> {
        self.activate_at(Instant::now())
    }

    /// Start the clock, check the termination budget and pin the scheduler to
    /// its reserved core.
    pub fn activate_at(&mut self, now: Instant) -> Result<(), SchedulerError> {
        if let Termination::Iterations { task, .. } = &self.config.termination {
            if self.find_task(task).is_none() {
                return Err(SchedulerError::UnknownTerminationTask(task.clone()));
            }
        }

        if let Some(core) = self.config.scheduler_core {
            self.launcher
                .pin_scheduler(core)
                .map_err(|source| SchedulerError::PinScheduler { core, source })?;
        }

        self.activation = Some(now);
        self.last_log = Some(now);

        info!(
            cores = self.cores.len(),
            scheduler_core = ?self.config.scheduler_core,
            tasks = self.tasks.len(),
            voters = self.tasks.iter().filter(|t| t.is_voter()).count(),
            "=== Scheduler activated ==="
        );
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Instant::now())
    }

    /// Termination predicate: wall-clock budget or the reference task's
    /// launch count.
    pub fn is_active_at(&self, now: Instant) -> bool {
        let Some(activation) = self.activation else {
            return true;
        };
        match &self.config.termination {
            Termination::WallClock(budget) => now.saturating_duration_since(activation) < *budget,
            Termination::Iterations { task, count } => self
                .find_task(task)
                .is_some_and(|id| self.tasks[id.0].stats().runs < *count),
        }
    }

    /// One full loop iteration: monitor, dispatch, periodic status.
    pub fn run_cycle_at(&mut self, now: Instant) -> Result<(), SchedulerError> {
        self.monitor_at(now);
        self.dispatch_at(now)?;
        self.log_status_at(now);
        Ok(())
    }

    // ── Monitor ───────────────────────────────────────────────────────────────

    pub fn monitor(&mut self) {
        self.monitor_at(Instant::now());
    }

    /// Poll running tasks, then decide which idle tasks become fireable.
    pub fn monitor_at(&mut self, now: Instant) {
        let activation = *self.activation.get_or_insert(now);
        let order = self.priority_order();
        let was_running: Vec<bool> = self.tasks.iter().map(Task::is_running).collect();

        // Phase 1: completions free their cores before anything is placed.
        for &id in &order {
            if self.tasks[id].is_running() {
                self.poll_task(id, now);
            }
        }

        // Phase 2: eligibility.
        for &id in &order {
            let task = &self.tasks[id];
            if task.is_running() || !task.offset_elapsed(activation, now) {
                continue;
            }
            self.evaluate(id, now, &was_running);
        }
    }

    /// Task indices by descending priority; registration order breaks ties.
    fn priority_order(&self) -> Vec<usize> {
        let mut queue: BinaryHeap<(i32, Reverse<usize>)> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, task)| (task.priority(), Reverse(i)))
            .collect();

        let mut order = Vec::with_capacity(queue.len());
        while let Some((_, Reverse(i))) = queue.pop() {
            order.push(i);
        }
        order
    }

    fn poll_task(&mut self, id: usize, now: Instant) {
        let Some(handle) = self.tasks[id].process() else {
            return;
        };

        match self.launcher.poll(handle) {
            PollStatus::Exited(exit) => self.finish(id, Outcome::from_exit(exit), now),
            status @ PollStatus::Running => {
                if self.tasks[id].is_stuck(now, self.config.stuck_time, status) {
                    warn!(
                        task = %self.tasks[id].name(),
                        pid = handle.as_raw(),
                        stuck_ms = self.config.stuck_time.as_millis() as u64,
                        "task is stuck, terminating"
                    );
                    if let Err(err) = self.launcher.terminate(handle) {
                        warn!(task = %self.tasks[id].name(), error = %err, "failed to terminate stuck task");
                    }
                    self.finish(id, Outcome::Failure, now);
                } else {
                    self.tasks[id].record_poll(status);
                }
            }
        }
    }

    /// `Running → Idle | Crashed`: update counters, score and release the core.
    fn finish(&mut self, id: usize, outcome: Outcome, now: Instant) {
        let elapsed_ms = self.tasks[id]
            .cycle_start()
            .map(|start| now.saturating_duration_since(start).as_millis() as u64)
            .unwrap_or(0);

        let core_id = self.tasks[id].complete(outcome);
        if let Some(core) = core_id.and_then(|c| self.cores.get_mut(c)) {
            let score = if outcome.is_success() {
                core.success_score()
            } else {
                0.0
            };
            core.complete_run(score);
        }

        let task = &self.tasks[id];
        match outcome {
            Outcome::Success => {
                debug!(task = %task.name(), core = ?core_id, elapsed_ms, "✓ completed")
            }
            Outcome::Failure => {
                warn!(task = %task.name(), core = ?core_id, elapsed_ms, "✗ task failed")
            }
            Outcome::IntegrityError => warn!(
                task = %task.name(),
                core = ?core_id,
                elapsed_ms,
                "✗ task reported a data-integrity failure"
            ),
        }
    }

    /// Try to move an idle/crashed task to `Fireable`.
    fn evaluate(&mut self, id: usize, now: Instant, was_running: &[bool]) {
        // A fireable task that was never dispatched gives its core back first.
        if let Some(core) = self.tasks[id].release_fireable() {
            self.cores[core].set_assigned(false);
        }

        let task = &self.tasks[id];
        let is_voter = task.is_voter();
        let eligible = self.readiness.is_ready(task.inputs()) && task.period_elapsed(now);

        if is_voter {
            if !self.arm_voter(id, was_running) {
                return;
            }
            if !eligible {
                self.set_voter_pending(id, true);
                return;
            }
        } else if !eligible {
            return;
        }

        let placement =
            Placement::for_task(is_voter, self.config.voter_policy, self.config.min_reliability);

        match select_core(&mut self.cores, self.config.scheduler_core, placement) {
            Some(core) => {
                self.tasks[id].make_fireable(core);
                if is_voter {
                    self.set_voter_pending(id, false);
                }
                debug!(task = %self.tasks[id].name(), core = core, "fireable");
            }
            None => {
                if is_voter {
                    self.set_voter_pending(id, true);
                }
                debug!(task = %self.tasks[id].name(), "no core available, retrying next cycle");
            }
        }
    }

    /// Run the arming protocol for voter `id`.  Returns `true` if a voting
    /// round is released (now or latched from an earlier cycle).
    fn arm_voter(&mut self, id: usize, was_running: &[bool]) -> bool {
        let views: Vec<ReplicaView> = match self.tasks[id].kind() {
            TaskKind::Voter(voter) => voter
                .replicas()
                .iter()
                .map(|replica| {
                    let task = &self.tasks[replica.0];
                    ReplicaView {
                        observed_running: was_running[replica.0] || task.is_running(),
                        running: task.is_running(),
                        succeeded: task.last_outcome().is_some_and(Outcome::is_success),
                    }
                })
                .collect(),
            TaskKind::Plain => return true,
        };

        let (decision, pending) = match self.tasks[id].kind_mut() {
            TaskKind::Voter(voter) => (voter.check(&views), voter.is_pending()),
            TaskKind::Plain => return true,
        };

        match decision {
            ArmingDecision::Fire => {
                debug!(voter = %self.tasks[id].name(), "all replicas completed, voter released")
            }
            ArmingDecision::NoSurvivors => warn!(
                voter = %self.tasks[id].name(),
                replicas = views.len(),
                "no replica survived this round, vote skipped"
            ),
            ArmingDecision::Wait => {}
        }

        decision == ArmingDecision::Fire || pending
    }

    fn set_voter_pending(&mut self, id: usize, pending: bool) {
        if let TaskKind::Voter(voter) = self.tasks[id].kind_mut() {
            voter.set_pending(pending);
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    pub fn dispatch(&mut self) -> Result<(), SchedulerError> {
        self.dispatch_at(Instant::now())
    }

    /// Launch every fireable task on its assigned core.
    ///
    /// # Errors
    /// [`SchedulerError::Spawn`] if a process cannot be created.  Every task
    /// process is terminated before the error is returned.
    pub fn dispatch_at(&mut self, now: Instant) -> Result<(), SchedulerError> {
        for id in self.priority_order() {
            if self.tasks[id].state() != TaskState::Fireable {
                continue;
            }
            let Some(core) = self.tasks[id].assigned_core() else {
                continue;
            };

            let task = &self.tasks[id];
            match self.launcher.spawn(task.name(), core, task.payload()) {
                Ok(handle) => {
                    self.tasks[id].mark_launched(handle, now);
                    debug!(
                        task = %self.tasks[id].name(),
                        core = core,
                        pid = handle.as_raw(),
                        run = self.tasks[id].stats().runs,
                        "→ launched"
                    );
                }
                Err(source) => {
                    let task = self.tasks[id].name().to_string();
                    error!(task = %task, error = %source, "process creation failed, stopping scheduler");
                    self.shutdown();
                    return Err(SchedulerError::Spawn { task, source });
                }
            }
        }
        Ok(())
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Kill and reap every outstanding task process and release all cores.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        let mut terminated = 0usize;

        for task in self.tasks.iter_mut() {
            let core = match task.process() {
                Some(handle) => {
                    if let Err(err) = self.launcher.terminate(handle) {
                        warn!(task = %task.name(), error = %err, "failed to terminate task process");
                    }
                    terminated += 1;
                    task.abandon()
                }
                None => task.release_fireable(),
            };
            if let Some(core) = core.and_then(|c| self.cores.get_mut(c)) {
                core.set_assigned(false);
            }
        }

        if terminated > 0 {
            info!(terminated, "Scheduler shutting down, task processes stopped");
        }
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> Snapshot {
        let elapsed_ms = self
            .activation
            .map(|a| now.saturating_duration_since(a).as_millis() as u64)
            .unwrap_or(0);

        Snapshot {
            elapsed_ms,
            tasks: self
                .tasks
                .iter()
                .map(|t| {
                    let s = t.stats();
                    TaskSnapshot {
                        name: t.name().to_string(),
                        runs: s.runs,
                        success: s.success,
                        fails: s.fails,
                        errors: s.errors,
                        core_runs: s.core_runs.clone(),
                    }
                })
                .collect(),
            cores: self
                .cores
                .iter()
                .map(|c| CoreSnapshot {
                    id: c.id(),
                    weight: c.weight(),
                    runs: c.runs(),
                    assigned: c.is_assigned(),
                    reserved: Some(c.id()) == self.config.scheduler_core,
                })
                .collect(),
        }
    }

    /// Record a snapshot and log status once per `log_interval`.
    pub fn log_status_at(&mut self, now: Instant) {
        let due = self
            .last_log
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.log_interval);
        if !due {
            return;
        }
        self.last_log = Some(now);

        let snapshot = self.snapshot_at(now);
        info!(elapsed_ms = snapshot.elapsed_ms, "── status ──");
        for t in &snapshot.tasks {
            info!(
                task = %t.name,
                runs = t.runs,
                success = t.success,
                fails = t.fails,
                errors = t.errors,
                "  task"
            );
        }
        for c in snapshot.cores.iter().filter(|c| !c.reserved) {
            info!(
                core = c.id,
                weight = %format!("{:.1}", c.weight),
                runs = c.runs,
                assigned = c.assigned,
                "  core"
            );
        }
        self.history.push(snapshot);
        if self.history.len() > self.config.history_limit {
            let excess = self.history.len() - self.config.history_limit;
            self.history.drain(..excess);
        }
    }

    /// Final per-task / per-core table.
    pub fn log_summary(&self) {
        info!("=== Scheduler summary ===");
        for task in &self.tasks {
            let s = task.stats();
            info!(
                "Task: {:<16} successful runs: {:>6}  failed runs: {:>6}  errors: {:>6}  per core: {:?}",
                task.name(),
                s.success,
                s.fails,
                s.errors,
                s.core_runs
            );
        }
        for core in &self.cores {
            if Some(core.id()) == self.config.scheduler_core {
                continue;
            }
            info!(
                "Core: {:<3} runs: {:>6}  weight: {:>6.1}",
                core.id(),
                core.runs(),
                core.weight()
            );
        }
    }
}

impl<L: Launcher, R: Readiness> Drop for Scheduler<L, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::NoInputs;
    use crate::config::VoterPolicy;
    use crate::cores::CoreId;
    use crate::process::{LaunchError, ProcessExit, ProcessHandle, TaskExit};
    use nix::errno::Errno;
    use std::time::Duration;

    // ── Scripted launcher ─────────────────────────────────────────────────────

    /// What one spawned process will do.
    #[derive(Debug, Clone, Copy)]
    enum Script {
        /// Report `Running` for `after_polls` polls, then exit with `code`.
        Exit { after_polls: u32, code: i32 },
        /// Killed by a signal on the first poll.
        Signal(i32),
        /// Never finishes.
        Hang,
    }

    const OK: Script = Script::Exit {
        after_polls: 0,
        code: 0,
    };
    const FAIL: Script = Script::Exit {
        after_polls: 0,
        code: 1,
    };
    const CORRUPT: Script = Script::Exit {
        after_polls: 0,
        code: 2,
    };

    #[derive(Debug)]
    struct Live {
        script: Script,
        polls: u32,
    }

    /// In-memory launcher: every task name cycles through its own script
    /// list (default: exit 0 on the first poll).
    #[derive(Debug, Default)]
    struct FakeLauncher {
        scripts: HashMap<String, (Vec<Script>, usize)>,
        live: HashMap<i32, Live>,
        next_pid: i32,
        spawned: Vec<(String, CoreId)>,
        terminated: Vec<i32>,
        pinned: Option<CoreId>,
        fail_spawn: Option<String>,
    }

    impl FakeLauncher {
        fn script(mut self, task: &str, scripts: &[Script]) -> Self {
            self.scripts
                .insert(task.to_string(), (scripts.to_vec(), 0));
            self
        }

        fn next_script(&mut self, task: &str) -> Script {
            match self.scripts.get_mut(task) {
                Some((list, cursor)) if !list.is_empty() => {
                    let s = list[*cursor % list.len()];
                    *cursor += 1;
                    s
                }
                _ => OK,
            }
        }

        fn live_cores(&self) -> usize {
            self.live.len()
        }
    }

    impl Launcher for FakeLauncher {
        fn spawn(
            &mut self,
            task: &str,
            core: CoreId,
            _payload: &dyn Payload,
        ) -> Result<ProcessHandle, LaunchError> {
            if self.fail_spawn.as_deref() == Some(task) {
                return Err(LaunchError::Fork {
                    task: task.to_string(),
                    source: Errno::EAGAIN,
                });
            }
            let script = self.next_script(task);
            self.next_pid += 1;
            self.live.insert(self.next_pid, Live { script, polls: 0 });
            self.spawned.push((task.to_string(), core));
            Ok(ProcessHandle::from_raw(self.next_pid))
        }

        fn poll(&mut self, handle: ProcessHandle) -> PollStatus {
            let pid = handle.as_raw();
            let Some(live) = self.live.get_mut(&pid) else {
                return PollStatus::Exited(ProcessExit::Lost);
            };
            let status = match live.script {
                Script::Hang => PollStatus::Running,
                Script::Signal(sig) => PollStatus::Exited(ProcessExit::Signaled(sig)),
                Script::Exit { after_polls, code } => {
                    if live.polls >= after_polls {
                        PollStatus::Exited(ProcessExit::Code(code))
                    } else {
                        live.polls += 1;
                        PollStatus::Running
                    }
                }
            };
            if matches!(status, PollStatus::Exited(_)) {
                self.live.remove(&pid);
            }
            status
        }

        fn terminate(&mut self, handle: ProcessHandle) -> Result<(), LaunchError> {
            self.live.remove(&handle.as_raw());
            self.terminated.push(handle.as_raw());
            Ok(())
        }

        fn pin_scheduler(&mut self, core: CoreId) -> Result<(), LaunchError> {
            self.pinned = Some(core);
            Ok(())
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    type TestScheduler = Scheduler<FakeLauncher, NoInputs>;

    fn config(cores: usize, reserved: Option<CoreId>) -> SchedulerConfig {
        SchedulerConfig {
            cores,
            scheduler_core: reserved,
            termination: Termination::WallClock(Duration::from_secs(3_600)),
            ..Default::default()
        }
    }

    fn scheduler(cfg: SchedulerConfig, launcher: FakeLauncher) -> TestScheduler {
        Scheduler::new(cfg, launcher, NoInputs).unwrap()
    }

    fn noop() -> impl Payload {
        || TaskExit::Success
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Cross-cutting invariants that must hold after every cycle.
    fn assert_invariants(s: &TestScheduler) {
        let max = s.config().max_weight;
        for core in s.cores() {
            assert!((0.0..=max).contains(&core.weight()), "weight out of range");
            let sum: f64 = core.window().scores().sum();
            assert!((sum - core.weight()).abs() < 1e-9, "window sum != weight");
        }

        let mut owners: HashMap<CoreId, &str> = HashMap::new();
        for task in s.tasks() {
            match task.state() {
                TaskState::Fireable | TaskState::Running => {
                    let core = task.assigned_core().expect("active task without core");
                    assert!(s.cores()[core].is_assigned(), "owned core not marked assigned");
                    assert_ne!(Some(core), s.config().scheduler_core, "task on reserved core");
                    if let Some(other) = owners.insert(core, task.name()) {
                        panic!("core {core} held by '{other}' and '{}'", task.name());
                    }
                }
                TaskState::Idle | TaskState::Crashed => {
                    assert_eq!(task.assigned_core(), None);
                    assert_eq!(task.process(), None);
                }
            }
            assert_eq!(task.process().is_some(), task.is_running());
        }
        for core in s.cores() {
            assert_eq!(
                core.is_assigned(),
                owners.contains_key(&core.id()),
                "core {} assigned flag disagrees with task ownership",
                core.id()
            );
        }
    }

    // ── Scenario A: single acyclic task, always succeeds ─────────────────────

    #[test]
    fn scenario_a_acyclic_success_keeps_full_weight() {
        let mut s = scheduler(config(2, Some(1)), FakeLauncher::default());
        let id = s.add_task(TaskParams::new("a"), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        const N: u64 = 10;
        for i in 0..N {
            s.run_cycle_at(t0 + ms(i)).unwrap();
            assert_invariants(&s);
        }
        s.monitor_at(t0 + ms(N));

        let stats = s.task(id).stats();
        assert_eq!(stats.success, N);
        assert_eq!(stats.fails, 0);
        assert_eq!(stats.core_runs, vec![N, 0], "only core 0 is usable");
        assert_eq!(s.cores()[0].weight(), 100.0);
        assert_eq!(s.cores()[0].runs(), N);
        assert_eq!(s.cores()[1].runs(), 0, "reserved core never hosts a task");
        assert_eq!(s.launcher().pinned, Some(1));
    }

    // ── Scenario B: alternating success / failure ─────────────────────────────

    #[test]
    fn scenario_b_alternating_outcomes() {
        let launcher = FakeLauncher::default().script("b", &[OK, FAIL]);
        let mut s = scheduler(config(2, Some(1)), launcher);
        let id = s.add_task(TaskParams::new("b"), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        const N: u64 = 4;
        for i in 0..2 * N {
            s.run_cycle_at(t0 + ms(i)).unwrap();
            assert_invariants(&s);
        }
        s.monitor_at(t0 + ms(2 * N));

        let stats = s.task(id).stats();
        assert_eq!(stats.success, N);
        assert_eq!(stats.fails, N);
        // Windowed policy: the last K = 4 outcomes are S,F,S,F → half weight,
        // not the pre-run value.
        assert_eq!(s.cores()[0].weight(), 50.0);
    }

    // ── Scenario C: NMR with one crashed replica ──────────────────────────────

    #[test]
    fn scenario_c_voter_fires_with_two_survivors() {
        let slow_ok = Script::Exit {
            after_polls: 1,
            code: 0,
        };
        let launcher = FakeLauncher::default()
            .script("b1", &[slow_ok])
            .script("b2", &[slow_ok])
            .script("b3", &[FAIL]);
        let mut s = scheduler(config(5, Some(0)), launcher);

        for name in ["b1", "b2", "b3"] {
            s.add_task(TaskParams::new(name).period(ms(100)), noop())
                .unwrap();
        }
        let v = s
            .add_voter(TaskParams::new("v"), &["b1", "b2", "b3"], noop())
            .unwrap();

        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        // t0: replicas launched; voter has seen nothing yet
        s.run_cycle_at(t0).unwrap();
        assert_eq!(s.task(v).stats().runs, 0);

        // t1: b3 crashes, b1/b2 still running; voter becomes armed
        s.run_cycle_at(t0 + ms(1)).unwrap();
        assert_eq!(s.task_by_name("b3").unwrap().state(), TaskState::Crashed);
        assert_eq!(s.task(v).stats().runs, 0);
        match s.task(v).kind() {
            TaskKind::Voter(data) => assert!(data.is_armed()),
            TaskKind::Plain => unreachable!(),
        }

        // t2: survivors finish → voter fires on the most reliable idle core
        s.run_cycle_at(t0 + ms(2)).unwrap();
        assert_invariants(&s);
        assert_eq!(s.task(v).stats().runs, 1);
        let voter_core = s.task(v).assigned_core().unwrap();
        assert_eq!(s.cores()[voter_core].weight(), 100.0);
        assert_ne!(
            Some(voter_core),
            s.task_by_name("b3").unwrap().stats().core_runs.iter().position(|&n| n > 0),
            "voter avoids the core that just failed"
        );
    }

    #[test]
    fn voter_stays_silent_when_every_replica_crashed() {
        let launcher = FakeLauncher::default()
            .script("r1", &[FAIL])
            .script("r2", &[FAIL]);
        let mut s = scheduler(config(4, Some(0)), launcher);
        s.add_task(TaskParams::new("r1").period(ms(1_000)), noop())
            .unwrap();
        s.add_task(TaskParams::new("r2").period(ms(1_000)), noop())
            .unwrap();
        let v = s
            .add_voter(TaskParams::new("v"), &["r1", "r2"], noop())
            .unwrap();

        let t0 = Instant::now();
        s.activate_at(t0).unwrap();
        for i in 0..20 {
            s.run_cycle_at(t0 + ms(i)).unwrap();
        }
        assert_eq!(s.task(v).stats().runs, 0);
    }

    #[test]
    fn voter_fires_once_per_replica_round() {
        let slow_ok = Script::Exit {
            after_polls: 2,
            code: 0,
        };
        let launcher = FakeLauncher::default()
            .script("r1", &[slow_ok])
            .script("r2", &[OK]);
        let mut s = scheduler(config(4, Some(0)), launcher);
        s.add_task(TaskParams::new("r1").period(ms(50)), noop())
            .unwrap();
        s.add_task(TaskParams::new("r2").period(ms(50)), noop())
            .unwrap();
        let v = s
            .add_voter(TaskParams::new("v"), &["r1", "r2"], noop())
            .unwrap();

        let t0 = Instant::now();
        s.activate_at(t0).unwrap();
        for i in 0..500 {
            s.run_cycle_at(t0 + ms(i)).unwrap();
            assert_invariants(&s);
        }

        let rounds = s.task_by_name("r1").unwrap().stats().runs;
        let votes = s.task(v).stats().runs;
        assert!(rounds >= 9, "replicas ran {rounds} rounds");
        assert!(
            votes == rounds || votes + 1 == rounds,
            "{votes} votes for {rounds} replica rounds"
        );
    }

    #[test]
    fn released_voter_is_latched_until_a_core_frees_up() {
        let slow_ok = Script::Exit {
            after_polls: 1,
            code: 0,
        };
        let hog = Script::Exit {
            after_polls: 3,
            code: 0,
        };
        let launcher = FakeLauncher::default()
            .script("r1", &[slow_ok])
            .script("h2", &[Script::Hang])
            .script("h", &[hog, Script::Hang]);
        let mut cfg = config(3, Some(0));
        cfg.voter_policy = VoterPolicy::Standard;
        let mut s = scheduler(cfg, launcher);

        s.add_task(TaskParams::new("r1").period(ms(1_000)).priority(30), noop())
            .unwrap();
        s.add_task(TaskParams::new("h2").offset(ms(2)).priority(20), noop())
            .unwrap();
        let v = s
            .add_voter(TaskParams::new("v").priority(10), &["r1"], noop())
            .unwrap();
        s.add_task(TaskParams::new("h").priority(0), noop()).unwrap();

        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        s.run_cycle_at(t0).unwrap(); // r1 + h launched
        s.run_cycle_at(t0 + ms(1)).unwrap(); // voter armed
        s.run_cycle_at(t0 + ms(2)).unwrap(); // r1 done; h2 takes the free core
        assert_eq!(s.task(v).stats().runs, 0);
        match s.task(v).kind() {
            TaskKind::Voter(data) => assert!(data.is_pending()),
            TaskKind::Plain => unreachable!(),
        }

        s.run_cycle_at(t0 + ms(3)).unwrap(); // still no core
        assert_eq!(s.task(v).stats().runs, 0);

        s.run_cycle_at(t0 + ms(4)).unwrap(); // h exits, voter takes its core
        assert_eq!(s.task(v).stats().runs, 1);
        assert_invariants(&s);
    }

    // ── Scenario D: no core available ─────────────────────────────────────────

    #[test]
    fn scenario_d_no_core_is_backpressure_not_failure() {
        let busy = Script::Exit {
            after_polls: 4,
            code: 0,
        };
        let launcher = FakeLauncher::default().script("hog", &[busy]);
        let mut s = scheduler(config(2, Some(0)), launcher);
        s.add_task(TaskParams::new("hog").priority(10).period(ms(1_000)), noop())
            .unwrap();
        let waiter = s.add_task(TaskParams::new("waiter"), noop()).unwrap();

        let t0 = Instant::now();
        s.activate_at(t0).unwrap();
        for i in 0..5 {
            s.run_cycle_at(t0 + ms(i)).unwrap();
            assert_invariants(&s);
            let w = s.task(waiter);
            assert_eq!(w.state(), TaskState::Idle);
            assert_eq!(w.stats().runs, 0);
            assert_eq!(w.stats().fails, 0);
        }

        // hog exits on its fifth poll; the waiter gets the core in that cycle
        s.run_cycle_at(t0 + ms(5)).unwrap();
        assert_eq!(s.task(waiter).stats().runs, 1);
        assert_eq!(s.task(waiter).state(), TaskState::Running);
    }

    #[test]
    fn every_core_assigned_means_none_available() {
        let mut s = scheduler(config(3, None), FakeLauncher::default());
        for name in ["a", "b", "c", "d"] {
            s.add_task(TaskParams::new(name), noop()).unwrap();
        }
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();
        s.monitor_at(t0);

        let fireable = s
            .tasks()
            .iter()
            .filter(|t| t.state() == TaskState::Fireable)
            .count();
        assert_eq!(fireable, 3);
        assert_eq!(s.task_by_name("d").unwrap().state(), TaskState::Idle);
        assert!(s.cores().iter().all(Core::is_assigned));
        assert_invariants(&s);
    }

    // ── Outcome accounting ────────────────────────────────────────────────────

    #[test]
    fn exit_two_counts_as_error() {
        let launcher = FakeLauncher::default().script("t", &[CORRUPT]);
        let mut s = scheduler(config(2, Some(0)), launcher);
        let id = s.add_task(TaskParams::new("t"), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        s.run_cycle_at(t0).unwrap();
        s.monitor_at(t0 + ms(1));

        let stats = s.task(id).stats();
        assert_eq!((stats.success, stats.fails, stats.errors), (0, 0, 1));
        assert_eq!(s.cores()[1].weight(), 75.0);
    }

    #[test]
    fn signal_counts_as_failure() {
        let launcher = FakeLauncher::default().script("t", &[Script::Signal(9)]);
        let mut s = scheduler(config(2, Some(0)), launcher);
        let id = s.add_task(TaskParams::new("t"), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        s.run_cycle_at(t0).unwrap();
        s.monitor_at(t0 + ms(1));

        let stats = s.task(id).stats();
        assert_eq!((stats.success, stats.fails, stats.errors), (0, 1, 0));
    }

    #[test]
    fn crashed_task_is_retried() {
        let launcher = FakeLauncher::default().script("t", &[FAIL, OK]);
        let mut s = scheduler(config(2, Some(0)), launcher);
        let id = s.add_task(TaskParams::new("t"), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        s.run_cycle_at(t0).unwrap();
        s.run_cycle_at(t0 + ms(1)).unwrap(); // fails, relaunched
        s.monitor_at(t0 + ms(2)); // succeeds

        let stats = s.task(id).stats();
        assert_eq!(stats.runs, 2);
        assert_eq!((stats.success, stats.fails), (1, 1));
    }

    // ── Stuck detection ───────────────────────────────────────────────────────

    #[test]
    fn stuck_task_is_killed_and_counted_as_failure() {
        let launcher = FakeLauncher::default().script("t", &[Script::Hang]);
        let mut cfg = config(2, Some(0));
        cfg.stuck_time = ms(50);
        let mut s = scheduler(cfg, launcher);
        let id = s.add_task(TaskParams::new("t").period(ms(10_000)), noop())
            .unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        s.run_cycle_at(t0).unwrap();
        s.run_cycle_at(t0 + ms(10)).unwrap();
        s.run_cycle_at(t0 + ms(40)).unwrap();
        assert!(s.task(id).is_running(), "below threshold: still running");

        s.run_cycle_at(t0 + ms(60)).unwrap();
        let task = s.task(id);
        assert_eq!(task.state(), TaskState::Crashed);
        assert_eq!(task.stats().fails, 1);
        assert_eq!(s.launcher().terminated, vec![1]);
        assert_eq!(s.launcher().live_cores(), 0);
        assert!(!s.cores()[1].is_assigned());
        assert_eq!(s.cores()[1].weight(), 75.0);
    }

    // ── Timing ────────────────────────────────────────────────────────────────

    #[test]
    fn periodic_task_fires_at_most_once_per_period() {
        let mut s = scheduler(config(2, Some(0)), FakeLauncher::default());
        let id = s
            .add_task(TaskParams::new("p").period(ms(100)), noop())
            .unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        let mut launches = Vec::new();
        let mut runs = 0;
        for i in 0..100 {
            let now = t0 + ms(i * 10);
            s.run_cycle_at(now).unwrap();
            if s.task(id).stats().runs > runs {
                runs = s.task(id).stats().runs;
                launches.push(i * 10);
            }
        }

        assert!(launches.len() >= 8);
        for pair in launches.windows(2) {
            assert!(pair[1] - pair[0] > 100, "launched at {pair:?}");
        }
    }

    #[test]
    fn offset_delays_first_eligibility() {
        let mut s = scheduler(config(2, Some(0)), FakeLauncher::default());
        let id = s
            .add_task(TaskParams::new("late").offset(ms(50)), noop())
            .unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        for i in 0..5 {
            s.run_cycle_at(t0 + ms(i * 10)).unwrap();
        }
        assert_eq!(s.task(id).stats().runs, 0);

        s.run_cycle_at(t0 + ms(50)).unwrap();
        assert_eq!(s.task(id).stats().runs, 1);
    }

    #[test]
    fn higher_priority_task_gets_the_only_core() {
        let mut s = scheduler(config(2, Some(0)), FakeLauncher::default());
        s.add_task(TaskParams::new("low").priority(1), noop()).unwrap();
        s.add_task(TaskParams::new("high").priority(9), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        s.monitor_at(t0);
        assert_eq!(s.task_by_name("high").unwrap().state(), TaskState::Fireable);
        assert_eq!(s.task_by_name("low").unwrap().state(), TaskState::Idle);
    }

    // ── Mixed workload invariants ─────────────────────────────────────────────

    #[test]
    fn invariants_hold_for_mixed_workload() {
        let slow = Script::Exit {
            after_polls: 3,
            code: 0,
        };
        let launcher = FakeLauncher::default()
            .script("a", &[OK, FAIL, slow, CORRUPT])
            .script("b", &[slow, Script::Signal(11), OK])
            .script("c", &[FAIL, FAIL, OK, Script::Hang])
            .script("r1", &[OK, slow])
            .script("r2", &[FAIL, OK, OK]);
        let mut cfg = config(4, Some(0));
        cfg.stuck_time = ms(30);
        let mut s = scheduler(cfg, launcher);

        s.add_task(TaskParams::new("a").period(ms(5)).priority(3), noop())
            .unwrap();
        s.add_task(TaskParams::new("b").priority(2), noop()).unwrap();
        s.add_task(TaskParams::new("c").offset(ms(20)), noop()).unwrap();
        s.add_task(TaskParams::new("r1").period(ms(15)), noop()).unwrap();
        s.add_task(TaskParams::new("r2").period(ms(15)), noop()).unwrap();
        s.add_voter(TaskParams::new("v").priority(5), &["r1", "r2"], noop())
            .unwrap();

        let t0 = Instant::now();
        s.activate_at(t0).unwrap();
        for i in 0..400 {
            s.run_cycle_at(t0 + ms(i)).unwrap();
            assert_invariants(&s);
            assert!(s.launcher().live_cores() <= 3, "more processes than task cores");
        }

        s.shutdown();
        assert_invariants(&s);
        assert_eq!(s.launcher().live_cores(), 0);
        assert!(s.cores().iter().all(|c| !c.is_assigned()));
    }

    // ── Dispatch failure ──────────────────────────────────────────────────────

    #[test]
    fn spawn_failure_stops_everything() {
        let launcher = FakeLauncher {
            fail_spawn: Some("bad".into()),
            ..FakeLauncher::default().script("good", &[Script::Hang])
        };
        let mut s = scheduler(config(3, Some(0)), launcher);
        s.add_task(TaskParams::new("good").priority(5), noop()).unwrap();
        s.add_task(TaskParams::new("bad").offset(ms(1)), noop()).unwrap();

        let t0 = Instant::now();
        s.activate_at(t0).unwrap();
        s.run_cycle_at(t0).unwrap();
        assert!(s.task_by_name("good").unwrap().is_running());

        let err = s.run_cycle_at(t0 + ms(1)).unwrap_err();
        assert!(matches!(err, SchedulerError::Spawn { ref task, .. } if task == "bad"));
        assert!(!s.task_by_name("good").unwrap().is_running());
        assert_eq!(s.launcher().terminated, vec![1]);
        assert!(s.cores().iter().all(|c| !c.is_assigned()));
    }

    // ── Termination ───────────────────────────────────────────────────────────

    #[test]
    fn wall_clock_budget_ends_the_run() {
        let mut cfg = config(2, Some(0));
        cfg.termination = Termination::WallClock(ms(100));
        let mut s = scheduler(cfg, FakeLauncher::default());
        s.add_task(TaskParams::new("a"), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        assert!(s.is_active_at(t0 + ms(99)));
        assert!(!s.is_active_at(t0 + ms(100)));
    }

    #[test]
    fn iteration_budget_counts_reference_task_launches() {
        let mut cfg = config(3, Some(0));
        cfg.termination = Termination::Iterations {
            task: "ref".into(),
            count: 3,
        };
        let mut s = scheduler(cfg, FakeLauncher::default());
        s.add_task(TaskParams::new("ref"), noop()).unwrap();
        s.add_task(TaskParams::new("other"), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        let mut cycles = 0;
        while s.is_active_at(t0 + ms(cycles)) {
            s.run_cycle_at(t0 + ms(cycles)).unwrap();
            cycles += 1;
            assert!(cycles < 100, "budget never reached");
        }
        assert_eq!(s.task_by_name("ref").unwrap().stats().runs, 3);
    }

    #[test]
    fn unknown_iteration_task_fails_activation() {
        let mut cfg = config(2, Some(0));
        cfg.termination = Termination::Iterations {
            task: "ghost".into(),
            count: 3,
        };
        let mut s = scheduler(cfg, FakeLauncher::default());
        s.add_task(TaskParams::new("a"), noop()).unwrap();
        assert!(matches!(
            s.activate(),
            Err(SchedulerError::UnknownTerminationTask(name)) if name == "ghost"
        ));
    }

    // ── Registration ──────────────────────────────────────────────────────────

    #[test]
    fn duplicate_task_name_is_rejected() {
        let mut s = scheduler(config(2, Some(0)), FakeLauncher::default());
        s.add_task(TaskParams::new("a"), noop()).unwrap();
        assert!(matches!(
            s.add_task(TaskParams::new("a"), noop()),
            Err(SchedulerError::DuplicateTask(_))
        ));
    }

    #[test]
    fn voter_registration_is_validated() {
        let mut s = scheduler(config(2, Some(0)), FakeLauncher::default());
        s.add_task(TaskParams::new("r"), noop()).unwrap();

        assert!(matches!(
            s.add_voter(TaskParams::new("v0"), &[], noop()),
            Err(SchedulerError::EmptyReplicaSet { .. })
        ));
        assert!(matches!(
            s.add_voter(TaskParams::new("v1"), &["r", "missing"], noop()),
            Err(SchedulerError::UnknownReplica { ref replica, .. }) if replica == "missing"
        ));

        s.add_voter(TaskParams::new("v2"), &["r"], noop()).unwrap();
        assert!(matches!(
            s.add_voter(TaskParams::new("v3"), &["v2"], noop()),
            Err(SchedulerError::NestedVoter { .. })
        ));
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let result = Scheduler::new(config(0, None), FakeLauncher::default(), NoInputs);
        assert!(matches!(result, Err(SchedulerError::InvalidConfig { .. })));
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    #[test]
    fn status_snapshots_follow_log_interval() {
        let mut cfg = config(2, Some(0));
        cfg.log_interval = ms(100);
        let mut s = scheduler(cfg, FakeLauncher::default());
        s.add_task(TaskParams::new("a"), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        for i in 0..=35 {
            s.run_cycle_at(t0 + ms(i * 10)).unwrap();
        }

        let history = s.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].elapsed_ms, 100);
        assert!(history[2].task("a").unwrap().success > 0);
        assert!(history[2].cores[0].reserved);
    }

    #[test]
    fn history_keeps_only_the_latest_snapshots() {
        let mut cfg = config(2, Some(0));
        cfg.log_interval = ms(100);
        cfg.history_limit = 2;
        let mut s = scheduler(cfg, FakeLauncher::default());
        s.add_task(TaskParams::new("a"), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();

        for i in 0..=55 {
            s.run_cycle_at(t0 + ms(i * 10)).unwrap();
        }

        let history = s.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].elapsed_ms, 400);
        assert_eq!(history[1].elapsed_ms, 500);
    }

    #[test]
    fn snapshot_mirrors_live_counters() {
        let launcher = FakeLauncher::default().script("a", &[FAIL]);
        let mut s = scheduler(config(2, Some(0)), launcher);
        s.add_task(TaskParams::new("a"), noop()).unwrap();
        let t0 = Instant::now();
        s.activate_at(t0).unwrap();
        s.run_cycle_at(t0).unwrap();
        s.monitor_at(t0 + ms(5));

        let snap = s.snapshot_at(t0 + ms(5));
        assert_eq!(snap.elapsed_ms, 5);
        let a = snap.task("a").unwrap();
        assert_eq!((a.runs, a.fails), (1, 1));
        assert_eq!(a.core_runs, vec![0, 1]);
        assert_eq!(snap.cores[1].weight, 75.0);
        assert_eq!(snap.cores[1].runs, 1);
    }
}
