//! Scheduler configuration and workload file loading.
//!
//! Runtime values live in [`SchedulerConfig`].  The defaults describe an
//! 8-core board with core 0 reserved for the scheduler, weight 100 spread over
//! a 4-slot window and a 10 s run.
//!
//! A workload file adds the task set.  The expected YAML structure is:
//! ```yaml
//! scheduler:
//!   cores: 4
//!   scheduler_core: 0
//!   max_weight: 100.0
//!   window: 4
//!   stuck_time_ms: 2000
//!   idle_sleep_ms: 1
//!   log_interval_ms: 1000
//!   history_limit: 3600
//!   voter_policy: weighted
//!   min_reliability: 50.0
//!   wall_clock_ms: 10000
//! tasks:
//!   - name: sensor
//!     period_ms: 1000
//!     priority: 10
//!     command: ["/bin/sh", "-c", "exit 0"]
//!   - name: vote
//!     command: ["/bin/true"]
//!     replicas: [sensor_1, sensor_2, sensor_3]
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::cores::CoreId;
use crate::scheduler::SchedulerError;

// ── Runtime configuration ─────────────────────────────────────────────────────

/// Placement policy applied to voter tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterPolicy {
    /// Any idle core, chosen like a plain task (fewest runs).
    Standard,
    /// Most reliable idle core, and only if it meets `min_reliability`.
    #[default]
    Weighted,
}

/// When the scheduler loop stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Stop once this much time has passed since activation.
    WallClock(Duration),
    /// Stop once `task` has been launched `count` times.
    Iterations { task: String, count: u64 },
}

impl Default for Termination {
    fn default() -> Self {
        Termination::WallClock(Duration::from_secs(10))
    }
}

/// Everything the scheduler needs besides the task set.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Size of the core pool (ids `0..cores`).
    pub cores: usize,
    /// Core reserved for the scheduler process itself, never assigned to tasks.
    pub scheduler_core: Option<CoreId>,
    /// Upper bound of a core's reliability weight.
    pub max_weight: f64,
    /// Length `K` of the trailing reliability window.
    pub window: usize,
    /// Running time after which an unchanged poll marks a task stuck.
    pub stuck_time: Duration,
    /// Pause between two monitor/dispatch cycles.
    pub idle_sleep: Duration,
    /// Interval of status snapshots and status log lines.
    pub log_interval: Duration,
    /// Number of status snapshots kept; older ones are dropped first.
    pub history_limit: usize,
    pub voter_policy: VoterPolicy,
    /// Minimum weight of a core a weighted voter may be placed on.
    pub min_reliability: f64,
    pub termination: Termination,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cores: 8,
            scheduler_core: Some(0),
            max_weight: 100.0,
            window: 4,
            stuck_time: Duration::from_secs(2),
            idle_sleep: Duration::from_millis(1),
            log_interval: Duration::from_secs(1),
            history_limit: 3_600,
            voter_policy: VoterPolicy::Weighted,
            min_reliability: 50.0,
            termination: Termination::default(),
        }
    }
}

impl SchedulerConfig {
    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |reason: String| Err(SchedulerError::InvalidConfig { reason });

        if self.cores == 0 {
            return invalid("core pool is empty".into());
        }
        if self.window == 0 {
            return invalid("reliability window must hold at least one score".into());
        }
        if self.idle_sleep.is_zero() {
            return invalid("idle_sleep must be non-zero".into());
        }
        if !self.max_weight.is_finite() || self.max_weight <= 0.0 {
            return invalid(format!("max_weight must be positive, got {}", self.max_weight));
        }
        if let Some(core) = self.scheduler_core {
            if core >= self.cores {
                return invalid(format!(
                    "scheduler core {core} is outside the pool of {} core(s)",
                    self.cores
                ));
            }
            if self.cores == 1 {
                return invalid("no core left for tasks after reserving the scheduler core".into());
            }
        }
        if !(0.0..=self.max_weight).contains(&self.min_reliability) {
            return invalid(format!(
                "min_reliability {} is outside [0, {}]",
                self.min_reliability, self.max_weight
            ));
        }
        match &self.termination {
            Termination::WallClock(budget) if budget.is_zero() => {
                invalid("wall-clock budget is zero".into())
            }
            Termination::Iterations { count: 0, .. } => {
                invalid("iteration budget is zero".into())
            }
            _ => Ok(()),
        }
    }
}

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WorkloadFile {
    #[serde(default)]
    scheduler: SchedulerSection,
    #[serde(default)]
    tasks: Vec<TaskEntry>,
}

/// `scheduler:` section.  Every field is optional; absent values fall back to
/// [`SchedulerConfig::default`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchedulerSection {
    cores: Option<usize>,
    // Outer Option: field absent → default core; inner None: explicit null.
    #[serde(default, deserialize_with = "explicit_null")]
    scheduler_core: Option<Option<CoreId>>,
    max_weight: Option<f64>,
    window: Option<usize>,
    stuck_time_ms: Option<u64>,
    idle_sleep_ms: Option<u64>,
    log_interval_ms: Option<u64>,
    history_limit: Option<usize>,
    voter_policy: Option<VoterPolicy>,
    min_reliability: Option<f64>,
    wall_clock_ms: Option<u64>,
    iterations: Option<IterationEntry>,
}

fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<CoreId>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<CoreId>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
struct IterationEntry {
    task: String,
    count: u64,
}

/// One entry of the `tasks:` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEntry {
    pub name: String,
    #[serde(default)]
    pub period_ms: u64,
    #[serde(default)]
    pub offset_ms: u64,
    #[serde(default)]
    pub priority: i32,
    /// Program and arguments executed for every invocation.
    pub command: Vec<String>,
    /// Non-empty: this task is a voter over the named replicas.
    #[serde(default)]
    pub replicas: Vec<String>,
}

impl TaskEntry {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms)
    }

    pub fn is_voter(&self) -> bool {
        !self.replicas.is_empty()
    }
}

impl SchedulerSection {
    fn into_config(self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        let ms = Duration::from_millis;

        let termination = match (self.iterations, self.wall_clock_ms) {
            (Some(it), _) => Termination::Iterations {
                task: it.task,
                count: it.count,
            },
            (None, Some(budget)) => Termination::WallClock(ms(budget)),
            (None, None) => defaults.termination,
        };

        SchedulerConfig {
            cores: self.cores.unwrap_or(defaults.cores),
            scheduler_core: self.scheduler_core.unwrap_or(defaults.scheduler_core),
            max_weight: self.max_weight.unwrap_or(defaults.max_weight),
            window: self.window.unwrap_or(defaults.window),
            stuck_time: self.stuck_time_ms.map(ms).unwrap_or(defaults.stuck_time),
            idle_sleep: self.idle_sleep_ms.map(ms).unwrap_or(defaults.idle_sleep),
            log_interval: self.log_interval_ms.map(ms).unwrap_or(defaults.log_interval),
            history_limit: self.history_limit.unwrap_or(defaults.history_limit),
            voter_policy: self.voter_policy.unwrap_or(defaults.voter_policy),
            min_reliability: self.min_reliability.unwrap_or(defaults.min_reliability),
            termination,
        }
    }
}

// ── WorkloadConfig ────────────────────────────────────────────────────────────

/// A complete workload: scheduler settings plus the declared task set.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub scheduler: SchedulerConfig,
    pub tasks: Vec<TaskEntry>,
}

impl WorkloadConfig {
    /// Parse and validate a YAML workload file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is malformed,
    /// the scheduler settings are invalid, no task is declared, or a task has
    /// an empty command.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading workload configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: WorkloadFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let scheduler = file.scheduler.into_config();
        scheduler
            .validate()
            .with_context(|| format!("Invalid scheduler settings in {}", path.display()))?;

        if file.tasks.is_empty() {
            bail!("No tasks declared in {}", path.display());
        }
        for task in &file.tasks {
            if task.command.is_empty() {
                bail!("Task '{}' has an empty command", task.name);
            }
            debug!(
                "  Task: {} | period: {}ms | offset: {}ms | priority: {} | replicas: {:?}",
                task.name, task.period_ms, task.offset_ms, task.priority, task.replicas
            );
        }

        info!(
            cores = scheduler.cores,
            scheduler_core = ?scheduler.scheduler_core,
            tasks = file.tasks.len(),
            "Workload loaded"
        );

        Ok(Self {
            scheduler,
            tasks: file.tasks,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
