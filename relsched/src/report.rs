/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Result snapshots for reporting.
//!
//! A [`Snapshot`] is a plain, serialisable copy of every task and core
//! counter at one point in time.  The scheduler keeps one per status interval;
//! [`write_report`] dumps the history plus a final snapshot as YAML.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub name: String,
    pub runs: u64,
    pub success: u64,
    pub fails: u64,
    pub errors: u64,
    /// Launches per core id.
    pub core_runs: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreSnapshot {
    pub id: usize,
    pub weight: f64,
    pub runs: u64,
    pub assigned: bool,
    pub reserved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Milliseconds since scheduler activation.
    pub elapsed_ms: u64,
    pub tasks: Vec<TaskSnapshot>,
    pub cores: Vec<CoreSnapshot>,
}

impl Snapshot {
    pub fn task(&self, name: &str) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Everything written at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Report<'a> {
    pub history: &'a [Snapshot],
    #[serde(rename = "final")]
    pub final_snapshot: &'a Snapshot,
}

/// Serialise `report` as YAML to `path`.
pub fn write_report(path: &Path, report: &Report<'_>) -> Result<()> {
    let yaml = serde_yaml::to_string(report).context("Failed to serialise report")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Cannot write report file: {}", path.display()))?;
    info!(
        path = %path.display(),
        snapshots = report.history.len(),
        "Report written"
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
