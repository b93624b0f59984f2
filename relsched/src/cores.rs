/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Execution-unit model and its reliability reputation.
//!
//! Each [`Core`] carries a trailing window of the last `K` per-run scores.
//! The core's weight is the sum of that window:
//!
//! ```text
//!   window (K = 4)        weight
//!   [25, 25, 25, 25]  →   100.0     (start-up: MAX_WEIGHT spread evenly)
//!   [25, 25, 25,  0]  →    75.0     (one failure)
//!   [25, 25,  0, 25]  →    75.0     (success pushes out an old 25)
//!   [ 0, 25, 25, 25]  →    75.0
//!   [25, 25, 25, 25]  →   100.0     (failure evicted after K runs)
//! ```
//!
//! A single run can move the weight by at most `MAX_WEIGHT / K`, and any
//! amount of drift is fully corrected after `K` runs.

use std::collections::VecDeque;

/// Index of a core inside the scheduler's core pool.
pub type CoreId = usize;

// ── ReliabilityWindow ─────────────────────────────────────────────────────────

/// Fixed-length FIFO of per-run reliability scores.
///
/// The length never changes after construction: every push evicts exactly one
/// entry.
#[derive(Debug, Clone)]
pub struct ReliabilityWindow {
    scores: VecDeque<f64>,
    max_weight: f64,
}

impl ReliabilityWindow {
    /// Create a window of `len` entries that together sum to `max_weight`.
    ///
    /// `len` is clamped to at least one entry.
    pub fn new(len: usize, max_weight: f64) -> Self {
        let len = len.max(1);
        let slot = max_weight / len as f64;
        Self {
            scores: std::iter::repeat(slot).take(len).collect(),
            max_weight,
        }
    }

    /// Largest score a single run may contribute (`max_weight / len`).
    pub fn max_score(&self) -> f64 {
        self.max_weight / self.scores.len() as f64
    }

    /// Evict the oldest score and append `score` (clamped to `[0, max_score]`).
    ///
    /// Returns the evicted score.
    pub fn push(&mut self, score: f64) -> f64 {
        let score = if score.is_finite() {
            score.clamp(0.0, self.max_score())
        } else {
            0.0
        };
        let evicted = self.scores.pop_front().unwrap_or(0.0);
        self.scores.push_back(score);
        evicted
    }

    /// Sum of the window, clamped to `max_weight`.
    pub fn total(&self) -> f64 {
        self.scores.iter().sum::<f64>().min(self.max_weight)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Scores from oldest to newest.
    pub fn scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.scores.iter().copied()
    }
}

// ── Core ──────────────────────────────────────────────────────────────────────

/// One execution unit of the pool.
///
/// Created once at scheduler start-up and mutated only by the scheduler when a
/// task launched on it leaves the `running` state.
#[derive(Debug, Clone)]
pub struct Core {
    id: CoreId,
    weight: f64,
    assigned: bool,
    runs: u64,
    window: ReliabilityWindow,
}

impl Core {
    /// A fresh, unassigned core at full reliability (`max_weight`).
    pub fn new(id: CoreId, max_weight: f64, window_len: usize) -> Self {
        let window = ReliabilityWindow::new(window_len, max_weight);
        Self {
            id,
            weight: window.total(),
            assigned: false,
            runs: 0,
            window,
        }
    }

    pub fn id(&self) -> CoreId {
        self.id
    }

    /// Current reliability weight, always equal to the window sum.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// `true` while a task owns this core (selected, launched or running).
    pub fn is_assigned(&self) -> bool {
        self.assigned
    }

    /// Number of completed runs (any outcome) hosted on this core.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn window(&self) -> &ReliabilityWindow {
        &self.window
    }

    /// Score a successful run contributes.
    pub fn success_score(&self) -> f64 {
        self.window.max_score()
    }

    pub(crate) fn set_assigned(&mut self, assigned: bool) {
        self.assigned = assigned;
    }

    /// Push the score of the most recent run into the trailing window and
    /// recompute the weight.
    pub fn record_outcome(&mut self, score: f64) {
        self.window.push(score);
        self.weight = self.window.total();
    }

    /// Close out a run hosted on this core: score it, count it and release the
    /// core for future selection.
    pub(crate) fn complete_run(&mut self, score: f64) {
        self.record_outcome(score);
        self.runs += 1;
        self.assigned = false;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
