/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! N-modular redundancy voter: the two-phase arming gate.
//!
//! A voter must never read output left over from a previous cycle.  It
//! therefore only fires after it has seen **every** replica start a run and
//! then seen **every** replica finish it:
//!
//! ```text
//!            phase 1: arming                      phase 2: disarming
//!   replica  running?  → local armed = true       not running? → local armed = false
//!   ───────  ──────────────────────────────       ─────────────────────────────────
//!   all local flags set → global armed            all local flags clear → FIRE
//!   (never fires in this phase)                   (global armed reset)
//! ```
//!
//! If every replica crashed in the round, the voter stays silent instead of
//! voting on absent data.

use crate::task::TaskId;

/// What the voter sees of one replica during a single `monitor` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaView {
    /// Replica was running at the start of this pass or is running now.
    pub observed_running: bool,
    /// Replica is running now.
    pub running: bool,
    /// The replica's most recent completed run succeeded.
    pub succeeded: bool,
}

/// Result of one arming check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmingDecision {
    /// Still arming, or some replica has not finished yet.
    Wait,
    /// Every replica started and finished a run since the last vote.
    Fire,
    /// The round completed but no replica succeeded.
    NoSurvivors,
}

/// Voter-specific part of a task record.
#[derive(Debug, Clone)]
pub struct VoterData {
    replicas: Vec<TaskId>,
    replica_armed: Vec<bool>,
    armed: bool,
    pending: bool,
}

impl VoterData {
    pub fn new(replicas: Vec<TaskId>) -> Self {
        let replica_armed = vec![false; replicas.len()];
        Self {
            replicas,
            replica_armed,
            armed: false,
            pending: false,
        }
    }

    pub fn replicas(&self) -> &[TaskId] {
        &self.replicas
    }

    /// Global armed flag: every replica has been seen running this round.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn replica_armed(&self) -> &[bool] {
        &self.replica_armed
    }

    /// A released round that could not be placed yet.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub(crate) fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }

    /// Run the arming protocol once.  `replicas` is indexed like
    /// [`replicas()`](Self::replicas).
    pub fn check(&mut self, replicas: &[ReplicaView]) -> ArmingDecision {
        if !self.armed {
            for (flag, view) in self.replica_armed.iter_mut().zip(replicas) {
                if view.observed_running {
                    *flag = true;
                }
            }
            self.armed = self.replica_armed.iter().all(|&armed| armed);
            return ArmingDecision::Wait;
        }

        for (flag, view) in self.replica_armed.iter_mut().zip(replicas) {
            if !view.running {
                *flag = false;
            }
        }
        if self.replica_armed.iter().any(|&armed| armed) {
            return ArmingDecision::Wait;
        }

        self.armed = false;
        if replicas.iter().any(|view| view.succeeded) {
            ArmingDecision::Fire
        } else {
            ArmingDecision::NoSurvivors
        }
    }

    /// `true` exactly when [`check`](Self::check) decides to fire.
    pub fn is_fireable(&mut self, replicas: &[ReplicaView]) -> bool {
        self.check(replicas) == ArmingDecision::Fire
    }
}

// ── Reconciliation ────────────────────────────────────────────────────────────

/// Reconcile replica outputs for a voter payload.
///
/// Returns the first value that at least two present replicas agree on;
/// failing that, the first present value; `None` when every replica is
/// missing.
pub fn majority<T: PartialEq + Clone>(values: &[Option<T>]) -> Option<T> {
    let present: Vec<&T> = values.iter().flatten().collect();

    for (i, candidate) in present.iter().enumerate() {
        if present[i + 1..].iter().any(|other| other == candidate) {
            return Some((*candidate).clone());
        }
    }

    present.first().map(|v| (*v).clone())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
