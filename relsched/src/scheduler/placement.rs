/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core selection.
//!
//! | Policy | Picks | Tie-break | Refuses when |
//! |---|---|---|---|
//! | `LoadBalance` | fewest completed runs | lowest id | no idle core |
//! | `Reliability` | highest weight | fewest runs, then lowest id | no idle core, or best weight < threshold |
//!
//! The reserved scheduler core is never a candidate.  A successful selection
//! marks the core assigned before returning, so one core can never be handed
//! to two tasks.  `None` is back-pressure, not an error.

use tracing::debug;

use crate::config::VoterPolicy;
use crate::cores::{Core, CoreId};

/// How to choose among idle cores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    LoadBalance,
    Reliability { min_weight: f64 },
}

impl Placement {
    /// Policy for a task: weighted voters use reliability, everything else
    /// balances load.
    pub fn for_task(is_voter: bool, policy: VoterPolicy, min_reliability: f64) -> Self {
        match (is_voter, policy) {
            (true, VoterPolicy::Weighted) => Placement::Reliability {
                min_weight: min_reliability,
            },
            _ => Placement::LoadBalance,
        }
    }
}

/// Choose an idle core and mark it assigned.
pub fn select_core(
    cores: &mut [Core],
    reserved: Option<CoreId>,
    placement: Placement,
) -> Option<CoreId> {
    let candidates = cores
        .iter()
        .filter(|core| Some(core.id()) != reserved && !core.is_assigned());

    let chosen = match placement {
        Placement::LoadBalance => candidates.min_by_key(|core| (core.runs(), core.id())),
        Placement::Reliability { min_weight } => {
            let best = candidates.max_by(|a, b| {
                a.weight()
                    .total_cmp(&b.weight())
                    .then(b.runs().cmp(&a.runs()))
                    .then(b.id().cmp(&a.id()))
            });
            match best {
                Some(core) if core.weight() < min_weight => {
                    debug!(
                        core = core.id(),
                        weight = core.weight(),
                        min_weight = min_weight,
                        "best idle core is below the reliability threshold"
                    );
                    None
                }
                other => other,
            }
        }
    };

    let id = chosen?.id();
    if let Some(core) = cores.iter_mut().find(|core| core.id() == id) {
        core.set_assigned(true);
    }
    Some(id)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
