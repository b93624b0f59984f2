/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! relsched – reliability-aware multi-core task scheduler
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/         – scheduler settings + YAML workload files
//! ├── cores           – core pool records and the reliability window
//! ├── task            – task records and the execution state machine
//! ├── voter           – NMR arming gate and output reconciliation
//! ├── process         – payload contract, fork/waitpid process primitive
//! ├── channel         – pipe channels and input readiness
//! ├── scheduler/      – monitor / dispatch loop and core placement
//! ├── report          – serialisable result snapshots
//! └── runner          – tokio driver with Ctrl+C shutdown
//! ```

pub mod channel;
pub mod config;
pub mod cores;
pub mod process;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod task;
pub mod voter;
