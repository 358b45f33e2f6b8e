// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Logging setup and progress reporting, layered on `tracing` the same way
//! `tracing_common` sets up its subscriber: one global filter keyed by
//! module-scoped targets, with an engine verbosity knob mapped onto
//! `tracing::Level`.

use std::sync::atomic::{AtomicUsize, Ordering};

pub use tracing_common::{OutputDestination, OutputFormat};
use tracing::level_filters::LevelFilter;

/// Module-scoped event targets the rest of the crate logs under.
pub mod targets {
    pub const SCOPE: &str = "engine::scope";
    pub const TARGET: &str = "engine::target";
    pub const PHASE: &str = "engine::phase";
    pub const RULE: &str = "engine::rule";
    pub const DEPDB: &str = "engine::depdb";
}

/// Map an engine verbosity (`0..=6`) onto a `tracing` level filter: `0`
/// suppresses everything but errors, `6` is full trace.
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 | 3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Initialize the global `tracing` subscriber for a verbosity level, text
/// output to stderr.
pub fn init(verbosity: u8) {
    tracing_common::init(OutputFormat::Text, level_for_verbosity(verbosity), OutputDestination::Stderr);
}

/// A coarse "are we still moving" counter: every thread that completes a
/// match or execute step bumps it, and the scheduler's deadlock monitor
/// samples it to distinguish genuine deadlock from a merely long-running
/// recipe.
#[derive(Debug, Default)]
pub struct Progress(AtomicUsize);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}
