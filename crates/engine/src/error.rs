// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! The top-level error type aggregating every subsystem's errors.

use thiserror::Error;

/// Any error the engine can report, whether from a misbehaving build
/// description, a failed recipe, or the engine's own internal invariants.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Value(#[from] crate::value::Error),

    #[error(transparent)]
    Variable(#[from] crate::variable::Error),

    #[error(transparent)]
    Target(#[from] crate::target::Error),

    #[error(transparent)]
    Rule(#[from] crate::rule::Error),

    #[error(transparent)]
    Recipe(#[from] crate::rule::RecipeError),

    #[error(transparent)]
    Depdb(#[from] crate::depdb::Error),

    #[error(transparent)]
    Install(#[from] crate::install::Error),

    #[error(transparent)]
    Dist(#[from] crate::dist::Error),

    #[error(transparent)]
    Extract(#[from] crate::extract::Error),

    #[error(transparent)]
    Graph(#[from] crate::graph::Error),

    #[error("deadlock detected: no thread made progress for {stalled_for_ms}ms with {waiting} waiting")]
    Deadlock { waiting: usize, stalled_for_ms: u64 },

    #[error("phase transition failed: {0}")]
    PhaseMutexFailed(String),

    #[error("{target} failed to build")]
    BuildFailed { target: String },

    #[error(transparent)]
    Diagnostic(#[from] crate::diagnostics::Diagnostic),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a `keep_going` build should continue collecting further
    /// failures after this one, or stop immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Deadlock { .. } | Error::PhaseMutexFailed(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipe_and_internal_errors_are_fatal_appropriately() {
        let build_failed = Error::BuildFailed { target: "obj{hello}".into() };
        assert!(!build_failed.is_fatal());

        let deadlock = Error::Deadlock { waiting: 3, stalled_for_ms: 5000 };
        assert!(deadlock.is_fatal());
    }
}
