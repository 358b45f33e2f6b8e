// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Engine-wide configuration. The engine itself never reads a config file;
//! callers parse their own configuration and hand the engine these
//! already-resolved knobs.

/// Tunables for one [`crate::context::BuildContext`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of tasks allowed to be simultaneously applied or
    /// executed; `0` means unbounded.
    pub max_active: usize,
    /// Number of scheduler threads, including the calling thread.
    pub max_threads: usize,
    /// If a recipe fails, keep matching/executing independent targets
    /// instead of stopping at the first failure.
    pub keep_going: bool,
    /// Diagnostic verbosity, `0..=6`, mapped onto tracing levels by
    /// [`crate::logging::level_for_verbosity`].
    pub verbosity: u8,
}

impl Options {
    pub fn verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity.min(6);
        self
    }

    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads.max(1);
        self
    }

    pub fn max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_active: 0,
            max_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            keep_going: false,
            verbosity: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_clamp_to_sane_ranges() {
        let options = Options::default().verbosity(9).max_threads(0);
        assert_eq!(options.verbosity, 6);
        assert_eq!(options.max_threads, 1);
    }
}
