// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Dependency-cycle detection, layered over the workspace's own DAG type.
//!
//! The match/apply driver resolves prerequisites lazily and does not by
//! itself notice a target that (directly or transitively) depends on
//! itself. This module records the edges the driver discovers as it goes
//! and refuses one that would close a cycle, the same way a build graph
//! used for transaction ordering elsewhere in the workspace does.

use std::sync::Mutex;

use dag::Dag;
use thiserror::Error;

use crate::target::TargetHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("dependency cycle: `{prerequisite}` is already reachable from `{target}`")]
    Cycle { target: String, prerequisite: String },
}

/// The edges discovered so far for one build context, independent of
/// which action they were discovered under — a target depending on itself
/// through any action is a cycle.
#[derive(Default)]
pub struct DependencyGraph {
    inner: Mutex<Dag<TargetHandle>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `target` depends on `prerequisite`. Returns
    /// [`Error::Cycle`] if `prerequisite` can already reach `target`, which
    /// would make the new edge close a loop.
    pub fn record_edge(&self, target: &TargetHandle, prerequisite: &TargetHandle) -> Result<(), Error> {
        let mut graph = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let target_index = graph.add_node_or_get_index(target);
        let prerequisite_index = graph.add_node_or_get_index(prerequisite);

        if graph.add_edge(target_index, prerequisite_index) {
            Ok(())
        } else {
            Err(Error::Cycle {
                target: target.to_string(),
                prerequisite: prerequisite.to_string(),
            })
        }
    }
}
