// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Meta-operations, operations, and the packed [`Action`] they compose into.

use std::collections::HashMap;
use std::sync::RwLock;

/// Whether an operation's prerequisites run before or after the recipe
/// itself has been matched for all of its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Prerequisites execute (or are postponed) before the recipe runs —
    /// the normal "update" shape.
    First,
    /// The recipe only runs once every dependent has matched — used by
    /// operations like `clean` that must walk prerequisites in reverse
    /// after the whole subgraph is known.
    Last,
}

/// A registered meta-operation (the outer dimension of an action: `perform`,
/// `configure`, `dist`, …).
#[derive(Debug, Clone)]
pub struct MetaOperation {
    pub id: u16,
    pub name: &'static str,
}

/// A registered operation (the inner dimension: `update`, `clean`,
/// `install`, …).
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: u16,
    pub name: &'static str,
    /// Display forms used by progress output: "doing", "did", "done".
    pub doing: &'static str,
    pub did: &'static str,
    pub mode: ExecutionMode,
    /// An operation this one delegates to at dispatch time (e.g.
    /// `update-for-install` delegating to `update`), if any.
    pub delegate: Option<u16>,
}

/// A packed `(meta-operation, outer operation, inner operation)` triple.
/// Operation `0` in the outer slot means "unconditional inner".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Action {
    pub meta_operation: u16,
    pub outer: u16,
    pub inner: u16,
}

impl Action {
    pub const UNCONDITIONAL_OUTER: u16 = 0;

    pub fn new(meta_operation: u16, inner: u16) -> Self {
        Self {
            meta_operation,
            outer: Self::UNCONDITIONAL_OUTER,
            inner,
        }
    }

    pub fn with_outer(meta_operation: u16, inner: u16, outer: u16) -> Self {
        Self { meta_operation, outer, inner }
    }

    /// The fallback action to retry a match with when the full
    /// `(inner, outer)` pairing has no matching rule: "unconditional inner".
    pub fn unconditional_inner(&self) -> Self {
        Self {
            meta_operation: self.meta_operation,
            outer: Self::UNCONDITIONAL_OUTER,
            inner: self.inner,
        }
    }

    /// Total order by specificity: actions with a non-zero outer operation
    /// are more specific than the same inner action with outer `0`, so a
    /// more specific match can replace a less specific one.
    pub fn specificity(&self) -> u32 {
        let outer_bit = u32::from(self.outer != 0) << 16;
        outer_bit | u32::from(self.inner)
    }
}

/// Process-wide (per build context) registry of meta-operations and
/// operations, indexed by id.
#[derive(Debug, Default)]
pub struct Registry {
    meta_operations: RwLock<HashMap<u16, MetaOperation>>,
    operations: RwLock<HashMap<u16, Operation>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_meta_operation(&self, meta: MetaOperation) {
        self.meta_operations.write().unwrap_or_else(|e| e.into_inner()).insert(meta.id, meta);
    }

    pub fn register_operation(&self, op: Operation) {
        self.operations.write().unwrap_or_else(|e| e.into_inner()).insert(op.id, op);
    }

    pub fn meta_operation(&self, id: u16) -> Option<MetaOperation> {
        self.meta_operations.read().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    pub fn operation(&self, id: u16) -> Option<Operation> {
        self.operations.read().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    /// Resolve an operation's delegate chain to the operation that should
    /// actually be dispatched.
    pub fn resolve(&self, mut id: u16) -> Option<Operation> {
        let mut seen = std::collections::HashSet::new();
        loop {
            if !seen.insert(id) {
                return None; // delegate cycle; caller treats as unresolved
            }
            let op = self.operation(id)?;
            match op.delegate {
                Some(next) => id = next,
                None => return Some(op),
            }
        }
    }
}

pub mod well_known {
    //! Small fixed set of ids used by tests and the illustrative rules in
    //! this crate. A real deployment registers its own via [`Registry`].
    pub const PERFORM: u16 = 1;
    pub const CONFIGURE: u16 = 2;
    pub const DIST: u16 = 3;

    pub const UPDATE: u16 = 1;
    pub const CLEAN: u16 = 2;
    pub const INSTALL: u16 = 3;
    pub const UNINSTALL: u16 = 4;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconditional_inner_drops_outer() {
        let action = Action::with_outer(well_known::PERFORM, well_known::UPDATE, well_known::INSTALL);
        assert_eq!(action.unconditional_inner(), Action::new(well_known::PERFORM, well_known::UPDATE));
    }

    #[test]
    fn specific_action_outranks_unconditional() {
        let specific = Action::with_outer(well_known::PERFORM, well_known::UPDATE, well_known::INSTALL);
        let generic = Action::new(well_known::PERFORM, well_known::UPDATE);
        assert!(specific.specificity() > generic.specificity());
    }

    #[test]
    fn delegate_chain_resolves() {
        let registry = Registry::new();
        registry.register_operation(Operation {
            id: 10,
            name: "update-for-install",
            doing: "updating",
            did: "updated",
            mode: ExecutionMode::First,
            delegate: Some(well_known::UPDATE),
        });
        registry.register_operation(Operation {
            id: well_known::UPDATE,
            name: "update",
            doing: "updating",
            did: "updated",
            mode: ExecutionMode::First,
            delegate: None,
        });

        let resolved = registry.resolve(10).unwrap();
        assert_eq!(resolved.id, well_known::UPDATE);
    }

    #[test]
    fn delegate_cycle_is_reported_as_unresolved() {
        let registry = Registry::new();
        registry.register_operation(Operation {
            id: 1,
            name: "a",
            doing: "",
            did: "",
            mode: ExecutionMode::First,
            delegate: Some(2),
        });
        registry.register_operation(Operation {
            id: 2,
            name: "b",
            doing: "",
            did: "",
            mode: ExecutionMode::First,
            delegate: Some(1),
        });

        assert!(registry.resolve(1).is_none());
    }
}
