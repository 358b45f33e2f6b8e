// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! The process-interned variable pool.
//!
//! Each distinct variable name is interned exactly once into a stable,
//! never-relocated handle, so a variable pointer captured anywhere remains
//! valid for the life of the pool it came from.

use std::sync::Mutex;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::value::ValueType;

/// Where a variable's value is visible from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Propagates all the way out to the global scope.
    Normal,
    /// Stops at the variable's root (project) scope.
    Project,
    /// Stops at the current scope.
    Scope,
    /// Only visible when looked up against a specific target.
    Target,
}

/// Which stem position an override variable fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideKind {
    /// `__override`: replaces the stem outright.
    Override,
    /// `__prefix`: prepended to the stem.
    Prefix,
    /// `__suffix`: appended to the stem.
    Suffix,
}

impl OverrideKind {
    pub fn stem_name(&self) -> &'static str {
        match self {
            OverrideKind::Override => "__override",
            OverrideKind::Prefix => "__prefix",
            OverrideKind::Suffix => "__suffix",
        }
    }
}

/// A handle to an interned variable. Cloning is cheap (atomic refcount
/// bump); the underlying allocation never moves for the life of the pool it
/// came from.
pub type VariableHandle = triomphe::Arc<Variable>;

/// A single override registered against a base variable at a particular
/// visibility.
#[derive(Debug, Clone)]
pub struct Override {
    pub kind: OverrideKind,
    pub visibility: Visibility,
    pub variable: VariableHandle,
}

/// An interned variable record.
#[derive(Debug)]
pub struct Variable {
    pub name: String,
    pub ty: Option<ValueType>,
    pub visibility: Visibility,
    overrides: Mutex<Vec<Override>>,
}

impl Variable {
    #[cfg(test)]
    pub fn for_test(name: &str, ty: Option<ValueType>, visibility: Visibility) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            visibility,
            overrides: Mutex::new(Vec::new()),
        }
    }

    pub fn overrides(&self) -> Vec<Override> {
        self.overrides.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn push_override(&self, over: Override) {
        self.overrides.lock().unwrap_or_else(|e| e.into_inner()).push(over);
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}
impl Eq for Variable {}

impl std::hash::Hash for Variable {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self as *const Variable as usize).hash(state);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("variable `{name}` already declared with a different type or visibility")]
    Redeclared { name: String },
}

/// The process-wide (per build context) variable pool. Insertion is only
/// valid during the load phase or an exclusive-load island append; nothing
/// in this type enforces that on its own, the caller (the driver, via the
/// phase mutex) is responsible for only calling [`Pool::enter`] then.
#[derive(Debug, Default)]
pub struct Pool {
    variables: DashMap<String, VariableHandle>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// `enter_variable(name, type?, visibility)` — idempotent: a second
    /// call with the same type/visibility returns the existing handle; a
    /// call that disagrees with the first declaration is an error.
    pub fn enter(&self, name: &str, ty: Option<ValueType>, visibility: Visibility) -> Result<VariableHandle, Error> {
        if let Some(existing) = self.variables.get(name) {
            if existing.ty != ty || existing.visibility != visibility {
                return Err(Error::Redeclared { name: name.to_owned() });
            }
            return Ok(existing.clone());
        }

        let variable = triomphe::Arc::new(Variable {
            name: name.to_owned(),
            ty,
            visibility,
            overrides: Mutex::new(Vec::new()),
        });

        match self.variables.entry(name.to_owned()) {
            Entry::Occupied(slot) => Ok(slot.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(variable.clone());
                Ok(variable)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<VariableHandle> {
        self.variables.get(name).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
