// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! The directory-indexed scope tree: variable lookup, override resolution,
//! and the project root chain.
//!
//! Scopes are interned one per directory and linked into a tree mirroring
//! the filesystem. A scope not yet reachable from an existing ancestor is
//! re-parented onto a closer one once that ancestor is itself inserted, and
//! a scope marked as a project root re-roots its descendants onto itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::rule::Registry as RuleRegistry;
use crate::target::TargetTypeHandle;
use crate::value::Value;
use crate::variable::{Override, OverrideKind, Variable, VariableHandle, Visibility};

/// A stable handle to an interned scope.
pub type ScopeHandle = triomphe::Arc<ScopeData>;

/// A directory's worth of build state: its own variables, the pattern
/// variables that apply to targets matching a name pattern in it, the
/// target types and rules visible from it, and its position in the tree.
pub struct ScopeData {
    path: PathBuf,
    parent: Mutex<Option<ScopeHandle>>,
    root: Mutex<Option<ScopeHandle>>,
    variables: Mutex<HashMap<VariableHandle, Value>>,
    pattern_variables: Mutex<Vec<(String, VariableHandle, Value)>>,
    target_types: DashMap<String, TargetTypeHandle>,
    pub rules: RuleRegistry,
}

impl ScopeData {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parent(&self) -> Option<ScopeHandle> {
        self.parent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The project root scope for this one: itself if this scope is a
    /// project root, otherwise the nearest ancestor that is.
    pub fn root(&self, self_handle: &ScopeHandle) -> ScopeHandle {
        self.root
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| self_handle.clone())
    }

    pub fn is_project_root(&self) -> bool {
        self.root.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    pub fn register_target_type(&self, ty: TargetTypeHandle) {
        self.target_types.insert(ty.name.clone(), ty);
    }

    pub fn target_type(&self, name: &str) -> Option<TargetTypeHandle> {
        self.target_types.get(name).map(|entry| entry.clone())
    }

    pub fn assign(&self, variable: VariableHandle, value: Value) {
        self.variables.lock().unwrap_or_else(|e| e.into_inner()).insert(variable, value);
    }

    pub fn assign_pattern(&self, pattern: impl Into<String>, variable: VariableHandle, value: Value) {
        self.pattern_variables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pattern.into(), variable, value));
    }

    fn local(&self, variable: &VariableHandle) -> Option<Value> {
        self.variables.lock().unwrap_or_else(|e| e.into_inner()).get(variable).cloned()
    }

    /// Values assigned in this scope via a name pattern that matches
    /// `target_name` (simple glob: a single leading or trailing `*`).
    fn local_patterns(&self, target_name: &str) -> Vec<(VariableHandle, Value)> {
        self.pattern_variables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(pattern, _, _)| pattern_matches(pattern, target_name))
            .map(|(_, variable, value)| (variable.clone(), value.clone()))
            .collect()
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(suffix), _) if pattern.starts_with('*') => name.ends_with(suffix),
        (_, Some(prefix)) => name.starts_with(prefix),
        _ => pattern == name,
    }
}

/// Walk the ancestor chain (innermost first, this scope included) applying
/// a variable's visibility: `Scope` stops after the starting scope,
/// `Project` stops after the project root, `Normal` walks to the tree root.
/// Returns the first value found.
pub fn find_original(start: &ScopeHandle, variable: &VariableHandle) -> Option<Value> {
    let mut current = start.clone();
    loop {
        if let Some(value) = current.local(variable) {
            return Some(value);
        }

        if matches!(variable.visibility, Visibility::Scope) {
            return None;
        }
        if matches!(variable.visibility, Visibility::Project) && current.is_project_root() {
            return None;
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Look up a variable's effective value for a target with the given name,
/// folding in any `__override`/`__prefix`/`__suffix` variables found in the
/// same scope chain on top of the value [`find_original`] would return.
pub fn lookup(start: &ScopeHandle, target_name: Option<&str>, variable: &VariableHandle) -> Option<Value> {
    if let Some(name) = target_name {
        for (pattern_var, pattern_value) in start.local_patterns(name) {
            if triomphe::Arc::ptr_eq(&pattern_var, variable) {
                return Some(apply_overrides(start, variable, pattern_value));
            }
        }
    }

    let original = find_original(start, variable)?;
    Some(apply_overrides(start, variable, original))
}

fn apply_overrides(start: &ScopeHandle, variable: &VariableHandle, base: Value) -> Value {
    let mut value = base;
    for over in variable.overrides() {
        let Override { kind, .. } = &over;
        let Some(over_value) = find_original(start, &over.variable) else {
            continue;
        };
        match kind {
            OverrideKind::Override => value = over_value,
            OverrideKind::Prefix => {
                let _ = value.prepend(over_value);
            }
            OverrideKind::Suffix => {
                let _ = value.append(over_value);
            }
        }
    }
    value
}

fn is_strict_ancestor(ancestor: &Path, of: &Path) -> bool {
    ancestor != of && of.starts_with(ancestor)
}

/// The scope tree for one build context, rooted at a base directory.
pub struct ScopeTree {
    by_path: DashMap<PathBuf, ScopeHandle>,
    root: ScopeHandle,
}

impl ScopeTree {
    pub fn new(root_dir: PathBuf) -> Self {
        let root = triomphe::Arc::new(ScopeData {
            path: root_dir.clone(),
            parent: Mutex::new(None),
            root: Mutex::new(None),
            variables: Mutex::new(HashMap::new()),
            pattern_variables: Mutex::new(Vec::new()),
            target_types: DashMap::new(),
            rules: RuleRegistry::new(),
        });
        let by_path = DashMap::new();
        by_path.insert(root_dir, root.clone());
        Self { by_path, root }
    }

    pub fn root(&self) -> ScopeHandle {
        self.root.clone()
    }

    pub fn find(&self, dir: &Path) -> Option<ScopeHandle> {
        self.by_path.get(dir).map(|entry| entry.clone())
    }

    fn nearest_ancestor(&self, dir: &Path) -> ScopeHandle {
        self.by_path
            .iter()
            .filter(|entry| is_strict_ancestor(entry.key(), dir))
            .max_by_key(|entry| entry.key().components().count())
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.root.clone())
    }

    /// Intern the scope for `dir`, creating it (and re-parenting any
    /// descendant scopes that were created before it) if necessary.
    pub fn insert(&self, dir: PathBuf) -> ScopeHandle {
        if let Some(existing) = self.find(&dir) {
            return existing;
        }

        let parent = self.nearest_ancestor(&dir);
        let root = if parent.is_project_root() {
            parent.clone()
        } else {
            parent.root(&parent)
        };

        let scope = triomphe::Arc::new(ScopeData {
            path: dir.clone(),
            parent: Mutex::new(Some(parent)),
            root: Mutex::new(Some(root)),
            variables: Mutex::new(HashMap::new()),
            pattern_variables: Mutex::new(Vec::new()),
            target_types: DashMap::new(),
            rules: RuleRegistry::new(),
        });
        self.by_path.insert(dir.clone(), scope.clone());
        self.reparent_descendants(&dir, &scope);
        scope
    }

    /// Mark `scope` as a project root, re-rooting any already-interned
    /// descendants whose root currently points further out.
    pub fn mark_project_root(&self, scope: &ScopeHandle) {
        *scope.root.lock().unwrap_or_else(|e| e.into_inner()) = None;

        for entry in self.by_path.iter() {
            let candidate = entry.value();
            if triomphe::Arc::ptr_eq(candidate, scope) {
                continue;
            }
            if is_strict_ancestor(&scope.path, &candidate.path) {
                *candidate.root.lock().unwrap_or_else(|e| e.into_inner()) = Some(scope.clone());
            }
        }
    }

    fn reparent_descendants(&self, new_dir: &Path, new_scope: &ScopeHandle) {
        for entry in self.by_path.iter() {
            let candidate = entry.value();
            if triomphe::Arc::ptr_eq(candidate, new_scope) {
                continue;
            }
            if !is_strict_ancestor(new_dir, &candidate.path) {
                continue;
            }
            let current_parent_path = candidate.parent().map(|p| p.path.clone());
            let should_reparent = match &current_parent_path {
                Some(path) => is_strict_ancestor(path, new_dir) || path == new_dir,
                None => true,
            };
            if should_reparent && current_parent_path.as_deref() != Some(new_dir) {
                *candidate.parent.lock().unwrap_or_else(|e| e.into_inner()) = Some(new_scope.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    #[test]
    fn insert_reparents_descendants_onto_closer_ancestor() {
        let tree = ScopeTree::new(PathBuf::from("/proj"));
        let sub = tree.insert(PathBuf::from("/proj/src/sub"));
        assert!(triomphe::Arc::ptr_eq(&sub.parent().unwrap(), &tree.root()));

        let src = tree.insert(PathBuf::from("/proj/src"));
        assert!(triomphe::Arc::ptr_eq(&sub.parent().unwrap(), &src));
    }

    #[test]
    fn mark_project_root_reroots_descendants() {
        let tree = ScopeTree::new(PathBuf::from("/"));
        let proj = tree.insert(PathBuf::from("/proj"));
        let sub = tree.insert(PathBuf::from("/proj/src"));
        assert!(triomphe::Arc::ptr_eq(&sub.root(&sub), &tree.root()));

        tree.mark_project_root(&proj);
        assert!(triomphe::Arc::ptr_eq(&sub.root(&sub), &proj));
    }

    #[test]
    fn normal_visibility_walks_to_tree_root() {
        let tree = ScopeTree::new(PathBuf::from("/proj"));
        let sub = tree.insert(PathBuf::from("/proj/src"));

        let variable = triomphe::Arc::new(Variable::for_test("cxx.std", Some(ValueType::String), Visibility::Normal));
        tree.root().assign(variable.clone(), Value::string("c++20"));

        assert_eq!(find_original(&sub, &variable), Some(Value::string("c++20")));
    }

    #[test]
    fn scope_visibility_does_not_see_ancestor() {
        let tree = ScopeTree::new(PathBuf::from("/proj"));
        let sub = tree.insert(PathBuf::from("/proj/src"));

        let variable = triomphe::Arc::new(Variable::for_test("local.only", Some(ValueType::String), Visibility::Scope));
        tree.root().assign(variable.clone(), Value::string("nope"));

        assert_eq!(find_original(&sub, &variable), None);
    }

    #[test]
    fn override_prefix_combines_with_original() {
        let tree = ScopeTree::new(PathBuf::from("/proj"));
        let root = tree.root();

        let base = triomphe::Arc::new(Variable::for_test("cxx.options", Some(ValueType::String), Visibility::Normal));
        let over = triomphe::Arc::new(Variable::for_test(
            "config.cxx.options",
            Some(ValueType::String),
            Visibility::Normal,
        ));
        base.push_override(Override {
            kind: OverrideKind::Prefix,
            visibility: Visibility::Normal,
            variable: over.clone(),
        });

        root.assign(base.clone(), Value::string("-O2"));
        root.assign(over, Value::string("-Wall "));

        assert_eq!(lookup(&root, None, &base), Some(Value::string("-Wall -O2")));
    }

    #[test]
    fn pattern_variable_matches_target_name() {
        let tree = ScopeTree::new(PathBuf::from("/proj"));
        let root = tree.root();
        let variable = triomphe::Arc::new(Variable::for_test("warnings", Some(ValueType::String), Visibility::Normal));
        root.assign_pattern("test_*", variable.clone(), Value::string("-Wextra"));

        assert_eq!(lookup(&root, Some("test_foo"), &variable), Some(Value::string("-Wextra")));
        assert_eq!(lookup(&root, Some("other"), &variable), None);
    }
}
