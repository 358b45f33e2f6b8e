// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! The rule registry and the match algorithm: picking, for a target and an
//! action, the one rule responsible for producing it.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::action::Action;
use crate::target::{TargetHandle, TargetTypeDescriptor};

/// The outcome a recipe reports after running (or deciding not to run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Nothing needed to be done.
    Unchanged,
    /// The target was (re)built.
    Changed,
    /// Execution deferred to a later point in the same operation (used by
    /// `Last`-mode operations such as `clean`).
    Postponed,
    /// This slot belongs to a group; the group's own action drives it.
    Group,
    Failed,
}

/// The minimal context a recipe needs: which target and action it is
/// producing. Kept deliberately small so rules do not depend on the
/// scheduler or driver directly.
pub struct RecipeArgs<'a> {
    pub target: &'a TargetHandle,
    pub action: Action,
}

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A bound recipe: the closure a rule's `apply` produced for one
/// `(target, action)` pair, ready to run during execute.
pub type Recipe = triomphe::Arc<dyn Fn(&RecipeArgs) -> Result<TargetState, RecipeError> + Send + Sync>;

/// What a rule's match step hands back: enough to later call `apply`
/// without re-running the match predicate.
pub struct MatchResult {
    pub rule: RuleHandle,
}

/// A rule: matches targets for a given action and, once matched, builds the
/// recipe that will actually run.
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this rule is willing to take on `target` for `action`.
    /// Called for every candidate at the most specific applicable target
    /// type before falling back to a base type.
    fn matches(&self, target: &TargetHandle, action: Action) -> bool;

    /// Build the recipe for a target this rule has already matched.
    fn apply(&self, target: &TargetHandle, action: Action) -> Recipe;
}

pub type RuleHandle = triomphe::Arc<dyn Rule>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleKey {
    meta_operation: u16,
    outer: u16,
    operation: u16,
    target_type: String,
}

struct Registration {
    hint_prefix: String,
    rule: RuleHandle,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("no rule matches target `{target}` for this action")]
    NoMatch { target: String },
    #[error("ambiguous rule match for target `{target}`: {candidates:?}")]
    Ambiguous { target: String, candidates: Vec<String> },
}

/// A scope's rule registry: `(meta-operation, operation, target-type) ->
/// [(hint-prefix, rule)]`, consulted when matching a target in that scope
/// or one of its descendants.
#[derive(Default)]
pub struct Registry {
    rules: RwLock<HashMap<RuleKey, Vec<Registration>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rule` for targets of `target_type` under `(meta_operation,
    /// operation)`, unconditional on any outer action. `hint_prefix` narrows
    /// the match to target names starting with that prefix (empty matches
    /// any name); when several rules apply to the same target, the one with
    /// the longest matching prefix wins, and an exact tie is ambiguous.
    pub fn register(&self, meta_operation: u16, operation: u16, target_type: &str, hint_prefix: &str, rule: RuleHandle) {
        self.register_outer(meta_operation, Action::UNCONDITIONAL_OUTER, operation, target_type, hint_prefix, rule);
    }

    /// Register `rule` the same way as [`Registry::register`], but only for
    /// targets being produced under the specific `outer` action — e.g. a
    /// rule that composes `install` over `update`, consulted only when
    /// `install` is driving an `update` of one of its prerequisites.
    pub fn register_outer(&self, meta_operation: u16, outer: u16, operation: u16, target_type: &str, hint_prefix: &str, rule: RuleHandle) {
        let key = RuleKey {
            meta_operation,
            outer,
            operation,
            target_type: target_type.to_owned(),
        };
        self.rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .push(Registration {
                hint_prefix: hint_prefix.to_owned(),
                rule,
            });
    }

    /// Find the rule that should produce `target` under `action`: first try
    /// the full `(inner, outer)` pairing, then — if nothing at any type
    /// level matched it — retry with the outer action cleared, so a rule
    /// registered unconditionally still applies when no outer-specific
    /// composition exists.
    pub fn find(&self, action: Action, target: &TargetHandle) -> Result<Option<MatchResult>, Error> {
        if let Some(result) = self.find_for_outer(action, action.outer, target)? {
            return Ok(Some(result));
        }
        if action.outer != Action::UNCONDITIONAL_OUTER {
            return self.find_for_outer(action, Action::UNCONDITIONAL_OUTER, target);
        }
        Ok(None)
    }

    /// Walk the target type's inheritance chain from most to least derived,
    /// under a specific `outer` action, returning the first type level with
    /// an unambiguous match.
    fn find_for_outer(&self, action: Action, outer: u16, target: &TargetHandle) -> Result<Option<MatchResult>, Error> {
        let chain = TargetTypeDescriptor::chain(&target.target_type);
        let table = self.rules.read().unwrap_or_else(|e| e.into_inner());

        for ty in &chain {
            let key = RuleKey {
                meta_operation: action.meta_operation,
                outer,
                operation: action.inner,
                target_type: ty.name.clone(),
            };
            let Some(registrations) = table.get(&key) else { continue };

            let mut candidates: Vec<&Registration> = registrations
                .iter()
                .filter(|reg| target.name.starts_with(&reg.hint_prefix) && reg.rule.matches(target, action))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            candidates.sort_by_key(|reg| std::cmp::Reverse(reg.hint_prefix.len()));
            let best_len = candidates[0].hint_prefix.len();
            let best: Vec<&Registration> = candidates.into_iter().take_while(|reg| reg.hint_prefix.len() == best_len).collect();

            if best.len() > 1 {
                return Err(Error::Ambiguous {
                    target: target.to_string(),
                    candidates: best.iter().map(|reg| reg.rule.name().to_owned()).collect(),
                });
            }

            return Ok(Some(MatchResult {
                rule: best[0].rule.clone(),
            }));
        }

        Ok(None)
    }
}
