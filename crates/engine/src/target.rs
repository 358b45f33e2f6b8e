// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Target identity and the per-target, per-action state machine.
//!
//! Targets are interned so that pointer equality implies key equality:
//! looking up the same `(type, out-dir, src-dir, name)` tuple twice always
//! returns the same handle, concurrently, from any thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::action::Action;
use crate::prerequisite::PrerequisiteHandle;
use crate::rule::{MatchResult, Recipe, RuleHandle};
use crate::value::Value;
use crate::variable::VariableHandle;

/// A target's file extension, refinable from [`Extension::Unspecified`] to
/// a concrete value exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// Not yet known; will unify with whatever concrete extension (or
    /// explicit absence) is observed first.
    Unspecified,
    /// Explicitly no extension (e.g. an extensionless executable).
    None,
    Some(String),
}

/// A runtime descriptor for a target type: base type (for the inheritance
/// chain consulted by the matcher), a default extension, and whether this
/// type's targets carry a filesystem path/mtime. No language-specific
/// behavior lives here; types like "C source" or "executable" are defined
/// by whoever registers rules, not hardcoded.
#[derive(Debug)]
pub struct TargetTypeDescriptor {
    pub name: String,
    pub base: Option<TargetTypeHandle>,
    pub default_extension: Option<String>,
    /// True for targets that are files on disk with a path and an mtime.
    pub file_like: bool,
}

pub type TargetTypeHandle = triomphe::Arc<TargetTypeDescriptor>;

impl TargetTypeDescriptor {
    pub fn root(name: impl Into<String>, file_like: bool) -> TargetTypeHandle {
        triomphe::Arc::new(Self {
            name: name.into(),
            base: None,
            default_extension: None,
            file_like,
        })
    }

    pub fn derive(name: impl Into<String>, base: &TargetTypeHandle, default_extension: Option<String>) -> TargetTypeHandle {
        triomphe::Arc::new(Self {
            name: name.into(),
            base: Some(base.clone()),
            default_extension,
            file_like: base.file_like,
        })
    }

    /// The inheritance chain starting at (and including) `self`, outermost
    /// (most derived) first — consulted by the matcher when searching for
    /// an applicable rule.
    pub fn chain(self_handle: &TargetTypeHandle) -> Vec<TargetTypeHandle> {
        let mut chain = vec![self_handle.clone()];
        let mut current = self_handle.base.clone();
        while let Some(base) = current {
            chain.push(base.clone());
            current = base.base.clone();
        }
        chain
    }
}

/// The identifying tuple minus extension, used as the interning key:
/// `(type, out-dir, src-dir-or-empty, name)`. Extension is tracked
/// separately on [`TargetData`] so that an unspecified-extension lookup and
/// a concrete-extension lookup unify onto the same interned target, per the
/// identity rule above.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TargetKey {
    type_name: String,
    out_dir: PathBuf,
    src_dir: Option<PathBuf>,
    name: String,
}

/// Whether an explicit group's members have been discovered yet.
#[derive(Debug, Clone, Default)]
pub enum GroupMembers {
    #[default]
    Unresolved,
    Resolved(Vec<TargetHandle>),
}

/// The task count: a target's progress through match/apply/execute for one
/// action, encoding both progress and (for the `Busy*` states) lock state.
/// Ordered so that `unexecuted < executing < executed`, with `Busy*` states
/// strictly between the corresponding stable states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskCount {
    Unmatched = 0,
    BusyMatched = 1,
    Applied = 2,
    BusyApplied = 3,
    Unexecuted = 4,
    Executing = 5,
    Executed = 6,
    Failed = 7,
}

impl TaskCount {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskCount::Unmatched,
            1 => TaskCount::BusyMatched,
            2 => TaskCount::Applied,
            3 => TaskCount::BusyApplied,
            4 => TaskCount::Unexecuted,
            5 => TaskCount::Executing,
            6 => TaskCount::Executed,
            _ => TaskCount::Failed,
        }
    }
}

/// Atomic wrapper around [`TaskCount`] with the monotone CAS operations the
/// matcher and driver need.
#[derive(Debug)]
pub struct AtomicTaskCount(AtomicU8);

impl AtomicTaskCount {
    pub fn new(initial: TaskCount) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> TaskCount {
        TaskCount::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: TaskCount) {
        self.0.store(value as u8, Ordering::Release);
    }

    /// Attempt `expected -> new`, returning `true` on success. Used by
    /// [`crate::rule::lock`] and by the execute CAS in the driver.
    pub fn compare_exchange(&self, expected: TaskCount, new: TaskCount) -> bool {
        self.0
            .compare_exchange(expected as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Per-target, per-action state: the task count plus everything bound
/// during match/apply: a task-count atomic, a recipe, a rule pointer, a
/// match result, and a dependents counter.
pub struct ActionState {
    pub task: AtomicTaskCount,
    pub recipe: Mutex<Option<Recipe>>,
    pub rule: Mutex<Option<RuleHandle>>,
    pub match_result: Mutex<Option<MatchResult>>,
    pub dependents: AtomicUsize,
    pub resolved_prerequisites: Mutex<Vec<TargetHandle>>,
    pub group_members: Mutex<GroupMembers>,
}

impl Default for ActionState {
    fn default() -> Self {
        Self {
            task: AtomicTaskCount::new(TaskCount::Unmatched),
            recipe: Mutex::new(None),
            rule: Mutex::new(None),
            match_result: Mutex::new(None),
            dependents: AtomicUsize::new(0),
            resolved_prerequisites: Mutex::new(Vec::new()),
            group_members: Mutex::new(GroupMembers::Unresolved),
        }
    }
}

impl ActionState {
    /// Record one more dependent that will need this target finished before
    /// it can itself finish in `Last` mode — called once per resolved
    /// prerequisite member while applying the dependent.
    pub fn increment_dependents(&self) {
        self.dependents.fetch_add(1, Ordering::AcqRel);
    }

    /// Record that one dependent no longer needs to wait (it has run, or
    /// never will), returning the count still outstanding. Saturates at
    /// zero so a target nobody declared as a prerequisite — a root the
    /// caller asked for directly — can still be executed.
    pub fn decrement_dependents(&self) -> usize {
        loop {
            let current = self.dependents.load(Ordering::Acquire);
            let next = current.saturating_sub(1);
            if self
                .dependents
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return next;
            }
        }
    }
}

/// A stable, pointer-identity handle to an interned target.
pub type TargetHandle = triomphe::Arc<TargetData>;

/// The target itself: identity plus all mutable per-target state.
pub struct TargetData {
    pub target_type: TargetTypeHandle,
    pub out_dir: PathBuf,
    pub src_dir: Option<PathBuf>,
    pub name: String,
    extension: Mutex<Extension>,
    pub variables: Mutex<Vec<(VariableHandle, Value)>>,
    pub prerequisites: Mutex<Vec<PrerequisiteHandle>>,
    pub group: Mutex<Option<TargetHandle>>,
    pub adhoc_members: Mutex<Vec<TargetHandle>>,
    path: OnceLock<PathBuf>,
    pub mtime: Mutex<Option<SystemTime>>,
    actions: DashMap<Action, triomphe::Arc<ActionState>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("target `{name}` already has extension `{existing:?}`, cannot refine to `{requested:?}`")]
    ExtensionConflict {
        name: String,
        existing: Extension,
        requested: Extension,
    },
    #[error("target `{name}` path already assigned")]
    PathAlreadyAssigned { name: String },
}

impl TargetData {
    pub fn extension(&self) -> Extension {
        self.extension.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Refine an unspecified extension to a concrete one, or confirm an
    /// already-concrete extension matches. Errors if a *different* concrete
    /// extension is requested.
    pub fn refine_extension(&self, requested: Extension) -> Result<(), Error> {
        if requested == Extension::Unspecified {
            return Ok(());
        }

        let mut current = self.extension.lock().unwrap_or_else(|e| e.into_inner());
        match &*current {
            Extension::Unspecified => {
                *current = requested;
                Ok(())
            }
            existing if *existing == requested => Ok(()),
            existing => Err(Error::ExtensionConflict {
                name: self.name.clone(),
                existing: existing.clone(),
                requested,
            }),
        }
    }

    /// Assign the target's path exactly once.
    pub fn assign_path(&self, path: PathBuf) -> Result<(), Error> {
        self.path
            .set(path)
            .map_err(|_| Error::PathAlreadyAssigned { name: self.name.clone() })
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.get()
    }

    /// Per-action state, created lazily on first access.
    pub fn action_state(&self, action: Action) -> triomphe::Arc<ActionState> {
        self.actions.entry(action).or_default().clone()
    }

    /// Whether this target carries an ad hoc member chain (e.g. a shared
    /// library's soname aliases). Distinct from being a *group*, whose
    /// members are determined by its matching rule via
    /// [`crate::driver::resolve_group_members`] rather than attached
    /// directly.
    pub fn is_group(&self) -> bool {
        !self.adhoc_members.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    pub fn add_adhoc_member(&self, member: TargetHandle) {
        *member.group.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.adhoc_members.lock().unwrap_or_else(|e| e.into_inner()).push(member);
    }
}

impl PartialEq for TargetData {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}
impl Eq for TargetData {}

impl std::fmt::Debug for TargetData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{{{}}}",
            self.target_type.name,
            self.name
        )
    }
}

impl std::fmt::Display for TargetData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{{}}}", self.target_type.name, self.name)
    }
}

/// The concurrent, interning target set.
#[derive(Default)]
pub struct TargetSet {
    targets: DashMap<TargetKey, TargetHandle>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern (or look up) a target, refining its extension if a concrete
    /// one is supplied and none was recorded yet.
    pub fn intern(
        &self,
        target_type: TargetTypeHandle,
        out_dir: PathBuf,
        src_dir: Option<PathBuf>,
        name: String,
        extension: Extension,
    ) -> Result<TargetHandle, Error> {
        let key = TargetKey {
            type_name: target_type.name.clone(),
            out_dir: out_dir.clone(),
            src_dir: src_dir.clone(),
            name: name.clone(),
        };

        let handle = match self.targets.entry(key) {
            Entry::Occupied(slot) => slot.get().clone(),
            Entry::Vacant(slot) => {
                let data = triomphe::Arc::new(TargetData {
                    target_type,
                    out_dir,
                    src_dir,
                    name,
                    extension: Mutex::new(Extension::Unspecified),
                    variables: Mutex::new(Vec::new()),
                    prerequisites: Mutex::new(Vec::new()),
                    group: Mutex::new(None),
                    adhoc_members: Mutex::new(Vec::new()),
                    path: OnceLock::new(),
                    mtime: Mutex::new(None),
                    actions: DashMap::new(),
                });
                slot.insert(data.clone());
                data
            }
        };

        handle.refine_extension(extension)?;
        Ok(handle)
    }

    pub fn get(
        &self,
        target_type: &TargetTypeHandle,
        out_dir: &PathBuf,
        src_dir: Option<&PathBuf>,
        name: &str,
    ) -> Option<TargetHandle> {
        let key = TargetKey {
            type_name: target_type.name.clone(),
            out_dir: out_dir.clone(),
            src_dir: src_dir.cloned(),
            name: name.to_owned(),
        };
        self.targets.get(&key).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
