// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! The match/execute drivers: walking the scope chain to find a rule,
//! binding its recipe, and running recipes in prerequisite order.

use std::path::PathBuf;
use std::time::Duration;

use path_clean::PathClean;
use tracing::instrument;

use crate::action::{Action, ExecutionMode};
use crate::error::Error;
use crate::prerequisite::MemberIter;
use crate::rule::{RecipeArgs, TargetState};
use crate::scope::ScopeTree;
use crate::target::{Extension, GroupMembers, TargetHandle, TargetSet, TaskCount};

/// The on-disk path a file-like target occupies, absent an explicit
/// override: its output directory joined with its name and extension
/// (falling back to the target type's default extension when unspecified),
/// normalized without touching the filesystem.
fn default_path(target: &TargetHandle) -> PathBuf {
    let mut file_name = target.name.clone();
    let extension = match target.extension() {
        Extension::Some(ext) => Some(ext),
        Extension::None => None,
        Extension::Unspecified => target.target_type.default_extension.clone(),
    };
    if let Some(ext) = extension {
        file_name.push('.');
        file_name.push_str(&ext);
    }
    target.out_dir.join(file_name).clean()
}

/// The scope a target's rules are searched from: the scope for its output
/// directory, created on demand if load never visited it directly.
fn scope_for_target(scopes: &ScopeTree, target: &TargetHandle) -> crate::scope::ScopeHandle {
    scopes.insert(target.out_dir.clone())
}

/// Walk `target`'s scope chain outward, asking each scope's rule registry
/// in turn, until one reports a match or the chain is exhausted.
#[instrument(skip_all, fields(target = %target))]
pub fn match_target(scopes: &ScopeTree, action: Action, target: &TargetHandle) -> Result<(), Error> {
    let state = target.action_state(action);

    if !state.task.compare_exchange(TaskCount::Unmatched, TaskCount::BusyMatched) {
        return Ok(()); // already matched (or in progress) by another thread
    }

    let mut scope = Some(scope_for_target(scopes, target));
    let mut found = None;
    while let Some(current) = scope {
        match current.rules.find(action, target) {
            Ok(Some(result)) => {
                found = Some(result);
                break;
            }
            Ok(None) => scope = current.parent(),
            Err(err) => {
                state.task.store(TaskCount::Failed);
                return Err(err.into());
            }
        }
    }

    let Some(result) = found else {
        state.task.store(TaskCount::Failed);
        return Err(crate::rule::Error::NoMatch { target: target.to_string() }.into());
    };

    *state.match_result.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
    state.task.store(TaskCount::Applied);
    Ok(())
}

/// Build the recipe for an already-matched target, and resolve its
/// declared prerequisites against `targets` so [`execute_prerequisites`]
/// has concrete handles to walk.
#[instrument(skip_all, fields(target = %target))]
pub fn apply_target(targets: &TargetSet, action: Action, target: &TargetHandle) -> Result<(), Error> {
    let state = target.action_state(action);

    if !state.task.compare_exchange(TaskCount::Applied, TaskCount::BusyApplied) {
        return Ok(());
    }

    let rule = {
        let guard = state.match_result.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().expect("apply called before match succeeded").rule.clone()
    };

    let recipe = rule.apply(target, action);
    *state.recipe.lock().unwrap_or_else(|e| e.into_inner()) = Some(recipe);

    if target.target_type.file_like && target.path().is_none() {
        if let Err(err) = target.assign_path(default_path(target)) {
            if !matches!(err, crate::target::Error::PathAlreadyAssigned { .. }) {
                return Err(err.into());
            }
        }
    }

    let mut resolved = Vec::new();
    for prereq in target.prerequisites.lock().unwrap_or_else(|e| e.into_inner()).iter() {
        resolved.push(prereq.search(targets)?);
    }
    *state.resolved_prerequisites.lock().unwrap_or_else(|e| e.into_inner()) = resolved;

    // Every group-expanded prerequisite member now has one more dependent
    // (this target) that must finish before it in `Last` mode; mirrors the
    // exact member list `execute_prerequisites` walks so the counts line up.
    let members: Vec<TargetHandle> = MemberIter::new(&target.prerequisites.lock().unwrap_or_else(|e| e.into_inner()), true).collect();
    for member in &members {
        member.action_state(action).increment_dependents();
    }

    state.task.store(TaskCount::Unexecuted);
    Ok(())
}

/// Match then apply in one call, the common case for a target a recipe
/// discovers mid-execute (e.g. a newly found prerequisite).
pub fn match_and_apply(scopes: &ScopeTree, targets: &TargetSet, action: Action, target: &TargetHandle) -> Result<(), Error> {
    match_target(scopes, action, target)?;
    apply_target(targets, action, target)
}

/// Execute every member of `target`'s resolved prerequisites for `action`,
/// in declaration order (`First`-mode operations, which must bring
/// prerequisites up to date before the recipe runs) or reverse order
/// (`Last`-mode operations like `clean`, which remove a target's own
/// output before descending into what it depended on). A failed member
/// raises [`Error::BuildFailed`] immediately unless `keep_going` is set, in
/// which case the failure is recorded and the remaining members still run,
/// with the worst outcome across all of them reported.
pub fn execute_prerequisites(
    scopes: &ScopeTree,
    targets: &TargetSet,
    action: Action,
    target: &TargetHandle,
    mode: ExecutionMode,
    keep_going: bool,
) -> Result<TargetState, Error> {
    let members: Vec<TargetHandle> = MemberIter::new(
        &target.prerequisites.lock().unwrap_or_else(|e| e.into_inner()),
        true,
    )
    .collect();

    let mut changed = false;
    let mut failed = false;
    let iter: Box<dyn Iterator<Item = &TargetHandle>> = match mode {
        ExecutionMode::First => Box::new(members.iter()),
        ExecutionMode::Last => Box::new(members.iter().rev()),
    };
    for prerequisite in iter {
        match execute_target(scopes, targets, action, prerequisite, mode, keep_going) {
            Ok(TargetState::Changed) => changed = true,
            Ok(TargetState::Failed) => {
                if !keep_going {
                    return Err(Error::BuildFailed { target: prerequisite.to_string() });
                }
                failed = true;
            }
            Ok(_) => {}
            Err(err) => return Err(err),
        }
    }

    Ok(if failed {
        TargetState::Failed
    } else if changed {
        TargetState::Changed
    } else {
        TargetState::Unchanged
    })
}

/// Execute a single target for `action`: ensure it has been matched and
/// applied, decrement its dependents counter (postponing it in `Last` mode
/// until every dependent has done so), run its prerequisites in the order
/// `mode` calls for, then run its own recipe exactly once. `keep_going`
/// controls whether a failed prerequisite stops the rest of the walk; see
/// [`execute_prerequisites`].
#[instrument(skip_all, fields(target = %target))]
pub fn execute_target(
    scopes: &ScopeTree,
    targets: &TargetSet,
    action: Action,
    target: &TargetHandle,
    mode: ExecutionMode,
    keep_going: bool,
) -> Result<TargetState, Error> {
    match_and_apply(scopes, targets, action, target)?;

    let state = target.action_state(action);

    if matches!(mode, ExecutionMode::Last) {
        // Last-mode operations (`clean`) must finish every dependent before
        // touching a shared prerequisite; postpone until this was the last
        // one waiting on it.
        let remaining = state.decrement_dependents();
        if remaining > 0 {
            return Ok(TargetState::Postponed);
        }
    }

    if !state.task.compare_exchange(TaskCount::Unexecuted, TaskCount::Executing) {
        // Another thread is already executing (or has executed) this
        // target/action; the caller is expected to have waited for it via
        // the scheduler before relying on the result.
        return Ok(match state.task.load() {
            TaskCount::Executed => TargetState::Unchanged,
            TaskCount::Failed => TargetState::Failed,
            _ => TargetState::Postponed,
        });
    }

    if matches!(mode, ExecutionMode::First) {
        match execute_prerequisites(scopes, targets, action, target, mode, keep_going) {
            Ok(TargetState::Failed) => {
                state.task.store(TaskCount::Failed);
                return Ok(TargetState::Failed);
            }
            Ok(_) => {}
            Err(err) => {
                state.task.store(TaskCount::Failed);
                return Err(err);
            }
        }
    }

    let recipe = state
        .recipe
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .expect("apply always populates a recipe before Unexecuted");

    let args = RecipeArgs { target, action };
    let outcome = recipe(&args);

    let outcome = match outcome {
        Ok(result) => {
            state.task.store(if result == TargetState::Failed { TaskCount::Failed } else { TaskCount::Executed });
            result
        }
        Err(err) => {
            state.task.store(TaskCount::Failed);
            return Err(err.into());
        }
    };

    if matches!(mode, ExecutionMode::Last) && outcome != TargetState::Failed {
        execute_prerequisites(scopes, targets, action, target, mode, keep_going)?;
    }

    Ok(outcome)
}

/// Run `target`'s recipe for `action` directly: match, apply, and execute
/// it without touching the dependents counter or going through
/// [`execute_prerequisites`] — for a recipe that needs one other target
/// force-built immediately (e.g. a generated header discovered mid-extract)
/// rather than reached through the ordinary prerequisite walk. Never
/// postpones.
#[instrument(skip_all, fields(target = %target))]
pub fn execute_direct(scopes: &ScopeTree, targets: &TargetSet, action: Action, target: &TargetHandle) -> Result<TargetState, Error> {
    match_and_apply(scopes, targets, action, target)?;

    let state = target.action_state(action);
    if !state.task.compare_exchange(TaskCount::Unexecuted, TaskCount::Executing) {
        return Ok(match state.task.load() {
            TaskCount::Executed => TargetState::Unchanged,
            TaskCount::Failed => TargetState::Failed,
            _ => TargetState::Postponed,
        });
    }

    let recipe = state
        .recipe
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .expect("apply always populates a recipe before Unexecuted");

    let args = RecipeArgs { target, action };
    match recipe(&args) {
        Ok(result) => {
            state.task.store(if result == TargetState::Failed { TaskCount::Failed } else { TaskCount::Executed });
            Ok(result)
        }
        Err(err) => {
            state.task.store(TaskCount::Failed);
            Err(err.into())
        }
    }
}

/// Match (and apply) `target` under `action`'s unconditional-inner
/// fallback — the entry point a delegating recipe uses to bind a
/// dependency to the plain inner operation regardless of what outer
/// operation is actually driving the build.
pub fn match_inner(scopes: &ScopeTree, targets: &TargetSet, action: Action, target: &TargetHandle) -> Result<(), Error> {
    match_and_apply(scopes, targets, action.unconditional_inner(), target)
}

/// Execute `target` under `action`'s unconditional-inner fallback.
pub fn execute_inner(
    scopes: &ScopeTree,
    targets: &TargetSet,
    action: Action,
    target: &TargetHandle,
    mode: ExecutionMode,
    keep_going: bool,
) -> Result<TargetState, Error> {
    execute_target(scopes, targets, action.unconditional_inner(), target, mode, keep_going)
}

/// Resolve `action.inner`'s delegate chain through `operations` and match
/// `target` against the operation it actually resolves to, preserving
/// `action`'s outer component — e.g. `update-for-install` delegating to
/// `update`, matched with `install` still recorded as the outer action so
/// install-over-update rule composition (§4.5) still applies.
pub fn match_delegate(scopes: &ScopeTree, targets: &TargetSet, operations: &crate::action::Registry, action: Action, target: &TargetHandle) -> Result<(), Error> {
    let resolved = operations
        .resolve(action.inner)
        .ok_or_else(|| crate::rule::Error::NoMatch { target: target.to_string() })?;
    match_and_apply(scopes, targets, Action::with_outer(action.meta_operation, resolved.id, action.outer), target)
}

/// Force `group`'s members to be known for `action`: if its matching rule
/// has already recorded them (via the recipe setting
/// `group.action_state(action).group_members` during `execute`), return
/// that list directly; otherwise match, apply, and execute the group — its
/// recipe is expected to resolve its own members as a side effect of
/// running — then read the view again.
pub fn resolve_group_members(scopes: &ScopeTree, targets: &TargetSet, action: Action, group: &TargetHandle, keep_going: bool) -> Result<Vec<TargetHandle>, Error> {
    let state = group.action_state(action);
    if let GroupMembers::Resolved(members) = &*state.group_members.lock().unwrap_or_else(|e| e.into_inner()) {
        return Ok(members.clone());
    }

    execute_target(scopes, targets, action, group, ExecutionMode::First, keep_going)?;

    let state = group.action_state(action);
    let members = state.group_members.lock().unwrap_or_else(|e| e.into_inner());
    Ok(match &*members {
        GroupMembers::Resolved(members) => members.clone(),
        GroupMembers::Unresolved => Vec::new(),
    })
}

/// Extract a file-like target's dependencies from `run_compiler`'s
/// make-rule output (C9): parse it, and for any dependency that resolves
/// (through `include_dirs`) to a not-yet-up-to-date generated header under
/// `out_root`, intern it (typed via `extension_map`/`target_types`), bring
/// it up to date with [`execute_direct`], and restart the parse — skipping
/// the leading dependencies already confirmed current in the previous
/// pass — until nothing more needs generating or `max_restarts` is
/// exceeded.
pub fn extract_dependencies(
    scopes: &ScopeTree,
    targets: &TargetSet,
    action: Action,
    out_root: &std::path::Path,
    include_dirs: &[PathBuf],
    extension_map: &crate::extract::ExtensionMap,
    target_types: &std::collections::HashMap<String, crate::target::TargetTypeHandle>,
    max_restarts: u32,
    mut run_compiler: impl FnMut() -> Result<String, Error>,
) -> Result<Vec<PathBuf>, Error> {
    let pending: std::cell::RefCell<Option<TargetHandle>> = std::cell::RefCell::new(None);

    crate::extract::extract_with_restart::<Error>(
        max_restarts,
        |skip_count| {
            let output = run_compiler()?;
            let deps = crate::extract::parse_make_rule(&output)?;
            let paths: Vec<PathBuf> = deps.into_iter().map(PathBuf::from).collect();

            for (index, dep) in paths.iter().enumerate().skip(skip_count) {
                if dep.is_absolute() && dep.exists() {
                    continue;
                }
                let Some(resolved) = crate::extract::resolve_generated_header(include_dirs, out_root, dep) else {
                    continue;
                };
                if resolved.exists() {
                    continue;
                }

                let type_name = extension_map.target_type_for(&resolved);
                let Some(header_type) = target_types.get(type_name) else { continue };
                let name = resolved.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_owned();
                let header_out_dir = resolved.parent().unwrap_or(out_root).to_owned();

                let target = targets.intern(header_type.clone(), header_out_dir, None, name, Extension::Unspecified)?;
                *pending.borrow_mut() = Some(target);
                return Ok(crate::extract::Outcome::Restart {
                    dependency: resolved,
                    headers_seen: index,
                });
            }

            Ok(crate::extract::Outcome::Complete(paths))
        },
        |_dependency| {
            let target = pending
                .borrow_mut()
                .take()
                .expect("round only restarts after recording the header it wants built");
            execute_direct(scopes, targets, action, &target)?;
            Ok(())
        },
    )
}

/// Whether `target`'s recorded mtime is older than any of its prerequisite
/// handles' mtimes — the generic "is this out of date" check a file-based
/// recipe uses before deciding whether it needs to actually run.
pub fn is_outdated(target: &TargetHandle, prerequisites: &[TargetHandle]) -> bool {
    let Some(target_mtime) = *target.mtime.lock().unwrap_or_else(|e| e.into_inner()) else {
        return true; // never built
    };
    prerequisites.iter().any(|prereq| match *prereq.mtime.lock().unwrap_or_else(|e| e.into_inner()) {
        Some(prereq_mtime) => prereq_mtime > target_mtime,
        None => true,
    })
}

/// The built-in `clean` behavior: remove a file-like target's output and
/// clear its recorded mtime. Registered as the default recipe for the
/// `clean` operation on file-like target types; non-file-like targets (e.g.
/// an alias or a directory grouping) simply have nothing to remove.
pub fn perform_clean(target: &TargetHandle) -> Result<TargetState, Error> {
    let Some(path) = target.path() else {
        return Ok(TargetState::Unchanged);
    };
    match fs_err::remove_file(path) {
        Ok(()) => {
            *target.mtime.lock().unwrap_or_else(|e| e.into_inner()) = None;
            Ok(TargetState::Changed)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(TargetState::Unchanged),
        Err(err) => Err(err.into()),
    }
}

/// Wait, via `scheduler`, for `target`'s `action` slot to leave the
/// in-progress states, returning its final state. Used by a recipe that
/// schedules a dependency's execution asynchronously and later needs the
/// result.
pub fn wait_for(scheduler: &crate::phase::Scheduler, worker: crate::phase::WorkerId, target: &TargetHandle, action: Action, stall_threshold: Duration) -> Result<(), Error> {
    let state = target.action_state(action);
    scheduler.wait(worker, stall_threshold, || {
        matches!(state.task.load(), TaskCount::Executed | TaskCount::Failed)
    })
}
