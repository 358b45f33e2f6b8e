// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! [`BuildContext`]: the single owner of everything a build needs — the
//! scope tree, interned targets and variables, registered actions, the
//! phase mutex, and the scheduler — and the entry points that tie match and
//! execute to them.

use std::path::PathBuf;
use std::time::Duration;

use crate::action::{self, Action, ExecutionMode};
use crate::diagnostics::Stream;
use crate::dist;
use crate::driver;
use crate::error::Error;
use crate::graph::DependencyGraph;
use crate::install;
use crate::options::Options;
use crate::phase::{Phase, PhaseMutex, Scheduler, WorkerId};
use crate::rule::TargetState;
use crate::scope::{ScopeHandle, ScopeTree};
use crate::target::{Extension, TargetHandle, TargetSet, TargetTypeHandle};
use crate::variable::Pool as VariablePool;

/// The default ceiling on how long the scheduler will wait without any
/// worker making progress before reporting a deadlock.
const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(30);

/// One build: the interned state plus the coordination primitives that
/// make accessing it from many threads safe.
pub struct BuildContext {
    pub scopes: ScopeTree,
    pub targets: TargetSet,
    pub variables: VariablePool,
    pub operations: action::Registry,
    pub phases: PhaseMutex,
    pub scheduler: Scheduler,
    pub diagnostics: Stream,
    pub options: Options,
    pub dependency_graph: DependencyGraph,
}

impl BuildContext {
    pub fn new(root_dir: PathBuf, options: Options) -> Self {
        let threads = options.max_threads;
        Self {
            scopes: ScopeTree::new(root_dir),
            targets: TargetSet::new(),
            variables: VariablePool::new(),
            operations: action::Registry::new(),
            phases: PhaseMutex::new(),
            scheduler: Scheduler::new(threads),
            diagnostics: Stream::default(),
            options,
            dependency_graph: DependencyGraph::new(),
        }
    }

    pub fn root_scope(&self) -> ScopeHandle {
        self.scopes.root()
    }

    /// Record a dependency edge for every prerequisite resolved so far
    /// against `target` under `action`, rejecting one that would close a
    /// cycle back onto `target` itself.
    fn record_dependency_edges(&self, action: Action, target: &TargetHandle) -> Result<(), Error> {
        let state = target.action_state(action);
        let resolved = state.resolved_prerequisites.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for prerequisite in &resolved {
            self.dependency_graph.record_edge(target, prerequisite)?;
        }
        Ok(())
    }

    /// Intern a target, entering the `Load` phase for the duration (targets
    /// are ordinarily only created while loading buildfiles).
    pub fn declare_target(
        &self,
        target_type: TargetTypeHandle,
        out_dir: PathBuf,
        src_dir: Option<PathBuf>,
        name: String,
        extension: Extension,
    ) -> Result<TargetHandle, Error> {
        let _phase = self.phases.lock(Phase::Load);
        Ok(self.targets.intern(target_type, out_dir, src_dir, name, extension)?)
    }

    fn execution_mode(&self, action: Action) -> ExecutionMode {
        self.operations.operation(action.inner).map(|op| op.mode).unwrap_or(ExecutionMode::First)
    }

    /// Match and apply `target` for `action`, entering the `Match` phase.
    pub fn match_target(&self, action: Action, target: &TargetHandle) -> Result<(), Error> {
        let _phase = self.phases.lock(Phase::Match);
        driver::match_and_apply(&self.scopes, &self.targets, action, target)?;
        self.record_dependency_edges(action, target)
    }

    /// Execute `target` for `action` — matching/applying it first if
    /// needed — entering the `Execute` phase for the recipe run itself.
    /// Operates on the calling thread directly; see
    /// [`BuildContext::execute_async`] to run it on the scheduler instead.
    pub fn execute(&self, action: Action, target: &TargetHandle) -> Result<TargetState, Error> {
        {
            let _phase = self.phases.lock(Phase::Match);
            driver::match_and_apply(&self.scopes, &self.targets, action, target)?;
            self.record_dependency_edges(action, target)?;
        }
        let _phase = self.phases.lock(Phase::Execute);
        let mode = self.execution_mode(action);
        driver::execute_target(&self.scopes, &self.targets, action, target, mode, self.options.keep_going)
    }

    /// Match, apply, and run `target`'s recipe directly, skipping the
    /// dependents counter and the ordinary prerequisite walk — for a recipe
    /// that needs another target force-built immediately, such as a
    /// generated header discovered mid-extraction.
    pub fn execute_direct(&self, action: Action, target: &TargetHandle) -> Result<TargetState, Error> {
        {
            let _phase = self.phases.lock(Phase::Match);
            driver::match_and_apply(&self.scopes, &self.targets, action, target)?;
            self.record_dependency_edges(action, target)?;
        }
        let _phase = self.phases.lock(Phase::Execute);
        driver::execute_direct(&self.scopes, &self.targets, action, target)
    }

    /// Match (and apply) `target` under `action`'s unconditional-inner
    /// fallback, regardless of what outer action is actually driving the
    /// build.
    pub fn match_inner(&self, action: Action, target: &TargetHandle) -> Result<(), Error> {
        let _phase = self.phases.lock(Phase::Match);
        driver::match_inner(&self.scopes, &self.targets, action, target)?;
        self.record_dependency_edges(action.unconditional_inner(), target)
    }

    /// Match `target` against `action.inner`'s resolved delegate operation,
    /// preserving `action`'s outer composition so install-over-update style
    /// rule composition still applies.
    pub fn match_delegate(&self, action: Action, target: &TargetHandle) -> Result<(), Error> {
        let _phase = self.phases.lock(Phase::Match);
        let resolved = self
            .operations
            .resolve(action.inner)
            .ok_or_else(|| crate::rule::Error::NoMatch { target: target.to_string() })?;
        let delegated = Action::with_outer(action.meta_operation, resolved.id, action.outer);
        driver::match_and_apply(&self.scopes, &self.targets, delegated, target)?;
        self.record_dependency_edges(delegated, target)
    }

    /// Queue a delegate match onto the scheduler, mirroring
    /// [`BuildContext::execute_async`].
    pub fn match_async(self: &triomphe::Arc<Self>, worker: WorkerId, action: Action, target: TargetHandle) {
        let this = self.clone();
        self.scheduler.spawn(worker, move || {
            if let Err(err) = this.match_delegate(action, &target) {
                this.diagnostics.emit(&err.to_string());
            }
        });
    }

    /// Queue `target`'s execution onto the scheduler from `worker` and
    /// return immediately; call [`BuildContext::wait`] to block for it.
    pub fn execute_async(self: &triomphe::Arc<Self>, worker: WorkerId, action: Action, target: TargetHandle) {
        let this = self.clone();
        self.scheduler.spawn(worker, move || {
            if let Err(err) = this.execute(action, &target) {
                this.diagnostics.emit(&err.to_string());
            }
        });
    }

    /// Block until `target`'s `action` slot has finished executing,
    /// helping the scheduler run other queued work while waiting.
    pub fn wait(&self, worker: WorkerId, action: Action, target: &TargetHandle) -> Result<(), Error> {
        driver::wait_for(&self.scheduler, worker, target, action, DEFAULT_STALL_THRESHOLD)
    }

    /// Force `group`'s members to be known for `action`, running its
    /// generating recipe at most once, then return the resolved list.
    pub fn resolve_group_members(&self, action: Action, group: &TargetHandle) -> Result<Vec<TargetHandle>, Error> {
        let _phase = self.phases.lock(Phase::Execute);
        driver::resolve_group_members(&self.scopes, &self.targets, action, group, self.options.keep_going)
    }

    /// Run the built-in `clean` operation over `target` and its
    /// prerequisites, in reverse dependency order.
    pub fn perform_clean(&self, clean_action: Action, target: &TargetHandle) -> Result<TargetState, Error> {
        let _phase = self.phases.lock(Phase::Execute);
        let own = driver::perform_clean(target)?;
        let prereqs = driver::execute_prerequisites(&self.scopes, &self.targets, clean_action, target, ExecutionMode::Last, self.options.keep_going)?;
        Ok(if own == TargetState::Changed || prereqs == TargetState::Changed {
            TargetState::Changed
        } else {
            own
        })
    }

    /// Run a single install action (the generic driver underneath the
    /// `install` meta-operation's recipes), under the policy already
    /// resolved for its target component.
    pub fn install(&self, resolved: &install::ResolvedComponent, action: &install::Action) -> Result<(), Error> {
        Ok(install::install(resolved, action)?)
    }

    /// Reverse a single install action (the `uninstall` counterpart).
    pub fn uninstall(&self, resolved: &install::ResolvedComponent, action: &install::Action) -> Result<(), Error> {
        Ok(install::uninstall(resolved, action)?)
    }

    /// Stage a source distribution's files, after whatever `update` pass
    /// produced them.
    pub fn dist(&self, staging_root: &std::path::Path, entries: &[dist::Entry]) -> Result<(), Error> {
        Ok(dist::stage(staging_root, entries)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::well_known;
    use crate::rule::{Recipe, RecipeArgs, Rule};
    use crate::target::TargetTypeDescriptor;

    struct EchoRule;
    impl Rule for EchoRule {
        fn name(&self) -> &str {
            "echo"
        }
        fn matches(&self, _target: &TargetHandle, _action: Action) -> bool {
            true
        }
        fn apply(&self, _target: &TargetHandle, _action: Action) -> Recipe {
            triomphe::Arc::new(|_args: &RecipeArgs| Ok(TargetState::Changed))
        }
    }

    #[test]
    fn execute_through_the_context_runs_the_recipe() {
        let context = BuildContext::new(PathBuf::from("/proj"), Options::default());
        context.operations.register_operation(action::Operation {
            id: well_known::UPDATE,
            name: "update",
            doing: "updating",
            did: "updated",
            mode: ExecutionMode::First,
            delegate: None,
        });
        context
            .root_scope()
            .rules
            .register(well_known::PERFORM, well_known::UPDATE, "file", "", triomphe::Arc::new(EchoRule));

        let ty = TargetTypeDescriptor::root("file", true);
        let target = context
            .declare_target(ty, PathBuf::from("/proj"), None, "hello".into(), Extension::Unspecified)
            .unwrap();

        let outcome = context.execute(Action::new(well_known::PERFORM, well_known::UPDATE), &target).unwrap();
        assert_eq!(outcome, TargetState::Changed);
    }

    #[test]
    fn match_target_detects_a_self_cycle() {
        use crate::prerequisite::{Include, Prerequisite, PrerequisiteKey};

        let context = BuildContext::new(PathBuf::from("/proj"), Options::default());
        context
            .root_scope()
            .rules
            .register(well_known::PERFORM, well_known::UPDATE, "file", "", triomphe::Arc::new(EchoRule));

        let ty = TargetTypeDescriptor::root("file", true);
        let target = context
            .declare_target(ty, PathBuf::from("/proj"), None, "hello".into(), Extension::Unspecified)
            .unwrap();

        let key = PrerequisiteKey {
            target_type: target.target_type.clone(),
            out_dir: Some(target.out_dir.clone()),
            src_dir: None,
            name: target.name.clone(),
            extension: Extension::Unspecified,
            include: Include::Normal,
        };
        let self_prerequisite = Prerequisite::new(key, context.root_scope());
        target.prerequisites.lock().unwrap().push(self_prerequisite);

        let err = context
            .match_target(Action::new(well_known::PERFORM, well_known::UPDATE), &target)
            .unwrap_err();
        assert!(matches!(err, Error::Graph(crate::graph::Error::Cycle { .. })));
    }

    #[test]
    fn match_delegate_binds_the_resolved_operation_while_keeping_the_outer_action() {
        let context = BuildContext::new(PathBuf::from("/proj"), Options::default());
        context.operations.register_operation(action::Operation {
            id: 20,
            name: "update-for-install",
            doing: "updating",
            did: "updated",
            mode: ExecutionMode::First,
            delegate: Some(well_known::UPDATE),
        });
        context.operations.register_operation(action::Operation {
            id: well_known::UPDATE,
            name: "update",
            doing: "updating",
            did: "updated",
            mode: ExecutionMode::First,
            delegate: None,
        });
        context
            .root_scope()
            .rules
            .register(well_known::PERFORM, well_known::UPDATE, "file", "", triomphe::Arc::new(EchoRule));

        let ty = TargetTypeDescriptor::root("file", true);
        let target = context
            .declare_target(ty, PathBuf::from("/proj"), None, "hello".into(), Extension::Unspecified)
            .unwrap();

        let action = Action::with_outer(well_known::PERFORM, 20, well_known::INSTALL);
        context.match_delegate(action, &target).unwrap();

        let outcome = context
            .execute(Action::with_outer(well_known::PERFORM, well_known::UPDATE, well_known::INSTALL), &target)
            .unwrap();
        assert_eq!(outcome, TargetState::Changed);
    }

    #[test]
    fn execute_direct_builds_the_target_without_prerequisite_ordering() {
        let context = BuildContext::new(PathBuf::from("/proj"), Options::default());
        context
            .root_scope()
            .rules
            .register(well_known::PERFORM, well_known::UPDATE, "file", "", triomphe::Arc::new(EchoRule));

        let ty = TargetTypeDescriptor::root("file", true);
        let target = context
            .declare_target(ty, PathBuf::from("/proj"), None, "generated.h".into(), Extension::Unspecified)
            .unwrap();

        let outcome = context.execute_direct(Action::new(well_known::PERFORM, well_known::UPDATE), &target).unwrap();
        assert_eq!(outcome, TargetState::Changed);
    }
}
