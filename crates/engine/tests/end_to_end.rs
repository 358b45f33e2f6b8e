// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! End-to-end scenarios driven entirely through [`BuildContext`]'s public
//! API. A `CountingRule` stands in for a real compiler/linker invocation,
//! the way the crate's own unit tests use an `EchoRule` in place of a real
//! recipe — it only needs to report whether it ran, not actually produce
//! output on disk.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use engine::action::{self, Action, ExecutionMode, well_known};
use engine::context::BuildContext;
use engine::options::Options;
use engine::prerequisite::{Include, Prerequisite, PrerequisiteKey};
use engine::rule::{Recipe, RecipeArgs, Rule, TargetState};
use engine::target::{Extension, TargetHandle, TargetTypeDescriptor};

fn register_update(context: &BuildContext) {
    context.operations.register_operation(action::Operation {
        id: well_known::UPDATE,
        name: "update",
        doing: "updating",
        did: "updated",
        mode: ExecutionMode::First,
        delegate: None,
    });
}

/// Counts invocations and always reports a change, the way a real compile
/// or link step would on a cold build.
struct CountingRule {
    name: &'static str,
    calls: std::sync::Arc<AtomicUsize>,
}

impl Rule for CountingRule {
    fn name(&self) -> &str {
        self.name
    }

    fn matches(&self, _target: &TargetHandle, _action: Action) -> bool {
        true
    }

    fn apply(&self, _target: &TargetHandle, _action: Action) -> Recipe {
        let calls = self.calls.clone();
        triomphe::Arc::new(move |_args: &RecipeArgs| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(TargetState::Changed)
        })
    }
}

// 1. Trivial build, single file: obj{hello} -> exe{hello}.
#[test]
fn trivial_build_compiles_and_links_once_then_reports_unchanged() {
    let context = BuildContext::new(PathBuf::from("/proj"), Options::default());
    register_update(&context);

    let compile_calls = std::sync::Arc::new(AtomicUsize::new(0));
    let link_calls = std::sync::Arc::new(AtomicUsize::new(0));

    context.root_scope().rules.register(
        well_known::PERFORM,
        well_known::UPDATE,
        "obj",
        "",
        triomphe::Arc::new(CountingRule { name: "compile", calls: compile_calls.clone() }),
    );
    context.root_scope().rules.register(
        well_known::PERFORM,
        well_known::UPDATE,
        "exe",
        "",
        triomphe::Arc::new(CountingRule { name: "link", calls: link_calls.clone() }),
    );

    let obj_ty = TargetTypeDescriptor::root("obj", true);
    let obj = context
        .declare_target(obj_ty.clone(), PathBuf::from("/proj"), None, "hello".into(), Extension::Unspecified)
        .unwrap();

    let exe_ty = TargetTypeDescriptor::root("exe", true);
    let exe = context
        .declare_target(exe_ty, PathBuf::from("/proj"), None, "hello".into(), Extension::Unspecified)
        .unwrap();

    let key = PrerequisiteKey {
        target_type: obj_ty,
        out_dir: Some(PathBuf::from("/proj")),
        src_dir: None,
        name: "hello".into(),
        extension: Extension::Unspecified,
        include: Include::Normal,
    };
    exe.prerequisites.lock().unwrap().push(Prerequisite::new(key, context.root_scope()));

    let action = Action::new(well_known::PERFORM, well_known::UPDATE);

    let first = context.execute(action, &exe).unwrap();
    assert_eq!(first, TargetState::Changed);
    assert_eq!(compile_calls.load(Ordering::SeqCst), 1);
    assert_eq!(link_calls.load(Ordering::SeqCst), 1);

    let second = context.execute(action, &exe).unwrap();
    assert_eq!(second, TargetState::Unchanged);
    assert_eq!(compile_calls.load(Ordering::SeqCst), 1, "a matched target must not recompile");
    assert_eq!(link_calls.load(Ordering::SeqCst), 1, "a matched target must not relink");

    assert_eq!(obj.path(), Some(&PathBuf::from("/proj/hello")));
}

// 3. Explicit group: a code generator produces `gen.cxx`/`gen.hxx` as one
// group; two independent consumers each force the group's members to be
// known. Expected: the generator runs exactly once; both consumers observe
// the same member list.
#[test]
fn explicit_group_generator_runs_once_for_both_consumers() {
    let context = BuildContext::new(PathBuf::from("/proj"), Options::default());
    register_update(&context);

    let member_ty = TargetTypeDescriptor::root("file", true);
    let cxx_member = context
        .declare_target(member_ty.clone(), PathBuf::from("/proj"), None, "gen.cxx".into(), Extension::Unspecified)
        .unwrap();
    let hxx_member = context
        .declare_target(member_ty, PathBuf::from("/proj"), None, "gen.hxx".into(), Extension::Unspecified)
        .unwrap();

    struct Codegen {
        calls: std::sync::Arc<AtomicUsize>,
        members: Vec<TargetHandle>,
    }
    impl Rule for Codegen {
        fn name(&self) -> &str {
            "codegen"
        }
        fn matches(&self, _target: &TargetHandle, _action: Action) -> bool {
            true
        }
        fn apply(&self, _target: &TargetHandle, _action: Action) -> Recipe {
            let calls = self.calls.clone();
            let members = self.members.clone();
            triomphe::Arc::new(move |args: &RecipeArgs| {
                calls.fetch_add(1, Ordering::SeqCst);
                *args.target.action_state(args.action).group_members.lock().unwrap() =
                    engine::target::GroupMembers::Resolved(members.clone());
                Ok(TargetState::Changed)
            })
        }
    }

    let generator_calls = std::sync::Arc::new(AtomicUsize::new(0));
    context.root_scope().rules.register(
        well_known::PERFORM,
        well_known::UPDATE,
        "group",
        "",
        triomphe::Arc::new(Codegen {
            calls: generator_calls.clone(),
            members: vec![cxx_member.clone(), hxx_member.clone()],
        }),
    );

    let group_ty = TargetTypeDescriptor::root("group", false);
    let group = context
        .declare_target(group_ty, PathBuf::from("/proj"), None, "gen".into(), Extension::Unspecified)
        .unwrap();

    let action = Action::new(well_known::PERFORM, well_known::UPDATE);
    let first = context.resolve_group_members(action, &group).unwrap();
    let second = context.resolve_group_members(action, &group).unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert_eq!(generator_calls.load(Ordering::SeqCst), 1, "the generator must run exactly once for both consumers");
}

// 4. Ambiguous rule: two rules registered for the same (op, target-type)
// slot, both willing to match.
#[test]
fn ambiguous_rule_match_fails_before_any_recipe_runs() {
    let context = BuildContext::new(PathBuf::from("/proj"), Options::default());
    register_update(&context);

    let calls_a = std::sync::Arc::new(AtomicUsize::new(0));
    let calls_b = std::sync::Arc::new(AtomicUsize::new(0));
    context.root_scope().rules.register(
        well_known::PERFORM,
        well_known::UPDATE,
        "obj",
        "",
        triomphe::Arc::new(CountingRule { name: "cxx.compile", calls: calls_a.clone() }),
    );
    context.root_scope().rules.register(
        well_known::PERFORM,
        well_known::UPDATE,
        "obj",
        "",
        triomphe::Arc::new(CountingRule { name: "cc.compile", calls: calls_b.clone() }),
    );

    let ty = TargetTypeDescriptor::root("obj", true);
    let target = context
        .declare_target(ty, PathBuf::from("/proj"), None, "hello".into(), Extension::Unspecified)
        .unwrap();

    let action = Action::new(well_known::PERFORM, well_known::UPDATE);
    let err = context.execute(action, &target).unwrap_err();
    assert!(matches!(err, engine::Error::Rule(engine::rule::Error::Ambiguous { .. })));
    assert_eq!(calls_a.load(Ordering::SeqCst), 0);
    assert_eq!(calls_b.load(Ordering::SeqCst), 0);
}

// 5. Cycle: a depends on b depends on a.
#[test]
fn dependency_cycle_is_reported_deterministically() {
    let context = BuildContext::new(PathBuf::from("/proj"), Options::default());
    register_update(&context);

    context.root_scope().rules.register(
        well_known::PERFORM,
        well_known::UPDATE,
        "file",
        "",
        triomphe::Arc::new(CountingRule {
            name: "echo",
            calls: std::sync::Arc::new(AtomicUsize::new(0)),
        }),
    );

    let ty = TargetTypeDescriptor::root("file", true);
    let a = context.declare_target(ty.clone(), PathBuf::from("/proj"), None, "a".into(), Extension::Unspecified).unwrap();
    let b = context.declare_target(ty.clone(), PathBuf::from("/proj"), None, "b".into(), Extension::Unspecified).unwrap();

    let a_depends_on_b = PrerequisiteKey {
        target_type: ty.clone(),
        out_dir: Some(PathBuf::from("/proj")),
        src_dir: None,
        name: "b".into(),
        extension: Extension::Unspecified,
        include: Include::Normal,
    };
    a.prerequisites.lock().unwrap().push(Prerequisite::new(a_depends_on_b, context.root_scope()));

    let b_depends_on_a = PrerequisiteKey {
        target_type: ty,
        out_dir: Some(PathBuf::from("/proj")),
        src_dir: None,
        name: "a".into(),
        extension: Extension::Unspecified,
        include: Include::Normal,
    };
    b.prerequisites.lock().unwrap().push(Prerequisite::new(b_depends_on_a, context.root_scope()));

    let action = Action::new(well_known::PERFORM, well_known::UPDATE);
    // Matching and applying `a` resolves its prerequisite `b`; matching and
    // applying `b` in turn resolves `a`, closing the loop.
    context.match_target(action, &a).unwrap();
    let err = context.match_target(action, &b).unwrap_err();
    assert!(matches!(err, engine::Error::Graph(engine::graph::Error::Cycle { .. })));
}

// 6. Parallel keep-going: one root target with three prerequisites, the
// first of which fails. Without `keep_going`, scheduling of its siblings
// stops; with it, every sibling still runs and the failure is reported back
// rather than raised.
fn declare_root_with_three_prerequisites(
    context: &BuildContext,
    ok_calls: &std::sync::Arc<AtomicUsize>,
) -> (Action, TargetHandle) {
    struct FailingRule;
    impl Rule for FailingRule {
        fn name(&self) -> &str {
            "boom"
        }
        fn matches(&self, _target: &TargetHandle, _action: Action) -> bool {
            true
        }
        fn apply(&self, _target: &TargetHandle, _action: Action) -> Recipe {
            triomphe::Arc::new(|_args: &RecipeArgs| Ok(TargetState::Failed))
        }
    }

    context.root_scope().rules.register(
        well_known::PERFORM,
        well_known::UPDATE,
        "ok",
        "",
        triomphe::Arc::new(CountingRule { name: "ok", calls: ok_calls.clone() }),
    );
    context
        .root_scope()
        .rules
        .register(well_known::PERFORM, well_known::UPDATE, "bad", "", triomphe::Arc::new(FailingRule));
    context.root_scope().rules.register(
        well_known::PERFORM,
        well_known::UPDATE,
        "root",
        "",
        triomphe::Arc::new(CountingRule { name: "root", calls: std::sync::Arc::new(AtomicUsize::new(0)) }),
    );

    let ok_ty = TargetTypeDescriptor::root("ok", true);
    let bad_ty = TargetTypeDescriptor::root("bad", true);
    let root_ty = TargetTypeDescriptor::root("root", true);

    let root = context.declare_target(root_ty, PathBuf::from("/proj"), None, "top".into(), Extension::Unspecified).unwrap();
    context.declare_target(bad_ty.clone(), PathBuf::from("/proj"), None, "broken".into(), Extension::Unspecified).unwrap();
    context.declare_target(ok_ty.clone(), PathBuf::from("/proj"), None, "one".into(), Extension::Unspecified).unwrap();
    context.declare_target(ok_ty, PathBuf::from("/proj"), None, "two".into(), Extension::Unspecified).unwrap();

    for (ty, name) in [(bad_ty, "broken"), (TargetTypeDescriptor::root("ok", true), "one"), (TargetTypeDescriptor::root("ok", true), "two")] {
        let key = PrerequisiteKey {
            target_type: ty,
            out_dir: Some(PathBuf::from("/proj")),
            src_dir: None,
            name: name.into(),
            extension: Extension::Unspecified,
            include: Include::Normal,
        };
        root.prerequisites.lock().unwrap().push(Prerequisite::new(key, context.root_scope()));
    }

    (Action::new(well_known::PERFORM, well_known::UPDATE), root)
}

#[test]
fn without_keep_going_sibling_prerequisites_stop_after_the_first_failure() {
    let context = BuildContext::new(PathBuf::from("/proj"), Options::default());
    register_update(&context);

    let ok_calls = std::sync::Arc::new(AtomicUsize::new(0));
    let (action, root) = declare_root_with_three_prerequisites(&context, &ok_calls);

    let err = context.execute(action, &root).unwrap_err();
    assert!(matches!(err, engine::Error::BuildFailed { .. }));
    assert_eq!(ok_calls.load(Ordering::SeqCst), 0, "siblings after the failed prerequisite never ran");
}

#[test]
fn keep_going_runs_every_sibling_prerequisite_despite_the_failure() {
    let context = BuildContext::new(PathBuf::from("/proj"), Options::default().keep_going(true));
    register_update(&context);

    let ok_calls = std::sync::Arc::new(AtomicUsize::new(0));
    let (action, root) = declare_root_with_three_prerequisites(&context, &ok_calls);

    let outcome = context.execute(action, &root).unwrap();
    assert_eq!(outcome, TargetState::Failed, "the failure is still reported, just not raised");
    assert_eq!(ok_calls.load(Ordering::SeqCst), 2, "both siblings ran despite the earlier failure");
}

// 2. Auto-generated header, exercised at the `extract` module's level: a
// source reports a relative, not-yet-existing header; the prefix map
// resolves it into the out-tree; the restart loop brings it up to date and
// then sees it reported as an absolute path on the next pass.
#[test]
fn generated_header_is_resolved_then_the_extraction_restarts_once() {
    use engine::extract::{self, Outcome, PrefixMap};

    let mut prefix_map = PrefixMap::new();
    prefix_map.add(PathBuf::from("/proj/foo"), PathBuf::from("/proj/out/foo"));

    let built = std::sync::Arc::new(AtomicUsize::new(0));
    let built_clone = built.clone();

    let make_rule_pass_one = "hello.o: hello.cxx foo/gen.hxx\n";
    let make_rule_pass_two = "hello.o: hello.cxx /proj/out/foo/gen.hxx\n";

    let pass = AtomicUsize::new(0);
    let result: Vec<PathBuf> = extract::extract_with_restart::<extract::Error>(
        4,
        |skip_count| {
            let n = pass.fetch_add(1, Ordering::SeqCst);
            let raw = if n == 0 { make_rule_pass_one } else { make_rule_pass_two };
            let deps = extract::parse_make_rule(raw).unwrap();
            if n == 0 {
                assert_eq!(skip_count, 0, "first pass has nothing confirmed yet");
                let header = PathBuf::from(&deps[1]);
                let resolved = prefix_map.resolve(&PathBuf::from("/proj/foo").join(header.strip_prefix("foo").unwrap()));
                Ok(Outcome::Restart { dependency: resolved, headers_seen: 1 })
            } else {
                assert_eq!(skip_count, 1, "second pass must skip the header already confirmed");
                Ok(Outcome::Complete(deps.into_iter().map(PathBuf::from).collect()))
            }
        },
        |_dependency| {
            built_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    )
    .unwrap();

    assert_eq!(built.load(Ordering::SeqCst), 1, "the generated header is brought up to date exactly once");
    assert_eq!(result, vec![PathBuf::from("hello.cxx"), PathBuf::from("/proj/out/foo/gen.hxx")]);
}
