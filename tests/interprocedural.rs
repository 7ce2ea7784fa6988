//! Following calls into callee bodies.

mod support;

use param_validation::AnalysisEngine;
use param_validation::config::{AnalyzerConfig, InterproceduralAnalysisKind};
use param_validation::ir::{BlockId, ConditionKind, MethodBody, MethodId, Program};
use param_validation::points_to::{AbstractLocation, NullState};
use support::builders::*;

/// void Helper(object y) { y.ToString(); }
fn dereferencing_helper(id: &str) -> MethodBody {
    straight_line(method(id, &["y"]), vec![call_on(param(0), "object.ToString", vec![])])
}

fn engine(methods: Vec<MethodBody>, config: AnalyzerConfig) -> AnalysisEngine {
    let program = methods.into_iter().fold(Program::new(), Program::with);
    AnalysisEngine::new(program, config)
}

#[test]
fn callee_hazard_is_reported_at_the_call_site() {
    // void M(object x) { Helper(x); }
    let call_site = call("C.Helper", vec![param(0)]);
    let span = call_site.span;
    let caller = straight_line(method("C.M", &["x"]), vec![call_site]);
    let engine = engine(vec![caller, dereferencing_helper("C.Helper")], AnalyzerConfig::default());

    let m = engine.analyze(&MethodId::new("C.M")).unwrap();
    assert_eq!(m.hazardous_usage("x"), Some(span));

    let helper = engine.analyze(&MethodId::new("C.Helper")).unwrap();
    assert!(helper.hazardous_usage("y").is_some());
    assert!(engine.stats().forks() >= 1);
}

#[test]
fn validated_argument_is_not_reported_through_the_callee() {
    // if (x == null) throw ...; Helper(x);
    let caller = body(
        method("C.M", &["x"]),
        vec![
            entry(1),
            branch(1, vec![], eq(param(0), null()), ConditionKind::WhenTrue, 2, 3),
            throwing(2),
            block(3, vec![call("C.Helper", vec![param(0)])], 4),
            exit(4),
        ],
    );
    for kind in [
        InterproceduralAnalysisKind::ContextSensitive,
        InterproceduralAnalysisKind::ContextInsensitive,
    ] {
        let engine = engine(
            vec![caller.clone(), dereferencing_helper("C.Helper")],
            AnalyzerConfig::default().with_interprocedural_kind(kind),
        );
        let m = engine.analyze(&MethodId::new("C.M")).unwrap();
        assert!(m.hazardous_parameter_usages().is_empty(), "{kind:?}");
    }
}

#[test]
fn disabled_interprocedural_analysis_never_forks() {
    let caller = straight_line(method("C.M", &["x"]), vec![call("C.Helper", vec![param(0)])]);
    let config = AnalyzerConfig::default().with_interprocedural_kind(InterproceduralAnalysisKind::None);
    let engine = engine(vec![caller, dereferencing_helper("C.Helper")], config);

    let m = engine.analyze(&MethodId::new("C.M")).unwrap();
    assert!(m.hazardous_parameter_usages().is_empty());
    assert_eq!(engine.stats().forks(), 0);
    assert!(engine.stats().skipped_forks() >= 1);
}

#[test]
fn call_chain_limit_bounds_propagation() {
    // M(x) -> Mid(y) -> Helper(z) which dereferences.
    let methods = || {
        vec![
            straight_line(method("C.M", &["x"]), vec![call("C.Mid", vec![param(0)])]),
            straight_line(method("C.Mid", &["y"]), vec![call("C.Helper", vec![param(0)])]),
            dereferencing_helper("C.Helper"),
        ]
    };

    let shallow = engine(methods(), AnalyzerConfig::default().with_max_call_chain(1));
    let m = shallow.analyze(&MethodId::new("C.M")).unwrap();
    assert!(m.hazardous_parameter_usages().is_empty());
    assert!(shallow.stats().skipped_forks() >= 1);

    let deep = engine(methods(), AnalyzerConfig::default().with_max_call_chain(2));
    let m = deep.analyze(&MethodId::new("C.M")).unwrap();
    assert!(m.hazardous_usage("x").is_some());

    let none = engine(methods(), AnalyzerConfig::default().with_max_call_chain(0));
    let m = none.analyze(&MethodId::new("C.M")).unwrap();
    assert!(m.hazardous_parameter_usages().is_empty());
    assert_eq!(none.stats().forks(), 0);
}

#[test]
fn direct_recursion_terminates() {
    // void R(object x) { R(x); x.ToString(); }
    let deref = call_on(param(0), "object.ToString", vec![]);
    let span = deref.span;
    let r = straight_line(method("C.R", &["x"]), vec![call("C.R", vec![param(0)]), deref]);
    let engine = engine(vec![r], AnalyzerConfig::default().with_max_call_chain(8));

    let result = engine.analyze(&MethodId::new("C.R")).unwrap();
    assert_eq!(result.hazardous_usage("x"), Some(span));
    assert_eq!(engine.stats().forks(), 0);
}

#[test]
fn mutual_recursion_terminates_and_still_propagates() {
    // A(x) { B(x); }  B(y) { A(y); y.ToString(); }
    let a_call = call("C.B", vec![param(0)]);
    let span = a_call.span;
    let a = straight_line(method("C.A", &["x"]), vec![a_call]);
    let b = straight_line(
        method("C.B", &["y"]),
        vec![call("C.A", vec![param(0)]), call_on(param(0), "object.ToString", vec![])],
    );
    let engine = engine(vec![a, b], AnalyzerConfig::default().with_max_call_chain(8));

    let result = engine.analyze(&MethodId::new("C.A")).unwrap();
    assert_eq!(result.hazardous_usage("x"), Some(span));
}

#[test]
fn callee_that_validates_its_parameter_validates_the_argument() {
    // Ensure(y) { Guard.NotNull(y); }   M(x) { Ensure(x); x.ToString(); }
    let ensure = straight_line(method("C.Ensure", &["y"]), vec![call("Guard.NotNull", vec![param(0)])]);
    let deref = call_on(param(0), "object.ToString", vec![]);
    let span = deref.span;
    let caller = straight_line(method("C.M", &["x"]), vec![call("C.Ensure", vec![param(0)]), deref]);
    let base = AnalyzerConfig::default().with_validation_methods(["Guard.NotNull"]);

    let followed = engine(vec![caller.clone(), ensure.clone()], base.clone());
    let m = followed.analyze(&MethodId::new("C.M")).unwrap();
    assert!(m.hazardous_parameter_usages().is_empty());
    assert!(m.is_validated_at_exit(0));

    let insensitive = engine(
        vec![caller.clone(), ensure.clone()],
        base.clone().with_interprocedural_kind(InterproceduralAnalysisKind::ContextInsensitive),
    );
    let m = insensitive.analyze(&MethodId::new("C.M")).unwrap();
    assert!(m.hazardous_parameter_usages().is_empty());

    let disabled = engine(
        vec![caller, ensure],
        base.with_interprocedural_kind(InterproceduralAnalysisKind::None),
    );
    let m = disabled.analyze(&MethodId::new("C.M")).unwrap();
    assert_eq!(m.hazardous_usage("x"), Some(span));
}

#[test]
fn callee_promoted_at_exit_validates_the_argument() {
    // Check(y) throws when y is null; points-to knows y is non-null on return.
    let mut check = straight_line(method("C.Check", &["y"]), vec![call("Ext.Throw", vec![param(0)])]);
    let parameter = check.method.parameters[0].clone();
    let location = AbstractLocation::parameter(check.id(), &parameter);
    let points_to = check
        .points_to
        .take()
        .unwrap()
        .with_null_state_at_block_entry(BlockId(2), location.clone(), NullState::NotNull)
        .with_null_state_at_unhandled_throws(location, NullState::MaybeNull);
    check.points_to = Some(points_to);

    let caller = straight_line(
        method("C.M", &["x"]),
        vec![call("C.Check", vec![param(0)]), field(param(0), "Length")],
    );
    let engine = engine(vec![caller, check], AnalyzerConfig::default());

    let m = engine.analyze(&MethodId::new("C.M")).unwrap();
    assert!(m.hazardous_parameter_usages().is_empty());
}

#[test]
fn missing_callee_body_falls_back_conservatively() {
    let deref = field(param(0), "Length");
    let span = deref.span;
    let caller = straight_line(
        method("C.M", &["x"]),
        vec![call("Lib.Unknown", vec![param(0)]), deref],
    );
    let engine = engine(vec![caller], AnalyzerConfig::default());

    let m = engine.analyze(&MethodId::new("C.M")).unwrap();
    assert_eq!(m.hazardous_usage("x"), Some(span));
    assert!(engine.stats().skipped_forks() >= 1);
}

#[test]
fn context_insensitive_callee_results_are_shared_between_callers() {
    // One caller validates before calling, the other does not.
    let methods = || {
        vec![
            straight_line(method("C.M1", &["a"]), vec![call("C.Helper", vec![param(0)])]),
            straight_line(
                method("C.M2", &["b"]),
                vec![
                    assign(param(0), new_object("Foo", vec![])),
                    call("C.Helper", vec![param(0)]),
                ],
            ),
            dereferencing_helper("C.Helper"),
        ]
    };

    let insensitive = engine(
        methods(),
        AnalyzerConfig::default().with_interprocedural_kind(InterproceduralAnalysisKind::ContextInsensitive),
    );
    insensitive.analyze(&MethodId::new("C.M1")).unwrap();
    insensitive.analyze(&MethodId::new("C.M2")).unwrap();
    // M1, M2 and one shared Helper context.
    assert_eq!(insensitive.cache().len(), 3);

    let sensitive = engine(methods(), AnalyzerConfig::default());
    let m1 = sensitive.analyze(&MethodId::new("C.M1")).unwrap();
    let m2 = sensitive.analyze(&MethodId::new("C.M2")).unwrap();
    assert_eq!(sensitive.cache().len(), 4);
    assert!(m1.hazardous_usage("a").is_some());
    assert!(m2.hazardous_parameter_usages().is_empty());
}
