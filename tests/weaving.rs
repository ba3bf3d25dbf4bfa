//! Declaration merging, target filtering and the structure of woven modules.

mod common;

use aspectweave::{
    analysis::ControlFlowGraph,
    metadata::{
        builders::ClassBuilder,
        customattributes::CustomAttributeArgument as Arg,
        module::Module,
        signatures::{TypeRef, TypeSig},
    },
    resolver::Resolver,
    weaver::{contract, WeaveOutcome, Weaver},
    Error, Result,
};
use common::{adder, aspect, module, planned_members, subtractor, tag, weave, with};

fn element_targets(bits: i32) -> Arg {
    Arg::Enum(TypeRef::local(contract::ELEMENT_TARGETS), Box::new(Arg::I4(bits)))
}

fn aspects_of(module: &Module, member: &str) -> Result<Vec<String>> {
    let resolver = Resolver::new()?;
    Ok(Weaver::new(&resolver)
        .plan(module)?
        .into_iter()
        .find(|plan| plan.member == member)
        .map(|plan| plan.aspects.into_iter().map(|a| a.aspect_type).collect())
        .unwrap_or_default())
}

#[test]
fn scopes_merge_innermost_first() -> Result<()> {
    let mut m = module("Sample");
    m.attributes.push(tag("Sample.ModuleLevel", "module"));
    aspect("Sample.ModuleLevel").build(&mut m)?;
    aspect("Sample.TypeLevel").build(&mut m)?;
    aspect("Sample.MethodLevel").build(&mut m)?;
    ClassBuilder::new("Sample.Calc")
        .public()
        .attribute(tag("Sample.TypeLevel", "type"))
        .method(|m| adder(m, "Add").attribute(tag("Sample.MethodLevel", "method")))
        .build(&mut m)?;

    assert_eq!(
        aspects_of(&m, "Sample.Calc.Add")?,
        vec!["Sample.MethodLevel", "Sample.TypeLevel", "Sample.ModuleLevel"]
    );
    Ok(())
}

#[test]
fn explicit_order_comes_before_scope() -> Result<()> {
    let mut m = module("Sample");
    for name in ["Sample.A", "Sample.B", "Sample.C", "Sample.D"] {
        aspect(name).build(&mut m)?;
    }
    ClassBuilder::new("Sample.Calc")
        .public()
        .attribute(tag("Sample.A", "class"))
        .method(|m| {
            adder(m, "Add")
                .attribute(with(tag("Sample.B", "m1"), "Order", Arg::I4(1)))
                .attribute(with(tag("Sample.C", "m2"), "Order", Arg::I4(2)))
                .attribute(with(tag("Sample.D", "m3"), "Order", Arg::I4(3)))
        })
        .method(|m| {
            subtractor(m, "Sub")
                .attribute(with(tag("Sample.B", "m1"), "Order", Arg::I4(3)))
                .attribute(with(tag("Sample.C", "m2"), "Order", Arg::I4(2)))
                .attribute(with(tag("Sample.D", "m3"), "Order", Arg::I4(1)))
        })
        .build(&mut m)?;

    assert_eq!(
        aspects_of(&m, "Sample.Calc.Add")?,
        vec!["Sample.A", "Sample.B", "Sample.C", "Sample.D"]
    );
    assert_eq!(
        aspects_of(&m, "Sample.Calc.Sub")?,
        vec!["Sample.A", "Sample.D", "Sample.C", "Sample.B"]
    );
    Ok(())
}

#[test]
fn exclude_removes_only_the_named_type() -> Result<()> {
    let mut m = module("Sample");
    m.attributes.push(tag("Sample.Trace", "trace"));
    aspect("Sample.Log").build(&mut m)?;
    aspect("Sample.Trace").build(&mut m)?;
    ClassBuilder::new("Sample.Calc")
        .public()
        .attribute(tag("Sample.Log", "log"))
        .method(|m| adder(m, "Add").attribute(with(tag("Sample.Log", "off"), "Exclude", Arg::Bool(true))))
        .method(|m| subtractor(m, "Sub"))
        .build(&mut m)?;

    assert_eq!(aspects_of(&m, "Sample.Calc.Add")?, vec!["Sample.Trace"]);
    assert_eq!(aspects_of(&m, "Sample.Calc.Sub")?, vec!["Sample.Log", "Sample.Trace"]);
    Ok(())
}

#[test]
fn exclude_of_everything_leaves_member_alone() -> Result<()> {
    let mut m = module("Sample");
    aspect("Sample.Log").build(&mut m)?;
    ClassBuilder::new("Sample.Calc")
        .public()
        .attribute(tag("Sample.Log", "log"))
        .method(|m| adder(m, "Add").attribute(with(tag("Sample.Log", "off"), "Exclude", Arg::Bool(true))))
        .method(|m| subtractor(m, "Sub"))
        .build(&mut m)?;

    assert_eq!(planned_members(&m)?, vec!["Sample.Calc.Sub"]);
    Ok(())
}

#[test]
fn replace_swaps_inherited_declarations() -> Result<()> {
    let mut m = module("Sample");
    m.attributes.push(tag("Sample.Log", "module"));
    aspect("Sample.Log").build(&mut m)?;
    aspect("Sample.Trace").build(&mut m)?;
    ClassBuilder::new("Sample.Calc")
        .public()
        .attribute(tag("Sample.Log", "type"))
        .attribute(tag("Sample.Trace", "trace"))
        .method(|m| adder(m, "Add").attribute(with(tag("Sample.Log", "method"), "Replace", Arg::Bool(true))))
        .build(&mut m)?;

    let resolver = Resolver::new()?;
    let plans = Weaver::new(&resolver).plan(&m)?;
    let declared: Vec<&str> = plans[0].aspects.iter().map(|a| a.declared_at.as_str()).collect();
    assert_eq!(declared, vec!["method Add", "type Sample.Calc"]);
    assert_eq!(aspects_of(&m, "Sample.Calc.Add")?, vec!["Sample.Log", "Sample.Trace"]);
    Ok(())
}

#[test]
fn exclude_with_replace_is_rejected() -> Result<()> {
    let mut m = module("Sample");
    aspect("Sample.Log").build(&mut m)?;
    ClassBuilder::new("Sample.Calc")
        .public()
        .method(|m| {
            adder(m, "Add").attribute(
                tag("Sample.Log", "both")
                    .property("Exclude", Arg::Bool(true))
                    .property("Replace", Arg::Bool(true)),
            )
        })
        .build(&mut m)?;

    let before = m.clone();
    let result = Weaver::new(&Resolver::new()?).weave(&mut m);
    assert!(matches!(result, Err(Error::ConflictingDeclaration(_))));
    assert_eq!(m, before);
    Ok(())
}

#[test]
fn element_targets_select_accessors() -> Result<()> {
    let mut m = module("Sample");
    aspect("Sample.Log").build(&mut m)?;
    ClassBuilder::new("Sample.Account")
        .public()
        .attribute(with(tag("Sample.Log", "props"), "ElementTargets", element_targets(2)))
        .auto_property("Balance", TypeSig::I4)
        .default_constructor()
        .method(|m| adder(m, "Add"))
        .build(&mut m)?;

    assert_eq!(
        planned_members(&m)?,
        vec!["Sample.Account.get_Balance", "Sample.Account.set_Balance"]
    );
    let resolver = Resolver::new()?;
    let kinds: Vec<String> = Weaver::new(&resolver).plan(&m)?.into_iter().map(|p| p.kind).collect();
    assert!(kinds.iter().all(|kind| kind == "PropertyAccessor"));
    Ok(())
}

#[test]
fn constructor_targets_include_the_constructor() -> Result<()> {
    let mut m = module("Sample");
    aspect("Sample.Log").build(&mut m)?;
    ClassBuilder::new("Sample.Account")
        .public()
        .attribute(with(tag("Sample.Log", "ctor"), "ElementTargets", element_targets(4)))
        .default_constructor()
        .method(|m| adder(m, "Add"))
        .build(&mut m)?;

    assert_eq!(planned_members(&m)?, vec!["Sample.Account..ctor"]);
    Ok(())
}

#[test]
fn name_patterns_filter_members() -> Result<()> {
    let mut m = module("Sample");
    m.attributes
        .push(with(tag("Sample.Log", "glob"), "MemberTargets", Arg::String("A*".into())));
    m.attributes
        .push(with(tag("Sample.Trace", "regex"), "TypeTargets", Arg::String("/^Sample\\.Ma/".into())));
    aspect("Sample.Log").build(&mut m)?;
    aspect("Sample.Trace").build(&mut m)?;
    ClassBuilder::new("Sample.Calc")
        .public()
        .method(|m| adder(m, "Add"))
        .method(|m| subtractor(m, "Sub"))
        .build(&mut m)?;
    ClassBuilder::new("Sample.Math")
        .public()
        .method(|m| subtractor(m, "Sub"))
        .build(&mut m)?;

    assert_eq!(aspects_of(&m, "Sample.Calc.Add")?, vec!["Sample.Log"]);
    assert_eq!(aspects_of(&m, "Sample.Math.Sub")?, vec!["Sample.Trace"]);
    assert_eq!(planned_members(&m)?, vec!["Sample.Calc.Add", "Sample.Math.Sub"]);
    Ok(())
}

#[test]
fn qualified_pattern_matches_full_name() -> Result<()> {
    let mut m = module("Sample");
    m.attributes.push(with(
        tag("Sample.Log", "one"),
        "MemberTargets",
        Arg::String("Sample.Calc.Sub".into()),
    ));
    aspect("Sample.Log").build(&mut m)?;
    ClassBuilder::new("Sample.Calc")
        .public()
        .method(|m| adder(m, "Add"))
        .method(|m| subtractor(m, "Sub"))
        .build(&mut m)?;

    assert_eq!(planned_members(&m)?, vec!["Sample.Calc.Sub"]);
    Ok(())
}

#[test]
fn invalid_pattern_is_reported() -> Result<()> {
    let mut m = module("Sample");
    m.attributes
        .push(with(tag("Sample.Log", "bad"), "MemberTargets", Arg::String("/(/".into())));
    aspect("Sample.Log").build(&mut m)?;
    ClassBuilder::new("Sample.Calc")
        .public()
        .method(|m| adder(m, "Add"))
        .build(&mut m)?;

    let result = Weaver::new(&Resolver::new()?).weave(&mut m);
    assert!(matches!(result, Err(Error::InvalidPattern { .. })));
    Ok(())
}

#[test]
fn woven_bodies_validate_and_initializer_is_emitted() -> Result<()> {
    let mut m = module("Sample");
    aspect("Sample.Log").build(&mut m)?;
    ClassBuilder::new("Sample.Calc")
        .public()
        .attribute(tag("Sample.Log", "log"))
        .method(|m| adder(m, "Add"))
        .method(|m| subtractor(m, "Sub"))
        .build(&mut m)?;

    let report = weave(&mut m)?;
    assert_eq!(report.emitted_aspects, 2);
    assert!(report.initializer.starts_with(contract::INIT_NAMESPACE_PREFIX));
    assert!(report.initializer.ends_with(contract::INIT_TYPE_NAME));
    assert!(m.find_type(&report.initializer).is_some());

    let mut slots: Vec<&String> = report.members.iter().flat_map(|w| w.fields.iter()).collect();
    slots.dedup();
    assert_eq!(slots.len(), 2);

    for member in &report.members {
        let method = m.method(member.plan.token).and_then(|method| method.body.as_ref());
        let body = method.ok_or_else(|| Error::MemberNotFound(member.plan.member.clone()))?;
        let cfg = ControlFlowGraph::new(body);
        cfg.validate()?;
        assert_eq!(cfg.return_blocks().len(), 1, "{} has a single exit", member.plan.member);
    }
    Ok(())
}

#[test]
fn second_weave_is_a_no_op() -> Result<()> {
    let mut m = module("Sample");
    aspect("Sample.Log").build(&mut m)?;
    ClassBuilder::new("Sample.Calc")
        .public()
        .attribute(tag("Sample.Log", "log"))
        .method(|m| adder(m, "Add"))
        .build(&mut m)?;
    weave(&mut m)?;

    let woven = m.clone();
    let outcome = Weaver::new(&Resolver::new()?).weave(&mut m)?;
    assert_eq!(outcome, WeaveOutcome::AlreadyProcessed);
    assert_eq!(m, woven);
    Ok(())
}

#[test]
fn initializer_name_is_stable_across_runs() -> Result<()> {
    let build = || -> Result<Module> {
        let mut m = module("Sample");
        aspect("Sample.Log").build(&mut m)?;
        ClassBuilder::new("Sample.Calc")
            .public()
            .attribute(tag("Sample.Log", "log"))
            .method(|m| adder(m, "Add"))
            .build(&mut m)?;
        Ok(m)
    };
    let (mut first, mut second) = (build()?, build()?);
    assert_eq!(weave(&mut first)?.initializer, weave(&mut second)?.initializer);
    assert_eq!(first, second);
    Ok(())
}
