//! Shared harness for the integration tests.
//!
//! Modules are assembled through the public builders. Aspect types carry a public `Name`
//! field that attributes set, so recorded hook calls show which declaration fired.

#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use aspectweave::{
    emulation::{EmValue, NativeResult, Outcome, Runtime},
    metadata::{
        builders::{ClassBuilder, MethodBuilder},
        customattributes::{CustomAttribute, CustomAttributeArgument as Arg},
        method::FieldAttributes,
        module::Module,
        signatures::{TypeRef, TypeSig},
    },
    resolver::Resolver,
    weaver::{contract, WeaveOutcome, WeaveReport, Weaver},
    Result,
};

pub const HOOKS: [&str; 4] = ["OnEntry", "OnSuccess", "OnException", "OnExit"];

/// Ordered record of calls observed by natives
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    /// Entries for one hook, as the recorded aspect names
    pub fn of(&self, hook: &str) -> Vec<String> {
        self.entries()
            .iter()
            .filter_map(|e| e.strip_prefix(hook).and_then(|rest| rest.strip_prefix(':')))
            .map(str::to_string)
            .collect()
    }
}

/// An empty user module referencing the system and contract modules
pub fn module(name: &str) -> Module {
    let mut module = Module::new(name);
    module.references.push(contract::SYSTEM_MODULE.to_string());
    module.references.push(contract::CONTRACT_MODULE.to_string());
    module
}

/// A public aspect type with a `Name` field and a parameterless constructor
pub fn aspect(full_name: &str) -> ClassBuilder {
    ClassBuilder::new(full_name)
        .public()
        .extends(Some(contract::base_aspect_type()))
        .field("Name", TypeSig::String, FieldAttributes::PUBLIC)
        .default_constructor()
}

/// An application of `aspect_type` whose instance is called `name`
pub fn tag(aspect_type: &str, name: &str) -> CustomAttribute {
    CustomAttribute::new(TypeRef::local(aspect_type)).field("Name", Arg::String(name.to_string()))
}

/// Sets a named property on an attribute
pub fn with(attribute: CustomAttribute, property: &str, value: Arg) -> CustomAttribute {
    attribute.property(property, value)
}

/// `public static int name(int a, int b) => a + b`
pub fn adder(method: MethodBuilder, name: &str) -> MethodBuilder {
    binary(method, name, |asm| {
        asm.add();
    })
}

/// `public static int name(int a, int b) => a - b`
pub fn subtractor(method: MethodBuilder, name: &str) -> MethodBuilder {
    binary(method, name, |asm| {
        asm.sub();
    })
}

/// `public static int name(int a, int b) => a / b`
pub fn divider(method: MethodBuilder, name: &str) -> MethodBuilder {
    binary(method, name, |asm| {
        asm.div();
    })
}

fn binary<F>(method: MethodBuilder, name: &str, op: F) -> MethodBuilder
where
    F: FnOnce(&mut aspectweave::assembly::BodyAssembler) + 'static,
{
    method
        .named(name)
        .public()
        .static_method()
        .parameter("a", TypeSig::I4)
        .parameter("b", TypeSig::I4)
        .returns(TypeSig::I4)
        .implementation(|body| {
            body.implementation(move |asm| {
                asm.ldarg(0).ldarg(1);
                op(asm);
                asm.ret();
                Ok(())
            })
        })
}

/// Weaves `module` in place and returns the report
pub fn weave(module: &mut Module) -> Result<WeaveReport> {
    let resolver = Resolver::new()?;
    match Weaver::new(&resolver).weave(module)? {
        WeaveOutcome::Woven(report) => Ok(report),
        other => panic!("expected a woven module, got {other}"),
    }
}

/// Names of the members `module` would instrument
pub fn planned_members(module: &Module) -> Result<Vec<String>> {
    let resolver = Resolver::new()?;
    Ok(Weaver::new(&resolver)
        .plan(module)?
        .into_iter()
        .map(|plan| plan.member)
        .collect())
}

/// A runtime over `module`
pub fn runtime(module: Module) -> Result<Runtime> {
    Ok(Runtime::new(module, Resolver::new()?))
}

/// Value of the `Name` field of an aspect instance
pub fn aspect_name(rt: &Runtime, this: &EmValue) -> String {
    rt.field(this, "Name")
        .ok()
        .and_then(|name| rt.string(&name))
        .unwrap_or_default()
}

/// Records every hook call on instances of `aspect_type` as `Hook:Name`
pub fn trace(rt: &mut Runtime, aspect_type: &str, log: &Log) {
    for hook in HOOKS {
        let log = log.clone();
        rt.natives_mut().register(aspect_type, hook, move |call, rt| {
            log.push(format!("{hook}:{}", aspect_name(rt, &call.this())));
            Ok(NativeResult::Return(None))
        });
    }
}

/// Records `Initialize` calls on instances of `aspect_type` as `Name@member`
pub fn trace_initialize(rt: &mut Runtime, aspect_type: &str, log: &Log) {
    let log = log.clone();
    rt.natives_mut().register(aspect_type, "Initialize", move |call, rt| {
        let member = rt.member_name(&call.arg(0)).unwrap_or_default();
        log.push(format!("{}@{member}", aspect_name(rt, &call.this())));
        Ok(NativeResult::Return(None))
    });
}

/// The integer an outcome returned
pub fn returned_i32(outcome: &Outcome) -> Option<i32> {
    outcome.value().and_then(EmValue::as_i32)
}
