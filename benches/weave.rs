//! Benchmarks for weaving and woven execution.
//!
//! Measures the cost of:
//! - Planning the effective aspects of a module
//! - Rewriting every member of a module
//! - Calling a woven method compared to its original

extern crate aspectweave;

use aspectweave::{
    emulation::{EmValue, Runtime},
    metadata::{
        builders::ClassBuilder,
        customattributes::CustomAttribute,
        method::FieldAttributes,
        module::Module,
        signatures::{TypeRef, TypeSig},
    },
    resolver::Resolver,
    weaver::{contract, Weaver},
};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;

/// A module with `types` classes of `methods` adders each, traced at module level
fn sample_module(types: usize, methods: usize, aspects: bool) -> Module {
    let mut module = Module::new("Bench");
    module.references.push(contract::SYSTEM_MODULE.to_string());
    module.references.push(contract::CONTRACT_MODULE.to_string());
    if aspects {
        module
            .attributes
            .push(CustomAttribute::new(TypeRef::local("Bench.Trace")));
    }

    ClassBuilder::new("Bench.Trace")
        .public()
        .extends(Some(contract::base_aspect_type()))
        .field("Name", TypeSig::String, FieldAttributes::PUBLIC)
        .default_constructor()
        .build(&mut module)
        .unwrap();

    for t in 0..types {
        let mut class = ClassBuilder::new(&format!("Bench.Type{t}")).public();
        for m in 0..methods {
            class = class.method(move |method| {
                method
                    .named(format!("Add{m}"))
                    .public()
                    .static_method()
                    .parameter("a", TypeSig::I4)
                    .parameter("b", TypeSig::I4)
                    .returns(TypeSig::I4)
                    .implementation(|body| {
                        body.implementation(|asm| {
                            asm.ldarg(0).ldarg(1).add().ret();
                            Ok(())
                        })
                    })
            });
        }
        class.build(&mut module).unwrap();
    }
    module
}

/// Benchmark resolving the aspect plan of 20 types with 10 methods each.
fn bench_plan(c: &mut Criterion) {
    let resolver = Resolver::new().unwrap();
    let module = sample_module(20, 10, true);

    c.bench_function("plan_200_members", |b| {
        b.iter(|| {
            let plans = Weaver::new(&resolver).plan(black_box(&module)).unwrap();
            black_box(plans)
        });
    });
}

/// Benchmark weaving 20 types with 10 methods each.
fn bench_weave(c: &mut Criterion) {
    let resolver = Resolver::new().unwrap();
    let module = sample_module(20, 10, true);

    c.bench_function("weave_200_members", |b| {
        b.iter_batched(
            || module.clone(),
            |mut module| {
                let outcome = Weaver::new(&resolver).weave(&mut module).unwrap();
                black_box(outcome)
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark serializing a woven module to JSON and reading it back.
fn bench_module_file(c: &mut Criterion) {
    let resolver = Resolver::new().unwrap();
    let mut module = sample_module(20, 10, true);
    Weaver::new(&resolver).weave(&mut module).unwrap();
    let data = serde_json::to_vec(&module).unwrap();

    c.bench_function("module_from_bytes_woven", |b| {
        b.iter(|| {
            let module = aspectweave::file::module_from_bytes(black_box(data.clone())).unwrap();
            black_box(module)
        });
    });
}

fn runtime(aspects: bool) -> Runtime {
    let resolver = Resolver::new().unwrap();
    let mut module = sample_module(1, 1, aspects);
    if aspects {
        Weaver::new(&resolver).weave(&mut module).unwrap();
    }
    Runtime::new(module, resolver)
}

/// Benchmark calling an adder before and after weaving.
fn bench_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_add");
    for (name, aspects) in [("original", false), ("woven", true)] {
        let mut rt = runtime(aspects);
        group.bench_function(name, |b| {
            b.iter(|| {
                let outcome = rt
                    .call_static("Bench.Type0", "Add0", vec![EmValue::I32(1), EmValue::I32(2)])
                    .unwrap();
                black_box(outcome)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plan, bench_weave, bench_module_file, bench_call);
criterion_main!(benches);
