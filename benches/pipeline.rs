#![allow(unused)]
extern crate genlower;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use genlower::{
    compiler::{FunctionPass, ModuleInfo, PassContext, ScalarizationPass},
    prelude::*,
};
use std::hint::black_box;

/// Kernel with `lanes` float4 additions over consecutive buffer elements.
fn float4_kernel(lanes: u64) -> Module {
    let float4 = Type::vector(Type::F32, 4);
    let global = Type::Ptr(AddressSpace::Global);
    let mut func = Function::new(
        "vadd",
        vec![
            Param::new("a", global.clone()),
            Param::new("b", global.clone()),
            Param::new("c", global),
        ],
        Type::Void,
    );
    func.kernel_args = Some(KernelArgInfo {
        address_spaces: vec![1; 3],
        access_quals: vec!["none".into(); 3],
        type_names: vec!["float4*".into(); 3],
        base_type_names: vec!["float4*".into(); 3],
        type_quals: vec![String::new(); 3],
        names: vec!["a".into(), "b".into(), "c".into()],
    });
    let entry = func.add_block("entry");
    let mut b = func.build_at_end(entry);
    for i in 0..lanes {
        let index = b.const_int(32, i);
        let pa = b.gep(float4.clone(), Value::Arg(0), vec![index]);
        let pb = b.gep(float4.clone(), Value::Arg(1), vec![index]);
        let pc = b.gep(float4.clone(), Value::Arg(2), vec![index]);
        let x = b.load(float4.clone(), pa);
        let y = b.load(float4.clone(), pb);
        let sum = b.binary(BinaryOp::FAdd, x, y);
        b.store(sum, pc);
    }
    b.ret(None);

    let mut module = Module::new("bench", 200);
    module.add_function(func);
    module
}

/// Benchmark the standard pipeline (without linking) on growing kernels
///
/// Each iteration lowers a fresh copy of the module; building it is excluded from the timing.
fn bench_standard_pipeline(c: &mut Criterion) {
    let pipeline = Pipeline::standard(&PipelineConfig::default());

    let mut group = c.benchmark_group("pipeline_standard");
    for lanes in [16u64, 128, 1024] {
        let module = float4_kernel(lanes);
        group.throughput(Throughput::Elements(lanes));
        group.bench_function(format!("float4_add_{lanes}"), |b| {
            b.iter_batched(
                || module.clone(),
                |mut module| {
                    let report = pipeline.run(black_box(&mut module)).unwrap();
                    black_box(report)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark scalarization alone, the stage that grows the instruction count the most
fn bench_scalarization(c: &mut Criterion) {
    let module = float4_kernel(1024);
    let info = ModuleInfo::of(&module);
    let pass = ScalarizationPass::new();

    let mut group = c.benchmark_group("scalarization");
    group.throughput(Throughput::Elements(1024));
    group.bench_function("float4_add_1024", |b| {
        b.iter_batched(
            || module.clone(),
            |mut module| {
                let ctx = PassContext::new(PipelineConfig::default());
                let func = module.function_mut("vadd").unwrap();
                black_box(pass.run_on_function(func, &info, &ctx).unwrap())
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_standard_pipeline, bench_scalarization);
criterion_main!(benches);
