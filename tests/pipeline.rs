//! End-to-end runs of the standard lowering pipeline.

use genlower::{
    ir::{
        eval::{EvalValue, Evaluator},
        BlockId, Callee, FnAttributes, LoopHint, Op,
    },
    prelude::*,
};

const INVOKE: &str = "__child_block_invoke";

/// Kernel metadata matching the parameter list of `func`.
fn kernel_args(func: &Function) -> KernelArgInfo {
    let count = func.params().len();
    KernelArgInfo {
        address_spaces: func
            .params()
            .iter()
            .map(|p| p.ty.address_space().map_or(0, AddressSpace::number))
            .collect(),
        access_quals: vec!["none".into(); count],
        type_names: vec![String::new(); count],
        base_type_names: vec![String::new(); count],
        type_quals: vec![String::new(); count],
        names: func.params().iter().map(|p| p.name.clone()).collect(),
    }
}

fn kernel(name: &str, params: Vec<Param>) -> Function {
    let mut func = Function::new(name, params, Type::Void);
    func.kernel_args = Some(kernel_args(&func));
    func
}

fn global(name: &str) -> Param {
    Param::new(name, Type::Ptr(AddressSpace::Global))
}

fn lower(module: &mut Module) -> Result<PipelineReport> {
    Pipeline::standard(&PipelineConfig::default()).run(module)
}

/// `c[i] = a[i] + b[i]` over `float4` buffers.
fn float4_add() -> Module {
    let float4 = Type::vector(Type::F32, 4);
    let mut func = kernel(
        "vadd",
        vec![global("a"), global("b"), global("c"), Param::new("i", Type::I32)],
    );
    let entry = func.add_block("entry");
    let mut b = func.build_at_end(entry);
    let pa = b.gep(float4.clone(), Value::Arg(0), vec![Value::Arg(3)]);
    let pb = b.gep(float4.clone(), Value::Arg(1), vec![Value::Arg(3)]);
    let pc = b.gep(float4.clone(), Value::Arg(2), vec![Value::Arg(3)]);
    let x = b.load(float4.clone(), pa);
    let y = b.load(float4, pb);
    let sum = b.binary(BinaryOp::FAdd, x, y);
    b.store(sum, pc);
    b.ret(None);

    let mut module = Module::new("vadd", 200);
    module.add_function(func);
    module
}

fn floats(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Runs `vadd` on two float4 elements at index 1 and returns `c`.
fn run_float4_add(module: &Module) -> Result<Vec<u8>> {
    let a = floats(&[0.0, 0.0, 0.0, 0.0, 1.5, -2.0, 3.25, 4.0]);
    let b = floats(&[0.0, 0.0, 0.0, 0.0, 0.5, 8.0, -1.0, 2.5]);
    let mut eval = Evaluator::new(module);
    let mut regions = Vec::new();
    let mut args = Vec::new();
    for input in [Some(&a), Some(&b), None] {
        let ptr = eval.memory.alloc(32);
        let EvalValue::Ptr { region, .. } = ptr else {
            panic!("pointer expected");
        };
        if let Some(bytes) = input {
            eval.memory.region_mut(region).copy_from_slice(bytes);
        }
        regions.push(region);
        args.push(ptr);
    }
    args.push(EvalValue::int(32, 1));
    eval.run("vadd", args)?;
    Ok(eval.memory.region(regions[2]).to_vec())
}

/// Builds `enqueue_kernel(queue, flags, range, literal)` where the literal's invoke field holds
/// the address of a block that writes through its argument.
fn enqueue_module() -> Module {
    let literal_ty = Type::Struct(vec![
        Type::I32,
        Type::I32,
        Type::I32,
        Type::Ptr(AddressSpace::Private),
    ]);

    let mut invoke = Function::new(
        INVOKE,
        vec![Param::new("block", Type::Ptr(AddressSpace::Private))],
        Type::Void,
    );
    let entry = invoke.add_block("entry");
    let mut b = invoke.build_at_end(entry);
    let eight = b.const_int(32, 8);
    let field = b.gep(Type::I8, Value::Arg(0), vec![eight]);
    let one = b.const_int(32, 1);
    b.store(one, field);
    b.ret(None);

    let mut parent = kernel("parent", vec![global("out")]);
    let entry = parent.add_block("entry");
    let mut b = parent.build_at_end(entry);
    let literal = b.alloca(literal_ty.clone(), None);
    let zero = b.const_int(32, 0);
    let three = b.const_int(32, 3);
    let slot = b.gep(literal_ty, literal, vec![zero, three]);
    let address = b.constant(Constant::Function {
        name: INVOKE.to_string(),
        space: AddressSpace::Private,
    });
    b.store(address, slot);
    let queue = b.const_int(32, 0);
    let flags = b.const_int(32, 0);
    let range = b.const_int(32, 64);
    b.call("enqueue_kernel", vec![queue, flags, range, literal], Type::I32);
    b.ret(None);

    let mut module = Module::new("enqueue", 200);
    module.add_function(invoke);
    module.add_function(parent);
    module
}

/// Two nested counted loops; the inner body stores into a private array.
fn loop_nest(outer_trip: u64, inner_trip: u64) -> (Module, BlockId, BlockId) {
    let mut func = kernel("nest", vec![global("out")]);
    let entry = func.add_block("entry");
    let outer = func.add_block("outer");
    let inner = func.add_block("inner");
    let latch = func.add_block("latch");
    let exit = func.add_block("exit");

    let mut b = func.build_at_end(entry);
    let buf = b.alloca(Type::array(Type::I32, 16), None);
    let zero = b.const_int(32, 0);
    let one = b.const_int(32, 1);
    let inner_bound = b.const_int(32, inner_trip);
    let outer_bound = b.const_int(32, outer_trip);
    b.br(outer);

    let mut b = func.build_at_end(outer);
    let i = b.phi(Type::I32, vec![(zero, entry)]);
    b.br(inner);

    let mut b = func.build_at_end(inner);
    let j = b.phi(Type::I32, vec![(zero, outer)]);
    let slot = b.gep(Type::I32, buf, vec![j]);
    b.store(j, slot);
    let j_next = b.binary(BinaryOp::Add, j, one);
    let again = b.icmp(IntPredicate::Slt, j_next, inner_bound);
    b.cond_br(again, inner, latch);

    let mut b = func.build_at_end(latch);
    let i_next = b.binary(BinaryOp::Add, i, one);
    let more = b.icmp(IntPredicate::Slt, i_next, outer_bound);
    b.cond_br(more, outer, exit);

    func.build_at_end(exit).ret(None);

    for (phi, value, block) in [(i, i_next, latch), (j, j_next, inner)] {
        if let Some(id) = phi.as_inst() {
            if let Op::Phi { incoming } = &mut func.inst_mut(id).op {
                incoming.push((value, block));
            }
        }
    }

    let mut module = Module::new("nest", 200);
    module.add_function(func);
    (module, outer, inner)
}

/// Test that float4 arithmetic is fully scalarized and addressed with plain integers
#[test]
fn test_float4_add_scalarized() -> Result<()> {
    let mut module = float4_add();
    let before = run_float4_add(&module)?;

    let report = lower(&mut module)?;
    assert!(report.changed.contains(&"scalarization"));
    assert!(report.changed.contains(&"gep-lowering"));

    let func = module.function("vadd").unwrap();
    let mut scalar_adds = 0;
    for id in func.live_insts() {
        let inst = func.inst(id);
        assert!(!matches!(inst.op, Op::Gep { .. }), "GEP left at {id}");
        if let Op::Binary { op, .. } = &inst.op {
            assert!(!inst.ty.is_vector(), "vector arithmetic left at {id}");
            scalar_adds += usize::from(*op == BinaryOp::FAdd);
        }
    }
    assert_eq!(scalar_adds, 4);
    assert_eq!(run_float4_add(&module)?, before);
    Ok(())
}

/// Test that `x % 2` on a 128-bit parameter is computed on 64-bit limbs
#[test]
fn test_i128_remainder_split_into_limbs() -> Result<()> {
    let wide = Type::Int(128);
    let mut func = kernel("rem", vec![Param::new("x", wide.clone()), global("out")]);
    let entry = func.add_block("entry");
    let mut b = func.build_at_end(entry);
    let two = b.constant(Constant::Int(genlower::ir::ApInt::new(128, 2)));
    let rem = b.binary(BinaryOp::URem, Value::Arg(0), two);
    b.store(rem, Value::Arg(1));
    b.ret(None);
    let mut module = Module::new("rem", 200);
    module.add_function(func);

    let report = lower(&mut module)?;
    assert!(report.changed.contains(&"integer-legalization"));

    let func = module.function("rem").unwrap();
    assert_eq!(func.params().len(), 3);
    assert!(func.params()[..2].iter().all(|p| p.ty == Type::I64));
    for id in func.live_insts() {
        let inst = func.inst(id);
        assert!(inst.ty.int_bits().map_or(true, |bits| bits <= 64), "{id} is wide");
        for operand in inst.op.operands() {
            let bits = func.value_type(operand).int_bits();
            assert!(bits.map_or(true, |bits| bits <= 64), "{id} reads a wide value");
        }
    }

    // x = 2^64 + 7: low limb 7, high limb 1
    let mut eval = Evaluator::new(&module);
    let out = eval.memory.alloc(16);
    let EvalValue::Ptr { region, .. } = out else {
        panic!("pointer expected");
    };
    eval.run("rem", vec![EvalValue::int(64, 7), EvalValue::int(64, 1), out])?;
    let bytes = eval.memory.region(region);
    assert_eq!(bytes[0], 1);
    assert!(bytes[1..].iter().all(|b| *b == 0));
    Ok(())
}

/// Test that a 6x4 nest over private memory gets the unroll directive and 6x8 does not
#[test]
fn test_loop_nest_unroll_ceiling() -> Result<()> {
    let (mut module, outer, inner) = loop_nest(6, 4);
    let report = lower(&mut module)?;
    let func = module.function("nest").unwrap();
    assert_eq!(func.loop_hints.get(&inner), Some(&LoopHint::UnrollEnable));
    assert_eq!(func.loop_hints.get(&outer), None);
    assert_eq!(report.events.count_kind(EventKind::LoopMarked), 1);

    let (mut module, _, _) = loop_nest(6, 8);
    let report = lower(&mut module)?;
    assert!(module.function("nest").unwrap().loop_hints.is_empty());
    assert!(!report.changed.contains(&"loop-unroll-advisor"));
    Ok(())
}

/// Test that the unroll ceiling is taken from the configuration
#[test]
fn test_loop_nest_custom_ceiling() -> Result<()> {
    let (mut module, _, inner) = loop_nest(6, 8);
    Pipeline::standard(&PipelineConfig::default().unroll_ceiling(64)).run(&mut module)?;
    let func = module.function("nest").unwrap();
    assert_eq!(func.loop_hints.get(&inner), Some(&LoopHint::UnrollEnable));
    Ok(())
}

/// Test that enqueueing a block yields one cloned kernel addressed by its dispatch index
#[test]
fn test_enqueue_block_cloned_once() -> Result<()> {
    let mut module = enqueue_module();
    let report = lower(&mut module)?;
    assert!(report.changed.contains(&"device-enqueue"));
    assert_eq!(report.events.count_kind(EventKind::KernelCloned), 1);

    let clones: Vec<&Function> = module
        .functions
        .iter()
        .filter(|f| f.name().contains(INVOKE))
        .collect();
    assert_eq!(clones.len(), 1);
    let clone = clones[0];
    assert_eq!(clone.name(), INVOKE);
    assert!(module.is_kernel(clone));
    assert!(!clone.attrs.contains(FnAttributes::ALWAYS_INLINE));
    assert!(clone
        .params()
        .iter()
        .all(|p| p.ty == Type::Ptr(AddressSpace::Global)));
    // the address rebuilt from the argument follows it into global memory
    for id in clone.live_insts() {
        let inst = clone.inst(id);
        if inst.ty.is_ptr() {
            assert_eq!(inst.ty, Type::Ptr(AddressSpace::Global), "{id}");
        }
    }
    assert_eq!(module.block_functions, vec![INVOKE.to_string()]);

    let parent = module.function("parent").unwrap();
    let mut stored = Vec::new();
    for id in parent.live_insts() {
        match &parent.inst(id).op {
            Op::Store { value, .. } => {
                assert!(!matches!(
                    parent.as_constant(*value),
                    Some(Constant::Function { .. })
                ));
                stored.extend(parent.const_int(*value));
            }
            Op::Call {
                callee: Callee::Direct(name),
                ..
            } => assert_eq!(name, "enqueue_kernel"),
            Op::Call { .. } => panic!("indirect call left in parent"),
            _ => {}
        }
    }
    assert_eq!(stored, vec![0]);
    Ok(())
}

/// Test that modules before OpenCL 2.0 keep block literals untouched
#[test]
fn test_enqueue_inactive_before_ocl20() -> Result<()> {
    let mut module = enqueue_module();
    module.ocl_version = 120;
    let report = lower(&mut module)?;
    assert!(!report.changed.contains(&"device-enqueue"));
    assert!(module.block_functions.is_empty());
    Ok(())
}

/// Test that a second run finds nothing left for the normalizing and lowering stages
#[test]
fn test_pipeline_rerun_is_stable() -> Result<()> {
    for mut module in [float4_add(), loop_nest(6, 4).0] {
        lower(&mut module)?;
        let report = lower(&mut module)?;
        for stage in [
            "constexpr-expansion",
            "attribute-normalization",
            "barrier-nodup",
            "always-inline",
            "integer-legalization",
            "gep-lowering",
            "loop-unroll-advisor",
        ] {
            assert!(!report.changed.contains(&stage), "{stage} changed on rerun");
        }
    }
    Ok(())
}

/// Test that modules survive a JSON round trip through the driver's file format
#[test]
fn test_module_json_roundtrip_after_lowering() -> Result<()> {
    let mut module = float4_add();
    lower(&mut module)?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("vadd.json");
    module.save(&path)?;
    assert_eq!(Module::load(&path)?, module);
    Ok(())
}
