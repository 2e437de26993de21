use crate::ir::{
    AddressSpace, BinaryOp, BlockId, Function, IntPredicate, KernelArgInfo, Module, Param, Type,
    Value,
};

// Helper function to create a kernel with default argument metadata
pub fn create_kernel(name: &str, params: Vec<Param>) -> Function {
    let names = params.iter().map(|p| p.name.clone()).collect::<Vec<_>>();
    let mut func = Function::new(name, params, Type::Void);
    func.kernel_args = Some(KernelArgInfo {
        address_spaces: func
            .params()
            .iter()
            .map(|p| p.ty.address_space().map_or(0, AddressSpace::number))
            .collect(),
        access_quals: vec!["none".into(); names.len()],
        type_names: vec![String::new(); names.len()],
        base_type_names: vec![String::new(); names.len()],
        type_quals: vec![String::new(); names.len()],
        names,
    });
    func
}

// Helper function to wrap functions into a module
pub fn create_module(ocl_version: u32, functions: Vec<Function>) -> Module {
    let mut module = Module::new("test", ocl_version);
    for func in functions {
        module.add_function(func);
    }
    module
}

// Helper function to create a global pointer parameter
pub fn global_ptr(name: &str) -> Param {
    Param::new(name, Type::Ptr(AddressSpace::Global))
}

/// Two nested counted loops writing to a private array from the inner body.
///
/// ```text
/// entry:  %buf = alloca [16 x i32]
/// outer:  %i = phi [0, entry], [%i.next, latch]
/// inner:  %j = phi [0, outer], [%j.next, inner]
///         store %j, gep %buf[%j]
///         %j.next = add %j, 1 ; br (%j.next < inner_trip) inner, latch
/// latch:  %i.next = add %i, 1 ; br (%i.next < outer_trip) outer, exit
/// exit:   ret
/// ```
///
/// Returns the function and the outer and inner header blocks.
pub fn counted_loop_nest(outer_trip: u64, inner_trip: u64) -> (Function, BlockId, BlockId) {
    let mut func = create_kernel("nest", vec![global_ptr("out")]);
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

    add_incoming(&mut func, i, i_next, latch);
    add_incoming(&mut func, j, j_next, inner);
    (func, outer, inner)
}

// Helper function to append an incoming edge to a phi
pub fn add_incoming(func: &mut Function, phi: Value, value: Value, block: BlockId) {
    if let Some(id) = phi.as_inst() {
        if let crate::ir::Op::Phi { incoming } = &mut func.inst_mut(id).op {
            incoming.push((value, block));
        }
    }
}
