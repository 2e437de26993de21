//! Merging of adjacent scalar memory accesses.
//!
//! The backend issues one message per memory access, so four consecutive `i32` loads cost four
//! times as much as one `<4 x i32>` load. Within each basic block this pass collects runs of
//! simple scalar accesses whose addresses are consecutive and replaces each run by vector
//! accesses.
//!
//! # Run formation
//!
//! Starting from a candidate access, the following instructions of the block are examined
//! (at most [`LOOKAHEAD`] of them):
//!
//! - a same-kind access with the same address space, type and ordering, located exactly
//!   `run length × store size` bytes past the first pointer, extends the run;
//! - an access in another address space is stepped over (the merge reorders around it);
//! - an access of the opposite kind in the same address space, any other same-space access
//!   of the same kind, or any call ends the run.
//!
//! A run is merged in chunks of 16, 8 and 4 accesses; a remaining 3 or 2 are merged as a
//! vector of that width.

use crate::{
    analysis::AddressExpr,
    compiler::{EventKind, FunctionPass, ModuleInfo, PassContext},
    ir::{Access, AddressSpace, BlockId, DataLayout, Function, InstId, Op, Type, Value},
    Result,
};

/// Maximum vector width of a merged access.
const MAX_CHUNK: usize = 16;

/// Instructions examined after the first access of a run.
const LOOKAHEAD: usize = 2 * MAX_CHUNK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Load,
    Store,
}

/// The memory-relevant facts of one instruction.
#[derive(Debug, Clone)]
struct MemAccess {
    kind: Kind,
    ty: Type,
    ptr: Value,
    space: Option<AddressSpace>,
    access: Access,
}

/// Merges adjacent scalar loads and stores into vector accesses.
pub struct LoadStoreMergingPass;

impl Default for LoadStoreMergingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadStoreMergingPass {
    /// Creates a new load/store merging pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn access_of(func: &Function, id: InstId) -> Option<MemAccess> {
    let inst = func.inst(id);
    let (kind, ty, ptr, access) = match &inst.op {
        Op::Load { ptr, access, .. } => (Kind::Load, inst.ty.clone(), *ptr, *access),
        Op::Store {
            value, ptr, access, ..
        } => (Kind::Store, func.value_type(*value), *ptr, *access),
        _ => return None,
    };
    Some(MemAccess {
        kind,
        ty,
        ptr,
        space: func.value_type(ptr).address_space(),
        access,
    })
}

/// Starting accesses: simple loads of scalars up to 32 bits and simple 32-bit stores.
fn is_candidate(access: &MemAccess) -> bool {
    if access.access != Access::Simple || !access.ty.is_scalar() || access.ty.is_ptr() {
        return false;
    }
    match (access.kind, access.ty.primitive_bits()) {
        (Kind::Load, Some(bits)) => bits <= 32,
        (Kind::Store, Some(bits)) => bits == 32,
        _ => false,
    }
}

fn is_call(op: &Op) -> bool {
    match op {
        Op::Call { .. } => true,
        Op::Intrinsic { intrinsic, .. } => intrinsic.touches_memory(),
        _ => false,
    }
}

/// Splits a run length into merge widths: greedy 16/8/4, then a tail of 3 or 2.
fn chunk_widths(mut len: usize) -> Vec<usize> {
    let mut widths = Vec::new();
    for width in [16, 8, 4] {
        while len >= width {
            widths.push(width);
            len -= width;
        }
    }
    if len >= 2 {
        widths.push(len);
    }
    widths
}

struct Run {
    members: Vec<InstId>,
    reordered: bool,
}

/// Collects the run starting at `insts[start]`.
fn collect_run(func: &Function, layout: &DataLayout, insts: &[InstId], start: usize) -> Option<Run> {
    let first = access_of(func, insts[start])?;
    if !is_candidate(&first) {
        return None;
    }
    let size = layout.store_size(&first.ty) as i64;
    let first_addr = AddressExpr::of(func, layout, first.ptr);

    let mut run = Run {
        members: vec![insts[start]],
        reordered: false,
    };
    for id in insts.iter().skip(start + 1).take(LOOKAHEAD) {
        let op = &func.inst(*id).op;
        if is_call(op) {
            break;
        }
        let Some(next) = access_of(func, *id) else {
            continue;
        };
        if next.space != first.space {
            run.reordered = true;
            continue;
        }
        if next.kind != first.kind {
            break;
        }
        let expected = run.members.len() as i64 * size;
        let consecutive = next.ty == first.ty
            && next.access == first.access
            && AddressExpr::of(func, layout, next.ptr).constant_difference(&first_addr)
                == Some(expected);
        if !consecutive {
            break;
        }
        run.members.push(*id);
    }
    Some(run)
}

fn merge_loads(func: &mut Function, chunk: &[InstId]) -> Result<InstId> {
    let first = chunk[0];
    let (ptr, align, access) = match &func.inst(first).op {
        Op::Load { ptr, align, access } => (*ptr, *align, *access),
        _ => return Err(malformed_error!("load expected at {}", first)),
    };
    let elem = func.inst(first).ty.clone();
    let vector_ty = Type::vector(elem, chunk.len() as u32);

    let mut b = func.build_before(first)?;
    let vector = b.load_with(vector_ty, ptr, align, access);
    let lanes: Vec<Value> = (0..chunk.len())
        .map(|i| {
            let index = b.const_int(32, i as u64);
            b.extract_element(vector, index)
        })
        .collect();
    for (load, lane) in chunk.iter().zip(lanes) {
        func.replace_all_uses(Value::Inst(*load), lane);
    }
    func.remove_all(chunk);
    vector
        .as_inst()
        .ok_or_else(|| malformed_error!("vector load is not an instruction"))
}

fn merge_stores(func: &mut Function, chunk: &[InstId]) -> Result<InstId> {
    let mut values = Vec::with_capacity(chunk.len());
    for id in chunk {
        match &func.inst(*id).op {
            Op::Store { value, .. } => values.push(*value),
            _ => return Err(malformed_error!("store expected at {}", id)),
        }
    }
    let (ptr, align, access) = match &func.inst(chunk[0]).op {
        Op::Store {
            ptr, align, access, ..
        } => (*ptr, *align, *access),
        _ => return Err(malformed_error!("store expected at {}", chunk[0])),
    };
    let elem = func.value_type(values[0]);
    let vector_ty = Type::vector(elem, chunk.len() as u32);

    let last = chunk[chunk.len() - 1];
    let mut b = func.build_before(last)?;
    let vector = b.build_vector(vector_ty, &values);
    let store = b.store_with(vector, ptr, align, access);
    func.remove_all(chunk);
    Ok(store)
}

fn merge_block(
    func: &mut Function,
    block: BlockId,
    layout: &DataLayout,
    ctx: &PassContext,
    pass: &'static str,
) -> Result<usize> {
    let mut merged = 0;
    let mut index = 0;
    loop {
        let insts = func.block_insts(block).to_vec();
        if index >= insts.len() {
            break;
        }
        let Some(run) = collect_run(func, layout, &insts, index) else {
            index += 1;
            continue;
        };
        if run.members.len() < 2 {
            index += 1;
            continue;
        }

        let is_load = matches!(func.inst(run.members[0]).op, Op::Load { .. });
        let mut offset = 0;
        let mut last_new = None;
        for width in chunk_widths(run.members.len()) {
            let chunk = &run.members[offset..offset + width];
            offset += width;
            let new = if is_load {
                merge_loads(func, chunk)?
            } else {
                merge_stores(func, chunk)?
            };
            last_new = Some(new);
            merged += width;
            log::trace!(
                "{}: {} {} merged into {}",
                func.name(),
                width,
                if is_load { "loads" } else { "stores" },
                new
            );
            ctx.events
                .record(EventKind::AccessesMerged)
                .function(func.name())
                .pass(pass)
                .message(format!(
                    "{width} {} merged",
                    if is_load { "loads" } else { "stores" }
                ));
        }

        index = match (run.reordered, last_new.and_then(|id| func.position(id))) {
            (false, Some((_, position))) => position + 1,
            _ => index,
        };
    }
    Ok(merged)
}

impl FunctionPass for LoadStoreMergingPass {
    fn name(&self) -> &'static str {
        "load-store-merging"
    }

    fn description(&self) -> &'static str {
        "Merges adjacent scalar loads and stores into vector accesses"
    }

    fn run_on_function(
        &self,
        func: &mut Function,
        info: &ModuleInfo,
        ctx: &PassContext,
    ) -> Result<bool> {
        let mut merged = 0;
        for block in func.block_ids().collect::<Vec<_>>() {
            merged += merge_block(func, block, &info.layout, ctx, self.name())?;
        }
        if merged > 0 {
            log::debug!("{}: {merged} scalar accesses merged", func.name());
        }
        Ok(merged > 0)
    }
}
