//! Cursor-based instruction construction.
//!
//! [`InstBuilder`] inserts new instructions at a fixed point of a function: before an anchor
//! instruction, or at an index of a block that advances with every insertion (so consecutive
//! calls emit instructions in program order).
//!
//! # Example
//!
//! ```rust
//! use genlower::ir::{BinaryOp, Function, Param, Type, Value};
//!
//! let mut func = Function::new("add", vec![Param::new("a", Type::I32)], Type::I32);
//! let entry = func.add_block("entry");
//! let mut b = func.build_at_end(entry);
//! let one = b.const_int(32, 1);
//! let sum = b.binary(BinaryOp::Add, Value::Arg(0), one);
//! b.ret(Some(sum));
//! assert_eq!(func.block_insts(entry).len(), 2);
//! ```

use crate::{
    error::malformed_error,
    ir::{
        Access, BinaryOp, BlockId, CallConv, Callee, CastOp, Constant, FloatPredicate, Function,
        InstId, IntPredicate, Intrinsic, Op, Type, Value,
    },
    Result,
};

#[derive(Debug, Clone, Copy)]
enum InsertPoint {
    Before(InstId),
    At { block: BlockId, index: usize },
}

/// Inserts instructions into a function at a fixed point.
pub struct InstBuilder<'f> {
    func: &'f mut Function,
    point: InsertPoint,
}

impl<'f> InstBuilder<'f> {
    /// Builder inserting before `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when `anchor` is not linked into a block.
    pub fn before(func: &'f mut Function, anchor: InstId) -> Result<Self> {
        if !func.inst(anchor).is_live() {
            return Err(malformed_error!("insertion anchor {} is not linked", anchor));
        }
        Ok(Self {
            func,
            point: InsertPoint::Before(anchor),
        })
    }

    /// Builder inserting immediately after `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when `anchor` is not linked into a block.
    pub fn after(func: &'f mut Function, anchor: InstId) -> Result<Self> {
        let Some((block, index)) = func.position(anchor) else {
            return Err(malformed_error!("insertion anchor {} is not linked", anchor));
        };
        Ok(Self {
            func,
            point: InsertPoint::At {
                block,
                index: index + 1,
            },
        })
    }

    /// Builder appending to the end of `block`.
    pub fn at_end(func: &'f mut Function, block: BlockId) -> Self {
        let index = func.block_insts(block).len();
        Self {
            func,
            point: InsertPoint::At { block, index },
        }
    }

    /// Builder inserting at `index` of `block`.
    pub fn at(func: &'f mut Function, block: BlockId, index: usize) -> Self {
        Self {
            func,
            point: InsertPoint::At { block, index },
        }
    }

    /// Read access to the function being built.
    #[must_use]
    pub fn function(&self) -> &Function {
        self.func
    }

    /// Inserts an arbitrary op with the given result type.
    pub fn inst(&mut self, op: Op, ty: Type) -> InstId {
        match &mut self.point {
            InsertPoint::Before(anchor) => {
                let (block, index) = self
                    .func
                    .position(*anchor)
                    .unwrap_or((self.func.entry(), 0));
                self.func.insert_inst(block, index, op, ty)
            }
            InsertPoint::At { block, index } => {
                let id = self.func.insert_inst(*block, *index, op, ty);
                *index += 1;
                id
            }
        }
    }

    fn value(&mut self, op: Op, ty: Type) -> Value {
        Value::Inst(self.inst(op, ty))
    }

    /// Adds a constant to the function's pool.
    pub fn constant(&mut self, constant: Constant) -> Value {
        self.func.constant(constant)
    }

    /// Integer constant.
    pub fn const_int(&mut self, bits: u32, value: u64) -> Value {
        self.func.constant(Constant::int(bits, value))
    }

    /// Undefined value of a type.
    pub fn undef(&mut self, ty: Type) -> Value {
        self.func.constant(Constant::Undef(ty))
    }

    /// Binary operation; the result has the type of `lhs`.
    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.func.value_type(lhs);
        self.value(Op::Binary { op, lhs, rhs }, ty)
    }

    /// Integer comparison.
    pub fn icmp(&mut self, pred: IntPredicate, lhs: Value, rhs: Value) -> Value {
        let ty = self.func.value_type(lhs).with_scalar(Type::BOOL);
        self.value(Op::ICmp { pred, lhs, rhs }, ty)
    }

    /// Float comparison.
    pub fn fcmp(&mut self, pred: FloatPredicate, lhs: Value, rhs: Value) -> Value {
        let ty = self.func.value_type(lhs).with_scalar(Type::BOOL);
        self.value(Op::FCmp { pred, lhs, rhs }, ty)
    }

    /// Conversion to `ty`.
    pub fn cast(&mut self, op: CastOp, value: Value, ty: Type) -> Value {
        self.value(Op::Cast { op, value }, ty)
    }

    /// Select between two values.
    pub fn select(&mut self, cond: Value, on_true: Value, on_false: Value) -> Value {
        let ty = self.func.value_type(on_true);
        self.value(
            Op::Select {
                cond,
                on_true,
                on_false,
            },
            ty,
        )
    }

    /// Phi node.
    pub fn phi(&mut self, ty: Type, incoming: Vec<(Value, BlockId)>) -> Value {
        self.value(Op::Phi { incoming }, ty)
    }

    /// Stack allocation in the private address space.
    pub fn alloca(&mut self, allocated: Type, count: Option<Value>) -> Value {
        self.value(
            Op::Alloca {
                allocated,
                count,
                align: 0,
            },
            Type::Ptr(crate::ir::AddressSpace::Private),
        )
    }

    /// Simple load.
    pub fn load(&mut self, ty: Type, ptr: Value) -> Value {
        self.load_with(ty, ptr, 0, Access::Simple)
    }

    /// Load with explicit alignment and access mode.
    pub fn load_with(&mut self, ty: Type, ptr: Value, align: u32, access: Access) -> Value {
        self.value(Op::Load { ptr, align, access }, ty)
    }

    /// Simple store.
    pub fn store(&mut self, value: Value, ptr: Value) -> InstId {
        self.store_with(value, ptr, 0, Access::Simple)
    }

    /// Store with explicit alignment and access mode.
    pub fn store_with(&mut self, value: Value, ptr: Value, align: u32, access: Access) -> InstId {
        self.inst(
            Op::Store {
                value,
                ptr,
                align,
                access,
            },
            Type::Void,
        )
    }

    /// Structured address computation; the result has the type of `base`.
    pub fn gep(&mut self, source: Type, base: Value, indices: Vec<Value>) -> Value {
        let ty = self.func.value_type(base);
        self.value(
            Op::Gep {
                source,
                base,
                indices,
                inbounds: true,
            },
            ty,
        )
    }

    /// Reads one lane of a vector.
    pub fn extract_element(&mut self, vector: Value, index: Value) -> Value {
        let ty = self.func.value_type(vector).scalar_type().clone();
        self.value(Op::ExtractElement { vector, index }, ty)
    }

    /// Replaces one lane of a vector.
    pub fn insert_element(&mut self, vector: Value, element: Value, index: Value) -> Value {
        let ty = self.func.value_type(vector);
        self.value(
            Op::InsertElement {
                vector,
                element,
                index,
            },
            ty,
        )
    }

    /// Lane permutation of two vectors.
    pub fn shuffle(&mut self, lhs: Value, rhs: Value, mask: Vec<i32>) -> Value {
        let elem = self.func.value_type(lhs).scalar_type().clone();
        let ty = Type::vector(elem, mask.len() as u32);
        self.value(Op::ShuffleVector { lhs, rhs, mask }, ty)
    }

    /// Reads a member of an aggregate.
    pub fn extract_value(&mut self, aggregate: Value, indices: Vec<u32>) -> Value {
        let mut ty = self.func.value_type(aggregate);
        for index in &indices {
            ty = ty.field_type(u64::from(*index)).cloned().unwrap_or(Type::Void);
        }
        self.value(Op::ExtractValue { aggregate, indices }, ty)
    }

    /// Direct call.
    pub fn call(&mut self, name: impl Into<String>, args: Vec<Value>, ret: Type) -> Value {
        self.value(
            Op::Call {
                callee: Callee::Direct(name.into()),
                args,
                conv: CallConv::C,
            },
            ret,
        )
    }

    /// Call through a function pointer.
    pub fn call_indirect(&mut self, target: Value, args: Vec<Value>, ret: Type) -> Value {
        self.value(
            Op::Call {
                callee: Callee::Indirect(target),
                args,
                conv: CallConv::C,
            },
            ret,
        )
    }

    /// Intrinsic call.
    pub fn intrinsic(&mut self, intrinsic: Intrinsic, args: Vec<Value>, ty: Type) -> Value {
        self.value(Op::Intrinsic { intrinsic, args }, ty)
    }

    /// Unconditional branch.
    pub fn br(&mut self, target: BlockId) -> InstId {
        self.inst(Op::Br { target }, Type::Void)
    }

    /// Conditional branch.
    pub fn cond_br(&mut self, cond: Value, on_true: BlockId, on_false: BlockId) -> InstId {
        self.inst(
            Op::CondBr {
                cond,
                on_true,
                on_false,
            },
            Type::Void,
        )
    }

    /// Return.
    pub fn ret(&mut self, value: Option<Value>) -> InstId {
        self.inst(Op::Ret { value }, Type::Void)
    }

    /// Unreachable terminator.
    pub fn unreachable(&mut self) -> InstId {
        self.inst(Op::Unreachable, Type::Void)
    }

    /// Builds a vector from scalar lanes with an insertelement chain starting from undef.
    pub fn build_vector(&mut self, ty: Type, lanes: &[Value]) -> Value {
        let mut vector = self.undef(ty);
        for (i, lane) in lanes.iter().enumerate() {
            let index = self.const_int(32, i as u64);
            vector = self.insert_element(vector, *lane, index);
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Param;

    #[test]
    fn test_before_keeps_order() {
        let mut func = Function::new("f", vec![Param::new("a", Type::I32)], Type::Void);
        let entry = func.add_block("entry");
        let ret = func.build_at_end(entry).ret(None);
        let mut b = func.build_before(ret).unwrap();
        let first = b.binary(BinaryOp::Add, Value::Arg(0), Value::Arg(0));
        let second = b.binary(BinaryOp::Mul, first, first);
        let insts = func.block_insts(entry);
        assert_eq!(insts.len(), 3);
        assert_eq!(Value::Inst(insts[0]), first);
        assert_eq!(Value::Inst(insts[1]), second);
        assert_eq!(insts[2], ret);
    }

    #[test]
    fn test_after_advances() {
        let mut func = Function::new("f", vec![Param::new("a", Type::I32)], Type::Void);
        let entry = func.add_block("entry");
        let mut b = func.build_at_end(entry);
        let anchor = b.binary(BinaryOp::Add, Value::Arg(0), Value::Arg(0));
        b.ret(None);
        let anchor = anchor.as_inst().unwrap();
        let mut b = func.build_after(anchor).unwrap();
        let x = b.binary(BinaryOp::Sub, Value::Arg(0), Value::Arg(0));
        let y = b.binary(BinaryOp::Xor, x, x);
        assert_eq!(func.position(x.as_inst().unwrap()), Some((entry, 1)));
        assert_eq!(func.position(y.as_inst().unwrap()), Some((entry, 2)));
    }

    #[test]
    fn test_build_vector_types() {
        let mut func = Function::new("f", vec![Param::new("a", Type::F32)], Type::Void);
        let entry = func.add_block("entry");
        let mut b = func.build_at_end(entry);
        let vector = b.build_vector(Type::vector(Type::F32, 2), &[Value::Arg(0), Value::Arg(0)]);
        let lane = b.extract_element(vector, Value::Arg(0));
        assert_eq!(func.value_type(vector), Type::vector(Type::F32, 2));
        assert_eq!(func.value_type(lane), Type::F32);
    }
}
