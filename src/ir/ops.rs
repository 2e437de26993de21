//! Instruction operations.
//!
//! This module defines [`Op`], the tagged sum type over every instruction kind the pipeline
//! understands. Passes dispatch on it with one `match` arm per kind instead of querying
//! instruction classes at run time.
//!
//! # Field Documentation
//!
//! The struct fields in this module follow a consistent naming convention:
//! - `lhs`, `rhs`: Binary operands
//! - `value`: A value being converted or stored
//! - `ptr`: Address of a memory operation
//! - `base`, `indices`: Structured address computation
//! - `vector`, `index`, `element`: Vector lane access
//! - `aggregate`, `indices`: Struct/array member access (constant path)
//! - `target`, `on_true`, `on_false`: Branch targets
//!
//! The result type of an instruction is stored next to the op in
//! [`crate::ir::Instruction`], not inside the op.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::ir::{BlockId, Type, Value};

/// Two-operand arithmetic and bitwise operations.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinaryOp {
    /// Returns true when `a op b == b op a`.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
                | BinaryOp::FAdd
                | BinaryOp::FMul
        )
    }
}

/// Conversions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FPTrunc,
    FPExt,
    FPToUI,
    FPToSI,
    UIToFP,
    SIToFP,
    PtrToInt,
    IntToPtr,
    BitCast,
    AddrSpaceCast,
}

/// Integer comparison predicates.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IntPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl IntPredicate {
    /// Returns true for eq/ne.
    #[must_use]
    pub const fn is_equality(self) -> bool {
        matches!(self, IntPredicate::Eq | IntPredicate::Ne)
    }

    /// Returns true for the signed orderings.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            IntPredicate::Sgt | IntPredicate::Sge | IntPredicate::Slt | IntPredicate::Sle
        )
    }

    /// Predicate with swapped operands (`a < b` becomes `b > a`).
    #[must_use]
    pub const fn swapped(self) -> Self {
        match self {
            IntPredicate::Eq => IntPredicate::Eq,
            IntPredicate::Ne => IntPredicate::Ne,
            IntPredicate::Ugt => IntPredicate::Ult,
            IntPredicate::Uge => IntPredicate::Ule,
            IntPredicate::Ult => IntPredicate::Ugt,
            IntPredicate::Ule => IntPredicate::Uge,
            IntPredicate::Sgt => IntPredicate::Slt,
            IntPredicate::Sge => IntPredicate::Sle,
            IntPredicate::Slt => IntPredicate::Sgt,
            IntPredicate::Sle => IntPredicate::Sge,
        }
    }
}

/// Float comparison predicates.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FloatPredicate {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Uno,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    True,
}

/// Memory access ordering of a load or store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Simple,
    Volatile,
    Atomic,
}

/// Calling conventions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CallConv {
    /// Platform-neutral C convention.
    #[default]
    C,
    /// Kernel entry convention emitted by some front-ends.
    SpirKernel,
    /// Device function convention emitted by some front-ends.
    SpirFunc,
    /// Fast convention.
    Fast,
}

/// Target-independent intrinsics.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Intrinsic {
    Fabs,
    Sqrt,
    Sin,
    Cos,
    Exp2,
    Log2,
    Floor,
    Ceil,
    Trunc,
    Rint,
    Fma,
    Pow,
    Minnum,
    Maxnum,
    Ctpop,
    Ctlz,
    Cttz,
    Bswap,
    Memcpy,
    Memset,
    LifetimeStart,
    LifetimeEnd,
}

impl Intrinsic {
    /// Returns true when the intrinsic operates lane by lane on vector operands.
    #[must_use]
    pub const fn per_component(self) -> bool {
        !matches!(
            self,
            Intrinsic::Memcpy | Intrinsic::Memset | Intrinsic::LifetimeStart | Intrinsic::LifetimeEnd
        )
    }

    /// Returns true when the intrinsic reads or writes memory.
    #[must_use]
    pub const fn touches_memory(self) -> bool {
        matches!(self, Intrinsic::Memcpy | Intrinsic::Memset)
    }
}

/// Call target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callee {
    /// Call of a named function.
    Direct(String),
    /// Call through a function pointer.
    Indirect(Value),
}

/// An IR operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    // ========================================================================
    // Arithmetic and comparison
    // ========================================================================
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    ICmp {
        pred: IntPredicate,
        lhs: Value,
        rhs: Value,
    },
    FCmp {
        pred: FloatPredicate,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        op: CastOp,
        value: Value,
    },
    Select {
        cond: Value,
        on_true: Value,
        on_false: Value,
    },
    Phi {
        incoming: Vec<(Value, BlockId)>,
    },

    // ========================================================================
    // Memory
    // ========================================================================
    Alloca {
        allocated: Type,
        count: Option<Value>,
        align: u32,
    },
    Load {
        ptr: Value,
        align: u32,
        access: Access,
    },
    Store {
        value: Value,
        ptr: Value,
        align: u32,
        access: Access,
    },
    Gep {
        source: Type,
        base: Value,
        indices: Vec<Value>,
        inbounds: bool,
    },

    // ========================================================================
    // Vectors and aggregates
    // ========================================================================
    ExtractElement {
        vector: Value,
        index: Value,
    },
    InsertElement {
        vector: Value,
        element: Value,
        index: Value,
    },
    ShuffleVector {
        lhs: Value,
        rhs: Value,
        mask: Vec<i32>,
    },
    ExtractValue {
        aggregate: Value,
        indices: Vec<u32>,
    },
    InsertValue {
        aggregate: Value,
        element: Value,
        indices: Vec<u32>,
    },

    // ========================================================================
    // Calls
    // ========================================================================
    Call {
        callee: Callee,
        args: Vec<Value>,
        conv: CallConv,
    },
    Intrinsic {
        intrinsic: Intrinsic,
        args: Vec<Value>,
    },
    LandingPad {
        clauses: Vec<Value>,
    },

    // ========================================================================
    // Terminators
    // ========================================================================
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Value,
        on_true: BlockId,
        on_false: BlockId,
    },
    Ret {
        value: Option<Value>,
    },
    Unreachable,

    /// Placeholder left behind after an instruction has been detached from its operands.
    Detached,
}

impl Op {
    /// Returns the operand values in a fixed order.
    ///
    /// For phi nodes these are the incoming values; block labels are not values.
    #[must_use]
    pub fn operands(&self) -> Vec<Value> {
        let mut operands = Vec::new();
        self.visit_operands(|v| operands.push(v));
        operands
    }

    /// Calls `f` for every operand value.
    pub fn visit_operands(&self, mut f: impl FnMut(Value)) {
        match self {
            Op::Binary { lhs, rhs, .. } | Op::ICmp { lhs, rhs, .. } | Op::FCmp { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            Op::Cast { value, .. } => f(*value),
            Op::Select {
                cond,
                on_true,
                on_false,
            } => {
                f(*cond);
                f(*on_true);
                f(*on_false);
            }
            Op::Phi { incoming } => incoming.iter().for_each(|(v, _)| f(*v)),
            Op::Alloca { count, .. } => {
                if let Some(count) = count {
                    f(*count);
                }
            }
            Op::Load { ptr, .. } => f(*ptr),
            Op::Store { value, ptr, .. } => {
                f(*value);
                f(*ptr);
            }
            Op::Gep { base, indices, .. } => {
                f(*base);
                indices.iter().for_each(|v| f(*v));
            }
            Op::ExtractElement { vector, index } => {
                f(*vector);
                f(*index);
            }
            Op::InsertElement {
                vector,
                element,
                index,
            } => {
                f(*vector);
                f(*element);
                f(*index);
            }
            Op::ShuffleVector { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            Op::ExtractValue { aggregate, .. } => f(*aggregate),
            Op::InsertValue {
                aggregate, element, ..
            } => {
                f(*aggregate);
                f(*element);
            }
            Op::Call { callee, args, .. } => {
                if let Callee::Indirect(target) = callee {
                    f(*target);
                }
                args.iter().for_each(|v| f(*v));
            }
            Op::Intrinsic { args, .. } => args.iter().for_each(|v| f(*v)),
            Op::LandingPad { clauses } => clauses.iter().for_each(|v| f(*v)),
            Op::CondBr { cond, .. } => f(*cond),
            Op::Ret { value } => {
                if let Some(value) = value {
                    f(*value);
                }
            }
            Op::Br { .. } | Op::Unreachable | Op::Detached => {}
        }
    }

    /// Calls `f` with a mutable reference to every operand value.
    pub fn visit_operands_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        match self {
            Op::Binary { lhs, rhs, .. } | Op::ICmp { lhs, rhs, .. } | Op::FCmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Op::Cast { value, .. } => f(value),
            Op::Select {
                cond,
                on_true,
                on_false,
            } => {
                f(cond);
                f(on_true);
                f(on_false);
            }
            Op::Phi { incoming } => incoming.iter_mut().for_each(|(v, _)| f(v)),
            Op::Alloca { count, .. } => {
                if let Some(count) = count {
                    f(count);
                }
            }
            Op::Load { ptr, .. } => f(ptr),
            Op::Store { value, ptr, .. } => {
                f(value);
                f(ptr);
            }
            Op::Gep { base, indices, .. } => {
                f(base);
                indices.iter_mut().for_each(f);
            }
            Op::ExtractElement { vector, index } => {
                f(vector);
                f(index);
            }
            Op::InsertElement {
                vector,
                element,
                index,
            } => {
                f(vector);
                f(element);
                f(index);
            }
            Op::ShuffleVector { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Op::ExtractValue { aggregate, .. } => f(aggregate),
            Op::InsertValue {
                aggregate, element, ..
            } => {
                f(aggregate);
                f(element);
            }
            Op::Call { callee, args, .. } => {
                if let Callee::Indirect(target) = callee {
                    f(target);
                }
                args.iter_mut().for_each(f);
            }
            Op::Intrinsic { args, .. } => args.iter_mut().for_each(f),
            Op::LandingPad { clauses } => clauses.iter_mut().for_each(f),
            Op::CondBr { cond, .. } => f(cond),
            Op::Ret { value } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            Op::Br { .. } | Op::Unreachable | Op::Detached => {}
        }
    }

    /// Replaces every operand equal to `from` with `to`. Returns true if any operand changed.
    pub fn replace_operand(&mut self, from: Value, to: Value) -> bool {
        let mut changed = false;
        self.visit_operands_mut(|v| {
            if *v == from {
                *v = to;
                changed = true;
            }
        });
        changed
    }

    /// Returns true for block terminators.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Br { .. } | Op::CondBr { .. } | Op::Ret { .. } | Op::Unreachable
        )
    }

    /// Returns true for phi nodes.
    #[must_use]
    pub const fn is_phi(&self) -> bool {
        matches!(self, Op::Phi { .. })
    }

    /// Returns the control-flow successors of a terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Op::Br { target } => vec![*target],
            Op::CondBr {
                on_true, on_false, ..
            } => {
                if on_true == on_false {
                    vec![*on_true]
                } else {
                    vec![*on_true, *on_false]
                }
            }
            _ => Vec::new(),
        }
    }

    /// Rewrites block references (branch targets and phi predecessors) from `from` to `to`.
    pub fn replace_block(&mut self, from: BlockId, to: BlockId) {
        let swap = |b: &mut BlockId| {
            if *b == from {
                *b = to;
            }
        };
        match self {
            Op::Br { target } => swap(target),
            Op::CondBr {
                on_true, on_false, ..
            } => {
                swap(on_true);
                swap(on_false);
            }
            Op::Phi { incoming } => incoming.iter_mut().for_each(|(_, b)| swap(b)),
            _ => {}
        }
    }

    /// Returns true when executing the operation may have an effect besides its result.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        match self {
            Op::Store { .. } | Op::Call { .. } | Op::LandingPad { .. } => true,
            Op::Load { access, .. } => *access != Access::Simple,
            Op::Intrinsic { intrinsic, .. } => !intrinsic.per_component(),
            other => other.is_terminator(),
        }
    }

    /// Short name used by the printer and in log messages.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Binary { op, .. } => op.into(),
            Op::ICmp { .. } => "icmp",
            Op::FCmp { .. } => "fcmp",
            Op::Cast { op, .. } => op.into(),
            Op::Select { .. } => "select",
            Op::Phi { .. } => "phi",
            Op::Alloca { .. } => "alloca",
            Op::Load { .. } => "load",
            Op::Store { .. } => "store",
            Op::Gep { .. } => "getelementptr",
            Op::ExtractElement { .. } => "extractelement",
            Op::InsertElement { .. } => "insertelement",
            Op::ShuffleVector { .. } => "shufflevector",
            Op::ExtractValue { .. } => "extractvalue",
            Op::InsertValue { .. } => "insertvalue",
            Op::Call { .. } => "call",
            Op::Intrinsic { .. } => "call",
            Op::LandingPad { .. } => "landingpad",
            Op::Br { .. } | Op::CondBr { .. } => "br",
            Op::Ret { .. } => "ret",
            Op::Unreachable => "unreachable",
            Op::Detached => "detached",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InstId;

    #[test]
    fn test_replace_operand() {
        let a = Value::Inst(InstId::new(1));
        let b = Value::Inst(InstId::new(2));
        let mut op = Op::Binary {
            op: BinaryOp::Add,
            lhs: a,
            rhs: a,
        };
        assert!(op.replace_operand(a, b));
        assert_eq!(op.operands(), vec![b, b]);
        assert!(!op.replace_operand(a, b));
    }

    #[test]
    fn test_successors_and_block_rewrite() {
        let mut op = Op::CondBr {
            cond: Value::Arg(0),
            on_true: BlockId::new(1),
            on_false: BlockId::new(2),
        };
        assert_eq!(op.successors(), vec![BlockId::new(1), BlockId::new(2)]);
        op.replace_block(BlockId::new(2), BlockId::new(1));
        assert_eq!(op.successors(), vec![BlockId::new(1)]);
        assert!(op.is_terminator());
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(BinaryOp::LShr.to_string(), "lshr");
        assert_eq!(CastOp::PtrToInt.to_string(), "ptrtoint");
        assert_eq!("ule".parse::<IntPredicate>().unwrap(), IntPredicate::Ule);
        assert_eq!(Intrinsic::LifetimeStart.to_string(), "lifetime_start");
        assert!(!Intrinsic::Memcpy.per_component());
    }
}
