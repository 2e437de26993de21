//! Constants and deferred constant expressions.
//!
//! Constants are owned by the function that uses them (see [`crate::ir::Function::constant`])
//! and referenced from instructions through [`crate::ir::Value::Const`]. A [`ConstExpr`] is a
//! computation over constants whose result is only known after layout or linking, such as the
//! address of a global converted to an integer. The backend cannot consume those, so they are
//! expanded into instructions early in the pipeline.

use serde::{Deserialize, Serialize};

use crate::ir::{AddressSpace, ApInt, BinaryOp, CastOp, FloatKind, IntPredicate, Type};

/// A compile-time constant value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    /// Integer constant; the width is the integer type width.
    Int(ApInt),
    /// Float constant stored as its raw IEEE bits.
    Float {
        /// Format of the value
        kind: FloatKind,
        /// Raw bits, right-aligned
        bits: u64,
    },
    /// Null pointer.
    Null(AddressSpace),
    /// Undefined value of the given type.
    Undef(Type),
    /// All-zero value of the given type.
    Zero(Type),
    /// Vector built from per-lane constants.
    Vector(Vec<Constant>),
    /// Struct or array built from per-field constants.
    Aggregate {
        /// Aggregate type
        ty: Type,
        /// Field or element values
        fields: Vec<Constant>,
    },
    /// Address of a function.
    Function {
        /// Function name
        name: String,
        /// Address space of the resulting pointer
        space: AddressSpace,
    },
    /// Address of a global variable.
    Global {
        /// Global name
        name: String,
        /// Address space of the resulting pointer
        space: AddressSpace,
    },
    /// Deferred constant expression.
    Expr(Box<ConstExpr>),
}

/// A constant expression: an instruction-shaped computation over constant operands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstExpr {
    /// Conversion.
    Cast {
        /// Cast kind
        op: CastOp,
        /// Operand
        value: Constant,
        /// Result type
        ty: Type,
    },
    /// Binary arithmetic.
    Binary {
        /// Operation
        op: BinaryOp,
        /// Left operand
        lhs: Constant,
        /// Right operand
        rhs: Constant,
    },
    /// Integer comparison.
    ICmp {
        /// Predicate
        pred: IntPredicate,
        /// Left operand
        lhs: Constant,
        /// Right operand
        rhs: Constant,
    },
    /// Structured address computation.
    Gep {
        /// Type indexed by the first index
        source: Type,
        /// Base pointer
        base: Constant,
        /// Indices
        indices: Vec<Constant>,
    },
}

impl Constant {
    /// Integer constant of the given width.
    #[must_use]
    pub fn int(bits: u32, value: u64) -> Constant {
        Constant::Int(ApInt::new(bits, value))
    }

    /// 32-bit float constant.
    #[must_use]
    pub fn f32(value: f32) -> Constant {
        Constant::Float {
            kind: FloatKind::Single,
            bits: u64::from(value.to_bits()),
        }
    }

    /// Boolean constant.
    #[must_use]
    pub fn bool(value: bool) -> Constant {
        Constant::int(1, u64::from(value))
    }

    /// Returns the type of this constant.
    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            Constant::Int(value) => Type::Int(value.bits()),
            Constant::Float { kind, .. } => Type::Float(*kind),
            Constant::Null(space)
            | Constant::Function { space, .. }
            | Constant::Global { space, .. } => Type::Ptr(*space),
            Constant::Undef(ty) | Constant::Zero(ty) | Constant::Aggregate { ty, .. } => ty.clone(),
            Constant::Vector(lanes) => {
                let elem = lanes.first().map_or(Type::Void, Constant::ty);
                Type::vector(elem, lanes.len() as u32)
            }
            Constant::Expr(expr) => expr.ty(),
        }
    }

    /// Returns the integer payload.
    #[must_use]
    pub fn as_int(&self) -> Option<&ApInt> {
        match self {
            Constant::Int(value) => Some(value),
            _ => None,
        }
    }

    /// Returns true for a constant expression or an aggregate/vector containing one.
    #[must_use]
    pub fn contains_expr(&self) -> bool {
        match self {
            Constant::Expr(_) => true,
            Constant::Vector(lanes) => lanes.iter().any(Constant::contains_expr),
            Constant::Aggregate { fields, .. } => fields.iter().any(Constant::contains_expr),
            _ => false,
        }
    }

    /// Returns true when all bits of the constant are zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            Constant::Int(value) => value.is_zero(),
            Constant::Float { bits, .. } => *bits == 0,
            Constant::Null(_) | Constant::Zero(_) => true,
            Constant::Vector(lanes) => lanes.iter().all(Constant::is_zero),
            _ => false,
        }
    }

    /// Returns true when the constant is undefined.
    #[must_use]
    pub const fn is_undef(&self) -> bool {
        matches!(self, Constant::Undef(_))
    }

    /// Returns the constant for lane `index` of a vector-typed constant.
    ///
    /// Zero and undef vectors yield zero and undef scalars of the element type.
    #[must_use]
    pub fn lane(&self, index: usize) -> Option<Constant> {
        match self {
            Constant::Vector(lanes) => lanes.get(index).cloned(),
            Constant::Zero(Type::Vector { elem, .. }) => Some(Constant::zero_of(elem)),
            Constant::Undef(Type::Vector { elem, .. }) => Some(Constant::Undef((**elem).clone())),
            _ => None,
        }
    }

    /// Returns the canonical zero value of a type.
    #[must_use]
    pub fn zero_of(ty: &Type) -> Constant {
        match ty {
            Type::Int(bits) => Constant::int(*bits, 0),
            Type::Float(kind) => Constant::Float { kind: *kind, bits: 0 },
            Type::Ptr(space) => Constant::Null(*space),
            other => Constant::Zero(other.clone()),
        }
    }

    /// Returns the field at `index` of an aggregate constant.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&Constant> {
        match self {
            Constant::Aggregate { fields, .. } => fields.get(index),
            _ => None,
        }
    }

    /// Strips pointer-preserving cast expressions.
    #[must_use]
    pub fn strip_casts(&self) -> &Constant {
        match self {
            Constant::Expr(expr) => match expr.as_ref() {
                ConstExpr::Cast {
                    op: CastOp::BitCast | CastOp::AddrSpaceCast,
                    value,
                    ..
                } => value.strip_casts(),
                _ => self,
            },
            _ => self,
        }
    }
}

impl ConstExpr {
    /// Result type of the expression.
    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            ConstExpr::Cast { ty, .. } => ty.clone(),
            ConstExpr::Binary { lhs, .. } => lhs.ty(),
            ConstExpr::ICmp { lhs, .. } => lhs.ty().with_scalar(Type::BOOL),
            ConstExpr::Gep { base, .. } => base.ty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_of_special_vectors() {
        let zero = Constant::Zero(Type::vector(Type::F32, 4));
        assert_eq!(zero.lane(2), Some(Constant::f32(0.0)));
        let undef = Constant::Undef(Type::vector(Type::I32, 2));
        assert_eq!(undef.lane(1), Some(Constant::Undef(Type::I32)));
        let vector = Constant::Vector(vec![Constant::int(32, 1), Constant::int(32, 2)]);
        assert_eq!(vector.lane(1), Some(Constant::int(32, 2)));
        assert_eq!(vector.ty(), Type::vector(Type::I32, 2));
    }

    #[test]
    fn test_contains_expr() {
        let expr = Constant::Expr(Box::new(ConstExpr::Cast {
            op: CastOp::PtrToInt,
            value: Constant::Global {
                name: "g".into(),
                space: AddressSpace::Global,
            },
            ty: Type::I64,
        }));
        assert!(expr.contains_expr());
        assert!(Constant::Vector(vec![Constant::int(64, 0), expr]).contains_expr());
        assert!(!Constant::int(64, 0).contains_expr());
    }
}
