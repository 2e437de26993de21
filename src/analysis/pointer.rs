//! Symbolic decomposition of addresses.
//!
//! An [`AddressExpr`] describes a pointer (or an integer used as an address) as
//!
//! ```text
//! base + Σ scale_i · value_i + offset
//! ```
//!
//! where `base` is an opaque pointer root, every `value_i` is an opaque integer and `offset`
//! is a byte constant. The decomposition looks through structured address computation,
//! pointer casts, the `ptrtoint`/`inttoptr` pairs produced by GEP lowering, additions and
//! subtractions, and multiplications or left shifts by constants. Anything else becomes a
//! leaf.
//!
//! Two addresses are a constant distance apart exactly when their bases and scaled terms
//! agree, which is what the memory access merger needs to recognize consecutive accesses.

use std::collections::BTreeMap;

use crate::ir::{BinaryOp, CastOp, DataLayout, Function, Op, Type, Value};

/// Maximum recursion depth when following definitions.
const MAX_DEPTH: u32 = 24;

/// Linear decomposition of an address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressExpr {
    /// Opaque pointer root, if the expression contains one
    pub base: Option<Value>,
    /// Scaled opaque integer terms (no zero scales)
    pub terms: BTreeMap<Value, i64>,
    /// Constant byte offset
    pub offset: i64,
}

impl AddressExpr {
    /// Decomposes `value` as far as its definitions allow.
    #[must_use]
    pub fn of(func: &Function, layout: &DataLayout, value: Value) -> Self {
        Decomposer { func, layout }.decompose(value, 0)
    }

    fn leaf(func: &Function, value: Value) -> Self {
        if func.value_type(value).is_ptr() {
            Self {
                base: Some(value),
                ..Self::default()
            }
        } else {
            Self {
                terms: BTreeMap::from([(value, 1)]),
                ..Self::default()
            }
        }
    }

    fn constant(offset: i64) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    fn add_term(&mut self, value: Value, scale: i64) {
        let entry = self.terms.entry(value).or_insert(0);
        *entry = entry.wrapping_add(scale);
        if *entry == 0 {
            self.terms.remove(&value);
        }
    }

    /// Turns the base into an ordinary term so the expression can be scaled or negated.
    fn demote_base(&mut self) {
        if let Some(base) = self.base.take() {
            self.add_term(base, 1);
        }
    }

    fn add(mut self, other: Self) -> Self {
        let mut other = other;
        match (self.base, other.base) {
            (None, Some(_)) => self.base = other.base.take(),
            (Some(_), Some(_)) => other.demote_base(),
            _ => {}
        }
        for (value, scale) in other.terms {
            self.add_term(value, scale);
        }
        self.offset = self.offset.wrapping_add(other.offset);
        self
    }

    fn scale(mut self, factor: i64) -> Self {
        if factor != 1 {
            self.demote_base();
            self.terms = self
                .terms
                .into_iter()
                .map(|(v, s)| (v, s.wrapping_mul(factor)))
                .filter(|(_, s)| *s != 0)
                .collect();
            self.offset = self.offset.wrapping_mul(factor);
        }
        self
    }

    /// Returns `self - other` when the two addresses differ by a constant.
    #[must_use]
    pub fn constant_difference(&self, other: &Self) -> Option<i64> {
        (self.base == other.base && self.terms == other.terms)
            .then(|| self.offset.wrapping_sub(other.offset))
    }

    /// Returns true when the expression is a plain constant.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.base.is_none() && self.terms.is_empty()
    }
}

struct Decomposer<'a> {
    func: &'a Function,
    layout: &'a DataLayout,
}

impl Decomposer<'_> {
    fn decompose(&self, value: Value, depth: u32) -> AddressExpr {
        if let Some(constant) = self.func.as_constant(value) {
            if let Some(v) = constant.as_int().and_then(|v| v.to_i64()) {
                return AddressExpr::constant(v);
            }
            if constant.is_zero() {
                return AddressExpr::constant(0);
            }
        }
        if depth >= MAX_DEPTH {
            return AddressExpr::leaf(self.func, value);
        }
        let Some(op) = self.func.def_op(value) else {
            return AddressExpr::leaf(self.func, value);
        };
        match op {
            Op::Cast {
                op:
                    CastOp::BitCast
                    | CastOp::AddrSpaceCast
                    | CastOp::PtrToInt
                    | CastOp::IntToPtr
                    | CastOp::SExt
                    | CastOp::ZExt,
                value: inner,
            } => self.decompose(*inner, depth + 1),
            Op::Binary { op, lhs, rhs } => match op {
                BinaryOp::Add => self
                    .decompose(*lhs, depth + 1)
                    .add(self.decompose(*rhs, depth + 1)),
                BinaryOp::Sub => self
                    .decompose(*lhs, depth + 1)
                    .add(self.decompose(*rhs, depth + 1).scale(-1)),
                BinaryOp::Mul => match (self.func.const_int(*lhs), self.func.const_int(*rhs)) {
                    (_, Some(c)) => self.decompose(*lhs, depth + 1).scale(c),
                    (Some(c), _) => self.decompose(*rhs, depth + 1).scale(c),
                    _ => AddressExpr::leaf(self.func, value),
                },
                BinaryOp::Shl => match self.func.const_int(*rhs) {
                    Some(amount @ 0..=62) => self.decompose(*lhs, depth + 1).scale(1 << amount),
                    _ => AddressExpr::leaf(self.func, value),
                },
                _ => AddressExpr::leaf(self.func, value),
            },
            Op::Gep {
                source,
                base,
                indices,
                ..
            } => self.decompose_gep(source, *base, indices, depth),
            _ => AddressExpr::leaf(self.func, value),
        }
    }

    fn decompose_gep(&self, source: &Type, base: Value, indices: &[Value], depth: u32) -> AddressExpr {
        let mut expr = self.decompose(base, depth + 1);
        let mut current = source.clone();
        for (position, index) in indices.iter().enumerate() {
            let (stride, next) = if position == 0 {
                (self.layout.stride_of(&current), current.clone())
            } else {
                match &current {
                    Type::Struct(fields) => {
                        let Some(field) = self.func.const_int(*index) else {
                            return expr.add(AddressExpr::leaf(self.func, *index));
                        };
                        let field = usize::try_from(field).unwrap_or(usize::MAX);
                        let offset = self.layout.field_offset(fields, field);
                        expr = expr.add(AddressExpr::constant(offset as i64));
                        current = fields.get(field).cloned().unwrap_or(Type::Void);
                        continue;
                    }
                    Type::Array { elem, .. } | Type::Vector { elem, .. } => {
                        (self.layout.stride_of(elem), (**elem).clone())
                    }
                    _ => (0, Type::Void),
                }
            };
            let scaled = self.decompose(*index, depth + 1).scale(stride as i64);
            expr = expr.add(scaled);
            current = next;
        }
        expr
    }
}
