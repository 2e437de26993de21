//! IR type system.
//!
//! Types are structural: two values have the same type exactly when their [`Type`]s compare
//! equal. Pointers are opaque and only carry the [`AddressSpace`] they point into; the element
//! type of a memory access travels with the instruction (load result type, GEP source type,
//! alloca type) instead of with the pointer.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Memory region a pointer refers to.
///
/// The numeric values match the address-space numbering used by the kernel front-end.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AddressSpace {
    /// Per-work-item stack memory.
    #[default]
    Private,
    /// Device global memory.
    Global,
    /// Read-only constant memory.
    Constant,
    /// Work-group shared memory.
    Local,
    /// Generic address space (language version 2.0 and later).
    Generic,
}

impl AddressSpace {
    /// Returns the front-end numbering of this address space.
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            AddressSpace::Private => 0,
            AddressSpace::Global => 1,
            AddressSpace::Constant => 2,
            AddressSpace::Local => 3,
            AddressSpace::Generic => 4,
        }
    }

    /// Maps a front-end address space number back to the enum.
    #[must_use]
    pub const fn from_number(number: u32) -> Option<Self> {
        match number {
            0 => Some(AddressSpace::Private),
            1 => Some(AddressSpace::Global),
            2 => Some(AddressSpace::Constant),
            3 => Some(AddressSpace::Local),
            4 => Some(AddressSpace::Generic),
            _ => None,
        }
    }
}

/// IEEE floating point formats.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
pub enum FloatKind {
    /// 16-bit half precision.
    #[strum(serialize = "half")]
    Half,
    /// 32-bit single precision.
    #[strum(serialize = "float")]
    Single,
    /// 64-bit double precision.
    #[strum(serialize = "double")]
    Double,
}

impl FloatKind {
    /// Width of the format in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            FloatKind::Half => 16,
            FloatKind::Single => 32,
            FloatKind::Double => 64,
        }
    }
}

/// The type of an IR value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    /// No value (function returns, stores, branches).
    Void,
    /// Integer of the given bit width.
    Int(u32),
    /// Floating point value.
    Float(FloatKind),
    /// Opaque pointer into an address space.
    Ptr(AddressSpace),
    /// Fixed-width vector of a scalar element type.
    Vector {
        /// Element type (always scalar)
        elem: Box<Type>,
        /// Number of lanes
        lanes: u32,
    },
    /// Fixed-length array.
    Array {
        /// Element type
        elem: Box<Type>,
        /// Number of elements
        len: u64,
    },
    /// Structure with ordered fields.
    Struct(Vec<Type>),
}

impl Type {
    /// 1-bit integer, the result type of comparisons.
    pub const BOOL: Type = Type::Int(1);
    /// 8-bit integer.
    pub const I8: Type = Type::Int(8);
    /// 32-bit integer.
    pub const I32: Type = Type::Int(32);
    /// 64-bit integer.
    pub const I64: Type = Type::Int(64);
    /// Single precision float.
    pub const F32: Type = Type::Float(FloatKind::Single);

    /// Creates a vector type.
    #[must_use]
    pub fn vector(elem: Type, lanes: u32) -> Type {
        Type::Vector {
            elem: Box::new(elem),
            lanes,
        }
    }

    /// Creates an array type.
    #[must_use]
    pub fn array(elem: Type, len: u64) -> Type {
        Type::Array {
            elem: Box::new(elem),
            len,
        }
    }

    /// Returns true for integer types.
    #[must_use]
    pub const fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    /// Returns the width of an integer type.
    #[must_use]
    pub const fn int_bits(&self) -> Option<u32> {
        match self {
            Type::Int(bits) => Some(*bits),
            _ => None,
        }
    }

    /// Returns true for pointer types.
    #[must_use]
    pub const fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    /// Returns the address space of a pointer type.
    #[must_use]
    pub const fn address_space(&self) -> Option<AddressSpace> {
        match self {
            Type::Ptr(space) => Some(*space),
            _ => None,
        }
    }

    /// Returns true for vector types.
    #[must_use]
    pub const fn is_vector(&self) -> bool {
        matches!(self, Type::Vector { .. })
    }

    /// Returns the lane count of a vector type.
    #[must_use]
    pub const fn lanes(&self) -> Option<u32> {
        match self {
            Type::Vector { lanes, .. } => Some(*lanes),
            _ => None,
        }
    }

    /// Returns the element type of a vector or array, or the type itself for scalars.
    #[must_use]
    pub fn scalar_type(&self) -> &Type {
        match self {
            Type::Vector { elem, .. } | Type::Array { elem, .. } => elem,
            other => other,
        }
    }

    /// Returns true for integers, floats and pointers.
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(self, Type::Int(_) | Type::Float(_) | Type::Ptr(_))
    }

    /// Returns true for struct and array types.
    #[must_use]
    pub const fn is_aggregate(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Array { .. })
    }

    /// Bit width of a scalar or vector value type, if it has a fixed one.
    ///
    /// Pointers have no intrinsic width; their size depends on the module's address size.
    #[must_use]
    pub fn primitive_bits(&self) -> Option<u32> {
        match self {
            Type::Int(bits) => Some(*bits),
            Type::Float(kind) => Some(kind.bits()),
            Type::Vector { elem, lanes } => elem.primitive_bits().map(|bits| bits * lanes),
            _ => None,
        }
    }

    /// Returns the type with the same shape as `self` but scalar `elem` per lane.
    #[must_use]
    pub fn with_scalar(&self, elem: Type) -> Type {
        match self {
            Type::Vector { lanes, .. } => Type::vector(elem, *lanes),
            _ => elem,
        }
    }

    /// Returns the type reached by indexing into an aggregate with a constant field index.
    #[must_use]
    pub fn field_type(&self, index: u64) -> Option<&Type> {
        match self {
            Type::Struct(fields) => usize::try_from(index).ok().and_then(|i| fields.get(i)),
            Type::Array { elem, .. } | Type::Vector { elem, .. } => Some(elem),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{bits}"),
            Type::Float(kind) => write!(f, "{kind}"),
            Type::Ptr(AddressSpace::Private) => write!(f, "ptr"),
            Type::Ptr(space) => write!(f, "ptr addrspace({})", space.number()),
            Type::Vector { elem, lanes } => write!(f, "<{lanes} x {elem}>"),
            Type::Array { elem, len } => write!(f, "[{len} x {elem}]"),
            Type::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Type::vector(Type::F32, 4).to_string(), "<4 x float>");
        assert_eq!(Type::Ptr(AddressSpace::Global).to_string(), "ptr addrspace(1)");
        assert_eq!(
            Type::Struct(vec![Type::I32, Type::array(Type::I8, 3)]).to_string(),
            "{ i32, [3 x i8] }"
        );
    }

    #[test]
    fn test_address_space_numbering() {
        for number in 0..5 {
            let space = AddressSpace::from_number(number).unwrap();
            assert_eq!(space.number(), number);
        }
        assert_eq!(AddressSpace::from_number(9), None);
        assert_eq!("local".parse::<AddressSpace>().unwrap(), AddressSpace::Local);
    }

    #[test]
    fn test_primitive_bits() {
        assert_eq!(Type::vector(Type::I8, 16).primitive_bits(), Some(128));
        assert_eq!(Type::Int(128).primitive_bits(), Some(128));
        assert_eq!(Type::Ptr(AddressSpace::Global).primitive_bits(), None);
    }
}
