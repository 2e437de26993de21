//! Target size and alignment model.
//!
//! A 3-lane vector occupies and aligns like a 4-lane vector; everything else follows the usual
//! C rules, with a struct aligned to its most aligned field. All byte offsets produced by
//! address lowering come from this model.
//!
//! ```text
//! struct { float3 a; float b; }      a: offset 0, size 16
//!                                     b: offset 16, size 4
//!                                     align 16, size 32
//! float3 v[2]                         stride 16, v[1] at offset 16
//! ```

use crate::ir::Type;

/// Bytes needed to advance `offset` to a multiple of `align`.
#[must_use]
pub const fn padding(offset: u64, align: u64) -> u64 {
    if align == 0 {
        return 0;
    }
    (align - offset % align) % align
}

/// Size and alignment queries for one address size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    pointer_bytes: u32,
}

impl DataLayout {
    /// Creates a layout with the given pointer size in bytes.
    #[must_use]
    pub const fn new(pointer_bytes: u32) -> Self {
        Self { pointer_bytes }
    }

    /// Address size in bytes.
    #[must_use]
    pub const fn pointer_bytes(&self) -> u32 {
        self.pointer_bytes
    }

    /// Address size in bits.
    #[must_use]
    pub const fn pointer_bits(&self) -> u32 {
        self.pointer_bytes * 8
    }

    fn scalar_bytes(&self, ty: &Type) -> u64 {
        match ty {
            Type::Int(bits) => u64::from(bits.div_ceil(8)).max(1),
            Type::Float(kind) => u64::from(kind.bits() / 8),
            Type::Ptr(_) => u64::from(self.pointer_bytes),
            _ => 0,
        }
    }

    /// ABI alignment of a type in bytes.
    #[must_use]
    pub fn align_of(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void => 1,
            Type::Int(_) | Type::Float(_) | Type::Ptr(_) => self.scalar_bytes(ty),
            Type::Vector { elem, lanes } => {
                let lanes = if *lanes == 3 { 4 } else { u64::from(*lanes) };
                lanes * self.scalar_bytes(elem)
            }
            Type::Array { elem, .. } => self.align_of(elem),
            Type::Struct(fields) => fields
                .iter()
                .map(|f| self.align_of(f))
                .max()
                .unwrap_or(1),
        }
    }

    /// Allocation size of a type in bytes, including trailing padding.
    #[must_use]
    pub fn size_of(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void => 0,
            Type::Int(_) | Type::Float(_) | Type::Ptr(_) => self.scalar_bytes(ty),
            Type::Vector { .. } => self.align_of(ty),
            Type::Array { elem, len } => self.stride_of(elem) * len,
            Type::Struct(fields) => {
                let mut offset = 0;
                for field in fields {
                    offset += padding(offset, self.align_of(field));
                    offset += self.size_of(field);
                }
                offset + padding(offset, self.align_of(ty))
            }
        }
    }

    /// Distance in bytes between consecutive array elements of type `ty`.
    #[must_use]
    pub fn stride_of(&self, ty: &Type) -> u64 {
        let size = self.size_of(ty);
        size + padding(size, self.align_of(ty))
    }

    /// Bytes written by a store of `ty` (no trailing padding, 3-lane vectors count 3 lanes).
    #[must_use]
    pub fn store_size(&self, ty: &Type) -> u64 {
        match ty {
            Type::Vector { elem, lanes } => u64::from(*lanes) * self.scalar_bytes(elem),
            other => self.size_of(other),
        }
    }

    /// Byte offset of field `index` within a struct type.
    #[must_use]
    pub fn field_offset(&self, fields: &[Type], index: usize) -> u64 {
        let mut offset = 0;
        for field in &fields[..index.min(fields.len())] {
            offset += padding(offset, self.align_of(field));
            offset += self.size_of(field);
        }
        if let Some(field) = fields.get(index) {
            offset += padding(offset, self.align_of(field));
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::AddressSpace;

    #[test]
    fn test_vec3_counts_as_vec4() {
        let layout = DataLayout::new(8);
        let float3 = Type::vector(Type::F32, 3);
        assert_eq!(layout.size_of(&float3), 16);
        assert_eq!(layout.align_of(&float3), 16);
        assert_eq!(layout.stride_of(&float3), 16);
        assert_eq!(layout.size_of(&Type::array(float3, 4)), 64);
    }

    #[test]
    fn test_struct_padding() {
        let layout = DataLayout::new(4);
        let fields = vec![Type::I8, Type::I32, Type::Int(16), Type::Ptr(AddressSpace::Global)];
        assert_eq!(layout.field_offset(&fields, 0), 0);
        assert_eq!(layout.field_offset(&fields, 1), 4);
        assert_eq!(layout.field_offset(&fields, 2), 8);
        assert_eq!(layout.field_offset(&fields, 3), 12);
        assert_eq!(layout.size_of(&Type::Struct(fields)), 16);
    }

    #[test]
    fn test_struct_aligned_to_widest_field() {
        let layout = DataLayout::new(8);
        let ty = Type::Struct(vec![Type::vector(Type::F32, 4), Type::F32]);
        assert_eq!(layout.align_of(&ty), 16);
        assert_eq!(layout.size_of(&ty), 32);
        assert_eq!(layout.stride_of(&ty), 32);
        assert_eq!(layout.size_of(&Type::array(ty, 2)), 64);

        let small = Type::Struct(vec![Type::I64, Type::I8]);
        assert_eq!(layout.align_of(&small), 8);
        assert_eq!(layout.size_of(&small), 16);
    }

    #[test]
    fn test_padding() {
        assert_eq!(padding(5, 4), 3);
        assert_eq!(padding(8, 4), 0);
        assert_eq!(padding(3, 0), 0);
    }
}
