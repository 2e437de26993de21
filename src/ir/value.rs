//! Value handles.
//!
//! Every SSA value is addressed by a small `Copy` handle instead of a reference, which keeps
//! instruction operands independent of where the defining object is stored. Handles are only
//! meaningful together with the [`crate::ir::Function`] that owns the referenced arena slot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of an instruction within its function's instruction arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct InstId(pub(crate) u32);

impl InstId {
    /// Creates an id from a raw arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Index of a basic block within its function.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Creates an id from a raw block index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the block index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Index of a constant within its function's constant pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct ConstId(pub(crate) u32);

impl ConstId {
    /// Returns the pool index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// An SSA value: an instruction result, a function parameter, or a pooled constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Result of an instruction.
    Inst(InstId),
    /// Function parameter by position.
    Arg(u32),
    /// Constant from the function's pool.
    Const(ConstId),
}

impl Value {
    /// Returns the defining instruction, if any.
    #[must_use]
    pub const fn as_inst(self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the constant pool id, if this is a constant.
    #[must_use]
    pub const fn as_const(self) -> Option<ConstId> {
        match self {
            Value::Const(id) => Some(id),
            _ => None,
        }
    }

    /// Returns true for function parameters.
    #[must_use]
    pub const fn is_arg(self) -> bool {
        matches!(self, Value::Arg(_))
    }
}

impl From<InstId> for Value {
    fn from(id: InstId) -> Self {
        Value::Inst(id)
    }
}
