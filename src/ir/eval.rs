//! Reference evaluator.
//!
//! Executes IR directly so the result of a function can be compared before and after a
//! rewrite. Memory is a set of byte regions; a pointer is a (region, offset) pair and converts
//! to an integer as `region << 24 | offset`, which keeps `ptrtoint`/`inttoptr` address
//! arithmetic meaningful for both 32- and 64-bit address sizes.
//!
//! Only what lowering produces and consumes is supported: integer and float arithmetic,
//! comparisons, casts, vectors, memory, branches, phi nodes and calls to defined functions.
//! Anything else reports [`crate::Error::Malformed`].

use rustc_hash::FxHashMap;

use crate::{
    error::malformed_error,
    ir::{
        ApInt, BinaryOp, BlockId, Callee, CastOp, Constant, DataLayout, FloatKind,
        FloatPredicate, Function, IntPredicate, Intrinsic, Module, Op, Type, Value,
    },
    Result,
};

const OFFSET_BITS: u32 = 24;
const STEP_LIMIT: usize = 1_000_000;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    /// Integer of any width.
    Int(ApInt),
    /// Float, held in double precision and rounded to the format after each operation.
    Float(FloatKind, f64),
    /// Pointer into a memory region.
    Ptr {
        /// Region index (0 is the null region)
        region: u32,
        /// Byte offset
        offset: i64,
    },
    /// Vector of lane values.
    Vector(Vec<EvalValue>),
    /// Undefined value.
    Undef,
}

impl EvalValue {
    /// Integer value helper.
    #[must_use]
    pub fn int(bits: u32, value: u64) -> Self {
        EvalValue::Int(ApInt::new(bits, value))
    }

    /// Single precision float helper.
    #[must_use]
    pub fn f32(value: f32) -> Self {
        EvalValue::Float(FloatKind::Single, f64::from(value))
    }

    fn as_int(&self) -> Result<&ApInt> {
        match self {
            EvalValue::Int(v) => Ok(v),
            other => Err(malformed_error!("expected integer, got {:?}", other)),
        }
    }

    fn as_float(&self) -> Result<f64> {
        match self {
            EvalValue::Float(_, v) => Ok(*v),
            other => Err(malformed_error!("expected float, got {:?}", other)),
        }
    }

    fn lanes(&self) -> Result<&[EvalValue]> {
        match self {
            EvalValue::Vector(lanes) => Ok(lanes),
            other => Err(malformed_error!("expected vector, got {:?}", other)),
        }
    }
}

fn round(kind: FloatKind, value: f64) -> f64 {
    match kind {
        FloatKind::Double => value,
        FloatKind::Single | FloatKind::Half => f64::from(value as f32),
    }
}

/// Byte-addressed memory made of independent regions.
#[derive(Debug, Default, Clone)]
pub struct Memory {
    regions: Vec<Vec<u8>>,
}

impl Memory {
    /// Creates memory with only the null region.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regions: vec![Vec::new()],
        }
    }

    /// Allocates a zeroed region and returns a pointer to its start.
    pub fn alloc(&mut self, size: usize) -> EvalValue {
        self.regions.push(vec![0; size]);
        EvalValue::Ptr {
            region: self.regions.len() as u32 - 1,
            offset: 0,
        }
    }

    /// Raw bytes of a region.
    #[must_use]
    pub fn region(&self, region: u32) -> &[u8] {
        self.regions.get(region as usize).map_or(&[], Vec::as_slice)
    }

    /// Mutable raw bytes of a region.
    pub fn region_mut(&mut self, region: u32) -> &mut [u8] {
        self.regions
            .get_mut(region as usize)
            .map_or(&mut [], Vec::as_mut_slice)
    }

    fn slice_mut(&mut self, region: u32, offset: i64, len: usize) -> Result<&mut [u8]> {
        let data = self
            .regions
            .get_mut(region as usize)
            .ok_or_else(|| malformed_error!("invalid region {}", region))?;
        let start = usize::try_from(offset).map_err(|_| malformed_error!("negative offset"))?;
        data.get_mut(start..start + len)
            .ok_or_else(|| malformed_error!("access out of bounds: {}+{}", start, len))
    }
}

/// Executes functions of one module.
pub struct Evaluator<'m> {
    module: &'m Module,
    layout: DataLayout,
    /// Memory shared by all calls
    pub memory: Memory,
    steps: usize,
}

impl<'m> Evaluator<'m> {
    /// Creates an evaluator with empty memory.
    #[must_use]
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            layout: module.layout(),
            memory: Memory::new(),
            steps: 0,
        }
    }

    /// Runs `name` with the given arguments and returns its result.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for unsupported operations, out-of-bounds accesses
    /// and runaway execution.
    pub fn run(&mut self, name: &str, args: Vec<EvalValue>) -> Result<Option<EvalValue>> {
        let module = self.module;
        let func = module
            .function(name)
            .ok_or_else(|| malformed_error!("no function '{}'", name))?;
        if func.is_declaration() {
            return Err(malformed_error!("cannot evaluate declaration '{}'", name));
        }
        self.run_function(func, args)
    }

    fn run_function(&mut self, func: &Function, args: Vec<EvalValue>) -> Result<Option<EvalValue>> {
        let mut values: FxHashMap<Value, EvalValue> = FxHashMap::default();
        let mut block = func.entry();
        let mut prev: Option<BlockId> = None;
        loop {
            let insts = func.block_insts(block).to_vec();
            // Phis read their inputs simultaneously.
            let mut phi_values = Vec::new();
            for id in &insts {
                if let Op::Phi { incoming } = &func.inst(*id).op {
                    let from = prev.ok_or_else(|| malformed_error!("phi in entry block"))?;
                    let (value, _) = incoming
                        .iter()
                        .find(|(_, b)| *b == from)
                        .ok_or_else(|| malformed_error!("phi {} has no edge from {}", id, from))?;
                    phi_values.push((*id, self.get(func, &values, &args, *value)?));
                }
            }
            for (id, value) in phi_values {
                values.insert(Value::Inst(id), value);
            }

            let mut next = None;
            for id in insts {
                self.steps += 1;
                if self.steps > STEP_LIMIT {
                    return Err(malformed_error!("step limit exceeded in '{}'", func.name()));
                }
                let inst = func.inst(id);
                let get = |this: &Self, v: Value| this.get(func, &values, &args, v);
                let result = match &inst.op {
                    Op::Phi { .. } => continue,
                    Op::Binary { op, lhs, rhs } => {
                        let (l, r) = (get(self, *lhs)?, get(self, *rhs)?);
                        Some(lanewise2(&l, &r, |a, b| binary(*op, a, b))?)
                    }
                    Op::ICmp { pred, lhs, rhs } => {
                        let (l, r) = (get(self, *lhs)?, get(self, *rhs)?);
                        Some(lanewise2(&l, &r, |a, b| icmp(*pred, a, b))?)
                    }
                    Op::FCmp { pred, lhs, rhs } => {
                        let (l, r) = (get(self, *lhs)?, get(self, *rhs)?);
                        Some(lanewise2(&l, &r, |a, b| fcmp(*pred, a, b))?)
                    }
                    Op::Cast { op, value } => {
                        let from = func.value_type(*value);
                        let v = get(self, *value)?;
                        Some(self.cast(*op, &from, &inst.ty, &v)?)
                    }
                    Op::Select {
                        cond,
                        on_true,
                        on_false,
                    } => {
                        let c = get(self, *cond)?;
                        let (t, f) = (get(self, *on_true)?, get(self, *on_false)?);
                        Some(select(&c, t, f)?)
                    }
                    Op::Alloca {
                        allocated, count, ..
                    } => {
                        let n = match count {
                            Some(count) => get(self, *count)?.as_int()?.low_u64(),
                            None => 1,
                        };
                        Some(self.memory.alloc((self.layout.size_of(allocated) * n) as usize))
                    }
                    Op::Load { ptr, .. } => {
                        let p = get(self, *ptr)?;
                        Some(self.load(&inst.ty, &p)?)
                    }
                    Op::Store { value, ptr, .. } => {
                        let ty = func.value_type(*value);
                        let (v, p) = (get(self, *value)?, get(self, *ptr)?);
                        self.store(&ty, &v, &p)?;
                        None
                    }
                    Op::Gep {
                        source,
                        base,
                        indices,
                        ..
                    } => {
                        let mut offset = 0i64;
                        let mut ty = source.clone();
                        for (i, index) in indices.iter().enumerate() {
                            let idx = get(self, *index)?
                                .as_int()?
                                .to_i64()
                                .ok_or_else(|| malformed_error!("gep index too wide"))?;
                            if i == 0 {
                                offset += idx * self.layout.stride_of(&ty) as i64;
                                continue;
                            }
                            match ty.clone() {
                                Type::Struct(fields) => {
                                    offset += self.layout.field_offset(&fields, idx as usize) as i64;
                                    ty = fields[idx as usize].clone();
                                }
                                Type::Array { elem, .. } | Type::Vector { elem, .. } => {
                                    offset += idx * self.layout.stride_of(&elem) as i64;
                                    ty = *elem;
                                }
                                other => return Err(malformed_error!("gep into {}", other)),
                            }
                        }
                        match get(self, *base)? {
                            EvalValue::Ptr { region, offset: o } => Some(EvalValue::Ptr {
                                region,
                                offset: o + offset,
                            }),
                            other => return Err(malformed_error!("gep base {:?}", other)),
                        }
                    }
                    Op::ExtractElement { vector, index } => {
                        let v = get(self, *vector)?;
                        let i = get(self, *index)?.as_int()?.low_u64() as usize;
                        Some(v.lanes()?.get(i).cloned().unwrap_or(EvalValue::Undef))
                    }
                    Op::InsertElement {
                        vector,
                        element,
                        index,
                    } => {
                        let lanes_count = inst.ty.lanes().unwrap_or(0) as usize;
                        let mut lanes = match get(self, *vector)? {
                            EvalValue::Vector(lanes) => lanes,
                            _ => vec![EvalValue::Undef; lanes_count],
                        };
                        let i = get(self, *index)?.as_int()?.low_u64() as usize;
                        if i < lanes.len() {
                            lanes[i] = get(self, *element)?;
                        }
                        Some(EvalValue::Vector(lanes))
                    }
                    Op::ShuffleVector { lhs, rhs, mask } => {
                        let width = func.value_type(*lhs).lanes().unwrap_or(0) as i32;
                        let (l, r) = (get(self, *lhs)?, get(self, *rhs)?);
                        let pick = |v: &EvalValue, i: i32| match v {
                            EvalValue::Vector(lanes) => {
                                lanes.get(i as usize).cloned().unwrap_or(EvalValue::Undef)
                            }
                            _ => EvalValue::Undef,
                        };
                        Some(EvalValue::Vector(
                            mask.iter()
                                .map(|m| match *m {
                                    m if m < 0 => EvalValue::Undef,
                                    m if m < width => pick(&l, m),
                                    m => pick(&r, m - width),
                                })
                                .collect(),
                        ))
                    }
                    Op::Call { callee, args: call_args, .. } => {
                        let Callee::Direct(name) = callee else {
                            return Err(malformed_error!("indirect call in evaluator"));
                        };
                        let evaluated = call_args
                            .iter()
                            .map(|a| get(self, *a))
                            .collect::<Result<Vec<_>>>()?;
                        let module = self.module;
                        let callee = module
                            .function(name)
                            .filter(|f| !f.is_declaration())
                            .ok_or_else(|| malformed_error!("call of undefined '{}'", name))?;
                        self.run_function(callee, evaluated)?
                    }
                    Op::Intrinsic {
                        intrinsic,
                        args: call_args,
                    } => {
                        let evaluated = call_args
                            .iter()
                            .map(|a| get(self, *a))
                            .collect::<Result<Vec<_>>>()?;
                        Some(intrinsic_value(*intrinsic, &evaluated)?)
                    }
                    Op::Br { target } => {
                        next = Some(*target);
                        None
                    }
                    Op::CondBr {
                        cond,
                        on_true,
                        on_false,
                    } => {
                        let c = get(self, *cond)?;
                        next = Some(if c.as_int()?.is_zero() {
                            *on_false
                        } else {
                            *on_true
                        });
                        None
                    }
                    Op::Ret { value } => {
                        return value.map(|v| get(self, v)).transpose();
                    }
                    other => {
                        return Err(malformed_error!("cannot evaluate {}", other.mnemonic()));
                    }
                };
                if let Some(result) = result {
                    values.insert(Value::Inst(id), result);
                }
            }
            let target = next.ok_or_else(|| malformed_error!("block {} falls through", block))?;
            prev = Some(block);
            block = target;
        }
    }

    fn get(
        &self,
        func: &Function,
        values: &FxHashMap<Value, EvalValue>,
        args: &[EvalValue],
        value: Value,
    ) -> Result<EvalValue> {
        match value {
            Value::Inst(id) => values
                .get(&value)
                .cloned()
                .ok_or_else(|| malformed_error!("use of {} before definition", id)),
            Value::Arg(index) => args
                .get(index as usize)
                .cloned()
                .ok_or_else(|| malformed_error!("missing argument {}", index)),
            Value::Const(id) => self.constant(func.const_data(id)),
        }
    }

    fn constant(&self, constant: &Constant) -> Result<EvalValue> {
        Ok(match constant {
            Constant::Int(v) => EvalValue::Int(v.clone()),
            Constant::Float { kind, bits } => EvalValue::Float(
                *kind,
                match kind {
                    FloatKind::Double => f64::from_bits(*bits),
                    _ => f64::from(f32::from_bits(*bits as u32)),
                },
            ),
            Constant::Null(_) => EvalValue::Ptr {
                region: 0,
                offset: 0,
            },
            Constant::Undef(_) => EvalValue::Undef,
            Constant::Zero(ty) => zero_value(ty),
            Constant::Vector(lanes) => EvalValue::Vector(
                lanes
                    .iter()
                    .map(|l| self.constant(l))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => return Err(malformed_error!("cannot evaluate constant {:?}", other)),
        })
    }

    fn cast(&self, op: CastOp, from: &Type, to: &Type, value: &EvalValue) -> Result<EvalValue> {
        if let (Type::Vector { .. }, Type::Vector { .. }) = (from, to) {
            if from.lanes() == to.lanes() && op != CastOp::BitCast {
                let (fe, te) = (from.scalar_type(), to.scalar_type());
                let lanes = value
                    .lanes()?
                    .iter()
                    .map(|l| self.cast(op, fe, te, l))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(EvalValue::Vector(lanes));
            }
        }
        if matches!(value, EvalValue::Undef) {
            return Ok(EvalValue::Undef);
        }
        Ok(match op {
            CastOp::Trunc | CastOp::ZExt => {
                EvalValue::Int(value.as_int()?.zext(to.int_bits().unwrap_or(0)))
            }
            CastOp::SExt => EvalValue::Int(value.as_int()?.sext(to.int_bits().unwrap_or(0))),
            CastOp::FPTrunc | CastOp::FPExt => match to {
                Type::Float(kind) => EvalValue::Float(*kind, round(*kind, value.as_float()?)),
                _ => return Err(malformed_error!("fp cast to {}", to)),
            },
            CastOp::SIToFP | CastOp::UIToFP => {
                let int = value.as_int()?;
                let v = if op == CastOp::SIToFP {
                    int.to_i64().unwrap_or(0) as f64
                } else {
                    int.low_u64() as f64
                };
                match to {
                    Type::Float(kind) => EvalValue::Float(*kind, round(*kind, v)),
                    _ => return Err(malformed_error!("int to fp cast to {}", to)),
                }
            }
            CastOp::FPToSI => {
                EvalValue::Int(ApInt::from_i64(to.int_bits().unwrap_or(0), value.as_float()? as i64))
            }
            CastOp::FPToUI => {
                EvalValue::Int(ApInt::new(to.int_bits().unwrap_or(0), value.as_float()? as u64))
            }
            CastOp::PtrToInt => match value {
                EvalValue::Ptr { region, offset } => EvalValue::Int(ApInt::new(
                    to.int_bits().unwrap_or(64),
                    (u64::from(*region) << OFFSET_BITS).wrapping_add(*offset as u64),
                )),
                other => return Err(malformed_error!("ptrtoint of {:?}", other)),
            },
            CastOp::IntToPtr => {
                let raw = value.as_int()?.low_u64();
                EvalValue::Ptr {
                    region: (raw >> OFFSET_BITS) as u32,
                    offset: (raw & ((1 << OFFSET_BITS) - 1)) as i64,
                }
            }
            CastOp::AddrSpaceCast => value.clone(),
            CastOp::BitCast => {
                if from.is_ptr() || to.is_ptr() {
                    value.clone()
                } else {
                    let bytes = self.to_bytes(from, value)?;
                    self.from_bytes(to, &bytes)?
                }
            }
        })
    }

    fn to_bytes(&self, ty: &Type, value: &EvalValue) -> Result<Vec<u8>> {
        Ok(match (ty, value) {
            (_, EvalValue::Undef) => vec![0; self.layout.store_size(ty) as usize],
            (Type::Int(bits), EvalValue::Int(v)) => {
                let n = bits.div_ceil(8).max(1) as usize;
                v.words()
                    .iter()
                    .flat_map(|w| w.to_le_bytes())
                    .chain(std::iter::repeat(0))
                    .take(n)
                    .collect()
            }
            (Type::Float(FloatKind::Double), EvalValue::Float(_, v)) => v.to_le_bytes().to_vec(),
            (Type::Float(_), EvalValue::Float(_, v)) => (*v as f32).to_le_bytes().to_vec(),
            (Type::Ptr(_), EvalValue::Ptr { .. }) => {
                let int_ty = Type::Int(self.layout.pointer_bits());
                let int = self.cast(CastOp::PtrToInt, ty, &int_ty, value)?;
                self.to_bytes(&int_ty, &int)?
            }
            (Type::Vector { elem, .. }, EvalValue::Vector(lanes)) => {
                let mut out = Vec::new();
                for lane in lanes {
                    out.extend(self.to_bytes(elem, lane)?);
                }
                out
            }
            (ty, value) => return Err(malformed_error!("cannot encode {:?} as {}", value, ty)),
        })
    }

    fn from_bytes(&self, ty: &Type, bytes: &[u8]) -> Result<EvalValue> {
        Ok(match ty {
            Type::Int(bits) => {
                let words = bytes
                    .chunks(8)
                    .map(|chunk| {
                        let mut word = [0u8; 8];
                        word[..chunk.len()].copy_from_slice(chunk);
                        u64::from_le_bytes(word)
                    })
                    .collect();
                EvalValue::Int(ApInt::from_words(*bits, words))
            }
            Type::Float(FloatKind::Double) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                EvalValue::Float(FloatKind::Double, f64::from_le_bytes(raw))
            }
            Type::Float(kind) => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&bytes[..4]);
                EvalValue::Float(*kind, f64::from(f32::from_le_bytes(raw)))
            }
            Type::Ptr(_) => {
                let int_ty = Type::Int(self.layout.pointer_bits());
                let int = self.from_bytes(&int_ty, bytes)?;
                self.cast(CastOp::IntToPtr, &int_ty, ty, &int)?
            }
            Type::Vector { elem, lanes } => {
                let size = self.layout.store_size(elem) as usize;
                EvalValue::Vector(
                    (0..*lanes as usize)
                        .map(|i| self.from_bytes(elem, &bytes[i * size..(i + 1) * size]))
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            other => return Err(malformed_error!("cannot decode {}", other)),
        })
    }

    fn load(&mut self, ty: &Type, ptr: &EvalValue) -> Result<EvalValue> {
        let EvalValue::Ptr { region, offset } = ptr else {
            return Err(malformed_error!("load through {:?}", ptr));
        };
        let len = self.layout.store_size(ty) as usize;
        let bytes = self.memory.slice_mut(*region, *offset, len)?.to_vec();
        self.from_bytes(ty, &bytes)
    }

    fn store(&mut self, ty: &Type, value: &EvalValue, ptr: &EvalValue) -> Result<()> {
        let EvalValue::Ptr { region, offset } = ptr else {
            return Err(malformed_error!("store through {:?}", ptr));
        };
        let bytes = self.to_bytes(ty, value)?;
        self.memory
            .slice_mut(*region, *offset, bytes.len())?
            .copy_from_slice(&bytes);
        Ok(())
    }

    /// Writes a value to memory at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when the access is out of bounds.
    pub fn write(&mut self, ty: &Type, ptr: &EvalValue, value: &EvalValue) -> Result<()> {
        self.store(ty, value, ptr)
    }

    /// Reads a value of type `ty` from memory at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when the access is out of bounds.
    pub fn read(&mut self, ty: &Type, ptr: &EvalValue) -> Result<EvalValue> {
        self.load(ty, ptr)
    }
}

fn zero_value(ty: &Type) -> EvalValue {
    match ty {
        Type::Int(bits) => EvalValue::Int(ApInt::zero(*bits)),
        Type::Float(kind) => EvalValue::Float(*kind, 0.0),
        Type::Ptr(_) => EvalValue::Ptr {
            region: 0,
            offset: 0,
        },
        Type::Vector { elem, lanes } => EvalValue::Vector(vec![zero_value(elem); *lanes as usize]),
        _ => EvalValue::Undef,
    }
}

fn lanewise2(
    l: &EvalValue,
    r: &EvalValue,
    f: impl Fn(&EvalValue, &EvalValue) -> Result<EvalValue>,
) -> Result<EvalValue> {
    match (l, r) {
        (EvalValue::Vector(a), EvalValue::Vector(b)) => Ok(EvalValue::Vector(
            a.iter()
                .zip(b)
                .map(|(x, y)| f(x, y))
                .collect::<Result<Vec<_>>>()?,
        )),
        _ => f(l, r),
    }
}

fn select(cond: &EvalValue, t: EvalValue, f: EvalValue) -> Result<EvalValue> {
    match (cond, &t, &f) {
        (EvalValue::Vector(c), EvalValue::Vector(a), EvalValue::Vector(b)) => {
            let lanes = c
                .iter()
                .zip(a.iter().zip(b))
                .map(|(c, (a, b))| select(c, a.clone(), b.clone()))
                .collect::<Result<Vec<_>>>()?;
            Ok(EvalValue::Vector(lanes))
        }
        _ => Ok(if cond.as_int()?.is_zero() { f } else { t }),
    }
}

fn binary(op: BinaryOp, l: &EvalValue, r: &EvalValue) -> Result<EvalValue> {
    if matches!(l, EvalValue::Undef) || matches!(r, EvalValue::Undef) {
        return Ok(EvalValue::Undef);
    }
    if let (EvalValue::Float(kind, a), EvalValue::Float(_, b)) = (l, r) {
        let v = match op {
            BinaryOp::FAdd => a + b,
            BinaryOp::FSub => a - b,
            BinaryOp::FMul => a * b,
            BinaryOp::FDiv => a / b,
            BinaryOp::FRem => a % b,
            other => return Err(malformed_error!("{} on floats", other)),
        };
        return Ok(EvalValue::Float(*kind, round(*kind, v)));
    }
    let (a, b) = (l.as_int()?, r.as_int()?);
    let amount = || b.to_u64().unwrap_or(u64::MAX).min(u64::from(u32::MAX)) as u32;
    let nonzero = || {
        if b.is_zero() {
            Err(malformed_error!("division by zero"))
        } else {
            Ok(())
        }
    };
    Ok(EvalValue::Int(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::And => a.and(b),
        BinaryOp::Or => a.or(b),
        BinaryOp::Xor => a.xor(b),
        BinaryOp::Shl => a.shl(amount()),
        BinaryOp::LShr => a.lshr(amount()),
        BinaryOp::AShr => a.ashr(amount()),
        BinaryOp::UDiv | BinaryOp::URem if a.bits() <= 64 => {
            nonzero()?;
            let (x, y) = (a.low_u64(), b.low_u64());
            ApInt::new(a.bits(), if op == BinaryOp::UDiv { x / y } else { x % y })
        }
        BinaryOp::SDiv | BinaryOp::SRem if a.bits() <= 64 => {
            nonzero()?;
            let (x, y) = (a.to_i64().unwrap_or(0), b.to_i64().unwrap_or(1));
            let v = if op == BinaryOp::SDiv {
                x.wrapping_div(y)
            } else {
                x.wrapping_rem(y)
            };
            ApInt::from_i64(a.bits(), v)
        }
        BinaryOp::URem => {
            let log = b
                .exact_log2()
                .ok_or_else(|| malformed_error!("wide urem by non power of two"))?;
            a.and(&ApInt::new(a.bits(), 1).shl(log).wrapping_sub(&ApInt::new(a.bits(), 1)))
        }
        BinaryOp::UDiv => {
            let log = b
                .exact_log2()
                .ok_or_else(|| malformed_error!("wide udiv by non power of two"))?;
            a.lshr(log)
        }
        other => return Err(malformed_error!("{} on i{}", other, a.bits())),
    }))
}

fn icmp(pred: IntPredicate, l: &EvalValue, r: &EvalValue) -> Result<EvalValue> {
    use std::cmp::Ordering::{Equal, Greater, Less};
    if let (EvalValue::Ptr { .. }, EvalValue::Ptr { .. }) = (l, r) {
        let equal = l == r;
        return Ok(EvalValue::int(1, u64::from(equal == (pred == IntPredicate::Eq))));
    }
    let (a, b) = (l.as_int()?, r.as_int()?);
    let ord = if pred.is_signed() { a.scmp(b) } else { a.ucmp(b) };
    let result = match pred {
        IntPredicate::Eq => ord == Equal,
        IntPredicate::Ne => ord != Equal,
        IntPredicate::Ugt | IntPredicate::Sgt => ord == Greater,
        IntPredicate::Uge | IntPredicate::Sge => ord != Less,
        IntPredicate::Ult | IntPredicate::Slt => ord == Less,
        IntPredicate::Ule | IntPredicate::Sle => ord != Greater,
    };
    Ok(EvalValue::int(1, u64::from(result)))
}

fn fcmp(pred: FloatPredicate, l: &EvalValue, r: &EvalValue) -> Result<EvalValue> {
    let (a, b) = (l.as_float()?, r.as_float()?);
    let unordered = a.is_nan() || b.is_nan();
    let result = match pred {
        FloatPredicate::False => false,
        FloatPredicate::True => true,
        FloatPredicate::Oeq => !unordered && a == b,
        FloatPredicate::Ogt => !unordered && a > b,
        FloatPredicate::Oge => !unordered && a >= b,
        FloatPredicate::Olt => !unordered && a < b,
        FloatPredicate::Ole => !unordered && a <= b,
        FloatPredicate::One => !unordered && a != b,
        FloatPredicate::Ord => !unordered,
        FloatPredicate::Uno => unordered,
        FloatPredicate::Ueq => unordered || a == b,
        FloatPredicate::Ugt => unordered || a > b,
        FloatPredicate::Uge => unordered || a >= b,
        FloatPredicate::Ult => unordered || a < b,
        FloatPredicate::Ule => unordered || a <= b,
        FloatPredicate::Une => unordered || a != b,
    };
    Ok(EvalValue::int(1, u64::from(result)))
}

fn intrinsic_value(intrinsic: Intrinsic, args: &[EvalValue]) -> Result<EvalValue> {
    if let Some(EvalValue::Vector(first)) = args.first() {
        let lanes = (0..first.len())
            .map(|i| {
                let lane_args = args
                    .iter()
                    .map(|a| a.lanes().map(|l| l[i].clone()))
                    .collect::<Result<Vec<_>>>()?;
                intrinsic_value(intrinsic, &lane_args)
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(EvalValue::Vector(lanes));
    }
    let arg = |i: usize| -> Result<&EvalValue> {
        args.get(i)
            .ok_or_else(|| malformed_error!("missing intrinsic argument"))
    };
    let kind = match arg(0)? {
        EvalValue::Float(kind, _) => *kind,
        _ => FloatKind::Single,
    };
    let unary = |f: fn(f64) -> f64| -> Result<EvalValue> {
        Ok(EvalValue::Float(kind, round(kind, f(arg(0)?.as_float()?))))
    };
    match intrinsic {
        Intrinsic::Fabs => unary(f64::abs),
        Intrinsic::Sqrt => unary(f64::sqrt),
        Intrinsic::Floor => unary(f64::floor),
        Intrinsic::Ceil => unary(f64::ceil),
        Intrinsic::Trunc => unary(f64::trunc),
        Intrinsic::Minnum => Ok(EvalValue::Float(kind, arg(0)?.as_float()?.min(arg(1)?.as_float()?))),
        Intrinsic::Maxnum => Ok(EvalValue::Float(kind, arg(0)?.as_float()?.max(arg(1)?.as_float()?))),
        Intrinsic::Fma => {
            let v = arg(0)?.as_float()? * arg(1)?.as_float()? + arg(2)?.as_float()?;
            Ok(EvalValue::Float(kind, round(kind, v)))
        }
        other => Err(malformed_error!("cannot evaluate intrinsic {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AddressSpace, Param};

    #[test]
    fn test_vector_add() {
        let mut module = Module::new("m", 200);
        let v4 = Type::vector(Type::F32, 4);
        let mut func = Function::new(
            "f",
            vec![Param::new("a", v4.clone()), Param::new("b", v4)],
            Type::vector(Type::F32, 4),
        );
        let entry = func.add_block("entry");
        let mut b = func.build_at_end(entry);
        let sum = b.binary(BinaryOp::FAdd, Value::Arg(0), Value::Arg(1));
        b.ret(Some(sum));
        module.add_function(func);

        let vec4 = |base: f32| EvalValue::Vector((0..4).map(|i| EvalValue::f32(base + i as f32)).collect());
        let result = Evaluator::new(&module).run("f", vec![vec4(1.0), vec4(10.0)]).unwrap();
        assert_eq!(
            result,
            Some(EvalValue::Vector(
                [11.0, 13.0, 15.0, 17.0].iter().map(|v| EvalValue::f32(*v)).collect()
            ))
        );
    }

    #[test]
    fn test_memory_roundtrip_through_int_address() {
        let mut module = Module::new("m", 120);
        let mut func = Function::new(
            "f",
            vec![Param::new("p", Type::Ptr(AddressSpace::Global))],
            Type::I32,
        );
        let entry = func.add_block("entry");
        let mut b = func.build_at_end(entry);
        let addr = b.cast(CastOp::PtrToInt, Value::Arg(0), Type::I32);
        let four = b.const_int(32, 4);
        let next = b.binary(BinaryOp::Add, addr, four);
        let ptr = b.cast(CastOp::IntToPtr, next, Type::Ptr(AddressSpace::Global));
        let loaded = b.load(Type::I32, ptr);
        b.ret(Some(loaded));
        module.add_function(func);

        let mut eval = Evaluator::new(&module);
        let buffer = eval.memory.alloc(8);
        let second = EvalValue::Ptr { region: 1, offset: 4 };
        eval.write(&Type::I32, &second, &EvalValue::int(32, 77)).unwrap();
        assert_eq!(eval.run("f", vec![buffer]).unwrap(), Some(EvalValue::int(32, 77)));
    }
}
