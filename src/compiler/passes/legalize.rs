//! Oversized integer legalization.
//!
//! The backend's widest integer is 64 bits. Front-ends still produce wider integers, mostly
//! from bitcasts of vectors (`<4 x i32>` viewed as `i128`) and from 128-bit arithmetic in
//! library code. This pass splits every integer wider than 64 bits into little-endian 64-bit
//! limbs.
//!
//! # Algorithm
//!
//! 1. Oversized kernel parameters are replaced by one `i64` parameter per limb; the kernel
//!    argument metadata is expanded to match.
//! 2. Blocks are walked in reverse postorder. An instruction is rewritten when its result
//!    or one of its operands is oversized. Rewritten instructions with an oversized result
//!    record their limbs in a limb map; all others have their uses replaced directly.
//! 3. Constant operands are split on demand.
//! 4. Every rewritten instruction is detached from its operands, then all are erased.
//!
//! # Supported Operations
//!
//! | Operation            | Rewrite                                                     |
//! |----------------------|-------------------------------------------------------------|
//! | `phi`                | one phi per limb (incoming values must already be split)    |
//! | `select`             | one select per limb                                         |
//! | `icmp eq/ne`         | per-limb compares folded with `and` / `or`                  |
//! | `add` / `sub`        | per-limb with carry / borrow propagation                    |
//! | `and` / `or` / `xor` | per-limb with constant short-circuits                       |
//! | `shl` / `lshr` / `ashr` by a constant | limb moves plus adjacent-limb funnels      |
//! | `udiv` / `urem` by a power of two     | `lshr` / `and`                             |
//! | `bitcast`            | through `<N x i64>`                                         |
//! | `trunc` / `zext` / `sext` | limb selection and extension                           |
//! | `load` / `store`     | one `i64` access per limb at 8-byte offsets                 |
//!
//! Anything else touching an oversized integer is reported as unsupported.

use rustc_hash::FxHashMap;

use crate::{
    analysis::ControlFlowGraph,
    compiler::{EventKind, FunctionPass, ModuleInfo, PassContext},
    ir::{
        ApInt, BinaryOp, BlockId, CastOp, Constant, Function, InstBuilder, InstId, IntPredicate,
        Op, Param, Type, Value,
    },
    Result,
};

/// Width of one limb in bits.
const LIMB_BITS: u32 = 64;

/// Splits integers wider than 64 bits into 64-bit limbs.
pub struct IntegerLegalizationPass;

impl Default for IntegerLegalizationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegerLegalizationPass {
    /// Creates a new integer legalization pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Number of limbs of `ty`, or `None` when the type is not an oversized integer.
fn limb_count(func: &Function, ty: &Type) -> Result<Option<usize>> {
    match ty {
        Type::Int(bits) if *bits > LIMB_BITS => {
            if bits % LIMB_BITS != 0 {
                return Err(unsupported!(
                    func,
                    "i{} is not a multiple of {} bits",
                    bits,
                    LIMB_BITS
                ));
            }
            Ok(Some((bits / LIMB_BITS) as usize))
        }
        _ => Ok(None),
    }
}

fn limb_const<'a>(b: &'a InstBuilder<'_>, value: Value) -> Option<&'a ApInt> {
    b.function().as_constant(value).and_then(Constant::as_int)
}

fn is_zero(b: &InstBuilder<'_>, value: Value) -> bool {
    limb_const(b, value).is_some_and(ApInt::is_zero)
}

fn is_all_ones(b: &InstBuilder<'_>, value: Value) -> bool {
    limb_const(b, value).is_some_and(ApInt::is_all_ones)
}

fn and_limb(b: &mut InstBuilder<'_>, x: Value, y: Value) -> Value {
    if is_zero(b, x) || is_zero(b, y) {
        b.const_int(LIMB_BITS, 0)
    } else if is_all_ones(b, x) {
        y
    } else if is_all_ones(b, y) {
        x
    } else {
        b.binary(BinaryOp::And, x, y)
    }
}

fn or_limb(b: &mut InstBuilder<'_>, x: Value, y: Value) -> Value {
    if is_zero(b, x) {
        y
    } else if is_zero(b, y) || is_all_ones(b, x) {
        x
    } else if is_all_ones(b, y) {
        y
    } else {
        b.binary(BinaryOp::Or, x, y)
    }
}

fn shl_limbs(b: &mut InstBuilder<'_>, limbs: &[Value], amount: u64) -> Vec<Value> {
    let n = limbs.len();
    let zero = b.const_int(LIMB_BITS, 0);
    if amount >= (n as u64) * u64::from(LIMB_BITS) {
        return vec![zero; n];
    }
    let shift = (amount / u64::from(LIMB_BITS)) as usize;
    let unaligned = amount % u64::from(LIMB_BITS);

    let mut out = vec![zero; shift];
    if unaligned == 0 {
        out.extend_from_slice(&limbs[..n - shift]);
        return out;
    }
    let up = b.const_int(LIMB_BITS, unaligned);
    let down = b.const_int(LIMB_BITS, u64::from(LIMB_BITS) - unaligned);
    out.push(b.binary(BinaryOp::Shl, limbs[0], up));
    for i in 0..n - shift - 1 {
        let low = b.binary(BinaryOp::LShr, limbs[i], down);
        let high = b.binary(BinaryOp::Shl, limbs[i + 1], up);
        out.push(b.binary(BinaryOp::Or, low, high));
    }
    out
}

fn shr_limbs(b: &mut InstBuilder<'_>, limbs: &[Value], amount: u64, arithmetic: bool) -> Vec<Value> {
    let n = limbs.len();
    let top = limbs[n - 1];
    let fill = |b: &mut InstBuilder<'_>| {
        if arithmetic {
            let sign_bit = b.const_int(LIMB_BITS, u64::from(LIMB_BITS - 1));
            b.binary(BinaryOp::AShr, top, sign_bit)
        } else {
            b.const_int(LIMB_BITS, 0)
        }
    };
    if amount >= (n as u64) * u64::from(LIMB_BITS) {
        let fill = fill(b);
        return vec![fill; n];
    }
    let shift = (amount / u64::from(LIMB_BITS)) as usize;
    let unaligned = amount % u64::from(LIMB_BITS);

    let mut out = Vec::with_capacity(n);
    if unaligned == 0 {
        out.extend_from_slice(&limbs[shift..]);
    } else {
        let down = b.const_int(LIMB_BITS, unaligned);
        let up = b.const_int(LIMB_BITS, u64::from(LIMB_BITS) - unaligned);
        for s in shift..n - 1 {
            let low = b.binary(BinaryOp::LShr, limbs[s], down);
            let high = b.binary(BinaryOp::Shl, limbs[s + 1], up);
            out.push(b.binary(BinaryOp::Or, low, high));
        }
        let op = if arithmetic {
            BinaryOp::AShr
        } else {
            BinaryOp::LShr
        };
        out.push(b.binary(op, top, down));
    }
    if shift > 0 {
        let fill = fill(b);
        out.extend(std::iter::repeat(fill).take(shift));
    }
    out
}

fn add_limbs(b: &mut InstBuilder<'_>, x: &[Value], y: &[Value]) -> Vec<Value> {
    let mut carry: Option<Value> = None;
    let mut out = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let partial = b.binary(BinaryOp::Add, x[i], y[i]);
        let sum = match carry {
            Some(c) => b.binary(BinaryOp::Add, partial, c),
            None => partial,
        };
        if i + 1 < x.len() {
            let overflow = b.icmp(IntPredicate::Ult, partial, x[i]);
            let next = match carry {
                Some(_) => {
                    let wrapped = b.icmp(IntPredicate::Ult, sum, partial);
                    b.binary(BinaryOp::Or, overflow, wrapped)
                }
                None => overflow,
            };
            carry = Some(b.cast(CastOp::ZExt, next, Type::I64));
        }
        out.push(sum);
    }
    out
}

fn sub_limbs(b: &mut InstBuilder<'_>, x: &[Value], y: &[Value]) -> Vec<Value> {
    let mut borrow: Option<Value> = None;
    let mut out = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let partial = b.binary(BinaryOp::Sub, x[i], y[i]);
        let diff = match borrow {
            Some(c) => b.binary(BinaryOp::Sub, partial, c),
            None => partial,
        };
        if i + 1 < x.len() {
            let underflow = b.icmp(IntPredicate::Ult, x[i], y[i]);
            let next = match borrow {
                Some(c) => {
                    let wrapped = b.icmp(IntPredicate::Ult, partial, c);
                    b.binary(BinaryOp::Or, underflow, wrapped)
                }
                None => underflow,
            };
            borrow = Some(b.cast(CastOp::ZExt, next, Type::I64));
        }
        out.push(diff);
    }
    out
}

/// Per-function rewriting state.
struct Legalizer<'f> {
    func: &'f mut Function,
    /// Oversized value to its little-endian limbs
    limbs: FxHashMap<Value, Vec<Value>>,
}

impl<'f> Legalizer<'f> {
    fn new(func: &'f mut Function) -> Self {
        Self {
            func,
            limbs: FxHashMap::default(),
        }
    }

    /// Replaces oversized parameters by limb parameters.
    ///
    /// Uses of the old parameter are first redirected to a placeholder in the entry block
    /// whose limbs are the new parameters; the placeholder is erased with the other rewritten
    /// instructions. Returns the placeholders.
    fn split_params(&mut self) -> Result<Vec<(InstId, String)>> {
        let mut placeholders = Vec::new();
        let entry = self.func.entry();
        let mut index = 0;
        while index < self.func.params().len() {
            let param = self.func.params()[index].clone();
            let Some(count) = limb_count(self.func, &param.ty)? else {
                index += 1;
                continue;
            };
            let placeholder = self.func.insert_inst(entry, 0, Op::Detached, param.ty.clone());
            self.func
                .replace_all_uses(Value::Arg(index as u32), Value::Inst(placeholder));
            let limbs = (0..count)
                .map(|i| Param::new(format!("{}.{}", param.name, i), Type::I64))
                .collect();
            let values = self.func.splice_params(index, limbs);
            if let Some(info) = &mut self.func.kernel_args {
                info.expand(index, count);
            }
            self.limbs.insert(Value::Inst(placeholder), values);
            placeholders.push((placeholder, param.name));
            index += count;
        }
        Ok(placeholders)
    }

    fn needs_rewrite(&self, id: InstId) -> Result<bool> {
        let inst = self.func.inst(id);
        if limb_count(self.func, &inst.ty)?.is_some() {
            return Ok(true);
        }
        for operand in inst.op.operands() {
            if limb_count(self.func, &self.func.value_type(operand))?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Limbs of an oversized value; constants are split on first use.
    fn limbs_of(&mut self, value: Value) -> Result<Vec<Value>> {
        if let Some(limbs) = self.limbs.get(&value) {
            return Ok(limbs.clone());
        }
        let ty = self.func.value_type(value);
        let count = limb_count(self.func, &ty)?.unwrap_or(1);
        let limbs: Vec<Value> = match self.func.as_constant(value).cloned() {
            Some(Constant::Int(v)) => v
                .split(LIMB_BITS)
                .into_iter()
                .map(|limb| self.func.constant(Constant::Int(limb)))
                .collect(),
            Some(Constant::Undef(_)) => (0..count)
                .map(|_| self.func.constant(Constant::Undef(Type::I64)))
                .collect(),
            Some(Constant::Zero(_)) => (0..count)
                .map(|_| self.func.constant(Constant::int(LIMB_BITS, 0)))
                .collect(),
            _ => {
                return Err(unsupported!(
                    self.func,
                    "{} has no 64-bit limbs (defined after its use or not splittable)",
                    self.func.display_value(value)
                ))
            }
        };
        self.limbs.insert(value, limbs.clone());
        Ok(limbs)
    }

    fn is_undef(&self, value: Value) -> bool {
        self.func.as_constant(value).is_some_and(Constant::is_undef)
    }

    fn is_zero_const(&self, value: Value) -> bool {
        self.func
            .as_constant(value)
            .and_then(Constant::as_int)
            .is_some_and(ApInt::is_zero)
    }

    /// Power-of-two exponent of a constant operand.
    fn exact_log2(&self, value: Value) -> Option<u32> {
        self.func
            .as_constant(value)
            .and_then(Constant::as_int)
            .and_then(ApInt::exact_log2)
    }

    fn shift_amount(&self, value: Value) -> Result<u64> {
        self.func
            .as_constant(value)
            .and_then(Constant::as_int)
            .and_then(ApInt::to_u64)
            .ok_or_else(|| unsupported!(self.func, "shift of an oversized integer by a variable amount"))
    }

    fn define(&mut self, id: InstId, limbs: Vec<Value>) {
        self.limbs.insert(Value::Inst(id), limbs);
    }

    fn replace(&mut self, id: InstId, value: Value) {
        self.func.replace_all_uses(Value::Inst(id), value);
    }

    fn legalize(&mut self, id: InstId) -> Result<()> {
        if self.limbs.contains_key(&Value::Inst(id)) {
            return Ok(());
        }
        let inst = self.func.inst(id).clone();
        match inst.op {
            Op::Phi { incoming } => self.legalize_phi(id, incoming),
            Op::Select {
                cond,
                on_true,
                on_false,
            } => {
                let t = self.limbs_of(on_true)?;
                let f = self.limbs_of(on_false)?;
                let mut b = self.func.build_before(id)?;
                let limbs = t.iter().zip(&f).map(|(x, y)| b.select(cond, *x, *y)).collect();
                self.define(id, limbs);
                Ok(())
            }
            Op::ICmp { pred, lhs, rhs } => {
                if !pred.is_equality() {
                    return Err(unsupported!(
                        self.func,
                        "icmp {} on i{}",
                        pred,
                        self.func.value_type(lhs).int_bits().unwrap_or(0)
                    ));
                }
                let x = self.limbs_of(lhs)?;
                let y = self.limbs_of(rhs)?;
                let mut b = self.func.build_before(id)?;
                let mut folded: Option<Value> = None;
                for (l, r) in x.iter().zip(&y) {
                    let cmp = b.icmp(pred, *l, *r);
                    folded = Some(match folded {
                        None => cmp,
                        Some(acc) if pred == IntPredicate::Eq => b.binary(BinaryOp::And, cmp, acc),
                        Some(acc) => b.binary(BinaryOp::Or, cmp, acc),
                    });
                }
                if let Some(result) = folded {
                    self.replace(id, result);
                }
                Ok(())
            }
            Op::Binary { op, lhs, rhs } => self.legalize_binary(id, op, lhs, rhs),
            Op::Cast { op, value } => self.legalize_cast(id, op, value, &inst.ty),
            Op::Load { ptr, align, access } => {
                let count = limb_count(self.func, &inst.ty)?.unwrap_or(1);
                let mut b = self.func.build_before(id)?;
                let mut limbs = Vec::with_capacity(count);
                for i in 0..count {
                    let addr = if i == 0 {
                        ptr
                    } else {
                        let offset = b.const_int(32, (i * 8) as u64);
                        b.gep(Type::I8, ptr, vec![offset])
                    };
                    let limb_align = if i == 0 { align } else { align.min(8) };
                    limbs.push(b.load_with(Type::I64, addr, limb_align, access));
                }
                self.define(id, limbs);
                Ok(())
            }
            Op::Store {
                value,
                ptr,
                align,
                access,
            } => {
                let limbs = self.limbs_of(value)?;
                let mut b = self.func.build_before(id)?;
                for (i, limb) in limbs.iter().enumerate() {
                    let addr = if i == 0 {
                        ptr
                    } else {
                        let offset = b.const_int(32, (i * 8) as u64);
                        b.gep(Type::I8, ptr, vec![offset])
                    };
                    let limb_align = if i == 0 { align } else { align.min(8) };
                    b.store_with(*limb, addr, limb_align, access);
                }
                Ok(())
            }
            other => Err(unsupported!(
                self.func,
                "{} on oversized integers",
                other.mnemonic()
            )),
        }
    }

    fn legalize_phi(&mut self, id: InstId, incoming: Vec<(Value, BlockId)>) -> Result<()> {
        let mut split = Vec::with_capacity(incoming.len());
        for (value, block) in &incoming {
            let ready = self.limbs.contains_key(value) || self.func.as_constant(*value).is_some();
            if !ready {
                return Err(unsupported!(
                    self.func,
                    "loop-carried oversized integer in phi {}",
                    id
                ));
            }
            split.push((self.limbs_of(*value)?, *block));
        }
        let count = split.first().map_or(0, |(limbs, _)| limbs.len());
        let mut b = self.func.build_before(id)?;
        let limbs = (0..count)
            .map(|i| {
                let incoming = split.iter().map(|(limbs, block)| (limbs[i], *block)).collect();
                b.phi(Type::I64, incoming)
            })
            .collect();
        self.define(id, limbs);
        Ok(())
    }

    fn legalize_binary(&mut self, id: InstId, op: BinaryOp, lhs: Value, rhs: Value) -> Result<()> {
        let bits = self.func.value_type(lhs).int_bits().unwrap_or(0);
        let limbs = match op {
            BinaryOp::And => {
                if self.is_undef(lhs) || self.is_undef(rhs) || self.is_zero_const(lhs) || self.is_zero_const(rhs) {
                    let count = (bits / LIMB_BITS) as usize;
                    let mut b = self.func.build_before(id)?;
                    (0..count).map(|_| b.const_int(LIMB_BITS, 0)).collect()
                } else {
                    let x = self.limbs_of(lhs)?;
                    let y = self.limbs_of(rhs)?;
                    let mut b = self.func.build_before(id)?;
                    x.iter().zip(&y).map(|(l, r)| and_limb(&mut b, *l, *r)).collect()
                }
            }
            BinaryOp::Or => {
                if self.is_undef(lhs) {
                    self.limbs_of(rhs)?
                } else if self.is_undef(rhs) {
                    self.limbs_of(lhs)?
                } else {
                    let x = self.limbs_of(lhs)?;
                    let y = self.limbs_of(rhs)?;
                    let mut b = self.func.build_before(id)?;
                    x.iter().zip(&y).map(|(l, r)| or_limb(&mut b, *l, *r)).collect()
                }
            }
            BinaryOp::Xor => {
                let x = self.limbs_of(lhs)?;
                let y = self.limbs_of(rhs)?;
                let mut b = self.func.build_before(id)?;
                x.iter().zip(&y).map(|(l, r)| b.binary(BinaryOp::Xor, *l, *r)).collect()
            }
            BinaryOp::Add | BinaryOp::Sub => {
                let x = self.limbs_of(lhs)?;
                let y = self.limbs_of(rhs)?;
                let mut b = self.func.build_before(id)?;
                if op == BinaryOp::Add {
                    add_limbs(&mut b, &x, &y)
                } else {
                    sub_limbs(&mut b, &x, &y)
                }
            }
            BinaryOp::Shl | BinaryOp::LShr | BinaryOp::AShr => {
                let amount = self.shift_amount(rhs)?;
                let x = self.limbs_of(lhs)?;
                let mut b = self.func.build_before(id)?;
                match op {
                    BinaryOp::Shl => shl_limbs(&mut b, &x, amount),
                    _ => shr_limbs(&mut b, &x, amount, op == BinaryOp::AShr),
                }
            }
            BinaryOp::UDiv | BinaryOp::URem => {
                let Some(log2) = self.exact_log2(rhs) else {
                    return Err(unsupported!(
                        self.func,
                        "{} of i{} by a value that is not a constant power of two",
                        op,
                        bits
                    ));
                };
                let x = self.limbs_of(lhs)?;
                if op == BinaryOp::UDiv {
                    let mut b = self.func.build_before(id)?;
                    shr_limbs(&mut b, &x, u64::from(log2), false)
                } else {
                    let one = ApInt::new(bits, 1);
                    let mask = one.shl(log2).wrapping_sub(&one);
                    let mask = self.func.constant(Constant::Int(mask));
                    let y = self.limbs_of(mask)?;
                    let mut b = self.func.build_before(id)?;
                    x.iter().zip(&y).map(|(l, r)| and_limb(&mut b, *l, *r)).collect()
                }
            }
            other => {
                return Err(unsupported!(self.func, "{} on i{}", other, bits));
            }
        };
        self.define(id, limbs);
        Ok(())
    }

    fn legalize_cast(&mut self, id: InstId, op: CastOp, value: Value, to: &Type) -> Result<()> {
        let from = self.func.value_type(value);
        let to_limbs = limb_count(self.func, to)?;
        let from_limbs = limb_count(self.func, &from)?;
        match op {
            CastOp::ZExt | CastOp::SExt => {
                let count = to_limbs.unwrap_or(1);
                let mut low = match from_limbs {
                    Some(_) => self.limbs_of(value)?,
                    None => vec![value],
                };
                let mut b = self.func.build_before(id)?;
                if from.int_bits().is_some_and(|bits| bits < LIMB_BITS) {
                    low[0] = b.cast(op, value, Type::I64);
                }
                let fill = if op == CastOp::SExt {
                    let top = low[low.len() - 1];
                    let sign_bit = b.const_int(LIMB_BITS, u64::from(LIMB_BITS - 1));
                    b.binary(BinaryOp::AShr, top, sign_bit)
                } else {
                    b.const_int(LIMB_BITS, 0)
                };
                low.resize(count, fill);
                self.define(id, low);
            }
            CastOp::Trunc => {
                let limbs = self.limbs_of(value)?;
                match to_limbs {
                    Some(count) => self.define(id, limbs[..count].to_vec()),
                    None => {
                        let low = limbs[0];
                        let result = if to.int_bits().is_some_and(|bits| bits < LIMB_BITS) {
                            self.func.build_before(id)?.cast(CastOp::Trunc, low, to.clone())
                        } else {
                            low
                        };
                        self.replace(id, result);
                    }
                }
            }
            CastOp::BitCast if from.is_vector() && to_limbs.is_some() => {
                let count = to_limbs.unwrap_or(1);
                let wide = Type::vector(Type::I64, count as u32);
                let mut b = self.func.build_before(id)?;
                let source = if from == wide {
                    value
                } else {
                    b.cast(CastOp::BitCast, value, wide)
                };
                let limbs = (0..count)
                    .map(|i| {
                        let index = b.const_int(32, i as u64);
                        b.extract_element(source, index)
                    })
                    .collect();
                self.define(id, limbs);
            }
            CastOp::BitCast if to.is_vector() && from_limbs.is_some() => {
                let limbs = self.limbs_of(value)?;
                let wide = Type::vector(Type::I64, limbs.len() as u32);
                let mut b = self.func.build_before(id)?;
                let vector = b.build_vector(wide.clone(), &limbs);
                let result = if *to == wide {
                    vector
                } else {
                    b.cast(CastOp::BitCast, vector, to.clone())
                };
                self.replace(id, result);
            }
            other => {
                return Err(unsupported!(
                    self.func,
                    "{} from {} to {}",
                    other,
                    from,
                    to
                ));
            }
        }
        Ok(())
    }
}

impl FunctionPass for IntegerLegalizationPass {
    fn name(&self) -> &'static str {
        "integer-legalization"
    }

    fn description(&self) -> &'static str {
        "Splits integers wider than 64 bits into 64-bit limbs"
    }

    fn should_run(&self, func: &Function, info: &ModuleInfo) -> bool {
        info.is_kernel(func.name())
    }

    fn run_on_function(
        &self,
        func: &mut Function,
        _info: &ModuleInfo,
        ctx: &PassContext,
    ) -> Result<bool> {
        let name = func.name().to_string();
        let mut legalizer = Legalizer::new(func);
        let placeholders = legalizer.split_params()?;
        for (_, param) in &placeholders {
            ctx.events
                .record(EventKind::ParameterSplit)
                .function(name.as_str())
                .pass(self.name())
                .message(format!("parameter {param} split into limbs"));
        }

        let order = ControlFlowGraph::from_function(legalizer.func).reverse_postorder();
        let mut rewritten = Vec::new();
        for block in order {
            for id in legalizer.func.block_insts(block).to_vec() {
                if !legalizer.needs_rewrite(id)? {
                    continue;
                }
                log::trace!("{name}: splitting {}", legalizer.func.display_inst(id));
                legalizer.legalize(id)?;
                rewritten.push(id);
            }
        }
        if rewritten.is_empty() {
            return Ok(false);
        }

        func.remove_all(&rewritten);
        log::debug!("{name}: {} oversized integer instructions split", rewritten.len());
        ctx.events
            .record(EventKind::IntegerSplit)
            .function(name.as_str())
            .pass(self.name())
            .message(format!("{} instructions split into 64-bit limbs", rewritten.len()));
        Ok(true)
    }
}
