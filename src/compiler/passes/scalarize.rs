//! Vector scalarization.
//!
//! The backend executes one work-item per SIMD channel, so vector values have no direct
//! hardware representation. This pass replaces vector arithmetic with one scalar instruction
//! per lane and tracks the lanes of every vector value in a lane map.
//!
//! # Classification
//!
//! | Instruction                                  | Treatment                               |
//! |----------------------------------------------|-----------------------------------------|
//! | binary, compare, select, lane-preserving cast, per-component intrinsic | one scalar instruction per lane |
//! | `shufflevector`                              | lane bookkeeping only                   |
//! | `extractelement` (constant index)            | uses replaced by the lane               |
//! | `extractelement` (variable index)            | lanes spilled to a private array        |
//! | `insertelement` (constant index)             | lane bookkeeping only                   |
//! | `phi`                                        | one phi per lane                        |
//! | `load`, `store`, calls, lane-changing bitcast | kept; operands rebuilt, results exploded |
//!
//! Kept instructions receive their vector operands through an `insertelement` chain built
//! right before them, and their vector results are split with `extractelement` right after.
//! Only kernels are processed; helpers are inlined by the time this pass runs.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    analysis::ControlFlowGraph,
    compiler::{EventKind, FunctionPass, ModuleInfo, PassContext},
    ir::{BlockId, CastOp, Constant, Function, InstId, Op, Type, Value},
    Result,
};

/// Replaces vector arithmetic with per-lane scalar instructions.
pub struct ScalarizationPass;

impl Default for ScalarizationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalarizationPass {
    /// Creates a new scalarization pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

struct Scalarizer<'f> {
    func: &'f mut Function,
    /// Vector value to its scalar lanes
    lanes: FxHashMap<Value, Vec<Value>>,
    /// Lane value to the vectors listing it, for re-pointing
    lane_refs: FxHashMap<Value, Vec<Value>>,
    /// Private array holding the lanes of a dynamically indexed vector
    spills: FxHashMap<Value, Value>,
    /// Vector phis whose lanes are completed after the walk
    deferred: Vec<InstId>,
    dead: Vec<InstId>,
    dead_set: FxHashSet<InstId>,
}

impl<'f> Scalarizer<'f> {
    fn new(func: &'f mut Function) -> Self {
        Self {
            func,
            lanes: FxHashMap::default(),
            lane_refs: FxHashMap::default(),
            spills: FxHashMap::default(),
            deferred: Vec::new(),
            dead: Vec::new(),
            dead_set: FxHashSet::default(),
        }
    }

    fn involves_vectors(&self, id: InstId) -> bool {
        let inst = self.func.inst(id);
        inst.ty.is_vector()
            || inst
                .op
                .operands()
                .iter()
                .any(|v| self.func.value_type(*v).is_vector())
    }

    fn set_lanes(&mut self, vector: Value, lanes: Vec<Value>) {
        for lane in &lanes {
            self.lane_refs.entry(*lane).or_default().push(vector);
        }
        self.lanes.insert(vector, lanes);
    }

    fn kill(&mut self, id: InstId) {
        if self.dead_set.insert(id) {
            self.dead.push(id);
        }
    }

    /// Lanes of a vector value; constants and arguments are split on first use.
    fn lanes_of(&mut self, vector: Value) -> Result<Vec<Value>> {
        if let Some(lanes) = self.lanes.get(&vector) {
            return Ok(lanes.clone());
        }
        let ty = self.func.value_type(vector);
        let count = ty.lanes().unwrap_or(1) as usize;
        let lanes = if let Some(constant) = self.func.as_constant(vector).cloned() {
            let mut lanes = Vec::with_capacity(count);
            for i in 0..count {
                let Some(lane) = constant.lane(i) else {
                    return Err(unsupported!(self.func, "constant {} has no lane {}", ty, i));
                };
                lanes.push(self.func.constant(lane));
            }
            lanes
        } else if matches!(vector, Value::Arg(_)) {
            // Split on first use rather than up front, but always at the top of the entry
            // block, so the lanes dominate every use exactly as an eager split would.
            let entry = self.func.entry();
            let mut lanes = Vec::with_capacity(count);
            for i in 0..count {
                let mut b = crate::ir::InstBuilder::at(self.func, entry, i);
                let index = b.const_int(32, i as u64);
                lanes.push(b.extract_element(vector, index));
            }
            lanes
        } else {
            return Err(malformed_error!(
                "{}: lanes of {} requested before its definition",
                self.func.name(),
                self.func.display_value(vector)
            ));
        };
        self.set_lanes(vector, lanes.clone());
        Ok(lanes)
    }

    /// Lane `i` of `value`, or `value` itself when it is a scalar broadcast to every lane.
    fn lane(&mut self, value: Value, i: usize) -> Result<Value> {
        if self.func.value_type(value).is_vector() {
            Ok(self.lanes_of(value)?[i])
        } else {
            Ok(value)
        }
    }

    /// Rebuilds a scalarized vector operand in front of `user`.
    fn materialize(&mut self, user: InstId, vector: Value) -> Result<Value> {
        let replaced = vector.as_inst().is_some_and(|id| self.dead_set.contains(&id));
        if !replaced {
            return Ok(vector);
        }
        let ty = self.func.value_type(vector);
        let lanes = self.lanes_of(vector)?;
        Ok(self.func.build_before(user)?.build_vector(ty, &lanes))
    }

    fn materialize_operands(&mut self, id: InstId) -> Result<()> {
        let mut operands = self.func.inst(id).op.operands();
        operands.sort();
        operands.dedup();
        for operand in operands {
            if !self.func.value_type(operand).is_vector() {
                continue;
            }
            let rebuilt = self.materialize(id, operand)?;
            if rebuilt != operand {
                self.func.inst_mut(id).op.replace_operand(operand, rebuilt);
            }
        }
        Ok(())
    }

    /// Splits the vector result of a kept instruction right after it.
    fn explode(&mut self, id: InstId) -> Result<()> {
        let count = self.func.inst(id).ty.lanes().unwrap_or(0) as usize;
        if count == 0 {
            return Ok(());
        }
        let mut b = self.func.build_after(id)?;
        let lanes = (0..count)
            .map(|i| {
                let index = b.const_int(32, i as u64);
                b.extract_element(Value::Inst(id), index)
            })
            .collect();
        self.set_lanes(Value::Inst(id), lanes);
        Ok(())
    }

    fn keep(&mut self, id: InstId) -> Result<()> {
        self.materialize_operands(id)?;
        self.explode(id)
    }

    fn per_component(&mut self, id: InstId) -> Result<()> {
        let inst = self.func.inst(id).clone();
        let count = inst.ty.lanes().unwrap_or(1) as usize;
        let lane_ty = inst.ty.scalar_type().clone();
        let operands = inst.op.operands();
        let mut lanes = Vec::with_capacity(count);
        for i in 0..count {
            let mut scalars = Vec::with_capacity(operands.len());
            for operand in &operands {
                scalars.push(self.lane(*operand, i)?);
            }
            let mut op = inst.op.clone();
            let mut scalars = scalars.into_iter();
            op.visit_operands_mut(|v| {
                if let Some(scalar) = scalars.next() {
                    *v = scalar;
                }
            });
            let mut b = self.func.build_before(id)?;
            lanes.push(Value::Inst(b.inst(op, lane_ty.clone())));
        }
        self.set_lanes(Value::Inst(id), lanes);
        self.kill(id);
        Ok(())
    }

    fn shuffle(&mut self, id: InstId, lhs: Value, rhs: Value, mask: &[i32]) -> Result<()> {
        let source = self.func.value_type(lhs);
        let width = source.lanes().unwrap_or(1) as i32;
        let undef = self.func.constant(Constant::Undef(source.scalar_type().clone()));
        let mut lanes = Vec::with_capacity(mask.len());
        for select in mask {
            let lane = match *select {
                s if s < 0 => undef,
                s if s < width => self.lanes_of(lhs)?[s as usize],
                s => self.lanes_of(rhs)?[(s - width) as usize],
            };
            lanes.push(lane);
        }
        self.set_lanes(Value::Inst(id), lanes);
        self.kill(id);
        Ok(())
    }

    fn extract(&mut self, id: InstId, vector: Value, index: Value) -> Result<()> {
        let Some(component) = self.func.const_int(index) else {
            return self.extract_dynamic(id, vector, index);
        };
        let lanes = self.lanes_of(vector)?;
        let lane = match usize::try_from(component).ok().and_then(|c| lanes.get(c)) {
            Some(lane) => *lane,
            None => {
                let elem = self.func.inst(id).ty.clone();
                self.func.constant(Constant::Undef(elem))
            }
        };
        if lane == Value::Inst(id) {
            return Ok(());
        }
        self.func.replace_all_uses(Value::Inst(id), lane);
        if let Some(vectors) = self.lane_refs.remove(&Value::Inst(id)) {
            for v in vectors {
                if let Some(entries) = self.lanes.get_mut(&v) {
                    for entry in entries.iter_mut().filter(|e| **e == Value::Inst(id)) {
                        *entry = lane;
                    }
                }
                self.lane_refs.entry(lane).or_default().push(v);
            }
        }
        self.kill(id);
        Ok(())
    }

    /// Dynamic extract: the lanes are stored to a private array and the element is loaded back.
    fn extract_dynamic(&mut self, id: InstId, vector: Value, index: Value) -> Result<()> {
        let ty = self.func.value_type(vector);
        let elem = ty.scalar_type().clone();
        let count = ty.lanes().unwrap_or(1);
        let lanes = self.lanes_of(vector)?;

        let slot = match self.spills.get(&vector) {
            Some(slot) => *slot,
            None => {
                let entry = self.func.entry();
                let slot = crate::ir::InstBuilder::at(self.func, entry, 0)
                    .alloca(Type::array(elem.clone(), u64::from(count)), None);
                self.spills.insert(vector, slot);
                slot
            }
        };

        let mut b = self.func.build_before(id)?;
        for (i, lane) in lanes.iter().enumerate() {
            let offset = b.const_int(32, i as u64);
            let addr = b.gep(elem.clone(), slot, vec![offset]);
            b.store(*lane, addr);
        }
        let addr = b.gep(elem.clone(), slot, vec![index]);
        let loaded = b.load(elem, addr);
        self.func.replace_all_uses(Value::Inst(id), loaded);
        self.kill(id);
        log::trace!("{}: lanes of {} spilled for a dynamic extract", self.func.name(), id);
        Ok(())
    }

    fn insert(&mut self, id: InstId, vector: Value, element: Value, index: Value) -> Result<()> {
        let Some(component) = self.func.const_int(index) else {
            return Err(unsupported!(
                self.func,
                "insertelement {} with a variable index",
                id
            ));
        };
        let mut lanes = self.lanes_of(vector)?;
        let Some(slot) = usize::try_from(component).ok().and_then(|c| lanes.get_mut(c)) else {
            return Err(unsupported!(
                self.func,
                "insertelement {} index {} out of range",
                id,
                component
            ));
        };
        *slot = element;
        self.set_lanes(Value::Inst(id), lanes);
        self.kill(id);
        Ok(())
    }

    fn phi(&mut self, id: InstId, incoming: &[(Value, BlockId)]) -> Result<()> {
        let ty = self.func.inst(id).ty.clone();
        let count = ty.lanes().unwrap_or(1) as usize;
        let ready = incoming.iter().all(|(v, _)| {
            self.lanes.contains_key(v) || self.func.as_constant(*v).is_some() || v.is_arg()
        });

        let mut per_lane: Vec<Vec<(Value, BlockId)>> = vec![Vec::new(); count];
        if ready {
            for (value, block) in incoming {
                let lanes = self.lanes_of(*value)?;
                for (i, lane) in lanes.into_iter().enumerate() {
                    per_lane[i].push((lane, *block));
                }
            }
        } else {
            self.deferred.push(id);
        }

        let mut b = self.func.build_before(id)?;
        let lanes = per_lane
            .into_iter()
            .map(|incoming| b.phi(ty.scalar_type().clone(), incoming))
            .collect();
        self.set_lanes(Value::Inst(id), lanes);
        self.kill(id);
        Ok(())
    }

    fn complete_deferred(&mut self) -> Result<()> {
        for id in std::mem::take(&mut self.deferred) {
            let Op::Phi { incoming } = self.func.inst(id).op.clone() else {
                continue;
            };
            let phis = self.lanes_of(Value::Inst(id))?;
            for (value, block) in incoming {
                let lanes = self.lanes_of(value)?;
                for (phi, lane) in phis.iter().zip(lanes) {
                    let Some(phi) = phi.as_inst() else {
                        continue;
                    };
                    if let Op::Phi { incoming } = &mut self.func.inst_mut(phi).op {
                        incoming.push((lane, block));
                    }
                }
            }
        }
        Ok(())
    }

    fn scalarize(&mut self, id: InstId) -> Result<()> {
        let inst = self.func.inst(id).clone();
        match &inst.op {
            Op::Binary { .. } | Op::ICmp { .. } | Op::FCmp { .. } | Op::Select { .. } => {
                self.per_component(id)
            }
            Op::Cast { op, value } => {
                let from = self.func.value_type(*value).lanes();
                let to = inst.ty.lanes();
                if from.is_some() && from == to {
                    self.per_component(id)
                } else if *op == CastOp::BitCast || from.is_none() || to.is_none() {
                    self.keep(id)
                } else {
                    Err(unsupported!(self.func, "{} changing the lane count", op))
                }
            }
            Op::Intrinsic { intrinsic, .. } => {
                if intrinsic.per_component() {
                    self.per_component(id)
                } else {
                    Err(unsupported!(
                        self.func,
                        "intrinsic {} with vector operands",
                        intrinsic
                    ))
                }
            }
            Op::ShuffleVector { lhs, rhs, mask } => self.shuffle(id, *lhs, *rhs, mask),
            Op::ExtractElement { vector, index } => self.extract(id, *vector, *index),
            Op::InsertElement {
                vector,
                element,
                index,
            } => self.insert(id, *vector, *element, *index),
            Op::Phi { incoming } => self.phi(id, incoming),
            Op::Load { .. } | Op::Store { .. } | Op::Call { .. } => self.keep(id),
            Op::Alloca { .. } | Op::Gep { .. } => self.materialize_operands(id),
            other => Err(unsupported!(
                self.func,
                "{} of a vector value",
                other.mnemonic()
            )),
        }
    }
}

impl FunctionPass for ScalarizationPass {
    fn name(&self) -> &'static str {
        "scalarization"
    }

    fn description(&self) -> &'static str {
        "Replaces vector arithmetic with per-lane scalar instructions"
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
        let order = ControlFlowGraph::from_function(func).reverse_postorder();
        let mut scalarizer = Scalarizer::new(func);
        let mut touched = 0usize;
        for block in order {
            for id in scalarizer.func.block_insts(block).to_vec() {
                if !scalarizer.involves_vectors(id) {
                    continue;
                }
                scalarizer.scalarize(id)?;
                touched += 1;
            }
        }
        scalarizer.complete_deferred()?;

        let spilled = scalarizer.spills.len();
        let dead = std::mem::take(&mut scalarizer.dead);
        if touched == 0 {
            return Ok(false);
        }
        func.remove_all(&dead);

        log::debug!(
            "{name}: {} vector instructions scalarized, {} kept, {spilled} spills",
            dead.len(),
            touched - dead.len()
        );
        ctx.events
            .record(EventKind::VectorScalarized)
            .function(name.as_str())
            .pass(self.name())
            .message(format!("{} vector instructions replaced by lanes", dead.len()));
        if spilled > 0 {
            ctx.events
                .record(EventKind::LanesSpilled)
                .function(name.as_str())
                .pass(self.name())
                .message(format!("{spilled} vectors spilled for dynamic extracts"));
        }
        Ok(true)
    }
}
