//! Textual printing of modules and functions.
//!
//! The output follows the familiar LLVM assembly shape closely enough to be read by anyone
//! used to it, but it is a debugging format only: there is no parser for it.

use std::fmt;

use crate::ir::{Callee, ConstExpr, Constant, Function, InstId, Module, Op, Type, Value};

/// Display adapter for a value inside its function.
pub struct DisplayValue<'a> {
    func: &'a Function,
    value: Value,
}

impl Function {
    /// Returns a displayable form of `value`.
    #[must_use]
    pub fn display_value(&self, value: Value) -> DisplayValue<'_> {
        DisplayValue { func: self, value }
    }

    /// Formats a single instruction.
    #[must_use]
    pub fn display_inst(&self, id: InstId) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = write_inst(&mut out, self, id);
        out
    }
}

impl fmt::Display for DisplayValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Inst(id) => write!(f, "{id}"),
            Value::Arg(index) => match self.func.params().get(index as usize) {
                Some(param) if !param.name.is_empty() => write!(f, "%{}", param.name),
                _ => write!(f, "%arg{index}"),
            },
            Value::Const(id) => write_constant(f, self.func.const_data(id)),
        }
    }
}

fn write_constant(f: &mut dyn fmt::Write, constant: &Constant) -> fmt::Result {
    match constant {
        Constant::Int(value) => write!(f, "{value}"),
        Constant::Float { kind, bits } => match kind {
            crate::ir::FloatKind::Single => write!(f, "{:?}", f32::from_bits(*bits as u32)),
            crate::ir::FloatKind::Double => write!(f, "{:?}", f64::from_bits(*bits)),
            crate::ir::FloatKind::Half => write!(f, "0xH{bits:04x}"),
        },
        Constant::Null(_) => write!(f, "null"),
        Constant::Undef(_) => write!(f, "undef"),
        Constant::Zero(_) => write!(f, "zeroinitializer"),
        Constant::Vector(lanes) => {
            write!(f, "<")?;
            for (i, lane) in lanes.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} ", lane.ty())?;
                write_constant(f, lane)?;
            }
            write!(f, ">")
        }
        Constant::Aggregate { fields, .. } => {
            write!(f, "{{ ")?;
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} ", field.ty())?;
                write_constant(f, field)?;
            }
            write!(f, " }}")
        }
        Constant::Function { name, .. } | Constant::Global { name, .. } => write!(f, "@{name}"),
        Constant::Expr(expr) => match expr.as_ref() {
            ConstExpr::Cast { op, value, ty } => {
                write!(f, "{op} ({} ", value.ty())?;
                write_constant(f, value)?;
                write!(f, " to {ty})")
            }
            ConstExpr::Binary { op, lhs, rhs } => {
                write!(f, "{op} (")?;
                write_constant(f, lhs)?;
                write!(f, ", ")?;
                write_constant(f, rhs)?;
                write!(f, ")")
            }
            ConstExpr::ICmp { pred, lhs, rhs } => {
                write!(f, "icmp {pred} (")?;
                write_constant(f, lhs)?;
                write!(f, ", ")?;
                write_constant(f, rhs)?;
                write!(f, ")")
            }
            ConstExpr::Gep {
                source,
                base,
                indices,
            } => {
                write!(f, "getelementptr ({source}, ")?;
                write_constant(f, base)?;
                for index in indices {
                    write!(f, ", ")?;
                    write_constant(f, index)?;
                }
                write!(f, ")")
            }
        },
    }
}

fn write_inst(out: &mut dyn fmt::Write, func: &Function, id: InstId) -> fmt::Result {
    let inst = func.inst(id);
    let v = |value: Value| func.display_value(value);
    if inst.ty != Type::Void {
        write!(out, "{id} = ")?;
    }
    match &inst.op {
        Op::Binary { op, lhs, rhs } => write!(out, "{op} {} {}, {}", inst.ty, v(*lhs), v(*rhs)),
        Op::ICmp { pred, lhs, rhs } => write!(
            out,
            "icmp {pred} {} {}, {}",
            func.value_type(*lhs),
            v(*lhs),
            v(*rhs)
        ),
        Op::FCmp { pred, lhs, rhs } => write!(
            out,
            "fcmp {pred} {} {}, {}",
            func.value_type(*lhs),
            v(*lhs),
            v(*rhs)
        ),
        Op::Cast { op, value } => write!(
            out,
            "{op} {} {} to {}",
            func.value_type(*value),
            v(*value),
            inst.ty
        ),
        Op::Select {
            cond,
            on_true,
            on_false,
        } => write!(
            out,
            "select {}, {} {}, {}",
            v(*cond),
            inst.ty,
            v(*on_true),
            v(*on_false)
        ),
        Op::Phi { incoming } => {
            write!(out, "phi {}", inst.ty)?;
            for (i, (value, block)) in incoming.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(out, "{sep}[ {}, {block} ]", v(*value))?;
            }
            Ok(())
        }
        Op::Alloca {
            allocated, count, ..
        } => {
            write!(out, "alloca {allocated}")?;
            if let Some(count) = count {
                write!(out, ", {}", v(*count))?;
            }
            Ok(())
        }
        Op::Load { ptr, access, .. } => {
            let volatile = if *access == crate::ir::Access::Simple {
                String::new()
            } else {
                format!("{access} ")
            };
            write!(
                out,
                "load {volatile}{}, {} {}",
                inst.ty,
                func.value_type(*ptr),
                v(*ptr)
            )
        }
        Op::Store {
            value, ptr, access, ..
        } => {
            let volatile = if *access == crate::ir::Access::Simple {
                String::new()
            } else {
                format!("{access} ")
            };
            write!(
                out,
                "store {volatile}{} {}, {} {}",
                func.value_type(*value),
                v(*value),
                func.value_type(*ptr),
                v(*ptr)
            )
        }
        Op::Gep {
            source,
            base,
            indices,
            ..
        } => {
            write!(out, "getelementptr {source}, {} {}", inst.ty, v(*base))?;
            for index in indices {
                write!(out, ", {} {}", func.value_type(*index), v(*index))?;
            }
            Ok(())
        }
        Op::ExtractElement { vector, index } => write!(
            out,
            "extractelement {} {}, {}",
            func.value_type(*vector),
            v(*vector),
            v(*index)
        ),
        Op::InsertElement {
            vector,
            element,
            index,
        } => write!(
            out,
            "insertelement {} {}, {}, {}",
            inst.ty,
            v(*vector),
            v(*element),
            v(*index)
        ),
        Op::ShuffleVector { lhs, rhs, mask } => {
            write!(out, "shufflevector {}, {}, {mask:?}", v(*lhs), v(*rhs))
        }
        Op::ExtractValue { aggregate, indices } => {
            write!(out, "extractvalue {}, {indices:?}", v(*aggregate))
        }
        Op::InsertValue {
            aggregate,
            element,
            indices,
        } => write!(
            out,
            "insertvalue {}, {}, {indices:?}",
            v(*aggregate),
            v(*element)
        ),
        Op::Call { callee, args, .. } => {
            match callee {
                Callee::Direct(name) => write!(out, "call {} @{name}(", inst.ty)?,
                Callee::Indirect(target) => write!(out, "call {} {}(", inst.ty, v(*target))?,
            }
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(out, ", ")?;
                }
                write!(out, "{} {}", func.value_type(*arg), v(*arg))?;
            }
            write!(out, ")")
        }
        Op::Intrinsic { intrinsic, args } => {
            write!(out, "call {} @llvm.{intrinsic}(", inst.ty)?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(out, ", ")?;
                }
                write!(out, "{}", v(*arg))?;
            }
            write!(out, ")")
        }
        Op::LandingPad { clauses } => {
            write!(out, "landingpad {}", inst.ty)?;
            for clause in clauses {
                write!(out, " catch {}", v(*clause))?;
            }
            Ok(())
        }
        Op::Br { target } => write!(out, "br label %{target}"),
        Op::CondBr {
            cond,
            on_true,
            on_false,
        } => write!(
            out,
            "br i1 {}, label %{on_true}, label %{on_false}",
            v(*cond)
        ),
        Op::Ret { value: Some(value) } => {
            write!(out, "ret {} {}", func.value_type(*value), v(*value))
        }
        Op::Ret { value: None } => write!(out, "ret void"),
        Op::Unreachable => write!(out, "unreachable"),
        Op::Detached => write!(out, "<detached>"),
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = if self.is_declaration() {
            "declare"
        } else {
            "define"
        };
        write!(f, "{keyword} {} {} @{}(", self.linkage, self.ret_type(), self.name())?;
        for (i, param) in self.params().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} %{}", param.ty, param.name)?;
        }
        if self.is_variadic() {
            write!(f, ", ...")?;
        }
        write!(f, ")")?;
        if !self.attrs.is_empty() {
            write!(f, " #{{{:?}}}", self.attrs)?;
        }
        if self.is_declaration() {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for block in self.block_ids() {
            write!(f, "{block}:")?;
            if let Some(hint) = self.loop_hints.get(&block) {
                write!(f, "  ; loop {hint:?}")?;
            }
            writeln!(f)?;
            for id in self.block_insts(block) {
                let mut line = String::new();
                write_inst(&mut line, self, *id)?;
                writeln!(f, "  {line}")?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {} (version {})", self.name, self.ocl_version)?;
        for global in &self.globals {
            write!(
                f,
                "@{} = {} addrspace({}) {} {}",
                global.name,
                global.linkage,
                global.space.number(),
                if global.constant { "constant" } else { "global" },
                global.ty
            )?;
            if let Some(init) = &global.initializer {
                let mut text = String::new();
                write_constant(&mut text, init)?;
                write!(f, " {text}")?;
            }
            writeln!(f)?;
        }
        if !self.block_functions.is_empty() {
            writeln!(f, "; block functions: {:?}", self.block_functions)?;
        }
        for func in &self.functions {
            writeln!(f)?;
            if self.is_kernel(func) {
                writeln!(f, "; kernel")?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BinaryOp, Function, Param, Type, Value};

    #[test]
    fn test_function_display() {
        let mut func = Function::new("add", vec![Param::new("a", Type::I32)], Type::I32);
        let entry = func.add_block("entry");
        let mut b = func.build_at_end(entry);
        let one = b.const_int(32, 1);
        let sum = b.binary(BinaryOp::Add, Value::Arg(0), one);
        b.ret(Some(sum));
        let text = func.to_string();
        assert!(text.contains("define external i32 @add(i32 %a) {"));
        assert!(text.contains("%0 = add i32 %a, 1"));
        assert!(text.contains("ret i32 %0"));
    }
}
