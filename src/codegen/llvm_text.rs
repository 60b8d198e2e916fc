//! SSA → LLVM textual assembly
//!
//! Generates LLVM IR as text (.ll files) that clang can compile directly,
//! so no LLVM API binding is needed. Every versioned pseudo is renamed to a
//! fresh `x<N>` symbolic name the first time it is emitted — two versions
//! of the same pseudo get two names, which is what makes the output SSA.
//! The name counter is scoped to the compilation unit; the pseudo→name
//! table is per routine.

use std::collections::HashMap;

use thiserror::Error;

use crate::codegen::llvm::{LlvmLine, Value};
use crate::rtl::{BbranchOp, BinOp, UbranchOp, UnOp};
use crate::source::Type;
use crate::ssa::{BasicBlock, SsaFunction, SsaInst, SsaProgram, SsaPseudo};

/// Code generation error
#[derive(Debug, Error)]
pub enum CodeGenError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("unsupported type for global variable '{name}': {ty}")]
    UnsupportedGlobalType { name: String, ty: Type },
}

pub type CodeGenResult<T> = Result<T, CodeGenError>;

/// Text-based LLVM IR generator for one compilation unit
pub struct LlvmTextGen {
    target_triple: String,
    /// unit-scoped counter behind the x<N> symbolic names
    name_counter: u32,
}

impl LlvmTextGen {
    pub fn new() -> Self {
        Self {
            target_triple: Self::default_target_triple(),
            name_counter: 0,
        }
    }

    /// Create with a custom target triple
    pub fn with_target(target: impl Into<String>) -> Self {
        Self {
            target_triple: target.into(),
            name_counter: 0,
        }
    }

    fn default_target_triple() -> String {
        if cfg!(target_os = "macos") {
            "x86_64-apple-darwin".to_string()
        } else if cfg!(target_os = "windows") {
            "x86_64-pc-windows-msvc".to_string()
        } else {
            "x86_64-unknown-linux-gnu".to_string()
        }
    }

    /// Generate the complete LLVM module as text
    pub fn generate(&mut self, program: &SsaProgram) -> CodeGenResult<String> {
        let mut lines: Vec<LlvmLine> = Vec::new();

        lines.push(LlvmLine::directive("; ModuleID = 'bx'"));
        lines.push(LlvmLine::directive(&format!(
            "target triple = \"{}\"",
            self.target_triple
        )));
        lines.push(LlvmLine::directive(""));

        for (name, gv) in &program.global_vars {
            match gv.ty {
                Type::Int64 | Type::Bool => {
                    lines.push(LlvmLine::global_with_value(name, "i64", gv.init.as_i64()));
                }
                Type::Unit => {
                    return Err(CodeGenError::UnsupportedGlobalType {
                        name: name.clone(),
                        ty: gv.ty,
                    })
                }
            }
        }
        if !program.global_vars.is_empty() {
            lines.push(LlvmLine::directive(""));
        }

        // runtime declarations
        lines.push(LlvmLine::directive("declare void @bx_print_int(i64)"));
        lines.push(LlvmLine::directive(""));

        // return types of every callable name; externals seeded first
        let mut fn_return_types: HashMap<&str, &'static str> = HashMap::new();
        fn_return_types.insert("bx_print_int", "void");
        for func in &program.functions {
            fn_return_types.insert(&func.name, func.ret_ty.to_llvm());
        }

        for func in &program.functions {
            self.emit_function(&mut lines, func, &fn_return_types)?;
        }

        let mut out = String::new();
        for line in &lines {
            out.push_str(&line.to_string());
            out.push('\n');
        }
        Ok(out)
    }

    /// The symbolic name of a versioned pseudo, minted on first use
    fn translate(&mut self, names: &mut HashMap<SsaPseudo, String>, p: SsaPseudo) -> String {
        if let Some(name) = names.get(&p) {
            return name.clone();
        }
        let name = self.fresh_name();
        names.insert(p, name.clone());
        name
    }

    fn fresh_name(&mut self) -> String {
        let name = format!("x{}", self.name_counter);
        self.name_counter += 1;
        name
    }

    fn emit_function(
        &mut self,
        lines: &mut Vec<LlvmLine>,
        func: &SsaFunction,
        fn_return_types: &HashMap<&str, &'static str>,
    ) -> CodeGenResult<()> {
        let mut names: HashMap<SsaPseudo, String> = HashMap::new();

        let params: Vec<String> = func
            .input_regs
            .iter()
            .map(|p| format!("i64 %{}", self.translate(&mut names, *p)))
            .collect();
        lines.push(LlvmLine::define(
            &func.name,
            func.ret_ty.to_llvm(),
            &params,
        ));

        for label in &func.schedule {
            lines.push(LlvmLine::set_label(*label));
            let block = &func.body[label];
            for inst in &block.body {
                self.emit_instruction(lines, inst, block, &mut names, fn_return_types)?;
            }
            // implicit fall-through or goto exit
            if !block.has_terminator() && block.outlabels.len() == 1 {
                lines.push(LlvmLine::br_uncond(block.outlabels[0]));
            }
        }

        lines.push(LlvmLine::directive("}"));
        lines.push(LlvmLine::directive(""));
        Ok(())
    }

    fn emit_instruction(
        &mut self,
        lines: &mut Vec<LlvmLine>,
        inst: &SsaInst,
        block: &BasicBlock,
        names: &mut HashMap<SsaPseudo, String>,
        fn_return_types: &HashMap<&str, &'static str>,
    ) -> CodeGenResult<()> {
        match inst {
            SsaInst::Move { source, dest } => {
                let dest = self.translate(names, *dest);
                lines.push(LlvmLine::add(&dest, "i64", Value::Imm(0), Value::Imm(*source)));
            }
            SsaInst::Copy { source, dest } => {
                let source = self.translate(names, *source);
                let dest = self.translate(names, *dest);
                lines.push(LlvmLine::add(&dest, "i64", Value::Reg(source), Value::Imm(0)));
            }
            SsaInst::Load { source, dest, .. } => {
                let dest = self.translate(names, *dest);
                lines.push(LlvmLine::load(&dest, "i64", source));
            }
            SsaInst::Store { source, dest, .. } => {
                let source = self.translate(names, *source);
                lines.push(LlvmLine::store("i64", Value::Reg(source), dest));
            }
            SsaInst::Unop { op, arg, dest } => {
                let arg = Value::Reg(self.translate(names, *arg));
                let dest = self.translate(names, *dest);
                match op {
                    UnOp::Neg => lines.push(LlvmLine::mul(&dest, "i64", arg, Value::Imm(-1))),
                    UnOp::Not => lines.push(LlvmLine::xor(&dest, "i64", arg, Value::Imm(1))),
                }
            }
            SsaInst::Binop { op, lhs, rhs, dest } => {
                let lhs = Value::Reg(self.translate(names, *lhs));
                let rhs = Value::Reg(self.translate(names, *rhs));
                let dest = self.translate(names, *dest);
                let line = match op {
                    BinOp::Add => LlvmLine::add(&dest, "i64", lhs, rhs),
                    BinOp::Sub => LlvmLine::sub(&dest, "i64", lhs, rhs),
                    BinOp::Mul => LlvmLine::mul(&dest, "i64", lhs, rhs),
                    BinOp::Div => LlvmLine::udiv(&dest, "i64", lhs, rhs),
                    BinOp::Rem => LlvmLine::srem(&dest, "i64", lhs, rhs),
                    BinOp::Sal => LlvmLine::shl(&dest, "i64", lhs, rhs),
                    BinOp::Sar => LlvmLine::ashr(&dest, "i64", lhs, rhs),
                    BinOp::And => LlvmLine::and(&dest, "i64", lhs, rhs),
                    BinOp::Or => LlvmLine::or(&dest, "i64", lhs, rhs),
                    BinOp::Xor => LlvmLine::xor(&dest, "i64", lhs, rhs),
                };
                lines.push(line);
            }
            SsaInst::Ubranch { op, arg } => {
                let arg = Value::Reg(self.translate(names, *arg));
                let cond = self.fresh_name();
                match op {
                    UbranchOp::Jz => {
                        lines.push(LlvmLine::eq(&cond, "i64", arg, Value::Imm(0)))
                    }
                    UbranchOp::Jnz => {
                        lines.push(LlvmLine::ne(&cond, "i64", arg, Value::Imm(0)))
                    }
                }
                lines.push(LlvmLine::br_cond(&cond, block.outlabels[0], block.outlabels[1]));
            }
            SsaInst::Bbranch { op, arg1, arg2 } => {
                let arg1 = Value::Reg(self.translate(names, *arg1));
                let arg2 = Value::Reg(self.translate(names, *arg2));
                let cond = self.fresh_name();
                let line = match op {
                    BbranchOp::Je => LlvmLine::eq(&cond, "i64", arg1, arg2),
                    BbranchOp::Jne => LlvmLine::ne(&cond, "i64", arg1, arg2),
                    BbranchOp::Jl | BbranchOp::Jnge => LlvmLine::slt(&cond, "i64", arg1, arg2),
                    BbranchOp::Jle | BbranchOp::Jng => LlvmLine::sle(&cond, "i64", arg1, arg2),
                    BbranchOp::Jg | BbranchOp::Jnle => LlvmLine::sgt(&cond, "i64", arg1, arg2),
                    BbranchOp::Jge | BbranchOp::Jnl => LlvmLine::sge(&cond, "i64", arg1, arg2),
                };
                lines.push(line);
                lines.push(LlvmLine::br_cond(&cond, block.outlabels[0], block.outlabels[1]));
            }
            SsaInst::Call { func, args, ret } => {
                let ret_ty = *fn_return_types
                    .get(func.as_str())
                    .ok_or_else(|| CodeGenError::UnknownFunction(func.clone()))?;
                let args: Vec<Value> = args
                    .iter()
                    .map(|a| Value::Reg(self.translate(names, *a)))
                    .collect();
                if ret.is_discard() || ret_ty == "void" {
                    lines.push(LlvmLine::call(None, func, ret_ty, &args));
                } else {
                    let dest = self.translate(names, *ret);
                    lines.push(LlvmLine::call(Some(&dest), func, ret_ty, &args));
                }
            }
            SsaInst::Return { arg } => {
                if arg.is_discard() {
                    lines.push(LlvmLine::ret_void());
                } else {
                    let arg = self.translate(names, *arg);
                    lines.push(LlvmLine::ret_ty("i64", Value::Reg(arg)));
                }
            }
            SsaInst::Phi { args, preds, dest } => {
                let incoming: Vec<(String, crate::rtl::Label)> = args
                    .iter()
                    .zip(preds)
                    .map(|(a, p)| (self.translate(names, *a), *p))
                    .collect();
                let dest = self.translate(names, *dest);
                lines.push(LlvmLine::phi(&dest, "i64", &incoming));
            }
        }
        Ok(())
    }
}

impl Default for LlvmTextGen {
    fn default() -> Self {
        Self::new()
    }
}
