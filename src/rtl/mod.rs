//! RTL — the linear intermediate representation
//!
//! RTL is three-address code in which every non-terminating instruction
//! names its unique successor label explicitly. Control flow is therefore a
//! label-successor soup rather than a block graph; the `ssa` module carves
//! it into basic blocks.
//!
//! Labels and pseudo-registers are minted by explicit supplies scoped to a
//! compilation unit, so labels never collide across routines of the same
//! unit and tests can reset the counters by constructing fresh supplies.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::{GlobalVar, Type};

/// RTL error
#[derive(Debug, Error)]
pub enum RtlError {
    #[error("duplicate instruction at {label} in routine '{routine}'")]
    DuplicateLabel { routine: String, label: Label },
}

/// An instruction label, unique within a compilation unit
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Monotonic label supply for one compilation unit
#[derive(Debug, Default)]
pub struct LabelSupply {
    next: u32,
}

impl LabelSupply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> Label {
        let l = Label(self.next);
        self.next += 1;
        l
    }
}

/// A virtual register. `Pseudo::DISCARD` marks a result the caller ignores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pseudo(pub i32);

impl Pseudo {
    pub const DISCARD: Pseudo = Pseudo(-1);

    pub fn is_discard(self) -> bool {
        self == Pseudo::DISCARD
    }
}

impl fmt::Display for Pseudo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_discard() {
            write!(f, "%_")
        } else {
            write!(f, "%{}", self.0)
        }
    }
}

/// Monotonic pseudo-register supply for one compilation unit
#[derive(Debug, Default)]
pub struct PseudoSupply {
    next: i32,
}

impl PseudoSupply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> Pseudo {
        let p = Pseudo(self.next);
        self.next += 1;
        p
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

/// Binary operators. RTL binops are read-modify-write: `dest <- dest op src`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Sal,
    Sar,
    And,
    Or,
    Xor,
}

/// Unary branch conditions (test against zero)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UbranchOp {
    Jz,
    Jnz,
}

/// Binary branch conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BbranchOp {
    Je,
    Jne,
    Jl,
    Jnl,
    Jle,
    Jnle,
    Jg,
    Jng,
    Jge,
    Jnge,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnOp::Neg => "neg",
            UnOp::Not => "not",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Rem => "rem",
            BinOp::Sal => "sal",
            BinOp::Sar => "sar",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for UbranchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UbranchOp::Jz => "jz",
            UbranchOp::Jnz => "jnz",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for BbranchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BbranchOp::Je => "je",
            BbranchOp::Jne => "jne",
            BbranchOp::Jl => "jl",
            BbranchOp::Jnl => "jnl",
            BbranchOp::Jle => "jle",
            BbranchOp::Jnle => "jnle",
            BbranchOp::Jg => "jg",
            BbranchOp::Jng => "jng",
            BbranchOp::Jge => "jge",
            BbranchOp::Jnge => "jnge",
        };
        write!(f, "{s}")
    }
}

/// An RTL instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RtlInst {
    /// Load an immediate: `dest <- imm`
    Move {
        source: i64,
        dest: Pseudo,
        succ: Label,
    },
    /// Register copy: `dest <- source`
    Copy {
        source: Pseudo,
        dest: Pseudo,
        succ: Label,
    },
    /// Read a global: `dest <- [source + offset]`
    Load {
        source: String,
        offset: i64,
        dest: Pseudo,
        succ: Label,
    },
    /// Write a global: `[dest + offset] <- source`
    Store {
        source: Pseudo,
        dest: String,
        offset: i64,
        succ: Label,
    },
    /// In-place unary operation: `arg <- op arg`
    Unop {
        op: UnOp,
        arg: Pseudo,
        succ: Label,
    },
    /// Read-modify-write binary operation: `dest <- dest op source`
    Binop {
        op: BinOp,
        source: Pseudo,
        dest: Pseudo,
        succ: Label,
    },
    /// Branch on a test of one register against zero
    Ubranch {
        op: UbranchOp,
        arg: Pseudo,
        then_label: Label,
        else_label: Label,
    },
    /// Branch on a comparison of two registers
    Bbranch {
        op: BbranchOp,
        arg1: Pseudo,
        arg2: Pseudo,
        then_label: Label,
        else_label: Label,
    },
    Goto {
        succ: Label,
    },
    Call {
        func: String,
        args: Vec<Pseudo>,
        ret: Pseudo,
        succ: Label,
    },
    Return {
        arg: Pseudo,
    },
}

impl RtlInst {
    /// Successor labels in instruction order (branches list then, else)
    pub fn successors(&self) -> Vec<Label> {
        match self {
            RtlInst::Move { succ, .. }
            | RtlInst::Copy { succ, .. }
            | RtlInst::Load { succ, .. }
            | RtlInst::Store { succ, .. }
            | RtlInst::Unop { succ, .. }
            | RtlInst::Binop { succ, .. }
            | RtlInst::Goto { succ }
            | RtlInst::Call { succ, .. } => vec![*succ],
            RtlInst::Ubranch {
                then_label,
                else_label,
                ..
            }
            | RtlInst::Bbranch {
                then_label,
                else_label,
                ..
            } => vec![*then_label, *else_label],
            RtlInst::Return { .. } => vec![],
        }
    }

    /// Every pseudo mentioned by the instruction, discard included
    pub fn pseudos(&self) -> Vec<Pseudo> {
        match self {
            RtlInst::Move { dest, .. } => vec![*dest],
            RtlInst::Copy { source, dest, .. } => vec![*source, *dest],
            RtlInst::Load { dest, .. } => vec![*dest],
            RtlInst::Store { source, .. } => vec![*source],
            RtlInst::Unop { arg, .. } => vec![*arg],
            RtlInst::Binop { source, dest, .. } => vec![*source, *dest],
            RtlInst::Ubranch { arg, .. } => vec![*arg],
            RtlInst::Bbranch { arg1, arg2, .. } => vec![*arg1, *arg2],
            RtlInst::Goto { .. } => vec![],
            RtlInst::Call { args, ret, .. } => {
                let mut ps = args.clone();
                ps.push(*ret);
                ps
            }
            RtlInst::Return { arg } => vec![*arg],
        }
    }
}

impl fmt::Display for RtlInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtlInst::Move { source, dest, succ } => {
                write!(f, "move {source}, {dest}  --> {succ}")
            }
            RtlInst::Copy { source, dest, succ } => {
                write!(f, "copy {source}, {dest}  --> {succ}")
            }
            RtlInst::Load {
                source,
                offset,
                dest,
                succ,
            } => write!(f, "load {source}+{offset}, {dest}  --> {succ}"),
            RtlInst::Store {
                source,
                dest,
                offset,
                succ,
            } => write!(f, "store {source}, {dest}+{offset}  --> {succ}"),
            RtlInst::Unop { op, arg, succ } => write!(f, "unop {op}, {arg}  --> {succ}"),
            RtlInst::Binop {
                op,
                source,
                dest,
                succ,
            } => write!(f, "binop {op}, {source}, {dest}  --> {succ}"),
            RtlInst::Ubranch {
                op,
                arg,
                then_label,
                else_label,
            } => write!(f, "ubranch {op}, {arg}  --> {then_label}, {else_label}"),
            RtlInst::Bbranch {
                op,
                arg1,
                arg2,
                then_label,
                else_label,
            } => write!(
                f,
                "bbranch {op}, {arg1}, {arg2}  --> {then_label}, {else_label}"
            ),
            RtlInst::Goto { succ } => write!(f, "goto  --> {succ}"),
            RtlInst::Call {
                func,
                args,
                ret,
                succ,
            } => {
                write!(f, "call {func}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, "), {ret}  --> {succ}")
            }
            RtlInst::Return { arg } => write!(f, "return {arg}"),
        }
    }
}

/// An RTL routine: a label-to-instruction body plus the schedule giving the
/// textual order of those labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtlFunction {
    pub name: String,
    pub enter: Label,
    pub leave: Label,
    pub input_regs: Vec<Pseudo>,
    pub output_reg: Pseudo,
    pub body: HashMap<Label, RtlInst>,
    pub schedule: Vec<Label>,
    pub ret_ty: Type,
}

impl RtlFunction {
    pub fn new(name: impl Into<String>, enter: Label, leave: Label, ret_ty: Type) -> Self {
        Self {
            name: name.into(),
            enter,
            leave,
            input_regs: Vec::new(),
            output_reg: Pseudo::DISCARD,
            body: HashMap::new(),
            schedule: Vec::new(),
            ret_ty,
        }
    }

    /// Append an instruction at `label`. Each label may be defined once.
    pub fn add_instr(&mut self, label: Label, inst: RtlInst) -> Result<(), RtlError> {
        if self.body.contains_key(&label) {
            return Err(RtlError::DuplicateLabel {
                routine: self.name.clone(),
                label,
            });
        }
        self.schedule.push(label);
        self.body.insert(label, inst);
        Ok(())
    }
}

/// An RTL compilation unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtlProgram {
    pub global_vars: BTreeMap<String, GlobalVar>,
    pub functions: Vec<RtlFunction>,
}

impl RtlProgram {
    pub fn new() -> Self {
        Self {
            global_vars: BTreeMap::new(),
            functions: Vec::new(),
        }
    }
}

impl Default for RtlProgram {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RTL text formatting (the .rtl stage dump)
// ============================================================================

/// Format an RTL program to its diagnostic text form
pub fn format_rtl(program: &RtlProgram) -> String {
    let mut out = String::new();

    for (name, gv) in &program.global_vars {
        out.push_str(&format!("global {} = {} : {}\n", name, gv.init, gv.ty));
    }
    if !program.global_vars.is_empty() {
        out.push('\n');
    }

    for (i, func) in program.functions.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format_rtl_function(func));
    }

    out
}

fn format_rtl_function(func: &RtlFunction) -> String {
    let mut out = String::new();

    let params: Vec<_> = func.input_regs.iter().map(Pseudo::to_string).collect();
    out.push_str(&format!(
        "routine {}({}) -> {} {{\n",
        func.name,
        params.join(", "),
        func.ret_ty
    ));
    out.push_str(&format!("  enter: {}\n", func.enter));
    out.push_str(&format!("  leave: {}\n", func.leave));

    for label in &func.schedule {
        out.push_str(&format!("  {}: {}\n", label, func.body[label]));
    }

    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InitValue;

    #[test]
    fn test_supplies_are_monotonic() {
        let mut labels = LabelSupply::new();
        assert_eq!(labels.fresh(), Label(0));
        assert_eq!(labels.fresh(), Label(1));

        let mut pseudos = PseudoSupply::new();
        assert_eq!(pseudos.fresh(), Pseudo(0));
        assert_eq!(pseudos.fresh(), Pseudo(1));
        assert!(!pseudos.fresh().is_discard());
    }

    #[test]
    fn test_discard_sentinel() {
        assert!(Pseudo::DISCARD.is_discard());
        assert_eq!(Pseudo::DISCARD.to_string(), "%_");
        assert_eq!(Pseudo(3).to_string(), "%3");
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let mut f = RtlFunction::new("f", Label(0), Label(1), Type::Int64);
        f.add_instr(Label(0), RtlInst::Return { arg: Pseudo(0) })
            .unwrap();
        let err = f
            .add_instr(Label(0), RtlInst::Return { arg: Pseudo(1) })
            .unwrap_err();
        assert!(err.to_string().contains("L0"));
    }

    #[test]
    fn test_successors() {
        let mv = RtlInst::Move {
            source: 1,
            dest: Pseudo(0),
            succ: Label(4),
        };
        assert_eq!(mv.successors(), vec![Label(4)]);

        let br = RtlInst::Ubranch {
            op: UbranchOp::Jz,
            arg: Pseudo(0),
            then_label: Label(1),
            else_label: Label(2),
        };
        assert_eq!(br.successors(), vec![Label(1), Label(2)]);

        let ret = RtlInst::Return { arg: Pseudo(0) };
        assert!(ret.successors().is_empty());
    }

    #[test]
    fn test_instr_display() {
        let inst = RtlInst::Binop {
            op: BinOp::Sub,
            source: Pseudo(1),
            dest: Pseudo(2),
            succ: Label(7),
        };
        assert_eq!(inst.to_string(), "binop sub, %1, %2  --> L7");

        let call = RtlInst::Call {
            func: "bx_print_int".into(),
            args: vec![Pseudo(3)],
            ret: Pseudo::DISCARD,
            succ: Label(9),
        };
        assert_eq!(call.to_string(), "call bx_print_int(%3), %_  --> L9");
    }

    #[test]
    fn test_format_rtl_schedule_order() {
        let mut prog = RtlProgram::new();
        prog.global_vars.insert(
            "g".into(),
            GlobalVar {
                ty: Type::Int64,
                init: InitValue::Int(5),
            },
        );

        let mut f = RtlFunction::new("main", Label(0), Label(2), Type::Int64);
        f.add_instr(
            Label(0),
            RtlInst::Move {
                source: 42,
                dest: Pseudo(0),
                succ: Label(1),
            },
        )
        .unwrap();
        f.add_instr(Label(1), RtlInst::Return { arg: Pseudo(0) })
            .unwrap();
        prog.functions.push(f);

        let text = format_rtl(&prog);
        assert!(text.contains("global g = 5 : int64"));
        assert!(text.contains("routine main() -> int64 {"));
        let l0 = text.find("L0: move 42, %0  --> L1").unwrap();
        let l1 = text.find("L1: return %0").unwrap();
        assert!(l0 < l1);

        // byte-identical on reprint
        assert_eq!(text, format_rtl(&prog));
    }
}
