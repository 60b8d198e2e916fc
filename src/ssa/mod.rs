//! SSA — the block-structured, versioned intermediate representation
//!
//! RTL routines are carved into basic blocks whose instructions write each
//! versioned pseudo exactly once; φ-instructions at block entries merge
//! versions flowing in from predecessor blocks. Blocks reference each other
//! by label only — the control-flow graph is the `body` map plus each
//! block's `outlabels`, and predecessor lists are derived on demand, never
//! stored.
//!
//! `lower` builds this form from RTL; `minimize` deletes the redundant
//! φ-instructions the conservative construction inserts.

pub mod lower;
pub mod minimize;

pub use lower::lower_program;
pub use minimize::{minimize_function, minimize_program, MinimizeStats};

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

use crate::rtl::{BbranchOp, BinOp, Label, UbranchOp, UnOp};
use crate::source::{GlobalVar, Type};

/// SSA construction error. All variants are internal-consistency violations
/// of the input IR; any one of them aborts the compilation unit.
#[derive(Debug, Error)]
pub enum SsaError {
    #[error("duplicate block at {label} in routine '{routine}'")]
    DuplicateBlock { routine: String, label: Label },

    #[error("reference to non-existent label {label} in routine '{routine}'")]
    MissingLabel { routine: String, label: Label },

    #[error("straight-line cycle through {label} in routine '{routine}'")]
    CyclicFallthrough { routine: String, label: Label },

    #[error("read of %{pseudo} in block {block} of routine '{routine}' has no defining path")]
    UndefinedRead {
        routine: String,
        block: Label,
        pseudo: i32,
    },
}

/// A versioned pseudo-register.
///
/// Version `-1` (`SsaPseudo::UNRESOLVED`) marks a read whose version has not
/// been assigned yet; no operand carries it once construction finishes.
/// Structural equality compares both fields; `same_reg` is the
/// identifier-only relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SsaPseudo {
    pub id: i32,
    pub version: i32,
}

impl SsaPseudo {
    pub const UNRESOLVED: i32 = -1;

    pub fn new(id: i32, version: i32) -> Self {
        Self { id, version }
    }

    /// A read of `id` awaiting version assignment
    pub fn unresolved(id: i32) -> Self {
        Self {
            id,
            version: Self::UNRESOLVED,
        }
    }

    pub fn is_discard(self) -> bool {
        self.id == -1
    }

    pub fn is_unresolved(self) -> bool {
        self.version == Self::UNRESOLVED
    }

    /// Identifier-only equality, ignoring versions
    pub fn same_reg(self, other: SsaPseudo) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for SsaPseudo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_discard() {
            write!(f, "%_")
        } else if self.is_unresolved() {
            write!(f, "%{}.?", self.id)
        } else {
            write!(f, "%{}.{}", self.id, self.version)
        }
    }
}

/// An SSA instruction. Successor labels live on the containing block, not
/// the instruction, so the branch forms carry only their operands.
#[derive(Debug, Clone, PartialEq)]
pub enum SsaInst {
    Move {
        source: i64,
        dest: SsaPseudo,
    },
    Copy {
        source: SsaPseudo,
        dest: SsaPseudo,
    },
    Load {
        source: String,
        offset: i64,
        dest: SsaPseudo,
    },
    Store {
        source: SsaPseudo,
        dest: String,
        offset: i64,
    },
    Unop {
        op: UnOp,
        arg: SsaPseudo,
        dest: SsaPseudo,
    },
    /// The RTL read-modify-write binop split into two reads and one write:
    /// `dest <- lhs op rhs` where `lhs` is the prior value of the RTL
    /// destination and `rhs` the RTL source operand
    Binop {
        op: BinOp,
        lhs: SsaPseudo,
        rhs: SsaPseudo,
        dest: SsaPseudo,
    },
    Ubranch {
        op: UbranchOp,
        arg: SsaPseudo,
    },
    Bbranch {
        op: BbranchOp,
        arg1: SsaPseudo,
        arg2: SsaPseudo,
    },
    Call {
        func: String,
        args: Vec<SsaPseudo>,
        ret: SsaPseudo,
    },
    Return {
        arg: SsaPseudo,
    },
    /// Merge of incoming versions; `preds[i]` is the predecessor block the
    /// value `args[i]` arrives from
    Phi {
        args: Vec<SsaPseudo>,
        preds: Vec<Label>,
        dest: SsaPseudo,
    },
}

impl SsaInst {
    pub fn is_phi(&self) -> bool {
        matches!(self, SsaInst::Phi { .. })
    }

    /// The pseudo this instruction writes, if any. Discarded call results
    /// are not definitions.
    pub fn def(&self) -> Option<SsaPseudo> {
        match self {
            SsaInst::Move { dest, .. }
            | SsaInst::Copy { dest, .. }
            | SsaInst::Load { dest, .. }
            | SsaInst::Unop { dest, .. }
            | SsaInst::Binop { dest, .. }
            | SsaInst::Phi { dest, .. } => Some(*dest),
            SsaInst::Call { ret, .. } if !ret.is_discard() => Some(*ret),
            _ => None,
        }
    }

    fn def_mut(&mut self) -> Option<&mut SsaPseudo> {
        match self {
            SsaInst::Move { dest, .. }
            | SsaInst::Copy { dest, .. }
            | SsaInst::Load { dest, .. }
            | SsaInst::Unop { dest, .. }
            | SsaInst::Binop { dest, .. }
            | SsaInst::Phi { dest, .. } => Some(dest),
            SsaInst::Call { ret, .. } if !ret.is_discard() => Some(ret),
            _ => None,
        }
    }

    /// Mutable references to the plain read slots. φ arguments are excluded
    /// (their versions are assigned by wiring, not in-block resolution), as
    /// are discard sentinels.
    pub fn reads_mut(&mut self) -> Vec<&mut SsaPseudo> {
        let mut slots: Vec<&mut SsaPseudo> = Vec::new();
        match self {
            SsaInst::Move { .. } | SsaInst::Load { .. } | SsaInst::Phi { .. } => {}
            SsaInst::Copy { source, .. } => slots.push(source),
            SsaInst::Store { source, .. } => slots.push(source),
            SsaInst::Unop { arg, .. } => slots.push(arg),
            SsaInst::Binop { lhs, rhs, .. } => {
                slots.push(lhs);
                slots.push(rhs);
            }
            SsaInst::Ubranch { arg, .. } => slots.push(arg),
            SsaInst::Bbranch { arg1, arg2, .. } => {
                slots.push(arg1);
                slots.push(arg2);
            }
            SsaInst::Call { args, .. } => slots.extend(args.iter_mut()),
            SsaInst::Return { arg } => slots.push(arg),
        }
        slots.retain(|p| !p.is_discard());
        slots
    }

    /// Rewrite every operand slot (reads, writes and φ arguments) that
    /// matches a key of `table` to the mapped pseudo.
    pub fn update_all(&mut self, table: &HashMap<SsaPseudo, SsaPseudo>) -> usize {
        let mut rewritten = 0;
        for slot in self.reads_mut() {
            if let Some(&to) = table.get(slot) {
                *slot = to;
                rewritten += 1;
            }
        }
        if let SsaInst::Phi { args, .. } = self {
            for a in args.iter_mut() {
                if let Some(&to) = table.get(a) {
                    *a = to;
                    rewritten += 1;
                }
            }
        }
        if let Some(d) = self.def_mut() {
            if let Some(&to) = table.get(d) {
                *d = to;
                rewritten += 1;
            }
        }
        rewritten
    }
}

impl fmt::Display for SsaInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SsaInst::Move { source, dest } => write!(f, "move {source}, {dest}"),
            SsaInst::Copy { source, dest } => write!(f, "copy {source}, {dest}"),
            SsaInst::Load {
                source,
                offset,
                dest,
            } => write!(f, "load {source}+{offset}, {dest}"),
            SsaInst::Store {
                source,
                dest,
                offset,
            } => write!(f, "store {source}, {dest}+{offset}"),
            SsaInst::Unop { op, arg, dest } => write!(f, "unop {op}, {arg}, {dest}"),
            SsaInst::Binop { op, lhs, rhs, dest } => {
                write!(f, "binop {op}, {lhs}, {rhs}, {dest}")
            }
            SsaInst::Ubranch { op, arg } => write!(f, "ubranch {op}, {arg}"),
            SsaInst::Bbranch { op, arg1, arg2 } => write!(f, "bbranch {op}, {arg1}, {arg2}"),
            SsaInst::Call { func, args, ret } => {
                write!(f, "call {func}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, "), {ret}")
            }
            SsaInst::Return { arg } => write!(f, "return {arg}"),
            SsaInst::Phi { args, preds, dest } => {
                write!(f, "phi ")?;
                for (i, (a, p)) in args.iter().zip(preds).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{a}, {p}]")?;
                }
                write!(f, " >> {dest}")
            }
        }
    }
}

/// A basic block: φ-instructions first, straight-line body, then an
/// implicit exit through `outlabels` (0 labels after a return, 1 for a
/// fall-through or goto, 2 for a branch).
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub body: Vec<SsaInst>,
    pub outlabels: Vec<Label>,
}

impl BasicBlock {
    pub fn new(body: Vec<SsaInst>, outlabels: Vec<Label>) -> Self {
        Self { body, outlabels }
    }

    /// The most recent version written to each pseudo id, in block order.
    /// φ destinations count as writes.
    pub fn recent_versions(&self) -> HashMap<i32, i32> {
        let mut recent = HashMap::new();
        for inst in &self.body {
            if let Some(d) = inst.def() {
                if !d.is_unresolved() {
                    recent.insert(d.id, d.version);
                }
            }
        }
        recent
    }

    /// True when the block ends in an explicit terminator instruction
    pub fn has_terminator(&self) -> bool {
        matches!(
            self.body.last(),
            Some(SsaInst::Ubranch { .. })
                | Some(SsaInst::Bbranch { .. })
                | Some(SsaInst::Return { .. })
        )
    }
}

/// An SSA routine
#[derive(Debug, Clone)]
pub struct SsaFunction {
    pub name: String,
    pub enter: Label,
    pub body: HashMap<Label, BasicBlock>,
    pub schedule: Vec<Label>,
    pub input_regs: Vec<SsaPseudo>,
    pub ret_ty: Type,
}

impl SsaFunction {
    pub fn new(name: impl Into<String>, enter: Label, ret_ty: Type) -> Self {
        Self {
            name: name.into(),
            enter,
            body: HashMap::new(),
            schedule: Vec::new(),
            input_regs: Vec::new(),
            ret_ty,
        }
    }

    /// Append a block at `label`. Each label may be defined once.
    pub fn add_block(&mut self, label: Label, block: BasicBlock) -> Result<(), SsaError> {
        if self.body.contains_key(&label) {
            return Err(SsaError::DuplicateBlock {
                routine: self.name.clone(),
                label,
            });
        }
        self.schedule.push(label);
        self.body.insert(label, block);
        Ok(())
    }

    /// Predecessor lists, derived by inverting the out-label relation in
    /// schedule order. Every scheduled block gets an entry, possibly empty.
    pub fn predecessors(&self) -> HashMap<Label, Vec<Label>> {
        let mut preds: HashMap<Label, Vec<Label>> = HashMap::new();
        for label in &self.schedule {
            preds.entry(*label).or_default();
        }
        for label in &self.schedule {
            for out in &self.body[label].outlabels {
                preds.entry(*out).or_default().push(*label);
            }
        }
        preds
    }
}

/// An SSA compilation unit
#[derive(Debug, Clone)]
pub struct SsaProgram {
    pub global_vars: BTreeMap<String, GlobalVar>,
    pub functions: Vec<SsaFunction>,
}

// ============================================================================
// SSA text formatting (the .ssa stage dump)
// ============================================================================

/// Format an SSA program to its diagnostic text form
pub fn format_ssa(program: &SsaProgram) -> String {
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
        out.push_str(&format_ssa_function(func));
    }

    out
}

fn format_ssa_function(func: &SsaFunction) -> String {
    let mut out = String::new();

    let params: Vec<_> = func.input_regs.iter().map(SsaPseudo::to_string).collect();
    out.push_str(&format!(
        "routine {}({}) -> {} {{\n",
        func.name,
        params.join(", "),
        func.ret_ty
    ));
    out.push_str(&format!("  enter: {}\n", func.enter));

    for label in &func.schedule {
        let block = &func.body[label];
        out.push_str(&format!("  {label}:\n"));
        for inst in &block.body {
            out.push_str(&format!("    {inst}\n"));
        }
        let outs: Vec<_> = block.outlabels.iter().map(Label::to_string).collect();
        out.push_str(&format!("  out: {}\n", outs.join(", ")));
    }

    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: i32, version: i32) -> SsaPseudo {
        SsaPseudo::new(id, version)
    }

    #[test]
    fn test_pseudo_equality_relations() {
        assert_eq!(p(1, 0), p(1, 0));
        assert_ne!(p(1, 0), p(1, 1));
        assert!(p(1, 0).same_reg(p(1, 1)));
        assert!(!p(1, 0).same_reg(p(2, 0)));
    }

    #[test]
    fn test_unresolved_and_discard() {
        let u = SsaPseudo::unresolved(4);
        assert!(u.is_unresolved());
        assert_eq!(u.to_string(), "%4.?");
        assert!(SsaPseudo::new(-1, 0).is_discard());
    }

    #[test]
    fn test_recent_versions_takes_last_write() {
        let block = BasicBlock::new(
            vec![
                SsaInst::Phi {
                    args: vec![],
                    preds: vec![],
                    dest: p(0, 3),
                },
                SsaInst::Move {
                    source: 1,
                    dest: p(0, 0),
                },
                SsaInst::Move {
                    source: 2,
                    dest: p(0, 1),
                },
                SsaInst::Move {
                    source: 3,
                    dest: p(1, 0),
                },
            ],
            vec![],
        );
        let recent = block.recent_versions();
        assert_eq!(recent[&0], 1);
        assert_eq!(recent[&1], 0);
    }

    #[test]
    fn test_discarded_call_is_not_a_def() {
        let call = SsaInst::Call {
            func: "bx_print_int".into(),
            args: vec![p(0, 0)],
            ret: SsaPseudo::new(-1, 0),
        };
        assert!(call.def().is_none());
    }

    #[test]
    fn test_update_all_touches_every_slot() {
        let mut table = HashMap::new();
        table.insert(p(0, 2), p(0, 1));

        let mut binop = SsaInst::Binop {
            op: BinOp::Add,
            lhs: p(0, 2),
            rhs: p(1, 0),
            dest: p(0, 3),
        };
        assert_eq!(binop.update_all(&table), 1);
        match binop {
            SsaInst::Binop { lhs, .. } => assert_eq!(lhs, p(0, 1)),
            _ => unreachable!(),
        }

        let mut phi = SsaInst::Phi {
            args: vec![p(0, 2), p(0, 0)],
            preds: vec![Label(1), Label(2)],
            dest: p(0, 4),
        };
        assert_eq!(phi.update_all(&table), 1);
        match phi {
            SsaInst::Phi { args, .. } => assert_eq!(args, vec![p(0, 1), p(0, 0)]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_predecessors_inverts_outlabels() {
        let mut f = SsaFunction::new("f", Label(0), Type::Int64);
        f.add_block(Label(0), BasicBlock::new(vec![], vec![Label(1), Label(2)]))
            .unwrap();
        f.add_block(Label(1), BasicBlock::new(vec![], vec![Label(3)]))
            .unwrap();
        f.add_block(Label(2), BasicBlock::new(vec![], vec![Label(3)]))
            .unwrap();
        f.add_block(Label(3), BasicBlock::new(vec![], vec![]))
            .unwrap();

        let preds = f.predecessors();
        assert!(preds[&Label(0)].is_empty());
        assert_eq!(preds[&Label(1)], vec![Label(0)]);
        assert_eq!(preds[&Label(3)], vec![Label(1), Label(2)]);
    }

    #[test]
    fn test_duplicate_block_rejected() {
        let mut f = SsaFunction::new("f", Label(0), Type::Int64);
        f.add_block(Label(0), BasicBlock::default()).unwrap();
        assert!(f.add_block(Label(0), BasicBlock::default()).is_err());
    }

    #[test]
    fn test_phi_display_pairs_args_with_preds() {
        let phi = SsaInst::Phi {
            args: vec![p(1, 0), p(1, 1)],
            preds: vec![Label(1), Label(2)],
            dest: p(1, 3),
        };
        assert_eq!(phi.to_string(), "phi [%1.0, L1], [%1.1, L2] >> %1.3");
    }
}
