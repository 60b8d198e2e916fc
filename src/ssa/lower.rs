//! RTL → SSA lowering
//!
//! Four phases per routine, all driven by the RTL schedule so the result is
//! deterministic:
//!
//! 1. **Leaders**: find the labels that start basic blocks.
//! 2. **Blocks**: walk each leader's successor chain, translating linear
//!    instructions to their SSA analogues. Writes take fresh versions from a
//!    per-routine `latest` map; reads stay unresolved until phase 4.
//! 3. **φ placement and wiring**: put a placeholder φ for every live pseudo
//!    at the front of every block that has a predecessor, then fill each
//!    φ's arguments with the predecessors' last-written versions.
//! 4. **Read resolution**: scan each block top to bottom and rewrite
//!    unresolved reads to the most recent in-block definition (which is the
//!    φ at the block entry when nothing earlier in the block wrote it).
//!
//! The construction is deliberately conservative — no dominance frontiers —
//! and leaves the φ cleanup to `minimize`.

use std::collections::{HashMap, HashSet};

use crate::rtl::{Label, Pseudo, RtlFunction, RtlInst, RtlProgram};
use crate::ssa::{BasicBlock, SsaError, SsaFunction, SsaInst, SsaProgram, SsaPseudo};

/// Lower a whole RTL unit into SSA form
pub fn lower_program(program: &RtlProgram) -> Result<SsaProgram, SsaError> {
    let mut functions = Vec::with_capacity(program.functions.len());
    for func in &program.functions {
        functions.push(lower_function(func)?);
    }
    Ok(SsaProgram {
        global_vars: program.global_vars.clone(),
        functions,
    })
}

/// Lower one RTL routine into SSA form
pub fn lower_function(func: &RtlFunction) -> Result<SsaFunction, SsaError> {
    let mut ssa_fn = SsaFunction::new(func.name.clone(), func.enter, func.ret_ty);
    ssa_fn.input_regs = func
        .input_regs
        .iter()
        .filter(|p| !p.is_discard())
        .map(|p| SsaPseudo::new(p.0, 0))
        .collect();

    // latest[id] is the version the next write of id receives. Parameters
    // consume version 0 at routine entry.
    let mut latest: HashMap<i32, i32> = HashMap::new();
    for p in &ssa_fn.input_regs {
        latest.insert(p.id, 1);
    }

    let leaders = find_leaders(func);
    let leader_set: HashSet<Label> = leaders.iter().copied().collect();

    for &leader in &leaders {
        let block = build_block(func, leader, &leader_set, &mut latest)?;
        ssa_fn.add_block(leader, block)?;
    }

    place_phis(&mut ssa_fn, func, &mut latest);
    wire_phis(&mut ssa_fn);
    resolve_reads(&mut ssa_fn)?;
    check_defined_reads(&ssa_fn)?;

    Ok(ssa_fn)
}

/// A label leads a block when it is the routine entry, the target of a
/// branch or goto, or the successor of two or more instructions (a join
/// point reached by plain fall-through).
fn find_leaders(func: &RtlFunction) -> Vec<Label> {
    let mut ref_counts: HashMap<Label, usize> = HashMap::new();
    for label in &func.schedule {
        for succ in func.body[label].successors() {
            *ref_counts.entry(succ).or_insert(0) += 1;
        }
    }

    fn push(l: Label, leaders: &mut Vec<Label>, seen: &mut HashSet<Label>) {
        if seen.insert(l) {
            leaders.push(l);
        }
    }
    let mut leaders = Vec::new();
    let mut seen = HashSet::new();

    push(func.enter, &mut leaders, &mut seen);
    for label in &func.schedule {
        match &func.body[label] {
            RtlInst::Ubranch {
                then_label,
                else_label,
                ..
            }
            | RtlInst::Bbranch {
                then_label,
                else_label,
                ..
            } => {
                push(*then_label, &mut leaders, &mut seen);
                push(*else_label, &mut leaders, &mut seen);
            }
            RtlInst::Goto { succ } => push(*succ, &mut leaders, &mut seen),
            inst => {
                for succ in inst.successors() {
                    if ref_counts[&succ] > 1 {
                        push(succ, &mut leaders, &mut seen);
                    }
                }
            }
        }
    }
    leaders
}

/// Walk from `leader` along successor chains until a terminator or the next
/// leader, translating each instruction to SSA.
fn build_block(
    func: &RtlFunction,
    leader: Label,
    leader_set: &HashSet<Label>,
    latest: &mut HashMap<i32, i32>,
) -> Result<BasicBlock, SsaError> {
    let mut body = Vec::new();
    let mut outlabels = Vec::new();
    let mut visited = HashSet::new();
    let mut cur = leader;

    loop {
        if !visited.insert(cur) {
            return Err(SsaError::CyclicFallthrough {
                routine: func.name.clone(),
                label: cur,
            });
        }
        let inst = func.body.get(&cur).ok_or_else(|| SsaError::MissingLabel {
            routine: func.name.clone(),
            label: cur,
        })?;

        let next = match inst {
            RtlInst::Move { source, dest, succ } => {
                body.push(SsaInst::Move {
                    source: *source,
                    dest: write(latest, *dest),
                });
                Some(*succ)
            }
            RtlInst::Copy { source, dest, succ } => {
                body.push(SsaInst::Copy {
                    source: read(*source),
                    dest: write(latest, *dest),
                });
                Some(*succ)
            }
            RtlInst::Load {
                source,
                offset,
                dest,
                succ,
            } => {
                body.push(SsaInst::Load {
                    source: source.clone(),
                    offset: *offset,
                    dest: write(latest, *dest),
                });
                Some(*succ)
            }
            RtlInst::Store {
                source,
                dest,
                offset,
                succ,
            } => {
                body.push(SsaInst::Store {
                    source: read(*source),
                    dest: dest.clone(),
                    offset: *offset,
                });
                Some(*succ)
            }
            RtlInst::Unop { op, arg, succ } => {
                // read the old value before versioning the write
                let read_arg = read(*arg);
                body.push(SsaInst::Unop {
                    op: *op,
                    arg: read_arg,
                    dest: write(latest, *arg),
                });
                Some(*succ)
            }
            RtlInst::Binop {
                op,
                source,
                dest,
                succ,
            } => {
                let lhs = read(*dest);
                let rhs = read(*source);
                body.push(SsaInst::Binop {
                    op: *op,
                    lhs,
                    rhs,
                    dest: write(latest, *dest),
                });
                Some(*succ)
            }
            RtlInst::Ubranch {
                op,
                arg,
                then_label,
                else_label,
            } => {
                body.push(SsaInst::Ubranch {
                    op: *op,
                    arg: read(*arg),
                });
                outlabels.push(*then_label);
                outlabels.push(*else_label);
                None
            }
            RtlInst::Bbranch {
                op,
                arg1,
                arg2,
                then_label,
                else_label,
            } => {
                body.push(SsaInst::Bbranch {
                    op: *op,
                    arg1: read(*arg1),
                    arg2: read(*arg2),
                });
                outlabels.push(*then_label);
                outlabels.push(*else_label);
                None
            }
            RtlInst::Goto { succ } => {
                outlabels.push(*succ);
                None
            }
            RtlInst::Call {
                func: callee,
                args,
                ret,
                succ,
            } => {
                body.push(SsaInst::Call {
                    func: callee.clone(),
                    args: args.iter().map(|a| read(*a)).collect(),
                    ret: write(latest, *ret),
                });
                Some(*succ)
            }
            RtlInst::Return { arg } => {
                body.push(SsaInst::Return { arg: read(*arg) });
                None
            }
        };

        match next {
            None => break,
            Some(succ) if leader_set.contains(&succ) => {
                outlabels.push(succ);
                break;
            }
            Some(succ) => cur = succ,
        }
    }

    Ok(BasicBlock::new(body, outlabels))
}

/// An unresolved read of a pseudo (discard passes through untouched)
fn read(p: Pseudo) -> SsaPseudo {
    if p.is_discard() {
        SsaPseudo::new(-1, 0)
    } else {
        SsaPseudo::unresolved(p.0)
    }
}

/// A fresh write version for a pseudo. Records the pre-increment value as
/// the definition's version. Writes to the discard sentinel do not version.
fn write(latest: &mut HashMap<i32, i32>, p: Pseudo) -> SsaPseudo {
    if p.is_discard() {
        return SsaPseudo::new(-1, 0);
    }
    let v = latest.entry(p.0).or_insert(0);
    let version = *v;
    *v += 1;
    SsaPseudo::new(p.0, version)
}

/// Insert a placeholder φ for every pseudo mentioned in the routine at the
/// front of every block that has at least one predecessor. The entry block
/// normally has none and gets no φs, so parameter reads resolve to the
/// version-0 inputs.
fn place_phis(ssa_fn: &mut SsaFunction, func: &RtlFunction, latest: &mut HashMap<i32, i32>) {
    let mut ids: Vec<i32> = HashSet::<i32>::from_iter(
        func.schedule
            .iter()
            .flat_map(|l| func.body[l].pseudos())
            .chain(func.input_regs.iter().copied())
            .filter(|p| !p.is_discard())
            .map(|p| p.0),
    )
    .into_iter()
    .collect();
    ids.sort_unstable();

    let preds = ssa_fn.predecessors();
    let schedule = ssa_fn.schedule.clone();
    for label in schedule {
        if preds[&label].is_empty() {
            continue;
        }
        let phis: Vec<SsaInst> = ids
            .iter()
            .map(|&id| SsaInst::Phi {
                args: vec![],
                preds: vec![],
                dest: write(latest, Pseudo(id)),
            })
            .collect();
        let block = ssa_fn.body.get_mut(&label).unwrap();
        block.body.splice(0..0, phis);
    }
}

/// Fill every φ's arguments with the last-written version of its pseudo in
/// each predecessor, pairing each argument with the predecessor label it
/// arrives from. A predecessor that never defines the pseudo contributes
/// nothing.
fn wire_phis(ssa_fn: &mut SsaFunction) {
    let mut last_writes: HashMap<Label, HashMap<i32, i32>> = ssa_fn
        .schedule
        .iter()
        .map(|l| (*l, ssa_fn.body[l].recent_versions()))
        .collect();
    // parameters count as entry-block definitions with version 0
    if let Some(entry_writes) = last_writes.get_mut(&ssa_fn.enter) {
        for p in &ssa_fn.input_regs {
            entry_writes.entry(p.id).or_insert(0);
        }
    }

    let preds = ssa_fn.predecessors();
    for label in &ssa_fn.schedule {
        let block_preds = &preds[label];
        let block = ssa_fn.body.get_mut(label).unwrap();
        for inst in block.body.iter_mut() {
            if let SsaInst::Phi { args, preds, dest } = inst {
                args.clear();
                preds.clear();
                for p in block_preds {
                    if let Some(&v) = last_writes[p].get(&dest.id) {
                        args.push(SsaPseudo::new(dest.id, v));
                        preds.push(*p);
                    }
                }
            }
        }
    }
}

/// Rewrite every unresolved read to the most recent in-block definition
fn resolve_reads(ssa_fn: &mut SsaFunction) -> Result<(), SsaError> {
    let routine = ssa_fn.name.clone();
    let enter = ssa_fn.enter;
    let input_regs = ssa_fn.input_regs.clone();

    for label in &ssa_fn.schedule {
        let mut recent: HashMap<i32, i32> = HashMap::new();
        if *label == enter {
            for p in &input_regs {
                recent.insert(p.id, 0);
            }
        }
        let block = ssa_fn.body.get_mut(label).unwrap();
        for inst in block.body.iter_mut() {
            for slot in inst.reads_mut() {
                if slot.is_unresolved() {
                    match recent.get(&slot.id) {
                        Some(&v) => slot.version = v,
                        None => {
                            return Err(SsaError::UndefinedRead {
                                routine,
                                block: *label,
                                pseudo: slot.id,
                            })
                        }
                    }
                }
            }
            if let Some(d) = inst.def() {
                recent.insert(d.id, d.version);
            }
        }
    }
    Ok(())
}

/// A φ with no arguments defines nothing; a read that can only reach such a
/// φ (directly or through a chain of argument-less φs) has no defining
/// predecessor path and the input is malformed.
fn check_defined_reads(ssa_fn: &SsaFunction) -> Result<(), SsaError> {
    let mut undefined: HashSet<SsaPseudo> = HashSet::new();
    loop {
        let mut changed = false;
        for label in &ssa_fn.schedule {
            for inst in &ssa_fn.body[label].body {
                if let SsaInst::Phi { args, dest, .. } = inst {
                    let all_undef =
                        args.is_empty() || args.iter().all(|a| undefined.contains(a));
                    if all_undef && undefined.insert(*dest) {
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
    if undefined.is_empty() {
        return Ok(());
    }

    for label in &ssa_fn.schedule {
        for inst in &ssa_fn.body[label].body {
            if inst.is_phi() {
                continue;
            }
            let mut probe = inst.clone();
            for slot in probe.reads_mut() {
                if undefined.contains(slot) {
                    return Err(SsaError::UndefinedRead {
                        routine: ssa_fn.name.clone(),
                        block: *label,
                        pseudo: slot.id,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtl::{BinOp, UbranchOp};
    use crate::source::Type;

    fn ret_const(value: i64) -> RtlFunction {
        let mut f = RtlFunction::new("f", Label(0), Label(2), Type::Int64);
        f.add_instr(
            Label(0),
            RtlInst::Move {
                source: value,
                dest: Pseudo(0),
                succ: Label(1),
            },
        )
        .unwrap();
        f.add_instr(Label(1), RtlInst::Return { arg: Pseudo(0) })
            .unwrap();
        f
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let ssa = lower_function(&ret_const(42)).unwrap();
        assert_eq!(ssa.schedule, vec![Label(0)]);
        let block = &ssa.body[&Label(0)];
        assert!(block.outlabels.is_empty());
        assert_eq!(
            block.body,
            vec![
                SsaInst::Move {
                    source: 42,
                    dest: SsaPseudo::new(0, 0),
                },
                SsaInst::Return {
                    arg: SsaPseudo::new(0, 0),
                },
            ]
        );
    }

    #[test]
    fn test_branch_targets_are_leaders() {
        // L0: jz %0 -> L1, L2 ; L1: return %0 ; L2: return %0
        let mut f = RtlFunction::new("f", Label(0), Label(3), Type::Int64);
        f.input_regs.push(Pseudo(0));
        f.add_instr(
            Label(0),
            RtlInst::Ubranch {
                op: UbranchOp::Jz,
                arg: Pseudo(0),
                then_label: Label(1),
                else_label: Label(2),
            },
        )
        .unwrap();
        f.add_instr(Label(1), RtlInst::Return { arg: Pseudo(0) })
            .unwrap();
        f.add_instr(Label(2), RtlInst::Return { arg: Pseudo(0) })
            .unwrap();

        assert_eq!(find_leaders(&f), vec![Label(0), Label(1), Label(2)]);
        let ssa = lower_function(&f).unwrap();
        assert_eq!(ssa.body[&Label(0)].outlabels, vec![Label(1), Label(2)]);
    }

    #[test]
    fn test_fallthrough_join_is_a_leader() {
        // Both arms of a diamond reach L3 by plain fall-through; L3 must
        // still start a block.
        let mut f = RtlFunction::new("f", Label(0), Label(4), Type::Int64);
        f.input_regs.push(Pseudo(0));
        f.add_instr(
            Label(0),
            RtlInst::Ubranch {
                op: UbranchOp::Jz,
                arg: Pseudo(0),
                then_label: Label(1),
                else_label: Label(2),
            },
        )
        .unwrap();
        f.add_instr(
            Label(1),
            RtlInst::Move {
                source: 1,
                dest: Pseudo(1),
                succ: Label(3),
            },
        )
        .unwrap();
        f.add_instr(
            Label(2),
            RtlInst::Move {
                source: 2,
                dest: Pseudo(1),
                succ: Label(3),
            },
        )
        .unwrap();
        f.add_instr(Label(3), RtlInst::Return { arg: Pseudo(1) })
            .unwrap();

        assert_eq!(
            find_leaders(&f),
            vec![Label(0), Label(1), Label(2), Label(3)]
        );
        let ssa = lower_function(&f).unwrap();
        assert_eq!(ssa.body[&Label(1)].outlabels, vec![Label(3)]);
        assert_eq!(ssa.body[&Label(2)].outlabels, vec![Label(3)]);
    }

    #[test]
    fn test_goto_leader_keeps_empty_block() {
        // L0: goto L1 ; L1: return — the entry block is empty with one
        // out-label.
        let mut f = RtlFunction::new("f", Label(0), Label(2), Type::Int64);
        f.add_instr(Label(0), RtlInst::Goto { succ: Label(1) })
            .unwrap();
        f.add_instr(
            Label(1),
            RtlInst::Return {
                arg: Pseudo::DISCARD,
            },
        )
        .unwrap();

        let ssa = lower_function(&f).unwrap();
        let entry = &ssa.body[&Label(0)];
        assert!(entry.body.is_empty());
        assert_eq!(entry.outlabels, vec![Label(1)]);
    }

    #[test]
    fn test_binop_splits_into_two_reads_one_write() {
        // %1 <- %1 sub %0, then return %1
        let mut f = RtlFunction::new("f", Label(0), Label(3), Type::Int64);
        f.input_regs.push(Pseudo(0));
        f.input_regs.push(Pseudo(1));
        f.add_instr(
            Label(0),
            RtlInst::Binop {
                op: BinOp::Sub,
                source: Pseudo(0),
                dest: Pseudo(1),
                succ: Label(1),
            },
        )
        .unwrap();
        f.add_instr(Label(1), RtlInst::Return { arg: Pseudo(1) })
            .unwrap();

        let ssa = lower_function(&f).unwrap();
        let block = &ssa.body[&Label(0)];
        assert_eq!(
            block.body[0],
            SsaInst::Binop {
                op: BinOp::Sub,
                lhs: SsaPseudo::new(1, 0),
                rhs: SsaPseudo::new(0, 0),
                dest: SsaPseudo::new(1, 1),
            }
        );
        assert_eq!(
            block.body[1],
            SsaInst::Return {
                arg: SsaPseudo::new(1, 1),
            }
        );
    }

    #[test]
    fn test_missing_label_reported() {
        let mut f = RtlFunction::new("f", Label(0), Label(9), Type::Int64);
        f.add_instr(
            Label(0),
            RtlInst::Move {
                source: 1,
                dest: Pseudo(0),
                succ: Label(7),
            },
        )
        .unwrap();
        match lower_function(&f) {
            Err(SsaError::MissingLabel { label, .. }) => assert_eq!(label, Label(7)),
            other => panic!("expected MissingLabel, got {other:?}"),
        }
    }

    #[test]
    fn test_straight_line_cycle_reported() {
        // L0 -> L1 -> L0 with no branch anywhere
        let mut f = RtlFunction::new("f", Label(0), Label(9), Type::Int64);
        f.add_instr(
            Label(0),
            RtlInst::Move {
                source: 1,
                dest: Pseudo(0),
                succ: Label(1),
            },
        )
        .unwrap();
        f.add_instr(
            Label(1),
            RtlInst::Copy {
                source: Pseudo(0),
                dest: Pseudo(1),
                succ: Label(0),
            },
        )
        .unwrap();
        assert!(matches!(
            lower_function(&f),
            Err(SsaError::CyclicFallthrough { .. })
        ));
    }

    #[test]
    fn test_undefined_read_reported() {
        // return %0 with %0 never defined and not a parameter
        let mut f = RtlFunction::new("f", Label(0), Label(1), Type::Int64);
        f.add_instr(Label(0), RtlInst::Return { arg: Pseudo(0) })
            .unwrap();
        match lower_function(&f) {
            Err(SsaError::UndefinedRead { pseudo, .. }) => assert_eq!(pseudo, 0),
            other => panic!("expected UndefinedRead, got {other:?}"),
        }
    }

    #[test]
    fn test_parameters_read_as_version_zero() {
        let mut f = RtlFunction::new("id", Label(0), Label(1), Type::Int64);
        f.input_regs.push(Pseudo(0));
        f.add_instr(Label(0), RtlInst::Return { arg: Pseudo(0) })
            .unwrap();

        let ssa = lower_function(&f).unwrap();
        assert_eq!(ssa.input_regs, vec![SsaPseudo::new(0, 0)]);
        assert_eq!(
            ssa.body[&Label(0)].body[0],
            SsaInst::Return {
                arg: SsaPseudo::new(0, 0),
            }
        );
    }

    #[test]
    fn test_phis_precede_body_and_wire_from_preds() {
        // diamond writing %1 on both arms: the join block's φ for %1 gets
        // one argument per predecessor, in predecessor order
        let mut f = RtlFunction::new("f", Label(0), Label(4), Type::Int64);
        f.input_regs.push(Pseudo(0));
        f.add_instr(
            Label(0),
            RtlInst::Ubranch {
                op: UbranchOp::Jz,
                arg: Pseudo(0),
                then_label: Label(1),
                else_label: Label(2),
            },
        )
        .unwrap();
        f.add_instr(
            Label(1),
            RtlInst::Move {
                source: 1,
                dest: Pseudo(1),
                succ: Label(3),
            },
        )
        .unwrap();
        f.add_instr(
            Label(2),
            RtlInst::Move {
                source: 2,
                dest: Pseudo(1),
                succ: Label(3),
            },
        )
        .unwrap();
        f.add_instr(Label(3), RtlInst::Return { arg: Pseudo(1) })
            .unwrap();

        let ssa = lower_function(&f).unwrap();
        let join = &ssa.body[&Label(3)];
        let phi_count = join.body.iter().take_while(|i| i.is_phi()).count();
        assert!(phi_count >= 1);
        // all φs are at the front
        assert!(join.body[phi_count..].iter().all(|i| !i.is_phi()));

        let phi_for_1 = join
            .body
            .iter()
            .find_map(|i| match i {
                SsaInst::Phi { args, preds, dest } if dest.id == 1 => {
                    Some((args.clone(), preds.clone()))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(phi_for_1.1, vec![Label(1), Label(2)]);
        let versions: Vec<i32> = phi_for_1.0.iter().map(|a| a.version).collect();
        assert_eq!(versions.len(), 2);
        assert_ne!(versions[0], versions[1]);
    }

    #[test]
    fn test_no_unresolved_reads_after_lowering() {
        let mut f = RtlFunction::new("f", Label(0), Label(4), Type::Int64);
        f.input_regs.push(Pseudo(0));
        f.add_instr(
            Label(0),
            RtlInst::Ubranch {
                op: UbranchOp::Jz,
                arg: Pseudo(0),
                then_label: Label(1),
                else_label: Label(2),
            },
        )
        .unwrap();
        f.add_instr(
            Label(1),
            RtlInst::Move {
                source: 1,
                dest: Pseudo(1),
                succ: Label(3),
            },
        )
        .unwrap();
        f.add_instr(
            Label(2),
            RtlInst::Move {
                source: 2,
                dest: Pseudo(1),
                succ: Label(3),
            },
        )
        .unwrap();
        f.add_instr(Label(3), RtlInst::Return { arg: Pseudo(1) })
            .unwrap();

        let ssa = lower_function(&f).unwrap();
        for label in &ssa.schedule {
            for inst in &ssa.body[label].body {
                let mut probe = inst.clone();
                assert!(probe.reads_mut().iter().all(|p| !p.is_unresolved()));
                if let SsaInst::Phi { args, .. } = inst {
                    assert!(args.iter().all(|a| !a.is_unresolved()));
                }
            }
        }
    }
}
