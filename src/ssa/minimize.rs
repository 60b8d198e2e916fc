//! φ-minimization
//!
//! The conservative construction in `lower` places a φ for every live
//! pseudo at every block entry, so most φs are noise. Each pass classifies
//! every φ:
//!
//! - no arguments: defines nothing, delete;
//! - one distinct incoming version equal to the destination: a
//!   self-reference, delete;
//! - one distinct incoming version different from the destination: a
//!   trivial copy, delete and redirect the destination to it;
//! - two distinct incoming versions, one of which is the destination
//!   itself: equivalent to the other version on every non-self edge,
//!   delete and redirect;
//! - anything else is a genuine merge and survives.
//!
//! Redirections collect into a replacement table applied to every operand
//! slot of every instruction after the pass. Deleting one φ can make
//! another collapsible, so passes repeat until nothing changes. Lookup
//! values are resolved through the table transitively before application —
//! two φs deleted in the same pass may chain, and a non-transitive rewrite
//! would leave operands pointing at a version that no longer exists.

use std::collections::{HashMap, HashSet};

use crate::ssa::{SsaFunction, SsaInst, SsaProgram, SsaPseudo};

/// What a minimization run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinimizeStats {
    /// Fixpoint iterations, including the final pass that changed nothing
    pub passes: usize,
    pub phis_removed: usize,
    pub operands_rewritten: usize,
}

impl MinimizeStats {
    fn absorb(&mut self, other: MinimizeStats) {
        self.passes = self.passes.max(other.passes);
        self.phis_removed += other.phis_removed;
        self.operands_rewritten += other.operands_rewritten;
    }
}

/// Minimize every routine of a unit
pub fn minimize_program(program: &mut SsaProgram) -> MinimizeStats {
    let mut stats = MinimizeStats::default();
    for func in &mut program.functions {
        stats.absorb(minimize_function(func));
    }
    stats
}

/// Run φ-minimization on one routine until a pass deletes nothing and
/// rewrites nothing
pub fn minimize_function(func: &mut SsaFunction) -> MinimizeStats {
    let mut stats = MinimizeStats::default();
    loop {
        stats.passes += 1;
        let (removed, rewritten) = run_pass(func);
        stats.phis_removed += removed;
        stats.operands_rewritten += rewritten;
        if removed == 0 && rewritten == 0 {
            return stats;
        }
    }
}

fn run_pass(func: &mut SsaFunction) -> (usize, usize) {
    let mut table: HashMap<SsaPseudo, SsaPseudo> = HashMap::new();
    let mut removed = 0;

    for label in &func.schedule {
        let block = func.body.get_mut(label).unwrap();
        block.body.retain(|inst| {
            let (args, dest) = match inst {
                SsaInst::Phi { args, dest, .. } => (args, *dest),
                _ => return true,
            };
            if args.is_empty() {
                removed += 1;
                return false;
            }
            let versions: HashSet<i32> = args.iter().map(|a| a.version).collect();
            match versions.len() {
                1 => {
                    let sole = *versions.iter().next().unwrap();
                    if sole != dest.version {
                        table.insert(dest, SsaPseudo::new(dest.id, sole));
                    }
                    removed += 1;
                    false
                }
                2 if versions.contains(&dest.version) => {
                    let other = *versions.iter().find(|&&v| v != dest.version).unwrap();
                    table.insert(dest, SsaPseudo::new(dest.id, other));
                    removed += 1;
                    false
                }
                _ => true,
            }
        });
    }

    resolve_chains(&mut table);

    let mut rewritten = 0;
    if !table.is_empty() {
        for label in &func.schedule {
            let block = func.body.get_mut(label).unwrap();
            for inst in block.body.iter_mut() {
                rewritten += inst.update_all(&table);
            }
        }
    }

    (removed, rewritten)
}

/// Make every table value a non-key, so one lookup suffices during the
/// rewrite sweep. A cycle (two deleted φs naming only each other) is an
/// undefined-value island; chasing stops when a pseudo repeats.
fn resolve_chains(table: &mut HashMap<SsaPseudo, SsaPseudo>) {
    let keys: Vec<SsaPseudo> = table.keys().copied().collect();
    for key in keys {
        let mut seen = HashSet::new();
        seen.insert(key);
        let mut target = table[&key];
        while let Some(&next) = table.get(&target) {
            if !seen.insert(target) {
                break;
            }
            target = next;
        }
        table.insert(key, target);
    }
    table.retain(|k, v| k != v);
}
