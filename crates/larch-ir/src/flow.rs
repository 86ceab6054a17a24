//! Flow-graph simplification.
//!
//! Branch rewrites through phi knowledge, unreachable-block elimination,
//! jump threading through empty blocks, and merging a block into its unique
//! parent. These run between instruction-simplification sweeps; anything
//! that changes the graph reports [`Repeat::CFG`] so the driver reorders
//! the blocks and loops.

use larch_front::Session;
use tracing::debug;

use crate::bb::EntryPoint;
use crate::insn::{BbId, InsnId, Opcode, PseudoId, PseudoKind, UseSlot, VOID};
use crate::optimize::Repeat;
use crate::simplify::insert_branch;

/// Truth value of a pseudo when statically known.
fn pseudo_truth_value(ep: &EntryPoint, pseudo: PseudoId) -> Option<bool> {
    match ep.pseudos[pseudo].kind {
        PseudoKind::Val => Some(ep.pseudos[pseudo].value != 0),
        PseudoKind::Reg => {
            let def = ep.pseudos[pseudo].def?;
            if ep.insns[def].opcode == Opcode::Setval && ep.insns[def].symbol.is_some() {
                // A symbol address is never null.
                return Some(true);
            }
            None
        }
        _ => None,
    }
}

/// Retargets the terminator of `parent` from `old` to `new`, updating the
/// edge lists. Returns `false` when the terminator cannot be rewritten.
fn rewrite_parent_branch(ep: &mut EntryPoint, parent: BbId, old: BbId, new: BbId) -> bool {
    let Some(term) = ep.terminator(parent) else {
        return false;
    };
    match ep.insns[term].opcode {
        Opcode::Br => {
            if ep.insns[term].bb_true == Some(old) {
                ep.insns[term].bb_true = Some(new);
            }
            if ep.insns[term].bb_false == Some(old) {
                ep.insns[term].bb_false = Some(new);
            }
            if ep.insns[term].bb_true == ep.insns[term].bb_false {
                ep.insns[term].bb_false = None;
                ep.kill_use(term, UseSlot::Src1);
            }
        }
        Opcode::Switch => {
            let mut jumps = std::mem::take(&mut ep.insns[term].multijmp);
            for jmp in &mut jumps {
                if jmp.target == old {
                    jmp.target = new;
                }
            }
            ep.insns[term].multijmp = jumps;
        }
        _ => return false,
    }
    ep.remove_edge(parent, old);
    if !ep.blocks[parent].children.contains(new) {
        ep.add_edge(parent, new);
    }
    true
}

/// `phi; br phi` at the top of a block: a parent whose incoming value has a
/// known truth value can jump straight to the taken side.
fn simplify_phi_branches(ep: &mut EntryPoint) -> Repeat {
    let mut repeat = Repeat::empty();
    let bbs = ep.bbs.to_vec();
    for bb in bbs {
        let live: Vec<InsnId> = ep.blocks[bb]
            .insns
            .iter()
            .filter(|&i| ep.insns[i].bb == Some(bb))
            .take(2)
            .collect();
        if live.len() < 2 {
            continue;
        }
        let (phi, br) = (live[0], live[1]);
        if ep.insns[phi].opcode != Opcode::Phi || ep.insns[br].opcode != Opcode::Br {
            continue;
        }
        if ep.insns[br].src1 != ep.insns[phi].target {
            continue;
        }
        let (Some(bb_true), Some(bb_false)) = (ep.insns[br].bb_true, ep.insns[br].bb_false)
        else {
            continue;
        };
        let phi_list = ep.insns[phi].phi_list.clone();
        for phi_pseudo in phi_list {
            if phi_pseudo == VOID {
                continue;
            }
            let Some(def) = ep.pseudos[phi_pseudo].def else {
                continue;
            };
            let Some(source) = ep.insns[def].bb else {
                continue;
            };
            let value = ep.insns[def].src1;
            let Some(truth) = pseudo_truth_value(ep, value) else {
                continue;
            };
            let target = if truth { bb_true } else { bb_false };
            if rewrite_parent_branch(ep, source, bb, target) {
                debug!(?source, ?bb, ?target, "threaded branch through phi");
                // The phi lost that incoming edge; void out its slot.
                if let Some(idx) = ep.insns[phi]
                    .phi_list
                    .iter()
                    .position(|&p| p == phi_pseudo)
                {
                    ep.kill_use(phi, UseSlot::Phi(idx as u16));
                }
                ep.kill_insn(def);
                repeat |= Repeat::CFG | Repeat::CSE;
            }
        }
    }
    repeat
}

/// Resolves cached switches whose selector became constant.
fn simplify_switches(ep: &mut EntryPoint) -> Repeat {
    let mut repeat = Repeat::empty();
    let switches = ep.switches.clone();
    for insn in switches {
        if ep.insns[insn].bb.is_none() || ep.insns[insn].opcode != Opcode::Switch {
            continue;
        }
        let cond = ep.insns[insn].src1;
        if ep.pseudos[cond].kind != PseudoKind::Val {
            continue;
        }
        let value = ep.pseudos[cond].value;
        let target = ep.insns[insn]
            .multijmp
            .iter()
            .find(|j| !j.is_default() && j.matches(value))
            .or_else(|| ep.insns[insn].multijmp.iter().find(|j| j.is_default()))
            .map(|j| j.target);
        if let Some(target) = target {
            repeat |= insert_branch(ep, insn, target);
        }
    }
    repeat
}

/// Kills every block unreachable from the entry.
pub fn kill_unreachable_bbs(ep: &mut EntryPoint) -> Repeat {
    let generation = ep.next_generation();
    // Mark from the entry.
    let mut stack = vec![ep.entry];
    ep.blocks[ep.entry].generation = generation;
    while let Some(bb) = stack.pop() {
        for child in ep.blocks[bb].children.to_vec() {
            if ep.blocks[child].generation != generation {
                ep.blocks[child].generation = generation;
                stack.push(child);
            }
        }
    }
    let mut repeat = Repeat::empty();
    let bbs = ep.bbs.to_vec();
    for bb in bbs {
        if ep.blocks[bb].generation == generation {
            continue;
        }
        kill_bb(ep, bb);
        repeat |= Repeat::CFG | Repeat::CSE;
    }
    repeat
}

fn kill_bb(ep: &mut EntryPoint, bb: BbId) {
    let insns = ep.blocks[bb].insns.to_vec();
    for insn in insns {
        // Phis must drop their source uses too.
        if ep.insns[insn].bb == Some(bb) && ep.insns[insn].opcode == Opcode::Phi {
            let n = ep.insns[insn].phi_list.len();
            for i in 0..n {
                ep.kill_use(insn, UseSlot::Phi(i as u16));
            }
        }
        ep.kill_insn(insn);
    }
    ep.blocks[bb].insns.clear();
    for child in ep.blocks[bb].children.to_vec() {
        ep.blocks[child].parents.delete_first(bb);
        ep.blocks[child].parents.pack();
    }
    ep.blocks[bb].children.clear();
    for parent in ep.blocks[bb].parents.to_vec() {
        ep.blocks[parent].children.delete_first(bb);
        ep.blocks[parent].children.pack();
    }
    ep.blocks[bb].parents.clear();
}

/// Jump threading and straight-line merging.
pub fn pack_basic_blocks(ep: &mut EntryPoint) -> Repeat {
    let mut repeat = Repeat::empty();
    let bbs = ep.bbs.to_vec();
    for bb in bbs {
        if ep.blocks[bb].insns.is_empty() {
            continue;
        }

        // A block that does nothing but jump can be bypassed.
        let mut only_branch: Option<InsnId> = None;
        let mut has_other = false;
        for insn in ep.blocks[bb].insns.iter() {
            if ep.insns[insn].bb != Some(bb) {
                continue;
            }
            match ep.insns[insn].opcode {
                Opcode::Nop | Opcode::Lnop | Opcode::Snop => {}
                Opcode::Br if only_branch.is_none() => only_branch = Some(insn),
                _ => {
                    has_other = true;
                    break;
                }
            }
        }
        if !has_other {
            if let Some(br) = only_branch {
                if let Some(replacement) = branch_target(ep, br) {
                    if replacement != bb {
                        let parents = ep.blocks[bb].parents.to_vec();
                        let mut all = !parents.is_empty() || ep.entry == bb;
                        for parent in parents {
                            if !rewrite_parent_branch(ep, parent, bb, replacement) {
                                all = false;
                            }
                        }
                        if all {
                            if ep.entry == bb {
                                ep.entry = replacement;
                            }
                            kill_bb(ep, bb);
                            repeat |= Repeat::CFG | Repeat::CSE;
                            continue;
                        }
                    }
                }
            }
        }

        // Merge into the unique parent whose only child is this block.
        if ep.entry == bb {
            continue;
        }
        if ep.blocks[bb].parents.len() != 1 {
            continue;
        }
        let Some(parent) = ep.blocks[bb].parents.first() else {
            continue;
        };
        if parent == bb || ep.blocks[parent].children.len() != 1 {
            continue;
        }
        // The block must not start with a phi (its parents pairing would be
        // lost in the merge).
        let starts_with_phi = ep.blocks[bb]
            .insns
            .iter()
            .filter(|&i| ep.insns[i].bb == Some(bb))
            .take(1)
            .any(|i| ep.insns[i].opcode == Opcode::Phi);
        if starts_with_phi {
            continue;
        }

        // Drop the parent's terminator and append this block's body.
        if let Some(term) = ep.terminator(parent) {
            ep.kill_insn(term);
        }
        let insns = ep.blocks[bb].insns.to_vec();
        for insn in insns {
            if ep.insns[insn].bb == Some(bb) {
                ep.insns[insn].bb = Some(parent);
                ep.blocks[parent].insns.push_back(insn);
            }
        }
        ep.blocks[bb].insns.clear();
        ep.remove_edge(parent, bb);
        for child in ep.blocks[bb].children.to_vec() {
            ep.blocks[child].parents.delete_first(bb);
            ep.blocks[child].parents.pack();
            if !ep.blocks[parent].children.contains(child) {
                ep.add_edge(parent, child);
            } else {
                // Parent already reaches the child some other way.
            }
        }
        ep.blocks[bb].children.clear();
        ep.blocks[bb].parents.clear();
        debug!(?parent, ?bb, "merged straight-line blocks");
        repeat |= Repeat::CFG | Repeat::CSE;
    }
    repeat
}

/// The single target of an unconditional (or constant) branch.
fn branch_target(ep: &EntryPoint, br: InsnId) -> Option<BbId> {
    let insn = &ep.insns[br];
    match (insn.bb_true, insn.bb_false) {
        (Some(t), None) => Some(t),
        (None, Some(f)) => Some(f),
        (Some(t), Some(f)) => match pseudo_truth_value(ep, insn.src1) {
            Some(true) => Some(t),
            Some(false) => Some(f),
            None => None,
        },
        (None, None) => None,
    }
}

/// The combined flow pass.
pub fn simplify_flow(ep: &mut EntryPoint, _sess: &Session) -> Repeat {
    let mut repeat = Repeat::empty();
    repeat |= simplify_phi_branches(ep);
    repeat |= simplify_switches(ep);
    repeat |= kill_unreachable_bbs(ep);
    repeat
}
