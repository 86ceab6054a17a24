//! Liveness tracking.
//!
//! Computes per-block `needs` (live on entry) and `defines` (available to
//! children) sets over trackable pseudos (registers and phi values), then
//! runs the backward fixpoint. Dead definitions — targets with no users —
//! are removed afterwards, and the instruction lists are packed for the
//! next pass.

use larch_core::ListCursor;

use crate::bb::EntryPoint;
use crate::insn::{Opcode, PseudoId, PseudoKind};
use crate::optimize::Repeat;

fn trackable(ep: &EntryPoint, p: PseudoId) -> bool {
    matches!(
        ep.pseudos[p].kind,
        PseudoKind::Reg | PseudoKind::Phi
    )
}

fn add_exclusive(list: &mut larch_core::ChunkList<PseudoId>, p: PseudoId) -> bool {
    if list.contains(p) {
        return false;
    }
    list.push_back(p);
    true
}

/// Clears previous liveness info before a re-run.
pub fn clear_liveness(ep: &mut EntryPoint) {
    for bb in ep.bbs.to_vec() {
        ep.blocks[bb].needs.clear();
        ep.blocks[bb].defines.clear();
    }
}

/// Computes `needs`/`defines` for every block and runs the fixpoint.
pub fn track_pseudo_liveness(ep: &mut EntryPoint) {
    clear_liveness(ep);
    let bbs = ep.bbs.to_vec();

    // Per-instruction uses and defs.
    for &bb in &bbs {
        for insn in ep.blocks[bb].insns.to_vec() {
            if ep.insns[insn].bb != Some(bb) {
                continue;
            }
            let slots = ep.insns[insn].use_slots();
            for slot in slots {
                let p = ep.insns[insn].slot(slot);
                if p != crate::insn::VOID && trackable(ep, p) {
                    let mut needs = std::mem::take(&mut ep.blocks[bb].needs);
                    add_exclusive(&mut needs, p);
                    ep.blocks[bb].needs = needs;
                }
            }
            if ep.insns[insn].opcode == Opcode::Phi {
                // A phi defines its target where its sources live.
                let target = ep.insns[insn].target;
                for &phi in ep.insns[insn].phi_list.clone().iter() {
                    if phi == crate::insn::VOID {
                        continue;
                    }
                    if let Some(def) = ep.pseudos[phi].def {
                        if let Some(src_bb) = ep.insns[def].bb {
                            let mut defines = std::mem::take(&mut ep.blocks[src_bb].defines);
                            add_exclusive(&mut defines, target);
                            ep.blocks[src_bb].defines = defines;
                        }
                    }
                }
            } else if ep.insns[insn].has_target() {
                let target = ep.insns[insn].target;
                if trackable(ep, target) {
                    let mut defines = std::mem::take(&mut ep.blocks[bb].defines);
                    add_exclusive(&mut defines, target);
                    ep.blocks[bb].defines = defines;
                }
            }
        }
    }

    // Locally defined pseudos are not needed from outside.
    for &bb in &bbs {
        let defines = ep.blocks[bb].defines.to_vec();
        for d in defines {
            let mut cursor = ListCursor::new(&ep.blocks[bb].needs);
            let mut needs = std::mem::take(&mut ep.blocks[bb].needs);
            while let Some(n) = cursor.next(&needs) {
                if n == d {
                    cursor.delete_current(&mut needs);
                }
            }
            needs.pack();
            ep.blocks[bb].needs = needs;
        }
    }

    // Backward fixpoint: a need with no local definition propagates to
    // every parent that does not define it.
    loop {
        let mut changed = false;
        for &bb in &bbs {
            let needs = ep.blocks[bb].needs.to_vec();
            let parents = ep.blocks[bb].parents.to_vec();
            for n in needs {
                for &parent in &parents {
                    if ep.blocks[parent].defines.contains(n) {
                        continue;
                    }
                    let mut pneeds = std::mem::take(&mut ep.blocks[parent].needs);
                    if add_exclusive(&mut pneeds, n) {
                        changed = true;
                    }
                    ep.blocks[parent].needs = pneeds;
                }
            }
        }
        if !changed {
            break;
        }
    }

    // Trim defines nobody downstream needs.
    for &bb in &bbs {
        let children = ep.blocks[bb].children.to_vec();
        let mut defines = std::mem::take(&mut ep.blocks[bb].defines);
        let mut cursor = ListCursor::new(&defines);
        while let Some(d) = cursor.next(&defines) {
            let used = children.iter().any(|&c| ep.blocks[c].needs.contains(d));
            if !used {
                cursor.delete_current(&mut defines);
            }
        }
        defines.pack();
        ep.blocks[bb].defines = defines;
    }
}

/// Removes definitions with no remaining users, then packs the instruction
/// lists so later passes see dense blocks.
pub fn remove_dead_insns(ep: &mut EntryPoint) -> Repeat {
    let mut repeat = Repeat::empty();
    let bbs = ep.bbs.to_vec();
    for &bb in &bbs {
        for insn in ep.blocks[bb].insns.to_vec() {
            if ep.insns[insn].bb != Some(bb) {
                continue;
            }
            if !ep.insns[insn].has_target() {
                continue;
            }
            if matches!(ep.insns[insn].opcode, Opcode::Call) {
                // Calls have side effects; an unused result does not kill
                // the call itself.
                continue;
            }
            let target = ep.insns[insn].target;
            if trackable(ep, target) && ep.pseudos[target].users.is_empty() {
                if ep.insns[insn].opcode == Opcode::Phi {
                    let n = ep.insns[insn].phi_list.len();
                    for i in 0..n {
                        ep.kill_use(insn, crate::insn::UseSlot::Phi(i as u16));
                    }
                }
                ep.kill_insn(insn);
                repeat |= Repeat::CSE;
            }
        }
    }
    pack_instruction_lists(ep);
    repeat
}

/// Drops dead instructions from the block lists.
pub fn pack_instruction_lists(ep: &mut EntryPoint) {
    let bbs = ep.bbs.to_vec();
    for bb in bbs {
        let mut insns = std::mem::take(&mut ep.blocks[bb].insns);
        let mut cursor = ListCursor::new(&insns);
        loop {
            let Some(insn) = cursor.next(&insns) else { break };
            if ep.insns[insn].bb != Some(bb) {
                cursor.delete_current(&mut insns);
            }
        }
        insns.pack();
        ep.blocks[bb].insns = insns;
    }
}
