//! Memory operation simplification and symbol promotion.
//!
//! Two layers:
//!
//! - [`simplify_memops`] works on raw loads/stores: within each block
//!   (walking backwards) a load whose address was stored or loaded earlier
//!   with the same shape forwards that value; a store shadowed by a later
//!   equal store dies.
//! - [`promote_symbols`] retires local, non-address-taken symbols entirely:
//!   loads become copies of the dominating stored value, inserting phis at
//!   merge points whose sources are `PhiSource` instructions appended to the
//!   predecessors just before their terminators.
//!
//! Partial dominance (overlapping but differently shaped accesses) aborts
//! the rewrite for that access.

use larch_front::symbol::{Mod, SymbolId};
use larch_front::Session;
use tracing::debug;

use crate::bb::EntryPoint;
use crate::insn::{BbId, InsnId, Instruction, Opcode, PseudoId, PseudoKind, UseSlot, VOID};
use crate::optimize::Repeat;

/// Memory-shape comparison: 1 = dominates, 0 = independent, -1 = unknown
/// (partial overlap or possible alias).
fn dominates(ep: &EntryPoint, pseudo: PseudoId, insn: InsnId, one: InsnId, local: bool) -> i32 {
    let one_op = ep.insns[one].opcode;
    if one_op == Opcode::Call {
        return if local { 0 } else { -1 };
    }
    if one_op != Opcode::Load && one_op != Opcode::Store {
        return 0;
    }
    if ep.insns[one].src1 != pseudo {
        if local {
            return 0;
        }
        // Two explicitly different symbols never alias.
        if ep.pseudos[ep.insns[one].src1].kind == PseudoKind::Sym {
            return 0;
        }
        return -1;
    }
    if !same_memop(ep, insn, one) {
        if one_op == Opcode::Load {
            return 0;
        }
        if !overlapping_memop(ep, insn, one) {
            return 0;
        }
        return -1;
    }
    1
}

fn same_memop(ep: &EntryPoint, a: InsnId, b: InsnId) -> bool {
    let ia = &ep.insns[a];
    let ib = &ep.insns[b];
    ia.offset == ib.offset && ia.size == ib.size && ia.bit_offset == ib.bit_offset
}

fn overlapping_memop(ep: &EntryPoint, a: InsnId, b: InsnId) -> bool {
    let ia = &ep.insns[a];
    let ib = &ep.insns[b];
    let a_start = ia.offset * 8 + ia.bit_offset as i64;
    let b_start = ib.offset * 8 + ib.bit_offset as i64;
    let a_end = a_start + ia.size as i64;
    let b_end = b_start + ib.size as i64;
    a_end > b_start && b_end > a_start
}

fn local_pseudo(ep: &EntryPoint, sess: &Session, pseudo: PseudoId) -> bool {
    let p = &ep.pseudos[pseudo];
    if p.kind != PseudoKind::Sym {
        return false;
    }
    match p.sym {
        Some(sym) => !sess.symtab.symbols[sym].modifiers.intersects(
            Mod::STATIC | Mod::EXTERN | Mod::TOPLEVEL | Mod::ADDRESSABLE | Mod::VOLATILE,
        ),
        None => false,
    }
}

/// Forwards loads from earlier stores/loads and kills shadowed stores,
/// block-locally.
pub fn simplify_memops(ep: &mut EntryPoint, sess: &Session) -> Repeat {
    let mut repeat = Repeat::empty();
    let bbs = ep.bbs.to_vec();

    // Load forwarding, walking each block backwards.
    for &bb in bbs.iter().rev() {
        let insns = ep.blocks[bb].insns.to_vec();
        for (i, &insn) in insns.iter().enumerate().rev() {
            if ep.insns[insn].bb != Some(bb) || ep.insns[insn].opcode != Opcode::Load {
                continue;
            }
            let pseudo = ep.insns[insn].src1;
            let local = local_pseudo(ep, sess, pseudo);
            for &dom in insns[..i].iter().rev() {
                if ep.insns[dom].bb != Some(bb) {
                    continue;
                }
                match dominates(ep, pseudo, insn, dom, local) {
                    0 => continue,
                    -1 => {
                        if ep.insns[dom].opcode == Opcode::Load {
                            continue;
                        }
                        break;
                    }
                    _ => {
                        let src = ep.insns[dom].target;
                        ep.replace_with_pseudo(insn, src);
                        repeat |= Repeat::CSE;
                        break;
                    }
                }
            }
        }
    }

    // Shadowed stores.
    for &bb in bbs.iter().rev() {
        let insns = ep.blocks[bb].insns.to_vec();
        for (i, &insn) in insns.iter().enumerate().rev() {
            if ep.insns[insn].bb != Some(bb) || ep.insns[insn].opcode != Opcode::Store {
                continue;
            }
            let pseudo = ep.insns[insn].src1;
            let local = local_pseudo(ep, sess, pseudo);
            for &dom in insns[..i].iter().rev() {
                if ep.insns[dom].bb != Some(bb) {
                    continue;
                }
                let d = dominates(ep, pseudo, insn, dom, local);
                if d == 0 {
                    continue;
                }
                if d < 0 || ep.insns[dom].opcode == Opcode::Load {
                    break;
                }
                // An equally shaped earlier store with no intervening read.
                ep.kill_insn(dom);
                repeat |= Repeat::CSE;
            }
        }
    }
    repeat
}

/// Promotes every promotable accessed symbol to SSA values.
pub fn promote_symbols(ep: &mut EntryPoint, sess: &Session) -> Repeat {
    let mut repeat = Repeat::empty();
    let accesses: Vec<SymbolId> = ep.accesses.clone();
    for sym in accesses {
        repeat |= promote_one_symbol(ep, sess, sym);
    }
    repeat
}

fn promote_one_symbol(ep: &mut EntryPoint, sess: &Session, sym: SymbolId) -> Repeat {
    let Some(&pseudo) = ep.sym_map.get(&sym) else {
        return Repeat::empty();
    };
    let mods = sess.symtab.symbols[sym].modifiers;
    if mods.contains(Mod::VOLATILE) {
        return Repeat::empty();
    }
    let external = mods.intersects(Mod::STATIC | Mod::EXTERN | Mod::TOPLEVEL | Mod::ADDRESSABLE);

    // Classify the uses.
    let users = ep.pseudos[pseudo].users.clone();
    let mut single_store: Option<InsnId> = None;
    let mut multi = false;
    let mut complex = false;
    for u in &users {
        let insn = u.insn;
        if ep.insns[insn].bb.is_none() {
            continue;
        }
        match (ep.insns[insn].opcode, u.slot) {
            (Opcode::Store, UseSlot::Src1) => {
                if single_store.is_some() {
                    multi = true;
                }
                single_store = Some(insn);
            }
            (Opcode::Load, UseSlot::Src1) => {}
            _ => complex = true,
        }
        if ep.insns[insn].offset != 0 || ep.insns[insn].bit_offset != 0 {
            complex = true;
        }
    }

    if !multi && !complex && !external {
        // At most one full-width store: loads forward its value directly.
        // The loads move over first so the stored value stays live.
        let src = single_store.map(|s| ep.insns[s].target).unwrap_or(VOID);
        let mut changed = false;
        for u in &users {
            let insn = u.insn;
            if ep.insns[insn].bb.is_some() && ep.insns[insn].opcode == Opcode::Load {
                ep.replace_with_pseudo(insn, src);
                changed = true;
            }
        }
        if let Some(store) = single_store {
            ep.kill_insn(store);
        }
        debug!(?sym, "promoted single-store symbol");
        return if changed || single_store.is_some() {
            Repeat::CSE
        } else {
            Repeat::empty()
        };
    }

    if complex {
        return Repeat::empty();
    }

    // General case: per-load dominating-store search with phi insertion.
    let mut all = true;
    let mut repeat = Repeat::empty();
    for u in users.iter().rev() {
        let insn = u.insn;
        if ep.insns[insn].bb.is_none() || ep.insns[insn].opcode != Opcode::Load {
            continue;
        }
        let converted = find_dominating_stores(ep, pseudo, insn, !external);
        if converted {
            repeat |= Repeat::CSE;
        }
        all &= converted;
    }

    if all && !external {
        // Every load was rewritten; the stores are dead.
        for u in &users {
            let insn = u.insn;
            if ep.insns[insn].bb.is_some() && ep.insns[insn].opcode == Opcode::Store {
                ep.kill_insn(insn);
                repeat |= Repeat::CSE;
            }
        }
    }
    repeat
}

/// Finds the value a load observes, walking its own block and then the
/// parents, inserting phis at merges. Returns `true` when the load was
/// rewritten.
fn find_dominating_stores(
    ep: &mut EntryPoint,
    pseudo: PseudoId,
    load: InsnId,
    local: bool,
) -> bool {
    let Some(bb) = ep.insns[load].bb else {
        ep.kill_insn(load);
        return true;
    };

    // Scan this block up to the load.
    let insns = ep.blocks[bb].insns.to_vec();
    let mut dom: Option<InsnId> = None;
    let mut partial = false;
    for &one in &insns {
        if one == load {
            break;
        }
        if ep.insns[one].bb != Some(bb) {
            continue;
        }
        match dominates(ep, pseudo, load, one, local) {
            0 => {}
            -1 => {
                if ep.insns[one].opcode == Opcode::Load {
                    continue;
                }
                dom = None;
                partial = true;
            }
            _ => {
                dom = Some(one);
                partial = false;
            }
        }
    }
    if partial {
        return false;
    }
    if let Some(dom) = dom {
        let src = ep.insns[dom].target;
        ep.replace_with_pseudo(load, src);
        return true;
    }

    // Walk the parents.
    let generation = ep.next_generation();
    ep.blocks[bb].generation = generation;
    let mut dominators: Vec<PseudoId> = Vec::new();
    if !find_dominating_parents(ep, pseudo, load, bb, generation, &mut dominators, local, true) {
        return false;
    }
    if dominators.is_empty() {
        // No store anywhere on the way: an uninitialized local reads zero.
        if !local {
            return false;
        }
        let zero = ep.value_pseudo(0);
        ep.replace_with_pseudo(load, zero);
        return true;
    }
    rewrite_load_instruction(ep, load, dominators);
    true
}

#[allow(clippy::too_many_arguments)]
fn find_dominating_parents(
    ep: &mut EntryPoint,
    pseudo: PseudoId,
    load: InsnId,
    bb: BbId,
    generation: u64,
    dominators: &mut Vec<PseudoId>,
    local: bool,
    mut loads: bool,
) -> bool {
    if ep.blocks[bb].parents.len() > 1 {
        loads = false;
    }
    let parents = ep.blocks[bb].parents.to_vec();
    for parent in parents {
        let insns = ep.blocks[parent].insns.to_vec();
        let mut found: Option<InsnId> = None;
        let mut give_up = false;
        for &one in insns.iter().rev() {
            if one == load {
                break;
            }
            if ep.insns[one].bb != Some(parent) {
                continue;
            }
            match dominates(ep, pseudo, load, one, local) {
                0 => continue,
                -1 => {
                    if ep.insns[one].opcode == Opcode::Load {
                        continue;
                    }
                    give_up = true;
                    break;
                }
                _ => {
                    if ep.insns[one].opcode == Opcode::Load && !loads {
                        continue;
                    }
                    found = Some(one);
                    break;
                }
            }
        }
        if give_up {
            return false;
        }
        match found {
            Some(one) => {
                // Append a phi source just before the parent's terminator.
                let value = ep.insns[one].target;
                let phi = alloc_phi_source(ep, parent, value);
                dominators.push(phi);
            }
            None => {
                if ep.blocks[parent].generation == generation {
                    continue;
                }
                ep.blocks[parent].generation = generation;
                if !find_dominating_parents(
                    ep, pseudo, load, parent, generation, dominators, local, loads,
                ) {
                    return false;
                }
            }
        }
    }
    true
}

/// Creates a `PhiSource` for `value` in `source`, placed before the
/// terminator.
pub fn alloc_phi_source(ep: &mut EntryPoint, source: BbId, value: PseudoId) -> PseudoId {
    let pos = ep.blocks[source].pos;
    let size = if value != VOID {
        value_size(ep, value)
    } else {
        0
    };
    let mut insn = Instruction::new(Opcode::PhiSource, pos, size);
    insn.bb = Some(source);
    let target = {
        ep.nr_pseudos += 1;
        let nr = ep.nr_pseudos;
        let mut p = crate::insn::Pseudo::new(PseudoKind::Phi, nr);
        p.def = None;
        ep.pseudos.alloc(p)
    };
    insn.target = target;
    let id = ep.insns.alloc(insn);
    ep.pseudos[target].def = Some(id);
    ep.blocks[source].insns.insert_before_last(id);
    ep.use_pseudo(id, UseSlot::Src1, value);
    target
}

fn value_size(ep: &EntryPoint, value: PseudoId) -> u32 {
    match ep.pseudos[value].def {
        Some(def) => ep.insns[def].size,
        None => 0,
    }
}

/// Collapses a load into either a direct value (all dominators agree) or a
/// phi over the dominating values.
fn rewrite_load_instruction(ep: &mut EntryPoint, load: InsnId, dominators: Vec<PseudoId>) {
    let first_src = ep.pseudos[dominators[0]]
        .def
        .map(|d| ep.insns[d].src1)
        .unwrap_or(VOID);
    let all_same = dominators.iter().all(|&phi| {
        ep.pseudos[phi]
            .def
            .map(|d| ep.insns[d].src1 == first_src)
            .unwrap_or(false)
    });
    if all_same && first_src != VOID {
        for &phi in &dominators {
            if let Some(d) = ep.pseudos[phi].def {
                ep.kill_insn(d);
            }
        }
        ep.replace_with_pseudo(load, first_src);
        return;
    }

    // Convert the load into a phi of the dominators in place.
    let target = ep.insns[load].target;
    ep.kill_use(load, UseSlot::Src1);
    let insn = &mut ep.insns[load];
    insn.opcode = Opcode::Phi;
    insn.offset = 0;
    insn.phi_list.clear();
    for _ in &dominators {
        insn.phi_list.push(VOID);
    }
    for (i, &phi) in dominators.iter().enumerate() {
        ep.use_pseudo(load, UseSlot::Phi(i as u16), phi);
    }
    debug_assert_eq!(ep.pseudos[target].def, Some(load));
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_core::Position;

    /// Builds `store 1; store 2; load` against one symbol pseudo and checks
    /// that the load forwards the second store.
    #[test]
    fn load_forwards_latest_store_in_block() {
        let mut ep = EntryPoint::new(SymbolId(0), Position::none());
        let addr = {
            let mut p = crate::insn::Pseudo::new(PseudoKind::Reg, 1);
            p.def = None;
            ep.pseudos.alloc(p)
        };
        let one = ep.value_pseudo(1);
        let two = ep.value_pseudo(2);
        let entry = ep.entry;

        let mk_store = |ep: &mut EntryPoint, value: PseudoId| {
            let mut s = Instruction::new(Opcode::Store, Position::none(), 32);
            s.bb = Some(entry);
            let id = ep.insns.alloc(s);
            ep.blocks[entry].insns.push_back(id);
            ep.use_pseudo(id, UseSlot::Target, value);
            ep.use_pseudo(id, UseSlot::Src1, addr);
            id
        };
        let s1 = mk_store(&mut ep, one);
        let s2 = mk_store(&mut ep, two);

        let mut load = Instruction::new(Opcode::Load, Position::none(), 32);
        load.bb = Some(entry);
        let lid = ep.insns.alloc(load);
        ep.blocks[entry].insns.push_back(lid);
        let result = ep.alloc_pseudo(Some(lid));
        ep.insns[lid].target = result;
        ep.use_pseudo(lid, UseSlot::Src1, addr);

        // A consumer so the load is live.
        let mut ret = Instruction::new(Opcode::Ret, Position::none(), 32);
        ret.bb = Some(entry);
        let rid = ep.insns.alloc(ret);
        ep.blocks[entry].insns.push_back(rid);
        ep.use_pseudo(rid, UseSlot::Src1, result);

        let sess = larch_front::Session::new(larch_front::Options::default());
        let repeat = simplify_memops(&mut ep, &sess);
        assert!(repeat.contains(Repeat::CSE));
        // The load is gone; the return reads the literal 2.
        assert!(ep.insns[lid].bb.is_none());
        assert_eq!(ep.insns[rid].src1, two);
        // The first store was shadowed by the second.
        assert!(ep.insns[s1].bb.is_none());
        assert!(ep.insns[s2].bb.is_some());
    }
}
