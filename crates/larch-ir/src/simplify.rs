//! Instruction simplification.
//!
//! Peephole rules applied until a fixpoint: constant folding masked to the
//! instruction size, algebraic identities, offset folding into memops, cast
//! elision, select and branch rewrites, and constant-selector switches. A
//! rule that changes anything reports a [`Repeat`] bit so the driver loops.

use crate::bb::EntryPoint;
use crate::insn::{InsnId, Opcode, PseudoId, PseudoKind, UseSlot, VOID};
use crate::optimize::Repeat;

fn is_constant(ep: &EntryPoint, p: PseudoId) -> bool {
    ep.pseudos[p].kind == PseudoKind::Val
}

fn const_value(ep: &EntryPoint, p: PseudoId) -> i64 {
    ep.pseudos[p].value
}

/// Masks `value` to `size` bits.
fn mask_to(value: i64, size: u32) -> i64 {
    if size == 0 || size >= 64 {
        return value;
    }
    ((value as u64) & ((1u64 << size) - 1)) as i64
}

/// Sign-extends a masked value from `size` bits.
fn sext(value: i64, size: u32) -> i64 {
    if size == 0 || size >= 64 {
        return value;
    }
    let shift = 64 - size;
    (mask_to(value, size) << shift) >> shift
}

/// An instruction whose target has no remaining users is dead.
fn dead_insn(ep: &mut EntryPoint, insn: InsnId) -> bool {
    if !ep.insns[insn].has_target() {
        return false;
    }
    let target = ep.insns[insn].target;
    if ep.pseudos[target].kind == PseudoKind::Void {
        return false;
    }
    if !ep.pseudos[target].users.is_empty() {
        return false;
    }
    ep.kill_insn(insn);
    true
}

/// Runs one simplification attempt over `insn`.
pub fn simplify_instruction(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    if ep.insns[insn].bb.is_none() {
        return Repeat::empty();
    }
    let opcode = ep.insns[insn].opcode;
    match opcode {
        op if op.is_binop() || op.is_compare() => simplify_binop(ep, insn),
        Opcode::Not | Opcode::Neg => simplify_unop(ep, insn),
        Opcode::Load | Opcode::Store => simplify_memop(ep, insn),
        Opcode::Setval => {
            if dead_insn(ep, insn) {
                return Repeat::CSE | Repeat::SYMBOL_CLEANUP;
            }
            Repeat::empty()
        }
        op if op.is_cast() => simplify_cast(ep, insn),
        Opcode::Phi => simplify_phi(ep, insn),
        Opcode::PhiSource => {
            let target = ep.insns[insn].target;
            if ep.pseudos[target].users.is_empty() {
                ep.kill_insn(insn);
                return Repeat::CSE;
            }
            Repeat::empty()
        }
        Opcode::Sel => simplify_select(ep, insn),
        Opcode::Br => simplify_branch(ep, insn),
        Opcode::Switch => simplify_switch(ep, insn),
        Opcode::Copy => {
            if dead_insn(ep, insn) {
                return Repeat::CSE;
            }
            let src = ep.insns[insn].src1;
            ep.replace_with_pseudo(insn, src);
            Repeat::CSE
        }
        _ => Repeat::empty(),
    }
}

fn simplify_binop(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    if dead_insn(ep, insn) {
        return Repeat::CSE;
    }
    let src1 = ep.insns[insn].src1;
    let src2 = ep.insns[insn].src2;
    if is_constant(ep, src1) {
        if is_constant(ep, src2) {
            return fold_constant_binop(ep, insn);
        }
        return simplify_constant_leftside(ep, insn);
    }
    if is_constant(ep, src2) {
        return simplify_constant_rightside(ep, insn);
    }
    Repeat::empty()
}

fn fold_constant_binop(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    let opcode = ep.insns[insn].opcode;
    let size = ep.insns[insn].size;
    let left = const_value(ep, ep.insns[insn].src1);
    let right = const_value(ep, ep.insns[insn].src2);
    let sleft = sext(left, size);
    let sright = sext(right, size);
    let uleft = mask_to(left, size) as u64;
    let uright = mask_to(right, size) as u64;

    let result = match opcode {
        Opcode::Add => sleft.wrapping_add(sright),
        Opcode::Sub => sleft.wrapping_sub(sright),
        Opcode::Mul => sleft.wrapping_mul(sright),
        Opcode::Div => {
            if sright == 0 {
                return Repeat::empty();
            }
            sleft.wrapping_div(sright)
        }
        Opcode::Mod => {
            if sright == 0 {
                return Repeat::empty();
            }
            sleft.wrapping_rem(sright)
        }
        Opcode::Shl => sleft.wrapping_shl(uright as u32 & 63),
        Opcode::Shr => (uleft >> (uright & 63)) as i64,
        Opcode::And => sleft & sright,
        Opcode::Or => sleft | sright,
        Opcode::Xor => sleft ^ sright,
        Opcode::AndBool => ((sleft != 0) && (sright != 0)) as i64,
        Opcode::OrBool => ((sleft != 0) || (sright != 0)) as i64,
        Opcode::SetEq => (sleft == sright) as i64,
        Opcode::SetNe => (sleft != sright) as i64,
        Opcode::SetLt => (sleft < sright) as i64,
        Opcode::SetLe => (sleft <= sright) as i64,
        Opcode::SetGt => (sleft > sright) as i64,
        Opcode::SetGe => (sleft >= sright) as i64,
        Opcode::SetB => (uleft < uright) as i64,
        Opcode::SetBe => (uleft <= uright) as i64,
        Opcode::SetA => (uleft > uright) as i64,
        Opcode::SetAe => (uleft >= uright) as i64,
        _ => return Repeat::empty(),
    };
    let masked = mask_to(result, size);
    let value = ep.value_pseudo(masked);
    ep.replace_with_pseudo(insn, value);
    Repeat::CSE
}

fn simplify_constant_rightside(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    let opcode = ep.insns[insn].opcode;
    let value = const_value(ep, ep.insns[insn].src2);
    match opcode {
        Opcode::Sub if value != 0 => {
            // x - c becomes x + (-c).
            let neg = ep.value_pseudo(value.wrapping_neg());
            ep.insns[insn].opcode = Opcode::Add;
            ep.insns[insn].src2 = neg;
            Repeat::CSE
        }
        Opcode::Sub | Opcode::Add | Opcode::Or | Opcode::Xor | Opcode::Shl | Opcode::Shr
            if value == 0 =>
        {
            let src = ep.insns[insn].src1;
            ep.replace_with_pseudo(insn, src);
            Repeat::CSE
        }
        Opcode::And | Opcode::Mul if value == 0 => {
            let zero = ep.value_pseudo(0);
            ep.replace_with_pseudo(insn, zero);
            Repeat::CSE
        }
        Opcode::Mul if value == 1 => {
            let src = ep.insns[insn].src1;
            ep.replace_with_pseudo(insn, src);
            Repeat::CSE
        }
        _ => Repeat::empty(),
    }
}

fn simplify_constant_leftside(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    let opcode = ep.insns[insn].opcode;
    let value = const_value(ep, ep.insns[insn].src1);
    if value != 0 {
        return Repeat::empty();
    }
    match opcode {
        Opcode::Add | Opcode::Or | Opcode::Xor => {
            let src = ep.insns[insn].src2;
            ep.replace_with_pseudo(insn, src);
            Repeat::CSE
        }
        Opcode::Shl | Opcode::Shr | Opcode::And | Opcode::Mul => {
            let zero = ep.value_pseudo(0);
            ep.replace_with_pseudo(insn, zero);
            Repeat::CSE
        }
        _ => Repeat::empty(),
    }
}

fn simplify_unop(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    if dead_insn(ep, insn) {
        return Repeat::CSE;
    }
    let src = ep.insns[insn].src1;
    if !is_constant(ep, src) {
        return Repeat::empty();
    }
    let size = ep.insns[insn].size;
    let value = sext(const_value(ep, src), size);
    let result = match ep.insns[insn].opcode {
        Opcode::Not => !value,
        Opcode::Neg => value.wrapping_neg(),
        _ => return Repeat::empty(),
    };
    let masked = ep.value_pseudo(mask_to(result, size));
    ep.replace_with_pseudo(insn, masked);
    Repeat::CSE
}

/// Folds address arithmetic into the load/store offset and distributes
/// symbol addresses back into the address slot.
fn simplify_memop(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    let mut repeat = Repeat::empty();
    loop {
        let addr = ep.insns[insn].src1;
        if ep.pseudos[addr].kind != PseudoKind::Reg {
            return repeat;
        }
        let Some(def) = ep.pseudos[addr].def else {
            return repeat;
        };
        match ep.insns[def].opcode {
            Opcode::Setval => {
                let Some(sym) = ep.insns[def].symbol else {
                    return repeat;
                };
                if ep.insns[def].string.is_some() {
                    return repeat;
                }
                let sym_p = ep.sym_pseudo(sym);
                ep.kill_use(insn, UseSlot::Src1);
                ep.use_pseudo(insn, UseSlot::Src1, sym_p);
                repeat |= Repeat::CSE | Repeat::SYMBOL_CLEANUP;
            }
            Opcode::Add => {
                let a = ep.insns[def].src1;
                let b = ep.insns[def].src2;
                let (base, off) = if is_constant(ep, b) {
                    (a, b)
                } else if is_constant(ep, a) {
                    (b, a)
                } else {
                    return repeat;
                };
                if base == addr || base == VOID {
                    return repeat;
                }
                let delta = const_value(ep, off);
                ep.insns[insn].offset += delta;
                ep.kill_use(insn, UseSlot::Src1);
                ep.use_pseudo(insn, UseSlot::Src1, base);
                repeat |= Repeat::CSE | Repeat::SYMBOL_CLEANUP;
            }
            _ => return repeat,
        }
    }
}

fn simplify_cast(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    if dead_insn(ep, insn) {
        return Repeat::CSE;
    }
    if ep.insns[insn].opcode == Opcode::PtrCast {
        // Pointer-to-pointer casts chain-collapse instead.
        let src = ep.insns[insn].src1;
        if ep.pseudos[src].kind == PseudoKind::Reg {
            if let Some(def) = ep.pseudos[src].def {
                if ep.insns[def].opcode == Opcode::PtrCast {
                    let inner = ep.insns[def].src1;
                    ep.kill_use(insn, UseSlot::Src1);
                    ep.use_pseudo(insn, UseSlot::Src1, inner);
                    return Repeat::CSE;
                }
            }
        }
        return Repeat::empty();
    }
    let src = ep.insns[insn].src1;
    // A constant source folds directly.
    if is_constant(ep, src) {
        let size = ep.insns[insn].size;
        let value = const_value(ep, src);
        let folded = if ep.insns[insn].opcode == Opcode::SCast {
            mask_to(sext(value, orig_size(ep, insn).unwrap_or(size)), size)
        } else {
            mask_to(value, size)
        };
        let p = ep.value_pseudo(folded);
        ep.replace_with_pseudo(insn, p);
        return Repeat::CSE;
    }
    // A cast that changes nothing is elided.
    if let Some(orig) = orig_size(ep, insn) {
        if orig == ep.insns[insn].size && orig != 0 {
            ep.replace_with_pseudo(insn, src);
            return Repeat::CSE;
        }
    }
    Repeat::empty()
}

fn orig_size(ep: &EntryPoint, insn: InsnId) -> Option<u32> {
    // The source width is remembered on the defining instruction when
    // available; fall back to the recorded original type's width being
    // unavailable here, so use the def size.
    let src = ep.insns[insn].src1;
    match ep.pseudos[src].kind {
        PseudoKind::Reg | PseudoKind::Phi => {
            ep.pseudos[src].def.map(|d| ep.insns[d].size)
        }
        _ => None,
    }
}

fn simplify_select(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    if dead_insn(ep, insn) {
        return Repeat::CSE;
    }
    let cond = ep.insns[insn].src1;
    let src1 = ep.insns[insn].src2;
    let src2 = ep.insns[insn].src3;
    if is_constant(ep, cond) || src1 == src2 {
        let take = if is_constant(ep, cond) {
            if const_value(ep, cond) != 0 {
                src1
            } else {
                src2
            }
        } else {
            src1
        };
        ep.replace_with_pseudo(insn, take);
        return Repeat::CSE;
    }
    if is_constant(ep, src1) && is_constant(ep, src2) {
        let v1 = const_value(ep, src1);
        let v2 = const_value(ep, src2);
        // The 0/1 pair turns into a plain compare against zero.
        if (v1 | v2) == 1 && (v1 & v2) == 0 {
            let opcode = if v1 == 1 { Opcode::SetNe } else { Opcode::SetEq };
            let zero = ep.value_pseudo(0);
            ep.kill_use(insn, UseSlot::Src2);
            ep.kill_use(insn, UseSlot::Src3);
            ep.insns[insn].opcode = opcode;
            ep.insns[insn].src2 = zero;
            ep.insns[insn].src3 = VOID;
            return Repeat::CSE;
        }
    }
    Repeat::empty()
}

/// Rewrites `insn` (a terminator) into an unconditional branch to `target`,
/// detaching the other edges.
pub fn insert_branch(ep: &mut EntryPoint, insn: InsnId, target: crate::insn::BbId) -> Repeat {
    let Some(bb) = ep.insns[insn].bb else {
        return Repeat::empty();
    };
    ep.kill_use(insn, UseSlot::Src1);
    ep.insns[insn].opcode = Opcode::Br;
    ep.insns[insn].bb_true = Some(target);
    ep.insns[insn].bb_false = None;
    ep.insns[insn].multijmp.clear();
    let children = ep.blocks[bb].children.to_vec();
    for child in children {
        if child != target {
            ep.remove_edge(bb, child);
        }
    }
    Repeat::CSE | Repeat::CFG
}

fn simplify_branch(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    let cond = ep.insns[insn].src1;
    let (Some(bb_true), Some(bb_false)) = (ep.insns[insn].bb_true, ep.insns[insn].bb_false)
    else {
        return Repeat::empty();
    };
    if cond == VOID {
        return Repeat::empty();
    }

    if is_constant(ep, cond) {
        let target = if const_value(ep, cond) != 0 {
            bb_true
        } else {
            bb_false
        };
        return insert_branch(ep, insn, target);
    }

    if bb_true == bb_false {
        let bb = ep.insns[insn].bb.unwrap();
        ep.kill_use(insn, UseSlot::Src1);
        ep.insns[insn].bb_false = None;
        // One logical edge remains.
        let _ = bb;
        return Repeat::CSE;
    }

    // Branch on the result of a compare against zero, or on a select with
    // constant arms: use the underlying condition directly.
    if ep.pseudos[cond].kind == PseudoKind::Reg {
        if let Some(def) = ep.pseudos[cond].def {
            let def_op = ep.insns[def].opcode;
            if matches!(def_op, Opcode::SetEq | Opcode::SetNe) {
                let s1 = ep.insns[def].src1;
                let s2 = ep.insns[def].src2;
                let other = if is_constant(ep, s1) && const_value(ep, s1) == 0 {
                    Some(s2)
                } else if is_constant(ep, s2) && const_value(ep, s2) == 0 {
                    Some(s1)
                } else {
                    None
                };
                if let Some(other) = other {
                    ep.kill_use(insn, UseSlot::Src1);
                    ep.use_pseudo(insn, UseSlot::Src1, other);
                    if def_op == Opcode::SetEq {
                        ep.insns[insn].bb_true = Some(bb_false);
                        ep.insns[insn].bb_false = Some(bb_true);
                    }
                    return Repeat::CSE;
                }
            }
            if def_op == Opcode::Sel {
                let s2 = ep.insns[def].src2;
                let s3 = ep.insns[def].src3;
                if is_constant(ep, s2) && is_constant(ep, s3) {
                    let v1 = const_value(ep, s2);
                    let v2 = const_value(ep, s3);
                    if v1 == 0 && v2 == 0 {
                        return insert_branch(ep, insn, bb_false);
                    }
                    if v1 != 0 && v2 != 0 {
                        return insert_branch(ep, insn, bb_true);
                    }
                    if v2 != 0 {
                        ep.insns[insn].bb_true = Some(bb_false);
                        ep.insns[insn].bb_false = Some(bb_true);
                    }
                    let sel_cond = ep.insns[def].src1;
                    ep.kill_use(insn, UseSlot::Src1);
                    ep.use_pseudo(insn, UseSlot::Src1, sel_cond);
                    return Repeat::CSE;
                }
            }
        }
    }
    Repeat::empty()
}

fn simplify_switch(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    let cond = ep.insns[insn].src1;
    if !is_constant(ep, cond) {
        return Repeat::empty();
    }
    let value = const_value(ep, cond);
    let mut target = None;
    for jmp in &ep.insns[insn].multijmp {
        if jmp.is_default() {
            if target.is_none() {
                target = Some(jmp.target);
            }
        } else if jmp.matches(value) {
            target = Some(jmp.target);
            break;
        }
    }
    match target {
        Some(t) => insert_branch(ep, insn, t),
        None => Repeat::empty(),
    }
}

/// Attempts the diamond-to-select conversion for a two-source phi whose
/// arms are trivial. Conservative: both sources must be side-effect-free
/// phi sources whose blocks are the direct parents, agreeing on a common
/// ancestor ending in a plain conditional branch.
fn simplify_phi(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    let target = ep.insns[insn].target;
    if ep.pseudos[target].users.is_empty() {
        // Dead phi: clear the sources too.
        let n = ep.insns[insn].phi_list.len();
        for i in 0..n {
            ep.kill_use(insn, UseSlot::Phi(i as u16));
        }
        ep.kill_insn(insn);
        return Repeat::CSE;
    }

    // All live sources carrying the same value collapse the phi.
    let phi_list = ep.insns[insn].phi_list.clone();
    let mut first: Option<PseudoId> = None;
    let mut same = true;
    for &phi in &phi_list {
        if phi == VOID {
            continue;
        }
        let Some(def) = ep.pseudos[phi].def else { continue };
        if ep.insns[def].bb.is_none() {
            continue;
        }
        let src = ep.insns[def].src1;
        if src == VOID {
            continue;
        }
        match first {
            None => first = Some(src),
            Some(f) if f != src => {
                same = false;
            }
            _ => {}
        }
    }
    if same {
        let value = first.unwrap_or(VOID);
        let n = ep.insns[insn].phi_list.len();
        for i in 0..n {
            ep.kill_use(insn, UseSlot::Phi(i as u16));
        }
        ep.replace_with_pseudo(insn, value);
        return Repeat::CSE;
    }

    if_convert_phi(ep, insn)
}

fn if_convert_phi(ep: &mut EntryPoint, insn: InsnId) -> Repeat {
    let bb = match ep.insns[insn].bb {
        Some(b) => b,
        None => return Repeat::empty(),
    };
    let phi_list = ep.insns[insn].phi_list.clone();
    if phi_list.len() != 2 {
        return Repeat::empty();
    }
    let parents = ep.blocks[bb].parents.to_vec();
    if parents.len() != 2 {
        return Repeat::empty();
    }
    let get = |ep: &EntryPoint, phi: PseudoId| -> Option<(PseudoId, crate::insn::BbId)> {
        let def = ep.pseudos[phi].def?;
        let b = ep.insns[def].bb?;
        Some((ep.insns[def].src1, b))
    };
    let Some((p1, bb1)) = get(ep, phi_list[0]) else {
        return Repeat::empty();
    };
    let Some((p2, bb2)) = get(ep, phi_list[1]) else {
        return Repeat::empty();
    };
    // Direct-parents case only.
    if !((bb1 == parents[0] && bb2 == parents[1]) || (bb1 == parents[1] && bb2 == parents[0])) {
        return Repeat::empty();
    }
    let source = phi_parent(ep, bb1, p1);
    if source != phi_parent(ep, bb2, p2) {
        return Repeat::empty();
    }
    let Some(br) = ep.terminator(source) else {
        return Repeat::empty();
    };
    if ep.insns[br].opcode != Opcode::Br || ep.insns[br].src1 == VOID {
        return Repeat::empty();
    }
    let (Some(br_true), Some(_br_false)) = (ep.insns[br].bb_true, ep.insns[br].bb_false) else {
        return Repeat::empty();
    };

    // Pair the values with the branch arms.
    let (tv, fv) = if br_true == bb1 || Some(bb1) == ep.insns[br].bb_true {
        (p1, p2)
    } else {
        (p2, p1)
    };

    // Insert `select cond, tv, fv` before the branch and collapse the phi.
    let cond = ep.insns[br].src1;
    let mut sel = crate::insn::Instruction::new(Opcode::Sel, ep.insns[insn].pos, ep.insns[insn].size);
    sel.bb = Some(source);
    let new_target = ep.alloc_pseudo(None);
    sel.target = new_target;
    let sel_id = ep.insns.alloc(sel);
    ep.pseudos[new_target].def = Some(sel_id);
    ep.blocks[source].insns.insert_before_last(sel_id);
    ep.use_pseudo(sel_id, UseSlot::Src1, cond);
    ep.use_pseudo(sel_id, UseSlot::Src2, tv);
    ep.use_pseudo(sel_id, UseSlot::Src3, fv);

    // The phi's users read the select now; the phi sources die.
    ep.convert_target(insn, new_target);
    let n = ep.insns[insn].phi_list.len();
    for i in 0..n {
        ep.kill_use(insn, UseSlot::Phi(i as u16));
    }
    ep.kill_insn(insn);
    for &phi in &phi_list {
        if let Some(def) = ep.pseudos[phi].def {
            ep.kill_insn(def);
        }
    }
    Repeat::CSE
}

/// The trivial single-parent hop used when looking for a phi's common
/// ancestor.
fn phi_parent(ep: &EntryPoint, source: crate::insn::BbId, pseudo: PseudoId) -> crate::insn::BbId {
    if ep.pseudos[pseudo].kind == PseudoKind::Reg {
        if let Some(def) = ep.pseudos[pseudo].def {
            if ep.insns[def].bb == Some(source) {
                return source;
            }
        }
    }
    if ep.blocks[source].children.len() != 1 || ep.blocks[source].parents.len() != 1 {
        return source;
    }
    ep.blocks[source].parents.first().unwrap_or(source)
}

/// One full simplification sweep over every live instruction.
pub fn simplify_entry(ep: &mut EntryPoint) -> Repeat {
    let mut repeat = Repeat::empty();
    let bbs = ep.bbs.to_vec();
    for bb in bbs {
        let insns = ep.blocks[bb].insns.to_vec();
        for insn in insns {
            repeat |= simplify_instruction(ep, insn);
        }
    }
    repeat
}
