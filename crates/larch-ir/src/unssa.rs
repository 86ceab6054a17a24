//! Out-of-SSA translation.
//!
//! Every phi is eliminated through a fresh temporary: each of its phi
//! sources turns into a copy writing the temporary (in place, where the
//! source instruction already sits), and the phi itself becomes a copy
//! reading the temporary into the old target. All sources of one phi share
//! one temporary, preserving the parallel-assignment semantics of phis that
//! share a predecessor edge.

use crate::bb::EntryPoint;
use crate::insn::{Opcode, UseSlot, VOID};

/// Replaces every phi with copies through a fresh temporary.
pub fn unssa(ep: &mut EntryPoint) {
    let bbs = ep.bbs.to_vec();
    for bb in bbs {
        for insn in ep.blocks[bb].insns.to_vec() {
            if ep.insns[insn].bb != Some(bb) || ep.insns[insn].opcode != Opcode::Phi {
                continue;
            }
            let tmp = ep.alloc_pseudo(None);
            let phi_list = ep.insns[insn].phi_list.clone();

            // Each phi source becomes `copy tmp <- value`, staying where
            // the source instruction was placed.
            for (i, &phi) in phi_list.iter().enumerate() {
                if phi == VOID {
                    continue;
                }
                let Some(source) = ep.pseudos[phi].def else {
                    continue;
                };
                if ep.insns[source].bb.is_none() {
                    continue;
                }
                ep.insns[source].opcode = Opcode::Copy;
                ep.insns[source].target = tmp;
                // The phi no longer reads the phi pseudo.
                ep.kill_use(insn, UseSlot::Phi(i as u16));
            }

            // The phi becomes `copy target <- tmp`.
            ep.insns[insn].opcode = Opcode::Copy;
            ep.insns[insn].phi_list.clear();
            ep.use_pseudo(insn, UseSlot::Src1, tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bb::BasicBlock;
    use crate::insn::{Instruction, PseudoKind};
    use larch_core::Position;
    use larch_front::symbol::SymbolId;

    /// Builds a two-arm diamond feeding one phi and checks that unssa
    /// rewrites it into three copies through one shared temporary.
    #[test]
    fn phi_becomes_copies_through_temporary() {
        let mut ep = EntryPoint::new(SymbolId(0), Position::none());
        let arm1 = ep.blocks.alloc(BasicBlock::new(Position::none()));
        let arm2 = ep.blocks.alloc(BasicBlock::new(Position::none()));
        let join = ep.blocks.alloc(BasicBlock::new(Position::none()));
        for b in [arm1, arm2, join] {
            ep.bbs.push_back(b);
        }

        let one = ep.value_pseudo(1);
        let two = ep.value_pseudo(2);
        let mut sources = Vec::new();
        for (bb, value) in [(arm1, one), (arm2, two)] {
            let mut src = Instruction::new(Opcode::PhiSource, Position::none(), 32);
            src.bb = Some(bb);
            let id = ep.insns.alloc(src);
            ep.blocks[bb].insns.push_back(id);
            let phi_pseudo = {
                ep.nr_pseudos += 1;
                let nr = ep.nr_pseudos;
                let mut p = crate::insn::Pseudo::new(PseudoKind::Phi, nr);
                p.def = Some(id);
                ep.pseudos.alloc(p)
            };
            ep.insns[id].target = phi_pseudo;
            ep.use_pseudo(id, UseSlot::Src1, value);
            sources.push(phi_pseudo);
        }

        let mut phi = Instruction::new(Opcode::Phi, Position::none(), 32);
        phi.bb = Some(join);
        for _ in &sources {
            phi.phi_list.push(VOID);
        }
        let phi_id = ep.insns.alloc(phi);
        ep.blocks[join].insns.push_back(phi_id);
        let target = ep.alloc_pseudo(Some(phi_id));
        ep.insns[phi_id].target = target;
        for (i, &s) in sources.iter().enumerate() {
            ep.use_pseudo(phi_id, UseSlot::Phi(i as u16), s);
        }
        // Keep the phi alive with a user.
        let mut ret = Instruction::new(Opcode::Ret, Position::none(), 32);
        ret.bb = Some(join);
        let ret_id = ep.insns.alloc(ret);
        ep.blocks[join].insns.push_back(ret_id);
        ep.use_pseudo(ret_id, UseSlot::Src1, target);

        unssa(&mut ep);

        // The phi is now a copy from the shared temporary.
        assert_eq!(ep.insns[phi_id].opcode, Opcode::Copy);
        let tmp = ep.insns[phi_id].src1;
        assert_ne!(tmp, VOID);
        // Both former sources write that same temporary.
        for bb in [arm1, arm2] {
            let insn = ep.blocks[bb].insns.first().unwrap();
            assert_eq!(ep.insns[insn].opcode, Opcode::Copy);
            assert_eq!(ep.insns[insn].target, tmp);
        }
        // No phi instructions remain.
        for bb in ep.bbs.to_vec() {
            for insn in ep.blocks[bb].insns.to_vec() {
                assert_ne!(ep.insns[insn].opcode, Opcode::Phi);
            }
        }
    }
}
