//! Common-subexpression elimination.
//!
//! Instructions are bucketed by a shape hash (opcode, operands, immediate,
//! phi multiset). Within a bucket, equal-keyed pairs merge when one's block
//! dominates the other's; same-block pairs keep the earlier instruction.
//! Iterates until a sweep makes no change.

use std::collections::HashMap;

use tracing::debug;

use crate::bb::EntryPoint;
use crate::insn::{InsnId, Opcode, PseudoId, VOID};
use crate::optimize::Repeat;

/// The comparison key for CSE candidates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InsnKey {
    opcode: Opcode,
    size: u32,
    src1: PseudoId,
    src2: PseudoId,
    src3: PseudoId,
    symbol: Option<larch_front::symbol::SymbolId>,
    val_bits: i64,
    offset: i64,
    /// Sorted phi sources; order-independent identity.
    phis: Vec<PseudoId>,
}

fn insn_key(ep: &EntryPoint, insn: InsnId) -> Option<InsnKey> {
    let i = &ep.insns[insn];
    let hashable = i.opcode.is_binop()
        || i.opcode.is_compare()
        || i.opcode.is_unop()
        || matches!(i.opcode, Opcode::Setval | Opcode::Sel | Opcode::Phi);
    if !hashable {
        return None;
    }
    // String payloads have no cheap identity; leave them alone.
    if i.opcode == Opcode::Setval && i.string.is_some() {
        return None;
    }
    let mut phis: Vec<PseudoId> = Vec::new();
    if i.opcode == Opcode::Phi {
        phis = i.phi_list.iter().copied().filter(|&p| p != VOID).collect();
        phis.sort();
        if phis.is_empty() {
            return None;
        }
    }
    Some(InsnKey {
        opcode: i.opcode,
        size: i.size,
        src1: i.src1,
        src2: i.src2,
        src3: i.src3,
        symbol: i.symbol,
        val_bits: i.val_bits,
        offset: i.offset,
        phis,
    })
}

/// Merges `b` into `a` (a's target wins).
fn cse_one(ep: &mut EntryPoint, a: InsnId, b: InsnId) {
    if ep.insns[b].opcode == Opcode::Phi {
        let n = ep.insns[b].phi_list.len();
        for i in 0..n {
            ep.kill_use(b, crate::insn::UseSlot::Phi(i as u16));
        }
    }
    let target = ep.insns[a].target;
    ep.replace_with_pseudo(b, target);
}

/// One full CSE pass; loops internally until stable.
pub fn cleanup_and_cse(ep: &mut EntryPoint) -> Repeat {
    let mut overall = Repeat::empty();
    loop {
        let mut changed = false;
        let (doms, nodes) = ep.dominator_tree();

        let mut buckets: HashMap<InsnKey, Vec<InsnId>> = HashMap::new();
        let bbs = ep.bbs.to_vec();
        for bb in bbs {
            for insn in ep.blocks[bb].insns.to_vec() {
                if ep.insns[insn].bb != Some(bb) {
                    continue;
                }
                if let Some(key) = insn_key(ep, insn) {
                    buckets.entry(key).or_default().push(insn);
                }
            }
        }

        for (_, bucket) in buckets {
            if bucket.len() < 2 {
                continue;
            }
            let mut survivor = bucket[0];
            for &candidate in &bucket[1..] {
                if ep.insns[survivor].bb.is_none() {
                    survivor = candidate;
                    continue;
                }
                if ep.insns[candidate].bb.is_none() {
                    continue;
                }
                let b1 = ep.insns[survivor].bb.unwrap();
                let b2 = ep.insns[candidate].bb.unwrap();
                if b1 == b2 {
                    // The earlier one in the block wins.
                    let mut first = None;
                    for insn in ep.blocks[b1].insns.iter() {
                        if insn == survivor || insn == candidate {
                            first = Some(insn);
                            break;
                        }
                    }
                    let (keep, drop) = if first == Some(survivor) {
                        (survivor, candidate)
                    } else {
                        (candidate, survivor)
                    };
                    cse_one(ep, keep, drop);
                    survivor = keep;
                    changed = true;
                } else if ep.bb_dominates(&doms, &nodes, b1, b2) {
                    cse_one(ep, survivor, candidate);
                    changed = true;
                } else if ep.bb_dominates(&doms, &nodes, b2, b1) {
                    cse_one(ep, candidate, survivor);
                    survivor = candidate;
                    changed = true;
                }
                // No dominance either way: both live on.
            }
        }

        if !changed {
            break;
        }
        debug!("cse pass merged instructions, repeating");
        overall |= Repeat::CSE;
    }
    overall
}
