//! The optimization driver.
//!
//! Passes communicate exclusively through [`Repeat`] bits: any pass that
//! changes the IR in a way that may enable another simplification sets the
//! matching bit, and the driver loops while bits keep coming back. `-O0`
//! stops after ordering the CFG; higher levels run the full pipeline.

use bitflags::bitflags;
use larch_front::Session;
use tracing::debug_span;

use crate::bb::EntryPoint;
use crate::{cse, flow, liveness, memops, simplify};

bitflags! {
    /// Feedback bits from simplification passes to the driver loop.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Repeat: u8 {
        /// Instruction-level rewrites happened; re-run simplify + CSE.
        const CSE = 1 << 0;
        /// Symbol address usage changed; re-run memop promotion.
        const SYMBOL_CLEANUP = 1 << 1;
        /// The CFG changed; re-run flow cleanup and reorder blocks.
        const CFG = 1 << 2;
    }
}

/// Optimization level from the driver: 0 disables the pipeline, `255`
/// encodes `-Os` (treated as level 2 here; size heuristics belong to
/// backends).
pub fn optimize(sess: &Session, ep: &mut EntryPoint) {
    let name = sess.symtab.symbols[ep.name]
        .ident
        .map(|i| sess.interner.name(i).to_string())
        .unwrap_or_default();
    let span = debug_span!("optimize", function = %name);
    let _enter = span.enter();

    let level = sess.options.opt_level;
    if level == 0 {
        ep.cfg_postorder();
        liveness::track_pseudo_liveness(ep);
        return;
    }

    let mut guard = 0;
    loop {
        let mut repeat = Repeat::empty();

        repeat |= memops::simplify_memops(ep, sess);
        repeat |= memops::promote_symbols(ep, sess);

        repeat |= simplify::simplify_entry(ep);
        repeat |= cse::cleanup_and_cse(ep);

        repeat |= flow::simplify_flow(ep, sess);
        repeat |= flow::pack_basic_blocks(ep);

        ep.cfg_postorder();
        liveness::remove_dead_insns(ep);

        if repeat.is_empty() {
            break;
        }
        guard += 1;
        if guard > 100 {
            // A cycling rewrite is an internal inconsistency; stop rather
            // than loop forever.
            tracing::warn!("optimizer failed to reach a fixpoint");
            break;
        }
    }

    liveness::track_pseudo_liveness(ep);
}

/// The final lowering out of SSA, for backends that want plain copies.
pub fn lower_out_of_ssa(ep: &mut EntryPoint) {
    crate::unssa::unssa(ep);
    liveness::pack_instruction_lists(ep);
}
