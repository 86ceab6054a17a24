//! Basic blocks, the per-function container, and use-list maintenance.
//!
//! [`EntryPoint`] owns all IR arenas for one function. Every helper that
//! mutates an operand goes through it so the pseudo use lists stay exact:
//! a use slot appears in its pseudo's user list exactly once while the
//! instruction is live.

use std::collections::HashMap;

use larch_core::{Arena, ChunkList, ListCursor, Position};
use larch_front::symbol::SymbolId;
use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::insn::{
    BbId, InsnId, Instruction, Opcode, Pseudo, PseudoId, PseudoKind, UseRef, UseSlot, VOID,
};

#[derive(Debug)]
pub struct BasicBlock {
    pub pos: Position,
    /// Ordered instructions; dead ones keep their slot until packing.
    pub insns: ChunkList<InsnId>,
    pub parents: ChunkList<BbId>,
    pub children: ChunkList<BbId>,
    /// Pseudos live on entry / defined for children, filled by liveness.
    pub needs: ChunkList<PseudoId>,
    pub defines: ChunkList<PseudoId>,
    /// Visitor epoch for graph walks.
    pub generation: u64,
    pub postorder_nr: u32,
}

impl BasicBlock {
    pub fn new(pos: Position) -> Self {
        BasicBlock {
            pos,
            insns: ChunkList::new(),
            parents: ChunkList::new(),
            children: ChunkList::new(),
            needs: ChunkList::new(),
            defines: ChunkList::new(),
            generation: 0,
            postorder_nr: 0,
        }
    }
}

/// Per-function IR container.
pub struct EntryPoint {
    pub name: SymbolId,
    pub pseudos: Arena<PseudoId, Pseudo>,
    pub insns: Arena<InsnId, Instruction>,
    pub blocks: Arena<BbId, BasicBlock>,
    /// Block order; reverse postorder after [`cfg_postorder`].
    pub bbs: ChunkList<BbId>,
    pub entry: BbId,
    pub entry_insn: InsnId,
    pub syms: Vec<SymbolId>,
    /// Symbols accessed through loads/stores, for promotion.
    pub accesses: Vec<SymbolId>,
    /// Cached switch instructions.
    pub switches: Vec<InsnId>,
    pub nr_pseudos: u32,
    value_cache: HashMap<i64, PseudoId>,
    /// Symbol to its SYM pseudo.
    pub sym_map: HashMap<SymbolId, PseudoId>,
    pub bb_generation: u64,
}

impl EntryPoint {
    pub fn new(name: SymbolId, pos: Position) -> Self {
        let mut pseudos = Arena::new();
        let void = pseudos.alloc(Pseudo::new(PseudoKind::Void, 0));
        debug_assert_eq!(void, VOID);
        let mut blocks = Arena::new();
        let entry = blocks.alloc(BasicBlock::new(pos));
        let mut bbs = ChunkList::new();
        bbs.push_back(entry);
        EntryPoint {
            name,
            pseudos,
            insns: Arena::new(),
            blocks,
            bbs,
            entry,
            entry_insn: InsnId(0),
            syms: Vec::new(),
            accesses: Vec::new(),
            switches: Vec::new(),
            nr_pseudos: 0,
            value_cache: HashMap::new(),
            sym_map: HashMap::new(),
            bb_generation: 0,
        }
    }

    // ----------------------------------------------------------------
    // Pseudo allocation
    // ----------------------------------------------------------------

    /// Fresh register defined by `def`.
    pub fn alloc_pseudo(&mut self, def: Option<InsnId>) -> PseudoId {
        self.nr_pseudos += 1;
        let mut p = Pseudo::new(PseudoKind::Reg, self.nr_pseudos);
        p.def = def;
        self.pseudos.alloc(p)
    }

    /// The interned constant pseudo for `value`.
    pub fn value_pseudo(&mut self, value: i64) -> PseudoId {
        if let Some(&p) = self.value_cache.get(&value) {
            return p;
        }
        let mut p = Pseudo::new(PseudoKind::Val, 0);
        p.value = value;
        let id = self.pseudos.alloc(p);
        self.value_cache.insert(value, id);
        id
    }

    /// The symbol pseudo for `sym`, created on first access.
    pub fn sym_pseudo(&mut self, sym: SymbolId) -> PseudoId {
        if let Some(&p) = self.sym_map.get(&sym) {
            return p;
        }
        let mut p = Pseudo::new(PseudoKind::Sym, 0);
        p.sym = Some(sym);
        let id = self.pseudos.alloc(p);
        self.sym_map.insert(sym, id);
        self.accesses.push(sym);
        id
    }

    pub fn arg_pseudo(&mut self, nr: u32) -> PseudoId {
        let p = Pseudo::new(PseudoKind::Arg, nr);
        self.pseudos.alloc(p)
    }

    // ----------------------------------------------------------------
    // Use-list maintenance
    // ----------------------------------------------------------------

    /// Writes `p` into `slot` of `insn`, registering the use.
    pub fn use_pseudo(&mut self, insn: InsnId, slot: UseSlot, p: PseudoId) {
        self.insns[insn].set_slot(slot, p);
        if self.pseudos[p].tracks_users() {
            self.pseudos[p].users.push(UseRef { insn, slot });
        }
    }

    /// Drops the use in `slot`, replacing it with VOID. A register whose
    /// last use disappears takes its defining instruction with it.
    pub fn kill_use(&mut self, insn: InsnId, slot: UseSlot) {
        let p = self.insns[insn].slot(slot);
        if p == VOID {
            return;
        }
        self.insns[insn].set_slot(slot, VOID);
        self.remove_usage(p, insn, slot);
    }

    fn remove_usage(&mut self, p: PseudoId, insn: InsnId, slot: UseSlot) {
        if !self.pseudos[p].tracks_users() {
            return;
        }
        let use_ref = UseRef { insn, slot };
        let users = &mut self.pseudos[p].users;
        if let Some(i) = users.iter().position(|u| *u == use_ref) {
            users.swap_remove(i);
        }
        if self.pseudos[p].users.is_empty() && self.pseudos[p].kind == PseudoKind::Reg {
            if let Some(def) = self.pseudos[p].def {
                self.kill_insn(def);
            }
        }
    }

    /// Marks `insn` dead and releases its operand uses.
    pub fn kill_insn(&mut self, insn: InsnId) {
        if self.insns[insn].bb.is_none() {
            return;
        }
        self.insns[insn].bb = None;
        let slots = self.insns[insn].use_slots();
        for slot in slots {
            let p = self.insns[insn].slot(slot);
            if p != VOID {
                self.insns[insn].set_slot(slot, VOID);
                self.remove_usage(p, insn, slot);
            }
        }
    }

    /// Rewrites every user of `insn`'s target to `src` instead, and marks
    /// the instruction dead.
    pub fn replace_with_pseudo(&mut self, insn: InsnId, src: PseudoId) {
        self.convert_target(insn, src);
        self.kill_insn(insn);
    }

    /// Moves all users of `insn.target` over to `src`.
    pub fn convert_target(&mut self, insn: InsnId, src: PseudoId) {
        let target = self.insns[insn].target;
        let users = std::mem::take(&mut self.pseudos[target].users);
        for u in &users {
            self.insns[u.insn].set_slot(u.slot, src);
        }
        if self.pseudos[src].tracks_users() {
            self.pseudos[src].users.extend(users);
        }
    }

    // ----------------------------------------------------------------
    // CFG edges
    // ----------------------------------------------------------------

    pub fn add_edge(&mut self, from: BbId, to: BbId) {
        self.blocks[from].children.push_back(to);
        self.blocks[to].parents.push_back(from);
    }

    pub fn remove_edge(&mut self, from: BbId, to: BbId) {
        self.blocks[from].children.delete_first(to);
        self.blocks[to].parents.delete_first(from);
    }

    /// The terminator of `bb`, skipping dead instructions.
    pub fn terminator(&self, bb: BbId) -> Option<InsnId> {
        let mut cursor = ListCursor::new_reverse(&self.blocks[bb].insns);
        while let Some(insn) = cursor.prev(&self.blocks[bb].insns) {
            if self.insns[insn].bb == Some(bb) {
                return self.insns[insn].opcode.is_terminator().then_some(insn);
            }
        }
        None
    }

    /// Fresh generation for a marker-based graph walk.
    pub fn next_generation(&mut self) -> u64 {
        self.bb_generation += 1;
        self.bb_generation
    }

    // ----------------------------------------------------------------
    // Orderings and dominance
    // ----------------------------------------------------------------

    /// Recomputes `postorder_nr` and reorders `bbs` into reverse postorder
    /// from the entry block. Unreachable blocks are dropped from the list.
    pub fn cfg_postorder(&mut self) {
        let generation = self.next_generation();
        let mut postorder: Vec<BbId> = Vec::new();
        // Iterative DFS with an explicit stack of (block, child cursor).
        let mut stack: Vec<(BbId, Vec<BbId>, usize)> = Vec::new();
        self.blocks[self.entry].generation = generation;
        let entry_children = self.blocks[self.entry].children.to_vec();
        stack.push((self.entry, entry_children, 0));
        while let Some((bb, children, mut i)) = stack.pop() {
            let mut descended = false;
            while i < children.len() {
                let child = children[i];
                i += 1;
                if self.blocks[child].generation != generation {
                    self.blocks[child].generation = generation;
                    let grand = self.blocks[child].children.to_vec();
                    stack.push((bb, children, i));
                    stack.push((child, grand, 0));
                    descended = true;
                    break;
                }
            }
            if !descended {
                postorder.push(bb);
            }
        }
        for (i, &bb) in postorder.iter().enumerate() {
            self.blocks[bb].postorder_nr = i as u32;
        }
        self.bbs.clear();
        for &bb in postorder.iter().rev() {
            self.bbs.push_back(bb);
        }
    }

    /// Builds a petgraph view of the CFG for dominator queries.
    pub fn dominator_tree(&self) -> (Dominators<NodeIndex>, HashMap<BbId, NodeIndex>) {
        let mut graph: DiGraph<BbId, ()> = DiGraph::new();
        let mut nodes: HashMap<BbId, NodeIndex> = HashMap::new();
        for bb in self.bbs.iter() {
            nodes.insert(bb, graph.add_node(bb));
        }
        for bb in self.bbs.iter() {
            let from = nodes[&bb];
            for child in self.blocks[bb].children.iter() {
                if let Some(&to) = nodes.get(&child) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        let root = nodes[&self.entry];
        (dominators::simple_fast(&graph, root), nodes)
    }

    /// Does `a` dominate `b`?
    pub fn bb_dominates(
        &self,
        doms: &Dominators<NodeIndex>,
        nodes: &HashMap<BbId, NodeIndex>,
        a: BbId,
        b: BbId,
    ) -> bool {
        let (Some(&na), Some(&nb)) = (nodes.get(&a), nodes.get(&b)) else {
            return false;
        };
        let mut cur = Some(nb);
        while let Some(n) = cur {
            if n == na {
                return true;
            }
            cur = doms.immediate_dominator(n);
        }
        false
    }

    // ----------------------------------------------------------------
    // Validity checks (used by tests and debug assertions)
    // ----------------------------------------------------------------

    /// Checks the core structural invariants; returns problems found.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for bb in self.bbs.iter() {
            let mut seen_terminator = false;
            for insn in self.blocks[bb].insns.iter() {
                let i = &self.insns[insn];
                if i.bb.is_none() {
                    continue;
                }
                if i.bb != Some(bb) {
                    problems.push(format!("instruction in {bb:?} claims {:?}", i.bb));
                }
                if seen_terminator {
                    problems.push(format!("instruction after terminator in {bb:?}"));
                }
                if i.opcode.is_terminator() {
                    seen_terminator = true;
                }
                if i.opcode == Opcode::Phi {
                    // Flow surgery may leave voided or extra (ancestor)
                    // sources, but never fewer sources than parents.
                    let parents = self.blocks[bb].parents.len();
                    if i.phi_list.len() < parents {
                        problems.push(format!(
                            "phi in {bb:?} has {} sources for {} parents",
                            i.phi_list.len(),
                            parents
                        ));
                    }
                }
                if i.has_target() {
                    let t = &self.pseudos[i.target];
                    if t.kind == PseudoKind::Reg && t.def != Some(insn) {
                        problems.push(format!("target of {insn:?} does not point back"));
                    }
                }
            }
            // children match the terminator's successors.
            if let Some(term) = self.terminator(bb) {
                let t = &self.insns[term];
                let mut succs: Vec<BbId> = Vec::new();
                match t.opcode {
                    Opcode::Br => {
                        if let Some(tb) = t.bb_true {
                            succs.push(tb);
                        }
                        if let Some(fb) = t.bb_false {
                            succs.push(fb);
                        }
                    }
                    Opcode::Switch => {
                        for jmp in &t.multijmp {
                            if !succs.contains(&jmp.target) {
                                succs.push(jmp.target);
                            }
                        }
                    }
                    _ => {}
                }
                for s in &succs {
                    if !self.blocks[bb].children.contains(*s) {
                        problems.push(format!("{bb:?} missing child {s:?}"));
                    }
                }
                for c in self.blocks[bb].children.iter() {
                    if !succs.contains(&c) {
                        problems.push(format!("{bb:?} has stale child {c:?}"));
                    }
                    if !self.blocks[c].parents.contains(bb) {
                        problems.push(format!("{c:?} missing parent {bb:?}"));
                    }
                }
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ep() -> EntryPoint {
        EntryPoint::new(SymbolId(0), Position::none())
    }

    #[test]
    fn value_pseudos_are_interned() {
        let mut ep = test_ep();
        let a = ep.value_pseudo(42);
        let b = ep.value_pseudo(42);
        let c = ep.value_pseudo(43);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(ep.pseudos[a].value, 42);
    }

    #[test]
    fn use_lists_track_slots() {
        let mut ep = test_ep();
        let insn = ep.insns.alloc(Instruction::new(Opcode::Add, Position::none(), 32));
        ep.insns[insn].bb = Some(ep.entry);
        let r = ep.alloc_pseudo(None);
        ep.use_pseudo(insn, UseSlot::Src1, r);
        ep.use_pseudo(insn, UseSlot::Src2, r);
        assert_eq!(ep.pseudos[r].users.len(), 2);
        ep.kill_use(insn, UseSlot::Src1);
        assert_eq!(ep.pseudos[r].users.len(), 1);
        assert_eq!(ep.insns[insn].src1, VOID);
        assert_eq!(ep.insns[insn].src2, r);
    }

    #[test]
    fn killing_last_use_kills_the_def() {
        let mut ep = test_ep();
        let def = ep.insns.alloc(Instruction::new(Opcode::Add, Position::none(), 32));
        ep.insns[def].bb = Some(ep.entry);
        let r = ep.alloc_pseudo(Some(def));
        ep.insns[def].target = r;

        let user = ep.insns.alloc(Instruction::new(Opcode::Neg, Position::none(), 32));
        ep.insns[user].bb = Some(ep.entry);
        ep.use_pseudo(user, UseSlot::Src1, r);

        ep.kill_use(user, UseSlot::Src1);
        assert!(ep.insns[def].bb.is_none(), "dead def must be killed");
    }

    #[test]
    fn convert_target_moves_users() {
        let mut ep = test_ep();
        let def = ep.insns.alloc(Instruction::new(Opcode::Add, Position::none(), 32));
        ep.insns[def].bb = Some(ep.entry);
        let old = ep.alloc_pseudo(Some(def));
        ep.insns[def].target = old;
        let new = ep.alloc_pseudo(None);

        let user = ep.insns.alloc(Instruction::new(Opcode::Neg, Position::none(), 32));
        ep.insns[user].bb = Some(ep.entry);
        ep.use_pseudo(user, UseSlot::Src1, old);

        ep.convert_target(def, new);
        assert_eq!(ep.insns[user].src1, new);
        assert_eq!(ep.pseudos[new].users.len(), 1);
        assert!(ep.pseudos[old].users.is_empty());
    }

    #[test]
    fn edges_stay_inverse() {
        let mut ep = test_ep();
        let b = ep.blocks.alloc(BasicBlock::new(Position::none()));
        ep.bbs.push_back(b);
        ep.add_edge(ep.entry, b);
        assert!(ep.blocks[ep.entry].children.contains(b));
        assert!(ep.blocks[b].parents.contains(ep.entry));
        ep.remove_edge(ep.entry, b);
        assert!(!ep.blocks[ep.entry].children.contains(b));
        assert!(!ep.blocks[b].parents.contains(ep.entry));
    }

    #[test]
    fn postorder_orders_entry_first_in_rpo() {
        let mut ep = test_ep();
        let b1 = ep.blocks.alloc(BasicBlock::new(Position::none()));
        let b2 = ep.blocks.alloc(BasicBlock::new(Position::none()));
        ep.bbs.push_back(b1);
        ep.bbs.push_back(b2);
        ep.add_edge(ep.entry, b1);
        ep.add_edge(b1, b2);
        ep.cfg_postorder();
        let order = ep.bbs.to_vec();
        assert_eq!(order[0], ep.entry);
        assert_eq!(order.last().copied(), Some(b2));
        assert!(ep.blocks[ep.entry].postorder_nr > ep.blocks[b2].postorder_nr);
    }

    #[test]
    fn dominators_via_cfg_view() {
        let mut ep = test_ep();
        let then_bb = ep.blocks.alloc(BasicBlock::new(Position::none()));
        let else_bb = ep.blocks.alloc(BasicBlock::new(Position::none()));
        let join = ep.blocks.alloc(BasicBlock::new(Position::none()));
        for b in [then_bb, else_bb, join] {
            ep.bbs.push_back(b);
        }
        ep.add_edge(ep.entry, then_bb);
        ep.add_edge(ep.entry, else_bb);
        ep.add_edge(then_bb, join);
        ep.add_edge(else_bb, join);

        let (doms, nodes) = ep.dominator_tree();
        assert!(ep.bb_dominates(&doms, &nodes, ep.entry, join));
        assert!(!ep.bb_dominates(&doms, &nodes, then_bb, join));
        assert!(ep.bb_dominates(&doms, &nodes, join, join));
    }
}
