//! End-to-end pipeline tests: C source through tokenize, preprocess, parse,
//! evaluate, linearize, and optimize, asserting on the resulting IR shape.

use larch_front::tokenizer::tokenize_stream;
use larch_front::{Options, Session, StreamInfo};
use larch_ir::{EntryPoint, Opcode, PseudoKind, VOID};

/// Runs the front end over `src` and linearizes every function.
fn compile(src: &str, opt_level: u8) -> (Session, Vec<EntryPoint>) {
    let mut options = Options::default();
    options.opt_level = opt_level;
    let mut sess = Session::new(options);
    let stream = sess.diags.register_stream("test.c");
    sess.streams.push(StreamInfo {
        path: "test.c".into(),
        canonical: None,
        guard: None,
    });
    let tokens = tokenize_stream(&mut sess, stream, src.as_bytes());
    let tokens = larch_front::preprocess(&mut sess, tokens);
    let symbols = larch_front::parse_translation_unit(&mut sess, tokens);
    larch_front::evaluate_symbol_list(&mut sess, &symbols);
    assert!(
        !sess.diags.has_errors(),
        "unexpected errors:\n{}",
        sess.diags.render_all()
    );

    let mut entries = Vec::new();
    for &sym in &symbols {
        if let Some(mut ep) = larch_ir::linearize_symbol(&mut sess, sym) {
            if opt_level > 0 {
                larch_ir::optimize(&sess, &mut ep);
            }
            entries.push(ep);
        }
    }
    (sess, entries)
}

/// All live instructions of an entry point, in block order.
fn live_insns(ep: &EntryPoint) -> Vec<larch_ir::InsnId> {
    let mut out = Vec::new();
    for bb in ep.bbs.to_vec() {
        for insn in ep.blocks[bb].insns.to_vec() {
            if ep.insns[insn].bb == Some(bb) {
                out.push(insn);
            }
        }
    }
    out
}

fn count_opcode(ep: &EntryPoint, opcode: Opcode) -> usize {
    live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == opcode)
        .count()
}

fn const_of(ep: &EntryPoint, p: larch_ir::PseudoId) -> Option<i64> {
    (ep.pseudos[p].kind == PseudoKind::Val).then(|| ep.pseudos[p].value)
}

#[test]
fn chained_ifs_linearize_to_branching_cfg() {
    let src = "int f(int a){ if (a > 5) return 5; if (a > 0) return a; return 0; }";
    let (_, entries) = compile(src, 0);
    assert_eq!(entries.len(), 1);
    let ep = &entries[0];

    // Three return sites, at least four blocks, two conditional branches.
    assert_eq!(count_opcode(ep, Opcode::Ret), 3);
    assert!(ep.bbs.len() >= 4, "expected a branching CFG");
    let cond_branches = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Br && ep.insns[i].src1 != VOID)
        .count();
    assert_eq!(cond_branches, 2);

    let problems = ep.check_invariants();
    assert!(problems.is_empty(), "invariant violations: {problems:?}");
}

#[test]
fn dominated_store_dies_and_load_forwards() {
    let src = "int g(int *p){ *p = 1; *p = 2; return *p; }";
    let (_, entries) = compile(src, 2);
    let ep = &entries[0];

    // One store survives (p may escape), the first store and the load are
    // gone, and the return value is the literal 2.
    assert_eq!(count_opcode(ep, Opcode::Store), 1);
    assert_eq!(count_opcode(ep, Opcode::Load), 0);
    let stores: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Store)
        .collect();
    assert_eq!(const_of(ep, ep.insns[stores[0]].target), Some(2));

    let rets: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Ret)
        .collect();
    assert_eq!(rets.len(), 1);
    assert_eq!(const_of(ep, ep.insns[rets[0]].src1), Some(2));
}

#[test]
fn identical_conditional_arms_fold_to_constant() {
    let src = "int h(int x){ return x ? 0 : 0; }";
    let (_, entries) = compile(src, 2);
    let ep = &entries[0];

    // No conditional branch survives and the return is the constant 0.
    let cond_branches = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Br && ep.insns[i].src1 != VOID)
        .count();
    assert_eq!(cond_branches, 0, "branch should have been folded away");
    let rets: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Ret)
        .collect();
    assert_eq!(rets.len(), 1);
    assert_eq!(const_of(ep, ep.insns[rets[0]].src1), Some(0));
}

#[test]
fn loop_variable_gets_a_two_source_phi() {
    let src = "int w(int a){ int s = 0; int i; for (i = 0; i < 3; i++) s += i; return s; }";
    let (_, entries) = compile(src, 2);
    let ep = &entries[0];

    // The accumulator merges across the back edge: a live phi with two
    // incoming sources must exist.
    let phis: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Phi)
        .collect();
    assert!(!phis.is_empty(), "loop-carried values need phis");
    assert!(phis.iter().any(|&i| {
        ep.insns[i]
            .phi_list
            .iter()
            .filter(|&&p| p != VOID)
            .count()
            == 2
    }));
}

#[test]
fn inlined_square_is_shared_by_cse() {
    let src = "static inline int sq(int n){ return n*n; }\nint m(int a){ return sq(a) + sq(a); }";
    let (_, entries) = compile(src, 2);
    // Both `sq` (has a body of its own) and `m` linearize; find `m` by
    // looking for the function with an Add.
    let ep = entries
        .iter()
        .find(|ep| count_opcode(ep, Opcode::Add) > 0)
        .expect("m must contain an add");

    // After inlining and CSE the square is computed once and added to
    // itself.
    assert_eq!(count_opcode(ep, Opcode::Mul), 1);
    assert_eq!(count_opcode(ep, Opcode::Call), 0, "calls must be inlined");
    let adds: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Add)
        .collect();
    assert_eq!(adds.len(), 1);
    assert_eq!(ep.insns[adds[0]].src1, ep.insns[adds[0]].src2);
}

#[test]
fn bitfield_read_lowers_to_shift_and_mask() {
    let src = "struct S { int a:3; int b:5; };\nint r(struct S *s){ return s->b; }";
    let (_, entries) = compile(src, 0);
    let ep = &entries[0];

    // A load of the containing unit, a shift right by the bit offset, a
    // mask of the field width, and a sign extension for the signed field.
    assert!(count_opcode(ep, Opcode::Load) >= 1);
    let shifts: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Shr)
        .collect();
    assert!(shifts
        .iter()
        .any(|&i| const_of(ep, ep.insns[i].src2) == Some(3)));
    let masks: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::And)
        .collect();
    assert!(masks
        .iter()
        .any(|&i| const_of(ep, ep.insns[i].src2) == Some(0x1f)));
    assert!(count_opcode(ep, Opcode::SCast) >= 1, "signed field extends");
}

#[test]
fn constant_switch_selector_becomes_direct_branch() {
    let src = "int k(void){ int x = 3; switch (x) { case 1: return 1; case 3: return 3; } return 0; }";
    let (_, entries) = compile(src, 2);
    let ep = &entries[0];

    assert_eq!(count_opcode(ep, Opcode::Switch), 0, "switch must resolve");
    let rets: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Ret)
        .collect();
    assert!(rets
        .iter()
        .any(|&i| const_of(ep, ep.insns[i].src1) == Some(3)));
    // The impossible arm is unreachable and must be gone.
    assert!(!rets
        .iter()
        .any(|&i| const_of(ep, ep.insns[i].src1) == Some(1)));
}

#[test]
fn optimization_is_idempotent() {
    let src = "int f(int a, int b){ if (a > b) return a - b; return b - a; }";
    let (sess, mut entries) = compile(src, 2);
    let ep = &mut entries[0];
    let first = larch_ir::show_entry(&sess, ep);
    larch_ir::optimize(&sess, ep);
    let second = larch_ir::show_entry(&sess, ep);
    assert_eq!(first, second, "a second optimize run must be a no-op");
}

#[test]
fn unssa_leaves_no_phis() {
    let src = "int pick(int c, int a, int b){ int r; if (c) r = a; else r = b; return r; }";
    let (_, mut entries) = compile(src, 2);
    let ep = &mut entries[0];
    larch_ir::lower_out_of_ssa(ep);
    assert_eq!(count_opcode(ep, Opcode::Phi), 0);
    assert_eq!(count_opcode(ep, Opcode::PhiSource), 0);
}

#[test]
fn arguments_arrive_as_arg_pseudos() {
    let src = "int add(int a, int b){ return a + b; }";
    let (_, entries) = compile(src, 2);
    let ep = &entries[0];
    let adds: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Add)
        .collect();
    assert_eq!(adds.len(), 1);
    let a = ep.insns[adds[0]].src1;
    let b = ep.insns[adds[0]].src2;
    assert_eq!(ep.pseudos[a].kind, PseudoKind::Arg);
    assert_eq!(ep.pseudos[b].kind, PseudoKind::Arg);
    assert_ne!(ep.pseudos[a].nr, ep.pseudos[b].nr);
}

#[test]
fn short_circuit_and_folds_on_constant_left() {
    let src = "int s(int x){ return 0 && x; }";
    let (_, entries) = compile(src, 2);
    let ep = &entries[0];
    let rets: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Ret)
        .collect();
    assert_eq!(rets.len(), 1);
    assert_eq!(const_of(ep, ep.insns[rets[0]].src1), Some(0));
}

#[test]
fn pointer_arithmetic_scales_by_element_size() {
    let src = "int idx(int *p, int i){ return p[i]; }";
    let (_, entries) = compile(src, 0);
    let ep = &entries[0];
    // The index is multiplied by sizeof(int) before the add.
    let muls: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::Mul)
        .collect();
    assert!(muls
        .iter()
        .any(|&i| const_of(ep, ep.insns[i].src2) == Some(4)));
}

#[test]
fn restricted_integer_degrades_with_a_warning() {
    let src = "typedef int __attribute__((bitwise)) le32;\nint d(le32 x){ return x + 1; }";
    let (sess, entries) = compile(src, 0);
    // Mixing a restricted integer into plain arithmetic defouls it: the
    // code still lowers, but a diagnostic is due.
    assert!(sess.diags.warnings() > 0);
    let ep = &entries[0];
    assert!(count_opcode(ep, Opcode::Add) >= 1);
}

#[test]
fn preprocessor_feeds_the_pipeline() {
    let src = "#define LIMIT 10\nint c(int x){ return x < LIMIT; }";
    let (_, entries) = compile(src, 2);
    let ep = &entries[0];
    let cmps: Vec<_> = live_insns(ep)
        .into_iter()
        .filter(|&i| ep.insns[i].opcode == Opcode::SetLt)
        .collect();
    assert_eq!(cmps.len(), 1);
    assert_eq!(const_of(ep, ep.insns[cmps[0]].src2), Some(10));
}
