//! Textual IR dump.
//!
//! One block per `.L<nr>:` label, one instruction per line in the form
//! `opcode.size target, src1, src2 [, ...]`. Pseudos print as `v<nr>` for
//! registers, `$<literal>` for constants, `%<name>` for symbols, and
//! `ARG<nr>` for arguments.

use std::collections::HashMap;
use std::fmt::Write;

use larch_front::Session;

use crate::bb::EntryPoint;
use crate::insn::{BbId, InsnId, Opcode, PseudoId, PseudoKind, VOID};

fn show_pseudo(sess: &Session, ep: &EntryPoint, p: PseudoId) -> String {
    let pseudo = &ep.pseudos[p];
    match pseudo.kind {
        PseudoKind::Void => "VOID".to_string(),
        PseudoKind::Reg | PseudoKind::Phi => format!("v{}", pseudo.nr),
        PseudoKind::Val => format!("${}", pseudo.value),
        PseudoKind::Arg => format!("ARG{}", pseudo.nr),
        PseudoKind::Sym => match pseudo.sym.and_then(|s| sess.symtab.symbols[s].ident) {
            Some(ident) => format!("%{}", sess.interner.name(ident)),
            None => "%<anon>".to_string(),
        },
    }
}

fn label_of(labels: &HashMap<BbId, usize>, bb: BbId) -> String {
    match labels.get(&bb) {
        Some(nr) => format!(".L{nr}"),
        None => ".L?".to_string(),
    }
}

fn show_insn(
    sess: &Session,
    ep: &EntryPoint,
    labels: &HashMap<BbId, usize>,
    insn: InsnId,
) -> String {
    let i = &ep.insns[insn];
    let mut out = String::new();
    let _ = write!(out, "\t{}", i.opcode.mnemonic());
    if i.size > 0 {
        let _ = write!(out, ".{}", i.size);
    }
    let mut operands: Vec<String> = Vec::new();
    match i.opcode {
        Opcode::Br => {
            if i.src1 != VOID {
                operands.push(show_pseudo(sess, ep, i.src1));
            }
            if let Some(t) = i.bb_true {
                operands.push(label_of(labels, t));
            }
            if let Some(f) = i.bb_false {
                operands.push(label_of(labels, f));
            }
        }
        Opcode::Switch => {
            operands.push(show_pseudo(sess, ep, i.src1));
            for jmp in &i.multijmp {
                if jmp.is_default() {
                    operands.push(format!("default -> {}", label_of(labels, jmp.target)));
                } else if jmp.begin == jmp.end {
                    operands.push(format!("{} -> {}", jmp.begin, label_of(labels, jmp.target)));
                } else {
                    operands.push(format!(
                        "{}..{} -> {}",
                        jmp.begin,
                        jmp.end,
                        label_of(labels, jmp.target)
                    ));
                }
            }
        }
        Opcode::Ret => {
            if i.src1 != VOID {
                operands.push(show_pseudo(sess, ep, i.src1));
            }
        }
        Opcode::Load => {
            operands.push(show_pseudo(sess, ep, i.target));
            operands.push(format!(
                "[{} + {}]",
                show_pseudo(sess, ep, i.src1),
                i.offset
            ));
        }
        Opcode::Store => {
            operands.push(show_pseudo(sess, ep, i.target));
            operands.push(format!(
                "[{} + {}]",
                show_pseudo(sess, ep, i.src1),
                i.offset
            ));
        }
        Opcode::Setval => {
            operands.push(show_pseudo(sess, ep, i.target));
            if let Some(sym) = i.symbol {
                match sess.symtab.symbols[sym].ident {
                    Some(ident) => operands.push(format!("%{}", sess.interner.name(ident))),
                    None => operands.push("%<anon>".to_string()),
                }
            } else if let Some(s) = &i.string {
                let text = String::from_utf8_lossy(&s[..s.len().saturating_sub(1)]).into_owned();
                operands.push(format!("{text:?}"));
            } else {
                operands.push(format!("${}", i.val_bits));
            }
        }
        Opcode::Call => {
            if i.target != VOID {
                operands.push(show_pseudo(sess, ep, i.target));
            }
            operands.push(show_pseudo(sess, ep, i.func));
            for &a in &i.args {
                operands.push(show_pseudo(sess, ep, a));
            }
        }
        Opcode::Phi => {
            operands.push(show_pseudo(sess, ep, i.target));
            for &p in &i.phi_list {
                operands.push(show_pseudo(sess, ep, p));
            }
        }
        Opcode::Entry | Opcode::Nop | Opcode::Lnop | Opcode::Snop => {}
        Opcode::Context => {
            operands.push(format!("{}", i.increment));
        }
        _ => {
            if i.has_target() {
                operands.push(show_pseudo(sess, ep, i.target));
            }
            for p in [i.src1, i.src2, i.src3] {
                if p != VOID {
                    operands.push(show_pseudo(sess, ep, p));
                }
            }
        }
    }
    if !operands.is_empty() {
        let _ = write!(out, " {}", operands.join(", "));
    }
    out
}

/// Renders a whole entry point.
pub fn show_entry(sess: &Session, ep: &EntryPoint) -> String {
    let mut labels: HashMap<BbId, usize> = HashMap::new();
    for (i, bb) in ep.bbs.iter().enumerate() {
        labels.insert(bb, i);
    }
    let name = sess.symtab.symbols[ep.name]
        .ident
        .map(|i| sess.interner.name(i).to_string())
        .unwrap_or_else(|| "<anon>".to_string());
    let mut out = String::new();
    let _ = writeln!(out, "{name}:");
    for bb in ep.bbs.iter() {
        let _ = writeln!(out, "{}:", label_of(&labels, bb));
        for insn in ep.blocks[bb].insns.iter() {
            if ep.insns[insn].bb != Some(bb) {
                continue;
            }
            let _ = writeln!(out, "{}", show_insn(sess, ep, &labels, insn));
        }
    }
    out
}
