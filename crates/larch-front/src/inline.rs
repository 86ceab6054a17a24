//! Inline function expansion.
//!
//! A call to a `static inline` function with a visible body is rewritten at
//! the call site into a statement expression: parameter declarations
//! initialized with the argument expressions, a deep copy of the body with
//! every local symbol (variables, labels) replaced by a fresh one, returns
//! turned into result assignments plus a goto to a fresh end label, and the
//! result variable as the statement expression's value.
//!
//! Recursion is refused via the function symbol's busy flag.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{Expr, ExprId, ExprKind, Stmt, StmtId, StmtKind};
use crate::symbol::{SymKind, SymbolId};
use crate::token::Special;
use crate::types::base_type_of;
use crate::Session;

/// Expands the call in place. Returns `false` when inlining is refused
/// (recursion, missing body); the call then stays a plain call.
pub fn expand_call(
    sess: &mut Session,
    call: ExprId,
    fsym: SymbolId,
    args: &[ExprId],
    return_type: SymbolId,
) -> bool {
    if sess.symtab.symbols[fsym].busy {
        let pos = sess.exprs[call].pos;
        sess.diags
            .warning(pos, "cannot inline recursive call");
        return false;
    }
    if sess.symtab.symbols[fsym].base_type.is_none() {
        return false;
    }
    let Some(body) = sess.symtab.symbols[fsym].stmt else {
        return false;
    };
    let params = sess.symtab.symbols[fsym].arguments.clone();
    if params.len() != args.len() {
        return false;
    }
    sess.symtab.symbols[fsym].busy = true;

    let pos = sess.exprs[call].pos;
    let is_void = base_type_of(sess, return_type) == sess.ctypes.void;

    let mut copier = Copier {
        sess,
        map: HashMap::new(),
        copied_stmts: HashMap::new(),
        result: None,
        end_label: SymbolId(0),
    };

    // Fresh locals for the parameters, initialized with the arguments.
    let mut stmts: Vec<StmtId> = Vec::new();
    for (&param, &arg) in params.iter().zip(args.iter()) {
        let local = copier.copy_symbol(param);
        copier.sess.symtab.symbols[local].initializer = Some(arg);
        let decl = copier.sess.stmts.alloc(Stmt::new(
            pos,
            StmtKind::Declaration { syms: vec![local] },
        ));
        stmts.push(decl);
    }

    // Result variable and end label.
    let end_label = {
        let l = copier.sess.symtab.alloc(SymKind::Label, pos);
        copier.sess.symtab.symbols[l].used = true;
        l
    };
    copier.end_label = end_label;
    if !is_void {
        let r = copier.sess.symtab.alloc(SymKind::Node, pos);
        copier.sess.symtab.symbols[r].base_type = Some(return_type);
        copier.result = Some(r);
        let decl = copier
            .sess
            .stmts
            .alloc(Stmt::new(pos, StmtKind::Declaration { syms: vec![r] }));
        stmts.push(decl);
    }

    let copied_body = copier.copy_statement(body);
    stmts.push(copied_body);

    let none_stmt = copier.sess.stmts.alloc(Stmt::new(pos, StmtKind::None));
    let tail = copier.sess.stmts.alloc(Stmt::new(
        pos,
        StmtKind::Label {
            label: end_label,
            stmt: none_stmt,
        },
    ));
    stmts.push(tail);

    let result = copier.result;
    if let Some(r) = result {
        let ident = copier.sess.symtab.symbols[r]
            .ident
            .unwrap_or_else(|| copier.sess.interner.intern("__retval"));
        let value = copier.sess.exprs.alloc(Expr::new(
            pos,
            ExprKind::Symbol {
                sym: Some(r),
                ident,
            },
        ));
        let value_stmt = copier
            .sess
            .stmts
            .alloc(Stmt::new(pos, StmtKind::Expression { expr: value }));
        stmts.push(value_stmt);
    }

    let compound = sess.stmts.alloc(Stmt::new(pos, StmtKind::Compound { stmts }));
    sess.exprs[call] = Expr::new(pos, ExprKind::StmtExpr { stmt: compound });

    sess.symtab.symbols[fsym].busy = false;
    let name = sess.symtab.symbols[fsym]
        .ident
        .map(|i| sess.interner.name(i).to_string())
        .unwrap_or_default();
    debug!(function = %name, "inlined call");
    true
}

struct Copier<'s> {
    sess: &'s mut Session,
    /// Original local symbol to its per-call copy.
    map: HashMap<SymbolId, SymbolId>,
    /// Original statement to its copy, for switch case-list fixup.
    copied_stmts: HashMap<StmtId, StmtId>,
    result: Option<SymbolId>,
    end_label: SymbolId,
}

impl<'s> Copier<'s> {
    fn copy_symbol(&mut self, sym: SymbolId) -> SymbolId {
        if let Some(&copy) = self.map.get(&sym) {
            return copy;
        }
        let mut s = self.sess.symtab.symbols[sym].clone();
        s.next_id = None;
        s.same_symbol = None;
        s.replace = None;
        s.initializer = None;
        s.stmt = None;
        let copy = self.sess.symtab.symbols.alloc(s);
        self.map.insert(sym, copy);
        self.sess.symtab.symbols[sym].replace = Some(copy);
        copy
    }

    fn replace_symbol(&mut self, sym: SymbolId) -> SymbolId {
        self.map.get(&sym).copied().unwrap_or(sym)
    }

    fn copy_statement(&mut self, stmt: StmtId) -> StmtId {
        let pos = self.sess.stmts[stmt].pos;
        let kind = self.sess.stmts[stmt].kind.clone();
        let new_kind = match kind {
            StmtKind::None => StmtKind::None,
            StmtKind::Declaration { syms } => {
                let mut copies = Vec::with_capacity(syms.len());
                for sym in syms {
                    let init = self.sess.symtab.symbols[sym].initializer;
                    let copy = self.copy_symbol(sym);
                    if let Some(init) = init {
                        let init_copy = self.copy_expression(init);
                        self.sess.symtab.symbols[copy].initializer = Some(init_copy);
                    }
                    copies.push(copy);
                }
                StmtKind::Declaration { syms: copies }
            }
            StmtKind::Expression { expr } => StmtKind::Expression {
                expr: self.copy_expression(expr),
            },
            StmtKind::Compound { stmts } => StmtKind::Compound {
                stmts: stmts.into_iter().map(|s| self.copy_statement(s)).collect(),
            },
            StmtKind::If {
                cond,
                then_stmt,
                else_stmt,
            } => StmtKind::If {
                cond: self.copy_expression(cond),
                then_stmt: self.copy_statement(then_stmt),
                else_stmt: else_stmt.map(|s| self.copy_statement(s)),
            },
            StmtKind::Return { expr } => {
                // A return becomes a result assignment plus a jump to the
                // end of the expansion.
                let mut seq = Vec::new();
                if let Some(e) = expr {
                    let value = self.copy_expression(e);
                    if let Some(result) = self.result {
                        let ident = self.sess.symtab.symbols[result]
                            .ident
                            .unwrap_or_else(|| self.sess.interner.intern("__retval"));
                        let target = self.sess.exprs.alloc(Expr::new(
                            pos,
                            ExprKind::Symbol {
                                sym: Some(result),
                                ident,
                            },
                        ));
                        let assign = self.sess.exprs.alloc(Expr::new(
                            pos,
                            ExprKind::Assignment {
                                op: Special::Assign,
                                left: target,
                                right: value,
                            },
                        ));
                        let s = self
                            .sess
                            .stmts
                            .alloc(Stmt::new(pos, StmtKind::Expression { expr: assign }));
                        seq.push(s);
                    } else {
                        let s = self
                            .sess
                            .stmts
                            .alloc(Stmt::new(pos, StmtKind::Expression { expr: value }));
                        seq.push(s);
                    }
                }
                let jump = self.sess.stmts.alloc(Stmt::new(
                    pos,
                    StmtKind::Goto {
                        label: Some(self.end_label),
                        expr: None,
                    },
                ));
                seq.push(jump);
                StmtKind::Compound { stmts: seq }
            }
            StmtKind::Case {
                from,
                to,
                stmt,
                case_label,
            } => StmtKind::Case {
                from: from.map(|e| self.copy_expression(e)),
                to: to.map(|e| self.copy_expression(e)),
                stmt: self.copy_statement(stmt),
                case_label: self.copy_symbol(case_label),
            },
            StmtKind::Switch {
                expr,
                stmt,
                cases,
                break_label,
            } => {
                let expr = self.copy_expression(expr);
                let break_label = self.copy_symbol(break_label);
                let stmt = self.copy_statement(stmt);
                // Case statements were copied while walking the body.
                let cases = cases
                    .into_iter()
                    .filter_map(|c| self.copied_stmts.get(&c).copied())
                    .collect();
                StmtKind::Switch {
                    expr,
                    stmt,
                    cases,
                    break_label,
                }
            }
            StmtKind::Iterator {
                pre_statement,
                pre_condition,
                statement,
                post_statement,
                post_condition,
                break_label,
                continue_label,
            } => StmtKind::Iterator {
                pre_statement: pre_statement.map(|s| self.copy_statement(s)),
                pre_condition: pre_condition.map(|e| self.copy_expression(e)),
                statement: self.copy_statement(statement),
                post_statement: post_statement.map(|s| self.copy_statement(s)),
                post_condition: post_condition.map(|e| self.copy_expression(e)),
                break_label: self.copy_symbol(break_label),
                continue_label: self.copy_symbol(continue_label),
            },
            StmtKind::Label { label, stmt } => StmtKind::Label {
                label: self.copy_symbol(label),
                stmt: self.copy_statement(stmt),
            },
            StmtKind::Goto { label, expr } => StmtKind::Goto {
                label: label.map(|l| self.copy_symbol(l)),
                expr: expr.map(|e| self.copy_expression(e)),
            },
            StmtKind::Asm { template, volatile } => StmtKind::Asm { template, volatile },
            StmtKind::Context { expr, increment } => StmtKind::Context {
                expr: expr.map(|e| self.copy_expression(e)),
                increment,
            },
            StmtKind::Range { expr, low, high } => StmtKind::Range {
                expr: self.copy_expression(expr),
                low: self.copy_expression(low),
                high: self.copy_expression(high),
            },
        };
        let new = self.sess.stmts.alloc(Stmt::new(pos, new_kind));
        self.copied_stmts.insert(stmt, new);
        new
    }

    fn copy_expression(&mut self, expr: ExprId) -> ExprId {
        let node = self.sess.exprs[expr].clone();
        let pos = node.pos;
        let new_kind = match node.kind {
            ExprKind::Value { .. }
            | ExprKind::FValue { .. }
            | ExprKind::Str { .. }
            | ExprKind::TypeRef { .. }
            | ExprKind::TypesCompatible { .. } => node.kind,
            ExprKind::Symbol { sym, ident } => ExprKind::Symbol {
                sym: sym.map(|s| self.replace_symbol(s)),
                ident,
            },
            ExprKind::Binop { op, left, right } => ExprKind::Binop {
                op,
                left: self.copy_expression(left),
                right: self.copy_expression(right),
            },
            ExprKind::Assignment { op, left, right } => ExprKind::Assignment {
                op,
                left: self.copy_expression(left),
                right: self.copy_expression(right),
            },
            ExprKind::Logical { op, left, right } => ExprKind::Logical {
                op,
                left: self.copy_expression(left),
                right: self.copy_expression(right),
            },
            ExprKind::Compare { op, left, right } => ExprKind::Compare {
                op,
                left: self.copy_expression(left),
                right: self.copy_expression(right),
            },
            ExprKind::Deref { deref, member } => ExprKind::Deref {
                deref: self.copy_expression(deref),
                member,
            },
            ExprKind::Preop { op, expr } => ExprKind::Preop {
                op,
                expr: self.copy_expression(expr),
            },
            ExprKind::Postop { op, expr } => ExprKind::Postop {
                op,
                expr: self.copy_expression(expr),
            },
            ExprKind::Cast { cast_type, expr } => ExprKind::Cast {
                cast_type,
                expr: self.copy_expression(expr),
            },
            ExprKind::ImpliedCast { cast_type, expr } => ExprKind::ImpliedCast {
                cast_type,
                expr: self.copy_expression(expr),
            },
            ExprKind::Sizeof { type_arg, expr } => ExprKind::Sizeof {
                type_arg,
                expr: expr.map(|e| self.copy_expression(e)),
            },
            ExprKind::Alignof { type_arg, expr } => ExprKind::Alignof {
                type_arg,
                expr: expr.map(|e| self.copy_expression(e)),
            },
            ExprKind::PtrSizeof { expr } => ExprKind::PtrSizeof {
                expr: self.copy_expression(expr),
            },
            ExprKind::Conditional {
                cond,
                when_true,
                when_false,
            } => ExprKind::Conditional {
                cond: self.copy_expression(cond),
                when_true: when_true.map(|e| self.copy_expression(e)),
                when_false: self.copy_expression(when_false),
            },
            ExprKind::Select {
                cond,
                when_true,
                when_false,
            } => ExprKind::Select {
                cond: self.copy_expression(cond),
                when_true: self.copy_expression(when_true),
                when_false: self.copy_expression(when_false),
            },
            ExprKind::StmtExpr { stmt } => ExprKind::StmtExpr {
                stmt: self.copy_statement(stmt),
            },
            ExprKind::Call { func, args } => ExprKind::Call {
                func: self.copy_expression(func),
                args: args.into_iter().map(|a| self.copy_expression(a)).collect(),
            },
            ExprKind::Comma { left, right } => ExprKind::Comma {
                left: self.copy_expression(left),
                right: self.copy_expression(right),
            },
            ExprKind::Bitfield {
                base,
                bit_offset,
                width,
            } => ExprKind::Bitfield {
                base: self.copy_expression(base),
                bit_offset,
                width,
            },
            ExprKind::LabelRef { sym } => ExprKind::LabelRef {
                sym: self.replace_symbol(sym),
            },
            ExprKind::InitList { entries } => ExprKind::InitList {
                entries: entries
                    .into_iter()
                    .map(|e| self.copy_expression(e))
                    .collect(),
            },
            ExprKind::MemberDesignator { member, child } => ExprKind::MemberDesignator {
                member,
                child: child.map(|c| self.copy_expression(c)),
            },
            ExprKind::IndexDesignator { from, to, child } => ExprKind::IndexDesignator {
                from: self.copy_expression(from),
                to: to.map(|e| self.copy_expression(e)),
                child: child.map(|c| self.copy_expression(c)),
            },
            ExprKind::Pos { offset, init } => ExprKind::Pos {
                offset,
                init: self.copy_expression(init),
            },
            ExprKind::ChooseExpr {
                cond,
                when_true,
                when_false,
            } => ExprKind::ChooseExpr {
                cond: self.copy_expression(cond),
                when_true: self.copy_expression(when_true),
                when_false: self.copy_expression(when_false),
            },
            ExprKind::Offsetof {
                type_arg,
                designator,
            } => ExprKind::Offsetof {
                type_arg,
                designator: self.copy_expression(designator),
            },
            ExprKind::Expect { value, expected } => ExprKind::Expect {
                value: self.copy_expression(value),
                expected: self.copy_expression(expected),
            },
            ExprKind::ConstantP { expr } => ExprKind::ConstantP {
                expr: self.copy_expression(expr),
            },
        };
        let new = self.sess.exprs.alloc(Expr::new(pos, new_kind));
        // Types are recomputed when the expansion is re-evaluated.
        self.sess.exprs[new].flags = node.flags;
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Namespace;
    use crate::{Options, Session};
    use larch_core::Position;

    #[test]
    fn refuses_recursion_via_busy_flag() {
        let mut sess = Session::new(Options::default());
        sess.diags.register_stream("t.c");
        let f = sess.symtab.alloc(SymKind::Node, Position::none());
        let id = sess.interner.intern("f");
        sess.symtab.bind(f, id, Namespace::SYMBOL);
        let body = sess.stmts.alloc(Stmt::new(Position::none(), StmtKind::None));
        sess.symtab.symbols[f].stmt = Some(body);
        sess.symtab.symbols[f].busy = true;

        let func = sess.exprs.alloc(Expr::new(
            Position::none(),
            ExprKind::Symbol {
                sym: Some(f),
                ident: id,
            },
        ));
        let call = sess.exprs.alloc(Expr::new(
            Position::none(),
            ExprKind::Call { func, args: vec![] },
        ));
        let void = sess.ctypes.void;
        assert!(!expand_call(&mut sess, call, f, &[], void));
        assert!(sess.diags.warnings() > 0);
    }
}
