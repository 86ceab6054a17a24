//! Constant folding.
//!
//! Two services: [`const_expression_value`] answers "is this an integer
//! constant expression, and what is its value" structurally (usable before
//! and after evaluation — enum values, array extents, case labels, bitfield
//! widths all go through it), and [`expand_symbol`] runs the post-evaluation
//! folding pass that collapses constant subtrees in place, masking results
//! to the width of the expression's type.

use crate::ast::{ExprFlags, ExprId, ExprKind, StmtId, StmtKind};
use crate::symbol::SymbolId;
use crate::token::Special;
use crate::types::{base_type_of, is_unsigned};
use crate::Session;

/// Structural integer-constant evaluation. Returns `None` when the
/// expression is not a compile-time integer constant.
pub fn const_expression_value(sess: &Session, expr: ExprId) -> Option<i64> {
    match &sess.exprs[expr].kind {
        ExprKind::Value { value } => Some(*value as i64),
        ExprKind::Symbol { sym: Some(sym), .. } if sess.symtab.symbols[*sym].enum_member => {
            Some(sess.symtab.symbols[*sym].value)
        }
        ExprKind::Preop { op, expr } => {
            let v = const_expression_value(sess, *expr)?;
            match op {
                Special::Minus => Some(v.wrapping_neg()),
                Special::Tilde => Some(!v),
                Special::Bang => Some((v == 0) as i64),
                Special::Plus => Some(v),
                _ => None,
            }
        }
        ExprKind::Binop { op, left, right } => {
            let l = const_expression_value(sess, *left)?;
            let r = const_expression_value(sess, *right)?;
            match op {
                Special::Plus => Some(l.wrapping_add(r)),
                Special::Minus => Some(l.wrapping_sub(r)),
                Special::Star => Some(l.wrapping_mul(r)),
                Special::Slash => (r != 0).then(|| l.wrapping_div(r)),
                Special::Percent => (r != 0).then(|| l.wrapping_rem(r)),
                Special::Shl => Some(l.wrapping_shl(r as u32 & 63)),
                Special::Shr => Some(l.wrapping_shr(r as u32 & 63)),
                Special::Amp => Some(l & r),
                Special::Pipe => Some(l | r),
                Special::Caret => Some(l ^ r),
                _ => None,
            }
        }
        ExprKind::Compare { op, left, right } => {
            let l = const_expression_value(sess, *left)?;
            let r = const_expression_value(sess, *right)?;
            let v = match op {
                Special::Equal => l == r,
                Special::NotEqual => l != r,
                Special::Lt => l < r,
                Special::Gt => l > r,
                Special::Lte => l <= r,
                Special::Gte => l >= r,
                _ => return None,
            };
            Some(v as i64)
        }
        ExprKind::Logical { op, left, right } => {
            let l = const_expression_value(sess, *left)?;
            match op {
                Special::LogicalAnd => {
                    if l == 0 {
                        Some(0)
                    } else {
                        Some((const_expression_value(sess, *right)? != 0) as i64)
                    }
                }
                Special::LogicalOr => {
                    if l != 0 {
                        Some(1)
                    } else {
                        Some((const_expression_value(sess, *right)? != 0) as i64)
                    }
                }
                _ => None,
            }
        }
        ExprKind::Conditional {
            cond,
            when_true,
            when_false,
        } => {
            let c = const_expression_value(sess, *cond)?;
            if c != 0 {
                match when_true {
                    Some(t) => const_expression_value(sess, *t),
                    None => Some(c),
                }
            } else {
                const_expression_value(sess, *when_false)
            }
        }
        ExprKind::Select {
            cond,
            when_true,
            when_false,
        } => {
            let c = const_expression_value(sess, *cond)?;
            if c != 0 {
                const_expression_value(sess, *when_true)
            } else {
                const_expression_value(sess, *when_false)
            }
        }
        ExprKind::Cast { cast_type, expr } | ExprKind::ImpliedCast { cast_type, expr } => {
            let v = const_expression_value(sess, *expr)?;
            Some(truncate_value(sess, v, *cast_type))
        }
        ExprKind::Comma { right, .. } => const_expression_value(sess, *right),
        ExprKind::Expect { value, .. } => const_expression_value(sess, *value),
        ExprKind::Pos { init, .. } => const_expression_value(sess, *init),
        _ => None,
    }
}

/// Masks `value` to the width of `ctype`, sign-extending signed targets.
pub fn truncate_value(sess: &Session, value: i64, ctype: SymbolId) -> i64 {
    let base = base_type_of(sess, ctype);
    let bits = sess.symtab.symbols[base].bit_size;
    if bits <= 0 || bits >= 64 {
        return value;
    }
    let masked = (value as u64) & ((1u64 << bits) - 1);
    if is_unsigned(sess, base) {
        masked as i64
    } else {
        // Sign-extend from the top bit of the target width.
        let shift = 64 - bits as u32;
        ((masked << shift) as i64) >> shift
    }
}

/// Folds constants throughout a symbol's initializer and body.
pub fn expand_symbol(sess: &mut Session, sym: SymbolId) {
    if let Some(init) = sess.symtab.symbols[sym].initializer {
        expand_expression(sess, init);
    }
    if let Some(body) = sess.symtab.symbols[sym].stmt {
        expand_statement(sess, body);
    }
}

pub fn expand_statement(sess: &mut Session, stmt: StmtId) {
    let kind = sess.stmts[stmt].kind.clone();
    match kind {
        StmtKind::None | StmtKind::Asm { .. } => {}
        StmtKind::Declaration { syms } => {
            for s in syms {
                expand_symbol(sess, s);
            }
        }
        StmtKind::Expression { expr } => expand_expression(sess, expr),
        StmtKind::Compound { stmts } => {
            for s in stmts {
                expand_statement(sess, s);
            }
        }
        StmtKind::If {
            cond,
            then_stmt,
            else_stmt,
        } => {
            expand_expression(sess, cond);
            expand_statement(sess, then_stmt);
            if let Some(e) = else_stmt {
                expand_statement(sess, e);
            }
        }
        StmtKind::Return { expr } => {
            if let Some(e) = expr {
                expand_expression(sess, e);
            }
        }
        StmtKind::Case { from, to, stmt, .. } => {
            if let Some(f) = from {
                expand_expression(sess, f);
            }
            if let Some(t) = to {
                expand_expression(sess, t);
            }
            expand_statement(sess, stmt);
        }
        StmtKind::Switch { expr, stmt, .. } => {
            expand_expression(sess, expr);
            expand_statement(sess, stmt);
        }
        StmtKind::Iterator {
            pre_statement,
            pre_condition,
            statement,
            post_statement,
            post_condition,
            ..
        } => {
            if let Some(s) = pre_statement {
                expand_statement(sess, s);
            }
            if let Some(c) = pre_condition {
                expand_expression(sess, c);
            }
            expand_statement(sess, statement);
            if let Some(s) = post_statement {
                expand_statement(sess, s);
            }
            if let Some(c) = post_condition {
                expand_expression(sess, c);
            }
        }
        StmtKind::Label { stmt, .. } => expand_statement(sess, stmt),
        StmtKind::Goto { expr, .. } => {
            if let Some(e) = expr {
                expand_expression(sess, e);
            }
        }
        StmtKind::Context { expr, .. } => {
            if let Some(e) = expr {
                expand_expression(sess, e);
            }
        }
        StmtKind::Range { expr, low, high } => {
            expand_expression(sess, expr);
            expand_expression(sess, low);
            expand_expression(sess, high);
        }
    }
}

/// Post-order folding of one expression tree, in place.
pub fn expand_expression(sess: &mut Session, expr: ExprId) {
    let kind = sess.exprs[expr].kind.clone();
    match kind {
        ExprKind::Value { .. }
        | ExprKind::FValue { .. }
        | ExprKind::Str { .. }
        | ExprKind::Symbol { .. }
        | ExprKind::TypeRef { .. }
        | ExprKind::LabelRef { .. }
        | ExprKind::MemberDesignator { .. }
        | ExprKind::IndexDesignator { .. }
        | ExprKind::TypesCompatible { .. }
        | ExprKind::Offsetof { .. } => {}
        ExprKind::Binop { left, right, .. } | ExprKind::Compare { left, right, .. } => {
            expand_expression(sess, left);
            expand_expression(sess, right);
            fold_to_value(sess, expr);
        }
        ExprKind::Logical { left, right, .. } => {
            expand_expression(sess, left);
            expand_expression(sess, right);
            fold_to_value(sess, expr);
        }
        ExprKind::Assignment { left, right, .. } => {
            expand_expression(sess, left);
            expand_expression(sess, right);
        }
        ExprKind::Preop { expr: inner, .. } | ExprKind::Postop { expr: inner, .. } => {
            expand_expression(sess, inner);
            if matches!(sess.exprs[expr].kind, ExprKind::Preop { .. }) {
                fold_to_value(sess, expr);
            }
        }
        ExprKind::Cast { expr: inner, .. } | ExprKind::ImpliedCast { expr: inner, .. } => {
            expand_expression(sess, inner);
            fold_to_value(sess, expr);
        }
        ExprKind::Sizeof { expr: inner, .. } | ExprKind::Alignof { expr: inner, .. } => {
            if let Some(i) = inner {
                expand_expression(sess, i);
            }
        }
        ExprKind::PtrSizeof { expr: inner } => expand_expression(sess, inner),
        ExprKind::Conditional {
            cond,
            when_true,
            when_false,
        } => {
            expand_expression(sess, cond);
            if let Some(t) = when_true {
                expand_expression(sess, t);
            }
            expand_expression(sess, when_false);
            if let Some(c) = const_expression_value(sess, cond) {
                let chosen = if c != 0 {
                    match when_true {
                        Some(t) => t,
                        None => {
                            // `a ?: c` with constant truthy a folds to a.
                            cond
                        }
                    }
                } else {
                    when_false
                };
                let ctype = sess.exprs[expr].ctype;
                let copy = sess.exprs[chosen].clone();
                sess.exprs[expr] = copy;
                if sess.exprs[expr].ctype.is_none() {
                    sess.exprs[expr].ctype = ctype;
                }
            }
        }
        ExprKind::Select {
            cond,
            when_true,
            when_false,
        } => {
            expand_expression(sess, cond);
            expand_expression(sess, when_true);
            expand_expression(sess, when_false);
            if let Some(c) = const_expression_value(sess, cond) {
                let chosen = if c != 0 { when_true } else { when_false };
                let copy = sess.exprs[chosen].clone();
                sess.exprs[expr] = copy;
            }
        }
        ExprKind::StmtExpr { stmt } => expand_statement(sess, stmt),
        ExprKind::Call { func, args } => {
            expand_expression(sess, func);
            for a in args {
                expand_expression(sess, a);
            }
        }
        ExprKind::Comma { left, right } => {
            expand_expression(sess, left);
            expand_expression(sess, right);
            // A side-effect-free left operand is dead.
            if const_expression_value(sess, left).is_some() {
                let copy = sess.exprs[right].clone();
                sess.exprs[expr] = copy;
            }
        }
        ExprKind::Bitfield { base, .. } => expand_expression(sess, base),
        ExprKind::Deref { deref, .. } => expand_expression(sess, deref),
        ExprKind::InitList { entries } => {
            for e in entries {
                expand_expression(sess, e);
            }
        }
        ExprKind::Pos { init, .. } => expand_expression(sess, init),
        ExprKind::ChooseExpr { .. } | ExprKind::ConstantP { .. } => {}
        ExprKind::Expect { value, .. } => {
            expand_expression(sess, value);
            // The hint is consumed here; the value flows through.
            let copy = sess.exprs[value].clone();
            sess.exprs[expr] = copy;
        }
    }
}

/// Replaces `expr` with a masked constant when it folds.
fn fold_to_value(sess: &mut Session, expr: ExprId) {
    if matches!(sess.exprs[expr].kind, ExprKind::Value { .. }) {
        return;
    }
    let Some(v) = const_expression_value(sess, expr) else {
        return;
    };
    let masked = match sess.exprs[expr].ctype {
        Some(t) => truncate_value(sess, v, t),
        None => v,
    };
    sess.exprs[expr].kind = ExprKind::Value {
        value: masked as u64,
    };
    sess.exprs[expr].flags |= ExprFlags::INT_CONST;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use larch_core::Position;
    use crate::{Options, Session};

    fn value_expr(sess: &mut Session, v: u64) -> ExprId {
        let e = sess
            .exprs
            .alloc(Expr::new(Position::none(), ExprKind::Value { value: v }));
        sess.exprs[e].ctype = Some(sess.ctypes.int_);
        e
    }

    #[test]
    fn folds_arithmetic() {
        let mut sess = Session::new(Options::default());
        let a = value_expr(&mut sess, 6);
        let b = value_expr(&mut sess, 7);
        let e = sess.exprs.alloc(Expr::new(
            Position::none(),
            ExprKind::Binop {
                op: Special::Star,
                left: a,
                right: b,
            },
        ));
        assert_eq!(const_expression_value(&sess, e), Some(42));
        sess.exprs[e].ctype = Some(sess.ctypes.int_);
        expand_expression(&mut sess, e);
        assert!(matches!(sess.exprs[e].kind, ExprKind::Value { value: 42 }));
    }

    #[test]
    fn division_by_zero_is_not_constant() {
        let mut sess = Session::new(Options::default());
        let a = value_expr(&mut sess, 1);
        let b = value_expr(&mut sess, 0);
        let e = sess.exprs.alloc(Expr::new(
            Position::none(),
            ExprKind::Binop {
                op: Special::Slash,
                left: a,
                right: b,
            },
        ));
        assert_eq!(const_expression_value(&sess, e), None);
    }

    #[test]
    fn logical_short_circuit() {
        let mut sess = Session::new(Options::default());
        let zero = value_expr(&mut sess, 0);
        let one = value_expr(&mut sess, 1);
        let e = sess.exprs.alloc(Expr::new(
            Position::none(),
            ExprKind::Logical {
                op: Special::LogicalAnd,
                left: zero,
                right: one,
            },
        ));
        assert_eq!(const_expression_value(&sess, e), Some(0));
    }

    #[test]
    fn truncation_masks_unsigned_and_sign_extends_signed() {
        let sess = Session::new(Options::default());
        // 0x1ff into unsigned char: masked to 0xff.
        assert_eq!(truncate_value(&sess, 0x1ff, sess.ctypes.uchar), 0xff);
        // 0xff into signed char: -1.
        assert_eq!(truncate_value(&sess, 0xff, sess.ctypes.schar), -1);
        // Fits: unchanged.
        assert_eq!(truncate_value(&sess, 100, sess.ctypes.schar), 100);
    }

    #[test]
    fn conditional_with_constant_condition_folds() {
        let mut sess = Session::new(Options::default());
        let cond = value_expr(&mut sess, 1);
        let a = value_expr(&mut sess, 10);
        let b = value_expr(&mut sess, 20);
        let e = sess.exprs.alloc(Expr::new(
            Position::none(),
            ExprKind::Conditional {
                cond,
                when_true: Some(a),
                when_false: b,
            },
        ));
        expand_expression(&mut sess, e);
        assert!(matches!(sess.exprs[e].kind, ExprKind::Value { value: 10 }));
    }
}
