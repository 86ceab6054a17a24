//! Semantic evaluation.
//!
//! Walks expressions bottom-up attaching `ctype`: name resolution, the usual
//! arithmetic conversions, array/function degeneration, pointer arithmetic
//! scaling, lvalue checking, call checking, and initializer normalization.
//! Implicit conversions are materialized as `ImpliedCast` nodes so the
//! linearizer sees every width change explicitly.
//!
//! Everything here recovers: a type error leaves `ctype` as the bad type and
//! later passes skip the expression.

use larch_core::Position;
use tracing::trace;

use crate::ast::{Expr, ExprFlags, ExprId, ExprKind, StmtId, StmtKind};
use crate::expand;
use crate::symbol::{Mod, SymKind, SymbolId};
use crate::token::Special;
use crate::types::{
    self, base_type_of, classify, examine_symbol_type, restricted_binop_class,
    restricted_outcome, type_difference, Class, RestrictedOutcome, RestrictedPeer,
};
use crate::Session;

/// Evaluates every symbol of a translation unit in declaration order.
pub fn evaluate_symbol_list(sess: &mut Session, syms: &[SymbolId]) {
    for &sym in syms {
        evaluate_symbol(sess, sym);
    }
    for &sym in syms {
        expand::expand_symbol(sess, sym);
    }
}

/// Examines a symbol's type, its initializer, and (for functions) its body.
pub fn evaluate_symbol(sess: &mut Session, sym: SymbolId) {
    examine_symbol_type(sess, sym);
    let base = sess.symtab.symbols[sym].base_type;
    let is_fn = base
        .map(|b| sess.symtab.symbols[b].kind == SymKind::Fn)
        .unwrap_or(false);

    if let Some(init) = sess.symtab.symbols[sym].initializer {
        let target = sess.symtab.symbols[sym].base_type.unwrap_or(sym);
        let mut ev = Evaluator {
            sess: &mut *sess,
            return_type: None,
        };
        ev.evaluate_initializer(target, init);
        complete_array_from_initializer(sess, sym, init);
    }

    if is_fn {
        let fn_type = base.unwrap();
        if let Some(body) = sess.symtab.symbols[sym].stmt {
            let name = sess.symtab.symbols[sym]
                .ident
                .map(|i| sess.interner.name(i).to_string())
                .unwrap_or_default();
            trace!(function = %name, "evaluating function body");
            let args = sess.symtab.symbols[fn_type].arguments.clone();
            for arg in args {
                examine_symbol_type(sess, arg);
            }
            let return_type = sess.symtab.symbols[fn_type].base_type;
            let mut ev = Evaluator {
                sess: &mut *sess,
                return_type,
            };
            ev.evaluate_statement(body);
        }
    }
}

/// Evaluates a single expression, returning its type.
pub fn evaluate_expression(sess: &mut Session, expr: ExprId) -> Option<SymbolId> {
    let mut ev = Evaluator {
        sess,
        return_type: None,
    };
    ev.expression(expr)
}

/// If an unsized array got its extent from its initializer, complete it.
fn complete_array_from_initializer(sess: &mut Session, sym: SymbolId, init: ExprId) {
    let Some(base) = sess.symtab.symbols[sym].base_type else {
        return;
    };
    if sess.symtab.symbols[base].kind != SymKind::Array
        || sess.symtab.symbols[base].array_size.is_some()
        || sess.symtab.symbols[base].bit_size >= 0
    {
        return;
    }
    let Some(elem) = sess.symtab.symbols[base].base_type else {
        return;
    };
    examine_symbol_type(sess, elem);
    let elem_bits = sess.symtab.symbols[elem].bit_size.max(0);
    let elem_bytes = (elem_bits + 7) / 8;
    let count: i64 = match &sess.exprs[init].kind {
        ExprKind::InitList { entries } => {
            let mut max_index: i64 = 0;
            for (i, &e) in entries.iter().enumerate() {
                let index = match &sess.exprs[e].kind {
                    ExprKind::Pos { offset, .. } => {
                        if elem_bytes > 0 {
                            offset / elem_bytes + 1
                        } else {
                            i as i64 + 1
                        }
                    }
                    _ => i as i64 + 1,
                };
                max_index = max_index.max(index);
            }
            max_index
        }
        ExprKind::Str { value, .. } => value.len() as i64,
        _ => return,
    };
    let s = &mut sess.symtab.symbols[base];
    s.bit_size = elem_bits * count;
    let node = &mut sess.symtab.symbols[sym];
    if node.bit_size < 0 {
        node.bit_size = elem_bits * count;
    }
}

struct Evaluator<'s> {
    sess: &'s mut Session,
    return_type: Option<SymbolId>,
}

impl<'s> Evaluator<'s> {
    fn bad(&self) -> SymbolId {
        self.sess.ctypes.bad
    }

    fn pos_of(&self, e: ExprId) -> Position {
        self.sess.exprs[e].pos
    }

    fn set_ctype(&mut self, e: ExprId, t: SymbolId) -> Option<SymbolId> {
        self.sess.exprs[e].ctype = Some(t);
        Some(t)
    }

    fn alloc_ptr_to(&mut self, t: SymbolId) -> SymbolId {
        let sym = self.sess.symtab.alloc(SymKind::Ptr, Position::none());
        self.sess.symtab.symbols[sym].base_type = Some(t);
        examine_symbol_type(self.sess, sym);
        sym
    }

    /// Rewrites `e` in place into an implied cast of its former contents.
    fn wrap_implied_cast(&mut self, e: ExprId, to: SymbolId) {
        let inner_copy = self.sess.exprs[e].clone();
        let flags = inner_copy.flags;
        let pos = inner_copy.pos;
        let inner = self.sess.exprs.alloc(inner_copy);
        self.sess.exprs[e] = Expr {
            pos,
            ctype: Some(to),
            flags,
            kind: ExprKind::ImpliedCast {
                cast_type: to,
                expr: inner,
            },
        };
    }

    /// Array and function values decay to pointers at every use that is not
    /// `sizeof`, `&`, or array initialization.
    fn degenerate(&mut self, e: ExprId) -> Option<SymbolId> {
        let t = self.sess.exprs[e].ctype?;
        let base = base_type_of(self.sess, t);
        match self.sess.symtab.symbols[base].kind {
            SymKind::Array => {
                let elem = self.sess.symtab.symbols[base].base_type?;
                let ptr = self.alloc_ptr_to(elem);
                self.wrap_implied_cast(e, ptr);
                Some(ptr)
            }
            SymKind::Fn => {
                let ptr = self.alloc_ptr_to(base);
                self.wrap_implied_cast(e, ptr);
                Some(ptr)
            }
            _ => Some(t),
        }
    }

    fn is_lvalue(&self, e: ExprId) -> bool {
        match &self.sess.exprs[e].kind {
            ExprKind::Symbol { sym: Some(_), .. } => true,
            ExprKind::Preop {
                op: Special::Star, ..
            } => true,
            ExprKind::Deref { .. } => true,
            ExprKind::Bitfield { .. } => true,
            _ => false,
        }
    }

    /// Marks the symbol at the root of an lvalue expression.
    fn mark_lvalue_symbol(&mut self, e: ExprId, add: Mod) {
        match self.sess.exprs[e].kind.clone() {
            ExprKind::Symbol { sym: Some(sym), .. } => {
                self.sess.symtab.symbols[sym].modifiers |= add;
            }
            ExprKind::Deref { deref, .. } => self.mark_lvalue_symbol(deref, add),
            ExprKind::Preop {
                op: Special::Star,
                expr,
            } => {
                // Only a direct `*&x` chain still names a symbol.
                if let ExprKind::Preop {
                    op: Special::Amp,
                    expr: inner,
                } = self.sess.exprs[expr].kind.clone()
                {
                    self.mark_lvalue_symbol(inner, add);
                }
            }
            ExprKind::ImpliedCast { expr, .. } | ExprKind::Cast { expr, .. } => {
                self.mark_lvalue_symbol(expr, add)
            }
            _ => {}
        }
    }

    // ----------------------------------------------------------------
    // Expression dispatch
    // ----------------------------------------------------------------

    fn expression(&mut self, e: ExprId) -> Option<SymbolId> {
        if let Some(t) = self.sess.exprs[e].ctype {
            // Literals come pre-typed; everything else is evaluated once.
            if matches!(
                self.sess.exprs[e].kind,
                ExprKind::Value { .. } | ExprKind::FValue { .. }
            ) {
                return Some(t);
            }
        }
        let kind = self.sess.exprs[e].kind.clone();
        let pos = self.pos_of(e);
        match kind {
            ExprKind::Value { .. } => self.set_ctype(e, self.sess.ctypes.int_),
            ExprKind::FValue { .. } => self.set_ctype(e, self.sess.ctypes.double_),
            ExprKind::Str { ref value, .. } => {
                let array = self.sess.symtab.alloc(SymKind::Array, pos);
                {
                    let char_bits =
                        self.sess.symtab.symbols[self.sess.ctypes.char_].bit_size;
                    let s = &mut self.sess.symtab.symbols[array];
                    s.base_type = Some(self.sess.ctypes.char_);
                    s.bit_size = char_bits * value.len() as i64;
                    s.alignment = 1;
                    s.examined = true;
                }
                self.set_ctype(e, array)
            }
            ExprKind::Symbol { sym, ident } => match sym {
                Some(sym) => {
                    examine_symbol_type(self.sess, sym);
                    self.sess.symtab.symbols[sym].used = true;
                    if self.sess.symtab.symbols[sym].enum_member {
                        let value = self.sess.symtab.symbols[sym].value;
                        let base = self.sess.symtab.symbols[sym]
                            .base_type
                            .unwrap_or(self.sess.ctypes.int_);
                        self.sess.exprs[e].kind = ExprKind::Value {
                            value: value as u64,
                        };
                        self.sess.exprs[e].flags = ExprFlags::INT_CONST;
                        return self.set_ctype(e, base);
                    }
                    self.set_ctype(e, sym)
                }
                None => {
                    let name = self.sess.interner.name(ident).to_string();
                    self.sess
                        .diags
                        .warning(pos, format!("undefined identifier '{name}'"));
                    self.sess.exprs[e].kind = ExprKind::Value { value: 0 };
                    self.set_ctype(e, self.sess.ctypes.int_)
                }
            },
            ExprKind::TypeRef { sym } => self.set_ctype(e, sym),
            ExprKind::Binop { op, left, right } => self.binop(e, pos, op, left, right),
            ExprKind::Compare { op, left, right } => self.compare(e, pos, op, left, right),
            ExprKind::Logical { left, right, .. } => {
                self.expression(left)?;
                self.degenerate(left);
                self.expression(right)?;
                self.degenerate(right);
                self.check_scalar(left, "logical operand");
                self.check_scalar(right, "logical operand");
                self.set_ctype(e, self.sess.ctypes.int_)
            }
            ExprKind::Assignment { op, left, right } => self.assignment(e, pos, op, left, right),
            ExprKind::Preop { op, expr } => self.preop(e, pos, op, expr),
            ExprKind::Postop { op, expr } => self.incdec(e, pos, op, expr),
            ExprKind::Cast { cast_type, expr } | ExprKind::ImpliedCast { cast_type, expr } => {
                examine_symbol_type(self.sess, cast_type);
                if matches!(self.sess.exprs[expr].kind, ExprKind::InitList { .. }) {
                    // Compound literal.
                    self.evaluate_initializer(cast_type, expr);
                } else {
                    self.expression(expr)?;
                    self.degenerate(expr);
                }
                self.set_ctype(e, cast_type)
            }
            ExprKind::Sizeof { type_arg, expr } => {
                let bits = self.query_size(type_arg, expr, pos)?;
                if bits < 0 {
                    self.sess
                        .diags
                        .error(pos, "cannot take the size of an incomplete type");
                }
                let bytes = if bits < 0 { 0 } else { (bits as u64 + 7) / 8 };
                self.sess.exprs[e].kind = ExprKind::Value { value: bytes };
                self.sess.exprs[e].flags = ExprFlags::INT_CONST;
                self.set_ctype(e, self.sess.ctypes.size_t)
            }
            ExprKind::Alignof { type_arg, expr } => {
                let target = match type_arg {
                    Some(t) => Some(t),
                    None => match expr {
                        Some(ex) => {
                            self.expression(ex)?;
                            self.sess.exprs[ex].ctype
                        }
                        None => None,
                    },
                };
                let align = match target {
                    Some(t) => types::alignment_of(self.sess, t) as u64,
                    None => 1,
                };
                self.sess.exprs[e].kind = ExprKind::Value { value: align };
                self.sess.exprs[e].flags = ExprFlags::INT_CONST;
                self.set_ctype(e, self.sess.ctypes.size_t)
            }
            ExprKind::PtrSizeof { expr } => {
                let t = self.expression(expr)?;
                let base = base_type_of(self.sess, t);
                let pointee = self.sess.symtab.symbols[base].base_type;
                let bits = match pointee {
                    Some(p) => types::bit_size(self.sess, p),
                    None => {
                        self.sess
                            .diags
                            .error(pos, "expected pointer expression");
                        0
                    }
                };
                let bytes = if bits < 0 { 0 } else { (bits as u64 + 7) / 8 };
                self.sess.exprs[e].kind = ExprKind::Value { value: bytes };
                self.set_ctype(e, self.sess.ctypes.size_t)
            }
            ExprKind::Conditional {
                cond,
                when_true,
                when_false,
            } => self.conditional(e, pos, cond, when_true, when_false),
            ExprKind::Select {
                cond,
                when_true,
                when_false,
            } => self.conditional(e, pos, cond, Some(when_true), when_false),
            ExprKind::StmtExpr { stmt } => {
                let t = self.evaluate_statement(stmt);
                self.set_ctype(e, t.unwrap_or(self.sess.ctypes.void))
            }
            ExprKind::Call { func, args } => self.call(e, pos, func, args),
            ExprKind::Comma { left, right } => {
                self.expression(left)?;
                self.degenerate(left);
                let t = self.expression(right)?;
                let t = self.degenerate(right).unwrap_or(t);
                self.set_ctype(e, t)
            }
            ExprKind::Deref { deref, member } => self.member_access(e, pos, deref, member),
            ExprKind::Bitfield { base, .. } => {
                let t = self.sess.exprs[base].ctype.unwrap_or(self.bad());
                self.set_ctype(e, t)
            }
            ExprKind::LabelRef { sym } => {
                self.sess.symtab.symbols[sym].used = true;
                self.set_ctype(e, self.sess.ctypes.label)
            }
            ExprKind::InitList { .. } => {
                self.sess
                    .diags
                    .error(pos, "initializer list in unexpected context");
                self.set_ctype(e, self.bad())
            }
            ExprKind::MemberDesignator { .. } | ExprKind::IndexDesignator { .. } => {
                self.sess
                    .diags
                    .error(pos, "designator in unexpected context");
                self.set_ctype(e, self.bad())
            }
            ExprKind::Pos { init, .. } => {
                let t = self.expression(init)?;
                self.set_ctype(e, t)
            }
            ExprKind::TypesCompatible { left, right } => {
                examine_symbol_type(self.sess, left);
                examine_symbol_type(self.sess, right);
                let same = type_difference(self.sess, left, right).is_none();
                self.sess.exprs[e].kind = ExprKind::Value {
                    value: same as u64,
                };
                self.sess.exprs[e].flags = ExprFlags::INT_CONST;
                self.set_ctype(e, self.sess.ctypes.int_)
            }
            ExprKind::ChooseExpr {
                cond,
                when_true,
                when_false,
            } => {
                self.expression(cond)?;
                let value = expand::const_expression_value(self.sess, cond);
                let chosen = match value {
                    Some(0) => when_false,
                    Some(_) => when_true,
                    None => {
                        self.sess.diags.error(
                            pos,
                            "__builtin_choose_expr requires a constant condition",
                        );
                        when_true
                    }
                };
                let t = self.expression(chosen)?;
                let copy = self.sess.exprs[chosen].clone();
                self.sess.exprs[e] = copy;
                Some(t)
            }
            ExprKind::Offsetof {
                type_arg,
                designator,
            } => {
                examine_symbol_type(self.sess, type_arg);
                let offset = self.offsetof_value(type_arg, designator, pos).unwrap_or(0);
                self.sess.exprs[e].kind = ExprKind::Value {
                    value: offset as u64,
                };
                self.sess.exprs[e].flags = ExprFlags::INT_CONST;
                self.set_ctype(e, self.sess.ctypes.size_t)
            }
            ExprKind::Expect { value, expected } => {
                let t = self.expression(value)?;
                self.expression(expected);
                self.set_ctype(e, t)
            }
            ExprKind::ConstantP { expr } => {
                self.expression(expr);
                let constant = expand::const_expression_value(self.sess, expr).is_some()
                    || self.sess.exprs[expr]
                        .flags
                        .contains(ExprFlags::INT_CONST);
                self.sess.exprs[e].kind = ExprKind::Value {
                    value: constant as u64,
                };
                self.sess.exprs[e].flags = ExprFlags::INT_CONST;
                self.set_ctype(e, self.sess.ctypes.int_)
            }
        }
    }

    /// Bit size of a `sizeof` operand; expressions are typed but never
    /// degenerated, so `sizeof(array)` is the whole array.
    fn query_size(
        &mut self,
        type_arg: Option<SymbolId>,
        expr: Option<ExprId>,
        _pos: Position,
    ) -> Option<i64> {
        let t = match type_arg {
            Some(t) => t,
            None => {
                let e = expr?;
                self.expression(e)?;
                self.sess.exprs[e].ctype?
            }
        };
        Some(types::bit_size(self.sess, t))
    }

    fn check_scalar(&mut self, e: ExprId, what: &str) {
        if let Some(t) = self.sess.exprs[e].ctype {
            let class = classify(self.sess, t);
            if !class.intersects(Class::SCALAR | Class::BAD) {
                let pos = self.pos_of(e);
                self.sess
                    .diags
                    .error(pos, format!("non-scalar {what}"));
            }
        }
    }

    // ----------------------------------------------------------------
    // Arithmetic and pointers
    // ----------------------------------------------------------------

    /// Integer promotion target for a type: anything narrower than int
    /// becomes int.
    fn promoted(&mut self, t: SymbolId) -> SymbolId {
        let base = base_type_of(self.sess, t);
        let c = &self.sess.ctypes;
        match c.integer_rank(base) {
            Some(rank) if rank < 3 => {
                if types::is_unsigned(self.sess, base)
                    && self.sess.symtab.symbols[base].bit_size
                        >= self.sess.symtab.symbols[c.int_].bit_size
                {
                    c.uint
                } else {
                    c.int_
                }
            }
            _ => base,
        }
    }

    /// The usual arithmetic conversions for two numeric operands.
    fn bigger_int_type(&mut self, left: SymbolId, right: SymbolId) -> SymbolId {
        let c = &self.sess.ctypes;
        let lf = c.is_float_ctype(base_type_of(self.sess, left))
            || classify(self.sess, left).contains(Class::FLOAT);
        let rf = classify(self.sess, right).contains(Class::FLOAT);
        if lf || rf {
            let lb = base_type_of(self.sess, left);
            let rb = base_type_of(self.sess, right);
            let c = &self.sess.ctypes;
            if lb == c.ldouble || rb == c.ldouble {
                return c.ldouble;
            }
            if lb == c.double_ || rb == c.double_ {
                return c.double_;
            }
            if lf && rf {
                return c.float_;
            }
            return if lf { lb } else { rb };
        }
        let l = self.promoted(left);
        let r = self.promoted(right);
        if l == r {
            return l;
        }
        let c = &self.sess.ctypes;
        let lrank = c.integer_rank(l).unwrap_or(3);
        let rrank = c.integer_rank(r).unwrap_or(3);
        let lu = types::is_unsigned(self.sess, l);
        let ru = types::is_unsigned(self.sess, r);
        let c = &self.sess.ctypes;
        if lu == ru {
            return if lrank >= rrank { l } else { r };
        }
        let (u, urank, s, srank) = if lu { (l, lrank, r, rrank) } else { (r, rrank, l, lrank) };
        if urank >= srank {
            return u;
        }
        let u_bits = self.sess.symtab.symbols[u].bit_size;
        let s_bits = self.sess.symtab.symbols[s].bit_size;
        if s_bits > u_bits {
            // The signed type strictly dominates in width.
            s
        } else {
            let c = &self.sess.ctypes;
            c.unsigned_of(s)
        }
    }

    fn cast_to_common(&mut self, e: ExprId, common: SymbolId) {
        let t = match self.sess.exprs[e].ctype {
            Some(t) => t,
            None => return,
        };
        let base = base_type_of(self.sess, t);
        if base != common {
            self.wrap_implied_cast(e, common);
        }
    }

    fn binop(
        &mut self,
        e: ExprId,
        pos: Position,
        op: Special,
        left: ExprId,
        right: ExprId,
    ) -> Option<SymbolId> {
        let lt = self.expression(left)?;
        let lt = self.degenerate(left).unwrap_or(lt);
        let rt = self.expression(right)?;
        let rt = self.degenerate(right).unwrap_or(rt);

        let lclass = classify(self.sess, lt);
        let rclass = classify(self.sess, rt);

        if lclass.contains(Class::BAD) || rclass.contains(Class::BAD) {
            return self.set_ctype(e, self.bad());
        }

        // Pointer arithmetic.
        if lclass.contains(Class::PTR) || rclass.contains(Class::PTR) {
            return self.pointer_binop(e, pos, op, left, right, lt, rt, lclass, rclass);
        }

        if !lclass.intersects(Class::NUM) || !rclass.intersects(Class::NUM) {
            self.sess
                .diags
                .error(pos, format!("invalid operands to '{op}'"));
            return self.set_ctype(e, self.bad());
        }

        // Restricted integers interact through the explicit lattice.
        if lclass.contains(Class::RESTRICT) || rclass.contains(Class::RESTRICT) {
            return self.restricted_binop(e, pos, op, left, right, lt, rt);
        }

        if matches!(op, Special::Shl | Special::Shr) {
            // Shift counts promote independently.
            let common = self.promoted(lt);
            self.cast_to_common(left, common);
            let rp = self.promoted(rt);
            self.cast_to_common(right, rp);
            return self.set_ctype(e, common);
        }

        let common = self.bigger_int_type(lt, rt);
        self.cast_to_common(left, common);
        self.cast_to_common(right, common);
        self.set_ctype(e, common)
    }

    #[allow(clippy::too_many_arguments)]
    fn pointer_binop(
        &mut self,
        e: ExprId,
        pos: Position,
        op: Special,
        left: ExprId,
        right: ExprId,
        lt: SymbolId,
        rt: SymbolId,
        lclass: Class,
        rclass: Class,
    ) -> Option<SymbolId> {
        let both = lclass.contains(Class::PTR) && rclass.contains(Class::PTR);
        match op {
            Special::Plus if both => {
                self.sess
                    .diags
                    .error(pos, "cannot add two pointers");
                self.set_ctype(e, self.bad())
            }
            Special::Plus | Special::Minus if lclass.contains(Class::PTR) && !both => {
                let stride = self.pointee_stride(lt, pos);
                self.scale_index(right, stride);
                self.set_ctype(e, lt)
            }
            Special::Plus if rclass.contains(Class::PTR) => {
                let stride = self.pointee_stride(rt, pos);
                self.scale_index(left, stride);
                self.set_ctype(e, rt)
            }
            Special::Minus if both => {
                let stride = self.pointee_stride(lt, pos);
                if type_difference(self.sess, lt, rt).is_some() {
                    self.sess
                        .diags
                        .warning(pos, "subtraction of different pointer types");
                }
                if stride > 1 && !stride.is_power_of_two() {
                    self.sess.diags.warning(
                        pos,
                        "potentially expensive pointer subtraction",
                    );
                }
                // (p - q) becomes (ssize_t)(p - q) / stride; the division
                // is made explicit so the linearizer stays generic.
                let ssize = self.sess.ctypes.ssize_t;
                let diff_copy = self.sess.exprs[e].clone();
                let diff = self.sess.exprs.alloc(diff_copy);
                self.sess.exprs[diff].ctype = Some(ssize);
                if stride > 1 {
                    let stride_val = self.sess.exprs.alloc(Expr::new(pos, ExprKind::Value {
                        value: stride,
                    }));
                    self.sess.exprs[stride_val].ctype = Some(ssize);
                    self.sess.exprs[e] = Expr {
                        pos,
                        ctype: Some(ssize),
                        flags: ExprFlags::empty(),
                        kind: ExprKind::Binop {
                            op: Special::Slash,
                            left: diff,
                            right: stride_val,
                        },
                    };
                } else {
                    self.sess.exprs[e].ctype = Some(ssize);
                }
                Some(ssize)
            }
            _ => {
                self.sess
                    .diags
                    .error(pos, format!("invalid pointer operation '{op}'"));
                self.set_ctype(e, self.bad())
            }
        }
    }

    /// Bytes between consecutive elements behind a pointer type.
    fn pointee_stride(&mut self, ptr_type: SymbolId, pos: Position) -> u64 {
        let base = base_type_of(self.sess, ptr_type);
        let pointee = self.sess.symtab.symbols[base].base_type;
        match pointee {
            Some(p) => {
                let bits = types::bit_size(self.sess, p);
                if bits < 0 {
                    self.sess
                        .diags
                        .warning(pos, "pointer arithmetic on incomplete type");
                    1
                } else if bits == 0 {
                    // void* arithmetic: GNU extension, stride 1.
                    1
                } else {
                    ((bits as u64) + 7) / 8
                }
            }
            None => 1,
        }
    }

    /// Multiplies an index expression by the element stride.
    fn scale_index(&mut self, index: ExprId, stride: u64) {
        let ssize = self.sess.ctypes.ssize_t;
        self.cast_to_common(index, ssize);
        if stride <= 1 {
            return;
        }
        let pos = self.pos_of(index);
        let index_copy = self.sess.exprs[index].clone();
        let inner = self.sess.exprs.alloc(index_copy);
        let stride_val = self
            .sess
            .exprs
            .alloc(Expr::new(pos, ExprKind::Value { value: stride }));
        self.sess.exprs[stride_val].ctype = Some(ssize);
        self.sess.exprs[stride_val].flags = ExprFlags::INT_CONST;
        self.sess.exprs[index] = Expr {
            pos,
            ctype: Some(ssize),
            flags: ExprFlags::empty(),
            kind: ExprKind::Binop {
                op: Special::Star,
                left: inner,
                right: stride_val,
            },
        };
    }

    fn restricted_binop(
        &mut self,
        e: ExprId,
        pos: Position,
        op: Special,
        left: ExprId,
        right: ExprId,
        lt: SymbolId,
        rt: SymbolId,
    ) -> Option<SymbolId> {
        let lbase = base_type_of(self.sess, lt);
        let rbase = base_type_of(self.sess, rt);
        let lres = matches!(
            self.sess.symtab.symbols[lbase].kind,
            SymKind::Restrict | SymKind::Fouled
        );
        let rres = matches!(
            self.sess.symtab.symbols[rbase].kind,
            SymKind::Restrict | SymKind::Fouled
        );
        let class = restricted_binop_class(op);
        let peer = if lres && rres {
            if lbase == rbase {
                RestrictedPeer::SameRestricted
            } else {
                RestrictedPeer::Other
            }
        } else {
            let other = if lres { right } else { left };
            if types::is_null_pointer_constant(self.sess, other) {
                RestrictedPeer::ZeroConstant
            } else {
                RestrictedPeer::Other
            }
        };
        match restricted_outcome(class, peer) {
            RestrictedOutcome::Preserve => {
                let t = if lres { lbase } else { rbase };
                self.set_ctype(e, t)
            }
            RestrictedOutcome::Keep => self.set_ctype(e, self.sess.ctypes.int_),
            RestrictedOutcome::Defoul => {
                self.sess
                    .diags
                    .warning(pos, format!("restricted degrades to integer in '{op}'"));
                let t = if lres {
                    types::unrestrict(self.sess, lt)
                } else {
                    types::unrestrict(self.sess, rt)
                };
                let base = base_type_of(self.sess, t);
                self.set_ctype(e, base)
            }
        }
    }

    fn compare(
        &mut self,
        e: ExprId,
        pos: Position,
        op: Special,
        left: ExprId,
        right: ExprId,
    ) -> Option<SymbolId> {
        let lt = self.expression(left)?;
        let lt = self.degenerate(left).unwrap_or(lt);
        let rt = self.expression(right)?;
        let rt = self.degenerate(right).unwrap_or(rt);

        let lclass = classify(self.sess, lt);
        let rclass = classify(self.sess, rt);

        if lclass.contains(Class::PTR) || rclass.contains(Class::PTR) {
            let lnull = types::is_null_pointer_constant(self.sess, left);
            let rnull = types::is_null_pointer_constant(self.sess, right);
            if lclass.contains(Class::PTR) && rclass.contains(Class::PTR) {
                if type_difference(self.sess, lt, rt).is_some()
                    && !self.is_void_ptr(lt)
                    && !self.is_void_ptr(rt)
                {
                    self.sess
                        .diags
                        .warning(pos, "comparison of different pointer types");
                }
            } else if !(lnull || rnull) {
                self.sess
                    .diags
                    .warning(pos, "comparison between pointer and integer");
            }
            return self.set_ctype(e, self.sess.ctypes.int_);
        }

        if lclass.contains(Class::RESTRICT) || rclass.contains(Class::RESTRICT) {
            self.restricted_binop(e, pos, op, left, right, lt, rt)?;
            return self.set_ctype(e, self.sess.ctypes.int_);
        }

        if lclass.intersects(Class::NUM) && rclass.intersects(Class::NUM) {
            let common = self.bigger_int_type(lt, rt);
            self.cast_to_common(left, common);
            self.cast_to_common(right, common);
            return self.set_ctype(e, self.sess.ctypes.int_);
        }
        self.sess
            .diags
            .error(pos, format!("invalid operands to '{op}'"));
        self.set_ctype(e, self.bad())
    }

    fn is_void_ptr(&self, t: SymbolId) -> bool {
        let base = base_type_of(self.sess, t);
        if self.sess.symtab.symbols[base].kind != SymKind::Ptr {
            return false;
        }
        match self.sess.symtab.symbols[base].base_type {
            Some(p) => base_type_of(self.sess, p) == self.sess.ctypes.void,
            None => false,
        }
    }

    // ----------------------------------------------------------------
    // Assignment
    // ----------------------------------------------------------------

    fn assignment(
        &mut self,
        e: ExprId,
        pos: Position,
        op: Special,
        left: ExprId,
        right: ExprId,
    ) -> Option<SymbolId> {
        let lt = self.expression(left)?;
        let rt = self.expression(right)?;
        let rt = self.degenerate(right).unwrap_or(rt);

        if !self.is_lvalue(left) {
            self.sess
                .diags
                .error(pos, "not an lvalue in assignment");
            return self.set_ctype(e, self.bad());
        }
        self.mark_lvalue_symbol(left, Mod::ASSIGNED);

        if op == Special::Assign {
            self.check_assignment_types(pos, lt, right, rt, "assignment");
        } else {
            // Compound assignment: the operation happens in the common
            // type, the store back in the target type.
            let lclass = classify(self.sess, lt);
            let rclass = classify(self.sess, rt);
            if lclass.contains(Class::PTR) {
                if !rclass.intersects(Class::NUM) {
                    self.sess
                        .diags
                        .error(pos, "invalid pointer compound assignment");
                } else {
                    let stride = self.pointee_stride(lt, pos);
                    self.scale_index(right, stride);
                }
            } else if lclass.contains(Class::RESTRICT) || rclass.contains(Class::RESTRICT) {
                let base_op = op.compound_base();
                self.restricted_binop(e, pos, base_op, left, right, lt, rt)?;
            } else if lclass.intersects(Class::NUM) && rclass.intersects(Class::NUM) {
                let common = self.bigger_int_type(lt, rt);
                self.cast_to_common(right, common);
            } else {
                self.sess
                    .diags
                    .error(pos, "invalid operands to compound assignment");
            }
        }
        self.set_ctype(e, lt)
    }

    /// Assignment-compatibility check; inserts an implied cast or reports.
    fn check_assignment_types(
        &mut self,
        pos: Position,
        target: SymbolId,
        source_expr: ExprId,
        source: SymbolId,
        context: &str,
    ) {
        let tclass = classify(self.sess, target);
        let sclass = classify(self.sess, source);

        if tclass.contains(Class::BAD) || sclass.contains(Class::BAD) {
            return;
        }
        if tclass.intersects(Class::NUM) && sclass.intersects(Class::NUM) {
            if tclass.contains(Class::RESTRICT) || sclass.contains(Class::RESTRICT) {
                let tbase = base_type_of(self.sess, target);
                let sbase = base_type_of(self.sess, source);
                if tbase != sbase
                    && !types::is_null_pointer_constant(self.sess, source_expr)
                {
                    self.sess.diags.warning(
                        pos,
                        format!("incompatible restricted types in {context}"),
                    );
                }
                return;
            }
            let tbase = base_type_of(self.sess, target);
            let sbase = base_type_of(self.sess, source);
            if tbase != sbase {
                self.wrap_implied_cast(source_expr, tbase);
            }
            return;
        }
        if tclass.contains(Class::PTR) {
            if types::is_null_pointer_constant(self.sess, source_expr) {
                return;
            }
            if sclass.contains(Class::PTR) {
                if self.is_void_ptr(target) || self.is_void_ptr(source) {
                    return;
                }
                if let Some(diff) = type_difference(self.sess, target, source) {
                    self.sess.diags.warning(
                        pos,
                        format!("incompatible types in {context} ({diff})"),
                    );
                }
                return;
            }
            if sclass.intersects(Class::INT) {
                self.sess.diags.warning(
                    pos,
                    format!("implicit integer to pointer conversion in {context}"),
                );
                return;
            }
        }
        if tclass.contains(Class::AGGREGATE) && sclass.contains(Class::AGGREGATE) {
            let t = base_type_of(self.sess, target);
            let s = base_type_of(self.sess, source);
            if t != s {
                self.sess
                    .diags
                    .error(pos, format!("incompatible struct types in {context}"));
            }
            return;
        }
        if tclass.contains(Class::INT) && sclass.contains(Class::PTR) {
            self.sess.diags.warning(
                pos,
                format!("implicit pointer to integer conversion in {context}"),
            );
            return;
        }
        if sclass.intersects(Class::NUM) && tclass.contains(Class::INT) {
            return;
        }
        self.sess
            .diags
            .error(pos, format!("incompatible types in {context}"));
    }

    // ----------------------------------------------------------------
    // Unaries, members, conditionals
    // ----------------------------------------------------------------

    fn preop(
        &mut self,
        e: ExprId,
        pos: Position,
        op: Special,
        operand: ExprId,
    ) -> Option<SymbolId> {
        match op {
            Special::Star => {
                let t = self.expression(operand)?;
                let t = self.degenerate(operand).unwrap_or(t);
                let base = base_type_of(self.sess, t);
                match self.sess.symtab.symbols[base].kind {
                    SymKind::Ptr => {
                        let pointee = self.sess.symtab.symbols[base]
                            .base_type
                            .unwrap_or(self.sess.ctypes.void);
                        examine_symbol_type(self.sess, pointee);
                        if self.sess.symtab.symbols[base]
                            .modifiers
                            .contains(Mod::NODEREF)
                        {
                            self.sess
                                .diags
                                .warning(pos, "dereference of noderef expression");
                        }
                        self.set_ctype(e, pointee)
                    }
                    SymKind::Fn => self.set_ctype(e, base),
                    _ => {
                        self.sess
                            .diags
                            .error(pos, "cannot dereference non-pointer");
                        self.set_ctype(e, self.bad())
                    }
                }
            }
            Special::Amp => {
                let t = self.expression(operand)?;
                if !self.is_lvalue(operand) {
                    self.sess
                        .diags
                        .error(pos, "cannot take the address of a non-lvalue");
                    return self.set_ctype(e, self.bad());
                }
                if classify(self.sess, t).contains(Class::BITFIELD) {
                    self.sess
                        .diags
                        .error(pos, "cannot take the address of a bitfield");
                }
                self.mark_lvalue_symbol(operand, Mod::ADDRESSABLE);
                let ptr = self.alloc_ptr_to(t);
                self.set_ctype(e, ptr)
            }
            Special::Plus | Special::Minus | Special::Tilde => {
                let t = self.expression(operand)?;
                let t = self.degenerate(operand).unwrap_or(t);
                let class = classify(self.sess, t);
                if op == Special::Tilde && !class.contains(Class::INT) {
                    self.sess
                        .diags
                        .error(pos, "operand of '~' must be an integer");
                    return self.set_ctype(e, self.bad());
                }
                if !class.intersects(Class::NUM) {
                    self.sess
                        .diags
                        .error(pos, format!("invalid operand to unary '{op}'"));
                    return self.set_ctype(e, self.bad());
                }
                if class.contains(Class::RESTRICT) {
                    self.sess
                        .diags
                        .warning(pos, format!("restricted degrades to integer in '{op}'"));
                    let t = types::unrestrict(self.sess, t);
                    let base = base_type_of(self.sess, t);
                    return self.set_ctype(e, base);
                }
                let promoted = self.promoted(t);
                self.cast_to_common(operand, promoted);
                self.set_ctype(e, promoted)
            }
            Special::Bang => {
                let _t = self.expression(operand)?;
                self.degenerate(operand);
                self.check_scalar(operand, "operand of '!'");
                self.set_ctype(e, self.sess.ctypes.int_)
            }
            Special::Increment | Special::Decrement => self.incdec(e, pos, op, operand),
            _ => {
                self.sess
                    .diags
                    .error(pos, format!("unexpected unary operator '{op}'"));
                self.set_ctype(e, self.bad())
            }
        }
    }

    fn incdec(
        &mut self,
        e: ExprId,
        pos: Position,
        _op: Special,
        operand: ExprId,
    ) -> Option<SymbolId> {
        let t = self.expression(operand)?;
        if !self.is_lvalue(operand) {
            self.sess
                .diags
                .error(pos, "need an lvalue for increment/decrement");
            return self.set_ctype(e, self.bad());
        }
        self.mark_lvalue_symbol(operand, Mod::ASSIGNED);
        let class = classify(self.sess, t);
        if !class.intersects(Class::SCALAR) {
            self.sess
                .diags
                .error(pos, "invalid operand for increment/decrement");
            return self.set_ctype(e, self.bad());
        }
        self.set_ctype(e, t)
    }

    fn member_access(
        &mut self,
        e: ExprId,
        pos: Position,
        base_expr: ExprId,
        member: larch_core::Ident,
    ) -> Option<SymbolId> {
        let t = self.expression(base_expr)?;
        let base = base_type_of(self.sess, t);
        examine_symbol_type(self.sess, base);
        if !matches!(
            self.sess.symtab.symbols[base].kind,
            SymKind::Struct | SymKind::Union
        ) {
            self.sess.diags.error(
                pos,
                "member access on something that is not a struct or union",
            );
            return self.set_ctype(e, self.bad());
        }
        match types::find_member(self.sess, base, member) {
            Some((msym, _offset)) => {
                examine_symbol_type(self.sess, msym);
                self.set_ctype(e, msym)
            }
            None => {
                let name = self.sess.interner.name(member).to_string();
                self.sess
                    .diags
                    .error(pos, format!("no member '{name}' in struct or union"));
                self.set_ctype(e, self.bad())
            }
        }
    }

    fn conditional(
        &mut self,
        e: ExprId,
        pos: Position,
        cond: ExprId,
        when_true: Option<ExprId>,
        when_false: ExprId,
    ) -> Option<SymbolId> {
        let ct = self.expression(cond)?;
        let ct = self.degenerate(cond).unwrap_or(ct);
        self.check_scalar(cond, "condition");

        // `a ?: c` types the condition as the true arm.
        let (tt, true_expr) = match when_true {
            Some(wt) => {
                let t = self.expression(wt)?;
                let t = self.degenerate(wt).unwrap_or(t);
                (t, Some(wt))
            }
            None => (ct, None),
        };
        let ft = self.expression(when_false)?;
        let ft = self.degenerate(when_false).unwrap_or(ft);

        let tclass = classify(self.sess, tt);
        let fclass = classify(self.sess, ft);

        let result = if tclass.intersects(Class::NUM) && fclass.intersects(Class::NUM) {
            let common = self.bigger_int_type(tt, ft);
            if let Some(wt) = true_expr {
                self.cast_to_common(wt, common);
            }
            self.cast_to_common(when_false, common);
            common
        } else if tclass.contains(Class::PTR) || fclass.contains(Class::PTR) {
            let tnull = true_expr
                .map(|wt| types::is_null_pointer_constant(self.sess, wt))
                .unwrap_or(false);
            let fnull = types::is_null_pointer_constant(self.sess, when_false);
            if tnull {
                ft
            } else if fnull {
                tt
            } else if self.is_void_ptr(tt) {
                tt
            } else if self.is_void_ptr(ft) {
                ft
            } else {
                if type_difference(self.sess, tt, ft).is_some() {
                    self.sess
                        .diags
                        .warning(pos, "incompatible types in conditional expression");
                }
                tt
            }
        } else if tclass.contains(Class::VOID) || fclass.contains(Class::VOID) {
            self.sess.ctypes.void
        } else {
            let t = base_type_of(self.sess, tt);
            let f = base_type_of(self.sess, ft);
            if t != f {
                self.sess
                    .diags
                    .warning(pos, "incompatible types in conditional expression");
            }
            tt
        };
        self.set_ctype(e, result)
    }

    // ----------------------------------------------------------------
    // Calls
    // ----------------------------------------------------------------

    fn call(
        &mut self,
        e: ExprId,
        pos: Position,
        func: ExprId,
        args: Vec<ExprId>,
    ) -> Option<SymbolId> {
        let ft = self.expression(func)?;
        let base = base_type_of(self.sess, ft);
        let fn_type = match self.sess.symtab.symbols[base].kind {
            SymKind::Fn => base,
            SymKind::Ptr => {
                let pointee = self.sess.symtab.symbols[base].base_type?;
                let pbase = base_type_of(self.sess, pointee);
                if self.sess.symtab.symbols[pbase].kind != SymKind::Fn {
                    self.sess.diags.error(pos, "not a function");
                    return self.set_ctype(e, self.bad());
                }
                pbase
            }
            _ => {
                self.sess.diags.error(pos, "not a function");
                return self.set_ctype(e, self.bad());
            }
        };

        let params = self.sess.symtab.symbols[fn_type].arguments.clone();
        let variadic = self.sess.symtab.symbols[fn_type].variadic;
        let unspecified = params.is_empty() && !variadic;

        for (i, &arg) in args.iter().enumerate() {
            let at = match self.expression(arg) {
                Some(t) => t,
                None => continue,
            };
            let at = self.degenerate(arg).unwrap_or(at);
            match params.get(i) {
                Some(&param) => {
                    examine_symbol_type(self.sess, param);
                    let target = self.sess.symtab.symbols[param].base_type.unwrap_or(param);
                    self.check_assignment_types(
                        self.pos_of(arg),
                        target,
                        arg,
                        at,
                        "argument passing",
                    );
                }
                None if variadic || unspecified => {
                    // Default argument promotions.
                    let class = classify(self.sess, at);
                    if class.contains(Class::FLOAT) {
                        let base = base_type_of(self.sess, at);
                        if base == self.sess.ctypes.float_ {
                            self.cast_to_common(arg, self.sess.ctypes.double_);
                        }
                    } else if class.contains(Class::INT) {
                        let promoted = self.promoted(at);
                        self.cast_to_common(arg, promoted);
                    }
                }
                None => {
                    self.sess
                        .diags
                        .error(pos, "too many arguments in function call");
                }
            }
        }
        if args.len() < params.len() {
            self.sess
                .diags
                .error(pos, "not enough arguments in function call");
        }

        let return_type = self.sess.symtab.symbols[fn_type]
            .base_type
            .unwrap_or(self.sess.ctypes.void);
        examine_symbol_type(self.sess, return_type);

        // Inline expansion of `static inline` bodies at the call site.
        if let ExprKind::Symbol { sym: Some(fsym), .. } = self.sess.exprs[func].kind.clone() {
            if self.sess.symtab.symbols[fsym].modifiers.contains(Mod::INLINE)
                && self.sess.symtab.symbols[fsym].stmt.is_some()
            {
                if crate::inline::expand_call(self.sess, e, fsym, &args, return_type) {
                    return self.expression(e);
                }
            }
        }

        self.set_ctype(e, return_type)
    }

    // ----------------------------------------------------------------
    // Statements
    // ----------------------------------------------------------------

    pub(crate) fn evaluate_statement(&mut self, stmt: StmtId) -> Option<SymbolId> {
        let kind = self.sess.stmts[stmt].kind.clone();
        let pos = self.sess.stmts[stmt].pos;
        match kind {
            StmtKind::None => None,
            StmtKind::Declaration { syms } => {
                for sym in syms {
                    evaluate_symbol(self.sess, sym);
                }
                None
            }
            StmtKind::Expression { expr } => {
                let t = self.expression(expr);
                self.degenerate(expr);
                t
            }
            StmtKind::Compound { stmts } => {
                let mut last = None;
                for s in stmts {
                    last = self.evaluate_statement(s);
                }
                last
            }
            StmtKind::If {
                cond,
                then_stmt,
                else_stmt,
            } => {
                self.expression(cond);
                self.degenerate(cond);
                self.check_scalar(cond, "if condition");
                self.evaluate_statement(then_stmt);
                if let Some(es) = else_stmt {
                    self.evaluate_statement(es);
                }
                None
            }
            StmtKind::Return { expr } => {
                match (expr, self.return_type) {
                    (Some(e), Some(rt)) => {
                        let void = base_type_of(self.sess, rt) == self.sess.ctypes.void;
                        if void {
                            self.sess
                                .diags
                                .warning(pos, "return with a value, in function returning void");
                            self.expression(e);
                        } else if let Some(at) = self.expression(e) {
                            let at = self.degenerate(e).unwrap_or(at);
                            self.check_assignment_types(pos, rt, e, at, "return expression");
                        }
                    }
                    (Some(e), None) => {
                        self.expression(e);
                    }
                    (None, Some(rt)) => {
                        let void = base_type_of(self.sess, rt) == self.sess.ctypes.void;
                        if !void {
                            self.sess
                                .diags
                                .warning(pos, "return with no value, in function returning non-void");
                        }
                    }
                    (None, None) => {}
                }
                None
            }
            StmtKind::Case { from, to, stmt, .. } => {
                if let Some(f) = from {
                    self.expression(f);
                    if expand::const_expression_value(self.sess, f).is_none() {
                        self.sess
                            .diags
                            .error(pos, "case label does not reduce to an integer constant");
                    }
                }
                if let Some(t) = to {
                    self.expression(t);
                    if expand::const_expression_value(self.sess, t).is_none() {
                        self.sess
                            .diags
                            .error(pos, "case label does not reduce to an integer constant");
                    }
                }
                self.evaluate_statement(stmt);
                None
            }
            StmtKind::Switch { expr, stmt, .. } => {
                if let Some(t) = self.expression(expr) {
                    let class = classify(self.sess, t);
                    if !class.contains(Class::INT) && !class.contains(Class::BAD) {
                        self.sess
                            .diags
                            .error(pos, "switch on a non-integer expression");
                    }
                }
                self.evaluate_statement(stmt);
                None
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
                    self.evaluate_statement(s);
                }
                if let Some(c) = pre_condition {
                    self.expression(c);
                    self.degenerate(c);
                    self.check_scalar(c, "loop condition");
                }
                self.evaluate_statement(statement);
                if let Some(s) = post_statement {
                    self.evaluate_statement(s);
                }
                if let Some(c) = post_condition {
                    self.expression(c);
                    self.degenerate(c);
                    self.check_scalar(c, "loop condition");
                }
                None
            }
            StmtKind::Label { stmt, .. } => self.evaluate_statement(stmt),
            StmtKind::Goto { expr, .. } => {
                if let Some(e) = expr {
                    self.expression(e);
                }
                None
            }
            StmtKind::Asm { .. } => None,
            StmtKind::Context { expr, .. } => {
                if let Some(e) = expr {
                    self.expression(e);
                }
                None
            }
            StmtKind::Range { expr, low, high } => {
                self.expression(expr);
                self.expression(low);
                self.expression(high);
                None
            }
        }
    }

    // ----------------------------------------------------------------
    // Initializers
    // ----------------------------------------------------------------

    /// Checks and normalizes an initializer against its target type.
    ///
    /// Brace lists become flat `Pos { offset, init }` runs in ascending
    /// offset order; designators move the cursor; excess entries warn and
    /// are dropped.
    pub(crate) fn evaluate_initializer(&mut self, target: SymbolId, init: ExprId) {
        examine_symbol_type(self.sess, target);
        let base = base_type_of(self.sess, target);
        let pos = self.pos_of(init);
        let kind = self.sess.exprs[init].kind.clone();

        match kind {
            ExprKind::InitList { entries } => match self.sess.symtab.symbols[base].kind {
                SymKind::Array => self.array_initializer(base, init, entries),
                SymKind::Struct | SymKind::Union => {
                    self.struct_initializer(base, init, entries)
                }
                _ => {
                    // Scalar in braces: `int x = { 3 };`
                    match entries.len() {
                        0 => {}
                        1 => {
                            self.evaluate_initializer(target, entries[0]);
                            let inner = self.sess.exprs[entries[0]].clone();
                            self.sess.exprs[init] = inner;
                        }
                        _ => {
                            self.sess
                                .diags
                                .warning(pos, "excess elements in scalar initializer");
                            self.evaluate_initializer(target, entries[0]);
                            let inner = self.sess.exprs[entries[0]].clone();
                            self.sess.exprs[init] = inner;
                        }
                    }
                }
            },
            ExprKind::Str { ref value, .. } => {
                // String literal initializing a char array is left alone;
                // anything else is an ordinary assignment.
                if self.sess.symtab.symbols[base].kind == SymKind::Array {
                    let elem = self.sess.symtab.symbols[base].base_type;
                    let elem_ok = elem
                        .map(|el| {
                            let eb = base_type_of(self.sess, el);
                            self.sess.symtab.symbols[eb]
                                .modifiers
                                .contains(Mod::CHAR)
                        })
                        .unwrap_or(false);
                    if !elem_ok {
                        self.sess
                            .diags
                            .error(pos, "string initializer for non-char array");
                    }
                    let len = value.len() as i64;
                    let char_bits =
                        self.sess.symtab.symbols[self.sess.ctypes.char_].bit_size;
                    let s = &mut self.sess.symtab.symbols[base];
                    if s.bit_size < 0 {
                        s.bit_size = char_bits * len;
                    }
                    self.expression(init);
                } else {
                    if let Some(at) = self.expression(init) {
                        let at = self.degenerate(init).unwrap_or(at);
                        self.check_assignment_types(pos, target, init, at, "initializer");
                    }
                }
            }
            _ => {
                if let Some(at) = self.expression(init) {
                    let at = self.degenerate(init).unwrap_or(at);
                    self.check_assignment_types(pos, target, init, at, "initializer");
                }
            }
        }
    }

    fn array_initializer(&mut self, array: SymbolId, init: ExprId, entries: Vec<ExprId>) {
        let elem = match self.sess.symtab.symbols[array].base_type {
            Some(e) => e,
            None => return,
        };
        examine_symbol_type(self.sess, elem);
        let elem_bits = self.sess.symtab.symbols[elem].bit_size.max(0);
        let elem_bytes = ((elem_bits + 7) / 8).max(1);
        let limit = {
            let total = self.sess.symtab.symbols[array].bit_size;
            if total >= 0 && elem_bits > 0 {
                Some(total / elem_bits)
            } else {
                None
            }
        };

        let mut normalized: Vec<(i64, ExprId)> = Vec::new();
        let mut index: i64 = 0;
        for entry in entries {
            let pos = self.pos_of(entry);
            let (start, end, value) = match self.sess.exprs[entry].kind.clone() {
                ExprKind::IndexDesignator { from, to, child } => {
                    self.expression(from);
                    let start = expand::const_expression_value(self.sess, from).unwrap_or_else(|| {
                        self.sess
                            .diags
                            .error(pos, "bad constant expression in array designator");
                        0
                    });
                    let end = match to {
                        Some(t) => {
                            self.expression(t);
                            expand::const_expression_value(self.sess, t).unwrap_or(start)
                        }
                        None => start,
                    };
                    let value = child.unwrap_or(entry);
                    (start, end, value)
                }
                _ => (index, index, entry),
            };
            if let Some(limit) = limit {
                if start >= limit {
                    self.sess
                        .diags
                        .warning(pos, "excess elements in array initializer");
                    continue;
                }
            }
            self.evaluate_initializer(elem, value);
            for i in start..=end {
                normalized.push((i * elem_bytes, value));
            }
            index = end + 1;
        }
        normalized.sort_by_key(|&(offset, _)| offset);
        // Later entries override earlier ones at the same offset.
        normalized.dedup_by(|a, b| {
            if a.0 == b.0 {
                b.1 = a.1;
                true
            } else {
                false
            }
        });
        let pos = self.pos_of(init);
        let mut positioned = Vec::with_capacity(normalized.len());
        for (offset, value) in normalized {
            let p = self
                .sess
                .exprs
                .alloc(Expr::new(pos, ExprKind::Pos { offset, init: value }));
            let vt = self.sess.exprs[value].ctype;
            self.sess.exprs[p].ctype = vt;
            positioned.push(p);
        }
        self.sess.exprs[init].kind = ExprKind::InitList {
            entries: positioned,
        };
        self.sess.exprs[init].ctype = Some(array);
    }

    fn struct_initializer(&mut self, aggregate: SymbolId, init: ExprId, entries: Vec<ExprId>) {
        let members = self.sess.symtab.symbols[aggregate].members.clone();
        let mut normalized: Vec<(i64, ExprId)> = Vec::new();
        let mut member_index = 0usize;

        for entry in entries {
            let pos = self.pos_of(entry);
            let (msym, value) = match self.sess.exprs[entry].kind.clone() {
                ExprKind::MemberDesignator { member, child } => {
                    match types::find_member(self.sess, aggregate, member) {
                        Some((m, _)) => {
                            // Reset the cursor past the designated member.
                            if let Some(i) = members.iter().position(|&x| x == m) {
                                member_index = i + 1;
                            }
                            (m, child.unwrap_or(entry))
                        }
                        None => {
                            let name = self.sess.interner.name(member).to_string();
                            self.sess.diags.error(
                                pos,
                                format!("unknown member '{name}' in initializer"),
                            );
                            continue;
                        }
                    }
                }
                _ => {
                    let m = loop {
                        match members.get(member_index) {
                            Some(&m) => {
                                member_index += 1;
                                // Unnamed bitfields are not initializable.
                                if self.sess.symtab.symbols[m].ident.is_some()
                                    || self.sess.symtab.symbols[m].base_type.map(|b| {
                                        !matches!(
                                            self.sess.symtab.symbols[b].kind,
                                            SymKind::Bitfield
                                        )
                                    }) == Some(true)
                                {
                                    break Some(m);
                                }
                            }
                            None => break None,
                        }
                    };
                    match m {
                        Some(m) => (m, entry),
                        None => {
                            self.sess
                                .diags
                                .warning(pos, "excess elements in struct initializer");
                            continue;
                        }
                    }
                }
            };
            let target = self.sess.symtab.symbols[msym].base_type.unwrap_or(msym);
            self.evaluate_initializer(target, value);
            let offset = self.sess.symtab.symbols[msym].offset;
            normalized.push((offset, value));
        }

        normalized.sort_by_key(|&(offset, _)| offset);
        let pos = self.pos_of(init);
        let mut positioned = Vec::with_capacity(normalized.len());
        for (offset, value) in normalized {
            let p = self
                .sess
                .exprs
                .alloc(Expr::new(pos, ExprKind::Pos { offset, init: value }));
            let vt = self.sess.exprs[value].ctype;
            self.sess.exprs[p].ctype = vt;
            positioned.push(p);
        }
        self.sess.exprs[init].kind = ExprKind::InitList {
            entries: positioned,
        };
        self.sess.exprs[init].ctype = Some(aggregate);
    }

    // ----------------------------------------------------------------
    // offsetof
    // ----------------------------------------------------------------

    fn offsetof_value(
        &mut self,
        ty: SymbolId,
        designator: ExprId,
        pos: Position,
    ) -> Option<i64> {
        match self.sess.exprs[designator].kind.clone() {
            ExprKind::MemberDesignator { member, child } => {
                let (msym, offset) = match types::find_member(self.sess, ty, member) {
                    Some(v) => v,
                    None => {
                        let name = self.sess.interner.name(member).to_string();
                        self.sess
                            .diags
                            .error(pos, format!("unknown member '{name}' in offsetof"));
                        return None;
                    }
                };
                let inner = match child {
                    Some(c) => {
                        let mtype = self.sess.symtab.symbols[msym]
                            .base_type
                            .unwrap_or(msym);
                        self.offsetof_value(mtype, c, pos)?
                    }
                    None => 0,
                };
                Some(offset + inner)
            }
            ExprKind::IndexDesignator { from, child, .. } => {
                self.expression(from);
                let index = expand::const_expression_value(self.sess, from)?;
                let base = base_type_of(self.sess, ty);
                let elem = self.sess.symtab.symbols[base].base_type?;
                examine_symbol_type(self.sess, elem);
                let elem_bytes =
                    (self.sess.symtab.symbols[elem].bit_size.max(0) + 7) / 8;
                let inner = match child {
                    Some(c) => self.offsetof_value(elem, c, pos)?,
                    None => 0,
                };
                Some(index * elem_bytes + inner)
            }
            _ => None,
        }
    }
}

