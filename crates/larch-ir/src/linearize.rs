//! Linearization: evaluated AST to a CFG of three-address instructions.
//!
//! One [`EntryPoint`] per function. Control flow runs through an "active
//! block" cursor: emitting a terminator clears it, starting a labeled block
//! sets it. Short-circuit conditions lower to branch diamonds feeding phis;
//! bitfield accesses lower to mask/shift sequences against a load/store of
//! the containing unit.

use std::collections::HashMap;

use larch_core::Position;
use larch_front::ast::{ExprId, ExprKind, StmtId, StmtKind};
use larch_front::expand::const_expression_value;
use larch_front::symbol::{Mod, SymKind, SymbolId};
use larch_front::token::Special;
use larch_front::types::{self, base_type_of, classify, Class};
use larch_front::Session;
use tracing::debug_span;

use crate::bb::{BasicBlock, EntryPoint};
use crate::insn::{BbId, InsnId, Instruction, Multijmp, Opcode, PseudoId, UseSlot, VOID};

/// Linearizes one top-level symbol. Non-functions return `None`.
pub fn linearize_symbol(sess: &mut Session, sym: SymbolId) -> Option<EntryPoint> {
    let base = sess.symtab.symbols[sym].base_type?;
    if sess.symtab.symbols[base].kind != SymKind::Fn {
        return None;
    }
    let body = sess.symtab.symbols[sym].stmt?;
    let name = sess.symtab.symbols[sym]
        .ident
        .map(|i| sess.interner.name(i).to_string())
        .unwrap_or_default();
    let span = debug_span!("linearize", function = %name);
    let _enter = span.enter();

    let pos = sess.symtab.symbols[sym].pos;
    let ep = EntryPoint::new(sym, pos);
    let mut lin = Linearizer {
        sess,
        ep,
        active: None,
        label_map: HashMap::new(),
    };
    lin.active = Some(lin.ep.entry);

    let entry = lin
        .emit(Instruction::new(Opcode::Entry, pos, 0))
        .expect("entry block is active");
    lin.ep.entry_insn = entry;

    // Arguments become ARG pseudos stored into their symbols.
    let args = lin.sess.symtab.symbols[sym].arguments.clone();
    for (i, &arg) in args.iter().enumerate() {
        let size = lin.type_size(arg);
        let p = lin.ep.arg_pseudo(i as u32 + 1);
        let base = lin.ep.sym_pseudo(arg);
        let mut store = Instruction::new(Opcode::Store, pos, size);
        store.ty = Some(arg);
        if let Some(insn) = lin.add(store) {
            lin.ep.use_pseudo(insn, UseSlot::Target, p);
            lin.ep.use_pseudo(insn, UseSlot::Src1, base);
        }
    }

    lin.statement(body);

    // Fall off the end: implicit return.
    if lin.active.is_some() {
        let ret = Instruction::new(Opcode::Ret, pos, 0);
        lin.add(ret);
        lin.active = None;
    }

    let mut ep = lin.ep;
    ep.cfg_postorder();
    Some(ep)
}

/// An lvalue resolved to a base address plus offset, with bitfield geometry
/// when applicable.
#[derive(Debug, Clone, Copy)]
struct Access {
    base: PseudoId,
    offset: i64,
    /// Value type of the access.
    ty: SymbolId,
    size: u32,
    bitfield: Option<BitfieldGeom>,
}

#[derive(Debug, Clone, Copy)]
struct BitfieldGeom {
    unit_bits: u32,
    bit_offset: u32,
    width: u32,
    signed: bool,
}

struct Linearizer<'s> {
    sess: &'s mut Session,
    ep: EntryPoint,
    active: Option<BbId>,
    label_map: HashMap<SymbolId, BbId>,
}

impl<'s> Linearizer<'s> {
    // ----------------------------------------------------------------
    // Blocks and emission
    // ----------------------------------------------------------------

    fn alloc_bb(&mut self, pos: Position) -> BbId {
        let bb = self.ep.blocks.alloc(BasicBlock::new(pos));
        self.ep.bbs.push_back(bb);
        bb
    }

    fn start_bb(&mut self, bb: BbId) {
        self.active = Some(bb);
    }

    fn add(&mut self, mut insn: Instruction) -> Option<InsnId> {
        let bb = self.active?;
        insn.bb = Some(bb);
        let id = self.ep.insns.alloc(insn);
        self.ep.blocks[bb].insns.push_back(id);
        Some(id)
    }

    fn emit(&mut self, insn: Instruction) -> Option<InsnId> {
        self.add(insn)
    }

    fn add_edge_unique(&mut self, from: BbId, to: BbId) {
        if !self.ep.blocks[from].children.contains(to) {
            self.ep.add_edge(from, to);
        }
    }

    fn add_goto(&mut self, target: BbId, pos: Position) {
        let Some(bb) = self.active else { return };
        let mut br = Instruction::new(Opcode::Br, pos, 0);
        br.bb_true = Some(target);
        self.add(br);
        self.add_edge_unique(bb, target);
        self.active = None;
    }

    fn add_branch(&mut self, cond: PseudoId, bb_true: BbId, bb_false: BbId, pos: Position) {
        let Some(bb) = self.active else { return };
        let mut br = Instruction::new(Opcode::Br, pos, 0);
        br.bb_true = Some(bb_true);
        br.bb_false = Some(bb_false);
        if let Some(insn) = self.add(br) {
            self.ep.use_pseudo(insn, UseSlot::Src1, cond);
        }
        self.add_edge_unique(bb, bb_true);
        self.add_edge_unique(bb, bb_false);
        self.active = None;
    }

    fn label_bb(&mut self, label: SymbolId, pos: Position) -> BbId {
        if let Some(&bb) = self.label_map.get(&label) {
            return bb;
        }
        let bb = self.alloc_bb(pos);
        self.label_map.insert(label, bb);
        bb
    }

    // ----------------------------------------------------------------
    // Type helpers
    // ----------------------------------------------------------------

    fn type_size(&mut self, ty: SymbolId) -> u32 {
        types::bit_size(self.sess, ty).max(0) as u32
    }

    fn expr_type(&self, e: ExprId) -> Option<SymbolId> {
        self.sess.exprs[e].ctype
    }

    fn expr_size(&mut self, e: ExprId) -> u32 {
        match self.expr_type(e) {
            Some(t) => self.type_size(t),
            None => 0,
        }
    }

    fn is_unsigned_type(&self, ty: SymbolId) -> bool {
        types::is_unsigned(self.sess, ty)
    }

    fn is_float_type(&self, ty: SymbolId) -> bool {
        classify(self.sess, ty).contains(Class::FLOAT)
    }

    fn pointer_stride(&mut self, ty: SymbolId) -> i64 {
        let base = base_type_of(self.sess, ty);
        match self.sess.symtab.symbols[base].base_type {
            Some(pointee) => {
                let bits = types::bit_size(self.sess, pointee);
                if bits <= 0 {
                    1
                } else {
                    (bits + 7) / 8
                }
            }
            None => 1,
        }
    }

    // ----------------------------------------------------------------
    // Lvalue access
    // ----------------------------------------------------------------

    fn access_of(&mut self, e: ExprId) -> Option<Access> {
        let ty = self.expr_type(e)?;
        match self.sess.exprs[e].kind.clone() {
            ExprKind::Symbol { sym: Some(sym), .. } => {
                let base = self.ep.sym_pseudo(sym);
                let size = self.type_size(ty);
                Some(Access {
                    base,
                    offset: 0,
                    ty,
                    size,
                    bitfield: None,
                })
            }
            ExprKind::Preop {
                op: Special::Star,
                expr,
            } => {
                let base = self.expression(expr);
                let size = self.type_size(ty);
                Some(Access {
                    base,
                    offset: 0,
                    ty,
                    size,
                    bitfield: None,
                })
            }
            ExprKind::Deref { deref, member } => {
                let inner = self.access_of(deref)?;
                let agg_ty = self.expr_type(deref)?;
                let agg_base = base_type_of(self.sess, agg_ty);
                let (msym, moffset) = types::find_member(self.sess, agg_base, member)?;
                let mtype = self.sess.symtab.symbols[msym].base_type.unwrap_or(msym);
                let mbase = base_type_of(self.sess, mtype);
                let bitfield = if self.sess.symtab.symbols[mbase].kind == SymKind::Bitfield {
                    let unit = self.sess.symtab.symbols[mbase]
                        .base_type
                        .unwrap_or(self.sess.ctypes.int_);
                    let unit_bits = self.type_size(unit);
                    Some(BitfieldGeom {
                        unit_bits,
                        bit_offset: self.sess.symtab.symbols[msym].bit_offset,
                        width: self.sess.symtab.symbols[mbase].fieldwidth,
                        signed: !self.is_unsigned_type(unit),
                    })
                } else {
                    None
                };
                let size = match bitfield {
                    Some(geom) => geom.unit_bits,
                    None => self.type_size(msym),
                };
                Some(Access {
                    base: inner.base,
                    offset: inner.offset + moffset,
                    ty: msym,
                    size,
                    bitfield,
                })
            }
            ExprKind::ImpliedCast { expr, .. } | ExprKind::Cast { expr, .. } => {
                self.access_of(expr)
            }
            _ => None,
        }
    }

    /// The address of an lvalue as a plain value.
    fn address_value(&mut self, acc: &Access, pos: Position) -> PseudoId {
        if acc.offset == 0 {
            return acc.base;
        }
        let ptr_bits = self.sess.target.bits_in_pointer;
        let off = self.ep.value_pseudo(acc.offset);
        let mut add = Instruction::new(Opcode::Add, pos, ptr_bits);
        let target = self.ep.alloc_pseudo(None);
        add.target = target;
        match self.add(add) {
            Some(insn) => {
                self.ep.pseudos[target].def = Some(insn);
                self.ep.use_pseudo(insn, UseSlot::Src1, acc.base);
                self.ep.use_pseudo(insn, UseSlot::Src2, off);
                target
            }
            None => VOID,
        }
    }

    fn emit_def(&mut self, mut insn: Instruction) -> (Option<InsnId>, PseudoId) {
        let target = self.ep.alloc_pseudo(None);
        insn.target = target;
        match self.add(insn) {
            Some(id) => {
                self.ep.pseudos[target].def = Some(id);
                (Some(id), target)
            }
            None => (None, VOID),
        }
    }

    fn emit_binary(
        &mut self,
        opcode: Opcode,
        pos: Position,
        size: u32,
        left: PseudoId,
        right: PseudoId,
    ) -> PseudoId {
        let insn = Instruction::new(opcode, pos, size);
        let (id, target) = self.emit_def(insn);
        if let Some(id) = id {
            self.ep.use_pseudo(id, UseSlot::Src1, left);
            self.ep.use_pseudo(id, UseSlot::Src2, right);
        }
        target
    }

    fn emit_load(&mut self, acc: &Access, pos: Position) -> PseudoId {
        // Bitfields load their whole containing unit; the shift/mask below
        // extracts the field.
        let mut load = Instruction::new(Opcode::Load, pos, acc.size);
        load.ty = Some(acc.ty);
        load.offset = acc.offset;
        let (id, unit) = self.emit_def(load);
        let Some(id) = id else { return VOID };
        self.ep.use_pseudo(id, UseSlot::Src1, acc.base);

        let Some(geom) = acc.bitfield else {
            return unit;
        };
        // Bitfield read: shift the field down, mask it, then sign-extend
        // when the field is signed.
        let mut value = unit;
        if geom.bit_offset > 0 {
            let shift = self.ep.value_pseudo(geom.bit_offset as i64);
            value = self.emit_binary(Opcode::Shr, pos, geom.unit_bits, value, shift);
        }
        let mask = self.ep.value_pseudo(field_mask(geom.width));
        value = self.emit_binary(Opcode::And, pos, geom.unit_bits, value, mask);
        if geom.signed {
            let mut cast = Instruction::new(Opcode::SCast, pos, geom.unit_bits);
            cast.orig_type = Some(acc.ty);
            let (cid, extended) = self.emit_def(cast);
            if let Some(cid) = cid {
                self.ep.use_pseudo(cid, UseSlot::Src1, value);
                return extended;
            }
        }
        value
    }

    fn emit_store(&mut self, acc: &Access, value: PseudoId, pos: Position) {
        let stored = match acc.bitfield {
            None => value,
            Some(geom) => {
                // Read-modify-write of the containing unit.
                let unit = {
                    let mut load = Instruction::new(Opcode::Load, pos, acc.size);
                    load.ty = Some(acc.ty);
                    load.offset = acc.offset;
                    let (id, unit) = self.emit_def(load);
                    if let Some(id) = id {
                        self.ep.use_pseudo(id, UseSlot::Src1, acc.base);
                    }
                    unit
                };
                let keep_mask = self
                    .ep
                    .value_pseudo(!(field_mask(geom.width) << geom.bit_offset));
                let kept = self.emit_binary(Opcode::And, pos, geom.unit_bits, unit, keep_mask);
                let mask = self.ep.value_pseudo(field_mask(geom.width));
                let trimmed = self.emit_binary(Opcode::And, pos, geom.unit_bits, value, mask);
                let shifted = if geom.bit_offset > 0 {
                    let shift = self.ep.value_pseudo(geom.bit_offset as i64);
                    self.emit_binary(Opcode::Shl, pos, geom.unit_bits, trimmed, shift)
                } else {
                    trimmed
                };
                self.emit_binary(Opcode::Or, pos, geom.unit_bits, kept, shifted)
            }
        };
        let mut store = Instruction::new(Opcode::Store, pos, acc.size);
        store.ty = Some(acc.ty);
        store.offset = acc.offset;
        if let Some(id) = self.add(store) {
            self.ep.use_pseudo(id, UseSlot::Target, stored);
            self.ep.use_pseudo(id, UseSlot::Src1, acc.base);
        }
    }

    // ----------------------------------------------------------------
    // Expressions
    // ----------------------------------------------------------------

    fn expression(&mut self, e: ExprId) -> PseudoId {
        let pos = self.sess.exprs[e].pos;
        let kind = self.sess.exprs[e].kind.clone();
        match kind {
            ExprKind::Value { value } => self.ep.value_pseudo(value as i64),
            ExprKind::FValue { value } => {
                let size = self.expr_size(e);
                let mut insn = Instruction::new(Opcode::Setval, pos, size);
                insn.val_bits = value.to_bits() as i64;
                insn.ty = self.expr_type(e);
                let (_, target) = self.emit_def(insn);
                target
            }
            ExprKind::Str { value, .. } => {
                let size = self.sess.target.bits_in_pointer;
                let mut insn = Instruction::new(Opcode::Setval, pos, size);
                insn.string = Some(value);
                insn.ty = self.expr_type(e);
                let (_, target) = self.emit_def(insn);
                target
            }
            ExprKind::Symbol { sym: Some(sym), .. } => {
                let ty = self.expr_type(e).unwrap_or(sym);
                let base = base_type_of(self.sess, ty);
                match self.sess.symtab.symbols[base].kind {
                    SymKind::Fn | SymKind::Array => self.symbol_address(sym, pos),
                    _ => match self.access_of(e) {
                        Some(acc) => self.emit_load(&acc, pos),
                        None => VOID,
                    },
                }
            }
            ExprKind::Symbol { sym: None, .. } => VOID,
            ExprKind::TypeRef { .. } => VOID,
            ExprKind::Binop { op, left, right } => self.binop(e, pos, op, left, right),
            ExprKind::Compare { op, left, right } => {
                let l = self.expression(left);
                let r = self.expression(right);
                let operand_ty = self.expr_type(left).unwrap_or(self.sess.ctypes.int_);
                let unsigned = self.is_unsigned_type(operand_ty);
                let opcode = compare_opcode(op, unsigned);
                let size = self.expr_size(e).max(1);
                self.emit_binary(opcode, pos, size, l, r)
            }
            ExprKind::Logical { .. } | ExprKind::Conditional { .. } | ExprKind::Select { .. } => {
                self.conditional_value(e, pos)
            }
            ExprKind::Assignment { op, left, right } => {
                let Some(acc) = self.access_of(left) else {
                    return VOID;
                };
                let value = if op == Special::Assign {
                    self.expression(right)
                } else {
                    let old = self.emit_load(&acc, pos);
                    let r = self.expression(right);
                    let base_op = op.compound_base();
                    let ty = self.expr_type(left).unwrap_or(self.sess.ctypes.int_);
                    let opcode = binop_opcode(
                        base_op,
                        self.is_float_type(ty),
                        self.is_unsigned_type(ty),
                    );
                    let size = self.type_size(ty);
                    self.emit_binary(opcode, pos, size, old, r)
                };
                self.emit_store(&acc, value, pos);
                value
            }
            ExprKind::Preop { op, expr } => match op {
                Special::Star => match self.access_of(e) {
                    Some(acc) => self.emit_load(&acc, pos),
                    None => VOID,
                },
                Special::Amp => match self.access_of(expr) {
                    Some(acc) => self.address_value(&acc, pos),
                    None => VOID,
                },
                Special::Plus => self.expression(expr),
                Special::Minus => {
                    let v = self.expression(expr);
                    let size = self.expr_size(e);
                    let insn = Instruction::new(Opcode::Neg, pos, size);
                    let (id, target) = self.emit_def(insn);
                    if let Some(id) = id {
                        self.ep.use_pseudo(id, UseSlot::Src1, v);
                    }
                    target
                }
                Special::Tilde => {
                    let v = self.expression(expr);
                    let size = self.expr_size(e);
                    let insn = Instruction::new(Opcode::Not, pos, size);
                    let (id, target) = self.emit_def(insn);
                    if let Some(id) = id {
                        self.ep.use_pseudo(id, UseSlot::Src1, v);
                    }
                    target
                }
                Special::Bang => {
                    let v = self.expression(expr);
                    let size = self.expr_size(e).max(1);
                    let zero = self.ep.value_pseudo(0);
                    self.emit_binary(Opcode::SetEq, pos, size, v, zero)
                }
                Special::Increment | Special::Decrement => self.incdec(e, pos, op, expr, false),
                _ => VOID,
            },
            ExprKind::Postop { op, expr } => self.incdec(e, pos, op, expr, true),
            ExprKind::Cast { cast_type, expr } | ExprKind::ImpliedCast { cast_type, expr } => {
                self.cast(pos, cast_type, expr)
            }
            ExprKind::Sizeof { .. }
            | ExprKind::Alignof { .. }
            | ExprKind::PtrSizeof { .. }
            | ExprKind::TypesCompatible { .. }
            | ExprKind::Offsetof { .. }
            | ExprKind::ConstantP { .. } => {
                // These fold to values during evaluation; reaching here
                // means the fold failed, so produce zero.
                self.ep.value_pseudo(0)
            }
            ExprKind::StmtExpr { stmt } => self.statement(stmt),
            ExprKind::Call { func, args } => self.call(e, pos, func, args),
            ExprKind::Comma { left, right } => {
                self.expression(left);
                self.expression(right)
            }
            ExprKind::Deref { .. } => match self.access_of(e) {
                Some(acc) => self.emit_load(&acc, pos),
                None => VOID,
            },
            ExprKind::Bitfield { base, .. } => self.expression(base),
            ExprKind::LabelRef { sym } => {
                let size = self.sess.target.bits_in_pointer;
                let mut insn = Instruction::new(Opcode::Setval, pos, size);
                insn.symbol = Some(sym);
                let (_, target) = self.emit_def(insn);
                target
            }
            ExprKind::InitList { .. }
            | ExprKind::MemberDesignator { .. }
            | ExprKind::IndexDesignator { .. }
            | ExprKind::Pos { .. } => VOID,
            ExprKind::ChooseExpr { when_true, .. } => self.expression(when_true),
            ExprKind::Expect { value, .. } => self.expression(value),
        }
    }

    fn symbol_address(&mut self, sym: SymbolId, pos: Position) -> PseudoId {
        let size = self.sess.target.bits_in_pointer;
        let mut insn = Instruction::new(Opcode::Setval, pos, size);
        insn.symbol = Some(sym);
        let (_, target) = self.emit_def(insn);
        if !self.ep.accesses.contains(&sym) {
            self.ep.accesses.push(sym);
        }
        self.sess.symtab.symbols[sym].modifiers |= Mod::ADDRESSABLE;
        target
    }

    fn binop(
        &mut self,
        e: ExprId,
        pos: Position,
        op: Special,
        left: ExprId,
        right: ExprId,
    ) -> PseudoId {
        let l = self.expression(left);
        let r = self.expression(right);
        let ty = self.expr_type(e).unwrap_or(self.sess.ctypes.int_);
        let opcode = binop_opcode(op, self.is_float_type(ty), self.is_unsigned_type(ty));
        let size = self.type_size(ty);
        self.emit_binary(opcode, pos, size, l, r)
    }

    fn incdec(
        &mut self,
        e: ExprId,
        pos: Position,
        op: Special,
        lvalue: ExprId,
        postfix: bool,
    ) -> PseudoId {
        let Some(acc) = self.access_of(lvalue) else {
            return VOID;
        };
        let ty = self.expr_type(e).unwrap_or(self.sess.ctypes.int_);
        let stride = if classify(self.sess, ty).contains(Class::PTR) {
            self.pointer_stride(ty)
        } else {
            1
        };
        let old = self.emit_load(&acc, pos);
        let delta = self.ep.value_pseudo(stride);
        let opcode = if op == Special::Increment {
            Opcode::Add
        } else {
            Opcode::Sub
        };
        let size = self.type_size(ty);
        let new = self.emit_binary(opcode, pos, size, old, delta);
        self.emit_store(&acc, new, pos);
        if postfix {
            old
        } else {
            new
        }
    }

    fn cast(&mut self, pos: Position, cast_type: SymbolId, inner: ExprId) -> PseudoId {
        let inner_ty = self.expr_type(inner);
        // Degeneration: casting an array or function value means taking
        // its address.
        if let Some(it) = inner_ty {
            let base = base_type_of(self.sess, it);
            if matches!(
                self.sess.symtab.symbols[base].kind,
                SymKind::Array | SymKind::Fn
            ) {
                if let ExprKind::Symbol { sym: Some(s), .. } = self.sess.exprs[inner].kind {
                    return self.symbol_address(s, pos);
                }
                if let Some(acc) = self.access_of(inner) {
                    return self.address_value(&acc, pos);
                }
                return self.expression(inner);
            }
        }

        let v = self.expression(inner);
        let target_size = self.type_size(cast_type);
        let target_float = self.is_float_type(cast_type);
        let source_float = inner_ty.map(|t| self.is_float_type(t)).unwrap_or(false);
        let target_ptr = classify(self.sess, cast_type).contains(Class::PTR);
        let source_ptr = inner_ty
            .map(|t| classify(self.sess, t).contains(Class::PTR))
            .unwrap_or(false);
        let source_signed = inner_ty.map(|t| !self.is_unsigned_type(t)).unwrap_or(false);

        let opcode = if target_float || source_float {
            Opcode::FpCast
        } else if target_ptr && source_ptr {
            Opcode::PtrCast
        } else if source_signed {
            Opcode::SCast
        } else {
            Opcode::Cast
        };
        let mut insn = Instruction::new(opcode, pos, target_size);
        insn.ty = Some(cast_type);
        insn.orig_type = inner_ty;
        let (id, target) = self.emit_def(insn);
        if let Some(id) = id {
            self.ep.use_pseudo(id, UseSlot::Src1, v);
        }
        target
    }

    fn call(&mut self, e: ExprId, pos: Position, func: ExprId, args: Vec<ExprId>) -> PseudoId {
        let mut arg_pseudos = Vec::with_capacity(args.len());
        for &a in &args {
            arg_pseudos.push(self.expression(a));
        }
        let fp = match self.sess.exprs[func].kind.clone() {
            ExprKind::Symbol { sym: Some(s), .. } => self.ep.sym_pseudo(s),
            _ => self.expression(func),
        };
        let ret_ty = self.expr_type(e).unwrap_or(self.sess.ctypes.void);
        let ret_size = self.type_size(ret_ty);
        let is_void = base_type_of(self.sess, ret_ty) == self.sess.ctypes.void;

        let mut insn = Instruction::new(Opcode::Call, pos, ret_size);
        insn.ty = Some(ret_ty);
        insn.args = smallvec::SmallVec::with_capacity(args.len());
        for _ in &args {
            insn.args.push(VOID);
        }
        let id = if is_void {
            self.add(insn)
        } else {
            let (id, _target) = self.emit_def(insn);
            id
        };
        let Some(id) = id else { return VOID };
        self.ep.use_pseudo(id, UseSlot::Func, fp);
        for (i, &p) in arg_pseudos.iter().enumerate() {
            self.ep.use_pseudo(id, UseSlot::Arg(i as u16), p);
        }
        self.ep.insns[id].target
    }

    // ----------------------------------------------------------------
    // Conditions, phis
    // ----------------------------------------------------------------

    /// Appends a phi source for `value` in the currently active block.
    fn add_phi_source(&mut self, value: PseudoId, size: u32, pos: Position) -> PseudoId {
        let mut insn = Instruction::new(Opcode::PhiSource, pos, size);
        insn.ty = None;
        let target = {
            self.ep.nr_pseudos += 1;
            let nr = self.ep.nr_pseudos;
            let mut p = crate::insn::Pseudo::new(crate::insn::PseudoKind::Phi, nr);
            p.def = None;
            self.ep.pseudos.alloc(p)
        };
        insn.target = target;
        if let Some(id) = self.add(insn) {
            self.ep.pseudos[target].def = Some(id);
            self.ep.use_pseudo(id, UseSlot::Src1, value);
        }
        target
    }

    /// Emits the phi joining `sources` (already paired with the parents of
    /// the active block, in order).
    fn add_phi(&mut self, sources: &[PseudoId], size: u32, pos: Position) -> PseudoId {
        let mut insn = Instruction::new(Opcode::Phi, pos, size);
        for _ in sources {
            insn.phi_list.push(VOID);
        }
        let (id, target) = self.emit_def(insn);
        if let Some(id) = id {
            for (i, &s) in sources.iter().enumerate() {
                self.ep.use_pseudo(id, UseSlot::Phi(i as u16), s);
            }
        }
        target
    }

    /// Lowers any boolean-valued expression through a branch diamond whose
    /// arms feed a phi at the join.
    fn conditional_value(&mut self, e: ExprId, pos: Position) -> PseudoId {
        let size = self.expr_size(e).max(1);
        let bb_true = self.alloc_bb(pos);
        let bb_false = self.alloc_bb(pos);
        let bb_end = self.alloc_bb(pos);

        match self.sess.exprs[e].kind.clone() {
            ExprKind::Conditional {
                cond,
                when_true,
                when_false,
            } => {
                let cond_value = self.expression(cond);
                self.add_branch(cond_value, bb_true, bb_false, pos);

                self.start_bb(bb_true);
                let tv = match when_true {
                    Some(wt) => self.expression(wt),
                    None => cond_value,
                };
                let ts = self.add_phi_source(tv, size, pos);
                self.add_goto(bb_end, pos);

                self.start_bb(bb_false);
                let fv = self.expression(when_false);
                let fs = self.add_phi_source(fv, size, pos);
                self.add_goto(bb_end, pos);

                self.start_bb(bb_end);
                self.add_phi(&[ts, fs], size, pos)
            }
            ExprKind::Select {
                cond,
                when_true,
                when_false,
            } => {
                let cond_value = self.expression(cond);
                self.add_branch(cond_value, bb_true, bb_false, pos);

                self.start_bb(bb_true);
                let tv = self.expression(when_true);
                let ts = self.add_phi_source(tv, size, pos);
                self.add_goto(bb_end, pos);

                self.start_bb(bb_false);
                let fv = self.expression(when_false);
                let fs = self.add_phi_source(fv, size, pos);
                self.add_goto(bb_end, pos);

                self.start_bb(bb_end);
                self.add_phi(&[ts, fs], size, pos)
            }
            _ => {
                // Logical &&/||: short-circuit to constant arms.
                self.cond_branch(e, bb_true, bb_false);

                self.start_bb(bb_true);
                let one = self.ep.value_pseudo(1);
                let ts = self.add_phi_source(one, size, pos);
                self.add_goto(bb_end, pos);

                self.start_bb(bb_false);
                let zero = self.ep.value_pseudo(0);
                let fs = self.add_phi_source(zero, size, pos);
                self.add_goto(bb_end, pos);

                self.start_bb(bb_end);
                self.add_phi(&[ts, fs], size, pos)
            }
        }
    }

    /// Branches to `bb_true`/`bb_false` on the truth of `e`, with
    /// short-circuit lowering for `&&`, `||`, and `!`.
    fn cond_branch(&mut self, e: ExprId, bb_true: BbId, bb_false: BbId) {
        let pos = self.sess.exprs[e].pos;
        match self.sess.exprs[e].kind.clone() {
            ExprKind::Logical {
                op: Special::LogicalAnd,
                left,
                right,
            } => {
                let mid = self.alloc_bb(pos);
                self.cond_branch(left, mid, bb_false);
                self.start_bb(mid);
                self.cond_branch(right, bb_true, bb_false);
            }
            ExprKind::Logical {
                op: Special::LogicalOr,
                left,
                right,
            } => {
                let mid = self.alloc_bb(pos);
                self.cond_branch(left, bb_true, mid);
                self.start_bb(mid);
                self.cond_branch(right, bb_true, bb_false);
            }
            ExprKind::Preop {
                op: Special::Bang,
                expr,
            } => self.cond_branch(expr, bb_false, bb_true),
            ExprKind::Value { value } => {
                let target = if value != 0 { bb_true } else { bb_false };
                self.add_goto(target, pos);
            }
            _ => {
                let v = self.expression(e);
                self.add_branch(v, bb_true, bb_false, pos);
            }
        }
    }

    // ----------------------------------------------------------------
    // Statements
    // ----------------------------------------------------------------

    fn statement(&mut self, stmt: StmtId) -> PseudoId {
        let pos = self.sess.stmts[stmt].pos;
        let kind = self.sess.stmts[stmt].kind.clone();
        match kind {
            StmtKind::None => VOID,
            StmtKind::Declaration { syms } => {
                for sym in syms {
                    self.declaration(sym, pos);
                }
                VOID
            }
            StmtKind::Expression { expr } => self.expression(expr),
            StmtKind::Compound { stmts } => {
                let mut last = VOID;
                for s in stmts {
                    last = self.statement(s);
                }
                last
            }
            StmtKind::If {
                cond,
                then_stmt,
                else_stmt,
            } => {
                let bb_then = self.alloc_bb(pos);
                let bb_end = self.alloc_bb(pos);
                let bb_else = match else_stmt {
                    Some(_) => self.alloc_bb(pos),
                    None => bb_end,
                };
                self.cond_branch(cond, bb_then, bb_else);
                self.start_bb(bb_then);
                self.statement(then_stmt);
                self.add_goto(bb_end, pos);
                if let Some(es) = else_stmt {
                    self.start_bb(bb_else);
                    self.statement(es);
                    self.add_goto(bb_end, pos);
                }
                self.start_bb(bb_end);
                VOID
            }
            StmtKind::Return { expr } => {
                let value = expr.map(|e| self.expression(e));
                let size = expr.map(|e| self.expr_size(e)).unwrap_or(0);
                let insn = Instruction::new(Opcode::Ret, pos, size);
                if let Some(id) = self.add(insn) {
                    if let Some(v) = value {
                        self.ep.use_pseudo(id, UseSlot::Src1, v);
                    }
                }
                self.active = None;
                VOID
            }
            StmtKind::Case {
                stmt, case_label, ..
            } => {
                let bb = self.label_bb(case_label, pos);
                if self.active.is_some() {
                    self.add_goto(bb, pos);
                }
                self.start_bb(bb);
                self.statement(stmt);
                VOID
            }
            StmtKind::Switch {
                expr,
                stmt,
                cases,
                break_label,
            } => {
                self.switch(pos, expr, stmt, &cases, break_label);
                VOID
            }
            StmtKind::Iterator {
                pre_statement,
                pre_condition,
                statement,
                post_statement,
                post_condition,
                break_label,
                continue_label,
            } => {
                if let Some(s) = pre_statement {
                    self.statement(s);
                }
                let bb_body = self.alloc_bb(pos);
                let bb_cont = self.alloc_bb(pos);
                let bb_end = self.alloc_bb(pos);
                self.label_map.insert(break_label, bb_end);
                self.label_map.insert(continue_label, bb_cont);

                // Entry check, then an inverted loop: the bottom check
                // jumps straight back to the body.
                match pre_condition {
                    Some(c) => self.cond_branch(c, bb_body, bb_end),
                    None => self.add_goto(bb_body, pos),
                }
                self.start_bb(bb_body);
                self.statement(statement);
                self.add_goto(bb_cont, pos);

                self.start_bb(bb_cont);
                if let Some(s) = post_statement {
                    self.statement(s);
                }
                match post_condition {
                    Some(c) => self.cond_branch(c, bb_body, bb_end),
                    None => self.add_goto(bb_body, pos),
                }
                self.start_bb(bb_end);
                VOID
            }
            StmtKind::Label { label, stmt } => {
                let bb = self.label_bb(label, pos);
                if self.active.is_some() {
                    self.add_goto(bb, pos);
                }
                self.start_bb(bb);
                self.statement(stmt)
            }
            StmtKind::Goto { label, expr } => {
                if let Some(label) = label {
                    let bb = self.label_bb(label, pos);
                    self.add_goto(bb, pos);
                } else if let Some(e) = expr {
                    let v = self.expression(e);
                    let insn = Instruction::new(Opcode::ComputedGoto, pos, 0);
                    if let Some(id) = self.add(insn) {
                        self.ep.use_pseudo(id, UseSlot::Target, v);
                    }
                    self.active = None;
                }
                VOID
            }
            StmtKind::Asm { template, volatile } => {
                let mut insn = Instruction::new(Opcode::Asm, pos, 0);
                insn.string = Some(template);
                insn.increment = volatile as i32;
                self.add(insn);
                VOID
            }
            StmtKind::Context { expr, increment } => {
                let mut insn = Instruction::new(Opcode::Context, pos, 0);
                insn.increment = increment;
                let value = expr.map(|e| self.expression(e));
                if let Some(id) = self.add(insn) {
                    if let Some(v) = value {
                        self.ep.use_pseudo(id, UseSlot::Src1, v);
                    }
                }
                VOID
            }
            StmtKind::Range { expr, low, high } => {
                let v = self.expression(expr);
                let l = self.expression(low);
                let h = self.expression(high);
                let size = self.expr_size(expr);
                let insn = Instruction::new(Opcode::Range, pos, size);
                if let Some(id) = self.add(insn) {
                    self.ep.use_pseudo(id, UseSlot::Src1, v);
                    self.ep.use_pseudo(id, UseSlot::Src2, l);
                    self.ep.use_pseudo(id, UseSlot::Src3, h);
                }
                VOID
            }
        }
    }

    fn declaration(&mut self, sym: SymbolId, pos: Position) {
        self.ep.syms.push(sym);
        let mods = self.sess.symtab.symbols[sym].modifiers;
        if mods.intersects(Mod::STATIC | Mod::EXTERN | Mod::TOPLEVEL) {
            return;
        }
        let Some(init) = self.sess.symtab.symbols[sym].initializer else {
            return;
        };
        let ty = self.sess.symtab.symbols[sym].base_type.unwrap_or(sym);
        let base = self.ep.sym_pseudo(sym);
        match self.sess.exprs[init].kind.clone() {
            ExprKind::InitList { entries } => {
                for entry in entries {
                    if let ExprKind::Pos { offset, init: value } =
                        self.sess.exprs[entry].kind.clone()
                    {
                        let v = self.expression(value);
                        let vty = self
                            .expr_type(value)
                            .unwrap_or(self.sess.ctypes.int_);
                        let size = self.type_size(vty);
                        let mut store = Instruction::new(Opcode::Store, pos, size);
                        store.ty = Some(vty);
                        store.offset = offset;
                        if let Some(id) = self.add(store) {
                            self.ep.use_pseudo(id, UseSlot::Target, v);
                            self.ep.use_pseudo(id, UseSlot::Src1, base);
                        }
                    }
                }
            }
            ExprKind::Str { value, .. } => {
                // Byte stores for a char-array initializer.
                let char_bits = self.type_size(self.sess.ctypes.char_);
                for (i, &b) in value.iter().enumerate() {
                    let v = self.ep.value_pseudo(b as i64);
                    let mut store = Instruction::new(Opcode::Store, pos, char_bits);
                    store.ty = Some(self.sess.ctypes.char_);
                    store.offset = i as i64;
                    if let Some(id) = self.add(store) {
                        self.ep.use_pseudo(id, UseSlot::Target, v);
                        self.ep.use_pseudo(id, UseSlot::Src1, base);
                    }
                }
            }
            _ => {
                let v = self.expression(init);
                let size = self.type_size(ty);
                let mut store = Instruction::new(Opcode::Store, pos, size);
                store.ty = Some(ty);
                if let Some(id) = self.add(store) {
                    self.ep.use_pseudo(id, UseSlot::Target, v);
                    self.ep.use_pseudo(id, UseSlot::Src1, base);
                }
            }
        }
    }

    fn switch(
        &mut self,
        pos: Position,
        expr: ExprId,
        body: StmtId,
        cases: &[StmtId],
        break_label: SymbolId,
    ) {
        let v = self.expression(expr);
        let bb_end = self.label_bb(break_label, pos);
        let switch_bb = self.active;

        let mut jumps: Vec<Multijmp> = Vec::new();
        let mut default_seen = false;
        for &case in cases {
            if let StmtKind::Case {
                from,
                to,
                case_label,
                ..
            } = self.sess.stmts[case].kind.clone()
            {
                let target = self.label_bb(case_label, pos);
                match from {
                    Some(f) => {
                        let begin = const_expression_value(self.sess, f).unwrap_or(0);
                        let end = match to {
                            Some(t) => const_expression_value(self.sess, t).unwrap_or(begin),
                            None => begin,
                        };
                        jumps.push(Multijmp { begin, end, target });
                    }
                    None => {
                        default_seen = true;
                        jumps.push(Multijmp {
                            begin: 1,
                            end: 0,
                            target,
                        });
                    }
                }
            }
        }
        if !default_seen {
            jumps.push(Multijmp {
                begin: 1,
                end: 0,
                target: bb_end,
            });
        }

        let mut insn = Instruction::new(Opcode::Switch, pos, self.expr_size(expr));
        insn.multijmp = jumps.clone();
        if let Some(id) = self.add(insn) {
            self.ep.use_pseudo(id, UseSlot::Src1, v);
            self.ep.switches.push(id);
        }
        if let Some(from) = switch_bb {
            for jmp in &jumps {
                self.add_edge_unique(from, jmp.target);
            }
        }
        self.active = None;

        self.statement(body);
        if self.active.is_some() {
            self.add_goto(bb_end, pos);
        }
        self.start_bb(bb_end);
    }
}

/// Maps a source operator to the matching opcode.
fn binop_opcode(op: Special, _is_float: bool, _is_unsigned: bool) -> Opcode {
    match op {
        Special::Plus => Opcode::Add,
        Special::Minus => Opcode::Sub,
        Special::Star => Opcode::Mul,
        Special::Slash => Opcode::Div,
        Special::Percent => Opcode::Mod,
        Special::Shl => Opcode::Shl,
        Special::Shr => Opcode::Shr,
        Special::Amp => Opcode::And,
        Special::Pipe => Opcode::Or,
        Special::Caret => Opcode::Xor,
        _ => Opcode::Nop,
    }
}

fn compare_opcode(op: Special, unsigned: bool) -> Opcode {
    match (op, unsigned) {
        (Special::Equal, _) => Opcode::SetEq,
        (Special::NotEqual, _) => Opcode::SetNe,
        (Special::Lt, false) => Opcode::SetLt,
        (Special::Lte, false) => Opcode::SetLe,
        (Special::Gt, false) => Opcode::SetGt,
        (Special::Gte, false) => Opcode::SetGe,
        (Special::Lt, true) => Opcode::SetB,
        (Special::Lte, true) => Opcode::SetBe,
        (Special::Gt, true) => Opcode::SetA,
        (Special::Gte, true) => Opcode::SetAe,
        _ => Opcode::SetEq,
    }
}

/// All-ones mask of `width` bits.
fn field_mask(width: u32) -> i64 {
    if width >= 64 {
        -1
    } else {
        ((1u64 << width) - 1) as i64
    }
}
