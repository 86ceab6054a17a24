//! The C type system.
//!
//! Types are symbols: `Basetype` leaves, `Node` decoration (modifiers,
//! address space), and the structural kinds (`Ptr`, `Fn`, `Array`, `Struct`,
//! `Union`, `Enum`, `Bitfield`). [`Ctypes`] pre-registers the built-in types
//! once per session; [`examine_symbol_type`] computes layout memoized behind
//! the `examined` flag; [`type_difference`] is the compatibility check used
//! for assignments, calls, and declaration merging.
//!
//! "Restricted" integers (an opaque newtype kind) interact with operators
//! through the explicit lattice in [`restricted_binop_class`] /
//! [`RestrictedOutcome`].

use bitflags::bitflags;
use larch_core::{Position, Target};

use crate::ast::ExprKind;
use crate::symbol::{Mod, Symbol, SymbolId, SymbolTable, SymKind, BITS_UNKNOWN};
use crate::token::Special;
use crate::Session;

/// Handles to the pre-registered built-in types.
///
/// Mirrors the registry idea: fixed handles allocated at session start, so
/// type identity checks are id comparisons.
#[derive(Debug, Clone)]
pub struct Ctypes {
    pub void: SymbolId,
    pub bool_: SymbolId,
    pub char_: SymbolId,
    pub schar: SymbolId,
    pub uchar: SymbolId,
    pub short: SymbolId,
    pub ushort: SymbolId,
    pub int_: SymbolId,
    pub uint: SymbolId,
    pub long: SymbolId,
    pub ulong: SymbolId,
    pub llong: SymbolId,
    pub ullong: SymbolId,
    pub float_: SymbolId,
    pub double_: SymbolId,
    pub ldouble: SymbolId,
    /// `char *`, the type of string literals.
    pub string: SymbolId,
    /// `void *`.
    pub ptr_void: SymbolId,
    /// The type of `&&label`.
    pub label: SymbolId,
    /// Alias for the target's `size_t`.
    pub size_t: SymbolId,
    /// Alias for the target's `ssize_t`/`ptrdiff_t`.
    pub ssize_t: SymbolId,
    /// Error sentinel; everything recovers through it.
    pub bad: SymbolId,
}

impl Ctypes {
    pub fn init(symtab: &mut SymbolTable, target: &Target) -> Ctypes {
        let mut base = |kind: SymKind, modifiers: Mod, bits: u32, align: u32| -> SymbolId {
            let mut sym = Symbol::new(kind, Position::none());
            sym.modifiers = modifiers;
            sym.bit_size = bits as i64;
            sym.alignment = align;
            sym.examined = true;
            sym.scope = symtab.global_scope();
            symtab.symbols.alloc(sym)
        };

        let void = base(SymKind::Basetype, Mod::empty(), 0, 1);
        let bool_ = base(
            SymKind::Basetype,
            Mod::UNSIGNED,
            target.bits_in_bool,
            target.char_alignment,
        );
        let char_mod = if target.char_is_signed {
            Mod::SIGNED
        } else {
            Mod::UNSIGNED
        };
        let char_ = base(
            SymKind::Basetype,
            char_mod | Mod::CHAR,
            target.bits_in_char,
            target.char_alignment,
        );
        let schar = base(
            SymKind::Basetype,
            Mod::SIGNED | Mod::CHAR,
            target.bits_in_char,
            target.char_alignment,
        );
        let uchar = base(
            SymKind::Basetype,
            Mod::UNSIGNED | Mod::CHAR,
            target.bits_in_char,
            target.char_alignment,
        );
        let short = base(
            SymKind::Basetype,
            Mod::SIGNED | Mod::SHORT,
            target.bits_in_short,
            target.short_alignment,
        );
        let ushort = base(
            SymKind::Basetype,
            Mod::UNSIGNED | Mod::SHORT,
            target.bits_in_short,
            target.short_alignment,
        );
        let int_ = base(
            SymKind::Basetype,
            Mod::SIGNED,
            target.bits_in_int,
            target.int_alignment,
        );
        let uint = base(
            SymKind::Basetype,
            Mod::UNSIGNED,
            target.bits_in_int,
            target.int_alignment,
        );
        let long = base(
            SymKind::Basetype,
            Mod::SIGNED | Mod::LONG,
            target.bits_in_long,
            target.long_alignment,
        );
        let ulong = base(
            SymKind::Basetype,
            Mod::UNSIGNED | Mod::LONG,
            target.bits_in_long,
            target.long_alignment,
        );
        let llong = base(
            SymKind::Basetype,
            Mod::SIGNED | Mod::LONGLONG,
            target.bits_in_longlong,
            target.longlong_alignment,
        );
        let ullong = base(
            SymKind::Basetype,
            Mod::UNSIGNED | Mod::LONGLONG,
            target.bits_in_longlong,
            target.longlong_alignment,
        );
        let float_ = base(
            SymKind::Basetype,
            Mod::empty(),
            target.bits_in_float,
            target.float_alignment,
        );
        let double_ = base(
            SymKind::Basetype,
            Mod::LONG,
            target.bits_in_double,
            target.double_alignment,
        );
        let ldouble = base(
            SymKind::Basetype,
            Mod::LONG | Mod::LONGLONG,
            target.bits_in_longdouble,
            target.max_alignment,
        );
        let bad = base(SymKind::Basetype, Mod::empty(), 0, 1);

        let mut ptr = |b: SymbolId| -> SymbolId {
            let mut sym = Symbol::new(SymKind::Ptr, Position::none());
            sym.base_type = Some(b);
            sym.bit_size = target.bits_in_pointer as i64;
            sym.alignment = target.pointer_alignment;
            sym.examined = true;
            sym.scope = symtab.global_scope();
            symtab.symbols.alloc(sym)
        };
        let string = ptr(char_);
        let ptr_void = ptr(void);
        let label = ptr(void);

        let (size_t, ssize_t) = if target.bits_in_size_t() == target.bits_in_long {
            (ulong, long)
        } else if target.bits_in_size_t() == target.bits_in_int {
            (uint, int_)
        } else {
            (ullong, llong)
        };

        // Floats are marked so classification can tell them from integers:
        // integer basetypes carry SIGNED or UNSIGNED, floats carry neither.
        // (void and bad also carry neither; they are identified by handle.)
        Ctypes {
            void,
            bool_,
            char_,
            schar,
            uchar,
            short,
            ushort,
            int_,
            uint,
            long,
            ulong,
            llong,
            ullong,
            float_,
            double_,
            ldouble,
            string,
            ptr_void,
            label,
            size_t,
            ssize_t,
            bad,
        }
    }

    pub fn is_float_ctype(&self, sym: SymbolId) -> bool {
        sym == self.float_ || sym == self.double_ || sym == self.ldouble
    }

    /// Rank position in the integer promotion ladder, smallest first.
    pub fn integer_rank(&self, sym: SymbolId) -> Option<u32> {
        let rank = if sym == self.bool_ {
            0
        } else if sym == self.char_ || sym == self.schar || sym == self.uchar {
            1
        } else if sym == self.short || sym == self.ushort {
            2
        } else if sym == self.int_ || sym == self.uint {
            3
        } else if sym == self.long || sym == self.ulong {
            4
        } else if sym == self.llong || sym == self.ullong {
            5
        } else {
            return None;
        };
        Some(rank)
    }

    /// The unsigned twin of an integer ctype.
    pub fn unsigned_of(&self, sym: SymbolId) -> SymbolId {
        if sym == self.char_ || sym == self.schar {
            self.uchar
        } else if sym == self.short {
            self.ushort
        } else if sym == self.int_ {
            self.uint
        } else if sym == self.long {
            self.ulong
        } else if sym == self.llong {
            self.ullong
        } else {
            sym
        }
    }
}

bitflags! {
    /// Coarse classification of a (possibly decorated) type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Class: u16 {
        const INT = 1 << 0;
        const FLOAT = 1 << 1;
        const PTR = 1 << 2;
        const AGGREGATE = 1 << 3;
        const FN = 1 << 4;
        const ARRAY = 1 << 5;
        const BITFIELD = 1 << 6;
        const RESTRICT = 1 << 7;
        const FOULED = 1 << 8;
        const VOID = 1 << 9;
        const BAD = 1 << 10;
        const NUM = Self::INT.bits() | Self::FLOAT.bits();
        const SCALAR = Self::NUM.bits() | Self::PTR.bits();
    }
}

/// Strips `Node` decoration down to the structural type.
pub fn base_type_of(sess: &Session, mut sym: SymbolId) -> SymbolId {
    loop {
        let s = &sess.symtab.symbols[sym];
        match s.kind {
            SymKind::Node | SymKind::Typedef => match s.base_type {
                Some(b) => sym = b,
                None => return sym,
            },
            _ => return sym,
        }
    }
}

/// Classifies `sym` for the evaluator's dispatch.
pub fn classify(sess: &Session, sym: SymbolId) -> Class {
    let base = base_type_of(sess, sym);
    let s = &sess.symtab.symbols[base];
    match s.kind {
        SymKind::Ptr => Class::PTR,
        SymKind::Fn => Class::FN,
        SymKind::Array => Class::ARRAY,
        SymKind::Struct | SymKind::Union => Class::AGGREGATE,
        SymKind::Enum => Class::INT,
        SymKind::Bitfield => Class::INT | Class::BITFIELD,
        SymKind::Restrict => Class::INT | Class::RESTRICT,
        SymKind::Fouled => Class::INT | Class::RESTRICT | Class::FOULED,
        SymKind::Basetype => {
            if base == sess.ctypes.void {
                Class::VOID
            } else if base == sess.ctypes.bad {
                Class::BAD
            } else if sess.ctypes.is_float_ctype(base) {
                Class::FLOAT
            } else {
                Class::INT
            }
        }
        _ => Class::BAD,
    }
}

/// Bit size of `sym`, computing layout on demand. `-1` when incomplete.
pub fn bit_size(sess: &mut Session, sym: SymbolId) -> i64 {
    let examined = examine_symbol_type(sess, sym);
    sess.symtab.symbols[examined].bit_size
}

/// Alignment of `sym` in bytes, after layout.
pub fn alignment_of(sess: &mut Session, sym: SymbolId) -> u32 {
    let examined = examine_symbol_type(sess, sym);
    let a = sess.symtab.symbols[examined].alignment;
    if a == 0 {
        1
    } else {
        a
    }
}

/// Whether `sym` (after stripping nodes) is unsigned.
pub fn is_unsigned(sess: &Session, sym: SymbolId) -> bool {
    let base = base_type_of(sess, sym);
    let s = &sess.symtab.symbols[base];
    match s.kind {
        SymKind::Ptr => true,
        SymKind::Bitfield | SymKind::Enum | SymKind::Restrict | SymKind::Fouled => s
            .base_type
            .map(|b| is_unsigned(sess, b))
            .unwrap_or(true),
        _ => s.modifiers.contains(Mod::UNSIGNED),
    }
}

/// Rounds `value` up to a multiple of `align`.
pub fn round_up(value: i64, align: i64) -> i64 {
    (value + align - 1) & !(align - 1)
}

/// Computes (and memoizes) size, alignment, and member offsets for `sym`.
///
/// Returns the examined symbol (same id). Pointers set their own size before
/// examining the pointee, so self-referential types terminate.
pub fn examine_symbol_type(sess: &mut Session, sym: SymbolId) -> SymbolId {
    if sess.symtab.symbols[sym].examined {
        return sym;
    }
    sess.symtab.symbols[sym].examined = true;

    let kind = sess.symtab.symbols[sym].kind;
    match kind {
        SymKind::Basetype | SymKind::Label | SymKind::Preprocessor | SymKind::Uninitialized => {}
        SymKind::Ptr => {
            sess.symtab.symbols[sym].bit_size = sess.target.bits_in_pointer as i64;
            sess.symtab.symbols[sym].alignment = sess.target.pointer_alignment;
            if let Some(base) = sess.symtab.symbols[sym].base_type {
                examine_symbol_type(sess, base);
            }
        }
        SymKind::Fn => {
            if let Some(base) = sess.symtab.symbols[sym].base_type {
                examine_symbol_type(sess, base);
            }
            // A function has no size of its own.
            sess.symtab.symbols[sym].bit_size = BITS_UNKNOWN;
        }
        SymKind::Array => examine_array_type(sess, sym),
        SymKind::Struct => examine_struct_type(sess, sym),
        SymKind::Union => examine_union_type(sess, sym),
        SymKind::Enum => {
            let base = sess.symtab.symbols[sym]
                .base_type
                .unwrap_or(sess.ctypes.int_);
            examine_symbol_type(sess, base);
            let base_bits = sess.symtab.symbols[base].bit_size;
            let bits = (sess.target.bits_in_enum as i64).max(base_bits);
            let align = sess.symtab.symbols[base].alignment;
            let s = &mut sess.symtab.symbols[sym];
            s.bit_size = bits;
            s.alignment = align;
        }
        SymKind::Bitfield => {
            if let Some(base) = sess.symtab.symbols[sym].base_type {
                examine_symbol_type(sess, base);
            }
            let width = sess.symtab.symbols[sym].fieldwidth;
            sess.symtab.symbols[sym].bit_size = width as i64;
        }
        SymKind::Node | SymKind::Member => {
            if let Some(base) = sess.symtab.symbols[sym].base_type {
                examine_symbol_type(sess, base);
                let (bits, align) = {
                    let b = &sess.symtab.symbols[base];
                    (b.bit_size, b.alignment)
                };
                let s = &mut sess.symtab.symbols[sym];
                if s.bit_size == BITS_UNKNOWN {
                    s.bit_size = bits;
                }
                if s.alignment == 0 {
                    s.alignment = align;
                }
            }
        }
        SymKind::Typedef | SymKind::Typeof => {
            // `typeof(expr)` resolves its base type from the expression on
            // first examination.
            if sess.symtab.symbols[sym].base_type.is_none() {
                if let Some(expr) = sess.symtab.symbols[sym].initializer {
                    let resolved = crate::evaluate::evaluate_expression(sess, expr);
                    sess.symtab.symbols[sym].base_type = resolved;
                }
            }
            if let Some(base) = sess.symtab.symbols[sym].base_type {
                examine_symbol_type(sess, base);
                let (bits, align) = {
                    let b = &sess.symtab.symbols[base];
                    (b.bit_size, b.alignment)
                };
                let s = &mut sess.symtab.symbols[sym];
                s.bit_size = bits;
                s.alignment = align;
            }
        }
        SymKind::Restrict | SymKind::Fouled => {
            if let Some(base) = sess.symtab.symbols[sym].base_type {
                examine_symbol_type(sess, base);
                let (bits, align) = {
                    let b = &sess.symtab.symbols[base];
                    (b.bit_size, b.alignment)
                };
                let s = &mut sess.symtab.symbols[sym];
                s.bit_size = bits;
                s.alignment = align;
            }
        }
    }
    sym
}

fn examine_array_type(sess: &mut Session, sym: SymbolId) {
    let Some(elem) = sess.symtab.symbols[sym].base_type else {
        return;
    };
    examine_symbol_type(sess, elem);
    let (elem_bits, elem_align) = {
        let e = &sess.symtab.symbols[elem];
        (e.bit_size, e.alignment)
    };
    let count = sess.symtab.symbols[sym]
        .array_size
        .and_then(|size| crate::expand::const_expression_value(sess, size));
    let s = &mut sess.symtab.symbols[sym];
    s.alignment = elem_align;
    match count {
        Some(n) if elem_bits >= 0 => s.bit_size = elem_bits * n,
        // Unsized or variably sized: stays incomplete until an initializer
        // completes it.
        _ => s.bit_size = BITS_UNKNOWN,
    }
}

fn examine_struct_type(sess: &mut Session, sym: SymbolId) {
    let members = sess.symtab.symbols[sym].members.clone();
    let mut pos_bits: i64 = 0;
    let mut max_align: u32 = 1;

    for member in members {
        examine_symbol_type(sess, member);
        let (is_bitfield, width, unit_bits, align, bits, named) = {
            let m = &sess.symtab.symbols[member];
            let base = m.base_type;
            let is_bf = base
                .map(|b| sess.symtab.symbols[b].kind == SymKind::Bitfield)
                .unwrap_or(false);
            if is_bf {
                let bf = base.unwrap();
                let unit = sess.symtab.symbols[bf]
                    .base_type
                    .unwrap_or(sess.ctypes.int_);
                let unit_bits = sess.symtab.symbols[unit].bit_size.max(1);
                let align = sess.symtab.symbols[unit].alignment.max(1);
                let width = sess.symtab.symbols[bf].fieldwidth;
                (true, width as i64, unit_bits, align, width as i64, m.ident.is_some())
            } else {
                (false, 0, 0, m.alignment.max(1), m.bit_size, m.ident.is_some())
            }
        };

        if is_bitfield {
            if width == 0 {
                // Zero-width field: advance to the next allocation unit.
                pos_bits = round_up(pos_bits, unit_bits);
                continue;
            }
            if pos_bits / unit_bits != (pos_bits + width - 1) / unit_bits {
                pos_bits = round_up(pos_bits, unit_bits);
            }
            let unit_start = pos_bits - pos_bits % unit_bits;
            {
                let m = &mut sess.symtab.symbols[member];
                m.offset = unit_start / 8;
                m.bit_offset = (pos_bits - unit_start) as u32;
                m.bit_size = width;
            }
            pos_bits += width;
            if named {
                max_align = max_align.max(align);
            }
        } else {
            let align_bits = align as i64 * 8;
            pos_bits = round_up(pos_bits, align_bits);
            {
                let m = &mut sess.symtab.symbols[member];
                m.offset = pos_bits / 8;
                m.bit_offset = 0;
            }
            pos_bits += bits.max(0);
            max_align = max_align.max(align);
        }
    }

    let total = round_up(pos_bits, max_align as i64 * 8);
    let s = &mut sess.symtab.symbols[sym];
    s.bit_size = if s.members.is_empty() { BITS_UNKNOWN } else { total };
    s.alignment = max_align;
}

fn examine_union_type(sess: &mut Session, sym: SymbolId) {
    let members = sess.symtab.symbols[sym].members.clone();
    let mut max_bits: i64 = 0;
    let mut max_align: u32 = 1;
    for member in members {
        examine_symbol_type(sess, member);
        let (bits, align) = {
            let m = &mut sess.symtab.symbols[member];
            m.offset = 0;
            m.bit_offset = 0;
            (m.bit_size, m.alignment.max(1))
        };
        max_bits = max_bits.max(bits);
        max_align = max_align.max(align);
    }
    let total = round_up(max_bits, max_align as i64 * 8);
    let s = &mut sess.symtab.symbols[sym];
    s.bit_size = if s.members.is_empty() { BITS_UNKNOWN } else { total };
    s.alignment = max_align;
}

/// Finds a struct/union member by name, searching anonymous sub-aggregates.
/// Returns the member and its accumulated byte offset.
pub fn find_member(sess: &Session, aggregate: SymbolId, name: larch_core::Ident) -> Option<(SymbolId, i64)> {
    let base = base_type_of(sess, aggregate);
    let members = &sess.symtab.symbols[base].members;
    for &m in members {
        let ms = &sess.symtab.symbols[m];
        if ms.ident == Some(name) {
            return Some((m, ms.offset));
        }
        if ms.ident.is_none() {
            if let Some(inner_base) = ms.base_type {
                let inner_kind = sess.symtab.symbols[base_type_of(sess, inner_base)].kind;
                if matches!(inner_kind, SymKind::Struct | SymKind::Union) {
                    if let Some((found, off)) = find_member(sess, inner_base, name) {
                        return Some((found, ms.offset + off));
                    }
                }
            }
        }
    }
    None
}

/// Compares two types for compatibility.
///
/// Returns `None` on a match, or a short description of the first
/// difference. Storage modifiers are ignored; `const`/`volatile` require the
/// target to be at least as qualified; address spaces must match exactly.
pub fn type_difference(
    sess: &Session,
    target: SymbolId,
    source: SymbolId,
) -> Option<&'static str> {
    type_difference_masked(sess, target, source, Mod::empty(), Mod::empty())
}

pub fn type_difference_masked(
    sess: &Session,
    target: SymbolId,
    source: SymbolId,
    target_ignore: Mod,
    source_ignore: Mod,
) -> Option<&'static str> {
    let mut t = target;
    let mut s = source;
    let mut t_mods = Mod::empty();
    let mut s_mods = Mod::empty();
    let mut t_as = 0u32;
    let mut s_as = 0u32;

    loop {
        // Peel decoration, accumulating qualifiers. Enums peel down to
        // their base integer type.
        loop {
            let sym = &sess.symtab.symbols[t];
            match sym.kind {
                SymKind::Node | SymKind::Typedef | SymKind::Typeof | SymKind::Enum => {
                    t_mods |= sym.modifiers;
                    t_as |= sym.address_space;
                    match sym.base_type {
                        Some(b) => t = b,
                        None => break,
                    }
                }
                _ => break,
            }
        }
        loop {
            let sym = &sess.symtab.symbols[s];
            match sym.kind {
                SymKind::Node | SymKind::Typedef | SymKind::Typeof | SymKind::Enum => {
                    s_mods |= sym.modifiers;
                    s_as |= sym.address_space;
                    match sym.base_type {
                        Some(b) => s = b,
                        None => break,
                    }
                }
                _ => break,
            }
        }

        let tk = sess.symtab.symbols[t].kind;
        let sk = sess.symtab.symbols[s].kind;

        // Arrays degrade to pointers for comparison purposes.
        let tk = if tk == SymKind::Array { SymKind::Ptr } else { tk };
        let sk = if sk == SymKind::Array { SymKind::Ptr } else { sk };

        if tk != sk {
            return Some("different base types");
        }

        match tk {
            SymKind::Ptr => {
                if t_as != s_as {
                    return Some("different address spaces");
                }
                let tb = sess.symtab.symbols[t].base_type;
                let sb = sess.symtab.symbols[s].base_type;
                match (tb, sb) {
                    (Some(tb), Some(sb)) => {
                        // A function reached through a pointer compares as
                        // the function itself.
                        t = tb;
                        s = sb;
                        t_mods = Mod::empty();
                        s_mods = Mod::empty();
                        t_as = 0;
                        s_as = 0;
                        continue;
                    }
                    _ => return None,
                }
            }
            SymKind::Fn => {
                let tsym = &sess.symtab.symbols[t];
                let ssym = &sess.symtab.symbols[s];
                if tsym.arguments.len() != ssym.arguments.len()
                    && !tsym.arguments.is_empty()
                    && !ssym.arguments.is_empty()
                {
                    return Some("different argument counts");
                }
                if tsym.variadic != ssym.variadic {
                    return Some("incompatible variadic arguments");
                }
                let pairs: Vec<(SymbolId, SymbolId)> = tsym
                    .arguments
                    .iter()
                    .zip(ssym.arguments.iter())
                    .map(|(&a, &b)| (a, b))
                    .collect();
                for (ta, sa) in pairs {
                    if type_difference_masked(sess, ta, sa, Mod::IGNORE, Mod::IGNORE).is_some() {
                        return Some("incompatible argument types");
                    }
                }
                match (tsym.base_type, ssym.base_type) {
                    (Some(tb), Some(sb)) => {
                        t = tb;
                        s = sb;
                        t_mods = Mod::empty();
                        s_mods = Mod::empty();
                        continue;
                    }
                    _ => return None,
                }
            }
            SymKind::Struct | SymKind::Union | SymKind::Restrict | SymKind::Fouled => {
                if t != s {
                    return Some("different types");
                }
            }
            _ => {
                if t != s {
                    let t_spec = (t_mods | sess.symtab.symbols[t].modifiers) & Mod::SPECIFIER;
                    let s_spec = (s_mods | sess.symtab.symbols[s].modifiers) & Mod::SPECIFIER;
                    if (t_spec ^ s_spec) == (Mod::SIGNED | Mod::UNSIGNED)
                        && t_spec.contains(Mod::CHAR) == s_spec.contains(Mod::CHAR)
                    {
                        return Some("different signedness");
                    }
                    return Some("different base types");
                }
            }
        }

        // Base types matched; compare qualifiers under the mask.
        let t_q = (t_mods & !target_ignore) & (Mod::CONST | Mod::VOLATILE);
        let s_q = (s_mods & !source_ignore) & (Mod::CONST | Mod::VOLATILE);
        if !t_q.contains(s_q) {
            return Some("different modifiers");
        }
        if t_as != s_as {
            return Some("different address spaces");
        }
        return None;
    }
}

/// Operator classes for the restricted-integer lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictedClass {
    /// `=`, `&`, `|`, `^` and their compound-assignment forms: the
    /// restricted kind flows through.
    Preserving,
    /// `==`/`!=`: validity is kept, the result is a plain int.
    Comparing,
    /// Everything else degrades the value to its base integer.
    Defouling,
}

/// Outcome of combining a restricted operand with something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictedOutcome {
    /// Result keeps the restricted type.
    Preserve,
    /// Valid mix; result is a plain integer.
    Keep,
    /// Invalid mix; result degrades and a diagnostic is due.
    Defoul,
}

pub fn restricted_binop_class(op: Special) -> RestrictedClass {
    use Special::*;
    match op {
        Assign | Amp | Pipe | Caret | AndAssign | OrAssign | XorAssign => {
            RestrictedClass::Preserving
        }
        Equal | NotEqual => RestrictedClass::Comparing,
        _ => RestrictedClass::Defouling,
    }
}

/// What the other operand of a restricted value looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictedPeer {
    SameRestricted,
    ZeroConstant,
    Other,
}

/// The explicit two-dimensional lattice.
pub fn restricted_outcome(class: RestrictedClass, peer: RestrictedPeer) -> RestrictedOutcome {
    use RestrictedClass::*;
    use RestrictedPeer::*;
    match (class, peer) {
        (Preserving, SameRestricted) | (Preserving, ZeroConstant) => RestrictedOutcome::Preserve,
        (Preserving, Other) => RestrictedOutcome::Defoul,
        (Comparing, SameRestricted) | (Comparing, ZeroConstant) => RestrictedOutcome::Keep,
        (Comparing, Other) => RestrictedOutcome::Defoul,
        (Defouling, _) => RestrictedOutcome::Defoul,
    }
}

/// The base integer a restricted/fouled type degrades to.
pub fn unrestrict(sess: &Session, sym: SymbolId) -> SymbolId {
    let base = base_type_of(sess, sym);
    let s = &sess.symtab.symbols[base];
    match s.kind {
        SymKind::Restrict | SymKind::Fouled => s.base_type.unwrap_or(sess.ctypes.int_),
        _ => sym,
    }
}

/// Checks whether an expression is a null pointer constant (integer constant
/// zero, possibly cast to `void *`).
pub fn is_null_pointer_constant(sess: &Session, expr: crate::ast::ExprId) -> bool {
    match &sess.exprs[expr].kind {
        ExprKind::Value { value } => *value == 0,
        ExprKind::Cast { expr: inner, .. } | ExprKind::ImpliedCast { expr: inner, .. } => {
            is_null_pointer_constant(sess, *inner)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Options, Session};

    fn session() -> Session {
        Session::new(Options::default())
    }

    #[test]
    fn builtin_widths_follow_target() {
        let sess = session();
        let c = &sess.ctypes;
        assert_eq!(sess.symtab.symbols[c.char_].bit_size, 8);
        assert_eq!(sess.symtab.symbols[c.int_].bit_size, 32);
        assert_eq!(sess.symtab.symbols[c.long].bit_size, 64);
        assert_eq!(sess.symtab.symbols[c.ptr_void].bit_size, 64);
    }

    #[test]
    fn classification_of_builtins() {
        let sess = session();
        let c = &sess.ctypes;
        assert_eq!(classify(&sess, c.int_), Class::INT);
        assert_eq!(classify(&sess, c.double_), Class::FLOAT);
        assert_eq!(classify(&sess, c.ptr_void), Class::PTR);
        assert_eq!(classify(&sess, c.void), Class::VOID);
        assert!(classify(&sess, c.uint).intersects(Class::NUM));
    }

    #[test]
    fn unsignedness() {
        let sess = session();
        let c = &sess.ctypes;
        assert!(is_unsigned(&sess, c.uint));
        assert!(!is_unsigned(&sess, c.int_));
        assert!(is_unsigned(&sess, c.bool_));
        assert!(is_unsigned(&sess, c.ptr_void));
    }

    #[test]
    fn struct_layout_with_alignment_holes() {
        let mut sess = session();
        // struct { char a; int b; char c; } -> size 12 bytes, align 4.
        let (ca, ib, cc) = (sess.ctypes.char_, sess.ctypes.int_, sess.ctypes.char_);
        let mk_member = |sess: &mut Session, base: SymbolId, name: &str| {
            let id = sess.interner.intern(name);
            let sym = sess.symtab.alloc(SymKind::Node, Position::none());
            sess.symtab.symbols[sym].base_type = Some(base);
            sess.symtab.symbols[sym].ident = Some(id);
            sym
        };
        let a = mk_member(&mut sess, ca, "a");
        let b = mk_member(&mut sess, ib, "b");
        let cm = mk_member(&mut sess, cc, "c");
        let st = sess.symtab.alloc(SymKind::Struct, Position::none());
        sess.symtab.symbols[st].members = vec![a, b, cm];

        examine_symbol_type(&mut sess, st);
        assert_eq!(sess.symtab.symbols[st].bit_size, 96);
        assert_eq!(sess.symtab.symbols[st].alignment, 4);
        assert_eq!(sess.symtab.symbols[a].offset, 0);
        assert_eq!(sess.symtab.symbols[b].offset, 4);
        assert_eq!(sess.symtab.symbols[cm].offset, 8);
    }

    #[test]
    fn bitfields_pack_into_allocation_units() {
        let mut sess = session();
        // struct S { int a:3; int b:5; } -> both in one int unit.
        let mk_bitfield = |sess: &mut Session, width: u32, name: &str| {
            let id = sess.interner.intern(name);
            let bf = sess.symtab.alloc(SymKind::Bitfield, Position::none());
            sess.symtab.symbols[bf].base_type = Some(sess.ctypes.int_);
            sess.symtab.symbols[bf].fieldwidth = width;
            let node = sess.symtab.alloc(SymKind::Node, Position::none());
            sess.symtab.symbols[node].base_type = Some(bf);
            sess.symtab.symbols[node].ident = Some(id);
            node
        };
        let a = mk_bitfield(&mut sess, 3, "a");
        let b = mk_bitfield(&mut sess, 5, "b");
        let st = sess.symtab.alloc(SymKind::Struct, Position::none());
        sess.symtab.symbols[st].members = vec![a, b];

        examine_symbol_type(&mut sess, st);
        assert_eq!(sess.symtab.symbols[a].offset, 0);
        assert_eq!(sess.symtab.symbols[a].bit_offset, 0);
        assert_eq!(sess.symtab.symbols[b].offset, 0);
        assert_eq!(sess.symtab.symbols[b].bit_offset, 3);
        // One int allocation unit, int alignment.
        assert_eq!(sess.symtab.symbols[st].bit_size, 32);
        assert_eq!(sess.symtab.symbols[st].alignment, 4);
    }

    #[test]
    fn zero_width_bitfield_forces_new_unit() {
        let mut sess = session();
        let mk_bitfield = |sess: &mut Session, width: u32, name: Option<&str>| {
            let bf = sess.symtab.alloc(SymKind::Bitfield, Position::none());
            sess.symtab.symbols[bf].base_type = Some(sess.ctypes.int_);
            sess.symtab.symbols[bf].fieldwidth = width;
            let node = sess.symtab.alloc(SymKind::Node, Position::none());
            sess.symtab.symbols[node].base_type = Some(bf);
            if let Some(n) = name {
                let id = sess.interner.intern(n);
                sess.symtab.symbols[node].ident = Some(id);
            }
            node
        };
        let a = mk_bitfield(&mut sess, 3, Some("a"));
        let sep = mk_bitfield(&mut sess, 0, None);
        let b = mk_bitfield(&mut sess, 5, Some("b"));
        let st = sess.symtab.alloc(SymKind::Struct, Position::none());
        sess.symtab.symbols[st].members = vec![a, sep, b];

        examine_symbol_type(&mut sess, st);
        assert_eq!(sess.symtab.symbols[b].offset, 4);
        assert_eq!(sess.symtab.symbols[b].bit_offset, 0);
        assert_eq!(sess.symtab.symbols[st].bit_size, 64);
    }

    #[test]
    fn union_members_share_offset_zero() {
        let mut sess = session();
        let mk_member = |sess: &mut Session, base: SymbolId, name: &str| {
            let id = sess.interner.intern(name);
            let sym = sess.symtab.alloc(SymKind::Node, Position::none());
            sess.symtab.symbols[sym].base_type = Some(base);
            sess.symtab.symbols[sym].ident = Some(id);
            sym
        };
        let char_ty = sess.ctypes.char_;
        let long_ty = sess.ctypes.long;
        let a = mk_member(&mut sess, char_ty, "a");
        let b = mk_member(&mut sess, long_ty, "b");
        let un = sess.symtab.alloc(SymKind::Union, Position::none());
        sess.symtab.symbols[un].members = vec![a, b];

        examine_symbol_type(&mut sess, un);
        assert_eq!(sess.symtab.symbols[a].offset, 0);
        assert_eq!(sess.symtab.symbols[b].offset, 0);
        assert_eq!(sess.symtab.symbols[un].bit_size, 64);
        assert_eq!(sess.symtab.symbols[un].alignment, 8);
    }

    #[test]
    fn pointer_types_compare_through_pointees() {
        let mut sess = session();
        let p1 = {
            let sym = sess.symtab.alloc(SymKind::Ptr, Position::none());
            sess.symtab.symbols[sym].base_type = Some(sess.ctypes.int_);
            sym
        };
        let p2 = {
            let sym = sess.symtab.alloc(SymKind::Ptr, Position::none());
            sess.symtab.symbols[sym].base_type = Some(sess.ctypes.int_);
            sym
        };
        let p3 = {
            let sym = sess.symtab.alloc(SymKind::Ptr, Position::none());
            sess.symtab.symbols[sym].base_type = Some(sess.ctypes.uint);
            sym
        };
        assert!(type_difference(&sess, p1, p2).is_none());
        assert_eq!(type_difference(&sess, p1, p3), Some("different signedness"));
    }

    #[test]
    fn restricted_lattice_is_explicit() {
        use RestrictedClass::*;
        use RestrictedOutcome::*;
        use RestrictedPeer::*;
        assert_eq!(restricted_outcome(Preserving, SameRestricted), Preserve);
        assert_eq!(restricted_outcome(Preserving, ZeroConstant), Preserve);
        assert_eq!(restricted_outcome(Preserving, Other), Defoul);
        assert_eq!(restricted_outcome(Comparing, SameRestricted), Keep);
        assert_eq!(restricted_outcome(Comparing, ZeroConstant), Keep);
        assert_eq!(restricted_outcome(Comparing, Other), Defoul);
        assert_eq!(restricted_outcome(Defouling, SameRestricted), Defoul);
    }

    #[test]
    fn restricted_operator_classes() {
        assert_eq!(
            restricted_binop_class(Special::Assign),
            RestrictedClass::Preserving
        );
        assert_eq!(
            restricted_binop_class(Special::OrAssign),
            RestrictedClass::Preserving
        );
        assert_eq!(
            restricted_binop_class(Special::Equal),
            RestrictedClass::Comparing
        );
        assert_eq!(
            restricted_binop_class(Special::Plus),
            RestrictedClass::Defouling
        );
    }
}
