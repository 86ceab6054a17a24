//! Expression and statement trees.
//!
//! Both trees are arena-allocated and addressed by `ExprId`/`StmtId`. An
//! expression starts life untyped; the evaluator fills in `ctype` bottom-up
//! and downstream passes skip any node whose `ctype` is still `None` (that is
//! the "has type" predicate for error recovery).

use std::rc::Rc;

use bitflags::bitflags;
use larch_core::{Ident, Idx, Position};

use crate::symbol::SymbolId;
use crate::token::Special;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

impl Idx for ExprId {
    fn from_raw(raw: u32) -> Self {
        ExprId(raw)
    }
    fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(pub u32);

impl Idx for StmtId {
    fn from_raw(raw: u32) -> Self {
        StmtId(raw)
    }
    fn raw(self) -> u32 {
        self.0
    }
}

bitflags! {
    /// Compile-time properties established during evaluation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExprFlags: u8 {
        /// Integer constant expression in the ISO sense.
        const INT_CONST = 1 << 0;
        /// Floating literal (or folded floating constant).
        const FLOAT_LIT = 1 << 1;
    }
}

/// One expression node.
#[derive(Debug, Clone)]
pub struct Expr {
    pub pos: Position,
    /// Resolved type; `None` until evaluated (or after a type error).
    pub ctype: Option<SymbolId>,
    pub flags: ExprFlags,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(pos: Position, kind: ExprKind) -> Self {
        Expr {
            pos,
            ctype: None,
            flags: ExprFlags::empty(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Integer constant. The value is kept masked to the width of `ctype`.
    Value { value: u64 },
    /// Floating constant.
    FValue { value: f64 },
    /// String literal (decoded bytes, NUL included).
    Str { value: Rc<[u8]>, wide: bool },
    /// Name that resolved to a symbol, or didn't (`sym == None`).
    Symbol { sym: Option<SymbolId>, ident: Ident },
    /// Type in expression position (cast targets, sizeof arguments,
    /// `__builtin_types_compatible_p` operands).
    TypeRef { sym: SymbolId },
    Binop { op: Special, left: ExprId, right: ExprId },
    Assignment { op: Special, left: ExprId, right: ExprId },
    Logical { op: Special, left: ExprId, right: ExprId },
    Compare { op: Special, left: ExprId, right: ExprId },
    /// Member access after `.` or `->` normalization: `deref` is the
    /// aggregate-valued operand, `member` the field name.
    Deref { deref: ExprId, member: Ident },
    /// Prefix operator: `*` `&` `-` `!` `~` `++` `--`.
    Preop { op: Special, expr: ExprId },
    /// Postfix `++`/`--`.
    Postop { op: Special, expr: ExprId },
    Cast { cast_type: SymbolId, expr: ExprId },
    /// Cast inserted by the evaluator for implicit conversions.
    ImpliedCast { cast_type: SymbolId, expr: ExprId },
    /// `sizeof`, `__alignof__`, and pointer-stride queries. Exactly one of
    /// `type_arg`/`expr` is set.
    Sizeof { type_arg: Option<SymbolId>, expr: Option<ExprId> },
    Alignof { type_arg: Option<SymbolId>, expr: Option<ExprId> },
    PtrSizeof { expr: ExprId },
    /// `cond ? when_true : when_false`; `when_true == None` encodes `a ?: c`.
    Conditional {
        cond: ExprId,
        when_true: Option<ExprId>,
        when_false: ExprId,
    },
    /// Side-effect-free conditional produced by folding.
    Select { cond: ExprId, when_true: ExprId, when_false: ExprId },
    /// Statement expression `({ ... })`.
    StmtExpr { stmt: StmtId },
    Call { func: ExprId, args: Vec<ExprId> },
    Comma { left: ExprId, right: ExprId },
    /// Bitfield access produced by member evaluation.
    Bitfield { base: ExprId, bit_offset: u32, width: u32 },
    /// `&&label`.
    LabelRef { sym: SymbolId },
    /// Brace initializer list, un-normalized.
    InitList { entries: Vec<ExprId> },
    /// `.field` designator (possibly chained through `child`).
    MemberDesignator { member: Ident, child: Option<ExprId> },
    /// `[index]` or `[lo ... hi]` designator.
    IndexDesignator {
        from: ExprId,
        to: Option<ExprId>,
        child: Option<ExprId>,
    },
    /// Normalized initializer piece at a known offset.
    Pos { offset: i64, init: ExprId },
    /// `__builtin_types_compatible_p(t1, t2)`.
    TypesCompatible { left: SymbolId, right: SymbolId },
    /// `__builtin_choose_expr(cond, a, b)`.
    ChooseExpr { cond: ExprId, when_true: ExprId, when_false: ExprId },
    /// `__builtin_offsetof(type, member-chain)`.
    Offsetof { type_arg: SymbolId, designator: ExprId },
    /// `__builtin_expect(value, expected)` — value passes through.
    Expect { value: ExprId, expected: ExprId },
    /// `__builtin_constant_p(e)`.
    ConstantP { expr: ExprId },
}

/// One statement node.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub pos: Position,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(pos: Position, kind: StmtKind) -> Self {
        Stmt { pos, kind }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    None,
    Declaration { syms: Vec<SymbolId> },
    Expression { expr: ExprId },
    Compound { stmts: Vec<StmtId> },
    If {
        cond: ExprId,
        then_stmt: StmtId,
        else_stmt: Option<StmtId>,
    },
    Return { expr: Option<ExprId> },
    /// `case from ... to:`; `from == None` is `default:`.
    Case {
        from: Option<ExprId>,
        to: Option<ExprId>,
        stmt: StmtId,
        /// Label symbol the linearizer targets.
        case_label: SymbolId,
    },
    Switch {
        expr: ExprId,
        stmt: StmtId,
        /// Case label symbols collected while parsing the body.
        cases: Vec<StmtId>,
        break_label: SymbolId,
    },
    /// Unified `for`/`while`/`do`.
    Iterator {
        pre_statement: Option<StmtId>,
        pre_condition: Option<ExprId>,
        statement: StmtId,
        post_statement: Option<StmtId>,
        post_condition: Option<ExprId>,
        break_label: SymbolId,
        continue_label: SymbolId,
    },
    Label { label: SymbolId, stmt: StmtId },
    Goto { label: Option<SymbolId>, expr: Option<ExprId> },
    /// `asm` skeleton: template plus clobber names; enough to survive
    /// linearization as an opaque instruction.
    Asm {
        template: Rc<[u8]>,
        volatile: bool,
    },
    /// `__context__(expr, delta)`.
    Context { expr: Option<ExprId>, increment: i32 },
    /// `__range__(expr, low, high)`.
    Range { expr: ExprId, low: ExprId, high: ExprId },
}
