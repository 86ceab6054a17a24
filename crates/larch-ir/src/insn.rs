//! Instructions and pseudos.
//!
//! A pseudo is an SSA value; an instruction is a flat record: opcode plus
//! the union of per-opcode payload fields, `bb == None` meaning dead. Use
//! slots are addressed by [`UseSlot`] so the use lists on pseudos can point
//! back at the exact operand position that refers to them.

use std::rc::Rc;

use larch_core::{Ident, Idx, Position};
use larch_front::symbol::SymbolId;
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PseudoId(pub u32);

impl Idx for PseudoId {
    fn from_raw(raw: u32) -> Self {
        PseudoId(raw)
    }
    fn raw(self) -> u32 {
        self.0
    }
}

/// The void pseudo is always allocated first.
pub const VOID: PseudoId = PseudoId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InsnId(pub u32);

impl Idx for InsnId {
    fn from_raw(raw: u32) -> Self {
        InsnId(raw)
    }
    fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BbId(pub u32);

impl Idx for BbId {
    fn from_raw(raw: u32) -> Self {
        BbId(raw)
    }
    fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoKind {
    Void,
    Reg,
    Sym,
    Val,
    Arg,
    Phi,
}

/// One SSA value.
#[derive(Debug, Clone)]
pub struct Pseudo {
    pub kind: PseudoKind,
    pub nr: u32,
    /// Defining instruction, for `Reg`/`Phi`.
    pub def: Option<InsnId>,
    /// Backing symbol, for `Sym`.
    pub sym: Option<SymbolId>,
    /// Constant value, for `Val`.
    pub value: i64,
    pub ident: Option<Ident>,
    /// Every operand slot currently referring to this pseudo.
    pub users: Vec<UseRef>,
}

impl Pseudo {
    pub fn new(kind: PseudoKind, nr: u32) -> Self {
        Pseudo {
            kind,
            nr,
            def: None,
            sym: None,
            value: 0,
            ident: None,
            users: Vec::new(),
        }
    }

    /// Void and constant pseudos do not track users.
    pub fn tracks_users(&self) -> bool {
        !matches!(self.kind, PseudoKind::Void | PseudoKind::Val)
    }
}

/// An operand position inside an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseSlot {
    /// The target doubles as an operand for stores and computed gotos.
    Target,
    Src1,
    Src2,
    Src3,
    Func,
    Arg(u16),
    Phi(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseRef {
    pub insn: InsnId,
    pub slot: UseSlot,
}

/// A `(begin, end, target)` switch arm; `begin > end` marks the default.
#[derive(Debug, Clone, Copy)]
pub struct Multijmp {
    pub begin: i64,
    pub end: i64,
    pub target: BbId,
}

impl Multijmp {
    pub fn is_default(&self) -> bool {
        self.begin > self.end
    }

    pub fn matches(&self, value: i64) -> bool {
        self.is_default() || (value >= self.begin && value <= self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Function entry marker.
    Entry,
    // Terminators.
    Ret,
    Br,
    Switch,
    ComputedGoto,
    Unwind,
    Invoke,
    // Binary arithmetic.
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    // Bitwise / boolean.
    And,
    Or,
    Xor,
    AndBool,
    OrBool,
    // Signed compares.
    SetEq,
    SetNe,
    SetLt,
    SetLe,
    SetGt,
    SetGe,
    // Unsigned compares.
    SetB,
    SetBe,
    SetA,
    SetAe,
    // Unaries.
    Not,
    Neg,
    // Memory.
    Load,
    Store,
    Setval,
    GetElementPtr,
    Malloc,
    Free,
    Alloca,
    // SSA.
    Phi,
    PhiSource,
    // Casts.
    Cast,
    SCast,
    FpCast,
    PtrCast,
    // Other.
    Call,
    VaNext,
    VaArg,
    Slice,
    Sel,
    Copy,
    // No-ops left behind by simplification.
    Nop,
    Lnop,
    Snop,
    Asm,
    Context,
    DeathNote,
    Range,
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Ret
                | Opcode::Br
                | Opcode::Switch
                | Opcode::ComputedGoto
                | Opcode::Unwind
                | Opcode::Invoke
        )
    }

    pub fn is_binop(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::AndBool
                | Opcode::OrBool
        )
    }

    pub fn is_compare(self) -> bool {
        matches!(
            self,
            Opcode::SetEq
                | Opcode::SetNe
                | Opcode::SetLt
                | Opcode::SetLe
                | Opcode::SetGt
                | Opcode::SetGe
                | Opcode::SetB
                | Opcode::SetBe
                | Opcode::SetA
                | Opcode::SetAe
        )
    }

    pub fn is_unop(self) -> bool {
        matches!(self, Opcode::Not | Opcode::Neg)
    }

    pub fn is_cast(self) -> bool {
        matches!(
            self,
            Opcode::Cast | Opcode::SCast | Opcode::FpCast | Opcode::PtrCast
        )
    }

    /// The opcode computing the inverted test, for branch inversion.
    pub fn negate(self) -> Option<Opcode> {
        Some(match self {
            Opcode::SetEq => Opcode::SetNe,
            Opcode::SetNe => Opcode::SetEq,
            Opcode::SetLt => Opcode::SetGe,
            Opcode::SetLe => Opcode::SetGt,
            Opcode::SetGt => Opcode::SetLe,
            Opcode::SetGe => Opcode::SetLt,
            Opcode::SetB => Opcode::SetAe,
            Opcode::SetBe => Opcode::SetA,
            Opcode::SetA => Opcode::SetBe,
            Opcode::SetAe => Opcode::SetB,
            _ => return None,
        })
    }

    /// Dump-format mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Entry => "entry",
            Opcode::Ret => "ret",
            Opcode::Br => "br",
            Opcode::Switch => "switch",
            Opcode::ComputedGoto => "jmp",
            Opcode::Unwind => "unwind",
            Opcode::Invoke => "invoke",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::AndBool => "and-bool",
            Opcode::OrBool => "or-bool",
            Opcode::SetEq => "seteq",
            Opcode::SetNe => "setne",
            Opcode::SetLt => "setlt",
            Opcode::SetLe => "setle",
            Opcode::SetGt => "setgt",
            Opcode::SetGe => "setge",
            Opcode::SetB => "setb",
            Opcode::SetBe => "setbe",
            Opcode::SetA => "seta",
            Opcode::SetAe => "setae",
            Opcode::Not => "not",
            Opcode::Neg => "neg",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Setval => "setval",
            Opcode::GetElementPtr => "getelem",
            Opcode::Malloc => "malloc",
            Opcode::Free => "free",
            Opcode::Alloca => "alloca",
            Opcode::Phi => "phi",
            Opcode::PhiSource => "phisrc",
            Opcode::Cast => "cast",
            Opcode::SCast => "scast",
            Opcode::FpCast => "fpcast",
            Opcode::PtrCast => "ptrcast",
            Opcode::Call => "call",
            Opcode::VaNext => "va_next",
            Opcode::VaArg => "va_arg",
            Opcode::Slice => "slice",
            Opcode::Sel => "select",
            Opcode::Copy => "copy",
            Opcode::Nop => "nop",
            Opcode::Lnop => "lnop",
            Opcode::Snop => "snop",
            Opcode::Asm => "asm",
            Opcode::Context => "context",
            Opcode::DeathNote => "deathnote",
            Opcode::Range => "range",
        }
    }
}

/// One three-address instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub pos: Position,
    /// Result width in bits.
    pub size: u32,
    pub ty: Option<SymbolId>,
    /// Containing block; `None` means the instruction is dead.
    pub bb: Option<BbId>,
    /// Result pseudo, or the stored value for `Store`, or the destination
    /// for `ComputedGoto`.
    pub target: PseudoId,
    pub src1: PseudoId,
    pub src2: PseudoId,
    pub src3: PseudoId,
    pub func: PseudoId,
    pub args: SmallVec<[PseudoId; 4]>,
    /// Phi sources, paired index-for-index with the block's parents.
    pub phi_list: SmallVec<[PseudoId; 4]>,
    pub bb_true: Option<BbId>,
    pub bb_false: Option<BbId>,
    pub multijmp: Vec<Multijmp>,
    /// Backing symbol for `Setval` (symbol address) and memops bookkeeping.
    pub symbol: Option<SymbolId>,
    /// Literal payload for `Setval` without a symbol (floats, strings).
    pub val_bits: i64,
    pub string: Option<Rc<[u8]>>,
    /// Byte offset for `Load`/`Store`.
    pub offset: i64,
    /// Bit offset within the loaded unit, for bitfield accesses.
    pub bit_offset: u32,
    /// Source type for casts.
    pub orig_type: Option<SymbolId>,
    /// Context delta.
    pub increment: i32,
}

impl Instruction {
    pub fn new(opcode: Opcode, pos: Position, size: u32) -> Self {
        Instruction {
            opcode,
            pos,
            size,
            ty: None,
            bb: None,
            target: VOID,
            src1: VOID,
            src2: VOID,
            src3: VOID,
            func: VOID,
            args: SmallVec::new(),
            phi_list: SmallVec::new(),
            bb_true: None,
            bb_false: None,
            multijmp: Vec::new(),
            symbol: None,
            val_bits: 0,
            string: None,
            offset: 0,
            bit_offset: 0,
            orig_type: None,
            increment: 0,
        }
    }

    pub fn slot(&self, slot: UseSlot) -> PseudoId {
        match slot {
            UseSlot::Target => self.target,
            UseSlot::Src1 => self.src1,
            UseSlot::Src2 => self.src2,
            UseSlot::Src3 => self.src3,
            UseSlot::Func => self.func,
            UseSlot::Arg(i) => self.args.get(i as usize).copied().unwrap_or(VOID),
            UseSlot::Phi(i) => self.phi_list.get(i as usize).copied().unwrap_or(VOID),
        }
    }

    pub fn set_slot(&mut self, slot: UseSlot, p: PseudoId) {
        match slot {
            UseSlot::Target => self.target = p,
            UseSlot::Src1 => self.src1 = p,
            UseSlot::Src2 => self.src2 = p,
            UseSlot::Src3 => self.src3 = p,
            UseSlot::Func => self.func = p,
            UseSlot::Arg(i) => {
                if let Some(a) = self.args.get_mut(i as usize) {
                    *a = p;
                }
            }
            UseSlot::Phi(i) => {
                if let Some(a) = self.phi_list.get_mut(i as usize) {
                    *a = p;
                }
            }
        }
    }

    /// The operand slots this instruction reads, per opcode shape. The
    /// definition (target) is not included except where the "target" field
    /// is really an operand (stores, computed goto).
    pub fn use_slots(&self) -> SmallVec<[UseSlot; 4]> {
        let mut slots: SmallVec<[UseSlot; 4]> = SmallVec::new();
        match self.opcode {
            Opcode::Ret => {
                if self.src1 != VOID {
                    slots.push(UseSlot::Src1);
                }
            }
            Opcode::Br | Opcode::Switch => {
                if self.src1 != VOID {
                    slots.push(UseSlot::Src1);
                }
            }
            Opcode::ComputedGoto => slots.push(UseSlot::Target),
            op if op.is_binop() || op.is_compare() => {
                slots.push(UseSlot::Src1);
                slots.push(UseSlot::Src2);
            }
            op if op.is_unop() || op.is_cast() => slots.push(UseSlot::Src1),
            Opcode::Sel => {
                slots.push(UseSlot::Src1);
                slots.push(UseSlot::Src2);
                slots.push(UseSlot::Src3);
            }
            Opcode::Load => slots.push(UseSlot::Src1),
            Opcode::Store => {
                slots.push(UseSlot::Target);
                slots.push(UseSlot::Src1);
            }
            Opcode::Setval => {}
            Opcode::Phi => {
                for i in 0..self.phi_list.len() {
                    slots.push(UseSlot::Phi(i as u16));
                }
            }
            Opcode::PhiSource => slots.push(UseSlot::Src1),
            Opcode::Call => {
                slots.push(UseSlot::Func);
                for i in 0..self.args.len() {
                    slots.push(UseSlot::Arg(i as u16));
                }
            }
            Opcode::Slice => slots.push(UseSlot::Src1),
            Opcode::Copy => slots.push(UseSlot::Src1),
            Opcode::Range => {
                slots.push(UseSlot::Src1);
                slots.push(UseSlot::Src2);
                slots.push(UseSlot::Src3);
            }
            _ => {}
        }
        slots
    }

    /// Does this instruction define `target` as an SSA value?
    pub fn has_target(&self) -> bool {
        if self.target == VOID {
            return false;
        }
        !matches!(
            self.opcode,
            Opcode::Store | Opcode::ComputedGoto | Opcode::Br | Opcode::Switch | Opcode::Ret
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_negation_is_involutive() {
        let compares = [
            Opcode::SetEq,
            Opcode::SetNe,
            Opcode::SetLt,
            Opcode::SetLe,
            Opcode::SetGt,
            Opcode::SetGe,
            Opcode::SetB,
            Opcode::SetBe,
            Opcode::SetA,
            Opcode::SetAe,
        ];
        for op in compares {
            let neg = op.negate().unwrap();
            assert_eq!(neg.negate(), Some(op), "{op:?} negation must round-trip");
            assert_ne!(neg, op);
        }
        assert_eq!(Opcode::Add.negate(), None);
    }

    #[test]
    fn terminator_set() {
        assert!(Opcode::Ret.is_terminator());
        assert!(Opcode::Br.is_terminator());
        assert!(Opcode::Switch.is_terminator());
        assert!(!Opcode::Load.is_terminator());
        assert!(!Opcode::Phi.is_terminator());
    }

    #[test]
    fn store_counts_target_as_use() {
        let mut insn = Instruction::new(Opcode::Store, Position::none(), 32);
        insn.target = PseudoId(5);
        insn.src1 = PseudoId(6);
        let slots = insn.use_slots();
        assert!(slots.contains(&UseSlot::Target));
        assert!(slots.contains(&UseSlot::Src1));
        assert!(!insn.has_target());
    }

    #[test]
    fn default_multijmp_matches_everything() {
        let def = Multijmp {
            begin: 1,
            end: 0,
            target: BbId(0),
        };
        assert!(def.is_default());
        assert!(def.matches(-100));
        let range = Multijmp {
            begin: 3,
            end: 7,
            target: BbId(0),
        };
        assert!(range.matches(3) && range.matches(7) && !range.matches(8));
    }
}
