//! SSA mid-end for the larch C front end.
//!
//! Consumes the evaluated AST from `larch-front` and produces, per
//! function, an [`bb::EntryPoint`]: a CFG of basic blocks holding
//! three-address instructions over SSA pseudos. The pipeline:
//!
//! ```text
//! linearize -> memops/promote -> simplify + CSE -> flow -> liveness
//!           -> (optionally) unssa
//! ```
//!
//! driven to a fixpoint by the [`optimize::Repeat`] feedback bits.

pub mod bb;
pub mod cse;
pub mod dump;
pub mod flow;
pub mod insn;
pub mod linearize;
pub mod liveness;
pub mod memops;
pub mod optimize;
pub mod simplify;
pub mod unssa;

pub use bb::{BasicBlock, EntryPoint};
pub use dump::show_entry;
pub use insn::{BbId, InsnId, Instruction, Multijmp, Opcode, Pseudo, PseudoId, PseudoKind, VOID};
pub use linearize::linearize_symbol;
pub use optimize::{lower_out_of_ssa, optimize, Repeat};
