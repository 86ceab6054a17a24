//! Core data-structure layer for the larch C front end.
//!
//! Everything downstream of the tokenizer is built on four primitives that
//! live here:
//!
//! - [`arena`]: typed-index bump arenas with wholesale drop, the allocation
//!   model for every per-translation-unit object graph;
//! - [`list`]: the chunked ring list used for instruction streams and CFG
//!   edge lists, with stable cursors that support delete/replace-current;
//! - [`ident`]: the identifier interner (id equality is name equality);
//! - [`diag`]: positioned diagnostics with severities, dedup, and counters.
//!
//! [`position`] and [`target`] carry the source-position and target-machine
//! models shared by all passes.

pub mod arena;
pub mod diag;
pub mod ident;
pub mod list;
pub mod position;
pub mod target;

pub use arena::{Arena, Idx, Recycler};
pub use diag::{Diagnostic, Diagnostics, FatalError, Severity};
pub use ident::{Ident, Interner};
pub use list::{ChunkList, ListCursor};
pub use position::Position;
pub use target::{Target, WordSize};
