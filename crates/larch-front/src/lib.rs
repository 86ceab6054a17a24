//! C front end: tokenizer, preprocessor, parser, type system, evaluator.
//!
//! All state is threaded through a [`Session`]: the interner, diagnostics
//! sink, target model, macro table, symbol table, and the AST arenas. One
//! `Session` handles one translation unit at a time; re-entrancy is not a
//! goal. [`Session::clear_translation_unit`] drops the per-unit object
//! graphs wholesale between files.
//!
//! The pipeline:
//!
//! ```text
//! tokenize_file -> preprocess -> parse_translation_unit -> evaluate_symbol_list
//! ```
//!
//! after which `larch-ir` takes over with linearization.

pub mod ast;
pub mod evaluate;
pub mod expand;
pub mod expression;
pub mod inline;
pub mod parse;
pub mod pp;
pub mod predefine;
pub mod symbol;
pub mod token;
pub mod tokenizer;
pub mod types;

use std::collections::HashMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use larch_core::{Arena, Diagnostics, FatalError, Ident, Interner, Target, WordSize};

use ast::{Expr, ExprId, Stmt, StmtId};
use pp::Macro;
use predefine::Standard;
use symbol::{SymbolId, SymbolTable};
use token::Token;
use types::Ctypes;

/// Driver configuration the front end honors.
#[derive(Debug, Clone)]
pub struct Options {
    /// `-D name[=value]` predefines, in command-line order.
    pub defines: Vec<(String, Option<String>)>,
    /// `-U name` undefines, applied after the predefines.
    pub undefines: Vec<String>,
    /// `-I dir` include search path, in order.
    pub include_dirs: Vec<PathBuf>,
    /// `-std=`.
    pub standard: Standard,
    /// `-m32`/`-m64`/`-mx32`/`-mllp64`.
    pub word_size: WordSize,
    /// `-f` target switches, e.g. `short-wchar`, `unsigned-char`, `pic=2`.
    pub target_flags: Vec<String>,
    /// `-W`/`-Wno-` toggles by warning name.
    pub warnings: Vec<(String, bool)>,
    /// `-Werror`.
    pub werror: bool,
    /// `-O` level; `255` encodes `-Os`.
    pub opt_level: u8,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            defines: Vec::new(),
            undefines: Vec::new(),
            include_dirs: Vec::new(),
            standard: Standard::default(),
            word_size: WordSize::M64,
            target_flags: Vec::new(),
            warnings: Vec::new(),
            werror: false,
            opt_level: 1,
        }
    }
}

/// Language keywords, registered once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Auto,
    Register,
    Static,
    Extern,
    Typedef,
    Inline,
    Const,
    Volatile,
    Restrict,
    Void,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Signed,
    Unsigned,
    Bool,
    Struct,
    Union,
    Enum,
    If,
    Else,
    While,
    Do,
    For,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Goto,
    Return,
    Sizeof,
    Alignof,
    Typeof,
    Attribute,
    Asm,
    FuncName,
    TypesCompatible,
    Offsetof,
    ChooseExpr,
    Expect,
    ConstantP,
    Context,
    Range,
}

/// Per-stream bookkeeping beyond the name registered with diagnostics.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub path: PathBuf,
    /// Canonicalized path for include dedup.
    pub canonical: Option<PathBuf>,
    /// Include-guard macro inferred for this stream, if any.
    pub guard: Option<Ident>,
}

/// All front-end state for one translation unit at a time.
pub struct Session {
    pub options: Options,
    pub interner: Interner,
    pub diags: Diagnostics,
    pub target: Target,
    pub streams: Vec<StreamInfo>,
    pub macros: IndexMap<Ident, Macro>,
    pub symtab: SymbolTable,
    pub exprs: Arena<ExprId, Expr>,
    pub stmts: Arena<StmtId, Stmt>,
    pub ctypes: Ctypes,
    keywords: HashMap<Ident, Keyword>,
}

impl Session {
    pub fn new(options: Options) -> Self {
        let mut interner = Interner::new();
        let mut diags = Diagnostics::new();
        diags.set_werror(options.werror);
        let mut target = Target::new(options.word_size);
        for flag in &options.target_flags {
            if !target.apply_flag(flag) {
                tracing::debug!(%flag, "ignoring unknown target flag");
            }
        }
        let keywords = register_keywords(&mut interner);
        let mut symtab = SymbolTable::new();
        let ctypes = Ctypes::init(&mut symtab, &target);
        let mut sess = Session {
            options,
            interner,
            diags,
            target,
            streams: Vec::new(),
            macros: IndexMap::new(),
            symtab,
            exprs: Arena::new(),
            stmts: Arena::new(),
            ctypes,
            keywords,
        };
        predefine::predefine_macros(&mut sess);
        sess
    }

    /// The keyword meaning of an identifier, if it has one.
    pub fn keyword(&self, ident: Ident) -> Option<Keyword> {
        self.keywords.get(&ident).copied()
    }

    /// Allocates an expression node.
    pub fn expr(&mut self, expr: Expr) -> ExprId {
        self.exprs.alloc(expr)
    }

    /// Allocates a statement node.
    pub fn stmt(&mut self, stmt: Stmt) -> StmtId {
        self.stmts.alloc(stmt)
    }

    /// Drops the per-translation-unit object graphs; the interner, macro
    /// table, and target model survive.
    pub fn clear_translation_unit(&mut self) {
        self.exprs.clear();
        self.stmts.clear();
        let mut symtab = SymbolTable::new();
        self.ctypes = Ctypes::init(&mut symtab, &self.target);
        self.symtab = symtab;
    }
}

/// Tokenizes one file. See [`tokenizer::tokenize_file`].
pub fn tokenize_file(sess: &mut Session, path: &std::path::Path) -> Result<Vec<Token>, FatalError> {
    tokenizer::tokenize_file(sess, path)
}

/// Expands macros and directives. See [`pp::preprocess`].
pub fn preprocess(sess: &mut Session, tokens: Vec<Token>) -> Vec<Token> {
    pp::preprocess(sess, tokens)
}

/// Parses top-level declarations. See [`parse::parse_translation_unit`].
pub fn parse_translation_unit(sess: &mut Session, tokens: Vec<Token>) -> Vec<SymbolId> {
    parse::parse_translation_unit(sess, tokens)
}

/// Attaches types and folds constants. See [`evaluate::evaluate_symbol_list`].
pub fn evaluate_symbol_list(sess: &mut Session, syms: &[SymbolId]) {
    evaluate::evaluate_symbol_list(sess, syms)
}

fn register_keywords(interner: &mut Interner) -> HashMap<Ident, Keyword> {
    use Keyword::*;
    let mut map = HashMap::new();
    let mut reserve = |interner: &mut Interner, map: &mut HashMap<Ident, Keyword>, names: &[&str], kw: Keyword| {
        for name in names {
            let id = interner.intern_reserved(name);
            map.insert(id, kw);
        }
    };
    reserve(interner, &mut map, &["auto"], Auto);
    reserve(interner, &mut map, &["register"], Register);
    reserve(interner, &mut map, &["static"], Static);
    reserve(interner, &mut map, &["extern"], Extern);
    reserve(interner, &mut map, &["typedef"], Typedef);
    reserve(interner, &mut map, &["inline", "__inline", "__inline__"], Inline);
    reserve(interner, &mut map, &["const", "__const", "__const__"], Const);
    reserve(
        interner,
        &mut map,
        &["volatile", "__volatile", "__volatile__"],
        Volatile,
    );
    reserve(
        interner,
        &mut map,
        &["restrict", "__restrict", "__restrict__"],
        Restrict,
    );
    reserve(interner, &mut map, &["void"], Void);
    reserve(interner, &mut map, &["char"], Char);
    reserve(interner, &mut map, &["short"], Short);
    reserve(interner, &mut map, &["int"], Int);
    reserve(interner, &mut map, &["long"], Long);
    reserve(interner, &mut map, &["float"], Float);
    reserve(interner, &mut map, &["double"], Double);
    reserve(interner, &mut map, &["signed", "__signed", "__signed__"], Signed);
    reserve(interner, &mut map, &["unsigned"], Unsigned);
    reserve(interner, &mut map, &["_Bool"], Bool);
    reserve(interner, &mut map, &["struct"], Struct);
    reserve(interner, &mut map, &["union"], Union);
    reserve(interner, &mut map, &["enum"], Enum);
    reserve(interner, &mut map, &["if"], If);
    reserve(interner, &mut map, &["else"], Else);
    reserve(interner, &mut map, &["while"], While);
    reserve(interner, &mut map, &["do"], Do);
    reserve(interner, &mut map, &["for"], For);
    reserve(interner, &mut map, &["switch"], Switch);
    reserve(interner, &mut map, &["case"], Case);
    reserve(interner, &mut map, &["default"], Default);
    reserve(interner, &mut map, &["break"], Break);
    reserve(interner, &mut map, &["continue"], Continue);
    reserve(interner, &mut map, &["goto"], Goto);
    reserve(interner, &mut map, &["return"], Return);
    reserve(interner, &mut map, &["sizeof"], Sizeof);
    reserve(interner, &mut map, &["__alignof", "__alignof__"], Alignof);
    reserve(
        interner,
        &mut map,
        &["typeof", "__typeof", "__typeof__"],
        Typeof,
    );
    reserve(
        interner,
        &mut map,
        &["__attribute", "__attribute__"],
        Attribute,
    );
    reserve(interner, &mut map, &["asm", "__asm", "__asm__"], Asm);
    reserve(
        interner,
        &mut map,
        &["__func__", "__FUNCTION__", "__PRETTY_FUNCTION__"],
        FuncName,
    );
    reserve(
        interner,
        &mut map,
        &["__builtin_types_compatible_p"],
        TypesCompatible,
    );
    reserve(interner, &mut map, &["__builtin_offsetof"], Offsetof);
    reserve(interner, &mut map, &["__builtin_choose_expr"], ChooseExpr);
    reserve(interner, &mut map, &["__builtin_expect"], Expect);
    reserve(interner, &mut map, &["__builtin_constant_p"], ConstantP);
    reserve(interner, &mut map, &["__context__"], Context);
    reserve(interner, &mut map, &["__range__"], Range);
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_registers_keywords_as_reserved() {
        let sess = Session::new(Options::default());
        let id = sess.interner.lookup("while").unwrap();
        assert!(sess.interner.is_reserved(id));
        assert_eq!(sess.keyword(id), Some(Keyword::While));
    }

    #[test]
    fn keyword_aliases_share_meaning() {
        let sess = Session::new(Options::default());
        let a = sess.interner.lookup("__typeof__").unwrap();
        let b = sess.interner.lookup("typeof").unwrap();
        assert_eq!(sess.keyword(a), Some(Keyword::Typeof));
        assert_eq!(sess.keyword(b), Some(Keyword::Typeof));
    }

    #[test]
    fn plain_identifiers_are_not_keywords() {
        let mut sess = Session::new(Options::default());
        let id = sess.interner.intern("banana");
        assert_eq!(sess.keyword(id), None);
        assert!(!sess.interner.is_reserved(id));
    }
}
