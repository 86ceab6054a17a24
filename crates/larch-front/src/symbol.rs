//! Symbols, namespaces, and scopes.
//!
//! A symbol is one semantic meaning of an identifier: a variable, a type
//! node, a struct tag, a label, a preprocessor macro. Every symbol lives in
//! exactly one namespace; all meanings of one identifier are linked into a
//! chain headed in the [`SymbolTable`], so lookup is a chain walk filtered by
//! a namespace mask and scope exit unlinks in one step per symbol.
//!
//! Symbols double as types: `SymKind::Node` decorates a base type with
//! modifiers, and `Ptr`/`Fn`/`Array`/`Struct`/... form the type graph through
//! `base_type` links.

use std::collections::HashMap;

use bitflags::bitflags;
use larch_core::{Arena, Ident, Idx, Position};

use crate::ast::{ExprId, StmtId};

/// Symbol handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl Idx for SymbolId {
    fn from_raw(raw: u32) -> Self {
        SymbolId(raw)
    }
    fn raw(self) -> u32 {
        self.0
    }
}

/// Scope handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

impl Idx for ScopeId {
    fn from_raw(raw: u32) -> Self {
        ScopeId(raw)
    }
    fn raw(self) -> u32 {
        self.0
    }
}

bitflags! {
    /// Namespaces an identifier can be bound in. Stored as a single bit per
    /// symbol; lookups pass a mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Namespace: u16 {
        const PREPROCESSOR = 1 << 0;
        const TYPEDEF = 1 << 1;
        const STRUCT = 1 << 2;
        const ENUM = 1 << 3;
        const LABEL = 1 << 4;
        const SYMBOL = 1 << 5;
        const ITERATOR = 1 << 6;
    }
}

bitflags! {
    /// Storage class, qualifier, and analysis marker bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Mod: u32 {
        const AUTO = 1 << 0;
        const REGISTER = 1 << 1;
        const STATIC = 1 << 2;
        const EXTERN = 1 << 3;
        const CONST = 1 << 4;
        const VOLATILE = 1 << 5;
        const SIGNED = 1 << 6;
        const UNSIGNED = 1 << 7;
        const CHAR = 1 << 8;
        const SHORT = 1 << 9;
        const LONG = 1 << 10;
        const LONGLONG = 1 << 11;
        const TYPEDEF = 1 << 12;
        const INLINE = 1 << 13;
        const ADDRESSABLE = 1 << 14;
        const NOCAST = 1 << 15;
        const NODEREF = 1 << 16;
        const ACCESSED = 1 << 17;
        const TOPLEVEL = 1 << 18;
        const LABEL = 1 << 19;
        const ASSIGNED = 1 << 20;
        const TYPE = 1 << 21;
        const SAFE = 1 << 22;
    }
}

impl Mod {
    pub const STORAGE: Mod = Mod::AUTO
        .union(Mod::REGISTER)
        .union(Mod::STATIC)
        .union(Mod::EXTERN)
        .union(Mod::INLINE)
        .union(Mod::TOPLEVEL);

    /// Width/signedness specifier bits.
    pub const SPECIFIER: Mod = Mod::SIGNED
        .union(Mod::UNSIGNED)
        .union(Mod::CHAR)
        .union(Mod::SHORT)
        .union(Mod::LONG)
        .union(Mod::LONGLONG);

    /// Bits ignored when comparing types for compatibility.
    pub const IGNORE: Mod = Mod::STORAGE
        .union(Mod::ADDRESSABLE)
        .union(Mod::ACCESSED)
        .union(Mod::ASSIGNED)
        .union(Mod::SAFE)
        .union(Mod::TYPE)
        .union(Mod::LABEL);
}

/// What a symbol is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymKind {
    Uninitialized,
    Preprocessor,
    Basetype,
    Node,
    Ptr,
    Fn,
    Array,
    Struct,
    Union,
    Enum,
    Typedef,
    Typeof,
    Member,
    Bitfield,
    Label,
    Restrict,
    Fouled,
}

/// Sentinel `bit_size` for a type that is not yet complete.
pub const BITS_UNKNOWN: i64 = -1;

/// One semantic meaning of an identifier, and simultaneously one node of the
/// type graph.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub kind: SymKind,
    pub namespace: Namespace,
    pub pos: Position,
    pub ident: Option<Ident>,
    /// Next meaning of the same identifier (the namespace chain).
    pub next_id: Option<SymbolId>,
    pub scope: ScopeId,
    /// Earlier declaration this one was merged with.
    pub same_symbol: Option<SymbolId>,
    /// Substitution target during inline expansion.
    pub replace: Option<SymbolId>,

    // Type machinery.
    pub base_type: Option<SymbolId>,
    pub modifiers: Mod,
    pub alignment: u32,
    pub address_space: u32,
    pub context: i32,
    pub contextmask: u32,

    // Layout.
    pub bit_size: i64,
    pub bit_offset: u32,
    pub offset: i64,
    /// Declared width of a bitfield member.
    pub fieldwidth: u32,
    pub array_size: Option<ExprId>,
    pub examined: bool,

    // Content.
    pub arguments: Vec<SymbolId>,
    pub variadic: bool,
    pub stmt: Option<StmtId>,
    /// Struct/union/enum member symbols, in declaration order.
    pub members: Vec<SymbolId>,
    pub initializer: Option<ExprId>,
    /// Enum member value.
    pub value: i64,
    /// Set for enumerator symbols; they fold to constants on use.
    pub enum_member: bool,
    pub used: bool,
    /// Recursion guard for inline expansion and macro-like evaluation.
    pub busy: bool,
}

impl Symbol {
    pub fn new(kind: SymKind, pos: Position) -> Self {
        Symbol {
            kind,
            namespace: Namespace::empty(),
            pos,
            ident: None,
            next_id: None,
            scope: ScopeId(0),
            same_symbol: None,
            replace: None,
            base_type: None,
            modifiers: Mod::empty(),
            alignment: 0,
            address_space: 0,
            context: 0,
            contextmask: 0,
            bit_size: BITS_UNKNOWN,
            bit_offset: 0,
            offset: 0,
            fieldwidth: 0,
            array_size: None,
            examined: false,
            arguments: Vec::new(),
            variadic: false,
            stmt: None,
            members: Vec::new(),
            initializer: None,
            value: 0,
            enum_member: false,
            used: false,
            busy: false,
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(
            self.kind,
            SymKind::Basetype
                | SymKind::Node
                | SymKind::Ptr
                | SymKind::Fn
                | SymKind::Array
                | SymKind::Struct
                | SymKind::Union
                | SymKind::Enum
                | SymKind::Typedef
                | SymKind::Typeof
                | SymKind::Bitfield
                | SymKind::Restrict
                | SymKind::Fouled
        )
    }
}

/// Kinds of scope on the scope stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    File,
    Function,
    Block,
    Symbol,
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub symbols: Vec<SymbolId>,
}

/// Symbol arena + identifier chains + scope stack.
#[derive(Debug)]
pub struct SymbolTable {
    pub symbols: Arena<SymbolId, Symbol>,
    pub scopes: Arena<ScopeId, Scope>,
    chains: HashMap<Ident, SymbolId>,
    stack: Vec<ScopeId>,
    global_scope: ScopeId,
    file_scope: ScopeId,
    function_scope: Option<ScopeId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut scopes = Arena::new();
        let global_scope = scopes.alloc(Scope {
            kind: ScopeKind::Global,
            parent: None,
            symbols: Vec::new(),
        });
        let file_scope = scopes.alloc(Scope {
            kind: ScopeKind::File,
            parent: Some(global_scope),
            symbols: Vec::new(),
        });
        SymbolTable {
            symbols: Arena::new(),
            scopes,
            chains: HashMap::new(),
            stack: vec![global_scope, file_scope],
            global_scope,
            file_scope,
            function_scope: None,
        }
    }

    pub fn alloc(&mut self, kind: SymKind, pos: Position) -> SymbolId {
        let scope = self.current_scope();
        let mut sym = Symbol::new(kind, pos);
        sym.scope = scope;
        self.symbols.alloc(sym)
    }

    pub fn current_scope(&self) -> ScopeId {
        *self.stack.last().expect("scope stack is never empty")
    }

    pub fn global_scope(&self) -> ScopeId {
        self.global_scope
    }

    pub fn file_scope(&self) -> ScopeId {
        self.file_scope
    }

    pub fn function_scope(&self) -> Option<ScopeId> {
        self.function_scope
    }

    /// True when `scope` is file or global scope.
    pub fn toplevel(&self, scope: ScopeId) -> bool {
        scope == self.file_scope || scope == self.global_scope
    }

    pub fn begin_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let parent = self.current_scope();
        let id = self.scopes.alloc(Scope {
            kind,
            parent: Some(parent),
            symbols: Vec::new(),
        });
        self.stack.push(id);
        if kind == ScopeKind::Function {
            self.function_scope = Some(id);
        }
        id
    }

    /// Pops the current scope, unbinding every symbol it declared.
    pub fn end_scope(&mut self) {
        let id = self.stack.pop().expect("unbalanced scope stack");
        let symbols = std::mem::take(&mut self.scopes[id].symbols);
        for &sym in symbols.iter().rev() {
            self.unbind(sym);
        }
        self.scopes[id].symbols = symbols;
        if Some(id) == self.function_scope {
            self.function_scope = None;
        }
    }

    /// Binds `sym` to `ident` in `namespace` within the current scope.
    pub fn bind(&mut self, sym: SymbolId, ident: Ident, namespace: Namespace) {
        let scope = self.current_scope();
        {
            let s = &mut self.symbols[sym];
            s.ident = Some(ident);
            s.namespace = namespace;
            s.scope = scope;
            s.next_id = self.chains.get(&ident).copied();
        }
        self.chains.insert(ident, sym);
        self.scopes[scope].symbols.push(sym);
    }

    /// Like [`bind`](Self::bind) but into an explicit scope (labels bind at
    /// function scope regardless of block depth).
    pub fn bind_in_scope(
        &mut self,
        sym: SymbolId,
        ident: Ident,
        namespace: Namespace,
        scope: ScopeId,
    ) {
        {
            let s = &mut self.symbols[sym];
            s.ident = Some(ident);
            s.namespace = namespace;
            s.scope = scope;
            s.next_id = self.chains.get(&ident).copied();
        }
        self.chains.insert(ident, sym);
        self.scopes[scope].symbols.push(sym);
    }

    fn unbind(&mut self, sym: SymbolId) {
        let Some(ident) = self.symbols[sym].ident else {
            return;
        };
        let next = self.symbols[sym].next_id;
        match self.chains.get(&ident).copied() {
            Some(head) if head == sym => match next {
                Some(n) => {
                    self.chains.insert(ident, n);
                }
                None => {
                    self.chains.remove(&ident);
                }
            },
            Some(mut cur) => {
                // Unlink from the middle of the chain.
                while let Some(n) = self.symbols[cur].next_id {
                    if n == sym {
                        self.symbols[cur].next_id = next;
                        break;
                    }
                    cur = n;
                }
            }
            None => {}
        }
        self.symbols[sym].next_id = None;
    }

    /// First symbol bound to `ident` in any namespace of `mask`.
    pub fn lookup(&self, ident: Ident, mask: Namespace) -> Option<SymbolId> {
        let mut cur = self.chains.get(&ident).copied();
        while let Some(sym) = cur {
            if self.symbols[sym].namespace.intersects(mask) {
                return Some(sym);
            }
            cur = self.symbols[sym].next_id;
        }
        None
    }

    /// Lookup restricted to a specific scope.
    pub fn lookup_in_scope(
        &self,
        ident: Ident,
        mask: Namespace,
        scope: ScopeId,
    ) -> Option<SymbolId> {
        let mut cur = self.chains.get(&ident).copied();
        while let Some(sym) = cur {
            let s = &self.symbols[sym];
            if s.namespace.intersects(mask) && s.scope == scope {
                return Some(sym);
            }
            cur = self.symbols[sym].next_id;
        }
        None
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(table: &mut larch_core::Interner, name: &str) -> Ident {
        table.intern(name)
    }

    #[test]
    fn bind_and_lookup_by_namespace() {
        let mut interner = larch_core::Interner::new();
        let mut tab = SymbolTable::new();
        let x = ident(&mut interner, "x");

        let var = tab.alloc(SymKind::Node, Position::none());
        tab.bind(var, x, Namespace::SYMBOL);
        let tag = tab.alloc(SymKind::Struct, Position::none());
        tab.bind(tag, x, Namespace::STRUCT);

        assert_eq!(tab.lookup(x, Namespace::SYMBOL), Some(var));
        assert_eq!(tab.lookup(x, Namespace::STRUCT), Some(tag));
        assert_eq!(tab.lookup(x, Namespace::LABEL), None);
        // Mask can cover several namespaces; most recent binding wins.
        assert_eq!(tab.lookup(x, Namespace::SYMBOL | Namespace::STRUCT), Some(tag));
    }

    #[test]
    fn inner_scope_shadows_and_unwinds() {
        let mut interner = larch_core::Interner::new();
        let mut tab = SymbolTable::new();
        let x = ident(&mut interner, "x");

        let outer = tab.alloc(SymKind::Node, Position::none());
        tab.bind(outer, x, Namespace::SYMBOL);

        tab.begin_scope(ScopeKind::Block);
        let inner = tab.alloc(SymKind::Node, Position::none());
        tab.bind(inner, x, Namespace::SYMBOL);
        assert_eq!(tab.lookup(x, Namespace::SYMBOL), Some(inner));
        tab.end_scope();

        assert_eq!(tab.lookup(x, Namespace::SYMBOL), Some(outer));
    }

    #[test]
    fn scope_exit_unlinks_mid_chain_bindings() {
        let mut interner = larch_core::Interner::new();
        let mut tab = SymbolTable::new();
        let x = ident(&mut interner, "x");

        let var = tab.alloc(SymKind::Node, Position::none());
        tab.bind(var, x, Namespace::SYMBOL);

        tab.begin_scope(ScopeKind::Block);
        let tag = tab.alloc(SymKind::Struct, Position::none());
        tab.bind(tag, x, Namespace::STRUCT);
        // A later binding in the same inner scope sits above `tag`.
        let inner_var = tab.alloc(SymKind::Node, Position::none());
        tab.bind(inner_var, x, Namespace::SYMBOL);
        tab.end_scope();

        assert_eq!(tab.lookup(x, Namespace::SYMBOL), Some(var));
        assert_eq!(tab.lookup(x, Namespace::STRUCT), None);
    }

    #[test]
    fn toplevel_covers_file_and_global() {
        let mut tab = SymbolTable::new();
        assert!(tab.toplevel(tab.file_scope()));
        assert!(tab.toplevel(tab.global_scope()));
        let block = tab.begin_scope(ScopeKind::Block);
        assert!(!tab.toplevel(block));
        tab.end_scope();
    }

    #[test]
    fn function_scope_is_tracked() {
        let mut tab = SymbolTable::new();
        assert!(tab.function_scope().is_none());
        let f = tab.begin_scope(ScopeKind::Function);
        assert_eq!(tab.function_scope(), Some(f));
        tab.begin_scope(ScopeKind::Block);
        assert_eq!(tab.function_scope(), Some(f));
        tab.end_scope();
        tab.end_scope();
        assert!(tab.function_scope().is_none());
    }
}
