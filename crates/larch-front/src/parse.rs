//! Recursive-descent parser: declarations, declarators, and statements.
//!
//! Expression parsing lives in [`crate::expression`]; both halves share the
//! [`Parser`] state. The parser binds symbols as it goes (typedef names must
//! be visible to later declaration parsing), evaluates nothing, and never
//! aborts: an unexpected token produces a diagnostic and a skip to the next
//! recovery point.

use larch_core::{Ident, Position};
use smallvec::SmallVec;

use crate::ast::{Expr, ExprId, ExprKind, Stmt, StmtId, StmtKind};
use crate::symbol::{Mod, Namespace, ScopeKind, SymKind, SymbolId};
use crate::token::{Special, Token, TokenKind};
use crate::{Keyword, Session};

/// Parses a preprocessed token stream into top-level symbols.
pub fn parse_translation_unit(sess: &mut Session, tokens: Vec<Token>) -> Vec<SymbolId> {
    let mut parser = Parser {
        sess,
        tokens,
        pos: 0,
        current_fn: None,
        break_label: None,
        continue_label: None,
        switch_cases: Vec::new(),
    };
    let mut syms = Vec::new();
    while !parser.at_eof() {
        let before = parser.pos;
        parser.external_declaration(&mut syms);
        if parser.pos == before {
            // Ensure forward progress on malformed input.
            parser.pos += 1;
        }
    }
    syms
}

pub(crate) struct Parser<'s> {
    pub(crate) sess: &'s mut Session,
    pub(crate) tokens: Vec<Token>,
    pub(crate) pos: usize,
    /// Enclosing function name, for `__func__`.
    pub(crate) current_fn: Option<Ident>,
    pub(crate) break_label: Option<SymbolId>,
    pub(crate) continue_label: Option<SymbolId>,
    /// Case-statement collectors for nested switches.
    pub(crate) switch_cases: Vec<Vec<StmtId>>,
}

/// One declarator suffix, in source order.
enum TypeWrap {
    Array { size: Option<ExprId> },
    Fn { args: Vec<SymbolId>, variadic: bool },
}

impl<'s> Parser<'s> {
    // ----------------------------------------------------------------
    // Token plumbing
    // ----------------------------------------------------------------

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    pub(crate) fn position(&self) -> Position {
        self.peek().pos
    }

    pub(crate) fn at_eof(&self) -> bool {
        self.pos + 1 >= self.tokens.len() || matches!(self.peek().kind, TokenKind::Eof)
    }

    pub(crate) fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn match_op(&mut self, op: Special) -> bool {
        if self.peek().is_special(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn keyword(&self) -> Option<Keyword> {
        self.peek().ident().and_then(|id| self.sess.keyword(id))
    }

    pub(crate) fn match_keyword(&mut self, kw: Keyword) -> bool {
        if self.keyword() == Some(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consumes `op` or reports what was expected.
    pub(crate) fn expect(&mut self, op: Special, context: &str) -> bool {
        if self.match_op(op) {
            return true;
        }
        let pos = self.position();
        self.sess.diags.error(
            pos,
            format!("expected '{}' {}", op.as_str(), context),
        );
        false
    }

    /// Skips to just past `op`, honoring brace nesting, for error recovery.
    pub(crate) fn recover_past(&mut self, op: Special) {
        let mut depth = 0usize;
        while !self.at_eof() {
            let tok = self.advance();
            match tok.kind {
                TokenKind::Special(Special::LBrace) => depth += 1,
                TokenKind::Special(Special::RBrace) => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                TokenKind::Special(s) if s == op && depth == 0 => return,
                _ => {}
            }
        }
    }

    pub(crate) fn alloc_expr(&mut self, pos: Position, kind: ExprKind) -> ExprId {
        self.sess.exprs.alloc(Expr::new(pos, kind))
    }

    pub(crate) fn alloc_stmt(&mut self, pos: Position, kind: StmtKind) -> StmtId {
        self.sess.stmts.alloc(Stmt::new(pos, kind))
    }

    fn alloc_type(&mut self, kind: SymKind, base: Option<SymbolId>) -> SymbolId {
        let pos = self.position();
        let sym = self.sess.symtab.alloc(kind, pos);
        self.sess.symtab.symbols[sym].base_type = base;
        sym
    }

    // ----------------------------------------------------------------
    // Type recognition
    // ----------------------------------------------------------------

    /// Does the current token begin declaration specifiers?
    pub(crate) fn looks_like_type(&self) -> bool {
        match self.keyword() {
            Some(
                Keyword::Auto
                | Keyword::Register
                | Keyword::Static
                | Keyword::Extern
                | Keyword::Typedef
                | Keyword::Inline
                | Keyword::Const
                | Keyword::Volatile
                | Keyword::Restrict
                | Keyword::Void
                | Keyword::Char
                | Keyword::Short
                | Keyword::Int
                | Keyword::Long
                | Keyword::Float
                | Keyword::Double
                | Keyword::Signed
                | Keyword::Unsigned
                | Keyword::Bool
                | Keyword::Struct
                | Keyword::Union
                | Keyword::Enum
                | Keyword::Typeof
                | Keyword::Attribute,
            ) => true,
            Some(_) => false,
            None => match self.peek().ident() {
                Some(id) => {
                    matches!(
                        self.sess
                            .symtab
                            .lookup(id, Namespace::TYPEDEF | Namespace::SYMBOL)
                            .map(|s| self.sess.symtab.symbols[s].namespace),
                        Some(ns) if ns == Namespace::TYPEDEF
                    )
                }
                None => false,
            },
        }
    }

    // ----------------------------------------------------------------
    // Declaration specifiers
    // ----------------------------------------------------------------

    /// Parses declaration specifiers into a base type and modifier set.
    fn declaration_specifiers(&mut self) -> (SymbolId, Mod) {
        #[derive(Default)]
        struct Spec {
            signed: bool,
            unsigned: bool,
            char_: bool,
            short: bool,
            long: u8,
            int_: bool,
            float_: bool,
            double_: bool,
            bool_: bool,
            void: bool,
            other: Option<SymbolId>,
            any: bool,
        }
        let mut spec = Spec::default();
        let mut mods = Mod::empty();
        let mut bitwise = false;
        let pos = self.position();

        loop {
            match self.keyword() {
                Some(Keyword::Auto) => {
                    mods |= Mod::AUTO;
                    self.pos += 1;
                }
                Some(Keyword::Register) => {
                    mods |= Mod::REGISTER;
                    self.pos += 1;
                }
                Some(Keyword::Static) => {
                    mods |= Mod::STATIC;
                    self.pos += 1;
                }
                Some(Keyword::Extern) => {
                    mods |= Mod::EXTERN;
                    self.pos += 1;
                }
                Some(Keyword::Typedef) => {
                    mods |= Mod::TYPEDEF;
                    self.pos += 1;
                }
                Some(Keyword::Inline) => {
                    mods |= Mod::INLINE;
                    self.pos += 1;
                }
                Some(Keyword::Const) => {
                    mods |= Mod::CONST;
                    self.pos += 1;
                }
                Some(Keyword::Volatile) => {
                    mods |= Mod::VOLATILE;
                    self.pos += 1;
                }
                Some(Keyword::Restrict) => {
                    self.pos += 1;
                }
                Some(Keyword::Attribute) => {
                    self.pos += 1;
                    bitwise |= self.skip_attribute();
                }
                Some(Keyword::Signed) => {
                    spec.signed = true;
                    spec.any = true;
                    self.pos += 1;
                }
                Some(Keyword::Unsigned) => {
                    spec.unsigned = true;
                    spec.any = true;
                    self.pos += 1;
                }
                Some(Keyword::Char) => {
                    spec.char_ = true;
                    spec.any = true;
                    self.pos += 1;
                }
                Some(Keyword::Short) => {
                    spec.short = true;
                    spec.any = true;
                    self.pos += 1;
                }
                Some(Keyword::Int) => {
                    spec.int_ = true;
                    spec.any = true;
                    self.pos += 1;
                }
                Some(Keyword::Long) => {
                    spec.long += 1;
                    spec.any = true;
                    self.pos += 1;
                }
                Some(Keyword::Float) => {
                    spec.float_ = true;
                    spec.any = true;
                    self.pos += 1;
                }
                Some(Keyword::Double) => {
                    spec.double_ = true;
                    spec.any = true;
                    self.pos += 1;
                }
                Some(Keyword::Bool) => {
                    spec.bool_ = true;
                    spec.any = true;
                    self.pos += 1;
                }
                Some(Keyword::Void) => {
                    spec.void = true;
                    spec.any = true;
                    self.pos += 1;
                }
                Some(Keyword::Struct) => {
                    self.pos += 1;
                    spec.other = Some(self.struct_or_union(SymKind::Struct));
                    spec.any = true;
                }
                Some(Keyword::Union) => {
                    self.pos += 1;
                    spec.other = Some(self.struct_or_union(SymKind::Union));
                    spec.any = true;
                }
                Some(Keyword::Enum) => {
                    self.pos += 1;
                    spec.other = Some(self.enum_specifier());
                    spec.any = true;
                }
                Some(Keyword::Typeof) => {
                    self.pos += 1;
                    spec.other = Some(self.typeof_specifier());
                    spec.any = true;
                }
                _ => {
                    // A typedef name counts only before any other type
                    // specifier.
                    if !spec.any && spec.other.is_none() {
                        if let Some(id) = self.peek().ident() {
                            if let Some(sym) = self
                                .sess
                                .symtab
                                .lookup(id, Namespace::TYPEDEF | Namespace::SYMBOL)
                            {
                                if self.sess.symtab.symbols[sym].namespace == Namespace::TYPEDEF {
                                    spec.other = self.sess.symtab.symbols[sym].base_type;
                                    spec.any = true;
                                    self.pos += 1;
                                    continue;
                                }
                            }
                        }
                    }
                    break;
                }
            }
        }

        let c = &self.sess.ctypes;
        let base = if let Some(other) = spec.other {
            other
        } else if spec.void {
            c.void
        } else if spec.bool_ {
            c.bool_
        } else if spec.float_ {
            c.float_
        } else if spec.double_ {
            if spec.long > 0 {
                c.ldouble
            } else {
                c.double_
            }
        } else if spec.char_ {
            if spec.unsigned {
                c.uchar
            } else if spec.signed {
                c.schar
            } else {
                c.char_
            }
        } else if spec.short {
            if spec.unsigned {
                c.ushort
            } else {
                c.short
            }
        } else if spec.long >= 2 {
            if spec.unsigned {
                c.ullong
            } else {
                c.llong
            }
        } else if spec.long == 1 {
            if spec.unsigned {
                c.ulong
            } else {
                c.long
            }
        } else if spec.unsigned {
            c.uint
        } else if spec.any {
            c.int_
        } else {
            // No type specifier at all: implicit int, complain.
            self.sess
                .diags
                .warning(pos, "type defaults to 'int' in declaration");
            c.int_
        };
        // A bitwise attribute turns the integer into a restricted kind:
        // an opaque newtype that only unfouling operations preserve.
        if bitwise {
            let restricted = self.alloc_type(SymKind::Restrict, Some(base));
            return (restricted, mods);
        }
        (base, mods)
    }

    /// Skips `(( ... ))` after `__attribute__`, reporting whether a
    /// `bitwise` attribute was present.
    fn skip_attribute(&mut self) -> bool {
        let mut bitwise = false;
        if !self.match_op(Special::LParen) {
            return false;
        }
        let mut depth = 1usize;
        while depth > 0 && !self.at_eof() {
            let tok = self.advance();
            match tok.kind {
                TokenKind::Special(Special::LParen) => depth += 1,
                TokenKind::Special(Special::RParen) => depth -= 1,
                TokenKind::Ident(id) => {
                    let name = self.sess.interner.name(id);
                    if name == "bitwise" || name == "__bitwise__" {
                        bitwise = true;
                    }
                }
                _ => {}
            }
        }
        bitwise
    }

    fn typeof_specifier(&mut self) -> SymbolId {
        let pos = self.position();
        if !self.expect(Special::LParen, "after typeof") {
            return self.sess.ctypes.bad;
        }
        let sym = if self.looks_like_type() {
            self.typename()
        } else {
            let expr = self.parse_expression();
            let t = self.sess.symtab.alloc(SymKind::Typeof, pos);
            self.sess.symtab.symbols[t].initializer = Some(expr);
            t
        };
        self.expect(Special::RParen, "after typeof");
        sym
    }

    // ----------------------------------------------------------------
    // Struct / union / enum
    // ----------------------------------------------------------------

    fn struct_or_union(&mut self, kind: SymKind) -> SymbolId {
        let pos = self.position();
        let tag = self.peek().ident().filter(|id| {
            self.sess.keyword(*id).is_none()
        });
        if tag.is_some() {
            self.pos += 1;
        }

        let sym = match tag {
            Some(id) => match self.sess.symtab.lookup(id, Namespace::STRUCT) {
                Some(existing) if self.sess.symtab.symbols[existing].kind == kind => existing,
                Some(existing) if !self.peek().is_special(Special::LBrace) => existing,
                _ => {
                    let s = self.sess.symtab.alloc(kind, pos);
                    self.sess.symtab.bind(s, id, Namespace::STRUCT);
                    s
                }
            },
            None => self.sess.symtab.alloc(kind, pos),
        };

        if self.match_op(Special::LBrace) {
            if !self.sess.symtab.symbols[sym].members.is_empty() {
                self.sess.diags.error(pos, "redefinition of aggregate");
            }
            let mut members = Vec::new();
            while !self.peek().is_special(Special::RBrace) && !self.at_eof() {
                self.struct_declaration(&mut members);
            }
            self.expect(Special::RBrace, "at end of struct/union");
            self.sess.symtab.symbols[sym].members = members;
            self.sess.symtab.symbols[sym].examined = false;
        }
        sym
    }

    /// One member declaration line, possibly several declarators, possibly
    /// bitfields.
    fn struct_declaration(&mut self, members: &mut Vec<SymbolId>) {
        let (base, mods) = self.declaration_specifiers();
        // Anonymous struct/union member.
        if self.match_op(Special::Semicolon) {
            let kind = self.sess.symtab.symbols[base].kind;
            if matches!(kind, SymKind::Struct | SymKind::Union) {
                let pos = self.position();
                let member = self.sess.symtab.alloc(SymKind::Node, pos);
                self.sess.symtab.symbols[member].base_type = Some(base);
                members.push(member);
            }
            return;
        }
        loop {
            let pos = self.position();
            let (name, mut ty) = self.declarator(base);
            if self.match_op(Special::Colon) {
                let width_expr = self.assignment_expression();
                let width = crate::expand::const_expression_value(self.sess, width_expr)
                    .unwrap_or_else(|| {
                        self.sess.diags.error(pos, "bad bitfield width");
                        1
                    });
                let bf = self.alloc_type(SymKind::Bitfield, Some(ty));
                self.sess.symtab.symbols[bf].fieldwidth = width.max(0) as u32;
                ty = bf;
            }
            let member = self.sess.symtab.alloc(SymKind::Node, pos);
            self.sess.symtab.symbols[member].base_type = Some(ty);
            self.sess.symtab.symbols[member].modifiers = mods & !Mod::STORAGE;
            if let Some(id) = name {
                self.sess.symtab.symbols[member].ident = Some(id);
            }
            members.push(member);
            if !self.match_op(Special::Comma) {
                break;
            }
        }
        if !self.match_op(Special::Semicolon) {
            let pos = self.position();
            self.sess
                .diags
                .error(pos, "expected ';' at end of member declaration");
            self.recover_past(Special::Semicolon);
        }
    }

    fn enum_specifier(&mut self) -> SymbolId {
        let pos = self.position();
        let tag = self.peek().ident().filter(|id| self.sess.keyword(*id).is_none());
        if tag.is_some() {
            self.pos += 1;
        }
        let sym = match tag {
            Some(id) => match self.sess.symtab.lookup(id, Namespace::ENUM) {
                Some(existing) => existing,
                None => {
                    let s = self.sess.symtab.alloc(SymKind::Enum, pos);
                    self.sess.symtab.bind(s, id, Namespace::ENUM);
                    s
                }
            },
            None => self.sess.symtab.alloc(SymKind::Enum, pos),
        };
        self.sess.symtab.symbols[sym].base_type = Some(self.sess.ctypes.int_);

        if self.match_op(Special::LBrace) {
            let mut next_value: i64 = 0;
            let mut members = Vec::new();
            while let Some(id) = self.peek().ident() {
                let mpos = self.position();
                self.pos += 1;
                if self.match_op(Special::Assign) {
                    let value_expr = self.assignment_expression();
                    match crate::expand::const_expression_value(self.sess, value_expr) {
                        Some(v) => next_value = v,
                        None => {
                            self.sess
                                .diags
                                .error(mpos, "bad constant expression in enum");
                        }
                    }
                }
                let member = self.sess.symtab.alloc(SymKind::Node, mpos);
                self.sess.symtab.symbols[member].base_type = Some(sym);
                self.sess.symtab.symbols[member].value = next_value;
                self.sess.symtab.symbols[member].enum_member = true;
                self.sess.symtab.symbols[member].examined = true;
                {
                    let bits = self.sess.symtab.symbols[self.sess.ctypes.int_].bit_size;
                    let align = self.sess.symtab.symbols[self.sess.ctypes.int_].alignment;
                    let m = &mut self.sess.symtab.symbols[member];
                    m.bit_size = bits;
                    m.alignment = align;
                }
                self.sess.symtab.bind(member, id, Namespace::SYMBOL);
                members.push(member);
                next_value = next_value.wrapping_add(1);
                if !self.match_op(Special::Comma) {
                    break;
                }
            }
            self.expect(Special::RBrace, "at end of enum");
            self.sess.symtab.symbols[sym].members = members;
        }
        sym
    }

    // ----------------------------------------------------------------
    // Declarators
    // ----------------------------------------------------------------

    /// Parses a (possibly abstract) declarator against `base`.
    fn declarator(&mut self, base: SymbolId) -> (Option<Ident>, SymbolId) {
        // Pointer prefix, applied innermost-first.
        let mut ptrs: SmallVec<[Mod; 2]> = SmallVec::new();
        while self.match_op(Special::Star) {
            let mut quals = Mod::empty();
            loop {
                match self.keyword() {
                    Some(Keyword::Const) => {
                        quals |= Mod::CONST;
                        self.pos += 1;
                    }
                    Some(Keyword::Volatile) => {
                        quals |= Mod::VOLATILE;
                        self.pos += 1;
                    }
                    Some(Keyword::Restrict) => {
                        self.pos += 1;
                    }
                    _ => break,
                }
            }
            ptrs.push(quals);
        }

        // Direct declarator: name, nested parens, or abstract.
        let mut name = None;
        let mut nested: Option<usize> = None;
        if let Some(id) = self.peek().ident() {
            if self.sess.keyword(id).is_none() {
                name = Some(id);
                self.pos += 1;
            }
        } else if self.peek().is_special(Special::LParen) && self.paren_is_declarator() {
            nested = Some(self.pos);
            self.skip_balanced_parens();
        }

        // Suffixes, applied right-to-left.
        let mut wraps: Vec<TypeWrap> = Vec::new();
        loop {
            if self.match_op(Special::LBracket) {
                let size = if self.peek().is_special(Special::RBracket) {
                    None
                } else {
                    Some(self.assignment_expression())
                };
                self.expect(Special::RBracket, "at end of array declarator");
                wraps.push(TypeWrap::Array { size });
            } else if self.peek().is_special(Special::LParen) && !self.paren_is_declarator() {
                self.pos += 1;
                let (args, variadic) = self.parameter_list();
                wraps.push(TypeWrap::Fn { args, variadic });
            } else {
                break;
            }
        }

        let mut ty = base;
        for quals in ptrs {
            let p = self.alloc_type(SymKind::Ptr, Some(ty));
            self.sess.symtab.symbols[p].modifiers = quals;
            ty = p;
        }
        for wrap in wraps.into_iter().rev() {
            ty = match wrap {
                TypeWrap::Array { size } => {
                    let a = self.alloc_type(SymKind::Array, Some(ty));
                    self.sess.symtab.symbols[a].array_size = size;
                    a
                }
                TypeWrap::Fn { args, variadic } => {
                    let f = self.alloc_type(SymKind::Fn, Some(ty));
                    self.sess.symtab.symbols[f].arguments = args;
                    self.sess.symtab.symbols[f].variadic = variadic;
                    f
                }
            };
        }

        if let Some(open) = nested {
            let after = self.pos;
            self.pos = open + 1;
            let (inner_name, inner_ty) = self.declarator(ty);
            name = inner_name;
            ty = inner_ty;
            self.expect(Special::RParen, "at end of nested declarator");
            self.pos = after;
        }
        (name, ty)
    }

    /// Heuristic: does this `(` open a nested declarator rather than a
    /// parameter list?
    fn paren_is_declarator(&self) -> bool {
        if !self.peek().is_special(Special::LParen) {
            return false;
        }
        let next = self.peek_at(1);
        match &next.kind {
            TokenKind::Special(Special::Star) | TokenKind::Special(Special::LParen) => true,
            TokenKind::Ident(id) => {
                // A plain identifier: nested declarator. A type name: params.
                self.sess.keyword(*id).is_none()
                    && !matches!(
                        self.sess
                            .symtab
                            .lookup(*id, Namespace::TYPEDEF | Namespace::SYMBOL)
                            .map(|s| self.sess.symtab.symbols[s].namespace),
                        Some(ns) if ns == Namespace::TYPEDEF
                    )
            }
            _ => false,
        }
    }

    fn skip_balanced_parens(&mut self) {
        debug_assert!(self.peek().is_special(Special::LParen));
        let mut depth = 0usize;
        while !self.at_eof() {
            match self.advance().kind {
                TokenKind::Special(Special::LParen) => depth += 1,
                TokenKind::Special(Special::RParen) => {
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    /// Parses a parameter list after `(`. Consumes the `)`.
    fn parameter_list(&mut self) -> (Vec<SymbolId>, bool) {
        let mut args = Vec::new();
        let mut variadic = false;
        if self.match_op(Special::RParen) {
            return (args, variadic);
        }
        // `(void)` means exactly no parameters.
        if self.keyword() == Some(Keyword::Void) && self.peek_at(1).is_special(Special::RParen) {
            self.pos += 2;
            return (args, variadic);
        }
        loop {
            if self.match_op(Special::Ellipsis) {
                variadic = true;
                break;
            }
            let pos = self.position();
            let (base, mods) = self.declaration_specifiers();
            let (name, ty) = self.declarator(base);
            let param = self.sess.symtab.alloc(SymKind::Node, pos);
            self.sess.symtab.symbols[param].base_type = Some(ty);
            self.sess.symtab.symbols[param].modifiers = mods & !Mod::STORAGE;
            self.sess.symtab.symbols[param].ident = name;
            args.push(param);
            if !self.match_op(Special::Comma) {
                break;
            }
        }
        self.expect(Special::RParen, "at end of parameter list");
        (args, variadic)
    }

    /// `type-name`: specifiers plus an abstract declarator.
    pub(crate) fn typename(&mut self) -> SymbolId {
        let (base, mods) = self.declaration_specifiers();
        let (name, ty) = self.declarator(base);
        if name.is_some() {
            let pos = self.position();
            self.sess
                .diags
                .warning(pos, "type name should not have an identifier");
        }
        if mods.intersects(Mod::CONST | Mod::VOLATILE) {
            let node = self.alloc_type(SymKind::Node, Some(ty));
            self.sess.symtab.symbols[node].modifiers = mods & (Mod::CONST | Mod::VOLATILE);
            return node;
        }
        ty
    }

    // ----------------------------------------------------------------
    // External declarations
    // ----------------------------------------------------------------

    fn external_declaration(&mut self, syms: &mut Vec<SymbolId>) {
        // Stray semicolons are tolerated.
        if self.match_op(Special::Semicolon) {
            return;
        }
        if self.keyword() == Some(Keyword::Asm) {
            // Top-level asm: parsed and dropped.
            let pos = self.position();
            self.pos += 1;
            let _ = self.asm_statement(pos);
            return;
        }
        let (base, mods) = self.declaration_specifiers();

        // Plain `struct foo;` style declaration.
        if self.match_op(Special::Semicolon) {
            return;
        }

        loop {
            let pos = self.position();
            let (name, ty) = self.declarator(base);
            let sym = self.make_decl_symbol(pos, name, ty, mods, true);

            let is_function = matches!(
                self.sess.symtab.symbols[base_of(self.sess, sym)].kind,
                SymKind::Fn
            );
            if is_function && self.peek().is_special(Special::LBrace) {
                self.function_body(sym);
                syms.push(sym);
                return;
            }

            if self.match_op(Special::Assign) {
                let init = self.initializer();
                self.sess.symtab.symbols[sym].initializer = Some(init);
            }
            syms.push(sym);
            if self.match_op(Special::Comma) {
                continue;
            }
            if !self.match_op(Special::Semicolon) {
                let pos = self.position();
                self.sess
                    .diags
                    .error(pos, "expected ';' at end of declaration");
                self.recover_past(Special::Semicolon);
            }
            return;
        }
    }

    /// Creates and binds the NODE symbol for a declarator.
    fn make_decl_symbol(
        &mut self,
        pos: Position,
        name: Option<Ident>,
        ty: SymbolId,
        mods: Mod,
        toplevel: bool,
    ) -> SymbolId {
        let sym = self.sess.symtab.alloc(SymKind::Node, pos);
        {
            let s = &mut self.sess.symtab.symbols[sym];
            s.base_type = Some(ty);
            s.modifiers = mods;
            if toplevel {
                s.modifiers |= Mod::TOPLEVEL;
            }
        }
        if let Some(id) = name {
            let ns = if mods.contains(Mod::TYPEDEF) {
                Namespace::TYPEDEF
            } else {
                Namespace::SYMBOL
            };
            // Merge with a previous declaration of the same name in the
            // same scope.
            if ns == Namespace::SYMBOL {
                let scope = self.sess.symtab.current_scope();
                if let Some(prev) = self.sess.symtab.lookup_in_scope(id, ns, scope) {
                    self.sess.symtab.symbols[sym].same_symbol = Some(prev);
                }
            } else {
                let scope = self.sess.symtab.current_scope();
                if self.sess.symtab.lookup_in_scope(id, ns, scope).is_some() {
                    let name_str = self.sess.interner.name(id).to_string();
                    self.sess
                        .diags
                        .error(pos, format!("redefinition of typedef '{name_str}'"));
                    return sym;
                }
            }
            self.sess.symtab.bind(sym, id, ns);
        }
        sym
    }

    fn function_body(&mut self, sym: SymbolId) {
        let fn_type = base_of(self.sess, sym);
        self.current_fn = self.sess.symtab.symbols[sym].ident;
        self.sess.symtab.begin_scope(ScopeKind::Function);

        // Bind parameters.
        let args = self.sess.symtab.symbols[fn_type].arguments.clone();
        for arg in &args {
            if let Some(id) = self.sess.symtab.symbols[*arg].ident {
                self.sess.symtab.bind(*arg, id, Namespace::SYMBOL);
            }
        }
        self.sess.symtab.symbols[sym].arguments = args;

        let pos = self.position();
        self.expect(Special::LBrace, "at start of function body");
        let body = self.compound_statement(pos);
        self.sess.symtab.symbols[sym].stmt = Some(body);
        self.sess.symtab.end_scope();
        self.current_fn = None;
    }

    // ----------------------------------------------------------------
    // Statements
    // ----------------------------------------------------------------

    /// `{ ... }`, the opening brace already consumed.
    pub(crate) fn compound_statement(&mut self, pos: Position) -> StmtId {
        self.sess.symtab.begin_scope(ScopeKind::Block);
        let mut stmts = Vec::new();
        while !self.peek().is_special(Special::RBrace) && !self.at_eof() {
            let before = self.pos;
            let stmt = self.statement();
            stmts.push(stmt);
            if self.pos == before {
                self.pos += 1;
            }
        }
        self.expect(Special::RBrace, "at end of compound statement");
        self.sess.symtab.end_scope();
        self.alloc_stmt(pos, StmtKind::Compound { stmts })
    }

    fn local_declaration(&mut self) -> StmtId {
        let pos = self.position();
        let (base, mods) = self.declaration_specifiers();
        let mut syms = Vec::new();
        if !self.peek().is_special(Special::Semicolon) {
            loop {
                let dpos = self.position();
                let (name, ty) = self.declarator(base);
                let sym = self.make_decl_symbol(dpos, name, ty, mods, false);
                if self.match_op(Special::Assign) {
                    let init = self.initializer();
                    self.sess.symtab.symbols[sym].initializer = Some(init);
                }
                syms.push(sym);
                if !self.match_op(Special::Comma) {
                    break;
                }
            }
        }
        if !self.match_op(Special::Semicolon) {
            let p = self.position();
            self.sess
                .diags
                .error(p, "expected ';' at end of declaration");
            self.recover_past(Special::Semicolon);
        }
        self.alloc_stmt(pos, StmtKind::Declaration { syms })
    }

    /// Looks up or creates the label symbol for `name` at function scope.
    pub(crate) fn label_symbol(&mut self, name: Ident) -> SymbolId {
        if let Some(sym) = self.sess.symtab.lookup(name, Namespace::LABEL) {
            return sym;
        }
        let pos = self.position();
        let sym = self.sess.symtab.alloc(SymKind::Label, pos);
        let scope = self
            .sess
            .symtab
            .function_scope()
            .unwrap_or_else(|| self.sess.symtab.current_scope());
        self.sess
            .symtab
            .bind_in_scope(sym, name, Namespace::LABEL, scope);
        sym
    }

    fn alloc_label(&mut self) -> SymbolId {
        let pos = self.position();
        let sym = self.sess.symtab.alloc(SymKind::Label, pos);
        self.sess.symtab.symbols[sym].modifiers |= Mod::LABEL;
        sym
    }

    pub(crate) fn statement(&mut self) -> StmtId {
        let pos = self.position();
        match self.keyword() {
            Some(Keyword::If) => {
                self.pos += 1;
                self.expect(Special::LParen, "after 'if'");
                let cond = self.parse_expression();
                self.expect(Special::RParen, "after if condition");
                let then_stmt = self.statement();
                let else_stmt = if self.match_keyword(Keyword::Else) {
                    Some(self.statement())
                } else {
                    None
                };
                self.alloc_stmt(
                    pos,
                    StmtKind::If {
                        cond,
                        then_stmt,
                        else_stmt,
                    },
                )
            }
            Some(Keyword::While) => {
                self.pos += 1;
                self.expect(Special::LParen, "after 'while'");
                let cond = self.parse_expression();
                self.expect(Special::RParen, "after while condition");
                self.iterator_statement(pos, None, Some(cond), None, Some(cond))
            }
            Some(Keyword::Do) => {
                self.pos += 1;
                let (break_label, continue_label) = (self.alloc_label(), self.alloc_label());
                let body = self.loop_body(break_label, continue_label);
                if !self.match_keyword(Keyword::While) {
                    self.sess
                        .diags
                        .error(pos, "expected 'while' after do-body");
                }
                self.expect(Special::LParen, "after 'while'");
                let cond = self.parse_expression();
                self.expect(Special::RParen, "after do-while condition");
                self.expect(Special::Semicolon, "after do-while");
                self.alloc_stmt(
                    pos,
                    StmtKind::Iterator {
                        pre_statement: None,
                        pre_condition: None,
                        statement: body,
                        post_statement: None,
                        post_condition: Some(cond),
                        break_label,
                        continue_label,
                    },
                )
            }
            Some(Keyword::For) => {
                self.pos += 1;
                self.expect(Special::LParen, "after 'for'");
                self.sess.symtab.begin_scope(ScopeKind::Block);
                let pre_statement = if self.match_op(Special::Semicolon) {
                    None
                } else if self.looks_like_type() {
                    Some(self.local_declaration())
                } else {
                    let e = self.parse_expression();
                    self.expect(Special::Semicolon, "in for loop header");
                    Some(self.alloc_stmt(pos, StmtKind::Expression { expr: e }))
                };
                let pre_condition = if self.peek().is_special(Special::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression())
                };
                self.expect(Special::Semicolon, "in for loop header");
                let post_statement = if self.peek().is_special(Special::RParen) {
                    None
                } else {
                    let e = self.parse_expression();
                    Some(self.alloc_stmt(pos, StmtKind::Expression { expr: e }))
                };
                self.expect(Special::RParen, "at end of for loop header");
                let stmt =
                    self.iterator_statement(pos, pre_statement, pre_condition, post_statement, pre_condition);
                self.sess.symtab.end_scope();
                stmt
            }
            Some(Keyword::Switch) => {
                self.pos += 1;
                self.expect(Special::LParen, "after 'switch'");
                let expr = self.parse_expression();
                self.expect(Special::RParen, "after switch expression");
                let break_label = self.alloc_label();
                let saved_break = self.break_label.replace(break_label);
                self.switch_cases.push(Vec::new());
                let stmt = self.statement();
                let cases = self.switch_cases.pop().unwrap();
                self.break_label = saved_break;
                self.alloc_stmt(
                    pos,
                    StmtKind::Switch {
                        expr,
                        stmt,
                        cases,
                        break_label,
                    },
                )
            }
            Some(Keyword::Case) => {
                self.pos += 1;
                let from = self.assignment_expression();
                let to = if self.match_op(Special::Ellipsis) {
                    Some(self.assignment_expression())
                } else {
                    None
                };
                self.expect(Special::Colon, "after case label");
                let case_label = self.alloc_label();
                let stmt = self.statement();
                let case = self.alloc_stmt(
                    pos,
                    StmtKind::Case {
                        from: Some(from),
                        to,
                        stmt,
                        case_label,
                    },
                );
                match self.switch_cases.last_mut() {
                    Some(cases) => cases.push(case),
                    None => self
                        .sess
                        .diags
                        .error(pos, "case statement not in switch"),
                }
                case
            }
            Some(Keyword::Default) => {
                self.pos += 1;
                self.expect(Special::Colon, "after 'default'");
                let case_label = self.alloc_label();
                let stmt = self.statement();
                let case = self.alloc_stmt(
                    pos,
                    StmtKind::Case {
                        from: None,
                        to: None,
                        stmt,
                        case_label,
                    },
                );
                match self.switch_cases.last_mut() {
                    Some(cases) => cases.push(case),
                    None => self
                        .sess
                        .diags
                        .error(pos, "default statement not in switch"),
                }
                case
            }
            Some(Keyword::Break) => {
                self.pos += 1;
                self.expect(Special::Semicolon, "after 'break'");
                match self.break_label {
                    Some(label) => self.alloc_stmt(
                        pos,
                        StmtKind::Goto {
                            label: Some(label),
                            expr: None,
                        },
                    ),
                    None => {
                        self.sess.diags.error(pos, "break not in loop or switch");
                        self.alloc_stmt(pos, StmtKind::None)
                    }
                }
            }
            Some(Keyword::Continue) => {
                self.pos += 1;
                self.expect(Special::Semicolon, "after 'continue'");
                match self.continue_label {
                    Some(label) => self.alloc_stmt(
                        pos,
                        StmtKind::Goto {
                            label: Some(label),
                            expr: None,
                        },
                    ),
                    None => {
                        self.sess.diags.error(pos, "continue not in loop");
                        self.alloc_stmt(pos, StmtKind::None)
                    }
                }
            }
            Some(Keyword::Goto) => {
                self.pos += 1;
                let stmt = if self.match_op(Special::Star) {
                    // Computed goto.
                    let expr = self.parse_expression();
                    self.alloc_stmt(
                        pos,
                        StmtKind::Goto {
                            label: None,
                            expr: Some(expr),
                        },
                    )
                } else if let Some(id) = self.peek().ident() {
                    self.pos += 1;
                    let label = self.label_symbol(id);
                    self.alloc_stmt(
                        pos,
                        StmtKind::Goto {
                            label: Some(label),
                            expr: None,
                        },
                    )
                } else {
                    self.sess.diags.error(pos, "expected label after goto");
                    self.alloc_stmt(pos, StmtKind::None)
                };
                self.expect(Special::Semicolon, "after goto");
                stmt
            }
            Some(Keyword::Return) => {
                self.pos += 1;
                let expr = if self.peek().is_special(Special::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression())
                };
                self.expect(Special::Semicolon, "after return");
                self.alloc_stmt(pos, StmtKind::Return { expr })
            }
            Some(Keyword::Asm) => {
                self.pos += 1;
                self.asm_statement(pos)
            }
            Some(Keyword::Context) => {
                self.pos += 1;
                self.context_statement(pos)
            }
            Some(Keyword::Range) => {
                self.pos += 1;
                self.range_statement(pos)
            }
            _ => {
                if self.match_op(Special::LBrace) {
                    return self.compound_statement(pos);
                }
                if self.match_op(Special::Semicolon) {
                    return self.alloc_stmt(pos, StmtKind::None);
                }
                // Label?
                if let Some(id) = self.peek().ident() {
                    if self.sess.keyword(id).is_none()
                        && self.peek_at(1).is_special(Special::Colon)
                    {
                        self.pos += 2;
                        let label = self.label_symbol(id);
                        let stmt = self.statement();
                        return self.alloc_stmt(pos, StmtKind::Label { label, stmt });
                    }
                }
                if self.looks_like_type() {
                    return self.local_declaration();
                }
                let expr = self.parse_expression();
                if !self.match_op(Special::Semicolon) {
                    let p = self.position();
                    self.sess
                        .diags
                        .error(p, "expected ';' at end of statement");
                    self.recover_past(Special::Semicolon);
                }
                self.alloc_stmt(pos, StmtKind::Expression { expr })
            }
        }
    }

    fn iterator_statement(
        &mut self,
        pos: Position,
        pre_statement: Option<StmtId>,
        pre_condition: Option<ExprId>,
        post_statement: Option<StmtId>,
        post_condition: Option<ExprId>,
    ) -> StmtId {
        let break_label = self.alloc_label();
        let continue_label = self.alloc_label();
        let statement = self.loop_body(break_label, continue_label);
        self.alloc_stmt(
            pos,
            StmtKind::Iterator {
                pre_statement,
                pre_condition,
                statement,
                post_statement,
                post_condition,
                break_label,
                continue_label,
            },
        )
    }

    fn loop_body(&mut self, break_label: SymbolId, continue_label: SymbolId) -> StmtId {
        let saved_break = self.break_label.replace(break_label);
        let saved_continue = self.continue_label.replace(continue_label);
        let body = self.statement();
        self.break_label = saved_break;
        self.continue_label = saved_continue;
        body
    }

    /// `asm [volatile] ( template : ... )` — the operand lists are consumed
    /// but only the template survives.
    fn asm_statement(&mut self, pos: Position) -> StmtId {
        let mut volatile = false;
        if self.keyword() == Some(Keyword::Volatile) {
            volatile = true;
            self.pos += 1;
        }
        let mut template: std::rc::Rc<[u8]> = std::rc::Rc::from(&b""[..]);
        if self.expect(Special::LParen, "after 'asm'") {
            if let TokenKind::Str { value, .. } = &self.peek().kind {
                template = value.clone();
                self.pos += 1;
            }
            let mut depth = 1usize;
            while depth > 0 && !self.at_eof() {
                match self.advance().kind {
                    TokenKind::Special(Special::LParen) => depth += 1,
                    TokenKind::Special(Special::RParen) => depth -= 1,
                    _ => {}
                }
            }
        }
        self.match_op(Special::Semicolon);
        self.alloc_stmt(pos, StmtKind::Asm { template, volatile })
    }

    /// `__context__(expr, delta)` or `__context__(delta)`.
    fn context_statement(&mut self, pos: Position) -> StmtId {
        self.expect(Special::LParen, "after __context__");
        let first = self.assignment_expression();
        let (expr, increment_expr) = if self.match_op(Special::Comma) {
            (Some(first), self.assignment_expression())
        } else {
            (None, first)
        };
        self.expect(Special::RParen, "after __context__");
        self.expect(Special::Semicolon, "after __context__ statement");
        let increment = crate::expand::const_expression_value(self.sess, increment_expr)
            .unwrap_or(1) as i32;
        self.alloc_stmt(pos, StmtKind::Context { expr, increment })
    }

    /// `__range__(expr, low, high)`.
    fn range_statement(&mut self, pos: Position) -> StmtId {
        self.expect(Special::LParen, "after __range__");
        let expr = self.assignment_expression();
        self.expect(Special::Comma, "in __range__");
        let low = self.assignment_expression();
        self.expect(Special::Comma, "in __range__");
        let high = self.assignment_expression();
        self.expect(Special::RParen, "after __range__");
        self.expect(Special::Semicolon, "after __range__ statement");
        self.alloc_stmt(pos, StmtKind::Range { expr, low, high })
    }

    // ----------------------------------------------------------------
    // Initializers
    // ----------------------------------------------------------------

    pub(crate) fn initializer(&mut self) -> ExprId {
        let pos = self.position();
        if self.match_op(Special::LBrace) {
            let mut entries = Vec::new();
            while !self.peek().is_special(Special::RBrace) && !self.at_eof() {
                entries.push(self.initializer_entry());
                if !self.match_op(Special::Comma) {
                    break;
                }
            }
            self.expect(Special::RBrace, "at end of initializer");
            return self.alloc_expr(pos, ExprKind::InitList { entries });
        }
        self.assignment_expression()
    }

    /// One initializer-list entry, with optional designators.
    fn initializer_entry(&mut self) -> ExprId {
        let pos = self.position();
        if self.peek().is_special(Special::Dot) || self.peek().is_special(Special::LBracket) {
            return self.designated_initializer(pos);
        }
        self.initializer()
    }

    fn designated_initializer(&mut self, pos: Position) -> ExprId {
        if self.match_op(Special::Dot) {
            let member = match self.peek().ident() {
                Some(id) => {
                    self.pos += 1;
                    id
                }
                None => {
                    self.sess
                        .diags
                        .error(pos, "expected member name in designator");
                    self.sess.interner.intern("<bad>")
                }
            };
            let child = self.designator_tail(pos);
            return self.alloc_expr(
                pos,
                ExprKind::MemberDesignator {
                    member,
                    child: Some(child),
                },
            );
        }
        if self.match_op(Special::LBracket) {
            let from = self.assignment_expression();
            let to = if self.match_op(Special::Ellipsis) {
                Some(self.assignment_expression())
            } else {
                None
            };
            self.expect(Special::RBracket, "at end of array designator");
            let child = self.designator_tail(pos);
            return self.alloc_expr(
                pos,
                ExprKind::IndexDesignator {
                    from,
                    to,
                    child: Some(child),
                },
            );
        }
        self.initializer()
    }

    /// After one designator: either more designators, or `=` value.
    fn designator_tail(&mut self, pos: Position) -> ExprId {
        if self.peek().is_special(Special::Dot) || self.peek().is_special(Special::LBracket) {
            return self.designated_initializer(pos);
        }
        if !self.match_op(Special::Assign) {
            self.sess
                .diags
                .error(pos, "expected '=' after designator");
        }
        self.initializer()
    }
}

/// The structural type a declaration symbol refines.
pub(crate) fn base_of(sess: &Session, sym: SymbolId) -> SymbolId {
    sess.symtab.symbols[sym].base_type.unwrap_or(sym)
}
