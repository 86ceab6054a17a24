//! The preprocessor.
//!
//! Works a token worklist front to back: directives are recognized at a `#`
//! that starts a logical line, identifiers bound in the macro table are
//! expanded in place, and expanded token runs are pushed back onto the front
//! of the worklist for rescanning. Self-recursion is prevented by marking a
//! macro busy for the duration of its own rescan; the `Untaint` marker token
//! pushed after the expansion clears the mark when the rescan passes it.
//!
//! Include-guard inference: a stream whose only top-level content is one
//! `#ifndef G ... #endif` wrapper is remembered as guarded by `G`; while `G`
//! stays defined, re-including the file is skipped entirely.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;

use larch_core::{Ident, Position};

use crate::token::{Special, Token, TokenKind};
use crate::tokenizer;
use crate::Session;

/// A macro definition.
#[derive(Debug, Clone)]
pub struct Macro {
    /// `None` for object-like macros.
    pub params: Option<Vec<Ident>>,
    pub variadic: bool,
    /// Body with `MacroArg`/`QuotedArg`/`StrArg`/`Concat` markers resolved.
    pub body: Vec<Token>,
    pub builtin: Option<BuiltinMacro>,
    pub pos: Position,
}

/// Macros whose expansion is computed, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinMacro {
    Line,
    File,
}

/// Expands directives and macros. Returns the surviving tokens, terminated
/// by an `Eof` token.
pub fn preprocess(sess: &mut Session, tokens: Vec<Token>) -> Vec<Token> {
    let mut pp = Preprocessor {
        sess,
        input: VecDeque::from(tokens),
        output: Vec::new(),
        busy: HashSet::new(),
        conds: Vec::new(),
        streams: Vec::new(),
    };
    pp.run();
    let end = pp
        .output
        .last()
        .map(|t| t.pos)
        .unwrap_or_else(Position::none);
    let mut output = pp.output;
    output.push(Token::new(end, TokenKind::Eof));
    output
}

struct Cond {
    pos: Position,
    /// This branch (and all enclosing ones) is live.
    active: bool,
    /// Some branch of this construct has been taken.
    any_taken: bool,
    /// The enclosing context was live when the construct opened.
    parent_active: bool,
    in_else: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState {
    Fresh,
    Candidate { ident: Ident, cond_index: usize },
    Closed { ident: Ident },
    Invalid,
}

struct StreamState {
    stream: u32,
    cond_base: usize,
    guard: GuardState,
}

struct Preprocessor<'s> {
    sess: &'s mut Session,
    input: VecDeque<Token>,
    output: Vec<Token>,
    busy: HashSet<Ident>,
    conds: Vec<Cond>,
    streams: Vec<StreamState>,
}

impl<'s> Preprocessor<'s> {
    fn active(&self) -> bool {
        self.conds.iter().all(|c| c.active)
    }

    fn run(&mut self) {
        while let Some(tok) = self.input.pop_front() {
            match tok.kind {
                TokenKind::StreamBegin(stream) => {
                    self.streams.push(StreamState {
                        stream,
                        cond_base: self.conds.len(),
                        guard: GuardState::Fresh,
                    });
                }
                TokenKind::StreamEnd(stream) => self.end_stream(stream),
                TokenKind::Untaint(id) => {
                    self.busy.remove(&id);
                }
                TokenKind::Special(Special::Hash) if tok.pos.newline => {
                    let line = self.collect_directive_line();
                    self.directive(tok.pos, line);
                }
                _ if !self.active() => {}
                TokenKind::Ident(id) => self.maybe_expand(tok, id),
                TokenKind::Eof => {}
                _ => self.emit(tok),
            }
        }
        for cond in std::mem::take(&mut self.conds) {
            self.sess
                .diags
                .warning(cond.pos, "unterminated preprocessor conditional");
        }
    }

    /// Pops the rest of the current logical line.
    fn collect_directive_line(&mut self) -> Vec<Token> {
        let mut line = Vec::new();
        while let Some(tok) = self.input.front() {
            if tok.pos.newline
                || matches!(
                    tok.kind,
                    TokenKind::StreamBegin(_) | TokenKind::StreamEnd(_) | TokenKind::Eof
                )
            {
                break;
            }
            line.push(self.input.pop_front().unwrap());
        }
        line
    }

    fn emit(&mut self, tok: Token) {
        if let Some(top) = self.streams.last_mut() {
            if self.conds.len() == top.cond_base {
                top.guard = GuardState::Invalid;
            }
        }
        self.output.push(tok);
    }

    fn end_stream(&mut self, stream: u32) {
        let Some(state) = self.streams.pop() else {
            return;
        };
        debug_assert_eq!(state.stream, stream);
        while self.conds.len() > state.cond_base {
            let cond = self.conds.pop().unwrap();
            self.sess
                .diags
                .warning(cond.pos, "unterminated preprocessor conditional");
        }
        if let GuardState::Closed { ident } = state.guard {
            if let Some(info) = self.sess.streams.get_mut(stream as usize) {
                info.guard = Some(ident);
            }
        }
    }

    // ----------------------------------------------------------------
    // Macro expansion
    // ----------------------------------------------------------------

    fn maybe_expand(&mut self, tok: Token, id: Ident) {
        if self.busy.contains(&id) {
            self.sess.interner.set_tainted(id, true);
            self.emit(tok);
            return;
        }
        let Some(mac) = self.sess.macros.get(&id).cloned() else {
            self.emit(tok);
            return;
        };
        if let Some(builtin) = mac.builtin {
            let kind = match builtin {
                BuiltinMacro::Line => TokenKind::Number(Rc::from(tok.pos.line.to_string())),
                BuiltinMacro::File => {
                    let name = self.sess.diags.stream_name(tok.pos.stream).to_string();
                    let mut bytes = name.into_bytes();
                    bytes.push(0);
                    TokenKind::Str {
                        value: Rc::from(bytes.into_boxed_slice()),
                        wide: false,
                    }
                }
            };
            self.emit(Token::new(tok.pos, kind));
            return;
        }

        let substituted = match &mac.params {
            None => self.substitute(&mac, &[], tok.pos),
            Some(params) => {
                if !matches!(
                    self.input.front().map(|t| &t.kind),
                    Some(TokenKind::Special(Special::LParen))
                ) {
                    // Function-like macro without an argument list: plain
                    // identifier.
                    self.emit(tok);
                    return;
                }
                self.input.pop_front();
                let args = self.collect_arguments(params.len(), mac.variadic, tok.pos);
                self.substitute(&mac, &args, tok.pos)
            }
        };

        self.busy.insert(id);
        self.input.push_front(Token::new(tok.pos, TokenKind::Untaint(id)));
        for t in substituted.into_iter().rev() {
            self.input.push_front(t);
        }
    }

    /// Collects macro arguments up to the matching `)`. The variadic rest is
    /// gathered into one final argument, commas included.
    fn collect_arguments(&mut self, nparams: usize, variadic: bool, pos: Position) -> Vec<Vec<Token>> {
        let mut args: Vec<Vec<Token>> = vec![Vec::new()];
        let mut depth = 0usize;
        loop {
            let Some(tok) = self.input.pop_front() else {
                self.sess
                    .diags
                    .error(pos, "unterminated macro argument list");
                break;
            };
            match tok.kind {
                TokenKind::Special(Special::LParen) => {
                    depth += 1;
                    args.last_mut().unwrap().push(tok);
                }
                TokenKind::Special(Special::RParen) => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    args.last_mut().unwrap().push(tok);
                }
                TokenKind::Special(Special::Comma) if depth == 0 => {
                    let in_variadic_rest = variadic && args.len() >= nparams + 1;
                    if in_variadic_rest {
                        args.last_mut().unwrap().push(tok);
                    } else {
                        args.push(Vec::new());
                    }
                }
                TokenKind::StreamEnd(_) | TokenKind::Eof => {
                    self.sess
                        .diags
                        .error(pos, "unterminated macro argument list");
                    self.input.push_front(tok);
                    break;
                }
                _ => args.last_mut().unwrap().push(tok),
            }
        }
        let expected = nparams + usize::from(variadic);
        if args.len() == 1 && args[0].is_empty() && expected == 0 {
            args.clear();
        }
        if args.len() < expected {
            if !(variadic && args.len() == nparams) {
                self.sess.diags.error(
                    pos,
                    format!("macro expects {expected} arguments, got {}", args.len()),
                );
            }
            while args.len() < expected {
                args.push(Vec::new());
            }
        } else if args.len() > expected && expected > 0 {
            self.sess.diags.error(
                pos,
                format!("macro expects {expected} arguments, got {}", args.len()),
            );
            args.truncate(expected);
        }
        args
    }

    /// Substitutes arguments into a macro body and performs `##` pasting.
    fn substitute(&mut self, mac: &Macro, args: &[Vec<Token>], pos: Position) -> Vec<Token> {
        let mut out: Vec<Token> = Vec::new();
        let mut pending_concat = false;

        let mut push_tokens = |out: &mut Vec<Token>, toks: Vec<Token>| {
            out.extend(toks);
        };

        for body_tok in &mac.body {
            match &body_tok.kind {
                TokenKind::Concat => {
                    pending_concat = true;
                    continue;
                }
                _ => {}
            }
            let mut piece: Vec<Token> = match &body_tok.kind {
                TokenKind::MacroArg(n) => {
                    let raw = args.get(*n as usize).cloned().unwrap_or_default();
                    self.expand_tokens(raw)
                }
                TokenKind::QuotedArg(n) => args.get(*n as usize).cloned().unwrap_or_default(),
                TokenKind::StrArg(n) => {
                    let raw = args.get(*n as usize).cloned().unwrap_or_default();
                    vec![self.stringize(&raw, pos)]
                }
                _ => vec![body_tok.clone()],
            };
            for t in &mut piece {
                let whitespace = t.pos.whitespace || body_tok.pos.whitespace;
                t.pos = pos;
                t.pos.newline = false;
                t.pos.whitespace = whitespace;
            }
            if pending_concat {
                pending_concat = false;
                match (out.pop(), piece.first().cloned()) {
                    (Some(left), Some(_)) => {
                        let right = piece.remove(0);
                        let pasted = self.paste(&left, &right, pos);
                        push_tokens(&mut out, pasted);
                        push_tokens(&mut out, piece);
                    }
                    (Some(left), None) => {
                        // Empty right operand: keep the left token.
                        out.push(left);
                    }
                    (None, _) => push_tokens(&mut out, piece),
                }
            } else {
                push_tokens(&mut out, piece);
            }
        }
        out
    }

    /// Re-runs the expansion loop over an owned token list (used for macro
    /// arguments). Directives are not recognized here.
    fn expand_tokens(&mut self, tokens: Vec<Token>) -> Vec<Token> {
        let saved_input = std::mem::replace(&mut self.input, VecDeque::from(tokens));
        let saved_output = std::mem::take(&mut self.output);
        while let Some(tok) = self.input.pop_front() {
            match tok.kind {
                TokenKind::Untaint(id) => {
                    self.busy.remove(&id);
                }
                TokenKind::Ident(id) => self.maybe_expand(tok, id),
                _ => self.output.push(tok),
            }
        }
        let result = std::mem::replace(&mut self.output, saved_output);
        self.input = saved_input;
        result
    }

    fn stringize(&mut self, tokens: &[Token], pos: Position) -> Token {
        let mut text = String::new();
        for (i, tok) in tokens.iter().enumerate() {
            if i > 0 && tok.pos.whitespace {
                text.push(' ');
            }
            text.push_str(&token_text(self.sess, tok));
        }
        let mut bytes = text.into_bytes();
        bytes.push(0);
        Token::new(
            pos,
            TokenKind::Str {
                value: Rc::from(bytes.into_boxed_slice()),
                wide: false,
            },
        )
    }

    /// `##`: concatenate lexemes and re-classify the result.
    fn paste(&mut self, left: &Token, right: &Token, pos: Position) -> Vec<Token> {
        let text = format!(
            "{}{}",
            token_text(self.sess, left),
            token_text(self.sess, right)
        );
        let toks = tokenizer::tokenize_fragment(self.sess, pos, &text);
        if toks.len() == 1 {
            toks
        } else {
            self.sess.diags.error(
                pos,
                format!("pasting \"{text}\" does not give a valid token"),
            );
            vec![left.clone(), right.clone()]
        }
    }

    // ----------------------------------------------------------------
    // Directives
    // ----------------------------------------------------------------

    fn directive(&mut self, pos: Position, line: Vec<Token>) {
        let Some(first) = line.first() else {
            // A lone `#` is the null directive.
            return;
        };
        let name = match first.kind {
            TokenKind::Ident(id) => self.sess.interner.name(id).to_string(),
            _ => {
                if self.active() {
                    self.sess.diags.warning(pos, "unknown preprocessor directive");
                }
                return;
            }
        };
        let rest = &line[1..];
        match name.as_str() {
            "if" => self.do_if(pos, rest),
            "ifdef" => self.do_ifdef(pos, rest, false),
            "ifndef" => self.do_ifdef(pos, rest, true),
            "elif" => self.do_elif(pos, rest),
            "else" => self.do_else(pos),
            "endif" => self.do_endif(pos),
            _ if !self.active() => {}
            "define" => self.do_define(pos, rest),
            "undef" => self.do_undef(pos, rest),
            "include" | "include_next" => self.do_include(pos, rest),
            "warning" => {
                let text = render_message(self.sess, rest);
                self.sess.diags.warning(pos, text);
            }
            "error" => {
                let text = render_message(self.sess, rest);
                self.sess.diags.error(pos, text);
            }
            "pragma" | "line" => {}
            _ => {
                self.invalidate_guard();
                self.sess
                    .diags
                    .warning(pos, format!("unknown preprocessor directive #{name}"));
            }
        }
    }

    fn invalidate_guard(&mut self) {
        if let Some(top) = self.streams.last_mut() {
            if self.conds.len() == top.cond_base {
                top.guard = GuardState::Invalid;
            }
        }
    }

    fn do_if(&mut self, pos: Position, rest: &[Token]) {
        self.invalidate_guard();
        let parent_active = self.active();
        let value = if parent_active {
            self.eval_condition(pos, rest) != 0
        } else {
            false
        };
        self.conds.push(Cond {
            pos,
            active: value,
            any_taken: value || !parent_active,
            parent_active,
            in_else: false,
        });
    }

    fn do_ifdef(&mut self, pos: Position, rest: &[Token], negate: bool) {
        let ident = rest.first().and_then(|t| t.ident());
        let parent_active = self.active();
        // Guard inference: `#ifndef G` as the first top-level content.
        if negate {
            if let (Some(id), Some(top)) = (ident, self.streams.last_mut()) {
                if top.guard == GuardState::Fresh && self.conds.len() == top.cond_base {
                    top.guard = GuardState::Candidate {
                        ident: id,
                        cond_index: self.conds.len(),
                    };
                }
            }
        } else {
            self.invalidate_guard();
        }
        let value = if parent_active {
            match ident {
                Some(id) => {
                    let defined = self.sess.macros.contains_key(&id);
                    defined != negate
                }
                None => {
                    self.sess
                        .diags
                        .warning(pos, "expected identifier after #ifdef/#ifndef");
                    false
                }
            }
        } else {
            false
        };
        self.conds.push(Cond {
            pos,
            active: value,
            any_taken: value || !parent_active,
            parent_active,
            in_else: false,
        });
    }

    fn do_elif(&mut self, pos: Position, rest: &[Token]) {
        // A live #elif that fires needs evaluation before we mutate the
        // stack; compute under the parent context.
        let Some(top_index) = self.conds.len().checked_sub(1) else {
            self.sess.diags.error(pos, "#elif without #if");
            return;
        };
        if self.conds[top_index].in_else {
            self.sess.diags.error(pos, "#elif after #else");
            return;
        }
        let parent_active = self.conds[top_index].parent_active;
        let should_eval = parent_active && !self.conds[top_index].any_taken;
        let value = if should_eval {
            self.eval_condition(pos, rest) != 0
        } else {
            false
        };
        let top = &mut self.conds[top_index];
        top.active = value;
        top.any_taken |= value;
    }

    fn do_else(&mut self, pos: Position) {
        let Some(top) = self.conds.last_mut() else {
            self.sess.diags.error(pos, "#else without #if");
            return;
        };
        if top.in_else {
            self.sess.diags.error(pos, "#else after #else");
            return;
        }
        top.in_else = true;
        top.active = top.parent_active && !top.any_taken;
        top.any_taken = true;
    }

    fn do_endif(&mut self, pos: Position) {
        if self.conds.pop().is_none() {
            self.sess.diags.error(pos, "#endif without #if");
            return;
        }
        if let Some(top) = self.streams.last_mut() {
            if let GuardState::Candidate { ident, cond_index } = top.guard {
                if cond_index == self.conds.len() {
                    top.guard = GuardState::Closed { ident };
                }
            }
        }
    }

    fn do_define(&mut self, pos: Position, rest: &[Token]) {
        self.invalidate_guard();
        let Some(name) = rest.first().and_then(|t| t.ident()) else {
            self.sess.diags.error(pos, "expected macro name after #define");
            return;
        };
        let mut index = 1;
        let mut params: Option<Vec<Ident>> = None;
        let mut variadic = false;
        let mut va_ident: Option<Ident> = None;

        // A parameter list only when the `(` is glued to the name.
        if let Some(tok) = rest.get(index) {
            if tok.is_special(Special::LParen) && !tok.pos.whitespace {
                index += 1;
                let mut list = Vec::new();
                loop {
                    match rest.get(index).map(|t| &t.kind) {
                        Some(TokenKind::Special(Special::RParen)) => {
                            index += 1;
                            break;
                        }
                        Some(TokenKind::Special(Special::Ellipsis)) => {
                            variadic = true;
                            index += 1;
                        }
                        Some(TokenKind::Ident(id)) => {
                            let id = *id;
                            index += 1;
                            if matches!(
                                rest.get(index).map(|t| &t.kind),
                                Some(TokenKind::Special(Special::Ellipsis))
                            ) {
                                // GNU named variadic parameter.
                                variadic = true;
                                va_ident = Some(id);
                                index += 1;
                            } else {
                                list.push(id);
                            }
                        }
                        Some(TokenKind::Special(Special::Comma)) => index += 1,
                        _ => {
                            self.sess
                                .diags
                                .error(pos, "malformed macro parameter list");
                            break;
                        }
                    }
                }
                params = Some(list);
            }
        }

        let body_tokens = &rest[index..];
        let body = self.build_body(body_tokens, params.as_deref(), variadic, va_ident, pos);
        let mac = Macro {
            params,
            variadic,
            body,
            builtin: None,
            pos,
        };
        if let Some(old) = self.sess.macros.get(&name) {
            if !macro_bodies_match(old, &mac) {
                let name_str = self.sess.interner.name(name).to_string();
                self.sess
                    .diags
                    .warning(pos, format!("preprocessor token {name_str} redefined"));
            }
        }
        self.sess.macros.insert(name, mac);
    }

    /// Resolves parameter references and `#`/`##` markers in a macro body.
    fn build_body(
        &mut self,
        tokens: &[Token],
        params: Option<&[Ident]>,
        variadic: bool,
        va_ident: Option<Ident>,
        pos: Position,
    ) -> Vec<Token> {
        let va_args = self.sess.interner.intern("__VA_ARGS__");
        let arg_index = |id: Ident| -> Option<u8> {
            if let Some(params) = params {
                if let Some(i) = params.iter().position(|&p| p == id) {
                    return Some(i as u8);
                }
                if variadic && (id == va_args || Some(id) == va_ident) {
                    return Some(params.len() as u8);
                }
            }
            None
        };

        let mut body: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let tok = &tokens[i];
            match &tok.kind {
                TokenKind::Special(Special::Hash) if params.is_some() => {
                    match tokens.get(i + 1).and_then(|t| t.ident()).and_then(arg_index) {
                        Some(n) => {
                            body.push(Token::new(tok.pos, TokenKind::StrArg(n)));
                            i += 2;
                        }
                        None => {
                            self.sess
                                .diags
                                .error(pos, "'#' is not followed by a macro parameter");
                            body.push(tok.clone());
                            i += 1;
                        }
                    }
                }
                TokenKind::Special(Special::HashHash) => {
                    if body.is_empty() || i + 1 == tokens.len() {
                        self.sess
                            .diags
                            .error(pos, "'##' cannot appear at either end of a macro expansion");
                    } else {
                        body.push(Token::new(tok.pos, TokenKind::Concat));
                    }
                    i += 1;
                }
                TokenKind::Ident(id) => {
                    match arg_index(*id) {
                        Some(n) => body.push(Token::new(tok.pos, TokenKind::MacroArg(n))),
                        None => body.push(tok.clone()),
                    }
                    i += 1;
                }
                _ => {
                    body.push(tok.clone());
                    i += 1;
                }
            }
        }
        // Operands of `##` must not pre-expand.
        for i in 0..body.len() {
            if matches!(body[i].kind, TokenKind::Concat) {
                if i > 0 {
                    if let TokenKind::MacroArg(n) = body[i - 1].kind {
                        body[i - 1].kind = TokenKind::QuotedArg(n);
                    }
                }
                if i + 1 < body.len() {
                    if let TokenKind::MacroArg(n) = body[i + 1].kind {
                        body[i + 1].kind = TokenKind::QuotedArg(n);
                    }
                }
            }
        }
        body
    }

    fn do_undef(&mut self, pos: Position, rest: &[Token]) {
        self.invalidate_guard();
        match rest.first().and_then(|t| t.ident()) {
            Some(id) => {
                self.sess.macros.shift_remove(&id);
            }
            None => self
                .sess
                .diags
                .error(pos, "expected macro name after #undef"),
        }
    }

    fn do_include(&mut self, pos: Position, rest: &[Token]) {
        self.invalidate_guard();
        let (name, quoted) = match self.include_name(rest) {
            Some(v) => v,
            None => {
                self.sess
                    .diags
                    .error(pos, "expected filename after #include");
                return;
            }
        };
        let Some(path) = self.find_include(&name, quoted) else {
            self.sess
                .diags
                .error(pos, format!("unable to open '{name}'"));
            return;
        };
        match tokenizer::tokenize_file(self.sess, &path) {
            Ok(tokens) => {
                for t in tokens.into_iter().rev() {
                    self.input.push_front(t);
                }
            }
            Err(e) => {
                self.sess.diags.error(pos, e.message);
            }
        }
    }

    fn include_name(&mut self, rest: &[Token]) -> Option<(String, bool)> {
        match rest.first().map(|t| &t.kind) {
            Some(TokenKind::Str { value, .. }) => {
                let bytes = &value[..value.len().saturating_sub(1)];
                Some((String::from_utf8_lossy(bytes).into_owned(), true))
            }
            Some(TokenKind::Special(Special::Lt)) => {
                let mut name = String::new();
                for tok in &rest[1..] {
                    if tok.is_special(Special::Gt) {
                        return Some((name, false));
                    }
                    name.push_str(&token_text(self.sess, tok));
                }
                None
            }
            Some(_) => {
                // Macro-expanded form.
                let expanded = self.expand_tokens(rest.to_vec());
                if expanded.iter().map(|t| &t.kind).eq(rest.iter().map(|t| &t.kind)) {
                    return None;
                }
                self.include_name(&expanded)
            }
            None => None,
        }
    }

    fn find_include(&self, name: &str, quoted: bool) -> Option<PathBuf> {
        if quoted {
            // The including file's directory first.
            if let Some(state) = self.streams.last() {
                if let Some(info) = self.sess.streams.get(state.stream as usize) {
                    if let Some(dir) = info.path.parent() {
                        let candidate = dir.join(name);
                        if candidate.is_file() {
                            return Some(candidate);
                        }
                    }
                }
            }
        }
        for dir in &self.sess.options.include_dirs {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        // A plain relative path as a last resort.
        let p = PathBuf::from(name);
        if p.is_file() {
            Some(p)
        } else {
            None
        }
    }

    // ----------------------------------------------------------------
    // #if expression evaluation
    // ----------------------------------------------------------------

    fn eval_condition(&mut self, pos: Position, rest: &[Token]) -> i64 {
        // `defined` is resolved before any macro expansion.
        let mut resolved: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < rest.len() {
            let tok = &rest[i];
            let is_defined = tok
                .ident()
                .map(|id| self.sess.interner.name(id) == "defined")
                .unwrap_or(false);
            if is_defined {
                let (target, consumed) = match rest.get(i + 1).map(|t| &t.kind) {
                    Some(TokenKind::Ident(id)) => (Some(*id), 2),
                    Some(TokenKind::Special(Special::LParen)) => {
                        match (rest.get(i + 2).and_then(|t| t.ident()), rest.get(i + 3)) {
                            (Some(id), Some(t)) if t.is_special(Special::RParen) => {
                                (Some(id), 4)
                            }
                            _ => (None, 1),
                        }
                    }
                    _ => (None, 1),
                };
                match target {
                    Some(id) => {
                        let value = if self.sess.macros.contains_key(&id) { "1" } else { "0" };
                        resolved.push(Token::new(tok.pos, TokenKind::Number(Rc::from(value))));
                        i += consumed;
                    }
                    None => {
                        self.sess
                            .diags
                            .warning(pos, "malformed 'defined' in preprocessor conditional");
                        i += consumed;
                    }
                }
            } else {
                resolved.push(tok.clone());
                i += 1;
            }
        }
        let expanded = self.expand_tokens(resolved);
        let mut parser = CondExpr {
            sess: &mut *self.sess,
            tokens: &expanded,
            pos: 0,
            at: pos,
        };
        let value = parser.ternary();
        if parser.pos < parser.tokens.len() {
            self.sess
                .diags
                .warning(pos, "trailing garbage in preprocessor conditional");
        }
        value
    }
}

fn macro_bodies_match(a: &Macro, b: &Macro) -> bool {
    a.params == b.params
        && a.variadic == b.variadic
        && a.body.len() == b.body.len()
        && a.body
            .iter()
            .zip(b.body.iter())
            .all(|(x, y)| x.kind == y.kind)
}

/// Renders tokens back to text for `#warning`/`#error` and stringization.
pub fn token_text(sess: &Session, tok: &Token) -> String {
    match &tok.kind {
        TokenKind::Ident(id) => sess.interner.name(*id).to_string(),
        TokenKind::Number(s) => s.to_string(),
        TokenKind::Special(op) => op.as_str().to_string(),
        TokenKind::Char { value, wide } => {
            let body = escape_char((*value & 0xff) as u8);
            format!("{}'{}'", if *wide { "L" } else { "" }, body)
        }
        TokenKind::Str { value, wide } => {
            let mut out = String::new();
            if *wide {
                out.push('L');
            }
            out.push('"');
            for &b in &value[..value.len().saturating_sub(1)] {
                out.push_str(&escape_char(b));
            }
            out.push('"');
            out
        }
        TokenKind::Error(b) => (*b as char).to_string(),
        _ => String::new(),
    }
}

fn escape_char(b: u8) -> String {
    match b {
        b'\n' => "\\n".to_string(),
        b'\t' => "\\t".to_string(),
        b'"' => "\\\"".to_string(),
        b'\\' => "\\\\".to_string(),
        0x20..=0x7e => (b as char).to_string(),
        _ => format!("\\x{b:02x}"),
    }
}

fn render_message(sess: &Session, tokens: &[Token]) -> String {
    let mut text = String::new();
    for (i, tok) in tokens.iter().enumerate() {
        if i > 0 && tok.pos.whitespace {
            text.push(' ');
        }
        text.push_str(&token_text(sess, tok));
    }
    text
}

/// Recursive-descent evaluator for `#if` expressions.
struct CondExpr<'a, 's> {
    sess: &'s mut Session,
    tokens: &'a [Token],
    pos: usize,
    at: Position,
}

impl<'a, 's> CondExpr<'a, 's> {
    fn peek_op(&self) -> Option<Special> {
        match self.tokens.get(self.pos).map(|t| &t.kind) {
            Some(TokenKind::Special(op)) => Some(*op),
            _ => None,
        }
    }

    fn eat(&mut self, op: Special) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ternary(&mut self) -> i64 {
        let cond = self.logical_or();
        if self.eat(Special::Question) {
            let then = self.ternary();
            if !self.eat(Special::Colon) {
                self.sess
                    .diags
                    .warning(self.at, "expected ':' in preprocessor conditional");
            }
            let otherwise = self.ternary();
            return if cond != 0 { then } else { otherwise };
        }
        cond
    }

    fn binary_level(&mut self, level: u8) -> i64 {
        if level == 10 {
            return self.unary();
        }
        let ops: &[Special] = match level {
            0 => &[Special::LogicalOr],
            1 => &[Special::LogicalAnd],
            2 => &[Special::Pipe],
            3 => &[Special::Caret],
            4 => &[Special::Amp],
            5 => &[Special::Equal, Special::NotEqual],
            6 => &[Special::Lt, Special::Gt, Special::Lte, Special::Gte],
            7 => &[Special::Shl, Special::Shr],
            8 => &[Special::Plus, Special::Minus],
            _ => &[Special::Star, Special::Slash, Special::Percent],
        };
        let mut left = self.binary_level(level + 1);
        while let Some(op) = self.peek_op() {
            if !ops.contains(&op) {
                break;
            }
            self.pos += 1;
            let right = self.binary_level(level + 1);
            left = self.apply(op, left, right);
        }
        left
    }

    fn logical_or(&mut self) -> i64 {
        self.binary_level(0)
    }

    fn apply(&mut self, op: Special, left: i64, right: i64) -> i64 {
        use Special::*;
        match op {
            LogicalOr => ((left != 0) || (right != 0)) as i64,
            LogicalAnd => ((left != 0) && (right != 0)) as i64,
            Pipe => left | right,
            Caret => left ^ right,
            Amp => left & right,
            Equal => (left == right) as i64,
            NotEqual => (left != right) as i64,
            Lt => (left < right) as i64,
            Gt => (left > right) as i64,
            Lte => (left <= right) as i64,
            Gte => (left >= right) as i64,
            Shl => left.wrapping_shl(right as u32 & 63),
            Shr => left.wrapping_shr(right as u32 & 63),
            Plus => left.wrapping_add(right),
            Minus => left.wrapping_sub(right),
            Star => left.wrapping_mul(right),
            Slash => {
                if right == 0 {
                    self.sess
                        .diags
                        .error(self.at, "division by zero in preprocessor conditional");
                    0
                } else {
                    left.wrapping_div(right)
                }
            }
            Percent => {
                if right == 0 {
                    self.sess
                        .diags
                        .error(self.at, "division by zero in preprocessor conditional");
                    0
                } else {
                    left.wrapping_rem(right)
                }
            }
            _ => 0,
        }
    }

    fn unary(&mut self) -> i64 {
        if self.eat(Special::Bang) {
            return (self.unary() == 0) as i64;
        }
        if self.eat(Special::Tilde) {
            return !self.unary();
        }
        if self.eat(Special::Minus) {
            return self.unary().wrapping_neg();
        }
        if self.eat(Special::Plus) {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> i64 {
        match self.tokens.get(self.pos).map(|t| t.kind.clone()) {
            Some(TokenKind::Special(Special::LParen)) => {
                self.pos += 1;
                let v = self.ternary();
                if !self.eat(Special::RParen) {
                    self.sess
                        .diags
                        .warning(self.at, "missing ')' in preprocessor conditional");
                }
                v
            }
            Some(TokenKind::Number(lexeme)) => {
                self.pos += 1;
                pp_number_value(self.sess, &lexeme, self.at)
            }
            Some(TokenKind::Char { value, .. }) => {
                self.pos += 1;
                (value & 0xff) as i64
            }
            Some(TokenKind::Ident(_)) => {
                // Undefined identifiers evaluate to zero.
                self.pos += 1;
                0
            }
            _ => {
                self.sess
                    .diags
                    .warning(self.at, "bad expression in preprocessor conditional");
                self.pos += 1;
                0
            }
        }
    }
}

/// Integer value of a numeric lexeme for `#if` purposes.
fn pp_number_value(sess: &mut Session, lexeme: &str, pos: Position) -> i64 {
    let trimmed = lexeme.trim_end_matches(|c| matches!(c, 'u' | 'U' | 'l' | 'L'));
    let (digits, radix) = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        (hex, 16)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        (&trimmed[1..], 8)
    } else {
        (trimmed, 10)
    };
    match u64::from_str_radix(digits, radix) {
        Ok(v) => v as i64,
        Err(_) => {
            sess.diags
                .warning(pos, format!("bad constant expression term '{lexeme}'"));
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize_stream;
    use crate::{Options, Session, StreamInfo};

    fn pp(src: &str) -> (Session, Vec<Token>) {
        let mut sess = Session::new(Options::default());
        let stream = sess.diags.register_stream("test.c");
        sess.streams.push(StreamInfo {
            path: "test.c".into(),
            canonical: None,
            guard: None,
        });
        let tokens = tokenize_stream(&mut sess, stream, src.as_bytes());
        let out = preprocess(&mut sess, tokens);
        (sess, out)
    }

    fn text(sess: &Session, tokens: &[Token]) -> String {
        let mut out = String::new();
        for tok in tokens {
            if matches!(tok.kind, TokenKind::Eof) {
                break;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&token_text(sess, tok));
        }
        out
    }

    #[test]
    fn object_macro_expands() {
        let (sess, toks) = pp("#define N 42\nint x = N;");
        assert_eq!(text(&sess, &toks), "int x = 42 ;");
    }

    #[test]
    fn function_macro_substitutes_arguments() {
        let (sess, toks) = pp("#define ADD(a, b) ((a) + (b))\nADD(1, 2)");
        assert_eq!(text(&sess, &toks), "( ( 1 ) + ( 2 ) )");
    }

    #[test]
    fn function_macro_without_parens_is_plain() {
        let (sess, toks) = pp("#define F(x) x\nint F = 3;");
        assert_eq!(text(&sess, &toks), "int F = 3 ;");
    }

    #[test]
    fn nested_expansion_rescans() {
        let (sess, toks) = pp("#define A B\n#define B 7\nA");
        assert_eq!(text(&sess, &toks), "7");
    }

    #[test]
    fn self_recursion_is_stopped() {
        let (sess, toks) = pp("#define X X + 1\nX");
        assert_eq!(text(&sess, &toks), "X + 1");
    }

    #[test]
    fn mutual_recursion_is_stopped() {
        let (sess, toks) = pp("#define A B\n#define B A\nA");
        assert_eq!(text(&sess, &toks), "A");
    }

    #[test]
    fn stringize() {
        let (sess, toks) = pp("#define S(x) #x\nS(a + b)");
        assert_eq!(text(&sess, &toks), "\"a + b\"");
    }

    #[test]
    fn token_paste_reclassifies() {
        let (sess, toks) = pp("#define GLUE(a, b) a ## b\nGLUE(foo, bar) GLUE(1, 2)");
        assert_eq!(text(&sess, &toks), "foobar 12");
    }

    #[test]
    fn conditional_taken_and_skipped() {
        let (sess, toks) = pp("#define ON 1\n#if ON\nyes\n#else\nno\n#endif");
        assert_eq!(text(&sess, &toks), "yes");

        let (sess2, toks2) = pp("#if 0\nyes\n#elif 1\nmiddle\n#else\nno\n#endif");
        assert_eq!(text(&sess2, &toks2), "middle");
    }

    #[test]
    fn ifdef_and_undef() {
        let (sess, toks) = pp("#define X\n#undef X\n#ifdef X\na\n#endif\n#ifndef X\nb\n#endif");
        assert_eq!(text(&sess, &toks), "b");
    }

    #[test]
    fn defined_operator() {
        let (sess, toks) = pp("#define X 0\n#if defined(X) && defined X\nyes\n#endif");
        assert_eq!(text(&sess, &toks), "yes");
    }

    #[test]
    fn if_arithmetic() {
        let (sess, toks) = pp("#if (3 + 4) * 2 == 14 && (1 << 4) == 0x10\nok\n#endif");
        assert_eq!(text(&sess, &toks), "ok");
    }

    #[test]
    fn undefined_ident_in_if_is_zero() {
        let (sess, toks) = pp("#if NOT_DEFINED\nbad\n#else\ngood\n#endif");
        assert_eq!(text(&sess, &toks), "good");
    }

    #[test]
    fn unterminated_conditional_warns() {
        let (sess, toks) = pp("#if 1\nbody");
        assert_eq!(text(&sess, &toks), "body");
        assert!(sess.diags.warnings() > 0);
    }

    #[test]
    fn error_directive_reports() {
        let (sess, _) = pp("#error something broke\n");
        assert!(sess.diags.has_errors());
    }

    #[test]
    fn skipped_region_ignores_errors() {
        let (sess, _) = pp("#if 0\n#error not reached\n#endif\n");
        assert!(!sess.diags.has_errors());
    }

    #[test]
    fn variadic_macros_collect_rest() {
        let (sess, toks) = pp("#define CALL(f, ...) f(__VA_ARGS__)\nCALL(g, 1, 2, 3)");
        assert_eq!(text(&sess, &toks), "g ( 1 , 2 , 3 )");
    }

    #[test]
    fn line_builtin() {
        let (sess, toks) = pp("\n\n__LINE__");
        assert_eq!(text(&sess, &toks), "3");
    }

    #[test]
    fn file_builtin() {
        let (sess, toks) = pp("__FILE__");
        assert_eq!(text(&sess, &toks), "\"test.c\"");
    }

    #[test]
    fn macro_redefinition_warns_when_different() {
        let (sess, _) = pp("#define A 1\n#define A 2\n");
        assert!(sess.diags.warnings() > 0);
        let (sess2, _) = pp("#define A 1\n#define A 1\n");
        assert_eq!(sess2.diags.warnings(), 0);
    }

    #[test]
    fn concat_with_argument_does_not_preexpand() {
        let (sess, toks) = pp("#define ONE 1\n#define PASTE(x) x ## 2\nPASTE(ONE)");
        // ONE must be pasted literally, giving the token ONE2.
        assert_eq!(text(&sess, &toks), "ONE2");
    }

    #[test]
    fn arguments_fully_expand_when_not_pasted() {
        let (sess, toks) = pp("#define ONE 1\n#define ID(x) x\nID(ONE)");
        assert_eq!(text(&sess, &toks), "1");
    }
}
