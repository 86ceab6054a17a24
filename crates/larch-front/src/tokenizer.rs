//! Byte stream to token stream.
//!
//! The input is "cooked" first: line splices (`\` newline) are removed and
//! `\r\n`/`\r` normalized, with a side table mapping every cooked byte back
//! to its original line and column. The lexer proper then never has to think
//! about splices, including inside strings and multi-byte operators.
//!
//! Comments vanish but propagate their leading newline/whitespace flags to
//! the following token. Numbers are kept as raw lexemes (pp-number rule);
//! character and string literals decode the standard escapes, and a decoded
//! escape is marked by setting bit 8 of the character value.

use std::path::Path;
use std::rc::Rc;

use larch_core::{FatalError, Position};

use crate::token::{Special, Token, TokenKind};
use crate::{Session, StreamInfo};

/// Tokenizes a file from disk, registering a stream for it.
///
/// A file previously marked constant-and-guarded whose guard macro is still
/// defined yields an empty stream: the caller skips it wholesale.
pub fn tokenize_file(sess: &mut Session, path: &Path) -> Result<Vec<Token>, FatalError> {
    let canonical = path.canonicalize().ok();
    if let Some(canon) = &canonical {
        for info in &sess.streams {
            if info.canonical.as_deref() == Some(canon.as_path()) {
                if let Some(guard) = info.guard {
                    if sess.macros.contains_key(&guard) {
                        tracing::debug!(path = %path.display(), "skipping guarded re-include");
                        return Ok(Vec::new());
                    }
                }
            }
        }
    }
    let bytes = std::fs::read(path).map_err(|e| {
        sess.diags.fatal(
            Position::none(),
            format!("unable to open '{}': {}", path.display(), e),
        )
    })?;
    let stream = register_stream(sess, path, canonical);
    Ok(tokenize_stream(sess, stream, &bytes))
}

fn register_stream(
    sess: &mut Session,
    path: &Path,
    canonical: Option<std::path::PathBuf>,
) -> u32 {
    let id = sess.diags.register_stream(&path.display().to_string());
    sess.streams.push(StreamInfo {
        path: path.to_path_buf(),
        canonical,
        guard: None,
    });
    id
}

/// Tokenizes an in-memory buffer against an already-registered stream.
pub fn tokenize_stream(sess: &mut Session, stream: u32, bytes: &[u8]) -> Vec<Token> {
    let (cooked, map) = cook(bytes);
    let mut lexer = Lexer {
        sess,
        bytes: &cooked,
        map: &map,
        pos: 0,
        stream,
        newline: true,
        whitespace: false,
        tokens: Vec::new(),
    };
    lexer
        .tokens
        .push(Token::new(lexer.position(), TokenKind::StreamBegin(stream)));
    lexer.run();
    let end_pos = lexer.position();
    let mut tokens = lexer.tokens;
    tokens.push(Token::new(end_pos, TokenKind::StreamEnd(stream)));
    tokens
}

/// Tokenizes a pasted lexeme: no stream markers, positions at `pos`.
/// Used by the preprocessor's `##` operator.
pub fn tokenize_fragment(sess: &mut Session, pos: Position, text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let (cooked, map) = cook(bytes);
    let mut lexer = Lexer {
        sess,
        bytes: &cooked,
        map: &map,
        pos: 0,
        stream: pos.stream,
        newline: false,
        whitespace: false,
        tokens: Vec::new(),
    };
    lexer.run();
    let mut tokens = lexer.tokens;
    for t in &mut tokens {
        t.pos = pos;
    }
    tokens
}

#[derive(Clone, Copy)]
struct LineCol {
    line: u32,
    col: u16,
}

/// Removes line splices and normalizes line endings, producing the cooked
/// bytes and a per-byte source position map.
fn cook(bytes: &[u8]) -> (Vec<u8>, Vec<LineCol>) {
    let mut cooked = Vec::with_capacity(bytes.len());
    let mut map = Vec::with_capacity(bytes.len() + 1);
    let mut line: u32 = 1;
    let mut col: u16 = 1;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            // Line splice: backslash followed by (\r)?\n.
            if bytes.get(i + 1) == Some(&b'\n') {
                i += 2;
                line += 1;
                col = 1;
                continue;
            }
            if bytes.get(i + 1) == Some(&b'\r') && bytes.get(i + 2) == Some(&b'\n') {
                i += 3;
                line += 1;
                col = 1;
                continue;
            }
        }
        if b == b'\r' {
            let skip = if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
            cooked.push(b'\n');
            map.push(LineCol { line, col });
            i += skip;
            line += 1;
            col = 1;
            continue;
        }
        cooked.push(b);
        map.push(LineCol { line, col });
        i += 1;
        if b == b'\n' {
            line += 1;
            col = 1;
        } else {
            col = col.saturating_add(1);
        }
    }
    // One-past-the-end position for EOF reporting.
    map.push(LineCol { line, col });
    (cooked, map)
}

struct Lexer<'a, 's> {
    sess: &'s mut Session,
    bytes: &'a [u8],
    map: &'a [LineCol],
    pos: usize,
    stream: u32,
    /// Pending flags for the next token.
    newline: bool,
    whitespace: bool,
    tokens: Vec<Token>,
}

impl<'a, 's> Lexer<'a, 's> {
    fn position(&self) -> Position {
        let lc = self.map[self.pos.min(self.map.len() - 1)];
        let mut p = Position::new(self.stream, lc.line, lc.col);
        p.newline = self.newline;
        p.whitespace = self.whitespace;
        p
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn run(&mut self) {
        loop {
            self.skip_blanks();
            let Some(b) = self.peek() else { break };
            let pos = self.position();
            self.newline = false;
            self.whitespace = false;
            let kind = self.scan_token(b);
            self.tokens.push(Token::new(pos, kind));
        }
    }

    /// Skips whitespace and comments, accumulating the newline/whitespace
    /// flags for the next real token.
    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(b'\n') => {
                    self.newline = true;
                    self.whitespace = false;
                    self.pos += 1;
                }
                Some(b' ') | Some(b'\t') | Some(0x0b) | Some(0x0c) => {
                    self.whitespace = true;
                    self.pos += 1;
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                    self.whitespace = true;
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.position();
                    self.pos += 2;
                    let mut closed = false;
                    while let Some(b) = self.bump() {
                        if b == b'*' && self.peek() == Some(b'/') {
                            self.pos += 1;
                            closed = true;
                            break;
                        }
                        if b == b'\n' {
                            self.newline = true;
                        }
                    }
                    if !closed {
                        self.sess.diags.warning(start, "unterminated comment");
                    }
                    self.whitespace = true;
                }
                _ => return,
            }
        }
    }

    fn scan_token(&mut self, b: u8) -> TokenKind {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                // Wide literal prefixes.
                if b == b'L' {
                    match self.peek_at(1) {
                        Some(b'\'') => {
                            self.pos += 1;
                            return self.scan_char(true);
                        }
                        Some(b'"') => {
                            self.pos += 1;
                            return self.scan_string(true);
                        }
                        _ => {}
                    }
                }
                self.scan_ident()
            }
            b'0'..=b'9' => self.scan_number(),
            b'.' if matches!(self.peek_at(1), Some(b'0'..=b'9')) => self.scan_number(),
            b'\'' => self.scan_char(false),
            b'"' => self.scan_string(false),
            _ if b < 0x80 => {
                let rest = &self.bytes[self.pos..];
                match Special::combine(rest) {
                    Some((op, len)) => {
                        self.pos += len;
                        TokenKind::Special(op)
                    }
                    None => {
                        let pos = self.position();
                        self.sess
                            .diags
                            .warning(pos, format!("unrecognized character 0x{b:02x}"));
                        self.pos += 1;
                        TokenKind::Error(b)
                    }
                }
            }
            _ => {
                let pos = self.position();
                self.sess
                    .diags
                    .warning(pos, format!("non-ASCII character 0x{b:02x} in input"));
                self.pos += 1;
                TokenKind::Error(b)
            }
        }
    }

    fn scan_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
        TokenKind::Ident(self.sess.interner.intern(text))
    }

    /// pp-number: digits, letters, dots, and exponent signs.
    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'.' | b'_' => {
                    self.pos += 1;
                    if matches!(b, b'e' | b'E' | b'p' | b'P')
                        && matches!(self.peek(), Some(b'+') | Some(b'-'))
                    {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("0");
        TokenKind::Number(Rc::from(text))
    }

    /// Decodes one escape after the backslash has been consumed. Returns the
    /// value with bit 8 set to mark it as escaped.
    fn scan_escape(&mut self, quote_pos: Position) -> u32 {
        let Some(b) = self.bump() else {
            return b'\\' as u32 | 0x100;
        };
        let value = match b {
            b'n' => b'\n' as u32,
            b't' => b'\t' as u32,
            b'v' => 0x0b,
            b'f' => 0x0c,
            b'b' => 0x08,
            b'a' => 0x07,
            b'r' => b'\r' as u32,
            b'e' => 0x1b,
            b'\\' | b'\'' | b'"' | b'?' => b as u32,
            b'0'..=b'7' => {
                let mut value = (b - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                value
            }
            b'x' => {
                let mut value = 0u32;
                let mut any = false;
                while let Some(d) = self.peek() {
                    let digit = match d {
                        b'0'..=b'9' => d - b'0',
                        b'a'..=b'f' => d - b'a' + 10,
                        b'A'..=b'F' => d - b'A' + 10,
                        _ => break,
                    };
                    value = value.wrapping_mul(16).wrapping_add(digit as u32);
                    any = true;
                    self.pos += 1;
                }
                if !any {
                    self.sess
                        .diags
                        .warning(quote_pos, "hex escape with no digits");
                }
                value
            }
            _ => {
                self.sess
                    .diags
                    .warning(quote_pos, format!("unknown escape sequence '\\{}'", b as char));
                b as u32
            }
        };
        value | 0x100
    }

    fn scan_char(&mut self, wide: bool) -> TokenKind {
        let pos = self.position();
        self.pos += 1; // opening quote
        let mut value: u32 = 0;
        let mut count = 0;
        let mut escaped = false;
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    self.sess.diags.warning(pos, "missing terminating ' character");
                    break;
                }
                Some(b'\'') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let v = self.scan_escape(pos);
                    value = (value << 8) | (v & 0xff);
                    escaped = true;
                    count += 1;
                }
                Some(b) => {
                    self.pos += 1;
                    value = (value << 8) | b as u32;
                    count += 1;
                }
            }
        }
        if count == 0 {
            self.sess.diags.warning(pos, "empty character constant");
        } else if count > 1 {
            self.sess
                .diags
                .warning(pos, "multi-character character constant");
        }
        if count == 1 && escaped {
            value |= 0x100;
        }
        TokenKind::Char { value, wide }
    }

    fn scan_string(&mut self, wide: bool) -> TokenKind {
        let pos = self.position();
        self.pos += 1; // opening quote
        let mut data: Vec<u8> = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    self.sess
                        .diags
                        .warning(pos, "missing terminating \" character");
                    break;
                }
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let v = self.scan_escape(pos);
                    data.push((v & 0xff) as u8);
                }
                Some(b) => {
                    self.pos += 1;
                    data.push(b);
                }
            }
        }
        if data.len() > 1024 {
            self.sess.diags.warning(pos, "string too long");
        }
        data.push(0);
        TokenKind::Str {
            value: Rc::from(data.into_boxed_slice()),
            wide,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Options, Session};

    fn lex(src: &str) -> (Session, Vec<Token>) {
        let mut sess = Session::new(Options::default());
        let stream = sess.diags.register_stream("test.c");
        sess.streams.push(StreamInfo {
            path: "test.c".into(),
            canonical: None,
            guard: None,
        });
        let tokens = tokenize_stream(&mut sess, stream, src.as_bytes());
        (sess, tokens)
    }

    fn kinds(tokens: &[Token]) -> Vec<&TokenKind> {
        tokens
            .iter()
            .map(|t| &t.kind)
            .filter(|k| !matches!(k, TokenKind::StreamBegin(_) | TokenKind::StreamEnd(_)))
            .collect()
    }

    #[test]
    fn idents_and_specials() {
        let (sess, tokens) = lex("a += b->c;");
        let ks = kinds(&tokens);
        assert_eq!(ks.len(), 6);
        assert!(matches!(ks[0], TokenKind::Ident(i) if sess.interner.name(*i) == "a"));
        assert!(matches!(ks[1], TokenKind::Special(Special::AddAssign)));
        assert!(matches!(ks[3], TokenKind::Special(Special::Arrow)));
        assert!(matches!(ks[5], TokenKind::Special(Special::Semicolon)));
    }

    #[test]
    fn numbers_keep_raw_lexemes() {
        let (_, tokens) = lex("0x1fULL 3.14e-2 077 1.0f");
        let ks = kinds(&tokens);
        let lexemes: Vec<&str> = ks
            .iter()
            .filter_map(|k| match k {
                TokenKind::Number(s) => Some(&**s),
                _ => None,
            })
            .collect();
        assert_eq!(lexemes, vec!["0x1fULL", "3.14e-2", "077", "1.0f"]);
    }

    #[test]
    fn line_splice_is_transparent() {
        let (sess, tokens) = lex("ab\\\ncd = 1;");
        let ks = kinds(&tokens);
        assert!(matches!(ks[0], TokenKind::Ident(i) if sess.interner.name(*i) == "abcd"));
    }

    #[test]
    fn newline_flag_marks_line_starts() {
        let (_, tokens) = lex("a\nb c");
        let real: Vec<&Token> = tokens
            .iter()
            .filter(|t| !matches!(t.kind, TokenKind::StreamBegin(_) | TokenKind::StreamEnd(_)))
            .collect();
        assert!(real[0].pos.newline);
        assert!(real[1].pos.newline);
        assert!(!real[2].pos.newline);
        assert!(real[2].pos.whitespace);
    }

    #[test]
    fn comments_elide_but_flag_whitespace() {
        let (_, tokens) = lex("a/* comment */b // c\nd");
        let real: Vec<&Token> = tokens
            .iter()
            .filter(|t| !matches!(t.kind, TokenKind::StreamBegin(_) | TokenKind::StreamEnd(_)))
            .collect();
        assert_eq!(real.len(), 3);
        assert!(real[1].pos.whitespace);
        assert!(real[2].pos.newline);
    }

    #[test]
    fn escapes_set_the_escape_bit() {
        let (_, tokens) = lex(r"'\n' 'a'");
        let ks = kinds(&tokens);
        assert!(matches!(ks[0], TokenKind::Char { value, .. } if *value == (b'\n' as u32 | 0x100)));
        assert!(matches!(ks[1], TokenKind::Char { value, .. } if *value == b'a' as u32));
    }

    #[test]
    fn strings_decode_escapes_and_append_nul() {
        let (_, tokens) = lex(r#""hi\t""#);
        let ks = kinds(&tokens);
        match ks[0] {
            TokenKind::Str { value, wide } => {
                assert!(!wide);
                assert_eq!(&**value, b"hi\t\0");
            }
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn wide_literals() {
        let (_, tokens) = lex("L'x' L\"y\"");
        let ks = kinds(&tokens);
        assert!(matches!(ks[0], TokenKind::Char { wide: true, .. }));
        assert!(matches!(ks[1], TokenKind::Str { wide: true, .. }));
    }

    #[test]
    fn unknown_escape_warns_but_continues(){
        let (sess, tokens) = lex(r"'\q'");
        assert!(!kinds(&tokens).is_empty());
        assert!(sess.diags.warnings() > 0);
    }

    #[test]
    fn octal_and_hex_escapes() {
        let (_, tokens) = lex(r"'\101' '\x41'");
        let ks = kinds(&tokens);
        assert!(matches!(ks[0], TokenKind::Char { value, .. } if *value & 0xff == 0x41));
        assert!(matches!(ks[1], TokenKind::Char { value, .. } if *value & 0xff == 0x41));
    }

    #[test]
    fn non_ascii_byte_reports_and_recovers() {
        let mut sess = Session::new(Options::default());
        let stream = sess.diags.register_stream("bin.c");
        sess.streams.push(StreamInfo {
            path: "bin.c".into(),
            canonical: None,
            guard: None,
        });
        let tokens = tokenize_stream(&mut sess, stream, &[b'a', 0xc3, b'b']);
        let real: Vec<&TokenKind> = tokens
            .iter()
            .map(|t| &t.kind)
            .filter(|k| !matches!(k, TokenKind::StreamBegin(_) | TokenKind::StreamEnd(_)))
            .collect();
        assert_eq!(real.len(), 3);
        assert!(matches!(real[1], TokenKind::Error(0xc3)));
        assert!(sess.diags.warnings() > 0);
    }
}
