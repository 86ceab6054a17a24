//! Expression parsing.
//!
//! Standard C precedence climbing: a single left-associative helper walks a
//! table of operator levels, tightest first. Numeric literals are classified
//! here from their raw lexemes — suffixes pick the smallest rank that fits
//! and preserves signedness, overflow warns and wraps.

use larch_core::Position;

use crate::ast::{ExprFlags, ExprId, ExprKind};
use crate::parse::Parser;
use crate::symbol::{Namespace, SymbolId};
use crate::token::{Special, TokenKind};
use crate::{Keyword, Session};

/// Binary operator levels, tightest binding first.
const BINOP_LEVELS: &[&[Special]] = &[
    &[Special::Star, Special::Slash, Special::Percent],
    &[Special::Plus, Special::Minus],
    &[Special::Shl, Special::Shr],
    &[Special::Lt, Special::Gt, Special::Lte, Special::Gte],
    &[Special::Equal, Special::NotEqual],
    &[Special::Amp],
    &[Special::Caret],
    &[Special::Pipe],
    &[Special::LogicalAnd],
    &[Special::LogicalOr],
];

impl<'s> Parser<'s> {
    /// Full expression including the comma operator.
    pub(crate) fn parse_expression(&mut self) -> ExprId {
        let pos = self.position();
        let mut left = self.assignment_expression();
        while self.match_op(Special::Comma) {
            let right = self.assignment_expression();
            left = self.alloc_expr(pos, ExprKind::Comma { left, right });
        }
        left
    }

    pub(crate) fn assignment_expression(&mut self) -> ExprId {
        let pos = self.position();
        let left = self.conditional_expression();
        if let TokenKind::Special(op) = self.peek().kind {
            if op.is_assignment() {
                self.pos += 1;
                let right = self.assignment_expression();
                return self.alloc_expr(pos, ExprKind::Assignment { op, left, right });
            }
        }
        left
    }

    pub(crate) fn conditional_expression(&mut self) -> ExprId {
        let pos = self.position();
        let cond = self.binary_expression(BINOP_LEVELS.len() - 1);
        if !self.match_op(Special::Question) {
            return cond;
        }
        // `a ?: c` — the condition doubles as the true arm.
        let when_true = if self.peek().is_special(Special::Colon) {
            None
        } else {
            Some(self.parse_expression())
        };
        self.expect(Special::Colon, "in conditional expression");
        let when_false = self.conditional_expression();
        self.alloc_expr(
            pos,
            ExprKind::Conditional {
                cond,
                when_true,
                when_false,
            },
        )
    }

    /// Left-associative climb over `BINOP_LEVELS[level]`.
    fn binary_expression(&mut self, level: usize) -> ExprId {
        let mut left = if level == 0 {
            self.cast_expression()
        } else {
            self.binary_expression(level - 1)
        };
        loop {
            let op = match self.peek().kind {
                TokenKind::Special(op) if BINOP_LEVELS[level].contains(&op) => op,
                _ => return left,
            };
            // `a < b` vs the start of a type in weird macro output is the
            // parser's problem only for `<`, which cannot start an operand.
            let pos = self.position();
            self.pos += 1;
            let right = if level == 0 {
                self.cast_expression()
            } else {
                self.binary_expression(level - 1)
            };
            let kind = match op {
                Special::LogicalAnd | Special::LogicalOr => ExprKind::Logical { op, left, right },
                Special::Lt
                | Special::Gt
                | Special::Lte
                | Special::Gte
                | Special::Equal
                | Special::NotEqual => ExprKind::Compare { op, left, right },
                _ => ExprKind::Binop { op, left, right },
            };
            left = self.alloc_expr(pos, kind);
        }
    }

    pub(crate) fn cast_expression(&mut self) -> ExprId {
        let pos = self.position();
        if self.peek().is_special(Special::LParen) {
            // `( type-name )` followed by a cast operand or compound
            // literal; otherwise fall through to unary.
            let save = self.pos;
            self.pos += 1;
            if self.looks_like_type() {
                let cast_type = self.typename();
                if self.expect(Special::RParen, "at end of cast") {
                    let expr = if self.peek().is_special(Special::LBrace) {
                        self.initializer()
                    } else {
                        self.cast_expression()
                    };
                    return self.alloc_expr(pos, ExprKind::Cast { cast_type, expr });
                }
                return self.error_expr(pos);
            }
            self.pos = save;
        }
        self.unary_expression()
    }

    fn unary_expression(&mut self) -> ExprId {
        let pos = self.position();
        match self.peek().kind {
            TokenKind::Special(op @ (Special::Increment | Special::Decrement)) => {
                self.pos += 1;
                let expr = self.unary_expression();
                self.alloc_expr(pos, ExprKind::Preop { op, expr })
            }
            TokenKind::Special(
                op @ (Special::Amp
                | Special::Star
                | Special::Plus
                | Special::Minus
                | Special::Tilde
                | Special::Bang),
            ) => {
                self.pos += 1;
                let expr = self.cast_expression();
                self.alloc_expr(pos, ExprKind::Preop { op, expr })
            }
            TokenKind::Special(Special::LogicalAnd) => {
                // `&&label`: GNU computed-goto label address.
                self.pos += 1;
                match self.peek().ident() {
                    Some(id) => {
                        self.pos += 1;
                        let sym = self.label_symbol(id);
                        self.alloc_expr(pos, ExprKind::LabelRef { sym })
                    }
                    None => {
                        self.sess.diags.error(pos, "expected label after '&&'");
                        self.error_expr(pos)
                    }
                }
            }
            _ => match self.keyword() {
                Some(Keyword::Sizeof) => {
                    self.pos += 1;
                    let (type_arg, expr) = self.sizeof_operand();
                    self.alloc_expr(pos, ExprKind::Sizeof { type_arg, expr })
                }
                Some(Keyword::Alignof) => {
                    self.pos += 1;
                    let (type_arg, expr) = self.sizeof_operand();
                    self.alloc_expr(pos, ExprKind::Alignof { type_arg, expr })
                }
                _ => self.postfix_expression(),
            },
        }
    }

    /// `sizeof ( type )` or `sizeof unary-expression`.
    fn sizeof_operand(&mut self) -> (Option<SymbolId>, Option<ExprId>) {
        if self.peek().is_special(Special::LParen) {
            let save = self.pos;
            self.pos += 1;
            if self.looks_like_type() {
                let ty = self.typename();
                self.expect(Special::RParen, "after sizeof type");
                return (Some(ty), None);
            }
            self.pos = save;
        }
        let expr = self.unary_expression();
        (None, Some(expr))
    }

    fn postfix_expression(&mut self) -> ExprId {
        let mut expr = self.primary_expression();
        loop {
            let pos = self.position();
            match self.peek().kind {
                TokenKind::Special(Special::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expression();
                    self.expect(Special::RBracket, "at end of array index");
                    // a[b] is *(a + b).
                    let sum = self.alloc_expr(
                        pos,
                        ExprKind::Binop {
                            op: Special::Plus,
                            left: expr,
                            right: index,
                        },
                    );
                    expr = self.alloc_expr(
                        pos,
                        ExprKind::Preop {
                            op: Special::Star,
                            expr: sum,
                        },
                    );
                }
                TokenKind::Special(Special::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if !self.peek().is_special(Special::RParen) {
                        loop {
                            args.push(self.assignment_expression());
                            if !self.match_op(Special::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Special::RParen, "at end of call");
                    expr = self.alloc_expr(pos, ExprKind::Call { func: expr, args });
                }
                TokenKind::Special(Special::Dot) => {
                    self.pos += 1;
                    match self.peek().ident() {
                        Some(member) => {
                            self.pos += 1;
                            expr = self.alloc_expr(pos, ExprKind::Deref { deref: expr, member });
                        }
                        None => {
                            self.sess.diags.error(pos, "expected member name after '.'");
                            return expr;
                        }
                    }
                }
                TokenKind::Special(Special::Arrow) => {
                    self.pos += 1;
                    match self.peek().ident() {
                        Some(member) => {
                            self.pos += 1;
                            // a->b is (*a).b.
                            let deref = self.alloc_expr(
                                pos,
                                ExprKind::Preop {
                                    op: Special::Star,
                                    expr,
                                },
                            );
                            expr = self.alloc_expr(pos, ExprKind::Deref { deref, member });
                        }
                        None => {
                            self.sess
                                .diags
                                .error(pos, "expected member name after '->'");
                            return expr;
                        }
                    }
                }
                TokenKind::Special(op @ (Special::Increment | Special::Decrement)) => {
                    self.pos += 1;
                    expr = self.alloc_expr(pos, ExprKind::Postop { op, expr });
                }
                _ => return expr,
            }
        }
    }

    fn primary_expression(&mut self) -> ExprId {
        let pos = self.position();
        match self.peek().kind.clone() {
            TokenKind::Number(lexeme) => {
                self.pos += 1;
                self.number_expr(pos, &lexeme)
            }
            TokenKind::Char { value, .. } => {
                self.pos += 1;
                let expr = self.alloc_expr(
                    pos,
                    ExprKind::Value {
                        value: (value & 0xff) as u64,
                    },
                );
                self.sess.exprs[expr].ctype = Some(self.sess.ctypes.int_);
                self.sess.exprs[expr].flags = ExprFlags::INT_CONST;
                expr
            }
            TokenKind::Str { value, wide } => {
                self.pos += 1;
                // Adjacent string literals concatenate.
                let mut bytes: Vec<u8> = value[..value.len() - 1].to_vec();
                let mut wide = wide;
                while let TokenKind::Str { value: more, wide: w } = &self.peek().kind {
                    bytes.extend_from_slice(&more[..more.len() - 1]);
                    wide |= *w;
                    self.pos += 1;
                }
                bytes.push(0);
                self.alloc_expr(
                    pos,
                    ExprKind::Str {
                        value: std::rc::Rc::from(bytes.into_boxed_slice()),
                        wide,
                    },
                )
            }
            TokenKind::Special(Special::LParen) => {
                self.pos += 1;
                // Statement expression `({ ... })`.
                if self.peek().is_special(Special::LBrace) {
                    self.pos += 1;
                    let stmt = self.compound_statement(pos);
                    self.expect(Special::RParen, "after statement expression");
                    return self.alloc_expr(pos, ExprKind::StmtExpr { stmt });
                }
                let expr = self.parse_expression();
                self.expect(Special::RParen, "in expression");
                expr
            }
            TokenKind::Ident(id) => match self.sess.keyword(id) {
                Some(Keyword::FuncName) => {
                    self.pos += 1;
                    let name = self
                        .current_fn
                        .map(|f| self.sess.interner.name(f).to_string())
                        .unwrap_or_default();
                    let mut bytes = name.into_bytes();
                    bytes.push(0);
                    self.alloc_expr(
                        pos,
                        ExprKind::Str {
                            value: std::rc::Rc::from(bytes.into_boxed_slice()),
                            wide: false,
                        },
                    )
                }
                Some(Keyword::TypesCompatible) => {
                    self.pos += 1;
                    self.expect(Special::LParen, "after __builtin_types_compatible_p");
                    let left = self.typename();
                    self.expect(Special::Comma, "in __builtin_types_compatible_p");
                    let right = self.typename();
                    self.expect(Special::RParen, "after __builtin_types_compatible_p");
                    self.alloc_expr(pos, ExprKind::TypesCompatible { left, right })
                }
                Some(Keyword::ChooseExpr) => {
                    self.pos += 1;
                    self.expect(Special::LParen, "after __builtin_choose_expr");
                    let cond = self.assignment_expression();
                    self.expect(Special::Comma, "in __builtin_choose_expr");
                    let when_true = self.assignment_expression();
                    self.expect(Special::Comma, "in __builtin_choose_expr");
                    let when_false = self.assignment_expression();
                    self.expect(Special::RParen, "after __builtin_choose_expr");
                    self.alloc_expr(
                        pos,
                        ExprKind::ChooseExpr {
                            cond,
                            when_true,
                            when_false,
                        },
                    )
                }
                Some(Keyword::Offsetof) => {
                    self.pos += 1;
                    self.expect(Special::LParen, "after __builtin_offsetof");
                    let type_arg = self.typename();
                    self.expect(Special::Comma, "in __builtin_offsetof");
                    let designator = self.offsetof_designator();
                    self.expect(Special::RParen, "after __builtin_offsetof");
                    self.alloc_expr(
                        pos,
                        ExprKind::Offsetof {
                            type_arg,
                            designator,
                        },
                    )
                }
                Some(Keyword::Expect) => {
                    self.pos += 1;
                    self.expect(Special::LParen, "after __builtin_expect");
                    let value = self.assignment_expression();
                    self.expect(Special::Comma, "in __builtin_expect");
                    let expected = self.assignment_expression();
                    self.expect(Special::RParen, "after __builtin_expect");
                    self.alloc_expr(pos, ExprKind::Expect { value, expected })
                }
                Some(Keyword::ConstantP) => {
                    self.pos += 1;
                    self.expect(Special::LParen, "after __builtin_constant_p");
                    let expr = self.assignment_expression();
                    self.expect(Special::RParen, "after __builtin_constant_p");
                    self.alloc_expr(pos, ExprKind::ConstantP { expr })
                }
                Some(_) => {
                    self.sess
                        .diags
                        .error(pos, "unexpected keyword in expression");
                    self.pos += 1;
                    self.error_expr(pos)
                }
                None => {
                    self.pos += 1;
                    let sym = self
                        .sess
                        .symtab
                        .lookup(id, Namespace::SYMBOL | Namespace::ITERATOR);
                    self.alloc_expr(pos, ExprKind::Symbol { sym, ident: id })
                }
            },
            TokenKind::Eof => self.error_expr(pos),
            _ => {
                self.sess.diags.error(pos, "expected expression");
                self.pos += 1;
                self.error_expr(pos)
            }
        }
    }

    /// `member [. member | [index]]*` inside `__builtin_offsetof`.
    fn offsetof_designator(&mut self) -> ExprId {
        let pos = self.position();
        match self.peek().ident() {
            Some(member) => {
                self.pos += 1;
                let child = self.offsetof_tail();
                self.alloc_expr(pos, ExprKind::MemberDesignator { member, child })
            }
            None => {
                self.sess
                    .diags
                    .error(pos, "expected member in __builtin_offsetof");
                self.error_expr(pos)
            }
        }
    }

    fn offsetof_tail(&mut self) -> Option<ExprId> {
        let pos = self.position();
        if self.match_op(Special::Dot) {
            return Some(self.offsetof_designator());
        }
        if self.match_op(Special::LBracket) {
            let from = self.parse_expression();
            self.expect(Special::RBracket, "in __builtin_offsetof");
            let child = self.offsetof_tail();
            return Some(self.alloc_expr(
                pos,
                ExprKind::IndexDesignator {
                    from,
                    to: None,
                    child,
                },
            ));
        }
        None
    }

    fn error_expr(&mut self, pos: Position) -> ExprId {
        let expr = self.alloc_expr(pos, ExprKind::Value { value: 0 });
        self.sess.exprs[expr].ctype = Some(self.sess.ctypes.bad);
        expr
    }

    /// Classifies a numeric lexeme and builds the literal node.
    fn number_expr(&mut self, pos: Position, lexeme: &str) -> ExprId {
        match classify_number(self.sess, lexeme, pos) {
            Classified::Int { value, ctype } => {
                let expr = self.alloc_expr(pos, ExprKind::Value { value });
                self.sess.exprs[expr].ctype = Some(ctype);
                self.sess.exprs[expr].flags = ExprFlags::INT_CONST;
                expr
            }
            Classified::Float { value, ctype } => {
                let expr = self.alloc_expr(pos, ExprKind::FValue { value });
                self.sess.exprs[expr].ctype = Some(ctype);
                self.sess.exprs[expr].flags = ExprFlags::FLOAT_LIT;
                expr
            }
        }
    }
}

/// Result of numeric literal classification.
pub enum Classified {
    Int { value: u64, ctype: SymbolId },
    Float { value: f64, ctype: SymbolId },
}

/// Implements the literal suffix/rank rules: `1u`, `1l`, `1ul`, `1ll`,
/// `1ull` pick the minimum rank that fits and preserves signedness;
/// overflow warns and wraps modulo `2^bit_size`.
pub fn classify_number(sess: &mut Session, lexeme: &str, pos: Position) -> Classified {
    let bytes = lexeme.as_bytes();
    let is_hex = lexeme.starts_with("0x") || lexeme.starts_with("0X");
    let looks_float = if is_hex {
        bytes.iter().any(|&b| b == b'p' || b == b'P')
    } else {
        bytes.iter().any(|&b| b == b'.' || b == b'e' || b == b'E')
            && !lexeme.ends_with('e')
            && !lexeme.ends_with('E')
    };
    if looks_float || (!is_hex && lexeme.contains('.')) {
        return classify_float(sess, lexeme, pos);
    }

    // Split off the suffix.
    let mut end = lexeme.len();
    let mut unsigned = false;
    let mut longs = 0u8;
    while end > 0 {
        match bytes[end - 1] {
            b'u' | b'U' => {
                unsigned = true;
                end -= 1;
            }
            b'l' | b'L' => {
                longs += 1;
                end -= 1;
            }
            _ => break,
        }
    }
    let digits = &lexeme[..end];
    let (body, radix): (&str, u32) = if is_hex {
        (&digits[2..], 16)
    } else if let Some(b) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        (b, 2)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (&digits[1..], 8)
    } else {
        (digits, 10)
    };

    let mut value: u64 = 0;
    let mut overflow = false;
    for &b in body.as_bytes() {
        let digit = match b {
            b'0'..=b'9' => (b - b'0') as u64,
            b'a'..=b'f' => (b - b'a' + 10) as u64,
            b'A'..=b'F' => (b - b'A' + 10) as u64,
            _ => {
                sess.diags
                    .warning(pos, format!("bad digit in constant '{lexeme}'"));
                break;
            }
        };
        if digit >= radix as u64 {
            sess.diags
                .warning(pos, format!("bad digit in constant '{lexeme}'"));
            break;
        }
        let (shifted, o1) = value.overflowing_mul(radix as u64);
        let (next, o2) = shifted.overflowing_add(digit);
        overflow |= o1 | o2;
        value = next;
    }
    if overflow {
        sess.diags
            .warning(pos, format!("constant '{lexeme}' is out of range"));
    }

    // Candidate ladder per C99 6.4.4.1. Decimal constants without a `u`
    // never silently go unsigned within a rank.
    let decimal = radix == 10;
    let c = &sess.ctypes;
    let int_bits = sess.symtab.symbols[c.int_].bit_size as u32;
    let long_bits = sess.symtab.symbols[c.long].bit_size as u32;
    let llong_bits = sess.symtab.symbols[c.llong].bit_size as u32;

    let fits_signed = |bits: u32| -> bool { value <= (1u64 << (bits - 1)) - 1 };
    let fits_unsigned = |bits: u32| -> bool { bits >= 64 || value <= (1u64 << bits) - 1 };

    let ctype = if unsigned {
        if longs == 0 && fits_unsigned(int_bits) {
            c.uint
        } else if longs <= 1 && fits_unsigned(long_bits) {
            c.ulong
        } else {
            c.ullong
        }
    } else if longs >= 2 {
        if fits_signed(llong_bits) {
            c.llong
        } else {
            if decimal {
                sess.diags
                    .warning(pos, format!("constant '{lexeme}' is out of range"));
            }
            c.ullong
        }
    } else if longs == 1 {
        if fits_signed(long_bits) {
            c.long
        } else if !decimal && fits_unsigned(long_bits) {
            c.ulong
        } else if fits_signed(llong_bits) {
            c.llong
        } else {
            c.ullong
        }
    } else if fits_signed(int_bits) {
        c.int_
    } else if !decimal && fits_unsigned(int_bits) {
        c.uint
    } else if fits_signed(long_bits) {
        c.long
    } else if !decimal && fits_unsigned(long_bits) {
        c.ulong
    } else if fits_signed(llong_bits) {
        c.llong
    } else {
        if decimal {
            sess.diags.warning(
                pos,
                format!("decimal constant '{lexeme}' is too large for long long"),
            );
        }
        c.ullong
    };
    Classified::Int { value, ctype }
}

fn classify_float(sess: &mut Session, lexeme: &str, pos: Position) -> Classified {
    let mut end = lexeme.len();
    let bytes = lexeme.as_bytes();
    let mut ctype = sess.ctypes.double_;
    if end > 0 {
        match bytes[end - 1] {
            b'f' | b'F' => {
                ctype = sess.ctypes.float_;
                end -= 1;
            }
            b'l' | b'L' => {
                ctype = sess.ctypes.ldouble;
                end -= 1;
            }
            _ => {}
        }
    }
    let body = &lexeme[..end];
    let value = match body.parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            sess.diags
                .warning(pos, format!("bad floating point constant '{lexeme}'"));
            0.0
        }
    };
    Classified::Float { value, ctype }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Options, Session};

    fn classify(src: &str) -> (Session, Classified) {
        let mut sess = Session::new(Options::default());
        sess.diags.register_stream("t.c");
        let c = classify_number(&mut sess, src, Position::new(0, 1, 1));
        (sess, c)
    }

    #[test]
    fn plain_decimal_is_int() {
        let (sess, c) = classify("42");
        match c {
            Classified::Int { value, ctype } => {
                assert_eq!(value, 42);
                assert_eq!(ctype, sess.ctypes.int_);
            }
            _ => panic!("expected int"),
        }
    }

    #[test]
    fn suffixes_pick_minimum_rank() {
        let (sess, c) = classify("1u");
        assert!(matches!(c, Classified::Int { ctype, .. } if ctype == sess.ctypes.uint));
        let (sess, c) = classify("1l");
        assert!(matches!(c, Classified::Int { ctype, .. } if ctype == sess.ctypes.long));
        let (sess, c) = classify("1ul");
        assert!(matches!(c, Classified::Int { ctype, .. } if ctype == sess.ctypes.ulong));
        let (sess, c) = classify("1ll");
        assert!(matches!(c, Classified::Int { ctype, .. } if ctype == sess.ctypes.llong));
        let (sess, c) = classify("1ull");
        assert!(matches!(c, Classified::Int { ctype, .. } if ctype == sess.ctypes.ullong));
    }

    #[test]
    fn big_decimal_promotes_rank() {
        // 3 billion exceeds int32 but fits in long on LP64.
        let (sess, c) = classify("3000000000");
        assert!(matches!(c, Classified::Int { ctype, .. } if ctype == sess.ctypes.long));
    }

    #[test]
    fn big_hex_goes_unsigned_within_rank() {
        let (sess, c) = classify("0xffffffff");
        assert!(matches!(c, Classified::Int { ctype, .. } if ctype == sess.ctypes.uint));
    }

    #[test]
    fn hex_and_octal_radix() {
        let (_, c) = classify("0x1f");
        assert!(matches!(c, Classified::Int { value: 31, .. }));
        let (_, c) = classify("077");
        assert!(matches!(c, Classified::Int { value: 63, .. }));
        let (_, c) = classify("0b101");
        assert!(matches!(c, Classified::Int { value: 5, .. }));
    }

    #[test]
    fn overflow_warns_and_wraps() {
        let (sess, c) = classify("0xffffffffffffffffff");
        assert!(matches!(c, Classified::Int { .. }));
        assert!(sess.diags.warnings() > 0);
    }

    #[test]
    fn float_suffixes() {
        let (sess, c) = classify("1.5");
        assert!(matches!(c, Classified::Float { ctype, .. } if ctype == sess.ctypes.double_));
        let (sess, c) = classify("1.5f");
        assert!(matches!(c, Classified::Float { ctype, .. } if ctype == sess.ctypes.float_));
        let (sess, c) = classify("1.5L");
        assert!(matches!(c, Classified::Float { ctype, .. } if ctype == sess.ctypes.ldouble));
        let (_, c) = classify("3e8");
        assert!(matches!(c, Classified::Float { value, .. } if value == 3e8));
    }

    proptest::proptest! {
        #[test]
        fn decimal_values_survive_classification(v in 0u64..(1u64 << 62)) {
            let (sess, c) = classify(&v.to_string());
            match c {
                Classified::Int { value, .. } => {
                    proptest::prop_assert_eq!(value, v);
                    proptest::prop_assert_eq!(sess.diags.warnings(), 0);
                }
                Classified::Float { .. } => {
                    return Err(proptest::test_runner::TestCaseError::fail("decimal became float"));
                }
            }
        }

        #[test]
        fn hex_values_survive_classification(v in 0u64..u64::MAX) {
            let (_, c) = classify(&format!("{v:#x}"));
            match c {
                Classified::Int { value, .. } => proptest::prop_assert_eq!(value, v),
                Classified::Float { .. } => {
                    return Err(proptest::test_runner::TestCaseError::fail("hex became float"));
                }
            }
        }
    }
}
