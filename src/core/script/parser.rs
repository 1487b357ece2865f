//! Pratt parser for the expression sub-language.
//!
//! Precedence levels (low to high):
//!  1. Assignment (`=`, `+=`, `??=`, ...), right-associative
//!  2. Ternary (`? :`)
//!  3. Nullish coalescing (`??`)
//!  4. Logical OR, logical AND
//!  5. Bitwise OR, XOR, AND
//!  6. Equality, then relational (`<`, `in`, ...)
//!  7. Additive, multiplicative
//!  8. Exponentiation (`**`), right-associative
//!  9. Unary prefix (`!`, `-`, `+`, `~`, `typeof`, `void`, `++`, `--`)
//! 10. Postfix `++`/`--`, then member access and calls
//!
//! Arrow functions take a single expression as their body.

use std::rc::Rc;

use super::ast::*;
use super::lexer::{Lexer, TemplatePart, Token, TokenKind};
use super::value::{ScriptError, ScriptResult, SourceSpan};

#[derive(Debug, Clone, Copy)]
struct Bp(u8, u8);

const BP_ASSIGN: Bp = Bp(4, 3);
const BP_TERNARY: Bp = Bp(5, 6);
const BP_NULLISH: Bp = Bp(7, 8);
const BP_LOR: Bp = Bp(9, 10);
const BP_LAND: Bp = Bp(11, 12);
const BP_BOR: Bp = Bp(13, 14);
const BP_BXOR: Bp = Bp(15, 16);
const BP_BAND: Bp = Bp(17, 18);
const BP_EQ: Bp = Bp(19, 20);
const BP_REL: Bp = Bp(21, 22);
const BP_ADD: Bp = Bp(25, 26);
const BP_MUL: Bp = Bp(27, 28);
const BP_EXP: Bp = Bp(30, 29);
const BP_PREFIX: u8 = 31;
const BP_CALL: u8 = 33;

/// Deepest nesting of sub-expressions the parser accepts.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Parse a complete expression; trailing tokens are an error.
pub fn parse_expression(src: &str) -> ScriptResult<Expr> {
    let mut parser = Parser::new(Lexer::new(src), 0);
    let expr = parser.expression()?;
    let tok = parser.lexer.next_token()?;
    if tok.kind != TokenKind::Eof {
        return Err(unexpected(&tok, src));
    }
    Ok(expr)
}

fn unexpected(tok: &Token, src: &str) -> ScriptError {
    let what = match &tok.kind {
        TokenKind::Eof => "end of input".to_string(),
        _ => format!("'{}'", tok.span.extract(src).unwrap_or("?")),
    };
    ScriptError::syntax(format!("unexpected {}", what)).with_span(tok.span)
}

enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
    Assign(Option<CompoundOp>),
    Ternary,
}

fn infix_bp(kind: &TokenKind) -> Option<(Bp, Infix)> {
    use BinaryOp::*;
    let op = match kind {
        TokenKind::Op(op) => *op,
        TokenKind::Ident(word) if word == "in" => return Some((BP_REL, Infix::Binary(In))),
        _ => return None,
    };
    Some(match op {
        "=" => (BP_ASSIGN, Infix::Assign(None)),
        "+=" => (BP_ASSIGN, Infix::Assign(Some(CompoundOp::Arith(Add)))),
        "-=" => (BP_ASSIGN, Infix::Assign(Some(CompoundOp::Arith(Sub)))),
        "*=" => (BP_ASSIGN, Infix::Assign(Some(CompoundOp::Arith(Mul)))),
        "/=" => (BP_ASSIGN, Infix::Assign(Some(CompoundOp::Arith(Div)))),
        "%=" => (BP_ASSIGN, Infix::Assign(Some(CompoundOp::Arith(Rem)))),
        "**=" => (BP_ASSIGN, Infix::Assign(Some(CompoundOp::Arith(Exp)))),
        "&&=" => (BP_ASSIGN, Infix::Assign(Some(CompoundOp::Logical(LogicalOp::And)))),
        "||=" => (BP_ASSIGN, Infix::Assign(Some(CompoundOp::Logical(LogicalOp::Or)))),
        "??=" => (BP_ASSIGN, Infix::Assign(Some(CompoundOp::Logical(LogicalOp::Nullish)))),
        "?" => (BP_TERNARY, Infix::Ternary),
        "??" => (BP_NULLISH, Infix::Logical(LogicalOp::Nullish)),
        "||" => (BP_LOR, Infix::Logical(LogicalOp::Or)),
        "&&" => (BP_LAND, Infix::Logical(LogicalOp::And)),
        "|" => (BP_BOR, Infix::Binary(BitOr)),
        "^" => (BP_BXOR, Infix::Binary(BitXor)),
        "&" => (BP_BAND, Infix::Binary(BitAnd)),
        "==" => (BP_EQ, Infix::Binary(Eq)),
        "!=" => (BP_EQ, Infix::Binary(NotEq)),
        "===" => (BP_EQ, Infix::Binary(StrictEq)),
        "!==" => (BP_EQ, Infix::Binary(StrictNotEq)),
        "<" => (BP_REL, Infix::Binary(Lt)),
        "<=" => (BP_REL, Infix::Binary(LtEq)),
        ">" => (BP_REL, Infix::Binary(Gt)),
        ">=" => (BP_REL, Infix::Binary(GtEq)),
        "+" => (BP_ADD, Infix::Binary(Add)),
        "-" => (BP_ADD, Infix::Binary(Sub)),
        "*" => (BP_MUL, Infix::Binary(Mul)),
        "/" => (BP_MUL, Infix::Binary(Div)),
        "%" => (BP_MUL, Infix::Binary(Rem)),
        "**" => (BP_EXP, Infix::Binary(Exp)),
        _ => return None,
    })
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    /// Current `parse_bp` nesting
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(lexer: Lexer<'a>, depth: usize) -> Self {
        Self { lexer, depth }
    }

    fn src(&self) -> &'a str {
        self.lexer.source()
    }

    /// A single (assignment-level) expression.
    fn expression(&mut self) -> ScriptResult<Expr> {
        self.parse_bp(0)
    }

    fn peek_kind(&mut self) -> ScriptResult<&TokenKind> {
        Ok(&self.lexer.peek()?.kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> ScriptResult<bool> {
        if self.peek_kind()? == kind {
            self.lexer.next_token()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> ScriptResult<Token> {
        let tok = self.lexer.next_token()?;
        if &tok.kind == kind {
            Ok(tok)
        } else {
            Err(ScriptError::syntax(format!(
                "expected {}, found {}",
                what,
                describe(&tok, self.src())
            ))
            .with_span(tok.span))
        }
    }

    fn parse_bp(&mut self, min_bp: u8) -> ScriptResult<Expr> {
        if self.depth >= MAX_NESTING_DEPTH {
            let at = self.lexer.position();
            return Err(ScriptError::nesting_too_deep(MAX_NESTING_DEPTH).with_span(SourceSpan::new(at, at)));
        }
        self.depth += 1;
        let result = self.parse_operators(min_bp);
        self.depth -= 1;
        result
    }

    fn parse_operators(&mut self, min_bp: u8) -> ScriptResult<Expr> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let tok = self.lexer.peek()?.clone();
            match &tok.kind {
                TokenKind::Eof => break,
                TokenKind::Op(op @ ("++" | "--")) => {
                    if BP_CALL < min_bp {
                        break;
                    }
                    let increment = *op == "++";
                    self.lexer.next_token()?;
                    ensure_assignable(&lhs)?;
                    let span = lhs.span.join(tok.span);
                    lhs = Expr::new(
                        ExprKind::Update {
                            increment,
                            prefix: false,
                            target: Box::new(lhs),
                        },
                        span,
                    );
                    continue;
                }
                TokenKind::Dot | TokenKind::LBracket | TokenKind::LParen | TokenKind::Op("?.") => {
                    if BP_CALL < min_bp {
                        break;
                    }
                    lhs = self.parse_postfix(lhs)?;
                    continue;
                }
                _ => {}
            }

            let Some((bp, infix)) = infix_bp(&tok.kind) else {
                break;
            };
            if bp.0 < min_bp {
                break;
            }
            self.lexer.next_token()?;

            lhs = match infix {
                Infix::Binary(op) => {
                    let rhs = self.parse_bp(bp.1)?;
                    let span = lhs.span.join(rhs.span);
                    Expr::new(
                        ExprKind::Binary {
                            op,
                            left: Box::new(lhs),
                            right: Box::new(rhs),
                        },
                        span,
                    )
                }
                Infix::Logical(op) => {
                    let rhs = self.parse_bp(bp.1)?;
                    let span = lhs.span.join(rhs.span);
                    Expr::new(
                        ExprKind::Logical {
                            op,
                            left: Box::new(lhs),
                            right: Box::new(rhs),
                        },
                        span,
                    )
                }
                Infix::Assign(op) => {
                    ensure_assignable(&lhs)?;
                    let rhs = self.parse_bp(bp.1)?;
                    let span = lhs.span.join(rhs.span);
                    Expr::new(
                        ExprKind::Assign {
                            op,
                            target: Box::new(lhs),
                            value: Box::new(rhs),
                        },
                        span,
                    )
                }
                Infix::Ternary => {
                    let consequent = self.parse_bp(0)?;
                    self.expect(&TokenKind::Op(":"), "':'")?;
                    let alternate = self.parse_bp(BP_ASSIGN.1)?;
                    let span = lhs.span.join(alternate.span);
                    Expr::new(
                        ExprKind::Conditional {
                            test: Box::new(lhs),
                            consequent: Box::new(consequent),
                            alternate: Box::new(alternate),
                        },
                        span,
                    )
                }
            };
        }

        Ok(lhs)
    }

    /// Member access, indexing and calls, including optional chaining.
    fn parse_postfix(&mut self, lhs: Expr) -> ScriptResult<Expr> {
        let tok = self.lexer.next_token()?;
        let optional = tok.kind == TokenKind::Op("?.");
        let kind = if optional {
            match self.peek_kind()? {
                TokenKind::LBracket | TokenKind::LParen => self.lexer.next_token()?.kind,
                _ => TokenKind::Dot,
            }
        } else {
            tok.kind
        };

        match kind {
            TokenKind::Dot => {
                let name_tok = self.lexer.next_token()?;
                let TokenKind::Ident(property) = name_tok.kind else {
                    return Err(ScriptError::syntax(format!(
                        "expected property name, found {}",
                        describe(&name_tok, self.src())
                    ))
                    .with_span(name_tok.span));
                };
                let span = lhs.span.join(name_tok.span);
                Ok(Expr::new(
                    ExprKind::Member {
                        object: Box::new(lhs),
                        property,
                        optional,
                    },
                    span,
                ))
            }
            TokenKind::LBracket => {
                let index = self.expression()?;
                let end = self.expect(&TokenKind::RBracket, "']'")?;
                let span = lhs.span.join(end.span);
                Ok(Expr::new(
                    ExprKind::Index {
                        object: Box::new(lhs),
                        index: Box::new(index),
                        optional,
                    },
                    span,
                ))
            }
            _ => {
                let (args, end) = self.parse_list(TokenKind::RParen, "')'")?;
                let span = lhs.span.join(end);
                Ok(Expr::new(
                    ExprKind::Call {
                        callee: Box::new(lhs),
                        args,
                        optional,
                    },
                    span,
                ))
            }
        }
    }

    /// Comma-separated elements up to `close`, allowing spreads and a
    /// trailing comma. The opening bracket is already consumed.
    fn parse_list(&mut self, close: TokenKind, what: &str) -> ScriptResult<(Vec<Expr>, SourceSpan)> {
        let mut items = Vec::new();
        loop {
            if self.peek_kind()? == &close {
                break;
            }
            items.push(self.parse_element()?);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        let end = self.expect(&close, what)?;
        Ok((items, end.span))
    }

    fn parse_element(&mut self) -> ScriptResult<Expr> {
        if self.peek_kind()? == &TokenKind::Op("...") {
            let tok = self.lexer.next_token()?;
            let inner = self.expression()?;
            let span = tok.span.join(inner.span);
            return Ok(Expr::new(ExprKind::Spread(Box::new(inner)), span));
        }
        self.expression()
    }

    fn parse_prefix(&mut self) -> ScriptResult<Expr> {
        let tok = self.lexer.next_token()?;
        let span = tok.span;

        let kind = match tok.kind {
            TokenKind::Number(n) => ExprKind::Number(n),
            TokenKind::Str(s) => ExprKind::Str(s),
            TokenKind::Regex { source, flags } => ExprKind::Regex { source, flags },
            TokenKind::Template(parts) => ExprKind::Template(self.parse_template(parts)?),
            TokenKind::Ident(name) => return self.parse_identifier(name, span),
            TokenKind::LParen => return self.parse_paren(span),
            TokenKind::LBracket => {
                let (items, end) = self.parse_list(TokenKind::RBracket, "']'")?;
                return Ok(Expr::new(ExprKind::Array(items), span.join(end)));
            }
            TokenKind::LBrace => return self.parse_object(span),
            TokenKind::Op(op @ ("!" | "-" | "+" | "~")) => {
                let op = match op {
                    "!" => UnaryOp::Not,
                    "-" => UnaryOp::Neg,
                    "+" => UnaryOp::Pos,
                    _ => UnaryOp::BitNot,
                };
                return self.unary(op, span);
            }
            TokenKind::Op(op @ ("++" | "--")) => {
                let target = self.parse_bp(BP_PREFIX)?;
                ensure_assignable(&target)?;
                let span = span.join(target.span);
                return Ok(Expr::new(
                    ExprKind::Update {
                        increment: op == "++",
                        prefix: true,
                        target: Box::new(target),
                    },
                    span,
                ));
            }
            _ => {
                let tok = Token { kind: tok.kind, span };
                return Err(unexpected(&tok, self.src()));
            }
        };
        Ok(Expr::new(kind, span))
    }

    fn unary(&mut self, op: UnaryOp, start: SourceSpan) -> ScriptResult<Expr> {
        let operand = self.parse_bp(BP_PREFIX)?;
        let span = start.join(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_identifier(&mut self, name: String, span: SourceSpan) -> ScriptResult<Expr> {
        let kind = match name.as_str() {
            "true" => ExprKind::Bool(true),
            "false" => ExprKind::Bool(false),
            "null" => ExprKind::Null,
            "undefined" => ExprKind::Undefined,
            "typeof" => return self.unary(UnaryOp::Typeof, span),
            "void" => return self.unary(UnaryOp::Void, span),
            _ => {
                if self.peek_kind()? == &TokenKind::Op("=>") {
                    self.lexer.next_token()?;
                    return self.parse_arrow_body(vec![name], span);
                }
                ExprKind::Ident(name)
            }
        };
        Ok(Expr::new(kind, span))
    }

    /// `(expr)` or `(a, b) => body`. Arrow parameters are detected by
    /// scanning ahead on a copy of the lexer.
    fn parse_paren(&mut self, start: SourceSpan) -> ScriptResult<Expr> {
        if let Some(params) = self.try_arrow_params()? {
            return self.parse_arrow_body(params, start);
        }
        let inner = self.expression()?;
        let end = self.expect(&TokenKind::RParen, "')'")?;
        Ok(Expr::new(inner.kind, start.join(end.span)))
    }

    fn try_arrow_params(&mut self) -> ScriptResult<Option<Vec<String>>> {
        let mut lookahead = self.lexer.clone();
        let mut params = Vec::new();
        loop {
            match lookahead.next_token() {
                Ok(Token {
                    kind: TokenKind::Ident(name),
                    ..
                }) => params.push(name),
                Ok(Token {
                    kind: TokenKind::RParen,
                    ..
                }) if params.is_empty() => break,
                _ => return Ok(None),
            }
            match lookahead.next_token() {
                Ok(Token {
                    kind: TokenKind::Comma,
                    ..
                }) => continue,
                Ok(Token {
                    kind: TokenKind::RParen,
                    ..
                }) => break,
                _ => return Ok(None),
            }
        }
        match lookahead.next_token() {
            Ok(Token {
                kind: TokenKind::Op("=>"),
                ..
            }) => {
                self.lexer = lookahead;
                Ok(Some(params))
            }
            _ => Ok(None),
        }
    }

    fn parse_arrow_body(&mut self, params: Vec<String>, start: SourceSpan) -> ScriptResult<Expr> {
        let body = self.parse_bp(BP_ASSIGN.1)?;
        let span = start.join(body.span);
        Ok(Expr::new(
            ExprKind::Arrow {
                params,
                body: Rc::new(body),
            },
            span,
        ))
    }

    fn parse_object(&mut self, start: SourceSpan) -> ScriptResult<Expr> {
        let mut entries = Vec::new();
        loop {
            let tok = self.lexer.next_token()?;
            let key = match tok.kind {
                TokenKind::RBrace => return Ok(Expr::new(ExprKind::Object(entries), start.join(tok.span))),
                TokenKind::Ident(name) => {
                    // `{ name }` shorthand
                    if matches!(self.peek_kind()?, TokenKind::Comma | TokenKind::RBrace) {
                        entries.push((
                            PropertyKey::Named(name.clone()),
                            Expr::new(ExprKind::Ident(name), tok.span),
                        ));
                        self.eat(&TokenKind::Comma)?;
                        continue;
                    }
                    PropertyKey::Named(name)
                }
                TokenKind::Str(s) => PropertyKey::Named(s),
                TokenKind::Number(n) => PropertyKey::Named(super::value::format_number(n)),
                TokenKind::LBracket => {
                    let key = self.expression()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    PropertyKey::Computed(key)
                }
                _ => {
                    let tok = Token {
                        kind: tok.kind,
                        span: tok.span,
                    };
                    return Err(unexpected(&tok, self.src()));
                }
            };
            self.expect(&TokenKind::Op(":"), "':'")?;
            let value = self.expression()?;
            entries.push((key, value));
            if !self.eat(&TokenKind::Comma)? {
                let end = self.expect(&TokenKind::RBrace, "'}'")?;
                return Ok(Expr::new(ExprKind::Object(entries), start.join(end.span)));
            }
        }
    }

    fn parse_template(&mut self, parts: Vec<TemplatePart>) -> ScriptResult<Vec<TemplateSegment>> {
        let mut segments = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                TemplatePart::Str(s) => segments.push(TemplateSegment::Str(s)),
                TemplatePart::Expr(span) => {
                    let mut inner = Parser::new(Lexer::starting_at(self.src(), span.start), self.depth);
                    let expr = inner.expression()?;
                    let tok = inner.lexer.next_token()?;
                    if tok.kind != TokenKind::RBrace || tok.span.start != span.end {
                        return Err(unexpected(&tok, self.src()));
                    }
                    segments.push(TemplateSegment::Expr(expr));
                }
            }
        }
        Ok(segments)
    }
}

fn ensure_assignable(target: &Expr) -> ScriptResult<()> {
    match target.kind {
        ExprKind::Ident(_) | ExprKind::Member { optional: false, .. } | ExprKind::Index { optional: false, .. } => {
            Ok(())
        }
        _ => Err(ScriptError::syntax("invalid assignment target").with_span(target.span)),
    }
}

fn describe(tok: &Token, src: &str) -> String {
    match tok.kind {
        TokenKind::Eof => "end of input".to_string(),
        _ => format!("'{}'", tok.span.extract(src).unwrap_or("?")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::value::ScriptErrorKind;

    fn parse(src: &str) -> Expr {
        parse_expression(src).unwrap()
    }

    #[test]
    fn test_precedence() {
        match parse("1 + 2 * 3").kind {
            ExprKind::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exponent_is_right_associative() {
        match parse("2 ** 3 ** 2").kind {
            ExprKind::Binary {
                op: BinaryOp::Exp,
                left,
                right,
            } => {
                assert!(matches!(left.kind, ExprKind::Number(_)));
                assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Exp, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_assignment_chain() {
        let expr = parse("story.a = story.b += 2");
        assert!(expr.is_assignment());
        match expr.kind {
            ExprKind::Assign { op: None, value, .. } => {
                assert!(matches!(value.kind, ExprKind::Assign { op: Some(_), .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_arrow_functions() {
        assert!(matches!(parse("x => x + 1").kind, ExprKind::Arrow { ref params, .. } if params == &["x"]));
        assert!(matches!(parse("(a, b) => a").kind, ExprKind::Arrow { ref params, .. } if params.len() == 2));
        assert!(matches!(parse("() => 1").kind, ExprKind::Arrow { ref params, .. } if params.is_empty()));
        assert!(matches!(parse("(a)").kind, ExprKind::Ident(_)));
    }

    #[test]
    fn test_member_call_chain() {
        match parse("temp.list.map(x => x * 2)[0]").kind {
            ExprKind::Index { object, .. } => {
                assert!(matches!(object.kind, ExprKind::Call { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_object_literal_forms() {
        match parse("{a: 1, 'b c': 2, [k]: 3, d}").kind {
            ExprKind::Object(entries) => assert_eq!(entries.len(), 4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_template_interpolation() {
        match parse("`n=${story.n + 1}!`").kind {
            ExprKind::Template(segments) => {
                assert_eq!(segments.len(), 3);
                assert!(matches!(segments[1], TemplateSegment::Expr(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_errors() {
        assert!(parse_expression("1 +").is_err());
        assert!(parse_expression("(1").is_err());
        assert!(parse_expression("1 2").is_err());
        assert!(parse_expression("1 = 2").is_err());
        assert!(parse_expression("a ? b").is_err());
    }

    #[test]
    fn test_deep_nesting_is_an_error() {
        let too_deep = |src: &str| {
            let err = parse_expression(src).unwrap_err();
            assert!(matches!(err.kind, ScriptErrorKind::NestingTooDeep { .. }), "{:?}", err);
        };
        too_deep(&format!("{}1{}", "(".repeat(3000), ")".repeat(3000)));
        too_deep(&format!("{}1", "!".repeat(3000)));
        too_deep(&format!("{}1{}", "[".repeat(3000), "]".repeat(3000)));

        let mut template = "1".to_string();
        for _ in 0..200 {
            template = format!("`${{{}}}`", template);
        }
        too_deep(&template);

        let shallow = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert!(matches!(parse(&shallow).kind, ExprKind::Number(n) if n == 1.0));
    }
}
