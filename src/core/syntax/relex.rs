//! Expression sub-lexer: finds where an embedded expression ends inside
//! passage text and rewrites sigils on the way.
//!
//! `$name` becomes `story.name`, `_name` becomes `temp.name` and `@name`
//! becomes `constants.name`, except directly after `.` or `?.` where the
//! name is a property. Template strings are rewritten inside their `${...}`
//! parts. Comments are dropped; a multi-line block comment leaves its
//! newlines behind so line numbers stay correct.

use weft_template::{ExprSource, ScopeKind};

use crate::core::script::{Lexer, ScriptError, ScriptResult, SourceSpan, TemplatePart, TokenKind};

/// What ended a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// A comma at bracket depth zero.
    Comma,
    /// The enclosing close bracket.
    Close,
}

/// A rewritten expression fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub expr: ExprSource,
    /// Byte offset of the terminator (`,` or the close bracket).
    pub end: usize,
    pub stop: Stop,
}

enum Until {
    /// Stop at a depth-zero comma or the given close bracket.
    Bracket(TokenKind),
    /// Stop at a byte offset (the end of a template interpolation).
    Offset(usize),
}

/// Rewrite the fragment starting at `start`, ending before a depth-zero
/// comma or `close`. An unbalanced bracket or an unterminated string,
/// template, regex or comment is an error.
pub fn rewrite_fragment(src: &str, start: usize, close: TokenKind) -> ScriptResult<Fragment> {
    let (code, end, stop) = rewrite(src, start, Until::Bracket(close))?;
    let raw = src[start..end].trim().to_string();
    Ok(Fragment {
        expr: ExprSource::new(code.trim(), raw),
        end,
        stop,
    })
}

/// Rewrite a comma-separated list up to and excluding `close`. Returns the
/// fragments and the offset of the close bracket.
pub fn rewrite_list(src: &str, start: usize, close: TokenKind) -> ScriptResult<(Vec<ExprSource>, usize)> {
    let mut items = Vec::new();
    let mut pos = start;
    loop {
        let fragment = rewrite_fragment(src, pos, close.clone())?;
        let empty = fragment.expr.code.is_empty();
        match fragment.stop {
            Stop::Comma => {
                if empty {
                    return Err(ScriptError::syntax("empty argument").with_span(SourceSpan::new(pos, fragment.end)));
                }
                items.push(fragment.expr);
                pos = fragment.end + 1;
            }
            Stop::Close => {
                // A trailing comma leaves an empty last fragment.
                if !empty {
                    items.push(fragment.expr);
                }
                return Ok((items, fragment.end));
            }
        }
    }
}

/// Rewrite a whole standalone expression.
pub fn rewrite_expression(code: &str) -> ScriptResult<String> {
    let (out, _, _) = rewrite(code, 0, Until::Offset(code.len()))?;
    Ok(out.trim().to_string())
}

fn closer_for(open: &TokenKind) -> TokenKind {
    match open {
        TokenKind::LParen => TokenKind::RParen,
        TokenKind::LBracket => TokenKind::RBracket,
        _ => TokenKind::RBrace,
    }
}

fn bracket_char(kind: &TokenKind) -> char {
    match kind {
        TokenKind::LParen => '(',
        TokenKind::RParen => ')',
        TokenKind::LBracket => '[',
        TokenKind::RBracket => ']',
        TokenKind::LBrace => '{',
        _ => '}',
    }
}

fn rewrite(src: &str, start: usize, until: Until) -> ScriptResult<(String, usize, Stop)> {
    let mut lexer = Lexer::starting_at(src, start).keep_comments();
    let mut out = String::new();
    let mut stack: Vec<TokenKind> = Vec::new();
    let mut copied = start;
    let mut after_dot = false;

    loop {
        let tok = lexer.next_token()?;

        if let Until::Offset(end) = until {
            if tok.span.start >= end || tok.kind == TokenKind::Eof {
                if let Some(open) = stack.last() {
                    return Err(unclosed(open, tok.span));
                }
                out.push_str(&src[copied..end.max(copied)]);
                return Ok((out, end, Stop::Close));
            }
        }

        // Whitespace between tokens is kept as written.
        out.push_str(&src[copied..tok.span.start]);
        copied = tok.span.end;

        match &tok.kind {
            TokenKind::Eof => {
                let expected = match (&until, stack.last()) {
                    (_, Some(open)) => bracket_char(&closer_for(open)),
                    (Until::Bracket(close), None) => bracket_char(close),
                    (Until::Offset(_), None) => ')',
                };
                return Err(ScriptError::syntax(format!("missing '{}'", expected))
                    .with_span(SourceSpan::new(start, tok.span.end)));
            }
            TokenKind::Comma if stack.is_empty() && matches!(until, Until::Bracket(_)) => {
                return Ok((out, tok.span.start, Stop::Comma));
            }
            kind if kind.is_open_bracket() => {
                stack.push(kind.clone());
                out.push_str(tok.span.extract(src).unwrap_or_default());
            }
            kind if kind.is_close_bracket() => match stack.pop() {
                Some(open) if closer_for(&open) == *kind => {
                    out.push_str(tok.span.extract(src).unwrap_or_default());
                }
                Some(open) => {
                    return Err(ScriptError::syntax(format!(
                        "mismatched '{}', expected '{}'",
                        bracket_char(kind),
                        bracket_char(&closer_for(&open))
                    ))
                    .with_span(tok.span))
                }
                None => match &until {
                    Until::Bracket(close) if close == kind => {
                        return Ok((out, tok.span.start, Stop::Close));
                    }
                    _ => {
                        return Err(ScriptError::syntax(format!("unexpected '{}'", bracket_char(kind)))
                            .with_span(tok.span))
                    }
                },
            },
            TokenKind::Comment { newlines } => {
                if *newlines > 0 {
                    out.push_str(&"\n".repeat(*newlines));
                } else {
                    out.push(' ');
                }
            }
            TokenKind::Ident(name) if !after_dot => out.push_str(&rewrite_ident(name)),
            TokenKind::At => {
                let next = lexer.peek()?.clone();
                match &next.kind {
                    TokenKind::Ident(name) if next.span.start == tok.span.end => {
                        lexer.next_token()?;
                        copied = next.span.end;
                        out.push_str(ScopeKind::Constants.root());
                        out.push('.');
                        out.push_str(name);
                    }
                    _ => out.push('@'),
                }
            }
            TokenKind::Template(parts) => {
                let mut pos = tok.span.start;
                for part in parts {
                    if let TemplatePart::Expr(span) = part {
                        out.push_str(&src[pos..span.start]);
                        let (inner, _, _) = rewrite(src, span.start, Until::Offset(span.end))?;
                        out.push_str(&inner);
                        pos = span.end;
                    }
                }
                out.push_str(&src[pos..tok.span.end]);
            }
            _ => out.push_str(tok.span.extract(src).unwrap_or_default()),
        }

        after_dot = matches!(tok.kind, TokenKind::Dot | TokenKind::Op("?."));
    }
}

fn unclosed(open: &TokenKind, at: SourceSpan) -> ScriptError {
    ScriptError::syntax(format!("missing '{}'", bracket_char(&closer_for(open)))).with_span(at)
}

/// Rewrite a single identifier token if it carries a sigil.
fn rewrite_ident(name: &str) -> String {
    for scope in [ScopeKind::Story, ScopeKind::Temp] {
        if let Some(rest) = name.strip_prefix(scope.sigil()) {
            if !rest.is_empty() && !rest.starts_with(|c: char| c.is_ascii_digit()) {
                return format!("{}.{}", scope.root(), rest);
            }
        }
    }
    name.to_string()
}
