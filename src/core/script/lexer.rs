//! Character-level lexer for the expression sub-language.
//!
//! The same lexer serves two callers: the passage parser's sub-lexer, which
//! walks embedded fragments inside passage text and rewrites sigils, and the
//! expression parser, which tokenizes the rewritten source for evaluation.
//!
//! Whether `/` starts a regex literal or is a division operator depends on the
//! previous significant token, tracked in `regex_allowed`.

use phf::phf_set;

use super::parser::MAX_NESTING_DEPTH;
use super::value::{ScriptError, ScriptResult, SourceSpan};

/// Keywords after which an expression (and therefore a regex) may follow.
static REGEX_KEYWORDS: phf::Set<&'static str> = phf_set! {
    "return", "typeof", "case", "do", "else", "in", "instanceof", "new",
    "delete", "void", "throw", "of", "yield", "await",
};

/// Operators, longest first so the scanner can take the first match.
const OPERATORS: &[&str] = &[
    "===", "!==", "**=", "...", "&&=", "||=", "??=", "==", "!=", "<=", ">=", "&&", "||", "??",
    "?.", "=>", "++", "--", "+=", "-=", "*=", "/=", "%=", "**", "+", "-", "*", "/", "%", "<",
    ">", "=", "!", "?", ":", "&", "|", "^", "~", ";",
];

/// A piece of a template string.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    /// Literal text with escapes already applied.
    Str(String),
    /// An interpolated `${...}` expression, as a byte range of the source.
    Expr(SourceSpan),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Regex { source: String, flags: String },
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    At,
    Op(&'static str),
    /// Only produced when comments are kept; `newlines` counts line breaks inside.
    Comment { newlines: usize },
    Eof,
}

impl TokenKind {
    pub fn is_open_bracket(&self) -> bool {
        matches!(self, TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace)
    }

    pub fn is_close_bracket(&self) -> bool {
        matches!(self, TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: SourceSpan,
}

/// The expression lexer.
#[derive(Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    regex_allowed: bool,
    keep_comments: bool,
    peeked: Option<Token>,
    /// Template strings enclosing this lexer
    nesting: usize,
}

impl<'a> Lexer<'a> {
    /// Lex `src` from the beginning, skipping comments.
    pub fn new(src: &'a str) -> Self {
        Self::starting_at(src, 0)
    }

    /// Lex `src` starting at byte offset `pos`.
    pub fn starting_at(src: &'a str, pos: usize) -> Self {
        Lexer {
            src,
            pos,
            regex_allowed: true,
            keep_comments: false,
            peeked: None,
            nesting: 0,
        }
    }

    /// Report comments as tokens instead of skipping them.
    pub fn keep_comments(mut self) -> Self {
        self.keep_comments = true;
        self
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    /// Byte offset of the next unread character.
    pub fn position(&self) -> usize {
        match &self.peeked {
            Some(tok) => tok.span.start,
            None => self.pos,
        }
    }

    pub fn peek(&mut self) -> ScriptResult<&Token> {
        if self.peeked.is_none() {
            let tok = self.scan()?;
            self.peeked = Some(tok);
        }
        match &self.peeked {
            Some(tok) => Ok(tok),
            None => Err(ScriptError::other("lexer lost its lookahead")),
        }
    }

    pub fn next_token(&mut self) -> ScriptResult<Token> {
        match self.peeked.take() {
            Some(tok) => Ok(tok),
            None => self.scan(),
        }
    }

    fn ch(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn ch_at(&self, offset: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.ch()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.ch() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn error_at(&self, start: usize, msg: impl Into<String>) -> ScriptError {
        ScriptError::syntax(msg).with_span(SourceSpan::new(start, self.pos))
    }

    fn scan(&mut self) -> ScriptResult<Token> {
        loop {
            self.skip_whitespace();
            let start = self.pos;
            let Some(c) = self.ch() else {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    span: SourceSpan::new(start, start),
                });
            };

            // Comments never change `regex_allowed`.
            if c == '/' && matches!(self.ch_at(1), Some('/') | Some('*')) {
                let newlines = self.scan_comment()?;
                if self.keep_comments {
                    return Ok(Token {
                        kind: TokenKind::Comment { newlines },
                        span: SourceSpan::new(start, self.pos),
                    });
                }
                continue;
            }

            let kind = self.scan_kind(c, start)?;
            self.regex_allowed = match &kind {
                TokenKind::Ident(name) => REGEX_KEYWORDS.contains(name.as_str()),
                TokenKind::Number(_)
                | TokenKind::Str(_)
                | TokenKind::Template(_)
                | TokenKind::Regex { .. } => false,
                k if k.is_close_bracket() => false,
                TokenKind::Op("++") | TokenKind::Op("--") => false,
                _ => true,
            };
            return Ok(Token {
                kind,
                span: SourceSpan::new(start, self.pos),
            });
        }
    }

    fn scan_kind(&mut self, c: char, start: usize) -> ScriptResult<TokenKind> {
        match c {
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            ',' => self.single(TokenKind::Comma),
            '@' => self.single(TokenKind::At),
            '"' | '\'' => self.scan_string(c),
            '`' => self.scan_template(),
            '.' if matches!(self.ch_at(1), Some('0'..='9')) => self.scan_number(),
            '.' if !matches!((self.ch_at(1), self.ch_at(2)), (Some('.'), Some('.'))) => {
                self.single(TokenKind::Dot)
            }
            '0'..='9' => self.scan_number(),
            '/' if self.regex_allowed => self.scan_regex(),
            c if is_ident_start(c) => Ok(self.scan_ident()),
            _ => {
                let rest = &self.src[self.pos..];
                match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                    // `?.` followed by a digit is a ternary and a number.
                    Some(&"?.") if matches!(self.ch_at(2), Some('0'..='9')) => {
                        self.pos += 1;
                        Ok(TokenKind::Op("?"))
                    }
                    Some(op) => {
                        self.pos += op.len();
                        Ok(TokenKind::Op(op))
                    }
                    None => {
                        self.advance();
                        Err(self.error_at(start, format!("unexpected character '{}'", c)))
                    }
                }
            }
        }
    }

    fn single(&mut self, kind: TokenKind) -> ScriptResult<TokenKind> {
        self.advance();
        Ok(kind)
    }

    /// Consume a `//` or `/* */` comment, returning the number of newlines in it.
    fn scan_comment(&mut self) -> ScriptResult<usize> {
        let start = self.pos;
        self.pos += 1;
        if self.advance() == Some('/') {
            while let Some(c) = self.ch() {
                if c == '\n' {
                    break;
                }
                self.pos += c.len_utf8();
            }
            return Ok(0);
        }
        let mut newlines = 0;
        loop {
            match self.advance() {
                None => return Err(self.error_at(start, "unterminated comment")),
                Some('*') if self.ch() == Some('/') => {
                    self.pos += 1;
                    return Ok(newlines);
                }
                Some('\n') => newlines += 1,
                Some(_) => {}
            }
        }
    }

    fn scan_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.ch() {
            if is_ident_continue(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        TokenKind::Ident(self.src[start..self.pos].to_string())
    }

    /// Approximate numeric literals: decimal with optional fraction and
    /// exponent, or hexadecimal.
    fn scan_number(&mut self) -> ScriptResult<TokenKind> {
        let start = self.pos;
        if self.ch() == Some('0') && matches!(self.ch_at(1), Some('x' | 'X')) {
            self.pos += 2;
            while matches!(self.ch(), Some(c) if c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = &self.src[start + 2..self.pos];
            return i64::from_str_radix(digits, 16)
                .map(|n| TokenKind::Number(n as f64))
                .map_err(|_| self.error_at(start, "invalid hexadecimal literal"));
        }
        while matches!(self.ch(), Some('0'..='9')) {
            self.pos += 1;
        }
        if self.ch() == Some('.') && matches!(self.ch_at(1), Some('0'..='9')) {
            self.pos += 1;
            while matches!(self.ch(), Some('0'..='9')) {
                self.pos += 1;
            }
        } else if self.ch() == Some('.')
            && !matches!(self.ch_at(1), Some(c) if is_ident_start(c) || c == '.')
        {
            // `1.` is a complete literal.
            self.pos += 1;
        }
        if matches!(self.ch(), Some('e' | 'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.ch(), Some('+' | '-')) {
                self.pos += 1;
            }
            if matches!(self.ch(), Some('0'..='9')) {
                while matches!(self.ch(), Some('0'..='9')) {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
            }
        }
        let text = &self.src[start..self.pos];
        text.trim_end_matches('.')
            .parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error_at(start, format!("invalid number '{}'", text)))
    }

    fn scan_string(&mut self, quote: char) -> ScriptResult<TokenKind> {
        let start = self.pos;
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => return Err(self.error_at(start, "unterminated string")),
                Some(c) if c == quote => return Ok(TokenKind::Str(out)),
                Some('\\') => self.scan_escape(start, &mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn scan_escape(&mut self, start: usize, out: &mut String) -> ScriptResult<()> {
        match self.advance() {
            None => Err(self.error_at(start, "unterminated string")),
            Some('n') => {
                out.push('\n');
                Ok(())
            }
            Some('t') => {
                out.push('\t');
                Ok(())
            }
            Some('r') => {
                out.push('\r');
                Ok(())
            }
            Some('0') => {
                out.push('\0');
                Ok(())
            }
            Some('\n') => Ok(()),
            Some('x') => {
                let c = self.scan_hex_digits(2).ok_or_else(|| self.error_at(start, "invalid \\x escape"))?;
                out.push(c);
                Ok(())
            }
            Some('u') => {
                let c = if self.ch() == Some('{') {
                    self.pos += 1;
                    let digits_start = self.pos;
                    while matches!(self.ch(), Some(c) if c.is_ascii_hexdigit()) {
                        self.pos += 1;
                    }
                    let code = u32::from_str_radix(&self.src[digits_start..self.pos], 16).ok();
                    if self.advance() != Some('}') {
                        None
                    } else {
                        code.and_then(char::from_u32)
                    }
                } else {
                    self.scan_hex_digits(4)
                };
                let c = c.ok_or_else(|| self.error_at(start, "invalid \\u escape"))?;
                out.push(c);
                Ok(())
            }
            Some(c) => {
                out.push(c);
                Ok(())
            }
        }
    }

    fn scan_hex_digits(&mut self, count: usize) -> Option<char> {
        let digits = self.src.get(self.pos..self.pos + count)?;
        let code = u32::from_str_radix(digits, 16).ok()?;
        self.pos += count;
        char::from_u32(code)
    }

    fn scan_template(&mut self) -> ScriptResult<TokenKind> {
        let start = self.pos;
        self.advance();
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error_at(start, "unterminated template string")),
                Some('`') => {
                    if !text.is_empty() || parts.is_empty() {
                        parts.push(TemplatePart::Str(text));
                    }
                    return Ok(TokenKind::Template(parts));
                }
                Some('\\') => self.scan_escape(start, &mut text)?,
                Some('$') if self.ch() == Some('{') => {
                    self.pos += 1;
                    if !text.is_empty() {
                        parts.push(TemplatePart::Str(std::mem::take(&mut text)));
                    }
                    let end = self.find_interpolation_end(start)?;
                    parts.push(TemplatePart::Expr(SourceSpan::new(self.pos, end)));
                    self.pos = end + 1;
                }
                Some(c) => text.push(c),
            }
        }
    }

    /// Find the `}` closing a `${`, lexing the interpolation so braces inside
    /// strings or nested templates do not count.
    fn find_interpolation_end(&self, template_start: usize) -> ScriptResult<usize> {
        if self.nesting >= MAX_NESTING_DEPTH {
            return Err(ScriptError::nesting_too_deep(MAX_NESTING_DEPTH)
                .with_span(SourceSpan::new(template_start, self.pos)));
        }
        let mut inner = Lexer::starting_at(self.src, self.pos);
        inner.nesting = self.nesting + 1;
        let mut depth = 0usize;
        loop {
            let tok = inner.next_token()?;
            match tok.kind {
                TokenKind::Eof => {
                    return Err(ScriptError::syntax("unterminated template string")
                        .with_span(SourceSpan::new(template_start, tok.span.end)))
                }
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace if depth == 0 => return Ok(tok.span.start),
                TokenKind::RBrace => depth -= 1,
                _ => {}
            }
        }
    }

    fn scan_regex(&mut self) -> ScriptResult<TokenKind> {
        let start = self.pos;
        self.advance();
        let body_start = self.pos;
        let mut in_class = false;
        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(self.error_at(start, "unterminated regular expression"))
                }
                Some('\\') => {
                    if matches!(self.advance(), None | Some('\n')) {
                        return Err(self.error_at(start, "unterminated regular expression"));
                    }
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some(_) => {}
            }
        }
        let source = self.src[body_start..self.pos - 1].to_string();
        let flags_start = self.pos;
        while matches!(self.ch(), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        Ok(TokenKind::Regex {
            source,
            flags: self.src[flags_start..self.pos].to_string(),
        })
    }
}

pub fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            if tok.kind == TokenKind::Eof {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn test_division_after_identifier() {
        let toks = tokenize("a / b / c");
        assert_eq!(toks[1], TokenKind::Op("/"));
        assert_eq!(toks[3], TokenKind::Op("/"));
    }

    #[test]
    fn test_regex_after_operator() {
        let toks = tokenize("x = /ab+c/gi");
        assert_eq!(
            toks[2],
            TokenKind::Regex {
                source: "ab+c".into(),
                flags: "gi".into()
            }
        );
    }

    #[test]
    fn test_regex_after_paren_open_and_keyword() {
        assert!(matches!(tokenize("(/a/)")[1], TokenKind::Regex { .. }));
        assert!(matches!(tokenize("typeof /a/")[1], TokenKind::Regex { .. }));
        assert_eq!(tokenize("(a) / 2")[3], TokenKind::Op("/"));
    }

    #[test]
    fn test_regex_class_may_contain_slash() {
        let toks = tokenize("/[/]x/");
        assert_eq!(
            toks[0],
            TokenKind::Regex {
                source: "[/]x".into(),
                flags: String::new()
            }
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokenize("42")[0], TokenKind::Number(42.0));
        assert_eq!(tokenize("3.5e2")[0], TokenKind::Number(350.0));
        assert_eq!(tokenize(".25")[0], TokenKind::Number(0.25));
        assert_eq!(tokenize("0xff")[0], TokenKind::Number(255.0));
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(tokenize(r#""a\nb""#)[0], TokenKind::Str("a\nb".into()));
        assert_eq!(tokenize(r"'it\'s'")[0], TokenKind::Str("it's".into()));
        assert_eq!(tokenize(r#""\u{1F600}""#)[0], TokenKind::Str("\u{1F600}".into()));
    }

    #[test]
    fn test_unterminated_string_fails() {
        let mut lexer = Lexer::new("\"abc");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_template_parts() {
        let src = "`a ${x + {b: 1}.b} c`";
        match &tokenize(src)[0] {
            TokenKind::Template(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], TemplatePart::Str("a ".into()));
                if let TemplatePart::Expr(span) = parts[1] {
                    assert_eq!(span.extract(src), Some("x + {b: 1}.b"));
                } else {
                    panic!("expected interpolation");
                }
            }
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn test_comments_kept_with_newlines() {
        let mut lexer = Lexer::new("a /* one\ntwo\n */ b").keep_comments();
        lexer.next_token().unwrap();
        assert_eq!(
            lexer.next_token().unwrap().kind,
            TokenKind::Comment { newlines: 2 }
        );
    }

    #[test]
    fn test_operators_longest_match() {
        assert_eq!(
            tokenize("a === b ?? c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Op("==="),
                TokenKind::Ident("b".into()),
                TokenKind::Op("??"),
                TokenKind::Ident("c".into()),
            ]
        );
    }
}
