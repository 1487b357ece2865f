//! Passage parser.
//!
//! Turns passage text into a `Vec<NodeTemplate>` in one pass. The parser
//! dispatches on a small set of reserved characters; everything else is
//! literal text. Embedded expressions are delimited and rewritten by
//! [`super::relex`], so the parser never has to understand script syntax.
//!
//! Parsing is all-or-nothing: the first structural problem ends the parse
//! with a single [`ParseError`]. Duplicate attributes are only warnings.

use std::rc::Rc;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use log::{debug, warn};
use phf::phf_set;
use regex::Regex;
use weft_template::{
    Body, ElementTemplate, ExprSource, ExprTemplate, LinkBox, Location, MacroArgs, MacroChain,
    MacroSegment, NodeTemplate, PostscriptOp, ScopeKind,
};

use super::relex::{self, Stop};
use crate::core::script::{ScriptError, TokenKind, MAX_NESTING_DEPTH};
use crate::utils::error::{ParseError, ParseResult, Warning};

/// Tags that never have content.
static VOID_TAGS: phf::Set<&'static str> = phf_set! {
    "area", "base", "br", "col", "embed", "hr", "img", "input",
    "link", "meta", "source", "track", "wbr",
};

/// Tags that are rejected outright.
static BANNED_TAGS: phf::Set<&'static str> = phf_set! {
    "script", "iframe", "object", "applet", "frame", "frameset",
};

/// Tags whose content is kept verbatim.
static RAW_TEXT_TAGS: phf::Set<&'static str> = phf_set! {
    "style",
};

lazy_static! {
    /// The three link separators, in the order they are tried.
    static ref LINK_SEPARATOR: Regex = Regex::new(r"->|<-|\|").unwrap();
}

/// How the parser should treat a registered macro name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacroShape {
    /// Sibling macro names folded into one chain (`elseif`, `else`).
    pub chain: Option<&'static [&'static str]>,
    /// Arguments use `_name of iterable` instead of a comma list.
    pub iteration: bool,
}

impl MacroShape {
    fn is_chain(&self) -> bool {
        self.chain.is_some() || self.iteration
    }
}

/// Registry metadata the parser needs while it parses.
pub trait MacroLookup {
    /// `None` if `name` is not a registered macro.
    fn shape(&self, name: &str) -> Option<MacroShape>;
}

/// A lookup that knows no macros; every `@name` parses as a plain reference.
pub struct NoMacros;

impl MacroLookup for NoMacros {
    fn shape(&self, _name: &str) -> Option<MacroShape> {
        None
    }
}

/// Output of a successful parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub templates: Vec<NodeTemplate>,
    pub warnings: Vec<Warning>,
}

/// Parse passage text. `start_line` is the line number of the first line.
pub fn parse(
    source: &str,
    passage: &str,
    start_line: usize,
    lookup: &dyn MacroLookup,
) -> ParseResult<Parsed> {
    debug!("parsing passage '{}' ({} bytes)", passage, source.len());
    let mut parser = Parser::new(source, passage, start_line, lookup);
    let templates = parser.parse_nodes(&Until::End)?;
    for warning in &parser.warnings {
        warn!("{}", warning);
    }
    Ok(Parsed {
        templates,
        warnings: parser.warnings,
    })
}

/// What ends the node sequence currently being parsed.
enum Until {
    End,
    /// A `}` closing the macro body opened at this offset.
    Brace(usize),
    /// `</name>`, for the element opened at this offset.
    CloseTag(String, usize),
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    passage: Rc<str>,
    start_line: usize,
    /// Byte offsets at which each line starts
    line_starts: Vec<usize>,
    lookup: &'a dyn MacroLookup,
    warnings: Vec<Warning>,
    /// Open elements and macro bodies around the cursor
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, passage: &str, start_line: usize, lookup: &'a dyn MacroLookup) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            src,
            pos: 0,
            passage: passage.into(),
            start_line,
            line_starts,
            lookup,
            warnings: Vec::new(),
            depth: 0,
        }
    }

    // ========================================================================
    // Positions and diagnostics
    // ========================================================================

    fn line_at(&self, offset: usize) -> usize {
        self.start_line + self.line_starts.partition_point(|&s| s <= offset) - 1
    }

    fn loc(&self, offset: usize) -> Location {
        Location::new(self.passage.clone(), self.line_at(offset))
    }

    fn error(&self, message: impl Into<String>, at: usize) -> ParseError {
        let at = at.min(self.src.len());
        ParseError::new(message, self.passage.to_string(), self.line_at(at), &self.src[at..])
    }

    fn script_error(&self, err: ScriptError, fallback: usize) -> ParseError {
        let at = err.span.map(|s| s.start).unwrap_or(fallback);
        self.error(err.kind.to_string(), at)
    }

    fn warn(&mut self, message: String, at: usize) {
        let line = self.line_at(at);
        self.warnings
            .push(Warning::new(message, self.passage.to_string(), line));
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src.get(offset..).and_then(|s| s.chars().next())
    }

    fn prev_char(&self) -> Option<char> {
        self.src[..self.pos].chars().next_back()
    }

    fn skip_while(&mut self, pred: impl Fn(char) -> bool) {
        let len = self
            .rest()
            .find(|c: char| !pred(c))
            .unwrap_or(self.rest().len());
        self.pos += len;
    }

    fn take_name(&mut self) -> &'a str {
        let start = self.pos;
        self.skip_while(|c| c.is_ascii_alphanumeric() || c == '_');
        &self.src[start..self.pos]
    }

    // ========================================================================
    // Node sequences
    // ========================================================================

    fn parse_nodes(&mut self, until: &Until) -> ParseResult<Vec<NodeTemplate>> {
        if self.depth >= MAX_NESTING_DEPTH {
            let open = match until {
                Until::End => 0,
                Until::Brace(open) | Until::CloseTag(_, open) => *open,
            };
            return Err(self.error(
                format!("markup nested too deeply (more than {} levels)", MAX_NESTING_DEPTH),
                open,
            ));
        }
        self.depth += 1;
        let nodes = self.parse_sequence(until);
        self.depth -= 1;
        nodes
    }

    fn parse_sequence(&mut self, until: &Until) -> ParseResult<Vec<NodeTemplate>> {
        let mut nodes = Vec::new();
        let mut text = TextBuffer::default();

        loop {
            let Some(c) = self.peek() else {
                return match until {
                    Until::End => {
                        text.flush(&mut nodes, self);
                        Ok(nodes)
                    }
                    Until::Brace(open) => {
                        Err(self.error("missing '}' to close the macro body", *open))
                    }
                    Until::CloseTag(name, open) => {
                        Err(self.error(format!("missing closing tag for <{}>", name), *open))
                    }
                };
            };

            match c {
                '}' if matches!(until, Until::Brace(_)) => {
                    self.pos += 1;
                    text.flush(&mut nodes, self);
                    return Ok(nodes);
                }
                '<' => {
                    if let Until::CloseTag(name, _) = until {
                        if let Some(len) = self.closing_tag_len(name) {
                            self.pos += len;
                            text.flush(&mut nodes, self);
                            return Ok(nodes);
                        }
                    }
                    if self.peek_at(self.pos + 1).map_or(false, |c| c.is_ascii_alphabetic()) {
                        text.flush(&mut nodes, self);
                        let element = self.parse_element()?;
                        nodes.push(element);
                    } else {
                        text.push('<', self.pos);
                        self.pos += 1;
                    }
                }
                '\\' => self.parse_escape(&mut text)?,
                '@' | '$' | '_' if self.starts_reference(c) => {
                    text.flush(&mut nodes, self);
                    let node = self.parse_reference()?;
                    nodes.push(node);
                }
                '[' if self.rest().starts_with("[[") => {
                    text.flush(&mut nodes, self);
                    let link = self.parse_link()?;
                    nodes.push(link);
                }
                '/' if self.rest().starts_with("/*") => self.skip_block_comment()?,
                '/' if self.rest().starts_with("//")
                    && self.prev_char().map_or(true, char::is_whitespace) =>
                {
                    self.skip_while(|c| c != '\n');
                }
                _ => {
                    let start = self.pos;
                    let first = c.len_utf8();
                    let len = self.rest()[first..]
                        .find(|c: char| "\\<@$_[/}".contains(c))
                        .map_or(self.rest().len(), |i| i + first);
                    self.pos += len;
                    let src = self.src;
                    text.push_str(&src[start..self.pos], start);
                }
            }
        }
    }

    /// Length of `</name>` (any case, optional spaces) at the cursor.
    fn closing_tag_len(&self, name: &str) -> Option<usize> {
        let rest = self.rest().strip_prefix("</")?;
        let candidate = rest.get(..name.len())?;
        if !candidate.eq_ignore_ascii_case(name) {
            return None;
        }
        let after = &rest[name.len()..];
        let trimmed = after.trim_start();
        if trimmed.starts_with('>') {
            Some(2 + name.len() + (after.len() - trimmed.len()) + 1)
        } else {
            None
        }
    }

    fn parse_escape(&mut self, text: &mut TextBuffer) -> ParseResult<()> {
        let start = self.pos;
        self.pos += 1;
        match self.peek() {
            // Escaped line break: nothing is emitted.
            None => {}
            Some('\n') => self.pos += 1,
            Some('\r') => {
                self.pos += 1;
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
            }
            Some(c) if c.is_ascii_alphanumeric() => {
                return Err(self.error(format!("illegal escape '\\{}'", c), start));
            }
            Some(c) => {
                text.push(c, start);
                self.pos += c.len_utf8();
            }
        }
        Ok(())
    }

    fn skip_block_comment(&mut self) -> ParseResult<()> {
        let start = self.pos;
        match self.rest()[2..].find("*/") {
            Some(end) => {
                self.pos += 2 + end + 2;
                Ok(())
            }
            None => Err(self.error("unterminated comment", start)),
        }
    }

    // ========================================================================
    // Elements
    // ========================================================================

    fn parse_element(&mut self) -> ParseResult<NodeTemplate> {
        let open = self.pos;
        self.pos += 1;
        let name_start = self.pos;
        self.skip_while(|c| c.is_ascii_alphanumeric() || c == '-');
        let name = self.src[name_start..self.pos].to_ascii_lowercase();

        if BANNED_TAGS.contains(name.as_str()) {
            return Err(self.error(format!("<{}> is not allowed", name), open));
        }

        let mut attributes: IndexMap<String, String> = IndexMap::new();
        let mut eval_attributes: IndexMap<String, ExprSource> = IndexMap::new();

        // `#id` and `.class` shorthand
        let mut classes = Vec::new();
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    let id = self.take_shorthand();
                    if id.is_empty() {
                        return Err(self.error("empty #id shorthand", open));
                    }
                    if attributes.contains_key("id") {
                        self.warn(format!("duplicate attribute 'id' on <{}>", name), open);
                    } else {
                        attributes.insert("id".into(), id.to_string());
                    }
                }
                Some('.') => {
                    self.pos += 1;
                    let class = self.take_shorthand();
                    if class.is_empty() {
                        return Err(self.error("empty .class shorthand", open));
                    }
                    classes.push(class);
                }
                _ => break,
            }
        }
        if !classes.is_empty() {
            attributes.insert("class".into(), classes.join(" "));
        }

        let self_closing = loop {
            self.skip_while(char::is_whitespace);
            let attr_start = self.pos;
            match self.peek() {
                None => return Err(self.error(format!("unterminated <{}> tag", name), open)),
                Some('>') => {
                    self.pos += 1;
                    break false;
                }
                Some('/') if self.rest().starts_with("/>") => {
                    self.pos += 2;
                    break true;
                }
                _ => {}
            }

            self.skip_while(|c| !c.is_whitespace() && !"=>/\"'".contains(c));
            let key = self.src[attr_start..self.pos].to_string();
            if key.is_empty() {
                return Err(self.error(format!("invalid attribute syntax in <{}>", name), attr_start));
            }

            let value = if self.peek() == Some('=') {
                self.pos += 1;
                self.parse_attribute_value(&name, attr_start)?
            } else {
                AttributeValue::Literal(String::new())
            };

            if attributes.contains_key(&key) || eval_attributes.contains_key(&key) {
                self.warn(format!("duplicate attribute '{}' on <{}>", key, name), attr_start);
                continue;
            }
            match value {
                AttributeValue::Literal(text) => {
                    attributes.insert(key, text);
                }
                AttributeValue::Expr(expr) => {
                    eval_attributes.insert(key, expr);
                }
            }
        };

        let content: Vec<NodeTemplate> = if self_closing || VOID_TAGS.contains(name.as_str()) {
            Vec::new()
        } else if RAW_TEXT_TAGS.contains(name.as_str()) {
            let src = self.src;
            let start = self.pos;
            loop {
                match self.rest().find("</") {
                    Some(i) => {
                        self.pos += i;
                        if let Some(len) = self.closing_tag_len(&name) {
                            let raw = &src[start..self.pos];
                            self.pos += len;
                            break vec![NodeTemplate::text(raw, self.loc(start))];
                        }
                        self.pos += 2;
                    }
                    None => {
                        return Err(self.error(format!("missing closing tag for <{}>", name), open));
                    }
                }
            }
        } else {
            self.parse_nodes(&Until::CloseTag(name.clone(), open))?
        };

        Ok(NodeTemplate::Element(ElementTemplate {
            name,
            attributes,
            eval_attributes,
            content: content.into(),
            loc: self.loc(open),
        }))
    }

    fn take_shorthand(&mut self) -> &'a str {
        let start = self.pos;
        self.skip_while(|c| c.is_alphanumeric() || c == '-' || c == '_');
        &self.src[start..self.pos]
    }

    fn parse_attribute_value(&mut self, element: &str, attr_start: usize) -> ParseResult<AttributeValue> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                let start = self.pos + 1;
                match self.src[start..].find(quote) {
                    Some(len) => {
                        self.pos = start + len + 1;
                        Ok(AttributeValue::Literal(self.src[start..start + len].to_string()))
                    }
                    None => Err(self.error(
                        format!("unterminated attribute value in <{}>", element),
                        attr_start,
                    )),
                }
            }
            Some('(') => {
                let fragment = relex::rewrite_fragment(self.src, self.pos + 1, TokenKind::RParen)
                    .map_err(|e| self.script_error(e, attr_start))?;
                if fragment.stop != Stop::Close {
                    return Err(self.error("expected ')' after attribute expression", fragment.end));
                }
                if fragment.expr.code.is_empty() {
                    return Err(self.error("empty attribute expression", attr_start));
                }
                self.pos = fragment.end + 1;
                Ok(AttributeValue::Expr(fragment.expr))
            }
            _ => {
                let start = self.pos;
                self.skip_while(|c| !c.is_whitespace() && c != '>');
                if self.pos == start {
                    return Err(self.error(format!("missing attribute value in <{}>", element), attr_start));
                }
                Ok(AttributeValue::Literal(self.src[start..self.pos].to_string()))
            }
        }
    }

    // ========================================================================
    // References and macros
    // ========================================================================

    /// Whether the sigil at the cursor starts a reference rather than text.
    fn starts_reference(&self, sigil: char) -> bool {
        if self
            .prev_char()
            .map_or(false, |c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            return false;
        }
        match (sigil, self.peek_at(self.pos + 1)) {
            ('@', Some('(')) => true,
            ('@' | '$', Some(c)) => c.is_ascii_alphabetic() || c == '_',
            ('_', Some(c)) => c.is_ascii_alphabetic(),
            _ => false,
        }
    }

    fn parse_reference(&mut self) -> ParseResult<NodeTemplate> {
        let start = self.pos;
        let scope = match self.peek() {
            Some('$') => ScopeKind::Story,
            Some('_') => ScopeKind::Temp,
            _ => ScopeKind::Constants,
        };
        self.pos += 1;
        let base = self.take_name().to_string();

        if scope == ScopeKind::Constants {
            if let Some(shape) = self.lookup.shape(&base).filter(MacroShape::is_chain) {
                return self.parse_chain(base, shape, start);
            }
        }

        let ops = self.parse_postscript_ops()?;
        let content = self.parse_optional_body(scope == ScopeKind::Constants)?;
        Ok(NodeTemplate::Expr(ExprTemplate {
            scope,
            base,
            ops,
            content,
            loc: self.loc(start),
        }))
    }

    fn parse_postscript_ops(&mut self) -> ParseResult<Vec<PostscriptOp>> {
        let mut ops = Vec::new();
        loop {
            let start = self.pos;
            match self.peek() {
                Some('.')
                    if self
                        .peek_at(self.pos + 1)
                        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_' || c == '$') =>
                {
                    self.pos += 1;
                    let key_start = self.pos;
                    self.skip_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
                    ops.push(PostscriptOp::Index {
                        key: self.src[key_start..self.pos].to_string(),
                        needs_eval: false,
                        raw: self.src[start..self.pos].to_string(),
                    });
                }
                Some('[') if !self.rest().starts_with("[[") => {
                    let (keys, close) = relex::rewrite_list(self.src, start + 1, TokenKind::RBracket)
                        .map_err(|e| self.script_error(e, start))?;
                    if keys.is_empty() {
                        return Err(self.error("empty index", start));
                    }
                    for key in keys {
                        let raw = format!("[{}]", key.raw);
                        ops.push(PostscriptOp::Index {
                            key: key.code,
                            needs_eval: true,
                            raw,
                        });
                    }
                    self.pos = close + 1;
                }
                Some('(') => {
                    let (args, close) = relex::rewrite_list(self.src, start + 1, TokenKind::RParen)
                        .map_err(|e| self.script_error(e, start))?;
                    self.pos = close + 1;
                    ops.push(PostscriptOp::Call {
                        args,
                        raw: self.src[start..self.pos].to_string(),
                    });
                }
                _ => return Ok(ops),
            }
        }
    }

    /// `{ body }` after a reference. Constants allow spaces before the brace.
    fn parse_optional_body(&mut self, allow_space: bool) -> ParseResult<Option<Body>> {
        let save = self.pos;
        if allow_space {
            self.skip_while(|c| c == ' ' || c == '\t');
        }
        if self.peek() != Some('{') {
            self.pos = save;
            return Ok(None);
        }
        let open = self.pos;
        self.pos += 1;
        let nodes = self.parse_nodes(&Until::Brace(open))?;
        Ok(Some(nodes.into()))
    }

    fn parse_chain(&mut self, name: String, shape: MacroShape, start: usize) -> ParseResult<NodeTemplate> {
        let mut segments = vec![self.parse_segment(name, shape.iteration, start)?];

        if let Some(siblings) = shape.chain {
            loop {
                let save = self.pos;
                self.skip_while(char::is_whitespace);
                let at = self.pos;
                let sibling = self.rest().strip_prefix('@').and_then(|rest| {
                    siblings.iter().copied().find(|s| {
                        rest.starts_with(s)
                            && !rest[s.len()..]
                                .starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
                    })
                });
                match sibling {
                    Some(sibling) => {
                        self.pos += 1 + sibling.len();
                        segments.push(self.parse_segment(sibling.to_string(), false, at)?);
                    }
                    None => {
                        self.pos = save;
                        break;
                    }
                }
            }
        }

        Ok(NodeTemplate::MacroChain(MacroChain {
            segments,
            loc: self.loc(start),
        }))
    }

    /// One `name(args) { body }` segment; the cursor is just past the name.
    fn parse_segment(&mut self, name: String, iteration: bool, start: usize) -> ParseResult<MacroSegment> {
        let args = if self.peek() != Some('(') {
            if iteration {
                return Err(self.error(format!("@{} needs (_name of ...)", name), start));
            }
            MacroArgs::List(Vec::new())
        } else if iteration {
            self.parse_iteration_args(&name)?
        } else {
            let open = self.pos;
            let (args, close) = relex::rewrite_list(self.src, open + 1, TokenKind::RParen)
                .map_err(|e| self.script_error(e, open))?;
            self.pos = close + 1;
            MacroArgs::List(args)
        };
        let body = self.parse_optional_body(true)?;
        Ok(MacroSegment {
            name,
            args,
            body,
            loc: self.loc(start),
        })
    }

    /// `(_name of iterable)`
    fn parse_iteration_args(&mut self, name: &str) -> ParseResult<MacroArgs> {
        let open = self.pos;
        self.pos += 1;
        self.skip_while(char::is_whitespace);
        if self.peek() != Some('_') || !self.peek_at(self.pos + 1).map_or(false, |c| c.is_ascii_alphabetic()) {
            return Err(self.error(
                format!("@{} expects a temporary variable (_name) before 'of'", name),
                open,
            ));
        }
        self.pos += 1;
        let binding = self.take_name().to_string();
        self.skip_while(char::is_whitespace);
        let rest = self.rest();
        if !rest.starts_with("of") || rest[2..].starts_with(|c: char| !c.is_whitespace()) {
            return Err(self.error(format!("expected 'of' in @{}", name), open));
        }
        self.pos += 2;

        let fragment = relex::rewrite_fragment(self.src, self.pos, TokenKind::RParen)
            .map_err(|e| self.script_error(e, open))?;
        if fragment.stop != Stop::Close {
            return Err(self.error(format!("@{} takes a single iterable", name), fragment.end));
        }
        if fragment.expr.code.is_empty() {
            return Err(self.error(format!("missing iterable in @{}", name), open));
        }
        self.pos = fragment.end + 1;
        Ok(MacroArgs::Iteration {
            binding,
            iterable: fragment.expr,
        })
    }

    // ========================================================================
    // Links
    // ========================================================================

    fn parse_link(&mut self) -> ParseResult<NodeTemplate> {
        let src = self.src;
        let start = self.pos;
        let inner_start = start + 2;
        let Some(len) = src[inner_start..].find("]]") else {
            return Err(self.error("unterminated link", start));
        };
        let inner = &src[inner_start..inner_start + len];
        let invalid = || self.error("invalid link syntax", start);

        // Overlapping separators such as `<->` count twice.
        let separator_count =
            inner.matches("->").count() + inner.matches("<-").count() + inner.matches('|').count();
        if inner.contains('\n') || separator_count > 1 {
            return Err(invalid());
        }
        let separators: Vec<_> = LINK_SEPARATOR.find_iter(inner).collect();
        let (text, link) = match separators.as_slice() {
            [] => (inner.trim(), inner.trim()),
            [sep] => {
                let left = inner[..sep.start()].trim();
                let right = inner[sep.end()..].trim();
                match sep.as_str() {
                    "<-" => (right, left),
                    _ => (left, right),
                }
            }
            _ => return Err(invalid()),
        };
        if text.is_empty() || link.is_empty() {
            return Err(invalid());
        }

        self.pos = inner_start + len + 2;
        Ok(NodeTemplate::LinkBox(LinkBox {
            link: link.to_string(),
            text: text.to_string(),
            loc: self.loc(start),
        }))
    }
}

enum AttributeValue {
    Literal(String),
    Expr(ExprSource),
}

/// Pending literal text; adjacent runs merge into one node.
#[derive(Default)]
struct TextBuffer {
    text: String,
    start: Option<usize>,
}

impl TextBuffer {
    fn push(&mut self, c: char, at: usize) {
        self.start.get_or_insert(at);
        self.text.push(c);
    }

    fn push_str(&mut self, s: &str, at: usize) {
        self.start.get_or_insert(at);
        self.text.push_str(s);
    }

    fn flush(&mut self, nodes: &mut Vec<NodeTemplate>, parser: &Parser) {
        if let Some(start) = self.start.take() {
            let text = std::mem::take(&mut self.text);
            if !text.is_empty() {
                nodes.push(NodeTemplate::text(text, parser.loc(start)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Macros;

    impl MacroLookup for Macros {
        fn shape(&self, name: &str) -> Option<MacroShape> {
            match name {
                "if" => Some(MacroShape {
                    chain: Some(&["elseif", "else"]),
                    iteration: false,
                }),
                "for" => Some(MacroShape {
                    chain: None,
                    iteration: true,
                }),
                "print" => Some(MacroShape::default()),
                _ => None,
            }
        }
    }

    fn parse_ok(src: &str) -> Vec<NodeTemplate> {
        parse(src, "Test", 1, &Macros).unwrap().templates
    }

    fn parse_err(src: &str) -> ParseError {
        parse(src, "Test", 1, &Macros).unwrap_err()
    }

    #[test]
    fn test_plain_text_is_one_node() {
        let nodes = parse_ok("Hello, world!\nSecond line.");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].as_text(), Some("Hello, world!\nSecond line."));
    }

    #[test]
    fn test_escapes() {
        let nodes = parse_ok("a \\$b \\\nc\\");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].as_text(), Some("a $b c"));
        assert_eq!(parse_err("\\q").message, "illegal escape '\\q'");
    }

    #[test]
    fn test_sigils_need_word_boundary() {
        let nodes = parse_ok("snake_case and me@example.com cost $5");
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].is_text());
    }

    #[test]
    fn test_story_reference_with_ops() {
        let nodes = parse_ok("You have $bag.items[_i, 0].name(1, 2).");
        let NodeTemplate::Expr(expr) = &nodes[1] else {
            panic!("expected expr, got {:?}", nodes[1]);
        };
        assert_eq!(expr.scope, ScopeKind::Story);
        assert_eq!(expr.base, "bag");
        assert_eq!(expr.ops.len(), 5);
        assert_eq!(
            expr.ops[1],
            PostscriptOp::Index {
                key: "temp.i".into(),
                needs_eval: true,
                raw: "[_i]".into()
            }
        );
        assert!(expr.ops[4].is_call());
        assert_eq!(expr.describe(), "$bag.items[_i][0].name(1, 2)");
        assert_eq!(nodes[2].as_text(), Some("."));
    }

    #[test]
    fn test_macro_body_and_lines() {
        let nodes = parse_ok("one\n@print(1) {\n  two\n}\nthree");
        let NodeTemplate::Expr(expr) = &nodes[1] else {
            panic!("expected expr");
        };
        assert_eq!(expr.loc.line, 2);
        let body = expr.content.as_ref().unwrap();
        assert_eq!(body[0].as_text(), Some("\n  two\n"));
        assert_eq!(body[0].line(), 2);
        assert_eq!(nodes[2].line(), 4);
    }

    #[test]
    fn test_story_body_must_be_adjacent() {
        let nodes = parse_ok("$x {y}");
        let NodeTemplate::Expr(expr) = &nodes[0] else {
            panic!("expected expr");
        };
        assert!(expr.content.is_none());
    }

    #[test]
    fn test_if_chain_folds_siblings() {
        let nodes = parse_ok("@if($a) {A}\n@elseif($b) {B} @else {C} tail");
        assert_eq!(nodes.len(), 2);
        let NodeTemplate::MacroChain(chain) = &nodes[0] else {
            panic!("expected chain");
        };
        let names: Vec<_> = chain.segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["if", "elseif", "else"]);
        assert_eq!(chain.segments[1].loc.line, 2);
        assert_eq!(nodes[1].as_text(), Some(" tail"));
    }

    #[test]
    fn test_for_iteration_grammar() {
        let nodes = parse_ok("@for(_item of $bag.filter(x => x > 1)) {_item}");
        let NodeTemplate::MacroChain(chain) = &nodes[0] else {
            panic!("expected chain");
        };
        assert_eq!(
            chain.head().args,
            MacroArgs::Iteration {
                binding: "item".into(),
                iterable: ExprSource::new(
                    "story.bag.filter(x => x > 1)",
                    "$bag.filter(x => x > 1)"
                ),
            }
        );
        assert!(parse(" @for(item of $x) {}", "Test", 1, &Macros).is_err());
        assert!(parse("@for(_i of 1, 2) {}", "Test", 1, &Macros).is_err());
    }

    #[test]
    fn test_unnamed_macro() {
        let nodes = parse_ok("@($x = 1, _y = 2)");
        let NodeTemplate::Expr(expr) = &nodes[0] else {
            panic!("expected expr");
        };
        assert_eq!(expr.base, "");
        assert_eq!(expr.describe(), "@($x = 1, _y = 2)");
    }

    #[test]
    fn test_elements() {
        let nodes = parse_ok("<div#main.a.b title='t' data-x=(1 + $n) hidden><br>x</DIV >");
        let NodeTemplate::Element(el) = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(el.name, "div");
        assert_eq!(el.attributes.get("id").map(String::as_str), Some("main"));
        assert_eq!(el.attributes.get("class").map(String::as_str), Some("a b"));
        assert_eq!(el.attributes.get("hidden").map(String::as_str), Some(""));
        assert_eq!(el.eval_attributes["data-x"].code, "1 + story.n");
        assert_eq!(el.content.len(), 2);
    }

    #[test]
    fn test_style_is_raw() {
        let nodes = parse_ok("<style>a > b { color: $red }</style>");
        let NodeTemplate::Element(el) = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(el.content[0].as_text(), Some("a > b { color: $red }"));
    }

    #[test]
    fn test_duplicate_attribute_warns() {
        let parsed = parse("<p a=1 a=2>x</p>", "Test", 1, &Macros).unwrap();
        assert_eq!(parsed.warnings.len(), 1);
        let NodeTemplate::Element(el) = &parsed.templates[0] else {
            panic!("expected element");
        };
        assert_eq!(el.attributes["a"], "1");
    }

    #[test]
    fn test_element_failures() {
        assert_eq!(parse_err("<b>bold").message, "missing closing tag for <b>");
        assert_eq!(parse_err("\n<script>x</script>").line, 2);
        assert!(parse_err("<p title=\"x>hi</p>").message.contains("unterminated"));
    }

    #[test]
    fn test_links() {
        let link = |src: &str| match &parse_ok(src)[0] {
            NodeTemplate::LinkBox(l) => (l.text.clone(), l.link.clone()),
            other => panic!("expected link, got {:?}", other),
        };
        assert_eq!(link("[[banana]]"), ("banana".into(), "banana".into()));
        assert_eq!(link("[[daisy->eagle]]"), ("daisy".into(), "eagle".into()));
        assert_eq!(link("[[fallacy<-glob]]"), ("glob".into(), "fallacy".into()));
        assert_eq!(link("[[holiday|iguana]]"), ("holiday".into(), "iguana".into()));
        assert!(parse("[[a->b|c]]", "Test", 1, &Macros).is_err());
        assert!(parse("[[a->]]", "Test", 1, &Macros).is_err());
    }

    #[test]
    fn test_comments() {
        let nodes = parse_ok("a // gone\nb /* also\ngone */c http://x");
        assert_eq!(nodes[0].as_text(), Some("a \nb c http://x"));
        assert_eq!(parse_err("/* open").message, "unterminated comment");
    }

    #[test]
    fn test_unterminated_body_is_one_error() {
        let err = parse_err("line\n@print({ never closed");
        assert_eq!(err.line, 2);
    }
}
