//! Template tree for weft passages.
//!
//! The parser produces a `Vec<NodeTemplate>` once per passage text; the
//! renderer only ever reads it. Changing what a passage shows means parsing
//! again, never patching a tree in place.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

/// A shared, immutable sequence of templates (a macro body or element content).
pub type Body = Rc<[NodeTemplate]>;

/// Where a template came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub passage: Rc<str>,
    pub line: usize,
}

impl Location {
    pub fn new(passage: impl Into<Rc<str>>, line: usize) -> Self {
        Self {
            passage: passage.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.passage, self.line)
    }
}

/// Which variable scope a sigil selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// `@name`: macros and builtins, frozen after startup.
    Constants,
    /// `$name`: persists across navigation.
    Story,
    /// `_name`: reset on every render.
    Temp,
}

impl ScopeKind {
    pub fn sigil(self) -> char {
        match self {
            ScopeKind::Constants => '@',
            ScopeKind::Story => '$',
            ScopeKind::Temp => '_',
        }
    }

    /// The root identifier the expression sub-lexer rewrites this sigil to.
    pub fn root(self) -> &'static str {
        match self {
            ScopeKind::Constants => "constants",
            ScopeKind::Story => "story",
            ScopeKind::Temp => "temp",
        }
    }
}

/// Expression source after sigil rewriting, with the author's original text
/// kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprSource {
    /// Rewritten source handed to the evaluator.
    pub code: String,
    /// Text exactly as written in the passage.
    pub raw: String,
}

impl ExprSource {
    pub fn new(code: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            raw: raw.into(),
        }
    }
}

/// An operation chained after the base identifier of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostscriptOp {
    /// `.field` (`needs_eval == false`, key is the field name) or `[expr]`
    /// (`needs_eval == true`, key is rewritten source).
    Index {
        key: String,
        needs_eval: bool,
        raw: String,
    },
    /// `(expr, ...)`.
    Call { args: Vec<ExprSource>, raw: String },
}

impl PostscriptOp {
    pub fn raw(&self) -> &str {
        match self {
            PostscriptOp::Index { raw, .. } | PostscriptOp::Call { raw, .. } => raw,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, PostscriptOp::Call { .. })
    }
}

/// Arguments of one macro-chain segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroArgs {
    /// Comma-separated expressions, kept raw until the handler asks.
    List(Vec<ExprSource>),
    /// `_binding of iterable`.
    Iteration {
        binding: String,
        iterable: ExprSource,
    },
}

impl MacroArgs {
    pub fn is_empty(&self) -> bool {
        matches!(self, MacroArgs::List(args) if args.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroSegment {
    pub name: String,
    pub args: MacroArgs,
    pub body: Option<Body>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementTemplate {
    pub name: String,
    pub attributes: IndexMap<String, String>,
    pub eval_attributes: IndexMap<String, ExprSource>,
    pub content: Body,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprTemplate {
    pub scope: ScopeKind,
    pub base: String,
    pub ops: Vec<PostscriptOp>,
    /// `None` for no body, `Some` (possibly empty) for `{ ... }`.
    pub content: Option<Body>,
    pub loc: Location,
}

impl ExprTemplate {
    /// Source-like rendering of the reference, used in diagnostics.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push(self.scope.sigil());
        out.push_str(&self.base);
        for op in &self.ops {
            out.push_str(op.raw());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroChain {
    pub segments: Vec<MacroSegment>,
    pub loc: Location,
}

impl MacroChain {
    pub fn head(&self) -> &MacroSegment {
        &self.segments[0]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkBox {
    /// Destination passage.
    pub link: String,
    /// Visible label.
    pub text: String,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorTemplate {
    pub message: String,
    pub sample: String,
    pub loc: Location,
}

/// One node of a parsed passage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTemplate {
    Text { text: String, loc: Location },
    Element(ElementTemplate),
    Expr(ExprTemplate),
    MacroChain(MacroChain),
    LinkBox(LinkBox),
    Error(ErrorTemplate),
}

impl NodeTemplate {
    pub fn text(text: impl Into<String>, loc: Location) -> Self {
        NodeTemplate::Text {
            text: text.into(),
            loc,
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            NodeTemplate::Text { loc, .. } => loc,
            NodeTemplate::Element(e) => &e.loc,
            NodeTemplate::Expr(e) => &e.loc,
            NodeTemplate::MacroChain(c) => &c.loc,
            NodeTemplate::LinkBox(l) => &l.loc,
            NodeTemplate::Error(e) => &e.loc,
        }
    }

    pub fn line(&self) -> usize {
        self.location().line
    }

    pub fn is_text(&self) -> bool {
        matches!(self, NodeTemplate::Text { .. })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            NodeTemplate::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Visit this node and every descendant in document order.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a NodeTemplate)) {
        visit(self);
        match self {
            NodeTemplate::Element(e) => e.content.iter().for_each(|n| n.walk(visit)),
            NodeTemplate::Expr(e) => {
                if let Some(body) = &e.content {
                    body.iter().for_each(|n| n.walk(visit));
                }
            }
            NodeTemplate::MacroChain(c) => {
                for segment in &c.segments {
                    if let Some(body) = &segment.body {
                        body.iter().for_each(|n| n.walk(visit));
                    }
                }
            }
            NodeTemplate::Text { .. } | NodeTemplate::LinkBox(_) | NodeTemplate::Error(_) => {}
        }
    }
}

/// Walk a whole sequence in document order.
pub fn walk_all<'a>(nodes: &'a [NodeTemplate], visit: &mut dyn FnMut(&'a NodeTemplate)) {
    for node in nodes {
        node.walk(visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: usize) -> Location {
        Location::new("Start", line)
    }

    #[test]
    fn test_describe_expr() {
        let expr = ExprTemplate {
            scope: ScopeKind::Story,
            base: "inventory".into(),
            ops: vec![
                PostscriptOp::Index {
                    key: "items".into(),
                    needs_eval: false,
                    raw: ".items".into(),
                },
                PostscriptOp::Call {
                    args: vec![ExprSource::new("1", "1")],
                    raw: "(1)".into(),
                },
            ],
            content: None,
            loc: loc(1),
        };
        assert_eq!(expr.describe(), "$inventory.items(1)");
    }

    #[test]
    fn test_walk_visits_bodies_in_order() {
        let inner: Body = vec![NodeTemplate::text("b", loc(2))].into();
        let nodes = vec![
            NodeTemplate::text("a", loc(1)),
            NodeTemplate::MacroChain(MacroChain {
                segments: vec![MacroSegment {
                    name: "if".into(),
                    args: MacroArgs::List(vec![]),
                    body: Some(inner),
                    loc: loc(2),
                }],
                loc: loc(2),
            }),
        ];
        let mut texts = Vec::new();
        walk_all(&nodes, &mut |n| {
            if let Some(t) = n.as_text() {
                texts.push(t.to_string());
            }
        });
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_body_differs_from_no_body() {
        let mut with_body = ExprTemplate {
            scope: ScopeKind::Constants,
            base: "later".into(),
            ops: vec![],
            content: None,
            loc: loc(1),
        };
        let without = with_body.clone();
        with_body.content = Some(Vec::new().into());
        assert_ne!(with_body, without);
    }
}
