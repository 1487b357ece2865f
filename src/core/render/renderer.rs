//! The renderer: walks a template tree and builds host nodes.
//!
//! # Control flow
//!
//! Every render call returns a [`LoopSignal`]. `@break` and `@continue`
//! produce a signal that travels back up through enclosing bodies until a
//! loop macro consumes it. A signal produced outside any loop is reported
//! where it happens.
//!
//! Errors are shown in place and rendering carries on with the next
//! sibling. Fatal errors (a loop over its iteration limit) are shown once
//! and then unwind to the render entry point.

use std::rc::Rc;

use lazy_static::lazy_static;
use log::{debug, trace, warn};
use phf::phf_set;
use regex::Regex;
use serde::Deserialize;
use weft_template::{
    Body, ElementTemplate, ExprSource, ExprTemplate, LinkBox, Location, MacroArgs, MacroChain,
    MacroSegment, NodeTemplate, PostscriptOp,
};

use super::engine::Runtime;
use super::host::{CallbackId, DocumentHost, Event, NodeId};
use super::registry::{ArgPolicy, BodyPolicy, MacroContext, MacroDef, MacroOutput, Site};
use super::scope::{new_scope, Captures, ScopeRef};
use crate::core::script::{
    parse_expression, Env, Interpreter, MacroInvoker, ScriptError, ScriptResult, Value,
};
use crate::core::syntax::{error_template, parse};
use crate::utils::error::{RenderError, RenderErrorKind, RenderResult, Warning};
use crate::utils::suggest;

lazy_static! {
    /// A blank line (possibly several), which ends a paragraph.
    static ref PARAGRAPH_BREAK: Regex = Regex::new(r"\n[ \t]*(?:\n[ \t]*)+").unwrap();
    /// Attribute names that install event handlers.
    static ref EVENT_ATTRIBUTE: Regex = Regex::new(r"^on[a-z]+$").unwrap();
}

/// Elements that are never wrapped in a paragraph.
static BLOCK_TAGS: phf::Set<&'static str> = phf_set! {
    "address", "article", "aside", "blockquote", "center", "details", "dialog",
    "dd", "div", "dl", "dt", "fieldset", "figcaption", "figure", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main",
    "nav", "ol", "p", "pre", "section", "summary", "table", "tbody", "td",
    "tfoot", "th", "thead", "tr", "ul",
};

pub fn is_block_tag(name: &str) -> bool {
    BLOCK_TAGS.contains(name)
}

/// How newlines in text become structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewlineMode {
    /// Runs of inline content are wrapped in `<p>`; blank lines end them.
    #[default]
    Block,
    /// No paragraphs; a blank line becomes two `<br>`.
    Inline,
    /// Every newline becomes a `<br>`.
    AllBreaks,
    /// Newlines stay literal text.
    NoBreaks,
}

impl NewlineMode {
    /// The mode selected by a passage tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "nobr" => Some(NewlineMode::NoBreaks),
            "inline" => Some(NewlineMode::Inline),
            "breaks" => Some(NewlineMode::AllBreaks),
            _ => None,
        }
    }

    /// Mode for the children of an element or an open paragraph.
    pub fn nested(self) -> Self {
        match self {
            NewlineMode::Block => NewlineMode::Inline,
            other => other,
        }
    }
}

/// Result of rendering a template sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    Normal,
    Break,
    Continue,
}

impl LoopSignal {
    pub fn name(self) -> &'static str {
        match self {
            LoopSignal::Normal => "normal",
            LoopSignal::Break => "break",
            LoopSignal::Continue => "continue",
        }
    }
}

/// What to render.
#[derive(Debug, Clone, Copy)]
pub enum RenderInput<'t> {
    Templates(&'t [NodeTemplate]),
    /// A passage by name; it is parsed first.
    Passage(&'t str),
}

// ============================================================================
// Callbacks
// ============================================================================

/// What a callback does when it fires.
#[derive(Debug, Clone)]
pub enum Action {
    /// Clear `target` and render `body` into it (`@later`, `@redoable`).
    Render {
        body: Body,
        target: NodeId,
        mode: NewlineMode,
    },
    /// Show another passage.
    Navigate(String),
    /// `@link`: run the body, then navigate or replace the link with the output.
    Link {
        body: Option<Body>,
        passage: Option<String>,
        mode: NewlineMode,
    },
    /// Call a script function with an event object.
    Call(Value),
    /// Write the event's value into an assignable expression.
    Bind(ExprSource),
}

/// A deferred piece of work, run by [`Renderer::fire`].
#[derive(Debug, Clone)]
pub struct Callback {
    pub action: Action,
    /// Loop bindings current when the callback was created.
    pub captures: Captures,
    pub temp: ScopeRef,
    /// The callback is ignored once this node leaves the document.
    pub anchor: NodeId,
    pub once: bool,
    pub passage: Rc<str>,
    pub line: usize,
}

// ============================================================================
// Renderer
// ============================================================================

/// One render pass over a host and the runtime state.
pub struct Renderer<'a> {
    host: &'a mut dyn DocumentHost,
    rt: &'a mut Runtime,
    temp: ScopeRef,
    /// Loop bodies currently being rendered by this pass
    loop_depth: usize,
}

enum Resolved {
    Value(Value),
    /// A macro together with the raw arguments of a trailing call.
    Macro(Rc<MacroDef>, Vec<ExprSource>),
}

impl<'a> Renderer<'a> {
    pub fn new(host: &'a mut dyn DocumentHost, rt: &'a mut Runtime, temp: ScopeRef) -> Self {
        Self {
            host,
            rt,
            temp,
            loop_depth: 0,
        }
    }

    pub fn host(&mut self) -> &mut dyn DocumentHost {
        &mut *self.host
    }

    pub fn runtime(&self) -> &Runtime {
        &*self.rt
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut *self.rt
    }

    pub fn temp(&self) -> &ScopeRef {
        &self.temp
    }

    fn env(&self) -> Env {
        Env {
            story: self.rt.story.clone(),
            temp: self.temp.clone(),
            constants: self.rt.registry.constants().clone(),
            strict_variables: self.rt.config.strict_variables,
            max_iterations: self.rt.config.max_loop_iterations,
            max_depth: self.rt.config.recursion_limit,
            rng: self.rt.rng.clone(),
        }
    }

    fn site(&self, loc: &Location, container: NodeId, mode: NewlineMode, captures: &Captures) -> Site {
        Site {
            container,
            mode,
            captures: captures.clone(),
            passage: loc.passage.clone(),
            line: loc.line,
        }
    }

    fn current_passage(&self) -> Rc<str> {
        self.rt.current.as_deref().unwrap_or("").into()
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Render `input` into `container`. Errors are shown in the output and
    /// recorded on the runtime; nothing escapes to the caller.
    pub fn render(
        &mut self,
        container: NodeId,
        input: RenderInput<'_>,
        mode: NewlineMode,
        parent: Option<&MacroContext>,
    ) {
        let captures = parent.map(|ctx| ctx.site.captures.clone()).unwrap_or_default();
        let result = match input {
            RenderInput::Templates(nodes) => self.render_nodes(container, nodes, mode, &captures),
            RenderInput::Passage(name) => self.render_passage(container, name, mode, &captures),
        };
        self.finish(container, result);
    }

    fn finish(&mut self, container: NodeId, result: RenderResult<LoopSignal>) {
        // Signals never get this far: `invoke` reports them as stray
        // whenever no loop is running.
        match result {
            Ok(_) => {}
            Err(mut err) => {
                self.display_error(container, &mut err);
                debug!("render stopped: {}", err);
            }
        }
    }

    /// Clear the root and show `name` with a fresh temp scope. Punted temp
    /// bindings are carried over.
    pub fn show(&mut self, name: &str) {
        debug!("navigating to '{}'", name);
        let temp = new_scope();
        for (var, scope) in std::mem::take(&mut self.rt.punted) {
            if let Some(value) = scope.borrow().get(&var).cloned() {
                temp.borrow_mut().insert(var, value);
            }
        }
        let root = self.host.root();
        self.host.clear(root);
        self.prune_callbacks();
        self.rt.current = Some(name.to_string());
        self.temp = temp;
        self.loop_depth = 0;
        let mode = self.rt.config.default_mode;
        self.render(root, RenderInput::Passage(name), mode, None);
    }

    /// Forget callbacks (and redoable regions) whose anchor has left the
    /// document.
    fn prune_callbacks(&mut self) {
        let host = &*self.host;
        let rt = &mut *self.rt;
        let before = rt.callbacks.len();
        rt.callbacks.retain(|_, callback| host.is_attached(callback.anchor));
        let callbacks = &rt.callbacks;
        rt.redoables.retain(|_, ids| {
            ids.retain(|id| callbacks.contains_key(id));
            !ids.is_empty()
        });
        trace!("pruned {} detached callbacks", before - rt.callbacks.len());
    }

    /// Parse a passage and render it. Its tags may override `mode`.
    pub fn render_passage(
        &mut self,
        container: NodeId,
        name: &str,
        mode: NewlineMode,
        captures: &Captures,
    ) -> RenderResult<LoopSignal> {
        let Some(passage) = self.rt.passages.passage(name) else {
            let mut message = format!("there is no passage named '{}'", name);
            if let Some(s) = suggest::nearest(name, self.rt.passages.names().iter().map(String::as_str)) {
                message.push_str(&format!(" (did you mean '{}'?)", s));
            }
            let passage = self.current_passage();
            let mut err = RenderError::authoring(message, &*passage, 0);
            self.display_error(container, &mut err);
            return Ok(LoopSignal::Normal);
        };

        let mode = passage.mode().unwrap_or(mode);
        match parse(&passage.text, &passage.name, passage.start_line, &self.rt.registry) {
            Ok(parsed) => {
                self.rt.warnings.extend(parsed.warnings);
                self.render_nodes(container, &parsed.templates, mode, captures)
            }
            Err(err) => {
                let nodes = [error_template(&err)];
                self.render_nodes(container, &nodes, mode, captures)
            }
        }
    }

    /// Render a template sequence. Shares the runtime's recursion budget.
    pub fn render_nodes(
        &mut self,
        container: NodeId,
        nodes: &[NodeTemplate],
        mode: NewlineMode,
        captures: &Captures,
    ) -> RenderResult<LoopSignal> {
        if self.rt.recovering {
            return Ok(LoopSignal::Normal);
        }
        if self.rt.depth >= self.rt.config.recursion_limit {
            warn!("render recursion limit ({}) reached", self.rt.config.recursion_limit);
            self.rt.recovering = true;
            let (passage, line) = match nodes.first() {
                Some(node) => (node.location().passage.clone(), node.line()),
                None => (self.current_passage(), 0),
            };
            let mut err = RenderError::new(RenderErrorKind::Recursion, &*passage, line);
            self.display_error(container, &mut err);
            return Ok(LoopSignal::Normal);
        }

        self.rt.depth += 1;
        let result = self.render_sequence(container, nodes, mode, captures);
        self.rt.depth -= 1;
        if self.rt.recovering && self.rt.depth <= self.rt.config.recovery_depth {
            self.rt.recovering = false;
        }
        result
    }

    /// Render a loop body; `@break` and `@continue` inside it are not stray.
    pub fn render_loop_body(
        &mut self,
        ctx: &MacroContext,
        body: &[NodeTemplate],
        captures: &Captures,
    ) -> RenderResult<LoopSignal> {
        self.loop_depth += 1;
        let result = self.render_nodes(ctx.site.container, body, ctx.site.mode, captures);
        self.loop_depth -= 1;
        result
    }

    /// Render a body at the macro's own site.
    pub fn render_body(&mut self, ctx: &MacroContext, body: &[NodeTemplate]) -> RenderResult<LoopSignal> {
        self.render_nodes(ctx.site.container, body, ctx.site.mode, &ctx.site.captures)
    }

    // ========================================================================
    // Sequences and newline modes
    // ========================================================================

    fn render_sequence(
        &mut self,
        container: NodeId,
        nodes: &[NodeTemplate],
        mode: NewlineMode,
        captures: &Captures,
    ) -> RenderResult<LoopSignal> {
        let mut paragraph = None;
        for (i, node) in nodes.iter().enumerate() {
            let signal = match mode {
                NewlineMode::Block => {
                    self.render_block_item(container, &mut paragraph, node, &nodes[i + 1..], captures)?
                }
                _ => self.render_node(container, node, mode, captures)?,
            };
            if signal != LoopSignal::Normal {
                return Ok(signal);
            }
        }
        Ok(LoopSignal::Normal)
    }

    fn render_block_item(
        &mut self,
        container: NodeId,
        paragraph: &mut Option<NodeId>,
        node: &NodeTemplate,
        rest: &[NodeTemplate],
        captures: &Captures,
    ) -> RenderResult<LoopSignal> {
        match node {
            NodeTemplate::Text { text, .. } => {
                self.block_text(container, paragraph, text);
                Ok(LoopSignal::Normal)
            }
            NodeTemplate::Element(el) if is_block_tag(&el.name) => {
                *paragraph = None;
                self.render_element(container, el, NewlineMode::Inline, captures)
            }
            NodeTemplate::Element(_) | NodeTemplate::LinkBox(_) => {
                let p = self.paragraph(container, paragraph);
                self.render_node(p, node, NewlineMode::Inline, captures)
            }
            NodeTemplate::Expr(_) | NodeTemplate::MacroChain(_) => {
                if paragraph.is_some() || starts_inline(rest) {
                    let p = self.paragraph(container, paragraph);
                    self.render_node(p, node, NewlineMode::Inline, captures)
                } else {
                    self.render_node(container, node, NewlineMode::Block, captures)
                }
            }
            NodeTemplate::Error(_) => {
                *paragraph = None;
                self.render_node(container, node, NewlineMode::Block, captures)
            }
        }
    }

    fn paragraph(&mut self, container: NodeId, paragraph: &mut Option<NodeId>) -> NodeId {
        if let Some(p) = *paragraph {
            return p;
        }
        let p = self.host.create_element("p");
        self.host.append(container, p);
        *paragraph = Some(p);
        p
    }

    fn block_text(&mut self, container: NodeId, paragraph: &mut Option<NodeId>, text: &str) {
        let mut last = 0;
        for m in PARAGRAPH_BREAK.find_iter(text) {
            self.block_piece(container, paragraph, &text[last..m.start()]);
            *paragraph = None;
            last = m.end();
        }
        self.block_piece(container, paragraph, &text[last..]);
    }

    fn block_piece(&mut self, container: NodeId, paragraph: &mut Option<NodeId>, piece: &str) {
        if piece.is_empty() {
            return;
        }
        // Whitespace between blocks does not open a paragraph.
        if piece.trim().is_empty() && paragraph.is_none() {
            return;
        }
        let p = self.paragraph(container, paragraph);
        self.append_text(p, piece);
    }

    fn append_text(&mut self, target: NodeId, text: &str) {
        if !text.is_empty() {
            let node = self.host.create_text(text);
            self.host.append(target, node);
        }
    }

    fn append_breaks(&mut self, target: NodeId, count: usize) {
        for _ in 0..count {
            let br = self.host.create_element("br");
            self.host.append(target, br);
        }
    }

    /// Append text, turning newlines into structure according to `mode`.
    pub fn emit_text(&mut self, target: NodeId, text: &str, mode: NewlineMode) {
        match mode {
            NewlineMode::Block | NewlineMode::NoBreaks => self.append_text(target, text),
            NewlineMode::Inline => {
                let mut last = 0;
                for m in PARAGRAPH_BREAK.find_iter(text) {
                    self.append_text(target, &text[last..m.start()]);
                    self.append_breaks(target, 2);
                    last = m.end();
                }
                self.append_text(target, &text[last..]);
            }
            NewlineMode::AllBreaks => {
                for (i, line) in text.split('\n').enumerate() {
                    if i > 0 {
                        self.append_breaks(target, 1);
                    }
                    self.append_text(target, line);
                }
            }
        }
    }

    /// Append a value: nodes are inserted, `undefined` prints nothing,
    /// everything else prints as text.
    pub fn emit_value(&mut self, target: NodeId, value: &Value, mode: NewlineMode) {
        match value {
            Value::Undefined => {}
            Value::Node(id) => self.host.append(target, *id),
            other => self.emit_text(target, &other.display(), mode),
        }
    }

    fn render_node(
        &mut self,
        target: NodeId,
        node: &NodeTemplate,
        mode: NewlineMode,
        captures: &Captures,
    ) -> RenderResult<LoopSignal> {
        match node {
            NodeTemplate::Text { text, .. } => {
                self.emit_text(target, text, mode);
                Ok(LoopSignal::Normal)
            }
            NodeTemplate::Element(el) => self.render_element(target, el, mode.nested(), captures),
            NodeTemplate::LinkBox(link) => {
                self.render_link(target, link);
                Ok(LoopSignal::Normal)
            }
            NodeTemplate::Expr(expr) => self.render_expr(target, expr, mode, captures),
            NodeTemplate::MacroChain(chain) => self.render_chain(target, chain, mode, captures),
            NodeTemplate::Error(e) => {
                let mut err = RenderError::new(
                    RenderErrorKind::Parse(e.message.clone()),
                    &*e.loc.passage,
                    e.loc.line,
                )
                .with_sample(&e.sample);
                self.display_error(target, &mut err);
                Ok(LoopSignal::Normal)
            }
        }
    }

    // ========================================================================
    // Elements and links
    // ========================================================================

    fn render_element(
        &mut self,
        parent: NodeId,
        el: &ElementTemplate,
        child_mode: NewlineMode,
        captures: &Captures,
    ) -> RenderResult<LoopSignal> {
        let node = self.host.create_element(&el.name);
        for (name, value) in &el.attributes {
            self.host.set_attribute(node, name, value);
        }

        let site = self.site(&el.loc, node, child_mode, captures);
        for (name, expr) in &el.eval_attributes {
            match self.with_interpreter(&site, |interp| interp.eval_source(&expr.code)) {
                Ok(value) => self.apply_attribute(node, name, value, &site),
                Err(cause) => {
                    // The first failure skips the remaining dynamic attributes.
                    let mut err = RenderError::new(
                        RenderErrorKind::Attribute {
                            name: name.clone(),
                            element: el.name.clone(),
                            cause: cause.kind.to_string(),
                        },
                        &*site.passage,
                        site.line,
                    )
                    .with_sample(&expr.raw);
                    self.display_error(parent, &mut err);
                    break;
                }
            }
        }
        self.host.append(parent, node);

        if el.name == "style" {
            for child in el.content.iter() {
                if let Some(text) = child.as_text() {
                    self.append_text(node, text);
                }
            }
            return Ok(LoopSignal::Normal);
        }
        self.render_nodes(node, &el.content, child_mode, captures)
    }

    fn apply_attribute(&mut self, node: NodeId, name: &str, value: Value, site: &Site) {
        if EVENT_ATTRIBUTE.is_match(name) && value.is_callable() {
            let callback = self.callback(Action::Call(value), node, false, site);
            let id = self.rt.add_callback(callback);
            self.host.subscribe(node, &name[2..], id);
            return;
        }
        match value {
            Value::Undefined | Value::Null | Value::Bool(false) => {}
            Value::Bool(true) => self.host.set_attribute(node, name, ""),
            other => self.host.set_attribute(node, name, &other.display()),
        }
    }

    fn render_link(&mut self, target: NodeId, link: &LinkBox) {
        let a = self.host.create_element("a");
        let class = if self.rt.passages.passage(&link.link).is_some() {
            "link"
        } else {
            "link broken"
        };
        self.host.set_attribute(a, "class", class);
        self.host.set_attribute(a, "data-passage", &link.link);
        self.append_text(a, &link.text);

        let site = self.site(&link.loc, target, NewlineMode::Inline, &Captures::new());
        let callback = self.callback(Action::Navigate(link.link.clone()), a, false, &site);
        let id = self.rt.add_callback(callback);
        self.host.subscribe(a, "click", id);
        self.host.append(target, a);
    }

    // ========================================================================
    // Expressions and macros
    // ========================================================================

    fn render_expr(
        &mut self,
        target: NodeId,
        expr: &ExprTemplate,
        mode: NewlineMode,
        captures: &Captures,
    ) -> RenderResult<LoopSignal> {
        let site = self.site(&expr.loc, target, mode, captures);
        let resolved = self.with_interpreter(&site, |interp| resolve(interp, expr));

        match resolved {
            Err((source, cause)) => {
                let mut err = expression_error(&source, &cause, &site);
                self.display_error(target, &mut err);
                Ok(LoopSignal::Normal)
            }
            Ok(Resolved::Macro(def, args)) => {
                self.invoke(def, MacroArgs::List(args), expr.content.clone(), Vec::new(), site)
            }
            Ok(Resolved::Value(value)) => {
                if expr.content.is_some() {
                    let mut err = RenderError::authoring(
                        format!(
                            "`{}` is a {}, not a macro, so it cannot have a body",
                            expr.describe(),
                            value.describe_type()
                        ),
                        &*site.passage,
                        site.line,
                    );
                    self.display_error(target, &mut err);
                    return Ok(LoopSignal::Normal);
                }
                self.emit_value(target, &value, mode);
                Ok(LoopSignal::Normal)
            }
        }
    }

    fn render_chain(
        &mut self,
        target: NodeId,
        chain: &MacroChain,
        mode: NewlineMode,
        captures: &Captures,
    ) -> RenderResult<LoopSignal> {
        let site = self.site(&chain.loc, target, mode, captures);
        let head = chain.head();
        let Some(def) = self.rt.registry.get_macro(&head.name) else {
            let mut err = RenderError::authoring(
                format!("@{} is not a macro", head.name),
                &*site.passage,
                site.line,
            );
            self.display_error(target, &mut err);
            return Ok(LoopSignal::Normal);
        };
        let siblings: Vec<MacroSegment> = chain.segments[1..].to_vec();
        self.invoke(def, head.args.clone(), head.body.clone(), siblings, site)
    }

    /// Run a macro handler at `site` and place its output.
    fn invoke(
        &mut self,
        def: Rc<MacroDef>,
        args: MacroArgs,
        content: Option<Body>,
        chain: Vec<MacroSegment>,
        site: Site,
    ) -> RenderResult<LoopSignal> {
        trace!("@{} at {}:{}", def.name, site.passage, site.line);
        let container = site.container;
        let mode = site.mode;

        let misplaced_body = match (def.capabilities.body, &content) {
            (BodyPolicy::Forbidden, Some(_)) => Some(format!("@{} does not take a body", def.name)),
            (BodyPolicy::Required, None) => Some(format!("@{} needs a body", def.name)),
            _ => None,
        };
        if let Some(message) = misplaced_body {
            let mut err = RenderError::authoring(message, &*site.passage, site.line);
            self.display_error(container, &mut err);
            return Ok(LoopSignal::Normal);
        }

        let mut values = Vec::new();
        if let (ArgPolicy::Evaluated, MacroArgs::List(raw)) = (def.capabilities.args, &args) {
            for arg in raw {
                match self.eval(arg, &site) {
                    Ok(value) => values.push(value),
                    Err(mut err) => {
                        self.display_error(container, &mut err);
                        return Ok(LoopSignal::Normal);
                    }
                }
            }
        }

        let ctx = MacroContext {
            name: def.name.clone(),
            args,
            values,
            content,
            chain,
            site,
        };
        let handler = def.handler.clone();
        match handler(&mut *self, &ctx) {
            Ok(MacroOutput::Nothing) | Ok(MacroOutput::Signal(LoopSignal::Normal)) => Ok(LoopSignal::Normal),
            Ok(MacroOutput::Text(text)) => {
                self.emit_text(container, &text, mode);
                Ok(LoopSignal::Normal)
            }
            Ok(MacroOutput::Node(node)) => {
                self.host.append(container, node);
                Ok(LoopSignal::Normal)
            }
            Ok(MacroOutput::Signal(signal)) => {
                if self.loop_depth > 0 {
                    return Ok(signal);
                }
                let mut err = RenderError::new(
                    RenderErrorKind::StrayLoopSignal(signal.name()),
                    ctx.passage(),
                    ctx.line(),
                );
                self.display_error(container, &mut err);
                Ok(LoopSignal::Normal)
            }
            Err(err) => {
                let mut err = if err.displayed || !wraps_as_macro_error(&err.kind) {
                    err
                } else {
                    RenderError::new(
                        RenderErrorKind::Macro {
                            name: def.name.clone(),
                            cause: err.message(),
                        },
                        ctx.passage(),
                        ctx.line(),
                    )
                };
                self.display_error(container, &mut err);
                if err.is_fatal() {
                    Err(err)
                } else {
                    Ok(LoopSignal::Normal)
                }
            }
        }
    }

    // ========================================================================
    // Script evaluation
    // ========================================================================

    fn with_interpreter<T, E>(
        &mut self,
        site: &Site,
        f: impl FnOnce(&mut Interpreter<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let env = self.env();
        let (result, warnings) = {
            let mut invocation = Invocation {
                renderer: &mut *self,
                site: site.clone(),
            };
            let mut interp = Interpreter::new(env).with_invoker(&mut invocation);
            let result = f(&mut interp);
            (result, interp.take_warnings())
        };
        for message in warnings {
            self.rt
                .warnings
                .push(Warning::new(message, &*site.passage, site.line));
        }
        result
    }

    /// Evaluate one argument expression.
    pub fn eval(&mut self, expr: &ExprSource, site: &Site) -> RenderResult<Value> {
        self.with_interpreter(site, |interp| interp.eval_source(&expr.code))
            .map_err(|cause| expression_error(&expr.raw, &cause, site))
    }

    /// Evaluate an expression used as a statement. The flag tells whether
    /// it was an assignment.
    pub fn eval_statement(&mut self, expr: &ExprSource, site: &Site) -> RenderResult<(Value, bool)> {
        let parsed = parse_expression(&expr.code).map_err(|cause| expression_error(&expr.raw, &cause, site))?;
        let value = self
            .with_interpreter(site, |interp| interp.eval(&parsed))
            .map_err(|cause| expression_error(&expr.raw, &cause, site))?;
        Ok((value, parsed.is_assignment()))
    }

    /// Assign `value` to the variable or property `target` names.
    pub fn assign(&mut self, target: &ExprSource, value: Value, site: &Site) -> RenderResult<()> {
        let parsed = parse_expression(&target.code).map_err(|cause| expression_error(&target.raw, &cause, site))?;
        self.with_interpreter(site, |interp| interp.assign(&parsed, value))
            .map_err(|cause| expression_error(&target.raw, &cause, site))
    }

    /// Call a script function value.
    pub fn call_value(&mut self, func: &Value, args: Vec<Value>, site: &Site) -> ScriptResult<Value> {
        self.with_interpreter(site, |interp| interp.call(func, None, args))
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Show `err` in `container` unless it has been shown already.
    pub fn display_error(&mut self, container: NodeId, err: &mut RenderError) {
        if err.displayed {
            return;
        }
        err.displayed = true;
        warn!("{}", err);

        let span = self.host.create_element("span");
        self.host.set_attribute(span, "class", "error");
        self.host.set_attribute(span, "title", &err.location());
        self.append_text(span, &err.message());
        if let Some(sample) = err.sample.clone() {
            let code = self.host.create_element("code");
            self.append_text(code, &sample);
            self.host.append(span, code);
        }
        self.host.append(container, span);
        self.rt.errors.push(err.clone());
    }

    /// The fatal error raised when a loop passes the iteration limit.
    pub fn too_many_iterations(&self, ctx: &MacroContext) -> RenderError {
        RenderError::new(
            RenderErrorKind::TooManyIterations {
                name: ctx.name.clone(),
                limit: self.rt.config.max_loop_iterations,
            },
            ctx.passage(),
            ctx.line(),
        )
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// A callback bound to this pass's temp scope and the site's captures.
    pub fn callback(&self, action: Action, anchor: NodeId, once: bool, site: &Site) -> Callback {
        Callback {
            action,
            captures: site.captures.clone(),
            temp: self.temp.clone(),
            anchor,
            once,
            passage: site.passage.clone(),
            line: site.line,
        }
    }

    pub fn add_callback(&mut self, callback: Callback) -> CallbackId {
        self.rt.add_callback(callback)
    }

    /// Run a callback. Callbacks whose anchor has left the document are
    /// dropped without doing anything.
    pub fn fire(host: &mut dyn DocumentHost, rt: &mut Runtime, id: CallbackId, event: Event) {
        let Some(callback) = rt.callbacks.get(&id).cloned() else {
            debug!("callback {:?} no longer exists", id);
            return;
        };
        if !host.is_attached(callback.anchor) {
            warn!(
                "dropping callback from {}:{}: its node is no longer in the document",
                callback.passage, callback.line
            );
            rt.callbacks.remove(&id);
            return;
        }
        if callback.once {
            rt.callbacks.remove(&id);
        }
        trace!("firing {:?} ({}) from {}:{}", id, event.name(), callback.passage, callback.line);

        let temp = callback.temp.clone();
        let installed = callback.captures.install(&temp);
        let mut renderer = Renderer::new(host, rt, temp.clone());
        renderer.run_action(&callback, event);
        installed.restore(&temp);
    }

    /// Fire every region registered under `name` with `@redoable`.
    pub fn trigger(host: &mut dyn DocumentHost, rt: &mut Runtime, name: &str) {
        let ids = rt.redoables.get(name).cloned().unwrap_or_default();
        if ids.is_empty() {
            debug!("nothing is redoable as '{}'", name);
        }
        for id in ids {
            Renderer::fire(&mut *host, &mut *rt, id, Event::Trigger(name.to_string()));
        }
        let live: Vec<CallbackId> = match rt.redoables.get(name) {
            Some(ids) => ids.iter().copied().filter(|id| rt.callbacks.contains_key(id)).collect(),
            None => return,
        };
        rt.redoables.insert(name.to_string(), live);
    }

    /// Trigger redoable regions from inside a render.
    pub fn trigger_redo(&mut self, name: &str) {
        Renderer::trigger(&mut *self.host, &mut *self.rt, name);
    }

    fn run_action(&mut self, callback: &Callback, event: Event) {
        let site = Site {
            container: callback.anchor,
            mode: NewlineMode::Inline,
            captures: callback.captures.clone(),
            passage: callback.passage.clone(),
            line: callback.line,
        };
        match &callback.action {
            Action::Render { body, target, mode } => {
                self.host.clear(*target);
                let result = self.render_nodes(*target, body, *mode, &callback.captures);
                self.finish(*target, result);
            }
            Action::Navigate(passage) => self.show(passage),
            Action::Link { body, passage, mode } => match passage {
                Some(passage) => {
                    if let Some(body) = body {
                        // Output is discarded; only side effects matter.
                        let scratch = self.host.create_element("span");
                        let result = self.render_nodes(scratch, body, *mode, &callback.captures);
                        self.finish(scratch, result);
                    }
                    self.show(passage);
                }
                None => {
                    let span = self.host.create_element("span");
                    self.host.replace(callback.anchor, span);
                    if let Some(body) = body {
                        let result = self.render_nodes(span, body, *mode, &callback.captures);
                        self.finish(span, result);
                    }
                }
            },
            Action::Call(func) => {
                let arg = event_object(&event);
                if let Err(cause) = self.call_value(func, vec![arg], &site) {
                    let mut err = expression_error(&format!("on{}", event.name()), &cause, &site);
                    self.display_error(callback.anchor, &mut err);
                }
            }
            Action::Bind(target) => {
                let value = match event {
                    Event::Change(checked) => Value::Bool(checked),
                    Event::Input(text) => Value::Str(text),
                    other => {
                        debug!("binding ignores {} events", other.name());
                        return;
                    }
                };
                if let Err(mut err) = self.assign(target, value, &site) {
                    self.display_error(callback.anchor, &mut err);
                }
            }
        }
    }
}

/// Lets expressions call macros (`@(@print(1))`); output becomes a value.
struct Invocation<'r, 'a> {
    renderer: &'r mut Renderer<'a>,
    site: Site,
}

impl MacroInvoker for Invocation<'_, '_> {
    fn invoke_macro(&mut self, def: &Rc<MacroDef>, args: Vec<Value>) -> ScriptResult<Value> {
        let ctx = MacroContext {
            name: def.name.clone(),
            args: MacroArgs::List(Vec::new()),
            values: args,
            content: None,
            chain: Vec::new(),
            site: self.site.clone(),
        };
        match (def.handler)(&mut *self.renderer, &ctx) {
            Ok(MacroOutput::Nothing) => Ok(Value::Undefined),
            Ok(MacroOutput::Text(text)) => Ok(Value::Str(text)),
            Ok(MacroOutput::Node(node)) => Ok(Value::Node(node)),
            Ok(MacroOutput::Signal(LoopSignal::Normal)) => Ok(Value::Undefined),
            Ok(MacroOutput::Signal(signal)) => Err(ScriptError::other(format!(
                "@{} cannot be used inside an expression",
                signal.name()
            ))),
            Err(err) => Err(ScriptError::other(err.message())),
        }
    }
}

/// Resolve an expression template. On failure, returns the source up to
/// and including the operation that failed.
fn resolve(interp: &mut Interpreter<'_>, expr: &ExprTemplate) -> Result<Resolved, (String, ScriptError)> {
    let mut source = format!("{}{}", expr.scope.sigil(), expr.base);
    let mut current = interp
        .variable(expr.scope, &expr.base)
        .map_err(|e| (source.clone(), e))?;
    let mut receiver: Option<Value> = None;

    let (ops, trailing) = match expr.ops.split_last() {
        Some((PostscriptOp::Call { args, raw }, head)) => (head, Some((args, raw))),
        _ => (&expr.ops[..], None),
    };

    for op in ops {
        source.push_str(op.raw());
        let step = match op {
            PostscriptOp::Index { key, needs_eval, .. } => {
                let key = if *needs_eval {
                    interp.eval_source(key)
                } else {
                    Ok(Value::Str(key.clone()))
                };
                key.and_then(|key| interp.get_property(&current, &key))
                    .map(|next| (Some(current.clone()), next))
            }
            PostscriptOp::Call { args, .. } => eval_args(interp, args)
                .and_then(|values| interp.call(&current, receiver.as_ref(), values))
                .map(|next| (None, next)),
        };
        let (next_receiver, next) = step.map_err(|e| (source.clone(), e))?;
        receiver = next_receiver;
        current = next;
    }

    if let Value::Macro(def) = current {
        let args = trailing.map(|(args, _)| args.clone()).unwrap_or_default();
        return Ok(Resolved::Macro(def, args));
    }
    if let Some((args, raw)) = trailing {
        source.push_str(raw);
        current = eval_args(interp, args)
            .and_then(|values| interp.call(&current, receiver.as_ref(), values))
            .map_err(|e| (source.clone(), e))?;
    }
    Ok(Resolved::Value(current))
}

/// Failures that already say where they came from are shown as they are.
fn wraps_as_macro_error(kind: &RenderErrorKind) -> bool {
    matches!(kind, RenderErrorKind::Authoring(_) | RenderErrorKind::Parse(_))
}

fn eval_args(interp: &mut Interpreter<'_>, args: &[ExprSource]) -> ScriptResult<Vec<Value>> {
    args.iter().map(|arg| interp.eval_source(&arg.code)).collect()
}

fn expression_error(source: &str, cause: &ScriptError, site: &Site) -> RenderError {
    RenderError::new(
        RenderErrorKind::Expression {
            source: source.to_string(),
            cause: cause.kind.to_string(),
        },
        &*site.passage,
        site.line,
    )
}

/// Whether the next content continues an inline run.
fn starts_inline(rest: &[NodeTemplate]) -> bool {
    match rest.first() {
        Some(NodeTemplate::Text { text, .. }) => {
            let head = PARAGRAPH_BREAK
                .find(text)
                .map_or(text.as_str(), |m| &text[..m.start()]);
            !head.trim().is_empty()
        }
        Some(NodeTemplate::LinkBox(_)) => true,
        Some(NodeTemplate::Element(el)) => !is_block_tag(&el.name),
        Some(NodeTemplate::Expr(_)) | Some(NodeTemplate::MacroChain(_)) => starts_inline(&rest[1..]),
        _ => false,
    }
}

/// The object passed to `on<event>` handlers.
fn event_object(event: &Event) -> Value {
    let mut map = indexmap::IndexMap::new();
    map.insert("type".to_string(), Value::from(event.name()));
    match event {
        Event::Change(checked) => {
            map.insert("checked".to_string(), Value::Bool(*checked));
        }
        Event::Input(text) => {
            map.insert("value".to_string(), Value::from(text.as_str()));
        }
        Event::Trigger(name) => {
            map.insert("name".to_string(), Value::from(name.as_str()));
        }
        Event::Click | Event::Timer => {}
    }
    Value::object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_template::ScopeKind;

    fn loc() -> Location {
        Location::new("T", 1)
    }

    #[test]
    fn test_newline_mode_tags() {
        assert_eq!(NewlineMode::from_tag("nobr"), Some(NewlineMode::NoBreaks));
        assert_eq!(NewlineMode::from_tag("breaks"), Some(NewlineMode::AllBreaks));
        assert_eq!(NewlineMode::from_tag("other"), None);
        assert_eq!(NewlineMode::Block.nested(), NewlineMode::Inline);
        assert_eq!(NewlineMode::NoBreaks.nested(), NewlineMode::NoBreaks);
    }

    #[test]
    fn test_starts_inline() {
        let text = |t: &str| NodeTemplate::text(t, loc());
        let expr = NodeTemplate::Expr(ExprTemplate {
            scope: ScopeKind::Story,
            base: "x".into(),
            ops: Vec::new(),
            content: None,
            loc: loc(),
        });
        assert!(starts_inline(&[text(" more")]));
        assert!(!starts_inline(&[text("  \n\nlater")]));
        assert!(starts_inline(&[expr.clone(), text("x")]));
        assert!(!starts_inline(&[expr]));
        assert!(!starts_inline(&[]));
    }

    #[test]
    fn test_event_object() {
        let value = event_object(&Event::Input("hi".into()));
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        assert_eq!(map.borrow().get("type"), Some(&Value::from("input")));
        assert_eq!(map.borrow().get("value"), Some(&Value::from("hi")));
    }
}
