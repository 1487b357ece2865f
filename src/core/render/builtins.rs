//! Built-in macros.
//!
//! Each macro is a plain function registered with the [`Capabilities`] the
//! parser and renderer need. Control-flow macros render their bodies through
//! the [`Renderer`] and hand loop signals back to it.

use log::debug;
use weft_template::{Body, ExprSource, MacroArgs, MacroSegment};

use super::host::NodeId;
use super::registry::{BodyPolicy, Capabilities, MacroContext, MacroOutput, Registry, Site};
use super::renderer::{Action, LoopSignal, Renderer};
use crate::core::script::{entries, iterate, Value};
use crate::core::syntax::{error_template, parse};
use crate::utils::error::{RenderError, RenderErrorKind, RenderResult};

type MacroFn = fn(&mut Renderer<'_>, &MacroContext) -> RenderResult<MacroOutput>;

/// Register every built-in macro.
pub fn register_all(registry: &mut Registry) {
    let plain = Capabilities::default;
    let table: &[(&str, Capabilities, MacroFn)] = &[
        ("", plain().raw(), unnamed),
        ("print", plain(), print),
        ("render", plain(), render),
        ("set", plain().raw(), set),
        ("include", plain(), include),
        (
            "if",
            plain().raw().body(BodyPolicy::Required).chain(&["elseif", "else"]),
            if_chain,
        ),
        ("elseif", plain().raw().body(BodyPolicy::Optional), orphan),
        ("else", plain().raw().body(BodyPolicy::Optional), orphan),
        ("switch", plain().raw().chain(&["case", "default"]), switch),
        ("case", plain().raw().body(BodyPolicy::Optional), orphan),
        ("default", plain().raw().body(BodyPolicy::Optional), orphan),
        ("while", plain().raw().body(BodyPolicy::Required), while_loop),
        ("for", plain().body(BodyPolicy::Required).iteration(), for_loop),
        ("break", plain(), break_loop),
        ("continue", plain(), continue_loop),
        ("later", plain().body(BodyPolicy::Required), later),
        ("append", plain().body(BodyPolicy::Required), append),
        ("prepend", plain().body(BodyPolicy::Required), prepend),
        ("replace", plain().body(BodyPolicy::Required), replace),
        ("redoable", plain().body(BodyPolicy::Required), redoable),
        ("redo", plain(), redo),
        ("link", plain().body(BodyPolicy::Optional), link),
        ("checkbox", plain().raw(), checkbox),
        ("textinput", plain().raw(), textinput),
        ("punt", plain().raw(), punt),
    ];

    for (name, capabilities, handler) in table {
        // A fresh registry is never frozen.
        if let Err(err) = registry.register_macro(name, *capabilities, *handler) {
            debug!("skipping built-in: {}", err);
        }
    }
}

fn authoring(ctx: &MacroContext, message: impl Into<String>) -> RenderError {
    RenderError::authoring(message, ctx.passage(), ctx.line())
}

fn signal_output(signal: LoopSignal) -> MacroOutput {
    match signal {
        LoopSignal::Normal => MacroOutput::Nothing,
        other => MacroOutput::Signal(other),
    }
}

fn value_output(value: Value) -> MacroOutput {
    match value {
        Value::Undefined => MacroOutput::Nothing,
        Value::Node(node) => MacroOutput::Node(node),
        other => MacroOutput::Text(other.display()),
    }
}

fn required_arg<'c>(ctx: &'c MacroContext, index: usize, what: &str) -> RenderResult<&'c ExprSource> {
    ctx.raw_args()
        .get(index)
        .ok_or_else(|| authoring(ctx, format!("@{} needs {}", ctx.name, what)))
}

/// Site of a chained segment: the head's container, the segment's line.
fn segment_site(ctx: &MacroContext, segment: &MacroSegment) -> Site {
    Site {
        passage: segment.loc.passage.clone(),
        line: segment.loc.line,
        ..ctx.site.clone()
    }
}

fn segment_args(segment: &MacroSegment) -> &[ExprSource] {
    match &segment.args {
        MacroArgs::List(args) => args,
        MacroArgs::Iteration { .. } => &[],
    }
}

fn body_of(ctx: &MacroContext) -> Body {
    ctx.content.clone().unwrap_or_else(|| Body::from(Vec::new()))
}

fn render_segment(r: &mut Renderer<'_>, ctx: &MacroContext, body: &Option<Body>) -> RenderResult<MacroOutput> {
    match body {
        Some(body) => r.render_body(ctx, body).map(signal_output),
        None => Ok(MacroOutput::Nothing),
    }
}

// ============================================================================
// Output
// ============================================================================

/// `@(expr, ...)`: evaluate in order, print the last value.
fn unnamed(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    // Called from inside an expression, the arguments are already values.
    if ctx.raw_args().is_empty() {
        return Ok(ctx.values.last().cloned().map_or(MacroOutput::Nothing, value_output));
    }
    let mut last = (Value::Undefined, false);
    for arg in ctx.raw_args() {
        last = r.eval_statement(arg, &ctx.site)?;
    }
    match last {
        (_, true) => Ok(MacroOutput::Nothing),
        (value, false) => Ok(value_output(value)),
    }
}

fn print(_: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    if let [Value::Node(node)] = ctx.values.as_slice() {
        return Ok(MacroOutput::Node(*node));
    }
    let text: String = ctx
        .values
        .iter()
        .filter(|v| !matches!(v, Value::Undefined))
        .map(Value::display)
        .collect();
    Ok(MacroOutput::Text(text))
}

/// `@render(markup)`: parse a string and render it in place.
fn render(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let source = ctx.value(0).display();
    let parsed = parse(&source, ctx.passage(), ctx.line(), &r.runtime().registry);
    let templates = match parsed {
        Ok(parsed) => {
            r.runtime_mut().warnings.extend(parsed.warnings);
            parsed.templates
        }
        Err(err) => vec![error_template(&err)],
    };
    r.render_body(ctx, &templates).map(signal_output)
}

/// `@set(assignment, ...)`
fn set(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    for arg in ctx.raw_args() {
        let (_, assigned) = r.eval_statement(arg, &ctx.site)?;
        if !assigned {
            return Err(authoring(ctx, format!("`{}` is not an assignment", arg.raw)));
        }
    }
    Ok(MacroOutput::Nothing)
}

fn include(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let name = match ctx.values.first() {
        Some(Value::Str(name)) => name.clone(),
        _ => return Err(authoring(ctx, "@include needs a passage name")),
    };
    r.render_passage(ctx.site.container, &name, ctx.site.mode, ctx.captures())
        .map(signal_output)
}

// ============================================================================
// Conditionals
// ============================================================================

/// `@if(c) {..} @elseif(c) {..} @else {..}`
fn if_chain(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    if let Some(pos) = ctx.chain.iter().position(|s| s.name == "else") {
        if pos + 1 != ctx.chain.len() {
            return Err(authoring(ctx, "@else must be the last part of an @if chain"));
        }
    }

    let condition = required_arg(ctx, 0, "a condition")?;
    if r.eval(condition, &ctx.site)?.is_truthy() {
        return render_segment(r, ctx, &ctx.content);
    }

    for segment in &ctx.chain {
        if segment.name == "else" {
            return render_segment(r, ctx, &segment.body);
        }
        let site = segment_site(ctx, segment);
        let Some(condition) = segment_args(segment).first() else {
            return Err(RenderError::authoring("@elseif needs a condition", &*site.passage, site.line));
        };
        if r.eval(condition, &site)?.is_truthy() {
            return render_segment(r, ctx, &segment.body);
        }
    }
    Ok(MacroOutput::Nothing)
}

/// `@switch(v) @case(a, b) {..} @default {..}`
fn switch(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let defaults = ctx.chain.iter().filter(|s| s.name == "default").count();
    if defaults > 1 {
        return Err(authoring(ctx, "@switch may have only one @default"));
    }
    if defaults == 1 && ctx.chain.last().map(|s| s.name.as_str()) != Some("default") {
        return Err(authoring(ctx, "@default must be the last part of a @switch"));
    }

    let subject = required_arg(ctx, 0, "a value to match")?;
    let subject = r.eval(subject, &ctx.site)?;

    for segment in &ctx.chain {
        if segment.name == "default" {
            return render_segment(r, ctx, &segment.body);
        }
        let site = segment_site(ctx, segment);
        for candidate in segment_args(segment) {
            if r.eval(candidate, &site)?.strict_eq(&subject) {
                return render_segment(r, ctx, &segment.body);
            }
        }
    }
    Ok(MacroOutput::Nothing)
}

/// `@else`, `@case` and friends used outside their chain.
fn orphan(_: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let head = match ctx.name.as_str() {
        "case" | "default" => "@switch",
        _ => "@if",
    };
    Err(authoring(ctx, format!("@{} must follow {}", ctx.name, head)))
}

// ============================================================================
// Loops
// ============================================================================

fn while_loop(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let condition = required_arg(ctx, 0, "a condition")?;
    let body = body_of(ctx);
    let limit = r.runtime().config.max_loop_iterations;

    let mut count = 0;
    while r.eval(condition, &ctx.site)?.is_truthy() {
        count += 1;
        if count > limit {
            return Err(r.too_many_iterations(ctx));
        }
        if r.render_loop_body(ctx, &body, ctx.captures())? == LoopSignal::Break {
            break;
        }
    }
    Ok(MacroOutput::Nothing)
}

/// `@for(_item of iterable) {..}`
fn for_loop(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let MacroArgs::Iteration { binding, iterable } = &ctx.args else {
        return Err(authoring(ctx, "@for expects `_name of iterable`"));
    };
    let source = r.eval(iterable, &ctx.site)?;
    let items = match &source {
        Value::Object(_) => entries(&source),
        other => iterate(other).map_err(|cause| {
            RenderError::new(
                RenderErrorKind::Expression {
                    source: iterable.raw.clone(),
                    cause: cause.kind.to_string(),
                },
                ctx.passage(),
                ctx.line(),
            )
        })?,
    };
    if items.len() > r.runtime().config.max_loop_iterations {
        return Err(r.too_many_iterations(ctx));
    }

    let body = body_of(ctx);
    for item in items {
        r.temp().borrow_mut().insert(binding.clone(), item.clone());
        let captures = ctx.captures().extended(binding.clone(), item);
        if r.render_loop_body(ctx, &body, &captures)? == LoopSignal::Break {
            break;
        }
    }
    Ok(MacroOutput::Nothing)
}

fn break_loop(_: &mut Renderer<'_>, _: &MacroContext) -> RenderResult<MacroOutput> {
    Ok(MacroOutput::Signal(LoopSignal::Break))
}

fn continue_loop(_: &mut Renderer<'_>, _: &MacroContext) -> RenderResult<MacroOutput> {
    Ok(MacroOutput::Signal(LoopSignal::Continue))
}

// ============================================================================
// Deferred and targeted output
// ============================================================================

/// `@later(ms) {..}`: render the body into a placeholder after a delay.
fn later(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let delay = match ctx.values.first() {
        Some(value) => value.to_number(),
        None => 0.0,
    };
    let delay = if delay.is_finite() && delay > 0.0 { delay as u64 } else { 0 };

    let span = r.host().create_element("span");
    r.host().set_attribute(span, "class", "later");
    r.host().append(ctx.site.container, span);

    let action = Action::Render {
        body: body_of(ctx),
        target: span,
        mode: ctx.site.mode.nested(),
    };
    let callback = r.callback(action, span, true, &ctx.site);
    let id = r.add_callback(callback);
    r.host().schedule(delay, id);
    Ok(MacroOutput::Nothing)
}

#[derive(Clone, Copy)]
enum Placement {
    Append,
    Prepend,
    Replace,
}

fn place_into(r: &mut Renderer<'_>, ctx: &MacroContext, placement: Placement) -> RenderResult<MacroOutput> {
    let selector = match ctx.values.first() {
        Some(Value::Str(s)) => s.clone(),
        _ => return Err(authoring(ctx, format!("@{} needs a selector string", ctx.name))),
    };
    let targets = r.host().query(&selector);
    if targets.is_empty() {
        return Err(authoring(ctx, format!("nothing matches '{}'", selector)));
    }

    let body = body_of(ctx);
    let mode = ctx.site.mode.nested();
    for target in targets {
        let holder = r.host().create_element("span");
        match placement {
            Placement::Append => r.host().append(target, holder),
            Placement::Prepend => r.host().prepend(target, holder),
            Placement::Replace => {
                r.host().clear(target);
                r.host().append(target, holder);
            }
        }
        let signal = r.render_nodes(holder, &body, mode, ctx.captures())?;
        if signal != LoopSignal::Normal {
            return Ok(MacroOutput::Signal(signal));
        }
    }
    Ok(MacroOutput::Nothing)
}

fn append(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    place_into(r, ctx, Placement::Append)
}

fn prepend(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    place_into(r, ctx, Placement::Prepend)
}

fn replace(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    place_into(r, ctx, Placement::Replace)
}

/// `@redoable("name") {..}`: a region rendered now and again on every trigger.
fn redoable(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let name = match ctx.values.first() {
        Some(Value::Str(s)) => s.clone(),
        _ => return Err(authoring(ctx, "@redoable needs a name")),
    };
    let span = r.host().create_element("span");
    r.host().set_attribute(span, "class", "redoable");
    r.host().set_attribute(span, "data-name", &name);
    r.host().append(ctx.site.container, span);

    let body = body_of(ctx);
    let mode = ctx.site.mode.nested();
    let action = Action::Render {
        body: body.clone(),
        target: span,
        mode,
    };
    let callback = r.callback(action, span, false, &ctx.site);
    let id = r.add_callback(callback);
    r.runtime_mut().redoables.entry(name).or_default().push(id);

    r.render_nodes(span, &body, mode, ctx.captures()).map(signal_output)
}

fn redo(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    for value in &ctx.values {
        r.trigger_redo(&value.display());
    }
    Ok(MacroOutput::Nothing)
}

// ============================================================================
// Interaction
// ============================================================================

/// `@link(label, passage?) {..}`
fn link(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let label = match ctx.values.first() {
        Some(value) => value.display(),
        None => return Err(authoring(ctx, "@link needs a label")),
    };
    let passage = match ctx.values.get(1) {
        None | Some(Value::Undefined) | Some(Value::Null) => None,
        Some(value) => Some(value.display()),
    };

    let a = r.host().create_element("a");
    r.host().set_attribute(a, "class", "link");
    if let Some(passage) = &passage {
        r.host().set_attribute(a, "data-passage", passage);
    }
    let text = r.host().create_text(&label);
    r.host().append(a, text);
    r.host().append(ctx.site.container, a);

    // A link without a destination replaces itself, so it only works once.
    let once = passage.is_none();
    let action = Action::Link {
        body: ctx.content.clone(),
        passage,
        mode: ctx.site.mode.nested(),
    };
    let callback = r.callback(action, a, once, &ctx.site);
    let id = r.add_callback(callback);
    r.host().subscribe(a, "click", id);
    Ok(MacroOutput::Nothing)
}

fn bind(r: &mut Renderer<'_>, ctx: &MacroContext, input: NodeId, target: &ExprSource, event: &str) {
    let callback = r.callback(Action::Bind(target.clone()), input, false, &ctx.site);
    let id = r.add_callback(callback);
    r.host().subscribe(input, event, id);
}

/// `@checkbox($var, "label")`
fn checkbox(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let target = required_arg(ctx, 0, "a variable to bind")?;
    let checked = r.eval(target, &ctx.site)?.is_truthy();
    let label = match ctx.raw_args().get(1) {
        Some(arg) => r.eval(arg, &ctx.site)?.display(),
        None => String::new(),
    };

    let wrapper = r.host().create_element("label");
    let input = r.host().create_element("input");
    r.host().set_attribute(input, "type", "checkbox");
    if checked {
        r.host().set_attribute(input, "checked", "");
    }
    r.host().append(wrapper, input);
    if !label.is_empty() {
        let text = r.host().create_text(&label);
        r.host().append(wrapper, text);
    }
    r.host().append(ctx.site.container, wrapper);
    bind(r, ctx, input, target, "change");
    Ok(MacroOutput::Nothing)
}

/// `@textinput($var, "placeholder"?)`
fn textinput(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let target = required_arg(ctx, 0, "a variable to bind")?;
    let current = r.eval(target, &ctx.site)?;
    let placeholder = match ctx.raw_args().get(1) {
        Some(arg) => Some(r.eval(arg, &ctx.site)?.display()),
        None => None,
    };

    let input = r.host().create_element("input");
    r.host().set_attribute(input, "type", "text");
    if !current.is_nullish() {
        r.host().set_attribute(input, "value", &current.display());
    }
    if let Some(placeholder) = placeholder {
        r.host().set_attribute(input, "placeholder", &placeholder);
    }
    r.host().append(ctx.site.container, input);
    bind(r, ctx, input, target, "input");
    Ok(MacroOutput::Nothing)
}

/// `@punt(_name, ...)`: keep temp bindings for the next passage.
fn punt(r: &mut Renderer<'_>, ctx: &MacroContext) -> RenderResult<MacroOutput> {
    let mut names = Vec::new();
    for arg in ctx.raw_args() {
        let raw = arg.raw.trim();
        match raw.strip_prefix('_') {
            Some(name) if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') => {
                names.push(name.to_string())
            }
            _ => return Err(authoring(ctx, format!("@punt expects temp variables, got `{}`", raw))),
        }
    }
    let temp = r.temp().clone();
    let punted = &mut r.runtime_mut().punted;
    punted.extend(names.into_iter().map(|name| (name, temp.clone())));
    Ok(MacroOutput::Nothing)
}
