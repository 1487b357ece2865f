//! The expression interpreter.
//!
//! Expressions reach the interpreter after sigil rewriting, so `$gold`
//! arrives as `story.gold`. The three roots `story`, `temp` and `constants`
//! resolve to the live scope objects; arrow-function parameters live in a
//! stack of local frames that closures capture when they are created.

use std::cell::Cell;
use std::rc::Rc;

use indexmap::IndexMap;
use log::warn;
use weft_template::ScopeKind;

use super::ast::{
    BinaryOp, CompoundOp, Expr, ExprKind, LogicalOp, PropertyKey, TemplateSegment, UnaryOp,
};
use super::library::{self, BuiltinResult};
use super::ops;
use super::parser::parse_expression;
use super::value::{
    Closure, Function, ObjectRef, ScriptError, ScriptErrorKind, ScriptResult, Value, WrappedRegex,
};
use crate::core::render::registry::MacroDef;
use crate::utils::suggest;

/// Maximum number of elements an array callback or string repeat may visit.
pub const MAX_ITERATIONS: usize = 10_000;

/// Maximum nesting of arrow-function calls.
pub const MAX_CALL_DEPTH: usize = 64;

/// Longest string (in chars) that `repeat`, `padStart`/`padEnd` or `+` may build.
pub const MAX_STRING_LENGTH: usize = 1 << 20;

/// Everything an expression can see: the three scope roots plus limits.
#[derive(Clone)]
pub struct Env {
    pub story: ObjectRef,
    pub temp: ObjectRef,
    pub constants: ObjectRef,
    /// Missing `$`/`_` variables are errors instead of warnings.
    pub strict_variables: bool,
    pub max_iterations: usize,
    pub max_depth: usize,
    /// Xorshift state for `Math.random`.
    pub rng: Rc<Cell<u64>>,
}

impl Env {
    pub fn root(&self, scope: ScopeKind) -> &ObjectRef {
        match scope {
            ScopeKind::Story => &self.story,
            ScopeKind::Temp => &self.temp,
            ScopeKind::Constants => &self.constants,
        }
    }
}

/// Lets expressions call registered macros with evaluated arguments.
pub trait MacroInvoker {
    fn invoke_macro(&mut self, def: &Rc<MacroDef>, args: Vec<Value>) -> ScriptResult<Value>;
}

/// An assignable location.
enum Place {
    Local(String),
    Property(Value, Value),
}

/// The expression interpreter.
pub struct Interpreter<'h> {
    env: Env,
    /// Arrow-function parameter frames, innermost last
    frames: Vec<IndexMap<String, Value>>,
    /// Current call depth (for infinite recursion protection)
    depth: usize,
    /// Missing-variable warnings collected during evaluation
    warnings: Vec<String>,
    invoker: Option<&'h mut dyn MacroInvoker>,
}

impl<'h> Interpreter<'h> {
    pub fn new(env: Env) -> Self {
        Self {
            env,
            frames: Vec::new(),
            depth: 0,
            warnings: Vec::new(),
            invoker: None,
        }
    }

    /// Allow `constants.someMacro(...)` calls to reach the renderer.
    pub fn with_invoker(mut self, invoker: &'h mut dyn MacroInvoker) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Parse and evaluate rewritten expression source.
    pub fn eval_source(&mut self, code: &str) -> ScriptResult<Value> {
        let expr = parse_expression(code)?;
        self.eval(&expr)
    }

    /// Fail with `TooManyIterations` when `count` exceeds the iteration limit.
    pub fn check_iterations(&self, count: usize) -> ScriptResult<()> {
        if count > self.env.max_iterations {
            Err(ScriptError::too_many_iterations())
        } else {
            Ok(())
        }
    }

    /// Fail with `StringTooLong` when a result of `len` chars is too long.
    pub fn check_string_length(&self, len: usize) -> ScriptResult<()> {
        if len > MAX_STRING_LENGTH {
            Err(ScriptError::string_too_long(MAX_STRING_LENGTH))
        } else {
            Ok(())
        }
    }

    /// A binary operator whose string result is held to the length limit.
    fn binary(&self, op: BinaryOp, lhs: Value, rhs: Value) -> ScriptResult<Value> {
        let result = ops::binary(op, lhs, rhs)?;
        if let Value::Str(s) = &result {
            if s.len() > MAX_STRING_LENGTH {
                self.check_string_length(s.chars().count())?;
            }
        }
        Ok(result)
    }

    /// Next pseudo-random number in `[0, 1)`.
    pub fn next_random(&self) -> f64 {
        let mut x = self.env.rng.get().max(1);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.env.rng.set(x);
        (x >> 11) as f64 / (1u64 << 53) as f64
    }

    // ========================================================================
    // Variables
    // ========================================================================

    /// Look up `name` in one of the three scopes. Missing story and temp
    /// variables are `undefined` with a warning; missing constants are errors.
    pub fn variable(&mut self, scope: ScopeKind, name: &str) -> ScriptResult<Value> {
        let root = self.env.root(scope).clone();
        let found = root.borrow().get(name).cloned();
        if let Some(value) = found {
            return Ok(value);
        }

        let suggestion = {
            let map = root.borrow();
            suggest::nearest(name, map.keys().map(String::as_str))
        };
        let mut message = format!("{}{} is not defined", scope.sigil(), name);
        if let Some(s) = suggestion {
            message.push_str(&format!(" (did you mean {}{}?)", scope.sigil(), s));
        }

        if scope == ScopeKind::Constants || self.env.strict_variables {
            return Err(ScriptError::other(message));
        }
        warn!("{}", message);
        self.warnings.push(message);
        Ok(Value::Undefined)
    }

    fn local(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    fn root_of(&self, expr: &Expr) -> Option<ScopeKind> {
        let ExprKind::Ident(name) = &expr.kind else {
            return None;
        };
        if self.local(name).is_some() {
            return None;
        }
        match name.as_str() {
            "story" => Some(ScopeKind::Story),
            "temp" => Some(ScopeKind::Temp),
            "constants" => Some(ScopeKind::Constants),
            _ => None,
        }
    }

    fn identifier(&self, name: &str) -> ScriptResult<Value> {
        if let Some(value) = self.local(name) {
            return Ok(value.clone());
        }
        match name {
            "story" => Ok(Value::Object(self.env.story.clone())),
            "temp" => Ok(Value::Object(self.env.temp.clone())),
            "constants" => Ok(Value::Object(self.env.constants.clone())),
            "NaN" => Ok(Value::Number(f64::NAN)),
            "Infinity" => Ok(Value::Number(f64::INFINITY)),
            _ => library::global(name).ok_or_else(|| ScriptError::reference(name)),
        }
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    pub fn eval(&mut self, expr: &Expr) -> ScriptResult<Value> {
        self.eval_inner(expr).map_err(|e| e.with_span(expr.span))
    }

    fn eval_inner(&mut self, expr: &Expr) -> ScriptResult<Value> {
        match &expr.kind {
            ExprKind::Undefined => Ok(Value::Undefined),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        TemplateSegment::Str(s) => out.push_str(s),
                        TemplateSegment::Expr(e) => out.push_str(&self.eval(e)?.display()),
                    }
                }
                Ok(Value::Str(out))
            }
            ExprKind::Regex { source, flags } => {
                Ok(Value::Regex(Rc::new(WrappedRegex::compile(source, flags)?)))
            }
            ExprKind::Array(items) => Ok(Value::from(self.eval_list(items)?)),
            ExprKind::Object(entries) => {
                let mut map = IndexMap::new();
                for (key, value) in entries {
                    let key = match key {
                        PropertyKey::Named(name) => name.clone(),
                        PropertyKey::Computed(e) => self.eval(e)?.display(),
                    };
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::object(map))
            }
            ExprKind::Spread(_) => Err(ScriptError::syntax("unexpected spread")),
            ExprKind::Ident(name) => self.identifier(name),
            ExprKind::Member {
                object,
                property,
                optional,
            } => {
                if let Some(scope) = self.root_of(object) {
                    return self.variable(scope, property);
                }
                let target = self.eval(object)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                self.get_property(&target, &Value::Str(property.clone()))
            }
            ExprKind::Index {
                object,
                index,
                optional,
            } => {
                let key = self.eval(index)?;
                if let (Some(scope), Value::Str(name)) = (self.root_of(object), &key) {
                    return self.variable(scope, name);
                }
                let target = self.eval(object)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                self.get_property(&target, &key)
            }
            ExprKind::Call {
                callee,
                args,
                optional,
            } => {
                let (func, receiver) = match &callee.kind {
                    ExprKind::Member { object, .. } | ExprKind::Index { object, .. }
                        if self.root_of(object).is_none() =>
                    {
                        let receiver = self.eval(object)?;
                        let func = self.callee_property(callee, &receiver)?;
                        (func, Some(receiver))
                    }
                    _ => (self.eval(callee)?, None),
                };
                if *optional && func.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let args = self.eval_list(args)?;
                if !func.is_callable() && !matches!(func, Value::Macro(_)) {
                    return Err(ScriptError::not_callable(&describe_callee(callee)));
                }
                self.call(&func, receiver.as_ref(), args)
            }
            ExprKind::Unary { op, operand } => {
                // `typeof missing` must not fail.
                if *op == UnaryOp::Typeof {
                    if let ExprKind::Ident(name) = &operand.kind {
                        if self.identifier(name).is_err() {
                            return Ok(Value::from("undefined"));
                        }
                    }
                }
                let value = self.eval(operand)?;
                Ok(ops::unary(*op, value))
            }
            ExprKind::Update {
                increment,
                prefix,
                target,
            } => {
                let place = self.place(target)?;
                let old = self.read_place(&place)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_place(place, Value::Number(new))?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            ExprKind::Binary { op, left, right } => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                self.binary(*op, lhs, rhs)
            }
            ExprKind::Logical { op, left, right } => {
                let lhs = self.eval(left)?;
                if short_circuits(*op, &lhs) {
                    Ok(lhs)
                } else {
                    self.eval(right)
                }
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            ExprKind::Assign { op, target, value } => {
                let place = self.place(target)?;
                let result = match op {
                    None => self.eval(value)?,
                    Some(CompoundOp::Arith(bin)) => {
                        let current = self.read_place(&place)?;
                        let rhs = self.eval(value)?;
                        self.binary(*bin, current, rhs)?
                    }
                    Some(CompoundOp::Logical(logical)) => {
                        let current = self.read_place(&place)?;
                        if short_circuits(*logical, &current) {
                            return Ok(current);
                        }
                        self.eval(value)?
                    }
                };
                self.write_place(place, result.clone())?;
                Ok(result)
            }
            ExprKind::Arrow { params, body } => {
                let mut captures = IndexMap::new();
                for frame in &self.frames {
                    for (k, v) in frame {
                        captures.insert(k.clone(), v.clone());
                    }
                }
                Ok(Value::closure(Closure {
                    params: params.clone(),
                    body: body.clone(),
                    captures,
                }))
            }
        }
    }

    fn callee_property(&mut self, callee: &Expr, receiver: &Value) -> ScriptResult<Value> {
        let key = match &callee.kind {
            ExprKind::Member { property, .. } => Value::Str(property.clone()),
            ExprKind::Index { index, .. } => self.eval(index)?,
            _ => return self.eval(callee),
        };
        let optional = matches!(
            callee.kind,
            ExprKind::Member { optional: true, .. } | ExprKind::Index { optional: true, .. }
        );
        if optional && receiver.is_nullish() {
            return Ok(Value::Undefined);
        }
        self.get_property(receiver, &key)
    }

    /// Evaluate a list of expressions, expanding spreads.
    fn eval_list(&mut self, items: &[Expr]) -> ScriptResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match &item.kind {
                ExprKind::Spread(inner) => {
                    let value = self.eval(inner)?;
                    out.extend(library::iterate(&value).map_err(|e| e.with_span(item.span))?);
                }
                _ => out.push(self.eval(item)?),
            }
        }
        Ok(out)
    }

    // ========================================================================
    // Properties
    // ========================================================================

    pub fn get_property(&mut self, object: &Value, key: &Value) -> ScriptResult<Value> {
        match object {
            Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
                "cannot read property '{}' of {}",
                key.display(),
                object.describe_type()
            ))),
            Value::Object(o) => {
                let name = key.display();
                if let Some(value) = o.borrow().get(&name) {
                    return Ok(value.clone());
                }
                Ok(library::property(object, &name).unwrap_or(Value::Undefined))
            }
            Value::Array(a) => {
                if let Some(i) = ops::to_index(key) {
                    return Ok(a.borrow().get(i).cloned().unwrap_or(Value::Undefined));
                }
                Ok(library::property(object, &key.display()).unwrap_or(Value::Undefined))
            }
            Value::Str(s) => {
                if let Some(i) = ops::to_index(key) {
                    return Ok(s
                        .chars()
                        .nth(i)
                        .map(|c| Value::Str(c.to_string()))
                        .unwrap_or(Value::Undefined));
                }
                Ok(library::property(object, &key.display()).unwrap_or(Value::Undefined))
            }
            _ => Ok(library::property(object, &key.display()).unwrap_or(Value::Undefined)),
        }
    }

    pub fn set_property(&mut self, object: &Value, key: &Value, value: Value) -> ScriptResult<()> {
        match object {
            Value::Object(o) => {
                if Rc::ptr_eq(o, &self.env.constants) {
                    return Err(ScriptError::read_only(format!("@{}", key.display())));
                }
                o.borrow_mut().insert(key.display(), value);
                Ok(())
            }
            Value::Array(a) => {
                if let Some(i) = ops::to_index(key) {
                    let mut items = a.borrow_mut();
                    if i >= items.len() {
                        self.check_iterations(i - items.len())?;
                        items.resize(i + 1, Value::Undefined);
                    }
                    items[i] = value;
                    Ok(())
                } else if key.display() == "length" {
                    let len = ops::to_index(&value)
                        .ok_or_else(|| ScriptError::type_error("invalid array length"))?;
                    let mut items = a.borrow_mut();
                    if len > items.len() {
                        self.check_iterations(len - items.len())?;
                    }
                    items.resize(len, Value::Undefined);
                    Ok(())
                } else {
                    Err(ScriptError::type_error(format!(
                        "cannot set property '{}' of an array",
                        key.display()
                    )))
                }
            }
            other => Err(ScriptError::type_error(format!(
                "cannot set property '{}' of {}",
                key.display(),
                other.describe_type()
            ))),
        }
    }

    /// Assign `value` to an assignable expression such as `story.flag`.
    pub fn assign(&mut self, target: &Expr, value: Value) -> ScriptResult<()> {
        let place = self.place(target)?;
        self.write_place(place, value)
    }

    fn place(&mut self, target: &Expr) -> ScriptResult<Place> {
        match &target.kind {
            ExprKind::Ident(name) => {
                if self.local(name).is_some() {
                    Ok(Place::Local(name.clone()))
                } else if matches!(name.as_str(), "story" | "temp" | "constants") {
                    Err(ScriptError::read_only(name.clone()))
                } else {
                    Err(ScriptError::reference(name.clone()))
                }
            }
            ExprKind::Member {
                object, property, ..
            } => {
                if self.root_of(object) == Some(ScopeKind::Constants) {
                    return Err(ScriptError::read_only(format!("@{}", property)));
                }
                let target = self.eval(object)?;
                Ok(Place::Property(target, Value::Str(property.clone())))
            }
            ExprKind::Index { object, index, .. } => {
                let target = self.eval(object)?;
                let key = self.eval(index)?;
                Ok(Place::Property(target, key))
            }
            _ => Err(ScriptError::syntax("invalid assignment target")),
        }
    }

    fn read_place(&mut self, place: &Place) -> ScriptResult<Value> {
        match place {
            Place::Local(name) => Ok(self.local(name).cloned().unwrap_or_default()),
            Place::Property(object, key) => {
                if let (Value::Object(o), Value::Str(name)) = (object, key) {
                    // Reads through a root report missing variables once.
                    if Rc::ptr_eq(o, &self.env.story) {
                        return self.variable(ScopeKind::Story, name);
                    }
                    if Rc::ptr_eq(o, &self.env.temp) {
                        return self.variable(ScopeKind::Temp, name);
                    }
                }
                self.get_property(object, key)
            }
        }
    }

    fn write_place(&mut self, place: Place, value: Value) -> ScriptResult<()> {
        match place {
            Place::Local(name) => {
                if let Some(slot) = self
                    .frames
                    .iter_mut()
                    .rev()
                    .find_map(|frame| frame.get_mut(&name))
                {
                    *slot = value;
                }
                Ok(())
            }
            Place::Property(object, key) => self.set_property(&object, &key, value),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call a function value. `receiver` is the object a method was read from.
    pub fn call(&mut self, func: &Value, receiver: Option<&Value>, args: Vec<Value>) -> ScriptResult<Value> {
        match func {
            Value::Function(f) => match f.as_ref() {
                Function::Closure(closure) => self.call_closure(closure, args),
                Function::Builtin(name) => match library::call_builtin(name, args, self) {
                    BuiltinResult::Ok(v) => Ok(v),
                    BuiltinResult::Err(e) => Err(e),
                    BuiltinResult::NotFound => Err(ScriptError::not_callable(name)),
                },
                Function::Method(name) => {
                    let Some(receiver) = receiver else {
                        return Err(ScriptError::type_error(format!(
                            "method '{}' called without a receiver",
                            name
                        )));
                    };
                    match library::call_method(name, receiver, args, self) {
                        BuiltinResult::Ok(v) => Ok(v),
                        BuiltinResult::Err(e) => Err(e),
                        BuiltinResult::NotFound => Err(ScriptError::not_callable(name)),
                    }
                }
            },
            Value::Macro(def) => match self.invoker.as_deref_mut() {
                Some(invoker) => invoker.invoke_macro(def, args),
                None => Err(ScriptError::type_error(format!(
                    "macro @{} cannot be called here",
                    def.name
                ))),
            },
            other => Err(ScriptError::not_callable(other.describe_type())),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> ScriptResult<Value> {
        if self.depth >= self.env.max_depth {
            return Err(ScriptError::new(ScriptErrorKind::RecursionLimitExceeded {
                max_depth: self.env.max_depth,
            }));
        }
        let mut frame = closure.captures.clone();
        let mut args = args.into_iter();
        for param in &closure.params {
            frame.insert(param.clone(), args.next().unwrap_or_default());
        }

        self.depth += 1;
        self.frames.push(frame);
        let result = self.eval(&closure.body);
        self.frames.pop();
        self.depth -= 1;
        result
    }
}

fn short_circuits(op: LogicalOp, lhs: &Value) -> bool {
    match op {
        LogicalOp::And => !lhs.is_truthy(),
        LogicalOp::Or => lhs.is_truthy(),
        LogicalOp::Nullish => !lhs.is_nullish(),
    }
}

fn describe_callee(callee: &Expr) -> String {
    match &callee.kind {
        ExprKind::Ident(name) => name.clone(),
        ExprKind::Member { object, property, .. } => {
            format!("{}.{}", describe_callee(object), property)
        }
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::value::new_object;

    fn env() -> Env {
        Env {
            story: new_object(),
            temp: new_object(),
            constants: new_object(),
            strict_variables: false,
            max_iterations: MAX_ITERATIONS,
            max_depth: MAX_CALL_DEPTH,
            rng: Rc::new(Cell::new(42)),
        }
    }

    fn eval_in(env: &Env, code: &str) -> ScriptResult<Value> {
        Interpreter::new(env.clone()).eval_source(code)
    }

    #[test]
    fn test_concatenation_is_held_to_the_string_limit() {
        let env = env();
        eval_in(&env, "temp.s = 'x'.padEnd(1048576)").unwrap();
        let err = eval_in(&env, "temp.s + 'yz'").unwrap_err();
        assert!(matches!(err.kind, ScriptErrorKind::StringTooLong { .. }));
        let err = eval_in(&env, "temp.s += temp.s").unwrap_err();
        assert!(matches!(err.kind, ScriptErrorKind::StringTooLong { .. }));
        assert_eq!(eval_in(&env, "temp.s.length").unwrap(), Value::Number(1048576.0));
    }

    #[test]
    fn test_story_assignment_persists() {
        let env = env();
        eval_in(&env, "story.gold = 5").unwrap();
        eval_in(&env, "story.gold += 2").unwrap();
        assert_eq!(eval_in(&env, "story.gold").unwrap(), Value::Number(7.0));
    }

    #[test]
    fn test_missing_variable_warns() {
        let env = env();
        env.story.borrow_mut().insert("gold".into(), Value::Number(1.0));
        let mut interp = Interpreter::new(env.clone());
        assert_eq!(interp.eval_source("story.glod").unwrap(), Value::Undefined);
        let warnings = interp.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("did you mean $gold"));
    }

    #[test]
    fn test_strict_missing_variable_fails() {
        let mut env = env();
        env.strict_variables = true;
        assert!(eval_in(&env, "temp.nothing").is_err());
    }

    #[test]
    fn test_constants_are_read_only() {
        let env = env();
        env.constants.borrow_mut().insert("max".into(), Value::Number(3.0));
        let err = eval_in(&env, "constants.max = 4").unwrap_err();
        assert!(matches!(err.kind, ScriptErrorKind::ReadOnly(_)));
        assert!(eval_in(&env, "constants.nope").is_err());
    }

    #[test]
    fn test_closures_capture_parameters() {
        let env = env();
        let v = eval_in(&env, "(a => b => a + b)(1)(2)").unwrap();
        assert_eq!(v, Value::Number(3.0));
    }

    #[test]
    fn test_recursion_limit() {
        let env = env();
        eval_in(&env, "story.f = n => story.f(n + 1)").unwrap();
        let err = eval_in(&env, "story.f(0)").unwrap_err();
        assert!(matches!(err.kind, ScriptErrorKind::RecursionLimitExceeded { .. }));
    }

    #[test]
    fn test_arrays_share_references() {
        let env = env();
        eval_in(&env, "temp.list = [1, 2]").unwrap();
        eval_in(&env, "temp.list.push(3)").unwrap();
        assert_eq!(eval_in(&env, "temp.list.length").unwrap(), Value::Number(3.0));
        assert_eq!(eval_in(&env, "[...temp.list, 4].join('-')").unwrap(), Value::from("1-2-3-4"));
    }

    #[test]
    fn test_logical_and_nullish() {
        let env = env();
        assert_eq!(eval_in(&env, "0 || 'x'").unwrap(), Value::from("x"));
        assert_eq!(eval_in(&env, "0 ?? 'x'").unwrap(), Value::Number(0.0));
        assert_eq!(eval_in(&env, "null?.a").unwrap(), Value::Undefined);
        assert_eq!(eval_in(&env, "typeof nothing").unwrap(), Value::from("undefined"));
    }

    #[test]
    fn test_update_expressions() {
        let env = env();
        eval_in(&env, "story.n = 1").unwrap();
        assert_eq!(eval_in(&env, "story.n++").unwrap(), Value::Number(1.0));
        assert_eq!(eval_in(&env, "++story.n").unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_calling_non_function_fails() {
        let env = env();
        let err = eval_in(&env, "story.x = 1, 2").unwrap_err();
        assert!(matches!(err.kind, ScriptErrorKind::SyntaxError(_)));
        let err = eval_in(&env, "Math.nope()").unwrap_err();
        assert!(matches!(err.kind, ScriptErrorKind::TypeError(_)));
    }
}
