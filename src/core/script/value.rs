//! Value types for the expression sub-language.
//!
//! Values follow the hosted scripting language closely enough for passage
//! authors: arrays and objects are shared references, numbers are doubles,
//! and `undefined`/`null` are distinct.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use regex::Regex;

use super::ast::Expr;
use crate::core::render::host::NodeId;
use crate::core::render::registry::MacroDef;

/// A shared, mutable ordered map. Objects, the story scope and temp scopes
/// all use this representation.
pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;

/// A shared, mutable array.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Build a fresh empty object reference.
pub fn new_object() -> ObjectRef {
    Rc::new(RefCell::new(IndexMap::new()))
}

// ============================================================================
// Regex Type
// ============================================================================

/// A compiled regex literal together with its source and flags.
#[derive(Debug)]
pub struct WrappedRegex {
    pub regex: Regex,
    pub source: String,
    pub flags: String,
}

impl WrappedRegex {
    /// Compile `/source/flags`. Supported flags: `g`, `i`, `m`, `s`, `u`, `y`
    /// (the last two are accepted and ignored).
    pub fn compile(source: &str, flags: &str) -> ScriptResult<Self> {
        let mut inline = String::new();
        for flag in flags.chars() {
            match flag {
                'i' | 'm' | 's' => inline.push(flag),
                'g' | 'u' | 'y' => {}
                other => {
                    return Err(ScriptError::regex(format!("invalid flag '{}'", other)));
                }
            }
        }
        let pattern = if inline.is_empty() {
            source.to_string()
        } else {
            format!("(?{}){}", inline, source)
        };
        let regex = Regex::new(&pattern).map_err(|e| ScriptError::regex(e.to_string()))?;
        Ok(Self {
            regex,
            source: source.to_string(),
            flags: flags.to_string(),
        })
    }

    pub fn is_global(&self) -> bool {
        self.flags.contains('g')
    }
}

// ============================================================================
// Function Types
// ============================================================================

/// A user-written arrow function.
#[derive(Debug)]
pub struct Closure {
    /// Parameter names
    pub params: Vec<String>,
    /// The body expression
    pub body: Rc<Expr>,
    /// Arrow parameters of enclosing functions, captured at creation
    pub captures: IndexMap<String, Value>,
}

/// Something callable from script.
#[derive(Debug)]
pub enum Function {
    /// An arrow function.
    Closure(Closure),
    /// A global builtin such as `parseInt` or `Math.floor`.
    Builtin(&'static str),
    /// A method looked up on a receiver; the receiver is supplied at call time.
    Method(&'static str),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Closure(_) => "anonymous",
            Function::Builtin(name) | Function::Method(name) => name,
        }
    }
}

// ============================================================================
// Value Type
// ============================================================================

/// A runtime value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Function>),
    Regex(Rc<WrappedRegex>),
    /// A registered macro, resolved through the constants scope.
    Macro(Rc<MacroDef>),
    /// An opaque host node produced by a macro or function.
    Node(NodeId),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(a) => f.debug_list().entries(a.borrow().iter()).finish(),
            Value::Object(o) => f.debug_map().entries(o.borrow().iter()).finish(),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Regex(r) => write!(f, "/{}/{}", r.source, r.flags),
            Value::Macro(m) => write!(f, "<macro {}>", m.name),
            Value::Node(id) => write!(f, "<node {}>", id.0),
        }
    }
}

impl PartialEq for Value {
    /// Strict equality, except that `NaN` compares equal to itself so values
    /// can be used in assertions.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self.strict_eq(other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }
}

impl Value {
    pub fn object(map: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    pub fn closure(closure: Closure) -> Self {
        Value::Function(Rc::new(Function::Closure(closure)))
    }

    /// The `typeof` name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Regex(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Macro(_) => "function",
            Value::Node(_) => "object",
        }
    }

    /// A more precise name for diagnostics.
    pub fn describe_type(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Array(_) => "array",
            Value::Regex(_) => "regexp",
            Value::Macro(_) => "macro",
            Value::Node(_) => "node",
            other => other.type_name(),
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric conversion (`Number(x)`).
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => {
                let t = s.trim();
                if t.is_empty() {
                    0.0
                } else if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                    i64::from_str_radix(hex, 16)
                        .map(|n| n as f64)
                        .unwrap_or(f64::NAN)
                } else {
                    t.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(a) => {
                let items = a.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// String conversion (`String(x)`), which is also how values print.
    pub fn display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(a) => a
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.display() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(func) => format!("function {}() {{ [code] }}", func.name()),
            Value::Regex(r) => format!("/{}/{}", r.source, r.flags),
            Value::Macro(m) => format!("@{}", m.name),
            Value::Node(_) => "[object Node]".to_string(),
        }
    }

    /// Strict equality (`===`). Arrays, objects and functions compare by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Regex(a), Value::Regex(b)) => Rc::ptr_eq(a, b),
            (Value::Macro(a), Value::Macro(b)) => Rc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => a == b,
            _ => false,
        }
    }

    /// Loose equality (`==`).
    pub fn loose_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Number(_), Str(_))
            | (Str(_), Number(_))
            | (Bool(_), Number(_) | Str(_) | Bool(_))
            | (Number(_) | Str(_), Bool(_)) => self.to_number() == other.to_number(),
            (Array(_) | Object(_), Str(_) | Number(_) | Bool(_)) => {
                Str(self.display()).loose_eq(other)
            }
            (Str(_) | Number(_) | Bool(_), Array(_) | Object(_)) => {
                self.loose_eq(&Str(other.display()))
            }
            _ => self.strict_eq(other),
        }
    }

    /// A deep copy: arrays and objects are duplicated rather than shared.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Array(a) => Value::from(a.borrow().iter().map(Value::deep_clone).collect::<Vec<_>>()),
            Value::Object(o) => Value::object(
                o.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Convert to JSON for snapshots. Functions, macros, regexes and nodes
    /// have no JSON form and become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serde_json::Value::Number(serde_json::Number::from(*n as i64))
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(a) => serde_json::Value::Array(a.borrow().iter().map(Value::to_json).collect()),
            Value::Object(o) => serde_json::Value::Object(
                o.borrow()
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Function(_) | Value::Regex(_) | Value::Macro(_) | Value::Node(_) => {
                serde_json::Value::Null
            }
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::from(items.iter().map(Value::from_json).collect::<Vec<_>>())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Format a number the way the hosted language prints it.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ============================================================================
// Source Span Types
// ============================================================================

/// A byte range in rewritten expression source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn join(self, other: SourceSpan) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Extract the text covered by this span from a source string.
    pub fn extract<'a>(&self, source: &'a str) -> Option<&'a str> {
        source.get(self.start..self.end)
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// The kind of script error (without span information).
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptErrorKind {
    /// Operation applied to a value of the wrong type
    TypeError(String),
    /// Unknown bare identifier
    ReferenceError(String),
    /// Malformed expression source
    SyntaxError(String),
    /// Attempt to assign to a constant or a non-assignable target
    ReadOnly(String),
    /// Array callbacks or string repeats beyond the iteration limit
    TooManyIterations,
    /// Arrow functions calling themselves too deeply
    RecursionLimitExceeded { max_depth: usize },
    /// Regex compile error
    RegexError(String),
    /// A string operation would produce more than this many characters
    StringTooLong { max: usize },
    /// Expression nested deeper than the parser allows
    NestingTooDeep { max_depth: usize },
    /// Generic error
    Other(String),
}

impl fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptErrorKind::TypeError(msg) => write!(f, "type error: {}", msg),
            ScriptErrorKind::ReferenceError(name) => write!(f, "{} is not defined", name),
            ScriptErrorKind::SyntaxError(msg) => write!(f, "syntax error: {}", msg),
            ScriptErrorKind::ReadOnly(what) => write!(f, "cannot assign to {}", what),
            ScriptErrorKind::TooManyIterations => write!(f, "too many iterations"),
            ScriptErrorKind::RecursionLimitExceeded { max_depth } => write!(
                f,
                "function call depth exceeded maximum ({}). Possible infinite recursion.",
                max_depth
            ),
            ScriptErrorKind::RegexError(msg) => write!(f, "invalid regular expression: {}", msg),
            ScriptErrorKind::StringTooLong { max } => {
                write!(f, "string would be longer than {} characters", max)
            }
            ScriptErrorKind::NestingTooDeep { max_depth } => {
                write!(f, "expression nesting too deep (maximum {})", max_depth)
            }
            ScriptErrorKind::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// An error raised while lexing, parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub span: Option<SourceSpan>,
}

impl ScriptError {
    pub fn new(kind: ScriptErrorKind) -> Self {
        Self { kind, span: None }
    }

    /// Attach a span unless one is already present.
    pub fn with_span(mut self, span: SourceSpan) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::new(ScriptErrorKind::TypeError(msg.into()))
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::new(ScriptErrorKind::ReferenceError(name.into()))
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::new(ScriptErrorKind::SyntaxError(msg.into()))
    }

    pub fn read_only(what: impl Into<String>) -> Self {
        Self::new(ScriptErrorKind::ReadOnly(what.into()))
    }

    pub fn too_many_iterations() -> Self {
        Self::new(ScriptErrorKind::TooManyIterations)
    }

    pub fn string_too_long(max: usize) -> Self {
        Self::new(ScriptErrorKind::StringTooLong { max })
    }

    pub fn nesting_too_deep(max_depth: usize) -> Self {
        Self::new(ScriptErrorKind::NestingTooDeep { max_depth })
    }

    pub fn regex(msg: impl Into<String>) -> Self {
        Self::new(ScriptErrorKind::RegexError(msg.into()))
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::new(ScriptErrorKind::Other(msg.into()))
    }

    pub fn not_callable(what: &str) -> Self {
        Self::type_error(format!("{} is not a function", what))
    }

    pub fn kind(&self) -> &ScriptErrorKind {
        &self.kind
    }

    /// Format the error with an excerpt of the expression it came from.
    pub fn format_with_source(&self, source: &str) -> String {
        let mut msg = self.kind.to_string();
        if let Some(extract) = self.span.and_then(|span| span.extract(source)) {
            let snippet = if extract.chars().count() > 40 {
                format!("{}...", extract.chars().take(40).collect::<String>())
            } else {
                extract.to_string()
            };
            msg = format!("{}\n  --> `{}`", msg, snippet);
        }
        msg
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(span) = &self.span {
            write!(f, " at {}", span)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

impl From<ScriptErrorKind> for ScriptError {
    fn from(kind: ScriptErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Result type for script operations.
pub type ScriptResult<T> = Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(Value::from(Vec::new()).is_truthy());
        assert!(Value::from("0").is_truthy());
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(Value::from("1").loose_eq(&Value::from(1i64)));
        assert!(Value::Bool(true).loose_eq(&Value::from(1i64)));
        assert!(!Value::Null.loose_eq(&Value::from(0i64)));
        assert!(!Value::from("1").strict_eq(&Value::from(1i64)));
    }

    #[test]
    fn test_arrays_compare_by_identity() {
        let a = Value::from(vec![Value::from(1i64)]);
        let b = Value::from(vec![Value::from(1i64)]);
        assert!(a.strict_eq(&a.clone()));
        assert!(!a.strict_eq(&b));
        assert_eq!(a.display(), "1");
    }

    #[test]
    fn test_json_round_trip_keeps_order() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"b": 1, "a": [true, null, "x"]}"#).unwrap();
        let value = Value::from_json(&json);
        if let Value::Object(o) = &value {
            let keys: Vec<_> = o.borrow().keys().cloned().collect();
            assert_eq!(keys, vec!["b", "a"]);
        } else {
            panic!("expected object, got {:?}", value);
        }
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_regex_flags() {
        let re = WrappedRegex::compile("ab+c", "gi").unwrap();
        assert!(re.is_global());
        assert!(re.regex.is_match("xABBC"));
        assert!(WrappedRegex::compile("a", "q").is_err());
    }
}
