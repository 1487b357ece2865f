//! Standard library for the expression sub-language.
//!
//! Globals (`Math`, `JSON`, `Object`, `Array`, `String`, `Number`,
//! `Boolean`, `parseInt`, `parseFloat`, `isNaN`) and the methods available on
//! strings, arrays, numbers, regexes and objects.

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;
use phf::phf_set;
use regex::Captures;

use super::eval::Interpreter;
use super::value::{
    format_number, ArrayRef, Function, ScriptError, ScriptResult, Value, WrappedRegex,
};

/// Result of trying to call a built-in function or method.
///
/// Distinguishes "not found" from "found but failed" so the caller can
/// report a not-callable error with the right name.
pub enum BuiltinResult {
    /// Function was found and executed successfully
    Ok(Value),
    /// Function was found but execution failed
    Err(ScriptError),
    /// Function was not found
    NotFound,
}

impl From<ScriptResult<Value>> for BuiltinResult {
    fn from(result: ScriptResult<Value>) -> Self {
        match result {
            Ok(v) => BuiltinResult::Ok(v),
            Err(e) => BuiltinResult::Err(e),
        }
    }
}

static STRING_METHODS: phf::Set<&'static str> = phf_set! {
    "at", "charAt", "charCodeAt", "concat", "endsWith", "includes", "indexOf",
    "lastIndexOf", "match", "padEnd", "padStart", "repeat", "replace",
    "replaceAll", "slice", "split", "startsWith", "substring", "toLowerCase",
    "toString", "toUpperCase", "trim", "trimEnd", "trimStart",
};

static ARRAY_METHODS: phf::Set<&'static str> = phf_set! {
    "at", "concat", "every", "filter", "find", "findIndex", "flat", "forEach",
    "includes", "indexOf", "join", "lastIndexOf", "map", "pop", "push",
    "reduce", "reverse", "shift", "slice", "some", "sort", "splice",
    "toString", "unshift",
};

static NUMBER_METHODS: phf::Set<&'static str> = phf_set! {
    "toFixed", "toString",
};

static REGEX_METHODS: phf::Set<&'static str> = phf_set! {
    "exec", "test", "toString",
};

static OBJECT_METHODS: phf::Set<&'static str> = phf_set! {
    "hasOwnProperty", "toString",
};

/// Callable globals and static members, keyed by their dotted name.
static BUILTINS: phf::Set<&'static str> = phf_set! {
    "String", "Number", "Boolean", "parseInt", "parseFloat", "isNaN",
    "Math.abs", "Math.ceil", "Math.floor", "Math.round", "Math.trunc",
    "Math.sign", "Math.sqrt", "Math.cbrt", "Math.pow", "Math.min", "Math.max",
    "Math.random", "Math.log", "Math.exp", "Math.sin", "Math.cos", "Math.tan",
    "Object.keys", "Object.values", "Object.entries", "Object.assign",
    "JSON.stringify", "JSON.parse",
    "Array.isArray", "Array.from",
    "Number.isInteger", "Number.isFinite", "Number.isNaN",
    "Number.parseInt", "Number.parseFloat",
};

fn builtin(name: &'static str) -> Value {
    Value::Function(Rc::new(Function::Builtin(name)))
}

fn method(name: &'static str) -> Value {
    Value::Function(Rc::new(Function::Method(name)))
}

/// A namespace object holding every builtin under `prefix.`.
fn namespace(prefix: &str) -> Value {
    let mut map = IndexMap::new();
    let mut names: Vec<&'static str> = BUILTINS
        .iter()
        .copied()
        .filter(|name| name.strip_prefix(prefix).map_or(false, |rest| rest.starts_with('.')))
        .collect();
    names.sort_unstable();
    for name in names {
        map.insert(name[prefix.len() + 1..].to_string(), builtin(name));
    }
    Value::object(map)
}

/// Resolve a bare global identifier.
pub fn global(name: &str) -> Option<Value> {
    match name {
        "Math" => {
            let ns = namespace("Math");
            if let Value::Object(o) = &ns {
                let mut map = o.borrow_mut();
                map.insert("PI".into(), Value::Number(std::f64::consts::PI));
                map.insert("E".into(), Value::Number(std::f64::consts::E));
            }
            Some(ns)
        }
        "JSON" | "Object" | "Array" => Some(namespace(name)),
        _ => BUILTINS.get_key(name).map(|key| builtin(*key)),
    }
}

/// Look up a non-own property: `length`, methods, regex fields and static
/// members of callable globals.
pub fn property(value: &Value, name: &str) -> Option<Value> {
    let methods = match value {
        Value::Str(s) if name == "length" => return Some(Value::Number(s.chars().count() as f64)),
        Value::Array(a) if name == "length" => return Some(Value::Number(a.borrow().len() as f64)),
        Value::Regex(r) => match name {
            "source" => return Some(Value::Str(r.source.clone())),
            "flags" => return Some(Value::Str(r.flags.clone())),
            "global" => return Some(Value::Bool(r.is_global())),
            _ => &REGEX_METHODS,
        },
        Value::Function(f) => {
            return match f.as_ref() {
                Function::Builtin(base) => BUILTINS
                    .get_key(format!("{}.{}", base, name).as_str())
                    .map(|key| builtin(*key)),
                _ => None,
            }
        }
        Value::Str(_) => &STRING_METHODS,
        Value::Array(_) => &ARRAY_METHODS,
        Value::Number(_) => &NUMBER_METHODS,
        Value::Object(_) => &OBJECT_METHODS,
        _ => return None,
    };
    methods.get_key(name).map(|key| method(*key))
}

/// The items a spread or `Array.from` produces.
pub fn iterate(value: &Value) -> ScriptResult<Vec<Value>> {
    match value {
        Value::Array(a) => Ok(a.borrow().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(ScriptError::type_error(format!(
            "{} is not iterable",
            other.describe_type()
        ))),
    }
}

/// Object entries as `[key, value]` pairs.
pub fn entries(value: &Value) -> Vec<Value> {
    match value {
        Value::Object(o) => o
            .borrow()
            .iter()
            .map(|(k, v)| Value::from(vec![Value::Str(k.clone()), v.clone()]))
            .collect(),
        _ => Vec::new(),
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn arg_str(args: &[Value], i: usize) -> String {
    args.get(i).map(Value::display).unwrap_or_default()
}

fn arg_num(args: &[Value], i: usize) -> f64 {
    args.get(i).map(Value::to_number).unwrap_or(f64::NAN)
}

/// A possibly-negative position argument clamped to `0..=len`.
fn relative_index(args: &[Value], i: usize, len: usize, default: usize) -> usize {
    match args.get(i) {
        None | Some(Value::Undefined) => default,
        Some(v) => {
            let n = v.to_number();
            let n = if n.is_nan() { 0.0 } else { n.trunc() };
            if n < 0.0 {
                (len as f64 + n).max(0.0) as usize
            } else {
                (n as usize).min(len)
            }
        }
    }
}

fn callback(args: &[Value], name: &str) -> ScriptResult<Value> {
    match args.first() {
        Some(f @ Value::Function(_)) => Ok(f.clone()),
        _ => Err(ScriptError::type_error(format!("{} expects a function", name))),
    }
}

// ============================================================================
// Built-in functions
// ============================================================================

/// Call a builtin by its dotted name.
pub fn call_builtin(name: &str, args: Vec<Value>, interp: &mut Interpreter) -> BuiltinResult {
    match builtin_value(name, args, interp) {
        Some(result) => result.into(),
        None => BuiltinResult::NotFound,
    }
}

fn builtin_value(name: &str, args: Vec<Value>, interp: &mut Interpreter) -> Option<ScriptResult<Value>> {
    let first = arg(&args, 0);
    let value = match name {
        "String" => Value::Str(arg_str(&args, 0)),
        "Number" => Value::Number(if args.is_empty() { 0.0 } else { first.to_number() }),
        "Boolean" => Value::Bool(first.is_truthy()),
        "parseInt" | "Number.parseInt" => Value::Number(parse_int(&first.display(), args.get(1))),
        "parseFloat" | "Number.parseFloat" => Value::Number(parse_float(&first.display())),
        "isNaN" => Value::Bool(first.to_number().is_nan()),
        "Number.isNaN" => Value::Bool(matches!(first, Value::Number(n) if n.is_nan())),
        "Number.isInteger" => {
            Value::Bool(matches!(first, Value::Number(n) if n.is_finite() && n.fract() == 0.0))
        }
        "Number.isFinite" => Value::Bool(matches!(first, Value::Number(n) if n.is_finite())),
        "Object.keys" => Value::from(
            object_pairs(&first)
                .into_iter()
                .map(|(k, _)| Value::Str(k))
                .collect::<Vec<_>>(),
        ),
        "Object.values" => Value::from(
            object_pairs(&first)
                .into_iter()
                .map(|(_, v)| v)
                .collect::<Vec<_>>(),
        ),
        "Object.entries" => Value::from(
            object_pairs(&first)
                .into_iter()
                .map(|(k, v)| Value::from(vec![Value::Str(k), v]))
                .collect::<Vec<_>>(),
        ),
        "Array.isArray" => Value::Bool(matches!(first, Value::Array(_))),
        "Object.assign" => return Some(object_assign(args)),
        "JSON.stringify" => return Some(json_stringify(&args)),
        "JSON.parse" => return Some(json_parse(&first.display())),
        "Array.from" => {
            let items = match &first {
                Value::Object(_) => Ok(entries(&first)),
                other => iterate(other),
            };
            return Some(items.map(Value::from));
        }
        _ => match name.strip_prefix("Math.") {
            Some(math) => return Some(call_math(math, &args, interp)),
            None => return None,
        },
    };
    Some(Ok(value))
}

fn call_math(name: &str, args: &[Value], interp: &mut Interpreter) -> ScriptResult<Value> {
    let x = arg_num(args, 0);
    let n = match name {
        "abs" => x.abs(),
        "ceil" => x.ceil(),
        "floor" => x.floor(),
        // Rounds half up, including for negative numbers.
        "round" => (x + 0.5).floor(),
        "trunc" => x.trunc(),
        "sign" => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        "sqrt" => x.sqrt(),
        "cbrt" => x.cbrt(),
        "pow" => x.powf(arg_num(args, 1)),
        "log" => x.ln(),
        "exp" => x.exp(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "min" => args.iter().map(Value::to_number).fold(f64::INFINITY, |a, b| {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.min(b)
            }
        }),
        "max" => args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |a, b| {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.max(b)
            }
        }),
        "random" => interp.next_random(),
        _ => return Err(ScriptError::not_callable(&format!("Math.{}", name))),
    };
    Ok(Value::Number(n))
}

fn object_pairs(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(o) => o.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Array(a) => a
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Value::Str(s) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::Str(c.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

fn object_assign(args: Vec<Value>) -> ScriptResult<Value> {
    let mut iter = args.into_iter();
    let target = iter.next().unwrap_or_default();
    let Value::Object(o) = &target else {
        return Err(ScriptError::type_error("Object.assign expects an object target"));
    };
    for source in iter {
        for (k, v) in object_pairs(&source) {
            o.borrow_mut().insert(k, v);
        }
    }
    Ok(target)
}

fn json_stringify(args: &[Value]) -> ScriptResult<Value> {
    let value = arg(args, 0);
    if matches!(value, Value::Undefined | Value::Function(_)) {
        return Ok(Value::Undefined);
    }
    let json = value.to_json();
    let indented = matches!(args.get(2), Some(Value::Number(n)) if *n > 0.0)
        || matches!(args.get(2), Some(Value::Str(s)) if !s.is_empty());
    let text = if indented {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    };
    text.map(Value::Str)
        .map_err(|e| ScriptError::other(format!("JSON.stringify: {}", e)))
}

fn json_parse(text: &str) -> ScriptResult<Value> {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|json| Value::from_json(&json))
        .map_err(|e| ScriptError::syntax(format!("JSON.parse: {}", e)))
}

/// `parseInt`: optional sign, optional `0x`, then the longest digit prefix.
pub fn parse_int(text: &str, radix: Option<&Value>) -> f64 {
    let mut s = text.trim_start();
    let negative = s.starts_with('-');
    if s.starts_with('-') || s.starts_with('+') {
        s = &s[1..];
    }
    let explicit = match radix.map(Value::to_number) {
        Some(r) if r.is_finite() && r != 0.0 => Some(r as u32),
        _ => None,
    };
    let mut radix = explicit.unwrap_or(10);
    if matches!(explicit, None | Some(16)) && (s.starts_with("0x") || s.starts_with("0X")) {
        s = &s[2..];
        radix = 16;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: Vec<u32> = s.chars().map_while(|c| c.to_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let n = digits.iter().fold(0f64, |n, d| n * radix as f64 + *d as f64);
    if negative {
        -n
    } else {
        n
    }
}

/// `parseFloat`: the longest prefix that reads as a decimal number.
pub fn parse_float(text: &str) -> f64 {
    let s = text.trim_start();
    let unsigned = s.trim_start_matches(['-', '+']);
    if unsigned.starts_with("Infinity") {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    let bytes = s.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'-' || bytes[exp_end] == b'+') {
            exp_end += 1;
        }
        if exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
                exp_end += 1;
            }
            end = exp_end;
        }
    }
    s[..end].trim_end_matches('.').parse::<f64>().unwrap_or(f64::NAN)
}

// ============================================================================
// Methods
// ============================================================================

/// Call a method on a receiver.
pub fn call_method(name: &str, receiver: &Value, args: Vec<Value>, interp: &mut Interpreter) -> BuiltinResult {
    match receiver {
        Value::Str(s) => call_str_method(s, name, args, interp),
        Value::Array(a) => call_array_method(a, name, args, interp),
        Value::Number(n) => call_number_method(*n, name, &args),
        Value::Regex(r) => call_regex_method(r, name, &args),
        Value::Object(o) => match name {
            "hasOwnProperty" => BuiltinResult::Ok(Value::Bool(o.borrow().contains_key(&arg_str(&args, 0)))),
            "toString" => BuiltinResult::Ok(Value::Str(receiver.display())),
            _ => BuiltinResult::NotFound,
        },
        _ => BuiltinResult::NotFound,
    }
}

fn call_str_method(s: &str, name: &str, args: Vec<Value>, interp: &mut Interpreter) -> BuiltinResult {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let substr = |from: usize, to: usize| -> Value {
        Value::Str(chars[from.min(len)..to.min(len).max(from.min(len))].iter().collect())
    };
    let result = match name {
        "toString" => Value::Str(s.to_string()),
        "at" => {
            let i = arg_num(&args, 0);
            let i = if i < 0.0 { len as f64 + i } else { i };
            if i >= 0.0 && (i as usize) < len {
                Value::Str(chars[i as usize].to_string())
            } else {
                Value::Undefined
            }
        }
        "charAt" => {
            let i = relative_index(&args, 0, len, 0);
            Value::Str(chars.get(i).map(|c| c.to_string()).unwrap_or_default())
        }
        "charCodeAt" => {
            let i = relative_index(&args, 0, len, 0);
            Value::Number(chars.get(i).map(|c| *c as u32 as f64).unwrap_or(f64::NAN))
        }
        "concat" => Value::Str(args.iter().fold(s.to_string(), |acc, v| acc + &v.display())),
        "includes" => Value::Bool(s.contains(&arg_str(&args, 0))),
        "startsWith" => Value::Bool(s.starts_with(&arg_str(&args, 0))),
        "endsWith" => Value::Bool(s.ends_with(&arg_str(&args, 0))),
        "indexOf" => Value::Number(char_index(s, s.find(&arg_str(&args, 0)))),
        "lastIndexOf" => Value::Number(char_index(s, s.rfind(&arg_str(&args, 0)))),
        "slice" => {
            let from = relative_index(&args, 0, len, 0);
            let to = relative_index(&args, 1, len, len);
            substr(from, to)
        }
        "substring" => {
            let clamp = |i: usize| match args.get(i) {
                None | Some(Value::Undefined) => if i == 0 { 0 } else { len },
                Some(v) => {
                    let n = v.to_number();
                    if n.is_nan() || n < 0.0 { 0 } else { (n as usize).min(len) }
                }
            };
            let (a, b) = (clamp(0), clamp(1));
            substr(a.min(b), a.max(b))
        }
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "trim" => Value::Str(s.trim().to_string()),
        "trimStart" => Value::Str(s.trim_start().to_string()),
        "trimEnd" => Value::Str(s.trim_end().to_string()),
        "repeat" => {
            let n = arg_num(&args, 0);
            if !(n >= 0.0) || n.is_infinite() {
                return BuiltinResult::Err(ScriptError::type_error("invalid repeat count"));
            }
            let count = n as usize;
            if let Err(e) = interp
                .check_iterations(count)
                .and_then(|_| interp.check_string_length(len.saturating_mul(count)))
            {
                return BuiltinResult::Err(e);
            }
            Value::Str(s.repeat(count))
        }
        "padStart" | "padEnd" => {
            let target = arg_num(&args, 0);
            let fill = match args.get(1) {
                None | Some(Value::Undefined) => " ".to_string(),
                Some(v) => v.display(),
            };
            let target = if target.is_nan() { 0 } else { target.max(0.0) as usize };
            if target <= len || fill.is_empty() {
                Value::Str(s.to_string())
            } else if let Err(e) = interp.check_string_length(target) {
                return BuiltinResult::Err(e);
            } else {
                let pad: String = fill.chars().cycle().take(target - len).collect();
                if name == "padStart" {
                    Value::Str(pad + s)
                } else {
                    Value::Str(s.to_string() + &pad)
                }
            }
        }
        "split" => split(s, &args),
        "replace" | "replaceAll" => {
            return replace(s, &args, name == "replaceAll", interp).into();
        }
        "match" => match args.first() {
            Some(Value::Regex(r)) => regex_match(r, s),
            other => {
                let source = regex::escape(&other.map(Value::display).unwrap_or_default());
                match WrappedRegex::compile(&source, "") {
                    Ok(r) => regex_match(&r, s),
                    Err(e) => return BuiltinResult::Err(e),
                }
            }
        },
        _ => return BuiltinResult::NotFound,
    };
    BuiltinResult::Ok(result)
}

fn char_index(s: &str, byte_index: Option<usize>) -> f64 {
    match byte_index {
        Some(i) => s[..i].chars().count() as f64,
        None => -1.0,
    }
}

fn split(s: &str, args: &[Value]) -> Value {
    let parts: Vec<Value> = match args.first() {
        None | Some(Value::Undefined) => vec![Value::Str(s.to_string())],
        Some(Value::Regex(r)) => r.regex.split(s).map(Value::from).collect(),
        Some(sep) => {
            let sep = sep.display();
            if sep.is_empty() {
                s.chars().map(|c| Value::Str(c.to_string())).collect()
            } else {
                s.split(sep.as_str()).map(Value::from).collect()
            }
        }
    };
    match args.get(1) {
        Some(limit) if !limit.is_nullish() => {
            let limit = limit.to_number().max(0.0) as usize;
            Value::from(parts.into_iter().take(limit).collect::<Vec<_>>())
        }
        _ => Value::from(parts),
    }
}

/// `replace`/`replaceAll` with a string or regex pattern and a string
/// (supporting `$1`, `$&`) or function replacement.
fn replace(s: &str, args: &[Value], all: bool, interp: &mut Interpreter) -> ScriptResult<Value> {
    let regex = match args.first() {
        Some(Value::Regex(r)) => r.clone(),
        other => {
            let source = regex::escape(&other.map(Value::display).unwrap_or_default());
            Rc::new(WrappedRegex::compile(&source, "")?)
        }
    };
    let global = all || regex.is_global();
    let replacement = arg(args, 1);

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in regex.regex.captures_iter(s) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&s[last..whole.start()]);
        match &replacement {
            Value::Function(_) => {
                let mut call_args = capture_values(&caps);
                call_args.push(Value::Number(char_index(s, Some(whole.start()))));
                call_args.push(Value::Str(s.to_string()));
                let value = interp.call(&replacement, None, call_args)?;
                out.push_str(&value.display());
            }
            other => {
                let template = other.display().replace("$&", "${0}");
                caps.expand(&template, &mut out);
            }
        }
        last = whole.end();
        if !global {
            break;
        }
    }
    out.push_str(&s[last..]);
    Ok(Value::Str(out))
}

fn capture_values(caps: &Captures) -> Vec<Value> {
    caps.iter()
        .map(|m| m.map(|m| Value::from(m.as_str())).unwrap_or_default())
        .collect()
}

fn regex_match(r: &WrappedRegex, s: &str) -> Value {
    if r.is_global() {
        let all: Vec<Value> = r.regex.find_iter(s).map(|m| Value::from(m.as_str())).collect();
        if all.is_empty() {
            Value::Null
        } else {
            Value::from(all)
        }
    } else {
        r.regex
            .captures(s)
            .map(|caps| Value::from(capture_values(&caps)))
            .unwrap_or(Value::Null)
    }
}

fn call_number_method(n: f64, name: &str, args: &[Value]) -> BuiltinResult {
    match name {
        "toFixed" => {
            let digits = arg_num(args, 0);
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            if !n.is_finite() {
                return BuiltinResult::Ok(Value::Str(format_number(n)));
            }
            BuiltinResult::Ok(Value::Str(format!("{:.*}", digits, n)))
        }
        "toString" => {
            let radix = match args.first() {
                None | Some(Value::Undefined) => 10,
                Some(v) => v.to_number() as u32,
            };
            if !(2..=36).contains(&radix) {
                return BuiltinResult::Err(ScriptError::type_error("toString radix must be between 2 and 36"));
            }
            if radix == 10 || n.fract() != 0.0 || !n.is_finite() {
                return BuiltinResult::Ok(Value::Str(format_number(n)));
            }
            let mut digits = Vec::new();
            let mut rest = n.abs() as u64;
            loop {
                let d = (rest % radix as u64) as u32;
                digits.push(std::char::from_digit(d, radix).unwrap_or('0'));
                rest /= radix as u64;
                if rest == 0 {
                    break;
                }
            }
            if n < 0.0 {
                digits.push('-');
            }
            BuiltinResult::Ok(Value::Str(digits.into_iter().rev().collect()))
        }
        _ => BuiltinResult::NotFound,
    }
}

fn call_regex_method(r: &Rc<WrappedRegex>, name: &str, args: &[Value]) -> BuiltinResult {
    let text = arg_str(args, 0);
    match name {
        "test" => BuiltinResult::Ok(Value::Bool(r.regex.is_match(&text))),
        "exec" => BuiltinResult::Ok(
            r.regex
                .captures(&text)
                .map(|caps| Value::from(capture_values(&caps)))
                .unwrap_or(Value::Null),
        ),
        "toString" => BuiltinResult::Ok(Value::Str(format!("/{}/{}", r.source, r.flags))),
        _ => BuiltinResult::NotFound,
    }
}

fn call_array_method(a: &ArrayRef, name: &str, args: Vec<Value>, interp: &mut Interpreter) -> BuiltinResult {
    let receiver = Value::Array(a.clone());
    let len = a.borrow().len();
    let result = match name {
        "push" => {
            let mut items = a.borrow_mut();
            items.extend(args);
            Ok(Value::Number(items.len() as f64))
        }
        "pop" => Ok(a.borrow_mut().pop().unwrap_or_default()),
        "shift" => {
            let mut items = a.borrow_mut();
            Ok(if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            })
        }
        "unshift" => {
            let mut items = a.borrow_mut();
            for (i, v) in args.into_iter().enumerate() {
                items.insert(i, v);
            }
            Ok(Value::Number(items.len() as f64))
        }
        "at" => {
            let i = arg_num(&args, 0);
            let i = if i < 0.0 { len as f64 + i } else { i };
            Ok(if i >= 0.0 {
                a.borrow().get(i as usize).cloned().unwrap_or_default()
            } else {
                Value::Undefined
            })
        }
        "slice" => {
            let from = relative_index(&args, 0, len, 0);
            let to = relative_index(&args, 1, len, len).max(from);
            Ok(Value::from(a.borrow()[from..to].to_vec()))
        }
        "splice" => {
            let start = relative_index(&args, 0, len, 0);
            let count = match args.get(1) {
                None | Some(Value::Undefined) => len - start,
                Some(v) => (v.to_number().max(0.0) as usize).min(len - start),
            };
            let mut items = a.borrow_mut();
            let removed: Vec<Value> = items
                .splice(start..start + count, args.into_iter().skip(2))
                .collect();
            Ok(Value::from(removed))
        }
        "concat" => {
            let mut items = a.borrow().clone();
            for v in args {
                match v {
                    Value::Array(other) => items.extend(other.borrow().iter().cloned()),
                    other => items.push(other),
                }
            }
            Ok(Value::from(items))
        }
        "join" | "toString" => {
            let sep = match args.first() {
                Some(v) if name == "join" && !matches!(v, Value::Undefined) => v.display(),
                _ => ",".to_string(),
            };
            Ok(Value::Str(
                a.borrow()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.display() })
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }
        "indexOf" | "lastIndexOf" => {
            let needle = arg(&args, 0);
            let items = a.borrow();
            let found = if name == "indexOf" {
                items.iter().position(|v| v.strict_eq(&needle))
            } else {
                items.iter().rposition(|v| v.strict_eq(&needle))
            };
            Ok(Value::Number(found.map(|i| i as f64).unwrap_or(-1.0)))
        }
        "includes" => {
            let needle = arg(&args, 0);
            Ok(Value::Bool(a.borrow().iter().any(|v| v == &needle)))
        }
        "reverse" => {
            a.borrow_mut().reverse();
            Ok(receiver.clone())
        }
        "flat" => {
            let mut out = Vec::new();
            for v in a.borrow().iter() {
                match v {
                    Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::from(out))
        }
        "sort" => sort(a, args.first().cloned(), interp).map(|_| receiver.clone()),
        "map" | "filter" | "forEach" | "find" | "findIndex" | "some" | "every" => {
            iterate_with(a, name, &args, interp)
        }
        "reduce" => reduce(a, &args, interp),
        _ => return BuiltinResult::NotFound,
    };
    result.into()
}

/// The callback-taking array methods. The array is snapshotted first so the
/// callback may mutate it.
fn iterate_with(a: &ArrayRef, name: &str, args: &[Value], interp: &mut Interpreter) -> ScriptResult<Value> {
    let f = callback(args, name)?;
    let items = a.borrow().clone();
    interp.check_iterations(items.len())?;
    let receiver = Value::Array(a.clone());

    let mut mapped = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        let result = interp.call(&f, None, vec![item.clone(), Value::Number(i as f64), receiver.clone()])?;
        match name {
            "map" => mapped.push(result),
            "filter" if result.is_truthy() => mapped.push(item),
            "find" if result.is_truthy() => return Ok(item),
            "findIndex" if result.is_truthy() => return Ok(Value::Number(i as f64)),
            "some" if result.is_truthy() => return Ok(Value::Bool(true)),
            "every" if !result.is_truthy() => return Ok(Value::Bool(false)),
            _ => {}
        }
    }
    Ok(match name {
        "map" | "filter" => Value::from(mapped),
        "find" | "forEach" => Value::Undefined,
        "findIndex" => Value::Number(-1.0),
        "some" => Value::Bool(false),
        _ => Value::Bool(true),
    })
}

fn reduce(a: &ArrayRef, args: &[Value], interp: &mut Interpreter) -> ScriptResult<Value> {
    let f = callback(args, "reduce")?;
    let items = a.borrow().clone();
    interp.check_iterations(items.len())?;
    let mut iter = items.into_iter().enumerate();
    let mut acc = match args.get(1) {
        Some(init) => init.clone(),
        None => match iter.next() {
            Some((_, first)) => first,
            None => return Err(ScriptError::type_error("reduce of empty array with no initial value")),
        },
    };
    for (i, item) in iter {
        acc = interp.call(&f, None, vec![acc, item, Value::Number(i as f64)])?;
    }
    Ok(acc)
}

fn sort(a: &ArrayRef, comparator: Option<Value>, interp: &mut Interpreter) -> ScriptResult<()> {
    let mut items = a.borrow().clone();
    interp.check_iterations(items.len())?;
    let mut failure = None;
    match comparator {
        Some(f @ Value::Function(_)) => items.sort_by(|x, y| {
            if failure.is_some() {
                return Ordering::Equal;
            }
            match interp.call(&f, None, vec![x.clone(), y.clone()]) {
                Ok(v) => v.to_number().partial_cmp(&0.0).unwrap_or(Ordering::Equal),
                Err(e) => {
                    failure = Some(e);
                    Ordering::Equal
                }
            }
        }),
        _ => items.sort_by(|x, y| match (x, y) {
            (Value::Undefined, Value::Undefined) => Ordering::Equal,
            (Value::Undefined, _) => Ordering::Greater,
            (_, Value::Undefined) => Ordering::Less,
            _ => x.display().cmp(&y.display()),
        }),
    }
    if let Some(e) = failure {
        return Err(e);
    }
    *a.borrow_mut() = items;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::eval::{Env, MAX_CALL_DEPTH, MAX_ITERATIONS};
    use crate::core::script::value::{new_object, ScriptErrorKind};
    use std::cell::Cell;

    fn eval(code: &str) -> Value {
        try_eval(code).unwrap()
    }

    fn try_eval(code: &str) -> ScriptResult<Value> {
        let env = Env {
            story: new_object(),
            temp: new_object(),
            constants: new_object(),
            strict_variables: false,
            max_iterations: MAX_ITERATIONS,
            max_depth: MAX_CALL_DEPTH,
            rng: Rc::new(Cell::new(7)),
        };
        Interpreter::new(env).eval_source(code)
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(eval("'Hello'.toUpperCase()"), Value::from("HELLO"));
        assert_eq!(eval("'abcdef'.slice(-3)"), Value::from("def"));
        assert_eq!(eval("'a,b,c'.split(',').length"), Value::Number(3.0));
        assert_eq!(eval("'5'.padStart(3, '0')"), Value::from("005"));
        assert_eq!(eval("'héllo'.indexOf('l')"), Value::Number(2.0));
    }

    #[test]
    fn test_string_growth_is_capped() {
        let oversized = [
            "'x'.padStart(1e12)",
            "'x'.padEnd(2000000, 'ab')",
            "'abcdefghij'.repeat(1000).repeat(200)",
        ];
        for code in oversized {
            let err = try_eval(code).unwrap_err();
            assert!(
                matches!(err.kind, ScriptErrorKind::StringTooLong { .. }),
                "{} gave {:?}",
                code,
                err
            );
        }
        assert_eq!(eval("'ab'.repeat(3)"), Value::from("ababab"));
        assert_eq!(eval("'x'.padStart(1000).length"), Value::Number(1000.0));
    }

    #[test]
    fn test_replace_forms() {
        assert_eq!(eval("'aaa'.replace('a', 'b')"), Value::from("baa"));
        assert_eq!(eval("'aaa'.replaceAll('a', 'b')"), Value::from("bbb"));
        assert_eq!(eval("'a1b2'.replace(/(\\d)/g, '<$1>')"), Value::from("a<1>b<2>"));
        assert_eq!(eval("'ab'.replace(/b/, m => m.toUpperCase())"), Value::from("aB"));
    }

    #[test]
    fn test_array_callbacks() {
        assert_eq!(eval("[1, 2, 3].map(x => x * 2).join()"), Value::from("2,4,6"));
        assert_eq!(eval("[1, 2, 3].filter(x => x > 1).length"), Value::Number(2.0));
        assert_eq!(eval("[1, 2, 3].reduce((a, b) => a + b, 0)"), Value::Number(6.0));
        assert_eq!(eval("[3, 1, 2].sort().join('')"), Value::from("123"));
        assert_eq!(eval("[3, 1, 2].sort((a, b) => b - a)[0]"), Value::Number(3.0));
        assert_eq!(eval("[1, 2, 3].find(x => x > 5)"), Value::Undefined);
    }

    #[test]
    fn test_splice() {
        assert_eq!(eval("[1, 2, 3, 4].splice(1, 2).join()"), Value::from("2,3"));
    }

    #[test]
    fn test_globals() {
        assert_eq!(eval("Math.max(1, 5, 3)"), Value::Number(5.0));
        assert_eq!(eval("Math.floor(Math.PI)"), Value::Number(3.0));
        assert_eq!(eval("parseInt('42px')"), Value::Number(42.0));
        assert_eq!(eval("parseInt('0x1f')"), Value::Number(31.0));
        assert_eq!(eval("parseFloat('3.5e1abc')"), Value::Number(35.0));
        assert_eq!(eval("isNaN('abc')"), Value::Bool(true));
        assert_eq!(eval("Number.isInteger(4)"), Value::Bool(true));
        assert_eq!(eval("Object.keys({b: 1, a: 2}).join()"), Value::from("b,a"));
        assert_eq!(eval("JSON.stringify({a: [1, 'x']})"), Value::from(r#"{"a":[1,"x"]}"#));
        assert_eq!(eval("JSON.parse('[1,2]').length"), Value::Number(2.0));
    }

    #[test]
    fn test_random_in_range() {
        let v = eval("Math.random()").to_number();
        assert!((0.0..1.0).contains(&v));
    }

    #[test]
    fn test_number_methods() {
        assert_eq!(eval("(3.14159).toFixed(2)"), Value::from("3.14"));
        assert_eq!(eval("(255).toString(16)"), Value::from("ff"));
    }
}
