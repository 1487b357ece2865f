//! The expression sub-language.
//!
//! # Architecture
//!
//! ```text
//! rewritten source ("story.gold + 1")
//!        │
//!        ▼
//!    ┌───────────────┐
//!    │     Lexer     │  (regex-vs-division aware)
//!    └───────────────┘
//!        │
//!        ▼
//!    ┌───────────────┐
//!    │ Pratt parser  │  → Expr
//!    └───────────────┘
//!        │
//!        ▼
//!    ┌───────────────┐
//!    │  Interpreter  │  story / temp / constants roots
//!    └───────────────┘
//!        │
//!        ▼
//!      Value
//! ```
//!
//! The passage parser reuses [`Lexer`] to find where embedded fragments end
//! and to rewrite sigils before anything here runs.

mod ast;
mod eval;
mod lexer;
mod library;
mod ops;
mod parser;
mod value;

pub use ast::{Expr, ExprKind};
pub use eval::{Env, Interpreter, MacroInvoker, MAX_CALL_DEPTH, MAX_ITERATIONS, MAX_STRING_LENGTH};
pub use lexer::{is_ident_continue, is_ident_start, Lexer, TemplatePart, Token, TokenKind};
pub use library::{entries, iterate};
pub use parser::{parse_expression, MAX_NESTING_DEPTH};
pub use value::{
    format_number, new_object, ArrayRef, Closure, Function, ObjectRef, ScriptError,
    ScriptErrorKind, ScriptResult, SourceSpan, Value, WrappedRegex,
};
