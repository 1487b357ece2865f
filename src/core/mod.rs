//! Core pipeline modules
//!
//! - `syntax`: passage parser and expression sub-lexer
//! - `script`: expression parser and interpreter
//! - `render`: renderer, macro registry, built-in macros and engine

pub mod render;
pub mod script;
pub mod syntax;
