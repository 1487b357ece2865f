//! Passage syntax: the passage parser and the expression sub-lexer it uses
//! to find and rewrite embedded script.

pub mod parser;
pub mod relex;

pub use parser::{parse, MacroLookup, MacroShape, NoMacros, Parsed};
pub use relex::rewrite_expression;

use weft_template::{ErrorTemplate, Location, NodeTemplate};

use crate::utils::error::ParseError;

/// The node shown in place of a passage that failed to parse.
pub fn error_template(err: &ParseError) -> NodeTemplate {
    NodeTemplate::Error(ErrorTemplate {
        message: err.message.clone(),
        sample: err.sample.clone(),
        loc: Location::new(err.passage.as_str(), err.line),
    })
}
