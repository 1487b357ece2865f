//! Error handling for weft
//!
//! Parse failures are fatal for the passage being parsed; render errors are
//! displayed in place and rendering continues with the next sibling, except
//! for fatal errors which unwind to the render entry point.

use std::fmt;

/// Maximum length of a source sample shown next to an error.
const SAMPLE_LEN: usize = 40;

/// Shorten source text for display next to a diagnostic.
pub fn sample(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > SAMPLE_LEN {
        format!("{}...", text.chars().take(SAMPLE_LEN).collect::<String>())
    } else {
        text.to_string()
    }
}

// =============================================================================
// Parse errors
// =============================================================================

/// A structural failure that aborts the whole parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub passage: String,
    pub line: usize,
    /// Source text near the failure
    pub sample: String,
}

impl ParseError {
    pub fn new(
        message: impl Into<String>,
        passage: impl Into<String>,
        line: usize,
        sample_text: &str,
    ) -> Self {
        Self {
            message: message.into(),
            passage: passage.into(),
            line,
            sample: sample(sample_text),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error in {} at line {}: {}", self.passage, self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Result type for parse operations
pub type ParseResult<T> = Result<T, ParseError>;

/// A non-fatal issue found while parsing or rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    pub passage: String,
    pub line: usize,
}

impl Warning {
    pub fn new(message: impl Into<String>, passage: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            passage: passage.into(),
            line,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Warning in {} at line {}: {}", self.passage, self.line, self.message)
    }
}

/// Parse warnings are plain warnings.
pub type ParseWarning = Warning;

// =============================================================================
// Render errors
// =============================================================================

/// What went wrong while rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderErrorKind {
    /// An embedded expression failed; `source` is the text as written.
    Expression { source: String, cause: String },
    /// A macro handler failed.
    Macro { name: String, cause: String },
    /// A dynamic attribute failed; the remaining ones were skipped.
    Attribute {
        name: String,
        element: String,
        cause: String,
    },
    /// Markup that parses but cannot work (a body where none is allowed, ...).
    Authoring(String),
    /// `@break` or `@continue` outside any loop.
    StrayLoopSignal(&'static str),
    /// A passage (or `@render` string) failed to parse.
    Parse(String),
    /// The render recursion budget ran out.
    Recursion,
    /// A loop ran past the iteration limit. Fatal.
    TooManyIterations { name: String, limit: usize },
}

impl fmt::Display for RenderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderErrorKind::Expression { source, cause } => {
                write!(f, "Error in expression `{}`: {}", sample(source), cause)
            }
            RenderErrorKind::Macro { name, cause } => write!(f, "Error in @{}: {}", name, cause),
            RenderErrorKind::Attribute {
                name,
                element,
                cause,
            } => write!(f, "Error in attribute '{}' of <{}>: {}", name, element, cause),
            RenderErrorKind::Authoring(msg) => write!(f, "{}", msg),
            RenderErrorKind::StrayLoopSignal(signal) => {
                write!(f, "@{} used outside of a loop", signal)
            }
            RenderErrorKind::Parse(msg) => write!(f, "{}", msg),
            RenderErrorKind::Recursion => {
                write!(f, "Too much recursion; possible infinite recursion")
            }
            RenderErrorKind::TooManyIterations { name, limit } => {
                write!(f, "@{} ran more than {} iterations", name, limit)
            }
        }
    }
}

/// A render-time error, attributed to a passage line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub passage: String,
    pub line: usize,
    /// Source text shown under the message, if any
    pub sample: Option<String>,
    /// Set once the error has been shown, so enclosing frames do not show it again.
    pub displayed: bool,
}

impl RenderError {
    pub fn new(kind: RenderErrorKind, passage: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            passage: passage.into(),
            line,
            sample: None,
            displayed: false,
        }
    }

    pub fn with_sample(mut self, text: &str) -> Self {
        self.sample = Some(sample(text));
        self
    }

    pub fn authoring(msg: impl Into<String>, passage: impl Into<String>, line: usize) -> Self {
        Self::new(RenderErrorKind::Authoring(msg.into()), passage, line)
    }

    pub fn from_parse(err: &ParseError) -> Self {
        Self {
            kind: RenderErrorKind::Parse(err.message.clone()),
            passage: err.passage.clone(),
            line: err.line,
            sample: Some(err.sample.clone()),
            displayed: false,
        }
    }

    /// Fatal errors stop the whole render instead of only their own node.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, RenderErrorKind::TooManyIterations { .. })
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    /// `passage:line`, as shown in the error span's title.
    pub fn location(&self) -> String {
        format!("{}:{}", self.passage, self.line)
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.location())
    }
}

impl std::error::Error for RenderError {}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_truncates() {
        let long = "x".repeat(60);
        let s = sample(&long);
        assert_eq!(s.chars().count(), 43);
        assert!(s.ends_with("..."));
        assert_eq!(sample("  short  "), "short");
    }

    #[test]
    fn test_render_error_display() {
        let err = RenderError::new(
            RenderErrorKind::Expression {
                source: "$gold.toFixed(".into(),
                cause: "unexpected end of input".into(),
            },
            "Start",
            3,
        );
        assert_eq!(
            err.to_string(),
            "Error in expression `$gold.toFixed(`: unexpected end of input (Start:3)"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_too_many_iterations_is_fatal() {
        let err = RenderError::new(
            RenderErrorKind::TooManyIterations {
                name: "while".into(),
                limit: 10,
            },
            "Start",
            1,
        );
        assert!(err.is_fatal());
        assert_eq!(err.message(), "@while ran more than 10 iterations");
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new("missing closing tag for <div>", "Start", 2, "<div>hello");
        assert_eq!(
            err.to_string(),
            "Parse error in Start at line 2: missing closing tag for <div>"
        );
        assert_eq!(RenderError::from_parse(&err).sample.as_deref(), Some("<div>hello"));
    }
}
