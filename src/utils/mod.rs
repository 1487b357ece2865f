//! Utility modules
//!
//! - Error and warning types with passage/line attribution
//! - "Did you mean?" suggestions

pub mod error;
pub mod suggest;

// Re-export commonly used items
pub use error::{
    ParseError, ParseResult, ParseWarning, RenderError, RenderErrorKind, RenderResult, Warning,
};
pub use suggest::nearest;
