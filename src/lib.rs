//! # Weft
//!
//! An embeddable interpreter for interactive passage markup: prose mixed
//! with HTML-like tags, `$story`/`_temp`/`@constant` references, and macros
//! for control flow, links, inputs and deferred content.
//!
//! ## Features
//!
//! - **Single-pass parser**: markup and embedded script are told apart while
//!   parsing, including the regex-versus-division ambiguity
//! - **Immutable templates**: passages parse once into a `NodeTemplate` tree
//! - **Renderer**: newline modes, loop signals, closure-correct captures for
//!   callbacks created inside loops
//! - **Pluggable host**: everything goes through [`DocumentHost`];
//!   [`MemoryHost`] is an in-memory tree with a manual clock
//!
//! ## Quick Start
//!
//! ```rust
//! use weft::{Engine, MemoryPassages};
//!
//! let passages: MemoryPassages = [("Start", "Hello, @print($name)!")].into_iter().collect();
//! let mut engine = Engine::in_memory(passages);
//! engine.load_story(r#"{"name": "world"}"#).unwrap();
//! engine.show("Start");
//! assert_eq!(engine.html(), "<p>Hello, world!</p>");
//! ```

pub mod core;
pub mod utils;

pub use weft_template as template;
pub use weft_template::{Body, NodeTemplate};

pub use crate::core::render::{
    Capabilities, DocumentHost, Engine, Event, MacroContext, MacroOutput, MemoryHost,
    MemoryPassages, NewlineMode, NodeId, Passage, PassageSource, Registry, RenderConfig,
    RenderInput,
};
pub use crate::core::script::{ScriptError, Value};
pub use crate::core::syntax::{parse, MacroLookup, NoMacros, Parsed};
pub use crate::utils::error::{ParseError, RenderError, RenderErrorKind, Warning};
