//! Rendering: turns parsed passages into host document nodes.
//!
//! # Architecture
//!
//! ```text
//! Passage text
//!        │
//!        ▼
//!    ┌───────────────┐
//!    │    Parser     │  (syntax::parse, consults the Registry)
//!    └───────────────┘
//!        │  NodeTemplate tree
//!        ▼
//!    ┌───────────────┐
//!    │   Renderer    │  newline modes, expressions, macro dispatch
//!    └───────────────┘
//!        │
//!        ▼
//!    DocumentHost nodes + callbacks
//!        │  (clicks, timers, triggers)
//!        ▼
//!    Engine::fire ──► Renderer again
//! ```

mod builtins;
pub mod engine;
pub mod host;
pub mod passage;
pub mod registry;
pub mod renderer;
pub mod scope;

pub use engine::{Engine, RenderConfig, Runtime};
pub use host::{CallbackId, DocumentHost, Event, MemoryHost, NodeId};
pub use passage::{MemoryPassages, Passage, PassageSource};
pub use registry::{
    ArgGrammar, ArgPolicy, BodyPolicy, Capabilities, MacroContext, MacroDef, MacroHandler,
    MacroOutput, Registry, RegistryError, Site,
};
pub use renderer::{Action, Callback, LoopSignal, NewlineMode, RenderInput, Renderer};
pub use scope::{new_scope, Captures, ScopeRef, VarScope};
