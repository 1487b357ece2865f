//! Macro registry.
//!
//! Every `@name` resolves through the registry. An entry is either a plain
//! constant value or a macro: a handler plus the [`Capabilities`] that tell
//! the parser and the renderer how to treat its arguments and body.

use std::fmt;
use std::rc::Rc;

use weft_template::{Body, MacroArgs, MacroSegment};

use super::host::NodeId;
use super::renderer::{LoopSignal, NewlineMode, Renderer};
use super::scope::Captures;
use crate::core::script::{new_object, ObjectRef, Value};
use crate::core::syntax::{MacroLookup, MacroShape};
use crate::utils::error::RenderResult;

/// Whether arguments reach the handler evaluated or as source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPolicy {
    Evaluated,
    /// The handler gets the rewritten source (`@set`, `@if`, the unnamed macro).
    Raw,
}

/// Whether a `{ body }` may follow the macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPolicy {
    Forbidden,
    Optional,
    Required,
}

/// How the argument list is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgGrammar {
    /// `(expr, expr, ...)`
    List,
    /// `(_name of iterable)`
    Iteration,
}

/// What a macro accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub args: ArgPolicy,
    pub body: BodyPolicy,
    /// Sibling macros folded into a chain after this one.
    pub chain: Option<&'static [&'static str]>,
    pub grammar: ArgGrammar,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            args: ArgPolicy::Evaluated,
            body: BodyPolicy::Forbidden,
            chain: None,
            grammar: ArgGrammar::List,
        }
    }
}

impl Capabilities {
    pub fn raw(mut self) -> Self {
        self.args = ArgPolicy::Raw;
        self
    }

    pub fn body(mut self, body: BodyPolicy) -> Self {
        self.body = body;
        self
    }

    pub fn chain(mut self, siblings: &'static [&'static str]) -> Self {
        self.chain = Some(siblings);
        self
    }

    pub fn iteration(mut self) -> Self {
        self.grammar = ArgGrammar::Iteration;
        self
    }

    pub fn shape(&self) -> MacroShape {
        MacroShape {
            chain: self.chain,
            iteration: self.grammar == ArgGrammar::Iteration,
        }
    }
}

/// Where a macro was invoked and what it sees.
#[derive(Debug, Clone)]
pub struct Site {
    /// Node that output is appended to.
    pub container: NodeId,
    pub mode: NewlineMode,
    pub captures: Captures,
    pub passage: Rc<str>,
    pub line: usize,
}

/// Per-invocation context handed to a macro handler.
#[derive(Debug, Clone)]
pub struct MacroContext {
    pub name: String,
    /// Arguments as written (after sigil rewriting).
    pub args: MacroArgs,
    /// Evaluated arguments, when the macro asks for them.
    pub values: Vec<Value>,
    pub content: Option<Body>,
    /// Chained sibling segments following the head (`@elseif`, `@else`).
    pub chain: Vec<MacroSegment>,
    pub site: Site,
}

impl MacroContext {
    pub fn passage(&self) -> &str {
        &self.site.passage
    }

    pub fn line(&self) -> usize {
        self.site.line
    }

    pub fn captures(&self) -> &Captures {
        &self.site.captures
    }

    /// Raw argument sources of a list-style call.
    pub fn raw_args(&self) -> &[weft_template::ExprSource] {
        match &self.args {
            MacroArgs::List(args) => args,
            MacroArgs::Iteration { .. } => &[],
        }
    }

    pub fn value(&self, index: usize) -> Value {
        self.values.get(index).cloned().unwrap_or_default()
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroOutput {
    Nothing,
    Text(String),
    Node(NodeId),
    /// `@break` / `@continue`.
    Signal(LoopSignal),
}

/// A macro implementation.
pub type MacroHandler = Rc<dyn Fn(&mut Renderer<'_>, &MacroContext) -> RenderResult<MacroOutput>>;

/// A registered macro.
pub struct MacroDef {
    pub name: String,
    pub capabilities: Capabilities,
    pub handler: MacroHandler,
}

impl fmt::Debug for MacroDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroDef")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Registry failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry was frozen before this registration.
    Frozen(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Frozen(name) => {
                write!(f, "cannot register @{}: constants are frozen", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// The constants scope: macros and plain values.
#[derive(Debug)]
pub struct Registry {
    constants: ObjectRef,
    frozen: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            constants: new_object(),
            frozen: false,
        }
    }

    /// A registry with every built-in macro registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtins::register_all(&mut registry);
        registry
    }

    pub fn register_macro<F>(&mut self, name: &str, capabilities: Capabilities, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&mut Renderer<'_>, &MacroContext) -> RenderResult<MacroOutput> + 'static,
    {
        let def = MacroDef {
            name: name.to_string(),
            capabilities,
            handler: Rc::new(handler),
        };
        self.define(name, Value::Macro(Rc::new(def)))
    }

    /// Register a plain constant value (`@maxHealth`).
    pub fn define(&mut self, name: &str, value: Value) -> Result<(), RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen(name.to_string()));
        }
        self.constants.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    /// Refuse further registrations.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.constants.borrow().get(name).cloned()
    }

    pub fn get_macro(&self, name: &str) -> Option<Rc<MacroDef>> {
        match self.get(name)? {
            Value::Macro(def) => Some(def),
            _ => None,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.constants.borrow().keys().cloned().collect()
    }

    /// The live constants object expressions read through `@name`.
    pub fn constants(&self) -> &ObjectRef {
        &self.constants
    }
}

impl MacroLookup for Registry {
    fn shape(&self, name: &str) -> Option<MacroShape> {
        self.get_macro(name).map(|def| def.capabilities.shape())
    }
}
