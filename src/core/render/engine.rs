//! The engine: owns the host, the story state and everything that outlives
//! a single render pass.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use fxhash::FxHashMap;
use log::{debug, warn};
use serde::Deserialize;

use super::host::{CallbackId, DocumentHost, Event, MemoryHost, NodeId};
use super::passage::{MemoryPassages, PassageSource};
use super::registry::{MacroContext, Registry};
use super::renderer::{Callback, NewlineMode, RenderInput, Renderer};
use super::scope::{new_scope, ScopeRef};
use crate::core::script::{Value, MAX_CALL_DEPTH, MAX_ITERATIONS};
use crate::utils::error::{RenderError, Warning};

/// Render limits and defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Iterations a single `@while`/`@for` may run before failing.
    pub max_loop_iterations: usize,
    /// Nesting depth shared by passages, macro bodies and elements.
    pub recursion_limit: usize,
    /// Output resumes once depth unwinds to this after hitting the limit.
    pub recovery_depth: usize,
    /// If true, reading a missing `$`/`_` variable is an error.
    /// If false, it is `undefined` with a warning.
    pub strict_variables: bool,
    /// Mode for passages without a mode tag.
    pub default_mode: NewlineMode,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: MAX_ITERATIONS,
            recursion_limit: MAX_CALL_DEPTH,
            recovery_depth: 8,
            strict_variables: false,
            default_mode: NewlineMode::Block,
        }
    }
}

impl RenderConfig {
    /// Missing variables are errors.
    pub fn strict() -> Self {
        Self {
            strict_variables: true,
            ..Default::default()
        }
    }

    /// Missing variables are warnings.
    pub fn compat() -> Self {
        Self {
            strict_variables: false,
            ..Default::default()
        }
    }

    /// Load from JSON story metadata. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// State shared by every render pass.
pub struct Runtime {
    pub registry: Registry,
    pub story: ScopeRef,
    pub passages: Box<dyn PassageSource>,
    pub config: RenderConfig,
    pub callbacks: FxHashMap<CallbackId, Callback>,
    next_callback: u64,
    /// Callbacks re-run by `trigger`, by region name.
    pub redoables: FxHashMap<String, Vec<CallbackId>>,
    /// Temp bindings carried into the next passage.
    pub punted: Vec<(String, ScopeRef)>,
    pub warnings: Vec<Warning>,
    pub errors: Vec<RenderError>,
    /// Current render nesting.
    pub depth: usize,
    /// Output is suppressed while unwinding from the recursion limit.
    pub recovering: bool,
    pub rng: Rc<Cell<u64>>,
    /// The passage last shown.
    pub current: Option<String>,
}

impl Runtime {
    /// The registry is frozen here; constants cannot change afterwards.
    pub fn new(mut registry: Registry, passages: Box<dyn PassageSource>, config: RenderConfig) -> Self {
        registry.freeze();
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x2545_f491_4f6c_dd1d);
        Self {
            registry,
            story: new_scope(),
            passages,
            config,
            callbacks: FxHashMap::default(),
            next_callback: 0,
            redoables: FxHashMap::default(),
            punted: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            depth: 0,
            recovering: false,
            rng: Rc::new(Cell::new(seed | 1)),
            current: None,
        }
    }

    pub fn add_callback(&mut self, callback: Callback) -> CallbackId {
        self.next_callback += 1;
        let id = CallbackId(self.next_callback);
        self.callbacks.insert(id, callback);
        id
    }

    /// Make `Math.random` repeatable.
    pub fn seed(&mut self, seed: u64) {
        self.rng.set(seed | 1);
    }
}

/// An interpreter bound to one document host.
pub struct Engine<H: DocumentHost> {
    host: H,
    rt: Runtime,
}

impl<H: DocumentHost> Engine<H> {
    /// An engine with the built-in macros and the default configuration.
    pub fn new(host: H, passages: impl PassageSource + 'static) -> Self {
        Self::with_config(host, passages, RenderConfig::default())
    }

    pub fn with_config(host: H, passages: impl PassageSource + 'static, config: RenderConfig) -> Self {
        Self::with_registry(host, passages, Registry::with_builtins(), config)
    }

    /// An engine using a caller-built registry, for hosts adding their own macros.
    pub fn with_registry(
        host: H,
        passages: impl PassageSource + 'static,
        registry: Registry,
        config: RenderConfig,
    ) -> Self {
        Self {
            host,
            rt: Runtime::new(registry, Box::new(passages), config),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.rt
    }

    /// The story scope, persistent across navigation.
    pub fn story(&self) -> &ScopeRef {
        &self.rt.story
    }

    /// Merge a JSON object into the story scope.
    pub fn load_story(&mut self, json: &str) -> Result<(), serde_json::Error> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        match parsed {
            serde_json::Value::Object(map) => {
                let mut story = self.rt.story.borrow_mut();
                for (key, value) in map.iter() {
                    story.insert(key.clone(), Value::from_json(value));
                }
            }
            other => warn!("story state must be a JSON object, got {}", other),
        }
        Ok(())
    }

    /// A JSON copy of the story scope.
    pub fn snapshot_story(&self) -> serde_json::Value {
        Value::Object(self.rt.story.clone()).to_json()
    }

    pub fn seed(&mut self, seed: u64) {
        self.rt.seed(seed);
    }

    /// Navigate: clear the root and show `passage` with a fresh temp scope.
    pub fn show(&mut self, passage: &str) {
        let temp = new_scope();
        let mut renderer = Renderer::new(&mut self.host, &mut self.rt, temp);
        renderer.show(passage);
    }

    /// Render into `container` with an explicit temp scope.
    pub fn render(
        &mut self,
        container: NodeId,
        temp: ScopeRef,
        input: RenderInput<'_>,
        mode: NewlineMode,
        parent: Option<&MacroContext>,
    ) {
        let mut renderer = Renderer::new(&mut self.host, &mut self.rt, temp);
        renderer.render(container, input, mode, parent);
    }

    /// Run a callback, as the host does when an event arrives.
    pub fn fire(&mut self, id: CallbackId, event: Event) {
        Renderer::fire(&mut self.host, &mut self.rt, id, event);
    }

    /// Re-render every `@redoable` region registered under `name`.
    pub fn trigger(&mut self, name: &str) {
        Renderer::trigger(&mut self.host, &mut self.rt, name);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.rt.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.rt.warnings)
    }

    /// Errors shown so far, oldest first.
    pub fn errors(&self) -> &[RenderError] {
        &self.rt.errors
    }

    pub fn current_passage(&self) -> Option<&str> {
        self.rt.current.as_deref()
    }
}

impl Engine<MemoryHost> {
    /// An in-memory engine over the given passages.
    pub fn in_memory(passages: MemoryPassages) -> Self {
        Self::new(MemoryHost::new(), passages)
    }

    /// Advance the manual clock and run every timer that became due,
    /// including zero-delay timers scheduled by those timers.
    pub fn advance(&mut self, ms: u64) {
        let mut due = self.host.advance(ms);
        let mut rounds = 0;
        while !due.is_empty() {
            for id in due {
                self.fire(id, Event::Timer);
            }
            rounds += 1;
            if rounds > self.rt.config.max_loop_iterations {
                warn!("timers keep rescheduling themselves; stopping");
                break;
            }
            due = self.host.advance(0);
        }
    }

    /// Click a node. Returns false when it has no click handler.
    pub fn click(&mut self, node: NodeId) -> bool {
        match self.host.listener(node, "click") {
            Some(id) => {
                self.fire(id, Event::Click);
                true
            }
            None => {
                debug!("node {:?} has no click handler", node);
                false
            }
        }
    }

    /// Toggle a checkbox and notify its binding.
    pub fn set_checked(&mut self, node: NodeId, checked: bool) -> bool {
        if checked {
            self.host.set_attribute(node, "checked", "");
        } else {
            self.host.remove_attribute(node, "checked");
        }
        match self.host.listener(node, "change") {
            Some(id) => {
                self.fire(id, Event::Change(checked));
                true
            }
            None => false,
        }
    }

    /// Type into a text input and notify its binding.
    pub fn input_text(&mut self, node: NodeId, text: &str) -> bool {
        self.host.set_attribute(node, "value", text);
        match self.host.listener(node, "input") {
            Some(id) => {
                self.fire(id, Event::Input(text.to_string()));
                true
            }
            None => false,
        }
    }

    /// HTML of the root's content.
    pub fn html(&self) -> String {
        self.host.inner_html(self.host.root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render::renderer::Action;

    #[test]
    fn test_config_defaults_and_json() {
        let config = RenderConfig::default();
        assert_eq!(config.max_loop_iterations, 10_000);
        assert_eq!(config.recursion_limit, 64);
        assert!(RenderConfig::strict().strict_variables);
        assert!(!RenderConfig::compat().strict_variables);

        let loaded = RenderConfig::from_json(r#"{"recursion_limit": 5, "default_mode": "no_breaks"}"#).unwrap();
        assert_eq!(loaded.recursion_limit, 5);
        assert_eq!(loaded.default_mode, NewlineMode::NoBreaks);
        assert_eq!(loaded.max_loop_iterations, 10_000);
    }

    #[test]
    fn test_story_round_trip() {
        let mut engine = Engine::in_memory(MemoryPassages::new());
        engine.load_story(r#"{"gold": 5, "name": "Ann"}"#).unwrap();
        assert_eq!(engine.story().borrow().get("gold"), Some(&Value::from(5i64)));
        let snapshot = engine.snapshot_story();
        assert_eq!(snapshot["name"], serde_json::json!("Ann"));
    }

    #[test]
    fn test_registry_is_frozen() {
        let engine = Engine::in_memory(MemoryPassages::new());
        assert!(engine.runtime().registry.is_frozen());
    }

    #[test]
    fn test_callback_ids_are_unique() {
        let mut engine = Engine::in_memory(MemoryPassages::new());
        let root = engine.host().root();
        let callback = Callback {
            action: Action::Navigate("x".into()),
            captures: Default::default(),
            temp: new_scope(),
            anchor: root,
            once: false,
            passage: "p".into(),
            line: 1,
        };
        let a = engine.runtime_mut().add_callback(callback.clone());
        let b = engine.runtime_mut().add_callback(callback);
        assert_ne!(a, b);
    }
}
