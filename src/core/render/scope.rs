//! Variable scopes and loop captures.
//!
//! `story` and `temp` are plain shared maps owned by the engine. Loop
//! variables are additionally recorded in a [`Captures`] list so that
//! callbacks created inside a loop body see the value of their own
//! iteration when they run later.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::script::{new_object, ObjectRef, Value};

/// Bindings of one scope, in insertion order.
pub type VarScope = IndexMap<String, Value>;

/// A shared, externally owned scope (`story` or a render's `temp`).
pub type ScopeRef = ObjectRef;

/// Create a fresh empty scope.
pub fn new_scope() -> ScopeRef {
    new_object()
}

/// An immutable list of `(name, value)` bindings.
///
/// Extending a list copies it, so a list held by an earlier callback never
/// changes underneath it.
#[derive(Debug, Clone, Default)]
pub struct Captures {
    bindings: Rc<Vec<(String, Value)>>,
}

impl Captures {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new list with `(name, value)` added; `self` is left untouched.
    pub fn extended(&self, name: impl Into<String>, value: Value) -> Self {
        let mut bindings: Vec<(String, Value)> = self.bindings.as_ref().clone();
        bindings.push((name.into(), value));
        Self {
            bindings: Rc::new(bindings),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// The latest value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Write every binding into `scope`, remembering what was there before.
    pub fn install(&self, scope: &ScopeRef) -> Installed {
        let mut map = scope.borrow_mut();
        let previous = self
            .bindings
            .iter()
            .map(|(name, value)| {
                let old = map.insert(name.clone(), value.clone());
                (name.clone(), old)
            })
            .collect();
        Installed { previous }
    }
}

/// Bindings displaced by [`Captures::install`].
#[must_use = "installed captures must be restored"]
#[derive(Debug)]
pub struct Installed {
    previous: Vec<(String, Option<Value>)>,
}

impl Installed {
    /// Put the displaced bindings back, newest first.
    pub fn restore(self, scope: &ScopeRef) {
        let mut map = scope.borrow_mut();
        for (name, old) in self.previous.into_iter().rev() {
            match old {
                Some(value) => {
                    map.insert(name, value);
                }
                None => {
                    map.shift_remove(&name);
                }
            }
        }
    }
}
