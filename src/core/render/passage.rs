//! Passage lookup.
//!
//! Passages come from outside the engine (a story file, a bundle, a test).
//! The renderer only needs to look one up by name.

use indexmap::IndexMap;

use super::renderer::NewlineMode;

/// A named unit of passage text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub name: String,
    pub text: String,
    pub tags: Vec<String>,
    /// Line number of the first line of `text` in the story source.
    pub start_line: usize,
}

impl Passage {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            tags: Vec::new(),
            start_line: 1,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// The newline mode selected by the passage's tags, if any.
    pub fn mode(&self) -> Option<NewlineMode> {
        self.tags.iter().find_map(|t| NewlineMode::from_tag(t))
    }
}

/// Passage lookup collaborator.
pub trait PassageSource {
    fn passage(&self, name: &str) -> Option<Passage>;

    /// Every passage name, used for "did you mean" hints.
    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Passages kept in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryPassages {
    passages: IndexMap<String, Passage>,
}

impl MemoryPassages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a passage, replacing any passage with the same name.
    pub fn add(&mut self, name: impl Into<String>, text: impl Into<String>) -> &mut Self {
        let passage = Passage::new(name, text);
        self.insert(passage)
    }

    pub fn insert(&mut self, passage: Passage) -> &mut Self {
        self.passages.insert(passage.name.clone(), passage);
        self
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

impl<N: Into<String>, T: Into<String>> FromIterator<(N, T)> for MemoryPassages {
    fn from_iter<I: IntoIterator<Item = (N, T)>>(iter: I) -> Self {
        let mut passages = MemoryPassages::new();
        for (name, text) in iter {
            passages.add(name, text);
        }
        passages
    }
}

impl PassageSource for MemoryPassages {
    fn passage(&self, name: &str) -> Option<Passage> {
        self.passages.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.passages.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_names() {
        let passages: MemoryPassages = [("Start", "Hello"), ("End", "Bye")].into_iter().collect();
        assert_eq!(passages.len(), 2);
        assert_eq!(passages.passage("End").map(|p| p.text), Some("Bye".to_string()));
        assert!(passages.passage("Middle").is_none());
        assert_eq!(passages.names(), vec!["Start", "End"]);
    }

    #[test]
    fn test_mode_from_tags() {
        let passage = Passage::new("P", "x").with_tags(["nobr"]);
        assert!(passage.has_tag("nobr"));
        assert_eq!(passage.mode(), Some(NewlineMode::NoBreaks));
        assert_eq!(Passage::new("Q", "y").mode(), None);
    }
}
