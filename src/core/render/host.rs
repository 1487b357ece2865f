//! Document host trait.
//!
//! The renderer never touches a real document tree. Everything it creates
//! goes through [`DocumentHost`], so the same engine can drive a browser
//! DOM binding, a terminal front end or the in-memory tree used by tests.

use std::fmt::Write as _;

use indexmap::IndexMap;

/// Handle to a host node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Handle to a registered callback (event listener or timer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u64);

/// What caused a callback to fire.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Click,
    /// A checkbox changed state.
    Change(bool),
    /// A text input changed.
    Input(String),
    /// A scheduled delay elapsed.
    Timer,
    /// A redoable region was triggered by name.
    Trigger(String),
}

impl Event {
    /// The host-level event name, as used in `on<event>` attributes.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Click => "click",
            Event::Change(_) => "change",
            Event::Input(_) => "input",
            Event::Timer => "timer",
            Event::Trigger(_) => "trigger",
        }
    }
}

/// Document tree adapter.
///
/// Implementations own the nodes; the renderer only holds [`NodeId`]s.
pub trait DocumentHost {
    /// The container passages are shown in.
    fn root(&self) -> NodeId;

    fn create_text(&mut self, text: &str) -> NodeId;

    fn create_element(&mut self, tag: &str) -> NodeId;

    /// Append `child` as the last child of `parent`, detaching it first.
    fn append(&mut self, parent: NodeId, child: NodeId);

    /// Insert `child` as the first child of `parent`, detaching it first.
    fn prepend(&mut self, parent: NodeId, child: NodeId);

    /// Put `new` where `old` is and detach `old`.
    fn replace(&mut self, old: NodeId, new: NodeId);

    /// Detach every child of `node`.
    fn clear(&mut self, node: NodeId);

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);

    /// Fire `callback` when `event` happens on `node`.
    fn subscribe(&mut self, node: NodeId, event: &str, callback: CallbackId);

    /// Fire `callback` once after `delay_ms`.
    fn schedule(&mut self, delay_ms: u64, callback: CallbackId);

    /// Whether `node` is still reachable from [`DocumentHost::root`].
    fn is_attached(&self, node: NodeId) -> bool;

    /// Attached elements matching a simple selector (`tag`, `#id` or
    /// `.class`), in document order.
    fn query(&self, selector: &str) -> Vec<NodeId>;
}

// ============================================================================
// In-memory host
// ============================================================================

#[derive(Debug, Clone)]
enum NodeKind {
    Text(String),
    Element(String),
}

#[derive(Debug, Clone)]
struct MemoryNode {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: IndexMap<String, String>,
    listeners: Vec<(String, CallbackId)>,
}

impl MemoryNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attributes: IndexMap::new(),
            listeners: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Timer {
    due: u64,
    seq: u64,
    callback: CallbackId,
}

/// A document tree kept in memory, with a manual clock for timers.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    nodes: Vec<MemoryNode>,
    timers: Vec<Timer>,
    now: u64,
    seq: u64,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// Create a host whose root is an empty `<main>` element.
    pub fn new() -> Self {
        Self {
            nodes: vec![MemoryNode::new(NodeKind::Element("main".into()))],
            timers: Vec::new(),
            now: 0,
            seq: 0,
        }
    }

    fn node(&self, id: NodeId) -> Option<&MemoryNode> {
        self.nodes.get(id.0)
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.nodes.get(child.0).and_then(|n| n.parent) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(parent.0) {
            p.children.retain(|&c| c != child);
        }
        if let Some(c) = self.nodes.get_mut(child.0) {
            c.parent = None;
        }
    }

    fn insert(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) {
        if parent.0 >= self.nodes.len() || child.0 >= self.nodes.len() || parent == child {
            return;
        }
        self.detach(child);
        let children = &mut self.nodes[parent.0].children;
        match index {
            Some(i) => children.insert(i.min(children.len()), child),
            None => children.push(child),
        }
        self.nodes[child.0].parent = Some(parent);
    }

    /// Current time on the manual clock, in milliseconds.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Move the clock forward and return the timers that became due, in
    /// the order they fire.
    pub fn advance(&mut self, ms: u64) -> Vec<CallbackId> {
        self.now += ms;
        let now = self.now;
        let mut due: Vec<Timer> = Vec::new();
        self.timers.retain(|t| {
            if t.due <= now {
                due.push(t.clone());
                false
            } else {
                true
            }
        });
        due.sort_by_key(|t| (t.due, t.seq));
        due.into_iter().map(|t| t.callback).collect()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// The callback registered for `event` on `node`, if any.
    pub fn listener(&self, node: NodeId, event: &str) -> Option<CallbackId> {
        self.node(node)?
            .listeners
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, cb)| *cb)
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.node(node)?.kind {
            NodeKind::Element(tag) => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.node(node)?.attributes.get(name).map(String::as_str)
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.attributes.shift_remove(name);
        }
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.node(node).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Attached elements with the given tag name, in document order.
    pub fn elements(&self, tag: &str) -> Vec<NodeId> {
        self.query(tag)
    }

    /// Concatenated text of `node` and its descendants.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Some(n) = self.node(node) else { return };
        match &n.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(_) => {
                for &child in &n.children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Serialize the children of `node` as HTML.
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(node) {
            self.write_html(child, &mut out);
        }
        out
    }

    /// Serialize `node` itself as HTML.
    pub fn to_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        let Some(n) = self.node(node) else { return };
        match &n.kind {
            NodeKind::Text(text) => out.push_str(&escape(text)),
            NodeKind::Element(tag) => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in &n.attributes {
                    let _ = write!(out, " {}=\"{}\"", name, escape(value).replace('"', "&quot;"));
                }
                out.push('>');
                if is_void(tag) {
                    return;
                }
                for &child in &n.children {
                    self.write_html(child, out);
                }
                let _ = write!(out, "</{}>", tag);
            }
        }
    }

    fn matches(&self, node: &MemoryNode, selector: &str) -> bool {
        let NodeKind::Element(tag) = &node.kind else {
            return false;
        };
        if let Some(id) = selector.strip_prefix('#') {
            node.attributes.get("id").map_or(false, |v| v == id)
        } else if let Some(class) = selector.strip_prefix('.') {
            node.attributes
                .get("class")
                .map_or(false, |v| v.split_whitespace().any(|c| c == class))
        } else {
            tag.eq_ignore_ascii_case(selector)
        }
    }

    fn collect_matches(&self, node: NodeId, selector: &str, out: &mut Vec<NodeId>) {
        let Some(n) = self.node(node) else { return };
        if self.matches(n, selector) {
            out.push(node);
        }
        for &child in &n.children {
            self.collect_matches(child, selector, out);
        }
    }
}

impl DocumentHost for MemoryHost {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.nodes.push(MemoryNode::new(NodeKind::Text(text.to_string())));
        NodeId(self.nodes.len() - 1)
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.nodes
            .push(MemoryNode::new(NodeKind::Element(tag.to_ascii_lowercase())));
        NodeId(self.nodes.len() - 1)
    }

    fn append(&mut self, parent: NodeId, child: NodeId) {
        self.insert(parent, child, None);
    }

    fn prepend(&mut self, parent: NodeId, child: NodeId) {
        self.insert(parent, child, Some(0));
    }

    fn replace(&mut self, old: NodeId, new: NodeId) {
        let Some(parent) = self.node(old).and_then(|n| n.parent) else {
            return;
        };
        self.detach(new);
        let index = self.nodes[parent.0].children.iter().position(|&c| c == old);
        self.detach(old);
        self.insert(parent, new, index);
    }

    fn clear(&mut self, node: NodeId) {
        let children = match self.nodes.get_mut(node.0) {
            Some(n) => std::mem::take(&mut n.children),
            None => return,
        };
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.attributes.insert(name.to_string(), value.to_string());
        }
    }

    fn subscribe(&mut self, node: NodeId, event: &str, callback: CallbackId) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.listeners.push((event.to_string(), callback));
        }
    }

    fn schedule(&mut self, delay_ms: u64, callback: CallbackId) {
        self.seq += 1;
        self.timers.push(Timer {
            due: self.now + delay_ms,
            seq: self.seq,
            callback,
        });
    }

    fn is_attached(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == self.root() {
                return true;
            }
            current = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    fn query(&self, selector: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &child in self.children(self.root()) {
            self.collect_matches(child, selector.trim(), &mut out);
        }
        out
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn is_void(tag: &str) -> bool {
    matches!(
        tag,
        "area" | "base" | "br" | "col" | "embed" | "hr" | "img" | "input" | "link" | "meta"
            | "source" | "track" | "wbr"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_serialize() {
        let mut host = MemoryHost::new();
        let p = host.create_element("P");
        host.set_attribute(p, "class", "x\"y");
        let t = host.create_text("a < b");
        host.append(p, t);
        let br = host.create_element("br");
        host.append(p, br);
        host.append(host.root(), p);
        assert_eq!(host.inner_html(host.root()), "<p class=\"x&quot;y\">a &lt; b<br></p>");
        assert_eq!(host.text_content(host.root()), "a < b");
    }

    #[test]
    fn test_clear_detaches_descendants() {
        let mut host = MemoryHost::new();
        let outer = host.create_element("div");
        let inner = host.create_element("span");
        host.append(outer, inner);
        host.append(host.root(), outer);
        assert!(host.is_attached(inner));
        host.clear(host.root());
        assert!(!host.is_attached(inner));
        assert!(host.query("span").is_empty());
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut host = MemoryHost::new();
        let root = host.root();
        let a = host.create_text("a");
        let b = host.create_text("b");
        let c = host.create_text("c");
        host.append(root, a);
        host.append(root, b);
        host.replace(a, c);
        assert_eq!(host.children(root), &[c, b]);
        assert!(!host.is_attached(a));
    }

    #[test]
    fn test_query_selectors() {
        let mut host = MemoryHost::new();
        let div = host.create_element("div");
        host.set_attribute(div, "id", "box");
        host.set_attribute(div, "class", "a b");
        host.append(host.root(), div);
        assert_eq!(host.query("#box"), vec![div]);
        assert_eq!(host.query(".b"), vec![div]);
        assert_eq!(host.query("DIV"), vec![div]);
        assert!(host.query(".c").is_empty());
    }

    #[test]
    fn test_timers_fire_in_order() {
        let mut host = MemoryHost::new();
        host.schedule(20, CallbackId(1));
        host.schedule(10, CallbackId(2));
        host.schedule(10, CallbackId(3));
        assert!(host.advance(5).is_empty());
        assert_eq!(host.advance(20), vec![CallbackId(2), CallbackId(3), CallbackId(1)]);
        assert_eq!(host.pending_timers(), 0);
    }
}
