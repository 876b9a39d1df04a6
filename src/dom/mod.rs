//! Retained page model the hooks operate on.
//!
//! Nodes live in an arena owned by [`Document`] and are addressed by [`NodeId`].
//! Released slots are recycled. Ids carry the slot generation, so a stale id
//! never aliases a newer node.

mod events;
mod parse;

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::xml::local_name;

pub use events::{
    DomEvent, EventKind, EventTarget, Listener, ListenerId, ListenerOptions, PointerTracker,
    dispatch,
};

pub type SharedDocument = Rc<RefCell<Document>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone)]
enum NodeData {
    Vacant,
    Document,
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
    measured: Option<(f32, f32)>,
    generation: u32,
}

pub struct Document {
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: NodeId,
    html: NodeId,
    body: NodeId,
    listeners: events::ListenerTable,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates `#document > html > body`.
    pub fn new() -> Self {
        let placeholder = NodeId {
            index: 0,
            generation: 0,
        };
        let mut doc = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: placeholder,
            html: placeholder,
            body: placeholder,
            listeners: events::ListenerTable::default(),
        };
        doc.root = doc.push(NodeData::Document);
        doc.html = doc.create_element("html");
        doc.body = doc.create_element("body");
        doc.link(doc.root, doc.html, false);
        doc.link(doc.html, doc.body, false);
        doc
    }

    pub fn into_shared(self) -> SharedDocument {
        Rc::new(RefCell::new(self))
    }

    /// The `#document` node; document-level listeners attach here.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn document_element(&self) -> NodeId {
        self.html
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.nodes[index];
            slot.data = data;
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.nodes.len();
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data,
            measured: None,
            generation: 0,
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    fn slot(&self, node: NodeId) -> Option<&Node> {
        self.nodes
            .get(node.index)
            .filter(|slot| slot.generation == node.generation)
    }

    fn slot_mut(&mut self, node: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(node.index)
            .filter(|slot| slot.generation == node.generation)
    }

    /// Slots in the arena, live or awaiting reuse.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn create_element(&mut self, name: impl Into<String>) -> NodeId {
        self.push(NodeData::Element {
            name: name.into(),
            attrs: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeData::Text(text.into()))
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.slot(node)
            .is_some_and(|slot| matches!(slot.data, NodeData::Element { .. }))
    }

    pub fn is_released(&self, node: NodeId) -> bool {
        self.slot(node).is_none()
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        match &self.slot(node)?.data {
            NodeData::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Tag name with any namespace prefix removed.
    pub fn local_name(&self, node: NodeId) -> Option<&str> {
        self.tag_name(node).map(local_name)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.slot(node).and_then(|slot| slot.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        match self.slot(node) {
            Some(slot) => &slot.children,
            None => &[],
        }
    }

    // ---------------------------------------------------------------------
    // Tree mutation
    // ---------------------------------------------------------------------

    fn link(&mut self, parent: NodeId, child: NodeId, front: bool) {
        self.detach(child);
        self.nodes[child.index].parent = Some(parent);
        let children = &mut self.nodes[parent.index].children;
        if front {
            children.insert(0, child);
        } else {
            children.push(child);
        }
    }

    fn check_insert(&self, parent: NodeId, child: NodeId) -> Result<()> {
        for node in [parent, child] {
            if self.is_released(node) {
                return Err(Error::DetachedNode(node));
            }
        }
        if self.contains(child, parent) {
            return Err(Error::InvalidHierarchy { parent, child });
        }
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_insert(parent, child)?;
        self.link(parent, child, false);
        Ok(())
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_insert(parent, child)?;
        self.link(parent, child, true);
        Ok(())
    }

    /// Removes `node` from its parent, keeping the subtree usable.
    pub fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.slot_mut(node).and_then(|slot| slot.parent.take()) else {
            return;
        };
        if let Some(parent) = self.slot_mut(parent) {
            parent.children.retain(|c| *c != node);
        }
    }

    /// Detaches `node` and retires its whole subtree, dropping every listener
    /// registered on it. The freed slots are reused by later nodes.
    pub fn release(&mut self, node: NodeId) {
        if node == self.root || self.is_released(node) {
            return;
        }
        self.detach(node);
        let subtree = self.descendants(node);
        for id in &subtree {
            let slot = &mut self.nodes[id.index];
            slot.generation = slot.generation.wrapping_add(1);
            slot.data = NodeData::Vacant;
            slot.parent = None;
            slot.children = Vec::new();
            slot.measured = None;
            self.free.push(id.index);
        }
        self.listeners.remove_targets(&subtree);
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// `node` followed by each of its ancestors up to the topmost one.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |n| self.parent(*n))
    }

    /// Inclusive: a node contains itself.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).any(|n| n == ancestor)
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        !self.is_released(node) && self.contains(self.root, node)
    }

    /// Nearest inclusive ancestor element carrying `attribute`.
    pub fn closest(&self, node: NodeId, attribute: &str) -> Option<NodeId> {
        self.ancestors(node)
            .find(|n| self.is_element(*n) && self.has_attribute(*n, attribute))
    }

    /// Preorder walk of the subtree rooted at `node`, `node` included.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|n| self.attribute(*n, "id") == Some(id))
    }

    pub fn elements_by_local_name(&self, scope: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|n| self.local_name(*n) == Some(name))
            .collect()
    }

    pub fn text_content(&self, node: NodeId) -> String {
        self.descendants(node)
            .into_iter()
            .filter_map(|n| match self.slot(n).map(|slot| &slot.data) {
                Some(NodeData::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Host-supplied layout size. The model does no layout of its own.
    pub fn measured_size(&self, node: NodeId) -> Option<(f32, f32)> {
        self.slot(node).and_then(|slot| slot.measured)
    }

    pub fn set_measured_size(&mut self, node: NodeId, width: f32, height: f32) {
        if let Some(slot) = self.slot_mut(node) {
            slot.measured = Some((width, height));
        }
    }

    // ---------------------------------------------------------------------
    // Attributes, classes, inline style
    // ---------------------------------------------------------------------

    pub fn attributes(&self, node: NodeId) -> &[(String, String)] {
        match self.slot(node).map(|slot| &slot.data) {
            Some(NodeData::Element { attrs, .. }) => attrs,
            _ => &[],
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.attributes(node)
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: impl Into<String>) {
        let Some(NodeData::Element { attrs, .. }) = self.slot_mut(node).map(|slot| &mut slot.data)
        else {
            return;
        };
        let value = value.into();
        match attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, existing)) => *existing = value,
            None => attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Option<String> {
        let Some(NodeData::Element { attrs, .. }) = self.slot_mut(node).map(|slot| &mut slot.data)
        else {
            return None;
        };
        let index = attrs.iter().position(|(k, _)| k == name)?;
        Some(attrs.remove(index).1)
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.attribute(node, "class")
            .is_some_and(|list| list.split_whitespace().any(|c| c == class))
    }

    /// Returns `true` when the class list changed.
    pub fn add_class(&mut self, node: NodeId, class: &str) -> bool {
        if self.has_class(node, class) {
            return false;
        }
        let list = match self.attribute(node, "class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {class}", existing.trim()),
            _ => class.to_string(),
        };
        self.set_attribute(node, "class", list);
        true
    }

    /// Returns `true` when the class list changed.
    pub fn remove_class(&mut self, node: NodeId, class: &str) -> bool {
        if !self.has_class(node, class) {
            return false;
        }
        let list = self
            .attribute(node, "class")
            .unwrap_or_default()
            .split_whitespace()
            .filter(|c| *c != class)
            .collect::<Vec<_>>()
            .join(" ");
        self.set_attribute(node, "class", list);
        true
    }

    fn style_declarations(&self, node: NodeId) -> Vec<(String, String)> {
        self.attribute(node, "style")
            .unwrap_or_default()
            .split(';')
            .filter_map(|decl| {
                let (prop, value) = decl.split_once(':')?;
                let prop = prop.trim();
                (!prop.is_empty()).then(|| (prop.to_string(), value.trim().to_string()))
            })
            .collect()
    }

    fn write_style(&mut self, node: NodeId, decls: &[(String, String)]) {
        let style = decls
            .iter()
            .map(|(p, v)| format!("{p}: {v}"))
            .collect::<Vec<_>>()
            .join("; ");
        self.set_attribute(node, "style", style);
    }

    pub fn style_property(&self, node: NodeId, property: &str) -> Option<String> {
        self.style_declarations(node)
            .into_iter()
            .find(|(p, _)| p == property)
            .map(|(_, v)| v)
    }

    pub fn set_style_property(&mut self, node: NodeId, property: &str, value: impl Into<String>) {
        let mut decls = self.style_declarations(node);
        let value = value.into();
        match decls.iter_mut().find(|(p, _)| p == property) {
            Some((_, existing)) => *existing = value,
            None => decls.push((property.to_string(), value)),
        }
        self.write_style(node, &decls);
    }

    pub fn remove_style_property(&mut self, node: NodeId, property: &str) {
        let mut decls = self.style_declarations(node);
        decls.retain(|(p, _)| p != property);
        self.write_style(node, &decls);
    }
}
