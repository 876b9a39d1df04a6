use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::reader::Reader as XmlReader;

use super::{Document, NodeData, NodeId};
use crate::error::{Error, Result};
use crate::xml::{escape_attribute, escape_text};

/// Elements whose whitespace is part of the rendered label.
const TEXT_CONTENT: &[&str] = &["text", "tspan", "textPath", "title", "desc", "span", "p", "label"];

fn unescape_lossy(raw: &str) -> String {
    unescape(raw).map(|v| v.into_owned()).unwrap_or_else(|_| raw.to_string())
}

impl Document {
    fn element_from(&mut self, start: &BytesStart<'_>) -> NodeId {
        let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
        let node = self.create_element(name);
        for attr in start.attributes().filter_map(|a| a.ok()) {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = unescape_lossy(&String::from_utf8_lossy(&attr.value));
            self.set_attribute(node, &key, value);
        }
        node
    }

    fn place_parsed(&mut self, stack: &[NodeId], root: &mut Option<NodeId>, node: NodeId) -> Result<()> {
        match stack.last() {
            Some(&parent) => self.append_child(parent, node),
            None if root.is_none() => {
                *root = Some(node);
                Ok(())
            }
            None => Err(Error::Surface("markup has more than one root element".to_string())),
        }
    }

    fn push_text(&mut self, stack: &[NodeId], text: String) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if let Some(&parent) = stack.last() {
            let node = self.create_text(text);
            self.append_child(parent, node)?;
        }
        Ok(())
    }

    fn keeps_whitespace(&self, stack: &[NodeId]) -> bool {
        stack
            .last()
            .and_then(|&parent| self.local_name(parent))
            .is_some_and(|name| TEXT_CONTENT.contains(&name))
    }

    /// Parses a single-rooted XML fragment into a detached subtree.
    ///
    /// On error nothing parsed so far stays reachable.
    pub fn parse_fragment(&mut self, markup: &str) -> Result<NodeId> {
        let mut root = None;
        match self.parse_into(markup, &mut root) {
            Ok(()) => root.ok_or_else(|| Error::Surface("markup contains no element".to_string())),
            Err(err) => {
                if let Some(partial) = root {
                    self.release(partial);
                }
                Err(err)
            }
        }
    }

    fn parse_into(&mut self, markup: &str, root: &mut Option<NodeId>) -> Result<()> {
        let mut reader = XmlReader::from_str(markup);

        let mut stack: Vec<NodeId> = Vec::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(XmlEvent::Start(ref e)) => {
                    let node = self.element_from(e);
                    self.place_parsed(&stack, root, node)?;
                    stack.push(node);
                }
                Ok(XmlEvent::Empty(ref e)) => {
                    let node = self.element_from(e);
                    self.place_parsed(&stack, root, node)?;
                }
                Ok(XmlEvent::End(_)) => {
                    stack.pop();
                }
                Ok(XmlEvent::Text(ref e)) => {
                    let text = e.decode().unwrap_or_default();
                    // Indentation between tags carries no content.
                    if !text.trim().is_empty() || self.keeps_whitespace(&stack) {
                        self.push_text(&stack, unescape_lossy(&text))?;
                    }
                }
                Ok(XmlEvent::CData(ref e)) => {
                    let text = String::from_utf8_lossy(&e.clone().into_inner()).to_string();
                    self.push_text(&stack, text)?;
                }
                Ok(XmlEvent::GeneralRef(ref e)) => {
                    let name = e.decode().unwrap_or_default();
                    self.push_text(&stack, unescape_lossy(&format!("&{name};")))?;
                }
                Ok(XmlEvent::Eof) => break,
                Err(e) => return Err(Error::Surface(format!("XML parse error: {e}"))),
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(Error::Surface("markup ends inside an open element".to_string()));
        }
        Ok(())
    }

    pub fn outer_xml(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, &mut out);
        out
    }

    pub fn inner_xml(&self, node: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(node) {
            self.write_node(child, &mut out);
        }
        out
    }

    fn write_node(&self, node: NodeId, out: &mut String) {
        let Some(slot) = self.slot(node) else {
            return;
        };
        match &slot.data {
            NodeData::Vacant => {}
            NodeData::Document => {
                for &child in self.children(node) {
                    self.write_node(child, out);
                }
            }
            NodeData::Text(text) => out.push_str(&escape_text(text)),
            NodeData::Element { name, attrs } => {
                out.push('<');
                out.push_str(name);
                for (key, value) in attrs {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&escape_attribute(value));
                    out.push('"');
                }
                let children = self.children(node);
                if children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for &child in children {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
        }
    }
}
