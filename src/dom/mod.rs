//! Arena-backed document model
//!
//! A minimal live DOM: element, text and comment nodes addressed by
//! [`NodeId`], with the mutation operations the content script performs
//! and a record queue equivalent to a child-list/character-data observer
//! on the body subtree.

mod node;

pub use node::{ElementData, MutationKind, MutationRecord, NodeData, NodeId, NodeType};

use anyhow::{Result, bail};
use node::Node;
use url::Url;

use crate::constants::traversal::{BODY_TAG, HTML_TAG, PARAGRAPH_TAG};

/// Document loading phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Complete,
}

#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    document_element: NodeId,
    body: Option<NodeId>,
    url: Url,
    ready_state: ReadyState,
    observing: bool,
    records: Vec<MutationRecord>,
    /// Replacements allowed before `replace_with` starts failing
    #[cfg(test)]
    replace_budget: Option<usize>,
}

impl Document {
    /// Fully loaded document with an empty body
    pub fn new(url: Url) -> Self {
        let mut doc = Self::loading(url);
        let html = doc.document_element;
        let body = doc.create_element(BODY_TAG);
        doc.attach(html, body);
        doc.body = Some(body);
        doc.ready_state = ReadyState::Complete;
        doc
    }

    /// Document still being parsed: no body yet
    pub fn loading(url: Url) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            document_element: NodeId(0),
            body: None,
            url,
            ready_state: ReadyState::Loading,
            observing: false,
            records: Vec::new(),
            #[cfg(test)]
            replace_budget: None,
        };
        doc.document_element = doc.create_element(HTML_TAG);
        doc
    }

    /// Loaded document whose body holds one paragraph per non-empty line of `text`
    pub fn from_text(url: Url, text: &str) -> Result<Self> {
        let mut doc = Self::new(url);
        let body = doc.body().ok_or_else(|| anyhow::anyhow!("new document has no body"))?;
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let paragraph = doc.append_element(body, PARAGRAPH_TAG)?;
            doc.append_text(paragraph, line)?;
        }
        Ok(doc)
    }

    /// Site-scoping key: the host portion of the page URL, empty for host-less URLs
    pub fn hostname(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    pub fn document_element(&self) -> NodeId {
        self.document_element
    }

    pub fn body(&self) -> Option<NodeId> {
        self.body
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// Parser reached `<body>`: create it if missing
    pub fn ensure_body(&mut self) -> NodeId {
        if let Some(body) = self.body {
            return body;
        }
        let body = self.create_element(BODY_TAG);
        self.attach(self.document_element, body);
        self.body = Some(body);
        body
    }

    /// Parsing finished
    pub fn finish_loading(&mut self) -> NodeId {
        let body = self.ensure_body();
        self.ready_state = ReadyState::Complete;
        body
    }

    // ==========================================================================
    // Node creation and inspection
    // ==========================================================================

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element(ElementData::new(tag)))
    }

    pub fn create_text_node(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Comment(text.to_string()))
    }

    pub fn append_element(&mut self, parent: NodeId, tag: &str) -> Result<NodeId> {
        let element = self.create_element(tag);
        self.append_child(parent, element)?;
        Ok(element)
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Result<NodeId> {
        let node = self.create_text_node(text);
        self.append_child(parent, node)?;
        Ok(node)
    }

    pub fn node_type(&self, node: NodeId) -> NodeType {
        self.node(node).node_type()
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.node(node).children
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent
    }

    /// Parent node if it is an element
    pub fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.parent(node)
            .filter(|&parent| self.node_type(parent) == NodeType::Element)
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        match &self.node(node).data {
            NodeData::Element(element) => Some(&element.tag),
            _ => None,
        }
    }

    /// Character data of a text or comment node
    pub fn text(&self, node: NodeId) -> Option<&str> {
        match &self.node(node).data {
            NodeData::Text(text) | NodeData::Comment(text) => Some(text),
            NodeData::Element(_) => None,
        }
    }

    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.node(node).data {
            NodeData::Element(element) => element.get(name),
            _ => None,
        }
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.get_attribute(node, name).is_some()
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        match &mut self.node_mut(node).data {
            NodeData::Element(element) => {
                element.set(name, value);
                Ok(())
            }
            _ => bail!("cannot set attribute '{name}' on non-element node {node:?}"),
        }
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        match &self.node(node).data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Comment(_) => {}
            NodeData::Element(_) => {
                for &child in self.children(node) {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Inclusive descendant check
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Connected elements carrying `name`, in document order
    pub fn elements_with_attribute(&self, name: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![self.document_element];
        while let Some(id) = stack.pop() {
            if self.has_attribute(id, name) {
                found.push(id);
            }
            stack.extend(self.children(id).iter().rev());
        }
        found
    }

    /// Serialize a subtree as HTML (attributes and text escaped)
    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        match &self.node(node).data {
            NodeData::Text(text) => out.push_str(&escape(text, false)),
            NodeData::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeData::Element(element) => {
                let tag = element.tag.to_ascii_lowercase();
                out.push('<');
                out.push_str(&tag);
                for (name, value) in &element.attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape(value, true));
                    out.push('"');
                }
                out.push('>');
                for &child in self.children(node) {
                    self.write_html(child, out);
                }
                out.push_str("</");
                out.push_str(&tag);
                out.push('>');
            }
        }
    }

    // ==========================================================================
    // Mutation
    // ==========================================================================

    /// Append `child` to `parent`, moving it from its current parent if attached
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.node_type(parent) != NodeType::Element {
            bail!("cannot append to non-element node {parent:?}");
        }
        if self.contains(child, parent) {
            bail!("cannot append {child:?} to its own descendant {parent:?}");
        }
        self.detach(child);
        self.attach(parent, child);
        self.record(MutationKind::ChildList, parent, vec![child], Vec::new());
        Ok(())
    }

    /// Detach `node` from its parent
    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        if node == self.document_element {
            bail!("cannot remove the document element");
        }
        if Some(node) == self.body {
            self.body = None;
        }
        self.detach(node);
        Ok(())
    }

    /// Put `replacement` where `old` is, detaching `old`
    pub fn replace_with(&mut self, old: NodeId, replacement: NodeId) -> Result<()> {
        if old == replacement {
            return Ok(());
        }
        let Some(parent) = self.parent(old) else {
            bail!("cannot replace detached node {old:?}");
        };
        if self.contains(replacement, parent) {
            bail!("replacement {replacement:?} is an ancestor of {old:?}");
        }
        if Some(old) == self.body {
            bail!("cannot replace the document body");
        }
        self.spend_replacement()?;

        if self.parent(replacement).is_some() {
            self.detach(replacement);
        }
        let index = self.index_in_parent(parent, old)?;
        self.node_mut(parent).children[index] = replacement;
        self.node_mut(replacement).parent = Some(parent);
        self.node_mut(old).parent = None;
        self.record(MutationKind::ChildList, parent, vec![replacement], vec![old]);
        Ok(())
    }

    /// Make every `replace_with` after the next `count` fail
    #[cfg(test)]
    pub(crate) fn fail_replacements_after(&mut self, count: usize) {
        self.replace_budget = Some(count);
    }

    #[cfg(test)]
    fn spend_replacement(&mut self) -> Result<()> {
        if let Some(budget) = self.replace_budget.as_mut() {
            if *budget == 0 {
                bail!("replacement refused");
            }
            *budget -= 1;
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn spend_replacement(&mut self) -> Result<()> {
        Ok(())
    }

    /// Replace the character data of a text node
    pub fn set_text(&mut self, node: NodeId, text: &str) -> Result<()> {
        match &mut self.node_mut(node).data {
            NodeData::Text(data) | NodeData::Comment(data) => *data = text.to_string(),
            NodeData::Element(_) => bail!("cannot set character data on element {node:?}"),
        }
        self.record(MutationKind::CharacterData, node, Vec::new(), Vec::new());
        Ok(())
    }

    /// Replace all children of `element` with a single text node
    pub fn set_text_content(&mut self, element: NodeId, text: &str) -> Result<NodeId> {
        if self.node_type(element) != NodeType::Element {
            bail!("cannot set text content on non-element node {element:?}");
        }
        let removed = std::mem::take(&mut self.node_mut(element).children);
        for &child in &removed {
            self.node_mut(child).parent = None;
        }
        let text_node = self.create_text_node(text);
        self.attach(element, text_node);
        self.record(MutationKind::ChildList, element, vec![text_node], removed);
        Ok(text_node)
    }

    // ==========================================================================
    // Observation
    // ==========================================================================

    /// Start recording child-list and character-data changes under the body
    pub fn observe(&mut self) {
        self.observing = true;
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Drain pending mutation records
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn has_pending_records(&self) -> bool {
        !self.records.is_empty()
    }

    fn record(&mut self, kind: MutationKind, target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) {
        let Some(body) = self.body else { return };
        if !self.observing || !self.contains(body, target) {
            return;
        }
        self.records.push(MutationRecord {
            kind,
            target,
            added,
            removed,
        });
    }

    // ==========================================================================
    // Arena internals
    // ==========================================================================

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(data));
        id
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(parent).children.push(child);
        self.node_mut(child).parent = Some(parent);
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.node_mut(node).parent.take() else { return };
        self.node_mut(parent).children.retain(|&child| child != node);
        self.record(MutationKind::ChildList, parent, Vec::new(), vec![node]);
    }

    fn index_in_parent(&self, parent: NodeId, child: NodeId) -> Result<usize> {
        self.children(parent)
            .iter()
            .position(|&id| id == child)
            .ok_or_else(|| anyhow::anyhow!("{child:?} missing from its parent's child list"))
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
