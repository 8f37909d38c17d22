//! Arena-backed document model the recorder reads element paths and markup from.
//!
//! A node detached from the tree keeps its subtree so a removal can still be
//! rendered after the fact. Its slots are reused only once [`Document::release`]
//! is called for it.

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Document,
    Doctype(String),
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementData {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    freed: bool,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
                freed: false,
            }],
            free: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Drops every node except a fresh document root.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let node = Node {
            data,
            parent: None,
            children: Vec::new(),
            freed: false,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Number of nodes currently allocated, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Frees a detached subtree and returns the ids it occupied. Attached
    /// nodes and the document root are left alone. Freed ids must not be
    /// used again until the arena hands them out anew.
    pub fn release(&mut self, node: NodeId) -> Vec<NodeId> {
        let slot = &self.nodes[node.0];
        if node == self.root() || slot.parent.is_some() || slot.freed {
            return Vec::new();
        }
        let mut freed = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let slot = &mut self.nodes[id.0];
            stack.append(&mut slot.children);
            slot.data = NodeData::Text(String::new());
            slot.freed = true;
            freed.push(id);
        }
        self.free.extend_from_slice(&freed);
        freed
    }

    pub fn create_element<I, K, V>(&mut self, tag: &str, attributes: I) -> NodeId
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.push(NodeData::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Comment(text.to_string()))
    }

    pub fn create_doctype(&mut self, name: &str) -> NodeId {
        self.push(NodeData::Doctype(name.to_string()))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Inserts `child` right after `previous`, or as the first child when
    /// `previous` is `None` or not a child of `parent`.
    pub fn insert_after(&mut self, parent: NodeId, previous: Option<NodeId>, child: NodeId) {
        self.detach(child);
        let position = previous
            .and_then(|prev| self.nodes[parent.0].children.iter().position(|c| *c == prev))
            .map(|idx| idx + 1)
            .unwrap_or(0);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(position, child);
    }

    /// Unlinks `node` from its parent. The node and its subtree stay readable.
    pub fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != node);
        }
    }

    /// Detaches every child of `parent`.
    pub fn clear_children(&mut self, parent: NodeId) {
        let children = std::mem::take(&mut self.nodes[parent.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    pub fn data(&self, node: NodeId) -> &NodeData {
        &self.nodes[node.0].data
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.parent(node).filter(|p| self.is_element(*p))
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn element_children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(node)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        matches!(self.nodes[node.0].data, NodeData::Element(_))
    }

    fn element(&self, node: NodeId) -> Option<&ElementData> {
        match &self.nodes[node.0].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|e| e.tag.as_str())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?
            .attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `id` attribute, if present and non-empty.
    pub fn id(&self, node: NodeId) -> Option<&str> {
        self.attribute(node, "id").filter(|id| !id.is_empty())
    }

    pub fn class_list(&self, node: NodeId) -> Vec<&str> {
        self.attribute(node, "class")
            .map(|classes| classes.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Sets an attribute and returns its previous value.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Option<String> {
        let NodeData::Element(element) = &mut self.nodes[node.0].data else {
            return None;
        };
        match element.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value.to_string())),
            None => {
                element
                    .attributes
                    .push((name.to_string(), value.to_string()));
                None
            }
        }
    }

    /// Removes an attribute and returns its previous value.
    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Option<String> {
        let NodeData::Element(element) = &mut self.nodes[node.0].data else {
            return None;
        };
        let position = element.attributes.iter().position(|(k, _)| k == name)?;
        Some(element.attributes.remove(position).1)
    }

    /// Replaces the data of a text or comment node.
    pub fn set_text(&mut self, node: NodeId, text: &str) -> Option<String> {
        match &mut self.nodes[node.0].data {
            NodeData::Text(existing) | NodeData::Comment(existing) => {
                Some(std::mem::replace(existing, text.to_string()))
            }
            _ => None,
        }
    }

    pub fn document_element(&self) -> Option<NodeId> {
        self.element_children(self.root()).next()
    }

    pub fn body(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.element_children(html)
            .find(|c| self.tag_name(*c) == Some("body"))
    }

    /// `document.title`: the whitespace-collapsed text of the first `<title>`.
    pub fn title(&self) -> String {
        self.descendants(self.root())
            .find(|n| self.tag_name(*n) == Some("title"))
            .map(|t| {
                self.text_content(t)
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    }

    /// Pre-order descendants of `node`, excluding `node` itself.
    pub fn descendants(&self, node: NodeId) -> Descendants<'_> {
        let mut stack: Vec<NodeId> = self.children(node).to_vec();
        stack.reverse();
        Descendants { doc: self, stack }
    }

    /// Whether `node` is `ancestor` or lies inside its subtree.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// Resolves an element-child index path starting at the document element.
    pub fn resolve_path(&self, indices: &[usize]) -> Option<NodeId> {
        let mut current = self.document_element()?;
        for index in indices {
            current = self.element_children(current).nth(*index)?;
        }
        Some(current)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        match &self.nodes[node.0].data {
            NodeData::Text(text) | NodeData::Comment(text) => text.clone(),
            NodeData::Doctype(_) => String::new(),
            NodeData::Document | NodeData::Element(_) => self
                .descendants(node)
                .filter_map(|n| match self.data(n) {
                    NodeData::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out, false);
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String, raw_text: bool) {
        match &self.nodes[node.0].data {
            NodeData::Document => {
                for child in self.children(node) {
                    self.write_html(*child, out, false);
                }
            }
            NodeData::Doctype(name) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(name);
                out.push('>');
            }
            NodeData::Text(text) if raw_text => out.push_str(text),
            NodeData::Text(text) => escape_text(text, out),
            NodeData::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeData::Element(element) => {
                out.push('<');
                out.push_str(&element.tag);
                for (name, value) in &element.attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_attribute(value, out);
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&element.tag.as_str()) {
                    return;
                }
                let raw = RAW_TEXT_ELEMENTS.contains(&element.tag.as_str());
                for child in self.children(node) {
                    self.write_html(*child, out, raw);
                }
                out.push_str("</");
                out.push_str(&element.tag);
                out.push('>');
            }
        }
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let node = self.stack.pop()?;
        self.stack
            .extend(self.doc.children(node).iter().rev().copied());
        Some(node)
    }
}
