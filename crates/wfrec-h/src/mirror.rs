//! Host-side copy of a tab's DOM, kept current from DevTools DOM events.
//!
//! The recorder reads element paths and markup from this copy instead of the
//! live page. Every event that would be a `childList` or `attributes` mutation
//! record in the page comes back from [`Mirror::apply`] as a [`DomChange`].

use chromiumoxide::cdp::browser_protocol::dom::Node as CdpNode;
use std::collections::HashMap;
use wfrec_engine::recorder::dom::{Document, NodeId};
use wfrec_engine::recorder::mutation::DomChange;

/// DevTools node id within one document lifetime.
pub type CdpNodeId = i64;

const ELEMENT_NODE: i64 = 1;
const TEXT_NODE: i64 = 3;
const CDATA_SECTION_NODE: i64 = 4;
const COMMENT_NODE: i64 = 8;
const DOCUMENT_TYPE_NODE: i64 = 10;

/// The parts of a DevTools `DOM.Node` the mirror keeps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MirrorNode {
    pub id: CdpNodeId,
    pub node_type: i64,
    pub name: String,
    pub value: String,
    pub attributes: Vec<(String, String)>,
    pub child_count: Option<i64>,
    pub children: Option<Vec<MirrorNode>>,
}

impl From<&CdpNode> for MirrorNode {
    fn from(node: &CdpNode) -> Self {
        let name = if node.local_name.is_empty() {
            node.node_name.to_ascii_lowercase()
        } else {
            node.local_name.clone()
        };
        Self {
            id: *node.node_id.inner(),
            node_type: node.node_type,
            name,
            value: node.node_value.clone(),
            attributes: node
                .attributes
                .as_deref()
                .map(attribute_pairs)
                .unwrap_or_default(),
            child_count: node.child_node_count,
            children: node
                .children
                .as_ref()
                .map(|children| children.iter().map(MirrorNode::from).collect()),
        }
    }
}

/// DevTools sends attributes as a flat `[name, value, name, value, ...]` list.
fn attribute_pairs(flat: &[String]) -> Vec<(String, String)> {
    flat.chunks(2)
        .filter_map(|pair| match pair {
            [name, value] => Some((name.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomEvent {
    ChildInserted {
        parent: CdpNodeId,
        /// `0` when the node became the first child.
        previous: CdpNodeId,
        node: MirrorNode,
    },
    ChildRemoved {
        parent: CdpNodeId,
        node: CdpNodeId,
    },
    AttributeModified {
        node: CdpNodeId,
        name: String,
        value: String,
    },
    AttributeRemoved {
        node: CdpNodeId,
        name: String,
    },
    CharacterData {
        node: CdpNodeId,
        data: String,
    },
    SetChildNodes {
        parent: CdpNodeId,
        nodes: Vec<MirrorNode>,
    },
    DocumentUpdated,
}

#[derive(Debug, Default)]
pub struct Mirror {
    doc: Document,
    ids: HashMap<CdpNodeId, NodeId>,
    cdp_ids: HashMap<NodeId, CdpNodeId>,
    incomplete: Vec<CdpNodeId>,
    /// Subtrees unlinked since the last [`Mirror::release_detached`].
    detached: Vec<NodeId>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn node(&self, id: CdpNodeId) -> Option<NodeId> {
        self.ids.get(&id).copied()
    }

    /// DevTools nodes the mirror can currently resolve.
    pub fn tracked_nodes(&self) -> usize {
        self.ids.len()
    }

    /// Replaces the mirror with a freshly fetched document tree.
    pub fn load(&mut self, root: &MirrorNode) {
        self.doc.clear();
        self.ids.clear();
        self.cdp_ids.clear();
        self.incomplete.clear();
        self.detached.clear();
        let doc_root = self.doc.root();
        self.ids.insert(root.id, doc_root);
        self.append_children(doc_root, root);
    }

    /// Nodes that arrived without their subtree. Their children must be
    /// requested so later events can be resolved.
    pub fn take_incomplete(&mut self) -> Vec<CdpNodeId> {
        std::mem::take(&mut self.incomplete)
    }

    /// Frees subtrees removed since the last call. Changes returned by
    /// [`Mirror::apply`] before this call must already be serialized.
    pub fn release_detached(&mut self) {
        for node in std::mem::take(&mut self.detached) {
            for freed in self.doc.release(node) {
                if let Some(cdp_id) = self.cdp_ids.remove(&freed) {
                    if self.ids.get(&cdp_id) == Some(&freed) {
                        self.ids.remove(&cdp_id);
                    }
                }
            }
        }
    }

    /// Applies one event. Returns the change it represents, if any. Events
    /// naming unknown nodes are ignored.
    pub fn apply(&mut self, event: DomEvent) -> Option<DomChange> {
        match event {
            DomEvent::ChildInserted {
                parent,
                previous,
                node,
            } => {
                let parent = self.node(parent)?;
                let previous = self.node(previous);
                let child = self.build(&node)?;
                self.doc.insert_after(parent, previous, child);
                Some(DomChange::ChildList {
                    target: parent,
                    added: vec![child],
                    removed: vec![],
                })
            }
            DomEvent::ChildRemoved { parent, node } => {
                let parent = self.node(parent)?;
                let child = self.node(node)?;
                self.doc.detach(child);
                self.detached.push(child);
                Some(DomChange::ChildList {
                    target: parent,
                    added: vec![],
                    removed: vec![child],
                })
            }
            DomEvent::AttributeModified { node, name, value } => {
                let target = self.node(node)?;
                let old_value = self.doc.set_attribute(target, &name, &value);
                Some(DomChange::Attributes {
                    target,
                    name,
                    old_value,
                })
            }
            DomEvent::AttributeRemoved { node, name } => {
                let target = self.node(node)?;
                let old_value = self.doc.remove_attribute(target, &name)?;
                Some(DomChange::Attributes {
                    target,
                    name,
                    old_value: Some(old_value),
                })
            }
            DomEvent::CharacterData { node, data } => {
                let target = self.node(node)?;
                self.doc.set_text(target, &data);
                None
            }
            DomEvent::SetChildNodes { parent, nodes } => {
                let parent = self.node(parent)?;
                self.detached.extend_from_slice(self.doc.children(parent));
                self.doc.clear_children(parent);
                for node in &nodes {
                    if let Some(child) = self.build(node) {
                        self.doc.append_child(parent, child);
                    }
                }
                None
            }
            DomEvent::DocumentUpdated => None,
        }
    }

    /// Whether a change happened inside `<body>`, the subtree the recorder
    /// observes.
    pub fn in_body(&self, change: &DomChange) -> bool {
        self.doc
            .body()
            .is_some_and(|body| self.doc.contains(body, change.target()))
    }

    fn build(&mut self, node: &MirrorNode) -> Option<NodeId> {
        let id = match node.node_type {
            ELEMENT_NODE => self
                .doc
                .create_element(&node.name, node.attributes.iter().cloned()),
            TEXT_NODE | CDATA_SECTION_NODE => self.doc.create_text(&node.value),
            COMMENT_NODE => self.doc.create_comment(&node.value),
            DOCUMENT_TYPE_NODE => self.doc.create_doctype(&node.name),
            _ => return None,
        };
        self.ids.insert(node.id, id);
        self.cdp_ids.insert(id, node.id);
        self.append_children(id, node);
        Some(id)
    }

    fn append_children(&mut self, parent: NodeId, node: &MirrorNode) {
        match &node.children {
            Some(children) => {
                for child in children {
                    if let Some(id) = self.build(child) {
                        self.doc.append_child(parent, id);
                    }
                }
            }
            None if node.child_count.unwrap_or(0) > 0 => self.incomplete.push(node.id),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfrec_engine::recorder::mutation::serialize_mutation;
    use wfrec_common::protocol::MutationKind;

    const DOCUMENT_NODE: i64 = 9;

    fn element(id: i64, name: &str, attrs: &[(&str, &str)], children: Vec<MirrorNode>) -> MirrorNode {
        MirrorNode {
            id,
            node_type: ELEMENT_NODE,
            name: name.into(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            child_count: Some(children.len() as i64),
            children: Some(children),
            ..Default::default()
        }
    }

    fn text(id: i64, value: &str) -> MirrorNode {
        MirrorNode {
            id,
            node_type: TEXT_NODE,
            name: "#text".into(),
            value: value.into(),
            child_count: Some(0),
            children: Some(vec![]),
            ..Default::default()
        }
    }

    fn loaded() -> Mirror {
        let root = MirrorNode {
            id: 1,
            node_type: DOCUMENT_NODE,
            name: "#document".into(),
            children: Some(vec![
                MirrorNode {
                    id: 2,
                    node_type: DOCUMENT_TYPE_NODE,
                    name: "html".into(),
                    ..Default::default()
                },
                element(
                    3,
                    "html",
                    &[],
                    vec![
                        element(4, "head", &[], vec![element(5, "title", &[], vec![text(6, "Shop")])]),
                        element(
                            7,
                            "body",
                            &[],
                            vec![element(8, "ul", &[("id", "list")], vec![])],
                        ),
                    ],
                ),
            ]),
            ..Default::default()
        };
        let mut mirror = Mirror::new();
        mirror.load(&root);
        mirror
    }

    #[test]
    fn load_builds_the_tree() {
        let mirror = loaded();
        let doc = mirror.document();
        assert_eq!(doc.title(), "Shop");
        let list = mirror.node(8).unwrap();
        assert_eq!(doc.attribute(list, "id"), Some("list"));
        assert_eq!(doc.body(), mirror.node(7));
    }

    #[test]
    fn insertion_reports_added_markup() {
        let mut mirror = loaded();
        let change = mirror
            .apply(DomEvent::ChildInserted {
                parent: 8,
                previous: 0,
                node: element(9, "li", &[], vec![text(10, "One")]),
            })
            .unwrap();
        assert!(mirror.in_body(&change));

        let record = serialize_mutation(mirror.document(), &change);
        assert_eq!(record.kind, MutationKind::ChildList);
        assert_eq!(record.added_nodes, Some(vec!["<li>One</li>".to_string()]));
        assert_eq!(record.target.as_deref(), Some("#list"));
    }

    #[test]
    fn insertion_respects_previous_sibling() {
        let mut mirror = loaded();
        for (id, previous, label) in [(9, 0, "a"), (11, 9, "c"), (13, 9, "b")] {
            mirror.apply(DomEvent::ChildInserted {
                parent: 8,
                previous,
                node: element(id, "li", &[], vec![text(id + 1, label)]),
            });
        }
        let list = mirror.node(8).unwrap();
        assert_eq!(
            mirror.document().text_content(list),
            "abc"
        );
    }

    #[test]
    fn removed_nodes_stay_renderable() {
        let mut mirror = loaded();
        mirror.apply(DomEvent::ChildInserted {
            parent: 8,
            previous: 0,
            node: element(9, "li", &[("class", "x")], vec![]),
        });
        let change = mirror
            .apply(DomEvent::ChildRemoved { parent: 8, node: 9 })
            .unwrap();
        let record = serialize_mutation(mirror.document(), &change);
        assert_eq!(
            record.removed_nodes,
            Some(vec!["<li class=\"x\"></li>".to_string()])
        );
        assert_eq!(record.added_nodes, Some(vec![]));
    }

    #[test]
    fn attribute_changes_capture_old_value() {
        let mut mirror = loaded();
        let change = mirror
            .apply(DomEvent::AttributeModified {
                node: 8,
                name: "class".into(),
                value: "open".into(),
            })
            .unwrap();
        assert_eq!(
            change,
            DomChange::Attributes {
                target: mirror.node(8).unwrap(),
                name: "class".into(),
                old_value: None,
            }
        );

        let change = mirror
            .apply(DomEvent::AttributeRemoved {
                node: 8,
                name: "class".into(),
            })
            .unwrap();
        let record = serialize_mutation(mirror.document(), &change);
        assert_eq!(record.old_value.as_deref(), Some("open"));
        assert_eq!(record.new_value, None);

        assert!(mirror
            .apply(DomEvent::AttributeRemoved {
                node: 8,
                name: "missing".into(),
            })
            .is_none());
    }

    #[test]
    fn head_changes_are_outside_body() {
        let mut mirror = loaded();
        let change = mirror
            .apply(DomEvent::AttributeModified {
                node: 5,
                name: "lang".into(),
                value: "en".into(),
            })
            .unwrap();
        assert!(!mirror.in_body(&change));
    }

    #[test]
    fn unknown_nodes_and_text_edits_produce_no_change() {
        let mut mirror = loaded();
        assert!(mirror
            .apply(DomEvent::ChildRemoved { parent: 8, node: 99 })
            .is_none());
        assert!(mirror
            .apply(DomEvent::CharacterData {
                node: 6,
                data: "Cart".into(),
            })
            .is_none());
        assert_eq!(mirror.document().title(), "Cart");
    }

    #[test]
    fn removed_subtrees_are_freed_after_release() {
        let mut mirror = loaded();
        let tracked = mirror.tracked_nodes();
        let allocated = mirror.document().node_count();

        for i in 0..10_000 {
            let id = 100 + i * 2;
            mirror.apply(DomEvent::ChildInserted {
                parent: 8,
                previous: 0,
                node: element(id, "li", &[], vec![text(id + 1, "tick")]),
            });
            let change = mirror
                .apply(DomEvent::ChildRemoved { parent: 8, node: id })
                .unwrap();
            let record = serialize_mutation(mirror.document(), &change);
            assert_eq!(record.removed_nodes, Some(vec!["<li>tick</li>".to_string()]));
            mirror.release_detached();
        }

        assert_eq!(mirror.tracked_nodes(), tracked);
        assert_eq!(mirror.document().node_count(), allocated);
        assert!(mirror.node(100).is_none());
        assert_eq!(mirror.document().children(mirror.node(8).unwrap()).len(), 0);
    }

    #[test]
    fn replaced_children_are_freed() {
        let mut mirror = loaded();
        mirror.apply(DomEvent::SetChildNodes {
            parent: 8,
            nodes: vec![element(30, "li", &[], vec![text(31, "old")])],
        });
        let allocated = mirror.document().node_count();

        mirror.apply(DomEvent::SetChildNodes {
            parent: 8,
            nodes: vec![element(32, "li", &[], vec![text(33, "new")])],
        });
        mirror.release_detached();

        assert!(mirror.node(30).is_none());
        assert!(mirror.node(31).is_none());
        assert_eq!(mirror.document().node_count(), allocated);
        assert_eq!(mirror.document().text_content(mirror.node(8).unwrap()), "new");
    }

    #[test]
    fn lazy_subtrees_are_requested_and_filled() {
        let mut mirror = loaded();
        mirror.apply(DomEvent::ChildInserted {
            parent: 8,
            previous: 0,
            node: MirrorNode {
                id: 20,
                node_type: ELEMENT_NODE,
                name: "li".into(),
                child_count: Some(1),
                children: None,
                ..Default::default()
            },
        });
        assert_eq!(mirror.take_incomplete(), vec![20]);
        assert!(mirror.take_incomplete().is_empty());

        mirror.apply(DomEvent::SetChildNodes {
            parent: 20,
            nodes: vec![text(21, "late")],
        });
        assert_eq!(mirror.document().text_content(mirror.node(20).unwrap()), "late");
    }
}
