use super::css_path::css_path;
use super::dom::{Document, NodeData, NodeId};
use wfrec_common::protocol::{MutationKind, MutationRecord};

/// A raw DOM change as reported by the host, before serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum DomChange {
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attributes {
        target: NodeId,
        name: String,
        old_value: Option<String>,
    },
}

impl DomChange {
    pub fn target(&self) -> NodeId {
        match self {
            DomChange::ChildList { target, .. } | DomChange::Attributes { target, .. } => *target,
        }
    }
}

/// Serializes a change against the document as it is now. Attribute changes
/// read their new value from the live node.
pub fn serialize_mutation(doc: &Document, change: &DomChange) -> MutationRecord {
    match change {
        DomChange::ChildList {
            target,
            added,
            removed,
        } => MutationRecord {
            kind: MutationKind::ChildList,
            added_nodes: Some(added.iter().map(|n| render_node(doc, *n)).collect()),
            removed_nodes: Some(removed.iter().map(|n| render_node(doc, *n)).collect()),
            attribute_name: None,
            old_value: None,
            new_value: None,
            target: css_path(doc, *target),
        },
        DomChange::Attributes {
            target,
            name,
            old_value,
        } => MutationRecord {
            kind: MutationKind::Attributes,
            added_nodes: None,
            removed_nodes: None,
            attribute_name: Some(name.clone()),
            old_value: old_value.clone(),
            new_value: doc.attribute(*target, name).map(str::to_string),
            target: css_path(doc, *target),
        },
    }
}

/// Outer markup for elements, text content for everything else.
fn render_node(doc: &Document, node: NodeId) -> String {
    match doc.data(node) {
        NodeData::Element(_) => doc.outer_html(node),
        _ => doc.text_content(node),
    }
}
