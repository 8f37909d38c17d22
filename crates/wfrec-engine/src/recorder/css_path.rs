use super::dom::{Document, NodeId};

/// Computes a `>`-joined selector path from the document root to `node`.
///
/// An element with an `id` ends the walk as `#id`. Other elements contribute
/// `tag.class1.class2`, with `:nth-of-type(n)` appended only when the parent
/// holds more than one descendant matching that selector. Non-element nodes
/// have no path.
pub fn css_path(doc: &Document, node: NodeId) -> Option<String> {
    if !doc.is_element(node) {
        return None;
    }

    let mut segments = Vec::new();
    let mut current = Some(node);

    while let Some(element) = current.filter(|n| doc.is_element(*n)) {
        if let Some(id) = doc.id(element) {
            segments.push(format!("#{}", id));
            break;
        }

        let selector = Compound::of(doc, element);
        let mut segment = selector.to_string();
        if let Some(parent) = doc.parent_element(element) {
            let matches = doc
                .descendants(parent)
                .filter(|n| selector.matches(doc, *n))
                .take(2)
                .count();
            if matches > 1 {
                segment.push_str(&format!(":nth-of-type({})", nth_of_type(doc, element)));
            }
        }
        segments.push(segment);
        current = doc.parent(element);
    }

    segments.reverse();
    Some(segments.join(" > "))
}

/// 1-based position of `element` among its siblings sharing its tag name.
fn nth_of_type(doc: &Document, element: NodeId) -> usize {
    let tag = doc.tag_name(element);
    let Some(parent) = doc.parent(element) else {
        return 1;
    };
    doc.element_children(parent)
        .take_while(|sibling| *sibling != element)
        .filter(|sibling| doc.tag_name(*sibling) == tag)
        .count()
        + 1
}

/// A `tag.class...` compound selector.
struct Compound<'a> {
    tag: &'a str,
    classes: Vec<&'a str>,
}

impl<'a> Compound<'a> {
    fn of(doc: &'a Document, element: NodeId) -> Self {
        Self {
            tag: doc.tag_name(element).unwrap_or_default(),
            classes: doc.class_list(element),
        }
    }

    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        if doc.tag_name(node) != Some(self.tag) {
            return false;
        }
        let classes = doc.class_list(node);
        self.classes.iter().all(|c| classes.contains(c))
    }
}

impl std::fmt::Display for Compound<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag)?;
        for class in &self.classes {
            write!(f, ".{}", class)?;
        }
        Ok(())
    }
}
