//! Rewriting references that would dangle once a document leaves its book.

use crate::dom::{Document, NodeId};

/// What to do with a hyperlink whose target is not in the partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkPolicy {
    /// Keep the element, point it at `#`.
    #[default]
    Placeholder,
    /// Replace the element by its content.
    Strip,
}

/// A pending change to one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Edit {
    /// Hyperlink to a document outside the partition.
    Unlink(NodeId),
    /// Embedded reference to a spine document outside the partition.
    DropAttr(NodeId, &'static str),
}

/// Apply edits in order. Node ids stay valid across edits, so unwrapping one
/// element never invalidates another edit.
pub(crate) fn apply(doc: &mut Document, edits: &[Edit], policy: LinkPolicy) {
    let tree = doc.tree_mut();
    for edit in edits {
        match *edit {
            Edit::Unlink(node) => match policy {
                LinkPolicy::Placeholder => tree.set_attr(node, "href", "#"),
                LinkPolicy::Strip => tree.unwrap(node),
            },
            Edit::DropAttr(node, attr) => {
                tree.remove_attr(node, attr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_link(doc: &Document) -> NodeId {
        doc.tree().find_by_tag("a").unwrap()
    }

    #[test]
    fn test_placeholder_keeps_text_and_attributes() {
        let mut doc = Document::parse(
            br#"<html><body><p>See <a class="x" href="ch9.xhtml#n">note 9</a>.</p></body></html>"#,
        );
        let link = first_link(&doc);
        apply(&mut doc, &[Edit::Unlink(link)], LinkPolicy::Placeholder);

        let out = doc.to_xhtml();
        assert!(out.contains(r##"<a class="x" href="#">note 9</a>"##), "{out}");
    }

    #[test]
    fn test_strip_unwraps_element() {
        let mut doc = Document::parse(
            br#"<html><body><p>See <a href="ch9.xhtml"><em>note</em> 9</a>.</p></body></html>"#,
        );
        let link = first_link(&doc);
        apply(&mut doc, &[Edit::Unlink(link)], LinkPolicy::Strip);

        let out = doc.to_xhtml();
        assert!(out.contains("<p>See <em>note</em> 9.</p>"), "{out}");
        assert!(doc.tree().find_by_tag("a").is_none());
    }

    #[test]
    fn test_drop_attr() {
        let mut doc =
            Document::parse(br#"<html><body><iframe src="ch9.xhtml"></iframe></body></html>"#);
        let frame = doc.tree().find_by_tag("iframe").unwrap();
        apply(&mut doc, &[Edit::DropAttr(frame, "src")], LinkPolicy::Placeholder);
        assert_eq!(doc.tree().attr(frame, "src"), None);
    }
}
