//! html5ever TreeSink implementation for MarkupTree.

use std::borrow::Cow;
use std::cell::{Ref, RefCell};

use html5ever::tendril::StrTendril;
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{Attribute as Html5Attribute, QualName};

use super::arena::{Attribute, MarkupTree, NodeData, NodeId};

/// Handle used by TreeSink to reference nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(pub NodeId);

impl Default for NodeHandle {
    fn default() -> Self {
        NodeHandle(NodeId::NONE)
    }
}

/// TreeSink that builds a [`MarkupTree`].
///
/// html5ever's TreeSink takes `&self` everywhere, so the tree sits in a RefCell.
pub struct TreeBuilderSink {
    tree: RefCell<MarkupTree>,
    quirks_mode: RefCell<QuirksMode>,
}

impl Default for TreeBuilderSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilderSink {
    pub fn new() -> Self {
        Self {
            tree: RefCell::new(MarkupTree::new()),
            quirks_mode: RefCell::new(QuirksMode::NoQuirks),
        }
    }

    pub fn into_tree(self) -> MarkupTree {
        self.tree.into_inner()
    }
}

impl TreeSink for TreeBuilderSink {
    type Handle = NodeHandle;
    type Output = Self;
    type ElemName<'a>
        = Ref<'a, QualName>
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        self
    }

    fn parse_error(&self, _msg: Cow<'static, str>) {
        // Content documents in the wild are rarely clean; parse like a browser.
    }

    fn get_document(&self) -> Self::Handle {
        NodeHandle(self.tree.borrow().document())
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> Self::ElemName<'a> {
        static EMPTY: QualName = QualName {
            prefix: None,
            ns: html5ever::ns!(),
            local: html5ever::local_name!(""),
        };

        Ref::map(self.tree.borrow(), |tree| match tree.get(target.0).map(|n| &n.data) {
            Some(NodeData::Element { name, .. }) => name,
            _ => &EMPTY,
        })
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<Html5Attribute>,
        _flags: ElementFlags,
    ) -> Self::Handle {
        let attrs = attrs
            .into_iter()
            .map(|a| Attribute {
                name: a.name,
                value: a.value.to_string(),
            })
            .collect();
        NodeHandle(self.tree.borrow_mut().create_element(name, attrs))
    }

    fn create_comment(&self, text: StrTendril) -> Self::Handle {
        NodeHandle(self.tree.borrow_mut().create_comment(text.to_string()))
    }

    fn create_pi(&self, _target: StrTendril, _data: StrTendril) -> Self::Handle {
        NodeHandle(self.tree.borrow_mut().create_comment(String::new()))
    }

    fn append(&self, parent: &Self::Handle, child: NodeOrText<Self::Handle>) {
        let mut tree = self.tree.borrow_mut();
        match child {
            NodeOrText::AppendNode(node) => tree.append(parent.0, node.0),
            NodeOrText::AppendText(text) => tree.append_text(parent.0, &text),
        }
    }

    fn append_based_on_parent_node(
        &self,
        element: &Self::Handle,
        prev_element: &Self::Handle,
        child: NodeOrText<Self::Handle>,
    ) {
        let parent = self.tree.borrow().get(element.0).map(|n| n.parent);
        if let Some(parent) = parent
            && parent.is_some()
        {
            self.append(&NodeHandle(parent), child);
            return;
        }
        self.append(prev_element, child);
    }

    fn append_doctype_to_document(
        &self,
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    ) {
        let mut tree = self.tree.borrow_mut();
        let doc = tree.document();
        let doctype =
            tree.create_doctype(name.to_string(), public_id.to_string(), system_id.to_string());
        tree.append(doc, doctype);
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        *target
    }

    fn same_node(&self, x: &Self::Handle, y: &Self::Handle) -> bool {
        x.0 == y.0
    }

    fn set_quirks_mode(&self, mode: QuirksMode) {
        *self.quirks_mode.borrow_mut() = mode;
    }

    fn append_before_sibling(&self, sibling: &Self::Handle, new_node: NodeOrText<Self::Handle>) {
        let mut tree = self.tree.borrow_mut();
        match new_node {
            NodeOrText::AppendNode(node) => tree.insert_before(sibling.0, node.0),
            NodeOrText::AppendText(text) => {
                let text_node = tree.create_text(text.to_string());
                tree.insert_before(sibling.0, text_node);
            }
        }
    }

    fn add_attrs_if_missing(&self, target: &Self::Handle, attrs: Vec<Html5Attribute>) {
        let mut tree = self.tree.borrow_mut();
        if let Some(node) = tree.get_mut(target.0)
            && let NodeData::Element {
                attrs: existing, ..
            } = &mut node.data
        {
            for attr in attrs {
                if !existing.iter().any(|a| a.name == attr.name) {
                    existing.push(Attribute {
                        name: attr.name,
                        value: attr.value.to_string(),
                    });
                }
            }
        }
    }

    fn remove_from_parent(&self, target: &Self::Handle) {
        self.tree.borrow_mut().detach(target.0);
    }

    fn reparent_children(&self, node: &Self::Handle, new_parent: &Self::Handle) {
        let mut tree = self.tree.borrow_mut();
        let children: Vec<_> = tree.children(node.0).collect();
        for child in children {
            tree.detach(child);
            tree.append(new_parent.0, child);
        }
    }
}
