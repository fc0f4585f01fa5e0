//! Arena-allocated markup tree.
//!
//! Nodes live in one vector and link to each other by index, which makes the
//! tree cheap to clone when a partition needs its own rewritten copy.

use html5ever::{LocalName, QualName};

/// Index of a node in a [`MarkupTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Sentinel value for no node.
    pub const NONE: NodeId = NodeId(u32::MAX);

    pub fn is_some(&self) -> bool {
        self.0 != u32::MAX
    }

    pub fn is_none(&self) -> bool {
        self.0 == u32::MAX
    }
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Element {
        name: QualName,
        attrs: Vec<Attribute>,
    },
    Text(String),
    Comment(String),
    Doctype {
        name: String,
        public_id: String,
        system_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: QualName,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub data: NodeData,
    pub parent: NodeId,
    pub first_child: NodeId,
    pub last_child: NodeId,
    pub prev_sibling: NodeId,
    pub next_sibling: NodeId,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            parent: NodeId::NONE,
            first_child: NodeId::NONE,
            last_child: NodeId::NONE,
            prev_sibling: NodeId::NONE,
            next_sibling: NodeId::NONE,
        }
    }
}

/// Parsed markup of one content document.
#[derive(Debug, Clone)]
pub struct MarkupTree {
    nodes: Vec<Node>,
    document: NodeId,
}

impl MarkupTree {
    /// Create an empty tree holding only the document root.
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            document: NodeId::NONE,
        };
        tree.document = tree.alloc(Node::new(NodeData::Document));
        tree
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn document(&self) -> NodeId {
        self.document
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        if id.is_none() {
            return None;
        }
        self.nodes.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if id.is_none() {
            return None;
        }
        self.nodes.get_mut(id.0 as usize)
    }

    pub fn create_element(&mut self, name: QualName, attrs: Vec<Attribute>) -> NodeId {
        self.alloc(Node::new(NodeData::Element { name, attrs }))
    }

    pub fn create_text(&mut self, text: String) -> NodeId {
        self.alloc(Node::new(NodeData::Text(text)))
    }

    pub fn create_comment(&mut self, text: String) -> NodeId {
        self.alloc(Node::new(NodeData::Comment(text)))
    }

    pub fn create_doctype(&mut self, name: String, public_id: String, system_id: String) -> NodeId {
        self.alloc(Node::new(NodeData::Doctype {
            name,
            public_id,
            system_id,
        }))
    }

    /// Append `child` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        let last_child = self.get(parent).map(|n| n.last_child).unwrap_or(NodeId::NONE);

        if let Some(child_node) = self.get_mut(child) {
            child_node.parent = parent;
            child_node.prev_sibling = last_child;
            child_node.next_sibling = NodeId::NONE;
        }

        if let Some(last_node) = self.get_mut(last_child) {
            last_node.next_sibling = child;
        }

        if let Some(parent_node) = self.get_mut(parent) {
            if parent_node.first_child.is_none() {
                parent_node.first_child = child;
            }
            parent_node.last_child = child;
        }
    }

    /// Insert `new_node` immediately before `sibling`.
    pub fn insert_before(&mut self, sibling: NodeId, new_node: NodeId) {
        let (parent, prev) = match self.get(sibling) {
            Some(n) => (n.parent, n.prev_sibling),
            None => return,
        };

        if let Some(new) = self.get_mut(new_node) {
            new.parent = parent;
            new.prev_sibling = prev;
            new.next_sibling = sibling;
        }

        if let Some(sib) = self.get_mut(sibling) {
            sib.prev_sibling = new_node;
        }

        if prev.is_some() {
            if let Some(p) = self.get_mut(prev) {
                p.next_sibling = new_node;
            }
        } else if let Some(par) = self.get_mut(parent) {
            par.first_child = new_node;
        }
    }

    /// Append text, merging with a trailing text node when there is one.
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        let last_child = self.get(parent).map(|n| n.last_child).unwrap_or(NodeId::NONE);

        if let Some(last) = self.get_mut(last_child)
            && let NodeData::Text(ref mut existing) = last.data
        {
            existing.push_str(text);
            return;
        }

        let text_node = self.create_text(text.to_string());
        self.append(parent, text_node);
    }

    /// Unlink a node from its parent and siblings. The node stays allocated.
    pub fn detach(&mut self, target: NodeId) {
        let (parent, prev, next) = match self.get(target) {
            Some(n) => (n.parent, n.prev_sibling, n.next_sibling),
            None => return,
        };

        if prev.is_some() {
            if let Some(p) = self.get_mut(prev) {
                p.next_sibling = next;
            }
        } else if let Some(p) = self.get_mut(parent) {
            p.first_child = next;
        }

        if next.is_some() {
            if let Some(n) = self.get_mut(next) {
                n.prev_sibling = prev;
            }
        } else if let Some(p) = self.get_mut(parent) {
            p.last_child = prev;
        }

        if let Some(node) = self.get_mut(target) {
            node.parent = NodeId::NONE;
            node.prev_sibling = NodeId::NONE;
            node.next_sibling = NodeId::NONE;
        }
    }

    /// Replace an element by its children, keeping their order.
    pub fn unwrap(&mut self, target: NodeId) {
        let children: Vec<NodeId> = self.children(target).collect();
        for child in children {
            self.detach(child);
            self.insert_before(target, child);
        }
        self.detach(target);
    }

    /// Number of allocated nodes, including detached ones.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn children(&self, parent: NodeId) -> Children<'_> {
        let first = self.get(parent).map(|n| n.first_child).unwrap_or(NodeId::NONE);
        Children {
            tree: self,
            current: first,
        }
    }

    /// Every node reachable from the document root, in document order.
    pub fn descendants(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.document];
        while let Some(id) = stack.pop() {
            out.push(id);
            let mut children: Vec<_> = self.children(id).collect();
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// First element with the given local name (document order).
    pub fn find_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.descendants()
            .into_iter()
            .find(|&id| self.element_name(id).is_some_and(|n| n.as_ref() == tag))
    }

    /// All elements with the given local name (document order).
    pub fn find_all_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.descendants()
            .into_iter()
            .filter(|&id| self.element_name(id).is_some_and(|n| n.as_ref() == tag))
            .collect()
    }
}

impl Default for MarkupTree {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Children<'a> {
    tree: &'a MarkupTree,
    current: NodeId,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_none() {
            return None;
        }
        let id = self.current;
        self.current = self
            .tree
            .get(id)
            .map(|n| n.next_sibling)
            .unwrap_or(NodeId::NONE);
        Some(id)
    }
}

/// Element and attribute accessors.
impl MarkupTree {
    pub fn element_name(&self, id: NodeId) -> Option<&LocalName> {
        self.get(id).and_then(|n| match &n.data {
            NodeData::Element { name, .. } => Some(&name.local),
            _ => None,
        })
    }

    /// Attribute value by local name, ignoring any prefix (`xlink:href` matches `href`).
    pub fn attr(&self, id: NodeId, local: &str) -> Option<&str> {
        self.get(id).and_then(|n| match &n.data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|a| a.name.local.as_ref() == local)
                .map(|a| a.value.as_str()),
            _ => None,
        })
    }

    /// Overwrite an existing attribute or add a new one without namespace.
    pub fn set_attr(&mut self, id: NodeId, local: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(node) = self.get_mut(id)
            && let NodeData::Element { attrs, .. } = &mut node.data
        {
            if let Some(existing) = attrs.iter_mut().find(|a| a.name.local.as_ref() == local) {
                existing.value = value;
            } else {
                attrs.push(Attribute {
                    name: QualName::new(None, html5ever::ns!(), LocalName::from(local)),
                    value,
                });
            }
        }
    }

    /// Remove an attribute; returns its value if it was present.
    pub fn remove_attr(&mut self, id: NodeId, local: &str) -> Option<String> {
        let node = self.get_mut(id)?;
        match &mut node.data {
            NodeData::Element { attrs, .. } => {
                let pos = attrs.iter().position(|a| a.name.local.as_ref() == local)?;
                Some(attrs.remove(pos).value)
            }
            _ => None,
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut text = String::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.get(current)
                && let NodeData::Text(t) = &node.data
            {
                text.push_str(t);
            }
            let mut children: Vec<_> = self.children(current).collect();
            children.reverse();
            stack.extend(children);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use html5ever::ns;

    use super::*;

    fn qname(local: &str) -> QualName {
        QualName::new(None, ns!(html), LocalName::from(local))
    }

    #[test]
    fn test_append_children() {
        let mut tree = MarkupTree::new();
        let parent = tree.create_element(qname("div"), vec![]);
        let child1 = tree.create_element(qname("p"), vec![]);
        let child2 = tree.create_element(qname("p"), vec![]);

        tree.append(tree.document(), parent);
        tree.append(parent, child1);
        tree.append(parent, child2);

        let children: Vec<_> = tree.children(parent).collect();
        assert_eq!(children, vec![child1, child2]);
    }

    #[test]
    fn test_text_merging() {
        let mut tree = MarkupTree::new();
        let p = tree.create_element(qname("p"), vec![]);
        tree.append(tree.document(), p);

        tree.append_text(p, "Hello, ");
        tree.append_text(p, "World!");

        assert_eq!(tree.children(p).count(), 1);
        assert_eq!(tree.text_content(p), "Hello, World!");
    }

    #[test]
    fn test_unwrap_keeps_children_in_place() {
        let mut tree = MarkupTree::new();
        let p = tree.create_element(qname("p"), vec![]);
        tree.append(tree.document(), p);
        tree.append_text(p, "see ");
        let a = tree.create_element(qname("a"), vec![]);
        tree.append(p, a);
        tree.append_text(a, "chapter ");
        let em = tree.create_element(qname("em"), vec![]);
        tree.append(a, em);
        tree.append_text(em, "five");
        let tail = tree.create_text(" now".into());
        tree.append(p, tail);

        tree.unwrap(a);

        assert_eq!(tree.find_by_tag("a"), None);
        assert_eq!(tree.text_content(p), "see chapter five now");
        let kinds: Vec<_> = tree
            .children(p)
            .map(|c| tree.element_name(c).map(|n| n.to_string()))
            .collect();
        assert_eq!(kinds, vec![None, None, Some("em".to_string()), None]);
    }

    #[test]
    fn test_attribute_editing() {
        let mut tree = MarkupTree::new();
        let a = tree.create_element(
            qname("a"),
            vec![Attribute {
                name: qname("href"),
                value: "ch2.xhtml#x".into(),
            }],
        );
        tree.append(tree.document(), a);

        tree.set_attr(a, "href", "#");
        assert_eq!(tree.attr(a, "href"), Some("#"));

        tree.set_attr(a, "title", "t");
        assert_eq!(tree.attr(a, "title"), Some("t"));

        assert_eq!(tree.remove_attr(a, "href").as_deref(), Some("#"));
        assert_eq!(tree.attr(a, "href"), None);
    }
}
