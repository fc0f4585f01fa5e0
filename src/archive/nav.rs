//! Navigation parsing: EPUB 2 NCX and EPUB 3 navigation documents.
//!
//! Both parsers produce [`RawNavPoint`] trees with unresolved `src`
//! references; the loader resolves them against the manifest.

use quick_xml::Reader;
use quick_xml::events::Event;

use super::opf::{attr_value, local_name, resolve_entity};
use crate::dom::{Document, MarkupTree, NodeId};
use crate::error::{Error, Result};

/// A navigation entry before its target is resolved.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawNavPoint {
    pub label: String,
    /// Reference relative to the navigation file, if any.
    pub src: Option<String>,
    pub children: Vec<RawNavPoint>,
}

/// Parse an NCX file into its navMap tree.
pub(crate) fn parse_ncx(content: &str) -> Result<Vec<RawNavPoint>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    struct NavPointState {
        children: Vec<RawNavPoint>,
        text: Option<String>,
        src: Option<String>,
    }

    let mut stack: Vec<NavPointState> = vec![NavPointState {
        children: Vec::new(),
        text: None,
        src: None,
    }];
    let mut in_text = false;
    // Only the navMap is navigation; pageList and navList carry their own navLabels.
    let mut in_nav_map = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                b"navMap" => in_nav_map = true,
                b"navPoint" if in_nav_map => stack.push(NavPointState {
                    children: Vec::new(),
                    text: None,
                    src: None,
                }),
                b"text" => in_text = in_nav_map,
                b"content" if in_nav_map => {
                    if let Some(state) = stack.last_mut() {
                        state.src = attr_value(&e, b"src");
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_nav_map
                    && local_name(e.name().as_ref()) == b"content"
                    && let Some(state) = stack.last_mut()
                {
                    state.src = attr_value(&e, b"src");
                }
            }
            Ok(Event::Text(e)) => {
                if in_text && let Some(state) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(e.as_ref());
                    match &mut state.text {
                        Some(existing) => existing.push_str(&raw),
                        None => state.text = Some(raw.into_owned()),
                    }
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text && let Some(state) = stack.last_mut() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        match &mut state.text {
                            Some(existing) => existing.push_str(&resolved),
                            None => state.text = Some(resolved),
                        }
                    }
                }
            }
            Ok(Event::End(e)) => match local_name(e.name().as_ref()) {
                b"text" => in_text = false,
                b"navMap" => in_nav_map = false,
                b"navPoint" if in_nav_map && stack.len() > 1 => {
                    if let Some(state) = stack.pop() {
                        let point = RawNavPoint {
                            label: normalize_label(state.text.as_deref().unwrap_or_default()),
                            src: state.src.filter(|s| !s.trim().is_empty()),
                            children: state.children,
                        };
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(point);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::malformed(format!("NCX: {e}"))),
            _ => {}
        }
    }

    Ok(stack
        .into_iter()
        .next()
        .map(|root| root.children)
        .unwrap_or_default())
}

/// Parse the table of contents out of an EPUB 3 navigation document.
///
/// Looks for `<nav epub:type="toc">`, then `role="doc-toc"`, then the first
/// `<nav>` in the document.
pub(crate) fn parse_nav_document(bytes: &[u8]) -> Vec<RawNavPoint> {
    let doc = Document::parse(bytes);
    let tree = doc.tree();
    let navs = tree.find_all_by_tag("nav");

    let has_token = |id: NodeId, attr: &str, token: &str| {
        tree.attr(id, attr)
            .is_some_and(|v| v.split_whitespace().any(|t| t == token))
    };

    let toc = navs
        .iter()
        .copied()
        .find(|&id| has_token(id, "epub:type", "toc") || has_token(id, "type", "toc"))
        .or_else(|| navs.iter().copied().find(|&id| has_token(id, "role", "doc-toc")))
        .or_else(|| navs.first().copied());

    let Some(toc) = toc else {
        return Vec::new();
    };

    match first_child_named(tree, toc, "ol") {
        Some(list) => parse_list(tree, list),
        None => Vec::new(),
    }
}

fn parse_list(tree: &MarkupTree, list: NodeId) -> Vec<RawNavPoint> {
    let mut points = Vec::new();
    for item in tree.children(list) {
        if tree.element_name(item).map(|n| n.as_ref()) != Some("li") {
            continue;
        }

        let mut label = String::new();
        let mut src = None;
        let mut children = Vec::new();
        for child in tree.children(item) {
            match tree.element_name(child).map(|n| n.as_ref()) {
                Some("a") if src.is_none() && label.is_empty() => {
                    label = normalize_label(&tree.text_content(child));
                    src = tree
                        .attr(child, "href")
                        .filter(|h| !h.trim().is_empty())
                        .map(str::to_string);
                }
                Some("span") if label.is_empty() => {
                    label = normalize_label(&tree.text_content(child));
                }
                Some("ol") => children = parse_list(tree, child),
                _ => {}
            }
        }

        points.push(RawNavPoint {
            label,
            src,
            children,
        });
    }
    points
}

fn first_child_named(tree: &MarkupTree, parent: NodeId, tag: &str) -> Option<NodeId> {
    let mut stack = vec![parent];
    while let Some(id) = stack.pop() {
        for child in tree.children(id) {
            if tree.element_name(child).map(|n| n.as_ref()) == Some(tag) {
                return Some(child);
            }
        }
        let mut children: Vec<_> = tree.children(id).collect();
        children.reverse();
        stack.extend(children);
    }
    None
}

fn normalize_label(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
