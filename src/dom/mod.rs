//! Markup trees for content documents.
//!
//! Content documents are parsed with html5ever into an arena tree, edited in
//! place by the partition materializer, and written back as XHTML.

mod arena;
mod serialize;
mod tree_sink;

pub use arena::{Attribute, Children, MarkupTree, Node, NodeData, NodeId};
pub use tree_sink::TreeBuilderSink;

use html5ever::driver::ParseOpts;
use html5ever::tendril::TendrilSink;
use html5ever::tree_builder::TreeBuilderOpts;
use html5ever::{LocalName, QualName, local_name, ns, parse_document};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, Event};

use crate::util::{decode_text, encoding_hint};

/// HTML elements that never have content; everything else written as
/// `<tag/>` in XHTML must be expanded before the HTML parser sees it.
const VOID_ELEMENTS: &[&[u8]] = &[
    b"area", b"base", b"br", b"col", b"embed", b"hr", b"img", b"input", b"link", b"meta",
    b"param", b"source", b"track", b"wbr",
];

/// A parsed content document.
#[derive(Debug, Clone)]
pub struct Document {
    tree: MarkupTree,
}

impl Document {
    /// Parse raw document bytes. Never fails: malformed markup is repaired the
    /// way a browser would.
    pub fn parse(bytes: &[u8]) -> Self {
        let hint = encoding_hint(bytes);
        let text = decode_text(bytes, hint.as_deref());
        let expanded = expand_self_closing(&text);
        let source = expanded.as_deref().unwrap_or(&text);

        let opts = ParseOpts {
            tree_builder: TreeBuilderOpts {
                drop_doctype: false,
                ..Default::default()
            },
            ..Default::default()
        };

        let tree = parse_document(TreeBuilderSink::new(), opts)
            .from_utf8()
            .one(source.as_bytes())
            .into_tree();
        Self { tree }
    }

    pub fn tree(&self) -> &MarkupTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut MarkupTree {
        &mut self.tree
    }

    /// Trimmed text of the `<title>` element, if non-empty.
    pub fn title(&self) -> Option<String> {
        let title = self.tree.find_by_tag("title")?;
        let text = self.tree.text_content(title);
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    }

    /// Add `<link rel="stylesheet">` as the last child of `<head>`.
    pub fn append_stylesheet(&mut self, href: &str) {
        let Some(head) = self.tree.find_by_tag("head") else {
            return;
        };
        let attr = |name: &str, value: &str| Attribute {
            name: QualName::new(None, ns!(), LocalName::from(name)),
            value: value.to_string(),
        };
        let link = self.tree.create_element(
            QualName::new(None, ns!(html), local_name!("link")),
            vec![
                attr("rel", "stylesheet"),
                attr("type", "text/css"),
                attr("href", href),
            ],
        );
        self.tree.append(head, link);
    }

    pub fn to_xhtml(&self) -> String {
        serialize::to_xhtml(&self.tree)
    }
}

/// Rewrite `<div/>`-style empty tags of non-void HTML elements as start/end
/// pairs. Returns `None` when the input is not well-formed XML, in which case
/// the HTML parser gets the text unchanged.
fn expand_self_closing(text: &str) -> Option<String> {
    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new(Vec::with_capacity(text.len() + 64));
    // Depth inside <svg>/<math>, where empty tags are legitimate.
    let mut foreign_depth = 0usize;
    let mut changed = false;

    loop {
        let event = reader.read_event().ok()?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) => {
                let qname = e.name();
                let local = unprefixed(qname.as_ref());
                if foreign_depth > 0 || local == b"svg" || local == b"math" {
                    foreign_depth += 1;
                }
                writer.write_event(event.borrow()).ok()?;
            }
            Event::End(_) => {
                foreign_depth = foreign_depth.saturating_sub(1);
                writer.write_event(event.borrow()).ok()?;
            }
            Event::Empty(ref e)
                if foreign_depth == 0 && !VOID_ELEMENTS.contains(&unprefixed(e.name().as_ref())) =>
            {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                writer.write_event(Event::Start(e.borrow())).ok()?;
                writer.write_event(Event::End(BytesEnd::new(name))).ok()?;
                changed = true;
            }
            other => writer.write_event(other).ok()?,
        }
    }

    if !changed {
        return None;
    }
    String::from_utf8(writer.into_inner()).ok()
}

fn unprefixed(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_closing_script_does_not_swallow_body() {
        let doc = Document::parse(
            br#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>T</title><script src="a.js"/></head>
<body><p>text</p><a id="x"/><p>more</p></body></html>"#,
        );
        let tree = doc.tree();
        assert_eq!(tree.find_all_by_tag("p").len(), 2);
        let a = tree.find_by_tag("a").unwrap();
        assert_eq!(tree.text_content(a), "");
    }

    #[test]
    fn test_svg_empty_elements_untouched() {
        let expanded = expand_self_closing(
            r#"<html><body><div/><svg><rect width="1"/></svg></body></html>"#,
        )
        .unwrap();
        assert!(expanded.contains("<div></div>"), "{expanded}");
        assert!(expanded.contains(r#"<rect width="1"/>"#), "{expanded}");
    }

    #[test]
    fn test_prefixed_svg_counts_as_foreign() {
        let expanded = expand_self_closing(
            r#"<html><body><svg:svg xmlns:svg="http://www.w3.org/2000/svg"><svg:rect/></svg:svg><span/></body></html>"#,
        )
        .unwrap();
        assert!(expanded.contains("<svg:rect/>"), "{expanded}");
        assert!(expanded.contains("<span></span>"), "{expanded}");
    }

    #[test]
    fn test_malformed_xml_left_alone() {
        assert_eq!(expand_self_closing("<p>unclosed<br></p>"), None);
    }

    #[test]
    fn test_title() {
        let doc = Document::parse(b"<html><head><title>\n  Chapter   One \n</title></head></html>");
        assert_eq!(doc.title().as_deref(), Some("Chapter One"));

        let doc = Document::parse(b"<html><head><title>  </title></head></html>");
        assert_eq!(doc.title(), None);
    }

    #[test]
    fn test_append_stylesheet() {
        let mut doc = Document::parse(b"<html><head><title>x</title></head><body/></html>");
        doc.append_stylesheet("../split-styles.css");
        let out = doc.to_xhtml();
        assert!(
            out.contains(r#"<link rel="stylesheet" type="text/css" href="../split-styles.css"/></head>"#),
            "{out}"
        );
    }

    #[test]
    fn test_latin1_document_decoded() {
        let doc = Document::parse(
            b"<?xml version=\"1.0\" encoding=\"iso-8859-1\"?><html><body><p>caf\xe9</p></body></html>",
        );
        let p = doc.tree().find_by_tag("p").unwrap();
        assert_eq!(doc.tree().text_content(p), "café");
    }
}
