//! XHTML serialization of a [`MarkupTree`].
//!
//! EPUB content documents must be well-formed XML, so the tree is written back
//! as XHTML rather than through html5ever's HTML serializer.

use html5ever::{Namespace, QualName, ns};

use super::arena::{MarkupTree, NodeData, NodeId};

const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";
const SVG_NS: &str = "http://www.w3.org/2000/svg";
const MATHML_NS: &str = "http://www.w3.org/1998/Math/MathML";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const OPS_NS: &str = "http://www.idpf.org/2007/ops";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Serialize the whole tree as an XHTML document with an XML declaration.
pub fn to_xhtml(tree: &MarkupTree) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    let uses_epub_prefix = tree.descendants().into_iter().any(|id| has_epub_attr(tree, id));

    for child in tree.children(tree.document()) {
        match tree.get(child).map(|n| &n.data) {
            Some(NodeData::Doctype {
                name,
                public_id,
                system_id,
            }) => {
                write_doctype(&mut out, name, public_id, system_id);
                out.push('\n');
            }
            // `<?xml ...?>` declarations come back from the HTML parser as bogus comments.
            Some(NodeData::Comment(text)) if text.starts_with('?') || text.is_empty() => {}
            _ => {
                let mut writer = XhtmlWriter {
                    tree,
                    out: &mut out,
                    uses_epub_prefix,
                };
                writer.write_node(child, None);
            }
        }
    }

    out.push('\n');
    out
}

struct XhtmlWriter<'a> {
    tree: &'a MarkupTree,
    out: &'a mut String,
    uses_epub_prefix: bool,
}

impl XhtmlWriter<'_> {
    fn write_node(&mut self, id: NodeId, parent_ns: Option<&Namespace>) {
        let tree = self.tree;
        let Some(node) = tree.get(id) else {
            return;
        };

        match &node.data {
            NodeData::Element { name, attrs } => {
                let tag = qualified(name);
                self.out.push('<');
                self.out.push_str(&tag);

                let has_attr = |q: &str| attrs.iter().any(|a| qualified(&a.name) == q);

                // Namespace declarations the HTML parser does not require but XML does.
                if name.ns == ns!(html) && parent_ns != Some(&ns!(html)) && !has_attr("xmlns") {
                    push_attr(self.out, "xmlns", XHTML_NS);
                }
                if name.local.as_ref() == "html" && self.uses_epub_prefix && !has_attr("xmlns:epub")
                {
                    push_attr(self.out, "xmlns:epub", OPS_NS);
                }
                if name.ns == ns!(svg) && parent_ns != Some(&ns!(svg)) {
                    if !has_attr("xmlns") {
                        push_attr(self.out, "xmlns", SVG_NS);
                    }
                    if !has_attr("xmlns:xlink") {
                        push_attr(self.out, "xmlns:xlink", XLINK_NS);
                    }
                }
                if name.ns == ns!(mathml) && parent_ns != Some(&ns!(mathml)) && !has_attr("xmlns")
                {
                    push_attr(self.out, "xmlns", MATHML_NS);
                }

                for attr in attrs {
                    push_attr(self.out, &qualified(&attr.name), &attr.value);
                }

                let is_html = name.ns == ns!(html);
                let local = name.local.as_ref();
                let empty = node.first_child.is_none();

                if (is_html && VOID_ELEMENTS.contains(&local)) || (!is_html && empty) {
                    self.out.push_str("/>");
                    return;
                }

                self.out.push('>');
                let raw = is_html && RAW_TEXT_ELEMENTS.contains(&local);
                for child in tree.children(id) {
                    if raw && let Some(NodeData::Text(text)) = tree.get(child).map(|n| &n.data)
                    {
                        self.out.push_str(text);
                    } else {
                        self.write_node(child, Some(&name.ns));
                    }
                }
                self.out.push_str("</");
                self.out.push_str(&tag);
                self.out.push('>');
            }
            NodeData::Text(text) => escape_text(self.out, text),
            NodeData::Comment(text) => {
                // "--" is not allowed inside XML comments.
                self.out.push_str("<!--");
                self.out.push_str(&text.replace("--", "- -"));
                self.out.push_str("-->");
            }
            NodeData::Doctype { .. } | NodeData::Document => {}
        }
    }
}

fn has_epub_attr(tree: &MarkupTree, id: NodeId) -> bool {
    match tree.get(id).map(|n| &n.data) {
        Some(NodeData::Element { attrs, .. }) => attrs
            .iter()
            .any(|a| {
                a.name.local.starts_with("epub:")
                    || a.name.prefix.as_ref().is_some_and(|p| p.as_ref() == "epub")
            }),
        _ => false,
    }
}

fn qualified(name: &QualName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local),
        None => name.local.to_string(),
    }
}

fn write_doctype(out: &mut String, name: &str, public_id: &str, system_id: &str) {
    let name = if name.is_empty() { "html" } else { name };
    out.push_str("<!DOCTYPE ");
    out.push_str(name);
    if !public_id.is_empty() {
        out.push_str(&format!(" PUBLIC \"{}\" \"{}\"", public_id, system_id));
    } else if !system_id.is_empty() {
        out.push_str(&format!(" SYSTEM \"{}\"", system_id));
    }
    out.push('>');
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    escape_attr(out, value);
    out.push('"');
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&#160;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&#160;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::dom::Document;

    fn roundtrip(html: &str) -> String {
        Document::parse(html.as_bytes()).to_xhtml()
    }

    #[test]
    fn test_void_elements_self_close() {
        let out = roundtrip("<html><body><p>a<br>b</p><img src=\"x.png\"></body></html>");
        assert!(out.contains("a<br/>b"), "{out}");
        assert!(out.contains("<img src=\"x.png\"/>"), "{out}");
    }

    #[test]
    fn test_xhtml_namespace_added() {
        let out = roundtrip("<html><body></body></html>");
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(out.contains("<html xmlns=\"http://www.w3.org/1999/xhtml\">"), "{out}");
    }

    #[test]
    fn test_existing_namespace_not_duplicated() {
        let out = roundtrip(
            r#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops"><body><section epub:type="chapter"></section></body></html>"#,
        );
        assert_eq!(out.matches("xmlns=").count(), 1, "{out}");
        assert_eq!(out.matches("xmlns:epub=").count(), 1, "{out}");
        assert!(out.contains("epub:type=\"chapter\""));
    }

    #[test]
    fn test_text_and_attributes_escaped() {
        let out = roundtrip(r#"<html><body><p title="a &quot;b&quot;">1 &lt; 2 &amp; 3</p></body></html>"#);
        assert!(out.contains(r#"title="a &quot;b&quot;""#), "{out}");
        assert!(out.contains("1 &lt; 2 &amp; 3"), "{out}");
    }

    #[test]
    fn test_svg_keeps_xlink_prefix() {
        let out = roundtrip(
            r#"<html><body><svg><image xlink:href="../images/cover.jpg" width="10"/></svg></body></html>"#,
        );
        assert!(out.contains(r#"xlink:href="../images/cover.jpg""#), "{out}");
        assert!(out.contains(r#"xmlns="http://www.w3.org/2000/svg""#), "{out}");
    }

    #[test]
    fn test_doctype_preserved() {
        let out = roundtrip(
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd"><html><body></body></html>"#,
        );
        assert!(
            out.contains(r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#),
            "{out}"
        );
    }
}
