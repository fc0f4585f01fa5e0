//! Discovery of the resources a content document or stylesheet depends on.

use cssparser::{ParseError, Parser, ParserInput, Token};

use crate::archive::href::{self, Resolved};
use crate::dom::{MarkupTree, NodeData, NodeId};

/// How a document uses a referenced file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefKind {
    /// Rendered as part of the document (images, stylesheets, media, scripts).
    Embed,
    /// Navigated to by the reader (`<a href>`, `<area href>`).
    Hyperlink,
}

/// A reference held in an element attribute.
#[derive(Debug, Clone)]
pub(crate) struct Reference {
    pub node: NodeId,
    /// Local attribute name holding the reference.
    pub attr: &'static str,
    pub kind: RefKind,
    pub target: Resolved,
}

/// Everything a content document points at.
#[derive(Debug, Default)]
pub(crate) struct DocumentRefs {
    pub attrs: Vec<Reference>,
    /// Targets of `srcset`, `style=""` and `<style>` URLs; only ever embeds.
    pub embedded: Vec<Resolved>,
}

/// Element/attribute pairs that pull a resource into the rendering.
const EMBED_ATTRS: &[(&str, &str)] = &[
    ("img", "src"),
    ("image", "href"),
    ("use", "href"),
    ("link", "href"),
    ("script", "src"),
    ("audio", "src"),
    ("video", "src"),
    ("video", "poster"),
    ("source", "src"),
    ("track", "src"),
    ("embed", "src"),
    ("object", "data"),
    ("iframe", "src"),
    ("input", "src"),
];

const HYPERLINK_ATTRS: &[(&str, &str)] = &[("a", "href"), ("area", "href")];

/// Scan a parsed document stored at `doc_path`.
pub(crate) fn scan_document(tree: &MarkupTree, doc_path: &str) -> DocumentRefs {
    let mut refs = DocumentRefs::default();

    for id in tree.descendants() {
        let Some(name) = tree.element_name(id) else {
            continue;
        };
        let name: &str = name;

        for &(element, attr) in EMBED_ATTRS {
            if element == name
                && let Some(value) = tree.attr(id, attr)
                && let Some(target) = href::resolve(doc_path, value)
            {
                refs.attrs.push(Reference {
                    node: id,
                    attr,
                    kind: RefKind::Embed,
                    target,
                });
            }
        }
        for &(element, attr) in HYPERLINK_ATTRS {
            if element == name
                && let Some(value) = tree.attr(id, attr)
                && let Some(target) = href::resolve(doc_path, value)
            {
                refs.attrs.push(Reference {
                    node: id,
                    attr,
                    kind: RefKind::Hyperlink,
                    target,
                });
            }
        }

        if let Some(srcset) = tree.attr(id, "srcset") {
            refs.embedded.extend(
                srcset_urls(srcset)
                    .into_iter()
                    .filter_map(|url| href::resolve(doc_path, url)),
            );
        }
        if let Some(style) = tree.attr(id, "style") {
            refs.embedded.extend(
                css_urls(style)
                    .iter()
                    .filter_map(|url| href::resolve(doc_path, url)),
            );
        }
        if name == "style" {
            for child in tree.children(id) {
                if let Some(NodeData::Text(css)) = tree.get(child).map(|n| &n.data) {
                    refs.embedded.extend(
                        css_urls(css)
                            .iter()
                            .filter_map(|url| href::resolve(doc_path, url)),
                    );
                }
            }
        }
    }

    refs
}

/// Candidate URLs of a `srcset` attribute ("a.png 1x, b.png 2x").
fn srcset_urls(srcset: &str) -> Vec<&str> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
        .collect()
}

/// URLs referenced by CSS text: `url(...)` values and `@import` targets.
pub(crate) fn css_urls(css: &str) -> Vec<String> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut urls = Vec::new();
    collect_urls(&mut parser, &mut urls);
    urls
}

fn collect_urls<'i>(parser: &mut Parser<'i, '_>, urls: &mut Vec<String>) {
    let mut after_import = false;
    loop {
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };

        match &token {
            Token::UnquotedUrl(url) => urls.push(url.to_string()),
            Token::QuotedString(target) if after_import => urls.push(target.to_string()),
            Token::Function(name) if name.eq_ignore_ascii_case("url") => {
                let _ = parser.parse_nested_block(|p| -> Result<(), ParseError<'i, ()>> {
                    let target = p.expect_string()?;
                    urls.push(target.to_string());
                    Ok(())
                });
            }
            Token::Function(_)
            | Token::ParenthesisBlock
            | Token::SquareBracketBlock
            | Token::CurlyBracketBlock => {
                let _ = parser.parse_nested_block(|p| -> Result<(), ParseError<'i, ()>> {
                    collect_urls(p, urls);
                    Ok(())
                });
            }
            _ => {}
        }

        after_import = match &token {
            Token::AtKeyword(keyword) => keyword.eq_ignore_ascii_case("import"),
            Token::WhiteSpace(_) | Token::Comment(_) => after_import,
            _ => false,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    #[test]
    fn test_css_urls() {
        let css = r#"
            @import "base.css";
            @import url(print.css) print;
            @font-face { font-family: X; src: url("../fonts/x.otf") format("opentype"); }
            .hero { background: #fff url(img/bg.png) no-repeat; }
            p::before { content: "url(not-a-url.png)"; }
        "#;
        assert_eq!(
            css_urls(css),
            vec!["base.css", "print.css", "../fonts/x.otf", "img/bg.png"]
        );
    }

    #[test]
    fn test_srcset_urls() {
        assert_eq!(srcset_urls("a.png 1x, b%20c.png 2x"), vec!["a.png", "b%20c.png"]);
    }

    #[test]
    fn test_scan_document() {
        let doc = Document::parse(
            br##"<html><head>
<link rel="stylesheet" href="../styles/main.css"/>
<style>body { background: url(../images/bg.png) }</style>
</head><body>
<p><img src="../images/fig.png" srcset="../images/fig@2x.png 2x"/></p>
<p style="background-image: url('../images/dot.png')"><a href="ch2.xhtml#s1">next</a></p>
<p><a href="https://example.com/">web</a><a href="#local">here</a></p>
<svg><image xlink:href="../images/plate.jpg"/></svg>
</body></html>"##,
        );

        let refs = scan_document(doc.tree(), "OEBPS/text/ch1.xhtml");
        let attrs: Vec<_> = refs
            .attrs
            .iter()
            .map(|r| (r.attr, r.kind, r.target.path.as_str()))
            .collect();
        assert_eq!(
            attrs,
            vec![
                ("href", RefKind::Embed, "OEBPS/styles/main.css"),
                ("src", RefKind::Embed, "OEBPS/images/fig.png"),
                ("href", RefKind::Hyperlink, "OEBPS/text/ch2.xhtml"),
                ("href", RefKind::Hyperlink, "OEBPS/text/ch1.xhtml"),
                ("href", RefKind::Embed, "OEBPS/images/plate.jpg"),
            ]
        );

        let embedded: Vec<_> = refs.embedded.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            embedded,
            vec!["OEBPS/images/bg.png", "OEBPS/images/fig@2x.png", "OEBPS/images/dot.png"]
        );
    }
}
