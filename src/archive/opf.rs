//! Package parsing: `META-INF/container.xml` and the OPF package document.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{Metadata, PackageMeta};
use crate::error::{Error, Result};
use crate::util::strip_bom;

/// A `<manifest><item>` as written in the OPF.
#[derive(Debug, Clone)]
pub(crate) struct OpfItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
    pub fallback: Option<String>,
}

/// A `<spine><itemref>` as written in the OPF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpfItemRef {
    pub idref: String,
    pub linear: bool,
    pub properties: Option<String>,
}

/// Parsed OPF package data.
#[derive(Debug)]
pub(crate) struct OpfData {
    pub version: String,
    pub metadata: Metadata,
    /// Manifest items in document order.
    pub manifest: Vec<OpfItem>,
    /// Itemrefs in reading order.
    pub spine: Vec<OpfItemRef>,
    /// `<spine page-progression-direction>`.
    pub page_progression_direction: Option<String>,
    /// Manifest id named by `<spine toc="...">`.
    pub toc_id: Option<String>,
    /// Manifest id (or href, in sloppy EPUB 2 files) from `<meta name="cover">`.
    pub epub2_cover: Option<String>,
}

/// Parse META-INF/container.xml to find the OPF path.
pub(crate) fn parse_container_xml(bytes: &[u8]) -> Result<String> {
    let content = String::from_utf8_lossy(strip_bom(bytes));
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if local_name(e.name().as_ref()) == b"rootfile" => {
                if let Some(path) = attr_value(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::malformed(format!("container.xml: {e}"))),
            _ => {}
        }
    }

    Err(Error::malformed("no rootfile found in META-INF/container.xml"))
}

/// Parse an OPF package document.
pub(crate) fn parse_opf(content: &str) -> Result<OpfData> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let mut version = String::from("2.0");
    let mut metadata = Metadata::default();
    let mut manifest: Vec<OpfItem> = Vec::new();
    let mut spine: Vec<OpfItemRef> = Vec::new();
    let mut toc_id: Option<String> = None;
    let mut page_progression_direction: Option<String> = None;
    let mut epub2_cover: Option<String> = None;
    let mut saw_package = false;

    let mut in_metadata = false;
    let mut current_element: Option<&'static str> = None;
    let mut buf_text = String::new();
    // Attributes of an open `<meta>` that is carried verbatim.
    let mut pending_meta: Option<Vec<(String, String)>> = None;

    loop {
        let (e, is_empty) = match reader.read_event() {
            Ok(Event::Start(e)) => (e, false),
            Ok(Event::Empty(e)) => (e, true),
            Ok(Event::Text(e)) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
                continue;
            }
            Ok(Event::CData(e)) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
                continue;
            }
            Ok(Event::GeneralRef(e)) => {
                if current_element.is_some() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        buf_text.push_str(&resolved);
                    }
                }
                continue;
            }
            Ok(Event::End(e)) => {
                if local_name(e.name().as_ref()) == b"metadata" {
                    in_metadata = false;
                }
                if let Some(elem) = current_element.take() {
                    let text = buf_text.trim().to_string();
                    match elem {
                        "title" if metadata.title.is_empty() => metadata.title = text,
                        "creator" => metadata.authors.push(text),
                        "contributor" => metadata.contributors.push(text),
                        "language" if metadata.language.is_empty() => metadata.language = text,
                        "identifier" if metadata.identifier.is_empty() => {
                            metadata.identifier = text
                        }
                        "publisher" => metadata.publisher = Some(text),
                        "description" => metadata.description = Some(text),
                        "subject" => metadata.subjects.push(text),
                        "date" => metadata.date = Some(text),
                        "rights" => metadata.rights = Some(text),
                        "modified" => metadata.modified = Some(text),
                        "meta" => {
                            if let Some(attributes) = pending_meta.take() {
                                metadata.extra_meta.push(PackageMeta {
                                    attributes,
                                    value: text,
                                });
                            }
                        }
                        _ => {}
                    }
                    buf_text.clear();
                }
                continue;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::malformed(format!("package document: {e}"))),
            _ => continue,
        };

        match local_name(e.name().as_ref()) {
            b"package" => {
                saw_package = true;
                if let Some(v) = attr_value(&e, b"version") {
                    version = v;
                }
                metadata.prefix = attr_value(&e, b"prefix");
            }
            b"metadata" => in_metadata = !is_empty,
            b"title" | b"creator" | b"contributor" | b"language" | b"identifier"
            | b"publisher" | b"description" | b"subject" | b"date" | b"rights"
                if in_metadata && !is_empty =>
            {
                current_element = Some(match local_name(e.name().as_ref()) {
                    b"title" => "title",
                    b"creator" => "creator",
                    b"contributor" => "contributor",
                    b"language" => "language",
                    b"identifier" => "identifier",
                    b"publisher" => "publisher",
                    b"description" => "description",
                    b"subject" => "subject",
                    b"date" => "date",
                    _ => "rights",
                });
                buf_text.clear();
            }
            b"meta" if in_metadata => {
                if attr_value(&e, b"name").as_deref() == Some("cover")
                    && let Some(content) = attr_value(&e, b"content")
                    && !content.is_empty()
                {
                    epub2_cover = Some(content);
                }
                let property = attr_value(&e, b"property");
                if property.as_deref() == Some("dcterms:modified") {
                    if !is_empty {
                        current_element = Some("modified");
                        buf_text.clear();
                    }
                } else if attr_value(&e, b"name").as_deref() != Some("cover") {
                    let attributes = raw_attributes(&e);
                    if is_empty {
                        metadata.extra_meta.push(PackageMeta {
                            attributes,
                            value: String::new(),
                        });
                    } else {
                        pending_meta = Some(attributes);
                        current_element = Some("meta");
                        buf_text.clear();
                    }
                }
            }
            b"item" => {
                let id = attr_value(&e, b"id").unwrap_or_default();
                if !id.is_empty() {
                    manifest.push(OpfItem {
                        id,
                        href: attr_value(&e, b"href").unwrap_or_default(),
                        media_type: attr_value(&e, b"media-type").unwrap_or_default(),
                        properties: attr_value(&e, b"properties"),
                        fallback: attr_value(&e, b"fallback"),
                    });
                }
            }
            b"itemref" => {
                if let Some(idref) = attr_value(&e, b"idref") {
                    spine.push(OpfItemRef {
                        idref,
                        linear: attr_value(&e, b"linear").as_deref() != Some("no"),
                        properties: attr_value(&e, b"properties"),
                    });
                }
            }
            b"spine" => {
                toc_id = attr_value(&e, b"toc");
                page_progression_direction = attr_value(&e, b"page-progression-direction");
            }
            _ => {}
        }
    }

    if !saw_package {
        return Err(Error::malformed("package document has no <package> element"));
    }

    drop_orphan_refinements(&mut metadata.extra_meta);

    Ok(OpfData {
        version,
        metadata,
        manifest,
        spine,
        page_progression_direction,
        toc_id,
        epub2_cover,
    })
}

/// Refinements of elements that are not carried (creators, titles, the
/// identifier) would point at ids missing from the regenerated package.
fn drop_orphan_refinements(metas: &mut Vec<PackageMeta>) {
    let ids: Vec<String> = metas
        .iter()
        .filter_map(|m| m.attr("id"))
        .map(|id| format!("#{id}"))
        .collect();
    metas.retain(|m| m.attr("refines").is_none_or(|r| ids.iter().any(|id| id == r)));
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Unescaped attribute value by local name.
pub(crate) fn attr_value(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| local_name(a.key.as_ref()) == name)
        .map(|a| match a.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}

/// All attributes as written (qualified names, unescaped values), minus
/// namespace declarations.
fn raw_attributes(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .filter(|a| !a.key.as_ref().starts_with(b"xmlns"))
        .map(|a| {
            let value = match a.unescape_value() {
                Ok(v) => v.into_owned(),
                Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
            };
            (String::from_utf8_lossy(a.key.as_ref()).into_owned(), value)
        })
        .collect()
}

/// Extract local name from namespaced XML name (e.g., "dc:title" -> "title").
pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Resolve XML entity references.
pub(crate) fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x") {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };

    code.and_then(char::from_u32).map(|c| c.to_string())
}
