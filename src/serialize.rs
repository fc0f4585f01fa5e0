//! Writing an [`Archive`] back to EPUB bytes.
//!
//! The package document, the NCX and the EPUB 3 navigation document are
//! regenerated from the archive model; every other resource is written as is.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use tracing::trace;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::archive::href;
use crate::archive::{Archive, ManifestEntry, NavPoint, NavTarget};
use crate::error::{Error, Result};
use crate::util::escape_xml;

/// Serialize an archive. The result is built entirely in memory; on error
/// nothing is returned.
pub fn emit(archive: &Archive) -> Result<Vec<u8>> {
    check_consistency(archive)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    // mimetype must be first and uncompressed
    let options_stored =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let options_deflate =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("mimetype", options_stored)?;
    zip.write_all(b"application/epub+zip")?;

    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(container_xml(archive.package_path()).as_bytes())?;

    zip.start_file(archive.package_path(), options_deflate)?;
    zip.write_all(generate_opf(archive).as_bytes())?;

    let nav = archive.navigation();
    let mut written: HashSet<&str> = HashSet::from(["mimetype", "META-INF/container.xml"]);
    written.insert(archive.package_path());

    for entry in archive.manifest() {
        if !written.insert(entry.path.as_str()) {
            trace!(path = %entry.path, "skipping duplicate path");
            continue;
        }
        zip.start_file(entry.path.as_str(), options_deflate)?;
        if nav.ncx_id.as_deref() == Some(entry.id.as_str()) {
            zip.write_all(generate_ncx(archive, entry).as_bytes())?;
        } else if nav.nav_doc_id.as_deref() == Some(entry.id.as_str()) {
            zip.write_all(generate_nav_document(archive, entry).as_bytes())?;
        } else {
            zip.write_all(&entry.data)?;
        }
    }

    for extra in archive.extras() {
        if written.insert(extra.path.as_str()) {
            zip.start_file(extra.path.as_str(), options_deflate)?;
            zip.write_all(&extra.data)?;
        }
    }

    Ok(zip.finish()?.into_inner())
}

/// Every id the package document or navigation names must be in the manifest.
fn check_consistency(archive: &Archive) -> Result<()> {
    for item in archive.spine() {
        if archive.entry(&item.idref).is_none() {
            return Err(Error::Serialization(format!(
                "spine item `{}` is not in the manifest",
                item.idref
            )));
        }
    }

    let nav = archive.navigation();
    let named = [
        ("NCX", nav.ncx_id.as_deref()),
        ("navigation document", nav.nav_doc_id.as_deref()),
        ("cover image", archive.metadata().cover_id.as_deref()),
    ];
    for (what, id) in named {
        if let Some(id) = id
            && archive.entry(id).is_none()
        {
            return Err(Error::Serialization(format!(
                "{what} `{id}` is not in the manifest"
            )));
        }
    }

    fn check_points(archive: &Archive, points: &[NavPoint]) -> Result<()> {
        for point in points {
            if let Some(target) = &point.target
                && archive.entry(&target.id).is_none()
            {
                return Err(Error::Serialization(format!(
                    "navigation entry `{}` points at `{}`, which is not in the manifest",
                    point.label, target.id
                )));
            }
            check_points(archive, &point.children)?;
        }
        Ok(())
    }
    check_points(archive, &nav.points)
}

fn container_xml(package_path: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#,
        escape_xml(package_path)
    )
}

fn generate_opf(archive: &Archive) -> String {
    let metadata = archive.metadata();
    let epub3 = archive.is_epub3();
    let mut opf = String::new();

    let prefix = metadata
        .prefix
        .as_deref()
        .map(|p| format!(" prefix=\"{}\"", escape_xml(p)))
        .unwrap_or_default();
    opf.push_str(&format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="{}" unique-identifier="BookId"{}>
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
"#,
        escape_xml(archive.version()),
        prefix
    ));

    opf.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        escape_xml(&metadata.title)
    ));
    opf.push_str(&format!(
        "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
        escape_xml(&metadata.identifier)
    ));

    let language = if metadata.language.is_empty() {
        "en"
    } else {
        &metadata.language
    };
    opf.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        escape_xml(language)
    ));

    for author in &metadata.authors {
        opf.push_str(&format!(
            "    <dc:creator>{}</dc:creator>\n",
            escape_xml(author)
        ));
    }
    for contributor in &metadata.contributors {
        opf.push_str(&format!(
            "    <dc:contributor>{}</dc:contributor>\n",
            escape_xml(contributor)
        ));
    }
    if let Some(ref publisher) = metadata.publisher {
        opf.push_str(&format!(
            "    <dc:publisher>{}</dc:publisher>\n",
            escape_xml(publisher)
        ));
    }
    if let Some(ref description) = metadata.description {
        opf.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            escape_xml(description)
        ));
    }
    for subject in &metadata.subjects {
        opf.push_str(&format!(
            "    <dc:subject>{}</dc:subject>\n",
            escape_xml(subject)
        ));
    }
    if let Some(ref date) = metadata.date {
        opf.push_str(&format!("    <dc:date>{}</dc:date>\n", escape_xml(date)));
    }
    if let Some(ref rights) = metadata.rights {
        opf.push_str(&format!(
            "    <dc:rights>{}</dc:rights>\n",
            escape_xml(rights)
        ));
    }

    // dcterms:modified is required for EPUB 3
    if epub3 {
        let modified = metadata
            .modified
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());
        opf.push_str(&format!(
            "    <meta property=\"dcterms:modified\">{}</meta>\n",
            escape_xml(&modified)
        ));
    }
    for meta in &metadata.extra_meta {
        opf.push_str("    <meta");
        for (name, value) in &meta.attributes {
            opf.push_str(&format!(" {}=\"{}\"", name, escape_xml(value)));
        }
        if meta.value.is_empty() {
            opf.push_str("/>\n");
        } else {
            opf.push_str(&format!(">{}</meta>\n", escape_xml(&meta.value)));
        }
    }
    if let Some(ref cover_id) = metadata.cover_id {
        opf.push_str(&format!(
            "    <meta name=\"cover\" content=\"{}\"/>\n",
            escape_xml(cover_id)
        ));
    }

    opf.push_str("  </metadata>\n  <manifest>\n");

    for entry in archive.manifest() {
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"",
            escape_xml(&entry.id),
            escape_xml(&entry.href),
            escape_xml(&entry.media_type)
        ));
        if let Some(properties) = item_properties(archive, entry) {
            opf.push_str(&format!(" properties=\"{}\"", escape_xml(&properties)));
        }
        if let Some(ref fallback) = entry.fallback {
            opf.push_str(&format!(" fallback=\"{}\"", escape_xml(fallback)));
        }
        opf.push_str("/>\n");
    }

    opf.push_str("  </manifest>\n");
    opf.push_str("  <spine");
    if let Some(ref ncx) = archive.navigation().ncx_id {
        opf.push_str(&format!(" toc=\"{}\"", escape_xml(ncx)));
    }
    if let Some(direction) = archive.page_progression_direction() {
        opf.push_str(&format!(
            " page-progression-direction=\"{}\"",
            escape_xml(direction)
        ));
    }
    opf.push_str(">\n");

    for item in archive.spine() {
        opf.push_str(&format!("    <itemref idref=\"{}\"", escape_xml(&item.idref)));
        if !item.linear {
            opf.push_str(" linear=\"no\"");
        }
        if let Some(ref properties) = item.properties {
            opf.push_str(&format!(" properties=\"{}\"", escape_xml(properties)));
        }
        opf.push_str("/>\n");
    }

    opf.push_str("  </spine>\n</package>\n");
    opf
}

/// Manifest `properties`, adding the EPUB 3 markers the model implies.
fn item_properties(archive: &Archive, entry: &ManifestEntry) -> Option<String> {
    let mut properties: Vec<&str> = entry
        .properties
        .as_deref()
        .map(|p| p.split_whitespace().collect())
        .unwrap_or_default();

    if archive.is_epub3() {
        let nav = archive.navigation();
        if nav.nav_doc_id.as_deref() == Some(entry.id.as_str()) && !properties.contains(&"nav") {
            properties.push("nav");
        }
        if archive.metadata().cover_id.as_deref() == Some(entry.id.as_str())
            && !properties.contains(&"cover-image")
        {
            properties.push("cover-image");
        }
    }

    (!properties.is_empty()).then(|| properties.join(" "))
}

/// Reference from the navigation file at `from` to a target document.
fn target_href(archive: &Archive, from: &str, target: &NavTarget) -> String {
    let path = archive
        .entry(&target.id)
        .map(|e| e.path.as_str())
        .unwrap_or_default();
    let mut out = percent_encode_path(&href::relative(from, path));
    if let Some(ref anchor) = target.anchor {
        out.push('#');
        out.push_str(anchor);
    }
    out
}

/// Encode characters that are not allowed raw in a URL path.
fn percent_encode_path(path: &str) -> String {
    use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

    const PATH: &AsciiSet = &CONTROLS
        .add(b' ')
        .add(b'"')
        .add(b'#')
        .add(b'%')
        .add(b'<')
        .add(b'>')
        .add(b'?')
        .add(b'`')
        .add(b'{')
        .add(b'}');

    utf8_percent_encode(path, PATH).to_string()
}

fn generate_ncx(archive: &Archive, ncx: &ManifestEntry) -> String {
    let metadata = archive.metadata();
    let points = &archive.navigation().points;
    let mut out = String::new();

    out.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
"#,
    );
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"{}\"/>\n",
        escape_xml(&metadata.identifier)
    ));
    out.push_str(&format!(
        "    <meta name=\"dtb:depth\" content=\"{}\"/>\n",
        depth(points).max(1)
    ));
    out.push_str(
        r#"    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle>
"#,
    );
    out.push_str(&format!(
        "    <text>{}</text>\n  </docTitle>\n  <navMap>\n",
        escape_xml(&metadata.title)
    ));

    let mut play_order = 1;
    for point in points {
        write_nav_point(&mut out, archive, &ncx.path, point, &mut play_order, 2);
    }

    out.push_str("  </navMap>\n</ncx>\n");
    out
}

fn write_nav_point(
    ncx: &mut String,
    archive: &Archive,
    ncx_path: &str,
    point: &NavPoint,
    play_order: &mut usize,
    indent: usize,
) {
    let indent_str = "  ".repeat(indent);

    // NCX requires a content element; headings borrow their first descendant's target.
    let src = point
        .first_target()
        .map(|t| target_href(archive, ncx_path, t))
        .unwrap_or_default();

    ncx.push_str(&format!(
        "{}<navPoint id=\"navpoint-{}\" playOrder=\"{}\">\n",
        indent_str, play_order, play_order
    ));
    ncx.push_str(&format!(
        "{}  <navLabel>\n{}    <text>{}</text>\n{}  </navLabel>\n",
        indent_str,
        indent_str,
        escape_xml(&point.label),
        indent_str
    ));
    ncx.push_str(&format!(
        "{}  <content src=\"{}\"/>\n",
        indent_str,
        escape_xml(&src)
    ));

    *play_order += 1;

    for child in &point.children {
        write_nav_point(ncx, archive, ncx_path, child, play_order, indent + 1);
    }

    ncx.push_str(&format!("{}</navPoint>\n", indent_str));
}

fn depth(points: &[NavPoint]) -> usize {
    points
        .iter()
        .map(|p| 1 + depth(&p.children))
        .max()
        .unwrap_or(0)
}

fn generate_nav_document(archive: &Archive, nav: &ManifestEntry) -> String {
    let title = escape_xml(&archive.metadata().title);
    let mut out = String::new();

    out.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
"#,
    );
    out.push_str(&format!("  <title>{title}</title>\n</head>\n<body>\n"));
    out.push_str(&format!(
        "  <nav epub:type=\"toc\" id=\"toc\">\n    <h1>{title}</h1>\n"
    ));
    write_nav_list(&mut out, archive, &nav.path, &archive.navigation().points, 2);
    out.push_str("  </nav>\n</body>\n</html>\n");
    out
}

fn write_nav_list(
    out: &mut String,
    archive: &Archive,
    nav_path: &str,
    points: &[NavPoint],
    indent: usize,
) {
    let indent_str = "  ".repeat(indent);
    out.push_str(&format!("{indent_str}<ol>\n"));
    for point in points {
        let label = escape_xml(&point.label);
        match &point.target {
            Some(target) => out.push_str(&format!(
                "{indent_str}  <li><a href=\"{}\">{label}</a>",
                escape_xml(&target_href(archive, nav_path, target))
            )),
            None => out.push_str(&format!("{indent_str}  <li><span>{label}</span>")),
        }
        if !point.children.is_empty() {
            out.push('\n');
            write_nav_list(out, archive, nav_path, &point.children, indent + 2);
            out.push_str(&format!("{indent_str}  "));
        }
        out.push_str("</li>\n");
    }
    out.push_str(&format!("{indent_str}</ol>\n"));
}
