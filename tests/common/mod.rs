//! In-memory EPUB fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use epub_splitter::archive::href;
use epub_splitter::dom::Document;
use epub_splitter::{Archive, NavPoint};
use zip::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

struct Item {
    id: String,
    href: String,
    media_type: String,
    properties: Option<String>,
    data: Vec<u8>,
}

/// Builds small but complete EPUBs with the package under `OEBPS/`.
pub struct EpubBuilder {
    title: String,
    version: &'static str,
    chapters: Vec<(String, String)>,
    items: Vec<Item>,
    cover: Option<String>,
    ncx: bool,
    nav_doc: bool,
    nav_override: Option<String>,
    files: Vec<(String, Vec<u8>)>,
    package_attrs: String,
    metadata_xml: String,
    spine_attrs: String,
    itemref_properties: BTreeMap<String, String>,
}

impl EpubBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            version: "2.0",
            chapters: Vec::new(),
            items: Vec::new(),
            cover: None,
            ncx: true,
            nav_doc: false,
            nav_override: None,
            files: Vec::new(),
            package_attrs: String::new(),
            metadata_xml: String::new(),
            spine_attrs: String::new(),
            itemref_properties: BTreeMap::new(),
        }
    }

    /// EPUB 3 package with a navigation document instead of an NCX.
    pub fn epub3(mut self) -> Self {
        self.version = "3.0";
        self.ncx = false;
        self.nav_doc = true;
        self
    }

    pub fn without_navigation(mut self) -> Self {
        self.ncx = false;
        self.nav_doc = false;
        self
    }

    /// Replace the generated NCX navMap (or nav `<ol>`) content.
    pub fn navigation_markup(mut self, markup: &str) -> Self {
        self.nav_override = Some(markup.to_string());
        self
    }

    /// Spine document `text/<id>.xhtml` with a `<title>` and the given body.
    pub fn chapter(mut self, id: &str, title: &str, body: &str) -> Self {
        let html = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{title}</title></head>
<body>
{body}
</body>
</html>
"#
        );
        self.items.push(Item {
            id: id.to_string(),
            href: format!("text/{id}.xhtml"),
            media_type: "application/xhtml+xml".to_string(),
            properties: None,
            data: html.into_bytes(),
        });
        self.chapters.push((id.to_string(), title.to_string()));
        self
    }

    /// Non-spine manifest item.
    pub fn resource(mut self, id: &str, href: &str, media_type: &str, data: &[u8]) -> Self {
        self.items.push(Item {
            id: id.to_string(),
            href: href.to_string(),
            media_type: media_type.to_string(),
            properties: None,
            data: data.to_vec(),
        });
        self
    }

    /// Spine entry that is not a content document.
    pub fn spine_resource(mut self, id: &str, href: &str, media_type: &str, data: &[u8]) -> Self {
        self = self.resource(id, href, media_type, data);
        self.chapters.push((id.to_string(), id.to_string()));
        self
    }

    pub fn cover(mut self, id: &str, href: &str) -> Self {
        self.items.push(Item {
            id: id.to_string(),
            href: href.to_string(),
            media_type: "image/jpeg".to_string(),
            properties: None,
            data: b"\xFF\xD8\xFFcover".to_vec(),
        });
        self.cover = Some(id.to_string());
        self
    }

    /// Extra attributes on `<package>`, e.g. ` prefix="..."`.
    pub fn package_attrs(mut self, attrs: &str) -> Self {
        self.package_attrs = attrs.to_string();
        self
    }

    /// Raw markup appended inside `<metadata>`.
    pub fn metadata_xml(mut self, xml: &str) -> Self {
        self.metadata_xml.push_str(xml);
        self
    }

    /// Extra attributes on `<spine>`.
    pub fn spine_attrs(mut self, attrs: &str) -> Self {
        self.spine_attrs = attrs.to_string();
        self
    }

    pub fn itemref_properties(mut self, id: &str, properties: &str) -> Self {
        self.itemref_properties
            .insert(id.to_string(), properties.to_string());
        self
    }

    /// Raw file at a container path, outside the manifest.
    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.files.push((path.to_string(), data.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let deflated =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.start_file("META-INF/container.xml", deflated).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
        )
        .unwrap();

        zip.start_file("OEBPS/content.opf", deflated).unwrap();
        zip.write_all(self.opf().as_bytes()).unwrap();

        if self.ncx {
            zip.start_file("OEBPS/toc.ncx", deflated).unwrap();
            zip.write_all(self.ncx_xml().as_bytes()).unwrap();
        }
        if self.nav_doc {
            zip.start_file("OEBPS/nav.xhtml", deflated).unwrap();
            zip.write_all(self.nav_xhtml().as_bytes()).unwrap();
        }
        for item in &self.items {
            zip.start_file(format!("OEBPS/{}", item.href), deflated).unwrap();
            zip.write_all(&item.data).unwrap();
        }
        for (path, data) in &self.files {
            zip.start_file(path.as_str(), deflated).unwrap();
            zip.write_all(data).unwrap();
        }

        zip.finish().unwrap().into_inner()
    }

    fn opf(&self) -> String {
        let mut opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="{}" unique-identifier="uid"{}>
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{}</dc:title>
    <dc:creator>Test Author</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier id="uid">urn:test:book</dc:identifier>
"#,
            self.version, self.package_attrs, self.title
        );
        if self.version == "3.0" {
            opf.push_str("    <meta property=\"dcterms:modified\">2024-01-01T00:00:00Z</meta>\n");
        }
        if let Some(cover) = &self.cover {
            opf.push_str(&format!("    <meta name=\"cover\" content=\"{cover}\"/>\n"));
        }
        opf.push_str(&self.metadata_xml);
        opf.push_str("  </metadata>\n  <manifest>\n");
        if self.ncx {
            opf.push_str(
                "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
            );
        }
        if self.nav_doc {
            opf.push_str(
                "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
            );
        }
        for item in &self.items {
            let properties = item
                .properties
                .as_deref()
                .map(|p| format!(" properties=\"{p}\""))
                .unwrap_or_default();
            opf.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
                item.id, item.href, item.media_type, properties
            ));
        }
        opf.push_str("  </manifest>\n");
        let toc = if self.ncx { " toc=\"ncx\"" } else { "" };
        opf.push_str(&format!("  <spine{toc}{}>\n", self.spine_attrs));
        for (id, _) in &self.chapters {
            match self.itemref_properties.get(id) {
                Some(props) => opf.push_str(&format!(
                    "    <itemref idref=\"{id}\" properties=\"{props}\"/>\n"
                )),
                None => opf.push_str(&format!("    <itemref idref=\"{id}\"/>\n")),
            }
        }
        opf.push_str("  </spine>\n</package>\n");
        opf
    }

    fn ncx_xml(&self) -> String {
        let nav_map = self.nav_override.clone().unwrap_or_else(|| {
            self.chapters
                .iter()
                .map(|(id, title)| {
                    format!(
                        "<navPoint id=\"np-{id}\"><navLabel><text>{title}</text></navLabel><content src=\"text/{id}.xhtml\"/></navPoint>\n"
                    )
                })
                .collect()
        });
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
<head><meta name="dtb:uid" content="urn:test:book"/></head>
<docTitle><text>{}</text></docTitle>
<navMap>
{nav_map}</navMap>
</ncx>
"#,
            self.title
        )
    }

    fn nav_xhtml(&self) -> String {
        let list = self.nav_override.clone().unwrap_or_else(|| {
            self.chapters
                .iter()
                .map(|(id, title)| format!("<li><a href=\"text/{id}.xhtml\">{title}</a></li>\n"))
                .collect()
        });
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body><nav epub:type="toc"><ol>
{list}</ol></nav></body>
</html>
"#
        )
    }
}

/// Eight chapters of roughly equal size; chapter 1 shows an image and links
/// to chapter 6.
pub fn eight_chapter_book() -> EpubBuilder {
    let filler = "<p>Lorem ipsum dolor sit amet, consectetur adipiscing elit.</p>\n".repeat(20);
    let mut book = EpubBuilder::new("Eight Chapters")
        .cover("cover", "images/cover.jpg")
        .resource("css", "styles/book.css", "text/css", b"p { margin: 0 }")
        .resource("fig1", "images/fig1.png", "image/png", b"\x89PNGfig1");

    for n in 1..=8 {
        let mut body = format!(
            "<link rel=\"stylesheet\" href=\"../styles/book.css\"/>\n<h1 id=\"top\">Chapter {n}</h1>\n"
        );
        if n == 1 {
            body.push_str(
                "<p><img src=\"../images/fig1.png\" alt=\"Figure 1\"/></p>\n\
                 <p>See <a href=\"ch6.xhtml#top\">chapter six</a> and <a href=\"#top\">the top</a>.</p>\n",
            );
        }
        body.push_str(&filler);
        book = book.chapter(&format!("ch{n}"), &format!("Chapter {n}"), &body);
    }
    book
}

/// All files of a zip archive keyed by name, in archive order.
pub fn zip_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut out = Vec::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        out.push((file.name().to_string(), data));
    }
    out
}

pub fn zip_map(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    zip_entries(bytes).into_iter().collect()
}

/// Spine ids of an archive, in order.
pub fn spine_ids(archive: &Archive) -> Vec<String> {
    archive.spine().iter().map(|s| s.idref.clone()).collect()
}

/// Hyperlinks in content documents that resolve to files outside the archive.
pub fn dangling_links(archive: &Archive) -> Vec<String> {
    let mut errors = Vec::new();
    let nav_doc = archive.navigation().nav_doc_id.as_deref();

    for entry in archive.manifest().iter().filter(|e| e.is_markup()) {
        if Some(entry.id.as_str()) == nav_doc {
            continue;
        }
        let doc = Document::parse(&entry.data);
        let tree = doc.tree();
        for tag in ["a", "area"] {
            for node in tree.find_all_by_tag(tag) {
                let Some(value) = tree.attr(node, "href") else {
                    continue;
                };
                if let Some(target) = href::resolve(&entry.path, value)
                    && archive.entry_by_path(&target.path).is_none()
                {
                    errors.push(format!("{} links to missing {}", entry.path, target.path));
                }
            }
        }
    }

    fn check(archive: &Archive, points: &[NavPoint], errors: &mut Vec<String>) {
        for point in points {
            if let Some(target) = &point.target
                && archive.entry(&target.id).is_none()
            {
                errors.push(format!("navigation '{}' targets missing {}", point.label, target.id));
            }
            check(archive, &point.children, errors);
        }
    }
    check(archive, &archive.navigation().points, &mut errors);

    errors
}

/// Flattened `(depth, label, target id)` view of a navigation tree.
pub fn flatten_nav(points: &[NavPoint]) -> Vec<(usize, String, Option<String>)> {
    fn walk(points: &[NavPoint], depth: usize, out: &mut Vec<(usize, String, Option<String>)>) {
        for point in points {
            out.push((
                depth,
                point.label.clone(),
                point.target.as_ref().map(|t| t.id.clone()),
            ));
            walk(&point.children, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    walk(points, 0, &mut out);
    out
}
