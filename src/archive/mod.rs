//! In-memory model of an EPUB container.
//!
//! [`Archive::load`] reads the zip once: the package document, every manifest
//! resource, the navigation tree and any carried `META-INF` files. An archive
//! is never mutated afterwards; partitions are derived as new archives that
//! share resource bytes with their source.

pub mod href;
mod nav;
mod opf;

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::Arc;

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::util::{decode_text, encoding_hint, strip_bom};
use nav::RawNavPoint;

pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// META-INF files that signal DRM; they cannot be carried into partitions.
const DRM_FILES: &[&str] = &["META-INF/encryption.xml", "META-INF/rights.xml"];

/// Book metadata (Dublin Core plus the package-level extras we carry).
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub contributors: Vec<String>,
    pub language: String,
    pub identifier: String,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub subjects: Vec<String>,
    pub date: Option<String>,
    pub rights: Option<String>,
    /// `dcterms:modified`, EPUB 3 only.
    pub modified: Option<String>,
    /// Manifest id of the cover image.
    pub cover_id: Option<String>,
    /// `<package prefix>` declarations for vendor vocabularies.
    pub prefix: Option<String>,
    /// Other `<meta>` elements (rendition settings, collections, vendor
    /// extensions), in document order.
    pub extra_meta: Vec<PackageMeta>,
}

/// A `<meta>` element carried through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMeta {
    /// Attributes by qualified name, unescaped, in document order.
    pub attributes: Vec<(String, String)>,
    /// Trimmed text content; empty for EPUB 2 `name`/`content` metas.
    pub value: String,
}

impl PackageMeta {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A resource declared in the package manifest.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub id: String,
    /// As written in the manifest, relative to the package document.
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
    pub fallback: Option<String>,
    /// Decoded container path.
    pub path: String,
    pub data: Arc<[u8]>,
}

impl ManifestEntry {
    /// XHTML or HTML content documents.
    pub fn is_markup(&self) -> bool {
        matches!(
            self.media_type.trim().to_ascii_lowercase().as_str(),
            XHTML_MEDIA_TYPE | "text/html"
        )
    }

    pub fn is_stylesheet(&self) -> bool {
        self.media_type.trim().eq_ignore_ascii_case("text/css")
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|t| t == property))
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// An entry in the reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineEntry {
    pub idref: String,
    pub linear: bool,
    /// Itemref properties such as `page-spread-left`.
    pub properties: Option<String>,
}

/// Where a navigation node points.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavTarget {
    /// Manifest id of the target document.
    pub id: String,
    /// Fragment within the document, without `#`.
    pub anchor: Option<String>,
}

/// A node of the table of contents. `target == None` marks a placeholder
/// (a heading with no link of its own).
#[derive(Debug, Clone, PartialEq)]
pub struct NavPoint {
    pub label: String,
    pub target: Option<NavTarget>,
    pub children: Vec<NavPoint>,
}

impl NavPoint {
    /// First target in document order: this node's own, or a descendant's.
    pub fn first_target(&self) -> Option<&NavTarget> {
        self.target
            .as_ref()
            .or_else(|| self.children.iter().find_map(NavPoint::first_target))
    }
}

/// Navigation tree plus the manifest entries it is stored in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Navigation {
    pub points: Vec<NavPoint>,
    /// EPUB 2 NCX manifest id.
    pub ncx_id: Option<String>,
    /// EPUB 3 navigation document manifest id.
    pub nav_doc_id: Option<String>,
}

/// A non-manifest file carried along verbatim (e.g. `META-INF/com.apple.ibooks.display-options.xml`).
#[derive(Debug, Clone)]
pub struct ExtraFile {
    pub path: String,
    pub data: Arc<[u8]>,
}

/// A loaded EPUB.
#[derive(Debug, Clone)]
pub struct Archive {
    package_path: String,
    version: String,
    metadata: Metadata,
    manifest: Vec<ManifestEntry>,
    spine: Vec<SpineEntry>,
    navigation: Navigation,
    extras: Vec<ExtraFile>,
    page_progression_direction: Option<String>,
    by_id: HashMap<String, usize>,
    by_path: HashMap<String, usize>,
}

impl Archive {
    /// Read an EPUB from its raw bytes.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| Error::malformed(format!("not a zip archive: {e}")))?;

        let container = read_entry(&mut zip, CONTAINER_PATH)?
            .ok_or_else(|| Error::malformed(format!("missing {CONTAINER_PATH}")))?;
        let package_path = href::normalize(&opf::parse_container_xml(&container)?);
        let package_bytes = read_entry(&mut zip, &package_path)?.ok_or_else(|| {
            Error::malformed(format!("package document `{package_path}` not found"))
        })?;
        let package_text = decode_text(strip_bom(&package_bytes), encoding_hint(&package_bytes).as_deref());
        let opf = opf::parse_opf(&package_text)?;
        let package_dir = href::parent_dir(&package_path).to_string();

        let mut manifest = Vec::with_capacity(opf.manifest.len());
        let mut seen = HashSet::new();
        for item in opf.manifest {
            if !seen.insert(item.id.clone()) {
                return Err(Error::malformed(format!("duplicate manifest id `{}`", item.id)));
            }
            let path = href::package_path(&package_dir, &item.href);
            let data = match read_entry(&mut zip, &path)? {
                Some(data) => data,
                // Some packagers write percent-encoded names into the zip directory.
                None => read_entry(&mut zip, &href::normalize(&format!("{package_dir}{}", item.href)))?
                    .ok_or_else(|| {
                        Error::malformed(format!(
                            "manifest item `{}` refers to missing file `{path}`",
                            item.id
                        ))
                    })?,
            };
            manifest.push(ManifestEntry {
                id: item.id,
                href: item.href,
                media_type: item.media_type,
                properties: item.properties,
                fallback: item.fallback,
                path,
                data: data.into(),
            });
        }

        let mut spine = Vec::with_capacity(opf.spine.len());
        for itemref in opf.spine {
            if !seen.contains(&itemref.idref) {
                return Err(Error::malformed(format!(
                    "spine references unknown manifest id `{}`",
                    itemref.idref
                )));
            }
            spine.push(SpineEntry {
                idref: itemref.idref,
                linear: itemref.linear,
                properties: itemref.properties,
            });
        }

        let mut metadata = opf.metadata;
        metadata.cover_id = find_cover(&manifest, opf.epub2_cover.as_deref());
        if metadata.identifier.is_empty() {
            metadata.identifier = fallback_identifier(&metadata.title, &manifest, &spine);
            debug!(identifier = %metadata.identifier, "package has no dc:identifier");
        }

        let extras = read_extras(&mut zip, &manifest, &package_path)?;

        let mut archive = Archive::from_parts(
            package_path,
            opf.version,
            metadata,
            manifest,
            spine,
            Navigation::default(),
            extras,
        )
        .with_page_progression_direction(opf.page_progression_direction);
        archive.navigation = archive.load_navigation(opf.toc_id.as_deref())?;
        Ok(archive)
    }

    /// Assemble an archive and build its lookup indices.
    pub(crate) fn from_parts(
        package_path: String,
        version: String,
        metadata: Metadata,
        manifest: Vec<ManifestEntry>,
        spine: Vec<SpineEntry>,
        navigation: Navigation,
        extras: Vec<ExtraFile>,
    ) -> Self {
        let by_id = manifest
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        let by_path = manifest
            .iter()
            .enumerate()
            .map(|(i, e)| (e.path.clone(), i))
            .collect();
        Archive {
            package_path,
            version,
            metadata,
            manifest,
            spine,
            navigation,
            extras,
            page_progression_direction: None,
            by_id,
            by_path,
        }
    }

    pub(crate) fn with_page_progression_direction(mut self, direction: Option<String>) -> Self {
        self.page_progression_direction = direction;
        self
    }

    fn load_navigation(&self, toc_id: Option<&str>) -> Result<Navigation> {
        let ncx_id = toc_id
            .and_then(|id| self.entry(id))
            .or_else(|| {
                self.manifest
                    .iter()
                    .find(|e| e.media_type.eq_ignore_ascii_case(NCX_MEDIA_TYPE))
            })
            .map(|e| e.id.clone());
        let nav_doc_id = self
            .manifest
            .iter()
            .find(|e| e.has_property("nav"))
            .map(|e| e.id.clone());

        let ncx = ncx_id.as_deref().and_then(|id| self.entry(id));
        let nav_doc = nav_doc_id.as_deref().and_then(|id| self.entry(id));
        let points = if let Some(entry) = ncx {
            let text = decode_text(strip_bom(&entry.data), None);
            let raw = nav::parse_ncx(&text)?;
            self.resolve_points(&entry.path, raw)
        } else if let Some(entry) = nav_doc {
            let raw = nav::parse_nav_document(&entry.data);
            self.resolve_points(&entry.path, raw)
        } else {
            warn!("package has neither an NCX nor a navigation document");
            Vec::new()
        };

        Ok(Navigation {
            points,
            ncx_id,
            nav_doc_id,
        })
    }

    fn resolve_points(&self, nav_path: &str, raw: Vec<RawNavPoint>) -> Vec<NavPoint> {
        raw.into_iter()
            .map(|point| {
                let target = point.src.as_deref().and_then(|src| {
                    let resolved = href::resolve(nav_path, src)?;
                    match self.entry_by_path(&resolved.path) {
                        Some(entry) => Some(NavTarget {
                            id: entry.id.clone(),
                            anchor: resolved.fragment,
                        }),
                        None => {
                            warn!(label = %point.label, src, "navigation target not in manifest; keeping label only");
                            None
                        }
                    }
                });
                NavPoint {
                    label: point.label,
                    target,
                    children: self.resolve_points(nav_path, point.children),
                }
            })
            .collect()
    }

    /// Zip path of the package document.
    pub fn package_path(&self) -> &str {
        &self.package_path
    }

    /// Directory of the package document, with trailing slash (or empty).
    pub fn package_dir(&self) -> &str {
        href::parent_dir(&self.package_path)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_epub3(&self) -> bool {
        self.version.trim_start().starts_with('3')
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn manifest(&self) -> &[ManifestEntry] {
        &self.manifest
    }

    pub fn spine(&self) -> &[SpineEntry] {
        &self.spine
    }

    pub fn navigation(&self) -> &Navigation {
        &self.navigation
    }

    pub fn extras(&self) -> &[ExtraFile] {
        &self.extras
    }

    /// `ltr`, `rtl` or `default` from the spine, when declared.
    pub fn page_progression_direction(&self) -> Option<&str> {
        self.page_progression_direction.as_deref()
    }

    /// Manifest entry by id.
    pub fn entry(&self, id: &str) -> Option<&ManifestEntry> {
        self.by_id.get(id).map(|&i| &self.manifest[i])
    }

    /// Manifest entry by decoded container path.
    pub fn entry_by_path(&self, path: &str) -> Option<&ManifestEntry> {
        self.by_path.get(path).map(|&i| &self.manifest[i])
    }

    /// Manifest entry of the `index`th spine item.
    pub fn spine_entry(&self, index: usize) -> Option<&ManifestEntry> {
        self.spine.get(index).and_then(|s| self.entry(&s.idref))
    }

    /// Raw byte length of every spine document, in reading order.
    pub fn spine_sizes(&self) -> Vec<usize> {
        (0..self.spine.len())
            .map(|i| self.spine_entry(i).map_or(0, ManifestEntry::size))
            .collect()
    }
}

/// Read one zip entry; `Ok(None)` when it does not exist.
fn read_entry(zip: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match zip.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut data = Vec::with_capacity(capacity_hint(file.size()));
    file.read_to_end(&mut data)?;
    Ok(Some(data))
}

/// Largest buffer reserved up front from a zip entry's declared size. The
/// declared size is untrusted; larger entries grow as they are read.
const PREALLOC_LIMIT: u64 = 16 * 1024 * 1024;

fn capacity_hint(declared: u64) -> usize {
    usize::try_from(declared.min(PREALLOC_LIMIT)).unwrap_or(0)
}

/// Collect META-INF files other than container.xml. DRM markers are dropped.
fn read_extras(
    zip: &mut ZipArchive<Cursor<&[u8]>>,
    manifest: &[ManifestEntry],
    package_path: &str,
) -> Result<Vec<ExtraFile>> {
    let names: Vec<String> = zip
        .file_names()
        .filter(|n| n.starts_with("META-INF/") && !n.ends_with('/'))
        .map(str::to_string)
        .collect();

    let mut extras = Vec::new();
    for name in names {
        if name == CONTAINER_PATH
            || name == package_path
            || manifest.iter().any(|e| e.path == name)
        {
            continue;
        }
        if DRM_FILES.contains(&name.as_str()) {
            warn!(file = %name, "DRM metadata present; partitions will not carry it and may not open");
            continue;
        }
        if let Some(data) = read_entry(zip, &name)? {
            debug!(file = %name, "carrying META-INF file");
            extras.push(ExtraFile {
                path: name,
                data: data.into(),
            });
        }
    }
    extras.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(extras)
}

fn find_cover(manifest: &[ManifestEntry], epub2_cover: Option<&str>) -> Option<String> {
    if let Some(entry) = manifest.iter().find(|e| e.has_property("cover-image")) {
        return Some(entry.id.clone());
    }
    let hint = epub2_cover?;
    manifest
        .iter()
        .find(|e| e.id == hint)
        .or_else(|| manifest.iter().find(|e| e.href == hint))
        .map(|e| e.id.clone())
}

/// Stable identifier derived from the title and reading order.
fn fallback_identifier(title: &str, manifest: &[ManifestEntry], spine: &[SpineEntry]) -> String {
    let mut hasher = sha1_smol::Sha1::new();
    hasher.update(title.as_bytes());
    for item in spine {
        if let Some(entry) = manifest.iter().find(|e| e.id == item.idref) {
            hasher.update(entry.path.as_bytes());
        }
    }
    format!("urn:sha1:{}", hasher.digest())
}
