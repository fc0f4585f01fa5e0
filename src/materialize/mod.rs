//! Building one partition archive from a source archive and a descriptor.
//!
//! The partition keeps the slice of the spine it was given plus everything
//! those documents need to render: images, stylesheets (and what they import),
//! fonts, media, and non-spine documents reached through hyperlinks. The
//! cover image and the navigation files are always carried. References that
//! would leave the partition are rewritten so that nothing dangles.

mod links;
mod navigation;
mod references;

pub use links::LinkPolicy;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::archive::href::{self, Resolved};
use crate::archive::{Archive, ManifestEntry, NCX_MEDIA_TYPE, Navigation};
use crate::dom::Document;
use crate::error::{Error, Result};
use crate::plan::{PartitionDescriptor, check_range};
use crate::store::ContentStore;
use crate::util::decode_text;
use links::Edit;
use references::{DocumentRefs, RefKind};

/// Reading stylesheet added to every document when style injection is on.
pub const SPLIT_STYLESHEET: &str = "body {
  text-align: justify;
}

h1 {
  font-size: 160%;
  padding: 1em;
}

p {
  text-indent: 2em;
  margin: 0 0 1em 0;
}
";

const SPLIT_STYLESHEET_HREF: &str = "split-styles.css";

/// Per-partition options.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaterializeOptions {
    pub link_policy: LinkPolicy,
    /// Add `split-styles.css` and link it from every document.
    pub inject_styles: bool,
}

/// A derived archive plus what callers need to name and report it.
#[derive(Debug, Clone)]
pub struct Partition {
    pub archive: Archive,
    /// Partition title (without the book title).
    pub title: String,
    /// Suggested file name without extension.
    pub file_stem: String,
    /// 1-based first chapter number.
    pub first_chapter: usize,
    /// 1-based last chapter number.
    pub last_chapter: usize,
}

/// A scanned content document.
struct Scanned<'a> {
    entry: &'a ManifestEntry,
    doc: Arc<Document>,
    refs: DocumentRefs,
}

/// Build partition number `ordinal` (1-based) of `source`.
pub fn materialize(
    source: &Archive,
    store: &ContentStore<'_>,
    descriptor: &PartitionDescriptor,
    ordinal: usize,
    options: &MaterializeOptions,
) -> Result<Partition> {
    check_range(descriptor.start + 1, descriptor.end + 1, source.spine().len())?;
    let slice = &source.spine()[descriptor.start..=descriptor.end];

    let slice_ids: HashSet<&str> = slice.iter().map(|s| s.idref.as_str()).collect();
    let spine_ids: HashSet<&str> = source.spine().iter().map(|s| s.idref.as_str()).collect();
    let nav = source.navigation();

    let mut included: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&ManifestEntry> = VecDeque::new();

    for item in slice {
        let entry = source
            .entry(&item.idref)
            .ok_or_else(|| Error::malformed(format!("spine references unknown id `{}`", item.idref)))?;
        if !entry.is_markup() {
            return Err(Error::UnsupportedMediaType {
                id: entry.id.clone(),
                media_type: entry.media_type.clone(),
            });
        }
        included.insert(entry.id.as_str());
        queue.push_back(entry);
    }

    // Navigation files are regenerated by the serializer, so they are carried
    // but never scanned.
    for entry in [nav.ncx_id.as_deref(), nav.nav_doc_id.as_deref()]
        .into_iter()
        .flatten()
        .filter_map(|id| source.entry(id))
    {
        included.insert(entry.id.as_str());
    }
    if let Some(cover) = source.metadata().cover_id.as_deref().and_then(|id| source.entry(id))
        && (!spine_ids.contains(cover.id.as_str()) || slice_ids.contains(cover.id.as_str()))
        && included.insert(cover.id.as_str())
    {
        queue.push_back(cover);
    }

    // Discovery: walk references transitively from the slice.
    let mut scanned: Vec<Scanned<'_>> = Vec::new();
    while let Some(entry) = queue.pop_front() {
        let mut targets: Vec<Resolved> = Vec::new();

        if entry.is_markup() {
            let doc = store.resolve(&entry.id)?;
            let refs = references::scan_document(doc.tree(), &entry.path);
            targets.extend(refs.attrs.iter().map(|r| r.target.clone()));
            targets.extend(refs.embedded.iter().cloned());
            scanned.push(Scanned { entry, doc, refs });
        } else if entry.is_stylesheet() {
            let css = decode_text(&entry.data, None);
            targets.extend(
                references::css_urls(&css)
                    .iter()
                    .filter_map(|url| href::resolve(&entry.path, url)),
            );
        }

        for target in &targets {
            let Some(found) = source.entry_by_path(&target.path) else {
                warn!(
                    document = %entry.path,
                    missing = %target.path,
                    "referenced file is not in the source manifest"
                );
                continue;
            };
            let foreign_chapter =
                spine_ids.contains(found.id.as_str()) && !slice_ids.contains(found.id.as_str());
            if !foreign_chapter && included.insert(found.id.as_str()) {
                queue.push_back(found);
            }
        }

        if let Some(fallback) = entry.fallback.as_deref().and_then(|id| source.entry(id))
            && included.insert(fallback.id.as_str())
        {
            queue.push_back(fallback);
        }
    }

    // Injected stylesheet location, if requested.
    let stylesheet = options
        .inject_styles
        .then(|| split_stylesheet_entry(source));

    // Rewriting: only documents that actually change get new bytes.
    let mut rewritten: HashMap<&str, Arc<[u8]>> = HashMap::new();
    for Scanned { entry, doc, refs } in &scanned {
        if nav.nav_doc_id.as_deref() == Some(entry.id.as_str()) {
            continue;
        }

        let mut edits = Vec::new();
        for reference in &refs.attrs {
            let target = source.entry_by_path(&reference.target.path);
            let in_partition = target.is_some_and(|t| included.contains(t.id.as_str()));
            if in_partition {
                continue;
            }
            match reference.kind {
                RefKind::Hyperlink => {
                    debug!(
                        document = %entry.path,
                        target = %reference.target.path,
                        "rewriting link that leaves the partition"
                    );
                    edits.push(Edit::Unlink(reference.node));
                }
                RefKind::Embed if target.is_some() => {
                    debug!(
                        document = %entry.path,
                        target = %reference.target.path,
                        "dropping embedded chapter from another partition"
                    );
                    edits.push(Edit::DropAttr(reference.node, reference.attr));
                }
                RefKind::Embed => {}
            }
        }

        if edits.is_empty() && stylesheet.is_none() {
            continue;
        }

        let mut doc = Document::clone(doc);
        links::apply(&mut doc, &edits, options.link_policy);
        if let Some(css) = &stylesheet {
            doc.append_stylesheet(&href::relative(&entry.path, &css.path));
        }
        rewritten.insert(entry.id.as_str(), Arc::from(doc.to_xhtml().into_bytes()));
    }

    let mut manifest: Vec<ManifestEntry> = source
        .manifest()
        .iter()
        .filter(|e| included.contains(e.id.as_str()))
        .map(|e| {
            let mut entry = e.clone();
            if let Some(data) = rewritten.get(e.id.as_str()) {
                entry.data = Arc::clone(data);
            }
            if entry
                .fallback
                .as_deref()
                .is_some_and(|f| !included.contains(f))
            {
                entry.fallback = None;
            }
            entry
        })
        .collect();
    if let Some(css) = stylesheet {
        manifest.push(css);
    }

    // Navigation scoped to what the partition holds.
    let keep: HashSet<&str> = manifest.iter().map(|e| e.id.as_str()).collect();
    let mut points = navigation::scope_points(&nav.points, &keep);
    if points.is_empty() {
        let mut chapters = Vec::with_capacity(slice.len());
        for (offset, item) in slice.iter().enumerate() {
            let label = store
                .resolve(&item.idref)?
                .title()
                .or_else(|| {
                    source
                        .entry(&item.idref)
                        .and_then(|e| navigation::filename_label(&e.path))
                })
                .unwrap_or_else(|| format!("Chapter {}", descriptor.start + offset + 1));
            chapters.push((item.idref.clone(), label));
        }
        debug!(ordinal, "no navigation survived; synthesizing one entry per chapter");
        points = navigation::synthesize(&chapters);
    }

    let mut ncx_id = nav.ncx_id.clone();
    if ncx_id.is_none() && nav.nav_doc_id.is_none() {
        let ncx = generated_ncx_entry(source, &manifest);
        ncx_id = Some(ncx.id.clone());
        manifest.push(ncx);
    }
    let navigation = Navigation {
        points,
        ncx_id,
        nav_doc_id: nav.nav_doc_id.clone(),
    };

    // Titles and identity.
    let first_id = slice[0].idref.as_str();
    let override_title = descriptor
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let title = match override_title {
        Some(t) => t.to_string(),
        None => navigation::label_for(&nav.points, first_id)
            .or_else(|| store.resolve(first_id).ok().and_then(|d| d.title()))
            .unwrap_or_else(|| format!("Part {ordinal}")),
    };

    let mut metadata = source.metadata().clone();
    metadata.title = match override_title {
        Some(t) => t.to_string(),
        None if metadata.title.trim().is_empty() => title.clone(),
        None => format!("{}: {}", metadata.title.trim(), title),
    };
    metadata.identifier = format!("{}-part-{}", metadata.identifier, ordinal);
    if source.is_epub3() {
        metadata.modified = Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());
    }

    let file_stem = match override_title {
        Some(t) => t.split_whitespace().collect::<Vec<_>>().join("_"),
        None => format!("{}_{}", descriptor.start + 1, descriptor.end + 1),
    };

    debug!(
        ordinal,
        %title,
        chapters = slice.len(),
        resources = manifest.len(),
        rewritten = rewritten.len(),
        "materialized partition"
    );

    let archive = Archive::from_parts(
        source.package_path().to_string(),
        source.version().to_string(),
        metadata,
        manifest,
        slice.to_vec(),
        navigation,
        source.extras().to_vec(),
    )
    .with_page_progression_direction(source.page_progression_direction().map(str::to_string));

    Ok(Partition {
        archive,
        title,
        file_stem,
        first_chapter: descriptor.start + 1,
        last_chapter: descriptor.end + 1,
    })
}

/// `split-styles.css` next to the package document, with an id and path that
/// do not collide with the source manifest.
fn split_stylesheet_entry(source: &Archive) -> ManifestEntry {
    let (id, href) = unique_name(source, "split-styles", SPLIT_STYLESHEET_HREF);
    ManifestEntry {
        path: href::package_path(source.package_dir(), &href),
        id,
        href,
        media_type: "text/css".to_string(),
        properties: None,
        fallback: None,
        data: Arc::from(SPLIT_STYLESHEET.as_bytes()),
    }
}

/// Placeholder NCX for books that carry no navigation file at all; the
/// serializer writes its content.
fn generated_ncx_entry(source: &Archive, manifest: &[ManifestEntry]) -> ManifestEntry {
    let (mut id, mut href) = unique_name(source, "ncx", "toc.ncx");
    if manifest.iter().any(|e| e.id == id) {
        id = format!("{id}-generated");
        href = format!("generated-{href}");
    }
    ManifestEntry {
        path: href::package_path(source.package_dir(), &href),
        id,
        href,
        media_type: NCX_MEDIA_TYPE.to_string(),
        properties: None,
        fallback: None,
        data: Arc::from(Vec::new()),
    }
}

fn unique_name(source: &Archive, id: &str, href: &str) -> (String, String) {
    let mut n = 0;
    loop {
        let (candidate_id, candidate_href) = match n {
            0 => (id.to_string(), href.to_string()),
            _ => (format!("{id}-{n}"), format!("{n}-{href}")),
        };
        let path = href::package_path(source.package_dir(), &candidate_href);
        if source.entry(&candidate_id).is_none() && source.entry_by_path(&path).is_none() {
            return (candidate_id, candidate_href);
        }
        n += 1;
    }
}
