//! Lazily parsed content documents.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::trace;

use crate::archive::Archive;
use crate::dom::Document;
use crate::error::{Error, Result};

/// Parses markup manifest entries on first access and caches the result.
///
/// One store belongs to one [`Archive`]. Cells are filled at most once, so a
/// store can be shared across threads without further locking.
pub struct ContentStore<'a> {
    archive: &'a Archive,
    cells: HashMap<&'a str, OnceLock<Arc<Document>>>,
}

impl<'a> ContentStore<'a> {
    pub fn new(archive: &'a Archive) -> Self {
        let cells = archive
            .manifest()
            .iter()
            .filter(|e| e.is_markup())
            .map(|e| (e.id.as_str(), OnceLock::new()))
            .collect();
        Self { archive, cells }
    }

    pub fn archive(&self) -> &'a Archive {
        self.archive
    }

    /// Parsed document for a manifest id. Repeated calls return the same `Arc`.
    pub fn resolve(&self, id: &str) -> Result<Arc<Document>> {
        let entry = self
            .archive
            .entry(id)
            .ok_or_else(|| Error::malformed(format!("unknown manifest id `{id}`")))?;
        let cell = self
            .cells
            .get(id)
            .ok_or_else(|| Error::UnsupportedMediaType {
                id: id.to_string(),
                media_type: entry.media_type.clone(),
            })?;

        let doc = cell.get_or_init(|| {
            trace!(id, path = %entry.path, "parsing content document");
            Arc::new(Document::parse(&entry.data))
        });
        Ok(Arc::clone(doc))
    }

    /// Number of documents parsed so far.
    pub fn parsed_count(&self) -> usize {
        self.cells.values().filter(|c| c.get().is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use zip::write::{SimpleFileOptions, ZipWriter};

    use super::*;

    fn archive() -> Archive {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let files = [
            (
                "META-INF/container.xml",
                r#"<container><rootfiles><rootfile full-path="content.opf"/></rootfiles></container>"#,
            ),
            (
                "content.opf",
                r#"<package version="3.0"><metadata/><manifest>
<item id="a" href="a.xhtml" media-type="application/xhtml+xml"/>
<item id="css" href="s.css" media-type="text/css"/>
</manifest><spine><itemref idref="a"/></spine></package>"#,
            ),
            ("a.xhtml", "<html><head><title>A</title></head><body/></html>"),
            ("s.css", "p {}"),
        ];
        for (name, content) in files {
            zip.start_file(name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        Archive::load(&zip.finish().unwrap().into_inner()).unwrap()
    }

    #[test]
    fn test_resolve_is_cached() {
        let archive = archive();
        let store = ContentStore::new(&archive);
        assert_eq!(store.parsed_count(), 0);

        let first = store.resolve("a").unwrap();
        let second = store.resolve("a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.title().as_deref(), Some("A"));
        assert_eq!(store.parsed_count(), 1);
    }

    #[test]
    fn test_resolve_rejects_non_markup() {
        let archive = archive();
        let store = ContentStore::new(&archive);
        assert!(matches!(
            store.resolve("css"),
            Err(Error::UnsupportedMediaType { ref media_type, .. }) if media_type == "text/css"
        ));
        assert!(matches!(store.resolve("zzz"), Err(Error::MalformedArchive(_))));
    }

    #[test]
    fn test_store_is_sync() {
        fn assert_sync<T: Sync>() {}
        assert_sync::<ContentStore<'_>>();
    }
}
