//! Error types for splitting operations.

use thiserror::Error;

/// Errors that can occur while loading, partitioning or emitting an EPUB.
#[derive(Error, Debug)]
pub enum Error {
    /// The input container is unreadable or internally inconsistent.
    #[error("malformed EPUB: {0}")]
    MalformedArchive(String),

    /// A chapter range outside the spine, or with start after end.
    #[error("invalid chapter range {start}-{end} (book has {len} chapters)")]
    InvalidRange { start: usize, end: usize, len: usize },

    /// Caller supplied an unusable combination of options.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },

    /// A resource could not be treated as a content document.
    #[error("manifest item `{id}` has media type `{media_type}`, not a content document")]
    UnsupportedMediaType { id: String, media_type: String },

    /// A derived archive references something it does not contain.
    #[error("internal consistency error while serializing: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl Error {
    pub(crate) fn malformed(context: impl Into<String>) -> Self {
        Error::MalformedArchive(context.into())
    }

    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
