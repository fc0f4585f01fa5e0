//! # epub-splitter
//!
//! Split a large EPUB into smaller, independently valid EPUBs, each holding a
//! contiguous run of the original's chapters.
//!
//! ## Features
//!
//! - Partition by raw size, by chapter count, or extract one chapter range
//! - Each part carries the resources its chapters use (images, stylesheets,
//!   fonts, media) plus the cover image
//! - Navigation (NCX and EPUB 3 nav documents) is scoped to each part
//! - Links into other parts are neutralized so nothing dangles
//!
//! ## Quick Start
//!
//! ```no_run
//! use epub_splitter::{SizeLimit, SplitConfig, split};
//!
//! let bytes = std::fs::read("book.epub")?;
//! let config = SplitConfig::by_size(SizeLimit::Chapters(10));
//! for part in split(&bytes, &config)? {
//!     std::fs::write(format!("book_{}.epub", part.file_stem), &part.data)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Working with the pieces
//!
//! [`split`] is a thin pipeline over the lower-level API, which can be used
//! directly to inspect a plan before building anything:
//!
//! ```no_run
//! use epub_splitter::{
//!     Archive, ContentStore, MaterializeOptions, SizeLimit, SplitPolicy, emit, materialize, plan,
//! };
//!
//! let archive = Archive::load(&std::fs::read("book.epub")?)?;
//! let parts = plan(&SplitPolicy::BySize(SizeLimit::Bytes(300_000)), &archive.spine_sizes())?;
//! let store = ContentStore::new(&archive);
//! let first = materialize(&archive, &store, &parts[0], 1, &MaterializeOptions::default())?;
//! let bytes = emit(&first.archive)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod archive;
pub mod config;
pub mod dom;
pub mod error;
pub mod materialize;
pub mod plan;
pub mod serialize;
pub mod split;
pub mod store;
pub(crate) mod util;

pub use archive::{Archive, ManifestEntry, Metadata, NavPoint, NavTarget, Navigation, SpineEntry};
pub use config::SplitConfig;
pub use error::{Error, Result};
pub use materialize::{LinkPolicy, MaterializeOptions, Partition, materialize};
pub use plan::{PartitionDescriptor, PartitionPlan, SizeLimit, SplitPolicy, plan};
pub use serialize::emit;
pub use split::{SplitOutput, split, split_archive};
pub use store::ContentStore;
