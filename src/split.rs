//! End-to-end splitting: bytes in, partition archives out.

use std::thread;

use tracing::{debug, info};

use crate::archive::Archive;
use crate::config::SplitConfig;
use crate::error::{Error, Result};
use crate::materialize::{MaterializeOptions, materialize};
use crate::plan::{PartitionDescriptor, check_range, plan};
use crate::serialize::emit;
use crate::store::ContentStore;

/// One finished partition.
#[derive(Debug, Clone)]
pub struct SplitOutput {
    /// Suggested file name without extension.
    pub file_stem: String,
    /// Partition title.
    pub title: String,
    /// 1-based first chapter number.
    pub first_chapter: usize,
    /// 1-based last chapter number.
    pub last_chapter: usize,
    /// The EPUB file.
    pub data: Vec<u8>,
}

/// Split an EPUB according to `config`.
///
/// Outputs are returned in reading order, and only if every partition was
/// built; any error aborts the whole split.
///
/// ```no_run
/// use epub_splitter::{SizeLimit, SplitConfig, split};
///
/// let bytes = std::fs::read("book.epub")?;
/// for part in split(&bytes, &SplitConfig::by_size(SizeLimit::Bytes(512 * 1024)))? {
///     std::fs::write(format!("book_{}.epub", part.file_stem), &part.data)?;
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn split(bytes: &[u8], config: &SplitConfig) -> Result<Vec<SplitOutput>> {
    config.validate()?;
    let archive = Archive::load(bytes)?;
    split_archive(&archive, config)
}

/// Split an already loaded archive.
pub fn split_archive(archive: &Archive, config: &SplitConfig) -> Result<Vec<SplitOutput>> {
    config.validate()?;
    let spine_len = archive.spine().len();
    if let Some((start, end)) = config.single_range {
        check_range(start, end, spine_len)?;
    }

    let descriptors = plan(&config.policy()?, &archive.spine_sizes())?;
    debug!(
        chapters = spine_len,
        partitions = descriptors.len(),
        "planned split"
    );

    let store = ContentStore::new(archive);
    let options = config.materialize_options();

    let outputs = if config.parallel && descriptors.len() > 1 {
        build_parallel(archive, &store, &descriptors, &options)?
    } else {
        descriptors
            .iter()
            .enumerate()
            .map(|(i, descriptor)| build_one(archive, &store, descriptor, i + 1, &options))
            .collect::<Result<Vec<_>>>()?
    };

    info!(
        partitions = outputs.len(),
        parsed_documents = store.parsed_count(),
        "split complete"
    );
    Ok(outputs)
}

fn build_one(
    archive: &Archive,
    store: &ContentStore<'_>,
    descriptor: &PartitionDescriptor,
    ordinal: usize,
    options: &MaterializeOptions,
) -> Result<SplitOutput> {
    let partition = materialize(archive, store, descriptor, ordinal, options)?;
    let data = emit(&partition.archive)?;
    info!(
        ordinal,
        title = %partition.title,
        chapters = %format!("{}-{}", partition.first_chapter, partition.last_chapter),
        bytes = data.len(),
        "built partition"
    );
    Ok(SplitOutput {
        file_stem: partition.file_stem,
        title: partition.title,
        first_chapter: partition.first_chapter,
        last_chapter: partition.last_chapter,
        data,
    })
}

/// One scoped worker per available core, each taking every n-th descriptor.
fn build_parallel(
    archive: &Archive,
    store: &ContentStore<'_>,
    descriptors: &[PartitionDescriptor],
    options: &MaterializeOptions,
) -> Result<Vec<SplitOutput>> {
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(descriptors.len())
        .max(1);
    debug!(workers, "building partitions in parallel");

    let mut slots: Vec<Option<Result<SplitOutput>>> = Vec::new();
    slots.resize_with(descriptors.len(), || None);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                scope.spawn(move || {
                    descriptors
                        .iter()
                        .enumerate()
                        .skip(worker)
                        .step_by(workers)
                        .map(|(i, descriptor)| {
                            (i, build_one(archive, store, descriptor, i + 1, options))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(results) => {
                    for (i, result) in results {
                        slots[i] = Some(result);
                    }
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
    });

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(Error::Serialization("partition was not built".into()))))
        .collect()
}
