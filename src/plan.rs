//! Grouping spine documents into partitions.

use tracing::debug;

use crate::error::{Error, Result};

/// Upper bound on how much of the spine goes into one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    /// Raw byte length of the spine documents.
    Bytes(u64),
    /// Number of spine documents.
    Chapters(usize),
}

/// How to partition a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Cover the whole spine with partitions no larger than the limit.
    BySize(SizeLimit),
    /// Extract one contiguous, 1-based inclusive chapter range.
    ByRange {
        start: usize,
        end: usize,
        title: Option<String>,
    },
}

/// One partition: a contiguous, inclusive slice of spine indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    /// First spine index (0-based).
    pub start: usize,
    /// Last spine index (0-based, inclusive).
    pub end: usize,
    /// Title override, only ever set in range mode.
    pub title: Option<String>,
}

impl PartitionDescriptor {
    /// Number of spine documents in the partition (always at least one).
    pub fn chapter_count(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

pub type PartitionPlan = Vec<PartitionDescriptor>;

/// Plan partitions for a spine whose documents have the given raw sizes.
pub fn plan(policy: &SplitPolicy, sizes: &[usize]) -> Result<PartitionPlan> {
    if sizes.is_empty() {
        return Err(Error::malformed("spine is empty"));
    }

    match policy {
        SplitPolicy::BySize(SizeLimit::Bytes(limit)) => {
            let weights: Vec<u64> = sizes.iter().map(|&s| s as u64).collect();
            Ok(plan_by_weight(&weights, *limit))
        }
        SplitPolicy::BySize(SizeLimit::Chapters(count)) => {
            let weights = vec![1u64; sizes.len()];
            Ok(plan_by_weight(&weights, *count as u64))
        }
        SplitPolicy::ByRange { start, end, title } => {
            check_range(*start, *end, sizes.len())?;
            debug!(start, end, "planned single range");
            Ok(vec![PartitionDescriptor {
                start: start - 1,
                end: end - 1,
                title: title.clone(),
            }])
        }
    }
}

/// Validate a 1-based inclusive range against a spine of `len` entries.
pub fn check_range(start: usize, end: usize, len: usize) -> Result<()> {
    if start < 1 || start > end || end > len {
        return Err(Error::InvalidRange { start, end, len });
    }
    Ok(())
}

/// Greedy walk: close the current partition before an entry that would push
/// it over `limit`, unless the partition is still empty.
fn plan_by_weight(weights: &[u64], limit: u64) -> PartitionPlan {
    let mut partitions = Vec::new();
    let mut start = 0;
    let mut total = 0u64;

    for (i, &weight) in weights.iter().enumerate() {
        if i > start && total.saturating_add(weight) > limit {
            debug!(start, end = i - 1, total, "closing partition");
            partitions.push(PartitionDescriptor {
                start,
                end: i - 1,
                title: None,
            });
            start = i;
            total = 0;
        }
        total = total.saturating_add(weight);
    }

    partitions.push(PartitionDescriptor {
        start,
        end: weights.len() - 1,
        title: None,
    });
    partitions
}
