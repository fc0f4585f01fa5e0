//! Split configuration.

use crate::error::{Error, Result};
use crate::materialize::{LinkPolicy, MaterializeOptions};
use crate::plan::{SizeLimit, SplitPolicy};

/// What to split and how.
///
/// Exactly one of `split_size` and `single_range` must be set.
///
/// ```
/// use epub_splitter::{SizeLimit, SplitConfig};
///
/// let config = SplitConfig::by_size(SizeLimit::Chapters(10)).with_styles(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitConfig {
    /// Cover the whole book with partitions no larger than this.
    pub split_size: Option<SizeLimit>,
    /// Extract a single 1-based inclusive chapter range.
    pub single_range: Option<(usize, usize)>,
    /// Title override for range mode; also names the output file.
    pub title: Option<String>,
    pub link_policy: LinkPolicy,
    /// Add the reading stylesheet to every partition.
    pub inject_styles: bool,
    /// Build partitions on worker threads.
    pub parallel: bool,
}

impl SplitConfig {
    pub fn by_size(limit: SizeLimit) -> Self {
        Self {
            split_size: Some(limit),
            ..Self::default()
        }
    }

    pub fn by_range(start: usize, end: usize) -> Self {
        Self {
            single_range: Some((start, end)),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_link_policy(mut self, policy: LinkPolicy) -> Self {
        self.link_policy = policy;
        self
    }

    pub fn with_styles(mut self, inject: bool) -> Self {
        self.inject_styles = inject;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Check the option combination without looking at any book.
    pub fn validate(&self) -> Result<()> {
        match (&self.split_size, &self.single_range) {
            (None, None) => {
                return Err(Error::config(
                    "split_size",
                    "either a split size or a single range is required",
                ));
            }
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "single_range",
                    "cannot be combined with a split size",
                ));
            }
            _ => {}
        }

        match self.split_size {
            Some(SizeLimit::Bytes(0)) => {
                return Err(Error::config("split_size", "byte limit must be positive"));
            }
            Some(SizeLimit::Chapters(0)) => {
                return Err(Error::config("split_size", "chapter count must be positive"));
            }
            _ => {}
        }

        if self.title.is_some() && self.single_range.is_none() {
            return Err(Error::config(
                "title",
                "a title can only be given together with a single range",
            ));
        }
        if self
            .title
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return Err(Error::config("title", "must not be blank"));
        }

        Ok(())
    }

    /// The planner policy this configuration describes. Call after [`validate`](Self::validate).
    pub fn policy(&self) -> Result<SplitPolicy> {
        match (self.split_size, self.single_range) {
            (Some(limit), None) => Ok(SplitPolicy::BySize(limit)),
            (None, Some((start, end))) => Ok(SplitPolicy::ByRange {
                start,
                end,
                title: self.title.clone(),
            }),
            _ => {
                self.validate()?;
                Err(Error::config("split_size", "no policy selected"))
            }
        }
    }

    pub fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            link_policy: self.link_policy,
            inject_styles: self.inject_styles,
        }
    }
}
