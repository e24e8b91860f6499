use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Paging settings for copying a relational table into staging.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Number of rows fetched and inserted per page.
    #[serde(default = "default_batch_size")]
    pub size: u64,
    /// Maximum number of pages copied at the same time.
    #[serde(default = "default_max_concurrent_pages")]
    pub max_concurrent_pages: usize,
}

impl BatchConfig {
    pub const DEFAULT_SIZE: u64 = 1000;

    pub const DEFAULT_MAX_CONCURRENT_PAGES: usize = 5;

    /// Ensures both the page size and the concurrency cap are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.size == 0 {
            return Err(ValidationError::invalid(
                "relational.batch.size",
                "must be greater than 0",
            ));
        }

        if self.max_concurrent_pages == 0 {
            return Err(ValidationError::invalid(
                "relational.batch.max_concurrent_pages",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_batch_size(),
            max_concurrent_pages: default_max_concurrent_pages(),
        }
    }
}

fn default_batch_size() -> u64 {
    BatchConfig::DEFAULT_SIZE
}

fn default_max_concurrent_pages() -> usize {
    BatchConfig::DEFAULT_MAX_CONCURRENT_PAGES
}
