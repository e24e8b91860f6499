use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings controlling which staging partition is merged into the target tables.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MergeConfig {
    /// UTC offset, in whole hours, of the day boundary used for the `_date` partition.
    ///
    /// Rows are stamped with the current date at this offset when staged, and the merge only
    /// reads the staging partition of the current date at the same offset.
    #[serde(default = "default_partition_utc_offset_hours")]
    pub partition_utc_offset_hours: i8,
    /// Merges a fixed staging partition instead of the current day. Used for backfills.
    #[serde(default)]
    pub partition_date: Option<NaiveDate>,
}

impl MergeConfig {
    pub const DEFAULT_PARTITION_UTC_OFFSET_HOURS: i8 = 7;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(-12..=14).contains(&self.partition_utc_offset_hours) {
            return Err(ValidationError::invalid(
                "merge.partition_utc_offset_hours",
                "must be between -12 and 14",
            ));
        }

        Ok(())
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            partition_utc_offset_hours: default_partition_utc_offset_hours(),
            partition_date: None,
        }
    }
}

fn default_partition_utc_offset_hours() -> i8 {
    MergeConfig::DEFAULT_PARTITION_UTC_OFFSET_HOURS
}
