use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Where staged and merged rows are written.
///
/// This intentionally does not implement `Serialize` to avoid leaking the service account key.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WarehouseConfig {
    /// Dataset holding the long lived, merged tables.
    pub target_dataset: String,
    /// Dataset holding the short lived staging tables.
    pub staging_dataset: String,
    /// Location that merge query jobs run in.
    #[serde(default = "default_location")]
    pub location: String,
    /// Days after which staging partitions expire.
    #[serde(default = "default_staging_partition_expiration_days")]
    pub staging_partition_expiration_days: u32,
    pub backend: WarehouseBackend,
}

/// Warehouse implementation to write to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseBackend {
    /// Keeps every table in process memory. Useful for dry runs.
    Memory,
    BigQuery {
        /// Google Cloud project identifier.
        project_id: String,
        /// Service account key JSON used to authenticate with BigQuery.
        service_account_key: SecretString,
    },
}

impl WarehouseConfig {
    pub const DEFAULT_LOCATION: &'static str = "US";

    pub const DEFAULT_STAGING_PARTITION_EXPIRATION_DAYS: u32 = 7;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.target_dataset.is_empty() {
            return Err(ValidationError::invalid(
                "warehouse.target_dataset",
                "must not be empty",
            ));
        }

        if self.staging_dataset.is_empty() {
            return Err(ValidationError::invalid(
                "warehouse.staging_dataset",
                "must not be empty",
            ));
        }

        if self.target_dataset == self.staging_dataset {
            return Err(ValidationError::invalid(
                "warehouse.staging_dataset",
                "must differ from `target_dataset`",
            ));
        }

        if self.staging_partition_expiration_days == 0 {
            return Err(ValidationError::invalid(
                "warehouse.staging_partition_expiration_days",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn default_location() -> String {
    WarehouseConfig::DEFAULT_LOCATION.to_owned()
}

fn default_staging_partition_expiration_days() -> u32 {
    WarehouseConfig::DEFAULT_STAGING_PARTITION_EXPIRATION_DAYS
}
