use config::load_config;
use config::shared::SyncConfig;

use crate::error::{SyncerError, SyncerResult};

/// Loads and validates the sync configuration from the `configuration` directory and `APP_`
/// environment variables.
pub fn load_syncer_config() -> SyncerResult<SyncConfig> {
    let config = load_config::<SyncConfig>().map_err(SyncerError::config)?;
    config.validate().map_err(SyncerError::config)?;

    Ok(config)
}
