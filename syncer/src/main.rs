//! Sync job binary.
//!
//! Loads configuration, initializes tracing and runs every configured sync unit once. Per unit
//! failures are logged and do not change the exit status; only startup failures do.

use config::shared::SyncConfig;
use telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::configuration::load_syncer_config;
use crate::core::start_syncer_with_config;
use crate::error::{SyncerError, SyncerResult};

mod configuration;
mod core;
mod error;

fn main() -> SyncerResult<()> {
    let sync_config = load_syncer_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(SyncerError::config)?;

    install_crypto_provider();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(sync_config))?;

    Ok(())
}

/// Selects aws-lc-rs as the process wide rustls provider, since both BigQuery and the HTTP
/// clients pull in TLS and feature unification enables more than one provider.
fn install_crypto_provider() {
    // Fails only when a provider is already installed, which is fine.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

async fn async_main(sync_config: SyncConfig) -> SyncerResult<()> {
    match start_syncer_with_config(sync_config).await {
        Ok(report) => {
            info!(
                units = report.units.len(),
                failed = report.failed_units().count(),
                "syncer finished"
            );

            Ok(())
        }
        Err(err) => {
            error!("{}", err.render_report());

            Err(err)
        }
    }
}
