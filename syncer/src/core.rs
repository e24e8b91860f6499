use config::shared::{SyncConfig, WarehouseBackend};
use secrecy::ExposeSecret;
use tracing::{debug, info};
use websync::error::SyncError;
use websync::remote::{KiotVietClient, TransferApi, TransferPaging};
use websync::source::{PostgresSource, RelationalSource};
use websync::sync::{SyncOrchestrator, SyncReport, SyncSettings};
use websync::warehouse::Warehouse;
use websync::warehouse::bigquery::BigQueryWarehouse;
use websync::warehouse::memory::MemoryWarehouse;

use crate::error::SyncerResult;

/// Builds the source, the warehouse and the KiotViet client described by `sync_config` and runs
/// one sync over all of them.
///
/// Errors are only returned for failures before the run starts. Unit failures end up in the
/// returned [`SyncReport`].
pub async fn start_syncer_with_config(sync_config: SyncConfig) -> SyncerResult<SyncReport> {
    info!("starting syncer");

    log_config(&sync_config);

    let settings = SyncSettings::from_config(&sync_config);

    // One connection per concurrent page plus one for counting and describing.
    let max_connections = sync_config.relational.batch.max_concurrent_pages as u32 + 1;
    let source = PostgresSource::connect(&sync_config.source, max_connections).await?;

    let transfers = sync_config
        .kiotviet
        .as_ref()
        .map(|kiotviet| {
            Ok::<_, SyncError>((
                KiotVietClient::new(kiotviet)?,
                TransferPaging::from_config(kiotviet),
            ))
        })
        .transpose()?;

    // Static dispatch over the warehouse, hence one arm per backend.
    let report = match &sync_config.warehouse.backend {
        WarehouseBackend::Memory => {
            let warehouse = MemoryWarehouse::new(settings.partition);
            run(source, warehouse, transfers, settings).await
        }
        WarehouseBackend::BigQuery {
            project_id,
            service_account_key,
        } => {
            let warehouse = BigQueryWarehouse::new_with_key(
                project_id.clone(),
                service_account_key.expose_secret(),
                sync_config.warehouse.staging_dataset.clone(),
                sync_config.warehouse.staging_partition_expiration_days,
                settings.partition,
            )
            .await?;
            run(source, warehouse, transfers, settings).await
        }
    };

    Ok(report)
}

async fn run<S, W, A>(
    source: S,
    warehouse: W,
    transfers: Option<(A, TransferPaging)>,
    settings: SyncSettings,
) -> SyncReport
where
    S: RelationalSource + Clone + Send + Sync + 'static,
    W: Warehouse + Clone + Send + Sync + 'static,
    A: TransferApi + Clone + Send + Sync + 'static,
{
    SyncOrchestrator::new(source, warehouse, transfers, settings)
        .run()
        .await
}

fn log_config(config: &SyncConfig) {
    debug!(
        host = %config.source.host,
        port = config.source.port,
        dbname = %config.source.name,
        username = %config.source.username,
        tls_enabled = config.source.tls.enabled,
        "source config"
    );
    debug!(
        target_dataset = %config.warehouse.target_dataset,
        staging_dataset = %config.warehouse.staging_dataset,
        location = %config.warehouse.location,
        backend = match config.warehouse.backend {
            WarehouseBackend::Memory => "memory",
            WarehouseBackend::BigQuery { .. } => "big_query",
        },
        "warehouse config"
    );
    debug!(
        tables = ?config.relational.tables,
        batch_size = config.relational.batch.size,
        max_concurrent_pages = config.relational.batch.max_concurrent_pages,
        "relational config"
    );
    debug!(
        partition_utc_offset_hours = config.merge.partition_utc_offset_hours,
        partition_date = ?config.merge.partition_date,
        "merge config"
    );
    match &config.kiotviet {
        Some(kiotviet) => debug!(
            retailer = %kiotviet.retailer,
            list_page_size = kiotviet.list_page_size,
            page_batch_size = kiotviet.page_batch_size,
            lookback_days = kiotviet.lookback_days,
            utc_offset_hours = kiotviet.utc_offset_hours,
            max_concurrent_detail_fetches = kiotviet.max_concurrent_detail_fetches,
            "kiotviet config"
        ),
        None => info!("kiotviet not configured, skipping transfers"),
    }
}
