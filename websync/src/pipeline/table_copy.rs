use std::sync::Arc;
use std::time::Instant;

use config::shared::BatchConfig;
use tracing::{debug, error, info};

use crate::concurrency::BoundedTaskGroup;
use crate::error::{SyncError, SyncResult};
use crate::merge::TableRef;
use crate::source::RelationalSource;
use crate::types::TableDescriptor;
use crate::warehouse::Warehouse;

/// Outcome of copying one table into its staging table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableCopyReport {
    /// Number of page tasks launched.
    pub pages: u64,
    /// Pages whose fetch or insert failed. Their rows are missing from staging.
    pub failed_pages: u64,
    pub rows_staged: u64,
    /// The failures behind `failed_pages`, aggregated.
    pub page_errors: Option<SyncError>,
}

/// Number of pages needed to read `total_rows` rows `batch_size` at a time.
///
/// There is always one page more than the full pages, so an exact multiple of `batch_size` ends
/// with an empty page.
pub fn page_count(total_rows: u64, batch_size: u64) -> u64 {
    total_rows / batch_size.max(1) + 1
}

/// Copies the table described by `descriptor` from `source` into the `staging` table.
///
/// The table is split into [`page_count`] pages read at offsets `batch.size * index`, with at most
/// `batch.max_concurrent_pages` pages in flight. A page whose fetch or insert fails is logged and
/// counted in the report without affecting the other pages; only failing to count the rows of the
/// table is returned as an error.
pub async fn table_copy<S, W>(
    source: S,
    warehouse: W,
    descriptor: Arc<TableDescriptor>,
    staging: TableRef,
    batch: &BatchConfig,
) -> SyncResult<TableCopyReport>
where
    S: RelationalSource + Clone + Send + Sync + 'static,
    W: Warehouse + Clone + Send + Sync + 'static,
{
    let start = Instant::now();
    let batch_size = batch.size.max(1);

    let total_rows = source.total_row_count(&descriptor.name).await?;
    let pages = page_count(total_rows, batch_size);

    info!(
        table = %descriptor.name,
        total_rows,
        pages,
        batch_size,
        max_concurrent_pages = batch.max_concurrent_pages,
        "starting table copy"
    );

    let mut group = BoundedTaskGroup::new(batch.max_concurrent_pages);
    for page in 0..pages {
        let offset = batch_size * page;
        let source = source.clone();
        let warehouse = warehouse.clone();
        let descriptor = descriptor.clone();
        let staging = staging.clone();

        group
            .spawn(async move {
                let result = copy_page(
                    &source,
                    &warehouse,
                    &descriptor,
                    &staging,
                    batch_size,
                    offset,
                )
                .await;

                (offset, result)
            })
            .await?;
    }

    let mut report = TableCopyReport {
        pages,
        ..TableCopyReport::default()
    };
    let mut page_errors = Vec::new();

    for result in group.join_all().await {
        match result {
            Ok((_, Ok(rows))) => report.rows_staged += rows,
            Ok((offset, Err(err))) => {
                error!(
                    table = %descriptor.name,
                    offset,
                    limit = batch_size,
                    error = %err,
                    "page copy failed, skipping page"
                );
                report.failed_pages += 1;
                page_errors.push(err);
            }
            Err(err) => {
                error!(table = %descriptor.name, error = %err, "page copy task failed");
                report.failed_pages += 1;
                page_errors.push(err);
            }
        }
    }

    if !page_errors.is_empty() {
        report.page_errors = Some(SyncError::from(page_errors));
    }

    info!(
        table = %descriptor.name,
        pages = report.pages,
        failed_pages = report.failed_pages,
        rows_staged = report.rows_staged,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "finished table copy"
    );

    Ok(report)
}

async fn copy_page<S, W>(
    source: &S,
    warehouse: &W,
    descriptor: &TableDescriptor,
    staging: &TableRef,
    limit: u64,
    offset: u64,
) -> SyncResult<u64>
where
    S: RelationalSource,
    W: Warehouse,
{
    let rows = source.rows(descriptor, limit, offset).await?;
    let count = rows.len() as u64;

    warehouse.insert_rows(staging, descriptor, rows).await?;

    debug!(table = %descriptor.name, offset, rows = count, "staged page");

    Ok(count)
}
