use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use config::shared::KiotVietConfig;
use tracing::{error, info, warn};

use crate::concurrency::BoundedTaskGroup;
use crate::error::{SyncError, SyncResult};
use crate::merge::TableRef;
use crate::remote::client::TransferApi;
use crate::remote::flatten::{transfer_rows, transfers_descriptor};
use crate::remote::models::{Transfer, TransferDetails};
use crate::warehouse::Warehouse;

/// Outcome of staging transfers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferSyncReport {
    /// Page batches staged successfully.
    pub page_batches: u64,
    pub transfers: u64,
    pub rows_staged: u64,
    /// Transfers staged without their back office details.
    pub failed_detail_fetches: u64,
    /// The failures behind `failed_detail_fetches`, aggregated.
    pub detail_errors: Option<SyncError>,
    /// Whether listing stopped at a transfer older than the cutoff.
    pub reached_cutoff: bool,
    /// Whether staging stopped at a page batch that could not be staged.
    pub aborted: bool,
}

/// Paging settings for [`TransferSync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPaging {
    /// Transfers requested per list call.
    pub list_page_size: u32,
    /// Transfers buffered before they are staged together.
    pub page_batch_size: usize,
    pub max_concurrent_detail_fetches: usize,
    /// How far back listing goes before stopping.
    pub lookback: Duration,
    /// UTC offset of the local time transfer dates are reported in.
    pub utc_offset_hours: i8,
}

impl TransferPaging {
    pub fn from_config(config: &KiotVietConfig) -> TransferPaging {
        TransferPaging {
            list_page_size: config.list_page_size.max(1),
            page_batch_size: config.page_batch_size,
            max_concurrent_detail_fetches: config.max_concurrent_detail_fetches,
            lookback: Duration::days(i64::from(config.lookback_days)),
            utc_offset_hours: config.utc_offset_hours,
        }
    }

    /// Oldest dispatch date still listed at `now`, in the local time transfers are dated in.
    pub fn cutoff(&self, now: DateTime<Utc>) -> NaiveDateTime {
        let local = now.naive_utc() + Duration::hours(i64::from(self.utc_offset_hours));
        local - self.lookback
    }
}

/// Stages recent transfers, newest first, into the staging table of the transfer lines table.
#[derive(Debug, Clone)]
pub struct TransferSync<A, W> {
    api: A,
    warehouse: W,
    staging: TableRef,
    paging: TransferPaging,
}

impl<A, W> TransferSync<A, W>
where
    A: TransferApi + Clone + Send + Sync + 'static,
    W: Warehouse + Send + Sync,
{
    pub fn new(api: A, warehouse: W, staging: TableRef, paging: TransferPaging) -> Self {
        TransferSync {
            api,
            warehouse,
            staging,
            paging,
        }
    }

    /// Stages transfers until one older than the configured lookback window is reached.
    pub async fn stream(&self) -> SyncResult<TransferSyncReport> {
        let cutoff = self.paging.cutoff(Utc::now());
        self.stream_until(cutoff).await
    }

    /// Stages transfers page batch by page batch until a batch starts with a transfer dispatched
    /// before `cutoff`, or the listing is exhausted.
    ///
    /// List failures are returned. A page batch that fails to stage is logged and ends the run
    /// with [`TransferSyncReport::aborted`] set, keeping what was staged before it.
    pub async fn stream_until(&self, cutoff: NaiveDateTime) -> SyncResult<TransferSyncReport> {
        let mut report = TransferSyncReport::default();
        let mut detail_errors = Vec::new();
        let mut offset = 0u64;

        loop {
            let transfers = self.next_page_batch(&mut offset).await?;
            let Some(newest) = transfers.first() else {
                info!(offset, "transfer listing exhausted");
                break;
            };

            if let Some(dispatched) = newest.dispatched_date
                && dispatched < cutoff
            {
                info!(
                    transfer_id = newest.id,
                    %dispatched,
                    %cutoff,
                    "reached transfers older than the cutoff"
                );
                report.reached_cutoff = true;
                break;
            }

            let batch_len = transfers.len() as u64;
            match self.stage_page_batch(transfers).await {
                Ok((rows, errors)) => {
                    report.page_batches += 1;
                    report.transfers += batch_len;
                    report.rows_staged += rows;
                    report.failed_detail_fetches += errors.len() as u64;
                    detail_errors.extend(errors);

                    info!(offset, transfers = batch_len, rows, "staged transfer page batch");
                }
                Err(err) => {
                    error!(
                        offset,
                        transfers = batch_len,
                        error = %err,
                        "transfer page batch failed, stopping"
                    );
                    report.aborted = true;
                    break;
                }
            }
        }

        if !detail_errors.is_empty() {
            report.detail_errors = Some(SyncError::from(detail_errors));
        }

        Ok(report)
    }

    /// Lists pages from `offset` until `page_batch_size` transfers are buffered or an empty page
    /// comes back.
    async fn next_page_batch(&self, offset: &mut u64) -> SyncResult<Vec<Transfer>> {
        let mut transfers = Vec::with_capacity(self.paging.page_batch_size);

        loop {
            let page = self
                .api
                .list_transfers(self.paging.list_page_size, *offset)
                .await?;
            *offset += u64::from(self.paging.list_page_size);

            let exhausted = page.data.is_empty();
            transfers.extend(page.data);

            if exhausted || transfers.len() >= self.paging.page_batch_size {
                return Ok(transfers);
            }
        }
    }

    /// Fetches details for every transfer of the batch, flattens them and stages all rows with a
    /// single insert. Returns the rows staged and the failed detail fetches.
    async fn stage_page_batch(
        &self,
        transfers: Vec<Transfer>,
    ) -> SyncResult<(u64, Vec<SyncError>)> {
        let start = Instant::now();
        let (details, failed) = self.fetch_details(&transfers).await?;

        let mut rows = Vec::new();
        for transfer in &transfers {
            rows.extend(transfer_rows(transfer, details.get(&transfer.id))?);
        }

        let count = rows.len() as u64;
        if !rows.is_empty() {
            self.warehouse
                .insert_rows(&self.staging, transfers_descriptor(), rows)
                .await?;
        }

        info!(
            transfers = transfers.len(),
            rows = count,
            failed_detail_fetches = failed.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "flattened transfer page batch"
        );

        Ok((count, failed))
    }

    /// Fetches details of `transfers` with a bounded number of requests in flight.
    async fn fetch_details(
        &self,
        transfers: &[Transfer],
    ) -> SyncResult<(HashMap<i64, TransferDetails>, Vec<SyncError>)> {
        let mut group = BoundedTaskGroup::new(self.paging.max_concurrent_detail_fetches);
        for transfer in transfers {
            let api = self.api.clone();
            let transfer_id = transfer.id;

            group
                .spawn(async move { (transfer_id, api.transfer_details(transfer_id).await) })
                .await?;
        }

        let mut details = HashMap::with_capacity(transfers.len());
        let mut failed = Vec::new();
        for result in group.join_all().await {
            match result {
                Ok((transfer_id, Ok(detail))) => {
                    details.insert(transfer_id, detail);
                }
                Ok((transfer_id, Err(err))) => {
                    warn!(
                        transfer_id,
                        error = %err,
                        "transfer details unavailable, staging lines without them"
                    );
                    failed.push(err);
                }
                Err(err) => {
                    warn!(error = %err, "transfer details task failed");
                    failed.push(err);
                }
            }
        }

        Ok((details, failed))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::error::ErrorKind;
    use crate::merge::PartitionFilter;
    use crate::remote::TRANSFERS_TABLE;
    use crate::test_utils::transfers::{FakeTransferApi, details_for, transfer};
    use crate::types::Cell;
    use crate::warehouse::memory::MemoryWarehouse;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    /// `count` transfers with descending ids, each dispatched one hour before the previous one.
    fn transfers(count: i64, lines: usize) -> Vec<Transfer> {
        (0..count)
            .map(|n| transfer(count - n, now() - Duration::hours(n), lines))
            .collect()
    }

    fn paging(list_page_size: u32, page_batch_size: usize) -> TransferPaging {
        TransferPaging {
            list_page_size,
            page_batch_size,
            max_concurrent_detail_fetches: 4,
            lookback: Duration::days(60),
            utc_offset_hours: 7,
        }
    }

    async fn setup(
        api: FakeTransferApi,
        paging: TransferPaging,
    ) -> (TransferSync<FakeTransferApi, MemoryWarehouse>, MemoryWarehouse, TableRef) {
        let warehouse = MemoryWarehouse::new(PartitionFilter::On(now().date()));
        let target = TableRef::new("websync", TRANSFERS_TABLE);
        let staging = TableRef::new("presync", TRANSFERS_TABLE);
        warehouse
            .create_partitioned_tables(&target, &staging, transfers_descriptor())
            .await
            .unwrap();

        let sync = TransferSync::new(api, warehouse.clone(), staging.clone(), paging);
        (sync, warehouse, staging)
    }

    #[tokio::test]
    async fn stages_every_transfer_until_listing_is_exhausted() {
        let api = FakeTransferApi::new(transfers(250, 2));
        let (sync, warehouse, staging) = setup(api.clone(), paging(100, 200)).await;

        let report = sync.stream_until(now() - Duration::days(60)).await.unwrap();

        assert_eq!(report.page_batches, 2);
        assert_eq!(report.transfers, 250);
        assert_eq!(report.rows_staged, 500);
        assert!(!report.reached_cutoff);
        assert!(!report.aborted);
        assert_eq!(warehouse.rows(&staging).await.len(), 500);

        let offsets: Vec<u64> = api.list_calls().await.iter().map(|(_, o)| *o).collect();
        assert_eq!(offsets, vec![0, 100, 200, 300, 400]);
    }

    #[tokio::test]
    async fn stops_at_batch_starting_before_cutoff() {
        let api = FakeTransferApi::new(transfers(300, 1));
        let (sync, _, _) = setup(api.clone(), paging(100, 100)).await;

        // Transfers from the 151st on are older than the cutoff, so the third batch starts too old.
        let cutoff = now() - Duration::hours(149) - Duration::minutes(30);
        let report = sync.stream_until(cutoff).await.unwrap();

        assert!(report.reached_cutoff);
        assert_eq!(report.page_batches, 2);
        assert_eq!(report.transfers, 200);
        assert_eq!(api.list_calls().await.len(), 3);
        assert_eq!(api.detail_calls().await.len(), 200);
    }

    #[tokio::test]
    async fn failed_detail_fetch_stages_lines_without_enrichment() {
        let api = FakeTransferApi::new(transfers(2, 2));
        api.set_details(2, details_for(2, 2)).await;
        api.fail_details(1).await;
        let (sync, warehouse, staging) = setup(api, paging(100, 100)).await;

        let report = sync.stream_until(now() - Duration::days(60)).await.unwrap();

        assert_eq!(report.rows_staged, 4);
        assert_eq!(report.failed_detail_fetches, 1);
        let detail_errors = report.detail_errors.unwrap();
        assert!(detail_errors.errors().is_none());
        assert_eq!(detail_errors.kind(), ErrorKind::UnexpectedResponseStatus);

        let rows = warehouse.rows(&staging).await;
        let unenriched: Vec<_> = rows
            .iter()
            .filter(|row| row["id"] == Cell::I64(1))
            .collect();
        assert_eq!(unenriched.len(), 2);
        assert!(unenriched.iter().all(|row| row["barcode"] == Cell::Null));
        assert!(
            rows.iter()
                .filter(|row| row["id"] == Cell::I64(2))
                .all(|row| row["barcode"] != Cell::Null)
        );
    }

    #[tokio::test]
    async fn detail_fetches_are_bounded() {
        let api = FakeTransferApi::new(transfers(40, 1));
        api.set_detail_delay(std::time::Duration::from_millis(5)).await;
        let (sync, _, _) = setup(api.clone(), paging(100, 100)).await;

        sync.stream_until(now() - Duration::days(60)).await.unwrap();

        assert_eq!(api.detail_calls().await.len(), 40);
        assert!(api.max_concurrent_detail_fetches().await <= 4);
    }

    #[tokio::test]
    async fn failed_batch_insert_stops_listing() {
        let api = FakeTransferApi::new(transfers(450, 1));
        let (sync, warehouse, staging) = setup(api.clone(), paging(100, 100)).await;
        warehouse.fail_insert(&staging, 1).await;

        let report = sync.stream_until(now() - Duration::days(60)).await.unwrap();

        assert!(report.aborted);
        assert!(!report.reached_cutoff);
        assert_eq!(report.page_batches, 1);
        assert_eq!(report.transfers, 100);
        assert_eq!(report.rows_staged, 100);
        assert_eq!(warehouse.rows(&staging).await.len(), 100);

        let offsets: Vec<u64> = api.list_calls().await.iter().map(|(_, o)| *o).collect();
        assert_eq!(offsets, vec![0, 100]);
        assert_eq!(api.detail_calls().await.len(), 200);
    }

    #[tokio::test]
    async fn detail_failures_across_batches_are_aggregated() {
        let api = FakeTransferApi::new(transfers(4, 1));
        api.fail_details(4).await;
        api.fail_details(1).await;
        let (sync, _, _) = setup(api, paging(2, 2)).await;

        let report = sync.stream_until(now() - Duration::days(60)).await.unwrap();

        assert_eq!(report.page_batches, 2);
        assert_eq!(report.failed_detail_fetches, 2);
        let detail_errors = report.detail_errors.unwrap();
        assert_eq!(detail_errors.errors().map(<[_]>::len), Some(2));
        assert_eq!(
            detail_errors.kinds(),
            vec![ErrorKind::UnexpectedResponseStatus; 2]
        );
    }

    #[test]
    fn cutoff_is_in_retailer_local_time() {
        let now = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap()
            .and_utc();

        // 20:00 UTC is already 03:00 on March 10th at UTC+7.
        let expected = NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap();
        assert_eq!(paging(100, 100).cutoff(now), expected);

        let utc = TransferPaging {
            utc_offset_hours: 0,
            ..paging(100, 100)
        };
        assert_eq!(utc.cutoff(now), now.naive_utc() - Duration::days(60));
    }

    #[tokio::test]
    async fn list_failures_are_returned() {
        let api = FakeTransferApi::new(transfers(150, 1));
        api.fail_list_at(100).await;
        let (sync, _, _) = setup(api, paging(100, 500)).await;

        let err = sync.stream_until(now() - Duration::days(60)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnexpectedResponseStatus);
    }
}
