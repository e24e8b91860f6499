use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::remote::{
    DetailProduct, Transfer, TransferApi, TransferDetails, TransferLine, TransferLineDetail,
    TransferPage,
};

#[derive(Debug, Default)]
struct Inner {
    /// Served newest first, in the order given.
    transfers: Vec<Transfer>,
    details: HashMap<i64, TransferDetails>,
    failing_details: HashSet<i64>,
    failing_list_offsets: HashSet<u64>,
    list_calls: Vec<(u32, u64)>,
    detail_calls: Vec<i64>,
    detail_delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Transfer API serving transfers held in memory.
#[derive(Debug, Clone, Default)]
pub struct FakeTransferApi {
    inner: Arc<Mutex<Inner>>,
}

impl FakeTransferApi {
    pub fn new(transfers: Vec<Transfer>) -> FakeTransferApi {
        FakeTransferApi {
            inner: Arc::new(Mutex::new(Inner {
                transfers,
                ..Inner::default()
            })),
        }
    }

    pub async fn set_details(&self, transfer_id: i64, details: TransferDetails) {
        let mut inner = self.inner.lock().await;
        inner.details.insert(transfer_id, details);
    }

    /// Makes fetching details of `transfer_id` fail.
    pub async fn fail_details(&self, transfer_id: i64) {
        let mut inner = self.inner.lock().await;
        inner.failing_details.insert(transfer_id);
    }

    /// Makes listing at `offset` fail.
    pub async fn fail_list_at(&self, offset: u64) {
        let mut inner = self.inner.lock().await;
        inner.failing_list_offsets.insert(offset);
    }

    pub async fn set_detail_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner.detail_delay = Some(delay);
    }

    /// `(limit, offset)` of every list call, in call order.
    pub async fn list_calls(&self) -> Vec<(u32, u64)> {
        self.inner.lock().await.list_calls.clone()
    }

    pub async fn detail_calls(&self) -> Vec<i64> {
        self.inner.lock().await.detail_calls.clone()
    }

    /// Highest number of detail requests that were in progress at the same time.
    pub async fn max_concurrent_detail_fetches(&self) -> usize {
        self.inner.lock().await.max_in_flight
    }
}

impl TransferApi for FakeTransferApi {
    async fn list_transfers(&self, limit: u32, offset: u64) -> SyncResult<TransferPage> {
        let mut inner = self.inner.lock().await;
        inner.list_calls.push((limit, offset));

        if inner.failing_list_offsets.contains(&offset) {
            bail!(
                ErrorKind::UnexpectedResponseStatus,
                "Listing transfers failed",
                format!("offset {offset}")
            );
        }

        let data: Vec<Transfer> = inner
            .transfers
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(TransferPage {
            total: inner.transfers.len() as i64,
            page_size: data.len() as i64,
            data,
        })
    }

    async fn transfer_details(&self, transfer_id: i64) -> SyncResult<TransferDetails> {
        let delay = {
            let mut inner = self.inner.lock().await;
            inner.detail_calls.push(transfer_id);
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            inner.detail_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        inner.in_flight -= 1;

        if inner.failing_details.contains(&transfer_id) {
            bail!(
                ErrorKind::UnexpectedResponseStatus,
                "Fetching transfer details failed",
                format!("transfer {transfer_id}")
            );
        }

        Ok(inner
            .details
            .get(&transfer_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// A transfer dispatched at `dispatched` with `lines` line items.
pub fn transfer(id: i64, dispatched: NaiveDateTime, lines: usize) -> Transfer {
    Transfer {
        id,
        code: format!("TRF{id:06}"),
        from_branch_id: 1,
        to_branch_id: 2,
        status: 1,
        dispatched_date: Some(dispatched),
        retailer_id: 7,
        transfer_details: (1..=lines)
            .map(|n| TransferLine {
                product_id: n as i64,
                product_code: format!("SP{n:04}"),
                product_name: format!("product {n}"),
                send_quantity: 1.0,
                receive_quantity: 1.0,
                send_price: 10.0,
                receive_price: 10.0,
                price: 12.0,
            })
            .collect(),
        ..Transfer::default()
    }
}

/// Details with one serial number and barcode per line, derived from `transfer_id`.
pub fn details_for(transfer_id: i64, lines: usize) -> TransferDetails {
    TransferDetails {
        data: (1..=lines)
            .map(|n| TransferLineDetail {
                serial_numbers: Some(format!("SN-{transfer_id}-{n}")),
                receive_serial_numbers: None,
                product: Some(DetailProduct {
                    barcode: Some(format!("BC-{n}")),
                }),
            })
            .collect(),
    }
}
