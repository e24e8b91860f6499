use std::sync::LazyLock;

use tracing::warn;

use crate::error::SyncResult;
use crate::remote::models::{Transfer, TransferDetails};
use crate::types::{Cell, ColumnSchema, ColumnType, TableDescriptor, TableRow, TableRowBuilder};

/// Name of the table transfer lines are synced to.
pub const TRANSFERS_TABLE: &str = "kiotviet_transfers";

/// Position of a line within its transfer, starting at 1. Together with `id` it identifies a row.
pub const SUB_ID_COLUMN: &str = "_sub_id";

static TRANSFERS_DESCRIPTOR: LazyLock<TableDescriptor> = LazyLock::new(|| {
    let key = |name: &str| ColumnSchema::new(name, "INT64", ColumnType::Int64, false, true);
    let int = |name: &str| ColumnSchema::new(name, "INT64", ColumnType::Int64, true, false);
    let float = |name: &str| ColumnSchema::new(name, "FLOAT64", ColumnType::Float64, true, false);
    let string = |name: &str| ColumnSchema::new(name, "STRING", ColumnType::String, true, false);
    let datetime =
        |name: &str| ColumnSchema::new(name, "DATETIME", ColumnType::Timestamp, true, false);

    TableDescriptor::new(
        TRANSFERS_TABLE,
        vec![
            key("id"),
            key(SUB_ID_COLUMN),
            string("code"),
            int("from_branch_id"),
            int("to_branch_id"),
            int("status"),
            datetime("transfer_date"),
            datetime("received_date"),
            int("retailer_id"),
            string("sent_note"),
            string("received_note"),
            int("product_id"),
            string("product_code"),
            string("product_name"),
            float("sent_quantity"),
            float("received_quantity"),
            float("sent_price"),
            float("received_price"),
            float("price"),
            string("sent_imei_serials"),
            string("received_imei_serials"),
            string("created_user_name"),
            string("barcode"),
        ],
    )
});

/// Descriptor of the transfer lines table.
pub fn transfers_descriptor() -> &'static TableDescriptor {
    &TRANSFERS_DESCRIPTOR
}

/// Flattens a transfer into one row per line.
///
/// The line at position `i` gets `_sub_id = i + 1` and, when `details` is present, the serial
/// numbers and barcode of the `i`-th detail. Details are matched by position only. Lines without a
/// detail at their position are emitted without enrichment.
pub fn transfer_rows(
    transfer: &Transfer,
    details: Option<&TransferDetails>,
) -> SyncResult<Vec<TableRow>> {
    let descriptor = transfers_descriptor();

    if let Some(details) = details
        && details.data.len() != transfer.transfer_details.len()
    {
        warn!(
            transfer_id = transfer.id,
            lines = transfer.transfer_details.len(),
            details = details.data.len(),
            "transfer details do not line up with transfer lines"
        );
    }

    let mut rows = Vec::with_capacity(transfer.transfer_details.len());
    for (index, line) in transfer.transfer_details.iter().enumerate() {
        let mut row = TableRowBuilder::new(descriptor);
        row.set("id", Cell::I64(transfer.id))?
            .set(SUB_ID_COLUMN, Cell::I64(index as i64 + 1))?
            .set("code", Cell::String(transfer.code.clone()))?
            .set("from_branch_id", Cell::I64(transfer.from_branch_id))?
            .set("to_branch_id", Cell::I64(transfer.to_branch_id))?
            .set("status", Cell::I64(transfer.status))?
            .set("transfer_date", transfer.dispatched_date)?
            .set("received_date", transfer.received_date)?
            .set("retailer_id", Cell::I64(transfer.retailer_id))?
            .set("sent_note", transfer.description.clone())?
            .set("product_id", Cell::I64(line.product_id))?
            .set("product_code", Cell::String(line.product_code.clone()))?
            .set("product_name", Cell::String(line.product_name.clone()))?
            .set("sent_quantity", Cell::F64(line.send_quantity))?
            .set("received_quantity", Cell::F64(line.receive_quantity))?
            .set("sent_price", Cell::F64(line.send_price))?
            .set("received_price", Cell::F64(line.receive_price))?
            .set("price", Cell::F64(line.price))?;

        if let Some(detail) = details.and_then(|details| details.data.get(index)) {
            row.set("sent_imei_serials", detail.serial_numbers.clone())?
                .set(
                    "received_imei_serials",
                    detail.receive_serial_numbers.clone(),
                )?
                .set(
                    "barcode",
                    detail
                        .product
                        .as_ref()
                        .and_then(|product| product.barcode.clone()),
                )?;
        }

        rows.push(row.build()?);
    }

    Ok(rows)
}
