//! Analytical warehouse abstractions.
//!
//! A [`Warehouse`] owns pairs of date partitioned tables: a long lived target table and a staging
//! table rows are appended to before being merged. [`memory::MemoryWarehouse`] keeps everything in
//! process, [`bigquery::BigQueryWarehouse`] talks to BigQuery.

mod base;
#[cfg(feature = "bigquery")]
pub mod bigquery;
pub mod memory;

pub use base::{CREATED_AT_COLUMN, PARTITION_DATE_COLUMN, Warehouse};
