//! Deduplicating upserts from a staging table into its target table.
//!
//! A [`MergePlan`] is derived from a [`crate::types::TableDescriptor`] and rendered into a single
//! warehouse `MERGE` statement that keeps, per natural key and partition date, only the most
//! recently staged row.

mod plan;
mod sql;

pub use plan::{MergePlan, PartitionFilter, TableRef};
pub use sql::{quote_identifier, quote_table, sanitize_identifier};
