//! Stage-then-merge sync of a Postgres database and KiotViet stock transfers into a warehouse.
//!
//! Relational tables are copied page by page into staging tables by [`pipeline::table_copy`].
//! Transfers are listed, enriched and flattened by [`remote::TransferSync`]. Staged rows are then
//! folded into their target tables by a deduplicating merge built from a [`merge::MergePlan`].
//! [`sync::SyncOrchestrator`] runs all of it, one table at a time.

pub mod concurrency;
pub mod error;
mod macros;
pub mod merge;
pub mod pipeline;
pub mod remote;
pub mod source;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod warehouse;
