//! Staging pipelines, one per kind of source.
//!
//! [`table_copy`] pages a relational table into its staging table. Remote resources are staged by
//! [`crate::remote::TransferSync`].

mod table_copy;

pub use table_copy::{TableCopyReport, page_count, table_copy};
