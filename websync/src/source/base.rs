use std::future::Future;

use crate::error::SyncResult;
use crate::types::{TableDescriptor, TableRow};

/// Trait for relational databases that tables are read from page by page.
///
/// Implementations are shared by concurrent page tasks, so every method takes `&self`.
pub trait RelationalSource {
    /// Returns the ordered columns of `table`, with its primary key columns flagged.
    fn table_descriptor(
        &self,
        table: &str,
    ) -> impl Future<Output = SyncResult<TableDescriptor>> + Send;

    /// Returns the number of rows currently in `table`.
    fn total_row_count(&self, table: &str) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Returns at most `limit` rows of the table described by `descriptor`, skipping `offset`.
    ///
    /// Pages are read in a stable order, so consecutive offsets neither skip nor repeat rows as
    /// long as the table does not change.
    fn rows(
        &self,
        descriptor: &TableDescriptor,
        limit: u64,
        offset: u64,
    ) -> impl Future<Output = SyncResult<Vec<TableRow>>> + Send;
}
