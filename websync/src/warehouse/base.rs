use std::future::Future;

use crate::error::SyncResult;
use crate::merge::{MergePlan, TableRef};
use crate::types::{TableDescriptor, TableRow};

/// Date column every warehouse table is partitioned by.
pub const PARTITION_DATE_COLUMN: &str = "_date";

/// Insertion time of a staged row. Only staging tables have it.
pub const CREATED_AT_COLUMN: &str = "_created_at";

/// Trait for warehouses synced tables are loaded into.
///
/// Rows are never written to a target table directly: they are appended to its staging table with
/// [`Warehouse::insert_rows`] and folded into the target with [`Warehouse::merge_staging`].
/// Implementations are shared by concurrent page tasks and must accept concurrent inserts.
pub trait Warehouse {
    /// Returns the name of the warehouse.
    fn name() -> &'static str;

    /// Creates the target and staging tables for `descriptor` unless they already exist.
    ///
    /// Both tables get a leading [`PARTITION_DATE_COLUMN`] they are partitioned by. The staging
    /// table also gets a trailing [`CREATED_AT_COLUMN`] and expiring partitions.
    fn create_partitioned_tables(
        &self,
        target: &TableRef,
        staging: &TableRef,
        descriptor: &TableDescriptor,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Appends rows to `table`.
    ///
    /// Every row is tagged with the current partition date and, for staging tables, the current
    /// time. There is no deduplication at insert time.
    fn insert_rows(
        &self,
        table: &TableRef,
        descriptor: &TableDescriptor,
        rows: Vec<TableRow>,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Runs `sql` in `location` and waits for it to complete.
    fn run_query(&self, sql: &str, location: &str) -> impl Future<Output = SyncResult<()>> + Send;

    /// Returns the column names of `table`, or `None` if it does not exist.
    fn table_columns(
        &self,
        table: &TableRef,
    ) -> impl Future<Output = SyncResult<Option<Vec<String>>>> + Send;

    /// Merges the staging table of `plan` into its target table.
    ///
    /// The default implementation renders the plan and runs it with [`Warehouse::run_query`].
    fn merge_staging(
        &self,
        plan: &MergePlan,
        location: &str,
    ) -> impl Future<Output = SyncResult<()>> + Send
    where
        Self: Sync,
    {
        async move {
            let sql = plan.to_sql()?;
            self.run_query(&sql, location).await
        }
    }
}
