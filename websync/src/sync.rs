//! Runs every configured sync unit: the relational tables, then the KiotViet transfers.
//!
//! Each unit is staged and then merged on its own. A failing unit is logged and recorded in the
//! [`SyncReport`] and the run moves on to the next one.

use std::sync::Arc;
use std::time::Instant;

use config::shared::{BatchConfig, SyncConfig};
use tracing::{error, info, warn};

use crate::bail;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::merge::{MergePlan, PartitionFilter};
use crate::pipeline::table_copy;
use crate::remote::{
    TRANSFERS_TABLE, TransferApi, TransferPaging, TransferSync, transfers_descriptor,
};
use crate::source::RelationalSource;
use crate::types::TableDescriptor;
use crate::warehouse::{CREATED_AT_COLUMN, PARTITION_DATE_COLUMN, Warehouse};

/// Settings shared by every sync unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub target_dataset: String,
    pub staging_dataset: String,
    /// Location merge queries run in.
    pub location: String,
    /// Relational tables synced, in order.
    pub tables: Vec<String>,
    pub batch: BatchConfig,
    pub partition: PartitionFilter,
}

impl SyncSettings {
    pub fn from_config(config: &SyncConfig) -> SyncSettings {
        SyncSettings {
            target_dataset: config.warehouse.target_dataset.clone(),
            staging_dataset: config.warehouse.staging_dataset.clone(),
            location: config.warehouse.location.clone(),
            tables: config.relational.tables.clone(),
            batch: config.relational.batch.clone(),
            partition: PartitionFilter::from_config(&config.merge),
        }
    }
}

/// Outcome of one sync unit.
#[derive(Debug, Clone)]
pub struct UnitReport {
    /// Source table name, or the transfer table name.
    pub unit: String,
    pub rows_staged: u64,
    /// Relational pages or transfer detail fetches that failed without failing the unit.
    pub skipped_items: u64,
    /// The failures behind `skipped_items`, aggregated.
    pub skipped_errors: Option<SyncError>,
    pub merged: bool,
    pub error: Option<SyncError>,
    pub elapsed_ms: u64,
}

impl UnitReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcomes of every unit of a run, in run order.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub units: Vec<UnitReport>,
}

impl SyncReport {
    pub fn failed_units(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|unit| !unit.is_success())
    }

    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|unit| unit.unit == name)
    }

    pub fn rows_staged(&self) -> u64 {
        self.units.iter().map(|unit| unit.rows_staged).sum()
    }

    fn log_summary(&self) {
        let failed: Vec<&str> = self
            .failed_units()
            .map(|unit| unit.unit.as_str())
            .collect();

        info!(
            units = self.units.len(),
            failed = failed.len(),
            failed_units = ?failed,
            rows_staged = self.rows_staged(),
            "sync run finished"
        );
    }
}

/// What a unit did before its merge.
struct Staged {
    rows: u64,
    skipped: u64,
    skipped_errors: Option<SyncError>,
}

/// Sequences staging and merging for the relational tables and, when configured, the transfers.
#[derive(Debug)]
pub struct SyncOrchestrator<S, W, A> {
    source: S,
    warehouse: W,
    transfers: Option<(A, TransferPaging)>,
    settings: SyncSettings,
}

impl<S, W, A> SyncOrchestrator<S, W, A>
where
    S: RelationalSource + Clone + Send + Sync + 'static,
    W: Warehouse + Clone + Send + Sync + 'static,
    A: TransferApi + Clone + Send + Sync + 'static,
{
    pub fn new(
        source: S,
        warehouse: W,
        transfers: Option<(A, TransferPaging)>,
        settings: SyncSettings,
    ) -> Self {
        SyncOrchestrator {
            source,
            warehouse,
            transfers,
            settings,
        }
    }

    /// Syncs every unit. Unit failures are recorded in the report, never returned.
    pub async fn run(&self) -> SyncReport {
        let mut report = SyncReport::default();

        info!(
            warehouse = W::name(),
            tables = self.settings.tables.len(),
            transfers = self.transfers.is_some(),
            "starting sync run"
        );

        for table in &self.settings.tables {
            let start = Instant::now();
            let result = self.sync_table(table).await;
            report.units.push(unit_report(table, result, start));
        }

        if let Some((api, paging)) = &self.transfers {
            let start = Instant::now();
            let result = self.sync_transfers(api, *paging).await;
            report
                .units
                .push(unit_report(TRANSFERS_TABLE, result, start));
        }

        report.log_summary();

        report
    }

    async fn sync_table(&self, table: &str) -> SyncResult<Staged> {
        let descriptor = Arc::new(self.source.table_descriptor(table).await?);
        let plan = self.merge_plan(&descriptor)?;
        self.prepare_tables(&plan, &descriptor).await?;

        let copy = table_copy(
            self.source.clone(),
            self.warehouse.clone(),
            descriptor.clone(),
            plan.staging.clone(),
            &self.settings.batch,
        )
        .await?;

        if let Some(errors) = &copy.page_errors {
            warn!(
                table,
                failed_pages = copy.failed_pages,
                error_kinds = ?errors.kinds(),
                "merging a partially staged table"
            );
        }

        self.merge(&plan).await?;

        Ok(Staged {
            rows: copy.rows_staged,
            skipped: copy.failed_pages,
            skipped_errors: copy.page_errors,
        })
    }

    async fn sync_transfers(&self, api: &A, paging: TransferPaging) -> SyncResult<Staged> {
        let descriptor = transfers_descriptor();
        let plan = self.merge_plan(descriptor)?;
        self.prepare_tables(&plan, descriptor).await?;

        let sync = TransferSync::new(
            api.clone(),
            self.warehouse.clone(),
            plan.staging.clone(),
            paging,
        );
        let report = sync.stream().await?;

        if report.aborted {
            warn!(
                page_batches = report.page_batches,
                "merging transfers staged before the failed page batch"
            );
        }

        self.merge(&plan).await?;

        Ok(Staged {
            rows: report.rows_staged,
            skipped: report.failed_detail_fetches,
            skipped_errors: report.detail_errors,
        })
    }

    /// Plans the merge of `descriptor` before anything is staged, so a table that cannot be merged
    /// fails without being copied.
    fn merge_plan(&self, descriptor: &TableDescriptor) -> SyncResult<MergePlan> {
        MergePlan::from_descriptor(
            descriptor,
            &self.settings.target_dataset,
            &self.settings.staging_dataset,
            self.settings.partition,
        )
    }

    /// Creates the target and staging tables of `plan` if needed and checks that the staging table
    /// has a column for every descriptor column.
    async fn prepare_tables(
        &self,
        plan: &MergePlan,
        descriptor: &TableDescriptor,
    ) -> SyncResult<()> {
        let staging = &plan.staging;

        self.warehouse
            .create_partitioned_tables(&plan.target, staging, descriptor)
            .await?;

        let Some(columns) = self.warehouse.table_columns(staging).await? else {
            bail!(
                ErrorKind::WarehouseQueryFailed,
                "Staging table is missing after creation",
                staging.to_string()
            );
        };

        let missing: Vec<&str> = descriptor
            .column_names()
            .chain([PARTITION_DATE_COLUMN, CREATED_AT_COLUMN])
            .filter(|name| !columns.iter().any(|column| column.as_str() == *name))
            .collect();

        if !missing.is_empty() {
            bail!(
                ErrorKind::SchemaMismatch,
                "Staging table is missing columns",
                format!("table `{staging}` lacks {}", missing.join(", "))
            );
        }

        Ok(())
    }

    async fn merge(&self, plan: &MergePlan) -> SyncResult<()> {
        let start = Instant::now();
        self.warehouse
            .merge_staging(plan, &self.settings.location)
            .await?;

        info!(
            target = %plan.target,
            staging = %plan.staging,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "merged staging table"
        );

        Ok(())
    }
}

/// Merging is the last step of a unit, so a unit merged exactly when it succeeded.
fn unit_report(unit: &str, result: SyncResult<Staged>, start: Instant) -> UnitReport {
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(staged) => {
            info!(unit, rows_staged = staged.rows, elapsed_ms, "sync unit finished");

            UnitReport {
                unit: unit.to_owned(),
                rows_staged: staged.rows,
                skipped_items: staged.skipped,
                skipped_errors: staged.skipped_errors,
                merged: true,
                error: None,
                elapsed_ms,
            }
        }
        Err(err) => {
            error!(
                unit,
                error_class = ?err.class(),
                error = %err,
                elapsed_ms,
                "sync unit failed, moving on"
            );

            UnitReport {
                unit: unit.to_owned(),
                rows_staged: 0,
                skipped_items: 0,
                skipped_errors: None,
                merged: false,
                error: Some(err),
                elapsed_ms,
            }
        }
    }
}
