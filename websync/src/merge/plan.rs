use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use config::shared::MergeConfig;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::merge::sql::{quote_identifier, quote_table};
use crate::types::TableDescriptor;
use crate::warehouse::{CREATED_AT_COLUMN, PARTITION_DATE_COLUMN};

/// A table qualified by its dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> TableRef {
        TableRef {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Partition date staged rows are written to and merged from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionFilter {
    /// The current date at a fixed offset from UTC, resolved by the warehouse when the query runs.
    Today { utc_offset_hours: i8 },
    /// A fixed date, used for backfills.
    On(NaiveDate),
}

impl PartitionFilter {
    pub fn from_config(config: &MergeConfig) -> PartitionFilter {
        match config.partition_date {
            Some(date) => PartitionFilter::On(date),
            None => PartitionFilter::Today {
                utc_offset_hours: config.partition_utc_offset_hours,
            },
        }
    }

    /// Returns the partition date selected by this filter at instant `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> NaiveDate {
        match *self {
            PartitionFilter::Today { utc_offset_hours } => {
                (now + Duration::hours(i64::from(utc_offset_hours))).date_naive()
            }
            PartitionFilter::On(date) => date,
        }
    }

    fn to_sql(self) -> String {
        match self {
            PartitionFilter::Today { utc_offset_hours } => {
                format!("current_date(\"{utc_offset_hours:+}\")")
            }
            PartitionFilter::On(date) => format!("date \"{}\"", date.format("%Y-%m-%d")),
        }
    }
}

/// Everything needed to merge one staging table into its target table.
///
/// Within each group of staged rows sharing the key columns and the partition date, the row with
/// the greatest `dedup_order_column` wins. Matched target rows get their `update_columns`
/// overwritten, unmatched ones are inserted with every column in `insert_columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub target: TableRef,
    pub staging: TableRef,
    pub key_columns: Vec<String>,
    pub dedup_order_column: String,
    pub partition_column: String,
    pub update_columns: Vec<String>,
    /// Descriptor columns followed by the partition column.
    pub insert_columns: Vec<String>,
    pub filter: PartitionFilter,
}

impl MergePlan {
    /// Derives the plan merging `staging_dataset.<table>` into `target_dataset.<table>`.
    ///
    /// Fails with [`ErrorKind::SchemaMismatch`] when the descriptor has no key columns.
    pub fn from_descriptor(
        descriptor: &TableDescriptor,
        target_dataset: &str,
        staging_dataset: &str,
        filter: PartitionFilter,
    ) -> SyncResult<MergePlan> {
        let key_columns: Vec<String> = descriptor
            .key_columns()
            .into_iter()
            .map(str::to_owned)
            .collect();

        if key_columns.is_empty() {
            bail!(
                ErrorKind::SchemaMismatch,
                "Table has no key columns to merge on",
                format!(
                    "table `{}` has no primary key and no `id` column",
                    descriptor.name
                )
            );
        }

        let update_columns = descriptor
            .column_names()
            .filter(|name| !key_columns.iter().any(|key| key.as_str() == *name))
            .map(str::to_owned)
            .collect();

        let insert_columns = descriptor
            .column_names()
            .chain([PARTITION_DATE_COLUMN])
            .map(str::to_owned)
            .collect();

        let table = descriptor.warehouse_table_name();

        Ok(MergePlan {
            target: TableRef::new(target_dataset, table.clone()),
            staging: TableRef::new(staging_dataset, table),
            key_columns,
            dedup_order_column: CREATED_AT_COLUMN.to_owned(),
            partition_column: PARTITION_DATE_COLUMN.to_owned(),
            update_columns,
            insert_columns,
            filter,
        })
    }

    /// Renders the plan as a single `merge` statement.
    ///
    /// The output only depends on the plan, so the same descriptor always yields the same text.
    pub fn to_sql(&self) -> SyncResult<String> {
        let target = quote_table(&self.target.dataset, &self.target.table)?;
        let staging = quote_table(&self.staging.dataset, &self.staging.table)?;
        let order = quote_identifier(&self.dedup_order_column)?;
        let partition = quote_identifier(&self.partition_column)?;

        let mut group_columns = Vec::with_capacity(self.key_columns.len() + 1);
        let mut match_conditions = Vec::with_capacity(self.key_columns.len() + 1);
        for column in self.key_columns.iter().chain([&self.partition_column]) {
            let column = quote_identifier(column)?;
            group_columns.push(format!("staged.{column}"));
            match_conditions.push(format!("T.{column} = S.{column}"));
        }

        let mut sql = format!(
            "merge {target} T using (select agg.staged.* from (select array_agg(struct(staged) \
             order by staged.{order} desc)[safe_offset(0)] agg from {staging} staged where \
             staged.{partition} = {filter} group by {group})) S on {condition}",
            filter = self.filter.to_sql(),
            group = group_columns.join(", "),
            condition = match_conditions.join(" and "),
        );

        if !self.update_columns.is_empty() {
            let assignments = self
                .update_columns
                .iter()
                .map(|column| {
                    let column = quote_identifier(column)?;
                    Ok(format!("{column} = S.{column}"))
                })
                .collect::<SyncResult<Vec<_>>>()?;

            sql.push_str(" when matched then update set ");
            sql.push_str(&assignments.join(", "));
        }

        let mut insert_columns = Vec::with_capacity(self.insert_columns.len());
        let mut insert_values = Vec::with_capacity(self.insert_columns.len());
        for column in &self.insert_columns {
            let column = quote_identifier(column)?;
            insert_values.push(format!("S.{column}"));
            insert_columns.push(column);
        }

        sql.push_str(&format!(
            " when not matched then insert ({}) values ({})",
            insert_columns.join(", "),
            insert_values.join(", ")
        ));

        Ok(sql)
    }
}
