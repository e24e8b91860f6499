use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ErrorKind, SyncResult};
use crate::merge::{MergePlan, PartitionFilter, TableRef};
use crate::types::{Cell, TableDescriptor, TableRow};
use crate::warehouse::{CREATED_AT_COLUMN, PARTITION_DATE_COLUMN, Warehouse};
use crate::{bail, sync_error};

#[derive(Debug, Clone)]
struct StoredTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl StoredTable {
    fn index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }

    fn indexes(&self, columns: &[String], table: &TableRef) -> SyncResult<Vec<usize>> {
        columns
            .iter()
            .map(|column| {
                self.index(column).ok_or_else(|| {
                    sync_error!(
                        ErrorKind::SchemaMismatch,
                        "Column not found in warehouse table",
                        format!("table `{table}` has no column `{column}`")
                    )
                })
            })
            .collect()
    }
}

#[derive(Debug)]
struct Inner {
    partition: PartitionFilter,
    tables: HashMap<TableRef, StoredTable>,
    queries: Vec<String>,
    last_created_at: Option<DateTime<Utc>>,
    inserts: HashMap<TableRef, usize>,
    failing_inserts: HashSet<(TableRef, usize)>,
}

impl Inner {
    /// Returns the current time, strictly after every timestamp handed out before.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_created_at
            && now <= last
        {
            now = last + TimeDelta::microseconds(1);
        }
        self.last_created_at = Some(now);

        now
    }

    fn table(&self, table: &TableRef) -> SyncResult<&StoredTable> {
        match self.tables.get(table) {
            Some(stored) => Ok(stored),
            None => bail!(
                ErrorKind::WarehouseQueryFailed,
                "Warehouse table not found",
                format!("table `{table}` does not exist")
            ),
        }
    }
}

/// In-process warehouse for dry runs and tests.
///
/// [`MemoryWarehouse`] keeps tables as plain rows and applies merge plans directly instead of
/// running SQL: per key and partition date the latest staged row wins, matched target rows are
/// updated and the others inserted. Every query it is asked to run, including rendered merge
/// statements, is recorded and can be inspected with [`MemoryWarehouse::queries`].
#[derive(Debug, Clone)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWarehouse {
    /// Creates an empty warehouse tagging inserted rows with the date selected by `partition`.
    pub fn new(partition: PartitionFilter) -> MemoryWarehouse {
        let inner = Inner {
            partition,
            tables: HashMap::new(),
            queries: Vec::new(),
            last_created_at: None,
            inserts: HashMap::new(),
            failing_inserts: HashSet::new(),
        };

        MemoryWarehouse {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns the rows of `table` keyed by column name, in insertion order.
    pub async fn rows(&self, table: &TableRef) -> Vec<BTreeMap<String, Cell>> {
        let inner = self.inner.lock().await;
        let Some(stored) = inner.tables.get(table) else {
            return Vec::new();
        };

        stored
            .rows
            .iter()
            .map(|row| {
                stored
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Returns every query run so far.
    pub async fn queries(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.queries.clone()
    }

    pub async fn has_table(&self, table: &TableRef) -> bool {
        let inner = self.inner.lock().await;
        inner.tables.contains_key(table)
    }

    /// Makes the insert number `call` into `table`, counted from zero, fail.
    pub async fn fail_insert(&self, table: &TableRef, call: usize) {
        let mut inner = self.inner.lock().await;
        inner.failing_inserts.insert((table.clone(), call));
    }

    /// Returns how many inserts into `table` were attempted, failed ones included.
    pub async fn insert_calls(&self, table: &TableRef) -> usize {
        let inner = self.inner.lock().await;
        inner.inserts.get(table).copied().unwrap_or(0)
    }

    /// Creates `table` with exactly `columns`, replacing any existing table.
    pub async fn create_table(&self, table: TableRef, columns: Vec<String>) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            table,
            StoredTable {
                columns,
                rows: Vec::new(),
            },
        );
    }
}

impl Warehouse for MemoryWarehouse {
    fn name() -> &'static str {
        "memory"
    }

    async fn create_partitioned_tables(
        &self,
        target: &TableRef,
        staging: &TableRef,
        descriptor: &TableDescriptor,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        let mut columns = vec![PARTITION_DATE_COLUMN.to_owned()];
        columns.extend(descriptor.column_names().map(str::to_owned));

        if !inner.tables.contains_key(target) {
            info!(table = %target, "creating target table");
            inner.tables.insert(
                target.clone(),
                StoredTable {
                    columns: columns.clone(),
                    rows: Vec::new(),
                },
            );
        }

        if !inner.tables.contains_key(staging) {
            info!(table = %staging, "creating staging table");
            columns.push(CREATED_AT_COLUMN.to_owned());
            inner.tables.insert(
                staging.clone(),
                StoredTable {
                    columns,
                    rows: Vec::new(),
                },
            );
        }

        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &TableRef,
        descriptor: &TableDescriptor,
        rows: Vec<TableRow>,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        let calls = inner.inserts.entry(table.clone()).or_default();
        let call = *calls;
        *calls += 1;
        if inner.failing_inserts.contains(&(table.clone(), call)) {
            bail!(
                ErrorKind::WarehouseInsertFailed,
                "Insert failed",
                format!("insert {call} into `{table}` was rejected")
            );
        }

        let date = inner.partition.resolve(Utc::now());
        let created_at = inner.next_created_at();

        let stored = inner.table(table)?;
        let mut sources = Vec::with_capacity(stored.columns.len());
        for column in &stored.columns {
            let source = match column.as_str() {
                PARTITION_DATE_COLUMN => ValueSource::Fixed(Cell::Date(date)),
                CREATED_AT_COLUMN => ValueSource::Fixed(Cell::TimestampTz(created_at)),
                name => match descriptor.column_index(name) {
                    Some(index) => ValueSource::Row(index),
                    None => ValueSource::Fixed(Cell::Null),
                },
            };
            sources.push(source);
        }

        if let Some(missing) = descriptor
            .column_names()
            .find(|name| !stored.columns.iter().any(|column| column.as_str() == *name))
        {
            bail!(
                ErrorKind::SchemaMismatch,
                "Row column not found in warehouse table",
                format!("table `{table}` has no column `{missing}`")
            );
        }

        debug!(table = %table, rows = rows.len(), "inserting rows");

        let mapped: Vec<Vec<Cell>> = rows
            .into_iter()
            .map(|row| {
                let values = row.into_values();
                sources
                    .iter()
                    .map(|source| match source {
                        ValueSource::Fixed(cell) => cell.clone(),
                        ValueSource::Row(index) => values.get(*index).cloned().unwrap_or(Cell::Null),
                    })
                    .collect()
            })
            .collect();

        if let Some(stored) = inner.tables.get_mut(table) {
            stored.rows.extend(mapped);
        }

        Ok(())
    }

    async fn run_query(&self, sql: &str, location: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        debug!(location, "recording query");
        inner.queries.push(sql.to_owned());

        Ok(())
    }

    async fn table_columns(&self, table: &TableRef) -> SyncResult<Option<Vec<String>>> {
        let inner = self.inner.lock().await;

        Ok(inner.tables.get(table).map(|stored| stored.columns.clone()))
    }

    async fn merge_staging(&self, plan: &MergePlan, location: &str) -> SyncResult<()> {
        let sql = plan.to_sql()?;
        self.run_query(&sql, location).await?;

        let mut inner = self.inner.lock().await;
        let date = Cell::Date(plan.filter.resolve(Utc::now()));

        let staging = inner.table(&plan.staging)?.clone();
        let target = inner.table(&plan.target)?;

        let mut group_columns = plan.key_columns.clone();
        group_columns.push(plan.partition_column.clone());

        let staging_group = staging.indexes(&group_columns, &plan.staging)?;
        let staging_order = staging.indexes(
            std::slice::from_ref(&plan.dedup_order_column),
            &plan.staging,
        )?[0];
        let staging_partition = staging.indexes(
            std::slice::from_ref(&plan.partition_column),
            &plan.staging,
        )?[0];
        let staging_update = staging.indexes(&plan.update_columns, &plan.staging)?;
        let staging_insert = staging.indexes(&plan.insert_columns, &plan.staging)?;

        let target_group = target.indexes(&group_columns, &plan.target)?;
        let target_update = target.indexes(&plan.update_columns, &plan.target)?;
        let target_insert = target.indexes(&plan.insert_columns, &plan.target)?;
        let target_width = target.columns.len();

        // Latest staged row per group, in first-seen order. Ties keep the row inserted last.
        let mut latest: Vec<(GroupKey, &Vec<Cell>)> = Vec::new();
        let mut latest_index: HashMap<GroupKey, usize> = HashMap::new();
        for row in staging.rows.iter().filter(|row| row[staging_partition] == date) {
            let key = GroupKey::new(row, &staging_group);
            match latest_index.get(&key) {
                Some(&index) => {
                    let entry = &mut latest[index];
                    if !is_before(&row[staging_order], &entry.1[staging_order]) {
                        entry.1 = row;
                    }
                }
                None => {
                    latest_index.insert(key.clone(), latest.len());
                    latest.push((key, row));
                }
            }
        }

        let mut target_index: HashMap<GroupKey, usize> = target
            .rows
            .iter()
            .enumerate()
            .map(|(index, row)| (GroupKey::new(row, &target_group), index))
            .collect();

        let Some(target) = inner.tables.get_mut(&plan.target) else {
            bail!(
                ErrorKind::WarehouseQueryFailed,
                "Warehouse table not found",
                format!("table `{}` does not exist", plan.target)
            );
        };

        let mut updated = 0;
        let mut inserted = 0;
        for (key, source) in latest {
            match target_index.get(&key) {
                Some(&index) => {
                    let existing = &mut target.rows[index];
                    for (to, from) in target_update.iter().zip(&staging_update) {
                        existing[*to] = source[*from].clone();
                    }
                    updated += 1;
                }
                None => {
                    let mut row = vec![Cell::Null; target_width];
                    for (to, from) in target_insert.iter().zip(&staging_insert) {
                        row[*to] = source[*from].clone();
                    }
                    target_index.insert(key, target.rows.len());
                    target.rows.push(row);
                    inserted += 1;
                }
            }
        }

        info!(
            target = %plan.target,
            staging = %plan.staging,
            updated,
            inserted,
            "merged staging table"
        );

        Ok(())
    }
}

#[derive(Debug)]
enum ValueSource {
    Fixed(Cell),
    Row(usize),
}

/// Hashable encoding of the key and partition cells of a row.
///
/// [`Cell`] holds floats and decimals and so cannot be hashed itself. Its debug form is stable
/// and tells variants apart, which is all grouping needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey(Vec<String>);

impl GroupKey {
    fn new(row: &[Cell], indexes: &[usize]) -> GroupKey {
        GroupKey(indexes.iter().map(|index| format!("{:?}", row[*index])).collect())
    }
}

/// Orders creation timestamps, with nulls before everything else.
fn is_before(a: &Cell, b: &Cell) -> bool {
    match (a, b) {
        (Cell::TimestampTz(a), Cell::TimestampTz(b)) => a < b,
        (Cell::Null, Cell::Null) => false,
        (Cell::Null, _) => true,
        _ => false,
    }
}
