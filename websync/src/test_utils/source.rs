use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::source::RelationalSource;
use crate::types::{Cell, ColumnSchema, ColumnType, TableDescriptor, TableRow};
use crate::{bail, sync_error};

/// A page read recorded by [`MemorySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFetch {
    pub table: String,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, (TableDescriptor, Vec<TableRow>)>,
    failing_pages: HashSet<(String, u64)>,
    failing_descriptors: HashSet<String>,
    fetches: Vec<PageFetch>,
    fetch_delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Relational source serving tables held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new() -> MemorySource {
        MemorySource::default()
    }

    pub async fn add_table(&self, descriptor: TableDescriptor, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().await;
        inner
            .tables
            .insert(descriptor.name.clone(), (descriptor, rows));
    }

    /// Makes the page of `table` starting at `offset` fail.
    pub async fn fail_page(&self, table: &str, offset: u64) {
        let mut inner = self.inner.lock().await;
        inner.failing_pages.insert((table.to_owned(), offset));
    }

    /// Makes describing `table` fail.
    pub async fn fail_descriptor(&self, table: &str) {
        let mut inner = self.inner.lock().await;
        inner.failing_descriptors.insert(table.to_owned());
    }

    /// Delays every page read, so that concurrent reads overlap.
    pub async fn set_fetch_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner.fetch_delay = Some(delay);
    }

    pub async fn fetches(&self) -> Vec<PageFetch> {
        let inner = self.inner.lock().await;
        inner.fetches.clone()
    }

    /// Highest number of page reads that were in progress at the same time.
    pub async fn max_concurrent_fetches(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.max_in_flight
    }
}

fn unknown_table(table: &str) -> SyncError {
    sync_error!(
        ErrorKind::SourceQueryFailed,
        "Source table does not exist",
        format!("table `{table}`")
    )
}

impl RelationalSource for MemorySource {
    async fn table_descriptor(&self, table: &str) -> SyncResult<TableDescriptor> {
        let inner = self.inner.lock().await;

        if inner.failing_descriptors.contains(table) {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Describing the table failed",
                format!("table `{table}`")
            );
        }

        inner
            .tables
            .get(table)
            .map(|(descriptor, _)| descriptor.clone())
            .ok_or_else(|| unknown_table(table))
    }

    async fn total_row_count(&self, table: &str) -> SyncResult<u64> {
        let inner = self.inner.lock().await;

        inner
            .tables
            .get(table)
            .map(|(_, rows)| rows.len() as u64)
            .ok_or_else(|| unknown_table(table))
    }

    async fn rows(
        &self,
        descriptor: &TableDescriptor,
        limit: u64,
        offset: u64,
    ) -> SyncResult<Vec<TableRow>> {
        let delay = {
            let mut inner = self.inner.lock().await;
            inner.fetches.push(PageFetch {
                table: descriptor.name.clone(),
                limit,
                offset,
            });
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            inner.fetch_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        inner.in_flight -= 1;

        if inner
            .failing_pages
            .contains(&(descriptor.name.clone(), offset))
        {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Reading the page failed",
                format!("table `{}` at offset {offset}", descriptor.name)
            );
        }

        let (_, rows) = inner
            .tables
            .get(&descriptor.name)
            .ok_or_else(|| unknown_table(&descriptor.name))?;

        Ok(rows
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Descriptor of a table keyed by `id` with a `label` column.
pub fn numbered_table(name: &str) -> TableDescriptor {
    TableDescriptor::new(
        name,
        vec![
            ColumnSchema::new("id", "INT8", ColumnType::Int64, false, true),
            ColumnSchema::new("label", "TEXT", ColumnType::String, true, false),
        ],
    )
}

/// Rows with ids `1..=count` for a [`numbered_table`].
pub fn numbered_rows(descriptor: &TableDescriptor, count: u64) -> Vec<TableRow> {
    (1..=count)
        .map(|id| {
            TableRow::try_new(
                descriptor,
                vec![Cell::I64(id as i64), Cell::String(format!("row {id}"))],
            )
            .expect("numbered rows match numbered tables")
        })
        .collect()
}
