use chrono::{Duration, NaiveDate, Utc};
use config::shared::BatchConfig;
use telemetry::tracing::init_test_tracing;
use websync::error::ErrorKind;
use websync::merge::{PartitionFilter, TableRef};
use websync::remote::{TRANSFERS_TABLE, Transfer, TransferPaging};
use websync::sync::{SyncOrchestrator, SyncSettings};
use websync::test_utils::source::{MemorySource, numbered_rows, numbered_table};
use websync::test_utils::transfers::{FakeTransferApi, details_for, transfer};
use websync::types::{Cell, ColumnSchema, ColumnType, TableDescriptor, TableRow};
use websync::warehouse::memory::MemoryWarehouse;

fn partition_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
}

fn settings(tables: &[&str]) -> SyncSettings {
    SyncSettings {
        target_dataset: "websync".to_owned(),
        staging_dataset: "presync".to_owned(),
        location: "asia-southeast1".to_owned(),
        tables: tables.iter().map(|table| (*table).to_owned()).collect(),
        batch: BatchConfig {
            size: 100,
            max_concurrent_pages: 3,
        },
        partition: PartitionFilter::On(partition_date()),
    }
}

fn paging() -> TransferPaging {
    TransferPaging {
        list_page_size: 100,
        page_batch_size: 100,
        max_concurrent_detail_fetches: 4,
        lookback: Duration::days(60),
        utc_offset_hours: 7,
    }
}

/// Transfers dispatched within the last few hours, newest first.
fn recent_transfers(count: i64, lines: usize) -> Vec<Transfer> {
    let now = Utc::now().naive_utc();
    (0..count)
        .map(|n| transfer(count - n, now - Duration::hours(n), lines))
        .collect()
}

fn relabeled_rows(descriptor: &TableDescriptor, count: u64, label: &str) -> Vec<TableRow> {
    (1..=count)
        .map(|id| {
            TableRow::try_new(
                descriptor,
                vec![Cell::I64(id as i64), Cell::String(format!("{label} {id}"))],
            )
            .unwrap()
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_table_does_not_stop_the_others() {
    init_test_tracing();
    let source = MemorySource::new();
    for name in ["items", "branches", "customers"] {
        let table = numbered_table(name);
        let rows = numbered_rows(&table, 250);
        source.add_table(table, rows).await;
    }
    source.fail_descriptor("branches").await;

    let warehouse = MemoryWarehouse::new(PartitionFilter::On(partition_date()));
    let orchestrator = SyncOrchestrator::<_, _, FakeTransferApi>::new(
        source,
        warehouse.clone(),
        None,
        settings(&["items", "branches", "customers"]),
    );

    let report = orchestrator.run().await;

    assert_eq!(report.units.len(), 3);
    let failed: Vec<&str> = report
        .failed_units()
        .map(|unit| unit.unit.as_str())
        .collect();
    assert_eq!(failed, vec!["branches"]);
    assert_eq!(
        report.unit("branches").unwrap().error.as_ref().unwrap().kind(),
        ErrorKind::SourceQueryFailed
    );
    assert!(!report.unit("branches").unwrap().merged);

    for name in ["items", "customers"] {
        let unit = report.unit(name).unwrap();
        assert!(unit.merged);
        assert_eq!(unit.rows_staged, 250);
        assert_eq!(warehouse.rows(&TableRef::new("websync", name)).await.len(), 250);
    }
    assert_eq!(report.rows_staged(), 500);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_page_is_skipped_and_the_rest_merged() {
    init_test_tracing();
    let source = MemorySource::new();
    let table = numbered_table("items");
    let rows = numbered_rows(&table, 250);
    source.add_table(table, rows).await;
    source.fail_page("items", 100).await;

    let warehouse = MemoryWarehouse::new(PartitionFilter::On(partition_date()));
    let orchestrator = SyncOrchestrator::<_, _, FakeTransferApi>::new(
        source,
        warehouse.clone(),
        None,
        settings(&["items"]),
    );

    let report = orchestrator.run().await;

    let unit = report.unit("items").unwrap();
    assert!(unit.is_success());
    assert!(unit.merged);
    assert_eq!(unit.skipped_items, 1);
    assert_eq!(unit.rows_staged, 150);
    assert_eq!(
        warehouse.rows(&TableRef::new("websync", "items")).await.len(),
        150
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rerun_updates_target_rows_instead_of_duplicating_them() {
    init_test_tracing();
    let source = MemorySource::new();
    let table = numbered_table("items");
    source
        .add_table(table.clone(), relabeled_rows(&table, 120, "old"))
        .await;

    let warehouse = MemoryWarehouse::new(PartitionFilter::On(partition_date()));
    let orchestrator = SyncOrchestrator::<_, _, FakeTransferApi>::new(
        source.clone(),
        warehouse.clone(),
        None,
        settings(&["items"]),
    );

    orchestrator.run().await;
    source
        .add_table(table.clone(), relabeled_rows(&table, 120, "new"))
        .await;
    let report = orchestrator.run().await;

    assert!(report.unit("items").unwrap().merged);

    let target = warehouse.rows(&TableRef::new("websync", "items")).await;
    assert_eq!(target.len(), 120);
    assert!(target.iter().all(|row| match &row["label"] {
        Cell::String(label) => label.starts_with("new "),
        _ => false,
    }));
    assert!(
        target
            .iter()
            .all(|row| row["_date"] == Cell::Date(partition_date()))
    );

    // Both runs stay in staging; the merge keeps the latest of them.
    let staging = warehouse.rows(&TableRef::new("presync", "items")).await;
    assert_eq!(staging.len(), 240);
}

#[tokio::test(flavor = "multi_thread")]
async fn table_without_key_fails_before_staging() {
    init_test_tracing();
    let source = MemorySource::new();
    let table = TableDescriptor::new(
        "audit_log",
        vec![
            ColumnSchema::new("event", "TEXT", ColumnType::String, true, false),
            ColumnSchema::new("at", "TIMESTAMPTZ", ColumnType::TimestampTz, true, false),
        ],
    );
    let rows = vec![
        TableRow::try_new(
            &table,
            vec![Cell::String("login".to_owned()), Cell::TimestampTz(Utc::now())],
        )
        .unwrap(),
    ];
    source.add_table(table, rows).await;

    let warehouse = MemoryWarehouse::new(PartitionFilter::On(partition_date()));
    let orchestrator = SyncOrchestrator::<_, _, FakeTransferApi>::new(
        source.clone(),
        warehouse.clone(),
        None,
        settings(&["audit_log"]),
    );

    let report = orchestrator.run().await;

    let unit = report.unit("audit_log").unwrap();
    assert!(!unit.merged);
    assert_eq!(
        unit.error.as_ref().unwrap().kind(),
        ErrorKind::SchemaMismatch
    );
    assert!(source.fetches().await.is_empty());
    assert!(
        !warehouse
            .has_table(&TableRef::new("presync", "audit_log"))
            .await
    );
    assert!(warehouse.queries().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn staging_table_missing_columns_fails_before_reading_the_source() {
    init_test_tracing();
    let source = MemorySource::new();
    let table = numbered_table("items");
    let rows = numbered_rows(&table, 10);
    source.add_table(table, rows).await;

    let warehouse = MemoryWarehouse::new(PartitionFilter::On(partition_date()));
    warehouse
        .create_table(
            TableRef::new("presync", "items"),
            vec!["_date".to_owned(), "id".to_owned()],
        )
        .await;

    let orchestrator = SyncOrchestrator::<_, _, FakeTransferApi>::new(
        source.clone(),
        warehouse,
        None,
        settings(&["items"]),
    );

    let report = orchestrator.run().await;

    let err = report.unit("items").unwrap().error.clone().unwrap();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    let detail = err.detail().unwrap();
    assert!(detail.contains("label"));
    assert!(detail.contains("_created_at"));
    assert!(source.fetches().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn transfers_are_merged_after_relational_tables() {
    init_test_tracing();
    let source = MemorySource::new();
    let table = numbered_table("items");
    let rows = numbered_rows(&table, 5);
    source.add_table(table, rows).await;

    let api = FakeTransferApi::new(recent_transfers(3, 2));
    for id in 1..=3 {
        api.set_details(id, details_for(id, 2)).await;
    }

    let warehouse = MemoryWarehouse::new(PartitionFilter::On(partition_date()));
    let orchestrator = SyncOrchestrator::new(
        source,
        warehouse.clone(),
        Some((api.clone(), paging())),
        settings(&["items"]),
    );

    let report = orchestrator.run().await;

    let names: Vec<&str> = report.units.iter().map(|unit| unit.unit.as_str()).collect();
    assert_eq!(names, vec!["items", TRANSFERS_TABLE]);
    assert_eq!(report.failed_units().count(), 0);

    let unit = report.unit(TRANSFERS_TABLE).unwrap();
    assert!(unit.merged);
    assert_eq!(unit.rows_staged, 6);

    let target = warehouse
        .rows(&TableRef::new("websync", TRANSFERS_TABLE))
        .await;
    assert_eq!(target.len(), 6);
    assert!(
        target
            .iter()
            .any(|row| row["sent_imei_serials"] == Cell::String("SN-3-2".to_owned()))
    );
    assert_eq!(api.detail_calls().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn transfer_list_failure_fails_only_the_transfer_unit() {
    init_test_tracing();
    let source = MemorySource::new();
    let table = numbered_table("items");
    let rows = numbered_rows(&table, 5);
    source.add_table(table, rows).await;

    let api = FakeTransferApi::new(recent_transfers(3, 1));
    api.fail_list_at(0).await;

    let warehouse = MemoryWarehouse::new(PartitionFilter::On(partition_date()));
    let orchestrator = SyncOrchestrator::new(
        source,
        warehouse.clone(),
        Some((api, paging())),
        settings(&["items"]),
    );

    let report = orchestrator.run().await;

    assert!(report.unit("items").unwrap().merged);

    let unit = report.unit(TRANSFERS_TABLE).unwrap();
    assert!(!unit.merged);
    assert_eq!(
        unit.error.as_ref().unwrap().kind(),
        ErrorKind::UnexpectedResponseStatus
    );
    assert!(
        warehouse
            .rows(&TableRef::new("websync", TRANSFERS_TABLE))
            .await
            .is_empty()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn transfers_staged_before_a_failed_batch_are_merged() {
    init_test_tracing();
    let api = FakeTransferApi::new(recent_transfers(250, 1));
    let warehouse = MemoryWarehouse::new(PartitionFilter::On(partition_date()));
    warehouse
        .fail_insert(&TableRef::new("presync", TRANSFERS_TABLE), 1)
        .await;

    let orchestrator = SyncOrchestrator::new(
        MemorySource::new(),
        warehouse.clone(),
        Some((api.clone(), paging())),
        settings(&[]),
    );

    let report = orchestrator.run().await;

    let unit = report.unit(TRANSFERS_TABLE).unwrap();
    assert!(unit.is_success());
    assert!(unit.merged);
    assert_eq!(unit.rows_staged, 100);

    let target = warehouse
        .rows(&TableRef::new("websync", TRANSFERS_TABLE))
        .await;
    assert_eq!(target.len(), 100);
    assert!(
        target
            .iter()
            .all(|row| matches!(row["id"], Cell::I64(id) if id > 150))
    );

    let offsets: Vec<u64> = api.list_calls().await.iter().map(|(_, o)| *o).collect();
    assert_eq!(offsets, vec![0, 100]);
}

#[tokio::test(flavor = "multi_thread")]
async fn skipped_pages_are_reported_with_their_errors() {
    init_test_tracing();
    let source = MemorySource::new();
    let table = numbered_table("items");
    let rows = numbered_rows(&table, 250);
    source.add_table(table, rows).await;
    source.fail_page("items", 0).await;
    source.fail_page("items", 200).await;

    let warehouse = MemoryWarehouse::new(PartitionFilter::On(partition_date()));
    let orchestrator = SyncOrchestrator::<_, _, FakeTransferApi>::new(
        source,
        warehouse,
        None,
        settings(&["items"]),
    );

    let report = orchestrator.run().await;

    let unit = report.unit("items").unwrap();
    assert!(unit.merged);
    assert_eq!(unit.skipped_items, 2);
    assert_eq!(unit.rows_staged, 100);
    let errors = unit.skipped_errors.as_ref().unwrap();
    assert_eq!(errors.errors().map(<[_]>::len), Some(2));
    assert_eq!(errors.kinds(), vec![ErrorKind::SourceQueryFailed; 2]);
}
