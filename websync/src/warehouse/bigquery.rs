use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use gcp_bigquery_client::Client;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::error_proto::ErrorProto;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::merge::{PartitionFilter, TableRef, quote_identifier, sanitize_identifier};
use crate::sync_error;
use crate::types::{Cell, ColumnSchema, ColumnType, TableDescriptor, TableRow};
use crate::warehouse::{CREATED_AT_COLUMN, PARTITION_DATE_COLUMN, Warehouse};

/// Maximum number of rows sent in one `tabledata.insertAll` request.
const MAX_ROWS_PER_INSERT_REQUEST: usize = 500;

/// How long a single `jobs.query` or `jobs.getQueryResults` call waits for the job.
const QUERY_WAIT_TIMEOUT_MS: i32 = 30_000;

/// Converts BigQuery errors to sync errors with appropriate classification.
fn bq_error_to_sync_error(err: BQError) -> SyncError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::AuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication error",
        ),
        BQError::YupAuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery OAuth authentication error",
        ),
        BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication token missing",
        ),
        BQError::RequestError(_) => (
            ErrorKind::WarehouseConnectionFailed,
            "BigQuery request failed",
        ),
        BQError::ResponseError { .. } => {
            (ErrorKind::WarehouseQueryFailed, "BigQuery response error")
        }
        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery JSON serialization error",
        ),
        _ => (ErrorKind::WarehouseQueryFailed, "BigQuery operation failed"),
    };

    sync_error!(kind, description, err.to_string())
}

fn error_protos_detail(errors: &[ErrorProto]) -> String {
    errors
        .iter()
        .map(|error| {
            format!(
                "{}: {}",
                error.reason.as_deref().unwrap_or("unknown"),
                error.message.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Warehouse backed by BigQuery.
///
/// Tables are created with DDL, rows are streamed with `tabledata.insertAll` and queries run as
/// jobs that are polled until they complete.
#[derive(Clone)]
pub struct BigQueryWarehouse {
    project_id: String,
    client: Client,
    staging_dataset: String,
    staging_partition_expiration_days: u32,
    partition: PartitionFilter,
}

impl BigQueryWarehouse {
    /// Creates a warehouse authenticating with a service account key JSON string.
    pub async fn new_with_key(
        project_id: String,
        sa_key: &str,
        staging_dataset: String,
        staging_partition_expiration_days: u32,
        partition: PartitionFilter,
    ) -> SyncResult<BigQueryWarehouse> {
        let sa_key = parse_service_account_key(sa_key)
            .map_err(BQError::from)
            .map_err(bq_error_to_sync_error)?;
        let client = ClientBuilder::new()
            .build_from_service_account_key(sa_key, false)
            .await
            .map_err(bq_error_to_sync_error)?;

        Ok(BigQueryWarehouse {
            project_id,
            client,
            staging_dataset,
            staging_partition_expiration_days,
            partition,
        })
    }

    /// Returns the fully qualified, quoted name of `table`.
    pub fn full_table_name(&self, table: &TableRef) -> SyncResult<String> {
        let project_id = sanitize_identifier(&self.project_id, "BigQuery project id")?;
        let dataset_id = sanitize_identifier(&table.dataset, "BigQuery dataset id")?;
        let table_id = sanitize_identifier(&table.table, "BigQuery table id")?;

        Ok(format!("`{project_id}.{dataset_id}.{table_id}`"))
    }

    fn is_staging(&self, table: &TableRef) -> bool {
        table.dataset == self.staging_dataset
    }

    async fn create_table_if_missing(&self, table: &TableRef, ddl: String) -> SyncResult<()> {
        info!(table = %table, "creating table if missing");
        debug!(%ddl, "running ddl");

        self.run_query(&ddl, "").await
    }

    fn check_job_errors(errors: Option<&[ErrorProto]>, sql: &str) -> SyncResult<()> {
        if let Some(errors) = errors
            && !errors.is_empty()
        {
            bail!(
                ErrorKind::WarehouseQueryFailed,
                "BigQuery job failed",
                format!("{}\nquery: {sql}", error_protos_detail(errors))
            );
        }

        Ok(())
    }
}

impl fmt::Debug for BigQueryWarehouse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryWarehouse")
            .field("project_id", &self.project_id)
            .field("staging_dataset", &self.staging_dataset)
            .field(
                "staging_partition_expiration_days",
                &self.staging_partition_expiration_days,
            )
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

impl Warehouse for BigQueryWarehouse {
    fn name() -> &'static str {
        "bigquery"
    }

    async fn create_partitioned_tables(
        &self,
        target: &TableRef,
        staging: &TableRef,
        descriptor: &TableDescriptor,
    ) -> SyncResult<()> {
        let partition = quote_identifier(PARTITION_DATE_COLUMN)?;
        let columns = columns_spec(&descriptor.column_schemas)?;

        let target_ddl = format!(
            "create table if not exists {} ({partition} date, {columns}) partition by {partition}",
            self.full_table_name(target)?
        );
        self.create_table_if_missing(target, target_ddl).await?;

        let staging_ddl = format!(
            "create table if not exists {} ({partition} date, {columns}, {} timestamp) partition \
             by {partition} options(partition_expiration_days = {})",
            self.full_table_name(staging)?,
            quote_identifier(CREATED_AT_COLUMN)?,
            self.staging_partition_expiration_days
        );
        self.create_table_if_missing(staging, staging_ddl).await
    }

    async fn insert_rows(
        &self,
        table: &TableRef,
        descriptor: &TableDescriptor,
        rows: Vec<TableRow>,
    ) -> SyncResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let date = Value::String(self.partition.resolve(now).format("%Y-%m-%d").to_string());
        let created_at = self.is_staging(table).then(|| Value::String(now.to_rfc3339()));

        let project_id = sanitize_identifier(&self.project_id, "BigQuery project id")?;
        let total_rows = rows.len();
        let mut rows = rows.into_iter().peekable();

        while rows.peek().is_some() {
            let mut request = TableDataInsertAllRequest::new();
            for row in rows.by_ref().take(MAX_ROWS_PER_INSERT_REQUEST) {
                let mut object = Map::with_capacity(descriptor.column_schemas.len() + 2);
                object.insert(PARTITION_DATE_COLUMN.to_owned(), date.clone());
                for (column, cell) in descriptor.column_schemas.iter().zip(row.into_values()) {
                    object.insert(column.name.clone(), cell_to_json(cell));
                }
                if let Some(created_at) = &created_at {
                    object.insert(CREATED_AT_COLUMN.to_owned(), created_at.clone());
                }

                request
                    .add_row(None, object)
                    .map_err(bq_error_to_sync_error)?;
            }

            let response = self
                .client
                .tabledata()
                .insert_all(&project_id, &table.dataset, &table.table, request)
                .await
                .map_err(bq_error_to_sync_error)?;

            if let Some(errors) = response.insert_errors
                && !errors.is_empty()
            {
                bail!(
                    ErrorKind::WarehouseInsertFailed,
                    "BigQuery rejected inserted rows",
                    format!("table `{table}`: {errors:?}")
                );
            }
        }

        debug!(table = %table, rows = total_rows, "inserted rows into bigquery");

        Ok(())
    }

    async fn run_query(&self, sql: &str, location: &str) -> SyncResult<()> {
        let location = (!location.is_empty()).then(|| location.to_owned());

        let mut request = QueryRequest::new(sql);
        request.location = location.clone();
        request.timeout_ms = Some(QUERY_WAIT_TIMEOUT_MS);

        let response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(bq_error_to_sync_error)?;
        Self::check_job_errors(response.errors.as_deref(), sql)?;

        if response.job_complete.unwrap_or(false) {
            return Ok(());
        }

        let Some(job_id) = response.job_reference.and_then(|reference| reference.job_id) else {
            bail!(
                ErrorKind::WarehouseQueryFailed,
                "BigQuery did not return a job reference for an unfinished query",
                sql.to_owned()
            );
        };

        loop {
            debug!(%job_id, "waiting for bigquery job");

            let parameters = GetQueryResultsParameters {
                location: location.clone(),
                timeout_ms: Some(QUERY_WAIT_TIMEOUT_MS),
                ..Default::default()
            };
            let results = self
                .client
                .job()
                .get_query_results(&self.project_id, &job_id, parameters)
                .await
                .map_err(bq_error_to_sync_error)?;
            Self::check_job_errors(results.errors.as_deref(), sql)?;

            if results.job_complete.unwrap_or(false) {
                return Ok(());
            }
        }
    }

    async fn table_columns(&self, table: &TableRef) -> SyncResult<Option<Vec<String>>> {
        let result = self
            .client
            .table()
            .get(&self.project_id, &table.dataset, &table.table, None)
            .await;

        match result {
            Ok(found) => Ok(Some(
                found
                    .schema
                    .fields
                    .unwrap_or_default()
                    .into_iter()
                    .map(|field| field.name)
                    .collect(),
            )),
            Err(BQError::ResponseError { error }) if error.error.code == 404 => Ok(None),
            Err(err) => Err(bq_error_to_sync_error(err)),
        }
    }
}

/// Generates the column list of a `create table` statement.
fn columns_spec(column_schemas: &[ColumnSchema]) -> SyncResult<String> {
    let specs = column_schemas
        .iter()
        .map(|column| {
            let name = quote_identifier(&column.name)?;
            let mut spec = format!("{name} {}", bigquery_type(column.typ));
            if !column.nullable {
                spec.push_str(" not null");
            }

            Ok(spec)
        })
        .collect::<SyncResult<Vec<_>>>()?;

    Ok(specs.join(", "))
}

fn bigquery_type(typ: ColumnType) -> &'static str {
    match typ {
        ColumnType::Bool => "bool",
        ColumnType::Int16 | ColumnType::Int32 | ColumnType::Int64 => "int64",
        ColumnType::Float32 | ColumnType::Float64 => "float64",
        ColumnType::Numeric => "bignumeric",
        ColumnType::String | ColumnType::Uuid => "string",
        ColumnType::Json => "json",
        ColumnType::Bytes => "bytes",
        ColumnType::Date => "date",
        ColumnType::Time => "time",
        ColumnType::Timestamp => "datetime",
        ColumnType::TimestampTz => "timestamp",
    }
}

/// Encodes a cell the way `tabledata.insertAll` expects it.
fn cell_to_json(cell: Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(value) => Value::Bool(value),
        Cell::String(value) => Value::String(value),
        Cell::I16(value) => Value::from(value),
        Cell::I32(value) => Value::from(value),
        // int64 values are sent as strings to keep their full precision.
        Cell::I64(value) => Value::String(value.to_string()),
        Cell::F32(value) => float_to_json(f64::from(value)),
        Cell::F64(value) => float_to_json(value),
        Cell::Numeric(value) => Value::String(value.normalized().to_string()),
        Cell::Date(value) => Value::String(value.format("%Y-%m-%d").to_string()),
        Cell::Time(value) => Value::String(value.format("%H:%M:%S%.f").to_string()),
        Cell::Timestamp(value) => Value::String(value.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Cell::TimestampTz(value) => Value::String(value.to_rfc3339()),
        Cell::Uuid(value) => Value::String(value.to_string()),
        Cell::Json(value) => Value::String(value.to_string()),
        Cell::Bytes(value) => Value::String(STANDARD.encode(value)),
    }
}

fn float_to_json(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(value.to_string()))
}
