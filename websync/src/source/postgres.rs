use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::quote_identifier;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::source::RelationalSource;
use crate::sync_error;
use crate::types::{Cell, ColumnSchema, ColumnType, TableDescriptor, TableRow};

macro_rules! define_column_type_mappings {
    (
        native { $( $native:literal => $typ:ident ),* $(,)? }
        text_cast { $( $cast:literal ),* $(,)? }
    ) => {
        /// Maps a Postgres type name, as reported by `pg_type.typname` in upper case, to the
        /// column kind it is synced as.
        ///
        /// Types without a native mapping that have a text representation, arrays included, are
        /// synced as strings. Anything else is rejected with [`ErrorKind::UnsupportedColumnType`].
        pub fn column_type_from_postgres(type_name: &str) -> SyncResult<ColumnType> {
            match type_name {
                $( $native => Ok(ColumnType::$typ), )*
                name if needs_text_cast(name) => Ok(ColumnType::String),
                name => Err(sync_error!(
                    ErrorKind::UnsupportedColumnType,
                    "Postgres column type is not supported",
                    format!("type `{name}`")
                )),
            }
        }

        /// Returns whether values of `type_name` are read through a `::text` cast.
        fn needs_text_cast(type_name: &str) -> bool {
            type_name.starts_with('_') || matches!(type_name, $( $cast )|*)
        }
    };
}

define_column_type_mappings! {
    native {
        "BOOL" => Bool,
        "INT2" => Int16,
        "INT4" => Int32,
        "INT8" => Int64,
        "FLOAT4" => Float32,
        "FLOAT8" => Float64,
        "NUMERIC" => Numeric,
        "TEXT" => String,
        "VARCHAR" => String,
        "BPCHAR" => String,
        "NAME" => String,
        "UUID" => Uuid,
        "JSON" => Json,
        "JSONB" => Json,
        "BYTEA" => Bytes,
        "DATE" => Date,
        "TIME" => Time,
        "TIMESTAMP" => Timestamp,
        "TIMESTAMPTZ" => TimestampTz,
    }
    text_cast {
        "CHAR",
        "CITEXT",
        "TSVECTOR",
        "TSQUERY",
        "INTERVAL",
        "TIMETZ",
        "INET",
        "CIDR",
        "MACADDR",
        "MACADDR8",
        "MONEY",
        "XML",
        "BIT",
        "VARBIT",
    }
}

/// Relational source reading tables of a Postgres database.
#[derive(Debug, Clone)]
pub struct PostgresSource {
    pool: PgPool,
}

impl PostgresSource {
    pub fn new(pool: PgPool) -> PostgresSource {
        PostgresSource { pool }
    }

    /// Connects to the database described by `config` with a pool of at most `max_connections`.
    pub async fn connect(
        config: &PgConnectionConfig,
        max_connections: u32,
    ) -> SyncResult<PostgresSource> {
        let options = config.with_db();

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::SourceConnectionFailed,
                    "Could not connect to the source database",
                    err.to_string(),
                    source: err
                )
            })?;

        info!(
            host = %config.host,
            database = %config.name,
            max_connections,
            "connected to source database"
        );

        Ok(PostgresSource { pool })
    }
}

impl RelationalSource for PostgresSource {
    async fn table_descriptor(&self, table: &str) -> SyncResult<TableDescriptor> {
        let rows = sqlx::query(
            r#"
            select
                a.attname as name,
                upper(t.typname) as type_name,
                not a.attnotnull as nullable,
                coalesce(i.indisprimary, false) as primary_key
            from pg_attribute a
            join pg_type t on t.oid = a.atttypid
            left join pg_index i
                on i.indrelid = a.attrelid and i.indisprimary and a.attnum = any(i.indkey)
            where a.attrelid = $1::regclass and a.attnum > 0 and not a.attisdropped
            order by a.attnum
            "#,
        )
        .bind(quote_identifier(table).to_string())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Source table has no columns",
                format!("table `{table}`")
            );
        }

        let mut column_schemas = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let type_name: String = row.try_get("type_name")?;
            let nullable: bool = row.try_get("nullable")?;
            let primary: bool = row.try_get("primary_key")?;

            let typ = column_type_from_postgres(&type_name).map_err(|err| {
                sync_error!(
                    ErrorKind::UnsupportedColumnType,
                    "Postgres column type is not supported",
                    format!(
                        "column `{name}` of table `{table}`: {}",
                        err.detail().unwrap_or_default()
                    )
                )
            })?;

            column_schemas.push(ColumnSchema::new(name, type_name, typ, nullable, primary));
        }

        debug!(table, columns = column_schemas.len(), "read table descriptor");

        Ok(TableDescriptor::new(table, column_schemas))
    }

    async fn total_row_count(&self, table: &str) -> SyncResult<u64> {
        let query = format!("select count(*) from {}", quote_identifier(table));
        let count: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn rows(
        &self,
        descriptor: &TableDescriptor,
        limit: u64,
        offset: u64,
    ) -> SyncResult<Vec<TableRow>> {
        let query = select_page_query(descriptor);
        let rows = sqlx::query(&query)
            .bind(to_i64(limit)?)
            .bind(to_i64(offset)?)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let values = descriptor
                    .column_schemas
                    .iter()
                    .enumerate()
                    .map(|(index, column)| decode_cell(row, index, column.typ))
                    .collect::<SyncResult<Vec<_>>>()?;

                Ok(TableRow::new(values))
            })
            .collect()
    }
}

fn to_i64(value: u64) -> SyncResult<i64> {
    i64::try_from(value).map_err(|_| {
        sync_error!(
            ErrorKind::InvalidData,
            "Page bound does not fit in a Postgres bigint",
            value.to_string()
        )
    })
}

/// Builds the query reading one page of the table, ordered by its key columns.
fn select_page_query(descriptor: &TableDescriptor) -> String {
    let select_list = descriptor
        .column_schemas
        .iter()
        .map(|column| {
            let quoted = quote_identifier(&column.name);
            if needs_text_cast(&column.source_type) {
                format!("{quoted}::text as {quoted}")
            } else {
                quoted.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let order_by = descriptor
        .key_columns()
        .into_iter()
        .map(|column| quote_identifier(column).to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let table = quote_identifier(&descriptor.name);
    if order_by.is_empty() {
        format!("select {select_list} from {table} limit $1 offset $2")
    } else {
        format!("select {select_list} from {table} order by {order_by} limit $1 offset $2")
    }
}

fn decode_cell(row: &PgRow, index: usize, typ: ColumnType) -> SyncResult<Cell> {
    let cell = match typ {
        ColumnType::Bool => row.try_get::<Option<bool>, _>(index)?.map(Cell::Bool),
        ColumnType::Int16 => row.try_get::<Option<i16>, _>(index)?.map(Cell::I16),
        ColumnType::Int32 => row.try_get::<Option<i32>, _>(index)?.map(Cell::I32),
        ColumnType::Int64 => row.try_get::<Option<i64>, _>(index)?.map(Cell::I64),
        ColumnType::Float32 => row.try_get::<Option<f32>, _>(index)?.map(Cell::F32),
        ColumnType::Float64 => row.try_get::<Option<f64>, _>(index)?.map(Cell::F64),
        ColumnType::Numeric => row
            .try_get::<Option<BigDecimal>, _>(index)?
            .map(Cell::Numeric),
        ColumnType::String => row.try_get::<Option<String>, _>(index)?.map(Cell::String),
        ColumnType::Uuid => row.try_get::<Option<Uuid>, _>(index)?.map(Cell::Uuid),
        ColumnType::Json => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(Cell::Json),
        ColumnType::Bytes => row.try_get::<Option<Vec<u8>>, _>(index)?.map(Cell::Bytes),
        ColumnType::Date => row.try_get::<Option<NaiveDate>, _>(index)?.map(Cell::Date),
        ColumnType::Time => row.try_get::<Option<NaiveTime>, _>(index)?.map(Cell::Time),
        ColumnType::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(Cell::Timestamp),
        ColumnType::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(Cell::TimestampTz),
    };

    Ok(cell.unwrap_or(Cell::Null))
}
