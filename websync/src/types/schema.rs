use std::fmt;

/// Column kinds supported end to end, from source decoding to warehouse columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Numeric,
    String,
    Uuid,
    Json,
    Bytes,
    Date,
    Time,
    /// Timestamp without a time zone.
    Timestamp,
    /// Timestamp normalized to UTC.
    TimestampTz,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Schema of a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    /// Type name reported by the source, e.g. `INT4` or `TSVECTOR`.
    pub source_type: String,
    pub typ: ColumnType,
    pub nullable: bool,
    /// Whether the column is part of the natural key used when merging.
    pub primary: bool,
}

impl ColumnSchema {
    pub fn new(
        name: impl Into<String>,
        source_type: impl Into<String>,
        typ: ColumnType,
        nullable: bool,
        primary: bool,
    ) -> ColumnSchema {
        ColumnSchema {
            name: name.into(),
            source_type: source_type.into(),
            typ,
            nullable,
            primary,
        }
    }
}

/// Name and ordered columns of a table, as read from its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Name of the table in its source.
    pub name: String,
    pub column_schemas: Vec<ColumnSchema>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, column_schemas: Vec<ColumnSchema>) -> TableDescriptor {
        TableDescriptor {
            name: name.into(),
            column_schemas,
        }
    }

    /// Name of the table in the warehouse, which only accepts lowercase table names here.
    pub fn warehouse_table_name(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_schemas
            .iter()
            .position(|column| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.column_schemas.iter().map(|column| column.name.as_str())
    }

    /// Columns identifying a row: the primary key, or `id` when the source declares none.
    pub fn key_columns(&self) -> Vec<&str> {
        let primary: Vec<&str> = self
            .column_schemas
            .iter()
            .filter(|column| column.primary)
            .map(|column| column.name.as_str())
            .collect();

        if !primary.is_empty() {
            return primary;
        }

        self.column_schemas
            .iter()
            .find(|column| column.name == "id")
            .map(|column| vec![column.name.as_str()])
            .unwrap_or_default()
    }
}
