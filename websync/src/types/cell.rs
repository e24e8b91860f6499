use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::types::ColumnType;

/// A single typed value of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    String(String),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Numeric(BigDecimal),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Returns whether this value can be stored in a column of type `typ`.
    ///
    /// [`Cell::Null`] fits every type, nullability is checked separately.
    pub fn fits(&self, typ: ColumnType) -> bool {
        matches!(
            (self, typ),
            (Cell::Null, _)
                | (Cell::Bool(_), ColumnType::Bool)
                | (Cell::String(_), ColumnType::String)
                | (Cell::I16(_), ColumnType::Int16)
                | (Cell::I32(_), ColumnType::Int32)
                | (Cell::I64(_), ColumnType::Int64)
                | (Cell::F32(_), ColumnType::Float32)
                | (Cell::F64(_), ColumnType::Float64)
                | (Cell::Numeric(_), ColumnType::Numeric)
                | (Cell::Date(_), ColumnType::Date)
                | (Cell::Time(_), ColumnType::Time)
                | (Cell::Timestamp(_), ColumnType::Timestamp)
                | (Cell::TimestampTz(_), ColumnType::TimestampTz)
                | (Cell::Uuid(_), ColumnType::Uuid)
                | (Cell::Json(_), ColumnType::Json)
                | (Cell::Bytes(_), ColumnType::Bytes)
        )
    }

    /// Name of the variant, used in error details.
    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::String(_) => "string",
            Cell::I16(_) => "i16",
            Cell::I32(_) => "i32",
            Cell::I64(_) => "i64",
            Cell::F32(_) => "f32",
            Cell::F64(_) => "f64",
            Cell::Numeric(_) => "numeric",
            Cell::Date(_) => "date",
            Cell::Time(_) => "time",
            Cell::Timestamp(_) => "timestamp",
            Cell::TimestampTz(_) => "timestamptz",
            Cell::Uuid(_) => "uuid",
            Cell::Json(_) => "json",
            Cell::Bytes(_) => "bytes",
        }
    }
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map(Cell::String).unwrap_or(Cell::Null)
    }
}

impl From<Option<NaiveDateTime>> for Cell {
    fn from(value: Option<NaiveDateTime>) -> Self {
        value.map(Cell::Timestamp).unwrap_or(Cell::Null)
    }
}

impl From<Option<i64>> for Cell {
    fn from(value: Option<i64>) -> Self {
        value.map(Cell::I64).unwrap_or(Cell::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_fits_every_type() {
        assert!(Cell::Null.fits(ColumnType::Int64));
        assert!(Cell::Null.fits(ColumnType::Json));
    }

    #[test]
    fn integer_widths_are_distinct() {
        assert!(Cell::I32(1).fits(ColumnType::Int32));
        assert!(!Cell::I32(1).fits(ColumnType::Int64));
        assert!(!Cell::String("1".to_owned()).fits(ColumnType::Int64));
    }

    #[test]
    fn options_convert_to_null() {
        assert_eq!(Cell::from(None::<String>), Cell::Null);
        assert_eq!(Cell::from(Some(7_i64)), Cell::I64(7));
    }
}
