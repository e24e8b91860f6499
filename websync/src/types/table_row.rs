use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::types::{Cell, TableDescriptor};

/// A row of a table, with values in the column order of its [`TableDescriptor`].
///
/// Rows are built either positionally with [`TableRow::try_new`] or by column name with
/// [`TableRowBuilder`]; both validate the values against the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    values: Vec<Cell>,
}

impl TableRow {
    /// Creates a row from values already known to match a descriptor.
    pub(crate) fn new(values: Vec<Cell>) -> TableRow {
        TableRow { values }
    }

    /// Creates a row, checking arity, value types and nullability against `descriptor`.
    pub fn try_new(descriptor: &TableDescriptor, values: Vec<Cell>) -> SyncResult<TableRow> {
        if values.len() != descriptor.column_schemas.len() {
            bail!(
                ErrorKind::SchemaMismatch,
                "Row does not match the table columns",
                format!(
                    "table `{}` has {} columns, row has {} values",
                    descriptor.name,
                    descriptor.column_schemas.len(),
                    values.len()
                )
            );
        }

        for (column, value) in descriptor.column_schemas.iter().zip(&values) {
            check_value(descriptor, &column.name, column.typ, column.nullable, value)?;
        }

        Ok(TableRow { values })
    }

    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Cell> {
        self.values
    }

    /// Returns the value of `column`, if the descriptor has such a column.
    pub fn get<'a>(&'a self, descriptor: &TableDescriptor, column: &str) -> Option<&'a Cell> {
        descriptor
            .column_index(column)
            .and_then(|index| self.values.get(index))
    }
}

fn check_value(
    descriptor: &TableDescriptor,
    name: &str,
    typ: crate::types::ColumnType,
    nullable: bool,
    value: &Cell,
) -> SyncResult<()> {
    if value.is_null() && !nullable {
        bail!(
            ErrorKind::SchemaMismatch,
            "Null value in a non nullable column",
            format!("column `{name}` of table `{}`", descriptor.name)
        );
    }

    if !value.fits(typ) {
        bail!(
            ErrorKind::ConversionError,
            "Value does not match the column type",
            format!(
                "column `{name}` of table `{}` is {typ}, got {}",
                descriptor.name,
                value.type_name()
            )
        );
    }

    Ok(())
}

/// Builds a [`TableRow`] column by column.
///
/// Unknown columns and mistyped values are rejected when set. Columns left unset become
/// [`Cell::Null`] when nullable, and fail [`TableRowBuilder::build`] otherwise.
#[derive(Debug)]
pub struct TableRowBuilder<'a> {
    descriptor: &'a TableDescriptor,
    values: Vec<Option<Cell>>,
}

impl<'a> TableRowBuilder<'a> {
    pub fn new(descriptor: &'a TableDescriptor) -> TableRowBuilder<'a> {
        TableRowBuilder {
            descriptor,
            values: vec![None; descriptor.column_schemas.len()],
        }
    }

    pub fn set(&mut self, column: &str, value: impl Into<Cell>) -> SyncResult<&mut Self> {
        let Some(index) = self.descriptor.column_index(column) else {
            bail!(
                ErrorKind::SchemaMismatch,
                "Unknown column",
                format!("table `{}` has no column `{column}`", self.descriptor.name)
            );
        };

        let schema = &self.descriptor.column_schemas[index];
        let value = value.into();
        check_value(
            self.descriptor,
            &schema.name,
            schema.typ,
            schema.nullable,
            &value,
        )?;
        self.values[index] = Some(value);

        Ok(self)
    }

    pub fn build(self) -> SyncResult<TableRow> {
        let mut values = Vec::with_capacity(self.values.len());
        let mut missing = Vec::new();

        for (schema, value) in self.descriptor.column_schemas.iter().zip(self.values) {
            match value {
                Some(value) => values.push(value),
                None if schema.nullable => values.push(Cell::Null),
                None => missing.push(schema.name.as_str()),
            }
        }

        if !missing.is_empty() {
            bail!(
                ErrorKind::SchemaMismatch,
                "Row is missing non nullable columns",
                format!("table `{}`: {}", self.descriptor.name, missing.join(", "))
            );
        }

        Ok(TableRow::new(values))
    }
}
