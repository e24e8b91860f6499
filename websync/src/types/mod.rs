//! Typed values, table descriptors and rows moved between sources and the warehouse.

mod cell;
mod schema;
mod table_row;

pub use cell::Cell;
pub use schema::{ColumnSchema, ColumnType, TableDescriptor};
pub use table_row::{TableRow, TableRowBuilder};
