//! Relational sources tables are copied from.

mod base;
pub mod postgres;

pub use base::RelationalSource;
pub use postgres::{PostgresSource, column_type_from_postgres};
