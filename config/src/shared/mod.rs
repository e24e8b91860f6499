//! Shared configuration types for websync services.

mod base;
mod batch;
mod connection;
mod kiotviet;
mod merge;
mod sync;
mod warehouse;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use connection::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
pub use kiotviet::KiotVietConfig;
pub use merge::MergeConfig;
pub use sync::{RelationalSyncConfig, SyncConfig};
pub use warehouse::{WarehouseBackend, WarehouseConfig};
