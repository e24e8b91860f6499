//! Stock transfers from the KiotViet retail platform.
//!
//! [`TransferSync`] lists transfers newest first, fetches each transfer's back office details with
//! bounded concurrency and stages one row per transfer line. Requests go through an
//! [`AuthenticatedClient`], which retries a request once with a refreshed credential when it is
//! answered with `401 Unauthorized`.

mod aggregator;
mod auth;
mod client;
mod flatten;
mod models;

pub use aggregator::{TransferPaging, TransferSync, TransferSyncReport};
pub use auth::{
    AuthScheme, AuthenticatedClient, ClientCredentialsAuth, Credential, CredentialCache,
    RETAILER_HEADER, SessionLoginAuth,
};
pub use client::{KiotVietClient, TransferApi};
pub use flatten::{SUB_ID_COLUMN, TRANSFERS_TABLE, transfer_rows, transfers_descriptor};
pub use models::{
    DetailProduct, Transfer, TransferDetails, TransferLine, TransferLineDetail, TransferPage,
};
