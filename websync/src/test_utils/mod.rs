//! In-memory fakes of the systems websync talks to.
//!
//! [`source::MemorySource`] stands in for the relational source and [`transfers::FakeTransferApi`]
//! for the KiotViet API. Together with [`crate::warehouse::memory::MemoryWarehouse`] they let a
//! whole sync run without network access. Both fakes record the calls they receive and can be told
//! to fail specific calls.

pub mod source;
pub mod transfers;
