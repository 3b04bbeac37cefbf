//! Record store boundary for claimable work items.
//!
//! Two operations carry the whole protocol: an atomic claim that flips the claim
//! flag of a batch of eligible rows, and a result write that fills the result
//! column of one row. Both the Postgres adapter and the in-memory store honour
//! the same eligibility predicate and never overwrite a completed result.

pub mod in_memory;
pub mod postgres;
pub mod table;
pub mod r#trait;

pub use in_memory::{InMemoryWorkItemStore, StoredWorkItem, WorkStoreStats};
pub use postgres::PostgresWorkItemStore;
pub use table::{WorkTable, WorkTableOverrides};
pub use r#trait::{ExhaustionPolicy, WorkItemStore, WorkStoreError};
