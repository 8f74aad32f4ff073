//! # Infrastructure Adapters
//!
//! In-memory implementations of the store, ledger and dead-letter interfaces,
//! used by tests and by single-instance deployments.

pub mod memory_event_log;
pub mod memory_stores;

pub use memory_event_log::{InMemoryDeadLetterStore, InMemoryEventLedger};
pub use memory_stores::{InMemoryActivityStore, InMemoryCredentialStore, InMemoryIdentityStore};
