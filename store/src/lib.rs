//! The Durable Store: append-only messages, `AgentRun` recovery
//! rows, and compaction history, behind the [`DurableStore`] trait with a
//! SQLite-backed and an in-memory implementation.

mod error;
mod in_memory_store;
mod sqlite_store;
mod sqlite_util;
mod traits;

pub use error::{StoreError, StoreResult};
pub use in_memory_store::InMemoryStore;
pub use sqlite_store::SqliteStore;
pub use traits::DurableStore;
