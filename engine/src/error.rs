//! The engine's own error kind.
//!
//! Every other kind in the taxonomy is surfaced through an existing
//! crate boundary (`ApiConfigError`/`DriverError` from `smithers-providers`,
//! `StoreError` from `smithers-store`, `ToolError` from `smithers-tools`);
//! `CompactionError` is the one new kind this crate introduces, for the
//! compaction engine's store reads (writes are logged and swallowed per
//! the durability policy, never bubbled up).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("store error while preparing compaction: {0}")]
    Store(#[from] smithers_store::StoreError),
}
