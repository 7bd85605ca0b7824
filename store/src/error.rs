//! Durable Store error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
    #[error("run {0} not found")]
    RunNotFound(u64),
}

pub type StoreResult<T> = Result<T, StoreError>;
