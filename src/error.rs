use thiserror::Error;

use crate::storage::StorageError;
use crate::types::Denial;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {}", .0.message())]
    Forbidden(Denial),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A ledger or version-history invariant does not hold. Never expected in
    /// correct operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    pub(crate) fn asset_not_found(id: &str) -> Self {
        Self::NotFound(format!("asset '{id}'"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
