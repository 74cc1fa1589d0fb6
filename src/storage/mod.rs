//! Content-addressed-by-path blob storage for asset payloads.

mod local;

pub use local::LocalStorage;

use std::future::Future;
use std::io::ErrorKind;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob path: {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    fn from_io(path: &str, e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::NotFound {
            Self::NotFound(path.to_string())
        } else {
            Self::Io(e)
        }
    }
}

/// Backend holding payload bytes under the keys derived by
/// [`payload_path`](crate::store::path::payload_path).
///
/// Implementations must make `put` atomic: a reader never observes a
/// partially written blob.
pub trait BlobStorage: Send + Sync + 'static {
    type Reader: AsyncRead + Send + Unpin + 'static;

    /// Writes `data` under `path`, replacing any existing blob, and returns
    /// the number of bytes stored.
    fn put(&self, path: &str, data: &[u8]) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Opens the blob for streaming along with its size in bytes.
    fn get(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<(Self::Reader, u64), StorageError>> + Send;

    /// Returns false if there was nothing to delete.
    fn delete(&self, path: &str) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn exists(&self, path: &str) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn size(&self, path: &str) -> impl Future<Output = Result<u64, StorageError>> + Send;
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
